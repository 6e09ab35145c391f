use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use toolgate_learning::ExplorationMode;
use toolgate_pool::DownstreamConfig;
use toolgate_router::{RoutingMode, Strategy};
use toolgate_types::TransportKind;

use crate::error::{Error, Result};

/// Resolve the gateway data directory:
/// 1. Explicit path (highest)
/// 2. TOOLGATE_PATH environment variable
/// 3. XDG data directory
/// 4. ~/.toolgate as a last resort
pub fn resolve_data_path(explicit_path: Option<&str>) -> Result<PathBuf> {
    if let Some(path) = explicit_path {
        return Ok(expand_tilde(path));
    }
    if let Ok(env_path) = std::env::var("TOOLGATE_PATH") {
        return Ok(expand_tilde(&env_path));
    }
    if let Some(data_dir) = dirs::data_dir() {
        return Ok(data_dir.join("toolgate"));
    }
    if let Some(home) = std::env::var_os("HOME") {
        return Ok(PathBuf::from(home).join(".toolgate"));
    }
    Err(Error::Config(
        "Could not determine data path: no HOME directory or XDG data directory found".to_string(),
    ))
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    PathBuf::from(path)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ServerSection {
    pub name: String,
    pub transport: TransportKind,
    pub host: String,
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            name: "toolgate".to_string(),
            transport: TransportKind::Stdio,
            host: "127.0.0.1".to_string(),
            port: 8765,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ToolZooSection {
    /// Embedder identifier; the builtin feature-hashing embedder is the
    /// only model shipped in-process
    pub embedding_model: String,
    /// Vector index directory; empty means `<data>/zoo`
    pub persist_directory: String,
    pub collection_name: String,
    pub top_k: usize,
    pub similarity_threshold: f64,
}

impl Default for ToolZooSection {
    fn default() -> Self {
        Self {
            embedding_model: "builtin-hashing-384".to_string(),
            persist_directory: String::new(),
            collection_name: "toolgate_tools".to_string(),
            top_k: 5,
            similarity_threshold: 0.3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RouterSection {
    pub mode: RoutingMode,
    pub strategy: Strategy,
    pub max_tools: usize,
    pub min_tools: usize,
    pub max_per_server: usize,
    pub rerank: bool,
    pub candidate_pool_size: usize,
    pub max_context_tokens: usize,
    pub use_cross_encoder: bool,
    pub exploration_rate: f64,
    pub exploration_type: ExplorationMode,
    pub fallback_tools: Vec<String>,
}

impl Default for RouterSection {
    fn default() -> Self {
        Self {
            mode: RoutingMode::Hybrid,
            strategy: Strategy::Sota,
            max_tools: 10,
            min_tools: 1,
            max_per_server: 3,
            rerank: true,
            candidate_pool_size: 50,
            max_context_tokens: 8000,
            use_cross_encoder: false,
            exploration_rate: 0.1,
            exploration_type: ExplorationMode::Epsilon,
            fallback_tools: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPersistence {
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SessionSection {
    pub persistence: SessionPersistence,
    /// Empty means `<data>/sessions.db`
    pub sqlite_path: String,
    pub ttl_seconds: i64,
    pub max_messages: usize,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            persistence: SessionPersistence::Sqlite,
            sqlite_path: String::new(),
            ttl_seconds: 3600,
            max_messages: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct TelemetrySection {
    pub enabled: bool,
    /// Empty means `<data>/telemetry.db`
    pub db_path: String,
    pub log_query_text: bool,
    pub cleanup_hours: i64,
    pub latency_scale: f64,
    pub latency_cap: f64,
    pub context_scale: f64,
    pub context_cap: f64,
}

impl Default for TelemetrySection {
    fn default() -> Self {
        Self {
            enabled: true,
            db_path: String::new(),
            log_query_text: false,
            cleanup_hours: 168,
            latency_scale: 0.001,
            latency_cap: 0.3,
            context_scale: 0.0001,
            context_cap: 0.2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct BanditSection {
    pub enabled: bool,
    /// Empty means `<data>/bandit.db`
    pub db_path: String,
    pub feature_dim: usize,
    pub learning_rate: f64,
    pub l2_regularization: f64,
    pub persist_every_n_updates: u64,
}

impl Default for BanditSection {
    fn default() -> Self {
        Self {
            enabled: true,
            db_path: String::new(),
            feature_dim: toolgate_learning::FEATURE_DIM,
            learning_rate: 0.01,
            l2_regularization: 0.001,
            persist_every_n_updates: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct BiasLearningSection {
    pub enabled: bool,
    /// Empty means `<data>/biases.db`
    pub db_path: String,
    pub learning_rate: f64,
    pub decay_rate: f64,
    pub max_bias: f64,
    pub enable_delta_vectors: bool,
}

impl Default for BiasLearningSection {
    fn default() -> Self {
        Self {
            enabled: true,
            db_path: String::new(),
            learning_rate: 0.05,
            decay_rate: 0.001,
            max_bias: 0.5,
            enable_delta_vectors: false,
        }
    }
}

/// Root gateway configuration. The option surface is closed: unknown keys
/// anywhere in the file fail the load instead of being silently ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    pub server: ServerSection,
    pub tool_zoo: ToolZooSection,
    pub router: RouterSection,
    pub session: SessionSection,
    pub telemetry: TelemetrySection,
    pub bandit: BanditSection,
    pub bias_learning: BiasLearningSection,
    pub downstream_servers: Vec<DownstreamConfig>,
    /// Data directory override; empty means the resolved default
    pub data_path: String,
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::default_path()?;
        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn default_path() -> Result<PathBuf> {
        Ok(resolve_data_path(None)?.join("config.toml"))
    }

    pub fn data_dir(&self) -> Result<PathBuf> {
        let explicit = if self.data_path.is_empty() {
            None
        } else {
            Some(self.data_path.as_str())
        };
        resolve_data_path(explicit)
    }

    fn resolve_db(&self, configured: &str, default_name: &str) -> Result<PathBuf> {
        if configured.is_empty() {
            Ok(self.data_dir()?.join(default_name))
        } else {
            Ok(expand_tilde(configured))
        }
    }

    pub fn zoo_dir(&self) -> Result<PathBuf> {
        if self.tool_zoo.persist_directory.is_empty() {
            Ok(self.data_dir()?.join("zoo"))
        } else {
            Ok(expand_tilde(&self.tool_zoo.persist_directory))
        }
    }

    pub fn session_db(&self) -> Result<PathBuf> {
        self.resolve_db(&self.session.sqlite_path, "sessions.db")
    }

    pub fn telemetry_db(&self) -> Result<PathBuf> {
        self.resolve_db(&self.telemetry.db_path, "telemetry.db")
    }

    // Bandit weights and tool biases share one learning database by
    // default; they live in separate tables.
    pub fn bandit_db(&self) -> Result<PathBuf> {
        self.resolve_db(&self.bandit.db_path, "learning.db")
    }

    pub fn bias_db(&self) -> Result<PathBuf> {
        self.resolve_db(&self.bias_learning.db_path, "learning.db")
    }
}
