use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::util::estimate_schema_tokens;

/// Transport protocol used to reach a downstream server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    Stdio,
    Sse,
    StreamableHttp,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Stdio => "stdio",
            TransportKind::Sse => "sse",
            TransportKind::StreamableHttp => "streamable-http",
        }
    }
}

/// Connection status of a downstream server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Normalized descriptor of one downstream tool.
///
/// Every tool discovered from a downstream server is converted to this
/// shape before indexing. `name` is the fully-qualified identifier
/// (`<server>.<local name>`) and is what appears on the wire; it is unique
/// within one gateway process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Fully-qualified identifier (`server.tool`)
    pub name: String,
    /// Tool name as the downstream server knows it
    pub display_name: String,
    pub description: String,
    /// Id of the owning downstream server
    pub server_id: String,
    /// JSON Schema for the tool's input
    #[serde(default)]
    pub input_schema: Value,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub domain: Option<String>,
    /// Token estimate of the serialized schema, computed at registration
    #[serde(default)]
    pub schema_tokens: usize,
}

impl ToolSpec {
    pub fn new(
        server_id: impl Into<String>,
        local_name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
    ) -> Self {
        let server_id = server_id.into();
        let local_name = local_name.into();
        let schema_tokens = estimate_schema_tokens(&input_schema);
        Self {
            name: format!("{}.{}", server_id, local_name),
            display_name: local_name,
            description: description.into(),
            server_id,
            input_schema,
            tags: Vec::new(),
            domain: None,
            schema_tokens,
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Composed text used for embedding: description, tags, domain, and
    /// parameter names, pipe-joined. Parameter names matter for matching
    /// queries like "send an email to ..." against `to`/`subject`/`body`.
    pub fn rich_description(&self) -> String {
        let mut parts = vec![self.description.clone()];
        if !self.tags.is_empty() {
            parts.push(format!("Tags: {}", self.tags.join(", ")));
        }
        if let Some(domain) = &self.domain {
            parts.push(format!("Domain: {}", domain));
        }
        if let Some(props) = self.input_schema.get("properties").and_then(|p| p.as_object()) {
            let params: Vec<&str> = props.keys().map(|k| k.as_str()).collect();
            if !params.is_empty() {
                parts.push(format!("Parameters: {}", params.join(", ")));
            }
        }
        parts.join(" | ")
    }

    /// Top-level parameter names from the input schema.
    pub fn parameter_names(&self) -> Vec<String> {
        self.input_schema
            .get("properties")
            .and_then(|p| p.as_object())
            .map(|props| props.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_tool() -> ToolSpec {
        ToolSpec::new(
            "email",
            "send",
            "Send an email message",
            json!({
                "type": "object",
                "properties": {
                    "to": {"type": "string"},
                    "subject": {"type": "string"},
                    "body": {"type": "string"}
                }
            }),
        )
        .with_tags(vec!["email".to_string(), "communication".to_string()])
        .with_domain("email")
    }

    #[test]
    fn test_fully_qualified_name() {
        let tool = sample_tool();
        assert_eq!(tool.name, "email.send");
        assert_eq!(tool.display_name, "send");
        assert_eq!(tool.server_id, "email");
    }

    #[test]
    fn test_rich_description_includes_all_parts() {
        let desc = sample_tool().rich_description();
        assert!(desc.starts_with("Send an email message"));
        assert!(desc.contains("Tags: email, communication"));
        assert!(desc.contains("Domain: email"));
        assert!(desc.contains("Parameters: "));
        assert!(desc.contains("subject"));
    }

    #[test]
    fn test_rich_description_omits_empty_parts() {
        let tool = ToolSpec::new("fs", "read", "Read a file", json!({}));
        let desc = tool.rich_description();
        assert_eq!(desc, "Read a file");
    }

    #[test]
    fn test_schema_tokens_estimated() {
        let tool = sample_tool();
        assert!(tool.schema_tokens > 0);
    }
}
