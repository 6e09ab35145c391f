use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use serde_json::json;
use tracing::{debug, info, warn};

use toolgate_types::{short_hash, ToolSpec};

use crate::embedder::TextEmbedder;
use crate::error::Result;
use crate::keyword::KeywordIndex;
use crate::vector::{SearchFilter, VectorStore};

/// Default weights for hybrid score combination.
pub const HYBRID_SEMANTIC_WEIGHT: f64 = 0.7;
pub const HYBRID_KEYWORD_WEIGHT: f64 = 0.3;

#[derive(Debug, Clone, serde::Serialize)]
pub struct ZooStats {
    pub total_tools: usize,
    pub servers: Vec<String>,
    pub domains: Vec<String>,
    pub segment_count: usize,
}

/// Authoritative index of every known tool across all downstream servers.
///
/// Catalog and keyword reads go through an `RwLock` snapshot; writes
/// (`register_tools`, `remove_tools`, `clear`) take the exclusive side.
/// The vector segment serializes behind its own mutex.
pub struct ToolZoo {
    embedder: Arc<dyn TextEmbedder>,
    vectors: Mutex<Box<dyn VectorStore>>,
    catalog: RwLock<HashMap<String, ToolSpec>>,
    keywords: RwLock<KeywordIndex>,
    min_score: f64,
}

impl ToolZoo {
    pub fn new(
        embedder: Arc<dyn TextEmbedder>,
        vectors: Box<dyn VectorStore>,
        min_score: f64,
    ) -> Self {
        Self {
            embedder,
            vectors: Mutex::new(vectors),
            catalog: RwLock::new(HashMap::new()),
            keywords: RwLock::new(KeywordIndex::default()),
            min_score,
        }
    }

    /// Stable vector id for a tool: truncated hash of `server:name`.
    fn vector_id(tool: &ToolSpec) -> String {
        short_hash(&format!("{}:{}", tool.server_id, tool.name))
    }

    /// Idempotent upsert keyed by fully-qualified tool name.
    ///
    /// Embedding failures propagate (nothing is written for that batch);
    /// vector-segment faults skip the affected tool without touching the
    /// rest of the catalog.
    pub fn register_tools(&self, tools: &[ToolSpec]) -> Result<usize> {
        if tools.is_empty() {
            return Ok(0);
        }

        // Embed up front so an embedder fault leaves no partial upsert.
        let mut embedded = Vec::with_capacity(tools.len());
        for tool in tools {
            let vector = self.embedder.embed(&tool.rich_description())?;
            embedded.push((tool, vector));
        }

        let mut registered = 0;
        for (tool, vector) in embedded {
            let metadata = json!({
                "name": tool.name,
                "display_name": tool.display_name,
                "server": tool.server_id,
                "domain": tool.domain.clone().unwrap_or_default(),
                "tags": tool.tags.join(","),
            });

            let upserted = {
                let mut vectors = self.vectors.lock().expect("vector store lock poisoned");
                vectors.upsert(
                    &[Self::vector_id(tool)],
                    &[vector],
                    &[metadata],
                    &[tool.rich_description()],
                )
            };
            if let Err(e) = upserted {
                warn!(tool = %tool.name, error = %e, "vector upsert failed, skipping tool");
                continue;
            }

            self.keywords
                .write()
                .expect("keyword index lock poisoned")
                .index_tool(&tool.name, &tool.rich_description());
            self.catalog
                .write()
                .expect("catalog lock poisoned")
                .insert(tool.name.clone(), tool.clone());
            registered += 1;
        }

        info!(count = registered, "tools indexed");
        Ok(registered)
    }

    /// Embed a routing query with the zoo's embedder.
    pub fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        self.embedder.embed(query)
    }

    pub fn semantic_search(
        &self,
        query: &str,
        k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<(ToolSpec, f64)>> {
        self.semantic_search_with_min(query, k, filter, self.min_score)
    }

    fn semantic_search_with_min(
        &self,
        query: &str,
        k: usize,
        filter: &SearchFilter,
        min_score: f64,
    ) -> Result<Vec<(ToolSpec, f64)>> {
        let query_vector = self.embedder.embed(query)?;

        // Fetch 2k then filter by score so the threshold doesn't starve k.
        let neighbors = {
            let vectors = self.vectors.lock().expect("vector store lock poisoned");
            vectors.query(&query_vector, k * 2, filter)?
        };

        let catalog = self.catalog.read().expect("catalog lock poisoned");
        let mut results: Vec<(ToolSpec, f64)> = Vec::new();
        for (_id, distance, metadata) in neighbors {
            // Cosine distance to similarity
            let similarity = 1.0 - (distance as f64 / 2.0);
            if similarity < min_score {
                continue;
            }
            let name = metadata.get("name").and_then(|n| n.as_str()).unwrap_or("");
            if let Some(tool) = catalog.get(name) {
                results.push((tool.clone(), similarity));
            }
        }

        results.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.name.cmp(&b.0.name)));
        results.truncate(k);
        Ok(results)
    }

    pub fn keyword_search(&self, query: &str, k: usize) -> Vec<(ToolSpec, f64)> {
        let scored = self.keywords.read().expect("keyword index lock poisoned").search(query);
        let catalog = self.catalog.read().expect("catalog lock poisoned");

        scored
            .into_iter()
            .filter_map(|(name, score)| catalog.get(&name).map(|t| (t.clone(), score)))
            .take(k)
            .collect()
    }

    /// Combined semantic + keyword retrieval.
    pub fn hybrid_search(
        &self,
        query: &str,
        k: usize,
        semantic_weight: f64,
        keyword_weight: f64,
    ) -> Result<Vec<(ToolSpec, f64)>> {
        let semantic = self.semantic_search_with_min(query, k * 2, &SearchFilter::default(), 0.0)?;
        let keyword = self.keyword_search(query, k * 2);

        let mut combined: HashMap<String, f64> = HashMap::new();
        let mut cache: HashMap<String, ToolSpec> = HashMap::new();

        for (tool, score) in semantic {
            combined.insert(tool.name.clone(), semantic_weight * score);
            cache.insert(tool.name.clone(), tool);
        }
        for (tool, score) in keyword {
            *combined.entry(tool.name.clone()).or_insert(0.0) += keyword_weight * score;
            cache.entry(tool.name.clone()).or_insert(tool);
        }

        let mut results: Vec<(ToolSpec, f64)> = combined
            .into_iter()
            .filter_map(|(name, score)| cache.remove(&name).map(|t| (t, score)))
            .collect();
        results.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.name.cmp(&b.0.name)));
        results.truncate(k);

        let preview: String = query.chars().take(80).collect();
        debug!(query_preview = %preview, results = results.len(), "hybrid search");
        Ok(results)
    }

    pub fn get(&self, name: &str) -> Option<ToolSpec> {
        self.catalog.read().expect("catalog lock poisoned").get(name).cloned()
    }

    pub fn get_by_server(&self, server_id: &str) -> Vec<ToolSpec> {
        self.catalog
            .read()
            .expect("catalog lock poisoned")
            .values()
            .filter(|t| t.server_id == server_id)
            .cloned()
            .collect()
    }

    pub fn all_tools(&self) -> Vec<ToolSpec> {
        self.catalog.read().expect("catalog lock poisoned").values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.catalog.read().expect("catalog lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove tools from the catalog, keyword index, and vector segment.
    pub fn remove_tools(&self, names: &[String]) -> Result<usize> {
        let mut removed_ids = Vec::new();
        {
            let mut catalog = self.catalog.write().expect("catalog lock poisoned");
            let mut keywords = self.keywords.write().expect("keyword index lock poisoned");
            for name in names {
                if let Some(tool) = catalog.remove(name) {
                    keywords.remove_tool(name);
                    removed_ids.push(Self::vector_id(&tool));
                }
            }
        }

        if !removed_ids.is_empty() {
            let mut vectors = self.vectors.lock().expect("vector store lock poisoned");
            vectors.delete(&removed_ids)?;
        }
        Ok(removed_ids.len())
    }

    pub fn clear(&self) -> Result<()> {
        let all: Vec<String> = self.catalog.read().expect("catalog lock poisoned").keys().cloned().collect();
        self.remove_tools(&all)?;
        self.keywords.write().expect("keyword index lock poisoned").clear();
        Ok(())
    }

    pub fn stats(&self) -> ZooStats {
        let catalog = self.catalog.read().expect("catalog lock poisoned");
        let mut servers: Vec<String> = catalog.values().map(|t| t.server_id.clone()).collect();
        servers.sort();
        servers.dedup();
        let mut domains: Vec<String> =
            catalog.values().filter_map(|t| t.domain.clone()).collect();
        domains.sort();
        domains.dedup();

        let segment_count = self
            .vectors
            .lock()
            .expect("vector store lock poisoned")
            .count()
            .unwrap_or(0);

        ZooStats {
            total_tools: catalog.len(),
            servers,
            domains,
            segment_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::HashingEmbedder;
    use crate::vector::SqliteVectorStore;
    use serde_json::json;

    fn test_zoo() -> ToolZoo {
        ToolZoo::new(
            Arc::new(HashingEmbedder::default()),
            Box::new(SqliteVectorStore::open_in_memory().unwrap()),
            0.0,
        )
    }

    fn sample_tools() -> Vec<ToolSpec> {
        vec![
            ToolSpec::new(
                "email",
                "send",
                "Send an email message to a recipient",
                json!({"type": "object", "properties": {"to": {}, "subject": {}, "body": {}}}),
            )
            .with_tags(vec!["email".into()])
            .with_domain("email"),
            ToolSpec::new(
                "email",
                "read",
                "Read messages from the email inbox",
                json!({"type": "object", "properties": {"folder": {}}}),
            )
            .with_tags(vec!["email".into()])
            .with_domain("email"),
            ToolSpec::new(
                "github",
                "create_pr",
                "Create a pull request on a repository branch",
                json!({"type": "object", "properties": {"repo": {}, "branch": {}, "title": {}}}),
            )
            .with_tags(vec!["code".into()])
            .with_domain("code"),
            ToolSpec::new(
                "stripe",
                "charge",
                "Charge a payment card",
                json!({"type": "object", "properties": {"amount": {}, "currency": {}}}),
            )
            .with_tags(vec!["finance".into()])
            .with_domain("finance"),
            ToolSpec::new(
                "calendar",
                "create_event",
                "Create a calendar event or schedule a meeting",
                json!({"type": "object", "properties": {"title": {}, "start": {}, "end": {}}}),
            )
            .with_tags(vec!["calendar".into()])
            .with_domain("calendar"),
        ]
    }

    #[test]
    fn test_register_is_idempotent() {
        let zoo = test_zoo();
        let tools = sample_tools();
        zoo.register_tools(&tools).unwrap();
        let before = zoo.len();
        zoo.register_tools(&tools).unwrap();
        assert_eq!(zoo.len(), before);
        assert_eq!(zoo.stats().segment_count, before);
    }

    #[test]
    fn test_semantic_search_finds_email_tools() {
        let zoo = test_zoo();
        zoo.register_tools(&sample_tools()).unwrap();

        let results = zoo
            .semantic_search("send an email to my boss", 3, &SearchFilter::default())
            .unwrap();
        assert!(!results.is_empty());
        assert!(results.iter().any(|(t, _)| t.name.starts_with("email.")));
    }

    #[test]
    fn test_keyword_search_matches_pull_request() {
        let zoo = test_zoo();
        zoo.register_tools(&sample_tools()).unwrap();

        let results = zoo.keyword_search("create a pull request for the feature branch", 3);
        assert_eq!(results[0].0.name, "github.create_pr");
    }

    #[test]
    fn test_hybrid_search_schedule_meeting() {
        let zoo = test_zoo();
        zoo.register_tools(&sample_tools()).unwrap();

        let results = zoo
            .hybrid_search(
                "schedule meeting tomorrow",
                3,
                HYBRID_SEMANTIC_WEIGHT,
                HYBRID_KEYWORD_WEIGHT,
            )
            .unwrap();
        assert!(results.iter().any(|(t, _)| t.name == "calendar.create_event"));
    }

    #[test]
    fn test_remove_purges_everything() {
        let zoo = test_zoo();
        zoo.register_tools(&sample_tools()).unwrap();
        let before = zoo.len();

        let removed = zoo.remove_tools(&["email.send".to_string()]).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(zoo.len(), before - 1);
        assert!(zoo.get("email.send").is_none());
        assert_eq!(zoo.stats().segment_count, before - 1);

        let results = zoo.keyword_search("send email recipient", 5);
        assert!(!results.iter().any(|(t, _)| t.name == "email.send"));
    }

    #[test]
    fn test_get_by_server() {
        let zoo = test_zoo();
        zoo.register_tools(&sample_tools()).unwrap();
        let email_tools = zoo.get_by_server("email");
        assert_eq!(email_tools.len(), 2);
    }

    #[test]
    fn test_stats() {
        let zoo = test_zoo();
        zoo.register_tools(&sample_tools()).unwrap();
        let stats = zoo.stats();
        assert_eq!(stats.total_tools, 5);
        assert!(stats.servers.contains(&"email".to_string()));
        assert!(stats.domains.contains(&"calendar".to_string()));
    }
}
