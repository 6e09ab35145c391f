use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use serde_json::Value;

use crate::embedder::cosine_similarity;

/// Optional metadata filter applied during a vector query.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub domain: Option<String>,
    pub tag: Option<String>,
}

impl SearchFilter {
    fn matches(&self, metadata: &Value) -> bool {
        if let Some(domain) = &self.domain {
            let found = metadata.get("domain").and_then(|d| d.as_str()).unwrap_or("");
            if found != domain {
                return false;
            }
        }
        if let Some(tag) = &self.tag {
            let tags = metadata.get("tags").and_then(|t| t.as_str()).unwrap_or("");
            if !tags.split(',').any(|t| t == tag) {
                return false;
            }
        }
        true
    }
}

/// Vector storage collaborator consumed by the Tool Zoo.
pub trait VectorStore: Send {
    fn upsert(
        &mut self,
        ids: &[String],
        vectors: &[Vec<f32>],
        metadatas: &[Value],
        documents: &[String],
    ) -> Result<()>;

    /// Nearest neighbors by cosine distance, ascending. Returns
    /// `(id, distance, metadata)` triples; distance is in [0, 2].
    fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<(String, f32, Value)>>;

    fn delete(&mut self, ids: &[String]) -> Result<()>;

    fn count(&self) -> Result<usize>;
}

/// SQLite-backed vector segment.
///
/// Embeddings are small (a few hundred dims) and tool catalogs are
/// thousands of rows at most, so a flat scan with in-memory scoring beats
/// carrying an ANN engine. Vectors are stored as little-endian f32 blobs.
pub struct SqliteVectorStore {
    conn: Connection,
}

impl SqliteVectorStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open vector store: {}", db_path.display()))?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS vector_segments (
                id TEXT PRIMARY KEY,
                embedding BLOB NOT NULL,
                metadata_json TEXT NOT NULL,
                document TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    fn encode(vector: &[f32]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(vector.len() * 4);
        for v in vector {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        bytes
    }

    fn decode(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }
}

impl VectorStore for SqliteVectorStore {
    fn upsert(
        &mut self,
        ids: &[String],
        vectors: &[Vec<f32>],
        metadatas: &[Value],
        documents: &[String],
    ) -> Result<()> {
        let tx = self.conn.transaction()?;
        for (((id, vector), metadata), document) in
            ids.iter().zip(vectors).zip(metadatas).zip(documents)
        {
            tx.execute(
                r#"
                INSERT INTO vector_segments (id, embedding, metadata_json, document)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(id) DO UPDATE SET
                    embedding = ?2,
                    metadata_json = ?3,
                    document = ?4
                "#,
                params![id, Self::encode(vector), metadata.to_string(), document],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<(String, f32, Value)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, embedding, metadata_json FROM vector_segments")?;

        let rows = stmt.query_map([], |row| {
            let id: String = row.get(0)?;
            let embedding: Vec<u8> = row.get(1)?;
            let metadata: String = row.get(2)?;
            Ok((id, embedding, metadata))
        })?;

        let mut scored: Vec<(String, f32, Value)> = Vec::new();
        for row in rows {
            let (id, embedding, metadata_json) = row?;
            let metadata: Value = serde_json::from_str(&metadata_json).unwrap_or(Value::Null);
            if !filter.matches(&metadata) {
                continue;
            }
            let candidate = Self::decode(&embedding);
            let distance = 1.0 - cosine_similarity(vector, &candidate);
            scored.push((id, distance, metadata));
        }

        scored.sort_by(|a, b| a.1.total_cmp(&b.1));
        scored.truncate(k);
        Ok(scored)
    }

    fn delete(&mut self, ids: &[String]) -> Result<()> {
        let tx = self.conn.transaction()?;
        for id in ids {
            tx.execute("DELETE FROM vector_segments WHERE id = ?1", params![id])?;
        }
        tx.commit()?;
        Ok(())
    }

    fn count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM vector_segments", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}
