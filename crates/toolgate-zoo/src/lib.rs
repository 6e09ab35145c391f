// Tool Zoo - the authoritative index of every known downstream tool.
// Supports semantic, keyword, and hybrid retrieval over normalized schemas.

mod embedder;
mod error;
mod keyword;
mod vector;
mod zoo;

pub use embedder::{HashingEmbedder, TextEmbedder};
pub use error::{Error, Result};
pub use keyword::tokenize;
pub use vector::{SearchFilter, SqliteVectorStore, VectorStore};
pub use zoo::{ToolZoo, ZooStats, HYBRID_KEYWORD_WEIGHT, HYBRID_SEMANTIC_WEIGHT};
