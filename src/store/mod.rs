//! Document store adapters and the one-time ingestion path.

pub mod embeddings;
pub mod ingest;
pub mod memory;
pub mod qdrant;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Result;

pub use embeddings::{AzureOpenAiEmbedder, Embedder, HashingEmbedder};
pub use ingest::{
    DocumentLoader, IngestReport, SourceDocument, TextCorpusLoader, TextSplitter, ensure_ingested,
};
pub use memory::InMemoryStore;
pub use qdrant::QdrantStore;

/// Hits returned per similarity search unless configured otherwise.
pub const DEFAULT_TOP_K: usize = 4;

/// A slice of a source document, keyed by its title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub title: String,
    pub content: String,
    pub metadata: HashMap<String, String>,
}

impl Chunk {
    /// A chunk whose metadata carries its title.
    #[must_use]
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        let title = title.into();
        let metadata = HashMap::from([("title".to_string(), title.clone())]);
        Self {
            title,
            content: content.into(),
            metadata,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SimilarityMetric {
    #[default]
    Cosine,
    Euclidean,
    DotProduct,
}

impl std::str::FromStr for SimilarityMetric {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cos" | "cosine" => Ok(Self::Cosine),
            "l2" | "euclid" | "euclidean" => Ok(Self::Euclidean),
            "ip" | "dot" | "dotproduct" => Ok(Self::DotProduct),
            other => Err(format!("unknown similarity metric: {other}")),
        }
    }
}

/// Index build parameters, passed through to the backing store as configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSettings {
    pub metric: SimilarityMetric,
    pub dimensions: usize,
    /// List/partition count. Stores without such a notion may ignore it.
    pub partitions: u32,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            metric: SimilarityMetric::Cosine,
            dimensions: 1536,
            partitions: 1,
        }
    }
}

/// A searchable collection of chunks.
///
/// Result order is descending relevance as the backing index defines it; ties
/// may come back in any order.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn index_exists(&self, name: &str) -> Result<bool>;

    async fn is_empty(&self) -> Result<bool>;

    async fn similarity_search(&self, query: &str) -> Result<Vec<Chunk>>;

    /// Chunks titled exactly `title`, found by using the title as the query.
    async fn search_by_title(&self, title: &str) -> Result<Vec<Chunk>> {
        let hits = self.similarity_search(title).await?;
        Ok(hits.into_iter().filter(|chunk| chunk.title == title).collect())
    }

    /// Embeds and stores `chunks`, returning how many were written.
    async fn add_chunks(&self, chunks: &[Chunk]) -> Result<usize>;

    async fn create_index(&self, name: &str, settings: &IndexSettings) -> Result<()>;
}
