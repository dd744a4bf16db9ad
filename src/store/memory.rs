use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::embeddings::Embedder;
use super::{Chunk, DEFAULT_TOP_K, DocumentStore, IndexSettings, SimilarityMetric};
use crate::error::{Error, Result};

#[derive(Default)]
struct MemoryIndex {
    names: HashSet<String>,
    metric: SimilarityMetric,
    rows: Vec<(Chunk, Vec<f32>)>,
}

/// A process-local store for tests and offline runs.
///
/// Ties in score keep insertion order, so results are stable for identical
/// queries.
pub struct InMemoryStore {
    embedder: Arc<dyn Embedder>,
    top_k: usize,
    index: RwLock<MemoryIndex>,
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore")
            .field("top_k", &self.top_k)
            .finish_non_exhaustive()
    }
}

impl InMemoryStore {
    #[must_use]
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            top_k: DEFAULT_TOP_K,
            index: RwLock::new(MemoryIndex::default()),
        }
    }

    #[must_use]
    pub const fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub async fn chunk_count(&self) -> usize {
        self.index.read().await.rows.len()
    }

    async fn ranked(&self, query: &str, title: Option<&str>) -> Result<Vec<Chunk>> {
        let query = self.embedder.embed_query(query).await?;
        let index = self.index.read().await;
        let mut scored: Vec<(f32, &Chunk)> = index
            .rows
            .iter()
            .filter(|(chunk, _)| title.is_none_or(|t| chunk.title == t))
            .map(|(chunk, vector)| (score(index.metric, &query, vector), chunk))
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        Ok(scored
            .into_iter()
            .take(self.top_k)
            .map(|(_, chunk)| chunk.clone())
            .collect())
    }
}

fn score(metric: SimilarityMetric, a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::NEG_INFINITY;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    match metric {
        SimilarityMetric::DotProduct => dot,
        SimilarityMetric::Cosine => {
            let mag_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
            let mag_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
            if mag_a == 0.0 || mag_b == 0.0 {
                0.0
            } else {
                dot / (mag_a * mag_b)
            }
        }
        SimilarityMetric::Euclidean => {
            -a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum::<f32>().sqrt()
        }
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn index_exists(&self, name: &str) -> Result<bool> {
        Ok(self.index.read().await.names.contains(name))
    }

    async fn is_empty(&self) -> Result<bool> {
        Ok(self.index.read().await.rows.is_empty())
    }

    async fn similarity_search(&self, query: &str) -> Result<Vec<Chunk>> {
        self.ranked(query, None).await
    }

    async fn search_by_title(&self, title: &str) -> Result<Vec<Chunk>> {
        self.ranked(title, Some(title)).await
    }

    async fn add_chunks(&self, chunks: &[Chunk]) -> Result<usize> {
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = self.embedder.embed_documents(&texts).await?;
        if vectors.len() != chunks.len() {
            return Err(Error::Store(format!(
                "embedder returned {} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            )));
        }
        let mut index = self.index.write().await;
        index.rows.extend(chunks.iter().cloned().zip(vectors));
        Ok(chunks.len())
    }

    async fn create_index(&self, name: &str, settings: &IndexSettings) -> Result<()> {
        let mut index = self.index.write().await;
        index.names.insert(name.to_string());
        index.metric = settings.metric;
        Ok(())
    }
}
