//! Qdrant-backed document store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use qdrant_client::qdrant::condition::ConditionOneOf;
use qdrant_client::qdrant::r#match::MatchValue;
use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::{
    Condition, CreateCollectionBuilder, Distance, FieldCondition, Filter, Match, PointStruct,
    ScoredPoint, SearchPointsBuilder, UpsertPointsBuilder, VectorParamsBuilder,
};
use qdrant_client::Qdrant;
use uuid::Uuid;

use super::embeddings::Embedder;
use super::{Chunk, DEFAULT_TOP_K, DocumentStore, IndexSettings, SimilarityMetric};
use crate::error::{Error, Result};

const CONTENT_KEY: &str = "text";
const TITLE_KEY: &str = "title";
/// Title for points stored without one. Still a valid citation key.
const UNTITLED: &str = "Unknown_Title";

impl From<SimilarityMetric> for Distance {
    fn from(metric: SimilarityMetric) -> Self {
        match metric {
            SimilarityMetric::Cosine => Self::Cosine,
            SimilarityMetric::Euclidean => Self::Euclid,
            SimilarityMetric::DotProduct => Self::Dot,
        }
    }
}

fn store_err(err: impl std::fmt::Display) -> Error {
    Error::Store(err.to_string())
}

/// Chunks stored as points in one Qdrant collection. The collection is the
/// index: `create_index` creates it, `index_exists` checks for it.
pub struct QdrantStore {
    client: Qdrant,
    collection: String,
    embedder: Arc<dyn Embedder>,
    top_k: usize,
}

impl std::fmt::Debug for QdrantStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QdrantStore")
            .field("collection", &self.collection)
            .field("top_k", &self.top_k)
            .finish_non_exhaustive()
    }
}

impl QdrantStore {
    /// # Errors
    /// Returns an error if the client cannot be built from `url`.
    #[allow(clippy::result_large_err)]
    pub fn connect(
        url: &str,
        api_key: Option<&str>,
        collection: impl Into<String>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        let mut builder = Qdrant::from_url(url);
        if let Some(api_key) = api_key {
            builder = builder.api_key(api_key.to_string());
            tracing::info!("Qdrant connection using API key authentication");
        }
        let client = builder.build().map_err(store_err)?;
        Ok(Self {
            client,
            collection: collection.into(),
            embedder,
            top_k: DEFAULT_TOP_K,
        })
    }

    #[must_use]
    pub const fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    async fn search(&self, query: &str, filter: Option<Filter>) -> Result<Vec<Chunk>> {
        let vector = self.embedder.embed_query(query).await?;
        let mut request = SearchPointsBuilder::new(&self.collection, vector, self.top_k as u64)
            .with_payload(true);
        if let Some(filter) = filter {
            request = request.filter(filter);
        }
        let response = self.client.search_points(request).await.map_err(store_err)?;
        Ok(response.result.into_iter().map(point_to_chunk).collect())
    }
}

fn point_to_chunk(point: ScoredPoint) -> Chunk {
    let mut content = String::new();
    let mut title = String::new();
    let mut metadata = HashMap::new();
    for (key, value) in point.payload {
        let Some(Kind::StringValue(s)) = value.kind else {
            continue;
        };
        if key == CONTENT_KEY {
            content = s;
        } else {
            if key == TITLE_KEY {
                title.clone_from(&s);
            }
            metadata.insert(key, s);
        }
    }
    if title.is_empty() {
        title = UNTITLED.to_string();
        metadata.insert(TITLE_KEY.to_string(), title.clone());
    }
    Chunk {
        title,
        content,
        metadata,
    }
}

fn title_filter(title: &str) -> Filter {
    Filter {
        must: vec![Condition {
            condition_one_of: Some(ConditionOneOf::Field(FieldCondition {
                key: TITLE_KEY.to_string(),
                r#match: Some(Match {
                    match_value: Some(MatchValue::Keyword(title.to_string())),
                }),
                ..Default::default()
            })),
        }],
        ..Default::default()
    }
}

#[async_trait]
impl DocumentStore for QdrantStore {
    async fn index_exists(&self, name: &str) -> Result<bool> {
        self.client.collection_exists(name).await.map_err(store_err)
    }

    async fn is_empty(&self) -> Result<bool> {
        let info = self
            .client
            .collection_info(&self.collection)
            .await
            .map_err(store_err)?;
        let points = info.result.and_then(|r| r.points_count).unwrap_or(0);
        Ok(points == 0)
    }

    async fn similarity_search(&self, query: &str) -> Result<Vec<Chunk>> {
        self.search(query, None).await
    }

    async fn search_by_title(&self, title: &str) -> Result<Vec<Chunk>> {
        self.search(title, Some(title_filter(title))).await
    }

    async fn add_chunks(&self, chunks: &[Chunk]) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = self.embedder.embed_documents(&texts).await?;
        if vectors.len() != chunks.len() {
            return Err(Error::Store(format!(
                "embedder returned {} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            )));
        }

        let points: Vec<PointStruct> = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| {
                let mut payload: HashMap<String, qdrant_client::qdrant::Value> = HashMap::new();
                for (k, v) in &chunk.metadata {
                    payload.insert(k.clone(), v.clone().into());
                }
                payload.insert(CONTENT_KEY.to_string(), chunk.content.clone().into());
                payload.insert(TITLE_KEY.to_string(), chunk.title.clone().into());
                PointStruct::new(Uuid::new_v4().to_string(), vector, payload)
            })
            .collect();

        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection, points).wait(true))
            .await
            .map_err(store_err)?;
        Ok(chunks.len())
    }

    async fn create_index(&self, name: &str, settings: &IndexSettings) -> Result<()> {
        tracing::info!(
            collection = name,
            dimensions = settings.dimensions,
            metric = ?settings.metric,
            partitions = settings.partitions,
            "Creating vector collection"
        );
        self.client
            .create_collection(
                CreateCollectionBuilder::new(name)
                    .vectors_config(VectorParamsBuilder::new(
                        settings.dimensions as u64,
                        Distance::from(settings.metric),
                    ))
                    .shard_number(settings.partitions.max(1)),
            )
            .await
            .map_err(store_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qdrant_client::qdrant::Value;

    #[test]
    fn payload_maps_back_to_chunk() {
        let mut payload: HashMap<String, Value> = HashMap::new();
        payload.insert("text".into(), "body".to_string().into());
        payload.insert("title".into(), "a_chunk_0".to_string().into());
        payload.insert("source".into(), "a.md".to_string().into());
        let point = ScoredPoint {
            payload,
            ..Default::default()
        };
        let chunk = point_to_chunk(point);
        assert_eq!(chunk.title, "a_chunk_0");
        assert_eq!(chunk.content, "body");
        assert_eq!(chunk.metadata.get("source").map(String::as_str), Some("a.md"));
        assert_eq!(chunk.metadata.get("title").map(String::as_str), Some("a_chunk_0"));
    }

    #[test]
    fn untitled_points_get_a_citable_title() {
        let mut payload: HashMap<String, Value> = HashMap::new();
        payload.insert("text".into(), "orphan".to_string().into());
        let chunk = point_to_chunk(ScoredPoint {
            payload,
            ..Default::default()
        });
        assert_eq!(chunk.title, "Unknown_Title");
        assert!(crate::tools::grounding::is_citation_key(&chunk.title));
        assert_eq!(chunk.metadata.get("title").map(String::as_str), Some("Unknown_Title"));

        let mut payload: HashMap<String, Value> = HashMap::new();
        payload.insert("title".into(), String::new().into());
        assert_eq!(
            point_to_chunk(ScoredPoint {
                payload,
                ..Default::default()
            })
            .title,
            "Unknown_Title"
        );
    }

    #[test]
    fn title_filter_matches_keyword() {
        let filter = title_filter("doc_1_chunk_2");
        let Some(ConditionOneOf::Field(field)) = &filter.must[0].condition_one_of else {
            panic!("expected a field condition");
        };
        assert_eq!(field.key, "title");
        assert_eq!(
            field.r#match.as_ref().and_then(|m| m.match_value.clone()),
            Some(MatchValue::Keyword("doc_1_chunk_2".into()))
        );
    }

    #[test]
    fn metrics_map_to_qdrant_distances() {
        assert_eq!(Distance::from(SimilarityMetric::Cosine), Distance::Cosine);
        assert_eq!(Distance::from(SimilarityMetric::Euclidean), Distance::Euclid);
        assert_eq!(Distance::from(SimilarityMetric::DotProduct), Distance::Dot);
    }
}
