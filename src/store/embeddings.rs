//! Text embedding clients.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};
use crate::transport::credential::AzureCredential;

/// Inputs per embeddings request accepted by Azure OpenAI.
pub const MAX_EMBEDDING_BATCH: usize = 16;

pub const DEFAULT_EMBEDDINGS_API_VERSION: &str = "2023-05-15";

#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_documents(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Embedding("no embedding returned".to_string()))
    }
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

/// Client for an Azure OpenAI embeddings deployment.
#[derive(Debug, Clone)]
pub struct AzureOpenAiEmbedder {
    client: Client,
    url: Url,
    model: Option<String>,
    credential: AzureCredential,
    dimensions: usize,
}

impl AzureOpenAiEmbedder {
    /// # Errors
    /// Returns an error if `endpoint` is not a URL or the HTTP client cannot be built.
    #[allow(clippy::result_large_err)]
    pub fn new(
        endpoint: &str,
        deployment: &str,
        api_version: &str,
        credential: AzureCredential,
        dimensions: usize,
    ) -> Result<Self> {
        let mut url = Url::parse(endpoint)?;
        url.set_path(&format!("openai/deployments/{deployment}/embeddings"));
        url.query_pairs_mut()
            .clear()
            .append_pair("api-version", api_version);
        Ok(Self {
            client: Client::builder().build()?,
            url,
            model: None,
            credential,
            dimensions,
        })
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
        let (name, value) = self.credential.header().await?;
        let request = EmbedRequest {
            input: batch,
            model: self.model.as_deref(),
        };
        let response = self
            .client
            .post(self.url.clone())
            .header(name, value)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Embedding(format!(
                "embeddings request failed: {status} - {}",
                crate::safe_truncate(&text, 512)
            )));
        }

        let body: EmbedResponse = response.json().await?;
        order_by_index(body.data, batch.len())
    }
}

fn order_by_index(mut data: Vec<EmbeddingData>, expected: usize) -> Result<Vec<Vec<f32>>> {
    if data.len() != expected {
        return Err(Error::Embedding(format!(
            "expected {expected} embeddings, got {}",
            data.len()
        )));
    }
    data.sort_by_key(|d| d.index);
    Ok(data.into_iter().map(|d| d.embedding).collect())
}

#[async_trait]
impl Embedder for AzureOpenAiEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(MAX_EMBEDDING_BATCH) {
            out.extend(self.embed_batch(batch).await?);
        }
        Ok(out)
    }
}

/// Deterministic lexical embedder: hashed words and character trigrams,
/// normalised to unit length. Shares vocabulary, not meaning.
#[derive(Debug, Clone, Copy)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    #[must_use]
    pub const fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn hash_string(s: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        s.hash(&mut hasher);
        hasher.finish()
    }

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dimensions];
        if self.dimensions == 0 {
            return embedding;
        }

        let normalized: String = text
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || c.is_whitespace() {
                    c.to_ascii_lowercase()
                } else {
                    ' '
                }
            })
            .collect();

        for word in normalized.split_whitespace() {
            let hash = Self::hash_string(word);
            let idx = (hash as usize) % self.dimensions;
            let sign = if (hash >> 32) & 1 == 0 { 1.0 } else { -1.0 };
            embedding[idx] += sign * (1.0 + ((hash >> 16) & 0xFF) as f32 / 255.0);
        }

        let chars: Vec<char> = normalized.chars().collect();
        for window in chars.windows(3) {
            let trigram: String = window.iter().collect();
            let hash = Self::hash_string(&trigram);
            let idx = (hash as usize) % self.dimensions;
            embedding[idx] += if (hash >> 32) & 1 == 0 { 0.5 } else { -0.5 };
        }

        let magnitude: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for val in &mut embedding {
                *val /= magnitude;
            }
        }
        embedding
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deployment_url_is_built_from_endpoint() {
        let embedder = AzureOpenAiEmbedder::new(
            "https://myres.openai.azure.com/",
            "text-embedding-ada-002",
            "2024-02-01",
            AzureCredential::ApiKey("k".into()),
            1536,
        )
        .unwrap();
        assert_eq!(
            embedder.url().as_str(),
            "https://myres.openai.azure.com/openai/deployments/text-embedding-ada-002/embeddings?api-version=2024-02-01"
        );
    }

    #[test]
    fn response_vectors_are_ordered_by_index() {
        let data = vec![
            EmbeddingData {
                index: 1,
                embedding: vec![1.0],
            },
            EmbeddingData {
                index: 0,
                embedding: vec![0.0],
            },
        ];
        assert_eq!(order_by_index(data, 2).unwrap(), vec![vec![0.0], vec![1.0]]);
    }

    #[test]
    fn short_responses_are_rejected() {
        let data = vec![EmbeddingData {
            index: 0,
            embedding: vec![0.0],
        }];
        assert!(matches!(order_by_index(data, 2), Err(Error::Embedding(_))));
    }

    #[tokio::test]
    async fn hashing_embedder_is_deterministic_and_normalised() {
        let embedder = HashingEmbedder::new(64);
        let a = embedder.embed_query("refund policy").await.unwrap();
        let b = embedder.embed_query("refund policy").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }
}
