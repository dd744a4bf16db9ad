//! Process configuration.
//!
//! Parsed once in `main` from flags and environment variables, validated, and
//! handed to constructors by reference.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser};

use crate::error::{Error, Result};
use crate::protocol::models::{MaxTokens, Temperature};
use crate::store::embeddings::DEFAULT_EMBEDDINGS_API_VERSION;
use crate::store::ingest::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use crate::store::{DEFAULT_TOP_K, IndexSettings, SimilarityMetric};
use crate::transport::ws::DEFAULT_API_VERSION;

/// Voice RAG relay: bridges browser voice clients to an Azure OpenAI realtime
/// deployment and answers its tool calls from a private document index.
#[derive(Parser, Debug, Clone)]
#[command(name = "voicerag", version, about, long_about = None)]
pub struct Config {
    #[command(flatten)]
    pub server: ServerConfig,

    #[command(flatten)]
    pub model: ModelConfig,

    #[command(flatten)]
    pub store: StoreConfig,

    #[command(flatten)]
    pub embeddings: EmbeddingConfig,

    #[command(flatten)]
    pub log: LogConfig,
}

#[derive(Args, Debug, Clone)]
pub struct ServerConfig {
    /// Interface to bind.
    #[arg(long, env = "HOST", default_value = "localhost")]
    pub host: String,

    #[arg(long, env = "PORT", default_value_t = 8765)]
    pub port: u16,

    /// Path the relay WebSocket is mounted at.
    #[arg(long, env = "REALTIME_PATH", default_value = "/realtime")]
    pub realtime_path: String,

    /// Directory served for every other path.
    #[arg(long, env = "STATIC_DIR", default_value = "static")]
    pub static_dir: PathBuf,
}

impl ServerConfig {
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Args, Debug, Clone)]
pub struct ModelConfig {
    /// Azure OpenAI resource endpoint, e.g. `https://myres.openai.azure.com`.
    #[arg(long = "endpoint", env = "AZURE_OPENAI_ENDPOINT")]
    pub endpoint: String,

    /// Realtime model deployment name.
    #[arg(long = "deployment", env = "AZURE_OPENAI_DEPLOYMENT", default_value = "gpt-4o-realtime-preview")]
    pub deployment: String,

    /// API key. Managed identity is used when unset.
    #[arg(long = "api-key", env = "AZURE_OPENAI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    #[arg(long = "api-version", env = "AZURE_OPENAI_API_VERSION", default_value = DEFAULT_API_VERSION)]
    pub api_version: String,

    #[arg(long, env = "AZURE_OPENAI_REALTIME_VOICE_CHOICE")]
    pub voice: Option<String>,

    /// File holding the system instructions. A built-in prompt is used when unset.
    #[arg(long, env = "INSTRUCTIONS_FILE")]
    pub instructions_file: Option<PathBuf>,

    #[arg(long, env = "MODEL_TEMPERATURE")]
    pub temperature: Option<f32>,

    /// Cap on output tokens per response.
    #[arg(long, env = "MAX_RESPONSE_OUTPUT_TOKENS")]
    pub max_output_tokens: Option<u32>,

    /// Input audio transcription model, e.g. `whisper-1`.
    #[arg(long, env = "TRANSCRIPTION_MODEL")]
    pub transcription_model: Option<String>,

    /// Per-call tool timeout in seconds. Unbounded when unset.
    #[arg(long, env = "TOOL_TIMEOUT_SECS")]
    pub tool_timeout_secs: Option<u64>,

    #[arg(long, env = "IDENTITY_ENDPOINT")]
    pub identity_endpoint: Option<String>,

    #[arg(long, env = "IDENTITY_HEADER", hide_env_values = true)]
    pub identity_header: Option<String>,

    /// Client id of a user-assigned managed identity.
    #[arg(long, env = "AZURE_CLIENT_ID")]
    pub client_id: Option<String>,
}

impl ModelConfig {
    /// # Errors
    /// Returns an error if the temperature is outside the accepted range.
    #[allow(clippy::result_large_err)]
    pub fn temperature(&self) -> Result<Option<Temperature>> {
        self.temperature
            .map(Temperature::new)
            .transpose()
            .map_err(|e| Error::Config(e.to_string()))
    }

    #[must_use]
    pub fn max_output_tokens(&self) -> Option<MaxTokens> {
        self.max_output_tokens.map(MaxTokens::Count)
    }

    #[must_use]
    pub fn tool_timeout(&self) -> Option<Duration> {
        self.tool_timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Args, Debug, Clone)]
pub struct StoreConfig {
    /// Qdrant gRPC URL.
    #[arg(id = "store_url", long = "store-url", env = "STORE_CONNECTION_STRING", default_value = "http://localhost:6334")]
    pub url: String,

    #[arg(id = "store_api_key", long = "store-api-key", env = "STORE_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Collection holding the corpus. Created on first start.
    #[arg(long = "collection", env = "STORE_COLLECTION_NAME", default_value = "ContosoIndex")]
    pub collection: String,

    /// Directory of documents ingested when the collection is missing or empty.
    #[arg(long, env = "CORPUS_DIR", default_value = "data")]
    pub corpus_dir: PathBuf,

    /// Chunks returned per search.
    #[arg(long, env = "SEARCH_TOP_K", default_value_t = DEFAULT_TOP_K)]
    pub top_k: usize,

    /// Similarity metric: cosine, euclidean or dot.
    #[arg(long = "store-metric", env = "STORE_METRIC", default_value = "cosine")]
    pub metric: SimilarityMetric,

    /// Partition count used when the collection is created.
    #[arg(long, env = "STORE_PARTITIONS", default_value_t = 1)]
    pub partitions: u32,

    #[arg(long, env = "CHUNK_SIZE", default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,

    #[arg(long, env = "CHUNK_OVERLAP", default_value_t = DEFAULT_CHUNK_OVERLAP)]
    pub chunk_overlap: usize,
}

#[derive(Args, Debug, Clone)]
pub struct EmbeddingConfig {
    /// Embeddings resource endpoint. Defaults to the model endpoint.
    #[arg(id = "embeddings_endpoint", long = "embeddings-endpoint", env = "EMBEDDINGS_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Embeddings API key. The model credential is used when unset.
    #[arg(id = "embeddings_key", long = "embeddings-key", env = "EMBEDDINGS_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    #[arg(
        id = "embeddings_deployment",
        long = "embeddings-deployment",
        env = "AZURE_OPENAI_EMBEDDINGS_DEPLOYMENT_NAME",
        default_value = "text-embedding-ada-002"
    )]
    pub deployment: String,

    #[arg(id = "embeddings_model", long = "embeddings-model", env = "AZURE_OPENAI_EMBEDDINGS_MODEL_NAME")]
    pub model: Option<String>,

    #[arg(
        id = "embeddings_api_version",
        long = "embeddings-api-version",
        env = "EMBEDDINGS_API_VERSION",
        default_value = DEFAULT_EMBEDDINGS_API_VERSION
    )]
    pub api_version: String,

    #[arg(id = "embeddings_dimensions", long = "embeddings-dimensions", env = "EMBEDDINGS_DIMENSIONS", default_value_t = 1536)]
    pub dimensions: usize,

    /// Use the local hashing embedder instead of a deployment. For offline development.
    #[arg(id = "hashing_embedder", long = "hashing-embedder", env = "EMBEDDINGS_HASHING")]
    pub hashing: bool,
}

#[derive(Args, Debug, Clone)]
pub struct LogConfig {
    /// Default filter when `RUST_LOG` is unset.
    #[arg(id = "log_level", long = "log-level", env = "LOG_LEVEL", default_value = "info")]
    pub level: String,

    /// Emit JSON lines instead of human-readable logs.
    #[arg(id = "log_json", long = "log-json", env = "LOG_JSON")]
    pub json: bool,
}

impl Config {
    /// Checks values clap cannot check on its own.
    ///
    /// # Errors
    /// Returns [`Error::Config`] naming the first invalid setting.
    #[allow(clippy::result_large_err)]
    pub fn validate(&self) -> Result<()> {
        if self.model.endpoint.trim().is_empty() {
            return Err(Error::Config("AZURE_OPENAI_ENDPOINT is empty".to_string()));
        }
        url::Url::parse(&self.model.endpoint)?;
        if self.model.deployment.trim().is_empty() {
            return Err(Error::Config("AZURE_OPENAI_DEPLOYMENT is empty".to_string()));
        }
        self.model.temperature()?;
        if self.model.tool_timeout_secs == Some(0) {
            return Err(Error::Config("tool timeout must be at least one second".to_string()));
        }
        if !self.server.realtime_path.starts_with('/') {
            return Err(Error::Config(format!(
                "realtime path must start with '/': {}",
                self.server.realtime_path
            )));
        }
        if self.store.top_k == 0 {
            return Err(Error::Config("search top-k must be at least 1".to_string()));
        }
        if self.store.chunk_size == 0 || self.store.chunk_overlap >= self.store.chunk_size {
            return Err(Error::Config(format!(
                "chunk overlap ({}) must be smaller than chunk size ({})",
                self.store.chunk_overlap, self.store.chunk_size
            )));
        }
        if self.embeddings.dimensions == 0 {
            return Err(Error::Config("embedding dimensions must be at least 1".to_string()));
        }
        Ok(())
    }

    #[must_use]
    pub const fn index_settings(&self) -> IndexSettings {
        IndexSettings {
            metric: self.store.metric,
            dimensions: self.embeddings.dimensions,
            partitions: self.store.partitions,
        }
    }

    /// Embeddings endpoint, falling back to the model endpoint.
    #[must_use]
    pub fn embeddings_endpoint(&self) -> &str {
        self.embeddings
            .endpoint
            .as_deref()
            .unwrap_or(&self.model.endpoint)
    }
}
