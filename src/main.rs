use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use voicerag::config::Config;
use voicerag::relay::{DEFAULT_INSTRUCTIONS, Relay, SessionPolicy};
use voicerag::store::embeddings::{AzureOpenAiEmbedder, Embedder, HashingEmbedder};
use voicerag::store::ingest::{TextCorpusLoader, TextSplitter, ensure_ingested};
use voicerag::store::{DocumentStore, QdrantStore};
use voicerag::tools::{ToolRegistry, attach_rag_tools};
use voicerag::transport::credential::{AzureCredential, ManagedIdentityCredential};
use voicerag::transport::ws::AzureRealtimeConnector;
use voicerag::{server, telemetry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    telemetry::init(&config.log).context("failed to install log subscriber")?;
    config.validate()?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting voicerag");

    let credential = model_credential(&config)?;
    credential
        .warm_up()
        .await
        .context("model credential is not usable")?;

    let embedder = embedder(&config, &credential)?;
    let store = Arc::new(
        QdrantStore::connect(
            &config.store.url,
            config.store.api_key.as_deref(),
            config.store.collection.clone(),
            embedder,
        )?
        .with_top_k(config.store.top_k),
    );

    let splitter = TextSplitter::new(config.store.chunk_size, config.store.chunk_overlap)?;
    let loader = TextCorpusLoader::new(&config.store.corpus_dir);
    let report = ensure_ingested(
        store.as_ref(),
        &loader,
        &splitter,
        &config.store.collection,
        &config.index_settings(),
    )
    .await
    .context("corpus ingestion failed")?;
    tracing::info!(?report, "Document store ready");

    let mut tools = ToolRegistry::new();
    attach_rag_tools(&mut tools, store as Arc<dyn DocumentStore>);

    let connector = AzureRealtimeConnector::new(
        &config.model.endpoint,
        config.model.deployment.clone(),
        credential,
    )?
    .with_api_version(config.model.api_version.clone());

    let relay = Relay::builder()
        .policy(session_policy(&config).await?)
        .tools(tools)
        .connector(connector)
        .tool_timeout(config.model.tool_timeout())
        .build()?;

    let app = server::router(relay, &config.server);
    let addr = config.server.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("cannot bind {addr}"))?;
    tracing::info!(
        addr = %addr,
        path = %config.server.realtime_path,
        "Listening for realtime sessions"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(server::shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

fn model_credential(config: &Config) -> anyhow::Result<AzureCredential> {
    if let Some(key) = &config.model.api_key {
        tracing::info!("Using API key for the model endpoint");
        return Ok(AzureCredential::ApiKey(key.clone()));
    }
    tracing::info!("Using managed identity for the model endpoint");
    let identity = ManagedIdentityCredential::new(
        config.model.identity_endpoint.as_deref(),
        config.model.identity_header.as_deref(),
        config.model.client_id.clone(),
    )?;
    Ok(AzureCredential::Token(Arc::new(identity)))
}

fn embedder(config: &Config, model_credential: &AzureCredential) -> anyhow::Result<Arc<dyn Embedder>> {
    let embeddings = &config.embeddings;
    if embeddings.hashing {
        tracing::warn!("Using the local hashing embedder; search quality is lexical only");
        return Ok(Arc::new(HashingEmbedder::new(embeddings.dimensions)));
    }
    let credential = embeddings
        .api_key
        .clone()
        .map_or_else(|| model_credential.clone(), AzureCredential::ApiKey);
    let mut embedder = AzureOpenAiEmbedder::new(
        config.embeddings_endpoint(),
        &embeddings.deployment,
        &embeddings.api_version,
        credential,
        embeddings.dimensions,
    )?;
    if let Some(model) = &embeddings.model {
        embedder = embedder.with_model(model.clone());
    }
    Ok(Arc::new(embedder))
}

async fn session_policy(config: &Config) -> anyhow::Result<SessionPolicy> {
    let instructions = match &config.model.instructions_file {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("cannot read instructions from {}", path.display()))?,
        None => DEFAULT_INSTRUCTIONS.to_string(),
    };

    let mut policy = SessionPolicy::new(instructions.trim());
    if let Some(voice) = &config.model.voice {
        policy = policy.with_voice(voice.clone());
    }
    if let Some(model) = &config.model.transcription_model {
        policy = policy.with_transcription(model.clone());
    }
    if let Some(temperature) = config.model.temperature()? {
        policy = policy.with_temperature(temperature);
    }
    if let Some(max) = config.model.max_output_tokens() {
        policy = policy.with_max_response_output_tokens(max);
    }
    Ok(policy)
}
