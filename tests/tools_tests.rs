mod common;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;

use common::Session;
use voicerag::store::IndexSettings;
use voicerag::tools::{EMPTY_RESULT_SENTINEL, attach_rag_tools};
use voicerag::{Chunk, DocumentStore, Relay, Result, ToolDirection, ToolRegistry};

/// Returns its chunks in the given order for every query and records what
/// was asked.
#[derive(Default)]
struct FixedStore {
    chunks: Vec<Chunk>,
    queries: Mutex<Vec<String>>,
}

impl FixedStore {
    fn with(chunks: Vec<Chunk>) -> Arc<Self> {
        Arc::new(Self {
            chunks,
            queries: Mutex::default(),
        })
    }
}

#[async_trait]
impl DocumentStore for FixedStore {
    async fn index_exists(&self, _name: &str) -> Result<bool> {
        Ok(true)
    }

    async fn is_empty(&self) -> Result<bool> {
        Ok(self.chunks.is_empty())
    }

    async fn similarity_search(&self, query: &str) -> Result<Vec<Chunk>> {
        self.queries.lock().unwrap().push(query.to_string());
        Ok(self.chunks.clone())
    }

    async fn add_chunks(&self, chunks: &[Chunk]) -> Result<usize> {
        Ok(chunks.len())
    }

    async fn create_index(&self, _name: &str, _settings: &IndexSettings) -> Result<()> {
        Ok(())
    }
}

fn refund_store() -> Arc<FixedStore> {
    FixedStore::with(vec![
        Chunk::new("policy.pdf_chunk_0", "Refunds are issued within 30 days."),
        Chunk::new("policy.pdf_chunk_1", "Opened items are refunded as store credit."),
    ])
}

fn tools(store: Arc<FixedStore>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    attach_rag_tools(&mut registry, store);
    registry
}

#[tokio::test]
async fn search_lists_hits_in_store_order() {
    let registry = tools(refund_store());
    let result = registry
        .invoke("search", r#"{"query": "refund policy"}"#)
        .unwrap()
        .await
        .unwrap();

    assert_eq!(result.direction, ToolDirection::ToServer);
    assert_eq!(
        result.text,
        "[doc_0]: policy.pdf_chunk_0\nContent: Refunds are issued within 30 days.\n-----\n\
         [doc_1]: policy.pdf_chunk_1\nContent: Opened items are refunded as store credit.\n-----\n"
    );
}

#[tokio::test]
async fn search_without_hits_returns_the_sentinel() {
    let registry = tools(FixedStore::with(Vec::new()));
    let result = registry
        .invoke("search", r#"{"query": "anything"}"#)
        .unwrap()
        .await
        .unwrap();
    assert_eq!(result.text, EMPTY_RESULT_SENTINEL);
    assert_eq!(result.text, "1");
}

#[tokio::test]
async fn search_content_is_cut_at_2000_characters() {
    let registry = tools(FixedStore::with(vec![Chunk::new("big_chunk_0", "z".repeat(3000))]));
    let result = registry
        .invoke("search", r#"{"query": "z"}"#)
        .unwrap()
        .await
        .unwrap();
    let content = result
        .text
        .lines()
        .find_map(|line| line.strip_prefix("Content: "))
        .unwrap();
    assert_eq!(content.chars().count(), 2000);
}

#[tokio::test]
async fn grounding_drops_malformed_sources() {
    let store = FixedStore::with(vec![
        Chunk::new("doc_1_chunk_2", "The refund window is 30 days."),
        Chunk::new("doc_9_chunk_0", "Unrelated."),
    ]);
    let registry = tools(Arc::clone(&store));
    let result = registry
        .invoke("report_grounding", r#"{"sources": ["doc_1_chunk_2", "bad;id"]}"#)
        .unwrap()
        .await
        .unwrap();

    assert_eq!(result.direction, ToolDirection::ToServer);
    assert_eq!(result.text, "[doc_1_chunk_2]: The refund window is 30 days.\n-----");
    assert_eq!(*store.queries.lock().unwrap(), ["doc_1_chunk_2"]);
}

#[tokio::test]
async fn grounding_excerpts_are_cut_at_200_characters() {
    let registry = tools(FixedStore::with(vec![Chunk::new("long_chunk_0", "q".repeat(3000))]));
    let result = registry
        .invoke("report_grounding", r#"{"sources": ["long_chunk_0"]}"#)
        .unwrap()
        .await
        .unwrap();
    let excerpt = result
        .text
        .strip_prefix("[long_chunk_0]: ")
        .and_then(|rest| rest.strip_suffix("...\n-----"))
        .unwrap();
    assert_eq!(excerpt.chars().count(), 200);
}

#[tokio::test]
async fn grounding_with_no_valid_sources_returns_the_sentinel() {
    let store = refund_store();
    let registry = tools(Arc::clone(&store));
    let result = registry
        .invoke("report_grounding", r#"{"sources": ["bad;id", "also bad"]}"#)
        .unwrap()
        .await
        .unwrap();
    assert_eq!(result.text, EMPTY_RESULT_SENTINEL);
    assert!(store.queries.lock().unwrap().is_empty());
}

#[test]
fn advertised_schemas_name_their_required_fields() {
    let advertised = serde_json::to_value(tools(refund_store()).try_as_tools().unwrap()).unwrap();
    assert_eq!(advertised[0]["type"], "function");
    assert_eq!(advertised[0]["name"], "search");
    assert_eq!(advertised[0]["parameters"]["required"], json!(["query"]));
    assert_eq!(advertised[1]["name"], "report_grounding");
    assert_eq!(advertised[1]["parameters"]["required"], json!(["sources"]));
    assert_eq!(advertised[1]["parameters"]["properties"]["sources"]["type"], "array");
}

#[tokio::test]
async fn refund_question_round_trips_through_the_relay() {
    let mut session = Session::started(Relay::builder().tools(tools(refund_store()))).await;

    session.model.send(json!({
        "type": "response.function_call_arguments.done",
        "response_id": "resp_1",
        "call_id": "call_search",
        "name": "search",
        "arguments": "{\"query\": \"refund policy\"}"
    }));

    let output = session.model.recv_frame().await;
    assert_eq!(output["item"]["call_id"], "call_search");
    let text = output["item"]["output"].as_str().unwrap();
    let first = text.find("policy.pdf_chunk_0").unwrap();
    let second = text.find("policy.pdf_chunk_1").unwrap();
    assert!(first < second);
    assert_eq!(text.matches("\n-----\n").count(), 2);

    // Search results are for the model only.
    session.client.expect_quiet().await;
}
