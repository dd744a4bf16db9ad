use std::fmt::Write as _;

use schemars::JsonSchema;
use serde::Deserialize;

use super::ToolResult;
use crate::error::Result;
use crate::store::{Chunk, DocumentStore};

pub const SEARCH_DESCRIPTION: &str = "Search the knowledge base. The knowledge base is in English, \
translate to and from English if needed. Results are formatted as a source name first in square \
brackets, followed by the text content, and a line with '-----' at the end of each result.";

/// Characters of chunk content passed to the model per search hit.
pub const MAX_SEARCH_CONTENT_CHARS: usize = 2000;

pub const RESULT_SEPARATOR: &str = "-----";

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SearchArgs {
    /// Search query
    pub query: String,
}

/// Looks `args.query` up in the store and formats the hits for the model.
///
/// # Errors
/// Returns an error if the store query fails.
pub async fn search(store: &dyn DocumentStore, args: SearchArgs) -> Result<ToolResult> {
    tracing::info!(query = %args.query, "Searching knowledge base");
    let chunks = store.similarity_search(&args.query).await?;
    tracing::debug!(hits = chunks.len(), "Search finished");
    Ok(ToolResult::to_server(format_search_results(&chunks)))
}

/// One entry per chunk, in store order:
///
/// ```text
/// [doc_0]: policy_pdf_chunk_0
/// Content: ...
/// -----
/// ```
#[must_use]
pub fn format_search_results(chunks: &[Chunk]) -> String {
    let mut out = String::new();
    for (i, chunk) in chunks.iter().enumerate() {
        let _ = write!(
            out,
            "[doc_{i}]: {}\nContent: {}\n{RESULT_SEPARATOR}\n",
            chunk.title,
            truncate_chars(&chunk.content, MAX_SEARCH_CONTENT_CHARS)
        );
    }
    out
}

/// The first `max` characters of `s`.
pub(crate) fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((end, _)) => &s[..end],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::EMPTY_RESULT_SENTINEL;

    #[test]
    fn entries_are_tagged_and_separated() {
        let chunks = vec![
            Chunk::new("a_chunk_0", "alpha"),
            Chunk::new("b_chunk_3", "beta"),
        ];
        assert_eq!(
            format_search_results(&chunks),
            "[doc_0]: a_chunk_0\nContent: alpha\n-----\n[doc_1]: b_chunk_3\nContent: beta\n-----\n"
        );
    }

    #[test]
    fn content_is_cut_at_exactly_2000_characters() {
        let chunks = vec![Chunk::new("big", "x".repeat(3000))];
        let out = format_search_results(&chunks);
        let content = out
            .strip_prefix("[doc_0]: big\nContent: ")
            .and_then(|rest| rest.strip_suffix("\n-----\n"))
            .unwrap();
        assert_eq!(content.chars().count(), 2000);
    }

    #[test]
    fn truncation_counts_characters_not_bytes() {
        let s = "ü".repeat(10);
        assert_eq!(truncate_chars(&s, 4), "üüüü");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    #[test]
    fn no_hits_yields_sentinel() {
        let result = ToolResult::to_server(format_search_results(&[]));
        assert_eq!(result.text, EMPTY_RESULT_SENTINEL);
    }
}
