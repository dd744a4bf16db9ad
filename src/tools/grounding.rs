use std::fmt::Write as _;
use std::sync::LazyLock;

use regex::Regex;
use schemars::JsonSchema;
use serde::Deserialize;

use super::ToolResult;
use super::search::{RESULT_SEPARATOR, truncate_chars};
use crate::error::Result;
use crate::store::{Chunk, DocumentStore};

pub const GROUNDING_DESCRIPTION: &str = "Report use of a source from the knowledge base as part \
of an answer (effectively, cite the source). Sources appear in square brackets before each \
knowledge base passage. Always use this tool to cite sources when responding with information \
from the knowledge base.";

/// Characters of chunk content kept in the provenance trail.
pub const MAX_GROUNDING_CONTENT_CHARS: usize = 200;

static CITATION_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_=\-]+$").expect("literal pattern compiles"));

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct GroundingArgs {
    /// List of source names that were used.
    pub sources: Vec<String>,
}

/// Whether `source` can be a chunk title.
#[must_use]
pub fn is_citation_key(source: &str) -> bool {
    CITATION_KEY.is_match(source)
}

/// Re-resolves every well-formed cited source against the store and returns
/// a short provenance trail. Malformed ids are dropped without error.
///
/// # Errors
/// Returns an error if a store lookup fails.
pub async fn report_grounding(store: &dyn DocumentStore, args: GroundingArgs) -> Result<ToolResult> {
    let mut valid: Vec<&str> = Vec::with_capacity(args.sources.len());
    for source in &args.sources {
        if !is_citation_key(source) {
            tracing::debug!(source = %source, "Dropping malformed citation");
        } else if !valid.contains(&source.as_str()) {
            valid.push(source);
        }
    }
    tracing::info!(sources = %valid.join(" OR "), "Grounding sources");

    let mut resolved = Vec::new();
    for source in valid {
        resolved.extend(store.search_by_title(source).await?);
    }
    Ok(ToolResult::to_server(format_grounding(&resolved)))
}

/// `[title]: first 200 characters...` entries separated by `-----` lines.
#[must_use]
pub fn format_grounding(chunks: &[Chunk]) -> String {
    let mut out = String::new();
    for chunk in chunks {
        let excerpt = truncate_chars(&chunk.content, MAX_GROUNDING_CONTENT_CHARS);
        let ellipsis = if excerpt.len() < chunk.content.len() {
            "..."
        } else {
            ""
        };
        let _ = write!(
            out,
            "[{}]: {excerpt}{ellipsis}\n{RESULT_SEPARATOR}\n",
            chunk.title
        );
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn citation_keys_follow_the_title_alphabet() {
        assert!(is_citation_key("doc_1_chunk_2"));
        assert!(is_citation_key("a-b=c"));
        assert!(!is_citation_key("bad;id"));
        assert!(!is_citation_key("policy.pdf_chunk_0"));
        assert!(!is_citation_key(""));
    }

    #[test]
    fn excerpts_are_cut_at_200_characters() {
        let out = format_grounding(&[Chunk::new("long", "y".repeat(3000))]);
        let excerpt = out
            .strip_prefix("[long]: ")
            .and_then(|rest| rest.strip_suffix("...\n-----"))
            .unwrap();
        assert_eq!(excerpt.chars().count(), 200);
    }

    #[test]
    fn short_content_gets_no_ellipsis() {
        let out = format_grounding(&[Chunk::new("s", "short")]);
        assert_eq!(out, "[s]: short\n-----");
    }
}
