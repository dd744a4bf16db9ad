//! One-time corpus ingestion.
//!
//! Runs at start-up, before the server accepts sessions. An index that already
//! holds documents is reused as is.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{Chunk, DocumentStore, IndexSettings};
use crate::error::{Error, Result};

pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 100;

const PIECE_SEPARATOR: &str = "\n\n";
const PIECE_SEPARATOR_CHARS: usize = 2;

/// A source file's extracted text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    /// File name, used to derive chunk titles.
    pub name: String,
    pub text: String,
}

/// Produces the documents to ingest.
#[async_trait]
pub trait DocumentLoader: Send + Sync {
    async fn load(&self) -> Result<Vec<SourceDocument>>;
}

const CORPUS_EXTENSIONS: &[&str] = &["txt", "md"];

/// Loads plain-text and Markdown files from a single directory.
#[derive(Debug, Clone)]
pub struct TextCorpusLoader {
    dir: PathBuf,
}

impl TextCorpusLoader {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn accepts(path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| CORPUS_EXTENSIONS.iter().any(|x| x.eq_ignore_ascii_case(e)))
    }
}

#[async_trait]
impl DocumentLoader for TextCorpusLoader {
    async fn load(&self) -> Result<Vec<SourceDocument>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(|e| {
            Error::Ingestion(format!("cannot read corpus dir {}: {e}", self.dir.display()))
        })?;

        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_file() && Self::accepts(&path) {
                paths.push(path);
            }
        }
        paths.sort();

        let mut docs = Vec::with_capacity(paths.len());
        for path in paths {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            tracing::info!(file = %name, "Processing file");
            let text = tokio::fs::read_to_string(&path).await.map_err(|e| {
                Error::Ingestion(format!("cannot read {}: {e}", path.display()))
            })?;
            docs.push(SourceDocument { name, text });
        }
        Ok(docs)
    }
}

/// Paragraph-aware character splitter.
///
/// Text is split on blank lines and the pieces are packed into chunks of at
/// most `chunk_size` characters. Consecutive chunks share up to `overlap`
/// characters of whole pieces. A piece longer than `chunk_size` is cut into
/// fixed windows that overlap by `overlap` characters.
#[derive(Debug, Clone, Copy)]
pub struct TextSplitter {
    chunk_size: usize,
    overlap: usize,
}

impl Default for TextSplitter {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl TextSplitter {
    /// # Errors
    /// Returns an error if `chunk_size` is zero or `overlap` is not smaller than it.
    #[allow(clippy::result_large_err)]
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self> {
        if chunk_size == 0 || overlap >= chunk_size {
            return Err(Error::Config(format!(
                "chunk overlap ({overlap}) must be smaller than chunk size ({chunk_size})"
            )));
        }
        Ok(Self {
            chunk_size,
            overlap,
        })
    }

    #[must_use]
    pub fn split(&self, text: &str) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut window: Vec<&str> = Vec::new();
        let mut window_len = 0;

        for piece in text.split(PIECE_SEPARATOR).map(str::trim).filter(|p| !p.is_empty()) {
            let piece_len = piece.chars().count();
            if piece_len > self.chunk_size {
                if !window.is_empty() {
                    chunks.push(window.join(PIECE_SEPARATOR));
                    window.clear();
                    window_len = 0;
                }
                chunks.extend(self.cut(piece));
                continue;
            }

            let joined = |len: usize, window: &[&str]| {
                if window.is_empty() {
                    len
                } else {
                    len + PIECE_SEPARATOR_CHARS
                }
            };

            if !window.is_empty() && window_len + joined(piece_len, &window) > self.chunk_size {
                chunks.push(window.join(PIECE_SEPARATOR));
                (window, window_len) = self.carry_over(&window);
                while !window.is_empty()
                    && window_len + joined(piece_len, &window) > self.chunk_size
                {
                    let first = window.remove(0);
                    window_len -= joined(first.chars().count(), &window);
                }
            }
            window_len += joined(piece_len, &window);
            window.push(piece);
        }

        if !window.is_empty() {
            chunks.push(window.join(PIECE_SEPARATOR));
        }
        chunks
    }

    /// Trailing pieces of `window` that fit in the overlap budget.
    fn carry_over<'a>(&self, window: &[&'a str]) -> (Vec<&'a str>, usize) {
        let mut carried = Vec::new();
        let mut len = 0;
        for piece in window.iter().rev() {
            let added = piece.chars().count()
                + if carried.is_empty() {
                    0
                } else {
                    PIECE_SEPARATOR_CHARS
                };
            if len + added > self.overlap {
                break;
            }
            len += added;
            carried.push(*piece);
        }
        carried.reverse();
        (carried, len)
    }

    fn cut(&self, piece: &str) -> Vec<String> {
        let chars: Vec<char> = piece.chars().collect();
        let step = self.chunk_size - self.overlap;
        let mut out = Vec::new();
        let mut start = 0;
        loop {
            let end = (start + self.chunk_size).min(chars.len());
            out.push(chars[start..end].iter().collect());
            if end == chars.len() {
                break;
            }
            start += step;
        }
        out
    }
}

/// `{file}_chunk_{i}` with every character outside `[A-Za-z0-9_=-]` replaced
/// by `_`, so the title is always a valid citation key.
#[must_use]
pub fn chunk_title(file_name: &str, index: usize) -> String {
    let sanitized: String = file_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '=' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{sanitized}_chunk_{index}")
}

/// Splits every document into titled chunks.
#[must_use]
pub fn chunk_documents(docs: &[SourceDocument], splitter: &TextSplitter) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    for doc in docs {
        for (i, content) in splitter.split(&doc.text).into_iter().enumerate() {
            let mut chunk = Chunk::new(chunk_title(&doc.name, i), content);
            chunk.metadata.insert("source".to_string(), doc.name.clone());
            chunks.push(chunk);
        }
    }
    chunks
}

/// What [`ensure_ingested`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestReport {
    /// The index existed and held documents; nothing was written.
    Reused,
    /// The index was created and loaded.
    Created { chunks: usize },
    /// The index existed but was empty and has been loaded.
    Refilled { chunks: usize },
}

/// Makes sure `index_name` exists and holds the corpus.
///
/// # Errors
/// Returns an error if the corpus cannot be loaded or the store fails. Both
/// are fatal at start-up.
pub async fn ensure_ingested(
    store: &dyn DocumentStore,
    loader: &dyn DocumentLoader,
    splitter: &TextSplitter,
    index_name: &str,
    settings: &IndexSettings,
) -> Result<IngestReport> {
    if !store.index_exists(index_name).await? {
        tracing::info!(index = index_name, "Creating vector store and indexing documents");
        store.create_index(index_name, settings).await?;
        let chunks = load_corpus(store, loader, splitter).await?;
        return Ok(IngestReport::Created { chunks });
    }

    if store.is_empty().await? {
        tracing::info!(index = index_name, "Vector store is empty, indexing documents");
        let chunks = load_corpus(store, loader, splitter).await?;
        return Ok(IngestReport::Refilled { chunks });
    }

    tracing::info!(index = index_name, "Vector store already exists, reusing it");
    Ok(IngestReport::Reused)
}

async fn load_corpus(
    store: &dyn DocumentStore,
    loader: &dyn DocumentLoader,
    splitter: &TextSplitter,
) -> Result<usize> {
    let docs = loader.load().await?;
    let chunks = chunk_documents(&docs, splitter);
    tracing::info!(documents = docs.len(), chunks = chunks.len(), "Corpus loaded");
    if chunks.is_empty() {
        tracing::warn!("Corpus is empty; searches will return no results");
        return Ok(0);
    }
    store.add_chunks(&chunks).await
}
