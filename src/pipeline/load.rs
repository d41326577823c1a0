//! Document loading: extract page text via pdfium and split it into chunks.
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which keeps thread-local
//! state and is CPU-bound while parsing. Text extraction runs on the
//! blocking pool so Tokio worker threads keep serving other requests.
//!
//! ## Chunking
//!
//! Page text is split with `text-splitter` into windows of at most
//! `chunk_size` characters with `chunk_overlap` characters shared between
//! neighbours. The splitter prefers semantic boundaries (paragraphs, then
//! sentences, then words) and is deterministic, so the same document always
//! produces the same chunk set.

use crate::config::QueryConfig;
use crate::error::QueryError;
use crate::output::Chunk;
use async_trait::async_trait;
use pdfium_render::prelude::*;
use std::io::Read;
use std::path::{Path, PathBuf};
use text_splitter::{ChunkConfig, TextSplitter};
use tracing::{debug, info};

/// Text of one document page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    /// 1-based page number.
    pub page: usize,
    pub text: String,
}

/// Extracts page text from a document on disk.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, path: &Path) -> Result<Vec<PageText>, QueryError>;
}

/// pdfium-backed PDF text extractor.
#[derive(Debug, Clone, Default)]
pub struct PdfiumExtractor {
    lib_path: Option<PathBuf>,
}

impl PdfiumExtractor {
    /// `lib_path` is the pdfium shared library (file or containing
    /// directory); `None` searches the system library path.
    pub fn new(lib_path: Option<PathBuf>) -> Self {
        Self { lib_path }
    }
}

#[async_trait]
impl TextExtractor for PdfiumExtractor {
    async fn extract(&self, path: &Path) -> Result<Vec<PageText>, QueryError> {
        let path = path.to_path_buf();
        let lib_path = self.lib_path.clone();
        tokio::task::spawn_blocking(move || extract_pages_blocking(&path, lib_path.as_deref()))
            .await
            .map_err(|e| QueryError::Internal(format!("Text extraction task panicked: {}", e)))?
    }
}

/// Verify the `%PDF` magic bytes so callers get a meaningful error
/// instead of an opaque pdfium failure.
fn check_pdf_magic(path: &Path) -> Result<(), QueryError> {
    let mut file = std::fs::File::open(path).map_err(|e| QueryError::CorruptPdf {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    let mut magic = [0u8; 4];
    match file.read_exact(&mut magic) {
        Ok(()) if &magic == b"%PDF" => Ok(()),
        Ok(()) => Err(QueryError::NotAPdf {
            path: path.to_path_buf(),
            magic,
        }),
        Err(e) => Err(QueryError::CorruptPdf {
            path: path.to_path_buf(),
            detail: format!("file too short: {e}"),
        }),
    }
}

fn bind_pdfium(lib_path: Option<&Path>) -> Result<Pdfium, QueryError> {
    let bindings = match lib_path {
        Some(p) if p.is_dir() => {
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(p))
        }
        Some(p) => Pdfium::bind_to_library(p),
        None => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| QueryError::PdfiumBindingFailed(format!("{:?}", e)))?;
    Ok(Pdfium::new(bindings))
}

/// Blocking implementation of text extraction, magic-byte check included.
fn extract_pages_blocking(
    pdf_path: &Path,
    lib_path: Option<&Path>,
) -> Result<Vec<PageText>, QueryError> {
    check_pdf_magic(pdf_path)?;
    let pdfium = bind_pdfium(lib_path)?;

    let document = pdfium.load_pdf_from_file(pdf_path, None).map_err(|e| {
        let err_str = format!("{:?}", e);
        if err_str.contains("Password") || err_str.contains("password") {
            QueryError::PasswordRequired {
                path: pdf_path.to_path_buf(),
            }
        } else {
            QueryError::CorruptPdf {
                path: pdf_path.to_path_buf(),
                detail: err_str,
            }
        }
    })?;

    let pages = document.pages();
    info!("PDF loaded: {} pages", pages.len());

    let mut results = Vec::with_capacity(pages.len() as usize);
    for (idx, page) in pages.iter().enumerate() {
        let text = page
            .text()
            .map_err(|e| QueryError::CorruptPdf {
                path: pdf_path.to_path_buf(),
                detail: format!("page {}: {:?}", idx + 1, e),
            })?
            .all();
        debug!("Extracted page {} → {} chars", idx + 1, text.len());
        results.push(PageText {
            page: idx + 1,
            text,
        });
    }

    Ok(results)
}

/// Split page texts into ordered chunks.
///
/// Whitespace-only pages contribute nothing; chunk indices are contiguous
/// in document order.
pub fn chunk_pages(
    pages: &[PageText],
    chunk_size: usize,
    chunk_overlap: usize,
) -> Result<Vec<Chunk>, QueryError> {
    let chunk_config = ChunkConfig::new(chunk_size)
        .with_overlap(chunk_overlap)
        .map_err(|e| QueryError::InvalidConfig(e.to_string()))?;
    let splitter = TextSplitter::new(chunk_config);

    let mut chunks = Vec::new();
    for page in pages {
        let text = normalise_whitespace(&page.text);
        if text.is_empty() {
            continue;
        }
        for piece in splitter.chunks(&text) {
            let piece = piece.trim();
            if piece.is_empty() {
                continue;
            }
            chunks.push(Chunk {
                index: chunks.len(),
                page: page.page,
                text: piece.to_string(),
            });
        }
    }
    Ok(chunks)
}

/// Collapse runs of spaces/tabs, drop trailing spaces and excess blank lines.
///
/// pdfium reports layout gaps as long space runs; keeping them would waste
/// chunk capacity and prompt tokens.
fn normalise_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0usize;
    for line in text.replace("\r\n", "\n").replace('\r', "\n").lines() {
        let line = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(&line);
        out.push('\n');
    }
    out.trim().to_string()
}

/// Extract and chunk the document at `path`.
///
/// # Errors
/// Extraction errors propagate unchanged; a document without any text is
/// [`QueryError::NoText`].
pub async fn load_document(
    extractor: &dyn TextExtractor,
    path: &Path,
    config: &QueryConfig,
) -> Result<Vec<Chunk>, QueryError> {
    let pages = extractor.extract(path).await?;
    let chunks = chunk_pages(&pages, config.chunk_size, config.chunk_overlap)?;
    if chunks.is_empty() {
        return Err(QueryError::NoText {
            path: path.to_path_buf(),
        });
    }
    info!("Loaded {} pages → {} chunks", pages.len(), chunks.len());
    Ok(chunks)
}
