//! Error types for the docquery library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`QueryError`] — **Fatal**: the request cannot be answered at all
//!   (document unreachable, not a PDF, index could not be built). Returned as
//!   `Err(QueryError)` from [`crate::query::QueryEngine::run`] and rendered
//!   as a single top-level error object by the HTTP layer.
//!
//! * [`QuestionError`] — **Non-fatal**: one question failed (LLM outage,
//!   unparseable reply) but its siblings are fine. Converted into an
//!   error-shaped [`crate::output::DecisionRecord`] at the question's
//!   position, so a response never mixes partial answers with a top-level
//!   error.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the docquery library.
///
/// Only failures that happen strictly before the per-question loop starts
/// end up here; question-level failures use [`QuestionError`].
#[derive(Debug, Error)]
pub enum QueryError {
    // ── Request errors ────────────────────────────────────────────────────
    /// The request body could not be decoded (malformed JSON, missing or
    /// mistyped fields).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // ── Fetch errors ──────────────────────────────────────────────────────
    /// `documents` is not an absolute http(s) URL, so nothing can be fetched.
    #[error("Cannot fetch document '{url}': {reason}")]
    InvalidDocumentUrl { url: String, reason: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    /// The response body exceeded `max_document_bytes`.
    #[error("Document at '{url}' is larger than the {limit}-byte limit")]
    DocumentTooLarge { url: String, limit: u64 },

    /// The server answered 2xx with an empty body.
    #[error("Document at '{url}' is empty")]
    EmptyDocument { url: String },

    /// Could not create or write the scoped temporary file.
    #[error("Temporary file error: {0}")]
    TempFile(#[source] std::io::Error),

    // ── Load errors ───────────────────────────────────────────────────────
    /// The file was downloaded, but is not a PDF.
    #[error("File is not a valid PDF: '{path}' (first bytes: {magic:?})")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password; remote documents are never decrypted.
    #[error("PDF '{path}' is encrypted and requires a password")]
    PasswordRequired { path: PathBuf },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide."
    )]
    PdfiumBindingFailed(String),

    /// The document parsed, but no page yielded any text.
    #[error("No extractable text in '{path}' (scanned or image-only PDF?)")]
    NoText { path: PathBuf },

    // ── Index errors ──────────────────────────────────────────────────────
    /// Chunk embedding failed while building the similarity index.
    #[error("Failed to build similarity index: {0}")]
    EmbeddingFailed(String),

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl QueryError {
    /// HTTP status the server answers with for this error.
    ///
    /// An undecodable body is the caller's fault (422); every other fatal
    /// error, including an unusable `documents` URL, is a fetch-stage 500
    /// with the error message as detail.
    pub fn status_code(&self) -> u16 {
        match self {
            QueryError::InvalidRequest(_) => 422,
            _ => 500,
        }
    }
}

/// A non-fatal error for a single question.
///
/// The orchestrator turns it into a `decision = "error"` record; the
/// `Display` text becomes the record's justification.
#[derive(Debug, Clone, Error, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum QuestionError {
    /// The question was blank after trimming.
    #[error("Question is empty")]
    EmptyQuestion,

    /// Embedding the question or searching the index failed.
    #[error("Retrieval failed: {detail}")]
    Retrieval { detail: String },

    /// LLM call failed after retries.
    #[error("LLM call failed after {retries} retries: {detail}")]
    LlmFailed { retries: u32, detail: String },

    /// LLM call timed out on the final attempt.
    #[error("LLM call timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The LLM answered, but not with a valid decision object.
    #[error("Malformed LLM reply: {detail}")]
    MalformedReply { detail: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_request_maps_to_422() {
        let e = QueryError::InvalidRequest("missing field `questions`".into());
        assert_eq!(e.status_code(), 422);
    }

    #[test]
    fn unusable_document_url_maps_to_500() {
        let e = QueryError::InvalidDocumentUrl {
            url: "ftp://example.com/a.pdf".into(),
            reason: "unsupported URL scheme 'ftp'".into(),
        };
        assert_eq!(e.status_code(), 500);
        assert!(e.to_string().contains("ftp://example.com/a.pdf"), "got: {e}");
    }

    #[test]
    fn fetch_failures_map_to_500() {
        let e = QueryError::DownloadFailed {
            url: "https://example.com/a.pdf".into(),
            reason: "HTTP 404 Not Found".into(),
        };
        assert_eq!(e.status_code(), 500);
        assert!(e.to_string().contains("HTTP 404"), "got: {e}");
    }

    #[test]
    fn download_timeout_display() {
        let e = QueryError::DownloadTimeout {
            url: "https://example.com/a.pdf".into(),
            secs: 30,
        };
        assert!(e.to_string().contains("30s"));
    }

    #[test]
    fn llm_failed_display() {
        let e = QuestionError::LlmFailed {
            retries: 2,
            detail: "503 Service Unavailable".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("2 retries"), "got: {msg}");
        assert!(msg.contains("503"), "got: {msg}");
    }

    #[test]
    fn malformed_reply_display() {
        let e = QuestionError::MalformedReply {
            detail: "missing field `decision`".into(),
        };
        assert!(e.to_string().contains("decision"));
    }
}
