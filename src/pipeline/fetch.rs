//! Document fetching: download the request's URL into a scoped temp file.
//!
//! pdfium needs a file-system path, so the body is written to a uniquely
//! named `*.pdf` file. The file is created *before* the first network call
//! and owned by [`FetchedDocument`]; dropping the guard deletes it. That
//! covers every exit path: success, fetch failure, parse failure, a panic,
//! and the handler future being dropped when the HTTP client disconnects.

use crate::error::QueryError;
use futures::StreamExt;
use reqwest::Url;
use std::path::Path;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// A downloaded document living in a temporary file.
#[derive(Debug)]
pub struct FetchedDocument {
    file: NamedTempFile,
    bytes: u64,
}

impl FetchedDocument {
    /// Path of the temporary `.pdf` file.
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Size of the downloaded body in bytes.
    pub fn len(&self) -> u64 {
        self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.bytes == 0
    }

    /// Delete the file now, logging instead of failing if removal errors.
    ///
    /// Dropping the guard has the same effect; this variant exists so the
    /// orchestrator can surface cleanup problems in the logs.
    pub fn cleanup(self) {
        let path = self.file.path().to_path_buf();
        match self.file.close() {
            Ok(()) => debug!("Removed temp document {}", path.display()),
            Err(e) => warn!("Failed to remove temp document {}: {}", path.display(), e),
        }
    }
}

/// Check that `input` is an absolute HTTP or HTTPS URL.
pub fn parse_document_url(input: &str) -> Result<Url, QueryError> {
    let invalid = |reason: String| QueryError::InvalidDocumentUrl {
        url: input.to_string(),
        reason,
    };
    let url = Url::parse(input.trim()).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(invalid(format!(
            "unsupported URL scheme '{other}' (expected http or https)"
        ))),
    }
}

/// Create the scoped temp file that will hold the document.
pub fn create_temp_document() -> Result<NamedTempFile, QueryError> {
    tempfile::Builder::new()
        .prefix("docquery-")
        .suffix(".pdf")
        .tempfile()
        .map_err(QueryError::TempFile)
}

/// Download `url` into a fresh temp file.
///
/// # Errors
/// Network failures, timeouts, non-2xx statuses, oversized or empty bodies
/// and write failures are all fatal [`QueryError`]s. The temp file is
/// removed before the error is returned.
pub async fn fetch_document(
    client: &reqwest::Client,
    url: &Url,
    timeout_secs: u64,
    max_bytes: u64,
) -> Result<FetchedDocument, QueryError> {
    let file = create_temp_document()?;
    info!("Downloading document from: {}", url);

    let download_failed = |reason: String| QueryError::DownloadFailed {
        url: url.to_string(),
        reason,
    };
    let map_send_err = |e: reqwest::Error| {
        if e.is_timeout() {
            QueryError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            download_failed(e.to_string())
        }
    };

    let response = client
        .get(url.clone())
        .timeout(Duration::from_secs(timeout_secs))
        .send()
        .await
        .map_err(map_send_err)?;

    if !response.status().is_success() {
        return Err(download_failed(format!("HTTP {}", response.status())));
    }

    if let Some(len) = response.content_length() {
        if len > max_bytes {
            return Err(QueryError::DocumentTooLarge {
                url: url.to_string(),
                limit: max_bytes,
            });
        }
    }

    // Stream to disk so the cap also bounds bodies sent without a length.
    let mut out = tokio::fs::OpenOptions::new()
        .write(true)
        .truncate(true)
        .open(file.path())
        .await
        .map_err(QueryError::TempFile)?;
    let mut written: u64 = 0;
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(map_send_err)?;
        written += chunk.len() as u64;
        if written > max_bytes {
            return Err(QueryError::DocumentTooLarge {
                url: url.to_string(),
                limit: max_bytes,
            });
        }
        out.write_all(&chunk).await.map_err(QueryError::TempFile)?;
    }
    out.flush().await.map_err(QueryError::TempFile)?;

    if written == 0 {
        return Err(QueryError::EmptyDocument {
            url: url.to_string(),
        });
    }

    info!("Downloaded {} bytes to: {}", written, file.path().display());

    Ok(FetchedDocument {
        file,
        bytes: written,
    })
}
