//! Query orchestration: one document, many questions, one answer each.
//!
//! [`QueryEngine`] owns the long-lived pieces (HTTP client, chat backend,
//! embedder, text extractor) and is shared by every request the server
//! handles. Per-request state (temp file, chunk index) lives only inside
//! [`QueryEngine::run`].
//!
//! ## Failure model
//!
//! Anything that goes wrong *before* the question loop (bad URL, download,
//! unreadable PDF, embedding the chunks) fails the whole request with a
//! [`QueryError`]. Inside the loop, a question that fails becomes an
//! error-shaped [`DecisionRecord`] at its own position and the remaining
//! questions still run.

use crate::config::QueryConfig;
use crate::embedding::{self, Embedder};
use crate::error::QueryError;
use crate::output::{DecisionRecord, QueryRequest, QueryResponse};
use crate::pipeline::evaluate::evaluate_question;
use crate::pipeline::fetch::{fetch_document, parse_document_url};
use crate::pipeline::index::{build_index, VectorIndex};
use crate::pipeline::load::{load_document, PdfiumExtractor, TextExtractor};
use crate::provider::{resolve_chat, ChatBackend};
use futures::stream::{self, StreamExt};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Answers [`QueryRequest`]s.
#[derive(Clone)]
pub struct QueryEngine {
    config: QueryConfig,
    http: reqwest::Client,
    chat: Arc<dyn ChatBackend>,
    embedder: Arc<dyn Embedder>,
    extractor: Arc<dyn TextExtractor>,
}

impl QueryEngine {
    /// Assemble an engine from explicit backends.
    pub fn new(
        config: QueryConfig,
        chat: Arc<dyn ChatBackend>,
        embedder: Arc<dyn Embedder>,
        extractor: Arc<dyn TextExtractor>,
    ) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            chat,
            embedder,
            extractor,
        }
    }

    /// Build an engine with the backends named in `config`: the resolved
    /// LLM provider, the configured embedder and the pdfium extractor.
    ///
    /// # Errors
    /// Invalid configuration or no usable LLM provider.
    pub fn from_config(config: QueryConfig) -> Result<Self, QueryError> {
        config.validate()?;
        let http = reqwest::Client::new();
        let chat = resolve_chat(&config)?;
        let embedder = embedding::from_backend(&config.embedding, &http);
        let extractor = Arc::new(PdfiumExtractor::new(config.pdfium_lib_path.clone()));
        info!("Embedding backend: {}", embedder.name());

        Ok(Self {
            config,
            http,
            chat,
            embedder,
            extractor,
        })
    }

    /// Same backends, different settings (e.g. a per-request `top_k`).
    ///
    /// The chat backend and embedder are kept as they are; changing
    /// `provider`, `model` or `embedding` here has no effect.
    pub fn with_config(&self, config: QueryConfig) -> Result<Self, QueryError> {
        config.validate()?;
        Ok(Self {
            config,
            ..self.clone()
        })
    }

    /// Replace the HTTP client used for document downloads.
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    /// Answer every question in `request` against its document.
    ///
    /// # Returns
    /// One [`DecisionRecord`] per question, in input order. Failed questions
    /// are records with `decision == "error"`.
    ///
    /// # Errors
    /// Returns `Err(QueryError)` only for fatal errors:
    /// - Document URL that is not absolute http(s)
    /// - Download failure, timeout or oversized body
    /// - Not a PDF / unreadable PDF / no extractable text
    /// - Chunk embedding failure
    ///
    /// The downloaded file is deleted before this returns, on every path.
    pub async fn run(&self, request: &QueryRequest) -> Result<QueryResponse, QueryError> {
        let total_start = Instant::now();

        // ── Step 1: Validate request ─────────────────────────────────────────
        let url = parse_document_url(&request.documents)?;
        if request.questions.is_empty() {
            info!("No questions for {}; nothing to do", url);
            return Ok(QueryResponse::default());
        }
        info!(
            "Starting query: {} questions against {}",
            request.questions.len(),
            url
        );

        // ── Step 2: Fetch document ───────────────────────────────────────────
        let document = fetch_document(
            &self.http,
            &url,
            self.config.download_timeout_secs,
            self.config.max_document_bytes,
        )
        .await?;

        // ── Step 3–5: Load, index, evaluate ──────────────────────────────────
        let result = self
            .answer_document(document.path(), &request.questions)
            .await;

        // ── Step 6: Cleanup ──────────────────────────────────────────────────
        document.cleanup();

        let answers = result?;
        let failed = answers.iter().filter(|a| a.is_error()).count();
        info!(
            "Query complete: {}/{} answered, {} failed, {}ms total",
            answers.len() - failed,
            answers.len(),
            failed,
            total_start.elapsed().as_millis()
        );

        Ok(QueryResponse { answers })
    }

    async fn answer_document(
        &self,
        path: &Path,
        questions: &[String],
    ) -> Result<Vec<DecisionRecord>, QueryError> {
        let chunks = load_document(self.extractor.as_ref(), path, &self.config).await?;

        let index_start = Instant::now();
        let index = build_index(
            self.embedder.as_ref(),
            chunks,
            self.config.embed_batch_size,
        )
        .await?;
        info!(
            "Indexed {} chunks in {}ms",
            index.len(),
            index_start.elapsed().as_millis()
        );

        let total = questions.len();
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_query_start(total);
        }

        // Futures are built up front so the stream owns concrete values;
        // `buffered` keeps output order equal to input order.
        let pending: Vec<_> = questions
            .iter()
            .enumerate()
            .map(|(i, question)| self.answer_one(&index, i, total, question))
            .collect();
        let answers: Vec<DecisionRecord> = stream::iter(pending)
            .buffered(self.config.concurrency.max(1))
            .collect()
            .await;

        if let Some(ref cb) = self.config.progress_callback {
            cb.on_query_complete(total, answers.iter().filter(|a| !a.is_error()).count());
        }

        Ok(answers)
    }

    async fn answer_one(
        &self,
        index: &VectorIndex,
        position: usize,
        total: usize,
        question: &str,
    ) -> DecisionRecord {
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_question_start(position, total);
        }

        let outcome = evaluate_question(
            self.chat.as_ref(),
            self.embedder.as_ref(),
            index,
            question,
            &self.config,
        )
        .await;

        match outcome {
            Ok(eval) => {
                info!(
                    "Question {}/{}: {} ({} chunks, {} in / {} out tokens, {} retries, {}ms)",
                    position + 1,
                    total,
                    eval.record.decision,
                    eval.retrieved.len(),
                    eval.prompt_tokens,
                    eval.completion_tokens,
                    eval.retries,
                    eval.duration_ms
                );
                if let Some(ref cb) = self.config.progress_callback {
                    cb.on_question_complete(position, total, &eval.record);
                }
                eval.record
            }
            Err(e) => {
                warn!("Question {}/{} failed: {}", position + 1, total, e);
                if let Some(ref cb) = self.config.progress_callback {
                    cb.on_question_error(position, total, &e.to_string());
                }
                DecisionRecord::from_error(&e)
            }
        }
    }
}

/// Answer `request` with backends resolved from `config`.
///
/// Convenience for one-off calls; long-running callers should build one
/// [`QueryEngine`] and reuse it.
pub async fn run_query(
    request: &QueryRequest,
    config: &QueryConfig,
) -> Result<QueryResponse, QueryError> {
    QueryEngine::from_config(config.clone())?.run(request).await
}
