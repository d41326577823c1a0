//! # docquery
//!
//! Answer natural-language questions about a remote PDF with structured,
//! clause-backed decisions.
//!
//! ## Why this crate?
//!
//! Policy and contract questions ("Is knee surgery covered after two
//! years?") need an answer *and* the clauses it rests on. Sending a whole
//! document to an LLM per question is slow and expensive, so this crate
//! indexes the document once per request and gives the model only the few
//! chunks that matter for each question.
//!
//! ## Pipeline Overview
//!
//! ```text
//! URL
//!  │
//!  ├─ 1. Fetch     download into a scoped temp .pdf (always removed)
//!  ├─ 2. Load      pdfium text extraction (spawn_blocking) + chunking
//!  ├─ 3. Index     embed each chunk once; cosine similarity search
//!  ├─ 4. Evaluate  per question: top-k chunks → LLM with retry/backoff
//!  └─ 5. Reply     JSON decision record, or an error record in its place
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docquery::{QueryConfig, QueryEngine, QueryRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / …
//!     let engine = QueryEngine::from_config(QueryConfig::default())?;
//!     let response = engine
//!         .run(&QueryRequest {
//!             documents: "https://example.com/policy.pdf".into(),
//!             questions: vec!["What is the grace period for premium payment?".into()],
//!         })
//!         .await?;
//!     for answer in &response.answers {
//!         println!("{}: {}", answer.decision, answer.justification);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docquery` binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when embedding the library or the router in another service:
//! ```toml
//! docquery = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod embedding;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod provider;
pub mod query;
pub mod server;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{EmbeddingBackend, FastEmbedModel, QueryConfig, QueryConfigBuilder};
pub use embedding::{Embedder, FastEmbedder, HashingEmbedder, OllamaEmbedder};
pub use error::{QueryError, QuestionError};
pub use output::{Chunk, Decision, DecisionRecord, QueryRequest, QueryResponse};
pub use pipeline::load::{PageText, PdfiumExtractor, TextExtractor};
pub use progress::{NoopProgressCallback, ProgressCallback, QueryProgressCallback};
pub use provider::{ChatBackend, ChatOptions, ChatReply, Prompt, ProviderChat};
pub use query::{run_query, QueryEngine};
pub use server::{router, serve, AppState, ErrorBody};
