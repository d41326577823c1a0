//! Progress-callback trait for per-question query events.
//!
//! Inject an [`Arc<dyn QueryProgressCallback>`] via
//! [`crate::config::QueryConfigBuilder::progress_callback`] to receive
//! events as the orchestrator works through the question list. The HTTP
//! server runs without one; the `docquery ask` command drives a terminal
//! progress bar from it.
//!
//! # Example
//!
//! ```rust
//! use docquery::{DecisionRecord, QueryConfig, QueryProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     answered: Arc<AtomicUsize>,
//! }
//!
//! impl QueryProgressCallback for CountingCallback {
//!     fn on_question_complete(&self, index: usize, total: usize, record: &DecisionRecord) {
//!         let done = self.answered.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("{done}/{total}: question {index} -> {}", record.decision);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback {
//!     answered: Arc::new(AtomicUsize::new(0)),
//! });
//!
//! let config = QueryConfig::builder()
//!     .progress_callback(counter as Arc<dyn QueryProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::output::DecisionRecord;
use std::sync::Arc;

/// Called by the orchestrator as it evaluates each question.
///
/// All methods have default no-op implementations. With `concurrency > 1`
/// the per-question methods may be called from several tasks at once, so
/// implementations must synchronise their own state.
///
/// Question indices are 0-based positions in the request.
pub trait QueryProgressCallback: Send + Sync {
    /// Called once the index is built, before the first question.
    fn on_query_start(&self, total_questions: usize) {
        let _ = total_questions;
    }

    /// Called just before a question is embedded and sent to the LLM.
    fn on_question_start(&self, index: usize, total_questions: usize) {
        let _ = (index, total_questions);
    }

    /// Called when a question produced a valid decision.
    fn on_question_complete(&self, index: usize, total_questions: usize, record: &DecisionRecord) {
        let _ = (index, total_questions, record);
    }

    /// Called when a question failed and was replaced by an error record.
    fn on_question_error(&self, index: usize, total_questions: usize, error: &str) {
        let _ = (index, total_questions, error);
    }

    /// Called once after every question has been attempted.
    ///
    /// # Arguments
    /// * `total_questions` — questions in the request
    /// * `success_count`   — questions answered without error
    fn on_query_complete(&self, total_questions: usize, success_count: usize) {
        let _ = (total_questions, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl QueryProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::QueryConfig`].
pub type ProgressCallback = Arc<dyn QueryProgressCallback>;
