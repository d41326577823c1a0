//! Pipeline stages for answering questions about a remote document.
//!
//! Each submodule implements exactly one step, so each is testable on its
//! own and backends (extractor, embedder, chat model) can be swapped behind
//! their traits without touching the other stages.
//!
//! ## Data Flow
//!
//! ```text
//! fetch ──▶ load ──▶ index ──▶ evaluate ──▶ reply
//! (HTTP)    (pdfium)  (embed)   (LLM)        (JSON)
//! ```
//!
//! 1. [`fetch`]    — download the URL into a scoped temp `.pdf` file
//! 2. [`load`]     — extract page text in `spawn_blocking` and split it into
//!    overlapping chunks
//! 3. [`index`]    — embed every chunk once per request; cosine top-k search
//! 4. [`evaluate`] — per question: retrieve, prompt, call the LLM with
//!    retry/backoff; the only stage talking to the model
//! 5. [`reply`]    — lenient extraction, strict validation of the decision

pub mod evaluate;
pub mod fetch;
pub mod index;
pub mod load;
pub mod reply;
