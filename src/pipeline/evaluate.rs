//! Question evaluation: retrieve context, call the LLM, parse the decision.
//!
//! All prompt wording lives in [`crate::prompts`] and all reply handling in
//! [`super::reply`]; this module owns retrieval, retries and timing.
//!
//! ## Retry Strategy
//!
//! Rate limits and gateway errors are transient, so failed or timed-out
//! calls are retried with exponential backoff (`retry_backoff_ms *
//! 2^(attempt-1)`): with a 500 ms base and 2 retries the waits are
//! 500 ms → 1 s. A reply that arrives but does not parse is returned as
//! [`QuestionError::MalformedReply`] without another attempt.

use super::index::{ScoredChunk, VectorIndex};
use super::reply::parse_decision;
use crate::config::QueryConfig;
use crate::embedding::Embedder;
use crate::error::QuestionError;
use crate::output::DecisionRecord;
use crate::prompts::{build_user_prompt, DEFAULT_SYSTEM_PROMPT};
use crate::provider::{ChatBackend, ChatOptions, ChatReply, Prompt};
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// Successful evaluation of one question.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub record: DecisionRecord,
    /// Chunks that were given to the model, best first.
    pub retrieved: Vec<ScoredChunk>,
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub retries: u32,
    pub duration_ms: u64,
}

/// Answer one question against an already-built index.
pub async fn evaluate_question(
    chat: &dyn ChatBackend,
    embedder: &dyn Embedder,
    index: &VectorIndex,
    question: &str,
    config: &QueryConfig,
) -> Result<Evaluation, QuestionError> {
    let start = Instant::now();
    let question = question.trim();
    if question.is_empty() {
        return Err(QuestionError::EmptyQuestion);
    }

    let query_vector = embedder
        .embed_one(question)
        .await
        .map_err(|e| QuestionError::Retrieval {
            detail: e.to_string(),
        })?;
    let retrieved = index.search(&query_vector, config.top_k);
    debug!(
        "Retrieved {} chunks (best score {:.3})",
        retrieved.len(),
        retrieved.first().map(|h| h.score).unwrap_or(0.0)
    );

    let prompt = Prompt {
        system: config
            .system_prompt
            .clone()
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
        user: build_user_prompt(question, &retrieved),
    };

    let (reply, retries) = call_with_retries(chat, &prompt, config).await?;
    let record = parse_decision(&reply.content)?;

    let duration = start.elapsed();
    debug!(
        "{} input tokens, {} output tokens, {:?}",
        reply.prompt_tokens, reply.completion_tokens, duration
    );

    Ok(Evaluation {
        record,
        retrieved,
        prompt_tokens: reply.prompt_tokens,
        completion_tokens: reply.completion_tokens,
        retries,
        duration_ms: duration.as_millis() as u64,
    })
}

/// Longest single wait between attempts.
const MAX_BACKOFF_MS: u64 = 60_000;

/// `base_ms * 2^(attempt-1)`, saturating and capped at [`MAX_BACKOFF_MS`].
fn retry_backoff_ms(base_ms: u64, attempt: u32) -> u64 {
    let factor = 2u64
        .checked_pow(attempt.saturating_sub(1))
        .unwrap_or(u64::MAX);
    base_ms.saturating_mul(factor).min(MAX_BACKOFF_MS)
}

/// Call the backend, retrying failures and timeouts.
///
/// Returns the reply and the number of retries it took.
async fn call_with_retries(
    chat: &dyn ChatBackend,
    prompt: &Prompt,
    config: &QueryConfig,
) -> Result<(ChatReply, u32), QuestionError> {
    let options = ChatOptions::from_config(config);
    let call_timeout = Duration::from_secs(config.api_timeout_secs);
    let mut last_err = QuestionError::LlmFailed {
        retries: 0,
        detail: "Unknown error".to_string(),
    };

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let backoff = retry_backoff_ms(config.retry_backoff_ms, attempt);
            warn!(
                "Retry {}/{} after {}ms",
                attempt, config.max_retries, backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }

        match timeout(call_timeout, chat.chat(prompt, &options)).await {
            Ok(Ok(reply)) => return Ok((reply, attempt)),
            Ok(Err(e)) => {
                warn!("Attempt {} failed: {}", attempt + 1, e);
                last_err = QuestionError::LlmFailed {
                    retries: config.max_retries,
                    detail: e.to_string(),
                };
            }
            Err(_) => {
                warn!(
                    "Attempt {} timed out after {}s",
                    attempt + 1,
                    config.api_timeout_secs
                );
                last_err = QuestionError::Timeout {
                    secs: config.api_timeout_secs,
                };
            }
        }
    }

    Err(last_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;
    use crate::output::{Chunk, Decision};
    use crate::pipeline::index::build_index;
    use crate::provider::BackendError;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    const APPROVED: &str = r#"{"decision":"approved","justification":"Grace period is thirty days.","amount":null,"clauses_used":["The grace period for premium payment is thirty days."]}"#;

    /// Replays a fixed script of outcomes and records every prompt it sees.
    struct Scripted {
        script: Mutex<VecDeque<Result<String, String>>>,
        prompts: Mutex<Vec<Prompt>>,
    }

    impl Scripted {
        fn new(script: Vec<Result<&str, &str>>) -> Self {
            Self {
                script: Mutex::new(
                    script
                        .into_iter()
                        .map(|r| r.map(str::to_string).map_err(str::to_string))
                        .collect(),
                ),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ChatBackend for Scripted {
        async fn chat(&self, prompt: &Prompt, _options: &ChatOptions) -> Result<ChatReply, BackendError> {
            self.prompts.lock().unwrap().push(prompt.clone());
            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(Ok(content)) => Ok(ChatReply {
                    content,
                    prompt_tokens: 100,
                    completion_tokens: 20,
                }),
                Some(Err(e)) => Err(BackendError(e)),
                None => Err(BackendError("script exhausted".into())),
            }
        }
    }

    struct Hanging;

    #[async_trait]
    impl ChatBackend for Hanging {
        async fn chat(&self, _prompt: &Prompt, _options: &ChatOptions) -> Result<ChatReply, BackendError> {
            sleep(Duration::from_secs(3600)).await;
            Err(BackendError("unreachable".into()))
        }
    }

    async fn fixture() -> (HashingEmbedder, VectorIndex) {
        let embedder = HashingEmbedder::new(256);
        let chunks = vec![
            Chunk {
                index: 0,
                page: 1,
                text: "The grace period for premium payment is thirty days.".into(),
            },
            Chunk {
                index: 1,
                page: 2,
                text: "Cataract surgery has a waiting period of two years.".into(),
            },
        ];
        let index = build_index(&embedder, chunks, 8).await.unwrap();
        (embedder, index)
    }

    fn fast_config() -> QueryConfig {
        QueryConfig::builder()
            .top_k(1)
            .max_retries(2)
            .retry_backoff_ms(1)
            .build()
            .unwrap()
    }

    #[test]
    fn backoff_doubles_then_saturates() {
        assert_eq!(retry_backoff_ms(500, 1), 500);
        assert_eq!(retry_backoff_ms(500, 2), 1_000);
        assert_eq!(retry_backoff_ms(500, 3), 2_000);
        assert_eq!(retry_backoff_ms(500, 65), MAX_BACKOFF_MS);
        assert_eq!(retry_backoff_ms(u64::MAX, 200), MAX_BACKOFF_MS);
        assert_eq!(retry_backoff_ms(0, 100), 0);
    }

    #[tokio::test]
    async fn answers_with_retrieved_context() {
        let (embedder, index) = fixture().await;
        let chat = Scripted::new(vec![Ok(APPROVED)]);

        let eval = evaluate_question(&chat, &embedder, &index, "What is the grace period?", &fast_config())
            .await
            .unwrap();

        assert_eq!(eval.record.decision, Decision::Approved);
        assert_eq!(eval.retries, 0);
        assert_eq!(eval.retrieved.len(), 1);
        assert_eq!(eval.retrieved[0].chunk.index, 0);
        let prompts = chat.prompts.lock().unwrap();
        assert!(prompts[0].user.contains("thirty days"));
        assert_eq!(prompts[0].system, DEFAULT_SYSTEM_PROMPT);
    }

    #[tokio::test]
    async fn transient_failure_is_retried() {
        let (embedder, index) = fixture().await;
        let chat = Scripted::new(vec![Err("429 Too Many Requests"), Ok(APPROVED)]);

        let eval = evaluate_question(&chat, &embedder, &index, "grace period?", &fast_config())
            .await
            .unwrap();
        assert_eq!(eval.retries, 1);
        assert_eq!(chat.calls(), 2);
    }

    #[tokio::test]
    async fn exhausted_retries_report_last_error() {
        let (embedder, index) = fixture().await;
        let chat = Scripted::new(vec![Err("boom"), Err("boom"), Err("503 unavailable")]);

        let err = evaluate_question(&chat, &embedder, &index, "grace period?", &fast_config())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            QuestionError::LlmFailed {
                retries: 2,
                detail: "503 unavailable".into()
            }
        );
        assert_eq!(chat.calls(), 3);
    }

    #[tokio::test]
    async fn malformed_reply_is_not_retried() {
        let (embedder, index) = fixture().await;
        let chat = Scripted::new(vec![Ok("I think it is approved."), Ok(APPROVED)]);

        let err = evaluate_question(&chat, &embedder, &index, "grace period?", &fast_config())
            .await
            .unwrap_err();
        assert!(matches!(err, QuestionError::MalformedReply { .. }));
        assert_eq!(chat.calls(), 1);
    }

    #[tokio::test]
    async fn blank_question_skips_llm() {
        let (embedder, index) = fixture().await;
        let chat = Scripted::new(vec![Ok(APPROVED)]);

        let err = evaluate_question(&chat, &embedder, &index, "   ", &fast_config())
            .await
            .unwrap_err();
        assert_eq!(err, QuestionError::EmptyQuestion);
        assert_eq!(chat.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_call_times_out() {
        let (embedder, index) = fixture().await;
        let config = QueryConfig::builder()
            .api_timeout_secs(5)
            .max_retries(0)
            .build()
            .unwrap();

        let err = evaluate_question(&Hanging, &embedder, &index, "grace period?", &config)
            .await
            .unwrap_err();
        assert_eq!(err, QuestionError::Timeout { secs: 5 });
    }

    #[tokio::test]
    async fn custom_system_prompt_is_used() {
        let (embedder, index) = fixture().await;
        let chat = Scripted::new(vec![Ok(APPROVED)]);
        let config = QueryConfig::builder()
            .system_prompt("Answer as a claims auditor.")
            .build()
            .unwrap();

        evaluate_question(&chat, &embedder, &index, "grace period?", &config)
            .await
            .unwrap();
        assert_eq!(chat.prompts.lock().unwrap()[0].system, "Answer as a claims auditor.");
    }
}
