//! Prompts for retrieval-grounded decisions.
//!
//! Every prompt lives here so the evaluator only deals with retries and
//! parsing. Callers can override the system prompt via
//! [`crate::config::QueryConfig::system_prompt`]; the reply contract below
//! must then be restated by the override, because
//! [`crate::pipeline::reply::parse_decision`] enforces it regardless.

use crate::pipeline::index::ScoredChunk;

/// Default system prompt for answering a question from retrieved clauses.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are a meticulous document analyst. You answer a user's question about a document (for example an insurance policy, contract or handbook) using ONLY the numbered clauses provided as context.

Follow these rules precisely:

1. GROUNDING
   - Base the decision strictly on the provided clauses
   - If the clauses do not support the request, the decision is "rejected"
   - Never invent policy terms, limits or amounts

2. DECISION
   - "approved" when the clauses allow / cover / permit what the question asks
   - "rejected" when they exclude it, or when the context is insufficient

3. AMOUNT
   - A single number (no currency symbol, no thousands separators) when the
     clauses state a relevant sum, limit or payout; otherwise null

4. CLAUSES
   - Quote the supporting clause text verbatim in "clauses_used"
   - Use an empty list only when no clause is relevant

5. OUTPUT FORMAT
   - Respond with ONE JSON object and nothing else
   - Do NOT wrap it in ``` fences, do NOT add commentary
   - Exactly these keys:
     {"decision": "approved" | "rejected", "justification": "<one or two sentences>", "amount": <number or null>, "clauses_used": ["<clause text>", ...]}"#;

/// Build the user message: the question followed by the retrieved context.
///
/// Clauses are numbered in retrieval order (most similar first) and tagged
/// with their source page so the model can cite them.
pub fn build_user_prompt(question: &str, context: &[ScoredChunk]) -> String {
    let mut prompt = String::with_capacity(
        question.len() + context.iter().map(|c| c.chunk.text.len() + 32).sum::<usize>() + 64,
    );
    prompt.push_str("Question:\n");
    prompt.push_str(question.trim());
    prompt.push_str("\n\nContext clauses:\n");

    if context.is_empty() {
        prompt.push_str("(no relevant clauses were found in the document)\n");
    }

    for (i, hit) in context.iter().enumerate() {
        prompt.push_str(&format!(
            "\n[{}] (page {})\n\"\"\"{}\"\"\"\n",
            i + 1,
            hit.chunk.page,
            hit.chunk.text.trim()
        ));
    }

    prompt.push_str("\nRespond with the JSON decision object only.");
    prompt
}
