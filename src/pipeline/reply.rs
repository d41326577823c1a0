//! Reply parsing: turn free-form LLM output into a validated [`DecisionRecord`].
//!
//! Models are asked for a bare JSON object but routinely wrap it in
//! ```` ```json ```` fences, prefix it with "Here is the decision:", or emit
//! invisible Unicode. Extraction is therefore lenient, while validation is
//! strict: anything that does not match the decision contract is a
//! [`QuestionError::MalformedReply`], never a best-effort guess.
//!
//! ## Steps
//!
//! 1. Normalise line endings and strip invisible characters
//! 2. Strip an outer code fence
//! 3. Locate the first balanced `{ … }` object (string-aware)
//! 4. Parse it with `serde_json`
//! 5. Validate each field against the contract

use crate::error::QuestionError;
use crate::output::{Decision, DecisionRecord};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

/// Parse the raw LLM reply into a decision record.
pub fn parse_decision(raw: &str) -> Result<DecisionRecord, QuestionError> {
    let s = normalise_line_endings(raw);
    let s = remove_invisible_chars(&s);
    let s = strip_code_fences(&s);

    let object = extract_json_object(&s).ok_or_else(|| malformed("no JSON object in reply"))?;

    let value: Value =
        serde_json::from_str(object).map_err(|e| malformed(format!("invalid JSON: {e}")))?;
    let map = value
        .as_object()
        .ok_or_else(|| malformed("reply is not a JSON object"))?;

    Ok(DecisionRecord {
        decision: parse_decision_label(map)?,
        justification: parse_justification(map)?,
        amount: parse_amount(map.get("amount"))?,
        clauses_used: parse_clauses(map.get("clauses_used"))?,
    })
}

fn malformed(detail: impl Into<String>) -> QuestionError {
    QuestionError::MalformedReply {
        detail: detail.into(),
    }
}

// ── Text cleanup ─────────────────────────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[A-Za-z]*\n(.*)\n```\s*$").unwrap());

fn strip_code_fences(input: &str) -> String {
    if let Some(caps) = RE_OUTER_FENCES.captures(input.trim()) {
        caps[1].to_string()
    } else {
        input.to_string()
    }
}

/// Return the first balanced JSON object in `input`, ignoring braces that
/// appear inside string literals.
fn extract_json_object(input: &str) -> Option<&str> {
    let start = input.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in input[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&input[start..start + offset + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

// ── Field validation ─────────────────────────────────────────────────────────

fn parse_decision_label(map: &Map<String, Value>) -> Result<Decision, QuestionError> {
    let label = map
        .get("decision")
        .and_then(Value::as_str)
        .ok_or_else(|| malformed("missing string field `decision`"))?;

    match label.trim().to_ascii_lowercase().as_str() {
        "approved" => Ok(Decision::Approved),
        "rejected" => Ok(Decision::Rejected),
        other => Err(malformed(format!(
            "`decision` must be \"approved\" or \"rejected\", got {other:?}"
        ))),
    }
}

fn parse_justification(map: &Map<String, Value>) -> Result<String, QuestionError> {
    let text = map
        .get("justification")
        .and_then(Value::as_str)
        .map(str::trim)
        .ok_or_else(|| malformed("missing string field `justification`"))?;
    if text.is_empty() {
        return Err(malformed("`justification` is empty"));
    }
    Ok(text.to_string())
}

/// One number as models write amounts: optional sign, digit groups with
/// commas, optional decimals.
static RE_AMOUNT: Lazy<Regex> = Lazy::new(|| Regex::new(r"-?\d[\d,]*(?:\.\d+)?").unwrap());

fn parse_amount(value: Option<&Value>) -> Result<Option<f64>, QuestionError> {
    let amount = match value {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => {
            let s = s.trim();
            if s.is_empty() || matches!(s.to_ascii_lowercase().as_str(), "null" | "none" | "n/a")
            {
                return Ok(None);
            }
            amount_from_text(s)?
        }
        Some(other) => {
            return Err(malformed(format!(
                "`amount` must be a number or null, got {other}"
            )))
        }
    };

    match amount {
        Some(a) if a.is_finite() => Ok(Some(a)),
        _ => Err(malformed(format!(
            "`amount` is not a valid number: {}",
            value.map(Value::to_string).unwrap_or_default()
        ))),
    }
}

/// "₹50,000" / "$1,200.50" / "5000 INR": exactly one number, currency
/// marks around it ignored. Several numbers are ambiguous and rejected.
fn amount_from_text(s: &str) -> Result<Option<f64>, QuestionError> {
    let mut numbers = RE_AMOUNT.find_iter(s);
    let (Some(number), None) = (numbers.next(), numbers.next()) else {
        return Err(malformed(format!(
            "`amount` must contain exactly one number, got {s:?}"
        )));
    };
    Ok(number.as_str().replace(',', "").parse::<f64>().ok())
}

fn parse_clauses(value: Option<&Value>) -> Result<Vec<String>, QuestionError> {
    let items = match value {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(items)) => items,
        Some(other) => {
            return Err(malformed(format!(
                "`clauses_used` must be a list of strings, got {other}"
            )))
        }
    };

    let mut clauses = Vec::with_capacity(items.len());
    for item in items {
        let text = item
            .as_str()
            .ok_or_else(|| malformed(format!("`clauses_used` entry is not a string: {item}")))?
            .trim();
        if !text.is_empty() {
            clauses.push(text.to_string());
        }
    }
    Ok(clauses)
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_object() {
        let raw = r#"{"decision": "approved", "justification": "Covered after 24 months.", "amount": 50000, "clauses_used": ["Clause 4.2"]}"#;
        let rec = parse_decision(raw).unwrap();
        assert_eq!(rec.decision, Decision::Approved);
        assert_eq!(rec.amount, Some(50000.0));
        assert_eq!(rec.clauses_used, vec!["Clause 4.2".to_string()]);
    }

    #[test]
    fn strips_json_fences() {
        let raw = "```json\n{\"decision\": \"Rejected\", \"justification\": \"Excluded.\", \"amount\": null, \"clauses_used\": []}\n```";
        let rec = parse_decision(raw).unwrap();
        assert_eq!(rec.decision, Decision::Rejected);
        assert_eq!(rec.amount, None);
    }

    #[test]
    fn tolerates_prose_around_object() {
        let raw = "Sure! Here is the decision:\n{\"decision\": \"approved\", \"justification\": \"See clause {a}.\", \"clauses_used\": [\"x}\"]}\nLet me know.";
        let rec = parse_decision(raw).unwrap();
        assert_eq!(rec.justification, "See clause {a}.");
        assert_eq!(rec.clauses_used, vec!["x}".to_string()]);
        assert_eq!(rec.amount, None);
    }

    #[test]
    fn amount_accepts_formatted_strings() {
        let raw = r#"{"decision": "approved", "justification": "ok", "amount": "₹1,25,000.50"}"#;
        assert_eq!(parse_decision(raw).unwrap().amount, Some(125000.5));
    }

    #[test]
    fn amount_ignores_abbreviation_dots() {
        let raw = r#"{"decision": "approved", "justification": "ok", "amount": "Rs. 5,000"}"#;
        assert_eq!(parse_decision(raw).unwrap().amount, Some(5000.0));

        let raw = r#"{"decision": "approved", "justification": "ok", "amount": "5000 INR"}"#;
        assert_eq!(parse_decision(raw).unwrap().amount, Some(5000.0));

        let raw = r#"{"decision": "approved", "justification": "ok", "amount": "$1,200.50"}"#;
        assert_eq!(parse_decision(raw).unwrap().amount, Some(1200.5));
    }

    #[test]
    fn amount_with_several_numbers_is_malformed() {
        let raw = r#"{"decision": "approved", "justification": "ok", "amount": "2 years, 50000"}"#;
        let err = parse_decision(raw).unwrap_err();
        assert!(
            matches!(&err, QuestionError::MalformedReply { detail } if detail.contains("exactly one number")),
            "got: {err}"
        );
    }

    #[test]
    fn amount_rejects_words() {
        let raw = r#"{"decision": "approved", "justification": "ok", "amount": "a lot"}"#;
        assert!(matches!(
            parse_decision(raw),
            Err(QuestionError::MalformedReply { .. })
        ));
    }

    #[test]
    fn unknown_decision_fails_closed() {
        let raw = r#"{"decision": "maybe", "justification": "unclear"}"#;
        let err = parse_decision(raw).unwrap_err();
        assert!(err.to_string().contains("maybe"), "got: {err}");
    }

    #[test]
    fn model_cannot_claim_error_decision() {
        let raw = r#"{"decision": "error", "justification": "I failed"}"#;
        assert!(parse_decision(raw).is_err());
    }

    #[test]
    fn missing_justification_fails() {
        let raw = r#"{"decision": "approved", "justification": "   "}"#;
        assert!(parse_decision(raw).is_err());
    }

    #[test]
    fn non_string_clause_fails() {
        let raw = r#"{"decision": "approved", "justification": "ok", "clauses_used": [1, 2]}"#;
        assert!(parse_decision(raw).is_err());
    }

    #[test]
    fn plain_text_reply_fails() {
        let err = parse_decision("The claim is approved.").unwrap_err();
        assert_eq!(
            err,
            QuestionError::MalformedReply {
                detail: "no JSON object in reply".into()
            }
        );
    }

    #[test]
    fn truncated_object_fails() {
        assert!(parse_decision("{\"decision\": \"approved\", \"justif").is_err());
    }

    #[test]
    fn test_extract_json_object_nested() {
        let s = "x {\"a\": {\"b\": 1}} y {\"c\": 2}";
        assert_eq!(extract_json_object(s), Some("{\"a\": {\"b\": 1}}"));
    }

    #[test]
    fn test_extract_json_object_escaped_quote() {
        let s = r#"{"a": "he said \"}\" loudly"}"#;
        assert_eq!(extract_json_object(s), Some(s));
    }

    #[test]
    fn test_remove_invisible() {
        assert_eq!(remove_invisible_chars("\u{FEFF}{\u{200B}}"), "{}");
    }
}
