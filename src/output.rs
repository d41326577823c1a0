//! Request and response types shared by the library, the server and the CLI.
//!
//! The JSON shapes here are the wire contract of
//! `POST /api/v1/hackrx/run`; field names must not change.

use crate::error::QuestionError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Incoming query: one document URL plus an ordered list of questions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    /// HTTP/HTTPS URL of the PDF to answer questions about.
    pub documents: String,
    /// Questions, answered in this order.
    pub questions: Vec<String>,
}

/// One answer per input question, in input order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub answers: Vec<DecisionRecord>,
}

/// Outcome label of a decision.
///
/// `Error` is reserved for records synthesised from a [`QuestionError`];
/// the reply parser never accepts it from the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approved,
    Rejected,
    Error,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Approved => "approved",
            Decision::Rejected => "rejected",
            Decision::Error => "error",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured decision for a single question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub decision: Decision,
    pub justification: String,
    /// Monetary amount the decision refers to, if any.
    pub amount: Option<f64>,
    /// Verbatim document passages supporting the decision.
    pub clauses_used: Vec<String>,
}

impl DecisionRecord {
    /// Build the error-shaped record that stands in for a failed question.
    pub fn from_error(err: &QuestionError) -> Self {
        Self {
            decision: Decision::Error,
            justification: err.to_string(),
            amount: None,
            clauses_used: Vec::new(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.decision == Decision::Error
    }
}

/// A contiguous span of document text used as a retrieval unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Position in document order (0-based, global across pages).
    pub index: usize,
    /// 1-based PDF page the text came from.
    pub page: usize,
    pub text: String,
}
