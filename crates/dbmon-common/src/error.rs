use serde::{Deserialize, Serialize};

/// Error codes surfaced to the control plane for rule intake failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParseErrorCode {
    #[serde(rename = "RULE_AMBIGUOUS")]
    RuleAmbiguous,
    #[serde(rename = "RULE_SCHEMA_INVALID")]
    RuleSchemaInvalid,
}

impl std::fmt::Display for ParseErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseErrorCode::RuleAmbiguous => write!(f, "RULE_AMBIGUOUS"),
            ParseErrorCode::RuleSchemaInvalid => write!(f, "RULE_SCHEMA_INVALID"),
        }
    }
}

/// One field-level problem inside a [`ParseError`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub field: String,
    pub problem: String,
    pub hint: String,
}

impl ErrorDetail {
    pub fn new(field: impl Into<String>, problem: impl Into<String>, hint: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            problem: problem.into(),
            hint: hint.into(),
        }
    }
}

/// Prompt parsing or static validation failure, with accumulated
/// field-level details.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct ParseError {
    pub code: ParseErrorCode,
    pub message: String,
    pub details: Vec<ErrorDetail>,
}

impl ParseError {
    pub fn ambiguous(message: impl Into<String>, details: Vec<ErrorDetail>) -> Self {
        Self {
            code: ParseErrorCode::RuleAmbiguous,
            message: message.into(),
            details,
        }
    }

    pub fn schema_invalid(message: impl Into<String>, details: Vec<ErrorDetail>) -> Self {
        Self {
            code: ParseErrorCode::RuleSchemaInvalid,
            message: message.into(),
            details,
        }
    }
}
