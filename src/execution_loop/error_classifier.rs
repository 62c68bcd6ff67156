//! Error Classifier
//!
//! Classifies store and validation failures so the retry loop can turn
//! them into repair hints for the next translation.

use crate::error::AssistantError;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SqlErrorClass {
    ColumnNotFound,
    TableNotFound,
    AmbiguousColumn,
    SyntaxError,
    InvalidAggregation,
    TypeMismatch,
    UnsafeCandidate,
    ExecutionError(String),
}

impl fmt::Display for SqlErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlErrorClass::ColumnNotFound => write!(f, "ColumnNotFound"),
            SqlErrorClass::TableNotFound => write!(f, "TableNotFound"),
            SqlErrorClass::AmbiguousColumn => write!(f, "AmbiguousColumn"),
            SqlErrorClass::SyntaxError => write!(f, "SyntaxError"),
            SqlErrorClass::InvalidAggregation => write!(f, "InvalidAggregation"),
            SqlErrorClass::TypeMismatch => write!(f, "TypeMismatch"),
            SqlErrorClass::UnsafeCandidate => write!(f, "UnsafeCandidate"),
            SqlErrorClass::ExecutionError(msg) => write!(f, "ExecutionError({})", msg),
        }
    }
}

pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Classify an error by its message; SQLite phrasing first.
    pub fn classify(&self, error: &AssistantError) -> SqlErrorClass {
        if matches!(error, AssistantError::UnsafeCandidate(_)) {
            return SqlErrorClass::UnsafeCandidate;
        }

        let error_msg = error.to_string().to_lowercase();

        if error_msg.contains("no such column") || (error_msg.contains("column") && error_msg.contains("not found")) {
            return SqlErrorClass::ColumnNotFound;
        }

        if error_msg.contains("no such table") || (error_msg.contains("table") && error_msg.contains("not found")) {
            return SqlErrorClass::TableNotFound;
        }

        if error_msg.contains("ambiguous column") {
            return SqlErrorClass::AmbiguousColumn;
        }

        if error_msg.contains("syntax error") || error_msg.contains("incomplete input") || error_msg.contains("unrecognized token") {
            return SqlErrorClass::SyntaxError;
        }

        if error_msg.contains("aggregate") || error_msg.contains("group by") {
            return SqlErrorClass::InvalidAggregation;
        }

        if error_msg.contains("datatype mismatch") || error_msg.contains("type mismatch") {
            return SqlErrorClass::TypeMismatch;
        }

        SqlErrorClass::ExecutionError(error.to_string())
    }

    /// Store error text plus a class-specific instruction, as fed back to
    /// the translator.
    pub fn repair_hint(&self, error: &AssistantError, table: &str) -> String {
        let class = self.classify(error);
        let advice = match class {
            SqlErrorClass::ColumnNotFound => {
                "Use only columns from the table definition, spelled exactly as defined.".to_string()
            }
            SqlErrorClass::TableNotFound => format!("Query the table `{}` using exactly that name.", table),
            SqlErrorClass::AmbiguousColumn => "Reference each column once, without joins or aliases.".to_string(),
            SqlErrorClass::SyntaxError => {
                "Return one complete SQLite SELECT statement with no commentary.".to_string()
            }
            SqlErrorClass::InvalidAggregation => {
                "Use aggregate functions only with a matching GROUP BY, or avoid them.".to_string()
            }
            SqlErrorClass::TypeMismatch => {
                "Compare text columns with quoted strings and numeric columns with numbers.".to_string()
            }
            SqlErrorClass::UnsafeCandidate => "Only a single read-only SELECT statement is allowed.".to_string(),
            SqlErrorClass::ExecutionError(_) => return error.to_string(),
        };
        format!("{}\nHint: {}", error, advice)
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}
