//! Natural-language to SQL translation
//!
//! `translator` drives the model; `heuristic` and `predictive` provide
//! the model-free tiers; `safety`, `profile`, `sanitize` and `rewrite`
//! validate and repair candidates on the way out.

pub mod heuristic;
pub mod predictive;
pub mod profile;
pub mod rewrite;
pub mod safety;
pub mod sanitize;
pub mod translator;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use heuristic::HeuristicQueryBuilder;
pub use predictive::PredictiveTargeting;
pub use profile::QueryProfile;
pub use safety::{check_candidate, is_safe_select};
pub use translator::QueryTranslator;

/// Which tier produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryOrigin {
    Model { attempt: usize },
    Predictive,
    PredictiveFallback,
    TargetedFallback,
    HeuristicFallback,
}

impl QueryOrigin {
    pub fn is_model(&self) -> bool {
        matches!(self, QueryOrigin::Model { .. } | QueryOrigin::Predictive)
    }
}

impl fmt::Display for QueryOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryOrigin::Model { attempt } => write!(f, "model (attempt {})", attempt),
            QueryOrigin::Predictive => write!(f, "predictive model"),
            QueryOrigin::PredictiveFallback => write!(f, "predictive fallback"),
            QueryOrigin::TargetedFallback => write!(f, "targeted fallback"),
            QueryOrigin::HeuristicFallback => write!(f, "heuristic fallback"),
        }
    }
}

/// A single SQL statement produced by the translation pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateQuery {
    pub sql: String,
    pub origin: QueryOrigin,
}

impl CandidateQuery {
    pub fn new(sql: impl Into<String>, origin: QueryOrigin) -> Self {
        Self { sql: sql.into(), origin }
    }
}
