//! Heuristic Query Builder
//!
//! Model-free construction of safe fallback queries. Deterministic: the
//! same utterance and schema always produce the same text.

use crate::config::TranslatorLimits;
use crate::query::rewrite::{partial_match, select_distinct_where};
use crate::query::safety::is_forbidden_word;
use crate::schema::{quote_ident, SchemaDescriptor};
use crate::targeting::TargetingIntent;
use itertools::Itertools;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref TOKEN: Regex = Regex::new(r"[A-Za-z0-9_]+").unwrap();
}

#[derive(Debug, Clone, Default)]
pub struct HeuristicQueryBuilder {
    limits: TranslatorLimits,
}

impl HeuristicQueryBuilder {
    pub fn new(limits: TranslatorLimits) -> Self {
        Self { limits }
    }

    /// Token-LIKE fallback: each token of more than two characters must
    /// appear in at least one text column. Deny-listed words are not used
    /// as tokens. Without tokens or text columns this is an unfiltered
    /// bounded scan.
    pub fn build_fallback(&self, utterance: &str, table: &str, schema: &SchemaDescriptor) -> String {
        let tokens: Vec<&str> = TOKEN
            .find_iter(utterance)
            .map(|m| m.as_str())
            .filter(|t| t.chars().count() > 2 && !is_forbidden_word(t))
            .unique_by(|t| t.to_lowercase())
            .take(self.limits.max_fallback_tokens)
            .collect();
        let text_columns: Vec<&str> = schema
            .text_columns()
            .into_iter()
            .take(self.limits.max_filter_columns)
            .map(|c| c.name.as_str())
            .collect();

        if tokens.is_empty() || text_columns.is_empty() {
            return format!("SELECT * FROM {} LIMIT {}", quote_ident(table), self.limits.fallback_scan_limit);
        }

        let clause = tokens
            .iter()
            .map(|token| format!("({})", text_columns.iter().map(|c| partial_match(c, token)).join(" OR ")))
            .join(" AND ");
        format!(
            "SELECT * FROM {} WHERE {} LIMIT {}",
            quote_ident(table),
            clause,
            self.limits.row_limit
        )
    }

    /// Filter built from the extracted targeting values and presence
    /// requirements, projecting the requested columns (or the top three
    /// identifier columns). `None` when the intent carries no filters.
    pub fn build_targeted(&self, intent: &TargetingIntent, table: &str) -> Option<String> {
        if !intent.has_filters() {
            return None;
        }
        let clause = intent.filter_clause(&self.limits)?;
        let projection: Vec<String> = if !intent.requested_columns.is_empty() {
            intent.requested_columns.clone()
        } else {
            intent.identifier_columns.iter().take(3).cloned().collect()
        };
        Some(select_distinct_where(table, &projection, &clause, self.limits.row_limit))
    }
}
