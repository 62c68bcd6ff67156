//! Targeting Intent
//!
//! Structured extraction from a targeting utterance: literal values to
//! match, the identifier columns to match them against, the columns the
//! user wants back, and columns that must be non-empty. Computed fresh per
//! utterance and never stored.

use crate::config::{IntentKeywords, TranslatorLimits};
use crate::query::rewrite::{exact_or_partial, non_empty, partial_match};
use crate::schema::SchemaDescriptor;
use itertools::Itertools;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use strsim::jaro_winkler;

lazy_static! {
    static ref EMAIL: Regex = Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap();
    static ref QUOTED: Regex = Regex::new(r#"'([^']+)'|"([^"]+)""#).unwrap();
    static ref PHONE: Regex = Regex::new(r"\+?\d[\d\s-]{8,}\d").unwrap();
    static ref ID_TOKEN: Regex = Regex::new(r"[A-Za-z0-9_-]{6,}").unwrap();
    static ref WORD: Regex = Regex::new(r"[A-Za-z0-9_]+").unwrap();
    static ref NON_EMPTY_PREFIX: Regex =
        Regex::new(r"(?i)\b(?:non-empty|nonempty|non-null|valid|known)\s+([A-Za-z0-9_]+)").unwrap();
}

const FUZZY_COLUMN_THRESHOLD: f64 = 0.95;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueKind {
    Email,
    Phone,
    Quoted,
    Identifier,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetValue {
    pub text: String,
    pub kind: ValueKind,
}

impl TargetValue {
    fn new(text: impl Into<String>, kind: ValueKind) -> Self {
        Self { text: text.into(), kind }
    }

    /// Emails, digit strings and long tokens get an equality branch too.
    pub fn wants_exact_branch(&self) -> bool {
        self.text.contains('@')
            || self.text.chars().all(|c| c.is_ascii_digit())
            || self.text.chars().count() >= 8
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetingIntent {
    pub utterance: String,
    pub values: Vec<TargetValue>,
    /// Ranked, at most `max_identifier_columns` entries.
    pub identifier_columns: Vec<String>,
    pub requested_columns: Vec<String>,
    pub presence_columns: Vec<String>,
}

impl TargetingIntent {
    pub fn derive(
        utterance: &str,
        schema: &SchemaDescriptor,
        keywords: &IntentKeywords,
        limits: &TranslatorLimits,
    ) -> Self {
        Self {
            utterance: utterance.to_string(),
            values: extract_target_values(utterance),
            identifier_columns: likely_identifier_columns(schema, keywords, limits.max_identifier_columns),
            requested_columns: infer_requested_columns(utterance, schema, keywords, limits.max_requested_columns),
            presence_columns: infer_presence_columns(utterance, schema, keywords),
        }
    }

    pub fn has_filters(&self) -> bool {
        !self.values.is_empty() || !self.presence_columns.is_empty()
    }

    /// WHERE body combining value matches and presence checks with AND.
    pub fn filter_clause(&self, limits: &TranslatorLimits) -> Option<String> {
        let mut parts = Vec::new();
        if let Some(values) = build_value_clause(&self.values, &self.identifier_columns, limits) {
            parts.push(values);
        }
        parts.extend(self.presence_columns.iter().map(|c| non_empty(c)));
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" AND "))
        }
    }
}

/// Emails, quoted strings, phone-like digit runs (normalized to their last
/// ten digits) and identifier-like tokens mixing letters and digits.
/// Order of first appearance is kept; duplicates are dropped.
pub fn extract_target_values(utterance: &str) -> Vec<TargetValue> {
    let mut values = Vec::new();
    let mut remaining = utterance.to_string();

    for m in EMAIL.find_iter(utterance) {
        values.push(TargetValue::new(m.as_str(), ValueKind::Email));
    }
    remaining = EMAIL.replace_all(&remaining, " ").into_owned();

    let quoted: Vec<String> = QUOTED
        .captures_iter(&remaining)
        .filter_map(|c| c.get(1).or_else(|| c.get(2)).map(|m| m.as_str().trim().to_string()))
        .filter(|v| !v.is_empty())
        .collect();
    values.extend(quoted.into_iter().map(|v| TargetValue::new(v, ValueKind::Quoted)));
    remaining = QUOTED.replace_all(&remaining, " ").into_owned();

    for m in PHONE.find_iter(&remaining) {
        let digits: String = m.as_str().chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.len() >= 10 {
            values.push(TargetValue::new(&digits[digits.len() - 10..], ValueKind::Phone));
        }
    }
    remaining = PHONE.replace_all(&remaining, " ").into_owned();

    for m in ID_TOKEN.find_iter(&remaining) {
        let token = m.as_str();
        let has_digit = token.chars().any(|c| c.is_ascii_digit());
        let has_alpha = token.chars().any(|c| c.is_ascii_alphabetic());
        if has_digit && has_alpha {
            values.push(TargetValue::new(token, ValueKind::Identifier));
        }
    }

    values.into_iter().unique_by(|v| v.text.clone()).collect()
}

/// Identifier columns by the configured preference order, then remaining
/// text columns, capped at `max`.
pub fn likely_identifier_columns(schema: &SchemaDescriptor, keywords: &IntentKeywords, max: usize) -> Vec<String> {
    let mut ranked: Vec<String> = Vec::new();
    for preferred in &keywords.identifier_columns {
        for col in &schema.columns {
            if col.name.eq_ignore_ascii_case(preferred) && !ranked.contains(&col.name) {
                ranked.push(col.name.clone());
            }
        }
    }
    for col in schema.text_columns() {
        if !ranked.contains(&col.name) {
            ranked.push(col.name.clone());
        }
    }
    ranked.truncate(max);
    ranked
}

fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

fn fragment_matches(column: &str, fragment: &str) -> bool {
    let column = normalize(column);
    let fragment = normalize(fragment);
    if fragment.len() <= 3 {
        column == fragment
    } else {
        column.contains(&fragment)
    }
}

/// Resolves one utterance word to a schema column: exact or normalized
/// name, then configured synonyms, then a close fuzzy match.
pub fn resolve_column(word: &str, schema: &SchemaDescriptor, keywords: &IntentKeywords) -> Option<String> {
    let word_norm = normalize(word);
    if word_norm.is_empty() {
        return None;
    }
    if let Some(col) = schema.columns.iter().find(|c| normalize(&c.name) == word_norm) {
        return Some(col.name.clone());
    }
    for (keyword, fragments) in &keywords.column_synonyms {
        if word_norm.starts_with(&normalize(keyword)) {
            if let Some(col) = schema
                .columns
                .iter()
                .find(|c| fragments.iter().any(|f| fragment_matches(&c.name, f)))
            {
                return Some(col.name.clone());
            }
        }
    }
    if word_norm.len() >= 5 {
        return schema
            .columns
            .iter()
            .map(|c| (c, jaro_winkler(&word_norm, &normalize(&c.name))))
            .filter(|(_, score)| *score >= FUZZY_COLUMN_THRESHOLD)
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(c, _)| c.name.clone());
    }
    None
}

/// Columns named (directly, by synonym or fuzzily) in the utterance, in
/// schema order, capped at `max`.
pub fn infer_requested_columns(
    utterance: &str,
    schema: &SchemaDescriptor,
    keywords: &IntentKeywords,
    max: usize,
) -> Vec<String> {
    let quoted_spans: Vec<(usize, usize)> = QUOTED.find_iter(utterance).map(|m| (m.start(), m.end())).collect();
    let mentioned: Vec<String> = WORD
        .find_iter(utterance)
        .filter(|m| !quoted_spans.iter().any(|(s, e)| m.start() >= *s && m.end() <= *e))
        .filter_map(|m| resolve_column(m.as_str(), schema, keywords))
        .collect();

    schema
        .columns
        .iter()
        .filter(|c| mentioned.contains(&c.name))
        .map(|c| c.name.clone())
        .take(max)
        .collect()
}

/// Columns the user requires to be filled: "`<col>` present",
/// "`<col>` is not empty", "with a valid `<col>`".
pub fn infer_presence_columns(utterance: &str, schema: &SchemaDescriptor, keywords: &IntentKeywords) -> Vec<String> {
    let mut words: Vec<String> = keywords
        .presence_words
        .iter()
        .map(|w| w.trim().to_lowercase())
        .filter(|w| !w.is_empty())
        .collect();
    words.sort_by_key(|w| std::cmp::Reverse(w.len()));
    let alternation = words
        .iter()
        .map(|w| regex::escape(w).replace(' ', r"\s+"))
        .join("|");

    let mut columns = Vec::new();
    if !alternation.is_empty() {
        if let Ok(re) = Regex::new(&format!(r"(?i)\b([A-Za-z0-9_]+)\s+(?:is\s+)?(?:{})\b", alternation)) {
            for caps in re.captures_iter(utterance) {
                if let Some(col) = caps.get(1).and_then(|m| resolve_column(m.as_str(), schema, keywords)) {
                    columns.push(col);
                }
            }
        }
    }
    for caps in NON_EMPTY_PREFIX.captures_iter(utterance) {
        if let Some(col) = caps.get(1).and_then(|m| resolve_column(m.as_str(), schema, keywords)) {
            columns.push(col);
        }
    }
    columns.into_iter().unique().collect()
}

fn is_email_column(name: &str) -> bool {
    name.to_lowercase().contains("mail")
}

fn is_phone_column(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.contains("phone") || lower.contains("mobile") || lower.contains("contact")
}

/// Columns a value is matched against, routed by the value's kind; falls
/// back to every identifier column when the routed set is empty.
fn columns_for_value<'a>(value: &TargetValue, identifier_columns: &'a [String]) -> Vec<&'a String> {
    let routed: Vec<&String> = match value.kind {
        ValueKind::Email => identifier_columns.iter().filter(|c| is_email_column(c)).collect(),
        ValueKind::Phone => identifier_columns.iter().filter(|c| is_phone_column(c)).collect(),
        ValueKind::Quoted | ValueKind::Identifier => identifier_columns
            .iter()
            .filter(|c| !is_email_column(c) && !is_phone_column(c))
            .collect(),
    };
    if routed.is_empty() {
        identifier_columns.iter().collect()
    } else {
        routed
    }
}

/// Per value, a disjunction over its columns; values joined with AND.
pub fn build_value_clause(
    values: &[TargetValue],
    identifier_columns: &[String],
    limits: &TranslatorLimits,
) -> Option<String> {
    if identifier_columns.is_empty() {
        return None;
    }
    let groups: Vec<String> = values
        .iter()
        .take(limits.max_filter_values)
        .map(|value| {
            let disjuncts = columns_for_value(value, identifier_columns)
                .into_iter()
                .take(limits.max_filter_columns)
                .map(|col| {
                    if value.wants_exact_branch() {
                        exact_or_partial(col, &value.text)
                    } else {
                        partial_match(col, &value.text)
                    }
                })
                .join(" OR ");
            format!("({})", disjuncts)
        })
        .collect();
    if groups.is_empty() {
        None
    } else {
        Some(groups.join(" AND "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnDef;

    fn schema() -> SchemaDescriptor {
        SchemaDescriptor::new(
            "customers_tbl",
            vec![
                ColumnDef::new("CustomerID", "TEXT"),
                ColumnDef::new("Name", "TEXT"),
                ColumnDef::new("Email", "TEXT"),
                ColumnDef::new("PhoneNo", "TEXT"),
                ColumnDef::new("Age", "INTEGER"),
                ColumnDef::new("TenureMonths", "INTEGER"),
            ],
        )
    }

    #[test]
    fn test_extracts_each_value_kind() {
        let values = extract_target_values(
            "contact riya.k@example.com, 'Arjun Mehta', +91 98765-43210 and account CUST0042 customers",
        );
        let kinds: Vec<(String, ValueKind)> = values.iter().map(|v| (v.text.clone(), v.kind)).collect();
        assert_eq!(
            kinds,
            vec![
                ("riya.k@example.com".to_string(), ValueKind::Email),
                ("Arjun Mehta".to_string(), ValueKind::Quoted),
                ("9876543210".to_string(), ValueKind::Phone),
                ("CUST0042".to_string(), ValueKind::Identifier),
            ]
        );
    }

    #[test]
    fn test_identifier_columns_follow_preference() {
        let ranked = likely_identifier_columns(&schema(), &IntentKeywords::default(), 8);
        assert_eq!(ranked, vec!["Email", "PhoneNo", "CustomerID", "Name"]);
        let capped = likely_identifier_columns(&schema(), &IntentKeywords::default(), 2);
        assert_eq!(capped.len(), 2);
    }

    #[test]
    fn test_requested_columns_use_synonyms() {
        let cols = infer_requested_columns(
            "names, phone and tenure of customers in 'Email' campaign",
            &schema(),
            &IntentKeywords::default(),
            6,
        );
        assert_eq!(cols, vec!["Name", "PhoneNo", "TenureMonths"]);
    }

    #[test]
    fn test_presence_columns() {
        let keywords = IntentKeywords::default();
        assert_eq!(
            infer_presence_columns("customers with PhoneNo present", &schema(), &keywords),
            vec!["PhoneNo"]
        );
        assert_eq!(
            infer_presence_columns("everyone whose email is not empty", &schema(), &keywords),
            vec!["Email"]
        );
        assert_eq!(
            infer_presence_columns("customers with a valid phone", &schema(), &keywords),
            vec!["PhoneNo"]
        );
    }

    #[test]
    fn test_value_clause_routes_by_kind() {
        let limits = TranslatorLimits::default();
        let ids = likely_identifier_columns(&schema(), &IntentKeywords::default(), 8);
        let values = vec![
            TargetValue::new("riya@example.com", ValueKind::Email),
            TargetValue::new("Riya", ValueKind::Quoted),
        ];
        let clause = build_value_clause(&values, &ids, &limits).unwrap();
        assert_eq!(
            clause,
            "(`Email` = 'riya@example.com' OR `Email` LIKE '%riya@example.com%') AND (`CustomerID` LIKE '%Riya%' OR `Name` LIKE '%Riya%')"
        );
    }
}
