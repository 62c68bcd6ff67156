//! Safety Predicate for candidate queries
//!
//! A candidate is executable only if it is a single read statement that
//! starts with SELECT and names no mutating or schema-altering verb as a
//! whole word outside its string literals.

use crate::error::{AssistantError, Result};
use crate::query::profile::QueryProfile;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref MUTATING_VERB: Regex = Regex::new(
        r"(?i)\b(insert|update|delete|alter|drop|attach|detach|pragma|create|vacuum|reindex|truncate|grant|revoke|replace\s+into)\b"
    )
    .unwrap();
    static ref LEADING_SELECT: Regex = Regex::new(r"(?i)^\s*select\b").unwrap();
    static ref FORBIDDEN_WORD: Regex = Regex::new(
        r"(?i)^(insert|update|delete|alter|drop|attach|detach|pragma|create|vacuum|reindex|truncate|grant|revoke|replace)$"
    )
    .unwrap();
}

/// Whether a single word is on the deny-list. Fallback builders skip such
/// words rather than emit them.
pub fn is_forbidden_word(word: &str) -> bool {
    FORBIDDEN_WORD.is_match(word)
}

/// Blanks the contents of single-quoted literals (`''` is an escaped quote)
/// so that values searched for are not read as statement text.
fn mask_literals(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();
    let mut in_literal = false;
    while let Some(ch) = chars.next() {
        if ch == '\'' {
            if in_literal && chars.peek() == Some(&'\'') {
                chars.next();
                out.push_str("  ");
                continue;
            }
            in_literal = !in_literal;
            out.push(ch);
        } else if in_literal {
            out.push(' ');
        } else {
            out.push(ch);
        }
    }
    out
}

pub fn is_safe_select(sql: &str) -> bool {
    safety_violation(sql).is_none()
}

/// Returns the reason a candidate fails the predicate, if it does.
pub fn safety_violation(sql: &str) -> Option<String> {
    if sql.trim().is_empty() {
        return Some("empty query".to_string());
    }
    if !LEADING_SELECT.is_match(sql) {
        return Some("query does not start with SELECT".to_string());
    }
    let statement = mask_literals(sql);
    if let Some(m) = MUTATING_VERB.find(&statement) {
        return Some(format!("query contains forbidden verb '{}'", m.as_str().to_uppercase()));
    }
    if statement.contains(';') {
        return Some("query contains more than one statement".to_string());
    }
    None
}

/// Full candidate check: safety predicate, AST read-only check and the
/// requirement that the expected table is referenced.
pub fn check_candidate(sql: &str, table: &str) -> Result<QueryProfile> {
    if let Some(reason) = safety_violation(sql) {
        return Err(AssistantError::UnsafeCandidate(reason));
    }
    let profile = QueryProfile::from_sql(sql);
    if profile.parsed && (!profile.is_read_only || profile.statement_count != 1) {
        return Err(AssistantError::UnsafeCandidate("query is not a single read statement".to_string()));
    }
    if !references_table(sql, &profile, table) {
        return Err(AssistantError::UnsafeCandidate(format!("query does not reference table {}", table)));
    }
    Ok(profile)
}

fn references_table(sql: &str, profile: &QueryProfile, table: &str) -> bool {
    if profile.references_table(table) {
        return true;
    }
    if profile.parsed {
        return false;
    }
    Regex::new(&format!(r"(?i)\b{}\b", regex::escape(table)))
        .map(|re| re.is_match(sql))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_mutating_verbs_as_whole_words() {
        for sql in [
            "DROP TABLE t",
            "SELECT * FROM t; DROP TABLE t",
            "SELECT * FROM t\nATTACH DATABASE 'x.db' AS y",
            "SELECT * FROM t WHERE x IN (SELECT 1) AND 'a' = 'a' OR attach",
            "  insert into t values (1)",
        ] {
            assert!(!is_safe_select(sql), "accepted: {}", sql);
        }
    }

    #[test]
    fn test_accepts_columns_that_contain_verbs() {
        assert!(is_safe_select("SELECT `last_update`, `created_at` FROM t LIMIT 200"));
        assert!(is_safe_select("select DISTINCT Name from t"));
    }

    #[test]
    fn test_verbs_inside_string_literals_are_values() {
        assert!(is_safe_select("SELECT * FROM t WHERE `Name` LIKE '%update%' LIMIT 200"));
        assert!(is_safe_select("SELECT * FROM t WHERE `Name` = 'Drop Shipping' OR `Note` = 'a;b'"));
        assert!(is_safe_select("SELECT * FROM t WHERE `Name` = 'O''Neil delete'"));
        // an escaped quote does not end the literal early
        assert!(!is_safe_select("SELECT * FROM t WHERE `Name` = 'x''' OR drop"));
        assert!(!is_safe_select("SELECT * FROM t WHERE `Name` = 'x'; DELETE FROM t"));
    }

    #[test]
    fn test_forbidden_words() {
        assert!(is_forbidden_word("Update"));
        assert!(is_forbidden_word("DROP"));
        assert!(!is_forbidden_word("updated"));
        assert!(!is_forbidden_word("Mumbai"));
    }

    #[test]
    fn test_check_candidate_requires_table() {
        assert!(check_candidate("SELECT * FROM other LIMIT 5", "customers_tbl").is_err());
        assert!(check_candidate("SELECT * FROM `customers_tbl` LIMIT 5", "customers_tbl").is_ok());
        match check_candidate("UPDATE customers_tbl SET x = 1", "customers_tbl") {
            Err(AssistantError::UnsafeCandidate(reason)) => assert!(reason.contains("SELECT")),
            other => panic!("unexpected: {:?}", other.map(|p| p.tables)),
        }
    }
}
