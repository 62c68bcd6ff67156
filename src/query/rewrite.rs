//! Textual rewrites applied to validated candidates, and the clause
//! builders shared by the fallback paths.

use crate::query::profile::QueryProfile;
use crate::schema::quote_ident;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref SELECT_HEAD: Regex = Regex::new(r"(?i)^\s*select\s+").unwrap();
    static ref SELECT_DISTINCT_HEAD: Regex = Regex::new(r"(?i)^\s*select\s+distinct\b").unwrap();
    static ref SELECT_STAR_FROM: Regex = Regex::new(r"(?i)^\s*select\s+(distinct\s+)?\*\s+from\s+").unwrap();
}

/// Injects DISTINCT after the leading SELECT unless already present.
pub fn ensure_distinct(sql: &str) -> String {
    if SELECT_DISTINCT_HEAD.is_match(sql) {
        return sql.trim().to_string();
    }
    SELECT_HEAD.replace(sql.trim(), "SELECT DISTINCT ").into_owned()
}

/// Replaces a leading `SELECT *` with an explicit projection.
pub fn replace_select_star(sql: &str, columns: &[String]) -> String {
    if columns.is_empty() || !SELECT_STAR_FROM.is_match(sql) {
        return sql.trim().to_string();
    }
    let projection = columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", ");
    SELECT_STAR_FROM
        .replace(sql.trim(), |caps: &regex::Captures| {
            let distinct = if caps.get(1).is_some() { "DISTINCT " } else { "" };
            format!("SELECT {}{} FROM ", distinct, projection)
        })
        .into_owned()
}

/// Appends a row cap when the outer query has none. A LIMIT inside a
/// subquery does not count.
pub fn ensure_limit(sql: &str, limit: usize) -> String {
    if QueryProfile::from_sql(sql).has_limit {
        sql.trim().to_string()
    } else {
        format!("{} LIMIT {}", sql.trim(), limit)
    }
}

/// Escapes a value for use inside a single-quoted SQL literal.
pub fn escape_literal(value: &str) -> String {
    value.replace('\'', "''")
}

pub fn partial_match(column: &str, value: &str) -> String {
    format!("{} LIKE '%{}%'", quote_ident(column), escape_literal(value))
}

pub fn exact_or_partial(column: &str, value: &str) -> String {
    let escaped = escape_literal(value);
    format!(
        "{col} = '{v}' OR {col} LIKE '%{v}%'",
        col = quote_ident(column),
        v = escaped
    )
}

pub fn non_empty(column: &str) -> String {
    let col = quote_ident(column);
    format!("({col} IS NOT NULL AND TRIM({col}) <> '')", col = col)
}

/// `SELECT DISTINCT <projection> FROM <table> WHERE <clause> LIMIT <n>`.
pub fn select_distinct_where(table: &str, projection: &[String], clause: &str, limit: usize) -> String {
    let cols = if projection.is_empty() {
        "*".to_string()
    } else {
        projection.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", ")
    };
    format!(
        "SELECT DISTINCT {} FROM {} WHERE {} LIMIT {}",
        cols,
        quote_ident(table),
        clause,
        limit
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_distinct() {
        assert_eq!(ensure_distinct("select Name from t"), "SELECT DISTINCT Name from t");
        assert_eq!(ensure_distinct("SELECT DISTINCT Name FROM t"), "SELECT DISTINCT Name FROM t");
    }

    #[test]
    fn test_replace_select_star_keeps_distinct() {
        let cols = vec!["Name".to_string(), "PhoneNo".to_string()];
        assert_eq!(
            replace_select_star("SELECT DISTINCT * FROM `t` LIMIT 5", &cols),
            "SELECT DISTINCT `Name`, `PhoneNo` FROM `t` LIMIT 5"
        );
        assert_eq!(replace_select_star("SELECT t.* FROM t", &cols), "SELECT t.* FROM t");
    }

    #[test]
    fn test_ensure_limit_and_literals() {
        assert_eq!(ensure_limit("SELECT * FROM t", 200), "SELECT * FROM t LIMIT 200");
        assert_eq!(ensure_limit("SELECT * FROM t LIMIT 10", 200), "SELECT * FROM t LIMIT 10");
        assert_eq!(partial_match("Name", "O'Neil"), "`Name` LIKE '%O''Neil%'");
    }

    #[test]
    fn test_ensure_limit_ignores_subquery_limit() {
        let sql = "SELECT Name FROM t WHERE Name IN (SELECT Name FROM t ORDER BY Age DESC LIMIT 5)";
        assert_eq!(ensure_limit(sql, 200), format!("{} LIMIT 200", sql));
    }
}
