//! Query Profile - structural facts about a candidate query
//!
//! Parsed with sqlparser when possible; a keyword heuristic stands in when
//! the candidate uses syntax the parser does not accept.

use serde::{Deserialize, Serialize};
use sqlparser::ast::{Query, SelectItem, SetExpr, Statement, TableFactor};
use sqlparser::dialect::SQLiteDialect;
use sqlparser::parser::Parser;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryProfile {
    /// Whether the AST parser accepted the query.
    pub parsed: bool,
    pub statement_count: usize,
    pub is_read_only: bool,
    /// Tables referenced in FROM/JOIN clauses, including subqueries.
    pub tables: Vec<String>,
    /// Top-level WHERE present.
    pub has_filter: bool,
    /// Top-level projection is an unqualified `*`.
    pub has_wildcard: bool,
    pub is_distinct: bool,
    pub has_limit: bool,
}

impl QueryProfile {
    pub fn from_sql(sql: &str) -> Self {
        let dialect = SQLiteDialect {};
        match Parser::parse_sql(&dialect, sql) {
            Ok(ast) => {
                let mut profile = Self {
                    parsed: true,
                    statement_count: ast.len(),
                    is_read_only: true,
                    ..Self::default()
                };
                profile.analyze_ast(&ast);
                profile
            }
            Err(e) => {
                tracing::debug!("SQL parsing failed: {}, using heuristic profile", e);
                Self::from_sql_heuristic(sql)
            }
        }
    }

    fn from_sql_heuristic(sql: &str) -> Self {
        let upper = sql.to_uppercase();
        let words: Vec<&str> = upper
            .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .filter(|w| !w.is_empty())
            .collect();
        let has_word = |w: &str| words.iter().any(|x| *x == w);

        let mut tables = Vec::new();
        for (idx, word) in words.iter().enumerate() {
            if (*word == "FROM" || *word == "JOIN") && idx + 1 < words.len() && words[idx + 1] != "SELECT" {
                tables.push(words[idx + 1].to_string());
            }
        }

        let head = upper.trim_start();
        Self {
            parsed: false,
            statement_count: sql.split(';').filter(|s| !s.trim().is_empty()).count(),
            is_read_only: head.starts_with("SELECT")
                && !["INSERT", "UPDATE", "DELETE", "CREATE", "DROP", "ALTER", "ATTACH", "PRAGMA"]
                    .iter()
                    .any(|w| has_word(w)),
            tables,
            has_filter: has_word("WHERE"),
            has_wildcard: head
                .strip_prefix("SELECT")
                .map(|rest| {
                    let rest = rest.trim_start();
                    let rest = rest.strip_prefix("DISTINCT").unwrap_or(rest).trim_start();
                    rest.starts_with('*')
                })
                .unwrap_or(false),
            is_distinct: head
                .strip_prefix("SELECT")
                .map(|rest| rest.trim_start().starts_with("DISTINCT"))
                .unwrap_or(false),
            has_limit: has_word("LIMIT"),
        }
    }

    fn analyze_ast(&mut self, ast: &[Statement]) {
        for (idx, stmt) in ast.iter().enumerate() {
            match stmt {
                Statement::Query(query) => self.analyze_query(query, idx == 0),
                _ => self.is_read_only = false,
            }
        }
    }

    fn analyze_query(&mut self, query: &Query, top_level: bool) {
        if top_level {
            self.has_limit = query.limit.is_some();
        }
        self.analyze_set_expr(&query.body, top_level);
    }

    fn analyze_set_expr(&mut self, body: &SetExpr, top_level: bool) {
        match body {
            SetExpr::Select(select) => {
                if top_level {
                    self.has_filter = select.selection.is_some();
                    self.is_distinct = select.distinct.is_some();
                    self.has_wildcard = select
                        .projection
                        .iter()
                        .any(|item| matches!(item, SelectItem::Wildcard(_)));
                }
                for table_with_joins in &select.from {
                    self.extract_table_from_table_factor(&table_with_joins.relation);
                    for join in &table_with_joins.joins {
                        self.extract_table_from_table_factor(&join.relation);
                    }
                }
            }
            SetExpr::Query(inner) => self.analyze_query(inner, top_level),
            SetExpr::SetOperation { left, right, .. } => {
                self.analyze_set_expr(left, false);
                self.analyze_set_expr(right, false);
            }
            _ => {}
        }
    }

    fn extract_table_from_table_factor(&mut self, factor: &TableFactor) {
        match factor {
            TableFactor::Table { name, .. } => {
                if let Some(ident) = name.0.last() {
                    self.tables.push(ident.value.clone());
                }
            }
            TableFactor::Derived { subquery, .. } => self.analyze_query(subquery, false),
            _ => {}
        }
    }

    pub fn references_table(&self, table: &str) -> bool {
        self.tables.iter().any(|t| t.eq_ignore_ascii_case(table))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_of_simple_select() {
        let profile = QueryProfile::from_sql("SELECT DISTINCT * FROM `customers_tbl` WHERE `Age` > 30 LIMIT 200");
        assert!(profile.parsed);
        assert!(profile.is_read_only);
        assert!(profile.has_filter);
        assert!(profile.has_wildcard);
        assert!(profile.is_distinct);
        assert!(profile.has_limit);
        assert!(profile.references_table("customers_tbl"));
    }

    #[test]
    fn test_profile_flags_mutation_and_multiple_statements() {
        let profile = QueryProfile::from_sql("SELECT 1; DELETE FROM t");
        assert_eq!(profile.statement_count, 2);
        assert!(!profile.is_read_only);
    }

    #[test]
    fn test_filter_in_subquery_is_not_top_level() {
        let profile = QueryProfile::from_sql("SELECT Name FROM (SELECT * FROM t WHERE Age > 3) AS s");
        assert!(!profile.has_filter);
        assert!(profile.references_table("t"));
    }
}
