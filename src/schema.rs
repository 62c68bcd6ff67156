//! Schema Descriptor and Introspector
//!
//! A table's structure is read from the store catalog as DDL text and
//! parsed into ordered (name, declared type) pairs. Parsing tolerates the
//! loose formatting produced by hand-written or model-written DDL.

use crate::db::SqliteStore;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnKind {
    Text,
    Numeric,
    Other,
}

impl ColumnKind {
    pub fn from_declared(declared: &str) -> Self {
        let upper = declared.to_uppercase();
        if upper.contains("CHAR") || upper.contains("TEXT") || upper.contains("CLOB") || upper == "STRING" {
            ColumnKind::Text
        } else if upper.contains("INT")
            || upper.contains("REAL")
            || upper.contains("NUM")
            || upper.contains("FLOA")
            || upper.contains("DOUB")
            || upper.contains("DEC")
        {
            ColumnKind::Numeric
        } else {
            ColumnKind::Other
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub declared_type: String,
    pub kind: ColumnKind,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, declared_type: impl Into<String>) -> Self {
        let declared_type = declared_type.into().to_uppercase();
        Self {
            name: name.into(),
            kind: ColumnKind::from_declared(&declared_type),
            declared_type,
        }
    }

    pub fn is_text(&self) -> bool {
        self.kind == ColumnKind::Text
    }

    pub fn is_numeric(&self) -> bool {
        self.kind == ColumnKind::Numeric
    }
}

/// Ordered column list of one table, plus the DDL it was parsed from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    pub table: String,
    pub columns: Vec<ColumnDef>,
    pub ddl: String,
}

const CONSTRAINT_PREFIXES: &[&str] = &["PRIMARY", "FOREIGN", "UNIQUE", "CHECK", "CONSTRAINT"];

impl SchemaDescriptor {
    pub fn new(table: impl Into<String>, columns: Vec<ColumnDef>) -> Self {
        let table = table.into();
        let ddl = render_ddl(&table, &columns);
        Self { table, columns, ddl }
    }

    /// Parses `CREATE TABLE` text. Column definitions are taken from the
    /// body between the first `(` and the last `)`.
    pub fn from_ddl(table: impl Into<String>, ddl: &str) -> Self {
        let columns = parse_columns_from_ddl(ddl);
        Self {
            table: table.into(),
            columns,
            ddl: ddl.to_string(),
        }
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn text_columns(&self) -> Vec<&ColumnDef> {
        self.columns.iter().filter(|c| c.is_text()).collect()
    }

    pub fn numeric_columns(&self) -> Vec<&ColumnDef> {
        self.columns.iter().filter(|c| c.is_numeric()).collect()
    }

    pub fn find(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

pub fn parse_columns_from_ddl(ddl: &str) -> Vec<ColumnDef> {
    let (start, end) = match (ddl.find('('), ddl.rfind(')')) {
        (Some(s), Some(e)) if e > s => (s, e),
        _ => return Vec::new(),
    };
    let body = ddl[start + 1..end]
        .lines()
        .map(|line| match line.find("--") {
            Some(idx) => &line[..idx],
            None => line,
        })
        .collect::<Vec<_>>()
        .join("\n");

    split_top_level(&body)
        .into_iter()
        .flat_map(|chunk| chunk.lines().map(str::to_string).collect::<Vec<_>>())
        .filter_map(|line| parse_column_line(&line))
        .collect()
}

/// Splits on commas that are not nested inside parentheses, so that
/// `DECIMAL(10,2)` stays in one piece.
fn split_top_level(body: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    for ch in body.chars() {
        match ch {
            '(' => {
                depth += 1;
                current.push(ch);
            }
            ')' => {
                depth = depth.saturating_sub(1);
                current.push(ch);
            }
            ',' if depth == 0 => parts.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    parts.push(current);
    parts
}

fn parse_column_line(line: &str) -> Option<ColumnDef> {
    let line = line.trim().trim_matches(',').trim();
    if line.is_empty() {
        return None;
    }
    let (name, rest) = match split_quoted_name(line) {
        Some(split) => split,
        None => {
            let (raw_name, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
            if CONSTRAINT_PREFIXES.iter().any(|p| raw_name.eq_ignore_ascii_case(p)) {
                return None;
            }
            (raw_name.trim_matches('\'').to_string(), rest)
        }
    };
    if name.is_empty() {
        return None;
    }
    let declared = rest
        .split_whitespace()
        .next()
        .map(|t| t.trim_matches(','))
        .unwrap_or("")
        .to_string();
    Some(ColumnDef::new(name, declared))
}

/// Reads a leading `` `name` ``, `"name"` or `[name]` identifier, which may
/// contain spaces. A doubled closing quote stands for the quote itself.
fn split_quoted_name(line: &str) -> Option<(String, &str)> {
    let close = match line.chars().next()? {
        '`' => '`',
        '"' => '"',
        '[' => ']',
        _ => return None,
    };
    let mut name = String::new();
    let mut chars = line.char_indices().skip(1).peekable();
    while let Some((idx, ch)) = chars.next() {
        if ch == close {
            if close != ']' && matches!(chars.peek(), Some((_, next)) if *next == close) {
                chars.next();
                name.push(ch);
                continue;
            }
            return Some((name, &line[idx + ch.len_utf8()..]));
        }
        name.push(ch);
    }
    None
}

pub fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

pub fn render_ddl(table: &str, columns: &[ColumnDef]) -> String {
    let body = columns
        .iter()
        .map(|c| format!("  {} {}", quote_ident(&c.name), c.declared_type))
        .collect::<Vec<_>>()
        .join(",\n");
    format!("CREATE TABLE IF NOT EXISTS {} (\n{}\n)", quote_ident(table), body)
}

/// Reads a table's definition from the store catalog. Re-fetched on every
/// query cycle; nothing is cached.
pub struct SchemaIntrospector<'a> {
    store: &'a SqliteStore,
}

impl<'a> SchemaIntrospector<'a> {
    pub fn new(store: &'a SqliteStore) -> Self {
        Self { store }
    }

    pub fn fetch(&self, table: &str) -> Result<Option<SchemaDescriptor>> {
        let ddl = match self.store.table_definition(table)? {
            Some(ddl) => ddl,
            None => return Ok(None),
        };
        let schema = SchemaDescriptor::from_ddl(table, &ddl);
        debug!("Fetched schema for {}: {} columns", table, schema.columns.len());
        if schema.is_empty() {
            return Ok(None);
        }
        Ok(Some(schema))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tolerates_comments_blank_lines_and_trailing_commas() {
        let ddl = "CREATE TABLE customers (\n  -- identity, contact\n  `Name` TEXT,\n\n  \"PhoneNo\" varchar(20),\n  Age INTEGER,\n  MonthlyCharges DECIMAL(10,2),\n)";
        let cols = parse_columns_from_ddl(ddl);
        let names: Vec<&str> = cols.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Name", "PhoneNo", "Age", "MonthlyCharges"]);
        assert!(cols[0].is_text());
        assert!(cols[1].is_text());
        assert_eq!(cols[1].declared_type, "VARCHAR(20)");
        assert!(cols[2].is_numeric());
        assert!(cols[3].is_numeric());
    }

    #[test]
    fn test_parse_single_line_ddl_and_constraints() {
        let ddl = "CREATE TABLE t (id INTEGER, email TEXT, PRIMARY KEY (id))";
        let cols = parse_columns_from_ddl(ddl);
        assert_eq!(cols.len(), 2);
        assert_eq!(cols[1].name, "email");
    }

    #[test]
    fn test_parse_without_body_is_empty() {
        assert!(parse_columns_from_ddl("CREATE TABLE t").is_empty());
    }

    #[test]
    fn test_quoted_names_keep_their_spaces() {
        let ddl = "CREATE TABLE t (\n  `Customer Name` TEXT,\n  \"Monthly Charges\" REAL,\n  [Sign Up] TEXT,\n  `odd``col` INTEGER\n)";
        let cols = parse_columns_from_ddl(ddl);
        let names: Vec<&str> = cols.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Customer Name", "Monthly Charges", "Sign Up", "odd`col"]);
        assert!(cols[1].is_numeric());
        assert_eq!(cols[3].declared_type, "INTEGER");
    }

    #[test]
    fn test_rendered_names_with_spaces_round_trip() {
        let columns = vec![ColumnDef::new("Customer Name", "TEXT"), ColumnDef::new("Monthly Charges", "REAL")];
        let schema = SchemaDescriptor::new("customers_tbl", columns);
        assert_eq!(parse_columns_from_ddl(&schema.ddl), schema.columns);
    }

    #[test]
    fn test_introspected_names_with_spaces_match_created_table() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("store.db")).unwrap();
        let created = SchemaDescriptor::new(
            "churn_tbl",
            vec![ColumnDef::new("Customer Name", "TEXT"), ColumnDef::new("Monthly Charges", "REAL")],
        );
        store.create_table_if_needed(&created).unwrap();

        let fetched = SchemaIntrospector::new(&store).fetch("churn_tbl").unwrap().unwrap();
        assert_eq!(fetched.column_names(), vec!["Customer Name", "Monthly Charges"]);
        assert!(fetched.columns[1].is_numeric());
    }

    #[test]
    fn test_render_ddl_is_guarded() {
        let schema = SchemaDescriptor::new("t", vec![ColumnDef::new("Name", "TEXT")]);
        assert!(schema.ddl.starts_with("CREATE TABLE IF NOT EXISTS `t`"));
        let reparsed = parse_columns_from_ddl(&schema.ddl);
        assert_eq!(reparsed, schema.columns);
    }
}
