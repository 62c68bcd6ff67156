//! Cleanup of raw model output before validation.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref SELECT_WORD: Regex = Regex::new(r"(?i)\bselect\b").unwrap();
    static ref ASSIGNMENT: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*\s*=\s*[^=]").unwrap();
}

/// Content of the first fenced block, without its language tag.
fn fenced_block(raw: &str) -> Option<&str> {
    let start = raw.find("```")?;
    let after = &raw[start + 3..];
    let body_start = match after.find('\n') {
        Some(nl) if after[..nl].trim().chars().all(|c| c.is_ascii_alphanumeric()) => nl + 1,
        _ => 0,
    };
    let body = &after[body_start..];
    let end = body.find("```").unwrap_or(body.len());
    Some(&body[..end])
}

/// Strips code fences, leading prose, stray backticks and trailing
/// statement terminators from a model-generated query.
pub fn sanitize_sql(raw: &str) -> String {
    let mut text = fenced_block(raw).unwrap_or(raw).trim().trim_start_matches('`').trim();

    if !text.to_lowercase().starts_with("select") {
        if let Some(m) = SELECT_WORD.find(text) {
            text = &text[m.start()..];
        }
    }

    if let Some(idx) = text.find("\n\n") {
        text = &text[..idx];
    }

    let mut sql = text.trim().to_string();
    loop {
        let before = sql.len();
        while sql.ends_with(';') {
            sql.pop();
            sql = sql.trim_end().to_string();
        }
        if sql.ends_with('`') && sql.matches('`').count() % 2 == 1 {
            sql.pop();
            sql = sql.trim_end().to_string();
        }
        if sql.len() == before {
            break;
        }
    }
    sql
}

/// Reduces a model reply to one expression line: the first non-comment
/// line of the fenced block (or reply), with trailing `#` comments and a
/// leading `name =` assignment removed.
pub fn sanitize_expression(raw: &str) -> String {
    let text = fenced_block(raw).unwrap_or(raw);
    let line = text
        .lines()
        .map(|l| l.trim().trim_matches('`').trim())
        .find(|l| !l.is_empty() && !l.starts_with('#'))
        .unwrap_or("");

    let line = strip_trailing_comment(line);
    let line = if ASSIGNMENT.is_match(line) {
        line.split_once('=').map(|(_, rhs)| rhs.trim()).unwrap_or(line)
    } else {
        line
    };
    line.trim().to_string()
}

fn strip_trailing_comment(line: &str) -> &str {
    let mut quote: Option<char> = None;
    for (idx, ch) in line.char_indices() {
        match (quote, ch) {
            (None, '\'') | (None, '"') => quote = Some(ch),
            (Some(q), c) if c == q => quote = None,
            (None, '#') => return line[..idx].trim_end(),
            _ => {}
        }
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_sql_strips_fences_and_terminators() {
        let raw = "```sql\nSELECT DISTINCT `Name` FROM `t` LIMIT 200;;\n```";
        assert_eq!(sanitize_sql(raw), "SELECT DISTINCT `Name` FROM `t` LIMIT 200");
    }

    #[test]
    fn test_sanitize_sql_drops_prose() {
        let raw = "Here is the query you need: SELECT * FROM t WHERE Age > 30;\n\nThis returns adults.";
        assert_eq!(sanitize_sql(raw), "SELECT * FROM t WHERE Age > 30");
    }

    #[test]
    fn test_sanitize_sql_keeps_quoted_identifiers() {
        let raw = "`SELECT `Name` FROM `t``";
        assert_eq!(sanitize_sql(raw), "SELECT `Name` FROM `t`");
    }

    #[test]
    fn test_sanitize_expression() {
        assert_eq!(
            sanitize_expression("```python\n# count\nresult = df['Email'].notna().sum()  # total\n```"),
            "df['Email'].notna().sum()"
        );
        assert_eq!(sanitize_expression("df[df['Tag'] == '#vip']"), "df[df['Tag'] == '#vip']");
        assert_eq!(sanitize_expression("len(df[df['Age'] >= 30])"), "len(df[df['Age'] >= 30])");
    }
}
