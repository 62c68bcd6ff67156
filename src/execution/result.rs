//! Query Result - rows and column names returned by the store

use crate::error::Result;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One result row: field name to value, in column order. Lookups are
/// explicit; a missing field is `None`, a SQL NULL is `Value::Null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    fields: Vec<(String, Value)>,
}

impl Row {
    pub fn new(fields: Vec<(String, Value)>) -> Self {
        Self { fields }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.iter().any(|(k, _)| k == name)
    }

    /// Non-null, non-blank value rendered as text.
    pub fn text(&self, name: &str) -> Option<String> {
        match self.get(name)? {
            Value::Null => None,
            Value::String(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed.to_string())
                }
            }
            other => Some(other.to_string()),
        }
    }

    pub fn fields(&self) -> &[(String, Value)] {
        &self.fields
    }
}

/// Transient per-turn result of one SELECT.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    pub execution_time_ms: u64,
}

impl QueryResult {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn meta(&self) -> String {
        format!("Matched {} rows across {} columns.", self.rows.len(), self.columns.len())
    }

    /// Converts rows to a DataFrame, inferring one dtype per column from
    /// its non-null values (integers, floats, booleans, else strings).
    pub fn to_dataframe(&self) -> Result<DataFrame> {
        let mut series = Vec::with_capacity(self.columns.len());
        for name in &self.columns {
            let values: Vec<&Value> = self
                .rows
                .iter()
                .map(|r| r.get(name).unwrap_or(&Value::Null))
                .collect();
            series.push(values_to_series(name, &values));
        }
        Ok(DataFrame::new(series)?)
    }

    pub fn to_json(&self) -> Value {
        let rows: Vec<Value> = self
            .rows
            .iter()
            .map(|r| {
                let map: serde_json::Map<String, Value> =
                    r.fields().iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                Value::Object(map)
            })
            .collect();
        serde_json::json!({
            "rows": rows,
            "columns": self.columns,
        })
    }
}

fn values_to_series(name: &str, values: &[&Value]) -> Series {
    let non_null = values.iter().filter(|v| !v.is_null());
    let mut all_int = true;
    let mut all_num = true;
    let mut all_bool = true;
    let mut seen = false;
    for v in non_null {
        seen = true;
        all_int &= v.is_i64();
        all_num &= v.is_number();
        all_bool &= v.is_boolean();
    }

    if seen && all_bool {
        let data: Vec<Option<bool>> = values.iter().map(|v| v.as_bool()).collect();
        Series::new(name, data)
    } else if seen && all_int {
        let data: Vec<Option<i64>> = values.iter().map(|v| v.as_i64()).collect();
        Series::new(name, data)
    } else if seen && all_num {
        let data: Vec<Option<f64>> = values.iter().map(|v| v.as_f64()).collect();
        Series::new(name, data)
    } else {
        let data: Vec<Option<String>> = values
            .iter()
            .map(|v| match v {
                Value::Null => None,
                Value::String(s) => Some(s.clone()),
                other => Some(other.to_string()),
            })
            .collect();
        Series::new(name, data)
    }
}

/// Converts one cell of a DataFrame to JSON.
pub fn any_value_to_json(value: AnyValue) -> Value {
    match value {
        AnyValue::Null => Value::Null,
        AnyValue::Boolean(b) => Value::Bool(b),
        AnyValue::String(s) => Value::String(s.to_string()),
        AnyValue::StringOwned(s) => Value::String(s.to_string()),
        AnyValue::Int8(i) => Value::from(i),
        AnyValue::Int16(i) => Value::from(i),
        AnyValue::Int32(i) => Value::from(i),
        AnyValue::Int64(i) => Value::from(i),
        AnyValue::UInt8(u) => Value::from(u),
        AnyValue::UInt16(u) => Value::from(u),
        AnyValue::UInt32(u) => Value::from(u),
        AnyValue::UInt64(u) => Value::from(u),
        AnyValue::Float32(f) => serde_json::Number::from_f64(f as f64)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        AnyValue::Float64(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        other => Value::String(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> QueryResult {
        QueryResult {
            columns: vec!["Name".into(), "Age".into(), "Score".into()],
            rows: vec![
                Row::new(vec![
                    ("Name".into(), json!("Riya")),
                    ("Age".into(), json!(31)),
                    ("Score".into(), json!(0.5)),
                ]),
                Row::new(vec![
                    ("Name".into(), Value::Null),
                    ("Age".into(), json!(40)),
                    ("Score".into(), json!(2)),
                ]),
            ],
            execution_time_ms: 1,
        }
    }

    #[test]
    fn test_row_lookups_are_explicit() {
        let result = sample();
        let second = &result.rows[1];
        assert!(second.contains("Name"));
        assert_eq!(second.get("Name"), Some(&Value::Null));
        assert_eq!(second.text("Name"), None);
        assert_eq!(second.get("Missing"), None);
        assert_eq!(result.rows[0].text("Age"), Some("31".to_string()));
    }

    #[test]
    fn test_to_dataframe_infers_dtypes() {
        let df = sample().to_dataframe().unwrap();
        assert_eq!(df.shape(), (2, 3));
        assert_eq!(df.column("Age").unwrap().dtype(), &DataType::Int64);
        assert_eq!(df.column("Score").unwrap().dtype(), &DataType::Float64);
        assert_eq!(df.column("Name").unwrap().dtype(), &DataType::String);
    }

    #[test]
    fn test_meta_text() {
        assert_eq!(sample().meta(), "Matched 2 rows across 3 columns.");
    }
}
