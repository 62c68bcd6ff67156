use crate::error::Result;
use crate::execution::result::any_value_to_json;
use polars::prelude::*;
use serde_json::{json, Value};
use std::cmp::Ordering;
use std::fmt;

/// A single cell or literal.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Scalar {
    pub fn from_any(value: AnyValue) -> Self {
        match value {
            AnyValue::Null => Scalar::Null,
            AnyValue::Boolean(b) => Scalar::Bool(b),
            AnyValue::String(s) => Scalar::Str(s.to_string()),
            AnyValue::StringOwned(s) => Scalar::Str(s.to_string()),
            AnyValue::Int8(i) => Scalar::Int(i as i64),
            AnyValue::Int16(i) => Scalar::Int(i as i64),
            AnyValue::Int32(i) => Scalar::Int(i as i64),
            AnyValue::Int64(i) => Scalar::Int(i),
            AnyValue::UInt8(u) => Scalar::Int(u as i64),
            AnyValue::UInt16(u) => Scalar::Int(u as i64),
            AnyValue::UInt32(u) => Scalar::Int(u as i64),
            AnyValue::UInt64(u) => Scalar::Int(u as i64),
            AnyValue::Float32(f) => Scalar::Float(f as f64),
            AnyValue::Float64(f) if f.is_nan() => Scalar::Null,
            AnyValue::Float64(f) => Scalar::Float(f),
            other => Scalar::Str(other.to_string()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Int(i) => Some(*i as f64),
            Scalar::Float(f) => Some(*f),
            Scalar::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Scalar::Null => false,
            Scalar::Bool(b) => *b,
            Scalar::Int(i) => *i != 0,
            Scalar::Float(f) => *f != 0.0,
            Scalar::Str(s) => !s.is_empty(),
        }
    }

    /// Loose equality: numbers compare by value across int/float.
    pub fn loose_eq(&self, other: &Scalar) -> bool {
        match (self.as_f64(), other.as_f64()) {
            (Some(a), Some(b)) if !matches!(self, Scalar::Str(_)) && !matches!(other, Scalar::Str(_)) => a == b,
            _ => self == other,
        }
    }

    /// Total order for sorting; nulls sort after everything else.
    pub fn sort_cmp(&self, other: &Scalar) -> Ordering {
        match (self, other) {
            (Scalar::Null, Scalar::Null) => Ordering::Equal,
            (Scalar::Null, _) => Ordering::Greater,
            (_, Scalar::Null) => Ordering::Less,
            (Scalar::Str(a), Scalar::Str(b)) => a.cmp(b),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
                _ => a.to_string().cmp(&b.to_string()),
            },
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Scalar::Null => Value::Null,
            Scalar::Bool(b) => json!(b),
            Scalar::Int(i) => json!(i),
            Scalar::Float(f) => serde_json::Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
            Scalar::Str(s) => json!(s),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Null => write!(f, "None"),
            Scalar::Bool(true) => write!(f, "True"),
            Scalar::Bool(false) => write!(f, "False"),
            Scalar::Int(i) => write!(f, "{}", i),
            Scalar::Float(v) if v.fract() == 0.0 && v.abs() < 1e15 => write!(f, "{:.1}", v),
            Scalar::Float(v) => write!(f, "{}", v),
            Scalar::Str(s) => write!(f, "{}", s),
        }
    }
}

/// Result of evaluating an analytic expression.
#[derive(Debug, Clone)]
pub enum EvalValue {
    Scalar(Scalar),
    Series(Series),
    Frame(DataFrame),
    List(Vec<Scalar>),
    Map(Vec<(String, Scalar)>),
}

impl EvalValue {
    pub fn is_tabular(&self) -> bool {
        matches!(self, EvalValue::Frame(_) | EvalValue::Series(_))
    }

    /// Tabular view of the value: a Series becomes a one-column frame.
    pub fn as_frame(&self) -> Result<Option<DataFrame>> {
        match self {
            EvalValue::Frame(df) => Ok(Some(df.clone())),
            EvalValue::Series(s) => Ok(Some(DataFrame::new(vec![s.clone()])?)),
            _ => Ok(None),
        }
    }

    pub fn row_count(&self) -> Option<usize> {
        match self {
            EvalValue::Frame(df) => Some(df.height()),
            EvalValue::Series(s) => Some(s.len()),
            _ => None,
        }
    }

    /// Short text rendering used in prompts and chat replies.
    pub fn preview(&self, max_rows: usize) -> String {
        match self {
            EvalValue::Scalar(s) => s.to_string(),
            EvalValue::Series(s) => format!("{}", s.head(Some(max_rows))),
            EvalValue::Frame(df) => format!("{}", df.head(Some(max_rows))),
            EvalValue::List(items) => format!("[{}]", items.iter().map(|s| s.to_string()).collect::<Vec<_>>().join(", ")),
            EvalValue::Map(entries) => format!(
                "{{{}}}",
                entries
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k, v))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            EvalValue::Scalar(s) => s.to_json(),
            EvalValue::List(items) => Value::Array(items.iter().map(|s| s.to_json()).collect()),
            EvalValue::Map(entries) => {
                Value::Object(entries.iter().map(|(k, v)| (k.clone(), v.to_json())).collect())
            }
            EvalValue::Series(s) => json!({
                "name": s.name(),
                "values": series_json(s),
            }),
            EvalValue::Frame(df) => frame_to_json(df),
        }
    }
}

fn series_json(series: &Series) -> Vec<Value> {
    (0..series.len())
        .map(|i| series.get(i).map(any_value_to_json).unwrap_or(Value::Null))
        .collect()
}

/// Row-oriented JSON for a frame: `{columns, rows}`.
pub fn frame_to_json(df: &DataFrame) -> Value {
    let columns: Vec<String> = df.get_column_names().iter().map(|c| c.to_string()).collect();
    let rows: Vec<Value> = (0..df.height())
        .map(|i| {
            let map: serde_json::Map<String, Value> = df
                .get_columns()
                .iter()
                .map(|s| (s.name().to_string(), s.get(i).map(any_value_to_json).unwrap_or(Value::Null)))
                .collect();
            Value::Object(map)
        })
        .collect();
    json!({ "columns": columns, "rows": rows })
}

pub fn series_scalars(series: &Series) -> Result<Vec<Scalar>> {
    let mut out = Vec::with_capacity(series.len());
    for i in 0..series.len() {
        out.push(Scalar::from_any(series.get(i)?));
    }
    Ok(out)
}

/// Builds a series from scalars, picking the narrowest dtype that holds them.
pub fn scalars_to_series(name: &str, values: &[Scalar]) -> Series {
    let non_null: Vec<&Scalar> = values.iter().filter(|v| !v.is_null()).collect();
    let all = |pred: fn(&Scalar) -> bool| !non_null.is_empty() && non_null.iter().all(|v| pred(v));

    if all(|v| matches!(v, Scalar::Bool(_))) {
        let data: Vec<Option<bool>> = values
            .iter()
            .map(|v| match v {
                Scalar::Bool(b) => Some(*b),
                _ => None,
            })
            .collect();
        Series::new(name, data)
    } else if all(|v| matches!(v, Scalar::Int(_))) {
        let data: Vec<Option<i64>> = values
            .iter()
            .map(|v| match v {
                Scalar::Int(i) => Some(*i),
                _ => None,
            })
            .collect();
        Series::new(name, data)
    } else if all(|v| matches!(v, Scalar::Int(_) | Scalar::Float(_))) {
        let data: Vec<Option<f64>> = values.iter().map(|v| v.as_f64()).collect();
        Series::new(name, data)
    } else {
        let data: Vec<Option<String>> = values
            .iter()
            .map(|v| if v.is_null() { None } else { Some(v.to_string()) })
            .collect();
        Series::new(name, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_ordering_puts_nulls_last() {
        let mut values = vec![Scalar::Null, Scalar::Int(3), Scalar::Float(1.5)];
        values.sort_by(|a, b| a.sort_cmp(b));
        assert_eq!(values, vec![Scalar::Float(1.5), Scalar::Int(3), Scalar::Null]);
    }

    #[test]
    fn test_scalars_to_series_dtype() {
        let s = scalars_to_series("x", &[Scalar::Int(1), Scalar::Null, Scalar::Float(2.5)]);
        assert_eq!(s.dtype(), &DataType::Float64);
        assert_eq!(s.null_count(), 1);
        let s = scalars_to_series("y", &[Scalar::Str("a".into()), Scalar::Int(1)]);
        assert_eq!(s.dtype(), &DataType::String);
    }

    #[test]
    fn test_loose_equality() {
        assert!(Scalar::Int(2).loose_eq(&Scalar::Float(2.0)));
        assert!(!Scalar::Str("2".into()).loose_eq(&Scalar::Int(2)));
    }
}
