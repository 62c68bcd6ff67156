//! Tree-walking interpreter over a single DataFrame.
//!
//! The namespace is closed: `df`, `np`, `pd` and a handful of builtins.
//! Every other name is an error. Element-wise arithmetic and comparisons
//! run through polars expressions; aggregations and string helpers work
//! on the materialized series.

use crate::error::{AssistantError, Result};
use crate::evaluator::parser::{BinaryOp, Expr, UnaryOp};
use crate::evaluator::value::{scalars_to_series, series_scalars, EvalValue, Scalar};
use itertools::Itertools;
use polars::prelude::*;
use polars::prelude::Expr as PolarsExpr;
use regex::RegexBuilder;
use std::collections::HashSet;

const LEFT: &str = "__left";
const RIGHT: &str = "__right";
const OUT: &str = "__out";
const DEFAULT_HEAD: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Module {
    Numpy,
    Pandas,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Builtin {
    Len,
    Sum,
    Min,
    Max,
    Round,
    Abs,
    List,
    Dict,
    Int,
    Float,
    Str,
    Bool,
}

impl Builtin {
    fn lookup(name: &str) -> Option<Self> {
        Some(match name {
            "len" => Builtin::Len,
            "sum" => Builtin::Sum,
            "min" => Builtin::Min,
            "max" => Builtin::Max,
            "round" => Builtin::Round,
            "abs" => Builtin::Abs,
            "list" => Builtin::List,
            "dict" => Builtin::Dict,
            "int" => Builtin::Int,
            "float" => Builtin::Float,
            "str" => Builtin::Str,
            "bool" => Builtin::Bool,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum Aggregation {
    Sum,
    Mean,
    Median,
    Min,
    Max,
    Std(u8),
}

/// Intermediate values; only some of them may escape as an [`EvalValue`].
#[derive(Debug, Clone)]
enum Value {
    Scalar(Scalar),
    Series(Series),
    Frame(DataFrame),
    List(Vec<Value>),
    Map(Vec<(String, Scalar)>),
    Module(Module),
    Builtin(Builtin),
    StrAccessor(Series),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::Scalar(Scalar::Null) => "NoneType",
            Value::Scalar(Scalar::Bool(_)) => "bool",
            Value::Scalar(Scalar::Int(_)) => "int",
            Value::Scalar(Scalar::Float(_)) => "float",
            Value::Scalar(Scalar::Str(_)) => "str",
            Value::Series(_) => "Series",
            Value::Frame(_) => "DataFrame",
            Value::List(_) => "list",
            Value::Map(_) => "dict",
            Value::Module(_) => "module",
            Value::Builtin(_) => "builtin_function",
            Value::StrAccessor(_) => "StringMethods",
        }
    }

    fn into_scalar(self) -> Result<Scalar> {
        match self {
            Value::Scalar(s) => Ok(s),
            Value::Series(s) if s.len() == 1 => Ok(Scalar::from_any(s.get(0)?)),
            other => Err(eval_err(format!("expected a single value, got {}", other.type_name()))),
        }
    }

    fn into_scalars(self) -> Result<Vec<Scalar>> {
        match self {
            Value::Series(s) => series_scalars(&s),
            Value::List(items) => items.into_iter().map(Value::into_scalar).collect(),
            Value::Scalar(s) => Ok(vec![s]),
            other => Err(eval_err(format!("expected a list of values, got {}", other.type_name()))),
        }
    }

    fn into_eval(self) -> Result<EvalValue> {
        match self {
            Value::Scalar(s) => Ok(EvalValue::Scalar(s)),
            Value::Series(s) => Ok(EvalValue::Series(s)),
            Value::Frame(df) => Ok(EvalValue::Frame(df)),
            Value::Map(entries) => Ok(EvalValue::Map(entries)),
            Value::List(items) => Ok(EvalValue::List(
                items.into_iter().map(Value::into_scalar).collect::<Result<Vec<_>>>()?,
            )),
            other => Err(eval_err(format!(
                "expression evaluated to a {}, not a value",
                other.type_name()
            ))),
        }
    }

    fn truthy(&self) -> Result<bool> {
        match self {
            Value::Scalar(s) => Ok(s.truthy()),
            Value::List(items) => Ok(!items.is_empty()),
            Value::Map(entries) => Ok(!entries.is_empty()),
            Value::Series(_) | Value::Frame(_) => Err(eval_err(
                "the truth value of a Series is ambiguous; use & | ~ or .any()/.all()",
            )),
            _ => Ok(true),
        }
    }
}

/// Evaluated call arguments with Python-style positional/keyword lookup.
struct Args {
    positional: Vec<Value>,
    keywords: Vec<(String, Value)>,
}

impl Args {
    fn get(&self, pos: usize, name: &str) -> Option<&Value> {
        self.keywords
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
            .or_else(|| self.positional.get(pos))
    }

    fn scalar(&self, pos: usize, name: &str) -> Result<Option<Scalar>> {
        self.get(pos, name).cloned().map(Value::into_scalar).transpose()
    }

    fn int(&self, pos: usize, name: &str, default: i64) -> Result<i64> {
        match self.scalar(pos, name)? {
            None => Ok(default),
            Some(Scalar::Int(i)) => Ok(i),
            Some(other) => Err(eval_err(format!("'{}' must be an integer, got {}", name, other))),
        }
    }

    fn bool(&self, pos: usize, name: &str, default: bool) -> Result<bool> {
        Ok(self.scalar(pos, name)?.map(|s| s.truthy()).unwrap_or(default))
    }

    fn string(&self, pos: usize, name: &str) -> Result<Option<String>> {
        match self.scalar(pos, name)? {
            None | Some(Scalar::Null) => Ok(None),
            Some(Scalar::Str(s)) => Ok(Some(s)),
            Some(other) => Err(eval_err(format!("'{}' must be a string, got {}", name, other))),
        }
    }

    /// A column name or list of column names.
    fn names(&self, pos: usize, name: &str) -> Result<Option<Vec<String>>> {
        match self.get(pos, name) {
            None | Some(Value::Scalar(Scalar::Null)) => Ok(None),
            Some(Value::Scalar(Scalar::Str(s))) => Ok(Some(vec![s.clone()])),
            Some(Value::List(items)) => items
                .iter()
                .map(|v| match v {
                    Value::Scalar(Scalar::Str(s)) => Ok(s.clone()),
                    other => Err(eval_err(format!("column names must be strings, got {}", other.type_name()))),
                })
                .collect::<Result<Vec<_>>>()
                .map(Some),
            Some(other) => Err(eval_err(format!("'{}' must name columns, got {}", name, other.type_name()))),
        }
    }

    fn required(&self, pos: usize, name: &str) -> Result<&Value> {
        self.get(pos, name)
            .ok_or_else(|| eval_err(format!("missing required argument '{}'", name)))
    }
}

pub struct Interpreter<'a> {
    table: &'a DataFrame,
}

impl<'a> Interpreter<'a> {
    pub fn new(table: &'a DataFrame) -> Self {
        Self { table }
    }

    pub fn evaluate(&self, expr: &Expr) -> Result<EvalValue> {
        self.eval(expr)?.into_eval()
    }

    fn eval(&self, expr: &Expr) -> Result<Value> {
        match expr {
            Expr::Int(i) => Ok(Value::Scalar(Scalar::Int(*i))),
            Expr::Float(f) => Ok(Value::Scalar(Scalar::Float(*f))),
            Expr::Str(s) => Ok(Value::Scalar(Scalar::Str(s.clone()))),
            Expr::Bool(b) => Ok(Value::Scalar(Scalar::Bool(*b))),
            Expr::None => Ok(Value::Scalar(Scalar::Null)),
            Expr::Name(name) => self.resolve(name),
            Expr::List(items) => Ok(Value::List(
                items.iter().map(|e| self.eval(e)).collect::<Result<Vec<_>>>()?,
            )),
            Expr::Attr { target, name } => {
                let target = self.eval(target)?;
                attribute(target, name)
            }
            Expr::Call { func, args, kwargs } => {
                let args = Args {
                    positional: args.iter().map(|e| self.eval(e)).collect::<Result<Vec<_>>>()?,
                    keywords: kwargs
                        .iter()
                        .map(|(k, e)| Ok((k.clone(), self.eval(e)?)))
                        .collect::<Result<Vec<_>>>()?,
                };
                match func.as_ref() {
                    Expr::Attr { target, name } => {
                        let target = self.eval(target)?;
                        call_method(target, name, &args)
                    }
                    other => match self.eval(other)? {
                        Value::Builtin(builtin) => call_builtin(builtin, &args),
                        value => Err(eval_err(format!("'{}' object is not callable", value.type_name()))),
                    },
                }
            }
            Expr::Index { target, index } => {
                let target = self.eval(target)?;
                let index = self.eval(index)?;
                subscript(target, index)
            }
            Expr::Unary { op, operand } => {
                let value = self.eval(operand)?;
                unary(*op, value)
            }
            Expr::Binary { op: BinaryOp::And, left, right } => {
                let left = self.eval(left)?;
                if !left.truthy()? {
                    return Ok(left);
                }
                self.eval(right)
            }
            Expr::Binary { op: BinaryOp::Or, left, right } => {
                let left = self.eval(left)?;
                if left.truthy()? {
                    return Ok(left);
                }
                self.eval(right)
            }
            Expr::Binary { op, left, right } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                binary(*op, left, right)
            }
        }
    }

    fn resolve(&self, name: &str) -> Result<Value> {
        match name {
            "df" => Ok(Value::Frame(self.table.clone())),
            "np" | "numpy" => Ok(Value::Module(Module::Numpy)),
            "pd" | "pandas" => Ok(Value::Module(Module::Pandas)),
            _ => Builtin::lookup(name)
                .map(Value::Builtin)
                .ok_or_else(|| eval_err(format!("name '{}' is not defined", name))),
        }
    }
}

fn eval_err(message: impl Into<String>) -> AssistantError {
    AssistantError::Evaluation(message.into())
}

fn attribute(target: Value, name: &str) -> Result<Value> {
    match (&target, name) {
        (Value::Frame(df), "shape") => Ok(Value::List(vec![int(df.height()), int(df.width())])),
        (Value::Frame(df), "columns") => Ok(Value::List(
            df.get_column_names()
                .iter()
                .map(|c| Value::Scalar(Scalar::Str(c.to_string())))
                .collect(),
        )),
        (Value::Frame(df), "empty") => Ok(Value::Scalar(Scalar::Bool(df.height() == 0))),
        (Value::Frame(df), "size") => Ok(int(df.height() * df.width())),
        (Value::Frame(df), column) if df.get_column_names().contains(&column) => {
            Ok(Value::Series(df.column(column)?.clone()))
        }
        (Value::Series(s), "str") => {
            if s.dtype() != &DataType::String {
                return Err(eval_err("Can only use .str accessor with string values"));
            }
            Ok(Value::StrAccessor(s.clone()))
        }
        (Value::Series(s), "shape") => Ok(Value::List(vec![int(s.len())])),
        (Value::Series(s), "size") => Ok(int(s.len())),
        (Value::Series(s), "empty") => Ok(Value::Scalar(Scalar::Bool(s.is_empty()))),
        (Value::Series(s), "name") => Ok(Value::Scalar(Scalar::Str(s.name().to_string()))),
        (Value::Series(s), "values") => Ok(Value::Series(s.clone())),
        (Value::Module(Module::Numpy), "nan") => Ok(Value::Scalar(Scalar::Null)),
        _ => Err(eval_err(format!(
            "'{}' object has no attribute '{}'",
            target.type_name(),
            name
        ))),
    }
}

fn int(n: usize) -> Value {
    Value::Scalar(Scalar::Int(n as i64))
}

fn call_method(target: Value, name: &str, args: &Args) -> Result<Value> {
    match target {
        Value::Frame(df) => frame_method(&df, name, args),
        Value::Series(s) => series_method(&s, name, args),
        Value::StrAccessor(s) => str_method(&s, name, args),
        Value::Module(Module::Numpy) => numpy_function(name, args),
        Value::Module(Module::Pandas) => pandas_function(name, args),
        Value::Scalar(Scalar::Str(s)) => match name {
            "lower" => Ok(Value::Scalar(Scalar::Str(s.to_lowercase()))),
            "upper" => Ok(Value::Scalar(Scalar::Str(s.to_uppercase()))),
            "strip" => Ok(Value::Scalar(Scalar::Str(s.trim().to_string()))),
            "startswith" => Ok(bool_value(s.starts_with(&required_str(args, 0, "prefix")?))),
            "endswith" => Ok(bool_value(s.ends_with(&required_str(args, 0, "suffix")?))),
            _ => Err(eval_err(format!("'str' object has no attribute '{}'", name))),
        },
        other => Err(eval_err(format!(
            "'{}' object has no attribute '{}'",
            other.type_name(),
            name
        ))),
    }
}

fn bool_value(b: bool) -> Value {
    Value::Scalar(Scalar::Bool(b))
}

fn required_str(args: &Args, pos: usize, name: &str) -> Result<String> {
    args.string(pos, name)?
        .ok_or_else(|| eval_err(format!("missing required argument '{}'", name)))
}

// ---------------------------------------------------------------------------
// DataFrame
// ---------------------------------------------------------------------------

fn frame_method(df: &DataFrame, name: &str, args: &Args) -> Result<Value> {
    match name {
        "head" => Ok(Value::Frame(df.head(Some(non_negative(args.int(0, "n", DEFAULT_HEAD)?))))),
        "tail" => Ok(Value::Frame(df.tail(Some(non_negative(args.int(0, "n", DEFAULT_HEAD)?))))),
        "copy" | "reset_index" => Ok(Value::Frame(df.clone())),
        "get" => {
            let column = required_str(args, 0, "key")?;
            Ok(match df.column(&column) {
                Ok(s) => Value::Series(s.clone()),
                Err(_) => Value::Scalar(Scalar::Null),
            })
        }
        "sort_values" => {
            let by = args
                .names(0, "by")?
                .ok_or_else(|| eval_err("sort_values requires 'by'"))?;
            let ascending = args.bool(1, "ascending", true)?;
            Ok(Value::Frame(sort_frame(df, &by, ascending)?))
        }
        "nlargest" | "nsmallest" => {
            let n = non_negative(args.int(0, "n", DEFAULT_HEAD)?);
            let by = args
                .names(1, "columns")?
                .ok_or_else(|| eval_err(format!("{} requires 'columns'", name)))?;
            let sorted = sort_frame(df, &by, name == "nsmallest")?;
            Ok(Value::Frame(sorted.head(Some(n))))
        }
        "drop_duplicates" => {
            let subset = args.names(0, "subset")?;
            Ok(Value::Frame(drop_duplicates(df, subset.as_deref())?))
        }
        "dropna" => {
            let subset = args.names(0, "subset")?;
            let columns: Vec<String> = subset.unwrap_or_else(|| column_names(df));
            let predicate = columns
                .iter()
                .map(|c| col(c.as_str()).is_not_null())
                .reduce(|acc, p| acc.and(p));
            match predicate {
                Some(p) => Ok(Value::Frame(df.clone().lazy().filter(p).collect()?)),
                None => Ok(Value::Frame(df.clone())),
            }
        }
        "count" | "nunique" | "sum" | "mean" | "min" | "max" | "median" => {
            let mut entries = Vec::new();
            for series in df.get_columns() {
                let value = match name {
                    "count" => Scalar::Int((series.len() - series.null_count()) as i64),
                    "nunique" => Scalar::Int(distinct_non_null(series)?.len() as i64),
                    _ if !series.dtype().is_numeric() => continue,
                    "sum" => aggregate(series, Aggregation::Sum)?,
                    "mean" => aggregate(series, Aggregation::Mean)?,
                    "median" => aggregate(series, Aggregation::Median)?,
                    "min" => aggregate(series, Aggregation::Min)?,
                    _ => aggregate(series, Aggregation::Max)?,
                };
                entries.push((series.name().to_string(), value));
            }
            Ok(Value::Map(entries))
        }
        _ => Err(eval_err(format!("'DataFrame' object has no attribute '{}'", name))),
    }
}

fn non_negative(n: i64) -> usize {
    n.max(0) as usize
}

fn column_names(df: &DataFrame) -> Vec<String> {
    df.get_column_names().iter().map(|c| c.to_string()).collect()
}

fn take_rows(df: &DataFrame, indices: Vec<IdxSize>) -> Result<DataFrame> {
    Ok(df.take(&IdxCa::from_vec("idx", indices))?)
}

/// Stable multi-key sort; nulls always last.
fn sort_frame(df: &DataFrame, by: &[String], ascending: bool) -> Result<DataFrame> {
    let keys: Vec<Vec<Scalar>> = by
        .iter()
        .map(|c| series_scalars(df.column(c)?))
        .collect::<Result<Vec<_>>>()?;
    let mut order: Vec<usize> = (0..df.height()).collect();
    order.sort_by(|&a, &b| {
        for key in &keys {
            let (x, y) = (&key[a], &key[b]);
            let ord = match (x.is_null(), y.is_null()) {
                (true, true) => std::cmp::Ordering::Equal,
                (true, false) => std::cmp::Ordering::Greater,
                (false, true) => std::cmp::Ordering::Less,
                _ if ascending => x.sort_cmp(y),
                _ => y.sort_cmp(x),
            };
            if ord != std::cmp::Ordering::Equal {
                return ord;
            }
        }
        std::cmp::Ordering::Equal
    });
    take_rows(df, order.into_iter().map(|i| i as IdxSize).collect())
}

fn drop_duplicates(df: &DataFrame, subset: Option<&[String]>) -> Result<DataFrame> {
    let columns: Vec<String> = subset.map(|s| s.to_vec()).unwrap_or_else(|| column_names(df));
    let keys: Vec<Vec<Scalar>> = columns
        .iter()
        .map(|c| series_scalars(df.column(c)?))
        .collect::<Result<Vec<_>>>()?;
    let mut seen = HashSet::new();
    let mut keep = Vec::new();
    for row in 0..df.height() {
        let key = keys.iter().map(|k| format!("{:?}", k[row])).join("\u{1f}");
        if seen.insert(key) {
            keep.push(row as IdxSize);
        }
    }
    take_rows(df, keep)
}

// ---------------------------------------------------------------------------
// Series
// ---------------------------------------------------------------------------

fn series_method(s: &Series, name: &str, args: &Args) -> Result<Value> {
    let scalar = |v: Scalar| Ok(Value::Scalar(v));
    match name {
        "sum" => scalar(aggregate(s, Aggregation::Sum)?),
        "mean" => scalar(aggregate(s, Aggregation::Mean)?),
        "median" => scalar(aggregate(s, Aggregation::Median)?),
        "min" => scalar(aggregate(s, Aggregation::Min)?),
        "max" => scalar(aggregate(s, Aggregation::Max)?),
        "std" => {
            let ddof = args.int(0, "ddof", 1)?.clamp(0, u8::MAX as i64) as u8;
            scalar(aggregate(s, Aggregation::Std(ddof))?)
        }
        "count" => scalar(Scalar::Int((s.len() - s.null_count()) as i64)),
        "nunique" => scalar(Scalar::Int(distinct_non_null(s)?.len() as i64)),
        "unique" => Ok(Value::Series(scalars_to_series(s.name(), &distinct(s)?))),
        "isna" | "isnull" => Ok(Value::Series(s.is_null().into_series())),
        "notna" | "notnull" => Ok(Value::Series(s.is_not_null().into_series())),
        "dropna" => Ok(Value::Series(s.drop_nulls())),
        "copy" | "reset_index" => Ok(Value::Series(s.clone())),
        "head" => Ok(Value::Series(s.head(Some(non_negative(args.int(0, "n", DEFAULT_HEAD)?))))),
        "tail" => Ok(Value::Series(s.tail(Some(non_negative(args.int(0, "n", DEFAULT_HEAD)?))))),
        "tolist" | "to_list" => Ok(Value::List(
            series_scalars(s)?.into_iter().map(Value::Scalar).collect(),
        )),
        "any" => scalar(Scalar::Bool(series_scalars(s)?.iter().any(|v| v.truthy()))),
        "all" => scalar(Scalar::Bool(
            series_scalars(s)?.iter().filter(|v| !v.is_null()).all(|v| v.truthy()),
        )),
        "isin" => {
            let wanted = args.required(0, "values")?.clone().into_scalars()?;
            let mask: Vec<bool> = series_scalars(s)?
                .iter()
                .map(|v| !v.is_null() && wanted.iter().any(|w| v.loose_eq(w)))
                .collect();
            Ok(Value::Series(Series::new(s.name(), mask)))
        }
        "between" => {
            let low = args.required(0, "left")?.clone().into_scalar()?;
            let high = args.required(1, "right")?.clone().into_scalar()?;
            let inclusive = args.string(2, "inclusive")?.unwrap_or_else(|| "both".to_string());
            let (lo_incl, hi_incl) = match inclusive.as_str() {
                "both" => (true, true),
                "neither" => (false, false),
                "left" => (true, false),
                "right" => (false, true),
                other => return Err(eval_err(format!("invalid inclusive value '{}'", other))),
            };
            let mask: Vec<bool> = series_scalars(s)?
                .iter()
                .map(|v| {
                    if v.is_null() {
                        return false;
                    }
                    let above = v.sort_cmp(&low);
                    let below = v.sort_cmp(&high);
                    let lo_ok = above.is_gt() || (lo_incl && above.is_eq());
                    let hi_ok = below.is_lt() || (hi_incl && below.is_eq());
                    lo_ok && hi_ok
                })
                .collect();
            Ok(Value::Series(Series::new(s.name(), mask)))
        }
        "value_counts" => Ok(Value::Frame(value_counts(s, args.bool(0, "normalize", false)?)?)),
        "sort_values" => {
            let ascending = args.bool(0, "ascending", true)?;
            Ok(Value::Series(sort_series(s, ascending)?))
        }
        "nlargest" | "nsmallest" => {
            let n = non_negative(args.int(0, "n", DEFAULT_HEAD)?);
            Ok(Value::Series(sort_series(s, name == "nsmallest")?.head(Some(n))))
        }
        "round" => {
            let decimals = args.int(0, "decimals", 0)?;
            map_series(s, |v| round_scalar(v, Some(decimals)))
        }
        "abs" => map_series(s, abs_scalar),
        "fillna" => {
            let fill = args.required(0, "value")?.clone().into_scalar()?;
            map_series(s, |v| Ok(if v.is_null() { fill.clone() } else { v }))
        }
        "astype" => {
            let target = match args.required(0, "dtype")? {
                Value::Builtin(b) => *b,
                Value::Scalar(Scalar::Str(t)) => match t.as_str() {
                    "str" | "string" | "object" => Builtin::Str,
                    "int" | "int64" | "int32" => Builtin::Int,
                    "float" | "float64" | "float32" => Builtin::Float,
                    "bool" => Builtin::Bool,
                    other => return Err(eval_err(format!("unsupported dtype '{}'", other))),
                },
                other => return Err(eval_err(format!("unsupported dtype {}", other.type_name()))),
            };
            map_series(s, |v| {
                if v.is_null() {
                    return Ok(v);
                }
                convert_scalar(target, v)
            })
        }
        _ => Err(eval_err(format!("'Series' object has no attribute '{}'", name))),
    }
}

fn map_series(s: &Series, f: impl Fn(Scalar) -> Result<Scalar>) -> Result<Value> {
    let mapped = series_scalars(s)?
        .into_iter()
        .map(f)
        .collect::<Result<Vec<_>>>()?;
    Ok(Value::Series(scalars_to_series(s.name(), &mapped)))
}

fn sort_series(s: &Series, ascending: bool) -> Result<Series> {
    let frame = DataFrame::new(vec![s.clone()])?;
    let sorted = sort_frame(&frame, &[s.name().to_string()], ascending)?;
    Ok(sorted.column(s.name())?.clone())
}

fn distinct(s: &Series) -> Result<Vec<Scalar>> {
    Ok(series_scalars(s)?
        .into_iter()
        .unique_by(|v| format!("{:?}", v))
        .collect())
}

fn distinct_non_null(s: &Series) -> Result<Vec<Scalar>> {
    Ok(distinct(s)?.into_iter().filter(|v| !v.is_null()).collect())
}

/// `[value, count]` frame ordered by descending count, nulls excluded.
fn value_counts(s: &Series, normalize: bool) -> Result<DataFrame> {
    let values: Vec<Scalar> = series_scalars(s)?.into_iter().filter(|v| !v.is_null()).collect();
    let total = values.len();
    let mut counts: Vec<(Scalar, usize)> = Vec::new();
    for value in values {
        match counts.iter_mut().find(|(v, _)| *v == value) {
            Some((_, n)) => *n += 1,
            None => counts.push((value, 1)),
        }
    }
    counts.sort_by(|a, b| b.1.cmp(&a.1));

    let keys: Vec<Scalar> = counts.iter().map(|(v, _)| v.clone()).collect();
    let name = if s.name().is_empty() { "value" } else { s.name() };
    let tally = if normalize {
        let shares: Vec<f64> = counts.iter().map(|(_, n)| *n as f64 / total.max(1) as f64).collect();
        Series::new("proportion", shares)
    } else {
        let raw: Vec<i64> = counts.iter().map(|(_, n)| *n as i64).collect();
        Series::new("count", raw)
    };
    Ok(DataFrame::new(vec![scalars_to_series(name, &keys), tally])?)
}

fn aggregate(series: &Series, agg: Aggregation) -> Result<Scalar> {
    let mut s = if series.dtype() == &DataType::Boolean {
        series.cast(&DataType::Int64)?
    } else {
        series.clone()
    };
    let numeric_only = matches!(agg, Aggregation::Sum | Aggregation::Mean | Aggregation::Median | Aggregation::Std(_));
    if numeric_only && !s.dtype().is_numeric() {
        return Err(eval_err(format!(
            "cannot aggregate non-numeric column '{}' ({})",
            series.name(),
            series.dtype()
        )));
    }
    s.rename(LEFT);
    let expr = match agg {
        Aggregation::Sum => col(LEFT).sum(),
        Aggregation::Mean => col(LEFT).mean(),
        Aggregation::Median => col(LEFT).median(),
        Aggregation::Min => col(LEFT).min(),
        Aggregation::Max => col(LEFT).max(),
        Aggregation::Std(ddof) => col(LEFT).std(ddof),
    };
    let out = DataFrame::new(vec![s])?.lazy().select([expr.alias(OUT)]).collect()?;
    Ok(Scalar::from_any(out.column(OUT)?.get(0)?))
}

// ---------------------------------------------------------------------------
// .str accessor
// ---------------------------------------------------------------------------

fn str_method(s: &Series, name: &str, args: &Args) -> Result<Value> {
    let ca = s.str()?;
    match name {
        "contains" => {
            let pattern = required_str(args, 0, "pat")?;
            let case = args.bool(1, "case", true)?;
            let na = args.bool(3, "na", false)?;
            let use_regex = args.bool(4, "regex", true)?;
            let source = if use_regex { pattern.clone() } else { regex::escape(&pattern) };
            let re = RegexBuilder::new(&source)
                .case_insensitive(!case)
                .build()
                .or_else(|_| RegexBuilder::new(&regex::escape(&pattern)).case_insensitive(!case).build())
                .map_err(|e| eval_err(format!("invalid pattern: {}", e)))?;
            let mask: Vec<bool> = ca
                .into_iter()
                .map(|v| v.map(|text| re.is_match(text)).unwrap_or(na))
                .collect();
            Ok(Value::Series(Series::new(s.name(), mask)))
        }
        "startswith" | "endswith" => {
            let affix = required_str(args, 0, "pat")?;
            let na = args.bool(1, "na", false)?;
            let mask: Vec<bool> = ca
                .into_iter()
                .map(|v| match v {
                    Some(text) if name == "startswith" => text.starts_with(&affix),
                    Some(text) => text.ends_with(&affix),
                    None => na,
                })
                .collect();
            Ok(Value::Series(Series::new(s.name(), mask)))
        }
        "lower" | "upper" | "strip" => {
            let mapped: Vec<Option<String>> = ca
                .into_iter()
                .map(|v| {
                    v.map(|text| match name {
                        "lower" => text.to_lowercase(),
                        "upper" => text.to_uppercase(),
                        _ => text.trim().to_string(),
                    })
                })
                .collect();
            Ok(Value::Series(Series::new(s.name(), mapped)))
        }
        "len" => {
            let lengths: Vec<Option<i64>> = ca
                .into_iter()
                .map(|v| v.map(|text| text.chars().count() as i64))
                .collect();
            Ok(Value::Series(Series::new(s.name(), lengths)))
        }
        "replace" => {
            let from = required_str(args, 0, "pat")?;
            let to = required_str(args, 1, "repl")?;
            let mapped: Vec<Option<String>> = ca
                .into_iter()
                .map(|v| v.map(|text| text.replace(&from, &to)))
                .collect();
            Ok(Value::Series(Series::new(s.name(), mapped)))
        }
        _ => Err(eval_err(format!("'StringMethods' object has no attribute '{}'", name))),
    }
}

// ---------------------------------------------------------------------------
// np / pd / builtins
// ---------------------------------------------------------------------------

fn numpy_function(name: &str, args: &Args) -> Result<Value> {
    let agg = match name {
        "mean" => Some(Aggregation::Mean),
        "sum" => Some(Aggregation::Sum),
        "min" => Some(Aggregation::Min),
        "max" => Some(Aggregation::Max),
        "median" => Some(Aggregation::Median),
        "std" => Some(Aggregation::Std(args.int(1, "ddof", 0)?.clamp(0, u8::MAX as i64) as u8)),
        _ => None,
    };
    if let Some(agg) = agg {
        let series = as_series(args.required(0, "a")?.clone())?;
        return Ok(Value::Scalar(aggregate(&series, agg)?));
    }
    match name {
        "abs" => call_builtin(Builtin::Abs, args),
        "round" | "around" => call_builtin(Builtin::Round, args),
        "isnan" => match args.required(0, "x")? {
            Value::Series(s) => Ok(Value::Series(s.is_null().into_series())),
            other => Ok(bool_value(other.clone().into_scalar()?.is_null())),
        },
        _ => Err(eval_err(format!("module 'numpy' has no attribute '{}'", name))),
    }
}

fn pandas_function(name: &str, args: &Args) -> Result<Value> {
    let value = args.required(0, "obj")?.clone();
    let want_null = match name {
        "isna" | "isnull" => true,
        "notna" | "notnull" => false,
        _ => return Err(eval_err(format!("module 'pandas' has no attribute '{}'", name))),
    };
    match value {
        Value::Series(s) if want_null => Ok(Value::Series(s.is_null().into_series())),
        Value::Series(s) => Ok(Value::Series(s.is_not_null().into_series())),
        other => Ok(bool_value(other.into_scalar()?.is_null() == want_null)),
    }
}

fn as_series(value: Value) -> Result<Series> {
    match value {
        Value::Series(s) => Ok(s),
        other => Ok(scalars_to_series("values", &other.into_scalars()?)),
    }
}

fn call_builtin(builtin: Builtin, args: &Args) -> Result<Value> {
    match builtin {
        Builtin::Len => {
            let n = match args.required(0, "obj")? {
                Value::Frame(df) => df.height(),
                Value::Series(s) => s.len(),
                Value::List(items) => items.len(),
                Value::Map(entries) => entries.len(),
                Value::Scalar(Scalar::Str(s)) => s.chars().count(),
                other => return Err(eval_err(format!("object of type '{}' has no len()", other.type_name()))),
            };
            Ok(int(n))
        }
        Builtin::Sum => match args.required(0, "iterable")? {
            Value::Series(s) => Ok(Value::Scalar(aggregate(s, Aggregation::Sum)?)),
            other => {
                let values = other.clone().into_scalars()?;
                let mut total = Scalar::Int(0);
                for v in values {
                    total = scalar_binary(BinaryOp::Add, total, v)?;
                }
                Ok(Value::Scalar(total))
            }
        },
        Builtin::Min | Builtin::Max => {
            let want_max = builtin == Builtin::Max;
            if args.positional.len() == 1 {
                if let Value::Series(s) = &args.positional[0] {
                    let agg = if want_max { Aggregation::Max } else { Aggregation::Min };
                    return Ok(Value::Scalar(aggregate(s, agg)?));
                }
            }
            let values: Vec<Scalar> = if args.positional.len() == 1 {
                args.positional[0].clone().into_scalars()?
            } else {
                args.positional
                    .iter()
                    .cloned()
                    .map(Value::into_scalar)
                    .collect::<Result<Vec<_>>>()?
            };
            let pick = values.into_iter().filter(|v| !v.is_null()).reduce(|a, b| {
                let b_wins = if want_max { b.sort_cmp(&a).is_gt() } else { b.sort_cmp(&a).is_lt() };
                if b_wins {
                    b
                } else {
                    a
                }
            });
            pick.map(Value::Scalar)
                .ok_or_else(|| eval_err("min()/max() arg is an empty sequence"))
        }
        Builtin::Round => {
            let digits = match args.scalar(1, "ndigits")? {
                None | Some(Scalar::Null) => None,
                Some(Scalar::Int(n)) => Some(n),
                Some(other) => return Err(eval_err(format!("ndigits must be an integer, got {}", other))),
            };
            match args.required(0, "number")? {
                Value::Series(s) => map_series(s, |v| round_scalar(v, Some(digits.unwrap_or(0)))),
                other => Ok(Value::Scalar(round_scalar(other.clone().into_scalar()?, digits)?)),
            }
        }
        Builtin::Abs => match args.required(0, "x")? {
            Value::Series(s) => map_series(s, abs_scalar),
            other => Ok(Value::Scalar(abs_scalar(other.clone().into_scalar()?)?)),
        },
        Builtin::List => match args.get(0, "iterable") {
            None => Ok(Value::List(Vec::new())),
            Some(Value::Frame(df)) => Ok(Value::List(
                column_names(df).into_iter().map(|c| Value::Scalar(Scalar::Str(c))).collect(),
            )),
            Some(Value::Map(entries)) => Ok(Value::List(
                entries.iter().map(|(k, _)| Value::Scalar(Scalar::Str(k.clone()))).collect(),
            )),
            Some(other) => Ok(Value::List(
                other.clone().into_scalars()?.into_iter().map(Value::Scalar).collect(),
            )),
        },
        Builtin::Dict => match args.get(0, "mapping") {
            None => Ok(Value::Map(Vec::new())),
            Some(Value::Map(entries)) => Ok(Value::Map(entries.clone())),
            Some(Value::Frame(df)) if df.width() == 2 => {
                let keys = series_scalars(&df.get_columns()[0])?;
                let values = series_scalars(&df.get_columns()[1])?;
                Ok(Value::Map(
                    keys.into_iter().map(|k| k.to_string()).zip(values).collect(),
                ))
            }
            Some(other) => Err(eval_err(format!("cannot convert {} to dict", other.type_name()))),
        },
        Builtin::Int | Builtin::Float | Builtin::Str | Builtin::Bool => {
            let value = match args.get(0, "x") {
                None => {
                    return Ok(Value::Scalar(match builtin {
                        Builtin::Int => Scalar::Int(0),
                        Builtin::Float => Scalar::Float(0.0),
                        Builtin::Str => Scalar::Str(String::new()),
                        _ => Scalar::Bool(false),
                    }))
                }
                Some(v) => v.clone(),
            };
            match (builtin, &value) {
                (Builtin::Str, Value::Frame(df)) => Ok(Value::Scalar(Scalar::Str(format!("{}", df)))),
                (Builtin::Str, Value::Series(s)) if s.len() != 1 => Ok(Value::Scalar(Scalar::Str(format!("{}", s)))),
                (Builtin::Bool, Value::List(_) | Value::Map(_)) => Ok(bool_value(value.truthy()?)),
                _ => Ok(Value::Scalar(convert_scalar(builtin, value.into_scalar()?)?)),
            }
        }
    }
}

fn convert_scalar(target: Builtin, value: Scalar) -> Result<Scalar> {
    match target {
        Builtin::Int => match value {
            Scalar::Int(i) => Ok(Scalar::Int(i)),
            Scalar::Float(f) if f.is_finite() => Ok(Scalar::Int(f.trunc() as i64)),
            Scalar::Bool(b) => Ok(Scalar::Int(b as i64)),
            Scalar::Str(ref s) => s
                .trim()
                .parse::<i64>()
                .map(Scalar::Int)
                .map_err(|_| eval_err(format!("invalid literal for int(): '{}'", s))),
            other => Err(eval_err(format!("cannot convert {} to int", other))),
        },
        Builtin::Float => match value {
            Scalar::Str(ref s) => s
                .trim()
                .parse::<f64>()
                .map(Scalar::Float)
                .map_err(|_| eval_err(format!("could not convert string to float: '{}'", s))),
            Scalar::Null => Ok(Scalar::Null),
            other => other
                .as_f64()
                .map(Scalar::Float)
                .ok_or_else(|| eval_err("cannot convert to float")),
        },
        Builtin::Str => Ok(Scalar::Str(value.to_string())),
        Builtin::Bool => Ok(Scalar::Bool(value.truthy())),
        _ => Err(eval_err("unsupported conversion")),
    }
}

fn round_scalar(value: Scalar, digits: Option<i64>) -> Result<Scalar> {
    match (value, digits) {
        (Scalar::Null, _) => Ok(Scalar::Null),
        (Scalar::Int(i), _) => Ok(Scalar::Int(i)),
        (Scalar::Float(f), None) => Ok(Scalar::Int(f.round_ties_even() as i64)),
        (Scalar::Float(f), Some(d)) => {
            let factor = 10f64.powi(d.clamp(-15, 15) as i32);
            Ok(Scalar::Float((f * factor).round_ties_even() / factor))
        }
        (other, _) => Err(eval_err(format!("type {} doesn't define __round__", other))),
    }
}

fn abs_scalar(value: Scalar) -> Result<Scalar> {
    match value {
        Scalar::Null => Ok(Scalar::Null),
        Scalar::Int(i) => Ok(Scalar::Int(i.saturating_abs())),
        Scalar::Float(f) => Ok(Scalar::Float(f.abs())),
        Scalar::Bool(b) => Ok(Scalar::Int(b as i64)),
        other => Err(eval_err(format!("bad operand type for abs(): '{}'", other))),
    }
}

// ---------------------------------------------------------------------------
// Operators
// ---------------------------------------------------------------------------

fn subscript(target: Value, index: Value) -> Result<Value> {
    match (target, index) {
        (Value::Frame(df), Value::Scalar(Scalar::Str(name))) => df
            .column(&name)
            .map(|s| Value::Series(s.clone()))
            .map_err(|_| eval_err(format!("column '{}' not found", name))),
        (Value::Frame(df), Value::List(items)) => {
            let names = items
                .into_iter()
                .map(|v| match v {
                    Value::Scalar(Scalar::Str(s)) => Ok(s),
                    other => Err(eval_err(format!("column names must be strings, got {}", other.type_name()))),
                })
                .collect::<Result<Vec<_>>>()?;
            for name in &names {
                if df.column(name).is_err() {
                    return Err(eval_err(format!("column '{}' not found", name)));
                }
            }
            Ok(Value::Frame(df.select(names)?))
        }
        (Value::Frame(df), Value::Series(mask)) => Ok(Value::Frame(df.filter(mask.bool()?)?)),
        (Value::Series(s), Value::Series(mask)) => Ok(Value::Series(s.filter(mask.bool()?)?)),
        (Value::Series(s), Value::Scalar(Scalar::Int(i))) => {
            let pos = wrap_index(i, s.len())?;
            Ok(Value::Scalar(Scalar::from_any(s.get(pos)?)))
        }
        (Value::List(items), Value::Scalar(Scalar::Int(i))) => {
            let pos = wrap_index(i, items.len())?;
            Ok(items[pos].clone())
        }
        (Value::Map(entries), Value::Scalar(key)) => {
            let key = key.to_string();
            entries
                .into_iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| Value::Scalar(v))
                .ok_or_else(|| eval_err(format!("key '{}' not found", key)))
        }
        (Value::Scalar(Scalar::Str(s)), Value::Scalar(Scalar::Int(i))) => {
            let chars: Vec<char> = s.chars().collect();
            let pos = wrap_index(i, chars.len())?;
            Ok(Value::Scalar(Scalar::Str(chars[pos].to_string())))
        }
        (target, index) => Err(eval_err(format!(
            "'{}' object cannot be indexed by {}",
            target.type_name(),
            index.type_name()
        ))),
    }
}

fn wrap_index(i: i64, len: usize) -> Result<usize> {
    let pos = if i < 0 { len as i64 + i } else { i };
    if pos < 0 || pos as usize >= len {
        return Err(eval_err(format!("index {} is out of bounds for length {}", i, len)));
    }
    Ok(pos as usize)
}

fn unary(op: UnaryOp, value: Value) -> Result<Value> {
    match (op, value) {
        (UnaryOp::Not, value) => Ok(bool_value(!value.truthy()?)),
        (UnaryOp::Invert, Value::Series(s)) => Ok(Value::Series((!s.bool()?).into_series())),
        (UnaryOp::Invert, Value::Scalar(Scalar::Bool(b))) => Ok(bool_value(!b)),
        (UnaryOp::Invert, Value::Scalar(Scalar::Int(i))) => Ok(Value::Scalar(Scalar::Int(!i))),
        (UnaryOp::Neg, Value::Scalar(s)) => Ok(Value::Scalar(scalar_binary(BinaryOp::Sub, Scalar::Int(0), s)?)),
        (UnaryOp::Neg, value @ Value::Series(_)) => binary(BinaryOp::Sub, Value::Scalar(Scalar::Int(0)), value),
        (op, value) => Err(eval_err(format!(
            "bad operand type for unary {:?}: '{}'",
            op,
            value.type_name()
        ))),
    }
}

fn binary(op: BinaryOp, left: Value, right: Value) -> Result<Value> {
    match (left, right) {
        (Value::Scalar(l), Value::Scalar(r)) => Ok(Value::Scalar(scalar_binary(op, l, r)?)),
        (Value::Series(l), Value::Series(r)) => series_binary(op, Operand::Column(l), Operand::Column(r)),
        (Value::Series(l), Value::Scalar(r)) => series_binary(op, Operand::Column(l), Operand::Literal(r)),
        (Value::Scalar(l), Value::Series(r)) => series_binary(op, Operand::Literal(l), Operand::Column(r)),
        (l, r) => Err(eval_err(format!(
            "unsupported operand types for {:?}: '{}' and '{}'",
            op,
            l.type_name(),
            r.type_name()
        ))),
    }
}

enum Operand {
    Column(Series),
    Literal(Scalar),
}

fn literal(value: &Scalar) -> Result<PolarsExpr> {
    Ok(match value {
        Scalar::Int(i) => lit(*i),
        Scalar::Float(f) => lit(*f),
        Scalar::Str(s) => lit(s.clone()),
        Scalar::Bool(b) => lit(*b),
        Scalar::Null => return Err(eval_err("None can only be compared with == or !=")),
    })
}

/// Element-wise operation with at least one series operand, evaluated as
/// a polars expression over a scratch frame.
fn series_binary(op: BinaryOp, left: Operand, right: Operand) -> Result<Value> {
    let name = match (&left, &right) {
        (Operand::Column(s), _) | (_, Operand::Column(s)) => s.name().to_string(),
        _ => String::new(),
    };

    // `series == None` tests for nulls
    let null_test = match (&left, &right, op) {
        (Operand::Column(s), Operand::Literal(Scalar::Null), BinaryOp::Eq)
        | (Operand::Literal(Scalar::Null), Operand::Column(s), BinaryOp::Eq) => Some(s.is_null()),
        (Operand::Column(s), Operand::Literal(Scalar::Null), BinaryOp::NotEq)
        | (Operand::Literal(Scalar::Null), Operand::Column(s), BinaryOp::NotEq) => Some(s.is_not_null()),
        _ => None,
    };
    if let Some(mask) = null_test {
        let mut out = mask.into_series();
        out.rename(&name);
        return Ok(Value::Series(out));
    }

    let mut columns = Vec::new();
    let mut side = |operand: Operand, alias: &str| -> Result<PolarsExpr> {
        match operand {
            Operand::Column(mut s) => {
                s.rename(alias);
                columns.push(s);
                Ok(col(alias))
            }
            Operand::Literal(v) => literal(&v),
        }
    };
    let l = side(left, LEFT)?;
    let r = side(right, RIGHT)?;
    if columns.len() == 2 && columns[0].len() != columns[1].len() {
        return Err(eval_err(format!(
            "operands have different lengths ({} vs {})",
            columns[0].len(),
            columns[1].len()
        )));
    }

    let expr = match op {
        BinaryOp::Add => l + r,
        BinaryOp::Sub => l - r,
        BinaryOp::Mul => l * r,
        BinaryOp::Div => l.cast(DataType::Float64) / r.cast(DataType::Float64),
        BinaryOp::Mod => l % r,
        BinaryOp::Eq => l.eq(r),
        BinaryOp::NotEq => l.neq(r),
        BinaryOp::Lt => l.lt(r),
        BinaryOp::Le => l.lt_eq(r),
        BinaryOp::Gt => l.gt(r),
        BinaryOp::Ge => l.gt_eq(r),
        BinaryOp::BitAnd => l.and(r),
        BinaryOp::BitOr => l.or(r),
        BinaryOp::And | BinaryOp::Or => {
            return Err(eval_err(
                "the truth value of a Series is ambiguous; use & | ~ instead of and/or/not",
            ))
        }
    };

    let out = DataFrame::new(columns)?.lazy().select([expr.alias(OUT)]).collect()?;
    let mut result = out.column(OUT)?.clone();
    result.rename(&name);
    Ok(Value::Series(result))
}

fn scalar_binary(op: BinaryOp, left: Scalar, right: Scalar) -> Result<Scalar> {
    use Scalar::*;
    let mismatch = |l: &Scalar, r: &Scalar| {
        eval_err(format!("unsupported operand values for {:?}: {:?} and {:?}", op, l, r))
    };
    match op {
        BinaryOp::Eq => return Ok(Bool(left.loose_eq(&right))),
        BinaryOp::NotEq => return Ok(Bool(!left.loose_eq(&right))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let comparable = matches!(
                (&left, &right),
                (Str(_), Str(_)) | (Int(_) | Float(_) | Bool(_), Int(_) | Float(_) | Bool(_))
            );
            if !comparable {
                return Err(mismatch(&left, &right));
            }
            let ord = left.sort_cmp(&right);
            return Ok(Bool(match op {
                BinaryOp::Lt => ord.is_lt(),
                BinaryOp::Le => ord.is_le(),
                BinaryOp::Gt => ord.is_gt(),
                _ => ord.is_ge(),
            }));
        }
        BinaryOp::BitAnd | BinaryOp::BitOr => {
            return match (&left, &right) {
                (Bool(a), Bool(b)) => Ok(Bool(if op == BinaryOp::BitAnd { *a && *b } else { *a || *b })),
                (Int(a), Int(b)) => Ok(Int(if op == BinaryOp::BitAnd { a & b } else { a | b })),
                _ => Err(mismatch(&left, &right)),
            };
        }
        BinaryOp::And => return Ok(if left.truthy() { right } else { left }),
        BinaryOp::Or => return Ok(if left.truthy() { left } else { right }),
        _ => {}
    }

    match (&left, &right) {
        (Str(a), Str(b)) if op == BinaryOp::Add => Ok(Str(format!("{}{}", a, b))),
        (Int(a), Int(b)) => match op {
            BinaryOp::Add => a.checked_add(*b).map(Int).ok_or_else(|| eval_err("integer overflow")),
            BinaryOp::Sub => a.checked_sub(*b).map(Int).ok_or_else(|| eval_err("integer overflow")),
            BinaryOp::Mul => a.checked_mul(*b).map(Int).ok_or_else(|| eval_err("integer overflow")),
            BinaryOp::Div if *b == 0 => Err(eval_err("division by zero")),
            BinaryOp::Div => Ok(Float(*a as f64 / *b as f64)),
            BinaryOp::Mod if *b == 0 => Err(eval_err("integer modulo by zero")),
            _ => {
                // result takes the sign of the divisor
                let r = a % b;
                Ok(Int(if r != 0 && (r < 0) != (*b < 0) { r + b } else { r }))
            }
        },
        _ => {
            let (a, b) = match (left.as_f64(), right.as_f64()) {
                (Some(a), Some(b)) if !matches!(left, Str(_)) && !matches!(right, Str(_)) => (a, b),
                _ => return Err(mismatch(&left, &right)),
            };
            match op {
                BinaryOp::Add => Ok(Float(a + b)),
                BinaryOp::Sub => Ok(Float(a - b)),
                BinaryOp::Mul => Ok(Float(a * b)),
                BinaryOp::Div if b == 0.0 => Err(eval_err("division by zero")),
                BinaryOp::Div => Ok(Float(a / b)),
                BinaryOp::Mod if b == 0.0 => Err(eval_err("float modulo by zero")),
                _ => Ok(Float(a.rem_euclid(b))),
            }
        }
    }
}
