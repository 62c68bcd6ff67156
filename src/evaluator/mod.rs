//! Safe Expression Evaluator
//!
//! Evaluates a single pandas-style expression against the in-memory
//! table. Expressions are screened against a deny-list, parsed into a
//! small AST and interpreted; nothing is ever handed to a general-purpose
//! interpreter. Names outside `df`, `np`, `pd` and the basic builtins
//! fail with an evaluation error.

pub mod interpreter;
pub mod lexer;
pub mod parser;
pub mod value;

use crate::error::{AssistantError, Result};
use interpreter::Interpreter;
use parser::parse_expression;
use polars::prelude::DataFrame;
use tracing::{debug, warn};

pub use value::{frame_to_json, EvalValue, Scalar};

/// Substrings that reject an expression outright, compared case-insensitively.
pub const FORBIDDEN_TERMS: &[&str] = &[
    "os.",
    "sys.",
    "subprocess",
    "open(",
    "eval",
    "exec",
    "compile(",
    "__import__",
    "importlib",
    "import ",
    "__",
    "globals(",
    "locals(",
    "getattr",
    "setattr",
    "delattr",
    "vars(",
    "lambda",
    "input(",
    "breakpoint",
];

#[derive(Debug, Clone)]
pub struct SafeEvaluator {
    forbidden: Vec<String>,
}

impl Default for SafeEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl SafeEvaluator {
    pub fn new() -> Self {
        Self {
            forbidden: FORBIDDEN_TERMS.iter().map(|t| t.to_string()).collect(),
        }
    }

    pub fn forbidden_term(&self, expression: &str) -> Option<&str> {
        let lowered = expression.to_lowercase();
        self.forbidden
            .iter()
            .find(|term| lowered.contains(term.as_str()))
            .map(|t| t.as_str())
    }

    /// Evaluates `expression` with `df` bound to `table`.
    pub fn evaluate(&self, expression: &str, table: &DataFrame) -> Result<EvalValue> {
        let expression = expression.trim();
        if let Some(term) = self.forbidden_term(expression) {
            warn!("Rejected expression containing '{}': {}", term, expression);
            return Err(AssistantError::UnsafeExpression(format!(
                "expression contains forbidden term '{}'",
                term
            )));
        }

        let ast = parse_expression(expression)?;
        debug!("Evaluating expression: {}", expression);
        Interpreter::new(table).evaluate(&ast)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;
    use super::Scalar;

    fn customers() -> DataFrame {
        df!(
            "Name" => &["Riya", "Arjun", "Meera", "Riya"],
            "City" => &[Some("Pune"), Some("Delhi"), None, Some("Pune")],
            "Email" => &[Some("riya@x.com"), None, Some("meera@x.com"), Some("riya@x.com")],
            "Age" => &[31i64, 45, 28, 31]
        )
        .unwrap()
    }

    fn scalar(value: EvalValue) -> Scalar {
        match value {
            EvalValue::Scalar(s) => s,
            other => panic!("expected scalar, got {:?}", other),
        }
    }

    #[test]
    fn test_forbidden_terms_rejected_before_parsing() {
        let evaluator = SafeEvaluator::new();
        for expr in [
            "__import__('os').system('ls')",
            "df.__class__",
            "open('/etc/passwd')",
            "eval('1+1')",
            "getattr(df, 'head')",
            "SYS.exit()",
        ] {
            let err = evaluator.evaluate(expr, &customers()).unwrap_err();
            assert!(matches!(err, AssistantError::UnsafeExpression(_)), "{}", expr);
        }
    }

    #[test]
    fn test_unknown_names_are_errors() {
        let err = SafeEvaluator::new().evaluate("pathlib.Path('x')", &customers()).unwrap_err();
        assert!(matches!(err, AssistantError::Evaluation(ref m) if m.contains("not defined")));
    }

    #[test]
    fn test_presence_count() {
        let value = SafeEvaluator::new()
            .evaluate("df['Email'].notna().sum()", &customers())
            .unwrap();
        assert_eq!(scalar(value), Scalar::Int(3));
        let value = SafeEvaluator::new().evaluate("len(df[df['Email'].notna()])", &customers()).unwrap();
        assert_eq!(scalar(value), Scalar::Int(3));
    }

    #[test]
    fn test_mask_filter_with_string_methods() {
        let value = SafeEvaluator::new()
            .evaluate(
                "df[(df['Age'] > 30) & df['City'].str.contains('pune', case=False)][['Name', 'Age']]",
                &customers(),
            )
            .unwrap();
        match value {
            EvalValue::Frame(df) => {
                assert_eq!(df.shape(), (2, 2));
                assert_eq!(df.get_column_names(), vec!["Name", "Age"]);
            }
            other => panic!("expected frame, got {:?}", other),
        }
    }

    #[test]
    fn test_aggregates_and_builtins() {
        let evaluator = SafeEvaluator::new();
        let table = customers();
        assert_eq!(scalar(evaluator.evaluate("df['Age'].max()", &table).unwrap()), Scalar::Int(45));
        assert_eq!(scalar(evaluator.evaluate("round(df['Age'].mean(), 1)", &table).unwrap()), Scalar::Float(33.8));
        assert_eq!(scalar(evaluator.evaluate("df['Name'].nunique()", &table).unwrap()), Scalar::Int(3));
        assert_eq!(scalar(evaluator.evaluate("df.shape[0]", &table).unwrap()), Scalar::Int(4));
        assert_eq!(scalar(evaluator.evaluate("np.median(df['Age'])", &table).unwrap()), Scalar::Float(31.0));
        assert_eq!(scalar(evaluator.evaluate("int('7') + 1", &table).unwrap()), Scalar::Int(8));
    }

    #[test]
    fn test_str_of_series_and_frame_renders_table() {
        let evaluator = SafeEvaluator::new();
        let table = customers();
        match scalar(evaluator.evaluate("str(df['Name'])", &table).unwrap()) {
            Scalar::Str(text) => assert!(text.contains("Meera")),
            other => panic!("expected text, got {:?}", other),
        }
        match scalar(evaluator.evaluate("str(df.head(1))", &table).unwrap()) {
            Scalar::Str(text) => assert!(text.contains("Riya")),
            other => panic!("expected text, got {:?}", other),
        }
    }

    #[test]
    fn test_sort_and_dedupe() {
        let evaluator = SafeEvaluator::new();
        let value = evaluator
            .evaluate("df.drop_duplicates().sort_values('Age', ascending=False).head(2)", &customers())
            .unwrap();
        match value {
            EvalValue::Frame(df) => {
                assert_eq!(df.height(), 2);
                let ages: Vec<Option<i64>> = df.column("Age").unwrap().i64().unwrap().into_iter().collect();
                assert_eq!(ages, vec![Some(45), Some(31)]);
            }
            other => panic!("expected frame, got {:?}", other),
        }
    }

    #[test]
    fn test_value_counts_and_list_results() {
        let evaluator = SafeEvaluator::new();
        match evaluator.evaluate("df['City'].value_counts()", &customers()).unwrap() {
            EvalValue::Frame(df) => {
                assert_eq!(df.height(), 2);
                assert_eq!(df.column("count").unwrap().get(0).unwrap(), AnyValue::Int64(2));
            }
            other => panic!("expected frame, got {:?}", other),
        }
        match evaluator.evaluate("df['Name'].unique().tolist()", &customers()).unwrap() {
            EvalValue::List(items) => assert_eq!(items.len(), 3),
            other => panic!("expected list, got {:?}", other),
        }
    }

    #[test]
    fn test_runtime_errors_are_evaluation_errors() {
        let evaluator = SafeEvaluator::new();
        let table = customers();
        for expr in ["df['Missing']", "df['Age'] and df['Age']", "1 / 0", "df.nope()", "np"] {
            let err = evaluator.evaluate(expr, &table).unwrap_err();
            assert!(matches!(err, AssistantError::Evaluation(_)), "{}: {:?}", expr, err);
        }
    }
}
