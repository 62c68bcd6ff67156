use thiserror::Error;

#[derive(Error, Debug)]
pub enum AssistantError {
    #[error("Unsafe candidate: {0}")]
    UnsafeCandidate(String),

    #[error("Unsafe expression: {0}")]
    UnsafeExpression(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Evaluation error: {0}")]
    Evaluation(String),

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Dispatch error: {0}")]
    Dispatch(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Polars error: {0}")]
    Polars(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl From<rusqlite::Error> for AssistantError {
    fn from(err: rusqlite::Error) -> Self {
        AssistantError::Execution(err.to_string())
    }
}

impl From<polars::error::PolarsError> for AssistantError {
    fn from(err: polars::error::PolarsError) -> Self {
        AssistantError::Polars(err.to_string())
    }
}

impl AssistantError {
    /// Failures the translator/evaluator repair loop is expected to absorb.
    pub fn is_repairable(&self) -> bool {
        matches!(
            self,
            AssistantError::UnsafeCandidate(_)
                | AssistantError::Execution(_)
                | AssistantError::Evaluation(_)
                | AssistantError::Polars(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, AssistantError>;
