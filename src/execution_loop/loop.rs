//! Execution Loop
//!
//! Bounded translate-validate-execute loop. Each failed execution is
//! classified and handed to the next translation as a repair hint.

use crate::error::{AssistantError, Result};
use crate::execution::{QueryGateway, QueryResult};
use crate::execution_loop::error_classifier::ErrorClassifier;
use crate::llm::LanguageModel;
use crate::query::safety::check_candidate;
use crate::query::{CandidateQuery, QueryTranslator};
use crate::schema::SchemaDescriptor;
use tracing::{info, warn};

/// A candidate that executed successfully.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub candidate: CandidateQuery,
    pub result: QueryResult,
    pub attempts: usize,
}

pub struct ExecutionLoop {
    max_attempts: usize,
    error_classifier: ErrorClassifier,
}

impl ExecutionLoop {
    pub fn new(max_attempts: usize) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            error_classifier: ErrorClassifier::new(),
        }
    }

    /// Execute with retry logic. Returns the last error once every attempt
    /// failed; non-repairable errors (e.g. the store going away) abort
    /// immediately.
    pub async fn execute_with_retry(
        &self,
        utterance: &str,
        table: &str,
        schema: &SchemaDescriptor,
        translator: &QueryTranslator,
        model: &dyn LanguageModel,
        gateway: &dyn QueryGateway,
    ) -> Result<ExecutionOutcome> {
        let mut repair_hint: Option<String> = None;
        let mut last_error: Option<AssistantError> = None;

        for attempt in 1..=self.max_attempts {
            info!("Execution attempt {} of {}", attempt, self.max_attempts);

            let candidate = translator
                .translate(utterance, table, schema, model, repair_hint.as_deref())
                .await;
            info!("Candidate from {}: {}", candidate.origin, candidate.sql);

            let outcome = match check_candidate(&candidate.sql, table) {
                Ok(_) => gateway.execute(&candidate.sql).await,
                Err(e) => Err(e),
            };

            match outcome {
                Ok(result) => {
                    info!("Execution succeeded on attempt {} ({} rows)", attempt, result.row_count());
                    return Ok(ExecutionOutcome {
                        candidate,
                        result,
                        attempts: attempt,
                    });
                }
                Err(e) if e.is_repairable() => {
                    let class = self.error_classifier.classify(&e);
                    warn!("Attempt {} failed ({}): {}", attempt, class, e);
                    repair_hint = Some(self.error_classifier.repair_hint(&e, table));
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| {
            AssistantError::Execution(format!("Max execution attempts ({}) exceeded", self.max_attempts))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IntentKeywords, PredictiveThresholds, SamplingConfig, TranslatorLimits};
    use crate::execution::Row;
    use crate::llm::GenerationOptions;
    use crate::schema::ColumnDef;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct EchoModel {
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LanguageModel for EchoModel {
        async fn generate(&self, prompt: &str, _options: &GenerationOptions) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok("SELECT Name FROM t".to_string())
        }
    }

    /// Fails the first `failures` executions with a store-style error.
    struct FlakyGateway {
        failures: Mutex<usize>,
        fatal: bool,
    }

    #[async_trait]
    impl QueryGateway for FlakyGateway {
        async fn execute(&self, _sql: &str) -> Result<QueryResult> {
            let mut remaining = self.failures.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                if self.fatal {
                    return Err(AssistantError::UpstreamUnavailable("store gone".into()));
                }
                return Err(AssistantError::Execution("no such column: Nme".into()));
            }
            Ok(QueryResult {
                columns: vec!["Name".into()],
                rows: vec![Row::new(vec![("Name".into(), serde_json::json!("Riya"))])],
                execution_time_ms: 0,
            })
        }
    }

    fn translator() -> QueryTranslator {
        QueryTranslator::new(
            IntentKeywords::default(),
            TranslatorLimits::default(),
            PredictiveThresholds::default(),
            SamplingConfig::default(),
        )
    }

    fn schema() -> SchemaDescriptor {
        SchemaDescriptor::new("t", vec![ColumnDef::new("Name", "TEXT")])
    }

    #[tokio::test]
    async fn test_second_attempt_receives_repair_hint() {
        let model = EchoModel { prompts: Mutex::new(Vec::new()) };
        let gateway = FlakyGateway { failures: Mutex::new(1), fatal: false };
        let outcome = ExecutionLoop::new(2)
            .execute_with_retry("list names", "t", &schema(), &translator(), &model, &gateway)
            .await
            .unwrap();
        assert_eq!(outcome.attempts, 2);
        let prompts = model.prompts.lock().unwrap();
        assert!(!prompts[0].contains("no such column"));
        assert!(prompts[1].contains("no such column: Nme"));
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_store_error() {
        let model = EchoModel { prompts: Mutex::new(Vec::new()) };
        let gateway = FlakyGateway { failures: Mutex::new(5), fatal: false };
        let err = ExecutionLoop::new(2)
            .execute_with_retry("list names", "t", &schema(), &translator(), &model, &gateway)
            .await
            .unwrap_err();
        assert!(matches!(err, AssistantError::Execution(ref m) if m.contains("no such column")));
    }

    #[tokio::test]
    async fn test_unavailable_store_aborts_without_retry() {
        let model = EchoModel { prompts: Mutex::new(Vec::new()) };
        let gateway = FlakyGateway { failures: Mutex::new(5), fatal: true };
        let err = ExecutionLoop::new(2)
            .execute_with_retry("list names", "t", &schema(), &translator(), &model, &gateway)
            .await
            .unwrap_err();
        assert!(matches!(err, AssistantError::UpstreamUnavailable(_)));
        assert_eq!(model.prompts.lock().unwrap().len(), 1);
    }
}
