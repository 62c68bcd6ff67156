//! Data Assistant - conversational front door over one uploaded table
//!
//! Per turn the assistant:
//! 1. Classifies the utterance (risk, availability, show-data, general)
//! 2. Picks a route: persisted store, in-memory table or plain conversation
//! 3. Runs the translate/execute loop or the safe expression evaluator
//! 4. Summarizes the result with the model
//!
//! Failures on the data routes never reach the user as raw errors: the
//! store route degrades to the in-memory route, and both degrade to a
//! general answer.

use crate::config::{AppConfig, SamplingConfig, TranslatorLimits};
use crate::db::SqliteStore;
use crate::error::{AssistantError, Result};
use crate::evaluator::{EvalValue, SafeEvaluator};
use crate::execution::SqliteGateway;
use crate::execution_loop::{ExecutionLoop, ExecutionOutcome};
use crate::intent::{Classification, IntentClassifier, IntentTag, SummaryIntent};
use crate::llm::{GenerationOptions, LanguageModel, LlmClient, UnavailableModel};
use crate::query::sanitize::sanitize_expression;
use crate::query::{QueryOrigin, QueryTranslator};
use crate::schema::{SchemaDescriptor, SchemaIntrospector};
use crate::session::{ChatMessage, Role, SessionContext};
use itertools::Itertools;
use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

pub const GENERAL_FALLBACK: &str = "I'm not sure yet, but I can look it up if you provide more details.";

const CONTEXT_TURNS: usize = 3;
const SAMPLE_ROWS: usize = 5;

/// Response from the data assistant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantResponse {
    pub response_type: ResponseType,
    pub route: Route,
    /// Natural language answer
    pub answer: String,
    /// SQL or expression behind the answer
    pub query: Option<String>,
    #[serde(skip)]
    pub result: Option<EvalValue>,
    pub meta: Option<String>,
    /// Render the full result under the answer
    pub show_data: bool,
    pub reasoning_steps: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseType {
    /// Direct conversational answer
    Answer,
    /// Answer backed by a query or expression result
    QueryResult,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Route {
    DbPath,
    MemoryPath,
    GeneralPath,
}

/// What the router looks at for one turn.
#[derive(Debug, Clone, Copy)]
pub struct RouteInputs {
    /// Store reachable and the current table synced into it.
    pub store_ready: bool,
    pub has_frame: bool,
    pub general: bool,
    pub availability: bool,
}

pub fn choose_route(inputs: RouteInputs) -> Route {
    if inputs.store_ready && (inputs.has_frame || !inputs.general || inputs.availability) {
        Route::DbPath
    } else if !inputs.store_ready && inputs.has_frame && !inputs.general {
        Route::MemoryPath
    } else {
        Route::GeneralPath
    }
}

/// Rows selected for a campaign preview.
#[derive(Debug, Clone)]
pub struct TargetSelection {
    pub query: String,
    pub frame: DataFrame,
}

pub struct DataAssistant {
    model: Arc<dyn LanguageModel>,
    store: Option<SqliteStore>,
    translator: QueryTranslator,
    classifier: IntentClassifier,
    evaluator: SafeEvaluator,
    execution_loop: ExecutionLoop,
    limits: TranslatorLimits,
    sampling: SamplingConfig,
}

impl DataAssistant {
    pub fn new(config: &AppConfig, model: Arc<dyn LanguageModel>, store: Option<SqliteStore>) -> Self {
        Self {
            model,
            store,
            translator: QueryTranslator::from_config(config),
            classifier: IntentClassifier::new(&config.keywords),
            evaluator: SafeEvaluator::new(),
            execution_loop: ExecutionLoop::new(config.limits.max_execution_attempts),
            limits: config.limits,
            sampling: config.sampling,
        }
    }

    /// Wires the model client and store from configuration. Either one
    /// failing to build only disables the routes that need it.
    pub fn from_config(config: &AppConfig) -> Self {
        let model: Arc<dyn LanguageModel> = match LlmClient::from_config(config) {
            Ok(client) => Arc::new(client),
            Err(e) => {
                warn!("Model unavailable: {}", e);
                Arc::new(UnavailableModel::new(e.to_string()))
            }
        };
        let store = config.db_path.as_ref().and_then(|path| match SqliteStore::open(path) {
            Ok(store) => Some(store),
            Err(e) => {
                warn!("Persisted store unavailable: {}", e);
                None
            }
        });
        Self::new(config, model, store)
    }

    pub fn store(&self) -> Option<&SqliteStore> {
        self.store.as_ref()
    }

    pub fn model(&self) -> &dyn LanguageModel {
        self.model.as_ref()
    }

    pub fn limits(&self) -> &TranslatorLimits {
        &self.limits
    }

    /// Answers one turn and appends it to the session's message log.
    pub async fn answer(&self, session: &mut SessionContext, utterance: &str) -> AssistantResponse {
        info!("Data Assistant: Processing question: {}", utterance);
        let response = self.respond(session, utterance).await;

        session.push_message(ChatMessage::user(utterance));
        let mut reply = ChatMessage::assistant(response.answer.clone());
        reply.query = response.query.clone();
        reply.show_data = response.show_data;
        reply.meta = response.meta.clone();
        reply.result = response.result.clone();
        session.push_message(reply);

        response
    }

    async fn respond(&self, session: &SessionContext, utterance: &str) -> AssistantResponse {
        let mut steps = Vec::new();
        let store_ready = self.store_ready(session);
        let schema = match (store_ready, session.current_table()) {
            (true, Some(table)) => self.fetch_schema(table),
            _ => None,
        };

        let known_columns: Vec<String> = match (session.frame(), &schema) {
            (Some(frame), _) => frame.get_column_names().iter().map(|c| c.to_string()).collect(),
            (None, Some(schema)) => schema.column_names().iter().map(|c| c.to_string()).collect(),
            (None, None) => Vec::new(),
        };
        let known: Vec<&str> = known_columns.iter().map(|c| c.as_str()).collect();
        let classification = self.classifier.classify(utterance, &known);

        let route = choose_route(RouteInputs {
            store_ready,
            has_frame: session.frame().is_some(),
            general: classification.is_general(),
            availability: classification.has(IntentTag::DataAvailability),
        });
        info!("Route: {:?} (tags {:?})", route, classification.tags);
        steps.push(format!("Routed to {:?}", route));

        match route {
            Route::DbPath => {
                match self
                    .db_path(session, schema.as_ref(), utterance, &classification, &mut steps)
                    .await
                {
                    Ok(response) => return response,
                    Err(e) => {
                        warn!("Store route failed: {}", e);
                        steps.push(format!("Store route failed: {}", e));
                    }
                }
                if session.frame().is_some() {
                    match self.memory_path(session, utterance, &classification, &mut steps).await {
                        Ok(response) => return response,
                        Err(e) => {
                            warn!("In-memory route failed: {}", e);
                            steps.push(format!("In-memory route failed: {}", e));
                        }
                    }
                }
            }
            Route::MemoryPath => match self.memory_path(session, utterance, &classification, &mut steps).await {
                Ok(response) => return response,
                Err(e) => {
                    warn!("In-memory route failed: {}", e);
                    steps.push(format!("In-memory route failed: {}", e));
                }
            },
            Route::GeneralPath => {}
        }

        self.general_path(utterance, steps).await
    }

    fn store_ready(&self, session: &SessionContext) -> bool {
        match &self.store {
            Some(store) => session.current_table().is_some() && session.is_synced() && store.is_reachable(),
            None => false,
        }
    }

    fn fetch_schema(&self, table: &str) -> Option<SchemaDescriptor> {
        let store = self.store.as_ref()?;
        match SchemaIntrospector::new(store).fetch(table) {
            Ok(schema) => schema,
            Err(e) => {
                warn!("Schema lookup for {} failed: {}", table, e);
                None
            }
        }
    }

    async fn run_db_query(
        &self,
        session: &SessionContext,
        schema: Option<&SchemaDescriptor>,
        utterance: &str,
    ) -> Result<ExecutionOutcome> {
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| AssistantError::UpstreamUnavailable("no persisted store configured".into()))?;
        let table = session
            .current_table()
            .ok_or_else(|| AssistantError::Schema("no table has been uploaded".into()))?;
        let schema = schema
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AssistantError::Schema(format!("table {} has no definition in the store", table)))?;
        let gateway = SqliteGateway::new(store.clone());
        self.execution_loop
            .execute_with_retry(utterance, table, schema, &self.translator, self.model.as_ref(), &gateway)
            .await
    }

    async fn db_path(
        &self,
        session: &SessionContext,
        schema: Option<&SchemaDescriptor>,
        utterance: &str,
        classification: &Classification,
        steps: &mut Vec<String>,
    ) -> Result<AssistantResponse> {
        let outcome = self.run_db_query(session, schema, utterance).await?;
        steps.push(format!(
            "Executed {} query after {} attempt(s)",
            outcome.candidate.origin, outcome.attempts
        ));

        let frame = outcome.result.to_dataframe()?;
        let meta = outcome.result.meta();
        let intent = classification.summary_intent();
        let show_data = classification.has(IntentTag::ShowData) && frame.height() > 0;
        let predictive = matches!(
            outcome.candidate.origin,
            QueryOrigin::Predictive | QueryOrigin::PredictiveFallback
        );
        let preview = format!("{}", frame.head(Some(self.limits.preview_rows)));
        let prompt = self.summary_prompt(utterance, intent, &preview, &meta, predictive);
        let answer = self.summarize(&prompt, || {
            if predictive {
                format!("{} Selected from proxy churn-risk signals.", meta)
            } else {
                meta.clone()
            }
        })
        .await;

        Ok(AssistantResponse {
            response_type: ResponseType::QueryResult,
            route: Route::DbPath,
            answer,
            query: Some(outcome.candidate.sql),
            result: Some(EvalValue::Frame(frame)),
            meta: Some(meta),
            show_data,
            reasoning_steps: steps.clone(),
        })
    }

    fn summary_prompt(
        &self,
        utterance: &str,
        intent: SummaryIntent,
        preview: &str,
        meta: &str,
        predictive: bool,
    ) -> String {
        let mut prompt = match intent {
            SummaryIntent::Availability => format!(
                "The user asked whether matching data exists.\n\nQuestion: {}\nResult: {}\nPreview:\n{}\n\nIn 1-2 sentences, say whether matching data is available and roughly how much. Do not list individual records.",
                utterance, meta, preview
            ),
            SummaryIntent::ShowData => format!(
                "The user asked to see the matching records. They are shown in full below your reply.\n\nQuestion: {}\nResult: {}\n\nWrite one short sentence introducing the records. Do not repeat them.",
                utterance, meta
            ),
            SummaryIntent::Analytical => format!(
                "Answer the user's question using only the query result below.\n\nQuestion: {}\nResult: {}\nPreview (first {} rows):\n{}\n\nAnswer in 2-3 sentences. If the result is empty, say that no matching data was found.",
                utterance, meta, self.limits.preview_rows, preview
            ),
        };
        if predictive {
            prompt.push_str(
                "\n\nNote: the data has no explicit churn label. These customers were selected from proxy risk signals such as low engagement, payment problems or complaints. Mention this briefly.",
            );
        }
        prompt
    }

    async fn summarize(&self, prompt: &str, fallback: impl FnOnce() -> String) -> String {
        match self.model.generate(prompt, &GenerationOptions::default()).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => fallback(),
            Err(e) => {
                warn!("Summary generation failed: {}", e);
                fallback()
            }
        }
    }

    /// Asks the model for an expression and evaluates it, feeding any
    /// evaluation error into the next attempt.
    async fn evaluate_with_retry(
        &self,
        session: &SessionContext,
        frame: &DataFrame,
        utterance: &str,
    ) -> Result<(String, EvalValue)> {
        let mut prior_error: Option<String> = None;
        let mut last_error: Option<AssistantError> = None;

        for attempt in 1..=self.limits.max_execution_attempts {
            info!("Expression attempt {} of {}", attempt, self.limits.max_execution_attempts);
            let prompt = self.expression_prompt(utterance, frame, session, prior_error.as_deref());
            let options = GenerationOptions::with_temperature(self.sampling.for_attempt(attempt));
            let raw = self.model.generate(&prompt, &options).await?;
            let expression = sanitize_expression(&raw);

            match self.evaluator.evaluate(&expression, frame) {
                Ok(value) => return Ok((expression, value)),
                Err(e) => {
                    warn!("Expression `{}` failed: {}", expression, e);
                    prior_error = Some(format!("`{}` failed with: {}", expression, e));
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| AssistantError::Evaluation("no expression attempts were made".into())))
    }

    fn expression_prompt(
        &self,
        utterance: &str,
        frame: &DataFrame,
        session: &SessionContext,
        prior_error: Option<&str>,
    ) -> String {
        let columns = frame
            .get_columns()
            .iter()
            .map(|s| format!("- {} ({})", s.name(), s.dtype()))
            .join("\n");
        let sample = format!("{}", frame.head(Some(SAMPLE_ROWS)));
        let history = session
            .recent_messages(CONTEXT_TURNS)
            .iter()
            .map(|m| {
                let who = match m.role {
                    Role::User => "User",
                    Role::Assistant => "Assistant",
                };
                format!("{}: {}", who, m.content)
            })
            .join("\n");

        let mut prompt = format!(
            r#"You answer questions about a pandas DataFrame named `df`.

Columns:
{columns}

Sample rows:
{sample}

Recent conversation:
{history}

Rules:
- Return ONE single-line pandas expression and nothing else.
- Use only `df`, `np`, `pd` and the builtins len, sum, min, max, round, abs, list, dict, int, float, str, bool.
- No imports, assignments, lambdas or file access.
- For counts return a number, not the rows.

Question: {utterance}
Expression:"#,
            columns = columns,
            sample = sample,
            history = if history.is_empty() { "(none)".to_string() } else { history },
            utterance = utterance
        );
        if let Some(err) = prior_error {
            prompt.push_str(&format!("\n\nThe previous expression failed:\n{}\nReturn a corrected expression.", err));
        }
        prompt
    }

    async fn memory_path(
        &self,
        session: &SessionContext,
        utterance: &str,
        classification: &Classification,
        steps: &mut Vec<String>,
    ) -> Result<AssistantResponse> {
        let frame = session
            .frame()
            .ok_or_else(|| AssistantError::Schema("no in-memory table is loaded".into()))?;
        let (expression, value) = self.evaluate_with_retry(session, frame, utterance).await?;
        steps.push(format!("Evaluated expression: {}", expression));

        let preview = value.preview(self.limits.preview_rows);
        let prompt = format!(
            "Question: {}\nExpression: {}\nResult:\n{}\n\nExplain in 1-2 sentences what this result means for the question.",
            utterance, expression, preview
        );
        let answer = self.summarize(&prompt, || preview.clone()).await;
        let meta = value.row_count().map(|n| format!("Matched {} rows.", n));

        Ok(AssistantResponse {
            response_type: ResponseType::QueryResult,
            route: Route::MemoryPath,
            answer,
            query: Some(expression),
            show_data: classification.has(IntentTag::ShowData) && value.row_count().is_some_and(|n| n > 0),
            result: Some(value),
            meta,
            reasoning_steps: steps.clone(),
        })
    }

    async fn general_path(&self, utterance: &str, mut steps: Vec<String>) -> AssistantResponse {
        info!("Answering as a general question");
        let prompt = format!(
            "You are a friendly assistant inside a customer-data analytics tool. Answer the user's message in 2-4 sentences. If it needs their data, say what you would look up.\n\nMessage: {}",
            utterance
        );
        let answer = self.summarize(&prompt, || GENERAL_FALLBACK.to_string()).await;
        steps.push("Answered without data access".to_string());
        AssistantResponse {
            response_type: ResponseType::Answer,
            route: Route::GeneralPath,
            answer,
            query: None,
            result: None,
            meta: None,
            show_data: false,
            reasoning_steps: steps,
        }
    }

    /// Rows matching a targeting utterance, from the store when the table
    /// is synced, otherwise from the in-memory table.
    pub async fn select_targets(&self, session: &SessionContext, utterance: &str) -> Result<TargetSelection> {
        if self.store_ready(session) {
            let schema = session.current_table().and_then(|t| self.fetch_schema(t));
            match self.run_db_query(session, schema.as_ref(), utterance).await {
                Ok(outcome) => {
                    return Ok(TargetSelection {
                        frame: outcome.result.to_dataframe()?,
                        query: outcome.candidate.sql,
                    })
                }
                Err(e) if session.frame().is_some() => warn!("Store targeting failed, using in-memory table: {}", e),
                Err(e) => return Err(e),
            }
        }

        let frame = session
            .frame()
            .ok_or_else(|| AssistantError::Schema("no table has been uploaded".into()))?;
        let (expression, value) = self.evaluate_with_retry(session, frame, utterance).await?;
        let frame = value
            .as_frame()?
            .ok_or_else(|| AssistantError::Evaluation(format!("`{}` did not select any rows", expression)))?;
        Ok(TargetSelection { query: expression, frame })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(store_ready: bool, has_frame: bool, general: bool, availability: bool) -> RouteInputs {
        RouteInputs {
            store_ready,
            has_frame,
            general,
            availability,
        }
    }

    #[test]
    fn test_route_store_when_ready_and_data_related() {
        assert_eq!(choose_route(inputs(true, false, false, false)), Route::DbPath);
        assert_eq!(choose_route(inputs(true, false, true, true)), Route::DbPath);
        assert_eq!(choose_route(inputs(true, true, true, false)), Route::DbPath);
    }

    #[test]
    fn test_route_memory_without_store() {
        assert_eq!(choose_route(inputs(false, true, false, false)), Route::MemoryPath);
    }

    #[test]
    fn test_route_general() {
        assert_eq!(choose_route(inputs(true, false, true, false)), Route::GeneralPath);
        assert_eq!(choose_route(inputs(false, true, true, false)), Route::GeneralPath);
        assert_eq!(choose_route(inputs(false, false, false, false)), Route::GeneralPath);
    }
}
