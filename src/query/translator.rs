//! Natural-Language Query Translator
//!
//! Bounded model loop producing one safe SELECT for an utterance:
//! predictive delegation for churn questions, at most
//! `max_model_attempts` generations, post-processing of the accepted
//! candidate, and the heuristic builder when every attempt is rejected.

use crate::config::{AppConfig, IntentKeywords, PredictiveThresholds, SamplingConfig, TranslatorLimits};
use crate::intent::IntentClassifier;
use crate::llm::{GenerationOptions, LanguageModel};
use crate::query::heuristic::HeuristicQueryBuilder;
use crate::query::predictive::PredictiveTargeting;
use crate::query::rewrite::{ensure_distinct, ensure_limit, replace_select_star, select_distinct_where};
use crate::query::safety::check_candidate;
use crate::query::sanitize::sanitize_sql;
use crate::query::{CandidateQuery, QueryOrigin};
use crate::schema::SchemaDescriptor;
use crate::targeting::TargetingIntent;
use itertools::Itertools;
use tracing::{debug, info, warn};

pub struct QueryTranslator {
    keywords: IntentKeywords,
    classifier: IntentClassifier,
    limits: TranslatorLimits,
    sampling: SamplingConfig,
    heuristic: HeuristicQueryBuilder,
    predictive: PredictiveTargeting,
}

impl QueryTranslator {
    pub fn new(
        keywords: IntentKeywords,
        limits: TranslatorLimits,
        thresholds: PredictiveThresholds,
        sampling: SamplingConfig,
    ) -> Self {
        Self {
            classifier: IntentClassifier::new(&keywords),
            keywords,
            limits,
            sampling,
            heuristic: HeuristicQueryBuilder::new(limits),
            predictive: PredictiveTargeting::new(limits, thresholds, sampling),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.keywords.clone(), config.limits, config.thresholds, config.sampling)
    }

    pub fn heuristic(&self) -> &HeuristicQueryBuilder {
        &self.heuristic
    }

    /// Produces a candidate for `utterance` against `table`. Never fails:
    /// the heuristic builder answers when the model cannot. Callers must
    /// still validate the result before executing it.
    pub async fn translate(
        &self,
        utterance: &str,
        table: &str,
        schema: &SchemaDescriptor,
        model: &dyn LanguageModel,
        prior_error: Option<&str>,
    ) -> CandidateQuery {
        if self.classifier.is_risk_query(utterance) && !self.classifier.has_risk_column(schema) {
            info!("Churn-risk question without a risk column; using predictive targeting");
            return self.predictive.build_predictive(table, schema, model).await;
        }

        let intent = TargetingIntent::derive(utterance, schema, &self.keywords, &self.limits);
        debug!(
            "Targeting intent: {} values, identifiers {:?}, requested {:?}, presence {:?}",
            intent.values.len(),
            intent.identifier_columns,
            intent.requested_columns,
            intent.presence_columns
        );

        let base_prompt = self.build_prompt(utterance, table, schema, &intent);
        for attempt in 1..=self.limits.max_model_attempts {
            let prompt = match (attempt, prior_error) {
                (1, Some(err)) => format!(
                    "{}\n\nThe previous query failed with this error:\n{}\nReturn a corrected query.",
                    base_prompt, err
                ),
                (1, None) => base_prompt.clone(),
                _ => format!(
                    "{}\n\nIf you are unsure about exact column names, use LIKE-based filters on the identifier columns listed above and add LIMIT {}.",
                    base_prompt, self.limits.row_limit
                ),
            };

            info!("Translation attempt {} of {}", attempt, self.limits.max_model_attempts);
            let options = GenerationOptions::with_temperature(self.sampling.for_attempt(attempt));
            let raw = match model.generate(&prompt, &options).await {
                Ok(raw) => raw,
                Err(e) => {
                    warn!("Model call failed on attempt {}: {}", attempt, e);
                    continue;
                }
            };

            let sql = sanitize_sql(&raw);
            match check_candidate(&sql, table) {
                Ok(profile) => {
                    let sql = self.post_process(&sql, table, &intent, profile.has_filter);
                    info!("Accepted model candidate: {}", sql);
                    return CandidateQuery::new(sql, QueryOrigin::Model { attempt });
                }
                Err(e) => warn!("Candidate rejected on attempt {}: {}", attempt, e),
            }
        }

        self.fallback(utterance, table, schema, &intent)
    }

    fn build_prompt(&self, utterance: &str, table: &str, schema: &SchemaDescriptor, intent: &TargetingIntent) -> String {
        let list = |items: &[String]| {
            if items.is_empty() {
                "(none)".to_string()
            } else {
                items.iter().join(", ")
            }
        };
        let values: Vec<String> = intent.values.iter().map(|v| v.text.clone()).collect();

        format!(
            r#"You translate questions about a single SQLite table into one SQL query.

Rules:
- Return exactly one read-only SELECT statement and nothing else.
- Query only the table `{table}` and use that exact name.
- When unsure of exact values, prefer partial matching (LIKE '%value%') over equality.
- Select only the columns the question asks for, with SELECT DISTINCT.
- Cap unfiltered scans with LIMIT {limit}.
- Never modify data or schema.

Table definition:
{ddl}

Likely identifier columns: {identifiers}
Values mentioned by the user: {values}
Columns the user asked for: {requested}
Columns that must be non-empty: {presence}

Question: {utterance}
SQL:"#,
            table = table,
            limit = self.limits.row_limit,
            ddl = schema.ddl,
            identifiers = list(&intent.identifier_columns),
            values = list(&values),
            requested = list(&intent.requested_columns),
            presence = list(&intent.presence_columns),
            utterance = utterance
        )
    }

    /// Repairs an accepted candidate: synthesizes the targeting filter when
    /// the model left it out, narrows `*` to the requested columns and
    /// forces DISTINCT plus a row cap.
    fn post_process(&self, sql: &str, table: &str, intent: &TargetingIntent, has_filter: bool) -> String {
        let mut sql = sql.to_string();
        if !has_filter && intent.has_filters() {
            if let Some(clause) = intent.filter_clause(&self.limits) {
                debug!("Candidate lacked a filter; synthesizing one from extracted values");
                sql = select_distinct_where(table, &intent.requested_columns, &clause, self.limits.row_limit);
            }
        }
        let sql = replace_select_star(&sql, &intent.requested_columns);
        ensure_limit(&ensure_distinct(&sql), self.limits.row_limit)
    }

    fn fallback(&self, utterance: &str, table: &str, schema: &SchemaDescriptor, intent: &TargetingIntent) -> CandidateQuery {
        if let Some(sql) = self.heuristic.build_targeted(intent, table) {
            warn!("Model attempts exhausted; using targeted fallback");
            return CandidateQuery::new(sql, QueryOrigin::TargetedFallback);
        }
        warn!("Model attempts exhausted; using heuristic fallback");
        let sql = self.heuristic.build_fallback(utterance, table, schema);
        let sql = ensure_distinct(&replace_select_star(&sql, &intent.requested_columns));
        CandidateQuery::new(sql, QueryOrigin::HeuristicFallback)
    }
}
