//! Predictive Targeting Extension
//!
//! For churn/retention questions on data without an explicit risk label.
//! The model is asked to derive a risk filter from proxy signals; if that
//! fails, a fixed degradation chain takes over:
//!
//! 1. indicator columns (engagement, payment status, complaints) OR-ed together
//! 2. any of the first numeric columns being zero or null
//! 3. an unfiltered bounded scan

use crate::config::{PredictiveThresholds, SamplingConfig, TranslatorLimits};
use crate::llm::{GenerationOptions, LanguageModel};
use crate::query::rewrite::{ensure_distinct, ensure_limit};
use crate::query::safety::check_candidate;
use crate::query::sanitize::sanitize_sql;
use crate::query::{CandidateQuery, QueryOrigin};
use crate::schema::{quote_ident, ColumnDef, SchemaDescriptor};
use itertools::Itertools;
use tracing::{info, warn};

const ENGAGEMENT_MARKERS: &[&str] = &["engagement", "usage", "activity", "score"];
const PAYMENT_MARKERS: &[&str] = &["payment", "status", "overdue", "due"];
const SUPPORT_MARKERS: &[&str] = &["complaint", "ticket", "support", "issue"];
const CHARGE_MARKERS: &[&str] = &["charge", "amount", "cost", "price"];
const PAYMENT_RISK_TERMS: &[&str] = &["fail", "overdue", "pending"];

const MAX_ENGAGEMENT_COLUMNS: usize = 2;
const MAX_ZERO_OR_NULL_COLUMNS: usize = 3;

/// Columns grouped by the risk signal their names suggest.
#[derive(Debug, Default)]
struct IndicatorColumns<'a> {
    engagement: Vec<&'a ColumnDef>,
    payment: Vec<&'a ColumnDef>,
    support: Vec<&'a ColumnDef>,
    charges: Vec<&'a ColumnDef>,
}

impl<'a> IndicatorColumns<'a> {
    fn scan(schema: &'a SchemaDescriptor) -> Self {
        let has = |col: &ColumnDef, markers: &[&str]| {
            let name = col.name.to_lowercase();
            markers.iter().any(|m| name.contains(m))
        };
        let mut found = Self::default();
        for col in &schema.columns {
            if has(col, ENGAGEMENT_MARKERS) {
                found.engagement.push(col);
            }
            if has(col, PAYMENT_MARKERS) {
                found.payment.push(col);
            }
            if has(col, SUPPORT_MARKERS) {
                found.support.push(col);
            }
            if has(col, CHARGE_MARKERS) {
                found.charges.push(col);
            }
        }
        found
    }
}

pub struct PredictiveTargeting {
    limits: TranslatorLimits,
    thresholds: PredictiveThresholds,
    sampling: SamplingConfig,
}

impl PredictiveTargeting {
    pub fn new(limits: TranslatorLimits, thresholds: PredictiveThresholds, sampling: SamplingConfig) -> Self {
        Self {
            limits,
            thresholds,
            sampling,
        }
    }

    /// Model-derived risk query, validated like any other candidate; the
    /// deterministic chain answers when the model fails or misbehaves.
    pub async fn build_predictive(
        &self,
        table: &str,
        schema: &SchemaDescriptor,
        model: &dyn LanguageModel,
    ) -> CandidateQuery {
        let prompt = self.build_prompt(table, schema);
        let options = GenerationOptions::with_temperature(self.sampling.temperature);

        match model.generate(&prompt, &options).await {
            Ok(raw) => {
                let sql = sanitize_sql(&raw);
                match check_candidate(&sql, table) {
                    Ok(_) => {
                        let sql = ensure_limit(&ensure_distinct(&sql), self.limits.row_limit);
                        info!("Predictive query from model: {}", sql);
                        return CandidateQuery::new(sql, QueryOrigin::Predictive);
                    }
                    Err(e) => warn!("Predictive candidate rejected: {}", e),
                }
            }
            Err(e) => warn!("Predictive model call failed: {}", e),
        }

        CandidateQuery::new(self.fallback_predictive(table, schema), QueryOrigin::PredictiveFallback)
    }

    fn build_prompt(&self, table: &str, schema: &SchemaDescriptor) -> String {
        let columns = schema
            .columns
            .iter()
            .map(|c| format!("- {} ({})", c.name, if c.declared_type.is_empty() { "UNTYPED" } else { c.declared_type.as_str() }))
            .join("\n");
        format!(
            r#"You are a customer-retention analyst writing SQLite queries.

The table `{table}` has no explicit churn label. Find customers at risk of churning using proxy signals available in its columns:
- low engagement or usage compared with the column average
- payment status text indicating failed, overdue or pending payments
- complaint or support-ticket counts above normal
- long tenure combined with little recent activity

Columns:
{columns}

Table definition:
{ddl}

Rules:
- Return exactly one SELECT DISTINCT statement over `{table}` and nothing else.
- Use only the columns listed above; quote identifiers with backticks.
- Combine the risk conditions you can support with OR.
- Order the riskiest customers first.
- End with LIMIT {limit}.
- Never modify data or schema.

SQL:"#,
            table = table,
            columns = columns,
            ddl = schema.ddl,
            limit = self.limits.row_limit
        )
    }

    /// Deterministic risk filter. See the module docs for the chain.
    pub fn fallback_predictive(&self, table: &str, schema: &SchemaDescriptor) -> String {
        let tbl = quote_ident(table);
        let indicators = IndicatorColumns::scan(schema);
        let mut conditions: Vec<String> = Vec::new();

        for col in indicators
            .engagement
            .iter()
            .filter(|c| c.is_numeric())
            .take(MAX_ENGAGEMENT_COLUMNS)
        {
            let c = quote_ident(&col.name);
            conditions.push(format!(
                "{c} < (SELECT AVG({c}) * {ratio} FROM {tbl} WHERE {c} IS NOT NULL)",
                c = c,
                ratio = self.thresholds.engagement_ratio,
                tbl = tbl
            ));
        }

        if let Some(col) = indicators.payment.iter().find(|c| c.is_text()) {
            let c = quote_ident(&col.name);
            let terms = PAYMENT_RISK_TERMS
                .iter()
                .map(|t| format!("{} LIKE '%{}%'", c, t))
                .join(" OR ");
            conditions.push(format!("({})", terms));
        }

        if let Some(col) = indicators.support.iter().find(|c| c.is_numeric()) {
            conditions.push(format!("{} > {}", quote_ident(&col.name), self.thresholds.complaint_threshold));
        }

        let conditions: Vec<String> = conditions.into_iter().unique().collect();

        if !conditions.is_empty() {
            let order = indicators
                .charges
                .iter()
                .find(|c| c.is_numeric())
                .map(|c| format!("{} DESC", quote_ident(&c.name)))
                .unwrap_or_else(|| "1".to_string());
            info!("Predictive fallback using {} indicator conditions", conditions.len());
            return format!(
                "SELECT DISTINCT * FROM {} WHERE {} ORDER BY {} LIMIT {}",
                tbl,
                conditions.join(" OR "),
                order,
                self.limits.row_limit
            );
        }

        let numeric = schema.numeric_columns();
        if !numeric.is_empty() {
            let zero_or_null = numeric
                .iter()
                .take(MAX_ZERO_OR_NULL_COLUMNS)
                .map(|col| {
                    let c = quote_ident(&col.name);
                    format!("{c} = 0 OR {c} IS NULL", c = c)
                })
                .join(" OR ");
            info!("Predictive fallback using zero-or-null numeric signal");
            return format!(
                "SELECT DISTINCT * FROM {} WHERE {} LIMIT {}",
                tbl, zero_or_null, self.limits.row_limit
            );
        }

        info!("Predictive fallback has no signal; bounded scan");
        format!("SELECT DISTINCT * FROM {} LIMIT {}", tbl, self.limits.row_limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AssistantError, Result};
    use crate::query::safety::is_safe_select;
    use async_trait::async_trait;

    struct FixedModel(Result<String>);

    #[async_trait]
    impl LanguageModel for FixedModel {
        async fn generate(&self, _prompt: &str, _options: &GenerationOptions) -> Result<String> {
            match &self.0 {
                Ok(text) => Ok(text.clone()),
                Err(e) => Err(AssistantError::Llm(e.to_string())),
            }
        }
    }

    fn extension() -> PredictiveTargeting {
        PredictiveTargeting::new(
            TranslatorLimits::default(),
            PredictiveThresholds::default(),
            SamplingConfig::default(),
        )
    }

    #[test]
    fn test_engagement_only_schema_filters_on_engagement() {
        let schema = SchemaDescriptor::new("t", vec![ColumnDef::new("engagement_score", "REAL")]);
        let sql = extension().fallback_predictive("t", &schema);
        assert_eq!(
            sql,
            "SELECT DISTINCT * FROM `t` WHERE `engagement_score` < (SELECT AVG(`engagement_score`) * 0.7 FROM `t` WHERE `engagement_score` IS NOT NULL) ORDER BY 1 LIMIT 200"
        );
        assert!(is_safe_select(&sql));
    }

    #[test]
    fn test_no_numeric_columns_degrades_to_bounded_scan() {
        let schema = SchemaDescriptor::new("t", vec![ColumnDef::new("Name", "TEXT"), ColumnDef::new("Email", "TEXT")]);
        assert_eq!(extension().fallback_predictive("t", &schema), "SELECT DISTINCT * FROM `t` LIMIT 200");
    }

    #[test]
    fn test_zero_or_null_tier() {
        let schema = SchemaDescriptor::new(
            "t",
            vec![
                ColumnDef::new("Name", "TEXT"),
                ColumnDef::new("Age", "INTEGER"),
                ColumnDef::new("Visits", "INTEGER"),
            ],
        );
        assert_eq!(
            extension().fallback_predictive("t", &schema),
            "SELECT DISTINCT * FROM `t` WHERE `Age` = 0 OR `Age` IS NULL OR `Visits` = 0 OR `Visits` IS NULL LIMIT 200"
        );
    }

    #[test]
    fn test_all_indicators_combined_and_ordered_by_charges() {
        let schema = SchemaDescriptor::new(
            "t",
            vec![
                ColumnDef::new("PaymentStatus", "TEXT"),
                ColumnDef::new("SupportTickets", "INTEGER"),
                ColumnDef::new("MonthlyCharges", "REAL"),
            ],
        );
        let mut ext = extension();
        ext.thresholds.complaint_threshold = 3;
        let sql = ext.fallback_predictive("t", &schema);
        assert!(sql.contains("(`PaymentStatus` LIKE '%fail%' OR `PaymentStatus` LIKE '%overdue%' OR `PaymentStatus` LIKE '%pending%')"));
        assert!(sql.contains("`SupportTickets` > 3"));
        assert!(sql.contains("ORDER BY `MonthlyCharges` DESC"));
    }

    #[tokio::test]
    async fn test_model_candidate_is_validated() {
        let schema = SchemaDescriptor::new("t", vec![ColumnDef::new("engagement_score", "REAL")]);
        let good = FixedModel(Ok("```sql\nSELECT * FROM t WHERE engagement_score < 2 ORDER BY engagement_score;\n```".into()));
        let candidate = extension().build_predictive("t", &schema, &good).await;
        assert_eq!(candidate.origin, QueryOrigin::Predictive);
        assert_eq!(
            candidate.sql,
            "SELECT DISTINCT * FROM t WHERE engagement_score < 2 ORDER BY engagement_score LIMIT 200"
        );

        let unsafe_model = FixedModel(Ok("DELETE FROM t".into()));
        let candidate = extension().build_predictive("t", &schema, &unsafe_model).await;
        assert_eq!(candidate.origin, QueryOrigin::PredictiveFallback);

        let failing = FixedModel(Err(AssistantError::Llm("down".into())));
        let candidate = extension().build_predictive("t", &schema, &failing).await;
        assert_eq!(candidate.origin, QueryOrigin::PredictiveFallback);
        assert!(candidate.sql.contains("engagement_score"));
    }
}
