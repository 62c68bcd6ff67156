//! Runtime configuration
//!
//! Everything tunable lives here: model endpoint, store location, the
//! keyword tables behind intent classification, predictive thresholds and
//! the translator's limits. Values come from the process environment
//! (optionally seeded from a `.env` file by the binary).

use crate::error::{AssistantError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Top-level configuration assembled from the environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    /// SQLite file backing the persisted store. `None` means no store.
    pub db_path: Option<PathBuf>,
    pub keywords: IntentKeywords,
    pub thresholds: PredictiveThresholds,
    pub limits: TranslatorLimits,
    pub sampling: SamplingConfig,
    pub dispatch_webhook: Option<String>,
    pub dispatch_token: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let keywords = match std::env::var("CHURNGUARD_KEYWORDS") {
            Ok(path) if !path.trim().is_empty() => IntentKeywords::from_file(Path::new(path.trim()))?,
            _ => IntentKeywords::default(),
        };

        let mut thresholds = PredictiveThresholds::default();
        if let Some(ratio) = env_parse::<f64>("CHURNGUARD_ENGAGEMENT_RATIO")? {
            thresholds.engagement_ratio = ratio;
        }
        if let Some(min) = env_parse::<i64>("CHURNGUARD_COMPLAINT_THRESHOLD")? {
            thresholds.complaint_threshold = min;
        }

        let sampling = SamplingConfig {
            retry_temperature: env_parse::<f32>("CHURNGUARD_RETRY_TEMPERATURE")?,
            ..SamplingConfig::default()
        };

        Ok(Self {
            api_key: env_non_empty("OPENAI_API_KEY"),
            base_url: env_non_empty("OPENAI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: env_non_empty("CHURNGUARD_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            db_path: env_non_empty("CHURNGUARD_DB_PATH").map(PathBuf::from),
            keywords,
            thresholds,
            limits: TranslatorLimits::default(),
            sampling,
            dispatch_webhook: env_non_empty("CHURNGUARD_DISPATCH_WEBHOOK"),
            dispatch_token: env_non_empty("CHURNGUARD_DISPATCH_TOKEN"),
        })
    }
}

impl Default for AppConfig {
    /// No model key, no store, default vocabularies and limits.
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            db_path: None,
            keywords: IntentKeywords::default(),
            thresholds: PredictiveThresholds::default(),
            limits: TranslatorLimits::default(),
            sampling: SamplingConfig::default(),
            dispatch_webhook: None,
            dispatch_token: None,
        }
    }
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match env_non_empty(key) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| AssistantError::Config(format!("{} has an invalid value: {}", key, raw))),
    }
}

/// Keyword tables consumed by the intent classifier and targeting
/// extraction. Loadable from JSON so deployments can swap vocabularies.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntentKeywords {
    /// Phrases signalling churn/retention-risk targeting.
    pub risk_phrases: Vec<String>,
    /// Column-name fragments that mark an explicit risk label.
    pub risk_column_markers: Vec<String>,
    /// Verbs asking to see the underlying rows.
    pub show_data_verbs: Vec<String>,
    /// Phrases asking for a count; these veto the show-data verbs.
    pub count_phrases: Vec<String>,
    /// Phrases asking whether data exists or how much of it.
    pub availability_phrases: Vec<String>,
    /// Terms that mark an utterance as being about the dataset.
    pub data_terms: Vec<String>,
    /// Words that, following a column name, request a non-empty value.
    pub presence_words: Vec<String>,
    /// Identifier columns in preference order (case-insensitive).
    pub identifier_columns: Vec<String>,
    /// Utterance keyword to column-name fragments.
    pub column_synonyms: Vec<(String, Vec<String>)>,
}

impl IntentKeywords {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw)
            .map_err(|e| AssistantError::Config(format!("Invalid keyword file {}: {}", path.display(), e)))
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for IntentKeywords {
    fn default() -> Self {
        Self {
            risk_phrases: strings(&[
                "churn",
                "high risk",
                "high-risk",
                "at risk",
                "at-risk",
                "risk customer",
                "churn risk",
                "likely to churn",
                "churn prediction",
                "churn probability",
                "retention",
                "retain",
                "losing customer",
                "customer likely to leave",
                "likely to leave",
                "vulnerable customer",
                "unhappy customer",
            ]),
            risk_column_markers: strings(&[
                "churn",
                "churned",
                "churn_probability",
                "churn_risk",
                "is_churn",
                "will_churn",
                "churn_score",
                "retention",
            ]),
            show_data_verbs: strings(&["show", "display", "list", "see", "view", "get", "fetch", "give me"]),
            count_phrases: strings(&["how many", "count", "number of", "total"]),
            availability_phrases: strings(&[
                "how many",
                "count",
                "total",
                "available",
                "exists",
                "present",
                "show me",
                "display",
                "list",
                "see",
                "view",
                "get data",
                "fetch data",
            ]),
            data_terms: strings(&[
                "data", "dataset", "table", "column", "columns", "row", "rows", "records", "filter",
                "query", "sql", "select", "join", "group by", "customer", "customers",
            ]),
            presence_words: strings(&[
                "present",
                "exists",
                "available",
                "filled",
                "provided",
                "is present",
                "is available",
                "not null",
                "not empty",
                "is not null",
                "is not empty",
            ]),
            identifier_columns: strings(&[
                "email",
                "e_mail",
                "mail",
                "email_address",
                "phoneno",
                "phone",
                "mobile",
                "contact",
                "customerid",
                "customer_id",
                "userid",
                "user_id",
                "id",
                "name",
                "first_name",
                "last_name",
                "full_name",
            ]),
            column_synonyms: vec![
                ("age".to_string(), strings(&["age"])),
                ("phone".to_string(), strings(&["phone", "mobile", "contact"])),
                ("email".to_string(), strings(&["email", "mail"])),
                ("name".to_string(), strings(&["name"])),
                ("location".to_string(), strings(&["location", "city", "region"])),
                ("tenure".to_string(), strings(&["tenure"])),
                ("charges".to_string(), strings(&["charge"])),
                ("payment".to_string(), strings(&["payment"])),
                ("engagement".to_string(), strings(&["engagement"])),
            ],
        }
    }
}

/// Tuning constants for the deterministic churn-risk fallback.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PredictiveThresholds {
    /// Engagement below this fraction of the column mean counts as risk.
    pub engagement_ratio: f64,
    /// Complaint counts strictly above this count as risk.
    pub complaint_threshold: i64,
}

impl Default for PredictiveThresholds {
    fn default() -> Self {
        Self {
            engagement_ratio: 0.7,
            complaint_threshold: 1,
        }
    }
}

/// Hard limits of the translation and orchestration loops.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TranslatorLimits {
    pub row_limit: usize,
    pub fallback_scan_limit: usize,
    pub max_model_attempts: usize,
    pub max_execution_attempts: usize,
    pub preview_rows: usize,
    pub max_identifier_columns: usize,
    pub max_requested_columns: usize,
    pub max_filter_values: usize,
    pub max_filter_columns: usize,
    pub max_fallback_tokens: usize,
}

impl Default for TranslatorLimits {
    fn default() -> Self {
        Self {
            row_limit: 200,
            fallback_scan_limit: 50,
            max_model_attempts: 2,
            max_execution_attempts: 2,
            preview_rows: 10,
            max_identifier_columns: 8,
            max_requested_columns: 6,
            max_filter_values: 5,
            max_filter_columns: 6,
            max_fallback_tokens: 5,
        }
    }
}

/// Sampling knobs for model calls.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SamplingConfig {
    pub temperature: f32,
    /// Temperature for the second translator attempt; `None` reuses `temperature`.
    pub retry_temperature: Option<f32>,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            retry_temperature: None,
        }
    }
}

impl SamplingConfig {
    pub fn for_attempt(&self, attempt: usize) -> f32 {
        if attempt <= 1 {
            self.temperature
        } else {
            self.retry_temperature.unwrap_or(self.temperature)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keywords_roundtrip_through_json_with_partial_override() {
        let raw = r#"{"risk_phrases": ["attrition"]}"#;
        let keywords: IntentKeywords = serde_json::from_str(raw).unwrap();
        assert_eq!(keywords.risk_phrases, vec!["attrition".to_string()]);
        // untouched lists keep their defaults
        assert!(keywords.identifier_columns.contains(&"email".to_string()));
    }

    #[test]
    fn test_retry_temperature_defaults_to_base() {
        let sampling = SamplingConfig::default();
        assert_eq!(sampling.for_attempt(2), sampling.temperature);
        let varied = SamplingConfig {
            temperature: 0.1,
            retry_temperature: Some(0.6),
        };
        assert_eq!(varied.for_attempt(1), 0.1);
        assert_eq!(varied.for_attempt(2), 0.6);
    }
}
