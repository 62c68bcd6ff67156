//! Intent classification
//!
//! Keyword-driven and deliberately simple: every decision the orchestrator
//! and translator make about "what kind of question is this" goes through
//! `IntentClassifier`, with vocabularies supplied by `IntentKeywords`.

use crate::config::IntentKeywords;
use crate::schema::SchemaDescriptor;
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IntentTag {
    /// Churn/retention-risk targeting.
    PredictiveTargeting,
    /// Asks whether (or how much) data exists.
    DataAvailability,
    /// Wants the matching rows rendered.
    ShowData,
    /// Not about the dataset at all.
    General,
}

/// The three mutually exclusive summary templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SummaryIntent {
    Availability,
    ShowData,
    Analytical,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub tags: Vec<IntentTag>,
}

impl Classification {
    pub fn has(&self, tag: IntentTag) -> bool {
        self.tags.contains(&tag)
    }

    pub fn is_general(&self) -> bool {
        self.has(IntentTag::General)
    }

    /// Availability wording wins over show-data wording, so "show me" and
    /// "list" questions get the availability template.
    pub fn summary_intent(&self) -> SummaryIntent {
        if self.has(IntentTag::DataAvailability) {
            SummaryIntent::Availability
        } else if self.has(IntentTag::ShowData) {
            SummaryIntent::ShowData
        } else {
            SummaryIntent::Analytical
        }
    }
}

struct PhraseSet {
    patterns: Vec<Regex>,
}

impl PhraseSet {
    fn new(phrases: &[String]) -> Self {
        let patterns = phrases
            .iter()
            .filter(|p| !p.trim().is_empty())
            .filter_map(|p| {
                let escaped = regex::escape(&p.trim().to_lowercase()).replace(' ', r"\s+");
                Regex::new(&format!(r"(?i)(^|[^a-z0-9_]){}($|[^a-z0-9_])", escaped)).ok()
            })
            .collect();
        Self { patterns }
    }

    fn matches(&self, text: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(text))
    }
}

pub struct IntentClassifier {
    risk_phrases: PhraseSet,
    risk_column_markers: Vec<String>,
    show_data: PhraseSet,
    count: PhraseSet,
    availability: PhraseSet,
    data_terms: PhraseSet,
}

impl IntentClassifier {
    pub fn new(keywords: &IntentKeywords) -> Self {
        Self {
            risk_phrases: PhraseSet::new(&keywords.risk_phrases),
            risk_column_markers: keywords.risk_column_markers.iter().map(|m| m.to_lowercase()).collect(),
            show_data: PhraseSet::new(&keywords.show_data_verbs),
            count: PhraseSet::new(&keywords.count_phrases),
            availability: PhraseSet::new(&keywords.availability_phrases),
            data_terms: PhraseSet::new(&keywords.data_terms),
        }
    }

    /// Churn/retention-risk wording. Matches word-prefixes too, so
    /// "churned" and "retaining" count.
    pub fn is_risk_query(&self, utterance: &str) -> bool {
        if self.risk_phrases.matches(utterance) {
            return true;
        }
        let lower = utterance.to_lowercase();
        lower
            .split(|c: char| !c.is_alphanumeric())
            .any(|w| w.starts_with("churn") || w.starts_with("retain") || w.starts_with("retention"))
    }

    /// Whether the schema already carries an explicit risk label.
    pub fn has_risk_column(&self, schema: &SchemaDescriptor) -> bool {
        schema.columns.iter().any(|c| {
            let name = c.name.to_lowercase();
            self.risk_column_markers.iter().any(|m| name.contains(m.as_str()))
        })
    }

    /// Show-the-rows wording; count phrasing vetoes it.
    pub fn wants_actual_data(&self, utterance: &str) -> bool {
        self.show_data.matches(utterance) && !self.count.matches(utterance)
    }

    pub fn is_availability_query(&self, utterance: &str) -> bool {
        self.availability.matches(utterance)
    }

    /// True when the utterance mentions neither a data term nor any known
    /// column and carries no risk wording.
    pub fn is_general_question(&self, utterance: &str, known_columns: &[&str]) -> bool {
        if self.data_terms.matches(utterance) || self.is_risk_query(utterance) {
            return false;
        }
        let lower = utterance.to_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| !(c.is_alphanumeric() || c == '_'))
            .filter(|w| !w.is_empty())
            .collect();
        !known_columns.iter().any(|col| {
            let col = col.to_lowercase();
            words.iter().any(|w| *w == col)
        })
    }

    pub fn classify(&self, utterance: &str, known_columns: &[&str]) -> Classification {
        let mut tags = Vec::new();
        if self.is_risk_query(utterance) {
            tags.push(IntentTag::PredictiveTargeting);
        }
        if self.is_availability_query(utterance) {
            tags.push(IntentTag::DataAvailability);
        }
        if self.wants_actual_data(utterance) {
            tags.push(IntentTag::ShowData);
        }
        if self.is_general_question(utterance, known_columns) {
            tags.push(IntentTag::General);
        }
        Classification { tags }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnDef;

    fn classifier() -> IntentClassifier {
        IntentClassifier::new(&IntentKeywords::default())
    }

    #[test]
    fn test_count_phrasing_is_not_show_data() {
        let c = classifier();
        assert!(!c.wants_actual_data("how many customers have Email present"));
        assert!(c.is_availability_query("how many customers have Email present"));
        assert!(c.wants_actual_data("show customers named 'Riya'"));
        // "get" inside "target" is not a verb
        assert!(!c.wants_actual_data("what is our target"));
    }

    #[test]
    fn test_general_vs_data_questions() {
        let c = classifier();
        assert!(c.is_general_question("what is the capital of France?", &["Email"]));
        assert!(!c.is_general_question("which rows have no Email", &["Email"]));
        assert!(!c.is_general_question("average tenuremonths please", &["TenureMonths"]));
        assert!(!c.is_general_question("who is likely to churn", &[]));
    }

    #[test]
    fn test_risk_intent_and_risk_columns() {
        let c = classifier();
        assert!(c.is_risk_query("customers likely to churn"));
        assert!(c.is_risk_query("find at-risk accounts"));
        assert!(!c.is_risk_query("customers in Pune"));

        let plain = SchemaDescriptor::new("t", vec![ColumnDef::new("engagement_score", "REAL")]);
        let labelled = SchemaDescriptor::new("t", vec![ColumnDef::new("Churn_Risk", "REAL")]);
        assert!(!c.has_risk_column(&plain));
        assert!(c.has_risk_column(&labelled));
    }

    #[test]
    fn test_summary_intents_are_exclusive() {
        let c = classifier();
        assert_eq!(c.classify("how many customers are there", &[]).summary_intent(), SummaryIntent::Availability);
        assert_eq!(c.classify("show customers in Pune", &[]).summary_intent(), SummaryIntent::ShowData);
        assert_eq!(c.classify("show me customers in Pune", &[]).summary_intent(), SummaryIntent::Availability);
        assert_eq!(c.classify("average age of customers", &[]).summary_intent(), SummaryIntent::Analytical);
    }
}
