//! Retention campaigns
//!
//! A campaign is previewed (targeting utterance -> rows in a session slot)
//! and then dispatched (slot taken once -> one message per recipient ->
//! log entry). Sending goes through a `DispatchChannel` sink.

pub mod dispatch;
pub mod monitor;
pub mod recipient;
pub mod runner;

pub use dispatch::{DispatchChannel, DryRunSink, OutboundMessage, WebhookSink};
pub use monitor::{export_csv, CampaignStats};
pub use runner::{CallScript, CampaignRunner};

use crate::error::AssistantError;
use crate::session::{CALL_TARGETS, EMAIL_TARGETS, SMS_TARGETS};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Failure details kept per campaign.
pub const FAILURE_DETAIL_LIMIT: usize = 10;

pub const SMS_TEMPLATE: &str =
    "Hi! We miss you! As a valued customer, here's an EXCLUSIVE 30% OFF just for you. Use code: COMEBACK30. Valid for 48 hours only!";
pub const EMAIL_SUBJECT: &str = "We Miss You! Exclusive Offer Inside";
pub const EMAIL_TEMPLATE: &str = "Hi {name},\n\nWe miss you! Get 40% OFF using code WELCOME40!\n\nBest,\nYour ChurnGuard Team";
pub const DEFAULT_RECIPIENT_NAME: &str = "Valued Customer";

/// Column names tried, in order, when personalizing messages.
pub const NAME_COLUMNS: &[&str] = &[
    "CustomerName",
    "Name",
    "Customer Name",
    "FullName",
    "Full Name",
    "ContactName",
    "Contact Name",
    "FirstName",
    "First Name",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Channel {
    Sms,
    Email,
    Call,
}

impl Channel {
    pub fn slot(&self) -> &'static str {
        match self {
            Channel::Sms => SMS_TARGETS,
            Channel::Email => EMAIL_TARGETS,
            Channel::Call => CALL_TARGETS,
        }
    }

    /// Columns the preview asks the translator to include.
    pub fn required_columns(&self) -> &'static [&'static str] {
        match self {
            Channel::Sms | Channel::Call => &["Name", "Phone"],
            Channel::Email => &["Name", "Email"],
        }
    }

    /// Case-insensitive fragments that identify the address column.
    fn address_markers(&self) -> &'static [&'static str] {
        match self {
            Channel::Sms | Channel::Call => &["phone", "mobile", "contact_number"],
            Channel::Email => &["email", "e-mail", "mail"],
        }
    }

    pub fn address_column<'a>(&self, columns: &[&'a str]) -> Option<&'a str> {
        self.address_markers().iter().find_map(|marker| {
            columns
                .iter()
                .find(|c| c.to_lowercase().contains(marker))
                .copied()
        })
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Sms => write!(f, "SMS"),
            Channel::Email => write!(f, "Email"),
            Channel::Call => write!(f, "Call"),
        }
    }
}

impl FromStr for Channel {
    type Err = AssistantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sms" | "text" => Ok(Channel::Sms),
            "email" | "mail" => Ok(Channel::Email),
            "call" | "voice" => Ok(Channel::Call),
            other => Err(AssistantError::Config(format!(
                "unknown channel '{}' (expected sms, email or call)",
                other
            ))),
        }
    }
}

pub fn detect_name_column<'a>(columns: &[&'a str]) -> Option<&'a str> {
    NAME_COLUMNS
        .iter()
        .find_map(|name| columns.iter().find(|c| *c == name).copied())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CampaignStatus {
    Success,
    Failed,
}

/// Aggregate of one dispatch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CampaignOutcome {
    pub success: bool,
    pub sent: usize,
    pub failed: usize,
    /// First `FAILURE_DETAIL_LIMIT` failure descriptions.
    pub details: Vec<String>,
    pub error: Option<String>,
}

impl CampaignOutcome {
    pub fn record_failure(&mut self, detail: String) {
        self.failed += 1;
        if self.details.len() < FAILURE_DETAIL_LIMIT {
            self.details.push(detail);
        }
    }

    /// A dispatch that could not start at all.
    pub fn aborted(error: impl Into<String>, targets: usize) -> Self {
        Self {
            success: false,
            sent: 0,
            failed: targets,
            details: Vec::new(),
            error: Some(error.into()),
        }
    }
}

/// One dispatch attempt. Append-only, owned by the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignLogEntry {
    pub timestamp: DateTime<Utc>,
    pub channel: Channel,
    pub target_count: usize,
    pub sent: usize,
    pub failed: usize,
    pub status: CampaignStatus,
    pub query: String,
}

impl CampaignLogEntry {
    pub fn new(channel: Channel, outcome: &CampaignOutcome, query: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            channel,
            target_count: outcome.sent + outcome.failed,
            sent: outcome.sent,
            failed: outcome.failed,
            status: if outcome.success {
                CampaignStatus::Success
            } else {
                CampaignStatus::Failed
            },
            query: query.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_parsing_and_slots() {
        assert_eq!("SMS".parse::<Channel>().unwrap(), Channel::Sms);
        assert_eq!("voice".parse::<Channel>().unwrap().slot(), CALL_TARGETS);
        assert!("fax".parse::<Channel>().is_err());
    }

    #[test]
    fn test_address_column_detection() {
        let columns = ["Name", "Email", "Phone Number"];
        assert_eq!(Channel::Sms.address_column(&columns), Some("Phone Number"));
        assert_eq!(Channel::Email.address_column(&columns), Some("Email"));
        assert_eq!(Channel::Email.address_column(&["Name"]), None);
    }

    #[test]
    fn test_failure_details_are_capped() {
        let mut outcome = CampaignOutcome::default();
        for i in 0..15 {
            outcome.record_failure(format!("row {}", i));
        }
        assert_eq!(outcome.failed, 15);
        assert_eq!(outcome.details.len(), FAILURE_DETAIL_LIMIT);
    }

    #[test]
    fn test_log_entry_counts_targets() {
        let outcome = CampaignOutcome {
            success: true,
            sent: 3,
            failed: 2,
            ..Default::default()
        };
        let entry = CampaignLogEntry::new(Channel::Email, &outcome, "SELECT * FROM t");
        assert_eq!(entry.target_count, 5);
        assert_eq!(entry.status, CampaignStatus::Success);
    }
}
