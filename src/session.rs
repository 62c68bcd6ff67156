//! Session Context
//!
//! Everything a conversation accumulates between turns: the uploaded
//! table and its sync state, the running message log, campaign target
//! slots and the campaign log. Passed explicitly into the orchestrator
//! and campaign runner; there is no global session.

use crate::campaign::CampaignLogEntry;
use crate::evaluator::EvalValue;
use chrono::{DateTime, Utc};
use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

pub const SMS_TARGETS: &str = "sms_targets";
pub const EMAIL_TARGETS: &str = "email_targets";
pub const CALL_TARGETS: &str = "call_targets";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One entry of the running message log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// SQL or expression that produced the answer, if any.
    pub query: Option<String>,
    /// Whether the full result should be rendered to the user.
    pub show_data: bool,
    pub meta: Option<String>,
    #[serde(skip)]
    pub result: Option<EvalValue>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            timestamp: Utc::now(),
            query: None,
            show_data: false,
            meta: None,
            result: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            ..Self::user(content)
        }
    }
}

/// A campaign preview waiting in a named slot.
#[derive(Debug, Clone)]
pub struct TargetSet {
    pub frame: DataFrame,
    /// SQL or expression that selected the rows.
    pub query: String,
}

#[derive(Debug, Default)]
pub struct SessionContext {
    current_table: Option<String>,
    synced: bool,
    source_signature: Option<String>,
    frame: Option<DataFrame>,
    messages: Vec<ChatMessage>,
    target_slots: HashMap<String, TargetSet>,
    campaign_log: Vec<CampaignLogEntry>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a freshly loaded table. A new source signature clears the
    /// sync flag so the next sync writes it to the store.
    pub fn attach_table(&mut self, table: impl Into<String>, frame: DataFrame, signature: impl Into<String>) {
        let table = table.into();
        let signature = signature.into();
        if self.source_signature.as_deref() != Some(signature.as_str()) {
            debug!("New source signature {}; table needs syncing", signature);
            self.synced = false;
            self.source_signature = Some(signature);
        }
        info!("Session table is now {} ({} rows)", table, frame.height());
        self.current_table = Some(table);
        self.frame = Some(frame);
    }

    pub fn current_table(&self) -> Option<&str> {
        self.current_table.as_deref()
    }

    pub fn frame(&self) -> Option<&DataFrame> {
        self.frame.as_ref()
    }

    pub fn source_signature(&self) -> Option<&str> {
        self.source_signature.as_deref()
    }

    pub fn is_synced(&self) -> bool {
        self.synced
    }

    pub fn mark_synced(&mut self) {
        self.synced = true;
    }

    pub fn push_message(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// The last `n` messages, oldest first.
    pub fn recent_messages(&self, n: usize) -> &[ChatMessage] {
        let start = self.messages.len().saturating_sub(n);
        &self.messages[start..]
    }

    /// Stores a campaign preview, replacing whatever the slot held.
    pub fn store_targets(&mut self, slot: &str, targets: TargetSet) {
        debug!("Stored {} targets in slot {}", targets.frame.height(), slot);
        self.target_slots.insert(slot.to_string(), targets);
    }

    pub fn peek_targets(&self, slot: &str) -> Option<&TargetSet> {
        self.target_slots.get(slot)
    }

    /// Removes and returns a slot; a second take yields `None`.
    pub fn take_targets(&mut self, slot: &str) -> Option<TargetSet> {
        self.target_slots.remove(slot)
    }

    pub fn log_campaign(&mut self, entry: CampaignLogEntry) {
        self.campaign_log.push(entry);
    }

    pub fn campaign_log(&self) -> &[CampaignLogEntry] {
        &self.campaign_log
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;

    fn frame() -> DataFrame {
        df!("Name" => &["Riya"]).unwrap()
    }

    #[test]
    fn test_target_slot_is_read_once() {
        let mut session = SessionContext::new();
        session.store_targets(
            SMS_TARGETS,
            TargetSet {
                frame: frame(),
                query: "SELECT Name FROM t".into(),
            },
        );
        assert!(session.take_targets(SMS_TARGETS).is_some());
        assert!(session.take_targets(SMS_TARGETS).is_none());
    }

    #[test]
    fn test_new_signature_resets_sync() {
        let mut session = SessionContext::new();
        session.attach_table("a_tbl", frame(), "a.csv:1:Name");
        session.mark_synced();
        session.attach_table("a_tbl", frame(), "a.csv:1:Name");
        assert!(session.is_synced());
        session.attach_table("a_tbl", frame(), "a.csv:2:Name");
        assert!(!session.is_synced());
    }

    #[test]
    fn test_recent_messages_window() {
        let mut session = SessionContext::new();
        for i in 0..5 {
            session.push_message(ChatMessage::user(format!("q{}", i)));
        }
        let recent: Vec<&str> = session.recent_messages(3).iter().map(|m| m.content.as_str()).collect();
        assert_eq!(recent, vec!["q2", "q3", "q4"]);
    }
}
