//! Campaign Runner
//!
//! Preview runs a targeting utterance through the assistant and parks the
//! rows in the channel's slot. Dispatch takes the slot (once), normalizes
//! each recipient, personalizes the template and hands messages to the
//! sink.

use super::dispatch::{DispatchChannel, OutboundMessage};
use super::recipient::{normalize_phone, validate_email};
use super::{
    detect_name_column, CampaignLogEntry, CampaignOutcome, Channel, DEFAULT_RECIPIENT_NAME, EMAIL_SUBJECT,
    EMAIL_TEMPLATE, SMS_TEMPLATE,
};
use crate::data_assistant::DataAssistant;
use crate::error::{AssistantError, Result};
use crate::llm::{GenerationOptions, LanguageModel};
use crate::session::{SessionContext, TargetSet};
use polars::prelude::*;
use tracing::{info, warn};

const FALLBACK_GREETING: &str = "Hello! This is a friendly call from ChurnGuard AI.";
const FALLBACK_QUESTION: &str = "How would you rate your experience with our service on a scale of 1 to 5?";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallScript {
    pub greeting: String,
    pub feedback_question: String,
    pub full_script: String,
}

impl CallScript {
    pub fn fallback() -> Self {
        Self {
            greeting: FALLBACK_GREETING.to_string(),
            feedback_question: FALLBACK_QUESTION.to_string(),
            full_script: format!("{} {}", FALLBACK_GREETING, FALLBACK_QUESTION),
        }
    }

    /// Splits model output into a greeting (first sentence) and a question
    /// (second sentence).
    fn from_text(text: &str) -> Self {
        let sentences: Vec<&str> = text
            .split(['.', '?', '!'])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        let greeting = sentences
            .first()
            .map(|s| format!("{}.", s))
            .unwrap_or_else(|| FALLBACK_GREETING.to_string());
        let feedback_question = sentences
            .get(1)
            .map(|s| format!("{}?", s))
            .unwrap_or_else(|| FALLBACK_QUESTION.to_string());
        Self {
            greeting,
            feedback_question,
            full_script: text.trim().to_string(),
        }
    }

    pub async fn generate(model: &dyn LanguageModel) -> Self {
        let prompt = r#"Generate a brief, friendly phone call script for customer feedback collection.
Rules:
- Keep the greeting under 15 seconds of speech
- Ask ONE clear feedback question about service quality
- Use a natural, conversational tone

Create a warm greeting, then ask: "How would you rate your recent experience with our service, and what can we improve?"

Return ONLY the script text."#;
        match model.generate(prompt, &GenerationOptions::default()).await {
            Ok(text) if !text.trim().is_empty() => Self::from_text(&text),
            Ok(_) => Self::fallback(),
            Err(e) => {
                warn!("Call script generation failed, using the default script: {}", e);
                Self::fallback()
            }
        }
    }
}

fn column_text(frame: &DataFrame, name: &str) -> Result<Vec<Option<String>>> {
    let series = frame.column(name)?.cast(&DataType::String)?;
    let values = series.str()?.into_iter().map(|v| v.map(|s| s.trim().to_string())).collect();
    Ok(values)
}

pub struct CampaignRunner<'a> {
    assistant: &'a DataAssistant,
    sink: &'a dyn DispatchChannel,
}

impl<'a> CampaignRunner<'a> {
    pub fn new(assistant: &'a DataAssistant, sink: &'a dyn DispatchChannel) -> Self {
        Self { assistant, sink }
    }

    /// Selects targets for `channel` and stores them in its slot,
    /// replacing any earlier preview. Returns the selected rows.
    pub async fn preview(&self, session: &mut SessionContext, channel: Channel, criteria: &str) -> Result<DataFrame> {
        let utterance = format!(
            "{} (include the {} columns)",
            criteria.trim(),
            channel.required_columns().join(" and ")
        );
        info!("Previewing {} targets: {}", channel, utterance);
        let selection = self.assistant.select_targets(session, &utterance).await?;
        info!("{} preview holds {} targets", channel, selection.frame.height());
        session.store_targets(
            channel.slot(),
            TargetSet {
                frame: selection.frame.clone(),
                query: selection.query,
            },
        );
        Ok(selection.frame)
    }

    /// Sends to every previewed target and appends a log entry. Fails only
    /// when there is no preview to send.
    pub async fn dispatch(&self, session: &mut SessionContext, channel: Channel) -> Result<CampaignOutcome> {
        let targets = session.take_targets(channel.slot()).ok_or_else(|| {
            AssistantError::Dispatch(format!("no {} preview to send; run a preview first", channel))
        })?;

        let outcome = match self.send_all(channel, &targets.frame).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("{} campaign aborted: {}", channel, e);
                CampaignOutcome::aborted(e.to_string(), targets.frame.height())
            }
        };
        info!(
            "{} campaign complete: sent {}, failed {}",
            channel, outcome.sent, outcome.failed
        );
        session.log_campaign(CampaignLogEntry::new(channel, &outcome, targets.query));
        Ok(outcome)
    }

    async fn send_all(&self, channel: Channel, frame: &DataFrame) -> Result<CampaignOutcome> {
        let columns = frame.get_column_names();
        let address_column = channel.address_column(&columns).ok_or_else(|| {
            AssistantError::Dispatch(format!("no {} address column in the previewed rows", channel))
        })?;
        let addresses = column_text(frame, address_column)?;
        let names = match detect_name_column(&columns) {
            Some(name_column) => column_text(frame, name_column)?,
            None => vec![None; frame.height()],
        };
        let script = match channel {
            Channel::Call => Some(CallScript::generate(self.assistant.model()).await),
            _ => None,
        };

        let mut outcome = CampaignOutcome {
            success: true,
            ..Default::default()
        };
        for (address, name) in addresses.into_iter().zip(names) {
            let raw = match address.filter(|a| !a.is_empty()) {
                Some(raw) => raw,
                None => {
                    outcome.record_failure(format!("empty {} address in row", channel));
                    continue;
                }
            };
            let message = match self.build_message(channel, &raw, name.as_deref(), script.as_ref()) {
                Ok(message) => message,
                Err(e) => {
                    warn!("Skipping recipient {}: {}", raw, e);
                    outcome.record_failure(format!("{}: {}", raw, e));
                    continue;
                }
            };
            match self.sink.send(&message).await {
                Ok(id) => {
                    info!("Sent {} to {} ({})", channel, message.to, id);
                    outcome.sent += 1;
                }
                Err(e) => {
                    warn!("Failed to send {} to {}: {}", channel, message.to, e);
                    outcome.record_failure(format!("{}: {}", message.to, e));
                }
            }
        }
        Ok(outcome)
    }

    fn build_message(
        &self,
        channel: Channel,
        raw_address: &str,
        name: Option<&str>,
        script: Option<&CallScript>,
    ) -> Result<OutboundMessage> {
        let name = name.filter(|n| !n.is_empty());
        match channel {
            Channel::Sms => Ok(OutboundMessage {
                channel,
                to: normalize_phone(raw_address)?,
                subject: None,
                body: match name {
                    Some(name) => SMS_TEMPLATE.replacen("Hi!", &format!("Hi {}!", name), 1),
                    None => SMS_TEMPLATE.to_string(),
                },
            }),
            Channel::Email => {
                if !validate_email(raw_address) {
                    return Err(AssistantError::Dispatch("invalid email".into()));
                }
                Ok(OutboundMessage {
                    channel,
                    to: raw_address.to_string(),
                    subject: Some(EMAIL_SUBJECT.to_string()),
                    body: EMAIL_TEMPLATE.replace("{name}", name.unwrap_or(DEFAULT_RECIPIENT_NAME)),
                })
            }
            Channel::Call => Ok(OutboundMessage {
                channel,
                to: normalize_phone(raw_address)?,
                subject: None,
                body: script.cloned().unwrap_or_else(CallScript::fallback).full_script,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_script_split() {
        let script = CallScript::from_text("Hi there, this is ChurnGuard. How was your experience with us? Thanks!");
        assert_eq!(script.greeting, "Hi there, this is ChurnGuard.");
        assert_eq!(script.feedback_question, "How was your experience with us?");
    }

    #[test]
    fn test_call_script_short_text_keeps_default_question() {
        let script = CallScript::from_text("Hello");
        assert_eq!(script.greeting, "Hello.");
        assert_eq!(script.feedback_question, FALLBACK_QUESTION);
    }

    #[test]
    fn test_column_text_casts_numbers() {
        let df = df!("Phone" => &[Some(919876543210i64), None]).unwrap();
        assert_eq!(
            column_text(&df, "Phone").unwrap(),
            vec![Some("919876543210".to_string()), None]
        );
    }
}
