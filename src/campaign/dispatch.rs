//! Dispatch sinks
//!
//! `DispatchChannel` is the only thing the runner knows about carriers.
//! `WebhookSink` forwards each message to a relay endpoint as JSON;
//! `DryRunSink` records messages without sending anything.

use super::Channel;
use crate::config::AppConfig;
use crate::error::{AssistantError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub channel: Channel,
    /// E.164 phone number or email address.
    pub to: String,
    pub subject: Option<String>,
    pub body: String,
}

/// Sends one message and returns the carrier's id for it.
#[async_trait]
pub trait DispatchChannel: Send + Sync {
    async fn send(&self, message: &OutboundMessage) -> Result<String>;
}

/// Builds the sink named by configuration: the webhook relay when one is
/// set, otherwise a dry run.
pub fn sink_from_config(config: &AppConfig) -> Box<dyn DispatchChannel> {
    match &config.dispatch_webhook {
        Some(url) => Box::new(WebhookSink::new(url.clone(), config.dispatch_token.clone())),
        None => {
            info!("No dispatch relay configured; campaigns run as dry runs");
            Box::new(DryRunSink::new())
        }
    }
}

pub struct WebhookSink {
    url: String,
    token: Option<String>,
    http: reqwest::Client,
}

impl WebhookSink {
    pub fn new(url: String, token: Option<String>) -> Self {
        Self {
            url,
            token,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl DispatchChannel for WebhookSink {
    async fn send(&self, message: &OutboundMessage) -> Result<String> {
        let mut request = self.http.post(&self.url).json(message);
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let response = request
            .send()
            .await
            .map_err(|e| AssistantError::Dispatch(format!("relay call failed: {}", e)))?;
        let status = response.status();
        let body: serde_json::Value = response.json().await.unwrap_or(serde_json::Value::Null);

        if !status.is_success() {
            let reason = body["error"].as_str().unwrap_or("unknown error");
            return Err(AssistantError::Dispatch(format!("relay returned {}: {}", status, reason)));
        }

        let id = body["id"]
            .as_str()
            .or_else(|| body["sid"].as_str())
            .unwrap_or("accepted")
            .to_string();
        debug!("Relay accepted {} message to {} ({})", message.channel, message.to, id);
        Ok(id)
    }
}

/// Accepts every message and keeps a copy.
#[derive(Debug, Default)]
pub struct DryRunSink {
    sent: Mutex<Vec<OutboundMessage>>,
}

impl DryRunSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl DispatchChannel for DryRunSink {
    async fn send(&self, message: &OutboundMessage) -> Result<String> {
        let id = format!("dry-{}", uuid::Uuid::new_v4());
        info!("[dry run] {} to {}: {}", message.channel, message.to, message.body);
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(message.clone());
        }
        Ok(id)
    }
}
