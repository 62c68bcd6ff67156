mod common;

use churnguard::campaign::{CampaignRunner, CampaignStats, CampaignStatus, Channel, DryRunSink};
use churnguard::error::AssistantError;
use churnguard::session::EMAIL_TARGETS;
use churnguard::table_upload;
use churnguard::{AppConfig, DataAssistant, SessionContext};
use common::*;
use std::sync::Arc;
use tempfile::TempDir;

fn city_model() -> ScriptedModel {
    ScriptedModel::new(|prompt| {
        if !prompt.contains(EXPRESSION_MARKER) {
            return Ok("Hello there, this is ChurnGuard calling. How has our service been for you?".into());
        }
        if prompt.contains("Question: customers in Mumbai") {
            Ok("df[df['City'] == 'Mumbai']".into())
        } else {
            Ok("df[df['City'] == 'Delhi']".into())
        }
    })
}

fn loaded_session(dir: &TempDir) -> SessionContext {
    let csv = write_csv(dir.path(), "customers.csv", CUSTOMERS_CSV);
    let mut session = SessionContext::new();
    table_upload::ingest(&mut session, &csv, None).unwrap();
    session
}

#[tokio::test]
async fn test_sms_preview_then_dispatch_once() {
    let dir = TempDir::new().unwrap();
    let mut session = loaded_session(&dir);
    let assistant = DataAssistant::new(&AppConfig::default(), Arc::new(city_model()), None);
    let sink = DryRunSink::new();
    let runner = CampaignRunner::new(&assistant, &sink);

    let targets = runner.preview(&mut session, Channel::Sms, "customers in Mumbai").await.unwrap();
    assert_eq!(targets.height(), 2);

    let outcome = runner.dispatch(&mut session, Channel::Sms).await.unwrap();
    assert_eq!((outcome.sent, outcome.failed), (2, 0));
    let sent = sink.sent();
    assert_eq!(sent[0].to, "+919876543210");
    assert!(sent[0].body.starts_with("Hi Riya Sharma!"));
    assert_eq!(sent[1].to, "+447700900123");

    let again = runner.dispatch(&mut session, Channel::Sms).await;
    assert!(matches!(again, Err(AssistantError::Dispatch(_))));

    let log = session.campaign_log();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].query, "df[df['City'] == 'Mumbai']");
    assert_eq!(log[0].status, CampaignStatus::Success);
}

#[tokio::test]
async fn test_email_dispatch_reports_missing_addresses() {
    let dir = TempDir::new().unwrap();
    let mut session = loaded_session(&dir);
    let assistant = DataAssistant::new(&AppConfig::default(), Arc::new(city_model()), None);
    let sink = DryRunSink::new();
    let runner = CampaignRunner::new(&assistant, &sink);

    runner.preview(&mut session, Channel::Email, "customers in Delhi").await.unwrap();
    assert!(session.peek_targets(EMAIL_TARGETS).is_some());

    let outcome = runner.dispatch(&mut session, Channel::Email).await.unwrap();
    assert_eq!((outcome.sent, outcome.failed), (1, 1));
    assert_eq!(outcome.details, vec!["empty Email address in row".to_string()]);
    assert!(sink.sent()[0].body.starts_with("Hi Meera Iyer,"));
    assert!(session.peek_targets(EMAIL_TARGETS).is_none());

    let stats = CampaignStats::from_log(session.campaign_log());
    assert_eq!(stats.targets, 2);
    assert!((stats.success_rate - 50.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_call_campaign_uses_generated_script() {
    let dir = TempDir::new().unwrap();
    let mut session = loaded_session(&dir);
    let assistant = DataAssistant::new(&AppConfig::default(), Arc::new(city_model()), None);
    let sink = DryRunSink::new();
    let runner = CampaignRunner::new(&assistant, &sink);

    runner.preview(&mut session, Channel::Call, "customers in Delhi").await.unwrap();
    let outcome = runner.dispatch(&mut session, Channel::Call).await.unwrap();

    assert_eq!(outcome.sent, 2);
    assert!(sink.sent().iter().all(|m| m.body.contains("How has our service been")));
}
