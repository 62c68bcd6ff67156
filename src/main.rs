use anyhow::{anyhow, Context, Result};
use churnguard::campaign::dispatch::sink_from_config;
use churnguard::campaign::{export_csv, CampaignRunner, CampaignStats, Channel};
use churnguard::table_upload;
use churnguard::{AppConfig, AssistantResponse, DataAssistant, SessionContext};
use clap::{Parser, Subcommand};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "churnguard")]
#[command(about = "Ask questions about customer data and run retention campaigns")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load a CSV and sync it into the persisted store
    Ingest {
        csv: PathBuf,
    },
    /// Answer one question
    Ask {
        question: String,
        /// CSV to load before answering
        #[arg(long)]
        csv: Option<PathBuf>,
    },
    /// Interactive session
    Chat {
        #[arg(long)]
        csv: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("churnguard=info")))
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env().context("failed to load configuration")?;
    let assistant = DataAssistant::from_config(&config);
    let mut session = SessionContext::new();

    match cli.command {
        Command::Ingest { csv } => {
            load(&assistant, &mut session, &csv)?;
        }
        Command::Ask { question, csv } => {
            if let Some(csv) = csv {
                load(&assistant, &mut session, &csv)?;
            }
            let response = assistant.answer(&mut session, &question).await;
            print_response(&response, assistant.limits().row_limit);
        }
        Command::Chat { csv } => {
            if let Some(csv) = csv {
                load(&assistant, &mut session, &csv)?;
            }
            chat(&config, &assistant, &mut session).await?;
        }
    }
    Ok(())
}

fn load(assistant: &DataAssistant, session: &mut SessionContext, csv: &Path) -> Result<()> {
    match table_upload::ingest(session, csv, assistant.store())? {
        Some(report) if report.skipped => println!("Table {} already synced", report.table),
        Some(report) => println!(
            "Synced {} rows into {}{}",
            report.inserted,
            report.table,
            if report.created { " (new table)" } else { "" }
        ),
        None => println!(
            "Loaded {} in memory (no persisted store configured)",
            session.current_table().unwrap_or(table_upload::DEFAULT_TABLE_NAME)
        ),
    }
    Ok(())
}

fn print_response(response: &AssistantResponse, max_rows: usize) {
    println!("\n{}", response.answer);
    if let Some(query) = &response.query {
        println!("\n[{:?}] {}", response.route, query);
    }
    if response.show_data {
        if let Some(result) = &response.result {
            println!("\n{}", result.preview(max_rows));
        }
    }
}

const HELP: &str = "Commands:
  /preview <sms|email|call> <criteria>   select campaign targets
  /send <sms|email|call>                 send to the previewed targets
  /log                                   campaign log and totals
  /export <path>                         write the campaign log as CSV
  /quit";

async fn chat(config: &AppConfig, assistant: &DataAssistant, session: &mut SessionContext) -> Result<()> {
    let sink = sink_from_config(config);
    let runner = CampaignRunner::new(assistant, sink.as_ref());
    println!("{}\n", HELP);

    let stdin = std::io::stdin();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(command) = line.strip_prefix('/') {
            let mut parts = command.splitn(3, ' ');
            let name = parts.next().unwrap_or_default();
            let result = match name {
                "quit" | "exit" => break,
                "help" => {
                    println!("{}", HELP);
                    Ok(())
                }
                "preview" => {
                    let channel = parts.next().unwrap_or_default();
                    let criteria = parts.next().unwrap_or_default();
                    preview(&runner, session, channel, criteria).await
                }
                "send" => send(&runner, session, parts.next().unwrap_or_default()).await,
                "log" => {
                    show_log(session);
                    Ok(())
                }
                "export" => match parts.next() {
                    Some(path) => export_csv(session.campaign_log(), Path::new(path)).map_err(Into::into),
                    None => Err(anyhow!("usage: /export <path>")),
                },
                other => Err(anyhow!("unknown command /{}", other)),
            };
            if let Err(e) = result {
                warn!("Command failed: {}", e);
                println!("Error: {}", e);
            }
            continue;
        }

        let response = assistant.answer(session, line).await;
        print_response(&response, assistant.limits().row_limit);
    }
    info!("Session ended after {} messages", session.messages().len());
    Ok(())
}

async fn preview(runner: &CampaignRunner<'_>, session: &mut SessionContext, channel: &str, criteria: &str) -> Result<()> {
    let channel: Channel = channel.parse()?;
    if criteria.trim().is_empty() {
        return Err(anyhow!("usage: /preview <channel> <criteria>"));
    }
    let targets = runner.preview(session, channel, criteria).await?;
    println!("{} targets ready for {}:\n{}", targets.height(), channel, targets.head(Some(10)));
    Ok(())
}

async fn send(runner: &CampaignRunner<'_>, session: &mut SessionContext, channel: &str) -> Result<()> {
    let channel: Channel = channel.parse()?;
    let outcome = runner.dispatch(session, channel).await?;
    println!("Sent {}, failed {}", outcome.sent, outcome.failed);
    if let Some(error) = &outcome.error {
        println!("  {}", error);
    }
    for detail in &outcome.details {
        println!("  {}", detail);
    }
    Ok(())
}

fn show_log(session: &SessionContext) {
    for entry in session.campaign_log() {
        println!(
            "{}  {:<5} targets {:>4}  sent {:>4}  failed {:>4}  {:?}  {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.channel.to_string(),
            entry.target_count,
            entry.sent,
            entry.failed,
            entry.status,
            entry.query
        );
    }
    let stats = CampaignStats::from_log(session.campaign_log());
    println!(
        "{} campaigns, {} sent of {} targets ({:.1}% success)",
        stats.campaigns, stats.sent, stats.targets, stats.success_rate
    );
}
