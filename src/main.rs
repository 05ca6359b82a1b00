// Pawz Pilot CLI: drive a Discord account with plain-language commands.
//
//   pawz-pilot repl                 interactive; `:stats`, `:clear`, `:quit`
//   pawz-pilot exec "<command>"     one command, then exit
//   pawz-pilot stats                print counters (fresh process) as JSON

use clap::{Parser, Subcommand};
use log::{info, warn};
use pawz_pilot::atoms::traits::MessagingGateway;
use pawz_pilot::atoms::types::UserRef;
use pawz_pilot::engine::discord::export::{export_direct_messages, write_export, DmExportOptions};
use pawz_pilot::engine::discord::{DiscordFeed, DiscordGateway, DiscordSession};
use pawz_pilot::engine::providers;
use pawz_pilot::{CommandPipeline, CommandResponse, EngineError, EngineResult, PilotConfig, PipelineContext};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

/// How long `exec`/`repl` wait for the gateway READY before giving up.
const READY_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Parser)]
#[command(name = "pawz-pilot", version, about = "Natural-language command pilot for a Discord account")]
struct Cli {
    /// Config file (defaults to the platform config dir)
    #[arg(long, short, global = true, env = "PAWZ_PILOT_CONFIG")]
    config: Option<PathBuf>,

    /// Conversation id used for history and follow-ups
    #[arg(long, global = true, default_value = "cli")]
    conversation: String,

    /// Print full responses as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Read commands from stdin until EOF or `:quit`
    Repl,
    /// Run a single command
    Exec {
        #[arg(value_name = "TEXT", required = true)]
        text: Vec<String>,
    },
    /// Print pipeline counters
    Stats,
    /// Export direct-message history to a dated JSON file
    ExportDms {
        /// Output directory
        #[arg(long, short, default_value = ".")]
        output: PathBuf,
        /// Messages kept per DM channel
        #[arg(long, default_value_t = 1000)]
        max: usize,
        /// Also open and export the DM with this user (handle or id); repeatable
        #[arg(long = "user", value_name = "USER")]
        users: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> EngineResult<()> {
    let config = PilotConfig::load(cli.config.as_deref())?;
    let ctx = Arc::new(PipelineContext::from_config(&config));

    if let Some(Command::Stats) = cli.command {
        return print_json(&serde_json::to_value(ctx.stats())?);
    }

    let token = config
        .discord
        .token
        .clone()
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| EngineError::Config("no Discord token: set DISCORD_TOKEN or [discord].token".into()))?;

    let session = Arc::new(DiscordSession::new());
    let gateway = Arc::new(DiscordGateway::new(&token, session.clone(), ctx.activity.clone())?);
    let feed = DiscordFeed::new(token, session.clone(), ctx.activity.clone());
    let stop = feed.stop_handle();
    let feed_task = feed.spawn();

    wait_until_ready(&session).await;

    if let Some(Command::ExportDms { output, max, users }) = &cli.command {
        let outcome = export_dms(&gateway, &session, output, *max, users).await;
        stop.store(true, std::sync::atomic::Ordering::Relaxed);
        feed_task.abort();
        return outcome;
    }

    let model = providers::from_settings(&config.classifier)?;
    let pipeline = CommandPipeline::new(ctx, gateway, model, &config);

    let outcome = match cli.command {
        Some(Command::Exec { text }) => {
            let response = pipeline.process_command(&text.join(" "), &cli.conversation).await;
            print_response(&response, cli.json)?;
            Ok(())
        }
        _ => repl(&pipeline, &cli.conversation, cli.json).await,
    };

    stop.store(true, std::sync::atomic::Ordering::Relaxed);
    feed_task.abort();
    outcome
}

async fn repl(pipeline: &CommandPipeline, conversation: &str, json: bool) -> EngineResult<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("pilot> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else { break };
        match line.trim() {
            "" => continue,
            ":quit" | ":q" => break,
            ":stats" => print_json(&serde_json::to_value(pipeline.get_stats())?)?,
            ":clear" => {
                pipeline.clear_conversation(conversation);
                println!("History cleared.");
            }
            text => {
                let response = pipeline.process_command(text, conversation).await;
                print_response(&response, json)?;
            }
        }
    }
    Ok(())
}

async fn export_dms(
    gateway: &DiscordGateway,
    session: &DiscordSession,
    output: &Path,
    max: usize,
    users: &[String],
) -> EngineResult<()> {
    for wanted in users {
        let user = match gateway.find_user_by_handle(wanted).await? {
            Some(user) => user,
            None if wanted.chars().all(|c| c.is_ascii_digit()) => {
                UserRef { id: wanted.clone(), handle: wanted.clone(), display_name: None }
            }
            None => {
                warn!("[cli] Unknown user '{}', not exported", wanted);
                continue;
            }
        };
        if let Err(e) = gateway.direct_channel(&user).await {
            warn!("[cli] Could not open DM with {}: {}", user.handle, e);
        }
    }
    let channels = session.dm_channels();
    if channels.is_empty() {
        println!("No DM channels known to this session.");
        return Ok(());
    }
    let opts = DmExportOptions { max_per_channel: max, ..Default::default() };
    let export = export_direct_messages(gateway, channels, &opts).await;
    let path = write_export(&export, output)?;
    println!(
        "Exported {} messages from {} DM channels to {}",
        export.total_messages,
        export.stats.total_channels,
        path.display()
    );
    Ok(())
}

async fn wait_until_ready(session: &DiscordSession) {
    let deadline = tokio::time::Instant::now() + READY_TIMEOUT;
    while !session.is_connected() {
        if tokio::time::Instant::now() >= deadline {
            warn!("[cli] Discord not ready after {}s; actions will fail until it connects", READY_TIMEOUT.as_secs());
            return;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    if let Some(me) = session.me() {
        info!("[cli] Piloting {} ({})", me.handle, me.id);
    }
}

fn print_response(response: &CommandResponse, json: bool) -> EngineResult<()> {
    if json {
        return print_json(&serde_json::to_value(response)?);
    }
    println!("{}", response.message);
    if response.results.len() > 1 || response.results.iter().any(|r| !r.success) {
        for r in &response.results {
            let mark = if r.success { "✓" } else { "✗" };
            match &r.error {
                Some(err) => println!("  {} {}: {}", mark, r.action, err),
                None => println!("  {} {}: {}", mark, r.action, r.message),
            }
        }
    }
    Ok(())
}

fn print_json(value: &serde_json::Value) -> EngineResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
