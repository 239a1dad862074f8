//! `alertops` service entry point.

use std::path::PathBuf;
use std::sync::Arc;

use alertops::server::{run_server, AppState};
use alertops::{AlertStore, Config, LifecycleEngine};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "alertops=info,notify=info,ticketing=info";

#[derive(Parser)]
#[command(name = "alertops")]
#[command(about = "Alert lifecycle engine - dedup, tickets, chat notification and claim-by-reaction")]
#[command(version)]
struct Cli {
    /// TOML file laid over the environment configuration
    #[arg(long, short, global = true, env = "ALERTOPS_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server
    Serve {
        /// Bind address, overrides the configuration
        #[arg(long)]
        addr: Option<String>,

        /// Emit logs as JSON lines
        #[arg(long)]
        log_json: bool,
    },
    /// Show which collaborators are configured
    CheckConfig,
    /// Print alert statistics from the database
    Stats,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.with_target(false).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Serve { addr, log_json } => {
            init_tracing(log_json);
            serve(config, addr).await
        }
        Commands::CheckConfig => {
            check_config(&config);
            Ok(())
        }
        Commands::Stats => stats(&config),
    }
}

async fn serve(config: Config, addr: Option<String>) -> Result<()> {
    let addr = addr.unwrap_or_else(|| config.server.addr.clone());
    let engine = LifecycleEngine::from_config(&config).with_context(|| {
        format!("Failed to open database {}", config.database.path.display())
    })?;

    let health = engine.health();
    info!(
        database = %config.database.path.display(),
        ticketing = health.ticketing.configured,
        chat = health.chat.configured,
        claim_emojis = ?config.assignment.claim_emojis,
        "Starting alert lifecycle engine"
    );

    let state = Arc::new(AppState::new(
        Arc::new(engine),
        config.slack.signing_secret.clone(),
    ));
    run_server(state, &addr).await
}

fn check_config(config: &Config) {
    println!("{}", "alertops configuration".bold());
    println!("  {:<12} {}", "listen:", config.server.addr);
    println!("  {:<12} {}", "database:", config.database.path.display());

    match config.jira.missing() {
        None => println!(
            "  {:<12} {} ({} / {})",
            "jira:",
            "configured".green(),
            config.jira.url,
            config.jira.project_key
        ),
        Some(missing) => println!("  {:<12} {} ({missing} not set)", "jira:", "disabled".yellow()),
    }

    let slack_ready = config.slack.bot_token.is_some() && config.slack.channel_id.is_some();
    if slack_ready {
        println!(
            "  {:<12} {} (channel {})",
            "slack:",
            "configured".green(),
            config.slack.channel_id.as_deref().unwrap_or_default()
        );
    } else {
        println!("  {:<12} {}", "slack:", "disabled".yellow());
    }
    let signing = if config.slack.signing_secret.is_some() {
        "verified".green()
    } else {
        "unverified".yellow()
    };
    println!("  {:<12} {signing}", "events:");

    println!(
        "  {:<12} {}",
        "claims:",
        config
            .assignment
            .claim_emojis
            .iter()
            .map(|e| format!(":{e}:"))
            .collect::<Vec<_>>()
            .join(" ")
    );
    println!(
        "  {:<12} grace {}s, lease ttl {}s, wait {}s",
        "dedup:",
        config.dedup.resolved_grace_secs,
        config.dedup.ticket_claim_ttl_secs,
        config.dedup.claim_wait_secs
    );
}

fn stats(config: &Config) -> Result<()> {
    let store = AlertStore::open(&config.database.path)
        .with_context(|| format!("Failed to open database {}", config.database.path.display()))?;
    let stats = store
        .read(|conn| alertops::store::alerts::stats(conn, chrono::Utc::now()))
        .context("Failed to read statistics")?;

    println!("{}", "Alert statistics".bold());
    println!("  {:<14} {}", "total:", stats.total_alerts);
    println!("  {:<14} {}", "last 24h:", stats.recent_24h);
    println!("  {:<14} {} ({} open)", "tickets:", stats.tickets, stats.open_tickets);
    for (severity, count) in &stats.by_severity {
        println!("  {:<14} {count}", format!("{severity}:"));
    }
    for (status, count) in &stats.by_status {
        println!("  {:<14} {count}", format!("{status}:"));
    }
    Ok(())
}
