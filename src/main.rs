//! Opinion Trading Bot CLI
//!
//! Multi-account trading bot for the Opinion prediction market.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use opinion_bot::{
    AddressLocks, Config, Database, Notifier, OpinionAction, RunMode, Scheduler,
};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "opinion-bot")]
#[command(about = "Multi-account trading bot for the Opinion prediction market")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a fresh job database from the key and proxy input files
    Create,

    /// Run one pass over every eligible job
    Run {
        /// 1 = buy and sell per job, 2 = sell everything, 3 = account stats
        #[arg(short, long, default_value = "1")]
        mode: u8,
    },

    /// Show job database statistics
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    // Load configuration
    let config = Config::from_env()?;

    match cli.command {
        Commands::Create => create_database(&config).await?,
        Commands::Run { mode } => run_bot(&config, mode).await?,
        Commands::Stats => show_stats(&config).await?,
    }

    Ok(())
}

/// Build the encrypted job store from the raw input files
async fn create_database(config: &Config) -> Result<()> {
    let private_keys = read_lines(&config.private_keys_path).with_context(|| {
        format!(
            "Failed to read private keys from {}",
            config.private_keys_path
        )
    })?;
    if private_keys.is_empty() {
        anyhow::bail!("No private keys found in {}", config.private_keys_path);
    }
    let proxies = read_lines(&config.proxies_path).unwrap_or_default();

    let db = open_database(config)?;
    let passphrase = rpassword::prompt_password(
        "Enter passphrase to encrypt private keys (empty for default): ",
    )
    .context("Failed to read passphrase")?;
    db.set_master_key(&passphrase)?;
    if passphrase.is_empty() {
        info!("Using the default passphrase for the database");
    }

    let summary = db
        .bulk_create(&private_keys, &proxies, config.job_count_range)
        .await?;

    println!("\n{}", "=".repeat(60));
    println!(
        "  Created database for {} account(s) with {} module(s)",
        summary.accounts.to_string().green(),
        summary.jobs.to_string().green()
    );
    println!("{}\n", "=".repeat(60));

    Ok(())
}

/// One scheduler pass over the store
async fn run_bot(config: &Config, mode: u8) -> Result<()> {
    let mode = RunMode::from_id(mode)
        .with_context(|| format!("Unknown mode {mode}, expected 1, 2 or 3"))?;

    let db = Arc::new(open_database(config)?);
    db.resolve_master_key().await?;

    // Jobs a previous run left failed or WAF-blocked get another chance
    let reset = db.reset_transient_failures().await?;
    if reset > 0 {
        info!("Requeued {} previously failed job(s)", reset);
    }

    let summary = db.summary().await?;
    info!(
        "Loaded {} module(s) for {} account(s)",
        summary.jobs, summary.accounts
    );

    let action = OpinionAction::new(db.clone(), config.trade.clone(), config.browse.clone());
    let scheduler = Scheduler::new(
        db,
        Arc::new(AddressLocks::new()),
        Arc::new(Notifier::new(
            config.telegram_bot_token.clone(),
            config.telegram_chat_id.clone(),
        )),
        Arc::new(action),
        config.threads,
        config.sleep_after_account_secs,
    );

    if let Err(store_err) = scheduler.run(mode).await {
        error!("Database | {}", store_err);
        return Err(store_err.into());
    }

    Ok(())
}

/// Print store statistics without touching job state
async fn show_stats(config: &Config) -> Result<()> {
    let db = open_database(config)?;
    let summary = db.summary().await?;

    println!("\n{}", "=".repeat(60));
    println!("  OPINION BOT DATABASE");
    println!("{}", "-".repeat(60));
    println!("  Accounts:    {}", summary.accounts);
    println!("  Jobs total:  {}", summary.jobs);
    println!("  To run:      {}", summary.to_run.to_string().cyan());
    println!("  Completed:   {}", summary.completed.to_string().green());
    println!("  Failed:      {}", summary.failed.to_string().red());
    println!("  WAF blocked: {}", summary.cloudflare.to_string().yellow());
    println!("{}\n", "=".repeat(60));

    Ok(())
}

fn open_database(config: &Config) -> Result<Database> {
    Ok(Database::new(
        &config.modules_db_path,
        &config.report_db_path,
        config.shuffle_wallets,
    )?)
}

/// Non-empty trimmed lines of an input file
fn read_lines(path: &str) -> Result<Vec<String>> {
    if !Path::new(path).exists() {
        anyhow::bail!("File not found: {path}");
    }
    let contents = std::fs::read_to_string(path)?;
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}
