//! Channel Keeper CLI - main entry point
//!
//! Runs the bot, or one-off maintenance commands against the member store.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use teloxide::Bot;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use channel_keeper::cadence::now_unix;
use channel_keeper::dispatch::run_dispatcher;
use channel_keeper::keepalive::spawn_keepalive;
use channel_keeper::metrics;
use channel_keeper::reconciler::spawn_reconciler;
use channel_keeper::{
    BotContext, Config, MemberStore, Reconciler, RetentionState, StoreLock, TeloxideGateway,
};

const EXAMPLE_CONFIG: &str = include_str!("../config.example.yml");

#[derive(Parser)]
#[command(name = "channel_keeper")]
#[command(about = "Telegram channel membership bot", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the YAML config (defaults to ./config.yml or ../config.yml)
    #[arg(short, long, env = "CHANNEL_KEEPER_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bot: event handlers, reconciler, health and keep-alive
    Run,

    /// Run a single reconciliation pass and exit
    ReconcileOnce,

    /// Print the member store summary
    Status,

    /// Write an example config file
    InitConfig {
        /// Output path
        #[arg(default_value = "config.yml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(short, long, default_value_t = false)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env for local development
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("channel_keeper=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(cli.config.as_deref()).await,
        Commands::ReconcileOnce => reconcile_once(cli.config.as_deref()).await,
        Commands::Status => status(cli.config.as_deref()).await,
        Commands::InitConfig { output, force } => init_config(&output, force),
    }
}

fn prepare_store_dir(config: &Config) -> anyhow::Result<()> {
    if let Some(dir) = config.store.lock.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create store directory {}", dir.display()))?;
        }
    }
    Ok(())
}

async fn open_context(
    config: &Config,
) -> anyhow::Result<(Bot, Arc<BotContext<TeloxideGateway>>)> {
    let store = MemberStore::open(config.store.clone()).await?;
    let bot = Bot::new(&config.bot_token);
    let ctx = BotContext::new(TeloxideGateway::new(bot.clone()), store, config);
    Ok((bot, Arc::new(ctx)))
}

async fn run(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = Config::load(config_path)?;
    prepare_store_dir(&config)?;
    let _lock = StoreLock::acquire(&config.store.lock)?;

    let (bot, ctx) = open_context(&config).await?;
    info!(channel_id = config.channel_id, "Bot started");

    if let Some(addr) = config.health_addr {
        metrics::spawn_health_server(addr);
    }

    if let Some(keepalive) = config.keepalive.clone() {
        info!(url = %keepalive.url, interval_secs = keepalive.interval_secs, "Keep-alive enabled");
        spawn_keepalive(keepalive);
    }

    let reconciler = spawn_reconciler(Arc::clone(&ctx));

    let result = run_dispatcher(bot, ctx, &config.transport).await;
    reconciler.abort();

    result?;
    info!("Bot stopped");
    Ok(())
}

async fn reconcile_once(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = Config::load(config_path)?;
    prepare_store_dir(&config)?;
    let _lock = StoreLock::acquire(&config.store.lock)?;

    let (_, ctx) = open_context(&config).await?;
    let start = Instant::now();
    let summary = Reconciler::new(Arc::clone(&ctx)).run_pass(now_unix()).await?;
    metrics::record_pass(start.elapsed(), ctx.store.known_count().await);

    println!("Checked:          {}", summary.checked);
    println!("Departed:         {}", summary.departed);
    println!("Rejoined:         {}", summary.rejoined);
    println!("Notices sent:     {}", summary.notices_sent);
    println!("Send failures:    {}", summary.send_failures);
    println!("Lookup failures:  {}", summary.lookup_failures);
    println!("At notice cap:    {}", summary.capped);
    Ok(())
}

async fn status(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = Config::load(config_path)?;
    prepare_store_dir(&config)?;
    let store = MemberStore::open(config.store.clone()).await?;

    let policy = config.retention.policy;
    let now = now_unix();
    let departures = store.departures().await;

    println!("Known members: {}", store.known_count().await);
    println!("Departed:      {}", departures.len());

    if departures.is_empty() {
        return Ok(());
    }

    println!();
    println!("{:<16} {:>6}  State", "User", "Sent");
    for (user, record) in &departures {
        let state = match policy.state_of(Some(record), now) {
            RetentionState::Joined => "joined".to_string(),
            RetentionState::AwaitingFirstContact { since } => {
                format!("first notice in {}s", remaining(since, policy.first_contact_delay_secs, now))
            }
            RetentionState::AwaitingFollowup { last_notice_at } => format!(
                "next notice in {}s",
                remaining(last_notice_at, policy.followup_interval_secs, now)
            ),
            RetentionState::Exhausted => "cap reached".to_string(),
        };
        println!("{:<16} {:>6}  {}", user, record.occurrence_count, state);
    }
    Ok(())
}

fn remaining(since: f64, delay_secs: u64, now: f64) -> u64 {
    (since + delay_secs as f64 - now).max(0.0).ceil() as u64
}

fn init_config(output: &Path, force: bool) -> anyhow::Result<()> {
    if output.exists() && !force {
        warn!(path = %output.display(), "Config already exists, use --force to overwrite");
        anyhow::bail!("{} already exists", output.display());
    }
    std::fs::write(output, EXAMPLE_CONFIG)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    println!("Wrote {}", output.display());
    Ok(())
}
