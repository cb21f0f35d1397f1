use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use daytrader::api::{BrokerGateway, IbkrClient};
use daytrader::config::{AppConfig, FileInputs};
use daytrader::execution::QuoteFeed;
use daytrader::market::MarketSession;
use daytrader::persistence::{DailyStore, MemoryStore, RedisStore};
use daytrader::{Result, TradingEngine};
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Intraday trading against the IBKR Client Portal gateway")]
struct Cli {
    /// Config file (extension optional); DAYTRADER__* env vars override it
    #[arg(short, long, default_value = "config/daytrader")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll the company list and trade until Ctrl+C
    Run {
        /// Run a single cycle and exit
        #[arg(long)]
        once: bool,

        /// Keep day state in memory instead of Redis
        #[arg(long)]
        memory_store: bool,
    },
    /// Print the current quote for one ticker
    Quote { ticker: String },
    /// List the positions the broker holds for the account
    Positions,
    /// Show gateway authentication status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config)?;
    let gateway = IbkrClient::from_config(&config)?;

    match cli.command {
        Command::Run { once, memory_store } => {
            check_auth(&gateway).await;
            if memory_store {
                tracing::warn!("Using in-memory store, day state is lost on exit");
                run(&config, gateway, MemoryStore::new(), once).await?;
            } else {
                let store = RedisStore::new(&config.redis_url, config.store_timeout_secs)
                    .await
                    .context("Failed to connect to Redis")?;
                run(&config, gateway, store, once).await?;
            }
        }
        Command::Quote { ticker } => print_quote(&config, &gateway, &ticker).await?,
        Command::Positions => print_positions(&gateway).await?,
        Command::Status => print_status(&gateway).await?,
    }

    Ok(())
}

fn setup_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("daytrader=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn check_auth(gateway: &IbkrClient) {
    match gateway.auth_status().await {
        Ok(status) if status.authenticated => tracing::info!("✅ Gateway session authenticated"),
        Ok(status) => tracing::warn!(
            "⚠️  Gateway session not authenticated (connected: {}, competing: {}); log in through the gateway",
            status.connected,
            status.competing
        ),
        Err(e) => tracing::warn!("⚠️  Could not reach gateway: {}", e),
    }
}

async fn run<S: DailyStore>(
    config: &AppConfig,
    gateway: IbkrClient,
    store: S,
    once: bool,
) -> anyhow::Result<()> {
    let session = MarketSession::from_config(config)?;
    let inputs = FileInputs::from_config(config);
    let warmup = Duration::from_millis(config.snapshot_warmup_ms);

    let mut engine = TradingEngine::new(gateway, store, inputs, session, warmup);
    if let Err(e) = engine.restore_day(Utc::now()).await {
        tracing::warn!("Could not restore today's positions: {}", e);
    }

    if once {
        let report = engine.run_cycle(Utc::now()).await;
        if let Some(reason) = report.skipped {
            tracing::warn!("Cycle skipped: {}", reason);
        }
        return Ok(());
    }

    tracing::info!("🚀 Daytrader starting");
    tracing::info!("  Gateway: {}", config.gateway_url);
    tracing::info!("  Files: {}", config.files_dir.display());
    tracing::info!(
        "  Session: {}-{} {} (closing window {} min)",
        config.market_open,
        config.market_close,
        config.exchange_timezone,
        config.closing_window_minutes
    );
    tracing::info!("  Poll interval: {}s", config.poll_interval_secs);
    tracing::info!("\nPress Ctrl+C to stop...\n");

    let period = Duration::from_secs(config.poll_interval_secs.max(1));
    let mut ticker = interval_at(Instant::now(), period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("\n⚠️  Received Ctrl+C, shutting down...");
                break;
            }
            _ = ticker.tick() => {
                engine.run_cycle(Utc::now()).await;
            }
        }
    }

    tracing::info!(
        "👋 Daytrader stopped ({} open, realized {:.2})",
        engine.day().positions.open_count(),
        engine.day().positions.realized_pnl()
    );
    Ok(())
}

async fn print_quote(config: &AppConfig, gateway: &IbkrClient, ticker: &str) -> anyhow::Result<()> {
    let session = MarketSession::from_config(config)?;
    let mut feed = QuoteFeed::new(Duration::from_millis(config.snapshot_warmup_ms));

    let quote = feed
        .fetch_quote(gateway, &ticker.to_uppercase(), &session, Utc::now())
        .await
        .with_context(|| format!("Failed to fetch quote for {}", ticker))?;

    println!("{}", daytrader::market::format_quote_line(&quote));
    if let Some(close) = quote.previous_close {
        println!("Previous close: ${:.2}", close);
    }
    Ok(())
}

async fn print_positions(gateway: &IbkrClient) -> anyhow::Result<()> {
    let account_id = gateway
        .account_id()
        .await
        .context("Failed to fetch accounts")?;
    let positions = gateway
        .portfolio_positions(&account_id)
        .await
        .with_context(|| format!("Failed to fetch positions for {}", account_id))?;

    if positions.is_empty() {
        println!("No positions in {}", account_id);
        return Ok(());
    }

    println!("Positions in {}:", account_id);
    for position in &positions {
        println!("  {}", position.summary_line());
    }
    Ok(())
}

async fn print_status(gateway: &IbkrClient) -> anyhow::Result<()> {
    let status = gateway
        .auth_status()
        .await
        .context("Failed to query gateway auth status")?;

    println!("Authenticated: {}", status.authenticated);
    println!("Connected:     {}", status.connected);
    println!("Competing:     {}", status.competing);
    if let Some(message) = status.message.filter(|m| !m.is_empty()) {
        println!("Message:       {}", message);
    }
    Ok(())
}
