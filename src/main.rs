use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};

use trendflow::binance::{BinanceClient, DEFAULT_BASE_URL};
use trendflow::config::Config;
use trendflow::runner::Runner;
use trendflow::sink::{BroadcastSink, LogSink, MultiSink, SignalSink};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to a JSON config file (missing fields fall back to defaults)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Symbols to analyze (comma-separated, overrides the config file)
    #[arg(short, long)]
    symbols: Option<String>,

    /// Binance REST base URL
    #[arg(long, env = "BINANCE_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// Poll interval in seconds (overrides the config file)
    #[arg(short, long)]
    poll_interval: Option<u64>,

    /// Run a single analysis cycle and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("trendflow=info".parse().unwrap()),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(symbols) = &args.symbols {
        config.symbols = symbols.split(',').map(|s| s.trim().to_string()).collect();
    }
    if let Some(seconds) = args.poll_interval {
        config.poll_interval_seconds = seconds;
    }
    config.validate().context("invalid configuration")?;

    info!("Starting trendflow signal engine");
    info!("Symbols: {}", config.symbols.join(", "));
    info!(
        "Timeframes: macro {} | micro {}",
        config.macro_timeframe, config.micro_timeframe
    );
    info!(
        "EMA {}/{} | oscillator {} | divergence lookback {} | trend confirm {}",
        config.ema_fast_period,
        config.ema_slow_period,
        config.oscillator_period,
        config.divergence_lookback,
        config.trend_confirm_bars
    );

    let source = BinanceClient::new(args.base_url)?;
    let (broadcast, _rx) = BroadcastSink::new(1000);
    let sink = MultiSink::new(vec![
        Box::new(LogSink) as Box<dyn SignalSink>,
        Box::new(broadcast),
    ]);
    let mut runner = Runner::new(&config, source, sink)?;

    if args.once {
        runner.run_cycle(Utc::now()).await;
        return Ok(());
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(config.poll_interval_seconds));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                runner.run_cycle(Utc::now()).await;
            }
            result = tokio::signal::ctrl_c() => {
                if let Err(err) = result {
                    error!("failed to listen for shutdown signal: {err}");
                }
                info!("Shutting down");
                break;
            }
        }
    }

    Ok(())
}
