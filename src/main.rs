use anyhow::Context;
use autotrader::config::AppConfig;
use autotrader::execution::Engine;
use autotrader::models::TradeStatus;
use autotrader::strategy::SignalStrategy;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::{interval, Duration, Instant};

#[derive(Parser)]
#[command(name = "autotrader", about = "Candle-driven strategy execution engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the configured strategies against the paper exchange
    Run {
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Stop after this many seconds instead of waiting for Ctrl-C
        #[arg(long)]
        duration_secs: Option<u64>,
    },
    /// Load and validate a configuration, then exit
    CheckConfig {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            duration_secs,
        } => {
            let app = AppConfig::load(config.as_deref())?;
            setup_logging(&app.log_filter);
            run(app, duration_secs).await
        }
        Command::CheckConfig { config } => {
            let app = AppConfig::load(config.as_deref())?;
            println!("Configuration OK: {} strategies", app.strategies.len());
            for s in &app.strategies {
                println!(
                    "  {} {} {} | balance {}% | TP {}% | SL {}%",
                    s.strategy.name(),
                    s.symbol,
                    s.timeframe,
                    s.balance_pct,
                    s.take_profit,
                    s.stop_loss
                );
            }
            Ok(())
        }
    }
}

// ============================================================================
// Run loop
// ============================================================================

async fn run(app: AppConfig, duration_secs: Option<u64>) -> anyhow::Result<()> {
    tracing::info!("🚀 autotrader starting with {} strategies", app.strategies.len());

    let exchange = Arc::new(app.paper.build_exchange());
    let mut engine = Engine::new(exchange.clone(), exchange, app.poll);
    engine
        .start(&app.strategies)
        .await
        .context("Failed to activate strategies")?;

    let deadline = duration_secs.map(|secs| Instant::now() + Duration::from_secs(secs));
    let mut log_ticker = interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            _ = log_ticker.tick() => {
                for entry in engine.drain_logs() {
                    println!("{} [{}] {}", entry.timestamp.format("%H:%M:%S"), entry.source, entry.message);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl-C received, shutting down");
                break;
            }
            _ = sleep_until(deadline) => {
                tracing::info!("Run duration elapsed, shutting down");
                break;
            }
        }
    }

    let trades = engine.shutdown().await?;
    print_summary(&trades);
    Ok(())
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn print_summary(trades: &[autotrader::models::Trade]) {
    let closed: Vec<_> = trades
        .iter()
        .filter(|t| t.status == TradeStatus::Closed)
        .collect();
    let realized: f64 = closed.iter().map(|t| t.pnl).sum();
    let unrealized: f64 = trades
        .iter()
        .filter(|t| t.status == TradeStatus::Open)
        .map(|t| t.pnl)
        .sum();

    println!("\n=== Session summary ===");
    println!("Trades: {} ({} closed)", trades.len(), closed.len());
    for t in trades {
        println!(
            "  {} {} {:?} qty {} entry {:?} exit {:?} pnl {:.4} {}",
            t.strategy_tag,
            t.side,
            t.status,
            t.quantity,
            t.entry_price,
            t.exit_price,
            t.pnl,
            t.exit_reason.map(|r| r.to_string()).unwrap_or_default()
        );
    }
    println!("Realized PnL: {:.4}", realized);
    println!("Unrealized PnL: {:.4}", unrealized);
}

// ============================================================================
// Initialization Functions
// ============================================================================

fn setup_logging(filter: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
