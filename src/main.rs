use anyhow::Context;
use clap::{Parser, Subcommand};
use chrono::Utc;
use gridpool::adapters::{PostgresStore, RestPriceFeed};
use gridpool::config::{AppConfig, LoggingConfig};
use gridpool::engine::{
    AdmissionController, AllLegsExited, FifoPriority, LifecycleEngine, QueueManager,
};
use gridpool::market::{MarketData, PrecisionRules};
use gridpool::services::{
    RiskOffsetConfig, RiskOffsetEngine, TakeProfitConfig, TakeProfitMonitor,
};
use gridpool::TradeSignal;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gridpool", about = "Signal-driven grid-trading position engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine: admission ready, monitors running
    Run,
    /// Apply database migrations and exit
    Migrate,
    /// Admit a signal once and print the outcome
    Admit {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        pair: String,
        #[arg(long, default_value = "1h")]
        timeframe: String,
        #[arg(long)]
        price: Decimal,
    },
    /// Report an externally detected fill for a leg
    Fill {
        #[arg(long)]
        leg: i64,
        #[arg(long)]
        price: Decimal,
        #[arg(long)]
        order_id: Option<String>,
    },
    /// Administratively cancel a leg
    CancelLeg {
        #[arg(long)]
        leg: i64,
    },
    /// Show open groups and the deferred queue
    Status {
        #[arg(long)]
        owner: Option<String>,
    },
}

/// Everything the commands need, wired once from config
struct Engine {
    store: Arc<PostgresStore>,
    market: Arc<dyn MarketData>,
    admission: Arc<AdmissionController>,
    queue: Arc<QueueManager>,
    lifecycle: Arc<LifecycleEngine>,
    config: AppConfig,
}

async fn build_engine(config: AppConfig) -> anyhow::Result<Engine> {
    let store = Arc::new(
        PostgresStore::new(&config.database.url, config.database.max_connections).await?,
    );

    let market: Arc<dyn MarketData> = Arc::new(RestPriceFeed::new(
        &config.market.exchange,
        &config.market.price_url,
        PrecisionRules {
            price_precision: config.market.price_precision,
            amount_precision: config.market.amount_precision,
        },
    )?);

    let admission = Arc::new(AdmissionController::new(
        store.clone(),
        market.clone(),
        config.strategy.ladder.clone(),
        config.pool.max_open_groups,
        Arc::new(FifoPriority),
    ));

    let queue = Arc::new(QueueManager::new(store.clone(), admission.clone()));
    let lifecycle = Arc::new(LifecycleEngine::new(store.clone(), market.clone()));

    Ok(Engine {
        store,
        market,
        admission,
        queue,
        lifecycle,
        config,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load().context("failed to load configuration")?;
    init_logging(&config.logging);

    if let Err(errors) = config.validate() {
        for e in &errors {
            error!("Config error: {}", e);
        }
        anyhow::bail!("invalid configuration ({} error(s))", errors.len());
    }

    match cli.command {
        Commands::Migrate => {
            let store = PostgresStore::new(&config.database.url, config.database.max_connections)
                .await?;
            store.migrate().await?;
        }
        Commands::Run => {
            let engine = build_engine(config).await?;
            engine.store.migrate().await?;
            run_engine(engine).await?;
        }
        Commands::Admit {
            owner,
            pair,
            timeframe,
            price,
        } => {
            let engine = build_engine(config).await?;
            let signal = TradeSignal::new(&owner, &pair, &timeframe, price).with_payload(
                serde_json::json!({ "entry_price": price.to_string(), "source": "cli" }),
            );
            let outcome = engine.admission.admit(&signal).await?;
            println!("{:?}", outcome);
        }
        Commands::Fill { leg, price, order_id } => {
            let engine = build_engine(config).await?;
            let group_id = engine
                .lifecycle
                .on_fill_reported(leg, price, Utc::now(), order_id.as_deref())
                .await?;
            println!("leg {} filled; group {} recomputed", leg, group_id);
        }
        Commands::CancelLeg { leg } => {
            let engine = build_engine(config).await?;
            let group_id = engine.lifecycle.on_leg_cancelled(leg).await?;
            println!("leg {} cancelled; group {} recomputed", leg, group_id);
        }
        Commands::Status { owner } => {
            let engine = build_engine(config).await?;
            let groups = engine.store.list_open_groups(owner.as_deref()).await?;

            println!("{} open group(s)", groups.len());
            for g in &groups {
                println!(
                    "  #{} {} {} {} {} avg={:?} pnl%={:?}",
                    g.id.unwrap_or(-1),
                    g.owner,
                    g.pair,
                    g.timeframe,
                    g.status,
                    g.avg_entry_price,
                    g.unrealized_pnl_percent
                );
            }

            if let Some(owner) = owner.as_deref() {
                let queued = engine.queue.pending(owner).await?;
                println!("{} queued signal(s) for {}", queued.len(), owner);
                for q in &queued {
                    println!(
                        "  #{} {} {} rank={:?} replacements={} at {}",
                        q.id.unwrap_or(-1),
                        q.pair,
                        q.timeframe,
                        q.priority_rank,
                        q.replacement_count,
                        q.enqueued_at
                    );
                }
            }
        }
    }

    Ok(())
}

async fn run_engine(engine: Engine) -> anyhow::Result<()> {
    let take_profit = TakeProfitMonitor::new(
        engine.store.clone(),
        engine.market.clone(),
        engine.lifecycle.clone(),
        engine.queue.clone(),
        Arc::new(AllLegsExited),
        TakeProfitConfig {
            check_interval_secs: engine.config.monitor.take_profit_interval_secs,
        },
    );

    let risk = RiskOffsetEngine::new(
        engine.store.clone(),
        RiskOffsetConfig {
            check_interval_secs: engine.config.monitor.risk_interval_secs,
            loss_threshold_percent: engine.config.monitor.loss_threshold_percent,
        },
    );

    take_profit.start().await;
    risk.start().await;

    info!(
        "Engine running (pool bound: {}, exchange: {})",
        engine.config.pool.max_open_groups, engine.config.market.exchange
    );

    shutdown_signal().await;
    info!("Shutdown requested; stopping monitors");

    take_profit.stop();
    risk.stop();

    Ok(())
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},gridpool=debug,sqlx=warn", config.level)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if config.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
