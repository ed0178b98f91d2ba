use billsync::sync::{EntityKind, Strategy, SyncManager, SyncStatus};
use billsync::SyncConfig;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "billsync")]
#[command(about = "Offline-first sync for items and billings", long_about = None)]
struct Args {
    /// Backend base URL (overrides BILLSYNC_SERVER_URL)
    #[arg(long, global = true)]
    server: Option<String>,

    /// Replica database file (overrides BILLSYNC_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one sync cycle and exit
    Sync {
        /// Conflict strategy: smart, local or server
        #[arg(long, short)]
        strategy: Option<String>,
    },

    /// Show replica and queue counts
    Status,

    /// List queued changes, oldest first
    Queue,

    /// Keep syncing in the background until Ctrl+C
    Run {
        /// Periodic sync interval in seconds
        #[arg(long)]
        interval_secs: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "billsync=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = SyncConfig::from_env()?;
    if let Some(server) = args.server {
        config.server_url = server;
    }
    if let Some(db) = args.db {
        config.database_path = Some(db);
    }

    match args.command {
        Command::Sync { strategy } => {
            let strategy = match strategy {
                Some(s) => s.parse()?,
                None => config.default_strategy,
            };
            cmd_sync(config, strategy).await
        }
        Command::Status => cmd_status(config).await,
        Command::Queue => cmd_queue(config).await,
        Command::Run { interval_secs } => {
            if let Some(secs) = interval_secs {
                config.sync_interval_secs = secs;
            }
            cmd_run(config).await
        }
    }
}

async fn cmd_sync(config: SyncConfig, strategy: Strategy) -> anyhow::Result<()> {
    let manager = SyncManager::from_config(config).await?;
    manager.monitor().poll().await;

    let outcome = manager.sync_now(strategy).await;
    if outcome.success {
        println!("{} {}", "✓".green(), outcome.message);
    } else {
        eprintln!("{} {}", "✗".red(), outcome.message);
    }

    for conflict in &outcome.conflicts {
        println!(
            "  {} {} {} resolved for {:?}",
            "•".dimmed(),
            conflict.entity_type,
            conflict.id(),
            conflict.winner
        );
    }

    if !outcome.success {
        std::process::exit(1);
    }
    Ok(())
}

async fn cmd_status(config: SyncConfig) -> anyhow::Result<()> {
    let manager = SyncManager::from_config(config).await?;
    let replica = manager.replica();

    for kind in EntityKind::ALL {
        let total = replica.count(kind, None).await?;
        let pending = replica.count(kind, Some(SyncStatus::Pending)).await?;
        println!(
            "{:<10} {} records, {} pending",
            kind.as_str().bold(),
            total,
            if pending > 0 {
                pending.to_string().yellow()
            } else {
                pending.to_string().normal()
            }
        );
    }

    println!("{:<10} {} items", "queue".bold(), replica.queue_len().await?);

    match replica.last_sync_time().await? {
        Some(at) => println!("{:<10} {}", "last sync".bold(), at.to_rfc3339()),
        None => println!("{:<10} {}", "last sync".bold(), "never".dimmed()),
    }

    Ok(())
}

async fn cmd_queue(config: SyncConfig) -> anyhow::Result<()> {
    let manager = SyncManager::from_config(config).await?;
    let items = manager.replica().drain_all().await?;

    if items.is_empty() {
        println!("{} Queue is empty", "✓".green());
        return Ok(());
    }

    for item in items {
        let retries = if item.retry_count > 0 {
            format!("({} retries)", item.retry_count).yellow()
        } else {
            "".normal()
        };
        println!(
            "{} {:<6} {:<8} {} {}",
            item.enqueued_at.format("%Y-%m-%d %H:%M:%S"),
            item.operation.as_str().cyan(),
            item.entity_type.as_str(),
            item.record_id(),
            retries
        );
    }

    Ok(())
}

async fn cmd_run(config: SyncConfig) -> anyhow::Result<()> {
    let mut manager = SyncManager::from_config(config).await?;
    manager.init().await;

    let status = manager.orchestrator().add_listener(|state| {
        tracing::info!("Sync state: {:?} - {}", state.status, state.message);
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    manager.orchestrator().remove_listener(status);
    manager.shutdown().await;
    Ok(())
}
