use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use ideascout_common::{AppConfig, DateWindow, PipelineConfig, Topic};
use ideascout_pipeline::dry_run::{dry_run, DryRunTarget};
use ideascout_pipeline::{reaper, PipelineDeps, ScanOrchestrator, Worker, WorkerPool};
use ideascout_store::{PgJobQueue, PgScanStore, QueueSettings, ScanStore};

#[derive(Parser)]
#[command(name = "ideascout", about = "Business-idea discovery pipeline")]
struct Cli {
    /// Pipeline tuning file (defaults to $IDEASCOUT_CONFIG or ./ideascout.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply database migrations
    Migrate,
    /// Manage tracked topics
    Topic {
        #[command(subcommand)]
        command: TopicCommand,
    },
    /// Start a scan for a topic (returns the active scan if one is running)
    Start {
        topic_id: Uuid,
        /// Scan the last N days instead of the configured default
        #[arg(long)]
        days: Option<i64>,
    },
    /// Show a scan's status and counters
    Status { scan_id: Uuid },
    /// Cancel a running scan
    Cancel { scan_id: Uuid },
    /// Start a fresh scan in place of a failed one
    Retry { scan_id: Uuid },
    /// Run the worker pools and the stale-scan reaper until Ctrl-C
    Worker,
    /// Classify stored items without writing anything
    DryRun {
        #[arg(long, conflicts_with = "item")]
        scan: Option<Uuid>,
        #[arg(long)]
        item: Vec<Uuid>,
    },
    /// Fail scans that stopped making progress
    Reap {
        #[arg(long)]
        max_age_minutes: Option<i64>,
    },
}

#[derive(Subcommand)]
enum TopicCommand {
    Add {
        name: String,
        #[arg(long = "subreddit")]
        subreddits: Vec<String>,
        #[arg(long = "keyword")]
        keywords: Vec<String>,
    },
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("ideascout=info".parse()?);
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;
    let cli = Cli::parse();

    let config = AppConfig::from_env()?;
    config.log_redacted();
    let pipeline = match cli.config {
        Some(ref path) => PipelineConfig::load(path)?,
        None => PipelineConfig::from_env()?,
    };

    let pool = PgPoolOptions::new()
        .max_connections(pool_size(&pipeline))
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    match cli.command {
        Command::Migrate => {
            PgScanStore::new(pool).migrate().await?;
            info!("Migrations complete");
        }
        Command::Topic {
            command: TopicCommand::Add {
                name,
                subreddits,
                keywords,
            },
        } => {
            let topic = Topic::new(name, subreddits, keywords);
            PgScanStore::new(pool).create_topic(&topic).await?;
            println!("{}", topic.id);
        }
        Command::Start { topic_id, days } => {
            let window = days.map(DateWindow::last_days);
            let view = orchestrator(pool, &pipeline).start_scan(topic_id, window).await?;
            print_json(&view)?;
        }
        Command::Status { scan_id } => {
            let view = orchestrator(pool, &pipeline).get_scan_status(scan_id).await?;
            print_json(&view)?;
        }
        Command::Cancel { scan_id } => {
            orchestrator(pool, &pipeline).cancel_scan(scan_id).await?;
            println!("cancelled {scan_id}");
        }
        Command::Retry { scan_id } => {
            let new_id = orchestrator(pool, &pipeline).retry_scan(scan_id).await?;
            println!("{new_id}");
        }
        Command::Worker => {
            let deps = PipelineDeps::from_config(pool, &config, pipeline)?;
            let pool = WorkerPool::start(Worker::new(deps));
            info!("Workers running. Press Ctrl-C to stop.");
            tokio::signal::ctrl_c().await?;
            info!("Shutdown requested, finishing in-flight jobs");
            pool.shutdown().await;
        }
        Command::DryRun { scan, item } => {
            let target = match scan {
                Some(scan_id) => DryRunTarget::Scan(scan_id),
                None if !item.is_empty() => DryRunTarget::Items(item),
                None => anyhow::bail!("pass --scan <id> or at least one --item <id>"),
            };
            let deps = PipelineDeps::from_config(pool, &config, pipeline)?;
            let decisions = dry_run(&deps, target).await?;
            print_json(&decisions)?;
        }
        Command::Reap { max_age_minutes } => {
            let minutes = max_age_minutes.unwrap_or(pipeline.reaper.max_age_minutes);
            let store: Arc<dyn ScanStore> = Arc::new(PgScanStore::new(pool));
            let reaped = reaper::reap_stale_scans(store, chrono::Duration::minutes(minutes)).await?;
            info!(count = reaped.len(), at = %Utc::now(), "Reap finished");
            for id in reaped {
                println!("{id}");
            }
        }
    }

    Ok(())
}

fn orchestrator(pool: PgPool, pipeline: &PipelineConfig) -> ScanOrchestrator {
    let settings = QueueSettings {
        lease: Duration::from_secs(pipeline.queue.lease_secs),
        max_attempts: pipeline.queue.max_attempts,
        retry_delay: Duration::from_secs(pipeline.queue.retry_delay_secs),
    };
    ScanOrchestrator::new(
        Arc::new(PgScanStore::new(pool.clone())),
        Arc::new(PgJobQueue::new(pool, settings)),
        pipeline.scan.clone(),
    )
}

/// One connection per worker loop plus headroom for the reaper and guards.
fn pool_size(pipeline: &PipelineConfig) -> u32 {
    let workers = pipeline.workers.fetch + pipeline.workers.classify + pipeline.workers.extract;
    (workers as u32).saturating_mul(2).max(5)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
