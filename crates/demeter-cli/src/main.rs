use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use demeter_client::{DataStore, OperatorNotifier, PlatformWaker, ReqwestFetcher, StorageConfig};
use demeter_core::job::{DEFAULT_QUEUE, JobStatus, WorkerConfig};
use demeter_core::job_queue::JobQueue;
use demeter_core::traits::CollectionResolver;
use demeter_core::{
    CachedResolver, DispatchConfig, HarvestController, HarvestServices, JobDispatcher,
    RegistryResolver, RunConfig, TracingHarvestReporter, TracingWorkerReporter, WorkerService,
};
use demeter_db::{Database, DatabaseConfig, IngestionStatusRepository};

#[derive(Parser)]
#[command(name = "demeter", version, about = "Metadata harvester for digital collections")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Harvest one collection in this process
    Harvest {
        /// Operator email or name, recorded on the run
        operator: String,

        /// Registry API URL of the collection
        collection_url: String,
    },

    /// Queue one harvest job per collection
    Enqueue {
        /// Operator email or name, recorded on every job
        operator: String,

        /// Registry API URLs of the collections
        #[arg(required = true)]
        collection_urls: Vec<String>,

        /// Queue the jobs are placed on
        #[arg(short, long, env = "DEMETER_QUEUE", default_value = DEFAULT_QUEUE)]
        queue: String,

        /// Upper bound on each run, in seconds
        #[arg(short, long, default_value_t = 28_800)]
        timeout: u64,
    },

    /// Claim and run queued harvest jobs until interrupted
    Worker {
        /// Queue to claim jobs from
        #[arg(short, long, env = "DEMETER_QUEUE", default_value = DEFAULT_QUEUE)]
        queue: String,

        /// Worker identity (defaults to a random id)
        #[arg(long, env = "DEMETER_WORKER_ID")]
        worker_id: Option<String>,

        /// Seconds between polls of an empty queue
        #[arg(long, default_value_t = 5)]
        poll_interval: u64,
    },

    /// List harvest jobs
    Jobs {
        /// Only jobs in this status (pending, running, completed, failed, cancelled)
        #[arg(short, long)]
        status: Option<String>,

        /// Number of jobs to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Cancel a pending or running job
    Cancel {
        job_id: Uuid,
    },

    /// Show recent runs of a collection
    History {
        collection_id: u64,

        /// Number of runs to show
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("demeter=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Harvest {
            operator,
            collection_url,
        } => cmd_harvest(&operator, &collection_url).await?,
        Commands::Enqueue {
            operator,
            collection_urls,
            queue,
            timeout,
        } => cmd_enqueue(&operator, &collection_urls, &queue, Duration::from_secs(timeout)).await?,
        Commands::Worker {
            queue,
            worker_id,
            poll_interval,
        } => cmd_worker(&queue, worker_id, Duration::from_secs(poll_interval)).await?,
        Commands::Jobs { status, limit } => cmd_jobs(status.as_deref(), limit).await?,
        Commands::Cancel { job_id } => {
            let db = connect_db().await?;
            db.job_repo().cancel_job(job_id).await?;
            println!("Cancelled {job_id}");
        }
        Commands::History {
            collection_id,
            limit,
        } => cmd_history(collection_id, limit).await?,
    }

    Ok(())
}

/// Connect to PostgreSQL and apply pending migrations.
async fn connect_db() -> Result<Database> {
    let config = DatabaseConfig::from_env()?;
    let db = Database::connect(&config)
        .await
        .context("Failed to connect to database")?;
    db.migrate().await?;
    Ok(db)
}

fn build_fetcher() -> Result<ReqwestFetcher> {
    let fetcher = ReqwestFetcher::new().context("Failed to create HTTP client")?;
    let token = std::env::var("NUXEO_TOKEN").ok();
    Ok(fetcher.with_nuxeo_token(token.as_deref())?)
}

async fn build_services(
    db: &Database,
) -> Result<HarvestServices<ReqwestFetcher, DataStore, IngestionStatusRepository, OperatorNotifier>> {
    let storage = StorageConfig::from_env()?;
    Ok(HarvestServices {
        fetcher: build_fetcher()?,
        store: DataStore::from_config(&storage).await,
        status_store: db.status_repo(),
        notifier: OperatorNotifier::from_env()?,
    })
}

async fn cmd_harvest(operator: &str, collection_url: &str) -> Result<()> {
    let run_config = RunConfig::from_env()?;
    let db = connect_db().await?;
    let services = build_services(&db).await?;

    let collection = RegistryResolver::new(services.fetcher.clone())
        .resolve(collection_url)
        .await
        .with_context(|| format!("Failed to resolve {collection_url}"))?;

    tracing::info!(
        collection_id = collection.id,
        harvest_type = %collection.harvest_type,
        "Harvesting {}",
        collection.name
    );

    let controller = HarvestController::new(operator, collection, run_config, services);
    let count = controller.run(&TracingHarvestReporter).await?;

    println!("Harvested {count} records (run {})", controller.run_id());
    Ok(())
}

async fn cmd_enqueue(
    operator: &str,
    collection_urls: &[String],
    queue: &str,
    job_timeout: Duration,
) -> Result<()> {
    let config = DatabaseConfig::from_env()?;
    // The backend may still be waking up; the dispatcher probes it.
    let db = Database::connect_lazy(&config)?;
    let dispatcher = JobDispatcher::new(
        db.job_repo(),
        PlatformWaker::from_env()?,
        DispatchConfig::default(),
    );

    let jobs = dispatcher
        .enqueue(operator, collection_urls, queue, job_timeout)
        .await?;

    for job in jobs {
        println!("{}  {}", job.id, job.collection_url);
    }
    Ok(())
}

async fn cmd_worker(queue: &str, worker_id: Option<String>, poll_interval: Duration) -> Result<()> {
    let run_config = RunConfig::from_env()?;
    let db = connect_db().await?;
    let services = build_services(&db).await?;
    let resolver = CachedResolver::new(
        RegistryResolver::new(services.fetcher.clone()),
        1_000,
        Duration::from_secs(300),
    );

    let mut config = WorkerConfig::default()
        .with_queue_name(queue)
        .with_poll_interval(poll_interval);
    if let Some(id) = worker_id {
        config = config.with_worker_id(id);
    }

    let worker = WorkerService::new(db.job_repo(), resolver, services, run_config, config);

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received");
        }
        signal_token.cancel();
    });

    worker.run(cancel, &TracingWorkerReporter).await?;
    Ok(())
}

async fn cmd_jobs(status: Option<&str>, limit: usize) -> Result<()> {
    let status = status
        .map(|s| s.parse::<JobStatus>())
        .transpose()
        .map_err(|e| anyhow::anyhow!(e))?;

    let db = connect_db().await?;
    let jobs = db.job_repo().list_jobs(status, limit).await?;

    if jobs.is_empty() {
        println!("No jobs");
        return Ok(());
    }

    for job in jobs {
        let records = job
            .record_count
            .map(|n| n.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}  {:<9}  {:<12}  {:>8}  {}  {}",
            job.id,
            job.status,
            job.queue_name,
            records,
            job.created_at.format("%Y-%m-%d %H:%M"),
            job.collection_url
        );
        if let Some(err) = &job.error_message {
            println!("    error: {err}");
        }
    }
    Ok(())
}

async fn cmd_history(collection_id: u64, limit: usize) -> Result<()> {
    let db = connect_db().await?;
    let runs = db.status_repo().history(collection_id, limit).await?;

    if runs.is_empty() {
        println!("No runs for collection {collection_id}");
        return Ok(());
    }

    for run in runs {
        println!("{}", serde_json::to_string_pretty(&run.to_document())?);
    }
    Ok(())
}
