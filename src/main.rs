use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use codescout::config::{self, Config};
use codescout::embedding::HfInferenceClient;
use codescout::fetch::GitCloneFetcher;
use codescout::ingest::{IngestService, SubmitOutcome};
use codescout::probe::GithubSizeProbe;
use codescout::progress::ProgressBus;
use codescout::server;
use codescout::store::sqlite::SqliteStore;

#[derive(Parser)]
#[command(name = "codescout", version, about = "Repository ingestion and code retrieval service")]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "codescout.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API server.
    Serve,
    /// Ingest a single repository and exit.
    Ingest {
        /// Repository URL (GitHub, https or ssh form).
        url: String,
        /// Display name; derived from the URL when omitted.
        #[arg(long)]
        name: Option<String>,
        /// User id to record the job under.
        #[arg(long, default_value = "cli")]
        user: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "codescout=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = config::load_config(&cli.config)?;

    match cli.command {
        Command::Serve => {
            let service = build_service(&config).await?;
            server::run_server(&config.server.bind, service).await
        }
        Command::Ingest { url, name, user } => run_ingest(&config, &url, name, &user).await,
    }
}

async fn build_service(config: &Config) -> Result<IngestService> {
    let store = Arc::new(SqliteStore::connect(&config.db.path).await?);
    let embedder = Arc::new(HfInferenceClient::new(&config.embedding)?);

    Ok(IngestService::new(
        config.ingestion.clone(),
        store,
        embedder,
        Arc::new(GitCloneFetcher),
        Arc::new(GithubSizeProbe::new()?),
        Arc::new(ProgressBus::new()),
    ))
}

/// One-shot ingestion: submits the job, then waits for the detached run
/// to finish, logging progress events as they arrive.
async fn run_ingest(config: &Config, url: &str, name: Option<String>, user: &str) -> Result<()> {
    let service = build_service(config).await?;

    let name = name.unwrap_or_else(|| {
        url.trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or(url)
            .trim_end_matches(".git")
            .to_string()
    });

    let job = match service.submit(user, url, &name).await? {
        SubmitOutcome::Existing(job) => {
            tracing::info!(job_id = %job.id, status = %job.status, "repository already submitted");
            return Ok(());
        }
        SubmitOutcome::Started(job) => job,
    };

    let progress_sub = service.bus().subscribe(&job.id, |event| {
        match &event.eta {
            Some(eta) => tracing::info!(progress = event.progress, eta = %eta, "{}", event.message),
            None => tracing::info!(progress = event.progress, "{}", event.message),
        }
    });

    // submit() already spawned the run; wait for the job to leave INGESTING.
    loop {
        tokio::time::sleep(std::time::Duration::from_millis(250)).await;
        if let Some(current) = service.store().get_job(&job.id).await? {
            if current.status != codescout::models::JobStatus::Ingesting {
                tracing::info!(job_id = %current.id, status = %current.status, "finished");
                break;
            }
        }
    }

    service.bus().unsubscribe(&progress_sub);
    Ok(())
}
