//! provdir-pipeline - Provider Directory Validation Pipeline
//!
//! Validates and enriches provider directory records batch by batch:
//! verification against external registries, site enrichment, weighted
//! confidence scoring, and publishing into the versioned directory with
//! review/hold queues for everything that cannot be committed automatically.

use anyhow::Result;
use clap::Parser;
use provdir_pipeline::collaborators::{Collaborators, NotificationDrafter};
use provdir_pipeline::collaborators::documents::DocumentClient;
use provdir_pipeline::collaborators::geocoder::GeocoderClient;
use provdir_pipeline::collaborators::registry::RegistryClient;
use provdir_pipeline::collaborators::site::SiteClient;
use provdir_pipeline::models::PipelineRun;
use provdir_pipeline::services::DirectoryNotifier;
use provdir_pipeline::PipelineOrchestrator;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "provdir-pipeline", about = "Provider directory validation pipeline")]
struct Cli {
    /// Input batch of provider rows
    input: PathBuf,

    /// Config file path (default: platform config dir)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Data directory for the directory database and exports
    #[arg(long, env = "PROVDIR_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Override the per-stage worker pool size
    #[arg(long)]
    concurrency: Option<usize>,

    /// Resume a previous run from its last checkpointed stage
    #[arg(long)]
    resume: Option<Uuid>,

    /// Skip the directory export step
    #[arg(long)]
    no_export: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();

    info!("Starting provdir-pipeline");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // Configuration: fatal on invalid weights/thresholds, before anything runs
    let mut config = provdir_common::config::load_config(cli.config.as_deref())?;
    if let Some(concurrency) = cli.concurrency {
        config.pipeline.concurrency = concurrency;
        config.validate()?;
    }

    let data_dir = provdir_common::config::resolve_data_dir(cli.data_dir.as_deref());
    let db_path = data_dir.join("directory.db");
    info!("Database: {}", db_path.display());

    let db_pool = provdir_pipeline::db::init_database_pool(&db_path).await?;

    let stale = provdir_pipeline::db::runs::cleanup_stale_runs(&db_pool).await?;
    if stale > 0 {
        info!(stale, "Cancelled stale runs from a previous process");
    }

    let timeout = Duration::from_secs(config.pipeline.collaborator_timeout_secs);
    let collaborators = build_collaborators(&config, timeout);

    // Read the batch; malformed rows are reported per-row, not dropped
    let parsed = provdir_pipeline::input::read_batch(&cli.input)?;

    let mut run = match cli.resume {
        Some(run_id) => provdir_pipeline::db::runs::load_run(&db_pool, run_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("No run {} to resume", run_id))?,
        None => PipelineRun::new(cli.input.display().to_string()),
    };
    for row in &parsed.rejected {
        tracing::warn!(line = row.line, reason = %row.reason, "Input row rejected");
    }
    if cli.resume.is_none() {
        run.rejected = parsed.rejected.clone();
    }

    let event_bus = provdir_common::events::EventBus::new(1024);
    let orchestrator =
        PipelineOrchestrator::new(db_pool.clone(), config, event_bus, collaborators);

    // Cooperative cancellation on Ctrl-C: in-flight collaborator calls
    // complete or time out, no new records are dispatched.
    let cancel_token = CancellationToken::new();
    {
        let cancel_token = cancel_token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Cancellation requested");
                cancel_token.cancel();
            }
        });
    }

    let (_run, report) = orchestrator
        .execute_run(run, parsed.records, cancel_token)
        .await?;

    println!("{}", report.render());

    if !cli.no_export {
        let export_dir = data_dir.join("exports");
        let exported = provdir_pipeline::export::export_directory(
            orchestrator.store(),
            &export_dir.join("directory.json"),
            &export_dir.join("directory.csv"),
        )
        .await?;
        info!(exported, dir = %export_dir.display(), "Directory export written");
    }

    Ok(())
}

fn build_collaborators(
    config: &provdir_common::config::TomlConfig,
    timeout: Duration,
) -> Collaborators {
    let collaborators_config = &config.collaborators;

    let registry = Some(Arc::new(RegistryClient::new(
        collaborators_config.registry_base_url.clone(),
        timeout,
    )) as Arc<dyn provdir_pipeline::collaborators::IdentityRegistry>);

    let geocoder = collaborators_config.geocoder_api_key.as_ref().map(|key| {
        Arc::new(GeocoderClient::new(
            collaborators_config.geocoder_base_url.clone(),
            key.clone(),
            timeout,
        )) as Arc<dyn provdir_pipeline::collaborators::Geocoder>
    });
    if geocoder.is_none() {
        tracing::warn!("No geocoder API key configured; address and phone checks disabled");
    }

    let documents = collaborators_config.document_reader_url.as_ref().map(|url| {
        Arc::new(DocumentClient::new(url.clone(), timeout))
            as Arc<dyn provdir_pipeline::collaborators::DocumentReader>
    });

    let site = collaborators_config.site_extractor_url.as_ref().map(|url| {
        Arc::new(SiteClient::new(url.clone(), timeout))
            as Arc<dyn provdir_pipeline::collaborators::SiteExtractor>
    });

    Collaborators {
        registry,
        geocoder,
        documents,
        site,
        notifier: Some(Arc::new(DirectoryNotifier::default()) as Arc<dyn NotificationDrafter>),
    }
}
