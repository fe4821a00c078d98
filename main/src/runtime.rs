//! Wiring shared by the binaries.

use std::{sync::Arc, time::Duration};

use async_openai::{config::OpenAIConfig, Client};
use common::{
    scheduler::{enqueue_periodic, DbScheduler, Scheduler},
    similarity::{SimilarityIndex, SurrealSimilarityIndex},
    storage::{
        db::SurrealDbClient,
        types::{pipeline_job::JobKind, site::VelocityMode},
    },
    utils::{config::AppConfig, embedding::EmbeddingProvider, retry::RetryPolicy},
};
use ingestion_pipeline::{DeduplicationGate, SourceFetcher, SourcePoller};
use processing_pipeline::{
    control::ControlSurface,
    publish::{CredentialStore, Publisher, WordPressResolver},
    run_worker_loop, ArticlePipeline, JobDispatcher,
};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();
}

pub async fn connect(config: &AppConfig) -> Result<Arc<SurrealDbClient>, BoxError> {
    let db = SurrealDbClient::new(
        &config.surrealdb_address,
        &config.surrealdb_username,
        &config.surrealdb_password,
        &config.surrealdb_namespace,
        &config.surrealdb_database,
    )
    .await?;
    Ok(Arc::new(db))
}

pub fn openai_client(config: &AppConfig) -> Arc<Client<OpenAIConfig>> {
    Arc::new(Client::with_config(
        OpenAIConfig::new()
            .with_api_key(&config.openai_api_key)
            .with_api_base(&config.openai_base_url),
    ))
}

/// Control surface with its own publishing client, for the API.
pub fn control_surface(
    db: &Arc<SurrealDbClient>,
    config: &AppConfig,
) -> Result<ControlSurface, BoxError> {
    let resolver = WordPressResolver::new(CredentialStore::new(config.site_credentials.clone()))?;
    let publisher = Publisher::new(Arc::new(resolver), RetryPolicy::standard());
    let scheduler: Arc<dyn Scheduler> = Arc::new(DbScheduler::new(Arc::clone(db)));
    Ok(ControlSurface::new(Arc::clone(db), scheduler, publisher))
}

/// Build the worker collaborators, ensure the schema, start the periodic
/// schedules and `worker_concurrency` job loops.
pub async fn start_workers(
    db: Arc<SurrealDbClient>,
    config: &AppConfig,
) -> Result<Vec<JoinHandle<()>>, BoxError> {
    let openai_client = openai_client(config);

    let embedding_provider =
        Arc::new(EmbeddingProvider::from_config(config, Arc::clone(&openai_client)).await?);
    db.ensure_initialized(embedding_provider.dimension()).await?;
    info!(
        embedding_backend = embedding_provider.backend_label(),
        embedding_dimension = embedding_provider.dimension(),
        "Embedding provider initialized"
    );

    let index: Arc<dyn SimilarityIndex> = Arc::new(SurrealSimilarityIndex::new(
        Arc::clone(&db),
        embedding_provider,
    ));
    let scheduler: Arc<dyn Scheduler> = Arc::new(DbScheduler::new(Arc::clone(&db)));

    let poller = SourcePoller::new(
        Arc::clone(&db),
        Arc::new(SourceFetcher::new()?),
        DeduplicationGate::new(Arc::clone(&index), config.similarity_threshold),
        Arc::clone(&scheduler),
    );
    let pipeline = Arc::new(ArticlePipeline::new(
        Arc::clone(&db),
        openai_client,
        config,
        index,
    )?);
    let dispatcher = Arc::new(JobDispatcher::new(
        Arc::clone(&db),
        poller,
        pipeline,
        Arc::clone(&scheduler),
    ));

    let schedules = [
        (
            JobKind::PollVelocity {
                velocity: VelocityMode::News,
            },
            config.news_poll_interval_secs,
        ),
        (
            JobKind::PollVelocity {
                velocity: VelocityMode::Evergreen,
            },
            config.evergreen_poll_interval_secs,
        ),
        (JobKind::ReconcileStale, config.reconcile_interval_secs),
        (JobKind::PurgeExpired, config.purge_interval_secs),
    ];

    let mut handles = Vec::new();
    for (job, secs) in schedules {
        if secs == 0 {
            warn!(kind = job.label(), "interval is zero; schedule disabled");
            continue;
        }
        handles.push(enqueue_periodic(
            Arc::clone(&scheduler),
            job,
            Duration::from_secs(secs),
        ));
    }

    let concurrency = config.worker_concurrency.max(1);
    info!(concurrency, "Starting worker loops");
    for _ in 0..concurrency {
        let db = Arc::clone(&db);
        let dispatcher = Arc::clone(&dispatcher);
        handles.push(tokio::spawn(async move {
            if let Err(e) = run_worker_loop(db, dispatcher).await {
                error!("Worker loop error: {}", e);
            }
        }));
    }

    Ok(handles)
}
