#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod control;
pub mod fallback;
pub mod images;
pub mod llm_output;
pub mod maintenance;
pub mod pipeline;
pub mod publish;
pub mod rewrite;
pub mod watermark;

use std::sync::Arc;

use chrono::Utc;
use common::{
    error::AppError,
    scheduler::Scheduler,
    storage::{
        db::SurrealDbClient,
        types::pipeline_job::{JobKind, PipelineJob, DEFAULT_LEASE_SECS},
    },
};
use ingestion_pipeline::SourcePoller;
pub use pipeline::{ArticlePipeline, PipelineConfig, PipelineTuning, ProcessOutcome};
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Routes claimed jobs to the stage that handles them.
pub struct JobDispatcher {
    db: Arc<SurrealDbClient>,
    poller: SourcePoller,
    pipeline: Arc<ArticlePipeline>,
    scheduler: Arc<dyn Scheduler>,
}

impl JobDispatcher {
    pub fn new(
        db: Arc<SurrealDbClient>,
        poller: SourcePoller,
        pipeline: Arc<ArticlePipeline>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        Self {
            db,
            poller,
            pipeline,
            scheduler,
        }
    }

    async fn dispatch(&self, kind: &JobKind) -> Result<(), AppError> {
        let config = self.pipeline.config();
        match kind {
            JobKind::PollSource { source_id } => {
                let summary = self.poller.poll_by_id(source_id).await?;
                info!(%source_id, created = summary.created, skipped = summary.skipped, "poll finished");
            }
            JobKind::PollVelocity { velocity } => {
                maintenance::fan_out_velocity(&self.db, &self.scheduler, *velocity).await?;
            }
            JobKind::ProcessArticle { article_id } => {
                let outcome = self.pipeline.process(article_id).await?;
                info!(%article_id, ?outcome, "article job finished");
            }
            JobKind::ProcessPendingForSite { site_id } => {
                maintenance::queue_pending_for_site(
                    &self.db,
                    &self.scheduler,
                    site_id,
                    config.tuning.pending_batch_limit,
                )
                .await?;
            }
            JobKind::ReconcileStale => {
                let reconciled = maintenance::reconcile_stale(&self.db, &config.retention).await?;
                info!(reconciled, "stale processing sweep finished");
            }
            JobKind::PurgeExpired => {
                maintenance::purge_expired(&self.db, &config.retention).await?;
            }
        }
        Ok(())
    }

    /// Run one claimed job and record its outcome on the job row.
    #[tracing::instrument(
        skip_all,
        fields(
            job_id = %job.id,
            kind = job.kind.label(),
            attempt = job.attempts,
            worker_id = job.worker_id.as_deref().unwrap_or("unknown-worker")
        )
    )]
    pub async fn process_job(&self, job: PipelineJob) -> Result<(), AppError> {
        let running = job.mark_processing(&self.db).await?;

        match self.dispatch(&running.kind).await {
            Ok(()) => {
                running.mark_succeeded(&self.db).await?;
                info!(job_id = %running.id, attempt = running.attempts, "job succeeded");
                Ok(())
            }
            Err(err) => {
                let reason = err.to_string();
                let retryable = !matches!(err, AppError::Validation(_) | AppError::NotFound(_));

                if retryable && running.can_retry() {
                    let delay = self.retry_delay(running.attempts);
                    running.mark_failed(reason.clone(), delay, &self.db).await?;
                    warn!(
                        job_id = %running.id,
                        attempt = running.attempts,
                        retry_in_secs = delay.as_secs(),
                        "job failed; scheduled retry"
                    );
                } else {
                    let failed = running
                        .mark_failed(reason.clone(), Duration::from_secs(0), &self.db)
                        .await?;
                    failed.mark_dead_letter(&self.db).await?;
                    warn!(
                        job_id = %failed.id,
                        attempt = failed.attempts,
                        "job failed; moved to dead letter queue"
                    );
                }

                Err(AppError::Processing(reason))
            }
        }
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        let tuning = &self.pipeline.config().tuning;
        let capped_attempt = attempt
            .saturating_sub(1)
            .min(tuning.retry_backoff_cap_exponent);
        let multiplier = 2_u64.saturating_pow(capped_attempt);
        let delay = tuning.retry_base_delay_secs.saturating_mul(multiplier);

        Duration::from_secs(delay.min(tuning.retry_max_delay_secs))
    }
}

pub async fn run_worker_loop(
    db: Arc<SurrealDbClient>,
    dispatcher: Arc<JobDispatcher>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let worker_id = format!("pipeline-worker-{}", Uuid::new_v4());
    let lease_duration = Duration::from_secs(u64::try_from(DEFAULT_LEASE_SECS).unwrap_or(600));
    let idle_backoff = Duration::from_millis(500);

    loop {
        match PipelineJob::claim_next_ready(&db, &worker_id, Utc::now(), lease_duration).await {
            Ok(Some(job)) => {
                let job_id = job.id.clone();
                info!(
                    %worker_id,
                    %job_id,
                    kind = job.kind.label(),
                    attempt = job.attempts,
                    "claimed job"
                );
                if let Err(err) = dispatcher.process_job(job).await {
                    error!(%worker_id, %job_id, error = %err, "job failed");
                }
            }
            Ok(None) => {
                sleep(idle_backoff).await;
            }
            Err(err) => {
                error!(%worker_id, error = %err, "failed to claim job");
                warn!("Backing off for 1s after claim error");
                sleep(Duration::from_secs(1)).await;
            }
        }
    }
}
