use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, warn};

use crate::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::pipeline_job::{JobKind, PipelineJob},
    },
};

/// Hands jobs to the worker pool.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Queue a job and return its id.
    async fn enqueue(&self, job: JobKind) -> Result<String, AppError>;

    /// Queue a job unless an identical one is still waiting to start.
    async fn enqueue_unless_pending(&self, job: JobKind) -> Result<Option<String>, AppError>;
}

/// Scheduler persisting jobs in the `pipeline_job` table.
pub struct DbScheduler {
    db: Arc<SurrealDbClient>,
}

impl DbScheduler {
    pub fn new(db: Arc<SurrealDbClient>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Scheduler for DbScheduler {
    async fn enqueue(&self, job: JobKind) -> Result<String, AppError> {
        let label = job.label();
        let stored = PipelineJob::create_and_add_to_db(job, &self.db).await?;
        debug!(job_id = %stored.id, kind = label, "job enqueued");
        Ok(stored.id)
    }

    async fn enqueue_unless_pending(&self, job: JobKind) -> Result<Option<String>, AppError> {
        if PipelineJob::has_waiting(&job, &self.db).await? {
            debug!(kind = job.label(), "identical job already queued; not enqueued");
            return Ok(None);
        }
        self.enqueue(job).await.map(Some)
    }
}

/// Enqueue `job` every `interval`, starting immediately.
///
/// Ticks that find the previous copy still queued are skipped, so a backed-up
/// queue never piles up copies of the same job.
pub fn enqueue_periodic(
    scheduler: Arc<dyn Scheduler>,
    job: JobKind,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if let Err(err) = scheduler.enqueue_unless_pending(job.clone()).await {
                warn!(kind = job.label(), error = %err, "periodic enqueue failed");
            }
        }
    })
}

#[cfg(any(test, feature = "test-utils"))]
pub mod testing {
    use super::{async_trait, AppError, JobKind, Scheduler};
    use tokio::sync::Mutex;

    /// In-memory scheduler that records every job it is given.
    #[derive(Default)]
    pub struct RecordingScheduler {
        pub jobs: Mutex<Vec<JobKind>>,
    }

    impl RecordingScheduler {
        pub async fn recorded(&self) -> Vec<JobKind> {
            self.jobs.lock().await.clone()
        }
    }

    #[async_trait]
    impl Scheduler for RecordingScheduler {
        async fn enqueue(&self, job: JobKind) -> Result<String, AppError> {
            let mut jobs = self.jobs.lock().await;
            jobs.push(job);
            Ok(format!("job-{}", jobs.len()))
        }

        async fn enqueue_unless_pending(&self, job: JobKind) -> Result<Option<String>, AppError> {
            if self.jobs.lock().await.contains(&job) {
                return Ok(None);
            }
            self.enqueue(job).await.map(Some)
        }
    }
}
