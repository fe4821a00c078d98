use std::time::Duration;

use chrono::Duration as ChronoDuration;
use state_machines::state_machine;
use surrealdb::sql::Datetime as SurrealDatetime;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::site::VelocityMode;

pub const MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_LEASE_SECS: i64 = 600;

/// Work a worker can pick up.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq)]
pub enum JobKind {
    PollSource { source_id: String },
    /// Fan out polls for every due source of a velocity tier.
    PollVelocity { velocity: VelocityMode },
    ProcessArticle { article_id: String },
    /// Queue every PENDING article of a site for processing.
    ProcessPendingForSite { site_id: String },
    ReconcileStale,
    PurgeExpired,
}

impl JobKind {
    pub fn label(&self) -> &'static str {
        match self {
            JobKind::PollSource { .. } => "poll_source",
            JobKind::PollVelocity { .. } => "poll_velocity",
            JobKind::ProcessArticle { .. } => "process_article",
            JobKind::ProcessPendingForSite { .. } => "process_pending_for_site",
            JobKind::ReconcileStale => "reconcile_stale",
            JobKind::PurgeExpired => "purge_expired",
        }
    }

    /// Processing jobs go ahead of polling and housekeeping.
    fn priority(&self) -> i32 {
        match self {
            JobKind::ProcessArticle { .. } => 10,
            JobKind::ProcessPendingForSite { .. } => 5,
            _ => 0,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub enum JobState {
    #[default]
    Pending,
    Reserved,
    Processing,
    Succeeded,
    Failed,
    DeadLetter,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "Pending",
            JobState::Reserved => "Reserved",
            JobState::Processing => "Processing",
            JobState::Succeeded => "Succeeded",
            JobState::Failed => "Failed",
            JobState::DeadLetter => "DeadLetter",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::DeadLetter)
    }
}

#[derive(Debug, Clone, Copy)]
enum JobTransition {
    Reserve,
    StartProcessing,
    Succeed,
    Fail,
    DeadLetter,
}

impl JobTransition {
    fn as_str(&self) -> &'static str {
        match self {
            JobTransition::Reserve => "reserve",
            JobTransition::StartProcessing => "start_processing",
            JobTransition::Succeed => "succeed",
            JobTransition::Fail => "fail",
            JobTransition::DeadLetter => "deadletter",
        }
    }
}

mod lifecycle {
    use super::state_machine;

    state_machine! {
        name: JobLifecycleMachine,
        initial: Pending,
        states: [Pending, Reserved, Processing, Succeeded, Failed, DeadLetter],
        events {
            reserve {
                transition: { from: Pending, to: Reserved }
                transition: { from: Failed, to: Reserved }
            }
            start_processing {
                transition: { from: Reserved, to: Processing }
            }
            succeed {
                transition: { from: Processing, to: Succeeded }
            }
            fail {
                transition: { from: Processing, to: Failed }
            }
            deadletter {
                transition: { from: Failed, to: DeadLetter }
            }
        }
    }

    pub(super) fn pending() -> JobLifecycleMachine<(), Pending> {
        JobLifecycleMachine::new(())
    }

    pub(super) fn reserved() -> Option<JobLifecycleMachine<(), Reserved>> {
        pending().reserve().ok()
    }

    pub(super) fn processing() -> Option<JobLifecycleMachine<(), Processing>> {
        reserved().and_then(|machine| machine.start_processing().ok())
    }

    pub(super) fn failed() -> Option<JobLifecycleMachine<(), Failed>> {
        processing().and_then(|machine| machine.fail().ok())
    }
}

fn invalid_transition(state: JobState, event: JobTransition) -> AppError {
    AppError::Validation(format!(
        "Invalid job transition: {} -> {}",
        state.as_str(),
        event.as_str()
    ))
}

fn compute_next_state(state: JobState, event: JobTransition) -> Result<JobState, AppError> {
    use lifecycle::{failed, pending, processing, reserved};
    let next = match (state, event) {
        (JobState::Pending, JobTransition::Reserve) => {
            pending().reserve().ok().map(|_| JobState::Reserved)
        }
        (JobState::Failed, JobTransition::Reserve) => failed()
            .and_then(|machine| machine.reserve().ok())
            .map(|_| JobState::Reserved),
        (JobState::Reserved, JobTransition::StartProcessing) => reserved()
            .and_then(|machine| machine.start_processing().ok())
            .map(|_| JobState::Processing),
        (JobState::Processing, JobTransition::Succeed) => processing()
            .and_then(|machine| machine.succeed().ok())
            .map(|_| JobState::Succeeded),
        (JobState::Processing, JobTransition::Fail) => processing()
            .and_then(|machine| machine.fail().ok())
            .map(|_| JobState::Failed),
        (JobState::Failed, JobTransition::DeadLetter) => failed()
            .and_then(|machine| machine.deadletter().ok())
            .map(|_| JobState::DeadLetter),
        _ => None,
    };
    next.ok_or_else(|| invalid_transition(state, event))
}

stored_object!(PipelineJob, "pipeline_job", {
    kind: JobKind,
    state: JobState,
    attempts: u32,
    max_attempts: u32,
    #[serde(serialize_with = "serialize_datetime", deserialize_with = "deserialize_datetime")]
    scheduled_at: DateTime<Utc>,
    #[serde(
        serialize_with = "serialize_option_datetime",
        deserialize_with = "deserialize_option_datetime",
        default
    )]
    locked_at: Option<DateTime<Utc>>,
    lease_duration_secs: i64,
    worker_id: Option<String>,
    error_message: Option<String>,
    priority: i32
});

impl PipelineJob {
    pub fn new(kind: JobKind) -> Self {
        let now = Utc::now();
        let priority = kind.priority();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            kind,
            state: JobState::Pending,
            attempts: 0,
            max_attempts: MAX_ATTEMPTS,
            scheduled_at: now,
            locked_at: None,
            lease_duration_secs: DEFAULT_LEASE_SECS,
            worker_id: None,
            error_message: None,
            priority,
        }
    }

    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    pub async fn create_and_add_to_db(
        kind: JobKind,
        db: &SurrealDbClient,
    ) -> Result<PipelineJob, AppError> {
        let job = Self::new(kind);
        db.store_item(job.clone()).await?;
        Ok(job)
    }

    /// Whether a job of this exact kind is queued and has not started yet.
    ///
    /// Reserved and running jobs do not count: they may already have read the
    /// state a new request is about, so a fresh copy must still be queued.
    pub async fn has_waiting(kind: &JobKind, db: &SurrealDbClient) -> Result<bool, AppError> {
        let ids: Vec<Thing> = db
            .query(
                "SELECT VALUE id FROM type::table($table)
                 WHERE kind = $kind AND state IN $waiting_states
                 LIMIT 1",
            )
            .bind(("table", Self::table_name()))
            .bind(("kind", kind.clone()))
            .bind((
                "waiting_states",
                vec![JobState::Pending.as_str(), JobState::Failed.as_str()],
            ))
            .await?
            .take(0)?;

        Ok(!ids.is_empty())
    }

    /// Reserve the next runnable job for `worker_id`.
    ///
    /// Runnable means pending or failed-with-attempts-left and due, or reserved/processing
    /// under an expired lease (a crashed worker).
    pub async fn claim_next_ready(
        db: &SurrealDbClient,
        worker_id: &str,
        now: DateTime<Utc>,
        lease_duration: Duration,
    ) -> Result<Option<PipelineJob>, AppError> {
        debug_assert!(compute_next_state(JobState::Pending, JobTransition::Reserve).is_ok());
        debug_assert!(compute_next_state(JobState::Failed, JobTransition::Reserve).is_ok());

        const CLAIM_QUERY: &str = r#"
            UPDATE (
                SELECT * FROM type::table($table)
                WHERE scheduled_at <= $now
                  AND (
                        (state IN $fresh_states AND attempts < max_attempts)
                        OR (
                            state IN $leased_states
                            AND time::unix($now) - time::unix(locked_at) >= lease_duration_secs
                        )
                  )
                ORDER BY priority DESC, scheduled_at ASC, created_at ASC
                LIMIT 1
            )
            SET attempts = if state IN $fresh_states THEN attempts + 1 ELSE attempts END,
                state = $reserved,
                locked_at = $now,
                worker_id = $worker_id,
                lease_duration_secs = $lease_secs,
                updated_at = $now
            RETURN *;
        "#;

        let mut result = db
            .client
            .query(CLAIM_QUERY)
            .bind(("table", Self::table_name()))
            .bind((
                "fresh_states",
                vec![JobState::Pending.as_str(), JobState::Failed.as_str()],
            ))
            .bind((
                "leased_states",
                vec![JobState::Reserved.as_str(), JobState::Processing.as_str()],
            ))
            .bind(("reserved", JobState::Reserved.as_str()))
            .bind(("now", SurrealDatetime::from(now)))
            .bind(("worker_id", worker_id.to_string()))
            .bind((
                "lease_secs",
                i64::try_from(lease_duration.as_secs()).unwrap_or(DEFAULT_LEASE_SECS),
            ))
            .await?;

        let job: Option<PipelineJob> = result.take(0)?;
        Ok(job)
    }

    async fn transition(
        &self,
        event: JobTransition,
        query: &'static str,
        retry_at: DateTime<Utc>,
        error_message: Option<String>,
        db: &SurrealDbClient,
    ) -> Result<PipelineJob, AppError> {
        let next = compute_next_state(self.state, event)?;
        let now = Utc::now();

        let mut result = db
            .client
            .query(query)
            .bind(("table", Self::table_name()))
            .bind(("id", self.id.clone()))
            .bind(("next", next.as_str()))
            .bind(("current", self.state.as_str()))
            .bind(("now", SurrealDatetime::from(now)))
            .bind(("retry_at", SurrealDatetime::from(retry_at)))
            .bind(("error_message", error_message))
            .bind(("worker_id", self.worker_id.clone().unwrap_or_default()))
            .await?;

        let updated: Option<PipelineJob> = result.take(0)?;
        updated.ok_or_else(|| invalid_transition(self.state, event))
    }

    pub async fn mark_processing(&self, db: &SurrealDbClient) -> Result<PipelineJob, AppError> {
        const QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET state = $next, locked_at = $now, updated_at = $now
            WHERE state = $current AND worker_id = $worker_id
            RETURN *;
        "#;
        self.transition(JobTransition::StartProcessing, QUERY, Utc::now(), None, db)
            .await
    }

    pub async fn mark_succeeded(&self, db: &SurrealDbClient) -> Result<PipelineJob, AppError> {
        const QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET state = $next,
                locked_at = NONE,
                worker_id = NONE,
                error_message = NONE,
                updated_at = $now
            WHERE state = $current AND worker_id = $worker_id
            RETURN *;
        "#;
        self.transition(JobTransition::Succeed, QUERY, Utc::now(), None, db)
            .await
    }

    /// Release the job for another attempt after `retry_delay`.
    pub async fn mark_failed(
        &self,
        message: String,
        retry_delay: Duration,
        db: &SurrealDbClient,
    ) -> Result<PipelineJob, AppError> {
        const QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET state = $next,
                locked_at = NONE,
                worker_id = NONE,
                scheduled_at = $retry_at,
                error_message = $error_message,
                updated_at = $now
            WHERE state = $current AND worker_id = $worker_id
            RETURN *;
        "#;
        let retry_at = Utc::now()
            + ChronoDuration::from_std(retry_delay).unwrap_or_else(|_| ChronoDuration::seconds(30));
        self.transition(JobTransition::Fail, QUERY, retry_at, Some(message), db)
            .await
    }

    pub async fn mark_dead_letter(&self, db: &SurrealDbClient) -> Result<PipelineJob, AppError> {
        const QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET state = $next, updated_at = $now
            WHERE state = $current
            RETURN *;
        "#;
        self.transition(
            JobTransition::DeadLetter,
            QUERY,
            Utc::now(),
            self.error_message.clone(),
            db,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_db() -> SurrealDbClient {
        SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory surrealdb")
    }

    #[tokio::test]
    async fn claim_prefers_processing_jobs() {
        let db = memory_db().await;
        PipelineJob::create_and_add_to_db(JobKind::PurgeExpired, &db)
            .await
            .expect("store");
        PipelineJob::create_and_add_to_db(
            JobKind::ProcessArticle {
                article_id: "a1".into(),
            },
            &db,
        )
        .await
        .expect("store");

        let claimed = PipelineJob::claim_next_ready(&db, "w1", Utc::now(), Duration::from_secs(60))
            .await
            .expect("claim")
            .expect("job");
        assert_eq!(claimed.kind.label(), "process_article");
        assert_eq!(claimed.state, JobState::Reserved);
        assert_eq!(claimed.attempts, 1);
        assert_eq!(claimed.worker_id.as_deref(), Some("w1"));
    }

    #[tokio::test]
    async fn full_success_path() {
        let db = memory_db().await;
        PipelineJob::create_and_add_to_db(JobKind::ReconcileStale, &db)
            .await
            .expect("store");

        let claimed = PipelineJob::claim_next_ready(&db, "w1", Utc::now(), Duration::from_secs(60))
            .await
            .expect("claim")
            .expect("job");
        let processing = claimed.mark_processing(&db).await.expect("processing");
        assert_eq!(processing.state, JobState::Processing);
        let done = processing.mark_succeeded(&db).await.expect("succeeded");
        assert_eq!(done.state, JobState::Succeeded);
        assert!(done.worker_id.is_none());

        let none = PipelineJob::claim_next_ready(&db, "w2", Utc::now(), Duration::from_secs(60))
            .await
            .expect("claim");
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn failure_backs_off_then_dead_letters() {
        let db = memory_db().await;
        let now = Utc::now();
        PipelineJob::create_and_add_to_db(JobKind::PurgeExpired, &db)
            .await
            .expect("store");

        let processing = PipelineJob::claim_next_ready(&db, "w1", now, Duration::from_secs(60))
            .await
            .expect("claim")
            .expect("job")
            .mark_processing(&db)
            .await
            .expect("processing");
        let failed = processing
            .mark_failed("db down".into(), Duration::from_secs(30), &db)
            .await
            .expect("failed");
        assert_eq!(failed.state, JobState::Failed);
        assert!(failed.scheduled_at > now);

        // Not due yet.
        let early = PipelineJob::claim_next_ready(&db, "w1", now, Duration::from_secs(60))
            .await
            .expect("claim");
        assert!(early.is_none());

        let dead = failed.mark_dead_letter(&db).await.expect("dead letter");
        assert_eq!(dead.state, JobState::DeadLetter);
        assert_eq!(dead.error_message.as_deref(), Some("db down"));
    }

    #[tokio::test]
    async fn expired_lease_is_reclaimed() {
        let db = memory_db().await;
        PipelineJob::create_and_add_to_db(JobKind::ReconcileStale, &db)
            .await
            .expect("store");
        let now = Utc::now();
        PipelineJob::claim_next_ready(&db, "crashed", now, Duration::from_secs(60))
            .await
            .expect("claim")
            .expect("job");

        let during_lease = PipelineJob::claim_next_ready(&db, "w2", now, Duration::from_secs(60))
            .await
            .expect("claim");
        assert!(during_lease.is_none());

        let later = now + ChronoDuration::seconds(61);
        let reclaimed = PipelineJob::claim_next_ready(&db, "w2", later, Duration::from_secs(60))
            .await
            .expect("claim")
            .expect("job");
        assert_eq!(reclaimed.worker_id.as_deref(), Some("w2"));
        assert_eq!(reclaimed.attempts, 1);
    }

    #[tokio::test]
    async fn waiting_lookup_matches_kind_and_ignores_running_jobs() {
        let db = memory_db().await;
        let kind = JobKind::PollVelocity {
            velocity: VelocityMode::News,
        };
        assert!(!PipelineJob::has_waiting(&kind, &db).await.expect("lookup"));
        PipelineJob::create_and_add_to_db(kind.clone(), &db)
            .await
            .expect("store");
        assert!(PipelineJob::has_waiting(&kind, &db).await.expect("lookup"));
        assert!(!PipelineJob::has_waiting(
            &JobKind::PollVelocity {
                velocity: VelocityMode::Evergreen
            },
            &db
        )
        .await
        .expect("lookup"));

        PipelineJob::claim_next_ready(&db, "w1", Utc::now(), Duration::from_secs(60))
            .await
            .expect("claim")
            .expect("job");
        assert!(!PipelineJob::has_waiting(&kind, &db).await.expect("lookup"));
    }
}
