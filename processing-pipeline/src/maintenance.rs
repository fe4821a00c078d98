//! Periodic housekeeping and fan-out jobs.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use common::{
    error::AppError,
    scheduler::Scheduler,
    storage::{
        db::SurrealDbClient,
        types::{
            article::Article,
            pipeline_job::JobKind,
            site::{Site, VelocityMode},
            source::Source,
        },
    },
};
use tracing::{info, warn};

use crate::pipeline::RetentionPolicy;

/// Fail PROCESSING articles whose claim has outlived the processing timeout.
/// They become eligible for an explicit retry like any other failure.
pub async fn reconcile_stale(
    db: &SurrealDbClient,
    retention: &RetentionPolicy,
) -> Result<usize, AppError> {
    let cutoff = Utc::now() - ChronoDuration::minutes(retention.processing_timeout_mins);
    let reconciled = Article::reconcile_stale(cutoff, db).await?;
    for article in &reconciled {
        warn!(
            article_id = %article.id,
            site_id = %article.site_id,
            "stuck article marked failed"
        );
    }
    Ok(reconciled.len())
}

pub async fn purge_expired(
    db: &SurrealDbClient,
    retention: &RetentionPolicy,
) -> Result<usize, AppError> {
    let now = Utc::now();
    let removed = Article::purge_expired(
        now - ChronoDuration::days(retention.duplicate_retention_days),
        now - ChronoDuration::days(retention.failed_retention_days),
        retention.retry_ceiling,
        db,
    )
    .await?;
    if removed > 0 {
        info!(removed, "expired articles purged");
    }
    Ok(removed)
}

/// Queue a poll for every due source of the active sites in `velocity`.
pub async fn fan_out_velocity(
    db: &SurrealDbClient,
    scheduler: &Arc<dyn Scheduler>,
    velocity: VelocityMode,
) -> Result<usize, AppError> {
    let sites = Site::list_active(velocity, db).await?;
    if sites.is_empty() {
        return Ok(0);
    }

    let site_ids = sites.into_iter().map(|site| site.id).collect();
    let now = Utc::now();
    let mut queued = 0_usize;
    for source in Source::list_active_for_sites(site_ids, db).await? {
        if !source.is_due(now) {
            continue;
        }
        let job = JobKind::PollSource {
            source_id: source.id.clone(),
        };
        if scheduler.enqueue_unless_pending(job).await?.is_some() {
            queued = queued.saturating_add(1);
        }
    }

    info!(velocity = velocity.as_str(), queued, "source polls queued");
    Ok(queued)
}

/// Queue processing for the oldest PENDING articles of a site.
pub async fn queue_pending_for_site(
    db: &SurrealDbClient,
    scheduler: &Arc<dyn Scheduler>,
    site_id: &str,
    limit: u32,
) -> Result<usize, AppError> {
    let pending = Article::list_pending_for_site(site_id, limit, db).await?;
    let mut queued = 0_usize;
    for article in pending {
        let job = JobKind::ProcessArticle {
            article_id: article.id,
        };
        if scheduler.enqueue_unless_pending(job).await?.is_some() {
            queued = queued.saturating_add(1);
        }
    }
    info!(%site_id, queued, "pending articles queued");
    Ok(queued)
}
