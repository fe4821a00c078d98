//! Operations exposed to the API layer.

use std::sync::Arc;

use common::{
    error::AppError,
    scheduler::Scheduler,
    storage::{
        db::SurrealDbClient,
        types::{
            article::{Article, ArticleFilter, ArticleStatus, StatusCounts},
            pipeline_job::JobKind,
            site::{Site, SiteCategory},
            source::Source,
        },
    },
};
use serde::Serialize;
use tracing::info;

use crate::publish::{Identity, Publisher};

/// Handle returned when work was queued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueuedJob {
    pub job_id: Option<String>,
    /// False when an identical job was already outstanding.
    pub queued: bool,
}

impl From<Option<String>> for QueuedJob {
    fn from(job_id: Option<String>) -> Self {
        let queued = job_id.is_some();
        Self { job_id, queued }
    }
}

#[derive(Clone)]
pub struct ControlSurface {
    db: Arc<SurrealDbClient>,
    scheduler: Arc<dyn Scheduler>,
    publisher: Publisher,
}

impl ControlSurface {
    pub fn new(db: Arc<SurrealDbClient>, scheduler: Arc<dyn Scheduler>, publisher: Publisher) -> Self {
        Self {
            db,
            scheduler,
            publisher,
        }
    }

    pub async fn trigger_poll(&self, source_id: &str) -> Result<QueuedJob, AppError> {
        self.db
            .get_item::<Source>(source_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("source {source_id}")))?;

        let queued = self
            .scheduler
            .enqueue_unless_pending(JobKind::PollSource {
                source_id: source_id.to_string(),
            })
            .await?;
        info!(%source_id, queued = queued.is_some(), "poll requested");
        Ok(queued.into())
    }

    /// Queue a PENDING article for processing.
    pub async fn trigger_process(&self, article_id: &str) -> Result<QueuedJob, AppError> {
        let article = self.article(article_id).await?;
        if article.status != ArticleStatus::Pending {
            return Err(AppError::Validation(format!(
                "article {article_id} is {}, only pending articles can be processed",
                article.status.as_str()
            )));
        }
        self.queue_processing(article_id).await
    }

    /// Move a FAILED article back to PENDING and queue it.
    pub async fn retry(&self, article_id: &str) -> Result<Article, AppError> {
        let article = Article::retry(article_id, &self.db).await?;
        info!(%article_id, retry_count = article.retry_count, "article retry requested");
        self.queue_processing(article_id).await?;
        Ok(article)
    }

    async fn queue_processing(&self, article_id: &str) -> Result<QueuedJob, AppError> {
        let queued = self
            .scheduler
            .enqueue_unless_pending(JobKind::ProcessArticle {
                article_id: article_id.to_string(),
            })
            .await?;
        Ok(queued.into())
    }

    pub async fn article(&self, article_id: &str) -> Result<Article, AppError> {
        self.db
            .get_item::<Article>(article_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("article {article_id}")))
    }

    pub async fn list_articles(&self, filter: &ArticleFilter) -> Result<Vec<Article>, AppError> {
        Article::list(filter, &self.db).await
    }

    pub async fn stats(&self, site_id: Option<&str>) -> Result<StatusCounts, AppError> {
        Article::status_counts(site_id, &self.db).await
    }

    pub async fn sync_categories(&self, site_id: &str) -> Result<Vec<SiteCategory>, AppError> {
        let site = self.site(site_id).await?;
        self.publisher.sync_site_categories(&site, &self.db).await
    }

    pub async fn test_connection(&self, site_id: &str) -> Result<Identity, AppError> {
        let site = self.site(site_id).await?;
        self.publisher.test_connection(&site).await
    }

    async fn site(&self, site_id: &str) -> Result<Site, AppError> {
        self.db
            .get_item::<Site>(site_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("site {site_id}")))
    }
}
