use std::sync::Arc;

use chrono::Utc;
use common::{
    error::AppError,
    scheduler::Scheduler,
    storage::{
        db::SurrealDbClient,
        types::{
            article::{Article, ArticleDraft},
            pipeline_job::JobKind,
            site::Site,
            source::Source,
        },
    },
};
use tracing::{debug, info, warn};

use crate::{dedup::DeduplicationGate, fetch::ContentFetcher};

/// Result of one poll. Duplicates, already-known URLs and per-item failures count as skipped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct PollSummary {
    pub created: usize,
    pub skipped: usize,
}

enum ItemOutcome {
    Created,
    Skipped,
}

/// Turns source items into durable article records.
///
/// Sole writer of `Source::last_polled_at`.
pub struct SourcePoller {
    db: Arc<SurrealDbClient>,
    fetcher: Arc<dyn ContentFetcher>,
    gate: DeduplicationGate,
    scheduler: Arc<dyn Scheduler>,
}

impl SourcePoller {
    pub fn new(
        db: Arc<SurrealDbClient>,
        fetcher: Arc<dyn ContentFetcher>,
        gate: DeduplicationGate,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        Self {
            db,
            fetcher,
            gate,
            scheduler,
        }
    }

    /// Poll a source by id. Missing or inactive sources and sites are skipped.
    pub async fn poll_by_id(&self, source_id: &str) -> Result<PollSummary, AppError> {
        let Some(source) = self.db.get_item::<Source>(source_id).await? else {
            warn!(%source_id, "poll requested for unknown source");
            return Ok(PollSummary::default());
        };
        if !source.is_active {
            debug!(%source_id, "source inactive; poll skipped");
            return Ok(PollSummary::default());
        }
        self.poll(&source).await
    }

    #[tracing::instrument(skip_all, fields(source_id = %source.id, site_id = %source.site_id))]
    pub async fn poll(&self, source: &Source) -> Result<PollSummary, AppError> {
        let Some(site) = self.db.get_item::<Site>(&source.site_id).await? else {
            warn!("source belongs to an unknown site; poll skipped");
            return Ok(PollSummary::default());
        };
        if !site.is_active {
            debug!("site inactive; poll skipped");
            return Ok(PollSummary::default());
        }

        let outcome = match self.fetcher.fetch(source).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(error = %err, url = %source.url, "source fetch failed; last poll time left untouched");
                return Ok(PollSummary::default());
            }
        };

        let mut summary = PollSummary {
            created: 0,
            skipped: outcome.failed,
        };
        for draft in outcome.drafts {
            match self.ingest_item(draft, source, &site).await {
                ItemOutcome::Created => summary.created += 1,
                ItemOutcome::Skipped => summary.skipped += 1,
            }
        }

        Source::mark_polled(&source.id, Utc::now(), &self.db).await?;

        if summary.created > 0 {
            if let Err(err) = self
                .scheduler
                .enqueue_unless_pending(JobKind::ProcessPendingForSite {
                    site_id: site.id.clone(),
                })
                .await
            {
                warn!(error = %err, "failed to signal processing intake");
            }
        }

        info!(
            created = summary.created,
            skipped = summary.skipped,
            "source polled"
        );
        Ok(summary)
    }

    async fn ingest_item(&self, draft: ArticleDraft, source: &Source, site: &Site) -> ItemOutcome {
        match self.try_ingest_item(draft, source, site).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(error = %err, "candidate item dropped");
                ItemOutcome::Skipped
            }
        }
    }

    async fn try_ingest_item(
        &self,
        draft: ArticleDraft,
        source: &Source,
        site: &Site,
    ) -> Result<ItemOutcome, AppError> {
        if Article::exists_with_original_url(&draft.original_url, &self.db).await? {
            debug!(url = %draft.original_url, "already ingested");
            return Ok(ItemOutcome::Skipped);
        }

        let verdict = self
            .gate
            .check(&draft.original_title, &draft.original_content)
            .await?;

        if verdict.is_duplicate {
            let article = Article::new_duplicate(
                draft,
                source,
                site.target_language.clone(),
                verdict.matched_id,
                verdict.similarity,
            );
            info!(
                article_id = %article.id,
                duplicate_of = ?article.duplicate_of,
                similarity = ?article.similarity_score,
                "near-duplicate recorded"
            );
            self.db.store_item(article).await?;
            return Ok(ItemOutcome::Skipped);
        }

        let article = Article::new_pending(draft, source, site.target_language.clone());
        debug!(article_id = %article.id, url = %article.original_url, "article created");
        self.db.store_item(article).await?;
        Ok(ItemOutcome::Created)
    }
}
