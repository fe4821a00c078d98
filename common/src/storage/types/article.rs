use state_machines::state_machine;
use surrealdb::sql::Datetime as SurrealDatetime;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::source::Source;

/// Upper bound on the stored failure description.
pub const MAX_ERROR_MESSAGE_CHARS: usize = 1_000;
pub const STALE_PROCESSING_MESSAGE: &str = "processing timed out before a final outcome was recorded";

#[derive(Debug, Default, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ArticleStatus {
    #[default]
    Pending,
    Processing,
    Published,
    Failed,
    Duplicate,
}

impl ArticleStatus {
    pub const ALL: [ArticleStatus; 5] = [
        ArticleStatus::Pending,
        ArticleStatus::Processing,
        ArticleStatus::Published,
        ArticleStatus::Failed,
        ArticleStatus::Duplicate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ArticleStatus::Pending => "pending",
            ArticleStatus::Processing => "processing",
            ArticleStatus::Published => "published",
            ArticleStatus::Failed => "failed",
            ArticleStatus::Duplicate => "duplicate",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ArticleStatus::Published | ArticleStatus::Duplicate)
    }
}

impl std::str::FromStr for ArticleStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| AppError::Validation(format!("unknown article status '{s}'")))
    }
}

/// Where the featured image of an article came from.
#[derive(Debug, Default, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ImageSource {
    Original,
    Stock,
    AiGenerated,
    #[default]
    None,
}

impl ImageSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageSource::Original => "original",
            ImageSource::Stock => "stock",
            ImageSource::AiGenerated => "ai-generated",
            ImageSource::None => "none",
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum ArticleTransition {
    Claim,
    Publish,
    Fail,
    Retry,
}

impl ArticleTransition {
    fn as_str(&self) -> &'static str {
        match self {
            ArticleTransition::Claim => "claim",
            ArticleTransition::Publish => "publish",
            ArticleTransition::Fail => "fail",
            ArticleTransition::Retry => "retry",
        }
    }
}

// Duplicate is terminal from creation and never enters the machine.
mod lifecycle {
    use super::state_machine;

    state_machine! {
        name: ArticleLifecycleMachine,
        initial: Pending,
        states: [Pending, Processing, Published, Failed],
        events {
            claim {
                transition: { from: Pending, to: Processing }
            }
            publish {
                transition: { from: Processing, to: Published }
            }
            fail {
                transition: { from: Processing, to: Failed }
            }
            retry {
                transition: { from: Failed, to: Pending }
            }
        }
    }

    pub(super) fn pending() -> ArticleLifecycleMachine<(), Pending> {
        ArticleLifecycleMachine::new(())
    }

    pub(super) fn processing() -> Option<ArticleLifecycleMachine<(), Processing>> {
        pending().claim().ok()
    }

    pub(super) fn failed() -> Option<ArticleLifecycleMachine<(), Failed>> {
        processing().and_then(|machine| machine.fail().ok())
    }
}

fn invalid_transition(status: ArticleStatus, event: ArticleTransition) -> AppError {
    AppError::Validation(format!(
        "Invalid article transition: {} -> {}",
        status.as_str(),
        event.as_str()
    ))
}

fn compute_next_status(
    status: ArticleStatus,
    event: ArticleTransition,
) -> Result<ArticleStatus, AppError> {
    use lifecycle::{failed, pending, processing};
    let next = match (status, event) {
        (ArticleStatus::Pending, ArticleTransition::Claim) => pending()
            .claim()
            .ok()
            .map(|_| ArticleStatus::Processing),
        (ArticleStatus::Processing, ArticleTransition::Publish) => processing()
            .and_then(|machine| machine.publish().ok())
            .map(|_| ArticleStatus::Published),
        (ArticleStatus::Processing, ArticleTransition::Fail) => processing()
            .and_then(|machine| machine.fail().ok())
            .map(|_| ArticleStatus::Failed),
        (ArticleStatus::Failed, ArticleTransition::Retry) => failed()
            .and_then(|machine| machine.retry().ok())
            .map(|_| ArticleStatus::Pending),
        _ => None,
    };
    next.ok_or_else(|| invalid_transition(status, event))
}

/// Clip a failure description to the stored bound.
pub fn bounded_error_message(message: &str) -> String {
    if message.chars().count() <= MAX_ERROR_MESSAGE_CHARS {
        return message.to_string();
    }
    let mut clipped: String = message
        .chars()
        .take(MAX_ERROR_MESSAGE_CHARS.saturating_sub(3))
        .collect();
    clipped.push_str("...");
    clipped
}

/// A normalized candidate produced by a source poll, before it becomes an article.
#[derive(Debug, Clone, PartialEq)]
pub struct ArticleDraft {
    pub original_url: String,
    pub original_title: String,
    pub original_content: String,
    pub original_image_url: Option<String>,
}

stored_object!(Article, "article", {
    source_id: String,
    /// Always the owning source's site; fixed at creation.
    site_id: String,
    original_url: String,
    original_title: String,
    original_content: String,
    original_image_url: Option<String>,
    processed_title: Option<String>,
    processed_content: Option<String>,
    summary: Option<String>,
    source_language: Option<String>,
    target_language: String,
    category_id: Option<i64>,
    category_name: Option<String>,
    similarity_score: Option<f32>,
    duplicate_of: Option<String>,
    image_url: Option<String>,
    image_source: Option<ImageSource>,
    post_id: Option<String>,
    post_url: Option<String>,
    status: ArticleStatus,
    error_message: Option<String>,
    retry_count: u32,
    #[serde(
        serialize_with = "serialize_option_datetime",
        deserialize_with = "deserialize_option_datetime",
        default
    )]
    processing_started_at: Option<DateTime<Utc>>,
    #[serde(
        serialize_with = "serialize_option_datetime",
        deserialize_with = "deserialize_option_datetime",
        default
    )]
    processed_at: Option<DateTime<Utc>>,
    #[serde(
        serialize_with = "serialize_option_datetime",
        deserialize_with = "deserialize_option_datetime",
        default
    )]
    published_at: Option<DateTime<Utc>>
});

/// Per-status article totals.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StatusCounts {
    pub pending: u64,
    pub processing: u64,
    pub published: u64,
    pub failed: u64,
    pub duplicate: u64,
    pub total: u64,
}

/// Listing filter for read accessors.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct ArticleFilter {
    pub site_id: Option<String>,
    pub source_id: Option<String>,
    pub status: Option<ArticleStatus>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl Article {
    fn from_draft(
        draft: ArticleDraft,
        source: &Source,
        target_language: String,
        status: ArticleStatus,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            source_id: source.id.clone(),
            site_id: source.site_id.clone(),
            original_url: draft.original_url,
            original_title: draft.original_title,
            original_content: draft.original_content,
            original_image_url: draft.original_image_url,
            processed_title: None,
            processed_content: None,
            summary: None,
            source_language: source.language.clone(),
            target_language,
            category_id: None,
            category_name: None,
            similarity_score: None,
            duplicate_of: None,
            image_url: None,
            image_source: None,
            post_id: None,
            post_url: None,
            status,
            error_message: None,
            retry_count: 0,
            processing_started_at: None,
            processed_at: None,
            published_at: None,
        }
    }

    /// A fresh article awaiting processing.
    pub fn new_pending(draft: ArticleDraft, source: &Source, target_language: String) -> Self {
        Self::from_draft(draft, source, target_language, ArticleStatus::Pending)
    }

    /// An article recorded only for audit: a near-duplicate of `matched_id`.
    pub fn new_duplicate(
        draft: ArticleDraft,
        source: &Source,
        target_language: String,
        matched_id: Option<String>,
        similarity: Option<f32>,
    ) -> Self {
        let mut article =
            Self::from_draft(draft, source, target_language, ArticleStatus::Duplicate);
        article.duplicate_of = matched_id;
        article.similarity_score = similarity.map(|score| score.clamp(0.0, 1.0));
        article
    }

    /// Text used for rewriting: processed if present, else original.
    pub fn working_title(&self) -> &str {
        self.processed_title.as_deref().unwrap_or(&self.original_title)
    }

    pub async fn exists_with_original_url(
        url: &str,
        db: &SurrealDbClient,
    ) -> Result<bool, AppError> {
        let ids: Vec<Thing> = db
            .query("SELECT VALUE id FROM type::table($table) WHERE original_url = $url LIMIT 1")
            .bind(("table", Self::table_name()))
            .bind(("url", url.to_string()))
            .await?
            .take(0)?;

        Ok(!ids.is_empty())
    }

    /// Move a PENDING article to PROCESSING.
    ///
    /// Returns `None` when the article is missing or not pending, so a
    /// concurrent second claim observes the first one and backs off.
    pub async fn claim(id: &str, db: &SurrealDbClient) -> Result<Option<Article>, AppError> {
        debug_assert!(compute_next_status(ArticleStatus::Pending, ArticleTransition::Claim).is_ok());

        const CLAIM_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET status = $processing,
                processing_started_at = $now,
                updated_at = $now
            WHERE status = $pending
            RETURN *;
        "#;

        let now = Utc::now();
        let mut result = db
            .client
            .query(CLAIM_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", id.to_string()))
            .bind(("processing", ArticleStatus::Processing.as_str()))
            .bind(("pending", ArticleStatus::Pending.as_str()))
            .bind(("now", SurrealDatetime::from(now)))
            .await?;

        let claimed: Option<Article> = result.take(0)?;
        Ok(claimed)
    }

    /// Restart the stale-processing clock on a claim this worker still holds.
    ///
    /// Returns `false` once the article has left PROCESSING, e.g. after the
    /// reconcile sweep failed it; the caller must then abandon the attempt.
    pub async fn renew_claim(id: &str, db: &SurrealDbClient) -> Result<bool, AppError> {
        const RENEW_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET processing_started_at = $now,
                updated_at = $now
            WHERE status = $processing
            RETURN *;
        "#;

        let now = Utc::now();
        let mut result = db
            .client
            .query(RENEW_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", id.to_string()))
            .bind(("processing", ArticleStatus::Processing.as_str()))
            .bind(("now", SurrealDatetime::from(now)))
            .await?;

        let renewed: Option<Article> = result.take(0)?;
        Ok(renewed.is_some())
    }

    /// Commit the outcome of a successful processing attempt.
    pub async fn finalize_published(&self, db: &SurrealDbClient) -> Result<Article, AppError> {
        let next = compute_next_status(self.status, ArticleTransition::Publish)?;
        debug_assert_eq!(next, ArticleStatus::Published);

        const PUBLISH_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET status = $published,
                processed_title = $processed_title,
                processed_content = $processed_content,
                summary = $summary,
                source_language = $source_language,
                category_id = $category_id,
                category_name = $category_name,
                image_url = $image_url,
                image_source = $image_source,
                post_id = $post_id,
                post_url = $post_url,
                error_message = NONE,
                processed_at = $now,
                published_at = $now,
                updated_at = $now
            WHERE status = $processing
            RETURN *;
        "#;

        let now = Utc::now();
        let mut result = db
            .client
            .query(PUBLISH_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", self.id.clone()))
            .bind(("published", ArticleStatus::Published.as_str()))
            .bind(("processing", ArticleStatus::Processing.as_str()))
            .bind(("processed_title", self.processed_title.clone()))
            .bind(("processed_content", self.processed_content.clone()))
            .bind(("summary", self.summary.clone()))
            .bind(("source_language", self.source_language.clone()))
            .bind(("category_id", self.category_id))
            .bind(("category_name", self.category_name.clone()))
            .bind(("image_url", self.image_url.clone()))
            .bind(("image_source", self.image_source))
            .bind(("post_id", self.post_id.clone()))
            .bind(("post_url", self.post_url.clone()))
            .bind(("now", SurrealDatetime::from(now)))
            .await?;

        let updated: Option<Article> = result.take(0)?;
        updated.ok_or_else(|| invalid_transition(self.status, ArticleTransition::Publish))
    }

    /// Record a failed attempt. The message is clipped to a bounded length.
    pub async fn mark_failed(
        id: &str,
        message: &str,
        db: &SurrealDbClient,
    ) -> Result<Article, AppError> {
        const FAIL_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET status = $failed,
                error_message = $error_message,
                processed_at = $now,
                updated_at = $now
            WHERE status = $processing
            RETURN *;
        "#;

        let now = Utc::now();
        let mut result = db
            .client
            .query(FAIL_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", id.to_string()))
            .bind(("failed", ArticleStatus::Failed.as_str()))
            .bind(("processing", ArticleStatus::Processing.as_str()))
            .bind(("error_message", bounded_error_message(message)))
            .bind(("now", SurrealDatetime::from(now)))
            .await?;

        let updated: Option<Article> = result.take(0)?;
        match updated {
            Some(article) => Ok(article),
            None => Err(Self::explain_rejection(id, ArticleTransition::Fail, db).await),
        }
    }

    /// Put a FAILED article back in the queue: bumps retry_count and clears the error.
    pub async fn retry(id: &str, db: &SurrealDbClient) -> Result<Article, AppError> {
        const RETRY_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET status = $pending,
                error_message = NONE,
                retry_count = retry_count + 1,
                processing_started_at = NONE,
                updated_at = $now
            WHERE status = $failed
            RETURN *;
        "#;

        let now = Utc::now();
        let mut result = db
            .client
            .query(RETRY_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", id.to_string()))
            .bind(("pending", ArticleStatus::Pending.as_str()))
            .bind(("failed", ArticleStatus::Failed.as_str()))
            .bind(("now", SurrealDatetime::from(now)))
            .await?;

        let updated: Option<Article> = result.take(0)?;
        match updated {
            Some(article) => Ok(article),
            None => Err(Self::explain_rejection(id, ArticleTransition::Retry, db).await),
        }
    }

    async fn explain_rejection(id: &str, event: ArticleTransition, db: &SurrealDbClient) -> AppError {
        match db.get_item::<Article>(id).await {
            Ok(Some(article)) => match compute_next_status(article.status, event) {
                Err(err) => err,
                // Status changed between the update and this read.
                Ok(_) => AppError::Validation(format!(
                    "article {id} changed concurrently during {}",
                    event.as_str()
                )),
            },
            Ok(None) => AppError::NotFound(format!("article {id}")),
            Err(err) => AppError::Database(err),
        }
    }

    /// Fail every PROCESSING article whose claim is older than `cutoff`.
    pub async fn reconcile_stale(
        cutoff: DateTime<Utc>,
        db: &SurrealDbClient,
    ) -> Result<Vec<Article>, AppError> {
        const RECONCILE_QUERY: &str = r#"
            UPDATE type::table($table)
            SET status = $failed,
                error_message = $error_message,
                processed_at = $now,
                updated_at = $now
            WHERE status = $processing
              AND (processing_started_at = NONE OR processing_started_at < $cutoff)
            RETURN *;
        "#;

        let now = Utc::now();
        let mut result = db
            .client
            .query(RECONCILE_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("failed", ArticleStatus::Failed.as_str()))
            .bind(("processing", ArticleStatus::Processing.as_str()))
            .bind(("error_message", STALE_PROCESSING_MESSAGE))
            .bind(("cutoff", SurrealDatetime::from(cutoff)))
            .bind(("now", SurrealDatetime::from(now)))
            .await?;

        let reconciled: Vec<Article> = result.take(0)?;
        Ok(reconciled)
    }

    /// Hard-delete expired duplicates and exhausted failures. Returns the number removed.
    pub async fn purge_expired(
        duplicate_cutoff: DateTime<Utc>,
        failed_cutoff: DateTime<Utc>,
        retry_ceiling: u32,
        db: &SurrealDbClient,
    ) -> Result<usize, AppError> {
        const PURGE_QUERY: &str = r#"
            DELETE type::table($table)
            WHERE (status = $duplicate AND created_at < $duplicate_cutoff)
               OR (status = $failed AND created_at < $failed_cutoff AND retry_count >= $ceiling)
            RETURN BEFORE;
        "#;

        let mut result = db
            .client
            .query(PURGE_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("duplicate", ArticleStatus::Duplicate.as_str()))
            .bind(("failed", ArticleStatus::Failed.as_str()))
            .bind(("duplicate_cutoff", SurrealDatetime::from(duplicate_cutoff)))
            .bind(("failed_cutoff", SurrealDatetime::from(failed_cutoff)))
            .bind(("ceiling", retry_ceiling))
            .await?;

        let removed: Vec<Article> = result.take(0)?;
        Ok(removed.len())
    }

    /// Oldest-first PENDING articles of a site.
    pub async fn list_pending_for_site(
        site_id: &str,
        limit: u32,
        db: &SurrealDbClient,
    ) -> Result<Vec<Article>, AppError> {
        let articles: Vec<Article> = db
            .query(
                "SELECT * FROM type::table($table)
                 WHERE site_id = $site_id AND status = $pending
                 ORDER BY created_at ASC
                 LIMIT $limit",
            )
            .bind(("table", Self::table_name()))
            .bind(("site_id", site_id.to_string()))
            .bind(("pending", ArticleStatus::Pending.as_str()))
            .bind(("limit", limit))
            .await?
            .take(0)?;

        Ok(articles)
    }

    /// Newest-first listing with optional filters.
    pub async fn list(filter: &ArticleFilter, db: &SurrealDbClient) -> Result<Vec<Article>, AppError> {
        let mut clauses = Vec::new();
        if filter.site_id.is_some() {
            clauses.push("site_id = $site_id");
        }
        if filter.source_id.is_some() {
            clauses.push("source_id = $source_id");
        }
        if filter.status.is_some() {
            clauses.push("status = $status");
        }
        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let query = format!(
            "SELECT * FROM type::table($table) {where_clause}
             ORDER BY created_at DESC LIMIT $limit START $offset"
        );

        let articles: Vec<Article> = db
            .query(query)
            .bind(("table", Self::table_name()))
            .bind(("site_id", filter.site_id.clone()))
            .bind(("source_id", filter.source_id.clone()))
            .bind(("status", filter.status.map(|status| status.as_str())))
            .bind(("limit", filter.limit.unwrap_or(50).clamp(1, 500)))
            .bind(("offset", filter.offset.unwrap_or(0)))
            .await?
            .take(0)?;

        Ok(articles)
    }

    pub async fn status_counts(
        site_id: Option<&str>,
        db: &SurrealDbClient,
    ) -> Result<StatusCounts, AppError> {
        #[derive(serde::Deserialize)]
        struct Row {
            status: ArticleStatus,
            count: u64,
        }

        let query = if site_id.is_some() {
            "SELECT status, count() AS count FROM type::table($table) WHERE site_id = $site_id GROUP BY status"
        } else {
            "SELECT status, count() AS count FROM type::table($table) GROUP BY status"
        };
        let rows: Vec<Row> = db
            .query(query)
            .bind(("table", Self::table_name()))
            .bind(("site_id", site_id.map(str::to_string)))
            .await?
            .take(0)?;

        let mut counts = StatusCounts::default();
        for row in rows {
            let slot = match row.status {
                ArticleStatus::Pending => &mut counts.pending,
                ArticleStatus::Processing => &mut counts.processing,
                ArticleStatus::Published => &mut counts.published,
                ArticleStatus::Failed => &mut counts.failed,
                ArticleStatus::Duplicate => &mut counts.duplicate,
            };
            *slot = row.count;
            counts.total = counts.total.saturating_add(row.count);
        }

        Ok(counts)
    }
}
