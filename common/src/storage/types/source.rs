use surrealdb::sql::Datetime as SurrealDatetime;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

pub const DEFAULT_POLL_INTERVAL_MINUTES: u32 = 60;
pub const DEFAULT_MAX_ARTICLES_PER_POLL: u32 = 5;

#[derive(Debug, Default, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// RSS or Atom feed.
    #[default]
    Feed,
    /// HTML page whose links are scraped.
    Page,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AntiDetection {
    pub rotate_user_agent: bool,
    pub random_delay: bool,
}

impl Default for AntiDetection {
    fn default() -> Self {
        Self {
            rotate_user_agent: true,
            random_delay: true,
        }
    }
}

/// CSS selectors used when scraping a page source.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScrapeConfig {
    pub link_selector: String,
    pub title_selector: String,
    pub content_selector: String,
    pub image_selector: String,
    pub anti_detection: AntiDetection,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            link_selector: "a".to_string(),
            title_selector: "h1".to_string(),
            content_selector: "article".to_string(),
            image_selector: "article img".to_string(),
            anti_detection: AntiDetection::default(),
        }
    }
}

stored_object!(Source, "source", {
    site_id: String,
    name: String,
    kind: SourceKind,
    url: String,
    poll_interval_minutes: u32,
    max_articles_per_poll: u32,
    #[serde(default)]
    scrape: ScrapeConfig,
    /// Language of the source material, when known up front.
    language: Option<String>,
    is_active: bool,
    #[serde(
        serialize_with = "serialize_option_datetime",
        deserialize_with = "deserialize_option_datetime",
        default
    )]
    last_polled_at: Option<DateTime<Utc>>
});

impl Source {
    pub fn new(site_id: String, name: String, kind: SourceKind, url: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            site_id,
            name,
            kind,
            url,
            poll_interval_minutes: DEFAULT_POLL_INTERVAL_MINUTES,
            max_articles_per_poll: DEFAULT_MAX_ARTICLES_PER_POLL,
            scrape: ScrapeConfig::default(),
            language: None,
            is_active: true,
            last_polled_at: None,
        }
    }

    /// Item cap for one poll; a zero cap is treated as one.
    pub fn poll_limit(&self) -> usize {
        usize::try_from(self.max_articles_per_poll.max(1)).unwrap_or(usize::MAX)
    }

    /// Whether the poll interval has elapsed since the last successful poll.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_polled_at {
            None => true,
            Some(last) => {
                let interval = chrono::Duration::minutes(i64::from(self.poll_interval_minutes));
                now.signed_duration_since(last) >= interval
            }
        }
    }

    /// Record a completed poll. Only the ingestion stage calls this.
    pub async fn mark_polled(
        id: &str,
        at: DateTime<Utc>,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.client
            .query(
                "UPDATE type::thing($table, $id)
                 SET last_polled_at = $at, updated_at = $at;",
            )
            .bind(("table", Self::table_name()))
            .bind(("id", id.to_string()))
            .bind(("at", SurrealDatetime::from(at)))
            .await?
            .check()?;

        Ok(())
    }

    /// Active sources belonging to any of the given sites.
    pub async fn list_active_for_sites(
        site_ids: Vec<String>,
        db: &SurrealDbClient,
    ) -> Result<Vec<Source>, AppError> {
        let sources: Vec<Source> = db
            .query(
                "SELECT * FROM type::table($table)
                 WHERE is_active = true AND site_id IN $site_ids
                 ORDER BY created_at ASC",
            )
            .bind(("table", Self::table_name()))
            .bind(("site_ids", site_ids))
            .await?
            .take(0)?;

        Ok(sources)
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

    fn feed(site_id: &str) -> Source {
        Source::new(
            site_id.into(),
            "Wire".into(),
            SourceKind::Feed,
            "https://wire.example/rss".into(),
        )
    }

    #[test]
    fn due_when_never_polled_or_interval_elapsed() {
        let now = Utc::now();
        let mut source = feed("site-1");
        assert!(source.is_due(now));

        source.poll_interval_minutes = 30;
        source.last_polled_at = Some(now - chrono::Duration::minutes(10));
        assert!(!source.is_due(now));

        source.last_polled_at = Some(now - chrono::Duration::minutes(30));
        assert!(source.is_due(now));
    }

    #[test]
    fn poll_limit_never_zero() {
        let mut source = feed("site-1");
        source.max_articles_per_poll = 0;
        assert_eq!(source.poll_limit(), 1);
    }

    #[tokio::test]
    async fn mark_polled_sets_timestamp() {
        let db = memory_db().await;
        let source = feed("site-1");
        db.store_item(source.clone()).await.expect("store");

        let at = Utc::now();
        Source::mark_polled(&source.id, at, &db).await.expect("mark");

        let stored: Source = db
            .get_item(&source.id)
            .await
            .expect("fetch")
            .expect("exists");
        assert_eq!(
            stored.last_polled_at.map(|t| t.timestamp_millis()),
            Some(at.timestamp_millis())
        );
    }

    #[tokio::test]
    async fn list_active_for_sites_skips_inactive_and_foreign() {
        let db = memory_db().await;
        let active = feed("site-1");
        let mut inactive = feed("site-1");
        inactive.is_active = false;
        let foreign = feed("site-2");
        for item in [active.clone(), inactive, foreign] {
            db.store_item(item).await.expect("store");
        }

        let found = Source::list_active_for_sites(vec!["site-1".into()], &db)
            .await
            .expect("list");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, active.id);
    }
}
