pub mod wordpress;

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            article::Article,
            site::{Site, SiteCategory},
        },
    },
    utils::{
        config::SiteCredentials,
        retry::{retry_transient, RetryPolicy},
    },
};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

pub use wordpress::{WordPressClient, WordPressResolver};

const ALT_TEXT_MAX_CHARS: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostDraft {
    pub title: String,
    pub content: String,
    pub category_id: Option<i64>,
    pub media_id: Option<i64>,
    pub summary: Option<String>,
    pub author_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PublishedPost {
    pub post_id: String,
    pub post_url: String,
}

/// Account the publishing credentials resolve to.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Identity {
    pub id: i64,
    pub name: String,
}

/// A destination site's publishing API.
#[async_trait]
pub trait PublishingTarget: Send + Sync {
    async fn list_categories(&self) -> Result<Vec<SiteCategory>, AppError>;
    async fn upload_media(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        alt_text: &str,
    ) -> Result<i64, AppError>;
    async fn create_post(&self, post: &PostDraft) -> Result<PublishedPost, AppError>;
    async fn whoami(&self) -> Result<Identity, AppError>;
}

/// Builds the publishing target for a site.
pub trait TargetResolver: Send + Sync {
    fn target_for(&self, site: &Site) -> Result<Arc<dyn PublishingTarget>, AppError>;
}

/// Publishing credentials keyed by the opaque handle stored on each site.
#[derive(Clone, Default)]
pub struct CredentialStore {
    entries: HashMap<String, SiteCredentials>,
}

impl CredentialStore {
    pub fn new(entries: HashMap<String, SiteCredentials>) -> Self {
        Self { entries }
    }

    pub fn resolve(&self, credentials_ref: &str) -> Result<&SiteCredentials, AppError> {
        self.entries.get(credentials_ref).ok_or_else(|| {
            AppError::Validation(format!("no publishing credentials for handle {credentials_ref:?}"))
        })
    }
}

/// Media filename derived from the article and the image content.
pub fn media_filename(article_id: &str, bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let short: String = digest
        .iter()
        .take(6)
        .map(|byte| format!("{byte:02x}"))
        .collect();
    let extension = match image::guess_format(bytes) {
        Ok(image::ImageFormat::Png) => "png",
        Ok(image::ImageFormat::WebP) => "webp",
        _ => "jpg",
    };
    format!("article-{article_id}-{short}.{extension}")
}

/// Coordinates media upload and post creation against a site's target.
#[derive(Clone)]
pub struct Publisher {
    resolver: Arc<dyn TargetResolver>,
    retry: RetryPolicy,
}

impl Publisher {
    pub fn new(resolver: Arc<dyn TargetResolver>, retry: RetryPolicy) -> Self {
        Self { resolver, retry }
    }

    /// Upload the image if any (failure only loses the featured image), then create the post.
    #[tracing::instrument(skip_all, fields(article_id = %article.id, site_id = %site.id))]
    pub async fn publish(
        &self,
        article: &Article,
        site: &Site,
        image: Option<Vec<u8>>,
    ) -> Result<PublishedPost, AppError> {
        let target = self.resolver.target_for(site)?;
        let title = article.working_title().to_string();

        let media_id = match image {
            Some(bytes) => self.upload_featured(&*target, article, &title, bytes).await,
            None => None,
        };

        let draft = PostDraft {
            title,
            content: article
                .processed_content
                .clone()
                .unwrap_or_else(|| article.original_content.clone()),
            category_id: article.category_id,
            media_id,
            summary: article.summary.clone().filter(|summary| !summary.is_empty()),
            author_id: site.default_author_id,
        };

        let post = retry_transient(self.retry, || target.create_post(&draft)).await?;
        info!(post_id = %post.post_id, post_url = %post.post_url, media_id, "post created");
        Ok(post)
    }

    async fn upload_featured(
        &self,
        target: &dyn PublishingTarget,
        article: &Article,
        title: &str,
        bytes: Vec<u8>,
    ) -> Option<i64> {
        let filename = media_filename(&article.id, &bytes);
        let alt_text: String = title.chars().take(ALT_TEXT_MAX_CHARS).collect();
        let filename = filename.as_str();
        let alt_text = alt_text.as_str();
        let bytes = bytes.as_slice();

        match retry_transient(self.retry, || target.upload_media(bytes.to_vec(), filename, alt_text))
            .await
        {
            Ok(media_id) => Some(media_id),
            Err(err) => {
                warn!(error = %err, "media upload failed; publishing without featured image");
                None
            }
        }
    }

    /// Replace the site's stored categories with the destination's current list.
    pub async fn sync_site_categories(
        &self,
        site: &Site,
        db: &SurrealDbClient,
    ) -> Result<Vec<SiteCategory>, AppError> {
        let target = self.resolver.target_for(site)?;
        let categories = retry_transient(self.retry, || target.list_categories()).await?;
        let updated = Site::replace_categories(&site.id, categories, db).await?;
        info!(site_id = %site.id, categories = updated.categories.len(), "site categories synced");
        Ok(updated.categories)
    }

    pub async fn test_connection(&self, site: &Site) -> Result<Identity, AppError> {
        let target = self.resolver.target_for(site)?;
        target.whoami().await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use tokio::sync::Mutex;

    /// Publishing target that records calls and can be told to fail.
    #[derive(Default)]
    pub struct FakeTarget {
        pub categories: Vec<SiteCategory>,
        pub fail_upload: bool,
        pub reject_post: bool,
        pub uploads: Mutex<Vec<(String, String, usize)>>,
        pub posts: Mutex<Vec<PostDraft>>,
    }

    #[async_trait]
    impl PublishingTarget for FakeTarget {
        async fn list_categories(&self) -> Result<Vec<SiteCategory>, AppError> {
            Ok(self.categories.clone())
        }

        async fn upload_media(
            &self,
            bytes: Vec<u8>,
            filename: &str,
            alt_text: &str,
        ) -> Result<i64, AppError> {
            self.uploads
                .lock()
                .await
                .push((filename.to_string(), alt_text.to_string(), bytes.len()));
            if self.fail_upload {
                return Err(AppError::Publish("media rejected with 413".into()));
            }
            Ok(77)
        }

        async fn create_post(&self, post: &PostDraft) -> Result<PublishedPost, AppError> {
            self.posts.lock().await.push(post.clone());
            if self.reject_post {
                return Err(AppError::Publish("post rejected with 403 Forbidden".into()));
            }
            Ok(PublishedPost {
                post_id: "501".into(),
                post_url: "https://coast.example/?p=501".into(),
            })
        }

        async fn whoami(&self) -> Result<Identity, AppError> {
            Ok(Identity {
                id: 1,
                name: "editor".into(),
            })
        }
    }

    pub struct FixedResolver(pub Arc<FakeTarget>);

    impl TargetResolver for FixedResolver {
        fn target_for(&self, _site: &Site) -> Result<Arc<dyn PublishingTarget>, AppError> {
            Ok(self.0.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use common::storage::types::{
        article::ArticleDraft,
        site::VelocityMode,
        source::{Source, SourceKind},
    };
    use uuid::Uuid;

    use super::testing::{FakeTarget, FixedResolver};
    use super::*;

    fn site() -> Site {
        let mut site = Site::new(
            "Coast".into(),
            "https://coast.example".into(),
            "coast".into(),
            "es".into(),
            VelocityMode::News,
        );
        site.default_author_id = Some(4);
        site
    }

    fn processed_article(site: &Site) -> Article {
        let source = Source::new(
            site.id.clone(),
            "Wire".into(),
            SourceKind::Feed,
            "https://wire.example/rss".into(),
        );
        let mut article = Article::new_pending(
            ArticleDraft {
                original_url: "https://wire.example/storm".into(),
                original_title: "Storm Hits Coast".into(),
                original_content: "Rain.".into(),
                original_image_url: None,
            },
            &source,
            "es".into(),
        );
        article.processed_title = Some("Tormenta golpea la costa".into());
        article.processed_content = Some("Llovió mucho.".into());
        article.summary = Some("Resumen".into());
        article.category_id = Some(3);
        article
    }

    fn publisher(target: &Arc<FakeTarget>) -> Publisher {
        Publisher::new(
            Arc::new(FixedResolver(target.clone())),
            RetryPolicy::immediate(1),
        )
    }

    #[tokio::test]
    async fn uploads_media_then_creates_post_with_all_fields() {
        let target = Arc::new(FakeTarget::default());
        let site = site();
        let article = processed_article(&site);

        let post = publisher(&target)
            .publish(&article, &site, Some(vec![0xFF, 0xD8, 0xFF, 0xE0]))
            .await
            .expect("publish");

        assert_eq!(post.post_id, "501");
        let uploads = target.uploads.lock().await;
        assert_eq!(uploads.len(), 1);
        assert!(uploads[0].0.starts_with(&format!("article-{}-", article.id)));
        assert!(uploads[0].0.ends_with(".jpg"));
        assert_eq!(uploads[0].1, "Tormenta golpea la costa");

        let posts = target.posts.lock().await;
        assert_eq!(
            posts[0],
            PostDraft {
                title: "Tormenta golpea la costa".into(),
                content: "Llovió mucho.".into(),
                category_id: Some(3),
                media_id: Some(77),
                summary: Some("Resumen".into()),
                author_id: Some(4),
            }
        );
    }

    #[tokio::test]
    async fn failed_upload_still_publishes_without_media() {
        let target = Arc::new(FakeTarget {
            fail_upload: true,
            ..FakeTarget::default()
        });
        let site = site();

        publisher(&target)
            .publish(&processed_article(&site), &site, Some(vec![1, 2, 3]))
            .await
            .expect("publish");

        assert_eq!(target.posts.lock().await[0].media_id, None);
    }

    #[tokio::test]
    async fn rejected_post_is_fatal() {
        let target = Arc::new(FakeTarget {
            reject_post: true,
            ..FakeTarget::default()
        });
        let site = site();

        let result = publisher(&target)
            .publish(&processed_article(&site), &site, None)
            .await;

        assert!(matches!(result, Err(AppError::Publish(_))));
        assert!(target.uploads.lock().await.is_empty());
    }

    #[tokio::test]
    async fn category_sync_replaces_site_categories() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("db");
        let site = site();
        db.store_item(site.clone()).await.expect("store site");

        let target = Arc::new(FakeTarget {
            categories: vec![SiteCategory {
                id: 3,
                name: "Weather".into(),
            }],
            ..FakeTarget::default()
        });

        let synced = publisher(&target)
            .sync_site_categories(&site, &db)
            .await
            .expect("sync");
        assert_eq!(synced.len(), 1);

        let stored: Site = db.get_item(&site.id).await.expect("load").expect("site");
        assert_eq!(stored.category(3).map(|c| c.name.as_str()), Some("Weather"));
    }

    #[test]
    fn missing_credentials_are_a_validation_error() {
        let store = CredentialStore::default();
        assert!(matches!(store.resolve("coast"), Err(AppError::Validation(_))));
    }

    #[test]
    fn media_filenames_are_stable_per_content() {
        let png_header = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
        let a = media_filename("abc", &png_header);
        let b = media_filename("abc", &png_header);
        assert_eq!(a, b);
        assert!(a.ends_with(".png"));
        assert_ne!(a, media_filename("abc", b"other bytes"));
    }
}
