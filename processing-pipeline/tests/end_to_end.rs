use std::sync::Arc;

use async_trait::async_trait;
use common::{
    error::AppError,
    scheduler::{testing::RecordingScheduler, Scheduler},
    similarity::SurrealSimilarityIndex,
    storage::{
        db::SurrealDbClient,
        types::{
            article::{Article, ArticleDraft, ArticleStatus, ImageSource},
            pipeline_job::JobKind,
            site::{Site, SiteCategory, VelocityMode},
            source::{Source, SourceKind},
        },
    },
    utils::{
        embedding::EmbeddingProvider,
        llm::{LanguageModel, ModelPair},
        retry::RetryPolicy,
    },
};
use ingestion_pipeline::{ContentFetcher, DeduplicationGate, FetchOutcome, SourcePoller};
use processing_pipeline::{
    images::{ImageClassifier, ImageVerdict, ImageWaterfall, MediaFetcher, StockSearch},
    pipeline::DefaultPipelineServices,
    publish::{Identity, PostDraft, PublishedPost, Publisher, PublishingTarget, TargetResolver},
    rewrite::Rewriter,
    watermark::Watermarker,
    ArticlePipeline, PipelineConfig, ProcessOutcome,
};
use tokio::sync::Mutex;
use uuid::Uuid;

const DIMENSION: usize = 64;

struct FeedWithOneStory {
    draft: ArticleDraft,
}

#[async_trait]
impl ContentFetcher for FeedWithOneStory {
    async fn fetch(&self, _source: &Source) -> Result<FetchOutcome, AppError> {
        Ok(FetchOutcome {
            drafts: vec![self.draft.clone()],
            failed: 0,
        })
    }
}

struct TranslatingModel;

#[async_trait]
impl LanguageModel for TranslatingModel {
    async fn complete(&self, prompt: &str, _model: &str) -> Result<String, AppError> {
        if prompt.contains("rewritten_title") {
            return Ok(r#"{"rewritten_title": "Storm Hits Coast", "rewritten_content": "Heavy rain."}"#.into());
        }
        Ok(r#"Here you go:
```json
{"title": "Sturm trifft die Küste", "content": "Starker Regen.\n\nWind.", "summary": "Ein Sturm.", "category_id": "7"}
```"#
            .into())
    }
}

struct RejectEverything;

#[async_trait]
impl ImageClassifier for RejectEverything {
    async fn classify(&self, _image_url: &str) -> Result<ImageVerdict, AppError> {
        Ok(ImageVerdict {
            acceptable: false,
            reasons: vec!["visible watermark".into()],
        })
    }
}

struct OneStockPhoto;

#[async_trait]
impl StockSearch for OneStockPhoto {
    fn name(&self) -> &'static str {
        "stock"
    }

    async fn search(&self, _query: &str) -> Result<Vec<String>, AppError> {
        Ok(vec!["https://stock.example/storm.jpg".into()])
    }
}

struct StaticMedia;

#[async_trait]
impl MediaFetcher for StaticMedia {
    async fn fetch(&self, _url: &str) -> Result<Vec<u8>, AppError> {
        Ok(vec![0xFF, 0xD8, 0xFF, 0xE0])
    }
}

#[derive(Default)]
struct RecordingSite {
    posts: Mutex<Vec<PostDraft>>,
    uploads: Mutex<Vec<String>>,
}

#[async_trait]
impl PublishingTarget for RecordingSite {
    async fn list_categories(&self) -> Result<Vec<SiteCategory>, AppError> {
        Ok(Vec::new())
    }

    async fn upload_media(
        &self,
        _bytes: Vec<u8>,
        filename: &str,
        _alt_text: &str,
    ) -> Result<i64, AppError> {
        self.uploads.lock().await.push(filename.to_string());
        Ok(88)
    }

    async fn create_post(&self, post: &PostDraft) -> Result<PublishedPost, AppError> {
        self.posts.lock().await.push(post.clone());
        Ok(PublishedPost {
            post_id: "1234".into(),
            post_url: "https://kuestenpost.example/sturm".into(),
        })
    }

    async fn whoami(&self) -> Result<Identity, AppError> {
        Ok(Identity {
            id: 1,
            name: "editor".into(),
        })
    }
}

struct SingleSite(Arc<RecordingSite>);

impl TargetResolver for SingleSite {
    fn target_for(&self, _site: &Site) -> Result<Arc<dyn PublishingTarget>, AppError> {
        let target: Arc<dyn PublishingTarget> = self.0.clone();
        Ok(target)
    }
}

fn storm_draft(url: &str) -> ArticleDraft {
    let body = std::iter::repeat("Heavy rain and strong winds battered the coastline overnight.")
        .take(60)
        .collect::<Vec<_>>()
        .join(" ");
    ArticleDraft {
        original_url: url.into(),
        original_title: "Storm Hits Coast".into(),
        original_content: body,
        original_image_url: Some("https://wire.example/storm-watermarked.jpg".into()),
    }
}

struct World {
    db: Arc<SurrealDbClient>,
    index: Arc<SurrealSimilarityIndex>,
    scheduler: Arc<RecordingScheduler>,
    site: Site,
    source: Source,
    target: Arc<RecordingSite>,
    pipeline: ArticlePipeline,
}

async fn world() -> World {
    let db = Arc::new(
        SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory surrealdb"),
    );
    db.ensure_initialized(DIMENSION).await.expect("schema");
    let index = Arc::new(SurrealSimilarityIndex::new(
        Arc::clone(&db),
        Arc::new(EmbeddingProvider::new_hashed(DIMENSION)),
    ));

    let mut site = Site::new(
        "Küstenpost".into(),
        "https://kuestenpost.example".into(),
        "kuestenpost".into(),
        "de".into(),
        VelocityMode::News,
    );
    site.categories = vec![SiteCategory {
        id: 7,
        name: "Weather".into(),
    }];
    db.store_item(site.clone()).await.expect("store site");

    let mut source = Source::new(
        site.id.clone(),
        "Coast Wire".into(),
        SourceKind::Feed,
        "https://wire.example/rss".into(),
    );
    source.language = Some("en".into());
    db.store_item(source.clone()).await.expect("store source");

    let target = Arc::new(RecordingSite::default());
    let services = DefaultPipelineServices::new(
        Rewriter::new(ModelPair::new(
            Arc::new(TranslatingModel),
            "primary".into(),
            "fallback".into(),
            RetryPolicy::immediate(1),
        )),
        ImageWaterfall::new(
            Some(Arc::new(RejectEverything)),
            vec![Arc::new(OneStockPhoto)],
            None,
            RetryPolicy::immediate(1),
        ),
        Arc::new(StaticMedia),
        Watermarker::default(),
        Publisher::new(
            Arc::new(SingleSite(Arc::clone(&target))),
            RetryPolicy::immediate(1),
        ),
        index.clone(),
    );
    let pipeline =
        ArticlePipeline::with_services(Arc::clone(&db), PipelineConfig::default(), Arc::new(services));

    World {
        db,
        index,
        scheduler: Arc::new(RecordingScheduler::default()),
        site,
        source,
        target,
        pipeline,
    }
}

impl World {
    fn poller(&self, draft: ArticleDraft) -> SourcePoller {
        let scheduler: Arc<dyn Scheduler> = self.scheduler.clone();
        SourcePoller::new(
            Arc::clone(&self.db),
            Arc::new(FeedWithOneStory { draft }),
            DeduplicationGate::new(self.index.clone(), 0.85),
            scheduler,
        )
    }

    async fn articles(&self) -> Vec<Article> {
        self.db.get_all_stored_items().await.expect("articles")
    }
}

#[tokio::test]
async fn wire_story_is_ingested_translated_illustrated_and_published() {
    let world = world().await;

    let summary = world
        .poller(storm_draft("https://wire.example/storm"))
        .poll(&world.source)
        .await
        .expect("poll");
    assert_eq!((summary.created, summary.skipped), (1, 0));
    assert_eq!(
        world.scheduler.recorded().await,
        vec![JobKind::ProcessPendingForSite {
            site_id: world.site.id.clone()
        }]
    );

    let pending = world.articles().await;
    assert_eq!(pending.len(), 1);
    let article = pending.into_iter().next().expect("article");
    assert_eq!(article.status, ArticleStatus::Pending);
    assert_eq!(article.site_id, world.site.id);

    let outcome = world.pipeline.process(&article.id).await.expect("process");
    assert_eq!(
        outcome,
        ProcessOutcome::Published {
            post_id: "1234".into(),
            post_url: "https://kuestenpost.example/sturm".into(),
        }
    );

    let stored: Article = world
        .db
        .get_item(&article.id)
        .await
        .expect("get")
        .expect("article");
    assert_eq!(stored.status, ArticleStatus::Published);
    assert_eq!(stored.processed_title.as_deref(), Some("Sturm trifft die Küste"));
    assert_eq!(stored.category_id, Some(7));
    assert_eq!(stored.category_name.as_deref(), Some("Weather"));
    assert_eq!(stored.image_source, Some(ImageSource::Stock));
    assert_eq!(stored.image_url.as_deref(), Some("https://stock.example/storm.jpg"));
    assert_eq!(stored.post_id.as_deref(), Some("1234"));
    assert!(stored.published_at.is_some());

    let posts = world.target.posts.lock().await;
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].category_id, Some(7));
    assert_eq!(posts[0].media_id, Some(88));
    assert_eq!(world.target.uploads.lock().await.len(), 1);
}

#[tokio::test]
async fn republished_story_is_recorded_as_duplicate_of_the_published_one() {
    let world = world().await;

    world
        .poller(storm_draft("https://wire.example/storm"))
        .poll(&world.source)
        .await
        .expect("first poll");
    let original = world.articles().await.into_iter().next().expect("article");
    world.pipeline.process(&original.id).await.expect("process");

    let again = world
        .poller(storm_draft("https://wire.example/storm"))
        .poll(&world.source)
        .await
        .expect("same url");
    assert_eq!((again.created, again.skipped), (0, 1));

    let mirrored = world
        .poller(storm_draft("https://mirror.example/storm-copy"))
        .poll(&world.source)
        .await
        .expect("mirror");
    assert_eq!((mirrored.created, mirrored.skipped), (0, 1));

    let articles = world.articles().await;
    assert_eq!(articles.len(), 2);
    let duplicate = articles
        .iter()
        .find(|article| article.status == ArticleStatus::Duplicate)
        .expect("duplicate recorded");
    assert_eq!(duplicate.duplicate_of.as_deref(), Some(original.id.as_str()));
    assert!(duplicate.similarity_score.unwrap_or_default() >= 0.85);
}
