use std::{sync::Arc, time::Duration};

use async_openai::{config::OpenAIConfig, Client};
use async_trait::async_trait;
use common::{
    error::AppError,
    similarity::{fingerprint, IndexMetadata, SimilarityIndex},
    storage::types::{article::Article, site::Site},
    utils::{
        config::AppConfig,
        llm::{ModelPair, OpenAiLanguageModel},
        retry::RetryPolicy,
    },
};
use ingestion_pipeline::fetch::HttpFetcher;
use tracing::{info, warn};

use crate::{
    images::{
        HttpMediaFetcher, ImageClassifier, ImageGenerator, ImageWaterfall, MediaFetcher,
        OpenAiImageGenerator, PexelsSearch, SelectedImage, StockSearch, UnsplashSearch,
        VisionClassifier,
    },
    publish::{CredentialStore, PublishedPost, Publisher, WordPressResolver},
    rewrite::{RewriteOutput, Rewriter},
    watermark::Watermarker,
};

/// Collaborators the article stages call out to.
#[async_trait]
pub trait PipelineServices: Send + Sync {
    async fn rewrite(&self, article: &Article, site: &Site) -> Result<RewriteOutput, AppError>;

    async fn select_image(&self, article: &Article) -> SelectedImage;

    /// Image bytes ready for upload, watermarked where required. `None` when the
    /// image could not be fetched or processed.
    async fn prepare_media(&self, image: &SelectedImage, site: &Site) -> Option<Vec<u8>>;

    async fn publish(
        &self,
        article: &Article,
        site: &Site,
        image: Option<Vec<u8>>,
    ) -> Result<PublishedPost, AppError>;

    /// Make a published article visible to the duplicate check.
    async fn index_published(&self, article: &Article) -> Result<(), AppError>;
}

pub struct DefaultPipelineServices {
    rewriter: Rewriter,
    images: ImageWaterfall,
    media: Arc<dyn MediaFetcher>,
    watermarker: Watermarker,
    publisher: Publisher,
    index: Arc<dyn SimilarityIndex>,
}

impl DefaultPipelineServices {
    pub fn new(
        rewriter: Rewriter,
        images: ImageWaterfall,
        media: Arc<dyn MediaFetcher>,
        watermarker: Watermarker,
        publisher: Publisher,
        index: Arc<dyn SimilarityIndex>,
    ) -> Self {
        Self {
            rewriter,
            images,
            media,
            watermarker,
            publisher,
            index,
        }
    }

    /// Wire the production providers. Stock providers are only added when their
    /// key is configured.
    pub fn from_config(
        config: &AppConfig,
        openai_client: Arc<Client<OpenAIConfig>>,
        index: Arc<dyn SimilarityIndex>,
    ) -> Result<Self, AppError> {
        let timeout = Duration::from_secs(config.llm_timeout_secs);
        let model = Arc::new(OpenAiLanguageModel::new(Arc::clone(&openai_client), timeout));
        let rewriter = Rewriter::new(ModelPair::from_config(model, config));

        let classifier: Arc<dyn ImageClassifier> = Arc::new(VisionClassifier::new(
            openai_client,
            config.vision_model.clone(),
            timeout,
        ));

        let mut stock: Vec<Arc<dyn StockSearch>> = Vec::new();
        if let Some(key) = config.pexels_api_key.clone().filter(|key| !key.is_empty()) {
            stock.push(Arc::new(PexelsSearch::new(key)?));
        }
        if let Some(key) = config
            .unsplash_access_key
            .clone()
            .filter(|key| !key.is_empty())
        {
            stock.push(Arc::new(UnsplashSearch::new(key)?));
        }

        let generator: Option<Arc<dyn ImageGenerator>> = if config.image_generation_enabled {
            Some(Arc::new(OpenAiImageGenerator::new(
                &config.openai_base_url,
                config.openai_api_key.clone(),
                config.image_model.clone(),
            )?))
        } else {
            None
        };

        info!(
            stock_providers = stock.len(),
            generation = generator.is_some(),
            "image waterfall configured"
        );

        let images = ImageWaterfall::new(
            Some(classifier),
            stock,
            generator,
            RetryPolicy::image_provider(),
        );
        let media: Arc<dyn MediaFetcher> = Arc::new(HttpMediaFetcher::new(HttpFetcher::new()?));
        let resolver = WordPressResolver::new(CredentialStore::new(config.site_credentials.clone()))?;
        let publisher = Publisher::new(Arc::new(resolver), RetryPolicy::standard());

        Ok(Self::new(
            rewriter,
            images,
            media,
            Watermarker::default(),
            publisher,
            index,
        ))
    }
}

#[async_trait]
impl PipelineServices for DefaultPipelineServices {
    async fn rewrite(&self, article: &Article, site: &Site) -> Result<RewriteOutput, AppError> {
        self.rewriter.rewrite(article, site).await
    }

    async fn select_image(&self, article: &Article) -> SelectedImage {
        self.images.select(article).await
    }

    async fn prepare_media(&self, image: &SelectedImage, site: &Site) -> Option<Vec<u8>> {
        let url = image.url.as_deref()?;
        let bytes = match self.media.fetch(url).await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(%url, error = %err, "image download failed; publishing without image");
                return None;
            }
        };

        match self.watermarker.maybe_watermark(bytes, image.source, site) {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                warn!(error = %err, "watermarking failed; publishing without image");
                None
            }
        }
    }

    async fn publish(
        &self,
        article: &Article,
        site: &Site,
        image: Option<Vec<u8>>,
    ) -> Result<PublishedPost, AppError> {
        self.publisher.publish(article, site, image).await
    }

    async fn index_published(&self, article: &Article) -> Result<(), AppError> {
        let text = fingerprint(&article.original_title, &article.original_content);
        let vector = self.index.embed(&text).await?;
        self.index
            .insert(
                &article.id,
                vector,
                IndexMetadata {
                    site_id: article.site_id.clone(),
                    fingerprint: text,
                },
            )
            .await
    }
}
