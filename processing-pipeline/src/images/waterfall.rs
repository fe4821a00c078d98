use std::sync::Arc;

use async_trait::async_trait;
use common::{
    error::AppError,
    storage::types::article::{Article, ImageSource},
    utils::retry::RetryPolicy,
};
use rand::seq::IndexedRandom;
use tracing::{debug, info};

use super::{
    build_keyword_query, ImageClassifier, ImageGenerator, SelectedImage, StockSearch,
};
use crate::fallback::{FallbackStep, Waterfall};

pub const GENERATION_PROMPT_PREFIX: &str = "Professional photograph, high quality, ";

/// What the image steps work from.
pub struct ImageRequest {
    pub original_url: Option<String>,
    pub query: String,
}

impl ImageRequest {
    pub fn for_article(article: &Article) -> Self {
        let title = article.working_title();
        let mut query = build_keyword_query(title);
        if query.is_empty() {
            query = title.trim().to_lowercase();
        }
        Self {
            original_url: article.original_image_url.clone(),
            query,
        }
    }
}

/// Reuse the source's own image if the classifier finds it clean.
struct VettedOriginal(Arc<dyn ImageClassifier>);

#[async_trait]
impl FallbackStep<ImageRequest, SelectedImage> for VettedOriginal {
    fn name(&self) -> &str {
        "original"
    }

    async fn attempt(&self, request: &ImageRequest) -> Result<Option<SelectedImage>, AppError> {
        let Some(url) = request.original_url.as_deref() else {
            return Ok(None);
        };
        let verdict = self.0.classify(url).await?;
        if !verdict.acceptable {
            debug!(reasons = ?verdict.reasons, "original image rejected");
            return Ok(None);
        }
        Ok(Some(SelectedImage::found(url.to_string(), ImageSource::Original)))
    }
}

/// One stock provider; picks at random among its results.
struct StockPhoto(Arc<dyn StockSearch>);

#[async_trait]
impl FallbackStep<ImageRequest, SelectedImage> for StockPhoto {
    fn name(&self) -> &str {
        self.0.name()
    }

    async fn attempt(&self, request: &ImageRequest) -> Result<Option<SelectedImage>, AppError> {
        let results = self.0.search(&request.query).await?;
        let picked = results.choose(&mut rand::rng()).cloned();
        Ok(picked.map(|url| SelectedImage::found(url, ImageSource::Stock)))
    }
}

struct Generated(Arc<dyn ImageGenerator>);

#[async_trait]
impl FallbackStep<ImageRequest, SelectedImage> for Generated {
    fn name(&self) -> &str {
        "generate"
    }

    async fn attempt(&self, request: &ImageRequest) -> Result<Option<SelectedImage>, AppError> {
        let prompt = format!("{GENERATION_PROMPT_PREFIX}{}", request.query);
        let url = self.0.generate(&prompt).await?;
        Ok(url.map(|url| SelectedImage::found(url, ImageSource::AiGenerated)))
    }
}

/// Ordered image selection: original, stock, generated, none.
pub struct ImageWaterfall {
    chain: Waterfall<ImageRequest, SelectedImage>,
}

impl ImageWaterfall {
    pub fn new(
        classifier: Option<Arc<dyn ImageClassifier>>,
        stock: Vec<Arc<dyn StockSearch>>,
        generator: Option<Arc<dyn ImageGenerator>>,
        retry: RetryPolicy,
    ) -> Self {
        let mut chain = Waterfall::new(retry);
        match classifier {
            Some(classifier) => chain = chain.then(VettedOriginal(classifier)),
            None => debug!("no image classifier configured; original images are never reused"),
        }
        for provider in stock {
            chain = chain.then(StockPhoto(provider));
        }
        if let Some(generator) = generator {
            chain = chain.then(Generated(generator));
        }
        Self { chain }
    }

    /// Never fails: exhausting every step yields [`SelectedImage::none`].
    #[tracing::instrument(skip_all, fields(article_id = %article.id))]
    pub async fn select(&self, article: &Article) -> SelectedImage {
        let request = ImageRequest::for_article(article);
        match self.chain.run(&request).await {
            Some((step, selected)) => {
                info!(
                    step,
                    image_source = selected.source.as_str(),
                    query = %request.query,
                    "image selected"
                );
                selected
            }
            None => {
                info!(image_source = "none", "no image available");
                SelectedImage::none()
            }
        }
    }
}
