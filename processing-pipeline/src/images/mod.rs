pub mod providers;
pub mod waterfall;

use async_trait::async_trait;
use common::{error::AppError, storage::types::article::ImageSource};

pub use providers::{
    build_keyword_query, HttpMediaFetcher, OpenAiImageGenerator, PexelsSearch, UnsplashSearch,
    VisionClassifier,
};
pub use waterfall::ImageWaterfall;

/// Outcome of the image waterfall. `url` is `None` only for [`ImageSource::None`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedImage {
    pub url: Option<String>,
    pub source: ImageSource,
}

impl SelectedImage {
    pub fn none() -> Self {
        Self {
            url: None,
            source: ImageSource::None,
        }
    }

    pub fn found(url: String, source: ImageSource) -> Self {
        Self {
            url: Some(url),
            source,
        }
    }

    /// The URL worth recording on the article. Inline `data:` payloads are
    /// only carried through to the upload, never stored.
    pub fn recordable_url(&self) -> Option<&str> {
        self.url.as_deref().filter(|url| !url.starts_with("data:"))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageVerdict {
    pub acceptable: bool,
    pub reasons: Vec<String>,
}

/// Judges whether a source image is clean enough to reuse.
#[async_trait]
pub trait ImageClassifier: Send + Sync {
    async fn classify(&self, image_url: &str) -> Result<ImageVerdict, AppError>;
}

/// A stock photo provider.
#[async_trait]
pub trait StockSearch: Send + Sync {
    fn name(&self) -> &'static str;

    /// Candidate image URLs, best first.
    async fn search(&self, query: &str) -> Result<Vec<String>, AppError>;
}

/// Generative image capability. `Ok(None)` means the provider produced nothing.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<Option<String>, AppError>;
}

/// Downloads image bytes for watermarking and upload.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, AppError>;
}
