use std::sync::Arc;

use common::{
    error::AppError,
    similarity::{fingerprint, SimilarityIndex},
};
use tracing::debug;

pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.80;

/// Outcome of a duplicate check.
///
/// `matched_id` and `similarity` describe the nearest stored article and are
/// present whenever the index returned one, duplicate or not.
#[derive(Debug, Clone, PartialEq)]
pub struct DedupVerdict {
    pub is_duplicate: bool,
    pub matched_id: Option<String>,
    pub similarity: Option<f32>,
}

impl DedupVerdict {
    fn unique() -> Self {
        Self {
            is_duplicate: false,
            matched_id: None,
            similarity: None,
        }
    }
}

/// Decides whether new content is a near-duplicate of already published content.
///
/// The gate only reads from the index. Vectors are inserted by the processing
/// pipeline once an article is actually published.
#[derive(Clone)]
pub struct DeduplicationGate {
    index: Arc<dyn SimilarityIndex>,
    threshold: f32,
}

impl DeduplicationGate {
    pub fn new(index: Arc<dyn SimilarityIndex>, threshold: f32) -> Self {
        Self {
            index,
            threshold: threshold.clamp(0.0, 1.0),
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub async fn check(&self, title: &str, content: &str) -> Result<DedupVerdict, AppError> {
        let print = fingerprint(title, content);
        let vector = self.index.embed(&print).await?;

        let Some(neighbor) = self.index.nearest(&vector).await? else {
            return Ok(DedupVerdict::unique());
        };

        let similarity = (1.0 - neighbor.distance).clamp(0.0, 1.0);
        let is_duplicate = similarity >= self.threshold;
        debug!(
            matched_id = %neighbor.id,
            similarity,
            threshold = self.threshold,
            is_duplicate,
            "dedup gate evaluated candidate"
        );

        Ok(DedupVerdict {
            is_duplicate,
            matched_id: Some(neighbor.id),
            similarity: Some(similarity),
        })
    }
}
