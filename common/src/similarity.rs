use std::sync::Arc;

use async_trait::async_trait;
use unicode_normalization::UnicodeNormalization;

use crate::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::article_embedding::ArticleEmbedding,
    },
    utils::embedding::EmbeddingProvider,
};

/// Characters of body text that go into a fingerprint.
pub const FINGERPRINT_CONTENT_CHARS: usize = 500;

/// Closest stored entry to a query vector.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub id: String,
    /// Cosine distance, 0 for identical direction.
    pub distance: f32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexMetadata {
    pub site_id: String,
    pub fingerprint: String,
}

/// Vector store answering single nearest-neighbour queries.
///
/// Shared by every worker; implementations handle their own synchronization.
#[async_trait]
pub trait SimilarityIndex: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError>;
    async fn nearest(&self, vector: &[f32]) -> Result<Option<Neighbor>, AppError>;
    async fn insert(
        &self,
        id: &str,
        vector: Vec<f32>,
        metadata: IndexMetadata,
    ) -> Result<(), AppError>;
}

/// Title plus a bounded prefix of the body, NFKC-normalized with whitespace collapsed.
pub fn fingerprint(title: &str, content: &str) -> String {
    let prefix: String = content.chars().take(FINGERPRINT_CONTENT_CHARS).collect();
    let raw = format!("{title} {prefix}");
    let normalized: String = raw.nfkc().collect();
    normalized.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Similarity index backed by the `article_embedding` table and its HNSW index.
pub struct SurrealSimilarityIndex {
    db: Arc<SurrealDbClient>,
    embedder: Arc<EmbeddingProvider>,
}

impl SurrealSimilarityIndex {
    pub fn new(db: Arc<SurrealDbClient>, embedder: Arc<EmbeddingProvider>) -> Self {
        Self { db, embedder }
    }
}

#[async_trait]
impl SimilarityIndex for SurrealSimilarityIndex {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError> {
        self.embedder.embed(text).await.map_err(AppError::from)
    }

    async fn nearest(&self, vector: &[f32]) -> Result<Option<Neighbor>, AppError> {
        let hit = ArticleEmbedding::nearest(vector.to_vec(), &self.db).await?;
        Ok(hit.map(|hit| Neighbor {
            id: hit.article_id,
            distance: hit.distance,
        }))
    }

    async fn insert(
        &self,
        id: &str,
        vector: Vec<f32>,
        metadata: IndexMetadata,
    ) -> Result<(), AppError> {
        let entry =
            ArticleEmbedding::new(id.to_string(), metadata.site_id, metadata.fingerprint, vector);
        self.db.upsert_item(entry).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn fingerprint_is_bounded_and_normalized() {
        let body = "word ".repeat(400);
        let print = fingerprint("Storm\u{00A0}Hits   Coast", &body);
        assert!(print.starts_with("Storm Hits Coast word"));
        assert!(print.chars().count() <= "Storm Hits Coast ".len() + FINGERPRINT_CONTENT_CHARS);
        assert!(!print.contains("  "));
    }

    #[tokio::test]
    async fn inserted_article_is_its_own_nearest_neighbor() {
        let db = Arc::new(
            SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
                .await
                .expect("in-memory surrealdb"),
        );
        db.ensure_initialized(32).await.expect("schema");
        let index = SurrealSimilarityIndex::new(
            Arc::clone(&db),
            Arc::new(EmbeddingProvider::new_hashed(32)),
        );

        let text = fingerprint("Storm Hits Coast", "Heavy rain and wind lash the shore.");
        let vector = index.embed(&text).await.expect("embed");
        assert!(index.nearest(&vector).await.expect("query").is_none());

        index
            .insert(
                "article-1",
                vector.clone(),
                IndexMetadata {
                    site_id: "site-1".into(),
                    fingerprint: text,
                },
            )
            .await
            .expect("insert");

        let hit = index.nearest(&vector).await.expect("query").expect("hit");
        assert_eq!(hit.id, "article-1");
        assert!(hit.distance.abs() < 1e-4);
    }
}
