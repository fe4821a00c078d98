use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(ArticleEmbedding, "article_embedding", {
    /// Keyed by the article id, so re-inserting an article replaces its vector.
    article_id: String,
    site_id: String,
    /// The text the vector was computed from.
    fingerprint: String,
    embedding: Vec<f32>
});

/// A nearest-neighbour hit: the article and its cosine distance to the query.
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct EmbeddingMatch {
    pub article_id: String,
    pub distance: f32,
}

impl ArticleEmbedding {
    pub fn new(article_id: String, site_id: String, fingerprint: String, embedding: Vec<f32>) -> Self {
        let now = Utc::now();
        Self {
            id: article_id.clone(),
            created_at: now,
            updated_at: now,
            article_id,
            site_id,
            fingerprint,
            embedding,
        }
    }

    /// Recreate the HNSW index for the given dimension.
    ///
    /// Surreal requires the index to be redefined whenever the embedding length changes.
    pub async fn redefine_hnsw_index(
        db: &SurrealDbClient,
        dimension: usize,
    ) -> Result<(), AppError> {
        let query = format!(
            "DEFINE INDEX OVERWRITE idx_embedding_article ON TABLE {table} \
             FIELDS embedding HNSW DIMENSION {dimension} DIST COSINE;",
            table = Self::table_name(),
        );

        db.client.query(query).await?.check()?;

        Ok(())
    }

    /// The single closest stored vector, if any.
    pub async fn nearest(
        vector: Vec<f32>,
        db: &SurrealDbClient,
    ) -> Result<Option<EmbeddingMatch>, AppError> {
        let matches: Vec<EmbeddingMatch> = db
            .query(
                "SELECT article_id, vector::distance::knn() AS distance
                 FROM type::table($table)
                 WHERE embedding <|1,40|> $vector
                 ORDER BY distance ASC
                 LIMIT 1",
            )
            .bind(("table", Self::table_name()))
            .bind(("vector", vector))
            .await?
            .take(0)?;

        Ok(matches.into_iter().next())
    }
}
