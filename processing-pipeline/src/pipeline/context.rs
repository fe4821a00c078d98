use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{article::Article, site::Site},
    },
};
use tracing::error;

use crate::images::SelectedImage;

use super::services::PipelineServices;

/// In-memory state of one processing attempt. The article is only written back
/// once, when the attempt ends.
pub struct PipelineContext<'a> {
    pub article: Article,
    pub article_id: String,
    pub site: &'a Site,
    pub db: &'a SurrealDbClient,
    pub services: &'a dyn PipelineServices,
    pub image: Option<SelectedImage>,
}

impl<'a> PipelineContext<'a> {
    pub fn new(
        article: Article,
        site: &'a Site,
        db: &'a SurrealDbClient,
        services: &'a dyn PipelineServices,
    ) -> Self {
        let article_id = article.id.clone();
        Self {
            article,
            article_id,
            site,
            db,
            services,
            image: None,
        }
    }

    pub fn selected_image(&self) -> Result<&SelectedImage, AppError> {
        self.image
            .as_ref()
            .ok_or_else(|| AppError::InternalError("image selection expected before publish".into()))
    }

    pub fn abort(&mut self, err: AppError) -> AppError {
        error!(
            article_id = %self.article_id,
            site_id = %self.site.id,
            error = %err,
            "article pipeline aborted"
        );
        err
    }
}
