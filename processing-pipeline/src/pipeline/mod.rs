mod config;
mod context;
mod services;
mod stages;
mod state;

pub use config::{PipelineConfig, PipelineTuning, RetentionPolicy};
#[allow(clippy::module_name_repetitions)]
pub use services::{DefaultPipelineServices, PipelineServices};

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use async_openai::{config::OpenAIConfig, Client};
use common::{
    error::AppError,
    similarity::SimilarityIndex,
    storage::{
        db::SurrealDbClient,
        types::{
            article::{Article, ArticleStatus},
            site::Site,
        },
    },
    utils::config::AppConfig,
};
use serde::Serialize;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use self::{
    context::PipelineContext,
    stages::{publish, rewrite, select_image},
    state::{claimed, ArticleMachine, ImageSelected},
};

/// How far one claimed attempt got.
enum Attempt {
    Completed(Article),
    /// The stale-processing sweep took the article back before anything was posted.
    ClaimLost,
}

/// How a `process` call ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProcessOutcome {
    Published { post_id: String, post_url: String },
    Failed { error: String },
    /// Not processed: missing, not PENDING, claimed elsewhere, or its site is gone or inactive.
    Skipped { reason: String },
}

/// Drives one article from PENDING to PUBLISHED or FAILED.
#[allow(clippy::module_name_repetitions)]
pub struct ArticlePipeline {
    db: Arc<SurrealDbClient>,
    pipeline_config: PipelineConfig,
    services: Arc<dyn PipelineServices>,
}

impl ArticlePipeline {
    pub fn new(
        db: Arc<SurrealDbClient>,
        openai_client: Arc<Client<OpenAIConfig>>,
        config: &AppConfig,
        index: Arc<dyn SimilarityIndex>,
    ) -> Result<Self, AppError> {
        let services = DefaultPipelineServices::from_config(config, openai_client, index)?;
        Ok(Self::with_services(
            db,
            PipelineConfig::from_app_config(config),
            Arc::new(services),
        ))
    }

    pub fn with_services(
        db: Arc<SurrealDbClient>,
        pipeline_config: PipelineConfig,
        services: Arc<dyn PipelineServices>,
    ) -> Self {
        Self {
            db,
            pipeline_config,
            services,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.pipeline_config
    }

    /// Claim and process one article.
    ///
    /// Stage failures end up on the article as FAILED and are reported as
    /// [`ProcessOutcome::Failed`]; only storage errors are returned as `Err`.
    #[tracing::instrument(skip_all, fields(article_id = %article_id))]
    pub async fn process(&self, article_id: &str) -> Result<ProcessOutcome, AppError> {
        let Some(candidate) = self.db.get_item::<Article>(article_id).await? else {
            return Ok(skipped(format!("article {article_id} not found")));
        };
        if candidate.status != ArticleStatus::Pending {
            debug!(status = candidate.status.as_str(), "article not pending");
            return Ok(skipped(format!(
                "article is {}, not pending",
                candidate.status.as_str()
            )));
        }

        let site = match self.db.get_item::<Site>(&candidate.site_id).await? {
            Some(site) if site.is_active => site,
            Some(_) => return Ok(skipped(format!("site {} is inactive", candidate.site_id))),
            None => return Ok(skipped(format!("site {} not found", candidate.site_id))),
        };

        let Some(article) = Article::claim(article_id, &self.db).await? else {
            debug!("article claimed by another worker");
            return Ok(skipped("article already claimed".into()));
        };

        match self.drive_pipeline(article, &site).await {
            Ok(Attempt::Completed(published)) => {
                let published = published.finalize_published(&self.db).await?;
                if let Err(err) = self.services.index_published(&published).await {
                    warn!(error = %err, "published article could not be indexed for duplicate checks");
                }
                info!(
                    post_id = published.post_id.as_deref().unwrap_or_default(),
                    image_source = published.image_source.unwrap_or_default().as_str(),
                    "article published"
                );
                Ok(ProcessOutcome::Published {
                    post_id: published.post_id.unwrap_or_default(),
                    post_url: published.post_url.unwrap_or_default(),
                })
            }
            Ok(Attempt::ClaimLost) => Ok(skipped("claim lost to the stale-processing sweep".into())),
            Err(err) => match Article::mark_failed(article_id, &err.to_string(), &self.db).await {
                Ok(failed) => {
                    warn!(error = %err, "article processing failed");
                    Ok(ProcessOutcome::Failed {
                        error: failed.error_message.unwrap_or_default(),
                    })
                }
                // Already failed by the sweep; its outcome stands.
                Err(AppError::Validation(reason)) => {
                    warn!(error = %err, %reason, "article left processing before the failure was recorded");
                    Ok(skipped(reason))
                }
                Err(other) => Err(other),
            },
        }
    }

    fn duration_millis(duration: Duration) -> u64 {
        u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
    }

    #[tracing::instrument(skip_all, fields(article_id = %article.id, site_id = %site.id))]
    async fn drive_pipeline(&self, article: Article, site: &Site) -> Result<Attempt, AppError> {
        let mut ctx = PipelineContext::new(article, site, &self.db, self.services.as_ref());
        let pipeline_started = Instant::now();
        let budget = self.pipeline_config.tuning.pre_publish_budget;

        let prepared = timeout(budget, Self::prepare(&mut ctx)).await;
        let (machine, rewrite_ms, image_ms) = match prepared {
            Ok(prepared) => prepared.map_err(|err| ctx.abort(err))?,
            Err(_) => {
                return Err(ctx.abort(AppError::Processing(format!(
                    "rewrite and image selection exceeded {}ms",
                    budget.as_millis()
                ))))
            }
        };

        let stage_start = Instant::now();
        let Some(_machine) = publish(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?
        else {
            return Ok(Attempt::ClaimLost);
        };
        let publish_ms = Self::duration_millis(stage_start.elapsed());

        info!(
            article_id = %ctx.article_id,
            total_ms = Self::duration_millis(pipeline_started.elapsed()),
            rewrite_ms,
            image_ms,
            publish_ms,
            "article pipeline finished"
        );

        Ok(Attempt::Completed(ctx.article))
    }

    /// Rewrite and image stages; everything before the destination is touched.
    async fn prepare(
        ctx: &mut PipelineContext<'_>,
    ) -> Result<(ArticleMachine<(), ImageSelected>, u64, u64), AppError> {
        let stage_start = Instant::now();
        let machine = rewrite(claimed(), ctx).await?;
        let rewrite_ms = Self::duration_millis(stage_start.elapsed());

        let stage_start = Instant::now();
        let machine = select_image(machine, ctx).await?;
        let image_ms = Self::duration_millis(stage_start.elapsed());

        Ok((machine, rewrite_ms, image_ms))
    }
}

fn skipped(reason: String) -> ProcessOutcome {
    ProcessOutcome::Skipped { reason }
}
