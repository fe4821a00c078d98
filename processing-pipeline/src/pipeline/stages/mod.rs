use common::{error::AppError, storage::types::article::Article};
use state_machines::core::GuardError;
use tracing::{debug, instrument, warn};

use crate::rewrite::source_language;

use super::{
    context::PipelineContext,
    state::{ArticleMachine, Claimed, ImageSelected, Published, Rewritten},
};

#[instrument(
    level = "trace",
    skip_all,
    fields(article_id = %ctx.article_id, site_id = %ctx.site.id)
)]
pub async fn rewrite(
    machine: ArticleMachine<(), Claimed>,
    ctx: &mut PipelineContext<'_>,
) -> Result<ArticleMachine<(), Rewritten>, AppError> {
    let output = ctx.services.rewrite(&ctx.article, ctx.site).await?;

    let article = &mut ctx.article;
    article.source_language = Some(source_language(article));
    article.processed_title = Some(output.title);
    article.processed_content = Some(output.content);
    article.summary = Some(output.summary).filter(|summary| !summary.is_empty());
    article.category_id = output.category_id;
    article.category_name = output
        .category_id
        .and_then(|id| ctx.site.category(id))
        .map(|category| category.name.clone());

    debug!(
        article_id = %ctx.article_id,
        title_chars = ctx.article.working_title().chars().count(),
        category = ctx.article.category_name.as_deref().unwrap_or("none"),
        "article rewritten"
    );

    machine
        .rewrite()
        .map_err(|(_, guard)| map_guard_error("rewrite", &guard))
}

#[instrument(
    level = "trace",
    skip_all,
    fields(article_id = %ctx.article_id, site_id = %ctx.site.id)
)]
pub async fn select_image(
    machine: ArticleMachine<(), Rewritten>,
    ctx: &mut PipelineContext<'_>,
) -> Result<ArticleMachine<(), ImageSelected>, AppError> {
    let selected = ctx.services.select_image(&ctx.article).await;

    ctx.article.image_url = selected.recordable_url().map(str::to_string);
    ctx.article.image_source = Some(selected.source);
    debug!(
        article_id = %ctx.article_id,
        image_source = selected.source.as_str(),
        "featured image chosen"
    );
    ctx.image = Some(selected);

    machine
        .select_image()
        .map_err(|(_, guard)| map_guard_error("select_image", &guard))
}

#[instrument(
    level = "trace",
    skip_all,
    fields(article_id = %ctx.article_id, site_id = %ctx.site.id)
)]
/// Returns `Ok(None)` without posting when the claim was lost to the
/// stale-processing sweep while earlier stages ran.
pub async fn publish(
    machine: ArticleMachine<(), ImageSelected>,
    ctx: &mut PipelineContext<'_>,
) -> Result<Option<ArticleMachine<(), Published>>, AppError> {
    let selected = ctx.selected_image()?;
    let media = match selected.url {
        Some(_) => ctx.services.prepare_media(selected, ctx.site).await,
        None => None,
    };
    let with_media = media.is_some();

    if !Article::renew_claim(&ctx.article_id, ctx.db).await? {
        warn!(article_id = %ctx.article_id, "claim lost before posting; attempt abandoned");
        return Ok(None);
    }

    let post = ctx.services.publish(&ctx.article, ctx.site, media).await?;

    debug!(
        article_id = %ctx.article_id,
        post_id = %post.post_id,
        with_media,
        "article published to destination"
    );
    ctx.article.post_id = Some(post.post_id);
    ctx.article.post_url = Some(post.post_url);

    machine
        .publish()
        .map(Some)
        .map_err(|(_, guard)| map_guard_error("publish", &guard))
}

fn map_guard_error(event: &str, guard: &GuardError) -> AppError {
    AppError::InternalError(format!(
        "invalid article pipeline transition during {event}: {guard:?}"
    ))
}
