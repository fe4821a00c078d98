use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use common::storage::types::article::ArticleFilter;
use serde::Deserialize;

use crate::{api_state::ApiState, error::ApiError};

const MAX_PAGE_SIZE: u32 = 200;

pub async fn list_articles(
    State(state): State<ApiState>,
    Query(mut filter): Query<ArticleFilter>,
) -> Result<impl IntoResponse, ApiError> {
    filter.limit = Some(filter.limit.unwrap_or(50).min(MAX_PAGE_SIZE));
    let articles = state.control.list_articles(&filter).await?;

    Ok(Json(articles))
}

#[derive(Debug, Default, Deserialize)]
pub struct StatsQuery {
    site_id: Option<String>,
}

pub async fn article_stats(
    State(state): State<ApiState>,
    Query(query): Query<StatsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let counts = state.control.stats(query.site_id.as_deref()).await?;

    Ok(Json(counts))
}

pub async fn get_article(
    State(state): State<ApiState>,
    Path(article_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.control.article(&article_id).await?))
}

pub async fn process_article(
    State(state): State<ApiState>,
    Path(article_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let queued = state.control.trigger_process(&article_id).await?;

    Ok((StatusCode::ACCEPTED, Json(queued)))
}

pub async fn retry_article(
    State(state): State<ApiState>,
    Path(article_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let article = state.control.retry(&article_id).await?;

    Ok((StatusCode::ACCEPTED, Json(article)))
}
