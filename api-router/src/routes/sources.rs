use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use tracing::info;

use crate::{api_state::ApiState, error::ApiError};

pub async fn trigger_poll(
    State(state): State<ApiState>,
    Path(source_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let queued = state.control.trigger_poll(&source_id).await?;
    info!(%source_id, queued = queued.queued, "poll triggered over API");

    Ok((StatusCode::ACCEPTED, Json(queued)))
}
