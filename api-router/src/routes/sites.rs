use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde_json::json;

use crate::{api_state::ApiState, error::ApiError};

/// Replace the site's category list with the target's.
pub async fn sync_categories(
    State(state): State<ApiState>,
    Path(site_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let categories = state.control.sync_categories(&site_id).await?;

    Ok(Json(json!({
        "site_id": site_id,
        "count": categories.len(),
        "categories": categories,
    })))
}

pub async fn test_connection(
    State(state): State<ApiState>,
    Path(site_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let identity = state.control.test_connection(&site_id).await?;

    Ok(Json(json!({ "status": "ok", "user": identity })))
}
