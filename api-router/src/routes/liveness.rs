use axum::Json;
use serde_json::{json, Value};

/// The process is up; no dependencies are consulted.
pub async fn live() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "syndication-api",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
