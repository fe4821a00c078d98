use api_router::{api_routes_v1, api_state::ApiState};
use axum::Router;
use common::utils::config::get_config;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

mod runtime;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    runtime::init_tracing();

    let config = get_config()?;
    let db = runtime::connect(&config).await?;

    // Workers first: they own schema initialization.
    let workers = runtime::start_workers(db.clone(), &config).await?;

    if config.api_key.is_none() {
        warn!("No api_key configured; protected API routes will refuse every request");
    }
    let control = runtime::control_surface(&db, &config)?;
    let app = router(ApiState::new(db, control, config.api_key.clone()));

    info!("Starting server listening on 0.0.0.0:{}", config.http_port);
    let serve_address = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(serve_address).await?;

    if let Err(e) = axum::serve(listener, app).await {
        error!("Server error: {}", e);
    }

    for handle in workers {
        handle.abort();
    }

    Ok(())
}

fn router(api_state: ApiState) -> Router {
    Router::new()
        .nest("/api/v1", api_routes_v1(&api_state))
        .layer(TraceLayer::new_for_http())
        .with_state(api_state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request, http::StatusCode};
    use common::{storage::db::SurrealDbClient, utils::config::AppConfig};
    use serde_json::json;
    use std::sync::Arc;
    use tower::ServiceExt;
    use uuid::Uuid;

    fn smoke_test_config(namespace: &str, database: &str) -> AppConfig {
        serde_json::from_value(json!({
            "surrealdb_address": "mem://",
            "surrealdb_username": "root",
            "surrealdb_password": "root",
            "surrealdb_namespace": namespace,
            "surrealdb_database": database,
            "http_port": 0,
            "api_key": "smoke-key",
            "openai_api_key": "test-key",
            "openai_base_url": "https://example.com",
            "embedding_backend": "hashed",
            "embedding_dimension": 32
        }))
        .expect("valid config")
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn smoke_startup_with_in_memory_surrealdb() {
        let namespace = "test_ns";
        let database = format!("test_db_{}", Uuid::new_v4());
        let config = smoke_test_config(namespace, &database);

        let db = Arc::new(
            SurrealDbClient::memory(namespace, &database)
                .await
                .expect("failed to start in-memory surrealdb"),
        );
        db.ensure_initialized(32).await.expect("schema");

        let control = runtime::control_surface(&db, &config).expect("control surface");
        let app = router(ApiState::new(db, control, config.api_key.clone()));

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/v1/live")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("router response");
        assert_eq!(response.status(), StatusCode::OK);

        let ready_response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/v1/ready")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("ready response");
        assert_eq!(ready_response.status(), StatusCode::OK);

        let stats = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/articles/stats")
                    .header("X-API-Key", "smoke-key")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("stats response");
        assert_eq!(stats.status(), StatusCode::OK);
    }
}
