use api_router::{api_routes_v1, api_state::ApiState};
use axum::Router;
use common::utils::config::get_config;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[allow(dead_code)]
mod runtime;

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    runtime::init_tracing();

    let config = get_config()?;
    let db = runtime::connect(&config).await?;

    if config.api_key.is_none() {
        warn!("No api_key configured; protected API routes will refuse every request");
    }
    let control = runtime::control_surface(&db, &config)?;
    let api_state = ApiState::new(db, control, config.api_key.clone());

    let app = Router::new()
        .nest("/api/v1", api_routes_v1(&api_state))
        .layer(TraceLayer::new_for_http())
        .with_state(api_state);

    info!("Starting server listening on 0.0.0.0:{}", config.http_port);
    let serve_address = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(serve_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
