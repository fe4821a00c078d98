#![allow(clippy::missing_docs_in_private_items)]

use api_state::ApiState;
use axum::{
    extract::FromRef,
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use middleware_api_auth::api_auth;
use routes::{
    articles::{article_stats, get_article, list_articles, process_article, retry_article},
    liveness::live,
    readiness::ready,
    sites::{sync_categories, test_connection},
    sources::trigger_poll,
};

pub mod api_state;
pub mod error;
mod middleware_api_auth;
mod routes;

/// Router for API functionality, version 1
pub fn api_routes_v1<S>(app_state: &ApiState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ApiState: FromRef<S>,
{
    // Public, unauthenticated endpoints (for k8s/systemd probes)
    let public = Router::new()
        .route("/ready", get(ready))
        .route("/live", get(live));

    let protected = Router::new()
        .route("/sources/{id}/poll", post(trigger_poll))
        .route("/articles", get(list_articles))
        .route("/articles/stats", get(article_stats))
        .route("/articles/{id}", get(get_article))
        .route("/articles/{id}/process", post(process_article))
        .route("/articles/{id}/retry", post(retry_article))
        .route("/sites/{id}/sync-categories", post(sync_categories))
        .route("/sites/{id}/test-connection", post(test_connection))
        .route_layer(from_fn_with_state(app_state.clone(), api_auth));

    public.merge(protected)
}
