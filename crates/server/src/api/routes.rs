use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

use super::{
    downloads, handlers,
    middleware::{metrics_middleware, reject_hidden_paths},
    resources,
};
use crate::state::AppState;

/// Descriptor uploads are small; anything bigger is not a `.torrent`.
const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

pub fn create_router(state: Arc<AppState>) -> Router {
    let storage = state.config().storage.clone();

    // API routes
    let api_routes = Router::new()
        // Health and config
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        // Downloads
        .route("/download", post(downloads::create_download))
        .route("/downloads", get(downloads::list_downloads))
        .route("/downloads/{id}", delete(downloads::delete_download))
        .route("/download/{id}/retry", post(downloads::retry_download))
        // Peer transport descriptors
        .route(
            "/upload/resource",
            post(resources::upload_resource).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .layer(middleware::from_fn(metrics_middleware))
        .with_state(state.clone());

    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics))
        .with_state(state);

    let artifact_routes = Router::new()
        .nest_service(
            storage.http_url_prefix.trim_end_matches('/'),
            ServeDir::new(&storage.http_dir),
        )
        .nest_service(
            storage.peer_url_prefix.trim_end_matches('/'),
            ServeDir::new(&storage.peer_dir),
        )
        .layer(middleware::from_fn(reject_hidden_paths));

    Router::new()
        .nest("/api", api_routes)
        .merge(metrics_routes)
        .merge(artifact_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
