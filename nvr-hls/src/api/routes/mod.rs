//! API route modules.

pub mod health;
pub mod hls;
pub mod logging;
pub mod stream;

use axum::Router;

use crate::api::server::AppState;

/// Create the application router with all routes.
pub fn create_router(state: AppState) -> Router {
    let layout = state.supervisor.layout();
    let hls = hls::service(layout.dir());
    let hls_prefix = layout.url_prefix().to_string();

    let router = Router::new()
        .nest("/api/stream", stream::router())
        .nest("/api/logging", logging::router())
        .nest("/health", health::router())
        .with_state(state);

    if hls_prefix.is_empty() {
        router.fallback_service(hls)
    } else {
        router.nest_service(&hls_prefix, hls)
    }
}
