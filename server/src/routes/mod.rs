//! HTTP route definitions.

mod events;
mod health;
mod sync;

use axum::Router;
use tellescope_sync::Transport;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::AppState;

/// Create all application routes.
pub fn create_routes<T: Transport + 'static>() -> Router<AppState<T>> {
    Router::new()
        .merge(health::routes())
        .merge(events::routes())
        .merge(sync::routes())
}

/// The full application with middleware and state.
pub fn app<T: Transport + 'static>(state: AppState<T>) -> Router {
    Router::new()
        .merge(create_routes::<T>())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
