//! Health check endpoint.

use axum::{routing::get, Json, Router};
use serde::Serialize;
use tellescope_sync::Transport;

use crate::AppState;

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Create health routes.
pub fn routes<T: Transport + 'static>() -> Router<AppState<T>> {
    Router::new()
        .route("/health", get(health_check))
        .route("/", get(root))
}

/// Health check handler.
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Root handler.
async fn root() -> &'static str {
    "Tellescope Bridge"
}

#[cfg(test)]
mod tests {
    use super::super::testing::get;
    use crate::handlers::testing::bridge;
    use crate::routes::app;
    use crate::AppState;
    use axum::http::StatusCode;
    use tellescope_sync::memory::MemoryRemote;

    #[tokio::test]
    async fn health_reports_version() {
        let state = AppState::new(bridge(&MemoryRemote::new()));

        let (status, body) = get(app(state.clone()), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));

        let (status, body) = get(app(state), "/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "Tellescope Bridge");
    }
}
