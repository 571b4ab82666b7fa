//! Batch sync endpoint.

use axum::{extract::State, routing::post, Json, Router};
use tellescope_sync::{BatchReport, Transport};

use crate::error::Result;
use crate::handlers::{sync_patients, BatchRequest};
use crate::AppState;

/// Create sync routes.
pub fn routes<T: Transport + 'static>() -> Router<AppState<T>> {
    Router::new().route("/sync/patients", post(push_patients::<T>))
}

/// POST /sync/patients - Push a batch of patients.
async fn push_patients<T: Transport + 'static>(
    State(state): State<AppState<T>>,
    Json(request): Json<BatchRequest>,
) -> Result<Json<BatchReport>> {
    let report = sync_patients(&state.bridge, request).await?;
    Ok(Json(report))
}
