//! Host event endpoint.

use axum::{extract::State, routing::post, Json, Router};
use serde::Serialize;
use tellescope_sync::Transport;

use crate::effects::Effect;
use crate::handlers::HostEvent;
use crate::AppState;

/// Effects for the host to apply.
#[derive(Debug, Serialize)]
pub struct EventResponse {
    pub effects: Vec<Effect>,
}

/// Create event routes.
pub fn routes<T: Transport + 'static>() -> Router<AppState<T>> {
    Router::new().route("/events", post(handle_event::<T>))
}

/// POST /events - Run the protocol for one host event.
async fn handle_event<T: Transport + 'static>(
    State(state): State<AppState<T>>,
    Json(event): Json<HostEvent>,
) -> Json<EventResponse> {
    let effects = state.bridge.handle(&event).await;
    Json(EventResponse { effects })
}
