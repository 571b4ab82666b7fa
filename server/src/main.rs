//! Tellescope Bridge - event bridge between Canvas and Tellescope.
//!
//! The host posts patient and message events here; each event runs a sync
//! protocol through the tellescope-sync engine and answers with effects for
//! the host to apply.

mod cache;
mod canvas;
mod config;
mod effects;
mod error;
mod handlers;
mod routes;

use crate::config::Config;
use crate::handlers::Bridge;
use std::sync::Arc;
use tellescope_sync::{ReqwestTransport, ResourceClient};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application state shared across handlers.
pub struct AppState<T = ReqwestTransport> {
    pub bridge: Arc<Bridge<T>>,
}

impl<T> AppState<T> {
    pub fn new(bridge: Bridge<T>) -> Self {
        Self {
            bridge: Arc::new(bridge),
        }
    }
}

impl<T> Clone for AppState<T> {
    fn clone(&self) -> Self {
        Self {
            bridge: Arc::clone(&self.bridge),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "tellescope_bridge=debug,tellescope_sync=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!("Starting Tellescope Bridge on {}:{}", config.host, config.port);

    // Secrets are optional; without them every event is a no-op
    let client = match config.client_config() {
        Some(client_config) => {
            tracing::info!("Syncing with {}", client_config.base_url());
            Some(ResourceClient::connect(client_config)?)
        }
        None => {
            tracing::warn!("TELLESCOPE_API_KEY or TELLESCOPE_API_URL missing, events will be ignored");
            None
        }
    };

    let state: AppState = AppState::new(Bridge::new(client, &config)?);
    let app = routes::app(state);

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
