//! Host event handlers.
//!
//! Each supported event type has one protocol. Protocols never fail the
//! request: what happened is reported back to the host as effects.

mod batch;
mod message_created;
mod patient_created;
mod patient_updated;

use std::collections::HashSet;
use std::fmt;

use serde::Deserialize;
use serde_json::Value;
use tellescope_sync::{FieldMapping, ResourceClient, Transport};
use tracing::{debug, warn};

use crate::cache::SyncThrottle;
use crate::canvas;
use crate::config::Config;
use crate::effects::Effect;

pub use batch::{sync_patients, BatchRequest};

/// Host events the bridge understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    PatientCreated,
    PatientUpdated,
    MessageCreated,
}

impl EventType {
    pub const ALL: [EventType; 3] = [
        EventType::PatientCreated,
        EventType::PatientUpdated,
        EventType::MessageCreated,
    ];

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::PatientCreated => "PATIENT_CREATED",
            EventType::PatientUpdated => "PATIENT_UPDATED",
            EventType::MessageCreated => "MESSAGE_CREATED",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event as delivered by the host.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostEvent {
    pub event_type: String,
    #[serde(default)]
    pub target: EventTarget,
    #[serde(default)]
    pub context: Value,
}

/// The record an event is about.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventTarget {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub instance: Option<Value>,
}

impl HostEvent {
    /// Target id, falling back to the instance's own id.
    pub fn target_id(&self) -> Option<String> {
        self.target
            .id
            .as_ref()
            .and_then(canvas::host_id)
            .or_else(|| {
                let instance = self.target.instance.as_ref()?;
                canvas::host_id(instance.get("id")?)
            })
    }
}

/// Everything the handlers share for the life of the server.
pub struct Bridge<T> {
    client: Option<ResourceClient<T>>,
    mapping: FieldMapping,
    throttle: SyncThrottle,
    enabled: HashSet<EventType>,
}

impl<T: Transport> Bridge<T> {
    /// A bridge without a client answers every event with no effects.
    pub fn new(client: Option<ResourceClient<T>>, config: &Config) -> tellescope_sync::Result<Self> {
        Ok(Self {
            client,
            mapping: canvas::enduser_mapping()?,
            throttle: SyncThrottle::new(config.metadata_sync_interval),
            enabled: config.enabled_handlers.clone(),
        })
    }

    pub fn client(&self) -> Option<&ResourceClient<T>> {
        self.client.as_ref()
    }

    /// Run the protocol for `event` and collect its effects.
    pub async fn handle(&self, event: &HostEvent) -> Vec<Effect> {
        let Some(kind) = EventType::parse(&event.event_type) else {
            debug!("Ignoring unsupported event {}", event.event_type);
            return Vec::new();
        };
        if !self.enabled.contains(&kind) {
            debug!("Handler for {} is disabled", kind);
            return Vec::new();
        }
        let Some(client) = &self.client else {
            warn!("Tellescope secrets are not configured, skipping {}", kind);
            return Vec::new();
        };

        match kind {
            EventType::PatientCreated => patient_created::handle(self, client, event).await,
            EventType::PatientUpdated => patient_updated::handle(self, client, event).await,
            EventType::MessageCreated => message_created::handle(client, event).await,
        }
    }
}
