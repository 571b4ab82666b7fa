//! PATIENT_UPDATED: pull the enduser's custom fields into patient metadata.
//!
//! Runs at most once per patient per throttle window. Outcomes that will not
//! change soon (no enduser, no fields) also start the window; failures do not.

use serde_json::Value;
use tellescope_sync::{
    LocalRecord, MatchOutcome, Reconciler, ResourceClient, ResourceType, Transport,
};
use tracing::{debug, warn};

use super::{Bridge, HostEvent};
use crate::canvas;
use crate::effects::{Effect, METADATA_PULL};

pub(super) async fn handle<T: Transport>(
    bridge: &Bridge<T>,
    client: &ResourceClient<T>,
    event: &HostEvent,
) -> Vec<Effect> {
    let Some(patient_id) = event.target_id() else {
        return vec![METADATA_PULL.failure("Patient id not available", "missing_patient_id", false)];
    };

    let key = format!("patient_metadata_sync:{patient_id}");
    if bridge.throttle.is_throttled(&key) {
        debug!("Metadata pull for {} throttled", patient_id);
        return vec![METADATA_PULL.success(
            "Skipped due to rate limiting",
            "rate_limited",
            Some(&patient_id),
            None,
        )];
    }

    let patient = LocalRecord::new(patient_id.clone(), Value::Null);
    let outcome = Reconciler::new(client)
        .pull_one(&ResourceType::ENDUSERS, &patient, &canvas::enduser_criteria())
        .await;

    let enduser = match outcome {
        Ok(MatchOutcome::One(enduser)) => enduser,
        Ok(MatchOutcome::None) => {
            bridge.throttle.mark(key);
            return vec![METADATA_PULL.success(
                "No Tellescope enduser found for patient",
                "enduser_not_found",
                Some(&patient_id),
                None,
            )];
        }
        Ok(MatchOutcome::Ambiguous { criterion, count }) => {
            warn!("Patient {} matches {} endusers by '{}'", patient_id, count, criterion);
            return vec![METADATA_PULL.failure(
                format!("Patient {patient_id} matches several Tellescope endusers by '{criterion}'"),
                "ambiguous_match",
                false,
            )];
        }
        Err(error) => {
            warn!("Metadata pull for {} failed: {}", patient_id, error);
            return vec![METADATA_PULL.failure(
                format!("Metadata sync failed for patient {patient_id}: {error}"),
                "sync_error",
                !error.is_fatal(),
            )];
        }
    };

    let fields = canvas::custom_fields(&enduser);
    bridge.throttle.mark(key);

    if fields.is_empty() {
        return vec![METADATA_PULL.success(
            "No custom fields to sync",
            "no_custom_fields",
            Some(&patient_id),
            Some(&enduser.id),
        )];
    }

    let synced = fields.len();
    let mut effects: Vec<Effect> = fields
        .into_iter()
        .map(|(key, value)| Effect::custom_field(&patient_id, key, value))
        .collect();
    effects.push(METADATA_PULL.success(
        format!("Successfully synced {synced} custom fields"),
        "metadata_sync",
        Some(&patient_id),
        Some(&enduser.id),
    ));
    effects
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use crate::effects::{Effect, Status};
    use serde_json::json;
    use std::time::Duration;
    use tellescope_sync::memory::{Fault, MemoryRemote};

    fn updated(id: &str) -> super::HostEvent {
        event("PATIENT_UPDATED", json!({"target": {"id": id}}))
    }

    fn operation(effects: &[Effect]) -> Option<String> {
        effects.last()?.as_log()?.operation_type.clone()
    }

    #[tokio::test(start_paused = true)]
    async fn custom_fields_become_metadata() {
        let remote = MemoryRemote::new();
        remote.insert(
            "enduser",
            json!({
                "source": "Canvas",
                "externalId": "p-1",
                "fields": {"plan": "gold", "vip": true, "note": null},
            }),
        );
        let bridge = bridge(&remote);

        let effects = bridge.handle(&updated("p-1")).await;
        assert_eq!(effects.len(), 3);

        let mut metadata: Vec<_> = effects
            .iter()
            .filter_map(|effect| match effect {
                Effect::UpsertPatientMetadata(m) => Some((m.key.clone(), m.value.clone())),
                _ => None,
            })
            .collect();
        metadata.sort();
        assert_eq!(
            metadata,
            vec![("plan".into(), "gold".into()), ("vip".into(), "true".into())]
        );

        let log = effects[2].as_log().unwrap();
        assert_eq!(log.operation_type.as_deref(), Some("metadata_sync"));
        assert_eq!(log.message, "Successfully synced 2 custom fields");
        assert_eq!(log.source_system, "tellescope");
    }

    #[tokio::test(start_paused = true)]
    async fn second_pull_inside_window_is_throttled() {
        let remote = MemoryRemote::new();
        remote.insert(
            "enduser",
            json!({"source": "Canvas", "externalId": "p-1", "fields": {"plan": "gold"}}),
        );
        let bridge = bridge(&remote);

        bridge.handle(&updated("p-1")).await;
        let requests = remote.request_count();

        let throttled = bridge.handle(&updated("p-1")).await;
        assert_eq!(operation(&throttled).as_deref(), Some("rate_limited"));
        assert_eq!(remote.request_count(), requests);

        tokio::time::advance(Duration::from_secs(300)).await;
        let again = bridge.handle(&updated("p-1")).await;
        assert_eq!(operation(&again).as_deref(), Some("metadata_sync"));
    }

    #[tokio::test(start_paused = true)]
    async fn not_found_and_empty_fields_start_the_window() {
        let remote = MemoryRemote::new();
        remote.insert("enduser", json!({"source": "Canvas", "externalId": "p-2"}));
        let bridge = bridge(&remote);

        let missing = bridge.handle(&updated("p-1")).await;
        assert_eq!(operation(&missing).as_deref(), Some("enduser_not_found"));

        let empty = bridge.handle(&updated("p-2")).await;
        assert_eq!(operation(&empty).as_deref(), Some("no_custom_fields"));

        for id in ["p-1", "p-2"] {
            let throttled = bridge.handle(&updated(id)).await;
            assert_eq!(operation(&throttled).as_deref(), Some("rate_limited"));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn matches_by_reference_too() {
        let remote = MemoryRemote::new();
        remote.insert(
            "enduser",
            json!({
                "references": [{"type": "Canvas", "id": "p-1"}],
                "fields": "{\"plan\": \"silver\"}",
            }),
        );
        let bridge = bridge(&remote);

        let effects = bridge.handle(&updated("p-1")).await;
        assert_eq!(operation(&effects).as_deref(), Some("metadata_sync"));
        assert!(matches!(
            &effects[0],
            Effect::UpsertPatientMetadata(m) if m.value == "silver"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn failure_does_not_start_the_window() {
        let remote = MemoryRemote::new();
        let bridge = bridge(&remote);
        remote.fail_always(Fault::Status(500));

        let failed = bridge.handle(&updated("p-1")).await;
        let log = failed[0].as_log().unwrap();
        assert_eq!(log.status, Status::Error);
        assert_eq!(log.error_category.as_deref(), Some("sync_error"));
        assert_eq!(log.retry_recommended, Some(true));

        remote.clear_faults();
        let retried = bridge.handle(&updated("p-1")).await;
        assert_eq!(operation(&retried).as_deref(), Some("enduser_not_found"));
    }

    #[tokio::test(start_paused = true)]
    async fn ambiguous_enduser_is_an_error() {
        let remote = MemoryRemote::new();
        let twin = json!({"source": "Canvas", "externalId": "p-1", "fields": {"a": "b"}});
        remote.seed("enduser", [twin.clone(), twin]);
        let bridge = bridge(&remote);

        let effects = bridge.handle(&updated("p-1")).await;
        assert_eq!(effects.len(), 1);
        let log = effects[0].as_log().unwrap();
        assert_eq!(log.error_category.as_deref(), Some("ambiguous_match"));
    }
}
