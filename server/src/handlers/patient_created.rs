//! PATIENT_CREATED: push the patient to Tellescope as an enduser.

use tellescope_sync::{Error, Reconciler, ResourceClient, ResourceType, SyncResult, Transport};
use tracing::{info, warn};

use super::{Bridge, HostEvent};
use crate::canvas;
use crate::effects::{Effect, PATIENT_PUSH};

pub(super) async fn handle<T: Transport>(
    bridge: &Bridge<T>,
    client: &ResourceClient<T>,
    event: &HostEvent,
) -> Vec<Effect> {
    let Some(instance) = event.target.instance.as_ref() else {
        return vec![PATIENT_PUSH.failure(
            "Patient instance not available",
            "missing_patient_instance",
            false,
        )];
    };
    let Some(patient) = canvas::patient_record(instance) else {
        return vec![PATIENT_PUSH.failure(
            "Patient instance has no id",
            "missing_patient_instance",
            false,
        )];
    };

    if let Some(enduser_id) = canvas::tellescope_identifier(instance) {
        info!("Patient {} already linked to enduser {}", patient.id, enduser_id);
        return vec![PATIENT_PUSH.success(
            format!("Patient already has Tellescope identifier {enduser_id}"),
            "fhir_identifier_exists",
            Some(&patient.id),
            Some(enduser_id),
        )];
    }

    let result = Reconciler::new(client)
        .upsert(
            &ResourceType::ENDUSERS,
            &patient,
            &bridge.mapping,
            &canvas::enduser_criteria(),
        )
        .await;

    vec![report(&result)]
}

fn report(result: &SyncResult) -> Effect {
    match result {
        SyncResult::Created {
            local_id,
            remote_id,
        } => PATIENT_PUSH.success(
            "Created Tellescope enduser",
            "enduser_creation",
            Some(local_id),
            Some(remote_id),
        ),
        SyncResult::Updated {
            local_id,
            remote_id,
            changed,
        } => PATIENT_PUSH.success(
            format!("Updated existing Tellescope enduser: {}", changed.join(", ")),
            "enduser_update",
            Some(local_id),
            Some(remote_id),
        ),
        SyncResult::Skipped {
            local_id,
            remote_id,
            ..
        } => PATIENT_PUSH.success(
            "Tellescope enduser already exists and is up to date",
            "duplicate_handling",
            Some(local_id),
            remote_id.as_deref(),
        ),
        SyncResult::Failed { local_id, error } => {
            warn!("Push of patient {} failed: {}", local_id, error);
            PATIENT_PUSH.failure(
                format!("{} for patient {local_id}: {error}", headline(error)),
                error.category(),
                error.is_retryable(),
            )
        }
    }
}

fn headline(error: &Error) -> &'static str {
    match error {
        Error::Validation(_) | Error::InvalidMapping(_) => "Data validation failed",
        Error::RateLimited { .. } | Error::Transient { .. } => "Connection to Tellescope failed",
        Error::AmbiguousMatch { .. } => "Patient matches several Tellescope endusers",
        _ => "Patient sync failed",
    }
}
