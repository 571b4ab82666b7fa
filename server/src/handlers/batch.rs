//! Batch push of patient snapshots.

use serde::Deserialize;
use serde_json::Value;
use tellescope_sync::{BatchReport, ResourceType, SyncOrchestrator, Transport};
use tracing::info;

use super::Bridge;
use crate::canvas;
use crate::error::{AppError, Result};

/// Request body for `POST /sync/patients`.
#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub patients: Vec<Value>,
}

/// Push every patient through upsert and report per-patient results.
pub async fn sync_patients<T: Transport>(
    bridge: &Bridge<T>,
    request: BatchRequest,
) -> Result<BatchReport> {
    let client = bridge.client().ok_or_else(|| {
        AppError::ServiceUnavailable("Tellescope secrets are not configured".into())
    })?;

    let records = request
        .patients
        .iter()
        .enumerate()
        .map(|(index, patient)| {
            canvas::patient_record(patient)
                .ok_or_else(|| AppError::BadRequest(format!("patient {index} has no id")))
        })
        .collect::<Result<Vec<_>>>()?;

    info!("Batch push of {} patients", records.len());
    let report = SyncOrchestrator::new(client)
        .sync_batch(
            &ResourceType::ENDUSERS,
            &records,
            &bridge.mapping,
            &canvas::enduser_criteria(),
        )
        .await;
    Ok(report)
}
