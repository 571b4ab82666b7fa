//! Effect instructions returned to the host.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Metadata namespace for pulled enduser custom fields.
pub const CUSTOM_FIELDS_NAMESPACE: &str = "tellescope_custom_fields";

/// An instruction the host applies after an event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Effect {
    Log(StatusLog),
    AddBannerAlert(BannerAlert),
    UpsertPatientMetadata(PatientMetadata),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

/// Structured record of one protocol run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusLog {
    pub status: Status,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tellescope_enduser_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub canvas_patient_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub protocol: &'static str,
    pub event_type: &'static str,
    pub source_system: &'static str,
    pub target_system: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_recommended: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BannerAlert {
    #[serde(rename = "type")]
    pub kind: Status,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientMetadata {
    pub patient_id: String,
    pub namespace: &'static str,
    pub key: String,
    pub value: String,
}

/// Which way a protocol moves data, for its log records.
#[derive(Debug, Clone, Copy)]
pub struct Protocol {
    pub name: &'static str,
    pub event_type: &'static str,
    pub source_system: &'static str,
    pub target_system: &'static str,
}

pub const PATIENT_PUSH: Protocol = Protocol {
    name: "canvas_patient_to_tellescope_enduser",
    event_type: "PATIENT_CREATED",
    source_system: "canvas",
    target_system: "tellescope",
};

pub const METADATA_PULL: Protocol = Protocol {
    name: "tellescope_enduser_to_canvas_metadata",
    event_type: "PATIENT_UPDATED",
    source_system: "tellescope",
    target_system: "canvas",
};

impl Protocol {
    fn log(&self, status: Status, message: String) -> StatusLog {
        StatusLog {
            status,
            message,
            operation_type: None,
            error_category: None,
            tellescope_enduser_id: None,
            canvas_patient_id: None,
            timestamp: Utc::now(),
            protocol: self.name,
            event_type: self.event_type,
            source_system: self.source_system,
            target_system: self.target_system,
            retry_recommended: None,
        }
    }

    pub fn success(
        &self,
        message: impl Into<String>,
        operation: &str,
        patient_id: Option<&str>,
        enduser_id: Option<&str>,
    ) -> Effect {
        let mut log = self.log(Status::Success, message.into());
        log.operation_type = Some(operation.to_string());
        log.canvas_patient_id = patient_id.map(str::to_string);
        log.tellescope_enduser_id = enduser_id.map(str::to_string);
        Effect::Log(log)
    }

    pub fn failure(&self, message: impl Into<String>, category: &str, retry: bool) -> Effect {
        let mut log = self.log(Status::Error, message.into());
        log.error_category = Some(category.to_string());
        log.retry_recommended = Some(retry);
        Effect::Log(log)
    }
}

impl Effect {
    pub fn banner(kind: Status, message: impl Into<String>) -> Self {
        Effect::AddBannerAlert(BannerAlert {
            kind,
            message: message.into(),
        })
    }

    pub fn custom_field(patient_id: &str, key: impl Into<String>, value: String) -> Self {
        Effect::UpsertPatientMetadata(PatientMetadata {
            patient_id: patient_id.to_string(),
            namespace: CUSTOM_FIELDS_NAMESPACE,
            key: key.into(),
            value,
        })
    }

    /// The log record, if this is a log effect.
    #[cfg(test)]
    pub fn as_log(&self) -> Option<&StatusLog> {
        match self {
            Effect::Log(log) => Some(log),
            _ => None,
        }
    }
}
