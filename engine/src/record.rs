//! Record types exchanged with the remote platform and the host.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Error, RecordId, Result};

/// Field carrying the host-side identity on a remote record.
pub const EXTERNAL_ID_FIELD: &str = "externalId";

/// A record owned by the remote platform.
///
/// The engine only ever holds transient copies: ones just fetched, or ones
/// returned by a write it just issued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRecord {
    /// Remote-assigned unique identifier
    pub id: RecordId,
    /// When the remote created the record
    pub created_at: DateTime<Utc>,
    /// When the remote last modified the record
    pub updated_at: DateTime<Utc>,
    /// Every other field, including `externalId` when present
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl RemoteRecord {
    /// Parse a record from a response body.
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| Error::MalformedResponse(e.to_string()))
    }

    /// Look up a field value.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// The cross-system identity stored on this record, if any.
    pub fn external_id(&self) -> Option<&str> {
        self.fields.get(EXTERNAL_ID_FIELD).and_then(Value::as_str)
    }
}

/// A snapshot of a host record for one sync pass.
///
/// The id lives in the host's namespace and is never compared against remote
/// ids directly; identity is resolved through match criteria.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalRecord {
    /// Host-native identifier
    pub id: RecordId,
    /// Host field values
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl LocalRecord {
    /// Create a snapshot from an id and a JSON object.
    ///
    /// Non-object payloads produce a record with no fields.
    pub fn new(id: impl Into<RecordId>, fields: Value) -> Self {
        let fields = match fields {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Look up a field value.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Look up a field and treat null, `""` and `[]` as absent.
    pub fn present(&self, field: &str) -> Option<&Value> {
        self.get(field).filter(|v| !is_blank(v))
    }
}

/// Null, empty strings and empty arrays carry no information for matching
/// or mapping.
pub(crate) fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}
