//! Canvas record shapes and how they line up with Tellescope resources.

use serde_json::{json, Map, Value};
use tellescope_sync::{
    Binding, Fallback, FieldDef, FieldMapping, FieldRule, FieldType, LocalRecord, MatchCriterion,
    MatchTerm, RecordSchema, RemoteRecord, Result, Source, Transform,
};

/// `source` value stamped on everything the bridge creates.
pub const SOURCE: &str = "Canvas";

/// FHIR identifier system that marks a patient as already linked.
const TELLESCOPE_SYSTEM: &str = "Tellescope";

const CHAT_ROOM_TITLE: &str = "Health Discussion";

pub fn patient_schema() -> RecordSchema {
    RecordSchema::new(
        "patient",
        vec![
            FieldDef::optional("first_name", FieldType::String),
            FieldDef::optional("last_name", FieldType::String),
            FieldDef::optional("email", FieldType::String),
            FieldDef::optional("phone_number", FieldType::String),
            FieldDef::optional("date_of_birth", FieldType::Date),
            FieldDef::optional("sex", FieldType::String),
        ],
    )
}

pub fn enduser_schema() -> RecordSchema {
    RecordSchema::new(
        "enduser",
        vec![
            FieldDef::required("externalId", FieldType::String),
            FieldDef::required("source", FieldType::String),
            FieldDef::optional("fname", FieldType::String),
            FieldDef::optional("lname", FieldType::String),
            FieldDef::optional("email", FieldType::String),
            FieldDef::optional("phone", FieldType::String),
            FieldDef::optional("dateOfBirth", FieldType::String),
            FieldDef::optional("gender", FieldType::String),
        ],
    )
}

/// Patient to enduser mapping.
pub fn enduser_mapping() -> Result<FieldMapping> {
    FieldMapping::new(
        patient_schema(),
        enduser_schema(),
        vec![
            FieldRule::local_id("externalId"),
            FieldRule::constant("source", SOURCE),
            FieldRule::copy("fname", "first_name"),
            FieldRule::copy("lname", "last_name"),
            FieldRule::copy("email", "email")
                .with_fallback(Fallback::Template("patient{id}@canvas.medical".into())),
            FieldRule::copy("phone", "phone_number"),
            // Dates arrive ISO formatted; any other string passes through.
            FieldRule::copy("dateOfBirth", "date_of_birth")
                .with_transform(Transform::date("%Y-%m-%d", "%m-%d-%Y")),
            FieldRule::new("gender", Source::Field("sex".into())).with_transform(
                Transform::lookup([
                    ("M", "Male"),
                    ("F", "Female"),
                    ("O", "Other"),
                    ("Other", "Other"),
                ])
                .or_else("Unknown"),
            )
            .with_fallback(Fallback::Constant(json!("Unknown"))),
        ],
    )
}

/// How an enduser for a patient is found, strongest first.
pub fn enduser_criteria() -> Vec<MatchCriterion> {
    vec![
        MatchCriterion::new("source_external_id")
            .equals("source", SOURCE)
            .equals("externalId", Binding::LocalId),
        MatchCriterion::new("canvas_reference").element_matches(
            "references",
            vec![
                MatchTerm::equals("type", SOURCE),
                MatchTerm::equals("id", Binding::LocalId),
            ],
        ),
    ]
}

/// How a Tellescope user for a staff member is found. Names are matched
/// trimmed.
pub fn user_criteria() -> Vec<MatchCriterion> {
    vec![
        MatchCriterion::new("canvas_id").equals("canvasId", Binding::LocalId),
        MatchCriterion::new("full_name")
            .equals("fname", Binding::Field("first_name".into()))
            .equals("lname", Binding::Field("last_name".into())),
    ]
}

/// The chat room dedicated to one patient.
pub fn chat_room_criteria() -> Vec<MatchCriterion> {
    vec![MatchCriterion::new("patient_room")
        .equals("source", SOURCE)
        .equals("externalId", Binding::LocalId)]
}

pub fn chat_room_payload(patient_id: &str, enduser_id: &str) -> Map<String, Value> {
    object(json!({
        "title": CHAT_ROOM_TITLE,
        "source": SOURCE,
        "externalId": patient_id,
        "enduserIds": [enduser_id],
        "userIds": [],
    }))
}

pub fn chat_payload(room_id: &str, sender_id: &str, html: String) -> Map<String, Value> {
    object(json!({
        "roomId": room_id,
        "senderId": sender_id,
        "message": "",
        "html": html,
    }))
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Host-native id as a string. Numeric ids are accepted.
pub fn host_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Snapshot of a patient instance as sent by the host.
pub fn patient_record(instance: &Value) -> Option<LocalRecord> {
    let id = host_id(instance.get("id")?)?;
    let mut fields = instance.as_object()?.clone();
    fields.remove("id");
    Some(LocalRecord { id, fields })
}

/// The value of the patient's Tellescope FHIR identifier, if it has one.
///
/// Hosts send either `identifier` or `identifiers`.
pub fn tellescope_identifier(instance: &Value) -> Option<&str> {
    ["identifier", "identifiers"]
        .iter()
        .filter_map(|key| instance.get(*key)?.as_array())
        .flatten()
        .find(|identifier| {
            identifier.get("system").and_then(Value::as_str) == Some(TELLESCOPE_SYSTEM)
        })
        .map(|identifier| {
            identifier
                .get("value")
                .and_then(Value::as_str)
                .unwrap_or_default()
        })
}

/// Plain message text as chat HTML.
pub fn to_html(content: &str) -> String {
    format!("<p>{}</p>", content.replace('\n', "<br>"))
}

/// Enduser custom fields as metadata key/value pairs.
///
/// `fields` may arrive as an object or as a JSON-encoded string. Nulls are
/// skipped; scalars are rendered plainly and containers as compact JSON.
pub fn custom_fields(enduser: &RemoteRecord) -> Vec<(String, String)> {
    let decoded;
    let fields = match enduser.get("fields") {
        Some(Value::Object(map)) => map,
        Some(Value::String(raw)) => match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => {
                decoded = map;
                &decoded
            }
            _ => return Vec::new(),
        },
        _ => return Vec::new(),
    };

    fields
        .iter()
        .filter_map(|(key, value)| {
            let rendered = match value {
                Value::Null => return None,
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            Some((key.clone(), rendered))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tellescope_sync::{FieldMapper, Filter};

    fn enduser(fields: Value) -> RemoteRecord {
        RemoteRecord::from_value(json!({
            "id": "e-1",
            "createdAt": "2024-01-01T00:00:00Z",
            "updatedAt": "2024-01-01T00:00:00Z",
            "fields": fields,
        }))
        .unwrap()
    }

    #[test]
    fn maps_a_full_patient() {
        let patient = patient_record(&json!({
            "id": "p-1",
            "first_name": "Ada",
            "last_name": "Lovelace",
            "email": "ada@example.com",
            "phone_number": "+15550100",
            "date_of_birth": "1815-12-10",
            "sex": "F",
        }))
        .unwrap();

        let payload = enduser_mapping().unwrap().map(&patient).unwrap();
        assert_eq!(
            Value::Object(payload),
            json!({
                "externalId": "p-1",
                "source": "Canvas",
                "fname": "Ada",
                "lname": "Lovelace",
                "email": "ada@example.com",
                "phone": "+15550100",
                "dateOfBirth": "12-10-1815",
                "gender": "Female",
            })
        );
    }

    #[test]
    fn sparse_patient_gets_fallbacks() {
        let patient = patient_record(&json!({
            "id": 42,
            "first_name": "",
            "email": null,
            "sex": "X",
        }))
        .unwrap();

        let payload = enduser_mapping().unwrap().map(&patient).unwrap();
        assert_eq!(payload["externalId"], "42");
        assert_eq!(payload["email"], "patient42@canvas.medical");
        assert_eq!(payload["gender"], "Unknown");
        assert!(!payload.contains_key("fname"));
        assert!(!payload.contains_key("dateOfBirth"));
    }

    #[test]
    fn patient_without_sex_is_unknown_gender() {
        let patient = patient_record(&json!({"id": "p-1", "first_name": "Ada"})).unwrap();
        let payload = enduser_mapping().unwrap().map(&patient).unwrap();
        assert_eq!(payload.get("gender"), Some(&json!("Unknown")));

        let patient = patient_record(&json!({"id": "p-2", "sex": null})).unwrap();
        let payload = enduser_mapping().unwrap().map(&patient).unwrap();
        assert_eq!(payload["gender"], "Unknown");
    }

    #[test]
    fn preformatted_birth_date_passes_through() {
        let patient = patient_record(&json!({"id": "p-1", "date_of_birth": "03-15-1992"})).unwrap();
        let payload = enduser_mapping().unwrap().map(&patient).unwrap();
        assert_eq!(payload["dateOfBirth"], "03-15-1992");
    }

    #[test]
    fn patient_without_id_is_rejected() {
        assert!(patient_record(&json!({"first_name": "Ada"})).is_none());
        assert!(patient_record(&json!({"id": "  "})).is_none());
        assert!(patient_record(&json!("p-1")).is_none());
    }

    #[test]
    fn criteria_bind_to_patient() {
        let patient = LocalRecord::new("p-1", json!({}));
        let filters: Vec<_> = enduser_criteria()
            .iter()
            .map(|c| c.bind(&patient).unwrap())
            .collect();

        assert_eq!(
            filters[0],
            Filter::all(vec![
                Filter::eq("source", "Canvas"),
                Filter::eq("externalId", "p-1"),
            ])
        );
        assert_eq!(
            filters[1],
            Filter::all(vec![Filter::elem_match(
                "references",
                Filter::all(vec![Filter::eq("type", "Canvas"), Filter::eq("id", "p-1")]),
            )])
        );
    }

    #[test]
    fn name_criterion_needs_both_names() {
        let staff = LocalRecord::new("s-1", json!({"first_name": "Grace"}));
        let criteria = user_criteria();
        assert!(criteria[0].bind(&staff).is_some());
        assert!(criteria[1].bind(&staff).is_none());
    }

    #[test]
    fn finds_tellescope_identifier() {
        let linked = json!({
            "id": "p-1",
            "identifier": [
                {"system": "MRN", "value": "123"},
                {"system": "Tellescope", "value": "e-9"},
            ],
        });
        assert_eq!(tellescope_identifier(&linked), Some("e-9"));

        let plural = json!({"identifiers": [{"system": "Tellescope", "value": "e-1"}]});
        assert_eq!(tellescope_identifier(&plural), Some("e-1"));

        let unlinked = json!({"identifier": [{"system": "MRN", "value": "123"}]});
        assert_eq!(tellescope_identifier(&unlinked), None);
        assert_eq!(tellescope_identifier(&json!({"id": "p-1"})), None);
    }

    #[test]
    fn html_keeps_line_breaks() {
        assert_eq!(to_html("hi\nthere"), "<p>hi<br>there</p>");
        assert_eq!(to_html("one line"), "<p>one line</p>");
    }

    #[test]
    fn custom_fields_are_rendered() {
        let record = enduser(json!({
            "risk": "high",
            "active": true,
            "score": 7.5,
            "tags": ["a", "b"],
            "nested": {"k": 1},
            "empty": null,
        }));

        let mut fields = custom_fields(&record);
        fields.sort();
        assert_eq!(
            fields,
            vec![
                ("active".to_string(), "true".to_string()),
                ("nested".to_string(), r#"{"k":1}"#.to_string()),
                ("risk".to_string(), "high".to_string()),
                ("score".to_string(), "7.5".to_string()),
                ("tags".to_string(), r#"["a","b"]"#.to_string()),
            ]
        );
    }

    #[test]
    fn custom_fields_accept_encoded_json() {
        let record = enduser(json!(r#"{"plan": "gold"}"#));
        assert_eq!(custom_fields(&record), vec![("plan".into(), "gold".into())]);

        assert!(custom_fields(&enduser(json!("not json"))).is_empty());
        assert!(custom_fields(&enduser(json!(null))).is_empty());
    }
}
