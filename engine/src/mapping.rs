//! Field mapping from host records to remote payloads.
//!
//! A [`FieldMapping`] is a list of [`FieldRule`]s between a declared input
//! schema and a declared output schema. Everything that can be checked
//! without a record in hand is checked by [`FieldMapping::new`]; a mapping
//! that builds can only fail at map time on bad record data.

use std::collections::{BTreeMap, HashSet};
use std::fmt::Write;

use chrono::format::{Item, StrftimeItems};
use chrono::NaiveDate;
use serde_json::{Map, Value};

use crate::record::is_blank;
use crate::schema::FieldType;
use crate::{Error, LocalRecord, RecordSchema, Result};

/// Turns a host record into the field set written to the remote.
pub trait FieldMapper: Send + Sync {
    fn map(&self, record: &LocalRecord) -> Result<Map<String, Value>>;
}

impl<F> FieldMapper for F
where
    F: Fn(&LocalRecord) -> Result<Map<String, Value>> + Send + Sync,
{
    fn map(&self, record: &LocalRecord) -> Result<Map<String, Value>> {
        self(record)
    }
}

/// Where a rule reads its value from.
#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    /// The host-native record id, as a string
    LocalId,
    /// A field of the host record
    Field(String),
    /// A fixed value
    Constant(Value),
}

/// Conversion applied to a present source value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Transform {
    #[default]
    None,
    /// Replace the value through a table keyed by its string form
    Lookup {
        table: BTreeMap<String, Value>,
        /// Used when the key is not in the table; without it the field is
        /// treated as absent
        fallback: Option<Value>,
    },
    /// Re-format a date string. Values that do not parse with `from` pass
    /// through unchanged.
    Date { from: String, to: String },
}

impl Transform {
    pub fn lookup<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        Transform::Lookup {
            table: entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            fallback: None,
        }
    }

    pub fn date(from: impl Into<String>, to: impl Into<String>) -> Self {
        Transform::Date {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Sets the lookup fallback; no effect on other transforms.
    pub fn or_else(self, value: impl Into<Value>) -> Self {
        match self {
            Transform::Lookup { table, .. } => Transform::Lookup {
                table,
                fallback: Some(value.into()),
            },
            other => other,
        }
    }

    fn apply(&self, value: Value) -> Option<Value> {
        match self {
            Transform::None => Some(value),
            Transform::Lookup { table, fallback } => {
                let key = match &value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                table.get(&key).or(fallback.as_ref()).cloned()
            }
            Transform::Date { from, to } => match value.as_str() {
                Some(raw) => match NaiveDate::parse_from_str(raw, from) {
                    Ok(date) => match render_date(date, to) {
                        Some(rendered) => Some(Value::String(rendered)),
                        None => Some(value),
                    },
                    Err(_) => Some(value),
                },
                None => Some(value),
            },
        }
    }
}

/// Value used when the source is absent or blank.
#[derive(Debug, Clone, PartialEq)]
pub enum Fallback {
    Constant(Value),
    /// String with `{id}` replaced by the host record id
    Template(String),
}

/// One output field and how to produce it.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldRule {
    pub target: String,
    pub source: Source,
    pub transform: Transform,
    pub fallback: Option<Fallback>,
}

impl FieldRule {
    /// Copy a host field unchanged.
    pub fn copy(target: impl Into<String>, field: impl Into<String>) -> Self {
        Self::new(target, Source::Field(field.into()))
    }

    /// Write the host record id.
    pub fn local_id(target: impl Into<String>) -> Self {
        Self::new(target, Source::LocalId)
    }

    /// Always write `value`.
    pub fn constant(target: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(target, Source::Constant(value.into()))
    }

    pub fn new(target: impl Into<String>, source: Source) -> Self {
        Self {
            target: target.into(),
            source,
            transform: Transform::None,
            fallback: None,
        }
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_fallback(mut self, fallback: Fallback) -> Self {
        self.fallback = Some(fallback);
        self
    }

    fn resolve(&self, record: &LocalRecord) -> Option<Value> {
        let value = match &self.source {
            Source::LocalId => Some(Value::String(record.id.clone())),
            Source::Field(name) => record.present(name).cloned(),
            Source::Constant(value) => Some(value.clone()),
        };

        let value = value
            .and_then(|v| self.transform.apply(v))
            .filter(|v| !is_blank(v));

        value.or_else(|| match &self.fallback {
            Some(Fallback::Constant(value)) => Some(value.clone()),
            Some(Fallback::Template(template)) => {
                Some(Value::String(template.replace("{id}", &record.id)))
            }
            None => None,
        })
    }
}

/// Rule-based [`FieldMapper`] between two declared schemas.
#[derive(Debug, Clone)]
pub struct FieldMapping {
    input: RecordSchema,
    output: RecordSchema,
    rules: Vec<FieldRule>,
}

impl FieldMapping {
    /// Build a mapping, rejecting rules that could never produce a valid
    /// payload.
    pub fn new(input: RecordSchema, output: RecordSchema, rules: Vec<FieldRule>) -> Result<Self> {
        let mut targets = HashSet::new();

        for rule in &rules {
            let Some(target) = output.field(&rule.target) else {
                return Err(invalid(format!(
                    "target '{}' is not part of schema '{}'",
                    rule.target, output.name
                )));
            };
            if !targets.insert(rule.target.as_str()) {
                return Err(invalid(format!("target '{}' is mapped twice", rule.target)));
            }

            match &rule.source {
                Source::Field(name) if input.field(name).is_none() => {
                    return Err(invalid(format!(
                        "source '{name}' is not part of schema '{}'",
                        input.name
                    )));
                }
                Source::Constant(value) if matches!(rule.transform, Transform::None) => {
                    target.validate_type(value).map_err(into_mapping)?;
                }
                _ => {}
            }

            match &rule.transform {
                Transform::None => {}
                Transform::Lookup { table, fallback } => {
                    for value in table.values().chain(fallback) {
                        target.validate_type(value).map_err(into_mapping)?;
                    }
                }
                Transform::Date { from, to } => {
                    if !matches!(target.field_type, FieldType::String | FieldType::Date) {
                        return Err(invalid(format!(
                            "date transform cannot write {} field '{}'",
                            target.field_type, rule.target
                        )));
                    }
                    for format in [from, to] {
                        check_date_format(format)?;
                    }
                    // A date has no time of day, so time specifiers fail to render.
                    if render_date(NaiveDate::MIN, to).is_none() {
                        return Err(invalid(format!(
                            "date format '{to}' needs more than a calendar date"
                        )));
                    }
                }
            }

            match &rule.fallback {
                Some(Fallback::Constant(value)) => {
                    target.validate_type(value).map_err(into_mapping)?;
                }
                Some(Fallback::Template(_)) => {
                    if target.field_type != FieldType::String {
                        return Err(invalid(format!(
                            "template fallback cannot write {} field '{}'",
                            target.field_type, rule.target
                        )));
                    }
                }
                None => {}
            }
        }

        if let Some(uncovered) = output.required_fields().find(|f| !targets.contains(f)) {
            return Err(invalid(format!(
                "required field '{uncovered}' of '{}' has no rule",
                output.name
            )));
        }

        Ok(Self {
            input,
            output,
            rules,
        })
    }

    pub fn input(&self) -> &RecordSchema {
        &self.input
    }

    pub fn output(&self) -> &RecordSchema {
        &self.output
    }

    pub fn rules(&self) -> &[FieldRule] {
        &self.rules
    }
}

impl FieldMapper for FieldMapping {
    fn map(&self, record: &LocalRecord) -> Result<Map<String, Value>> {
        // Hosts send more than we declare; only declared fields are checked.
        for field in &self.input.fields {
            if let Some(value) = record.get(&field.name).filter(|v| !v.is_null()) {
                field.validate_type(value)?;
            }
        }

        let mut payload = Map::new();
        for rule in &self.rules {
            if let Some(value) = rule.resolve(record) {
                payload.insert(rule.target.clone(), value);
            }
        }

        self.output.validate_payload(&payload)?;
        Ok(payload)
    }
}

fn check_date_format(format: &str) -> Result<()> {
    if format.is_empty() || StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
        return Err(invalid(format!("invalid date format '{format}'")));
    }
    Ok(())
}

fn render_date(date: NaiveDate, format: &str) -> Option<String> {
    let mut out = String::new();
    write!(out, "{}", date.format(format)).ok()?;
    Some(out)
}

fn invalid(message: String) -> Error {
    Error::InvalidMapping(message)
}

fn into_mapping(err: Error) -> Error {
    match err {
        Error::Validation(message) => Error::InvalidMapping(message),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FieldDef;
    use serde_json::json;

    fn patient_schema() -> RecordSchema {
        RecordSchema::new(
            "patient",
            vec![
                FieldDef::optional("first_name", FieldType::String),
                FieldDef::optional("birth_date", FieldType::Date),
                FieldDef::optional("sex", FieldType::String),
                FieldDef::optional("email", FieldType::String),
            ],
        )
    }

    fn enduser_schema() -> RecordSchema {
        RecordSchema::new(
            "enduser",
            vec![
                FieldDef::required("externalId", FieldType::String),
                FieldDef::optional("fname", FieldType::String),
                FieldDef::optional("dateOfBirth", FieldType::String),
                FieldDef::optional("gender", FieldType::String),
                FieldDef::optional("email", FieldType::String),
                FieldDef::optional("source", FieldType::String),
            ],
        )
    }

    fn rules() -> Vec<FieldRule> {
        vec![
            FieldRule::local_id("externalId"),
            FieldRule::constant("source", "Canvas"),
            FieldRule::copy("fname", "first_name"),
            FieldRule::copy("dateOfBirth", "birth_date")
                .with_transform(Transform::date("%Y-%m-%d", "%m-%d-%Y")),
            FieldRule::copy("gender", "sex")
                .with_transform(Transform::lookup([("M", "Male"), ("F", "Female")]).or_else("Unknown"))
                .with_fallback(Fallback::Constant(json!("Unknown"))),
            FieldRule::copy("email", "email")
                .with_fallback(Fallback::Template("patient{id}@canvas.medical".into())),
        ]
    }

    fn mapping() -> FieldMapping {
        FieldMapping::new(patient_schema(), enduser_schema(), rules()).unwrap()
    }

    #[test]
    fn maps_full_record() {
        let record = LocalRecord::new(
            "p-1",
            json!({
                "first_name": "Ada",
                "birth_date": "1990-01-15",
                "sex": "F",
                "email": "ada@example.com",
                "unrelated": {"ignored": true},
            }),
        );

        let payload = mapping().map(&record).unwrap();
        assert_eq!(
            Value::Object(payload),
            json!({
                "externalId": "p-1",
                "source": "Canvas",
                "fname": "Ada",
                "dateOfBirth": "01-15-1990",
                "gender": "Female",
                "email": "ada@example.com",
            })
        );
    }

    #[test]
    fn blanks_are_dropped_and_fallbacks_apply() {
        let record = LocalRecord::new("p-2", json!({"first_name": "", "sex": null, "email": "  "}));
        let payload = mapping().map(&record).unwrap();

        assert!(!payload.contains_key("fname"));
        assert!(!payload.contains_key("dateOfBirth"));
        assert_eq!(payload["gender"], json!("Unknown"));
        assert_eq!(payload["email"], json!("patientp-2@canvas.medical"));
    }

    #[test]
    fn unparsable_dates_pass_through() {
        let record = LocalRecord::new("p-3", json!({"birth_date": "03-15-1992", "sex": "X"}));
        let payload = mapping().map(&record).unwrap();
        assert_eq!(payload["dateOfBirth"], json!("03-15-1992"));
        assert_eq!(payload["gender"], json!("Unknown"));
    }

    #[test]
    fn mistyped_input_is_validation_error() {
        let record = LocalRecord::new("p-4", json!({"first_name": 42}));
        assert!(matches!(mapping().map(&record), Err(Error::Validation(_))));
    }

    #[test]
    fn rejects_unknown_target_and_source() {
        let mut bad_target = rules();
        bad_target.push(FieldRule::copy("nickname", "first_name"));
        assert!(matches!(
            FieldMapping::new(patient_schema(), enduser_schema(), bad_target),
            Err(Error::InvalidMapping(msg)) if msg.contains("nickname")
        ));

        let mut bad_source = rules();
        bad_source[2] = FieldRule::copy("fname", "given_name");
        assert!(matches!(
            FieldMapping::new(patient_schema(), enduser_schema(), bad_source),
            Err(Error::InvalidMapping(msg)) if msg.contains("given_name")
        ));
    }

    #[test]
    fn rejects_duplicate_and_missing_required_targets() {
        let mut duplicate = rules();
        duplicate.push(FieldRule::constant("source", "Other"));
        assert!(FieldMapping::new(patient_schema(), enduser_schema(), duplicate).is_err());

        let uncovered = rules().into_iter().skip(1).collect();
        assert!(matches!(
            FieldMapping::new(patient_schema(), enduser_schema(), uncovered),
            Err(Error::InvalidMapping(msg)) if msg.contains("externalId")
        ));
    }

    #[test]
    fn rejects_mistyped_constants_and_formats() {
        let mut constant = rules();
        constant[1] = FieldRule::constant("source", 7);
        assert!(FieldMapping::new(patient_schema(), enduser_schema(), constant).is_err());

        let mut format = rules();
        format[3] = FieldRule::copy("dateOfBirth", "birth_date")
            .with_transform(Transform::date("%Y-%Q", "%m-%d-%Y"));
        assert!(FieldMapping::new(patient_schema(), enduser_schema(), format).is_err());
    }

    #[test]
    fn rejects_time_of_day_output_format() {
        let mut format = rules();
        format[3] = FieldRule::copy("dateOfBirth", "birth_date")
            .with_transform(Transform::date("%Y-%m-%d", "%m-%d-%Y %H:%M"));
        assert!(matches!(
            FieldMapping::new(patient_schema(), enduser_schema(), format),
            Err(Error::InvalidMapping(msg)) if msg.contains("%H:%M")
        ));
    }

    #[test]
    fn unrenderable_date_passes_through() {
        let transform = Transform::date("%Y-%m-%d", "%H:%M");
        assert_eq!(
            transform.apply(json!("1990-01-15")),
            Some(json!("1990-01-15"))
        );
    }

    #[test]
    fn closures_are_mappers() {
        let mapper = |record: &LocalRecord| -> Result<Map<String, Value>> {
            let mut out = Map::new();
            out.insert("externalId".into(), json!(record.id));
            Ok(out)
        };
        let payload = mapper.map(&LocalRecord::new("x", json!({}))).unwrap();
        assert_eq!(payload["externalId"], json!("x"));
    }
}
