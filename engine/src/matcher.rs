//! Identity resolution between host records and remote records.
//!
//! Criteria are tried in priority order. Each one is bound to the host
//! record, sent as a single list probe with page size 2, and judged on the
//! result: one hit wins, two hits stop the search as ambiguous, none moves on
//! to the next criterion.

use serde_json::Value;
use tracing::debug;

use crate::record::is_blank;
use crate::transport::Transport;
use crate::{Error, Filter, LocalRecord, RemoteRecord, ResourceClient, ResourceType, Result};

/// Enough to tell "one" from "more than one".
pub const PROBE_PAGE_SIZE: usize = 2;

/// Where a term takes its comparison value from.
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    LocalId,
    Field(String),
    Literal(Value),
}

impl Binding {
    fn resolve(&self, record: &LocalRecord) -> Option<Value> {
        let value = match self {
            Binding::LocalId => Value::String(record.id.clone()),
            Binding::Field(name) => record.present(name)?.clone(),
            Binding::Literal(value) => value.clone(),
        };
        (!is_blank(&value)).then_some(value)
    }
}

impl From<&str> for Binding {
    fn from(value: &str) -> Self {
        Binding::Literal(Value::String(value.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Equals,
    /// Remote value is one of the bound values
    OneOf,
    AtLeast,
    AtMost,
    /// Presence test; the bound value reads as a boolean, default `true`
    Exists,
}

/// One condition on a remote field.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchTerm {
    Compare {
        field: String,
        comparison: Comparison,
        binding: Binding,
    },
    /// Some element of an array field satisfies every sub-term
    ElementMatches { field: String, terms: Vec<MatchTerm> },
}

impl MatchTerm {
    pub fn equals(field: impl Into<String>, binding: impl Into<Binding>) -> Self {
        MatchTerm::Compare {
            field: field.into(),
            comparison: Comparison::Equals,
            binding: binding.into(),
        }
    }

    fn bind(&self, record: &LocalRecord) -> Option<Filter> {
        match self {
            MatchTerm::Compare {
                field,
                comparison,
                binding,
            } => {
                let value = binding.resolve(record)?;
                Some(match comparison {
                    Comparison::Equals => Filter::eq(field.clone(), value),
                    Comparison::OneOf => match value {
                        Value::Array(values) => Filter::one_of(field.clone(), values),
                        scalar => Filter::one_of(field.clone(), vec![scalar]),
                    },
                    Comparison::AtLeast => Filter::gte(field.clone(), value),
                    Comparison::AtMost => Filter::lte(field.clone(), value),
                    Comparison::Exists => {
                        Filter::exists(field.clone(), value.as_bool().unwrap_or(true))
                    }
                })
            }
            MatchTerm::ElementMatches { field, terms } => {
                let inner = terms
                    .iter()
                    .map(|term| term.bind(record))
                    .collect::<Option<Vec<_>>>()?;
                Some(Filter::elem_match(field.clone(), Filter::all(inner)))
            }
        }
    }
}

/// A named conjunction of terms.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchCriterion {
    pub name: String,
    pub terms: Vec<MatchTerm>,
}

impl MatchCriterion {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            terms: Vec::new(),
        }
    }

    pub fn term(mut self, term: MatchTerm) -> Self {
        self.terms.push(term);
        self
    }

    pub fn compare(
        self,
        field: impl Into<String>,
        comparison: Comparison,
        binding: impl Into<Binding>,
    ) -> Self {
        self.term(MatchTerm::Compare {
            field: field.into(),
            comparison,
            binding: binding.into(),
        })
    }

    pub fn equals(self, field: impl Into<String>, binding: impl Into<Binding>) -> Self {
        self.compare(field, Comparison::Equals, binding)
    }

    pub fn element_matches(self, field: impl Into<String>, terms: Vec<MatchTerm>) -> Self {
        self.term(MatchTerm::ElementMatches {
            field: field.into(),
            terms,
        })
    }

    /// The filter for this record, or `None` if any binding is blank.
    pub fn bind(&self, record: &LocalRecord) -> Option<Filter> {
        if self.terms.is_empty() {
            return None;
        }
        let filters = self
            .terms
            .iter()
            .map(|term| term.bind(record))
            .collect::<Option<Vec<_>>>()?;
        Some(Filter::all(filters))
    }
}

/// Result of an identity probe.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    None,
    One(RemoteRecord),
    /// `count` is a lower bound: the probe stops at two
    Ambiguous { criterion: String, count: usize },
}

impl MatchOutcome {
    /// The single match, with ambiguity turned into an error.
    pub fn unique(self, resource: &ResourceType) -> Result<Option<RemoteRecord>> {
        match self {
            MatchOutcome::None => Ok(None),
            MatchOutcome::One(record) => Ok(Some(record)),
            MatchOutcome::Ambiguous { criterion, count } => Err(Error::AmbiguousMatch {
                resource: resource.plural().to_string(),
                criterion,
                count,
            }),
        }
    }
}

/// Resolves host records to remote records.
pub struct IdentityMatcher<'a, T> {
    client: &'a ResourceClient<T>,
}

impl<'a, T: Transport> IdentityMatcher<'a, T> {
    pub fn new(client: &'a ResourceClient<T>) -> Self {
        Self { client }
    }

    pub async fn find_match(
        &self,
        resource: &ResourceType,
        record: &LocalRecord,
        criteria: &[MatchCriterion],
    ) -> Result<MatchOutcome> {
        for criterion in criteria {
            let Some(filter) = criterion.bind(record) else {
                debug!(
                    "Skipping criterion '{}' for {}: unbound",
                    criterion.name, record.id
                );
                continue;
            };

            let mut pager = self.client.pager(resource, Some(filter), PROBE_PAGE_SIZE);
            let mut found = pager.next_page().await?.unwrap_or_default();

            if found.len() > 1 {
                debug!(
                    "Criterion '{}' is ambiguous for {} ({} hits)",
                    criterion.name,
                    record.id,
                    found.len()
                );
                return Ok(MatchOutcome::Ambiguous {
                    criterion: criterion.name.clone(),
                    count: found.len(),
                });
            }
            if let Some(remote) = found.pop() {
                debug!(
                    "Criterion '{}' matched {} to {} {}",
                    criterion.name,
                    record.id,
                    resource.singular(),
                    remote.id
                );
                return Ok(MatchOutcome::One(remote));
            }
        }

        Ok(MatchOutcome::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryRemote;
    use crate::transport::Method;
    use crate::ClientConfig;
    use serde_json::json;

    fn criteria() -> Vec<MatchCriterion> {
        vec![
            MatchCriterion::new("external_id")
                .equals("source", "Canvas")
                .equals("externalId", Binding::LocalId),
            MatchCriterion::new("reference").element_matches(
                "references",
                vec![
                    MatchTerm::Compare {
                        field: "type".into(),
                        comparison: Comparison::Equals,
                        binding: "Canvas".into(),
                    },
                    MatchTerm::Compare {
                        field: "id".into(),
                        comparison: Comparison::Equals,
                        binding: Binding::LocalId,
                    },
                ],
            ),
        ]
    }

    fn setup() -> (MemoryRemote, ResourceClient<MemoryRemote>) {
        let remote = MemoryRemote::new();
        let config = ClientConfig::new("key", "https://api.example.com").unwrap();
        (remote.clone(), ResourceClient::new(config, remote))
    }

    #[test]
    fn binds_criteria_to_filters() {
        let record = LocalRecord::new("p-1", json!({}));
        let filter = criteria()[0].bind(&record).unwrap();
        assert_eq!(
            filter.to_json(),
            json!({"$and": [{"source": "Canvas"}, {"externalId": "p-1"}]})
        );

        let filter = criteria()[1].bind(&record).unwrap();
        assert_eq!(
            filter.to_json(),
            json!({"references": {"$elemMatch": {"$and": [{"type": "Canvas"}, {"id": "p-1"}]}}})
        );
    }

    #[test]
    fn blank_bindings_skip_the_criterion() {
        let by_email = MatchCriterion::new("email").equals("email", Binding::Field("email".into()));
        for fields in [json!({}), json!({"email": null}), json!({"email": ""}), json!({"email": []})] {
            assert_eq!(by_email.bind(&LocalRecord::new("p", fields)), None);
        }
        assert!(by_email
            .bind(&LocalRecord::new("p", json!({"email": "a@b.c"})))
            .is_some());
    }

    #[test]
    fn comparison_kinds() {
        let record = LocalRecord::new("p", json!({"ids": ["a", "b"], "age": 30}));
        let criterion = MatchCriterion::new("mixed")
            .compare("externalId", Comparison::OneOf, Binding::Field("ids".into()))
            .compare("age", Comparison::AtLeast, Binding::Field("age".into()))
            .compare("age", Comparison::AtMost, Binding::Literal(json!(65)))
            .compare("archivedAt", Comparison::Exists, Binding::Literal(json!(false)));

        assert_eq!(
            criterion.bind(&record).unwrap().to_json(),
            json!({"$and": [
                {"externalId": {"$in": ["a", "b"]}},
                {"age": {"$gte": 30}},
                {"age": {"$lte": 65}},
                {"archivedAt": {"$exists": false}},
            ]})
        );
    }

    #[tokio::test]
    async fn first_criterion_with_one_hit_wins() {
        let (remote, client) = setup();
        remote.insert("enduser", json!({"source": "Canvas", "externalId": "p-1", "tag": "primary"}));
        remote.insert("enduser", json!({"references": [{"type": "Canvas", "id": "p-1"}], "tag": "ref"}));

        let record = LocalRecord::new("p-1", json!({}));
        let outcome = IdentityMatcher::new(&client)
            .find_match(&ResourceType::ENDUSERS, &record, &criteria())
            .await
            .unwrap();

        match outcome {
            MatchOutcome::One(found) => assert_eq!(found.get("tag"), Some(&json!("primary"))),
            other => panic!("expected one match, got {other:?}"),
        }
        assert_eq!(remote.count(Method::Get), 1);
    }

    #[tokio::test]
    async fn falls_through_to_later_criteria() {
        let (remote, client) = setup();
        remote.insert("enduser", json!({"references": [{"type": "Canvas", "id": "p-1"}]}));

        let record = LocalRecord::new("p-1", json!({}));
        let outcome = IdentityMatcher::new(&client)
            .find_match(&ResourceType::ENDUSERS, &record, &criteria())
            .await
            .unwrap();

        assert!(matches!(outcome, MatchOutcome::One(_)));
        assert_eq!(remote.count(Method::Get), 2);
    }

    #[tokio::test]
    async fn two_hits_are_ambiguous() {
        let (remote, client) = setup();
        for _ in 0..3 {
            remote.insert("enduser", json!({"source": "Canvas", "externalId": "p-1"}));
        }

        let record = LocalRecord::new("p-1", json!({}));
        let outcome = IdentityMatcher::new(&client)
            .find_match(&ResourceType::ENDUSERS, &record, &criteria())
            .await
            .unwrap();

        assert_eq!(
            outcome,
            MatchOutcome::Ambiguous {
                criterion: "external_id".into(),
                count: 2
            }
        );
        let probes = remote.requests();
        assert_eq!(probes.len(), 1);
        assert_eq!(probes[0].query_param("limit"), Some("2"));
    }

    #[tokio::test]
    async fn nothing_found_after_all_criteria() {
        let (remote, client) = setup();
        let record = LocalRecord::new("p-9", json!({}));
        let outcome = IdentityMatcher::new(&client)
            .find_match(&ResourceType::ENDUSERS, &record, &criteria())
            .await
            .unwrap();

        assert_eq!(outcome, MatchOutcome::None);
        assert_eq!(remote.request_count(), 2);
    }
}
