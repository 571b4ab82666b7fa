//! Upsert: match, diff, write.
//!
//! # Algorithm
//!
//! 1. Map the host record through the injected [`FieldMapper`]
//! 2. Resolve the remote counterpart with the [`IdentityMatcher`]
//! 3. No match: create. One match: update only the fields that differ.
//!    Ambiguous: fail without writing
//! 4. A create that failed transiently may still have landed, so the whole
//!    cycle restarts from a fresh match after the backoff delay
//!
//! The host side is authoritative: the last mapped value wins per field.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::transport::Transport;
use crate::{
    Error, FieldMapper, IdentityMatcher, LocalRecord, MatchCriterion, MatchOutcome, RecordId,
    RemoteRecord, ResourceClient, ResourceType, Result,
};

/// Why a record was not written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SkipReason {
    /// The remote already holds the mapped values
    Unchanged,
    /// The batch was cancelled before this record started
    Cancelled,
    /// An earlier authentication failure stopped the batch
    Aborted,
}

/// Outcome of syncing one host record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum SyncResult {
    Created {
        local_id: RecordId,
        remote_id: RecordId,
    },
    Updated {
        local_id: RecordId,
        remote_id: RecordId,
        /// Names of the fields written
        changed: Vec<String>,
    },
    Skipped {
        local_id: RecordId,
        #[serde(skip_serializing_if = "Option::is_none")]
        remote_id: Option<RecordId>,
        reason: SkipReason,
    },
    Failed {
        local_id: RecordId,
        error: Error,
    },
}

impl SyncResult {
    pub fn local_id(&self) -> &str {
        match self {
            SyncResult::Created { local_id, .. }
            | SyncResult::Updated { local_id, .. }
            | SyncResult::Skipped { local_id, .. }
            | SyncResult::Failed { local_id, .. } => local_id,
        }
    }

    pub fn remote_id(&self) -> Option<&str> {
        match self {
            SyncResult::Created { remote_id, .. } | SyncResult::Updated { remote_id, .. } => {
                Some(remote_id)
            }
            SyncResult::Skipped { remote_id, .. } => remote_id.as_deref(),
            SyncResult::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&Error> {
        match self {
            SyncResult::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.error().is_some()
    }
}

/// Fields of `payload` whose value differs from (or is missing on) `remote`.
pub fn diff(payload: &Map<String, Value>, remote: &RemoteRecord) -> Map<String, Value> {
    payload
        .iter()
        .filter(|(field, value)| remote.get(field) != Some(*value))
        .map(|(field, value)| (field.clone(), value.clone()))
        .collect()
}

/// One match-then-write pass.
enum Cycle {
    Done(SyncResult),
    /// Create failed in a way that may have left a record behind
    CreateFailed(Error),
}

/// Upsert engine over a [`ResourceClient`].
pub struct Reconciler<'a, T> {
    client: &'a ResourceClient<T>,
    matcher: IdentityMatcher<'a, T>,
}

impl<'a, T: Transport> Reconciler<'a, T> {
    pub fn new(client: &'a ResourceClient<T>) -> Self {
        Self {
            client,
            matcher: IdentityMatcher::new(client),
        }
    }

    /// Create or update the remote counterpart of `record`.
    ///
    /// Never returns an error: every failure is captured in the result.
    pub async fn upsert(
        &self,
        resource: &ResourceType,
        record: &LocalRecord,
        mapper: &dyn FieldMapper,
        criteria: &[MatchCriterion],
    ) -> SyncResult {
        let payload = match mapper.map(record) {
            Ok(payload) => payload,
            Err(error) => {
                warn!("Mapping {} failed: {}", record.id, error);
                return failed(record, error);
            }
        };

        let policy = self.client.config().retry();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match self.cycle(resource, record, &payload, criteria).await {
                Ok(Cycle::Done(result)) => return result,
                Ok(Cycle::CreateFailed(error)) if attempt <= policy.max_retries => {
                    let delay = policy.delay_for_retry(attempt);
                    warn!(
                        "Create of {} for {} failed ({}), re-matching in {:?}",
                        resource.singular(),
                        record.id,
                        error,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Ok(Cycle::CreateFailed(error)) | Err(error) => {
                    warn!("Sync of {} failed: {}", record.id, error);
                    return failed(record, error);
                }
            }
        }
    }

    /// Resolve the remote counterpart of `record` without writing.
    pub async fn pull_one(
        &self,
        resource: &ResourceType,
        record: &LocalRecord,
        criteria: &[MatchCriterion],
    ) -> Result<MatchOutcome> {
        self.matcher.find_match(resource, record, criteria).await
    }

    async fn cycle(
        &self,
        resource: &ResourceType,
        record: &LocalRecord,
        payload: &Map<String, Value>,
        criteria: &[MatchCriterion],
    ) -> Result<Cycle> {
        let outcome = self.matcher.find_match(resource, record, criteria).await?;
        match outcome.unique(resource)? {
            None => match self.client.create(resource, payload).await {
                Ok(created) => {
                    info!(
                        "Created {} {} for {}",
                        resource.singular(),
                        created.id,
                        record.id
                    );
                    Ok(Cycle::Done(SyncResult::Created {
                        local_id: record.id.clone(),
                        remote_id: created.id,
                    }))
                }
                Err(error @ Error::Transient { .. }) => Ok(Cycle::CreateFailed(error)),
                Err(error) => Err(error),
            },
            Some(existing) => {
                let changes = diff(payload, &existing);
                if changes.is_empty() {
                    debug!("{} {} is up to date", resource.singular(), existing.id);
                    return Ok(Cycle::Done(SyncResult::Skipped {
                        local_id: record.id.clone(),
                        remote_id: Some(existing.id),
                        reason: SkipReason::Unchanged,
                    }));
                }

                let changed: Vec<String> = changes.keys().cloned().collect();
                self.client.update(resource, &existing.id, &changes).await?;
                info!(
                    "Updated {} {} for {}: {:?}",
                    resource.singular(),
                    existing.id,
                    record.id,
                    changed
                );
                Ok(Cycle::Done(SyncResult::Updated {
                    local_id: record.id.clone(),
                    remote_id: existing.id,
                    changed,
                }))
            }
        }
    }
}

fn failed(record: &LocalRecord, error: Error) -> SyncResult {
    SyncResult::Failed {
        local_id: record.id.clone(),
        error,
    }
}
