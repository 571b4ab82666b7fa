//! Batch driver over the [`Reconciler`].
//!
//! Records are processed one after another in input order, each in
//! isolation: a failed record is reported and the batch moves on. Two things
//! stop a batch early, and both still produce one result per input:
//!
//! - cancellation, observed before each record starts (`skipped(cancelled)`)
//! - an authentication failure, after which nothing else can succeed
//!   (`skipped(aborted)`)

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::transport::Transport;
use crate::{
    FieldMapper, LocalRecord, MatchCriterion, Reconciler, ResourceClient, ResourceType,
    SkipReason, SyncResult,
};

/// Outcome tallies for a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchCounts {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl BatchCounts {
    fn record(&mut self, result: &SyncResult) {
        match result {
            SyncResult::Created { .. } => self.created += 1,
            SyncResult::Updated { .. } => self.updated += 1,
            SyncResult::Skipped { .. } => self.skipped += 1,
            SyncResult::Failed { .. } => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.created + self.updated + self.skipped + self.failed
    }
}

/// Per-record results of a batch, in input order, plus tallies.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub results: Vec<SyncResult>,
    pub counts: BatchCounts,
    /// An authentication failure stopped the batch
    pub aborted: bool,
    /// Cancellation stopped the batch
    pub cancelled: bool,
}

impl BatchReport {
    fn new(results: Vec<SyncResult>, halted: Option<SkipReason>) -> Self {
        let mut counts = BatchCounts::default();
        for result in &results {
            counts.record(result);
        }
        Self {
            results,
            counts,
            aborted: halted == Some(SkipReason::Aborted),
            cancelled: halted == Some(SkipReason::Cancelled),
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &SyncResult> {
        self.results.iter().filter(|r| r.is_failed())
    }
}

/// Runs batches of host records through upsert.
pub struct SyncOrchestrator<'a, T> {
    reconciler: Reconciler<'a, T>,
    cancel: CancellationToken,
}

impl<'a, T: Transport> SyncOrchestrator<'a, T> {
    pub fn new(client: &'a ResourceClient<T>) -> Self {
        Self {
            reconciler: Reconciler::new(client),
            cancel: CancellationToken::new(),
        }
    }

    /// Observe `token` between records.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub async fn sync_batch(
        &self,
        resource: &ResourceType,
        records: &[LocalRecord],
        mapper: &dyn FieldMapper,
        criteria: &[MatchCriterion],
    ) -> BatchReport {
        info!("Syncing {} records to {}", records.len(), resource);

        let mut results = Vec::with_capacity(records.len());
        let mut halted: Option<SkipReason> = None;

        for record in records {
            if halted.is_none() && self.cancel.is_cancelled() {
                info!("Batch cancelled before {}", record.id);
                halted = Some(SkipReason::Cancelled);
            }
            if let Some(reason) = halted {
                results.push(SyncResult::Skipped {
                    local_id: record.id.clone(),
                    remote_id: None,
                    reason,
                });
                continue;
            }

            let result = self
                .reconciler
                .upsert(resource, record, mapper, criteria)
                .await;
            if result.error().is_some_and(|e| e.is_fatal()) {
                error!("Authentication rejected at {}, aborting batch", record.id);
                halted = Some(SkipReason::Aborted);
            }
            results.push(result);
        }

        let report = BatchReport::new(results, halted);
        info!(
            "Batch done: {} created, {} updated, {} skipped, {} failed",
            report.counts.created, report.counts.updated, report.counts.skipped, report.counts.failed
        );
        report
    }
}
