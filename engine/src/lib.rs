//! # Tellescope Sync
//!
//! Identity-aware synchronization of host records into Tellescope.
//!
//! This crate owns the part of the integration that has to be right: deciding
//! whether a remote record already exists for a host record, writing only what
//! changed, paging through large filtered collections, and surviving rate
//! limits and flaky networks without ever creating a second record for the
//! same identity.
//!
//! ## Design Principles
//!
//! - **Explicit configuration**: the client is built from values passed in;
//!   nothing here reads the environment
//! - **Explicit outcomes**: lookups return [`Lookup`], matches return
//!   [`MatchOutcome`], and per-record failures land in a [`SyncResult`]
//! - **Swappable transport**: everything talks through [`Transport`], so tests
//!   run against the in-memory remote behind the `testing` feature
//!
//! ## Core Concepts
//!
//! ### Resource Client
//!
//! [`ResourceClient`] wraps the REST surface: create, get, update, delete and
//! lazy, cursor-paginated [`list`](ResourceClient::list) with a [`Filter`].
//! Rate limits, timeouts and 5xx responses are retried with the
//! [`RetryPolicy`] backoff.
//!
//! ### Identity Matching
//!
//! [`IdentityMatcher`] tries [`MatchCriterion`]s in priority order. The first
//! criterion with exactly one hit wins; two hits are ambiguous and stop the
//! search.
//!
//! ### Upsert
//!
//! [`Reconciler::upsert`] maps a [`LocalRecord`] through a [`FieldMapper`],
//! matches it, then creates, updates the changed fields, or skips it.
//!
//! ### Batches
//!
//! [`SyncOrchestrator::sync_batch`] runs many records with per-record
//! isolation and returns a [`BatchReport`].
//!
//! ## Quick Start
//!
//! ```rust
//! use tellescope_sync::memory::MemoryRemote;
//! use tellescope_sync::{
//!     Binding, ClientConfig, FieldDef, FieldMapping, FieldRule, FieldType, LocalRecord,
//!     MatchCriterion, RecordSchema, ResourceClient, ResourceType, SyncOrchestrator,
//! };
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! // 1. Describe both sides and how fields move between them
//! let patient = RecordSchema::new("patient", vec![FieldDef::optional("first_name", FieldType::String)]);
//! let enduser = RecordSchema::new(
//!     "enduser",
//!     vec![
//!         FieldDef::required("externalId", FieldType::String),
//!         FieldDef::optional("fname", FieldType::String),
//!     ],
//! );
//! let mapping = FieldMapping::new(
//!     patient,
//!     enduser,
//!     vec![FieldRule::local_id("externalId"), FieldRule::copy("fname", "first_name")],
//! )
//! .unwrap();
//!
//! // 2. Say how an existing remote record is recognised
//! let criteria = vec![MatchCriterion::new("external_id").equals("externalId", Binding::LocalId)];
//!
//! // 3. Sync
//! let config = ClientConfig::new("api-key", "https://api.tellescope.com/v1").unwrap();
//! let client = ResourceClient::new(config, MemoryRemote::new());
//! let records = vec![LocalRecord::new("p-1", json!({"first_name": "Ada"}))];
//!
//! let report = SyncOrchestrator::new(&client)
//!     .sync_batch(&ResourceType::ENDUSERS, &records, &mapping, &criteria)
//!     .await;
//! assert_eq!(report.counts.created, 1);
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod filter;
pub mod mapping;
pub mod matcher;
#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod orchestrator;
pub mod reconcile;
pub mod record;
pub mod resource;
pub mod schema;
pub mod transport;

// Re-export main types at crate root
pub use client::{Lookup, PageCursor, Pager, ResourceClient};
pub use config::{ClientConfig, RetryPolicy, DEFAULT_API_URL};
pub use error::{Error, Result};
pub use filter::Filter;
pub use mapping::{Fallback, FieldMapper, FieldMapping, FieldRule, Source, Transform};
pub use matcher::{Binding, Comparison, IdentityMatcher, MatchCriterion, MatchOutcome, MatchTerm};
pub use orchestrator::{BatchCounts, BatchReport, SyncOrchestrator};
pub use reconcile::{Reconciler, SkipReason, SyncResult};
pub use record::{LocalRecord, RemoteRecord, EXTERNAL_ID_FIELD};
pub use resource::ResourceType;
pub use schema::{FieldDef, FieldType, RecordSchema};
pub use transport::{HttpRequest, HttpResponse, Method, ReqwestTransport, Transport, TransportError};

/// Identifier of a record, remote or host-side.
pub type RecordId = String;
