//! # Vulndash Core
//!
//! Scan-job lifecycle engine: accepts image references, runs them through an
//! external vulnerability scanner on a fixed-size worker pool, and keeps the
//! results in a keyed TTL store.
//!
//! ## Overview
//!
//! - **Keyed TTL Store** ([`store`]): one trait, a Redis backend, an in-memory
//!   backend and a shared contract suite.
//! - **Job Ledger** ([`ledger`]): one short-lived record per job, driven
//!   through the [`job::ScanJobStatus`] state machine.
//! - **Report Cache & Summary Index** ([`cache`]): the latest report per
//!   repository plus derived severity counts, with the remaining TTL doubling
//!   as a freshness clock.
//! - **Execution** ([`enqueuer`], [`queue`], [`worker`], [`controller`]):
//!   validate and record, dispatch, scan, publish.
//! - **Status Query** ([`query`]): per-job status and a global histogram.
//!
//! ## Feature Flags
//!
//! - `redis` (default): Redis-backed store and queue.
//! - `test-support`: exposes [`store::contract`] to downstream test code.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use vulndash_core::{
//!     JobLedger, MemoryJobQueue, MemoryStore, ReportCache, RetentionConfig,
//!     ScanController, ScanEnqueuer, ScanRequest, TrivyScanner, WorkerConfig, WorkerPool,
//! };
//!
//! async fn run() -> vulndash_core::Result<()> {
//!     let store = Arc::new(MemoryStore::new());
//!     let retention = RetentionConfig::default();
//!     let ledger = JobLedger::new(store.clone(), retention);
//!     let cache = ReportCache::new(store, retention);
//!     let queue = Arc::new(MemoryJobQueue::new());
//!
//!     let controller = Arc::new(ScanController::new(
//!         ledger.clone(),
//!         cache,
//!         Arc::new(TrivyScanner::default()),
//!     ));
//!     let pool = WorkerPool::new(WorkerConfig::default(), queue.clone(), controller);
//!     pool.start().await?;
//!
//!     let enqueuer = ScanEnqueuer::new(ledger, queue);
//!     let job = enqueuer.enqueue(ScanRequest::new("alpine:3.18")).await?;
//!     println!("queued {}", job.id);
//!
//!     pool.stop().await;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod controller;
pub mod enqueuer;
pub mod error;
pub mod job;
pub mod ledger;
pub mod query;
pub mod queue;
pub mod report;
pub mod scanner;
pub mod store;
pub mod worker;

pub use cache::{CachedReport, DashboardTotals, ReportCache, Summary, SummaryListing, format_age};
pub use config::{RetentionConfig, WorkerConfig};
pub use controller::{CompletionHook, ScanController, ScanOutcome};
pub use enqueuer::{ScanEnqueuer, ScanRequest};
pub use error::{Result, VulnError};
pub use job::{JobId, ScanJob, ScanJobStatus};
pub use ledger::JobLedger;
pub use query::{JobStatusView, StatusQuery};
#[cfg(feature = "redis")]
pub use queue::RedisJobQueue;
pub use queue::{JobQueue, MemoryJobQueue, WorkItem};
pub use report::{Report, RepositoryKey, ScanTarget, Severity, SeverityCounts, Vulnerability};
pub use scanner::{ScanFailure, ScannerAdapter, TrivyConfig, TrivyScanner};
#[cfg(feature = "redis")]
pub use store::RedisStore;
pub use store::{KeyValueStore, MemoryStore, StoredValue};
pub use worker::WorkerPool;
