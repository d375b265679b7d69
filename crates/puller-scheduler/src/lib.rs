// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Puller Scheduler - Bounded Branch Mirroring
//!
//! This crate runs one worker process per branch waiting to be mirrored,
//! never more than `max_workers` at a time, and keeps the status service
//! informed of what each worker reports.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │                       Status service                               │
//! │   pull queue · start_mirroring · mirror_complete · mirror_failed   │
//! └────────────────────────────────────────────────────────────────────┘
//!          ▲ queue                                  ▲ lifecycle
//!          │                                        │
//! ┌────────┴────────────────────────────────────────┴──────────────────┐
//! │                   puller-scheduler (This Crate)                    │
//! │  ┌─────────────┐  ┌──────────────┐  ┌─────────────┐  ┌──────────┐  │
//! │  │  Run lock   │  │  Scheduler   │  │  MirrorJob  │  │  Token   │  │
//! │  │   (flock)   │  │ (semaphore)  │  │ (listener)  │  │   pool   │  │
//! │  └─────────────┘  └──────────────┘  └──────┬──────┘  └──────────┘  │
//! │                                            │                       │
//! │                                   ┌────────▼────────┐              │
//! │                                   │  JobSupervisor  │              │
//! │                                   └────────┬────────┘              │
//! └────────────────────────────────────────────┼───────────────────────┘
//!                              spawn, SIGINT,  │  ▲ netstring commands
//!                              SIGKILL         ▼  │ on stdout
//!                                   ┌─────────────────┐
//!                                   │  Worker process │
//!                                   └─────────────────┘
//! ```
//!
//! # Job lifecycle
//!
//! | Worker command | Status call |
//! |----------------|-------------|
//! | `startMirroring` | `start_mirroring(branch_id)` |
//! | `progressMade` | none (resets the inactivity timeout) |
//! | `mirrorSucceeded` | `mirror_complete(branch_id, revision_id)` |
//! | `mirrorFailed` | `mirror_failed(branch_id, reason)` |
//!
//! A worker that exits without reporting gets a synthesized
//! `mirror_failed` built from the last line of its stderr. Timeouts,
//! crashes and protocol violations are additionally recorded through the
//! [`diagnostics::DiagnosticSink`].
//!
//! # Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `PULLER_MAX_WORKERS` | Yes | - | Concurrency limit |
//! | `PULLER_WORKER_BINARY` | Yes | - | Worker executable |
//! | `PULLER_QUEUE_FILE` | Yes (binary) | - | Pull queue JSON file |
//! | `PULLER_WORKER_TIMEOUT_SECS` | No | `300` | Worker inactivity timeout |
//! | `PULLER_KILL_GRACE_SECS` | No | `5` | Delay between SIGINT and SIGKILL |
//! | `PULLER_DESTINATION_TEMPLATE` | No | `.data/mirrors/{path}` | Mirror location |
//! | `PULLER_DIAGNOSTIC_PREFIX` | No | `puller` | Diagnostic token prefix |
//! | `PULLER_DIAGNOSTIC_POOL_SIZE` | No | max workers | Diagnostic token count |
//! | `PULLER_LOCK_DIR` | No | `.data/locks` | Run lock directory |
//! | `PULLER_LOCK_PREFIX` | No | `branch-puller` | Run lock name prefix |
//! | `PULLER_OUTCOME_LOG` | No | `.data/outcomes.jsonl` | Status call log |
//! | `PULLER_DIAGNOSTIC_DIR` | No | `.data/diagnostics` | Diagnostic reports |
//!
//! # Modules
//!
//! - [`branch`]: Branch types, queue entries and destination paths
//! - [`config`]: Configuration from environment variables
//! - [`diagnostics`]: Recording of unexpected job errors
//! - [`error`]: Error types for job operations
//! - [`job`]: One branch mirror job
//! - [`lock`]: Per-branch-type run lock
//! - [`pool`]: Diagnostic token pool
//! - [`scheduler`]: Bounded-concurrency run over the pull queue
//! - [`status`]: Status service clients
//! - [`supervisor`]: Worker process supervision

/// Branch types, queue entries and destination paths.
pub mod branch;

/// Configuration loaded from environment variables.
pub mod config;

/// Recording of unexpected job errors.
pub mod diagnostics;

/// Error types for job operations.
pub mod error;

/// One branch mirror job.
pub mod job;

/// Per-branch-type advisory run lock.
pub mod lock;

/// Diagnostic token pool.
pub mod pool;

/// Bounded-concurrency scheduler.
pub mod scheduler;

/// Status service clients.
pub mod status;

/// Worker process supervision.
pub mod supervisor;

pub use branch::{BranchToMirror, BranchType, DestinationTemplate, PullQueueEntry};
pub use config::Config;
pub use error::{Error, Result};
pub use job::MirrorJob;
pub use scheduler::{PullerScheduler, RunSummary, SchedulerBuilder, SchedulerError};
pub use supervisor::{JobOutcome, JobSupervisor, SupervisedExit, SupervisorConfig};
