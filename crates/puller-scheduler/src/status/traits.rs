// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Status service trait definitions.
//!
//! Defines the abstract interface to the service recording mirror progress.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::branch::{BranchType, PullQueueEntry};

/// Errors from status service calls.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StatusError {
    /// The service could not be reached.
    #[error("status service unavailable: {0}")]
    Unavailable(String),

    /// The service refused the call.
    #[error("status service rejected {call}: {message}")]
    Rejected {
        /// Name of the refused call.
        call: &'static str,
        /// Message returned by the service.
        message: String,
    },

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for status service calls.
pub type Result<T> = std::result::Result<T, StatusError>;

/// Statistics recorded once per scheduler run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStatistics {
    pub run_name: String,
    pub hostname: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

/// One call made against the status service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum StatusCall {
    BranchPullQueue {
        branch_type: BranchType,
    },
    StartMirroring {
        branch_id: i64,
    },
    MirrorComplete {
        branch_id: i64,
        revision_id: String,
    },
    MirrorFailed {
        branch_id: i64,
        reason: String,
    },
    RecordRunStatistics(RunStatistics),
}

impl StatusCall {
    /// Name of the underlying service method.
    pub fn method(&self) -> &'static str {
        match self {
            StatusCall::BranchPullQueue { .. } => "branch_pull_queue",
            StatusCall::StartMirroring { .. } => "start_mirroring",
            StatusCall::MirrorComplete { .. } => "mirror_complete",
            StatusCall::MirrorFailed { .. } => "mirror_failed",
            StatusCall::RecordRunStatistics(_) => "record_run_statistics",
        }
    }
}

/// Client for the service that records mirror status.
///
/// Implementations must be cheap to share: one client serves every job of
/// a run concurrently.
#[async_trait]
pub trait StatusClient: Send + Sync {
    /// Backend identifier (e.g., "memory", "file")
    fn client_type(&self) -> &'static str;

    /// Branches of the given type that are due for mirroring.
    async fn branch_pull_queue(&self, branch_type: BranchType) -> Result<Vec<PullQueueEntry>>;

    /// The worker for `branch_id` has started mirroring.
    async fn start_mirroring(&self, branch_id: i64) -> Result<()>;

    /// Mirroring `branch_id` finished at `revision_id`.
    async fn mirror_complete(&self, branch_id: i64, revision_id: &str) -> Result<()>;

    /// Mirroring `branch_id` failed.
    async fn mirror_failed(&self, branch_id: i64, reason: &str) -> Result<()>;

    /// Record statistics for a completed run.
    async fn record_run_statistics(&self, stats: &RunStatistics) -> Result<()>;
}
