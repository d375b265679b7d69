// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory status client.
//!
//! Serves a pull queue set up front and records every call, so embedders
//! and tests can inspect exactly what a run reported.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;

use super::traits::*;
use crate::branch::{BranchType, PullQueueEntry};

/// Status client keeping everything in memory.
#[derive(Debug, Default)]
pub struct InMemoryStatusClient {
    queues: Mutex<HashMap<BranchType, Vec<PullQueueEntry>>>,
    calls: Mutex<Vec<StatusCall>>,
    /// Methods (by [`StatusCall::method`] name) that fail when called
    failing_methods: HashSet<&'static str>,
}

impl InMemoryStatusClient {
    /// Create an empty client.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a client whose named methods always fail.
    pub fn failing(methods: &[&'static str]) -> Self {
        Self {
            failing_methods: methods.iter().copied().collect(),
            ..Self::default()
        }
    }

    /// Append entries to the queue of a branch type.
    pub async fn enqueue(&self, branch_type: BranchType, entries: Vec<PullQueueEntry>) {
        self.queues
            .lock()
            .await
            .entry(branch_type)
            .or_default()
            .extend(entries);
    }

    /// Every call made so far, in order.
    pub async fn calls(&self) -> Vec<StatusCall> {
        self.calls.lock().await.clone()
    }

    /// Calls concerning one branch, in order.
    pub async fn calls_for(&self, branch_id: i64) -> Vec<StatusCall> {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|call| match call {
                StatusCall::StartMirroring { branch_id: id }
                | StatusCall::MirrorComplete { branch_id: id, .. }
                | StatusCall::MirrorFailed { branch_id: id, .. } => *id == branch_id,
                _ => false,
            })
            .cloned()
            .collect()
    }

    async fn record(&self, call: StatusCall) -> Result<()> {
        let method = call.method();
        self.calls.lock().await.push(call);
        if self.failing_methods.contains(method) {
            return Err(StatusError::Rejected {
                call: method,
                message: "configured to fail".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl StatusClient for InMemoryStatusClient {
    fn client_type(&self) -> &'static str {
        "memory"
    }

    async fn branch_pull_queue(&self, branch_type: BranchType) -> Result<Vec<PullQueueEntry>> {
        self.record(StatusCall::BranchPullQueue { branch_type })
            .await?;
        Ok(self
            .queues
            .lock()
            .await
            .get(&branch_type)
            .cloned()
            .unwrap_or_default())
    }

    async fn start_mirroring(&self, branch_id: i64) -> Result<()> {
        self.record(StatusCall::StartMirroring { branch_id }).await
    }

    async fn mirror_complete(&self, branch_id: i64, revision_id: &str) -> Result<()> {
        self.record(StatusCall::MirrorComplete {
            branch_id,
            revision_id: revision_id.to_string(),
        })
        .await
    }

    async fn mirror_failed(&self, branch_id: i64, reason: &str) -> Result<()> {
        self.record(StatusCall::MirrorFailed {
            branch_id,
            reason: reason.to_string(),
        })
        .await
    }

    async fn record_run_statistics(&self, stats: &RunStatistics) -> Result<()> {
        self.record(StatusCall::RecordRunStatistics(stats.clone()))
            .await
    }
}
