// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! File-backed status client used by the standalone binary.
//!
//! The pull queue is read from a JSON document keyed by branch type:
//!
//! ```json
//! {
//!   "mirrored": [
//!     {"branch_id": 42, "source_url": "http://example.com/trunk", "unique_name": "~joe/proj/trunk"}
//!   ]
//! }
//! ```
//!
//! Every reporting call is appended to an outcome log as one JSON line.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use super::traits::*;
use crate::branch::{BranchType, PullQueueEntry};

#[derive(Serialize)]
struct LogLine<'a> {
    at: DateTime<Utc>,
    #[serde(flatten)]
    call: &'a StatusCall,
}

/// Status client reading the queue from a file and logging calls to another.
#[derive(Debug)]
pub struct FileStatusClient {
    queue_file: PathBuf,
    outcome_log: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStatusClient {
    pub fn new(queue_file: impl Into<PathBuf>, outcome_log: impl Into<PathBuf>) -> Self {
        Self {
            queue_file: queue_file.into(),
            outcome_log: outcome_log.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn outcome_log(&self) -> &Path {
        &self.outcome_log
    }

    async fn append(&self, call: StatusCall) -> Result<()> {
        let mut line = serde_json::to_vec(&LogLine {
            at: Utc::now(),
            call: &call,
        })?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.outcome_log.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.outcome_log)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        debug!(call = call.method(), "Appended status call to outcome log");
        Ok(())
    }
}

#[async_trait]
impl StatusClient for FileStatusClient {
    fn client_type(&self) -> &'static str {
        "file"
    }

    async fn branch_pull_queue(&self, branch_type: BranchType) -> Result<Vec<PullQueueEntry>> {
        let raw = tokio::fs::read(&self.queue_file).await.map_err(|e| {
            StatusError::Unavailable(format!(
                "cannot read pull queue {}: {}",
                self.queue_file.display(),
                e
            ))
        })?;
        let mut queues: HashMap<BranchType, Vec<PullQueueEntry>> = serde_json::from_slice(&raw)?;
        Ok(queues.remove(&branch_type).unwrap_or_default())
    }

    async fn start_mirroring(&self, branch_id: i64) -> Result<()> {
        self.append(StatusCall::StartMirroring { branch_id }).await
    }

    async fn mirror_complete(&self, branch_id: i64, revision_id: &str) -> Result<()> {
        self.append(StatusCall::MirrorComplete {
            branch_id,
            revision_id: revision_id.to_string(),
        })
        .await
    }

    async fn mirror_failed(&self, branch_id: i64, reason: &str) -> Result<()> {
        self.append(StatusCall::MirrorFailed {
            branch_id,
            reason: reason.to_string(),
        })
        .await
    }

    async fn record_run_statistics(&self, stats: &RunStatistics) -> Result<()> {
        self.append(StatusCall::RecordRunStatistics(stats.clone()))
            .await
    }
}
