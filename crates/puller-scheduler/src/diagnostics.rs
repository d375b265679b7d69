// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Recording of unexpected job errors.
//!
//! When a job fails in a way the worker did not report itself (timeouts,
//! protocol violations, crashes, status service failures) a
//! [`DiagnosticReport`] is handed to a [`DiagnosticSink`], which returns an
//! identifier that is logged for correlation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::branch::BranchType;

/// Errors from diagnostic sinks.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Everything needed to investigate an unexpected job failure later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticReport {
    pub branch_id: i64,
    pub source_url: String,
    pub destination_url: String,
    pub unique_name: String,
    pub branch_type: BranchType,
    /// Short explanation of what went wrong
    pub error: String,
    /// Most informative detail available: worker stderr for crashed
    /// workers, otherwise the error explanation
    pub traceback: String,
    pub recorded_at: DateTime<Utc>,
}

/// Destination of diagnostic reports.
#[async_trait]
pub trait DiagnosticSink: Send + Sync {
    /// Persist a report and return its diagnostic id.
    async fn record(&self, report: &DiagnosticReport) -> Result<String, SinkError>;
}

/// Writes each report as `<dir>/<id>.json`.
#[derive(Debug, Clone)]
pub struct FileDiagnosticSink {
    dir: PathBuf,
}

impl FileDiagnosticSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl DiagnosticSink for FileDiagnosticSink {
    async fn record(&self, report: &DiagnosticReport) -> Result<String, SinkError> {
        let id = format!("OOPS-{}", Uuid::new_v4().simple());
        tokio::fs::create_dir_all(&self.dir).await?;
        let body = serde_json::to_vec_pretty(report)?;
        tokio::fs::write(self.dir.join(format!("{}.json", id)), body).await?;
        Ok(id)
    }
}

/// Keeps reports in memory; ids are `OOPS-MEM<n>`.
#[derive(Debug, Default)]
pub struct InMemoryDiagnosticSink {
    reports: Mutex<Vec<(String, DiagnosticReport)>>,
    next_id: AtomicU64,
}

impl InMemoryDiagnosticSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded reports with their ids, in order.
    pub async fn reports(&self) -> Vec<(String, DiagnosticReport)> {
        self.reports.lock().await.clone()
    }
}

#[async_trait]
impl DiagnosticSink for InMemoryDiagnosticSink {
    async fn record(&self, report: &DiagnosticReport) -> Result<String, SinkError> {
        let id = format!("OOPS-MEM{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.reports.lock().await.push((id.clone(), report.clone()));
        Ok(id)
    }
}
