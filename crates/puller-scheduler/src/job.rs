// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! One branch mirror job.
//!
//! A [`MirrorJob`] borrows a diagnostic token, runs the worker under a
//! [`JobSupervisor`] and forwards the worker's lifecycle to the status
//! service. Anything the worker could not report itself is recorded
//! through the [`DiagnosticSink`].

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{error, info, warn};

use crate::branch::BranchToMirror;
use crate::diagnostics::{DiagnosticReport, DiagnosticSink};
use crate::error::Result;
use crate::pool::DiagnosticTokenPool;
use crate::status::StatusClient;
use crate::supervisor::{
    JobOutcome, JobSupervisor, SupervisedExit, WorkerCommandLine, WorkerListener,
};

/// Environment variable carrying the branch token to the worker.
pub const BRANCH_TOKEN_ENV: &str = "PULLER_BRANCH_TOKEN";

/// Mirrors one branch by running a worker process.
pub struct MirrorJob {
    branch: BranchToMirror,
    worker_binary: PathBuf,
    supervisor: JobSupervisor,
    status: Arc<dyn StatusClient>,
    diagnostics: Arc<dyn DiagnosticSink>,
    tokens: Arc<DiagnosticTokenPool>,
}

impl MirrorJob {
    pub fn new(
        branch: BranchToMirror,
        worker_binary: PathBuf,
        supervisor: JobSupervisor,
        status: Arc<dyn StatusClient>,
        diagnostics: Arc<dyn DiagnosticSink>,
        tokens: Arc<DiagnosticTokenPool>,
    ) -> Self {
        Self {
            branch,
            worker_binary,
            supervisor,
            status,
            diagnostics,
            tokens,
        }
    }

    pub fn branch(&self) -> &BranchToMirror {
        &self.branch
    }

    /// Worker invocation for this branch using diagnostic `token`.
    pub fn command_line(&self, token: &str) -> WorkerCommandLine {
        let branch = &self.branch;
        WorkerCommandLine {
            program: self.worker_binary.clone(),
            args: vec![
                branch.source_url.clone(),
                branch.destination_url.clone(),
                branch.branch_id.to_string(),
                branch.unique_name.clone(),
                branch.branch_type.as_str().to_string(),
                token.to_string(),
            ],
            env: [(
                BRANCH_TOKEN_ENV.to_string(),
                format!("branch-{}", branch.branch_id),
            )]
            .into_iter()
            .collect(),
        }
    }

    /// Run the job to completion.
    ///
    /// Returns an error only when no worker could be run at all (token pool
    /// exhausted, spawn failure); those are reported as unexpected errors
    /// first.
    pub async fn run(&self) -> Result<JobOutcome> {
        let branch_id = self.branch.branch_id;
        info!(
            branch_id,
            source = %self.branch.source_url,
            destination = %self.branch.destination_url,
            "Mirroring branch"
        );

        let lease = match self.tokens.lease() {
            Ok(lease) => lease,
            Err(e) => {
                self.report_unexpected_error(&e.to_string(), None).await;
                return Err(e.into());
            }
        };

        let command = self.command_line(lease.token());
        let supervised = self.supervisor.run(&command, self).await;
        drop(lease);

        let exit = match supervised {
            Ok(exit) => exit,
            Err(e) => {
                self.report_unexpected_error(&e.to_string(), None).await;
                return Err(e.into());
            }
        };

        match &exit.outcome {
            JobOutcome::Succeeded { revision_id } => {
                info!(branch_id, revision_id = %revision_id, "Branch mirrored");
            }
            JobOutcome::Failed {
                reason,
                diagnostic_id,
            } => {
                info!(branch_id, reason = %reason, diagnostic_id = %diagnostic_id, "Branch mirror failed");
            }
            JobOutcome::TimedOut => {
                let explanation = exit
                    .termination
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "worker timed out".to_string());
                self.report_unexpected_error(&explanation, Some(&exit)).await;
            }
            JobOutcome::ProcessError(details) => {
                self.report_unexpected_error(details, Some(&exit)).await;
            }
        }

        Ok(exit.outcome)
    }

    /// Record an unexpected failure and return its diagnostic id.
    ///
    /// Stderr of a worker killed by a signal is usually the best clue, so
    /// it becomes the traceback when there is any.
    pub async fn report_unexpected_error(
        &self,
        error: &str,
        exit: Option<&SupervisedExit>,
    ) -> Option<String> {
        let branch = &self.branch;
        let traceback = match exit {
            Some(exit) if exit.exit.is_signal() && !exit.stderr.trim().is_empty() => {
                exit.stderr.clone()
            }
            _ => error.to_string(),
        };
        let report = DiagnosticReport {
            branch_id: branch.branch_id,
            source_url: branch.source_url.clone(),
            destination_url: branch.destination_url.clone(),
            unique_name: branch.unique_name.clone(),
            branch_type: branch.branch_type,
            error: error.to_string(),
            traceback,
            recorded_at: Utc::now(),
        };

        match self.diagnostics.record(&report).await {
            Ok(diagnostic_id) => {
                error!(
                    branch_id = branch.branch_id,
                    diagnostic_id = %diagnostic_id,
                    error = %error,
                    "Unexpected error while mirroring branch"
                );
                Some(diagnostic_id)
            }
            Err(e) => {
                error!(
                    branch_id = branch.branch_id,
                    error = %error,
                    sink_error = %e,
                    "Unexpected error while mirroring branch (diagnostic report lost)"
                );
                None
            }
        }
    }
}

#[async_trait]
impl WorkerListener for MirrorJob {
    async fn started(&self) -> Result<()> {
        info!(branch_id = self.branch.branch_id, "Worker started mirroring");
        self.status.start_mirroring(self.branch.branch_id).await?;
        Ok(())
    }

    async fn succeeded(&self, revision_id: &str) -> Result<()> {
        self.status
            .mirror_complete(self.branch.branch_id, revision_id)
            .await?;
        Ok(())
    }

    async fn failed(&self, reason: &str, diagnostic_id: &str) -> Result<()> {
        if !diagnostic_id.is_empty() {
            warn!(
                branch_id = self.branch.branch_id,
                diagnostic_id = %diagnostic_id,
                "Worker recorded a diagnostic report"
            );
        }
        self.status
            .mirror_failed(self.branch.branch_id, reason)
            .await?;
        Ok(())
    }
}
