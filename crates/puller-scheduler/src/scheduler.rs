// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bounded-concurrency scheduler for one branch type.
//!
//! A run holds the per-type [`RunLock`], fetches the pull queue, admits one
//! [`MirrorJob`] per entry through a FIFO semaphore with `max_workers`
//! permits, waits for all of them and finally records run statistics.
//!
//! # Example
//!
//! ```ignore
//! use puller_scheduler::{BranchType, PullerScheduler};
//!
//! let mut scheduler = PullerScheduler::builder()
//!     .branch_type(BranchType::Mirrored)
//!     .max_workers(4)
//!     .worker_binary("/usr/lib/puller/mirror-worker")
//!     .status_client(status)
//!     .diagnostic_sink(sink)
//!     .build()?;
//!
//! let summary = scheduler.run_locked().await?;
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::branch::{BranchToMirror, BranchType, DestinationTemplate, PullQueueEntry};
use crate::config::Config;
use crate::diagnostics::DiagnosticSink;
use crate::job::MirrorJob;
use crate::lock::{LockError, RunLock, lock_name};
use crate::pool::DiagnosticTokenPool;
use crate::status::{RunStatistics, StatusClient, StatusError};
use crate::supervisor::{JobOutcome, JobSupervisor, SupervisorConfig};

/// Run-level failures.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The run lock could not be acquired.
    #[error("cannot acquire run lock: {0}")]
    Lock(#[from] LockError),

    /// `run()` was called without holding the run lock.
    #[error("run lock {0} is not held")]
    LockNotHeld(String),

    /// No usable concurrency limit was configured.
    #[error("max_workers must be configured and greater than zero")]
    MissingMaxWorkers,

    /// The pull queue could not be fetched.
    #[error("cannot fetch pull queue: {0}")]
    Status(#[from] StatusError),

    /// A required builder component was not provided.
    #[error("missing required component: {0}")]
    MissingComponent(&'static str),
}

/// Counts of job outcomes for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Jobs in the pull queue
    pub total: usize,
    pub succeeded: usize,
    /// Failures reported by workers (or synthesized for silent clean exits)
    pub failed: usize,
    /// Timeouts, crashes and jobs that could not run
    pub errored: usize,
    pub statistics: RunStatistics,
    /// Whether the status service accepted the statistics
    pub statistics_recorded: bool,
}

/// Scheduler for the branches of one [`BranchType`].
pub struct PullerScheduler {
    branch_type: BranchType,
    max_workers: Option<usize>,
    worker_binary: PathBuf,
    destination: DestinationTemplate,
    supervisor: JobSupervisor,
    status: Arc<dyn StatusClient>,
    diagnostics: Arc<dyn DiagnosticSink>,
    tokens: Option<Arc<DiagnosticTokenPool>>,
    lock_dir: PathBuf,
    lock_name: String,
    lock: Option<RunLock>,
}

impl PullerScheduler {
    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder::new()
    }

    pub fn branch_type(&self) -> BranchType {
        self.branch_type
    }

    /// Name of the lock guarding runs of this branch type.
    pub fn lock_name(&self) -> &str {
        &self.lock_name
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_some()
    }

    /// Diagnostic token pool, absent when no concurrency limit is set.
    pub fn token_pool(&self) -> Option<&Arc<DiagnosticTokenPool>> {
        self.tokens.as_ref()
    }

    /// Acquire the run lock without waiting.
    pub fn lock(&mut self) -> Result<(), SchedulerError> {
        let lock = RunLock::acquire(&self.lock_dir, &self.lock_name)?;
        self.lock = Some(lock);
        Ok(())
    }

    /// Release the run lock if held.
    pub fn unlock(&mut self) {
        if let Some(lock) = self.lock.take() {
            lock.release();
        }
    }

    /// Lock, run and unlock, releasing the lock on failure too.
    pub async fn run_locked(&mut self) -> Result<RunSummary, SchedulerError> {
        self.lock()?;
        let result = self.run().await;
        self.unlock();
        result
    }

    /// Mirror every queued branch, at most `max_workers` at a time.
    pub async fn run(&self) -> Result<RunSummary, SchedulerError> {
        if self.lock.is_none() {
            return Err(SchedulerError::LockNotHeld(self.lock_name.clone()));
        }
        let (max_workers, tokens) = match (self.max_workers, &self.tokens) {
            (Some(max_workers), Some(tokens)) if max_workers > 0 => {
                (max_workers, Arc::clone(tokens))
            }
            _ => return Err(SchedulerError::MissingMaxWorkers),
        };

        let started_at = Utc::now();
        let queue = self.status.branch_pull_queue(self.branch_type).await?;
        let total = queue.len();
        info!(
            branch_type = %self.branch_type,
            jobs = total,
            max_workers,
            "Starting puller run"
        );

        let gate = Arc::new(Semaphore::new(max_workers));
        let mut jobs = JoinSet::new();
        for entry in queue {
            let job = self.job_for(entry, &tokens);
            // The gate is never closed, so acquisition only waits for a slot.
            let Ok(permit) = Arc::clone(&gate).acquire_owned().await else {
                break;
            };
            jobs.spawn(async move {
                let _permit = permit;
                let branch_id = job.branch().branch_id;
                (branch_id, job.run().await)
            });
        }

        let (mut succeeded, mut failed, mut errored) = (0, 0, 0);
        while let Some(joined) = jobs.join_next().await {
            match joined {
                Ok((_, Ok(JobOutcome::Succeeded { .. }))) => succeeded += 1,
                Ok((_, Ok(JobOutcome::Failed { .. }))) => failed += 1,
                Ok((_, Ok(_))) => errored += 1,
                Ok((branch_id, Err(e))) => {
                    warn!(branch_id, error = %e, "Mirror job could not run");
                    errored += 1;
                }
                Err(e) => {
                    error!(error = %e, "Mirror job task panicked");
                    errored += 1;
                }
            }
        }

        let statistics = RunStatistics {
            run_name: format!("branch-puller-{}", self.branch_type.slug()),
            hostname: hostname(),
            started_at,
            completed_at: Utc::now(),
        };
        let statistics_recorded = match self.status.record_run_statistics(&statistics).await {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "Failed to record run statistics");
                false
            }
        };

        info!(
            branch_type = %self.branch_type,
            total,
            succeeded,
            failed,
            errored,
            "Puller run finished"
        );

        Ok(RunSummary {
            total,
            succeeded,
            failed,
            errored,
            statistics,
            statistics_recorded,
        })
    }

    fn job_for(&self, entry: PullQueueEntry, tokens: &Arc<DiagnosticTokenPool>) -> MirrorJob {
        let branch = BranchToMirror {
            branch_id: entry.branch_id,
            destination_url: self.destination.render(entry.branch_id),
            source_url: entry.source_url,
            unique_name: entry.unique_name,
            branch_type: self.branch_type,
        };
        MirrorJob::new(
            branch,
            self.worker_binary.clone(),
            self.supervisor.clone(),
            Arc::clone(&self.status),
            Arc::clone(&self.diagnostics),
            Arc::clone(tokens),
        )
    }
}

impl Drop for PullerScheduler {
    fn drop(&mut self) {
        self.unlock();
    }
}

fn hostname() -> String {
    nix::unistd::gethostname()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "localhost".to_string())
}

/// Builder for [`PullerScheduler`].
pub struct SchedulerBuilder {
    branch_type: Option<BranchType>,
    max_workers: Option<usize>,
    token_pool_size: Option<usize>,
    worker_binary: Option<PathBuf>,
    destination: DestinationTemplate,
    supervisor: SupervisorConfig,
    status: Option<Arc<dyn StatusClient>>,
    diagnostics: Option<Arc<dyn DiagnosticSink>>,
    diagnostic_prefix: String,
    lock_dir: PathBuf,
    lock_prefix: String,
}

impl Default for SchedulerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerBuilder {
    pub fn new() -> Self {
        Self {
            branch_type: None,
            max_workers: None,
            token_pool_size: None,
            worker_binary: None,
            destination: DestinationTemplate::default(),
            supervisor: SupervisorConfig::default(),
            status: None,
            diagnostics: None,
            diagnostic_prefix: "puller".to_string(),
            lock_dir: PathBuf::from(".data/locks"),
            lock_prefix: "branch-puller".to_string(),
        }
    }

    /// Start from loaded configuration; clients still have to be set.
    pub fn from_config(config: &Config) -> Self {
        Self {
            branch_type: None,
            max_workers: config.max_workers,
            token_pool_size: config.diagnostic_pool_size,
            worker_binary: Some(config.worker_binary.clone()),
            destination: config.destination_template.clone(),
            supervisor: SupervisorConfig {
                inactivity_timeout: config.worker_timeout,
                kill_grace: config.kill_grace,
            },
            status: None,
            diagnostics: None,
            diagnostic_prefix: config.diagnostic_prefix.clone(),
            lock_dir: config.lock_dir.clone(),
            lock_prefix: config.lock_prefix.clone(),
        }
    }

    pub fn branch_type(mut self, branch_type: BranchType) -> Self {
        self.branch_type = Some(branch_type);
        self
    }

    pub fn max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = Some(max_workers);
        self
    }

    /// Override the diagnostic token pool size (defaults to `max_workers`).
    pub fn token_pool_size(mut self, size: usize) -> Self {
        self.token_pool_size = Some(size);
        self
    }

    pub fn worker_binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.worker_binary = Some(path.into());
        self
    }

    pub fn destination_template(mut self, template: DestinationTemplate) -> Self {
        self.destination = template;
        self
    }

    pub fn worker_timeout(mut self, timeout: Duration) -> Self {
        self.supervisor.inactivity_timeout = timeout;
        self
    }

    pub fn kill_grace(mut self, grace: Duration) -> Self {
        self.supervisor.kill_grace = grace;
        self
    }

    pub fn status_client(mut self, client: Arc<dyn StatusClient>) -> Self {
        self.status = Some(client);
        self
    }

    pub fn diagnostic_sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.diagnostics = Some(sink);
        self
    }

    pub fn diagnostic_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.diagnostic_prefix = prefix.into();
        self
    }

    pub fn lock_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.lock_dir = dir.into();
        self
    }

    pub fn lock_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.lock_prefix = prefix.into();
        self
    }

    /// Build the scheduler.
    ///
    /// A missing `max_workers` is accepted here and reported by `run()`.
    pub fn build(self) -> Result<PullerScheduler, SchedulerError> {
        let branch_type = self
            .branch_type
            .ok_or(SchedulerError::MissingComponent("branch_type"))?;
        let worker_binary = self
            .worker_binary
            .ok_or(SchedulerError::MissingComponent("worker_binary"))?;
        let status = self
            .status
            .ok_or(SchedulerError::MissingComponent("status_client"))?;
        let diagnostics = self
            .diagnostics
            .ok_or(SchedulerError::MissingComponent("diagnostic_sink"))?;

        let tokens = self.max_workers.filter(|n| *n > 0).map(|max_workers| {
            let size = self.token_pool_size.unwrap_or(max_workers);
            Arc::new(DiagnosticTokenPool::new(&self.diagnostic_prefix, size))
        });

        Ok(PullerScheduler {
            branch_type,
            max_workers: self.max_workers,
            worker_binary,
            destination: self.destination,
            supervisor: JobSupervisor::new(self.supervisor),
            status,
            diagnostics,
            tokens,
            lock_dir: self.lock_dir,
            lock_name: lock_name(&self.lock_prefix, branch_type),
            lock: None,
        })
    }
}
