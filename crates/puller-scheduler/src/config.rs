// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for the puller scheduler.

use std::path::PathBuf;
use std::time::Duration;

use crate::branch::DestinationTemplate;
use crate::supervisor::DEFAULT_KILL_GRACE;

/// Default inactivity timeout for a worker (5 minutes).
pub const DEFAULT_WORKER_TIMEOUT: Duration = Duration::from_secs(300);

/// Scheduler configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum number of concurrently running workers. Required to run.
    pub max_workers: Option<usize>,
    /// How long a worker may stay silent before it is interrupted
    pub worker_timeout: Duration,
    /// Delay between SIGINT and SIGKILL for a worker being terminated
    pub kill_grace: Duration,
    /// Worker executable spawned once per branch
    pub worker_binary: PathBuf,
    /// Destination location template (see [`DestinationTemplate`])
    pub destination_template: DestinationTemplate,
    /// Prefix of the diagnostic tokens lent to workers
    pub diagnostic_prefix: String,
    /// Diagnostic token pool size; defaults to `max_workers`
    pub diagnostic_pool_size: Option<usize>,
    /// Directory holding run lock files
    pub lock_dir: PathBuf,
    /// Prefix of run lock names
    pub lock_prefix: String,
    /// JSON file holding the pull queue (file status backend)
    pub queue_file: Option<PathBuf>,
    /// JSON-lines file receiving status calls (file status backend)
    pub outcome_log: PathBuf,
    /// Directory receiving diagnostic reports
    pub diagnostic_dir: PathBuf,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let count = |key: &'static str| -> Result<Option<usize>, ConfigError> {
            lookup(key)
                .map(|v| {
                    v.trim()
                        .parse::<usize>()
                        .map_err(|_| ConfigError::InvalidNumber(key))
                })
                .transpose()
        };
        let max_workers = count("PULLER_MAX_WORKERS")?;
        let diagnostic_pool_size = count("PULLER_DIAGNOSTIC_POOL_SIZE")?;

        let secs = |key: &'static str, default: Duration| -> Result<Duration, ConfigError> {
            match lookup(key) {
                Some(v) => v
                    .trim()
                    .parse::<u64>()
                    .map(Duration::from_secs)
                    .map_err(|_| ConfigError::InvalidNumber(key)),
                None => Ok(default),
            }
        };
        let worker_timeout = secs("PULLER_WORKER_TIMEOUT_SECS", DEFAULT_WORKER_TIMEOUT)?;
        let kill_grace = secs("PULLER_KILL_GRACE_SECS", DEFAULT_KILL_GRACE)?;

        let worker_binary = lookup("PULLER_WORKER_BINARY")
            .map(PathBuf::from)
            .ok_or(ConfigError::MissingEnvVar("PULLER_WORKER_BINARY"))?;

        let destination_template = lookup("PULLER_DESTINATION_TEMPLATE")
            .map(DestinationTemplate::new)
            .unwrap_or_default();

        Ok(Self {
            max_workers,
            worker_timeout,
            kill_grace,
            worker_binary,
            destination_template,
            diagnostic_prefix: lookup("PULLER_DIAGNOSTIC_PREFIX")
                .unwrap_or_else(|| "puller".to_string()),
            diagnostic_pool_size,
            lock_dir: PathBuf::from(
                lookup("PULLER_LOCK_DIR").unwrap_or_else(|| ".data/locks".to_string()),
            ),
            lock_prefix: lookup("PULLER_LOCK_PREFIX")
                .unwrap_or_else(|| "branch-puller".to_string()),
            queue_file: lookup("PULLER_QUEUE_FILE").map(PathBuf::from),
            outcome_log: PathBuf::from(
                lookup("PULLER_OUTCOME_LOG").unwrap_or_else(|| ".data/outcomes.jsonl".to_string()),
            ),
            diagnostic_dir: PathBuf::from(
                lookup("PULLER_DIAGNOSTIC_DIR").unwrap_or_else(|| ".data/diagnostics".to_string()),
            ),
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),
    /// A numeric variable does not parse.
    #[error("Invalid number in environment variable: {0}")]
    InvalidNumber(&'static str),
}
