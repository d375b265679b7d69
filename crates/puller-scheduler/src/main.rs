// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Puller Scheduler - mirrors every queued branch of one type
//!
//! Usage: `puller-scheduler <hosted|mirrored|imported>`

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use puller_scheduler::config::Config;
use puller_scheduler::diagnostics::FileDiagnosticSink;
use puller_scheduler::status::{FileStatusClient, StatusClient};
use puller_scheduler::{BranchType, SchedulerBuilder};

fn usage() -> ExitCode {
    eprintln!("Usage: puller-scheduler <hosted|mirrored|imported>");
    ExitCode::from(2)
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "puller_scheduler=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let args: Vec<String> = std::env::args().skip(1).collect();
    let branch_type = match args.as_slice() {
        [arg] => match arg.parse::<BranchType>() {
            Ok(branch_type) => branch_type,
            Err(e) => {
                eprintln!("{}", e);
                return Ok(usage());
            }
        },
        _ => return Ok(usage()),
    };

    let config = Config::from_env()?;
    let queue_file = config
        .queue_file
        .clone()
        .context("PULLER_QUEUE_FILE must be set")?;

    let status = Arc::new(FileStatusClient::new(queue_file, &config.outcome_log));
    info!(
        branch_type = %branch_type,
        client = status.client_type(),
        worker = %config.worker_binary.display(),
        max_workers = ?config.max_workers,
        "Starting puller scheduler"
    );

    let mut scheduler = SchedulerBuilder::from_config(&config)
        .branch_type(branch_type)
        .status_client(status)
        .diagnostic_sink(Arc::new(FileDiagnosticSink::new(&config.diagnostic_dir)))
        .build()?;

    let summary = scheduler.run_locked().await?;

    info!(
        total = summary.total,
        succeeded = summary.succeeded,
        failed = summary.failed,
        errored = summary.errored,
        statistics_recorded = summary.statistics_recorded,
        "Done"
    );

    Ok(ExitCode::SUCCESS)
}
