// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for the puller scheduler.

use thiserror::Error;

/// Errors raised while running a mirror job.
#[derive(Debug, Error)]
pub enum Error {
    /// Status service error
    #[error("Status service error: {0}")]
    Status(#[from] crate::status::StatusError),

    /// Diagnostic token pool error
    #[error("Token pool error: {0}")]
    Pool(#[from] crate::pool::PoolError),

    /// Worker supervision error
    #[error("Supervisor error: {0}")]
    Supervisor(#[from] crate::supervisor::SupervisorError),
}

/// Result type for job operations.
pub type Result<T> = std::result::Result<T, Error>;
