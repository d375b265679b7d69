// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Worker side of the protocol: writes commands to the scheduler.

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::command::WorkerCommand;

/// Writes worker commands to an async sink, normally the process stdout.
///
/// Every command is flushed as soon as it is written so the scheduler's
/// inactivity timer sees it without buffering delays.
pub struct WorkerReporter<W> {
    writer: W,
}

impl<W> WorkerReporter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl WorkerReporter<tokio::io::Stdout> {
    /// Reporter writing to this process's standard output.
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

impl<W: AsyncWrite + Unpin> WorkerReporter<W> {
    /// Write and flush one command.
    pub async fn send(&mut self, command: &WorkerCommand) -> std::io::Result<()> {
        self.writer.write_all(&command.encode()).await?;
        self.writer.flush().await
    }

    pub async fn start_mirroring(&mut self) -> std::io::Result<()> {
        self.send(&WorkerCommand::StartMirroring).await
    }

    pub async fn progress_made(&mut self) -> std::io::Result<()> {
        self.send(&WorkerCommand::ProgressMade).await
    }

    pub async fn mirror_succeeded(&mut self, revision_id: &str) -> std::io::Result<()> {
        self.send(&WorkerCommand::MirrorSucceeded {
            revision_id: revision_id.to_string(),
        })
        .await
    }

    pub async fn mirror_failed(&mut self, reason: &str, diagnostic_id: &str) -> std::io::Result<()> {
        self.send(&WorkerCommand::MirrorFailed {
            reason: reason.to_string(),
            diagnostic_id: diagnostic_id.to_string(),
        })
        .await
    }
}
