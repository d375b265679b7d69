// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for puller-scheduler tests.
//!
//! Workers are `/bin/sh` scripts that print pre-encoded protocol commands.

#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use puller_protocol::WorkerCommand;
use puller_scheduler::branch::PullQueueEntry;
use puller_scheduler::error::{Error, Result};
use puller_scheduler::status::StatusError;
use puller_scheduler::supervisor::{WorkerCommandLine, WorkerListener};

/// Shell snippet printing `command` in wire format.
pub fn emit(command: &WorkerCommand) -> String {
    let encoded = command.encode();
    let text = std::str::from_utf8(&encoded).expect("test commands are UTF-8");
    assert!(!text.contains('\''), "test commands must not contain quotes");
    format!("printf '%s' '{}'", text)
}

pub fn start() -> String {
    emit(&WorkerCommand::StartMirroring)
}

pub fn progress() -> String {
    emit(&WorkerCommand::ProgressMade)
}

pub fn succeeded(revision_id: &str) -> String {
    emit(&WorkerCommand::MirrorSucceeded {
        revision_id: revision_id.to_string(),
    })
}

pub fn failed(reason: &str, diagnostic_id: &str) -> String {
    emit(&WorkerCommand::MirrorFailed {
        reason: reason.to_string(),
        diagnostic_id: diagnostic_id.to_string(),
    })
}

/// Worker command line running `script` with `/bin/sh -c`.
pub fn sh(script: &str) -> WorkerCommandLine {
    WorkerCommandLine {
        program: PathBuf::from("/bin/sh"),
        args: vec!["-c".to_string(), script.to_string()],
        ..Default::default()
    }
}

/// Write an executable worker script into `dir`.
pub fn write_worker(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("worker.sh");
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

pub fn entries(ids: impl IntoIterator<Item = i64>) -> Vec<PullQueueEntry> {
    ids.into_iter()
        .map(|id| PullQueueEntry {
            branch_id: id,
            source_url: format!("http://example.com/branch-{}", id),
            unique_name: format!("~owner/project/branch-{}", id),
        })
        .collect()
}

/// Listener event as observed by [`RecordingListener`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Started,
    Succeeded(String),
    Failed(String, String),
}

/// Listener recording events and the peak number of overlapping callbacks.
#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<Event>>,
    delay: Duration,
    fail_on_start: bool,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Each callback sleeps for `delay` before returning.
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// `started` fails.
    pub fn failing_start() -> Self {
        Self {
            fail_on_start: true,
            ..Self::default()
        }
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn observe(&self, event: Event) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.events.lock().unwrap().push(event);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl WorkerListener for RecordingListener {
    async fn started(&self) -> Result<()> {
        self.observe(Event::Started).await;
        if self.fail_on_start {
            return Err(Error::Status(StatusError::Unavailable(
                "status service down".to_string(),
            )));
        }
        Ok(())
    }

    async fn succeeded(&self, revision_id: &str) -> Result<()> {
        self.observe(Event::Succeeded(revision_id.to_string()))
            .await;
        Ok(())
    }

    async fn failed(&self, reason: &str, diagnostic_id: &str) -> Result<()> {
        self.observe(Event::Failed(reason.to_string(), diagnostic_id.to_string()))
            .await;
        Ok(())
    }
}

/// Worker body that holds a marker in `<dir>/alive` from spawn until exit.
///
/// On spawn it appends the number of live markers to `<dir>/alive.log`, so
/// the log's peak is the peak number of concurrently running workers.
pub fn tracked_worker(dir: &Path, seconds: &str) -> String {
    std::fs::create_dir_all(dir.join("alive")).unwrap();
    format!(
        r#"alive="{dir}/alive"
touch "$alive/$3"
ls "$alive" | wc -l >> "{dir}/alive.log"
{start}
sleep {seconds}
rev="rev-$3"
printf '%s' "15:mirrorSucceeded,1:1,${{#rev}}:$rev,"
rm "$alive/$3""#,
        dir = dir.display(),
        start = start(),
        seconds = seconds,
    )
}

/// Live-worker counts logged by [`tracked_worker`], one per spawn.
pub fn alive_counts(dir: &Path) -> Vec<usize> {
    std::fs::read_to_string(dir.join("alive.log"))
        .unwrap()
        .lines()
        .map(|line| line.trim().parse().unwrap())
        .collect()
}

/// Workers whose marker is still present.
pub fn still_alive(dir: &Path) -> usize {
    std::fs::read_dir(dir.join("alive")).unwrap().count()
}
