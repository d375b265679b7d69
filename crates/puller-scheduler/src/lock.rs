// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Advisory run lock preventing two schedulers from pulling the same
//! branch type at once.
//!
//! The lock is an exclusive, non-blocking `flock` on
//! `<lock_dir>/<name>.lock`. It is released when the [`RunLock`] is dropped
//! or the process dies, so a crashed scheduler never leaves a stale lock.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use thiserror::Error;
use tracing::{debug, info};

/// Lock acquisition errors.
#[derive(Debug, Error)]
pub enum LockError {
    /// Another process holds the lock.
    #[error("lock {name} is already held ({errno})")]
    Held { name: String, errno: Errno },

    /// The lock file could not be created or opened.
    #[error("cannot open lock file for {name}: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

impl LockError {
    /// Name of the lock that could not be acquired.
    pub fn name(&self) -> &str {
        match self {
            LockError::Held { name, .. } | LockError::Io { name, .. } => name,
        }
    }
}

/// Build the lock name for a run: `<prefix>-<branch type>`.
pub fn lock_name(prefix: &str, branch_type: crate::branch::BranchType) -> String {
    format!("{}-{}", prefix, branch_type.slug())
}

/// A held advisory lock.
#[derive(Debug)]
pub struct RunLock {
    name: String,
    path: PathBuf,
    _file: Flock<File>,
}

impl RunLock {
    /// Acquire the named lock or fail immediately.
    pub fn acquire(lock_dir: &Path, name: &str) -> Result<Self, LockError> {
        let io_err = |source| LockError::Io {
            name: name.to_string(),
            source,
        };

        std::fs::create_dir_all(lock_dir).map_err(io_err)?;
        let path = lock_dir.join(format!("{}.lock", name));
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(io_err)?;

        let mut locked = Flock::lock(file, FlockArg::LockExclusiveNonblock).map_err(
            |(_, errno)| LockError::Held {
                name: name.to_string(),
                errno,
            },
        )?;

        // Record the holder for operators; the flock itself is what counts.
        locked.set_len(0).map_err(io_err)?;
        writeln!(*locked, "{}", std::process::id()).map_err(io_err)?;

        info!(lock = %name, path = %path.display(), "Acquired run lock");
        Ok(Self {
            name: name.to_string(),
            path,
            _file: locked,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the lock.
    pub fn release(self) {
        debug!(lock = %self.name, "Releasing run lock");
    }
}
