// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Puller Protocol - scheduler <-> worker wire format
//!
//! Worker processes report their progress to the puller scheduler on their
//! standard output. This crate provides both ends of that conversation.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     puller-protocol                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Commands: startMirroring / mirrorSucceeded / mirrorFailed  │
//! │            / progressMade  (CommandParser, WorkerReporter)  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Framing: netstrings  <len>:<bytes>,  (FrameDecoder)        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Transport: worker stdout pipe                              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ## Scheduler side
//!
//! ```
//! use puller_protocol::{CommandDecoder, WorkerCommand};
//!
//! let mut decoder = CommandDecoder::new();
//! let commands = decoder.feed(b"14:startMirroring,1:0,").unwrap();
//! assert_eq!(commands, vec![WorkerCommand::StartMirroring]);
//! ```
//!
//! ## Worker side
//!
//! ```ignore
//! use puller_protocol::WorkerReporter;
//!
//! let mut reporter = WorkerReporter::stdout();
//! reporter.start_mirroring().await?;
//! reporter.progress_made().await?;
//! reporter.mirror_succeeded("revision-id").await?;
//! ```

pub mod command;
pub mod frame;
pub mod reporter;

pub use command::{CommandDecoder, CommandName, CommandParser, ProtocolError, WorkerCommand};
pub use frame::{FrameDecoder, FrameError, MAX_FRAME_SIZE, encode_frame};
pub use reporter::WorkerReporter;
