// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Worker command grammar layered on top of netstring frames.
//!
//! A command spans several frames:
//! 1. the command name
//! 2. the decimal argument count
//! 3. that many argument frames
//!
//! ```text
//!            known name          count == 0
//!   Idle ─────────────► AwaitingArgCount ─────────► Idle (dispatch)
//!    ▲                        │ count > 0
//!    │ last arg               ▼
//!    └──────────────── CollectingArgs
//!
//!   any bad frame ─► Broken (terminal)
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::frame::{FrameDecoder, FrameError, encode_frame};

/// Errors raised while interpreting the worker stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// The frame sequence does not form a valid command.
    #[error("bad message: {0}")]
    BadMessage(String),

    /// The underlying framing is invalid.
    #[error("framing error: {0}")]
    Frame(#[from] FrameError),

    /// An earlier error already broke the stream.
    #[error("protocol is broken by an earlier bad message")]
    Broken,
}

/// Names of the commands a worker may send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandName {
    StartMirroring,
    MirrorSucceeded,
    MirrorFailed,
    ProgressMade,
}

impl CommandName {
    /// Wire spelling of the command.
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandName::StartMirroring => "startMirroring",
            CommandName::MirrorSucceeded => "mirrorSucceeded",
            CommandName::MirrorFailed => "mirrorFailed",
            CommandName::ProgressMade => "progressMade",
        }
    }

    /// Number of argument frames the command carries.
    pub fn arity(&self) -> usize {
        match self {
            CommandName::StartMirroring | CommandName::ProgressMade => 0,
            CommandName::MirrorSucceeded => 1,
            CommandName::MirrorFailed => 2,
        }
    }
}

impl std::fmt::Display for CommandName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&[u8]> for CommandName {
    type Error = ProtocolError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        match value {
            b"startMirroring" => Ok(CommandName::StartMirroring),
            b"mirrorSucceeded" => Ok(CommandName::MirrorSucceeded),
            b"mirrorFailed" => Ok(CommandName::MirrorFailed),
            b"progressMade" => Ok(CommandName::ProgressMade),
            other => Err(ProtocolError::BadMessage(format!(
                "unknown command: {:?}",
                String::from_utf8_lossy(other)
            ))),
        }
    }
}

/// A fully assembled worker command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerCommand {
    /// The worker has begun mirroring.
    StartMirroring,
    /// Mirroring finished; carries the last revision id copied.
    MirrorSucceeded { revision_id: String },
    /// Mirroring failed with a reason and the worker's diagnostic id.
    MirrorFailed {
        reason: String,
        diagnostic_id: String,
    },
    /// Keep-alive; the worker is still making progress.
    ProgressMade,
}

impl WorkerCommand {
    pub fn name(&self) -> CommandName {
        match self {
            WorkerCommand::StartMirroring => CommandName::StartMirroring,
            WorkerCommand::MirrorSucceeded { .. } => CommandName::MirrorSucceeded,
            WorkerCommand::MirrorFailed { .. } => CommandName::MirrorFailed,
            WorkerCommand::ProgressMade => CommandName::ProgressMade,
        }
    }

    /// Encode the command as its name, count and argument frames.
    pub fn encode(&self) -> Bytes {
        let args: Vec<&[u8]> = match self {
            WorkerCommand::StartMirroring | WorkerCommand::ProgressMade => Vec::new(),
            WorkerCommand::MirrorSucceeded { revision_id } => vec![revision_id.as_bytes()],
            WorkerCommand::MirrorFailed {
                reason,
                diagnostic_id,
            } => vec![reason.as_bytes(), diagnostic_id.as_bytes()],
        };

        let mut buf = BytesMut::new();
        buf.put(encode_frame(self.name().as_str().as_bytes()));
        buf.put(encode_frame(args.len().to_string().as_bytes()));
        for arg in args {
            buf.put(encode_frame(arg));
        }
        buf.freeze()
    }

    fn assemble(name: CommandName, args: Vec<Bytes>) -> Self {
        let text = |idx: usize| {
            args.get(idx)
                .map(|arg| String::from_utf8_lossy(arg).into_owned())
                .unwrap_or_default()
        };
        match name {
            CommandName::StartMirroring => WorkerCommand::StartMirroring,
            CommandName::ProgressMade => WorkerCommand::ProgressMade,
            CommandName::MirrorSucceeded => WorkerCommand::MirrorSucceeded {
                revision_id: text(0),
            },
            CommandName::MirrorFailed => WorkerCommand::MirrorFailed {
                reason: text(0),
                diagnostic_id: text(1),
            },
        }
    }
}

#[derive(Debug)]
enum ParserState {
    Idle,
    AwaitingArgCount(CommandName),
    CollectingArgs {
        command: CommandName,
        expected: usize,
        args: Vec<Bytes>,
    },
    Broken,
}

/// State machine assembling frames into [`WorkerCommand`]s.
#[derive(Debug)]
pub struct CommandParser {
    state: ParserState,
}

impl Default for CommandParser {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandParser {
    pub fn new() -> Self {
        Self {
            state: ParserState::Idle,
        }
    }

    pub fn is_broken(&self) -> bool {
        matches!(self.state, ParserState::Broken)
    }

    /// True when no command is partially assembled.
    pub fn is_idle(&self) -> bool {
        matches!(self.state, ParserState::Idle)
    }

    /// Mark the parser broken, e.g. after the frame layer failed.
    pub fn break_stream(&mut self) {
        self.state = ParserState::Broken;
    }

    /// Feed one frame; returns a command once its last frame has arrived.
    pub fn push_frame(&mut self, frame: Bytes) -> Result<Option<WorkerCommand>, ProtocolError> {
        let state = std::mem::replace(&mut self.state, ParserState::Broken);
        let (next, dispatched) = match state {
            ParserState::Broken => return Err(ProtocolError::Broken),
            ParserState::Idle => {
                let command = CommandName::try_from(&frame[..])?;
                (ParserState::AwaitingArgCount(command), None)
            }
            ParserState::AwaitingArgCount(command) => {
                let expected = parse_count(&frame)?;
                if expected != command.arity() {
                    return Err(ProtocolError::BadMessage(format!(
                        "{} takes {} arguments, worker announced {}",
                        command,
                        command.arity(),
                        expected
                    )));
                }
                if expected == 0 {
                    (
                        ParserState::Idle,
                        Some(WorkerCommand::assemble(command, Vec::new())),
                    )
                } else {
                    (
                        ParserState::CollectingArgs {
                            command,
                            expected,
                            args: Vec::with_capacity(expected),
                        },
                        None,
                    )
                }
            }
            ParserState::CollectingArgs {
                command,
                expected,
                mut args,
            } => {
                args.push(frame);
                if args.len() == expected {
                    (ParserState::Idle, Some(WorkerCommand::assemble(command, args)))
                } else {
                    (
                        ParserState::CollectingArgs {
                            command,
                            expected,
                            args,
                        },
                        None,
                    )
                }
            }
        };
        self.state = next;
        Ok(dispatched)
    }
}

fn parse_count(frame: &[u8]) -> Result<usize, ProtocolError> {
    let bad = || {
        ProtocolError::BadMessage(format!(
            "invalid argument count: {:?}",
            String::from_utf8_lossy(frame)
        ))
    };
    if frame.is_empty() || !frame.iter().all(u8::is_ascii_digit) {
        return Err(bad());
    }
    std::str::from_utf8(frame)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(bad)
}

/// Byte stream to command decoder: frame layer plus command grammar.
#[derive(Debug, Default)]
pub struct CommandDecoder {
    frames: FrameDecoder,
    parser: CommandParser,
}

impl CommandDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            frames: FrameDecoder::with_max_frame_size(max_frame_size),
            parser: CommandParser::new(),
        }
    }

    pub fn is_broken(&self) -> bool {
        self.parser.is_broken() || self.frames.is_broken()
    }

    /// Whether the stream ended cleanly between commands.
    pub fn is_at_boundary(&self) -> bool {
        self.parser.is_idle() && self.frames.buffered_len() == 0
    }

    /// Feed a chunk and hand each completed command to `on_command`.
    ///
    /// Commands completed before an error in the same chunk are delivered
    /// first; the first error breaks the decoder for good.
    pub fn feed_with<F>(&mut self, chunk: &[u8], mut on_command: F) -> Result<(), ProtocolError>
    where
        F: FnMut(WorkerCommand),
    {
        if self.parser.is_broken() {
            return Err(ProtocolError::Broken);
        }
        let parser = &mut self.parser;
        let mut parse_error = None;
        let framed = self.frames.feed_with(chunk, |frame| {
            if parse_error.is_some() {
                return;
            }
            match parser.push_frame(frame) {
                Ok(Some(command)) => on_command(command),
                Ok(None) => {}
                Err(e) => parse_error = Some(e),
            }
        });
        if let Some(e) = parse_error {
            self.parser.break_stream();
            return Err(e);
        }
        if let Err(e) = framed {
            self.parser.break_stream();
            return Err(e.into());
        }
        Ok(())
    }

    /// Feed a chunk and collect the commands it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<WorkerCommand>, ProtocolError> {
        let mut commands = Vec::new();
        self.feed_with(chunk, |command| commands.push(command))?;
        Ok(commands)
    }
}
