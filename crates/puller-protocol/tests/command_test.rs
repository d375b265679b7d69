// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Command grammar tests for puller-protocol.

use puller_protocol::{CommandDecoder, ProtocolError, WorkerCommand, encode_frame};

fn frames(parts: &[&str]) -> Vec<u8> {
    parts
        .iter()
        .flat_map(|p| encode_frame(p.as_bytes()).to_vec())
        .collect()
}

#[test]
fn test_mirror_failed_scenario() {
    let mut decoder = CommandDecoder::new();
    let commands = decoder
        .feed(&frames(&["mirrorFailed", "2", "Not a branch", "OOPS-1"]))
        .unwrap();

    assert_eq!(commands.len(), 1);
    match &commands[0] {
        WorkerCommand::MirrorFailed {
            reason,
            diagnostic_id,
        } => {
            assert_eq!(reason, "Not a branch");
            assert_eq!(diagnostic_id, "OOPS-1");
        }
        other => panic!("Expected MirrorFailed, got {:?}", other),
    }
    assert!(
        !commands
            .iter()
            .any(|c| matches!(c, WorkerCommand::MirrorSucceeded { .. }))
    );
}

#[test]
fn test_full_worker_session_split_anywhere() {
    let stream = frames(&[
        "startMirroring",
        "0",
        "progressMade",
        "0",
        "progressMade",
        "0",
        "mirrorSucceeded",
        "1",
        "rev-7",
    ]);
    let expected = vec![
        WorkerCommand::StartMirroring,
        WorkerCommand::ProgressMade,
        WorkerCommand::ProgressMade,
        WorkerCommand::MirrorSucceeded {
            revision_id: "rev-7".to_string(),
        },
    ];

    for split in 0..=stream.len() {
        let mut decoder = CommandDecoder::new();
        let mut commands = decoder.feed(&stream[..split]).unwrap();
        commands.extend(decoder.feed(&stream[split..]).unwrap());
        assert_eq!(commands, expected, "split at {}", split);
        assert!(decoder.is_at_boundary());
    }
}

#[test]
fn test_unknown_command_breaks_stream() {
    let mut decoder = CommandDecoder::new();
    let err = decoder.feed(&frames(&["rmRf", "0"])).unwrap_err();
    assert!(matches!(err, ProtocolError::BadMessage(_)));
    assert!(decoder.is_broken());

    let err = decoder.feed(&frames(&["startMirroring", "0"])).unwrap_err();
    assert_eq!(err, ProtocolError::Broken);
}

#[test]
fn test_commands_before_bad_message_are_delivered() {
    let mut decoder = CommandDecoder::new();
    let mut seen = Vec::new();
    let result = decoder.feed_with(
        &frames(&["startMirroring", "0", "bogus", "0", "progressMade", "0"]),
        |c| seen.push(c),
    );
    assert!(matches!(result, Err(ProtocolError::BadMessage(_))));
    assert_eq!(seen, vec![WorkerCommand::StartMirroring]);
}

#[test]
fn test_non_utf8_arguments_are_lossy() {
    let mut stream = frames(&["mirrorFailed", "2"]);
    stream.extend_from_slice(&encode_frame(&[0xff, b'x']));
    stream.extend_from_slice(&encode_frame(b""));

    let commands = CommandDecoder::new().feed(&stream).unwrap();
    assert_eq!(
        commands,
        vec![WorkerCommand::MirrorFailed {
            reason: "\u{fffd}x".to_string(),
            diagnostic_id: String::new(),
        }]
    );
}
