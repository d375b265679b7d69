// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Frame decoding tests for puller-protocol.

use bytes::Bytes;
use puller_protocol::frame::{FrameDecoder, FrameError, encode_frame};

fn payloads() -> Vec<Vec<u8>> {
    vec![
        b"startMirroring".to_vec(),
        b"".to_vec(),
        b"0".to_vec(),
        b"a,b:c".to_vec(),
        (0u8..=255).collect(),
        vec![b','; 12],
    ]
}

fn encoded_stream(payloads: &[Vec<u8>]) -> Vec<u8> {
    payloads
        .iter()
        .flat_map(|p| encode_frame(p).to_vec())
        .collect()
}

#[test]
fn test_single_frame_round_trip() {
    for payload in payloads() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.feed(&encode_frame(&payload)).unwrap();
        assert_eq!(frames, vec![Bytes::from(payload)]);
    }
}

#[test]
fn test_every_two_way_split_yields_same_frames() {
    let expected = payloads();
    let stream = encoded_stream(&expected);

    for split in 0..=stream.len() {
        let mut decoder = FrameDecoder::new();
        let mut frames = decoder.feed(&stream[..split]).unwrap();
        frames.extend(decoder.feed(&stream[split..]).unwrap());

        let frames: Vec<Vec<u8>> = frames.into_iter().map(|f| f.to_vec()).collect();
        assert_eq!(frames, expected, "split at {}", split);
    }
}

#[test]
fn test_byte_at_a_time_yields_same_frames() {
    let expected = payloads();
    let stream = encoded_stream(&expected);

    let mut decoder = FrameDecoder::new();
    let mut frames = Vec::new();
    for byte in &stream {
        decoder
            .feed_with(std::slice::from_ref(byte), |f| frames.push(f.to_vec()))
            .unwrap();
    }
    assert_eq!(frames, expected);
    assert_eq!(decoder.buffered_len(), 0);
}

#[test]
fn test_irregular_chunks_yield_same_frames() {
    let expected = payloads();
    let stream = encoded_stream(&expected);
    let sizes = [1usize, 7, 3, 64, 2, 13];

    let mut decoder = FrameDecoder::new();
    let mut frames = Vec::new();
    let mut offset = 0;
    let mut i = 0;
    while offset < stream.len() {
        let end = (offset + sizes[i % sizes.len()]).min(stream.len());
        frames.extend(decoder.feed(&stream[offset..end]).unwrap());
        offset = end;
        i += 1;
    }
    let frames: Vec<Vec<u8>> = frames.into_iter().map(|f| f.to_vec()).collect();
    assert_eq!(frames, expected);
}

#[test]
fn test_non_numeric_prefix_is_violation() {
    let mut decoder = FrameDecoder::new();
    assert_eq!(
        decoder.feed(b"4a:abcd,").unwrap_err(),
        FrameError::InvalidLength(b'a')
    );
    assert!(decoder.is_broken());
}

#[test]
fn test_declared_length_shorter_than_payload_is_violation() {
    let mut decoder = FrameDecoder::new();
    assert_eq!(
        decoder.feed(b"2:abcd,").unwrap_err(),
        FrameError::MissingTerminator(b'c')
    );
}

#[test]
fn test_declared_length_longer_than_payload_is_violation_once_data_arrives() {
    let mut decoder = FrameDecoder::new();
    // Not enough bytes yet: the decoder cannot tell and waits.
    assert!(decoder.feed(b"6:abcd,").unwrap().is_empty());
    assert_eq!(
        decoder.feed(b"1:").unwrap_err(),
        FrameError::MissingTerminator(b':')
    );
}

#[test]
fn test_violation_is_permanent() {
    let mut decoder = FrameDecoder::new();
    let _ = decoder.feed(b"-1:a,");
    for chunk in [&b"1:a,"[..], b"", b"0:,"] {
        assert_eq!(decoder.feed(chunk).unwrap_err(), FrameError::Broken);
    }
}
