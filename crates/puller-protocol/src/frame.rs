// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Netstring framing for the worker output stream.
//!
//! Every frame on the wire looks like this:
//! - ASCII decimal digits giving the payload length
//! - a single `:`
//! - exactly `length` payload bytes
//! - a single `,`
//!
//! A 4-byte payload `abcd` is therefore framed as `4:abcd,`.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Maximum payload size accepted by default (16 MB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Errors that can occur while decoding frames.
///
/// Every variant except [`FrameError::Broken`] is a protocol violation that
/// breaks the decoder; `Broken` is what the decoder returns afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("invalid byte 0x{0:02x} in frame length prefix")]
    InvalidLength(u8),

    #[error("empty frame length prefix")]
    EmptyLength,

    #[error("frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("expected ',' after frame payload, found 0x{0:02x}")]
    MissingTerminator(u8),

    #[error("decoder is broken by an earlier protocol violation")]
    Broken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecoderState {
    /// Accumulating length digits up to the `:`
    Length,
    /// Waiting for `len` payload bytes plus the `,` terminator
    Payload(usize),
    Broken,
}

/// Incremental decoder turning arbitrary byte chunks into complete frames.
///
/// A decoder is tied to one connection. Once it has seen a protocol
/// violation it stays broken for good: it never tries to resynchronize.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    state: DecoderState,
    max_frame_size: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Create a decoder with the default frame size limit.
    pub fn new() -> Self {
        Self::with_max_frame_size(MAX_FRAME_SIZE)
    }

    /// Create a decoder with a custom frame size limit.
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            state: DecoderState::Length,
            max_frame_size,
        }
    }

    /// Whether an earlier protocol violation broke this decoder.
    pub fn is_broken(&self) -> bool {
        self.state == DecoderState::Broken
    }

    /// Bytes received but not yet consumed by a complete frame.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Append a chunk and hand every complete frame to `on_frame`, in order.
    ///
    /// Frames completed before a violation inside the same chunk are still
    /// delivered; the violation is returned afterwards.
    pub fn feed_with<F>(&mut self, chunk: &[u8], mut on_frame: F) -> Result<(), FrameError>
    where
        F: FnMut(Bytes),
    {
        if self.is_broken() {
            return Err(FrameError::Broken);
        }
        self.buffer.extend_from_slice(chunk);
        while let Some(frame) = self.next_frame()? {
            on_frame(frame);
        }
        Ok(())
    }

    /// Append a chunk and collect the frames it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<Bytes>, FrameError> {
        let mut frames = Vec::new();
        self.feed_with(chunk, |frame| frames.push(frame))?;
        Ok(frames)
    }

    /// Extract the next complete frame from the buffer, if there is one.
    pub fn next_frame(&mut self) -> Result<Option<Bytes>, FrameError> {
        loop {
            match self.state {
                DecoderState::Broken => return Err(FrameError::Broken),
                DecoderState::Length => match self.read_length() {
                    Ok(Some(len)) => self.state = DecoderState::Payload(len),
                    Ok(None) => return Ok(None),
                    Err(e) => return Err(self.fail(e)),
                },
                DecoderState::Payload(len) => {
                    if self.buffer.len() <= len {
                        return Ok(None);
                    }
                    let terminator = self.buffer[len];
                    if terminator != b',' {
                        return Err(self.fail(FrameError::MissingTerminator(terminator)));
                    }
                    let payload = self.buffer.split_to(len).freeze();
                    self.buffer.advance(1);
                    self.state = DecoderState::Length;
                    return Ok(Some(payload));
                }
            }
        }
    }

    /// Parse the length prefix. Consumes it (and the `:`) only once complete.
    fn read_length(&mut self) -> Result<Option<usize>, FrameError> {
        let max = self.max_frame_size;
        let mut len: usize = 0;
        let mut colon = None;
        for (idx, &byte) in self.buffer.iter().enumerate() {
            match byte {
                b'0'..=b'9' => {
                    len = len
                        .checked_mul(10)
                        .and_then(|l| l.checked_add(usize::from(byte - b'0')))
                        .ok_or(FrameError::FrameTooLarge {
                            size: usize::MAX,
                            max,
                        })?;
                    if len > max {
                        return Err(FrameError::FrameTooLarge { size: len, max });
                    }
                }
                b':' => {
                    colon = Some(idx);
                    break;
                }
                other => return Err(FrameError::InvalidLength(other)),
            }
        }
        match colon {
            None => Ok(None),
            Some(0) => Err(FrameError::EmptyLength),
            Some(idx) => {
                self.buffer.advance(idx + 1);
                Ok(Some(len))
            }
        }
    }

    fn fail(&mut self, error: FrameError) -> FrameError {
        tracing::debug!(error = %error, "Frame decoder broken");
        self.state = DecoderState::Broken;
        self.buffer.clear();
        error
    }
}

/// Encode one payload as a netstring frame.
pub fn encode_frame(payload: &[u8]) -> Bytes {
    let prefix = payload.len().to_string();
    let mut buf = BytesMut::with_capacity(prefix.len() + payload.len() + 2);
    buf.put_slice(prefix.as_bytes());
    buf.put_u8(b':');
    buf.put_slice(payload);
    buf.put_u8(b',');
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_frame_layout() {
        assert_eq!(&encode_frame(b"abcd")[..], b"4:abcd,");
        assert_eq!(&encode_frame(b"")[..], b"0:,");
    }

    #[test]
    fn test_single_frame() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.feed(b"4:abcd,").unwrap();
        assert_eq!(frames, vec![Bytes::from_static(b"abcd")]);
        assert_eq!(decoder.buffered_len(), 0);
    }

    #[test]
    fn test_empty_payload() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.feed(b"0:,").unwrap();
        assert_eq!(frames, vec![Bytes::new()]);
    }

    #[test]
    fn test_partial_length_waits() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.feed(b"1").unwrap().is_empty());
        assert!(decoder.feed(b"1").unwrap().is_empty());
        assert!(decoder.feed(b":hello ").unwrap().is_empty());
        let frames = decoder.feed(b"world,").unwrap();
        assert_eq!(frames, vec![Bytes::from_static(b"hello world")]);
    }

    #[test]
    fn test_payload_may_contain_separators() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.feed(b"5:a:b,c,").unwrap();
        assert_eq!(frames, vec![Bytes::from_static(b"a:b,c")]);
    }

    #[test]
    fn test_non_digit_length_breaks() {
        let mut decoder = FrameDecoder::new();
        let err = decoder.feed(b"x:abc,").unwrap_err();
        assert_eq!(err, FrameError::InvalidLength(b'x'));
        assert!(decoder.is_broken());
    }

    #[test]
    fn test_empty_length_breaks() {
        let mut decoder = FrameDecoder::new();
        assert_eq!(decoder.feed(b":,").unwrap_err(), FrameError::EmptyLength);
    }

    #[test]
    fn test_wrong_terminator_breaks() {
        let mut decoder = FrameDecoder::new();
        let err = decoder.feed(b"3:abcd,").unwrap_err();
        assert_eq!(err, FrameError::MissingTerminator(b'd'));
        assert!(decoder.is_broken());
    }

    #[test]
    fn test_too_large_breaks_before_payload_arrives() {
        let mut decoder = FrameDecoder::with_max_frame_size(10);
        let err = decoder.feed(b"11").unwrap_err();
        assert_eq!(err, FrameError::FrameTooLarge { size: 11, max: 10 });
    }

    #[test]
    fn test_length_overflow_breaks() {
        let mut decoder = FrameDecoder::with_max_frame_size(usize::MAX);
        let err = decoder.feed(b"999999999999999999999999999:").unwrap_err();
        assert!(matches!(err, FrameError::FrameTooLarge { .. }));
    }

    #[test]
    fn test_max_length_prefix_waits_for_payload() {
        let mut decoder = FrameDecoder::with_max_frame_size(usize::MAX);
        let wire = format!("{}:abc", usize::MAX);
        assert!(decoder.feed(wire.as_bytes()).unwrap().is_empty());
        assert!(!decoder.is_broken());
        assert_eq!(decoder.buffered_len(), 3);
    }

    #[test]
    fn test_broken_decoder_never_resyncs() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.feed(b"2:abc,").is_err());
        assert_eq!(decoder.feed(b"3:abc,").unwrap_err(), FrameError::Broken);
        assert_eq!(decoder.next_frame().unwrap_err(), FrameError::Broken);
    }

    #[test]
    fn test_frames_before_violation_are_delivered() {
        let mut decoder = FrameDecoder::new();
        let mut seen = Vec::new();
        let result = decoder.feed_with(b"1:a,1:b,zz", |frame| seen.push(frame));
        assert_eq!(result.unwrap_err(), FrameError::InvalidLength(b'z'));
        assert_eq!(
            seen,
            vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")]
        );
    }

    #[test]
    fn test_error_display() {
        let msg = FrameError::FrameTooLarge { size: 20, max: 10 }.to_string();
        assert!(msg.contains("20"));
        assert!(msg.contains("10"));
        assert!(FrameError::InvalidLength(b'x').to_string().contains("0x78"));
    }
}
