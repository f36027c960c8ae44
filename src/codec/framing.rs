// SPDX-FileCopyrightText: Copyright (c) 2017-2023 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HDLC-style byte-stuffing framing used on serial transports only.
//!
//! Grounded on the `frame_outgoing_message`/`process_incoming_frame`
//! functions of the original serial client: a leading and trailing `0x7E`
//! sentinel, with `0x7E`/`0x7D` bytes inside the payload escaped as
//! `0x7D` followed by `byte ^ 0x20`.

use thiserror::Error;

const SENTINEL: u8 = 0x7E;
const ESCAPE: u8 = 0x7D;
const ESCAPE_XOR: u8 = 0x20;

/// Errors raised while removing byte-stuffing from a received frame.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FramingError {
    /// The frame ended with a dangling `0x7D` escape byte.
    #[error("truncated escape sequence at end of frame")]
    TruncatedEscape,
}

/// Byte-stuff `payload` and wrap it between two `0x7E` sentinels.
#[must_use]
pub(crate) fn frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 2);
    out.push(SENTINEL);
    for &byte in payload {
        if byte == SENTINEL || byte == ESCAPE {
            out.push(ESCAPE);
            out.push(byte ^ ESCAPE_XOR);
        } else {
            out.push(byte);
        }
    }
    out.push(SENTINEL);
    out
}

/// Strip the sentinels and undo byte-stuffing from a complete frame.
///
/// Leading/trailing `0x7E` bytes are dropped; any `0x7E` found inside the
/// body is also treated as a sentinel and dropped, matching the fact that a
/// well-formed payload can never contain a bare `0x7E`.
pub(crate) fn unframe(bytes: &[u8]) -> Result<Vec<u8>, FramingError> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut iter = bytes.iter().copied();
    while let Some(byte) = iter.next() {
        if byte == SENTINEL {
            continue;
        }
        if byte == ESCAPE {
            let escaped = iter.next().ok_or(FramingError::TruncatedEscape)?;
            out.push(escaped ^ ESCAPE_XOR);
        } else {
            out.push(byte);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_plain_payload() {
        let payload = vec![0x01, 0x02, 0x03, 0xFF, 0x00];
        assert_eq!(unframe(&frame(&payload)).unwrap(), payload);
    }

    #[test]
    fn round_trip_with_sentinel_and_escape_bytes() {
        let payload = vec![0x7E, 0x7D, 0x00, 0x7E, 0xAB];
        let framed = frame(&payload);
        assert_eq!(framed.first(), Some(&SENTINEL));
        assert_eq!(framed.last(), Some(&SENTINEL));
        assert_eq!(unframe(&framed).unwrap(), payload);
    }

    #[test]
    fn framed_body_contains_no_bare_sentinel() {
        let payload: Vec<u8> = (0u8..=255).collect();
        let framed = frame(&payload);
        let body = &framed[1..framed.len() - 1];
        assert!(!body.contains(&SENTINEL));
    }

    #[test]
    fn truncated_escape_is_an_error() {
        let bytes = vec![SENTINEL, 0x01, ESCAPE];
        assert_eq!(unframe(&bytes), Err(FramingError::TruncatedEscape));
    }

    #[test]
    fn empty_payload_frames_to_two_sentinels() {
        assert_eq!(frame(&[]), vec![SENTINEL, SENTINEL]);
        assert_eq!(unframe(&[SENTINEL, SENTINEL]).unwrap(), Vec::<u8>::new());
    }
}
