// SPDX-FileCopyrightText: Copyright (c) 2017-2023 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The three random "nonce" bytes appended after the checksum of every PDU.
//!
//! The nonce carries no protocol meaning; it exists purely as wire padding
//! in the system this crate emulates and must be present on every frame a
//! Transport worker sends, and stripped before the PDU bytes reach the
//! codec.

use rand::Rng;

/// Length in bytes of the trailing nonce.
pub(crate) const NONCE_LEN: usize = 3;

/// Append `NONCE_LEN` random bytes to `pdu`.
pub(crate) fn append(pdu: &mut Vec<u8>) {
    let mut rng = rand::thread_rng();
    for _ in 0..NONCE_LEN {
        pdu.push(rng.gen());
    }
}

/// Remove the trailing nonce from a received frame, returning the bare PDU.
///
/// `None` if `frame` is shorter than the nonce itself (a malformed or empty
/// frame).
#[must_use]
pub(crate) fn strip(frame: &[u8]) -> Option<&[u8]> {
    frame.len().checked_sub(NONCE_LEN).map(|at| &frame[..at])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_adds_three_bytes() {
        let mut pdu = vec![1, 2, 3];
        append(&mut pdu);
        assert_eq!(pdu.len(), 6);
    }

    #[test]
    fn strip_removes_trailing_three_bytes() {
        let mut pdu = vec![1, 2, 3];
        append(&mut pdu);
        assert_eq!(strip(&pdu), Some(&[1u8, 2, 3][..]));
    }

    #[test]
    fn strip_rejects_frames_shorter_than_the_nonce() {
        assert_eq!(strip(&[1, 2]), None);
    }
}
