// SPDX-FileCopyrightText: Copyright (c) 2017-2023 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The Modbus message codec (C2): PDU encoding/decoding, checksum and
//! bit-packing helpers shared by both directions, and [`framing`]/[`nonce`]
//! for the layers that wrap every PDU on the wire.

pub(crate) mod decode;
pub(crate) mod encode;
pub(crate) mod framing;
pub(crate) mod nonce;

pub use framing::FramingError;

/// Per function-code length ceilings, from `max_dataType_reading_length`
/// and `max_dataType_writing_length` in the slave/master request handling.
pub(crate) mod limits {
    pub const READ_COILS_MAX: u16 = 2000;
    pub const READ_DISCRETE_INPUTS_MAX: u16 = 2000;
    pub const READ_HOLDING_REGISTERS_MAX: u16 = 125;
    pub const READ_INPUT_REGISTERS_MAX: u16 = 125;
    pub const WRITE_COILS_MAX: u16 = 800;
    pub const WRITE_REGISTERS_MAX: u16 = 100;
}

/// The one-byte arithmetic checksum: low 8 bits of the sum of every
/// preceding byte of the PDU (header, function code, payload), excluding
/// the nonce.
#[must_use]
pub(crate) fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Pack `coils` into bytes, LSB of the first byte holding the lowest
/// address, padding the final byte with zero bits.
#[must_use]
pub(crate) fn pack_coils(coils: &[bool]) -> Vec<u8> {
    let mut bytes = vec![0u8; coils.len().div_ceil(8)];
    for (i, &coil) in coils.iter().enumerate() {
        if coil {
            bytes[i / 8] |= 1 << (i % 8);
        }
    }
    bytes
}

/// Unpack up to `count` coils from `bytes`, LSB-first, as packed by
/// [`pack_coils`].
#[must_use]
pub(crate) fn unpack_coils(bytes: &[u8], count: u16) -> Vec<bool> {
    (0..count as usize)
        .map(|i| bytes.get(i / 8).is_some_and(|b| b & (1 << (i % 8)) != 0))
        .collect()
}

/// Number of packed bytes needed for `count` coils.
#[must_use]
pub(crate) fn packed_coils_len(count: u16) -> usize {
    (count as usize).div_ceil(8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_wraps_mod_256() {
        assert_eq!(checksum(&[0xFF, 0xFF, 0x02]), 0x00);
        assert_eq!(checksum(&[0x01, 0x02, 0x03]), 0x06);
    }

    #[test]
    fn pack_unpack_round_trip() {
        let coils = vec![true, false, true, false, true, true, false, false, true, true];
        let packed = pack_coils(&coils);
        assert_eq!(packed.len(), 2);
        assert_eq!(unpack_coils(&packed, coils.len() as u16), coils);
    }

    #[test]
    fn pack_coils_is_lsb_first() {
        let coils = vec![true, false, false, false, false, false, false, false];
        assert_eq!(pack_coils(&coils), vec![0b0000_0001]);
    }
}
