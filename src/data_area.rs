// SPDX-FileCopyrightText: Copyright (c) 2017-2023 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The data-area store (C3): word-addressable backing storage for Coils,
//! Discrete Inputs, Holding Registers and Input Registers, addressed
//! through up to eight windows per connection.

use thiserror::Error;

/// The Modbus address-space family a data area belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataKind {
    Unused,
    Coils,
    Inputs,
    HoldingRegister,
    InputRegister,
}

impl DataKind {
    /// Parse the `data_type` integer used in the per-node config file and
    /// in the wire request descriptor (`1=coils, 2=inputs,
    /// 3=holding_register, 4=input_register`).
    #[must_use]
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Unused),
            1 => Some(Self::Coils),
            2 => Some(Self::Inputs),
            3 => Some(Self::HoldingRegister),
            4 => Some(Self::InputRegister),
            _ => None,
        }
    }

    /// True for `Coils`/`Inputs`, whose addresses are bits packed into
    /// 16-bit words; false for the two register kinds.
    #[must_use]
    pub fn is_bit_addressed(self) -> bool {
        matches!(self, Self::Coils | Self::Inputs)
    }

    /// True for `Inputs`/`InputRegister`, which may only ever be read.
    #[must_use]
    pub fn is_read_only(self) -> bool {
        matches!(self, Self::Inputs | Self::InputRegister)
    }
}

/// One contiguous window of addresses of a single [`DataKind`].
#[derive(Debug, Clone)]
pub struct DataArea {
    pub kind: DataKind,
    pub start: u16,
    pub end: u16,
    words: Vec<u16>,
}

impl DataArea {
    /// Allocate a zero-initialized window. `end` must be `>= start`.
    ///
    /// # Panics
    /// Panics if `end < start`; callers validate this at config-load time
    /// (`ModbusStatus::InvalidCombination`) before ever constructing one.
    #[must_use]
    pub fn new(kind: DataKind, start: u16, end: u16) -> Self {
        assert!(end >= start, "data area end must be >= start");
        let span = u32::from(end) - u32::from(start) + 1;
        let word_count = if kind.is_bit_addressed() {
            span.div_ceil(16)
        } else {
            span
        };
        Self {
            kind,
            start,
            end,
            words: vec![0; word_count as usize],
        }
    }

    fn contains(&self, addr: u16) -> bool {
        addr >= self.start && addr <= self.end
    }
}

/// Raised when an address cannot be resolved to any configured window.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("address {address} of kind {kind:?} matches no configured data area")]
pub struct NoMatchingWindow {
    pub address: u16,
    pub kind: DataKind,
}

/// Up to eight [`DataArea`] windows owned by one [`crate::connection::Connection`].
#[derive(Debug, Clone, Default)]
pub struct DataAreaStore {
    areas: Vec<DataArea>,
}

impl DataAreaStore {
    /// Build a store from up to eight configured windows.
    #[must_use]
    pub fn new(areas: Vec<DataArea>) -> Self {
        Self { areas }
    }

    fn find(&self, kind: DataKind, addr: u16) -> Result<&DataArea, NoMatchingWindow> {
        self.areas
            .iter()
            .find(|a| a.kind == kind && a.contains(addr))
            .ok_or(NoMatchingWindow { address: addr, kind })
    }

    fn find_mut(&mut self, kind: DataKind, addr: u16) -> Result<&mut DataArea, NoMatchingWindow> {
        self.areas
            .iter_mut()
            .find(|a| a.kind == kind && a.contains(addr))
            .ok_or(NoMatchingWindow { address: addr, kind })
    }

    /// Validate that `[start, start+length)` lies fully inside one window
    /// of `kind`, without touching any storage.
    pub fn validate_range(&self, kind: DataKind, start: u16, length: u16) -> Result<(), NoMatchingWindow> {
        if length == 0 {
            return self.find(kind, start).map(|_| ());
        }
        let area = self.find(kind, start)?;
        let last = start
            .checked_add(length - 1)
            .ok_or(NoMatchingWindow { address: start, kind })?;
        if last > area.end {
            return Err(NoMatchingWindow { address: last, kind });
        }
        Ok(())
    }

    /// Read a single bit of a `Coils`/`Inputs` area.
    pub fn read_bit(&self, kind: DataKind, addr: u16) -> Result<bool, NoMatchingWindow> {
        let area = self.find(kind, addr)?;
        let offset = addr - area.start;
        let word = area.words[(offset / 16) as usize];
        Ok(word & (1 << (offset % 16)) != 0)
    }

    /// Write a single bit of a `Coils`/`Inputs` area.
    pub fn write_bit(&mut self, kind: DataKind, addr: u16, value: bool) -> Result<(), NoMatchingWindow> {
        let area = self.find_mut(kind, addr)?;
        let offset = addr - area.start;
        let idx = (offset / 16) as usize;
        let mask = 1u16 << (offset % 16);
        if value {
            area.words[idx] |= mask;
        } else {
            area.words[idx] &= !mask;
        }
        Ok(())
    }

    /// Read a single 16-bit word of a `HoldingRegister`/`InputRegister` area.
    pub fn read_word(&self, kind: DataKind, addr: u16) -> Result<u16, NoMatchingWindow> {
        let area = self.find(kind, addr)?;
        Ok(area.words[(addr - area.start) as usize])
    }

    /// Write a single 16-bit word of a `HoldingRegister`/`InputRegister` area.
    pub fn write_word(&mut self, kind: DataKind, addr: u16, value: u16) -> Result<(), NoMatchingWindow> {
        let area = self.find_mut(kind, addr)?;
        let offset = (addr - area.start) as usize;
        area.words[offset] = value;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_round_trip_within_window() {
        let mut store = DataAreaStore::new(vec![DataArea::new(DataKind::Coils, 0, 31)]);
        store.write_bit(DataKind::Coils, 5, true).unwrap();
        store.write_bit(DataKind::Coils, 20, true).unwrap();
        assert!(store.read_bit(DataKind::Coils, 5).unwrap());
        assert!(store.read_bit(DataKind::Coils, 20).unwrap());
        assert!(!store.read_bit(DataKind::Coils, 6).unwrap());
    }

    #[test]
    fn word_round_trip_within_window() {
        let mut store = DataAreaStore::new(vec![DataArea::new(DataKind::HoldingRegister, 0, 3)]);
        store.write_word(DataKind::HoldingRegister, 1, 0x2222).unwrap();
        store.write_word(DataKind::HoldingRegister, 2, 0x3333).unwrap();
        assert_eq!(store.read_word(DataKind::HoldingRegister, 1).unwrap(), 0x2222);
        assert_eq!(store.read_word(DataKind::HoldingRegister, 2).unwrap(), 0x3333);
    }

    #[test]
    fn out_of_window_address_is_reported() {
        let store = DataAreaStore::new(vec![DataArea::new(DataKind::HoldingRegister, 0, 3)]);
        assert!(store.read_word(DataKind::HoldingRegister, 100).is_err());
    }

    #[test]
    fn range_spanning_past_window_end_is_rejected() {
        let store = DataAreaStore::new(vec![DataArea::new(DataKind::HoldingRegister, 0, 3)]);
        assert!(store.validate_range(DataKind::HoldingRegister, 2, 5).is_err());
        assert!(store.validate_range(DataKind::HoldingRegister, 2, 2).is_ok());
    }

    #[test]
    fn words_initialize_to_zero() {
        let store = DataAreaStore::new(vec![DataArea::new(DataKind::InputRegister, 0, 1)]);
        assert_eq!(store.read_word(DataKind::InputRegister, 0).unwrap(), 0);
    }
}
