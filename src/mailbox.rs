// SPDX-FileCopyrightText: Copyright (c) 2017-2023 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The single-slot mailbox rendezvous (§5, §9) connecting the non-blocking
//! cyclic caller (C6) to the blocking Transport worker (C5).
//!
//! Implemented as `Mutex<Option<T>>` plus `Condvar`, as `spec.md` §9
//! explicitly permits in place of the source's shared-memory integer
//! array. Each direction of a connection owns one independent mailbox;
//! nothing here assumes more than one producer or one consumer.

use std::sync::{Condvar, Mutex};

/// One of the four payload shapes a mailbox slot may carry, per the data
/// model: a status tuple, a frame, a control tuple, or the `QUIT`
/// sentinel. This crate keeps status tuples and frames/control tuples on
/// separate, purpose-typed mailbox pairs (response vs. command) rather
/// than one shared tagged union, so `T` here is the payload type of a
/// single direction.
#[derive(Debug)]
pub struct Mailbox<T> {
    slot: Mutex<Option<T>>,
    not_empty: Condvar,
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Mailbox<T> {
    /// A fresh, empty mailbox.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            not_empty: Condvar::new(),
        }
    }

    /// Fill the slot and wake one waiter.
    ///
    /// # Panics
    /// Panics if the slot is already full: the stage protocol guarantees
    /// strict alternation between `put` and `get`, so a double `put`
    /// indicates a caller bug, not a runtime condition to recover from.
    pub fn put(&self, value: T) {
        let mut slot = self.slot.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        assert!(slot.is_none(), "mailbox put into a full slot");
        *slot = Some(value);
        self.not_empty.notify_one();
    }

    /// Non-blocking probe: take the value if present, otherwise return
    /// immediately with `None`.
    pub fn try_get(&self) -> Option<T> {
        let mut slot = self.slot.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        slot.take()
    }

    /// Blocking take: wait until a value is available, then take it.
    pub fn get(&self) -> T {
        let mut slot = self.slot.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        loop {
            if let Some(value) = slot.take() {
                return value;
            }
            slot = self
                .not_empty
                .wait(slot)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
    }

    /// True if a value is currently waiting to be consumed.
    pub fn is_full(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, thread, time::Duration};

    #[test]
    fn try_get_on_empty_mailbox_returns_none() {
        let mbox: Mailbox<u8> = Mailbox::new();
        assert_eq!(mbox.try_get(), None);
    }

    #[test]
    fn put_then_try_get_round_trips() {
        let mbox: Mailbox<u8> = Mailbox::new();
        mbox.put(42);
        assert_eq!(mbox.try_get(), Some(42));
        assert_eq!(mbox.try_get(), None);
    }

    #[test]
    fn blocking_get_unblocks_on_put_from_another_thread() {
        let mbox = Arc::new(Mailbox::<u32>::new());
        let reader = Arc::clone(&mbox);
        let handle = thread::spawn(move || reader.get());
        thread::sleep(Duration::from_millis(20));
        mbox.put(7);
        assert_eq!(handle.join().unwrap(), 7);
    }

    #[test]
    #[should_panic(expected = "full slot")]
    fn put_into_full_slot_panics() {
        let mbox: Mailbox<u8> = Mailbox::new();
        mbox.put(1);
        mbox.put(2);
    }
}
