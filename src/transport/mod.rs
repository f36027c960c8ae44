// SPDX-FileCopyrightText: Copyright (c) 2017-2023 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The Transport worker (C5): a long-running task, one per connection,
//! that performs the blocking accept/connect/recv/send and speaks the
//! shared "stage protocol" to the Connection state machine (C6) over a
//! pair of single-slot [`crate::mailbox::Mailbox`]es.
//!
//! Every variant runs on its own dedicated OS thread, each owning a
//! current-thread [`tokio::runtime::Runtime`]. This generalizes the
//! teacher's `block_on_with_timeout` bridge — a single blocking call
//! wrapped in `runtime.block_on(timeout(..))` — to drive the whole worker
//! loop, so the cycle-side caller genuinely blocks on this thread while
//! the I/O itself still runs on `tokio`/`tokio-serial`.

#[cfg(feature = "tcp")]
pub mod tcp;

#[cfg(feature = "serial")]
pub mod serial;

use std::{sync::Arc, thread::JoinHandle, time::Duration};

use crate::{
    error::{ConnStatus, ModbusStatus, TopStatus},
    mailbox::Mailbox,
};

/// The status tuple a worker publishes to the response mailbox:
/// `(finish_flag, status, error, modbus_status, conn_status, busy, established)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusTuple {
    pub finished: bool,
    pub status: TopStatus,
    pub error: bool,
    pub modbus_status: ModbusStatus,
    pub conn_status: ConnStatus,
    pub busy: bool,
    pub established: bool,
}

impl StatusTuple {
    #[must_use]
    pub fn running(established: bool) -> Self {
        Self {
            finished: false,
            status: TopStatus::Running,
            error: false,
            modbus_status: ModbusStatus::NoError,
            conn_status: ConnStatus::NoError,
            busy: false,
            established,
        }
    }

    #[must_use]
    pub fn terminal(status: TopStatus, modbus_status: ModbusStatus, conn_status: ConnStatus) -> Self {
        Self {
            finished: true,
            status,
            error: !matches!(status, TopStatus::Done) || modbus_status != ModbusStatus::NoError,
            modbus_status,
            conn_status,
            busy: false,
            established: false,
        }
    }

    /// A worker reports `done` only as it is about to exit (the client's
    /// "no next request" branch, or after an ordinary `disconnect_after_done`
    /// exchange) — `established` is always `false` here so the Connection's
    /// kept-open re-arm path falls through to a respawn instead of handing a
    /// `Control` to a thread that is no longer reading its mailbox.
    #[must_use]
    pub fn done(modbus_status: ModbusStatus) -> Self {
        Self {
            finished: true,
            status: TopStatus::Done,
            error: modbus_status != ModbusStatus::NoError,
            modbus_status,
            conn_status: ConnStatus::NoError,
            busy: false,
            established: false,
        }
    }
}

/// A payload the worker publishes to the cycle side: either a status
/// update or a raw frame handed up for C2 to decode.
#[derive(Debug, Clone)]
pub enum ToCycle {
    Status(StatusTuple),
    Frame(Vec<u8>),
}

/// A payload the cycle side hands down to the worker: the per-exchange
/// control tuple, or the `QUIT` sentinel.
#[derive(Debug, Clone)]
pub enum ToWorker {
    Control {
        disconnect: bool,
        recv_timeout: Duration,
        /// `None` on the client side means "no next request, report the
        /// given pre-encoded error and stop" (§4.5.2 step 4a).
        out_frame: Option<Vec<u8>>,
        pre_encoded_error: Option<ModbusStatus>,
    },
    Quit,
}

/// The mailbox pair shared between a Connection and its Transport worker.
#[derive(Debug)]
pub struct MailboxPair {
    pub to_cycle: Arc<Mailbox<ToCycle>>,
    pub to_worker: Arc<Mailbox<ToWorker>>,
}

impl MailboxPair {
    #[must_use]
    pub fn new() -> Self {
        Self {
            to_cycle: Arc::new(Mailbox::new()),
            to_worker: Arc::new(Mailbox::new()),
        }
    }
}

impl Default for MailboxPair {
    fn default() -> Self {
        Self::new()
    }
}

/// A spawned Transport worker thread and the mailbox pair used to talk to
/// it.
#[derive(Debug)]
pub struct WorkerHandle {
    pub mailboxes: MailboxPair,
    join: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub(crate) fn new(mailboxes: MailboxPair, join: JoinHandle<()>) -> Self {
        Self {
            mailboxes,
            join: Some(join),
        }
    }

    /// Send `QUIT` and join the worker thread. Idempotent.
    pub fn shutdown(&mut self) {
        if let Some(join) = self.join.take() {
            if !join.is_finished() {
                self.mailboxes.to_worker.put(ToWorker::Quit);
            }
            let _ = join.join();
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Build the current-thread runtime every worker variant drives its async
/// I/O through.
pub(crate) fn build_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to build worker runtime")
}
