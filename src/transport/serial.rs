// SPDX-FileCopyrightText: Copyright (c) 2017-2023 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Serial server and client Transport worker variants (§4.5.3).
//!
//! Frames are HDLC-stuffed by [`crate::codec::framing`] on the wire; a
//! read accumulates bytes until the trailing `0x7E` sentinel is seen, then
//! the accumulated bytes are unframed and the nonce stripped before being
//! handed to the cycle side. Device paths follow the `/dev/s3fserial<id>`
//! convention of the emulated link this crate replaces.

use std::{sync::Arc, thread, time::Duration};

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    time::timeout,
};
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use crate::{
    codec::{framing, nonce},
    error::{ConnStatus, ModbusStatus, TopStatus},
    taplog::{Direction, TapLog},
    transport::{build_runtime, MailboxPair, StatusTuple, ToCycle, ToWorker, WorkerHandle},
};

const SENTINEL: u8 = 0x7E;
const BAUD_RATE: u32 = 115_200;

/// Device path for the serial link of connection `connection_id` between
/// `local_id` and `remote_id`.
#[must_use]
pub fn device_path(local_id: u32) -> String {
    format!("/dev/s3fserial{local_id}")
}

/// Pre-flight step notifying the external connection mapper of the
/// `(local_id, remote_id, connection_id)` triple. Best-effort: failures
/// are logged and never block the worker from proceeding.
pub fn notify_connection_mapper(local_id: u32, remote_id: u32, connection_id: u32) {
    log::info!("connection mapper: local={local_id} remote={remote_id} connection={connection_id}");
}

fn open_port(path: &str) -> std::io::Result<SerialStream> {
    tokio_serial::new(path, BAUD_RATE).open_native_async()
}

async fn read_one_frame(port: &mut SerialStream) -> std::io::Result<Vec<u8>> {
    let mut acc = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        port.read_exact(&mut byte).await?;
        acc.push(byte[0]);
        if byte[0] == SENTINEL && acc.len() > 1 {
            break;
        }
    }
    Ok(acc)
}

fn tap(taplog: Option<&TapLog>, direction: Direction, frame: &[u8]) {
    if let Some(taplog) = taplog {
        taplog.record(direction, frame);
    }
}

/// Spawn the serial server variant: open the device, wait for the first
/// framed request within `conn_timeout`, then loop.
#[must_use]
pub fn spawn_server(local_id: u32, remote_id: u32, conn_timeout: Duration, taplog: Option<Arc<TapLog>>) -> WorkerHandle {
    let mailboxes = MailboxPair::new();
    let to_cycle = Arc::clone(&mailboxes.to_cycle);
    let to_worker = Arc::clone(&mailboxes.to_worker);

    let join = thread::spawn(move || {
        let rt = build_runtime();
        rt.block_on(server_loop(local_id, remote_id, conn_timeout, to_cycle, to_worker, taplog));
    });
    WorkerHandle::new(mailboxes, join)
}

async fn server_loop(
    local_id: u32,
    remote_id: u32,
    conn_timeout: Duration,
    to_cycle: Arc<crate::mailbox::Mailbox<ToCycle>>,
    to_worker: Arc<crate::mailbox::Mailbox<ToWorker>>,
    taplog: Option<Arc<TapLog>>,
) {
    // `local_id` also serves as the connection id (it already keys the
    // device path below), matching the original's device-path lookup.
    notify_connection_mapper(local_id, remote_id, local_id);

    let mut port = match open_port(&device_path(local_id)) {
        Ok(port) => port,
        Err(_) => {
            to_cycle.put(ToCycle::Status(StatusTuple::terminal(
                TopStatus::ConnTimeoutError,
                ModbusStatus::NoError,
                ConnStatus::MonitoringTimeElapsed,
            )));
            let _ = to_worker.get();
            return;
        }
    };

    to_cycle.put(ToCycle::Status(StatusTuple::running(true)));

    loop {
        let command = to_worker.get();
        let (recv_timeout, disconnect) = match command {
            ToWorker::Quit => return,
            ToWorker::Control { recv_timeout, disconnect, .. } => (recv_timeout, disconnect),
        };

        let framed = match timeout(recv_timeout.max(conn_timeout), read_one_frame(&mut port)).await {
            Ok(Ok(framed)) => framed,
            _ => {
                to_cycle.put(ToCycle::Status(StatusTuple::terminal(
                    TopStatus::ServerError,
                    ModbusStatus::UnknownException,
                    ConnStatus::NoError,
                )));
                return;
            }
        };
        let Ok(unwrapped) = framing::unframe(&framed) else {
            to_cycle.put(ToCycle::Status(StatusTuple::terminal(
                TopStatus::ServerError,
                ModbusStatus::UnknownException,
                ConnStatus::NoError,
            )));
            return;
        };
        let Some(payload) = nonce::strip(&unwrapped) else {
            to_cycle.put(ToCycle::Status(StatusTuple::terminal(
                TopStatus::ServerError,
                ModbusStatus::UnknownException,
                ConnStatus::NoError,
            )));
            return;
        };
        tap(taplog.as_deref(), Direction::Recv, &unwrapped);
        to_cycle.put(ToCycle::Frame(payload.to_vec()));

        let response = match to_worker.get() {
            ToWorker::Quit => return,
            ToWorker::Control { out_frame: Some(frame), .. } => frame,
            ToWorker::Control { out_frame: None, .. } => Vec::new(),
        };
        let mut pdu = response;
        nonce::append(&mut pdu);
        let wire = framing::frame(&pdu);
        if timeout(conn_timeout, port.write_all(&wire)).await.is_err() {
            to_cycle.put(ToCycle::Status(StatusTuple::terminal(
                TopStatus::ServerError,
                ModbusStatus::UnknownException,
                ConnStatus::NoError,
            )));
            return;
        }
        tap(taplog.as_deref(), Direction::Send, &wire);

        if disconnect {
            to_cycle.put(ToCycle::Status(StatusTuple::done(ModbusStatus::NoError)));
            return;
        }
    }
}

/// Spawn the serial client variant: open the device within `conn_timeout`,
/// then loop `send` / `recv` / hand-up.
#[must_use]
pub fn spawn_client(local_id: u32, remote_id: u32, conn_timeout: Duration, taplog: Option<Arc<TapLog>>) -> WorkerHandle {
    let mailboxes = MailboxPair::new();
    let to_cycle = Arc::clone(&mailboxes.to_cycle);
    let to_worker = Arc::clone(&mailboxes.to_worker);

    let join = thread::spawn(move || {
        let rt = build_runtime();
        rt.block_on(client_loop(local_id, remote_id, conn_timeout, to_cycle, to_worker, taplog));
    });
    WorkerHandle::new(mailboxes, join)
}

async fn client_loop(
    local_id: u32,
    remote_id: u32,
    conn_timeout: Duration,
    to_cycle: Arc<crate::mailbox::Mailbox<ToCycle>>,
    to_worker: Arc<crate::mailbox::Mailbox<ToWorker>>,
    taplog: Option<Arc<TapLog>>,
) {
    notify_connection_mapper(local_id, remote_id, local_id);

    let mut port = match open_port(&device_path(local_id)) {
        Ok(port) => port,
        Err(_) => {
            to_cycle.put(ToCycle::Status(StatusTuple::terminal(
                TopStatus::ConnTimeoutError,
                ModbusStatus::NoError,
                ConnStatus::MonitoringTimeElapsed,
            )));
            let _ = to_worker.get();
            return;
        }
    };

    to_cycle.put(ToCycle::Status(StatusTuple::running(true)));

    loop {
        let command = to_worker.get();
        let (recv_timeout, out_frame, pre_encoded_error, disconnect) = match command {
            ToWorker::Quit => return,
            ToWorker::Control {
                recv_timeout,
                out_frame,
                pre_encoded_error,
                disconnect,
            } => (recv_timeout, out_frame, pre_encoded_error, disconnect),
        };

        let Some(mut pdu) = out_frame else {
            to_cycle.put(ToCycle::Status(StatusTuple::done(
                pre_encoded_error.unwrap_or(ModbusStatus::NoError),
            )));
            return;
        };
        nonce::append(&mut pdu);
        let wire = framing::frame(&pdu);
        if timeout(conn_timeout, port.write_all(&wire)).await.is_err() {
            to_cycle.put(ToCycle::Status(StatusTuple::terminal(
                TopStatus::ClientError,
                ModbusStatus::UnknownException,
                ConnStatus::NoError,
            )));
            return;
        }
        tap(taplog.as_deref(), Direction::Send, &wire);

        let framed = match timeout(recv_timeout, read_one_frame(&mut port)).await {
            Ok(Ok(framed)) => framed,
            _ => {
                to_cycle.put(ToCycle::Status(StatusTuple::terminal(
                    TopStatus::RecvTimeoutError,
                    ModbusStatus::NoError,
                    ConnStatus::NoError,
                )));
                return;
            }
        };
        let Ok(unwrapped) = framing::unframe(&framed) else {
            to_cycle.put(ToCycle::Status(StatusTuple::terminal(
                TopStatus::ClientError,
                ModbusStatus::UnknownException,
                ConnStatus::NoError,
            )));
            return;
        };
        let Some(payload) = nonce::strip(&unwrapped) else {
            to_cycle.put(ToCycle::Status(StatusTuple::terminal(
                TopStatus::ClientError,
                ModbusStatus::UnknownException,
                ConnStatus::NoError,
            )));
            return;
        };
        tap(taplog.as_deref(), Direction::Recv, &unwrapped);
        to_cycle.put(ToCycle::Frame(payload.to_vec()));

        if disconnect {
            // The frame just handed up above still occupies `to_cycle`'s
            // single slot; a further `done()` put here would race the
            // cycle's consume and panic on a non-empty slot. The cycle
            // already knows this exchange was `disconnect_after_done` and
            // clears `established` itself once it processes the frame.
            return;
        }
    }
}
