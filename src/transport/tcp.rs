// SPDX-FileCopyrightText: Copyright (c) 2017-2023 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! TCP server and client Transport worker variants (§4.5.1, §4.5.2).

use std::{net::SocketAddr, sync::Arc, thread, time::Duration};

use socket2::{Domain, Socket, Type};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    time::timeout,
};

use crate::{
    codec::nonce,
    error::{ConnStatus, ModbusStatus, TopStatus},
    taplog::{Direction, TapLog},
    transport::{build_runtime, MailboxPair, StatusTuple, ToCycle, ToWorker, WorkerHandle},
};

/// A frame never exceeds this many bytes on the wire: the largest payload
/// (FC15/16 at their ceilings) plus header, checksum and nonce.
const MAX_FRAME_LEN: usize = 2048;

fn listening_socket(local_port: u16) -> std::io::Result<std::net::TcpListener> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, None)?;
    socket.set_reuse_address(true)?;
    let addr: SocketAddr = ([0, 0, 0, 0], local_port).into();
    socket.bind(&addr.into())?;
    socket.listen(1)?;
    Ok(socket.into())
}

async fn recv_frame(stream: &mut TcpStream) -> std::io::Result<Vec<u8>> {
    let mut buf = vec![0u8; MAX_FRAME_LEN];
    let n = stream.read(&mut buf).await?;
    buf.truncate(n);
    Ok(buf)
}

fn tap(taplog: Option<&TapLog>, direction: Direction, frame: &[u8]) {
    if let Some(taplog) = taplog {
        taplog.record(direction, frame);
    }
}

/// Spawn the TCP server variant: accept one connection within
/// `conn_timeout`, then loop `recv` / hand-up / await response / `send`.
#[must_use]
pub fn spawn_server(local_port: u16, conn_timeout: Duration, taplog: Option<Arc<TapLog>>) -> WorkerHandle {
    let mailboxes = MailboxPair::new();
    let to_cycle = Arc::clone(&mailboxes.to_cycle);
    let to_worker = Arc::clone(&mailboxes.to_worker);

    let join = thread::spawn(move || {
        let rt = build_runtime();
        rt.block_on(server_loop(local_port, conn_timeout, to_cycle, to_worker, taplog));
    });
    WorkerHandle::new(mailboxes, join)
}

async fn server_loop(
    local_port: u16,
    conn_timeout: Duration,
    to_cycle: Arc<crate::mailbox::Mailbox<ToCycle>>,
    to_worker: Arc<crate::mailbox::Mailbox<ToWorker>>,
    taplog: Option<Arc<TapLog>>,
) {
    let listener = match listening_socket(local_port).and_then(TcpListener::from_std) {
        Ok(listener) => listener,
        Err(_) => {
            to_cycle.put(ToCycle::Status(StatusTuple::terminal(
                TopStatus::ConnTimeoutError,
                ModbusStatus::NoError,
                ConnStatus::MonitoringTimeElapsed,
            )));
            drain_quit(&to_worker);
            return;
        }
    };

    let accepted = timeout(conn_timeout, listener.accept()).await;
    let mut stream = match accepted {
        Ok(Ok((stream, _))) => stream,
        _ => {
            to_cycle.put(ToCycle::Status(StatusTuple::terminal(
                TopStatus::ConnTimeoutError,
                ModbusStatus::NoError,
                ConnStatus::MonitoringTimeElapsed,
            )));
            drain_quit(&to_worker);
            return;
        }
    };

    to_cycle.put(ToCycle::Status(StatusTuple::running(true)));

    loop {
        let Some((recv_timeout, disconnect)) = await_control(&to_worker) else {
            let _ = stream.shutdown().await;
            return;
        };

        match timeout(recv_timeout, recv_frame(&mut stream)).await {
            Ok(Ok(frame)) if !frame.is_empty() => {
                let Some(unwrapped) = nonce::strip(&frame) else {
                    to_cycle.put(ToCycle::Status(StatusTuple::terminal(
                        TopStatus::ServerError,
                        ModbusStatus::UnknownException,
                        ConnStatus::NoError,
                    )));
                    let _ = stream.shutdown().await;
                    return;
                };
                tap(taplog.as_deref(), Direction::Recv, &frame);
                to_cycle.put(ToCycle::Frame(unwrapped.to_vec()));
            }
            Ok(Ok(_)) => {
                to_cycle.put(ToCycle::Status(StatusTuple::terminal(
                    TopStatus::ServerError,
                    ModbusStatus::UnknownException,
                    ConnStatus::NoError,
                )));
                let _ = stream.shutdown().await;
                return;
            }
            Ok(Err(_)) | Err(_) => {
                to_cycle.put(ToCycle::Status(StatusTuple::terminal(
                    TopStatus::ServerError,
                    ModbusStatus::UnknownException,
                    ConnStatus::NoError,
                )));
                let _ = stream.shutdown().await;
                return;
            }
        }

        let response = match to_worker.get() {
            ToWorker::Quit => {
                let _ = stream.shutdown().await;
                return;
            }
            ToWorker::Control { out_frame: Some(frame), .. } => frame,
            ToWorker::Control { out_frame: None, .. } => Vec::new(),
        };
        let mut outgoing = response;
        nonce::append(&mut outgoing);
        if stream.write_all(&outgoing).await.is_err() {
            to_cycle.put(ToCycle::Status(StatusTuple::terminal(
                TopStatus::ServerError,
                ModbusStatus::UnknownException,
                ConnStatus::NoError,
            )));
            return;
        }
        tap(taplog.as_deref(), Direction::Send, &outgoing);

        if disconnect {
            to_cycle.put(ToCycle::Status(StatusTuple::done(ModbusStatus::NoError)));
            let _ = stream.shutdown().await;
            return;
        }
    }
}

fn await_control(to_worker: &crate::mailbox::Mailbox<ToWorker>) -> Option<(Duration, bool)> {
    match to_worker.get() {
        ToWorker::Quit => None,
        ToWorker::Control { recv_timeout, disconnect, .. } => Some((recv_timeout, disconnect)),
    }
}

fn drain_quit(to_worker: &crate::mailbox::Mailbox<ToWorker>) {
    let _ = to_worker.get();
}

/// Spawn the TCP client variant: connect (with retry budget) within
/// `conn_timeout`, then loop `send` / `recv` / hand-up.
#[must_use]
pub fn spawn_client(remote: SocketAddr, conn_timeout: Duration, taplog: Option<Arc<TapLog>>) -> WorkerHandle {
    let mailboxes = MailboxPair::new();
    let to_cycle = Arc::clone(&mailboxes.to_cycle);
    let to_worker = Arc::clone(&mailboxes.to_worker);

    let join = thread::spawn(move || {
        let rt = build_runtime();
        rt.block_on(client_loop(remote, conn_timeout, to_cycle, to_worker, taplog));
    });
    WorkerHandle::new(mailboxes, join)
}

async fn connect_with_retry(remote: SocketAddr, conn_timeout: Duration) -> std::io::Result<TcpStream> {
    let deadline = tokio::time::Instant::now() + conn_timeout;
    let mut backoff = Duration::from_millis(50);
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timeout"));
        }
        match timeout(remaining, TcpStream::connect(remote)).await {
            Ok(Ok(stream)) => return Ok(stream),
            Ok(Err(_)) => {
                tokio::time::sleep(backoff.min(remaining)).await;
                backoff = (backoff * 2).min(Duration::from_secs(1));
            }
            Err(_) => return Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timeout")),
        }
    }
}

async fn client_loop(
    remote: SocketAddr,
    conn_timeout: Duration,
    to_cycle: Arc<crate::mailbox::Mailbox<ToCycle>>,
    to_worker: Arc<crate::mailbox::Mailbox<ToWorker>>,
    taplog: Option<Arc<TapLog>>,
) {
    let mut stream = match connect_with_retry(remote, conn_timeout).await {
        Ok(stream) => stream,
        Err(_) => {
            to_cycle.put(ToCycle::Status(StatusTuple::terminal(
                TopStatus::ConnTimeoutError,
                ModbusStatus::NoError,
                ConnStatus::MonitoringTimeElapsed,
            )));
            drain_quit(&to_worker);
            return;
        }
    };

    to_cycle.put(ToCycle::Status(StatusTuple::running(true)));

    loop {
        let command = to_worker.get();
        let (recv_timeout, out_frame, pre_encoded_error, disconnect) = match command {
            ToWorker::Quit => {
                let _ = stream.shutdown().await;
                return;
            }
            ToWorker::Control {
                recv_timeout,
                out_frame,
                pre_encoded_error,
                disconnect,
            } => (recv_timeout, out_frame, pre_encoded_error, disconnect),
        };

        let Some(mut frame) = out_frame else {
            to_cycle.put(ToCycle::Status(StatusTuple::done(
                pre_encoded_error.unwrap_or(ModbusStatus::NoError),
            )));
            let _ = stream.shutdown().await;
            return;
        };

        nonce::append(&mut frame);
        if stream.write_all(&frame).await.is_err() {
            to_cycle.put(ToCycle::Status(StatusTuple::terminal(
                TopStatus::ClientError,
                ModbusStatus::UnknownException,
                ConnStatus::NoError,
            )));
            return;
        }
        tap(taplog.as_deref(), Direction::Send, &frame);

        match timeout(recv_timeout, recv_frame(&mut stream)).await {
            Ok(Ok(response)) if !response.is_empty() => {
                let Some(unwrapped) = nonce::strip(&response) else {
                    to_cycle.put(ToCycle::Status(StatusTuple::terminal(
                        TopStatus::ClientError,
                        ModbusStatus::UnknownException,
                        ConnStatus::NoError,
                    )));
                    let _ = stream.shutdown().await;
                    return;
                };
                tap(taplog.as_deref(), Direction::Recv, &response);
                to_cycle.put(ToCycle::Frame(unwrapped.to_vec()));
            }
            _ => {
                to_cycle.put(ToCycle::Status(StatusTuple::terminal(
                    TopStatus::RecvTimeoutError,
                    ModbusStatus::NoError,
                    ConnStatus::NoError,
                )));
                let _ = stream.shutdown().await;
                return;
            }
        }

        if disconnect {
            // The frame just handed up above still occupies `to_cycle`'s
            // single slot, so a further `done()` put here would race the
            // cycle's consume and panic on a non-empty slot. The cycle
            // already knows this exchange was `disconnect_after_done` and
            // clears `established` itself once it processes the frame.
            let _ = stream.shutdown().await;
            return;
        }
    }
}
