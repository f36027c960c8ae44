// SPDX-FileCopyrightText: Copyright (c) 2017-2023 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Library error type and the protocol-level status code enumerations.

use thiserror::Error;

use crate::codec::framing::FramingError;

/// A specialized [`Result`] type used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum Error {
    /// General I/O error from a socket or serial handle.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// HDLC-style byte-stuffing error (serial transport only).
    #[error(transparent)]
    Framing(#[from] FramingError),

    /// A per-node configuration file was malformed.
    #[error("configuration error: {0}")]
    Config(String),

    /// A protocol-level failure surfaced by the Modbus codec.
    #[error("protocol error: {0:?}")]
    Protocol(ModbusStatus),
}

/// Connection-level status, surfaced through `conn_status`.
///
/// Only one value is produced by this implementation: an accept, connect or
/// writable-wait deadline elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ConnStatus {
    /// No connection-level condition is pending.
    NoError = 0x0000,
    /// `conn_timeout` elapsed while waiting to accept/connect/become writable.
    MonitoringTimeElapsed = 0xA100,
}

/// Modbus-level status, surfaced through `modbus_status`.
///
/// All non-zero values are 16-bit codes in the `0xA0xx`/`0xA1xx` range, as
/// exchanged internally between the master/slave validation logic and the
/// cyclic caller; they never appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ModbusStatus {
    /// No error; the exchange completed as expected.
    NoError = 0x0000,
    /// A locally detected call-parameter error (bad data type, bad length sign, ...).
    IncorrectCallParams = 0xA001,
    /// A write was attempted against `inputs` or `input_register`.
    InvalidWriteAction = 0xA002,
    /// Mismatched or out-of-range combination of address/window/data type.
    InvalidCombination = 0xA003,
    /// Requested length exceeds the per-FC ceiling.
    InvalidLength = 0xA005,
    /// `recv_timeout`/`conn_timeout` was not a positive number of seconds.
    InvalidMonitoringTime = 0xA006,
    /// Response `ti` did not match the sent transaction id.
    InvalidTi = 0xA007,
    /// Response or request unit/slave address did not match this node.
    InvalidUnit = 0xA008,
    /// Response function code did not match the sent function code.
    InvalidFunctionCode = 0xA009,
    /// Declared byte count on a read response did not equal `2 * length`.
    InvalidRegBitCount = 0xA00A,
    /// Requested `data_type` was out of the `1..=4` range.
    InvalidDatatype = 0xA00B,
    /// FC5 response did not exactly echo the request.
    InvalidMsgEchoFn5 = 0xA00C,
    /// FC6 response did not exactly echo the request.
    InvalidMsgEchoFn6 = 0xA00D,
    /// Any other condition that does not fit a more specific code.
    UnknownException = 0xA0FF,
    /// The peer or the local worker is still processing a prior exchange.
    Busy = 0xA101,
}

/// Top-level block status, surfaced through `STATUS`.
///
/// The discriminants reproduce the values used by the cyclic caller
/// verbatim, including the `-1` sentinel for "never started".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i8)]
pub enum TopStatus {
    /// The function block has never been enabled.
    NotStarted = -1,
    /// The current request/response exchange completed successfully.
    Done = 0,
    /// The connect (client) or accept (server) deadline elapsed.
    ConnTimeoutError = 1,
    /// A `recv` deadline elapsed while waiting for the peer's frame.
    RecvTimeoutError = 2,
    /// A protocol or addressing failure occurred on the server side.
    ServerError = 3,
    /// A worker is connected/accepted and an exchange is in flight.
    Running = 4,
    /// A protocol or addressing failure occurred on the client side.
    ClientError = 5,
}

impl TopStatus {
    /// Terminal states are every state other than `NotStarted`/`Running`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::NotStarted | Self::Running)
    }
}
