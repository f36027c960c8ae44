// SPDX-FileCopyrightText: Copyright (c) 2017-2023 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Request/response PDU shapes for function codes 1-6, 15 and 16, and the
//! protocol exception taxonomy raised on the wire.
//!
//! Everything here is an internal wire-level shape used by [`crate::codec`]
//! and [`crate::connection`]; the PLC program never sees a [`Request`] or
//! [`Response`] directly, only the typed [`RequestDescriptor`] surfaced
//! through [`crate::connection::CycleOutput`].

use std::{error, fmt};

/// A Modbus function code is represented by an unsigned 8 bit integer.
pub(crate) type FunctionCode = u8;

/// Protocol address, 0-based, `0..=65535`.
pub(crate) type Address = u16;

/// A coil or discrete input represents a single bit.
pub(crate) type Coil = bool;

/// Modbus data items are 16 bit, big-endian on the wire.
pub(crate) type Word = u16;

/// Number of items to process.
pub(crate) type Quantity = u16;

/// A request from the master to the slave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Request {
    ReadCoils(Address, Quantity),
    ReadDiscreteInputs(Address, Quantity),
    ReadHoldingRegisters(Address, Quantity),
    ReadInputRegisters(Address, Quantity),
    WriteSingleCoil(Address, Coil),
    WriteSingleRegister(Address, Word),
    WriteMultipleCoils(Address, Vec<Coil>),
    WriteMultipleRegisters(Address, Vec<Word>),
}

impl Request {
    /// The function code this request is encoded under.
    #[must_use]
    pub(crate) fn function_code(&self) -> FunctionCode {
        match self {
            Self::ReadCoils(..) => 1,
            Self::ReadDiscreteInputs(..) => 2,
            Self::ReadHoldingRegisters(..) => 3,
            Self::ReadInputRegisters(..) => 4,
            Self::WriteSingleCoil(..) => 5,
            Self::WriteSingleRegister(..) => 6,
            Self::WriteMultipleCoils(..) => 15,
            Self::WriteMultipleRegisters(..) => 16,
        }
    }
}

/// The data of a successful response.
///
/// For `ReadCoils`/`ReadDiscreteInputs` the length of the result `Vec` is the
/// number of coils actually requested; trailing pad bits within the last
/// wire byte are not represented here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Response {
    ReadCoils(Vec<Coil>),
    ReadDiscreteInputs(Vec<Coil>),
    ReadHoldingRegisters(Vec<Word>),
    ReadInputRegisters(Vec<Word>),
    WriteSingleCoil(Address, Coil),
    WriteSingleRegister(Address, Word),
    WriteMultipleCoils(Address, Quantity),
    WriteMultipleRegisters(Address, Quantity),
}

/// A slave-side protocol exception, carried in an exception response as the
/// single sub-code byte following `fc | 0x80`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Exception {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
    ServerDeviceFailure = 0x04,
    /// Non-standard: a request's declared length exceeds the per-FC ceiling
    /// (`codec::limits`). The original system's error table carries this as
    /// `ERROR_INVALID_LENGTH`, a 16-bit status code that cannot be placed in
    /// a one-byte exception sub-code as-is; this crate assigns it the next
    /// unused sub-code instead of reusing a standard one.
    InvalidLength = 0x05,
}

impl Exception {
    pub(crate) fn description(&self) -> &str {
        match self {
            Self::IllegalFunction => "Illegal function",
            Self::IllegalDataAddress => "Illegal data address",
            Self::IllegalDataValue => "Illegal data value",
            Self::ServerDeviceFailure => "Server device failure",
            Self::InvalidLength => "Invalid length",
        }
    }
}

impl TryFrom<u8> for Exception {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::IllegalFunction),
            0x02 => Ok(Self::IllegalDataAddress),
            0x03 => Ok(Self::IllegalDataValue),
            0x04 => Ok(Self::ServerDeviceFailure),
            0x05 => Ok(Self::InvalidLength),
            _ => Err(()),
        }
    }
}

/// A slave (server) exception response: `fc | 0x80` plus a sub-code byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ExceptionResponse {
    pub(crate) function: FunctionCode,
    pub(crate) exception: Exception,
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

impl error::Error for Exception {}

impl fmt::Display for ExceptionResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Modbus function {}: {}", self.function, self.exception)
    }
}

impl error::Error for ExceptionResponse {}

/// The decoded shape of an inbound request, exposed to the PLC program as
/// inout parameters on the server side of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestDescriptor {
    pub ti: u8,
    pub data_type: crate::data_area::DataKind,
    pub is_write: bool,
    pub start_address: u16,
    pub length: u16,
}

/// A request the master has just sent, kept around to validate the
/// matching response (`Transaction` in the data model).
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SentRequest {
    pub(crate) slave: crate::slave::Slave,
    pub(crate) ti: u8,
    pub(crate) function_code: FunctionCode,
    pub(crate) start_address: Address,
    pub(crate) length: Quantity,
    pub(crate) raw: Vec<u8>,
    /// Whether this exchange was sent with `disconnect_after_done`: the
    /// worker tears the transport down as soon as it hands the response
    /// frame up and will not read another `Control`, so the cycle must
    /// clear `established` itself once the response is processed.
    pub(crate) disconnect: bool,
}
