// SPDX-FileCopyrightText: Copyright (c) 2017-2023 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types, re-exported for a single-line `use modbus_plc_link::prelude::*;`.

///////////////////////////////////////////////////////////////////
/// Modules
///////////////////////////////////////////////////////////////////
pub use crate::block;
pub use crate::transport;

///////////////////////////////////////////////////////////////////
/// Structs and enums
///////////////////////////////////////////////////////////////////
pub use crate::block::{BlockIo, ModbusBlock, Value};
pub use crate::connection::{Connection, CycleInput, CycleOutput, RequestIntent};
pub use crate::data_area::{DataArea, DataAreaStore, DataKind, NoMatchingWindow};
pub use crate::codec::FramingError;
pub use crate::error::{ConnStatus, Error, ModbusStatus, Result, TopStatus};
pub use crate::frame::RequestDescriptor;
pub use crate::params::{ConnectionParams, DataAreaSpec, Role, Transport, MAX_DATA_AREAS};
pub use crate::slave::{Slave, SlaveId};
pub use crate::taplog::{Direction, TapLog};

///////////////////////////////////////////////////////////////////
/// Functions
///////////////////////////////////////////////////////////////////
pub use crate::config::{parse_connection_file, parse_host_file, resolve_host_or_loopback};

///////////////////////////////////////////////////////////////////
/// Traits
///////////////////////////////////////////////////////////////////
pub use crate::slave::SlaveContext;
