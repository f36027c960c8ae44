// SPDX-FileCopyrightText: Copyright (c) 2017-2023 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The function block adapter (C7): the thin wrapper a cyclic PLC program
//! actually calls, translating its input/inout/output register set to and
//! from [`crate::connection::Connection::advance`].

use std::time::Duration;

use crate::{
    connection::{Connection, CycleInput, CycleOutput, RequestIntent},
    data_area::DataKind,
    error::{ConnStatus, ModbusStatus, TopStatus},
};

/// One typed value as it crosses the C7 boundary. Every field of
/// [`BlockIo`] is one of these; the block itself never handles anything
/// less specific than this fixed set internally.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Bool(bool),
    U16(u16),
    I16(i16),
    U32(u32),
    Status(TopStatus),
    ModbusStatus(ModbusStatus),
    ConnStatus(ConnStatus),
}

/// The parameter-block memory a cyclic caller reads and writes, named the
/// way the register set in the data model names it. Field-by-name access
/// (`get`/`set`) exists only at this boundary; every other part of the
/// crate works with the typed [`CycleInput`]/[`CycleOutput`] structs.
#[derive(Debug, Clone, Copy)]
pub struct BlockIo {
    // Inputs.
    pub enable: bool,
    pub recv_timeout_secs: u16,
    pub conn_timeout_secs: u16,
    pub disconnect_after_done: bool,
    pub reg_key: u32,

    // Inout, client role only (ignored when the owning connection is a server).
    pub ti: u16,
    pub data_type: u16,
    pub write_read: bool,
    pub start_address: u16,
    pub length: u16,

    // Outputs.
    pub status: TopStatus,
    pub error: bool,
    pub modbus_status: ModbusStatus,
    pub conn_status: ConnStatus,
    pub busy: bool,
    pub conn_established: bool,
    pub licensed: bool,

    // Outputs, server role only: the decoded request descriptor.
    pub recv_ti: u16,
    pub recv_data_type: u16,
    pub recv_write_read: bool,
    pub recv_start_address: u16,
    pub recv_length: u16,
}

impl Default for BlockIo {
    fn default() -> Self {
        Self {
            enable: false,
            recv_timeout_secs: 0,
            conn_timeout_secs: 0,
            disconnect_after_done: false,
            reg_key: 0,
            ti: 0,
            data_type: 0,
            write_read: false,
            start_address: 0,
            length: 0,
            status: TopStatus::NotStarted,
            error: false,
            modbus_status: ModbusStatus::NoError,
            conn_status: ConnStatus::NoError,
            busy: false,
            conn_established: false,
            licensed: true,
            recv_ti: 0,
            recv_data_type: 0,
            recv_write_read: false,
            recv_start_address: 0,
            recv_length: 0,
        }
    }
}

impl BlockIo {
    /// Read a field by its register name, for callers that address the
    /// block's memory by name rather than by Rust field access (the
    /// reflection-like boundary required of a C7 adapter). `LICENSED` and
    /// `REG_KEY` are accepted but are otherwise no-ops: the core always
    /// reports `LICENSED = true` and never inspects `REG_KEY`.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<Value> {
        Some(match field {
            "ENABLE" => Value::Bool(self.enable),
            "RECV_TIMEOUT" => Value::U16(self.recv_timeout_secs),
            "CONN_TIMEOUT" => Value::U16(self.conn_timeout_secs),
            "DISCONNECT_AFTER_DONE" => Value::Bool(self.disconnect_after_done),
            "REG_KEY" => Value::U32(self.reg_key),
            "TI" => Value::U16(self.ti),
            "DATA_TYPE" => Value::U16(self.data_type),
            "WRITE_READ" => Value::Bool(self.write_read),
            "START_ADDRESS" => Value::U16(self.start_address),
            "LENGTH" => Value::U16(self.length),
            "STATUS" => Value::Status(self.status),
            "ERROR" => Value::Bool(self.error),
            "MODBUS_STATUS" => Value::ModbusStatus(self.modbus_status),
            "CONN_STATUS" => Value::ConnStatus(self.conn_status),
            "BUSY" => Value::Bool(self.busy),
            "CONN_ESTABLISHED" => Value::Bool(self.conn_established),
            "LICENSED" => Value::Bool(self.licensed),
            "RECV_TI" => Value::U16(self.recv_ti),
            "RECV_DATA_TYPE" => Value::U16(self.recv_data_type),
            "RECV_WRITE_READ" => Value::Bool(self.recv_write_read),
            "RECV_START_ADDRESS" => Value::U16(self.recv_start_address),
            "RECV_LENGTH" => Value::U16(self.recv_length),
            _ => return None,
        })
    }

    /// Write a field by its register name. Returns `false` for an unknown
    /// name or a value of the wrong shape; `LICENSED`/`REG_KEY` are
    /// accepted and silently dropped, matching `get`.
    pub fn set(&mut self, field: &str, value: Value) -> bool {
        match (field, value) {
            ("ENABLE", Value::Bool(v)) => self.enable = v,
            ("RECV_TIMEOUT", Value::U16(v)) => self.recv_timeout_secs = v,
            ("CONN_TIMEOUT", Value::U16(v)) => self.conn_timeout_secs = v,
            ("DISCONNECT_AFTER_DONE", Value::Bool(v)) => self.disconnect_after_done = v,
            ("REG_KEY", Value::U32(_)) => {}
            ("TI", Value::U16(v)) => self.ti = v,
            ("DATA_TYPE", Value::U16(v)) => self.data_type = v,
            ("WRITE_READ", Value::Bool(v)) => self.write_read = v,
            ("START_ADDRESS", Value::U16(v)) => self.start_address = v,
            ("LENGTH", Value::U16(v)) => self.length = v,
            ("LICENSED", Value::Bool(_)) => {}
            _ => return false,
        }
        true
    }
}

/// A stateful Modbus connection block, wrapping one [`Connection`] and
/// translating [`BlockIo`] to and from its typed cycle contract.
pub struct ModbusBlock {
    connection: Connection,
    first_call: bool,
}

impl ModbusBlock {
    /// Wrap an already-constructed connection. The connection starts in
    /// `NOT_STARTED`; the first [`Self::call`] clears `io`'s output fields
    /// and reports that state without touching the worker.
    #[must_use]
    pub fn new(connection: Connection) -> Self {
        Self {
            connection,
            first_call: true,
        }
    }

    /// Run one PLC scan: on the first call, only clear outputs; otherwise
    /// read `io`'s inputs/inout fields, advance the connection, and write
    /// its outputs back. `REG_KEY` and `LICENSED` are accepted but are
    /// no-ops; `LICENSED` is always reported `true`.
    pub fn call(&mut self, io: &mut BlockIo) {
        io.licensed = true;

        if self.first_call {
            self.first_call = false;
            *io = BlockIo {
                reg_key: io.reg_key,
                enable: io.enable,
                recv_timeout_secs: io.recv_timeout_secs,
                conn_timeout_secs: io.conn_timeout_secs,
                disconnect_after_done: io.disconnect_after_done,
                ti: io.ti,
                data_type: io.data_type,
                write_read: io.write_read,
                start_address: io.start_address,
                length: io.length,
                ..BlockIo::default()
            };
            return;
        }

        let request = if io.write_read || io.length > 0 {
            DataKind::from_code(io.data_type as u8).map(|data_type| RequestIntent {
                ti: io.ti as u8,
                data_type,
                is_write: io.write_read,
                start_address: io.start_address,
                length: io.length,
            })
        } else {
            None
        };

        let input = CycleInput {
            enable: io.enable,
            recv_timeout: Duration::from_secs(u64::from(io.recv_timeout_secs)),
            conn_timeout: Duration::from_secs(u64::from(io.conn_timeout_secs)),
            disconnect_after_done: io.disconnect_after_done,
            request: request.flatten_if_client(&self.connection),
        };

        let output: CycleOutput = self.connection.advance(input);
        apply_output(io, output);
    }
}

trait FlattenIfClient {
    fn flatten_if_client(self, connection: &Connection) -> Option<RequestIntent>;
}

impl FlattenIfClient for Option<RequestIntent> {
    fn flatten_if_client(self, connection: &Connection) -> Option<RequestIntent> {
        if matches!(connection.params.role, crate::params::Role::Client) {
            self
        } else {
            None
        }
    }
}

fn apply_output(io: &mut BlockIo, output: CycleOutput) {
    io.status = output.status;
    io.error = output.error;
    io.modbus_status = output.modbus_status;
    io.conn_status = output.conn_status;
    io.busy = output.busy;
    io.conn_established = output.conn_established;
    if let Some(descriptor) = output.request_descriptor {
        io.recv_ti = u16::from(descriptor.ti);
        io.recv_data_type = descriptor.data_type as u16;
        io.recv_write_read = descriptor.is_write;
        io.recv_start_address = descriptor.start_address;
        io.recv_length = descriptor.length;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        data_area::DataArea,
        params::{ConnectionParams, Role, Transport},
    };

    fn test_params(role: Role) -> ConnectionParams {
        ConnectionParams {
            id: 1,
            role,
            transport: Transport::Tcp,
            single_write_enabled: false,
            local_port: 0,
            remote_port: 0,
            remote_partner_name: String::new(),
            remote_addr: None,
            data_areas: vec![],
        }
    }

    #[test]
    fn first_call_reports_not_started_and_clears_outputs() {
        let connection = Connection::new(test_params(Role::Server), None);
        let mut block = ModbusBlock::new(connection);
        let mut io = BlockIo { enable: true, ..BlockIo::default() };
        block.call(&mut io);
        assert_eq!(io.status, TopStatus::NotStarted);
        assert!(io.licensed);
        assert!(!io.error);
    }

    #[test]
    fn get_set_round_trip_on_named_fields() {
        let mut io = BlockIo::default();
        assert!(io.set("ENABLE", Value::Bool(true)));
        assert_eq!(io.get("ENABLE"), Some(Value::Bool(true)));
        assert!(!io.set("ENABLE", Value::U16(1)));
        assert_eq!(io.get("NOT_A_FIELD"), None);
    }

    #[test]
    fn reg_key_and_licensed_are_accepted_as_no_ops() {
        let mut io = BlockIo::default();
        assert!(io.set("REG_KEY", Value::U32(42)));
        assert_eq!(io.reg_key, 0);
        assert!(io.set("LICENSED", Value::Bool(false)));
        assert!(io.licensed);
    }

    #[test]
    fn unused_data_area_keeps_block_in_not_started_until_enabled() {
        let mut params = test_params(Role::Server);
        params.data_areas = vec![];
        let _ = DataArea::new(DataKind::Coils, 0, 0);
        let connection = Connection::new(params, None);
        let mut block = ModbusBlock::new(connection);
        let mut io = BlockIo::default();
        block.call(&mut io);
        assert_eq!(io.status, TopStatus::NotStarted);
    }
}
