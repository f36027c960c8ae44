// SPDX-FileCopyrightText: Copyright (c) 2017-2023 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Master-side request construction and slave-side response/exception
//! construction.

use crate::{
    codec::{checksum, limits, pack_coils},
    data_area::DataKind,
    error::ModbusStatus,
    frame::{Exception, ExceptionResponse, Request, Response},
    slave::Slave,
};

/// Choose the function code for a write, following the rule in the FC
/// selection table: a length-1 write consults `single_write_enabled`,
/// anything longer always uses the "multiple" function code, and a write
/// against a read-only kind is rejected before any frame is built.
pub(crate) fn select_write_request(
    kind: DataKind,
    single_write_enabled: bool,
    start_address: u16,
    length: u16,
    values: WriteValues,
) -> Result<Request, ModbusStatus> {
    if kind.is_read_only() {
        return Err(ModbusStatus::InvalidWriteAction);
    }
    match (kind, length, values) {
        (DataKind::Coils, 1, WriteValues::Coils(coils)) if single_write_enabled => {
            Ok(Request::WriteSingleCoil(start_address, coils[0]))
        }
        (DataKind::Coils, _, WriteValues::Coils(coils)) => {
            if length as usize > limits::WRITE_COILS_MAX as usize {
                return Err(ModbusStatus::InvalidLength);
            }
            Ok(Request::WriteMultipleCoils(start_address, coils))
        }
        (DataKind::HoldingRegister, 1, WriteValues::Registers(regs)) if single_write_enabled => {
            Ok(Request::WriteSingleRegister(start_address, regs[0]))
        }
        (DataKind::HoldingRegister, _, WriteValues::Registers(regs)) => {
            if length > limits::WRITE_REGISTERS_MAX {
                return Err(ModbusStatus::InvalidLength);
            }
            Ok(Request::WriteMultipleRegisters(start_address, regs))
        }
        _ => Err(ModbusStatus::IncorrectCallParams),
    }
}

/// The values accompanying a write request, already read out of the local
/// data-area store by the caller.
#[derive(Debug, Clone)]
pub(crate) enum WriteValues {
    Coils(Vec<bool>),
    Registers(Vec<u16>),
}

/// Build a read request (FC1-4), validating the per-FC length ceiling.
pub(crate) fn select_read_request(kind: DataKind, start_address: u16, length: u16) -> Result<Request, ModbusStatus> {
    let (max, req): (u16, fn(u16, u16) -> Request) = match kind {
        DataKind::Coils => (limits::READ_COILS_MAX, Request::ReadCoils),
        DataKind::Inputs => (limits::READ_DISCRETE_INPUTS_MAX, Request::ReadDiscreteInputs),
        DataKind::HoldingRegister => (limits::READ_HOLDING_REGISTERS_MAX, Request::ReadHoldingRegisters),
        DataKind::InputRegister => (limits::READ_INPUT_REGISTERS_MAX, Request::ReadInputRegisters),
        DataKind::Unused => return Err(ModbusStatus::InvalidDatatype),
    };
    if length > max {
        return Err(ModbusStatus::InvalidLength);
    }
    Ok(req(start_address, length))
}

/// Serialize `req` as `slave | ti | fc | payload | checksum`, without the
/// trailing nonce.
#[must_use]
pub(crate) fn encode_request(slave: Slave, ti: u8, req: &Request) -> Vec<u8> {
    let mut out = vec![slave.0, ti, req.function_code()];
    match req {
        Request::ReadCoils(start, qty)
        | Request::ReadDiscreteInputs(start, qty)
        | Request::ReadHoldingRegisters(start, qty)
        | Request::ReadInputRegisters(start, qty) => {
            out.extend_from_slice(&start.to_be_bytes());
            out.extend_from_slice(&qty.to_be_bytes());
        }
        Request::WriteSingleCoil(addr, coil) => {
            out.extend_from_slice(&addr.to_be_bytes());
            out.extend_from_slice(if *coil { &[0xFF, 0x00] } else { &[0x00, 0x00] });
        }
        Request::WriteSingleRegister(addr, value) => {
            out.extend_from_slice(&addr.to_be_bytes());
            out.extend_from_slice(&value.to_be_bytes());
        }
        Request::WriteMultipleCoils(start, coils) => {
            out.extend_from_slice(&start.to_be_bytes());
            out.extend_from_slice(&(coils.len() as u16).to_be_bytes());
            let packed = pack_coils(coils);
            out.push(packed.len() as u8);
            out.extend_from_slice(&packed);
        }
        Request::WriteMultipleRegisters(start, regs) => {
            out.extend_from_slice(&start.to_be_bytes());
            out.extend_from_slice(&(regs.len() as u16).to_be_bytes());
            out.push((regs.len() * 2) as u8);
            for reg in regs {
                out.extend_from_slice(&reg.to_be_bytes());
            }
        }
    }
    let sum = checksum(&out);
    out.push(sum);
    out
}

/// Serialize `resp` the same way, under the already-matched function code.
#[must_use]
pub(crate) fn encode_response(slave: Slave, ti: u8, function_code: u8, resp: &Response) -> Vec<u8> {
    let mut out = vec![slave.0, ti, function_code];
    match resp {
        Response::ReadCoils(coils) | Response::ReadDiscreteInputs(coils) => {
            let packed = pack_coils(coils);
            out.push(packed.len() as u8);
            out.extend_from_slice(&packed);
        }
        Response::ReadHoldingRegisters(regs) | Response::ReadInputRegisters(regs) => {
            out.push((regs.len() * 2) as u8);
            for reg in regs {
                out.extend_from_slice(&reg.to_be_bytes());
            }
        }
        Response::WriteSingleCoil(addr, coil) => {
            out.extend_from_slice(&addr.to_be_bytes());
            out.extend_from_slice(if *coil { &[0xFF, 0x00] } else { &[0x00, 0x00] });
        }
        Response::WriteSingleRegister(addr, value) => {
            out.extend_from_slice(&addr.to_be_bytes());
            out.extend_from_slice(&value.to_be_bytes());
        }
        Response::WriteMultipleCoils(start, qty) | Response::WriteMultipleRegisters(start, qty) => {
            out.extend_from_slice(&start.to_be_bytes());
            out.extend_from_slice(&qty.to_be_bytes());
        }
    }
    let sum = checksum(&out);
    out.push(sum);
    out
}

/// Build an exception frame: `slave | ti | (fc | 0x80) | subcode | checksum`.
#[must_use]
pub(crate) fn encode_exception(slave: Slave, ti: u8, exception: ExceptionResponse) -> Vec<u8> {
    let mut out = vec![slave.0, ti, exception.function | 0x80, exception.exception as u8];
    let sum = checksum(&out);
    out.push(sum);
    out
}

/// Map a locally detected failure (no frame was ever built or sent) to the
/// slave-side [`Exception`] that would describe it to a standards peer,
/// used only when this node itself must reject a malformed inbound
/// request.
#[must_use]
pub(crate) fn local_failure_to_exception(status: ModbusStatus) -> Exception {
    match status {
        ModbusStatus::InvalidCombination => Exception::IllegalDataAddress,
        ModbusStatus::InvalidLength => Exception::InvalidLength,
        ModbusStatus::InvalidFunctionCode => Exception::IllegalFunction,
        _ => Exception::ServerDeviceFailure,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_is_appended_as_last_byte() {
        let bytes = encode_request(Slave(0), 0x10, &Request::ReadHoldingRegisters(1, 2));
        let (body, sum) = bytes.split_at(bytes.len() - 1);
        assert_eq!(sum[0], checksum(body));
    }

    #[test]
    fn fc3_request_matches_scenario_wire_bytes() {
        let bytes = encode_request(Slave(0), 0x10, &Request::ReadHoldingRegisters(1, 2));
        assert_eq!(bytes, vec![0x00, 0x10, 0x03, 0x00, 0x01, 0x00, 0x02, 0x16]);
    }

    #[test]
    fn write_single_coil_selected_when_enabled_and_length_one() {
        let req = select_write_request(DataKind::Coils, true, 3, 1, WriteValues::Coils(vec![true])).unwrap();
        assert_eq!(req, Request::WriteSingleCoil(3, true));
    }

    #[test]
    fn write_multiple_coils_selected_when_single_write_disabled() {
        let req = select_write_request(DataKind::Coils, false, 3, 1, WriteValues::Coils(vec![true])).unwrap();
        assert_eq!(req, Request::WriteMultipleCoils(3, vec![true]));
    }

    #[test]
    fn write_to_input_register_is_rejected_locally() {
        let err = select_write_request(
            DataKind::InputRegister,
            true,
            0,
            1,
            WriteValues::Registers(vec![1]),
        )
        .unwrap_err();
        assert_eq!(err, ModbusStatus::InvalidWriteAction);
    }

    #[test]
    fn oversize_write_is_rejected_locally() {
        let err = select_write_request(
            DataKind::HoldingRegister,
            false,
            0,
            200,
            WriteValues::Registers(vec![0; 200]),
        )
        .unwrap_err();
        assert_eq!(err, ModbusStatus::InvalidLength);
    }
}
