// SPDX-FileCopyrightText: Copyright (c) 2017-2023 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Slave-side request decoding and master-side response validation.

use crate::{
    codec::{encode::local_failure_to_exception, limits},
    data_area::DataKind,
    error::ModbusStatus,
    frame::{Exception, ExceptionResponse, Request, RequestDescriptor, Response, SentRequest},
    slave::Slave,
};

fn data_type_of(function_code: u8) -> Result<DataKind, ModbusStatus> {
    match function_code {
        1 | 5 | 15 => Ok(DataKind::Coils),
        2 => Ok(DataKind::Inputs),
        3 | 6 | 16 => Ok(DataKind::HoldingRegister),
        4 => Ok(DataKind::InputRegister),
        _ => Err(ModbusStatus::InvalidFunctionCode),
    }
}

/// Per-FC length ceiling for a read (FC1-4) or multi-write (FC15/16)
/// request, mirroring `max_dataType_reading_length`/
/// `max_dataType_writing_length` on the slave side.
fn read_length_max(function_code: u8) -> u16 {
    match function_code {
        1 => limits::READ_COILS_MAX,
        2 => limits::READ_DISCRETE_INPUTS_MAX,
        3 => limits::READ_HOLDING_REGISTERS_MAX,
        _ => limits::READ_INPUT_REGISTERS_MAX,
    }
}

fn write_length_max(function_code: u8) -> u16 {
    if function_code == 15 {
        limits::WRITE_COILS_MAX
    } else {
        limits::WRITE_REGISTERS_MAX
    }
}

/// Decode an inbound request frame (slave side). Returns the descriptor the
/// cyclic caller observes plus the structured [`Request`], or an
/// [`ExceptionResponse`] ready to be sent back unmodified.
pub(crate) fn decode_request(bytes: &[u8]) -> Result<(Slave, u8, RequestDescriptor, Request), ExceptionResponse> {
    let malformed = |function: u8| ExceptionResponse {
        function,
        exception: Exception::IllegalFunction,
    };
    if bytes.len() < 3 {
        return Err(malformed(0));
    }
    let slave = Slave(bytes[0]);
    let ti = bytes[1];
    let function_code = bytes[2];

    if !matches!(function_code, 1 | 2 | 3 | 4 | 5 | 6 | 15 | 16) {
        return Err(malformed(function_code));
    }
    let data_type = data_type_of(function_code).map_err(|_| malformed(function_code))?;
    let body = &bytes[3..];

    let bad_value = || ExceptionResponse {
        function: function_code,
        exception: Exception::IllegalDataValue,
    };
    let bad_length = || ExceptionResponse {
        function: function_code,
        exception: local_failure_to_exception(ModbusStatus::InvalidLength),
    };

    match function_code {
        1..=4 => {
            if body.len() < 4 {
                return Err(bad_value());
            }
            let start = u16::from_be_bytes([body[0], body[1]]);
            let length = u16::from_be_bytes([body[2], body[3]]);
            if length > read_length_max(function_code) {
                return Err(bad_length());
            }
            let descriptor = RequestDescriptor {
                ti,
                data_type,
                is_write: false,
                start_address: start,
                length,
            };
            let req = match function_code {
                1 => Request::ReadCoils(start, length),
                2 => Request::ReadDiscreteInputs(start, length),
                3 => Request::ReadHoldingRegisters(start, length),
                _ => Request::ReadInputRegisters(start, length),
            };
            Ok((slave, ti, descriptor, req))
        }
        5 => {
            if body.len() < 4 {
                return Err(bad_value());
            }
            let addr = u16::from_be_bytes([body[0], body[1]]);
            let on = body[2] == 0xFF;
            let descriptor = RequestDescriptor {
                ti,
                data_type,
                is_write: true,
                start_address: addr,
                length: 1,
            };
            Ok((slave, ti, descriptor, Request::WriteSingleCoil(addr, on)))
        }
        6 => {
            if body.len() < 4 {
                return Err(bad_value());
            }
            let addr = u16::from_be_bytes([body[0], body[1]]);
            let value = u16::from_be_bytes([body[2], body[3]]);
            let descriptor = RequestDescriptor {
                ti,
                data_type,
                is_write: true,
                start_address: addr,
                length: 1,
            };
            Ok((slave, ti, descriptor, Request::WriteSingleRegister(addr, value)))
        }
        15 => {
            if body.len() < 5 {
                return Err(bad_value());
            }
            let addr = u16::from_be_bytes([body[0], body[1]]);
            let count = u16::from_be_bytes([body[2], body[3]]);
            if count > write_length_max(function_code) {
                return Err(bad_length());
            }
            let byte_count = body[4] as usize;
            let packed = body.get(5..5 + byte_count).ok_or_else(bad_value)?;
            let coils = crate::codec::unpack_coils(packed, count);
            let descriptor = RequestDescriptor {
                ti,
                data_type,
                is_write: true,
                start_address: addr,
                length: count,
            };
            Ok((slave, ti, descriptor, Request::WriteMultipleCoils(addr, coils)))
        }
        16 => {
            if body.len() < 5 {
                return Err(bad_value());
            }
            let addr = u16::from_be_bytes([body[0], body[1]]);
            let count = u16::from_be_bytes([body[2], body[3]]);
            if count > write_length_max(function_code) {
                return Err(bad_length());
            }
            let byte_count = body[4] as usize;
            let values_bytes = body.get(5..5 + byte_count).ok_or_else(bad_value)?;
            let regs: Vec<u16> = values_bytes.chunks_exact(2).map(|c| u16::from_be_bytes([c[0], c[1]])).collect();
            let descriptor = RequestDescriptor {
                ti,
                data_type,
                is_write: true,
                start_address: addr,
                length: count,
            };
            Ok((slave, ti, descriptor, Request::WriteMultipleRegisters(addr, regs)))
        }
        _ => unreachable!(),
    }
}

/// Validate and decode a response frame against the request that produced
/// it (master side), applying the error taxonomy from the FC table.
pub(crate) fn validate_response(sent: &SentRequest, frame: &[u8]) -> Result<Response, ModbusStatus> {
    if frame.len() <= 1 {
        return Err(ModbusStatus::UnknownException);
    }
    let recv_slave = frame[0];
    let ti = frame[1];
    let function_code = frame[2];

    if ti != sent.ti || recv_slave != sent.slave.0 {
        return Err(ModbusStatus::InvalidTi);
    }

    if function_code == (sent.function_code | 0x80) {
        let sub_code = *frame.get(3).ok_or(ModbusStatus::UnknownException)?;
        return Err(match Exception::try_from(sub_code) {
            Ok(Exception::IllegalDataAddress) => ModbusStatus::InvalidCombination,
            Ok(Exception::IllegalDataValue | Exception::ServerDeviceFailure) => ModbusStatus::UnknownException,
            Ok(Exception::InvalidLength) => ModbusStatus::InvalidLength,
            _ => ModbusStatus::UnknownException,
        });
    }

    if function_code != sent.function_code {
        return Err(ModbusStatus::InvalidFunctionCode);
    }

    if matches!(function_code, 5 | 6) {
        let echoed_len = sent.raw.len().min(frame.len());
        if frame[..echoed_len] != sent.raw[..echoed_len] || frame.len() != sent.raw.len() {
            return Err(if function_code == 5 {
                ModbusStatus::InvalidMsgEchoFn5
            } else {
                ModbusStatus::InvalidMsgEchoFn6
            });
        }
    }

    match function_code {
        1 | 2 => {
            let byte_count = *frame.get(3).ok_or(ModbusStatus::UnknownException)? as usize;
            if byte_count != crate::codec::packed_coils_len(sent.length) {
                return Err(ModbusStatus::InvalidRegBitCount);
            }
            let packed = frame.get(4..4 + byte_count).ok_or(ModbusStatus::UnknownException)?;
            let coils = crate::codec::unpack_coils(packed, sent.length);
            Ok(if function_code == 1 {
                Response::ReadCoils(coils)
            } else {
                Response::ReadDiscreteInputs(coils)
            })
        }
        3 | 4 => {
            let byte_count = *frame.get(3).ok_or(ModbusStatus::UnknownException)? as usize;
            if byte_count != sent.length as usize * 2 {
                return Err(ModbusStatus::InvalidRegBitCount);
            }
            let body = frame.get(4..4 + byte_count).ok_or(ModbusStatus::UnknownException)?;
            let regs: Vec<u16> = body.chunks_exact(2).map(|c| u16::from_be_bytes([c[0], c[1]])).collect();
            Ok(if function_code == 3 {
                Response::ReadHoldingRegisters(regs)
            } else {
                Response::ReadInputRegisters(regs)
            })
        }
        5 | 6 => {
            let addr = u16::from_be_bytes([*frame.get(3).ok_or(ModbusStatus::UnknownException)?, *frame.get(4).ok_or(ModbusStatus::UnknownException)?]);
            let hi = *frame.get(5).ok_or(ModbusStatus::UnknownException)?;
            let lo = *frame.get(6).ok_or(ModbusStatus::UnknownException)?;
            Ok(if function_code == 5 {
                Response::WriteSingleCoil(addr, hi == 0xFF)
            } else {
                Response::WriteSingleRegister(addr, u16::from_be_bytes([hi, lo]))
            })
        }
        15 | 16 => {
            let addr = u16::from_be_bytes([*frame.get(3).ok_or(ModbusStatus::UnknownException)?, *frame.get(4).ok_or(ModbusStatus::UnknownException)?]);
            let qty = u16::from_be_bytes([*frame.get(5).ok_or(ModbusStatus::UnknownException)?, *frame.get(6).ok_or(ModbusStatus::UnknownException)?]);
            Ok(if function_code == 15 {
                Response::WriteMultipleCoils(addr, qty)
            } else {
                Response::WriteMultipleRegisters(addr, qty)
            })
        }
        _ => Err(ModbusStatus::InvalidFunctionCode),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode;

    #[test]
    fn fc3_happy_path_decodes_to_expected_registers() {
        let sent = SentRequest {
            slave: Slave(0),
            ti: 0x10,
            function_code: 3,
            start_address: 1,
            length: 2,
            raw: encode::encode_request(Slave(0), 0x10, &Request::ReadHoldingRegisters(1, 2)),
            disconnect: false,
        };
        let mut response = vec![0x00, 0x10, 0x03, 0x04, 0x22, 0x22, 0x33, 0x33];
        response.push(crate::codec::checksum(&response));
        let resp = validate_response(&sent, &response).unwrap();
        assert_eq!(resp, Response::ReadHoldingRegisters(vec![0x2222, 0x3333]));
    }

    #[test]
    fn mismatched_ti_is_rejected() {
        let sent = SentRequest {
            slave: Slave(0),
            ti: 0x10,
            function_code: 3,
            start_address: 1,
            length: 2,
            raw: vec![],
            disconnect: false,
        };
        let response = vec![0x00, 0x11, 0x03, 0x04, 0x22, 0x22, 0x33, 0x33, 0x00];
        assert_eq!(validate_response(&sent, &response), Err(ModbusStatus::InvalidTi));
    }

    #[test]
    fn exception_frame_maps_illegal_data_address() {
        let sent = SentRequest {
            slave: Slave(0),
            ti: 0x10,
            function_code: 3,
            start_address: 100,
            length: 1,
            raw: vec![],
            disconnect: false,
        };
        let response = vec![0x00, 0x10, 0x83, 0x02, 0x00];
        assert_eq!(validate_response(&sent, &response), Err(ModbusStatus::InvalidCombination));
    }

    #[test]
    fn fc6_echo_mismatch_is_detected() {
        let raw = encode::encode_request(Slave(0), 0x01, &Request::WriteSingleRegister(2, 0xBEEF));
        let sent = SentRequest {
            slave: Slave(0),
            ti: 0x01,
            function_code: 6,
            start_address: 2,
            length: 1,
            raw: raw.clone(),
            disconnect: false,
        };
        let mut perturbed = raw;
        let last = perturbed.len() - 2;
        perturbed[last] ^= 0xFF;
        assert_eq!(validate_response(&sent, &perturbed), Err(ModbusStatus::InvalidMsgEchoFn6));
    }

    #[test]
    fn decode_request_rejects_unknown_function_code() {
        let bytes = vec![0x00, 0x01, 0x63, 0x00, 0x00, 0x00];
        let err = decode_request(&bytes).unwrap_err();
        assert_eq!(err.exception, Exception::IllegalFunction);
    }

    #[test]
    fn decode_request_fc3_round_trip() {
        let bytes = vec![0x00, 0x10, 0x03, 0x00, 0x01, 0x00, 0x02, 0x16];
        let (slave, ti, descriptor, req) = decode_request(&bytes).unwrap();
        assert_eq!(slave, Slave(0));
        assert_eq!(ti, 0x10);
        assert_eq!(descriptor.start_address, 1);
        assert_eq!(descriptor.length, 2);
        assert!(!descriptor.is_write);
        assert_eq!(req, Request::ReadHoldingRegisters(1, 2));
    }

    #[test]
    fn decode_request_rejects_fc3_length_over_ceiling() {
        // FC3's ceiling is 125; ask for 200.
        let bytes = vec![0x00, 0x10, 0x03, 0x00, 0x00, 0x00, 0xC8];
        let err = decode_request(&bytes).unwrap_err();
        assert_eq!(err.exception, Exception::InvalidLength);
    }

    #[test]
    fn decode_request_rejects_fc16_length_over_ceiling() {
        // FC16's ceiling is 100; declare 150 registers.
        let mut bytes = vec![0x00, 0x10, 0x10, 0x00, 0x00, 0x00, 0x96, 0x00];
        bytes.extend(std::iter::repeat(0).take(300));
        let err = decode_request(&bytes).unwrap_err();
        assert_eq!(err.exception, Exception::InvalidLength);
    }
}
