// SPDX-FileCopyrightText: Copyright (c) 2017-2023 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The Connection state machine (C6): the per-cycle entry point seen by
//! the PLC program, coupling the non-blocking cyclic caller to the
//! long-running Transport worker through a pair of mailboxes.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use crate::{
    codec::{decode, encode::{self, WriteValues}},
    data_area::{DataAreaStore, DataKind},
    error::{ConnStatus, ModbusStatus, TopStatus},
    frame::{RequestDescriptor, SentRequest},
    params::{ConnectionParams, Role},
    slave::Slave,
    taplog::TapLog,
    transport::{self, ToCycle, ToWorker, WorkerHandle},
};

/// What the PLC program wants to do this cycle, client role only.
#[derive(Debug, Clone, Copy)]
pub struct RequestIntent {
    pub ti: u8,
    pub data_type: DataKind,
    pub is_write: bool,
    pub start_address: u16,
    pub length: u16,
}

/// Everything the cyclic caller passes into [`Connection::advance`].
#[derive(Debug, Clone, Copy)]
pub struct CycleInput {
    pub enable: bool,
    pub recv_timeout: Duration,
    pub conn_timeout: Duration,
    pub disconnect_after_done: bool,
    /// Client role only; ignored when this connection is a server.
    pub request: Option<RequestIntent>,
}

/// Everything [`Connection::advance`] reports back each cycle.
#[derive(Debug, Clone, Copy)]
pub struct CycleOutput {
    pub status: TopStatus,
    pub error: bool,
    pub modbus_status: ModbusStatus,
    pub conn_status: ConnStatus,
    pub busy: bool,
    pub conn_established: bool,
    /// Populated on the server side once a request has been decoded.
    pub request_descriptor: Option<RequestDescriptor>,
}

/// One open (or not-yet-open) Modbus link, owning its data-area store and
/// its Transport worker.
pub struct Connection {
    pub params: ConnectionParams,
    pub data: DataAreaStore,
    taplog: Option<Arc<TapLog>>,
    worker: Option<WorkerHandle>,

    status: TopStatus,
    prev_enable: bool,
    read_finish_status: bool,
    established: bool,
    error: bool,
    modbus_status: ModbusStatus,
    conn_status: ConnStatus,
    request_descriptor: Option<RequestDescriptor>,
    pending: Option<SentRequest>,
    armed: bool,
}

impl Connection {
    /// Build a fresh, not-yet-started connection from its parameter
    /// record and optional tap log.
    #[must_use]
    pub fn new(params: ConnectionParams, taplog: Option<Arc<TapLog>>) -> Self {
        let data = DataAreaStore::new(params.allocate_data_areas());
        Self {
            params,
            data,
            taplog,
            worker: None,
            status: TopStatus::NotStarted,
            prev_enable: false,
            read_finish_status: true,
            established: false,
            error: false,
            modbus_status: ModbusStatus::NoError,
            conn_status: ConnStatus::NoError,
            request_descriptor: None,
            pending: None,
            armed: false,
        }
    }

    fn slave(&self) -> Slave {
        Slave(self.params.id as u8)
    }

    fn spawn_worker(&mut self, input: &CycleInput) {
        let taplog = self.taplog.clone();
        let worker = match (self.params.role, self.params.transport) {
            #[cfg(feature = "tcp")]
            (Role::Server, crate::params::Transport::Tcp) => {
                transport::tcp::spawn_server(self.params.local_port, input.conn_timeout, taplog)
            }
            #[cfg(feature = "tcp")]
            (Role::Client, crate::params::Transport::Tcp) => {
                let addr = SocketAddr::new(
                    self.params.remote_addr.unwrap_or_else(|| [127, 0, 0, 1].into()),
                    self.params.remote_port,
                );
                transport::tcp::spawn_client(addr, input.conn_timeout, taplog)
            }
            #[cfg(feature = "serial")]
            (Role::Server, crate::params::Transport::Serial) => {
                transport::serial::spawn_server(self.params.id, self.params.remote_id(), input.conn_timeout, taplog)
            }
            #[cfg(feature = "serial")]
            (Role::Client, crate::params::Transport::Serial) => {
                transport::serial::spawn_client(self.params.id, self.params.remote_id(), input.conn_timeout, taplog)
            }
            #[cfg(not(feature = "tcp"))]
            (_, crate::params::Transport::Tcp) => {
                panic!("connection {} requires the `tcp` transport, but this build was compiled without the `tcp` feature", self.params.id)
            }
            #[cfg(not(feature = "serial"))]
            (_, crate::params::Transport::Serial) => {
                panic!("connection {} requires the `serial` transport, but this build was compiled without the `serial` feature", self.params.id)
            }
        };
        self.worker = Some(worker);
        self.armed = false;
        self.pending = None;
    }

    fn respawn(&mut self, input: &CycleInput) {
        if let Some(mut worker) = self.worker.take() {
            worker.shutdown();
        }
        self.spawn_worker(input);
        self.status = TopStatus::Running;
        self.established = false;
    }

    fn adopt_status(&mut self, s: transport::StatusTuple) {
        self.status = s.status;
        self.error = s.error;
        self.modbus_status = s.modbus_status;
        self.conn_status = s.conn_status;
        self.established = s.established;
        if s.finished {
            self.read_finish_status = false;
        }
    }

    fn handle_server_frame(&mut self, frame: Vec<u8>, input: &CycleInput) {
        let out_frame = match decode::decode_request(&frame) {
            Ok((slave, ti, descriptor, request)) => {
                self.request_descriptor = Some(descriptor);
                match apply_request_to_store(&mut self.data, &descriptor, &request) {
                    Ok(response) => encode::encode_response(slave, ti, request.function_code(), &response),
                    Err(exception) => {
                        let resp = crate::frame::ExceptionResponse {
                            function: request.function_code(),
                            exception,
                        };
                        encode::encode_exception(slave, ti, resp)
                    }
                }
            }
            Err(exception_response) => {
                let ti = frame.get(1).copied().unwrap_or(0);
                encode::encode_exception(self.slave(), ti, exception_response)
            }
        };

        if let Some(worker) = &self.worker {
            worker.mailboxes.to_worker.put(ToWorker::Control {
                disconnect: input.disconnect_after_done,
                recv_timeout: input.recv_timeout,
                out_frame: Some(out_frame),
                pre_encoded_error: None,
            });
        }
        self.status = TopStatus::Done;
        self.modbus_status = ModbusStatus::NoError;
        self.read_finish_status = false;
    }

    fn handle_client_frame(&mut self, frame: Vec<u8>) {
        let Some(sent) = self.pending.take() else {
            self.status = TopStatus::Done;
            self.modbus_status = ModbusStatus::UnknownException;
            self.error = true;
            self.read_finish_status = false;
            return;
        };
        match decode::validate_response(&sent, &frame) {
            Ok(response) => {
                let kind = DataKind::from_code(data_type_code(sent.function_code)).unwrap_or(DataKind::Unused);
                let _ = apply_response_to_store(&mut self.data, kind, sent.start_address, &response);
                self.status = TopStatus::Done;
                self.modbus_status = ModbusStatus::NoError;
                self.error = false;
            }
            Err(status) => {
                self.status = TopStatus::Done;
                self.modbus_status = status;
                self.error = true;
            }
        }
        // The worker hands this frame up and, for a `disconnect_after_done`
        // exchange, tears the transport down without publishing a further
        // status (it cannot: the cycle hasn't consumed this frame yet, so
        // the single-slot mailbox has no room for a second message). Clear
        // `established` here instead of waiting for a `done()` that will
        // never arrive, or the kept-open re-arm below would hand a `Control`
        // to a thread that already exited.
        if sent.disconnect {
            self.established = false;
        }
        self.read_finish_status = false;
    }

    fn try_send_client_request(&mut self, input: &CycleInput) {
        let Some(intent) = input.request else { return };
        if self.pending.is_some() {
            return;
        }
        let built = if intent.is_write {
            build_write_from_store(&self.data, intent, self.params.single_write_enabled)
        } else {
            encode::select_read_request(intent.data_type, intent.start_address, intent.length)
        };
        let request = match built {
            Ok(req) => req,
            Err(status) => {
                self.status = TopStatus::Done;
                self.modbus_status = status;
                self.error = true;
                self.read_finish_status = false;
                return;
            }
        };
        let raw = encode::encode_request(self.slave(), intent.ti, &request);
        self.pending = Some(SentRequest {
            slave: self.slave(),
            ti: intent.ti,
            function_code: request.function_code(),
            start_address: intent.start_address,
            length: intent.length,
            raw: raw.clone(),
            disconnect: input.disconnect_after_done,
        });
        if let Some(worker) = &self.worker {
            worker.mailboxes.to_worker.put(ToWorker::Control {
                disconnect: input.disconnect_after_done,
                recv_timeout: input.recv_timeout,
                out_frame: Some(raw),
                pre_encoded_error: None,
            });
        }
    }

    /// The per-cycle entry point: advance the state machine one step and
    /// report the outputs the PLC program observes this scan.
    pub fn advance(&mut self, input: CycleInput) -> CycleOutput {
        let rising_edge = input.enable && !self.prev_enable;
        self.prev_enable = input.enable;

        match self.status {
            TopStatus::NotStarted => {
                if input.enable {
                    self.spawn_worker(&input);
                    self.status = TopStatus::Running;
                }
            }
            TopStatus::Running => {
                if let Some(worker) = &self.worker {
                    if let Some(msg) = worker.mailboxes.to_cycle.try_get() {
                        match msg {
                            ToCycle::Status(s) => {
                                let just_established = s.established && !self.established;
                                self.adopt_status(s);
                                if just_established && matches!(self.params.role, Role::Server) && !self.armed {
                                    self.armed = true;
                                    if let Some(worker) = &self.worker {
                                        worker.mailboxes.to_worker.put(ToWorker::Control {
                                            disconnect: input.disconnect_after_done,
                                            recv_timeout: input.recv_timeout,
                                            out_frame: None,
                                            pre_encoded_error: None,
                                        });
                                    }
                                }
                            }
                            ToCycle::Frame(frame) => match self.params.role {
                                Role::Server => self.handle_server_frame(frame, &input),
                                Role::Client => self.handle_client_frame(frame),
                            },
                        }
                    } else if matches!(self.params.role, Role::Client) && self.established {
                        self.try_send_client_request(&input);
                    }
                }
            }
            terminal => {
                // A worker that just exited may still have a final
                // `done(established: false)` sitting in its mailbox (the
                // server's disconnect-after-done path, or the client's "no
                // next request" branch); pick it up before deciding whether
                // to re-arm or respawn, or the kept-open branch below would
                // hand a `Control` to a thread that is no longer reading it.
                // The client's disconnect-after-done exchange clears
                // `established` itself in `handle_client_frame` instead,
                // since its worker hands the response frame up and exits
                // without room in the single-slot mailbox for a further
                // status.
                if let Some(worker) = &self.worker {
                    if let Some(ToCycle::Status(s)) = worker.mailboxes.to_cycle.try_get() {
                        self.adopt_status(s);
                    }
                }
                if !self.read_finish_status {
                    self.read_finish_status = true;
                } else if terminal == TopStatus::Done && self.established && input.enable {
                    self.status = TopStatus::Running;
                    if matches!(self.params.role, Role::Server) {
                        self.armed = true;
                        if let Some(worker) = &self.worker {
                            worker.mailboxes.to_worker.put(ToWorker::Control {
                                disconnect: input.disconnect_after_done,
                                recv_timeout: input.recv_timeout,
                                out_frame: None,
                                pre_encoded_error: None,
                            });
                        }
                    } else {
                        self.armed = false;
                    }
                } else if input.enable && (matches!(self.params.role, Role::Server) || rising_edge) {
                    self.respawn(&input);
                }
            }
        }

        CycleOutput {
            status: self.status,
            error: self.error,
            modbus_status: self.modbus_status,
            conn_status: self.conn_status,
            busy: self.status == TopStatus::Running && self.pending.is_some(),
            conn_established: self.established,
            request_descriptor: self.request_descriptor,
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.shutdown();
        }
    }
}

fn data_type_code(function_code: u8) -> u8 {
    match function_code {
        1 | 5 | 15 => 1,
        2 => 2,
        3 | 6 | 16 => 3,
        4 => 4,
        _ => 0,
    }
}

fn apply_request_to_store(
    store: &mut DataAreaStore,
    descriptor: &RequestDescriptor,
    request: &crate::frame::Request,
) -> Result<crate::frame::Response, crate::frame::Exception> {
    use crate::frame::{Exception, Request, Response};

    let addr_err = |_: crate::data_area::NoMatchingWindow| Exception::IllegalDataAddress;

    match request {
        Request::ReadCoils(start, qty) | Request::ReadDiscreteInputs(start, qty) => {
            let kind = descriptor.data_type;
            store.validate_range(kind, *start, *qty).map_err(addr_err)?;
            let coils = (0..*qty)
                .map(|i| store.read_bit(kind, start + i).unwrap_or(false))
                .collect();
            Ok(if matches!(request, Request::ReadCoils(..)) {
                Response::ReadCoils(coils)
            } else {
                Response::ReadDiscreteInputs(coils)
            })
        }
        Request::ReadHoldingRegisters(start, qty) | Request::ReadInputRegisters(start, qty) => {
            let kind = descriptor.data_type;
            store.validate_range(kind, *start, *qty).map_err(addr_err)?;
            let regs = (0..*qty)
                .map(|i| store.read_word(kind, start + i).unwrap_or(0))
                .collect();
            Ok(if matches!(request, Request::ReadHoldingRegisters(..)) {
                Response::ReadHoldingRegisters(regs)
            } else {
                Response::ReadInputRegisters(regs)
            })
        }
        Request::WriteSingleCoil(addr, coil) => {
            store.write_bit(DataKind::Coils, *addr, *coil).map_err(addr_err)?;
            Ok(Response::WriteSingleCoil(*addr, *coil))
        }
        Request::WriteSingleRegister(addr, value) => {
            store
                .write_word(DataKind::HoldingRegister, *addr, *value)
                .map_err(addr_err)?;
            Ok(Response::WriteSingleRegister(*addr, *value))
        }
        Request::WriteMultipleCoils(start, coils) => {
            store
                .validate_range(DataKind::Coils, *start, coils.len() as u16)
                .map_err(addr_err)?;
            for (i, coil) in coils.iter().enumerate() {
                store.write_bit(DataKind::Coils, start + i as u16, *coil).map_err(addr_err)?;
            }
            Ok(Response::WriteMultipleCoils(*start, coils.len() as u16))
        }
        Request::WriteMultipleRegisters(start, regs) => {
            store
                .validate_range(DataKind::HoldingRegister, *start, regs.len() as u16)
                .map_err(addr_err)?;
            for (i, value) in regs.iter().enumerate() {
                store
                    .write_word(DataKind::HoldingRegister, start + i as u16, *value)
                    .map_err(addr_err)?;
            }
            Ok(Response::WriteMultipleRegisters(*start, regs.len() as u16))
        }
    }
}

fn apply_response_to_store(
    store: &mut DataAreaStore,
    kind: DataKind,
    start: u16,
    response: &crate::frame::Response,
) -> Result<(), crate::data_area::NoMatchingWindow> {
    use crate::frame::Response;
    match response {
        Response::ReadCoils(coils) | Response::ReadDiscreteInputs(coils) => {
            for (i, coil) in coils.iter().enumerate() {
                store.write_bit(kind, start + i as u16, *coil)?;
            }
        }
        Response::ReadHoldingRegisters(regs) | Response::ReadInputRegisters(regs) => {
            for (i, value) in regs.iter().enumerate() {
                store.write_word(kind, start + i as u16, *value)?;
            }
        }
        Response::WriteSingleCoil(..)
        | Response::WriteSingleRegister(..)
        | Response::WriteMultipleCoils(..)
        | Response::WriteMultipleRegisters(..) => {}
    }
    Ok(())
}

fn build_write_from_store(
    store: &DataAreaStore,
    intent: RequestIntent,
    single_write_enabled: bool,
) -> Result<crate::frame::Request, ModbusStatus> {
    let values = if intent.data_type.is_bit_addressed() {
        let coils = (0..intent.length)
            .map(|i| store.read_bit(intent.data_type, intent.start_address + i).unwrap_or(false))
            .collect();
        WriteValues::Coils(coils)
    } else {
        let regs = (0..intent.length)
            .map(|i| store.read_word(intent.data_type, intent.start_address + i).unwrap_or(0))
            .collect();
        WriteValues::Registers(regs)
    };
    encode::select_write_request(
        intent.data_type,
        single_write_enabled,
        intent.start_address,
        intent.length,
        values,
    )
}
