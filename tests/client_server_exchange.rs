// SPDX-FileCopyrightText: Copyright (c) 2017-2023 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A client `Connection` and a server `Connection` talking over a real TCP
//! socket: FC3 read happy path, then FC15 write followed by FC1 read-back.

use std::{net::IpAddr, thread, time::Duration};

use modbus_plc_link::prelude::*;

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn params(role: Role, local_port: u16, remote_port: u16, data_areas: Vec<DataAreaSpec>) -> ConnectionParams {
    ConnectionParams {
        id: 7,
        role,
        transport: Transport::Tcp,
        single_write_enabled: false,
        local_port,
        remote_port,
        remote_partner_name: "peer".into(),
        remote_addr: Some("127.0.0.1".parse::<IpAddr>().unwrap()),
        data_areas,
    }
}

fn tick(conn: &mut Connection, input: CycleInput) -> CycleOutput {
    let mut output = conn.advance(input);
    let mut ticks = 0;
    while !output.status.is_terminal() && ticks < 400 {
        thread::sleep(Duration::from_millis(5));
        output = conn.advance(input);
        ticks += 1;
    }
    output
}

/// Drive a further exchange over an already kept-open connection: one extra
/// call absorbs the single-tick "done" edge left over from the previous
/// exchange before the re-arm and the new request can be observed.
fn tick_again(conn: &mut Connection, input: CycleInput) -> CycleOutput {
    let _ = conn.advance(input);
    tick(conn, input)
}

#[test]
fn fc3_happy_path_client_reads_server_holding_registers() {
    let port = free_port();

    let server_params = params(
        Role::Server,
        port,
        0,
        vec![DataAreaSpec { kind: DataKind::HoldingRegister, db: 1, start: 0, end: 9 }],
    );
    let mut server = Connection::new(server_params, None);
    server.data.write_word(DataKind::HoldingRegister, 1, 0x2222).unwrap();
    server.data.write_word(DataKind::HoldingRegister, 2, 0x3333).unwrap();

    let client_params = params(
        Role::Client,
        0,
        port,
        vec![DataAreaSpec { kind: DataKind::HoldingRegister, db: 1, start: 0, end: 9 }],
    );
    let mut client = Connection::new(client_params, None);

    let server_handle = thread::spawn(move || {
        let input = CycleInput {
            enable: true,
            recv_timeout: Duration::from_secs(3),
            conn_timeout: Duration::from_secs(3),
            disconnect_after_done: true,
            request: None,
        };
        let output = tick(&mut server, input);
        (server, output)
    });

    thread::sleep(Duration::from_millis(20));

    let client_input = CycleInput {
        enable: true,
        recv_timeout: Duration::from_secs(3),
        conn_timeout: Duration::from_secs(3),
        disconnect_after_done: true,
        request: Some(RequestIntent {
            ti: 0x10,
            data_type: DataKind::HoldingRegister,
            is_write: false,
            start_address: 1,
            length: 2,
        }),
    };
    let client_output = tick(&mut client, client_input);

    assert_eq!(client_output.status, TopStatus::Done);
    assert!(!client_output.error);
    assert_eq!(client_output.modbus_status, ModbusStatus::NoError);
    assert_eq!(client.data.read_word(DataKind::HoldingRegister, 1).unwrap(), 0x2222);
    assert_eq!(client.data.read_word(DataKind::HoldingRegister, 2).unwrap(), 0x3333);

    let (_server, server_output) = server_handle.join().unwrap();
    assert_eq!(server_output.status, TopStatus::Done);
    assert!(!server_output.error);
    let descriptor = server_output.request_descriptor.expect("server decoded a request");
    assert_eq!(descriptor.start_address, 1);
    assert_eq!(descriptor.length, 2);
    assert!(!descriptor.is_write);
}

#[test]
fn fc15_write_then_fc1_read_back_packed_coils() {
    let port = free_port();

    let server_params = params(
        Role::Server,
        port,
        0,
        vec![DataAreaSpec { kind: DataKind::Coils, db: 1, start: 0, end: 31 }],
    );
    let mut server = Connection::new(server_params, None);

    let client_params = params(
        Role::Client,
        0,
        port,
        vec![DataAreaSpec { kind: DataKind::Coils, db: 1, start: 0, end: 31 }],
    );
    let mut client = Connection::new(client_params, None);

    let pattern = [true, false, true, false, true, true, false, false, true, true];
    for (i, coil) in pattern.iter().enumerate() {
        client.data.write_bit(DataKind::Coils, i as u16, *coil).unwrap();
    }

    let server_handle = thread::spawn(move || {
        let input = CycleInput {
            enable: true,
            recv_timeout: Duration::from_secs(3),
            conn_timeout: Duration::from_secs(3),
            disconnect_after_done: false,
            request: None,
        };
        // First exchange: the write. Second: the read-back.
        let first = tick(&mut server, input);
        let second = tick_again(&mut server, input);
        (server, first, second)
    });

    thread::sleep(Duration::from_millis(20));

    let write_input = CycleInput {
        enable: true,
        recv_timeout: Duration::from_secs(3),
        conn_timeout: Duration::from_secs(3),
        disconnect_after_done: false,
        request: Some(RequestIntent {
            ti: 0x01,
            data_type: DataKind::Coils,
            is_write: true,
            start_address: 0,
            length: pattern.len() as u16,
        }),
    };
    let write_output = tick(&mut client, write_input);
    assert_eq!(write_output.status, TopStatus::Done);
    assert!(!write_output.error);

    let read_input = CycleInput {
        enable: true,
        recv_timeout: Duration::from_secs(3),
        conn_timeout: Duration::from_secs(3),
        disconnect_after_done: true,
        request: Some(RequestIntent {
            ti: 0x02,
            data_type: DataKind::Coils,
            is_write: false,
            start_address: 0,
            length: pattern.len() as u16,
        }),
    };
    let read_output = tick_again(&mut client, read_input);
    assert_eq!(read_output.status, TopStatus::Done);
    assert!(!read_output.error);

    for (i, coil) in pattern.iter().enumerate() {
        assert_eq!(client.data.read_bit(DataKind::Coils, i as u16).unwrap(), *coil);
    }

    let (_server, first, second) = server_handle.join().unwrap();
    assert!(!first.error);
    assert!(!second.error);
}
