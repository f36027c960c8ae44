// SPDX-FileCopyrightText: Copyright (c) 2017-2023 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Two separate request/response exchanges carried over a single kept-open
//! Transport worker (`disconnect_after_done = false` on both sides).

use std::{net::IpAddr, thread, time::Duration};

use modbus_plc_link::prelude::*;

fn params(role: Role, local_port: u16, remote_port: u16) -> ConnectionParams {
    ConnectionParams {
        id: 4,
        role,
        transport: Transport::Tcp,
        single_write_enabled: false,
        local_port,
        remote_port,
        remote_partner_name: "peer".into(),
        remote_addr: Some("127.0.0.1".parse::<IpAddr>().unwrap()),
        data_areas: vec![DataAreaSpec { kind: DataKind::HoldingRegister, db: 1, start: 0, end: 9 }],
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

fn tick_again(conn: &mut Connection, input: CycleInput) -> CycleOutput {
    let _ = conn.advance(input);
    tick(conn, input)
}

fn read_intent(ti: u8, start_address: u16) -> RequestIntent {
    RequestIntent {
        ti,
        data_type: DataKind::HoldingRegister,
        is_write: false,
        start_address,
        length: 1,
    }
}

#[test]
fn two_read_exchanges_share_one_transport_worker() {
    let port = {
        let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        l.local_addr().unwrap().port()
    };

    let mut server = Connection::new(params(Role::Server, port, 0), None);
    server.data.write_word(DataKind::HoldingRegister, 0, 0x0101).unwrap();
    server.data.write_word(DataKind::HoldingRegister, 1, 0x0202).unwrap();

    let server_handle = thread::spawn(move || {
        let input = CycleInput {
            enable: true,
            recv_timeout: Duration::from_secs(3),
            conn_timeout: Duration::from_secs(3),
            disconnect_after_done: false,
            request: None,
        };
        let first = tick(&mut server, input);
        let second = tick_again(&mut server, input);
        (first, second)
    });

    thread::sleep(Duration::from_millis(20));

    let mut client = Connection::new(params(Role::Client, 0, port), None);
    let base_input = CycleInput {
        enable: true,
        recv_timeout: Duration::from_secs(3),
        conn_timeout: Duration::from_secs(3),
        disconnect_after_done: false,
        request: Some(read_intent(0x30, 0)),
    };
    let first = tick(&mut client, base_input);
    assert_eq!(first.status, TopStatus::Done);
    assert!(!first.error);
    assert_eq!(client.data.read_word(DataKind::HoldingRegister, 0).unwrap(), 0x0101);

    let second_input = CycleInput {
        request: Some(read_intent(0x31, 1)),
        ..base_input
    };
    let second = tick_again(&mut client, second_input);
    assert_eq!(second.status, TopStatus::Done);
    assert!(!second.error);
    assert_eq!(client.data.read_word(DataKind::HoldingRegister, 1).unwrap(), 0x0202);

    let (server_first, server_second) = server_handle.join().unwrap();
    assert!(!server_first.error);
    assert!(!server_second.error);
}
