// SPDX-FileCopyrightText: Copyright (c) 2017-2023 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A client `Connection` whose peer never accepts reports `ConnTimeoutError`
//! within its configured `conn_timeout` budget.

use std::{net::IpAddr, thread, time::{Duration, Instant}};

use modbus_plc_link::prelude::*;

#[test]
fn client_reports_conn_timeout_when_nothing_is_listening() {
    // Reserve a port, then drop the listener so nothing answers on it.
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let params = ConnectionParams {
        id: 9,
        role: Role::Client,
        transport: Transport::Tcp,
        single_write_enabled: false,
        local_port: 0,
        remote_port: port,
        remote_partner_name: "nobody-home".into(),
        remote_addr: Some("127.0.0.1".parse::<IpAddr>().unwrap()),
        data_areas: vec![DataAreaSpec { kind: DataKind::HoldingRegister, db: 1, start: 0, end: 1 }],
    };
    let mut conn = Connection::new(params, None);

    let input = CycleInput {
        enable: true,
        recv_timeout: Duration::from_secs(1),
        conn_timeout: Duration::from_millis(300),
        disconnect_after_done: true,
        request: None,
    };

    let deadline = Instant::now() + Duration::from_secs(5);
    let mut output = conn.advance(input);
    while !output.status.is_terminal() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
        output = conn.advance(input);
    }

    assert_eq!(output.status, TopStatus::ConnTimeoutError);
    assert!(output.error);
    assert_eq!(output.conn_status, ConnStatus::MonitoringTimeElapsed);
    assert!(!output.conn_established);
}
