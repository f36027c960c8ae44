// SPDX-FileCopyrightText: Copyright (c) 2017-2023 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The connection parameter record (C4): the immutable descriptor loaded
//! once at node startup from the per-node configuration file.

use std::net::IpAddr;

use crate::data_area::{DataArea, DataKind};

/// Maximum number of data-area windows a single connection may declare.
pub const MAX_DATA_AREAS: usize = 8;

/// Whether this node is the server (listener/slave) or client
/// (connector/master) side of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

/// Which physical transport this connection runs over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp,
    Serial,
}

/// One `Data_Area_k` entry before it is turned into an allocated
/// [`DataArea`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataAreaSpec {
    pub kind: DataKind,
    pub db: u32,
    pub start: u16,
    pub end: u16,
}

/// The immutable, per-connection descriptor read from the config file.
#[derive(Debug, Clone)]
pub struct ConnectionParams {
    pub id: u32,
    pub role: Role,
    pub transport: Transport,
    pub single_write_enabled: bool,
    pub local_port: u16,
    pub remote_port: u16,
    pub remote_partner_name: String,
    pub remote_addr: Option<IpAddr>,
    pub data_areas: Vec<DataAreaSpec>,
}

impl ConnectionParams {
    /// Allocate the backing [`DataArea`] windows declared by this record.
    #[must_use]
    pub fn allocate_data_areas(&self) -> Vec<DataArea> {
        self.data_areas
            .iter()
            .map(|spec| DataArea::new(spec.kind, spec.start, spec.end))
            .collect()
    }

    /// The remote peer's numeric id, for the serial connection mapper
    /// pre-flight (§4.5.3). The original system reads this straight out of
    /// `Remote_Partner_Name` via `int(remote_host_name)`; a name that isn't
    /// a plain integer (e.g. a DNS hostname used for the TCP transport)
    /// simply has no numeric id and reports `0`.
    #[must_use]
    pub fn remote_id(&self) -> u32 {
        self.remote_partner_name.parse().unwrap_or(0)
    }
}
