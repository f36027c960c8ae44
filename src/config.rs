// SPDX-FileCopyrightText: Copyright (c) 2017-2023 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Parsers for the two per-node plain-text configuration files: the
//! connection config (one block per `Connection_ID`) and the host config
//! (`lxc.network.ipv4 = A.B.C.D/M`).

use std::{net::IpAddr, path::Path, str::FromStr};

use crate::{
    data_area::DataKind,
    error::{Error, Result},
    params::{ConnectionParams, DataAreaSpec, Role, Transport, MAX_DATA_AREAS},
};

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(idx) => &line[..idx],
        None => line,
    }
}

fn parse_bool(value: &str, key: &str) -> Result<bool> {
    match value {
        "True" => Ok(true),
        "False" => Ok(false),
        _ => Err(Error::Config(format!("{key} must be True or False, got {value:?}"))),
    }
}

fn parse_data_area(value: &str) -> Result<DataAreaSpec> {
    let parts: Vec<&str> = value.split(',').map(str::trim).collect();
    if parts.len() != 4 {
        return Err(Error::Config(format!(
            "data area entry must be data_type,db,start,end, got {value:?}"
        )));
    }
    let code: u8 = parts[0]
        .parse()
        .map_err(|_| Error::Config(format!("invalid data_type {:?}", parts[0])))?;
    let kind = DataKind::from_code(code).ok_or_else(|| Error::Config(format!("unknown data_type {code}")))?;
    let db: u32 = parts[1]
        .parse()
        .map_err(|_| Error::Config(format!("invalid db {:?}", parts[1])))?;
    let start: u16 = parts[2]
        .parse()
        .map_err(|_| Error::Config(format!("invalid start {:?}", parts[2])))?;
    let end: u16 = parts[3]
        .parse()
        .map_err(|_| Error::Config(format!("invalid end {:?}", parts[3])))?;
    if end < start {
        return Err(Error::Config(format!(
            "data area end ({end}) must be >= start ({start})"
        )));
    }
    Ok(DataAreaSpec { kind, db, start, end })
}

#[derive(Default)]
struct Block {
    id: Option<u32>,
    remote_port: Option<u16>,
    local_port: Option<u16>,
    remote_partner_name: Option<String>,
    is_server: Option<bool>,
    single_write_enabled: Option<bool>,
    data_areas: Vec<(u8, DataAreaSpec)>,
}

impl Block {
    fn finish(self) -> Result<ConnectionParams> {
        let id = self.id.ok_or_else(|| Error::Config("missing Connection_ID".into()))?;
        let mut data_areas = self.data_areas;
        data_areas.sort_by_key(|(k, _)| *k);
        if data_areas.len() > MAX_DATA_AREAS {
            return Err(Error::Config(format!(
                "connection {id} declares more than {MAX_DATA_AREAS} data areas"
            )));
        }
        Ok(ConnectionParams {
            id,
            role: if self.is_server.unwrap_or(false) {
                Role::Server
            } else {
                Role::Client
            },
            transport: Transport::Tcp,
            single_write_enabled: self.single_write_enabled.unwrap_or(false),
            local_port: self.local_port.unwrap_or(0),
            remote_port: self.remote_port.unwrap_or(0),
            remote_partner_name: self.remote_partner_name.unwrap_or_default(),
            remote_addr: None,
            data_areas: data_areas.into_iter().map(|(_, spec)| spec).collect(),
        })
    }
}

/// Parse a per-node connection config file into one [`ConnectionParams`]
/// per `Connection_ID` block.
pub fn parse_connection_file(path: impl AsRef<Path>) -> Result<Vec<ConnectionParams>> {
    let text = std::fs::read_to_string(path.as_ref())
        .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.as_ref().display())))?;

    let mut blocks = Vec::new();
    let mut current: Option<Block> = None;

    for (lineno, raw_line) in text.lines().enumerate() {
        let line = strip_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }
        let (key, value) = line
            .split_once('=')
            .map(|(k, v)| (k.trim(), v.trim()))
            .ok_or_else(|| Error::Config(format!("line {}: expected key = value", lineno + 1)))?;

        if key == "Connection_ID" {
            if let Some(block) = current.take() {
                blocks.push(block.finish()?);
            }
            let mut block = Block::default();
            block.id = Some(
                value
                    .parse()
                    .map_err(|_| Error::Config(format!("line {}: invalid Connection_ID", lineno + 1)))?,
            );
            current = Some(block);
            continue;
        }

        let block = current
            .as_mut()
            .ok_or_else(|| Error::Config(format!("line {}: key before any Connection_ID", lineno + 1)))?;

        if key == "Remote_Port" {
            block.remote_port = Some(
                value
                    .parse()
                    .map_err(|_| Error::Config(format!("line {}: invalid Remote_Port", lineno + 1)))?,
            );
        } else if key == "Local_Port" {
            block.local_port = Some(
                value
                    .parse()
                    .map_err(|_| Error::Config(format!("line {}: invalid Local_Port", lineno + 1)))?,
            );
        } else if key == "Remote_Partner_Name" {
            block.remote_partner_name = Some(value.to_owned());
        } else if key == "Is_Server" {
            block.is_server = Some(parse_bool(value, key)?);
        } else if key == "Single_Write_Enabled" {
            block.single_write_enabled = Some(parse_bool(value, key)?);
        } else if let Some(suffix) = key.strip_prefix("Data_Area_") {
            let k: u8 = suffix
                .parse()
                .map_err(|_| Error::Config(format!("line {}: invalid Data_Area_ index", lineno + 1)))?;
            if !(1..=MAX_DATA_AREAS as u8).contains(&k) {
                return Err(Error::Config(format!("line {}: Data_Area_ index out of range", lineno + 1)));
            }
            block.data_areas.push((k, parse_data_area(value)?));
        } else {
            return Err(Error::Config(format!("line {}: unknown key {key:?}", lineno + 1)));
        }
    }

    if let Some(block) = current.take() {
        blocks.push(block.finish()?);
    }
    Ok(blocks)
}

/// Parse a per-node host-config file: `lxc.network.ipv4 = A.B.C.D/M`.
/// Returns the bare address with the mask stripped.
pub fn parse_host_file(path: impl AsRef<Path>) -> Result<IpAddr> {
    let text = std::fs::read_to_string(path.as_ref())
        .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.as_ref().display())))?;

    for raw_line in text.lines() {
        let line = strip_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            if key.trim() == "lxc.network.ipv4" {
                let addr_part = value.trim().split('/').next().unwrap_or(value.trim());
                return IpAddr::from_str(addr_part)
                    .map_err(|e| Error::Config(format!("invalid lxc.network.ipv4 value: {e}")));
            }
        }
    }
    Err(Error::Config("missing lxc.network.ipv4 key".into()))
}

/// Resolve the host-config address for `path`, falling back to loopback
/// when the file does not exist at all (the one explicit fallback named
/// in the external interfaces).
#[must_use]
pub fn resolve_host_or_loopback(path: impl AsRef<Path>) -> IpAddr {
    if !path.as_ref().exists() {
        return IpAddr::from([127, 0, 0, 1]);
    }
    parse_host_file(path).unwrap_or_else(|_| IpAddr::from([127, 0, 0, 1]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn parses_a_single_block() {
        let f = write_temp(
            "# comment\nConnection_ID = 1\nRemote_Port = 502\nLocal_Port = 503\n\
             Remote_Partner_Name = node2\nIs_Server = False\nSingle_Write_Enabled = True\n\
             Data_Area_1 = 3,5,0,3\n",
        );
        let parsed = parse_connection_file(f.path()).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].id, 1);
        assert_eq!(parsed[0].remote_port, 502);
        assert!(matches!(parsed[0].role, Role::Client));
        assert!(parsed[0].single_write_enabled);
        assert_eq!(parsed[0].data_areas.len(), 1);
        assert_eq!(parsed[0].data_areas[0].kind, DataKind::HoldingRegister);
    }

    #[test]
    fn rejects_unknown_keys() {
        let f = write_temp("Connection_ID = 1\nBogus_Key = 1\n");
        assert!(parse_connection_file(f.path()).is_err());
    }

    #[test]
    fn rejects_inverted_data_area_range() {
        let f = write_temp("Connection_ID = 1\nData_Area_1 = 1,0,10,2\n");
        assert!(parse_connection_file(f.path()).is_err());
    }

    #[test]
    fn parses_multiple_blocks() {
        let f = write_temp("Connection_ID = 1\nIs_Server = True\nConnection_ID = 2\nIs_Server = False\n");
        let parsed = parse_connection_file(f.path()).unwrap();
        assert_eq!(parsed.len(), 2);
        assert!(matches!(parsed[0].role, Role::Server));
        assert!(matches!(parsed[1].role, Role::Client));
    }

    #[test]
    fn host_file_strips_mask() {
        let f = write_temp("lxc.network.ipv4 = 10.0.0.5/24\n");
        assert_eq!(parse_host_file(f.path()).unwrap(), IpAddr::from([10, 0, 0, 5]));
    }

    #[test]
    fn missing_host_file_falls_back_to_loopback() {
        let addr = resolve_host_or_loopback("/nonexistent/path/for/sure");
        assert_eq!(addr, IpAddr::from([127, 0, 0, 1]));
    }
}
