// SPDX-FileCopyrightText: Copyright (c) 2017-2023 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The "IDS" tap log (§6): a best-effort UDP mirror of every `SEND`/`RECV`
//! event, plus the matching per-node flat log file.

use std::{
    fs::OpenOptions,
    io::Write,
    net::{IpAddr, SocketAddr, UdpSocket},
    path::PathBuf,
    time::{SystemTime, UNIX_EPOCH},
};

use digest::Digest;
use md5::Md5;

/// The fixed port the IDS consumer listens on.
pub const IDS_PORT: u16 = 8888;

/// Direction of a tapped frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Send,
    Recv,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Self::Send => "SEND",
            Self::Recv => "RECV",
        }
    }
}

/// Emits tap-log datagrams for one node and appends the same events to
/// `logs/node_<id>_log`.
#[derive(Debug)]
pub struct TapLog {
    local_id: u32,
    socket: Option<UdpSocket>,
    ids_addr: SocketAddr,
    log_path: PathBuf,
}

impl TapLog {
    /// Build a tap log for `local_id`, mirroring to `ids_ip:8888` and
    /// appending to `logs/node_<local_id>_log` under `log_dir`.
    pub fn new(local_id: u32, ids_ip: IpAddr, log_dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", 0)).ok();
        let mut log_path = log_dir.into();
        log_path.push(format!("node_{local_id}_log"));
        Ok(Self {
            local_id,
            socket,
            ids_addr: SocketAddr::new(ids_ip, IDS_PORT),
            log_path,
        })
    }

    fn timestamp() -> u128 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0)
    }

    fn digest_hex(frame: &[u8]) -> String {
        let mut hasher = Md5::new();
        hasher.update(frame);
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }

    fn hex(payload: &[u8]) -> String {
        payload.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Record one `SEND`/`RECV` event, writing to both the UDP tap and the
    /// per-node flat log. Failures on either sink are swallowed, logged
    /// locally, and never propagated to the state machine.
    pub fn record(&self, direction: Direction, frame: &[u8]) {
        let ts = Self::timestamp();
        let digest = Self::digest_hex(frame);
        let payload_hex = Self::hex(frame);

        let udp_line = format!(
            "{},{},{},{},{}",
            self.local_id,
            ts,
            direction.as_str(),
            digest,
            payload_hex
        );
        if let Some(socket) = &self.socket {
            if let Err(err) = socket.send_to(udp_line.as_bytes(), self.ids_addr) {
                log::warn!("tap log UDP send to {} failed: {err}", self.ids_addr);
            }
        }

        let node_line = format!("{},{},{},{}", ts, direction.as_str(), digest, payload_hex);
        if let Err(err) = self.append_node_log(&node_line) {
            log::warn!("tap log file append to {:?} failed: {err}", self.log_path);
        }
    }

    fn append_node_log(&self, line: &str) -> std::io::Result<()> {
        if let Some(parent) = self.log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.log_path)?;
        writeln!(file, "{line}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_append_to_the_per_node_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let tap = TapLog::new(1, IpAddr::from([127, 0, 0, 1]), dir.path()).unwrap();
        tap.record(Direction::Send, &[0x01, 0x02]);
        tap.record(Direction::Recv, &[0x03]);
        let contents = std::fs::read_to_string(dir.path().join("node_1_log")).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("SEND"));
        assert!(lines[1].contains("RECV"));
    }

    #[test]
    fn digest_is_stable_for_the_same_frame() {
        assert_eq!(TapLog::digest_hex(&[1, 2, 3]), TapLog::digest_hex(&[1, 2, 3]));
        assert_ne!(TapLog::digest_hex(&[1, 2, 3]), TapLog::digest_hex(&[1, 2, 4]));
    }
}
