//! Trusted time for the report, from an SNTP server (RFC 4330).
//!
//! The socket is connected to the server so datagrams from any other source
//! are dropped, and a reply only counts if it echoes our transmit timestamp
//! as its originate timestamp.

use crate::errors::{FreezerError, FreezerResult};
use chrono::{DateTime, TimeZone, Utc};
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;

const NTP_PORT: u16 = 123;
const PACKET_LEN: usize = 48;
/// Seconds between the NTP era (1900) and the Unix epoch.
const NTP_UNIX_OFFSET: u64 = 2_208_988_800;

/// A source of time more trustworthy than the local clock.
pub trait TimeAuthority: Send + Sync {
    fn now(&self, server: &str) -> FreezerResult<DateTime<Utc>>;
}

pub struct SntpClock {
    timeout: Duration,
}

impl SntpClock {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl TimeAuthority for SntpClock {
    fn now(&self, server: &str) -> FreezerResult<DateTime<Utc>> {
        let ntp_err = |message: String| FreezerError::external(format!("NTP {}", server), message);

        let addr = resolve(server).ok_or_else(|| ntp_err("cannot resolve server".to_string()))?;
        let bind: SocketAddr = if addr.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(bind).map_err(|e| ntp_err(e.to_string()))?;
        socket.connect(addr).map_err(|e| ntp_err(e.to_string()))?;
        socket
            .set_read_timeout(Some(self.timeout))
            .map_err(|e| ntp_err(e.to_string()))?;

        let originate = ntp_timestamp(Utc::now());
        let mut request = [0u8; PACKET_LEN];
        request[0] = 0x1B; // LI 0, version 3, client mode
        request[40..48].copy_from_slice(&originate);
        socket.send(&request).map_err(|e| ntp_err(e.to_string()))?;

        let mut response = [0u8; PACKET_LEN];
        let n = socket.recv(&mut response).map_err(|e| ntp_err(e.to_string()))?;
        parse_reply(&response[..n], &originate).map_err(ntp_err)
    }
}

/// `time` in the 64-bit NTP timestamp format.
fn ntp_timestamp(time: DateTime<Utc>) -> [u8; 8] {
    let seconds = (time.timestamp() as u64).wrapping_add(NTP_UNIX_OFFSET) as u32;
    let fraction = ((u64::from(time.timestamp_subsec_nanos()) << 32) / 1_000_000_000) as u32;
    let mut out = [0u8; 8];
    out[..4].copy_from_slice(&seconds.to_be_bytes());
    out[4..].copy_from_slice(&fraction.to_be_bytes());
    out
}

fn resolve(server: &str) -> Option<SocketAddr> {
    if let Ok(addr) = server.parse::<SocketAddr>() {
        return Some(addr);
    }
    (server, NTP_PORT).to_socket_addrs().ok()?.next()
}

/// Transmit timestamp of a server reply to the request sent with
/// `originate` as its transmit timestamp.
pub fn parse_reply(packet: &[u8], originate: &[u8; 8]) -> Result<DateTime<Utc>, String> {
    if packet.len() < PACKET_LEN {
        return Err(format!("short reply ({} bytes)", packet.len()));
    }
    if packet[24..32] != originate[..] {
        return Err("reply does not answer our request".to_string());
    }
    let mode = packet[0] & 0x07;
    if mode != 4 && mode != 5 {
        return Err(format!("unexpected mode {}", mode));
    }
    if packet[1] == 0 {
        return Err("kiss-of-death reply".to_string());
    }

    let seconds = u64::from(u32::from_be_bytes([packet[40], packet[41], packet[42], packet[43]]));
    let fraction = u64::from(u32::from_be_bytes([packet[44], packet[45], packet[46], packet[47]]));
    let unix = seconds
        .checked_sub(NTP_UNIX_OFFSET)
        .ok_or_else(|| "timestamp before the Unix epoch".to_string())?;
    let nanos = ((fraction * 1_000_000_000) >> 32) as u32;

    Utc.timestamp_opt(unix as i64, nanos)
        .single()
        .ok_or_else(|| "timestamp out of range".to_string())
}
