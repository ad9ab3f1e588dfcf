//! NSLOOKUP: A and AAAA queries sent straight to the configured DNS server
//! over UDP (or TCP when configured), rendered as text.

use super::{OneShotProbe, ProbeContext, ProbeError, ProbeResult};
use crate::config::NslookupConfig;
use crate::task::TaskKind;
use std::io::{Read, Write};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpStream, UdpSocket};
use std::path::PathBuf;
use std::time::Duration;

const DNS_PORT: u16 = 53;
const TYPE_A: u16 = 1;
const TYPE_CNAME: u16 = 5;
const TYPE_AAAA: u16 = 28;
const CLASS_IN: u16 = 1;
const FLAG_TC: u16 = 0x0200;
const MAX_LABEL_LEN: usize = 63;
const MAX_NAME_LEN: usize = 253;

pub struct NslookupProbe {
    config: NslookupConfig,
}

impl NslookupProbe {
    pub fn new(config: NslookupConfig) -> Self {
        Self { config }
    }

    fn server_addr(&self) -> ProbeResult<SocketAddr> {
        if let Ok(addr) = self.config.dns_server.parse::<SocketAddr>() {
            return Ok(addr);
        }
        self.config
            .dns_server
            .parse::<IpAddr>()
            .map(|ip| SocketAddr::new(ip, DNS_PORT))
            .map_err(|_| ProbeError::Unsupported(format!("invalid DNS server '{}'", self.config.dns_server)))
    }
}

impl OneShotProbe for NslookupProbe {
    fn run(&self, ctx: &ProbeContext) -> ProbeResult<PathBuf> {
        let host = ctx.host()?;
        let server = self.server_addr()?;

        let mut output = format!("Server:\t\t{}\nAddress:\t{}\n\n", server.ip(), server);
        let mut answered = false;
        for qtype in [TYPE_A, TYPE_AAAA] {
            let query = build_query(query_id(qtype), &host, qtype)?;
            let response = if self.config.tcp {
                exchange_tcp(server, &query, ctx.timeout)?
            } else {
                let reply = exchange_udp(server, &query, ctx.timeout)?;
                if is_truncated(&reply) {
                    log::debug!("Truncated UDP answer for {}, retrying over TCP", host);
                    exchange_tcp(server, &query, ctx.timeout)?
                } else {
                    reply
                }
            };
            let answers = parse_response(&response)?;
            for answer in &answers {
                if self.config.verbose {
                    output.push_str(&format!("{}\t{}\tIN\t{}\n", answer.name, answer.ttl, answer.data));
                } else if let RecordData::Address(ip) = &answer.data {
                    output.push_str(&format!("Name:\t{}\nAddress: {}\n", answer.name, ip));
                }
            }
            answered |= !answers.is_empty();
        }

        if !answered {
            output.push_str(&format!("*** No address records found for {}\n", host));
        }
        ctx.write_artifact(TaskKind::Nslookup, output)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecordData {
    Address(IpAddr),
    Alias(String),
    Other { rtype: u16, length: usize },
}

impl std::fmt::Display for RecordData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordData::Address(IpAddr::V4(ip)) => write!(f, "A\t{}", ip),
            RecordData::Address(IpAddr::V6(ip)) => write!(f, "AAAA\t{}", ip),
            RecordData::Alias(name) => write!(f, "CNAME\t{}", name),
            RecordData::Other { rtype, length } => write!(f, "TYPE{}\t({} bytes)", rtype, length),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub name: String,
    pub ttl: u32,
    pub data: RecordData,
}

fn query_id(qtype: u16) -> u16 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    (nanos as u16) ^ (std::process::id() as u16) ^ qtype
}

/// Standard recursive query for `name`. Names that do not fit DNS label or
/// name limits are rejected.
pub fn build_query(id: u16, name: &str, qtype: u16) -> ProbeResult<Vec<u8>> {
    let name = name.trim_end_matches('.');
    if name.len() > MAX_NAME_LEN {
        return Err(ProbeError::Unsupported(format!("name longer than {} bytes: {}", MAX_NAME_LEN, name)));
    }
    let mut packet = Vec::with_capacity(512);
    packet.extend_from_slice(&id.to_be_bytes());
    packet.extend_from_slice(&0x0100u16.to_be_bytes()); // RD
    packet.extend_from_slice(&1u16.to_be_bytes()); // QDCOUNT
    packet.extend_from_slice(&[0, 0, 0, 0, 0, 0]); // AN/NS/AR
    for label in name.split('.').filter(|l| !l.is_empty()) {
        let bytes = label.as_bytes();
        if bytes.len() > MAX_LABEL_LEN {
            return Err(ProbeError::Unsupported(format!(
                "label longer than {} bytes in {}",
                MAX_LABEL_LEN, name
            )));
        }
        packet.push(bytes.len() as u8);
        packet.extend_from_slice(bytes);
    }
    packet.push(0);
    packet.extend_from_slice(&qtype.to_be_bytes());
    packet.extend_from_slice(&CLASS_IN.to_be_bytes());
    Ok(packet)
}

/// Whether the server cut the answer short (TC bit).
fn is_truncated(packet: &[u8]) -> bool {
    read_u16(packet, 2).is_some_and(|flags| flags & FLAG_TC != 0)
}

fn exchange_udp(server: SocketAddr, query: &[u8], timeout: Duration) -> ProbeResult<Vec<u8>> {
    let bind: SocketAddr = if server.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let socket = UdpSocket::bind(bind).map_err(|e| ProbeError::Network(e.to_string()))?;
    socket
        .set_read_timeout(Some(timeout))
        .map_err(|e| ProbeError::Network(e.to_string()))?;
    socket
        .send_to(query, server)
        .map_err(|e| ProbeError::Network(format!("{}: {}", server, e)))?;

    let mut buf = vec![0u8; 4096];
    loop {
        let (n, from) = socket.recv_from(&mut buf).map_err(|e| match e.kind() {
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => ProbeError::Timeout(timeout),
            _ => ProbeError::Network(format!("{}: {}", server, e)),
        })?;
        // Ignore stray datagrams that do not answer our query id.
        if from.ip() == server.ip() && n >= 2 && buf[..2] == query[..2] {
            buf.truncate(n);
            return Ok(buf);
        }
    }
}

fn exchange_tcp(server: SocketAddr, query: &[u8], timeout: Duration) -> ProbeResult<Vec<u8>> {
    let network = |e: std::io::Error| match e.kind() {
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => ProbeError::Timeout(timeout),
        _ => ProbeError::Network(format!("{}: {}", server, e)),
    };
    let mut stream = TcpStream::connect_timeout(&server, timeout).map_err(network)?;
    stream.set_read_timeout(Some(timeout)).map_err(network)?;

    let mut framed = (query.len() as u16).to_be_bytes().to_vec();
    framed.extend_from_slice(query);
    stream.write_all(&framed).map_err(network)?;

    let mut len = [0u8; 2];
    stream.read_exact(&mut len).map_err(network)?;
    let mut response = vec![0u8; u16::from_be_bytes(len) as usize];
    stream.read_exact(&mut response).map_err(network)?;
    Ok(response)
}

/// Parse the answer section of a DNS response.
pub fn parse_response(packet: &[u8]) -> ProbeResult<Vec<Answer>> {
    let malformed = || ProbeError::Network("malformed DNS response".to_string());
    if packet.len() < 12 {
        return Err(malformed());
    }

    let flags = read_u16(packet, 2).ok_or_else(malformed)?;
    let rcode = flags & 0x000F;
    match rcode {
        0 => {}
        3 => return Ok(Vec::new()), // NXDOMAIN
        code => return Err(ProbeError::Network(format!("DNS server answered with rcode {}", code))),
    }

    let qdcount = read_u16(packet, 4).ok_or_else(malformed)?;
    let ancount = read_u16(packet, 6).ok_or_else(malformed)?;

    let mut offset = 12;
    for _ in 0..qdcount {
        let (_, next) = read_name(packet, offset).ok_or_else(malformed)?;
        offset = next + 4;
    }

    let mut answers = Vec::with_capacity(ancount as usize);
    for _ in 0..ancount {
        let (name, next) = read_name(packet, offset).ok_or_else(malformed)?;
        let rtype = read_u16(packet, next).ok_or_else(malformed)?;
        let ttl = read_u32(packet, next + 4).ok_or_else(malformed)?;
        let rdlength = read_u16(packet, next + 8).ok_or_else(malformed)? as usize;
        let rdata_start = next + 10;
        let rdata = packet.get(rdata_start..rdata_start + rdlength).ok_or_else(malformed)?;

        let data = match (rtype, rdlength) {
            (TYPE_A, 4) => RecordData::Address(IpAddr::V4(Ipv4Addr::new(rdata[0], rdata[1], rdata[2], rdata[3]))),
            (TYPE_AAAA, 16) => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(rdata);
                RecordData::Address(IpAddr::V6(Ipv6Addr::from(octets)))
            }
            (TYPE_CNAME, _) => {
                let (alias, _) = read_name(packet, rdata_start).ok_or_else(malformed)?;
                RecordData::Alias(alias)
            }
            (rtype, length) => RecordData::Other { rtype, length },
        };

        answers.push(Answer { name, ttl, data });
        offset = rdata_start + rdlength;
    }
    Ok(answers)
}

fn read_u16(packet: &[u8], offset: usize) -> Option<u16> {
    let bytes = packet.get(offset..offset + 2)?;
    Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}

fn read_u32(packet: &[u8], offset: usize) -> Option<u32> {
    let bytes = packet.get(offset..offset + 4)?;
    Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Read a possibly compressed name. Returns the name and the offset just
/// past it in the original position.
fn read_name(packet: &[u8], start: usize) -> Option<(String, usize)> {
    let mut labels = Vec::new();
    let mut offset = start;
    let mut end = None;
    // Bounds pointer chains so a malicious loop cannot spin forever.
    for _ in 0..64 {
        let len = *packet.get(offset)? as usize;
        if len == 0 {
            let name = if labels.is_empty() { ".".to_string() } else { labels.join(".") };
            return Some((name, end.unwrap_or(offset + 1)));
        }
        if len & 0xC0 == 0xC0 {
            let pointer = (read_u16(packet, offset)? & 0x3FFF) as usize;
            end.get_or_insert(offset + 2);
            offset = pointer;
            continue;
        }
        let label = packet.get(offset + 1..offset + 1 + len)?;
        labels.push(String::from_utf8_lossy(label).into_owned());
        offset += 1 + len;
    }
    None
}
