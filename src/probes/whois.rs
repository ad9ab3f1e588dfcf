//! WHOIS over TCP/43, starting at IANA and following one `refer:` hop to
//! the authoritative registry server.

use super::{OneShotProbe, ProbeContext, ProbeError, ProbeResult};
use crate::task::TaskKind;
use std::io::{Read, Write};
use std::net::{IpAddr, TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

const WHOIS_PORT: u16 = 43;

pub struct WhoisProbe {
    root_server: String,
    port: u16,
}

impl Default for WhoisProbe {
    fn default() -> Self {
        Self::new("whois.iana.org", WHOIS_PORT)
    }
}

impl WhoisProbe {
    pub fn new(root_server: impl Into<String>, port: u16) -> Self {
        Self {
            root_server: root_server.into(),
            port,
        }
    }
}

impl OneShotProbe for WhoisProbe {
    fn run(&self, ctx: &ProbeContext) -> ProbeResult<PathBuf> {
        let host = ctx.host()?;
        let query = registered_domain(&host);
        log::debug!("WHOIS query for {} via {}", query, self.root_server);

        let mut transcript = query_server(&self.root_server, self.port, &query, ctx.timeout)?;
        if let Some(referral) = find_referral(&transcript) {
            if !referral.eq_ignore_ascii_case(&self.root_server) {
                log::debug!("WHOIS referral to {}", referral);
                let answer = query_server(&referral, self.port, &query, ctx.timeout)?;
                transcript = format!("{}\n# {}\n\n{}", transcript, referral, answer);
            }
        }

        ctx.write_artifact(TaskKind::Whois, transcript)
    }
}

/// Registered domain of a host name: its public suffix plus one label.
/// IP addresses and hosts under an unknown suffix are queried as-is.
pub fn registered_domain(host: &str) -> String {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    if host.parse::<IpAddr>().is_ok() {
        return host;
    }
    match psl::domain(host.as_bytes()) {
        Some(domain) if domain.suffix().is_known() => String::from_utf8_lossy(domain.as_bytes()).into_owned(),
        _ => host,
    }
}

fn find_referral(response: &str) -> Option<String> {
    response.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        let key = key.trim().to_ascii_lowercase();
        (key == "refer" || key == "whois")
            .then(|| value.trim().to_string())
            .filter(|v| !v.is_empty())
    })
}

fn query_server(server: &str, port: u16, query: &str, timeout: Duration) -> ProbeResult<String> {
    let addr = (server, port)
        .to_socket_addrs()
        .map_err(|e| ProbeError::Network(format!("cannot resolve {}: {}", server, e)))?
        .next()
        .ok_or_else(|| ProbeError::Network(format!("no address for {}", server)))?;

    let mut stream = TcpStream::connect_timeout(&addr, timeout).map_err(|e| map_io(e, server, timeout))?;
    stream
        .set_read_timeout(Some(timeout))
        .and_then(|_| stream.set_write_timeout(Some(timeout)))
        .map_err(|e| map_io(e, server, timeout))?;

    stream
        .write_all(format!("{}\r\n", query).as_bytes())
        .map_err(|e| map_io(e, server, timeout))?;

    let mut response = Vec::new();
    stream
        .read_to_end(&mut response)
        .map_err(|e| map_io(e, server, timeout))?;
    Ok(String::from_utf8_lossy(&response).into_owned())
}

fn map_io(e: std::io::Error, server: &str, timeout: Duration) -> ProbeError {
    match e.kind() {
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => ProbeError::Timeout(timeout),
        _ => ProbeError::Network(format!("{}: {}", server, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use tempfile::TempDir;

    #[test]
    fn test_registered_domain() {
        assert_eq!(registered_domain("www.example.com"), "example.com");
        assert_eq!(registered_domain("example.com"), "example.com");
        assert_eq!(registered_domain("192.0.2.1"), "192.0.2.1");
    }

    #[test]
    fn test_registered_domain_under_multi_label_suffix() {
        assert_eq!(registered_domain("www.example.co.uk"), "example.co.uk");
        assert_eq!(registered_domain("shop.example.com.au"), "example.com.au");
        assert_eq!(registered_domain("WWW.Example.CO.UK."), "example.co.uk");
        assert_eq!(registered_domain("intranet.corp.zzunlisted"), "intranet.corp.zzunlisted");
    }

    #[test]
    fn test_find_referral() {
        let iana = "% IANA WHOIS server\n\nrefer:        whois.verisign-grs.com\n\ndomain: COM\n";
        assert_eq!(find_referral(iana).as_deref(), Some("whois.verisign-grs.com"));
        assert_eq!(find_referral("domain: COM\n"), None);
    }

    #[test]
    fn test_queries_server_and_writes_transcript() -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let port = listener.local_addr()?.port();
        let server = std::thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut buf = [0u8; 128];
            let n = socket.read(&mut buf).unwrap();
            let query = String::from_utf8_lossy(&buf[..n]).to_string();
            socket
                .write_all(format!("refer: 127.0.0.1\nDomain Name: {}\n", query.trim()).as_bytes())
                .unwrap();
        });

        let dir = TempDir::new()?;
        let ctx = ProbeContext::new(dir.path(), "https://www.example.com/", Duration::from_secs(5));
        let path = WhoisProbe::new("127.0.0.1", port).run(&ctx)?;
        server.join().unwrap();

        assert_eq!(path, dir.path().join("whois.txt"));
        assert!(std::fs::read_to_string(path)?.contains("Domain Name: example.com"));
        Ok(())
    }

    #[test]
    fn test_unreachable_server_is_a_probe_error() -> Result<(), Box<dyn std::error::Error>> {
        // Bind then drop to get a port nobody listens on.
        let port = TcpListener::bind("127.0.0.1:0")?.local_addr()?.port();
        let dir = TempDir::new()?;
        let ctx = ProbeContext::new(dir.path(), "https://example.com/", Duration::from_secs(2));
        let err = WhoisProbe::new("127.0.0.1", port).run(&ctx).unwrap_err();
        assert!(matches!(err, ProbeError::Network(_) | ProbeError::Timeout(_)));
        assert!(!dir.path().join("whois.txt").exists());
        Ok(())
    }
}
