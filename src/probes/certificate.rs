//! Server certificate as presented during the TLS handshake, saved as PEM.

use super::headers::map_reqwest;
use super::{OneShotProbe, ProbeContext, ProbeError, ProbeResult};
use crate::task::TaskKind;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::blocking::Client;
use reqwest::tls::TlsInfo;
use reqwest::Url;
use std::path::PathBuf;

const HTTPS_PORT: u16 = 443;

#[derive(Default)]
pub struct CertificateProbe;

impl CertificateProbe {
    /// Certificates are fetched over https on the host's port, or 443.
    fn endpoint(url: &str) -> ProbeResult<Url> {
        let mut parsed = Url::parse(url).map_err(|e| ProbeError::Network(e.to_string()))?;
        if parsed.scheme() != "https" {
            let port = parsed.port().unwrap_or(HTTPS_PORT);
            parsed
                .set_scheme("https")
                .map_err(|_| ProbeError::Unsupported(format!("cannot fetch a certificate for {}", url)))?;
            let _ = parsed.set_port(if port == 80 { None } else { Some(port) });
        }
        Ok(parsed)
    }
}

/// DER bytes as a PEM block with 64-column lines.
pub fn der_to_pem(der: &[u8]) -> String {
    let encoded = STANDARD.encode(der);
    let mut pem = String::from("-----BEGIN CERTIFICATE-----\n");
    for chunk in encoded.as_bytes().chunks(64) {
        pem.push_str(&String::from_utf8_lossy(chunk));
        pem.push('\n');
    }
    pem.push_str("-----END CERTIFICATE-----\n");
    pem
}

impl OneShotProbe for CertificateProbe {
    fn run(&self, ctx: &ProbeContext) -> ProbeResult<PathBuf> {
        let endpoint = Self::endpoint(&ctx.url)?;
        // The certificate is evidence whether or not it validates.
        let client = Client::builder()
            .timeout(ctx.timeout)
            .tls_info(true)
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| ProbeError::Network(e.to_string()))?;

        let response = client
            .get(endpoint.clone())
            .send()
            .map_err(|e| map_reqwest(e, ctx.timeout))?;

        let der = response
            .extensions()
            .get::<TlsInfo>()
            .and_then(|info| info.peer_certificate())
            .map(<[u8]>::to_vec)
            .ok_or_else(|| ProbeError::Network(format!("{} presented no certificate", endpoint)))?;

        ctx.write_artifact(TaskKind::SslCertificate, der_to_pem(&der))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pem_wraps_at_64_columns() {
        let pem = der_to_pem(&[0xAB; 100]);
        let lines: Vec<&str> = pem.lines().collect();
        assert_eq!(lines.first(), Some(&"-----BEGIN CERTIFICATE-----"));
        assert_eq!(lines.last(), Some(&"-----END CERTIFICATE-----"));
        assert!(lines[1..lines.len() - 1].iter().all(|l| l.len() <= 64));
        assert_eq!(lines[1].len(), 64);
    }

    #[test]
    fn test_endpoint_upgrades_to_https() {
        let url = CertificateProbe::endpoint("http://example.com/page").unwrap();
        assert_eq!(url.as_str(), "https://example.com/page");
        let url = CertificateProbe::endpoint("https://example.com:8443/").unwrap();
        assert_eq!(url.port(), Some(8443));
    }
}
