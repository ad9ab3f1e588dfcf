//! HTTP response headers of the target URL.

use super::{OneShotProbe, ProbeContext, ProbeError, ProbeResult};
use crate::task::TaskKind;
use reqwest::blocking::{Client, Response};
use std::path::PathBuf;
use std::time::Duration;

pub struct HeadersProbe;

pub(crate) fn http_client(timeout: Duration) -> ProbeResult<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("freezer/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ProbeError::Network(e.to_string()))
}

pub(crate) fn map_reqwest(e: reqwest::Error, timeout: Duration) -> ProbeError {
    if e.is_timeout() {
        ProbeError::Timeout(timeout)
    } else {
        ProbeError::Network(e.to_string())
    }
}

/// Status line followed by one `name: value` line per header.
pub fn render_headers(response: &Response) -> String {
    let mut out = format!("{:?} {}\n", response.version(), response.status());
    for (name, value) in response.headers() {
        out.push_str(&format!("{}: {}\n", name, String::from_utf8_lossy(value.as_bytes())));
    }
    out
}

impl OneShotProbe for HeadersProbe {
    fn run(&self, ctx: &ProbeContext) -> ProbeResult<PathBuf> {
        let client = http_client(ctx.timeout)?;
        let response = client
            .get(&ctx.url)
            .send()
            .map_err(|e| map_reqwest(e, ctx.timeout))?;
        log::debug!("{} answered {}", ctx.url, response.status());
        ctx.write_artifact(TaskKind::Headers, render_headers(&response))
    }
}
