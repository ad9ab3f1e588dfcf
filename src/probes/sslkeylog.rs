//! TLS key log snapshot. Browsers append session secrets to the file named by
//! `SSLKEYLOGFILE`; a copy next to the packet capture lets it be decrypted.

use super::{OneShotProbe, ProbeContext, ProbeError, ProbeResult};
use crate::task::TaskKind;
use std::path::PathBuf;

pub struct SslKeylogProbe {
    source: Option<PathBuf>,
}

impl SslKeylogProbe {
    pub fn new(source: Option<PathBuf>) -> Self {
        Self { source }
    }
}

impl OneShotProbe for SslKeylogProbe {
    fn run(&self, ctx: &ProbeContext) -> ProbeResult<PathBuf> {
        let source = self
            .source
            .clone()
            .or_else(|| std::env::var_os("SSLKEYLOGFILE").map(PathBuf::from))
            .ok_or_else(|| ProbeError::Unsupported("SSLKEYLOGFILE is not set".to_string()))?;

        let target = ctx.artifact_path(TaskKind::SslKeylog);
        std::fs::copy(&source, &target).map_err(|e| ProbeError::io(e, &source))?;
        Ok(target)
    }
}
