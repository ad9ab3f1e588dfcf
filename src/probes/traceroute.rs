//! Route to the target host, via the platform's traceroute tool.

use super::{OneShotProbe, ProbeContext, ProbeError, ProbeResult};
use crate::task::TaskKind;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;

pub struct TracerouteProbe {
    max_hops: u8,
}

impl TracerouteProbe {
    pub fn new(max_hops: u8) -> Self {
        Self { max_hops: max_hops.max(1) }
    }

    /// Program and arguments for the current platform.
    pub fn command_line(&self, host: &str, timeout: Duration) -> Vec<String> {
        let hops = self.max_hops.to_string();
        if cfg!(windows) {
            let wait_ms = timeout.as_millis().max(1).to_string();
            vec!["tracert".into(), "-h".into(), hops, "-w".into(), wait_ms, host.into()]
        } else {
            let wait_secs = timeout.as_secs().max(1).to_string();
            vec!["traceroute".into(), "-m".into(), hops, "-w".into(), wait_secs, host.into()]
        }
    }
}

impl OneShotProbe for TracerouteProbe {
    fn run(&self, ctx: &ProbeContext) -> ProbeResult<PathBuf> {
        let host = ctx.host()?;
        let args = self.command_line(&host, ctx.timeout);
        log::debug!("Running {:?}", args);

        let output = Command::new(&args[0])
            .args(&args[1..])
            .stdin(Stdio::null())
            .output()
            .map_err(|e| ProbeError::Command {
                command: args[0].clone(),
                message: e.to_string(),
            })?;

        // A route that stops short is still evidence; only an empty run fails.
        if output.stdout.is_empty() {
            return Err(ProbeError::Command {
                command: args[0].clone(),
                message: format!(
                    "{}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        ctx.write_artifact(TaskKind::Traceroute, &output.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_line_carries_hops_and_host() {
        let args = TracerouteProbe::new(22).command_line("example.com", Duration::from_secs(3));
        assert_eq!(args.last().map(String::as_str), Some("example.com"));
        assert!(args.contains(&"22".to_string()));
        if cfg!(windows) {
            assert!(args.contains(&"3000".to_string()));
        } else {
            assert_eq!(args[0], "traceroute");
            assert!(args.contains(&"3".to_string()));
        }
    }

    #[test]
    fn test_zero_hops_is_clamped() {
        let args = TracerouteProbe::new(0).command_line("example.com", Duration::from_millis(10));
        assert_eq!(args[2], "1");
    }
}
