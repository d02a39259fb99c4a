//! Probe primitives: one bounded-time check against one unit of work.
//!
//! A `false` outcome means "closed or unreachable" and nothing more. Refused,
//! timed out and filtered are deliberately folded together.

use std::net::{IpAddr, SocketAddr};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::time;
use tracing::trace;

use crate::error::ProbeError;

/// Default bound on a single TCP handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Default wait per echo request.
pub const DEFAULT_PING_WAIT: Duration = Duration::from_secs(1);

/// Slack added on top of the ping tool's own wait before the process is killed.
const PING_GRACE: Duration = Duration::from_secs(1);

/// A bounded check of a single work unit.
///
/// `Err` is reserved for local faults in the probing mechanism itself (the tool
/// cannot be launched, the process cannot be awaited). A remote that does not
/// answer is `Ok(false)`.
#[async_trait]
pub trait Probe<U: Send + 'static>: Send + Sync {
    async fn probe(&self, unit: U) -> Result<bool, ProbeError>;
}

/// TCP connect probe. Open iff the handshake completes within the timeout.
#[derive(Debug, Clone, Copy)]
pub struct PortProbe {
    timeout: Duration,
}

impl PortProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for PortProbe {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

#[async_trait]
impl Probe<SocketAddr> for PortProbe {
    /// Never fails: socket errors of any kind count as a closed port.
    async fn probe(&self, addr: SocketAddr) -> Result<bool, ProbeError> {
        match time::timeout(self.timeout, TcpStream::connect(addr)).await {
            Ok(Ok(_stream)) => Ok(true),
            Ok(Err(e)) => {
                trace!(%addr, error = %e, "connect failed");
                Ok(false)
            }
            Err(_) => {
                trace!(%addr, "connect timed out");
                Ok(false)
            }
        }
    }
}

/// Flag dialect of the system `ping` tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingFlavor {
    /// iputils / busybox: `-c count -q -W seconds`
    Linux,
    /// macOS and the BSDs: `-c count -q -W milliseconds`
    Bsd,
    /// `ping.exe`: `-n count -w milliseconds`
    Windows,
}

/// The ping invocation for this host, chosen once and then reused by every probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingCommand {
    program: String,
    flavor: PingFlavor,
}

impl PingCommand {
    /// Pick the flag dialect from an OS name as reported by `std::env::consts::OS`.
    pub fn for_os(os: &str) -> Self {
        let flavor = match os {
            "windows" => PingFlavor::Windows,
            "macos" | "ios" | "freebsd" | "openbsd" | "netbsd" | "dragonfly" => PingFlavor::Bsd,
            _ => PingFlavor::Linux,
        };
        Self {
            program: "ping".to_string(),
            flavor,
        }
    }

    pub fn system() -> Self {
        Self::for_os(std::env::consts::OS)
    }

    /// Use a different executable with the same flag dialect.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn flavor(&self) -> PingFlavor {
        self.flavor
    }

    pub fn args(&self, target: IpAddr, count: u32, wait: Duration) -> Vec<String> {
        let count = count.max(1).to_string();
        let wait_ms = wait.as_millis().max(1);
        let mut args = match self.flavor {
            PingFlavor::Linux => {
                let secs = wait_ms.div_ceil(1000);
                vec!["-c".into(), count, "-q".into(), "-W".into(), secs.to_string()]
            }
            PingFlavor::Bsd => {
                vec!["-c".into(), count, "-q".into(), "-W".into(), wait_ms.to_string()]
            }
            PingFlavor::Windows => {
                vec!["-n".into(), count, "-w".into(), wait_ms.to_string()]
            }
        };
        args.push(target.to_string());
        args
    }
}

/// Host liveness via the system ping tool. Up iff the tool exits successfully.
#[derive(Debug, Clone)]
pub struct ReachabilityProbe {
    command: PingCommand,
    count: u32,
    wait: Duration,
}

impl ReachabilityProbe {
    pub fn new(command: PingCommand, count: u32, wait: Duration) -> Self {
        Self {
            command,
            count: count.max(1),
            wait,
        }
    }

    pub fn command(&self) -> &PingCommand {
        &self.command
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// Hard limit for one ping run. Saturates for absurd `count`/`wait` values.
    fn deadline(&self) -> Duration {
        self.wait
            .saturating_mul(self.count)
            .saturating_add(PING_GRACE)
    }
}

impl Default for ReachabilityProbe {
    fn default() -> Self {
        Self::new(PingCommand::system(), 1, DEFAULT_PING_WAIT)
    }
}

#[async_trait]
impl Probe<IpAddr> for ReachabilityProbe {
    async fn probe(&self, target: IpAddr) -> Result<bool, ProbeError> {
        let mut child = Command::new(self.command.program())
            .args(self.command.args(target, self.count, self.wait))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ProbeError::Spawn {
                program: self.command.program().to_string(),
                source,
            })?;

        match time::timeout(self.deadline(), child.wait()).await {
            Ok(Ok(status)) => Ok(status.success()),
            Ok(Err(e)) => Err(ProbeError::Wait(e)),
            Err(_) => {
                trace!(%target, "ping did not exit in time");
                // Dropping `child` kills it.
                Ok(false)
            }
        }
    }
}
