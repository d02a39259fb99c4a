use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::probe::{PingCommand, PortProbe, ReachabilityProbe};
use crate::scanner::ConcurrencyBudget;

/// Scan settings, loadable from TOML. Missing keys take the defaults.
///
/// ```toml
/// timeout_ms = 500
/// concurrency = 64
///
/// [ping]
/// count = 2
/// wait_ms = 800
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// TCP connect timeout per port.
    pub timeout_ms: u64,
    /// Fixed in-flight ceiling; `None` sizes it from the work set.
    pub concurrency: Option<usize>,
    pub ping: PingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PingConfig {
    /// Echo requests per host.
    pub count: u32,
    /// Wait per echo request.
    pub wait_ms: u64,
    /// Executable to run instead of `ping`.
    pub program: Option<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 1000,
            concurrency: None,
            ping: PingConfig::default(),
        }
    }
}

impl Default for PingConfig {
    fn default() -> Self {
        Self {
            count: 1,
            wait_ms: 1000,
            program: None,
        }
    }
}

impl ScanConfig {
    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        toml::from_str(s).context("invalid scan configuration")
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("in {}", path.display()))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn budget(&self) -> ConcurrencyBudget {
        self.concurrency.into()
    }

    pub fn port_probe(&self) -> PortProbe {
        PortProbe::new(self.connect_timeout())
    }

    /// Build the reachability probe. The platform ping dialect is decided here,
    /// once, and carried by the probe from then on.
    pub fn reachability_probe(&self) -> ReachabilityProbe {
        let mut command = PingCommand::system();
        if let Some(program) = &self.ping.program {
            command = command.with_program(program.clone());
        }
        ReachabilityProbe::new(
            command,
            self.ping.count,
            Duration::from_millis(self.ping.wait_ms),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let cfg = ScanConfig::from_toml_str("").unwrap();
        assert_eq!(cfg, ScanConfig::default());
        assert_eq!(cfg.budget(), ConcurrencyBudget::Auto);
        assert_eq!(cfg.connect_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn partial_file_overrides_some_keys() {
        let cfg = ScanConfig::from_toml_str(
            r#"
            concurrency = 32

            [ping]
            count = 3
            "#,
        )
        .unwrap();
        assert_eq!(cfg.budget(), ConcurrencyBudget::Fixed(32));
        assert_eq!(cfg.ping.count, 3);
        assert_eq!(cfg.ping.wait_ms, 1000);
        assert_eq!(cfg.reachability_probe().count(), 3);
    }

    #[test]
    fn unknown_types_are_rejected() {
        assert!(ScanConfig::from_toml_str("timeout_ms = \"fast\"").is_err());
    }
}
