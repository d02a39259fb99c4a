use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::ports::service_name;

/// One open port with its well-known service name.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct OpenPort {
    pub port: u16,
    pub service: String,
}

impl From<u16> for OpenPort {
    fn from(port: u16) -> Self {
        Self {
            port,
            service: service_name(port).to_string(),
        }
    }
}

/// Outcome of a completed scan.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScanReport {
    Sweep {
        network: String,
        hosts_scanned: u64,
        live_hosts: Vec<IpAddr>,
    },
    Ports {
        target: String,
        address: IpAddr,
        ports_scanned: u64,
        open: Vec<OpenPort>,
    },
}

impl ScanReport {
    pub fn ports(target: impl Into<String>, address: IpAddr, scanned: usize, open: &[u16]) -> Self {
        ScanReport::Ports {
            target: target.into(),
            address,
            ports_scanned: scanned as u64,
            open: open.iter().copied().map(OpenPort::from).collect(),
        }
    }

    pub fn sweep(network: impl Into<String>, scanned: u128, live_hosts: Vec<IpAddr>) -> Self {
        ScanReport::Sweep {
            network: network.into(),
            hosts_scanned: u64::try_from(scanned).unwrap_or(u64::MAX),
            live_hosts,
        }
    }
}
