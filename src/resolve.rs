use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use async_trait::async_trait;
use tokio::net::lookup_host;

use crate::error::{ResolveError, ScanError};

/// A single scan target: an address, or a hostname still to be resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Address(IpAddr),
    Hostname(String),
}

impl FromStr for Target {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ScanError::UnresolvedTarget {
                host: String::new(),
                source: ResolveError::NoAddresses(String::new()),
            });
        }
        Ok(match s.parse::<IpAddr>() {
            Ok(ip) => Target::Address(ip),
            Err(_) => Target::Hostname(s.to_string()),
        })
    }
}

impl From<IpAddr> for Target {
    fn from(ip: IpAddr) -> Self {
        Target::Address(ip)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Address(ip) => write!(f, "{ip}"),
            Target::Hostname(host) => f.write_str(host),
        }
    }
}

/// Hostname lookup used before a port scan builds its work set.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, host: &str) -> Result<IpAddr, ResolveError>;
}

/// Resolves through the operating system. IPv4 answers are preferred.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

#[async_trait]
impl Resolver for SystemResolver {
    async fn resolve(&self, host: &str) -> Result<IpAddr, ResolveError> {
        let addrs: Vec<IpAddr> = lookup_host((host, 0))
            .await
            .map_err(|source| ResolveError::Lookup {
                host: host.to_string(),
                source,
            })?
            .map(|sa| sa.ip())
            .collect();

        addrs
            .iter()
            .find(|ip| ip.is_ipv4())
            .or_else(|| addrs.first())
            .copied()
            .ok_or_else(|| ResolveError::NoAddresses(host.to_string()))
    }
}

/// Turn a target into an address. Hostnames hit the resolver exactly once.
pub async fn resolve_target<R>(resolver: &R, target: &Target) -> Result<IpAddr, ScanError>
where
    R: Resolver + ?Sized,
{
    match target {
        Target::Address(ip) => Ok(*ip),
        Target::Hostname(host) => {
            resolver
                .resolve(host)
                .await
                .map_err(|source| ScanError::UnresolvedTarget {
                    host: host.clone(),
                    source,
                })
        }
    }
}
