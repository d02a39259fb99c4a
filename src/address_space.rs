use std::collections::HashSet;
use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use if_addrs::{get_if_addrs, IfAddr};
use ipnet::{IpNet, Ipv4Net};

use crate::error::{Result, ScanError};

/// A CIDR network. The address must be the network address itself:
/// `192.168.1.77/24` is rejected because host bits are set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NetworkPrefix(IpNet);

impl NetworkPrefix {
    pub fn new(addr: IpAddr, prefix_len: u8) -> Result<Self> {
        IpNet::new(addr, prefix_len)
            .map_err(|e| ScanError::InvalidPrefix {
                input: format!("{addr}/{prefix_len}"),
                reason: e.to_string(),
            })
            .and_then(Self::try_from)
    }

    pub fn network(&self) -> IpAddr {
        self.0.network()
    }

    pub fn prefix_len(&self) -> u8 {
        self.0.prefix_len()
    }

    pub fn is_ipv6(&self) -> bool {
        matches!(self.0, IpNet::V6(_))
    }
}

impl TryFrom<IpNet> for NetworkPrefix {
    type Error = ScanError;

    fn try_from(net: IpNet) -> Result<Self> {
        if net != net.trunc() {
            return Err(ScanError::InvalidPrefix {
                input: net.to_string(),
                reason: "has host bits set".into(),
            });
        }
        Ok(Self(net))
    }
}

impl FromStr for NetworkPrefix {
    type Err = ScanError;

    /// Accepts `a.b.c.d/len`, `x::y/len`, or a bare address (full-length prefix).
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let invalid = |reason: String| ScanError::InvalidPrefix {
            input: s.to_string(),
            reason,
        };

        if s.contains('/') {
            let net: IpNet = s.parse().map_err(|e: ipnet::AddrParseError| invalid(e.to_string()))?;
            return Self::try_from(net);
        }

        let addr: IpAddr = s.parse().map_err(|e: std::net::AddrParseError| invalid(e.to_string()))?;
        let full = if addr.is_ipv4() { 32 } else { 128 };
        Self::new(addr, full)
    }
}

impl fmt::Display for NetworkPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// The usable host addresses of a network prefix, in ascending order.
///
/// IPv4 excludes the network and broadcast addresses; IPv6 excludes only the
/// all-zeros subnet address. Point-to-point and single-host prefixes (IPv4 /31 and
/// /32, IPv6 /127 and /128) have nothing to exclude and yield every address.
///
/// Nothing is cached: [`AddressSpace::hosts`] builds a fresh iterator each call,
/// so the sequence can be re-enumerated with identical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressSpace {
    prefix: NetworkPrefix,
}

impl AddressSpace {
    pub fn new(prefix: NetworkPrefix) -> Self {
        Self { prefix }
    }

    pub fn parse(s: &str) -> Result<Self> {
        s.parse::<NetworkPrefix>().map(Self::new)
    }

    pub fn prefix(&self) -> NetworkPrefix {
        self.prefix
    }

    /// Number of host addresses, computed without enumerating them.
    pub fn size(&self) -> u128 {
        let (first, last) = self.bounds();
        last - first + 1
    }

    pub fn hosts(&self) -> impl Iterator<Item = IpAddr> + Clone + Send + 'static {
        let (first, last) = self.bounds();
        let v6 = self.prefix.is_ipv6();
        (first..=last).map(move |n| {
            if v6 {
                IpAddr::V6(Ipv6Addr::from(n))
            } else {
                IpAddr::V4(Ipv4Addr::from(n as u32))
            }
        })
    }

    /// Inclusive numeric bounds of the usable hosts. Never empty.
    fn bounds(&self) -> (u128, u128) {
        match self.prefix.0 {
            IpNet::V4(net) => {
                let start = u128::from(u32::from(net.network()));
                let end = u128::from(u32::from(net.broadcast()));
                if net.prefix_len() >= 31 {
                    (start, end)
                } else {
                    (start + 1, end - 1)
                }
            }
            IpNet::V6(net) => {
                let start = u128::from(net.network());
                let end = u128::from(net.broadcast());
                if net.prefix_len() >= 127 {
                    (start, end)
                } else {
                    (start + 1, end)
                }
            }
        }
    }
}

impl FromStr for AddressSpace {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Detect local non-loopback IPv4 addresses and widen each to its /24 network.
///
/// For example, an interface IP `192.168.1.42` becomes `192.168.1.0/24`.
/// Duplicates are removed and the result is sorted.
pub fn local_networks() -> io::Result<Vec<NetworkPrefix>> {
    let mut set = HashSet::<NetworkPrefix>::new();
    for iface in get_if_addrs()? {
        if let IfAddr::V4(v4) = iface.addr {
            if v4.ip.is_loopback() {
                continue;
            }
            set.insert(ipv4_to_default_prefix(v4.ip));
        }
    }
    let mut prefixes: Vec<NetworkPrefix> = set.into_iter().collect();
    prefixes.sort();
    Ok(prefixes)
}

/// Convert an IPv4 address into its enclosing /24 network.
pub fn ipv4_to_default_prefix(ip: Ipv4Addr) -> NetworkPrefix {
    let net = Ipv4Net::new(ip, 24).expect("/24 is always valid");
    NetworkPrefix(IpNet::V4(net.trunc()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v4(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn slash_30_excludes_network_and_broadcast() {
        let space = AddressSpace::parse("192.168.0.0/30").unwrap();
        let hosts: Vec<IpAddr> = space.hosts().collect();
        assert_eq!(hosts, vec![v4("192.168.0.1"), v4("192.168.0.2")]);
        assert_eq!(space.size(), 2);
    }

    #[test]
    fn point_to_point_and_single_host_keep_every_address() {
        let p2p: Vec<IpAddr> = AddressSpace::parse("10.0.0.4/31").unwrap().hosts().collect();
        assert_eq!(p2p, vec![v4("10.0.0.4"), v4("10.0.0.5")]);

        let single: Vec<IpAddr> = AddressSpace::parse("10.0.0.9").unwrap().hosts().collect();
        assert_eq!(single, vec![v4("10.0.0.9")]);
    }

    #[test]
    fn ipv6_drops_only_subnet_address() {
        let space = AddressSpace::parse("2001:db8::/126").unwrap();
        let hosts: Vec<IpAddr> = space.hosts().collect();
        let expected: Vec<IpAddr> = ["2001:db8::1", "2001:db8::2", "2001:db8::3"]
            .iter()
            .map(|s| s.parse().unwrap())
            .collect();
        assert_eq!(hosts, expected);
        assert_eq!(space.size(), 3);
    }

    #[test]
    fn size_is_computed_for_huge_spaces() {
        assert_eq!(AddressSpace::parse("0.0.0.0/0").unwrap().size(), (1u128 << 32) - 2);
        assert_eq!(AddressSpace::parse("::/0").unwrap().size(), u128::MAX);
    }

    #[test]
    fn host_bits_are_rejected() {
        for bad in ["192.168.1.77/24", "10.0.0.1/8", "2001:db8::42/64"] {
            let err = bad.parse::<NetworkPrefix>().unwrap_err();
            assert!(err.to_string().contains("host bits"), "{bad}: {err}");
        }
        let ip: IpAddr = "192.168.1.77".parse().unwrap();
        assert!(NetworkPrefix::new(ip, 24).is_err());
        assert_eq!(NetworkPrefix::new(ip, 32).unwrap().to_string(), "192.168.1.77/32");

        let prefix: NetworkPrefix = "192.168.1.0/24".parse().unwrap();
        assert_eq!(prefix.network(), v4("192.168.1.0"));
    }

    #[test]
    fn rejects_malformed_prefixes() {
        for bad in ["", "192.168.1.0/33", "300.1.1.1/24", "fe80::/129", "host.local/24", "10.0.0.0/x"] {
            let err = AddressSpace::parse(bad).unwrap_err();
            assert!(matches!(err, ScanError::InvalidPrefix { .. }), "{bad}: {err}");
        }
    }

    #[test]
    fn default_prefix_from_ipv4() {
        let prefix = ipv4_to_default_prefix(Ipv4Addr::new(10, 1, 2, 3));
        assert_eq!(prefix.to_string(), "10.1.2.0/24");
    }
}
