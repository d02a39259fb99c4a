use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use anyhow::Context;

use crate::error::{Result, ScanError};

/// Highest exclusive upper bound a half-open range may have.
const RANGE_END_MAX: u32 = 65_536;

/// Which TCP ports to probe on a target.
///
/// Only [`PortSpec::list`], [`PortSpec::range`] and the ports-file parser build
/// one, so a spec in hand is always valid and ascending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSpec(Repr);

#[derive(Debug, Clone, PartialEq, Eq)]
enum Repr {
    /// Explicit ports, ascending and deduplicated.
    List(Vec<u16>),
    /// Half-open range `[lo, hi)` with `hi <= 65536`.
    Range { lo: u16, hi: u32 },
}

impl PortSpec {
    /// Validate an explicit list. Any value above 65535 rejects the whole list.
    pub fn list<I>(ports: I) -> Result<Self>
    where
        I: IntoIterator<Item = u32>,
    {
        let mut set = BTreeSet::new();
        for p in ports {
            let port = u16::try_from(p)
                .map_err(|_| ScanError::InvalidPort(format!("port out of range: {p}")))?;
            set.insert(port);
        }
        Ok(Self(Repr::List(set.into_iter().collect())))
    }

    /// Validate a half-open range `[lo, hi)`; `hi` may be 65536 to include port 65535.
    pub fn range(lo: u32, hi: u32) -> Result<Self> {
        if hi > RANGE_END_MAX {
            return Err(ScanError::InvalidPort(format!(
                "range end {hi} exceeds {RANGE_END_MAX}"
            )));
        }
        if lo > hi {
            return Err(ScanError::InvalidPort(format!(
                "invalid range [{lo}, {hi}) (start > end)"
            )));
        }
        if lo == hi {
            return Ok(Self(Repr::List(Vec::new())));
        }
        let lo = u16::try_from(lo)
            .map_err(|_| ScanError::InvalidPort(format!("range start out of range: {lo}")))?;
        Ok(Self(Repr::Range { lo, hi }))
    }

    pub fn single(port: u16) -> Self {
        Self(Repr::List(vec![port]))
    }

    pub fn len(&self) -> usize {
        match &self.0 {
            Repr::List(ports) => ports.len(),
            Repr::Range { lo, hi } => hi.saturating_sub(u32::from(*lo)) as usize,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The ports in ascending order. The iterator can be cloned to replay them.
    pub fn ports(&self) -> Ports<'_> {
        Ports(match &self.0 {
            Repr::List(ports) => PortsRepr::List(ports.iter()),
            Repr::Range { lo, hi } => PortsRepr::Range(u32::from(*lo)..*hi),
        })
    }
}

/// Iterator over the ports of a [`PortSpec`].
#[derive(Debug, Clone)]
pub struct Ports<'a>(PortsRepr<'a>);

#[derive(Debug, Clone)]
enum PortsRepr<'a> {
    List(std::slice::Iter<'a, u16>),
    Range(std::ops::Range<u32>),
}

impl Iterator for Ports<'_> {
    type Item = u16;

    fn next(&mut self) -> Option<u16> {
        match &mut self.0 {
            PortsRepr::List(it) => it.next().copied(),
            PortsRepr::Range(it) => it.next().and_then(|p| u16::try_from(p).ok()),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match &self.0 {
            PortsRepr::List(it) => it.size_hint(),
            PortsRepr::Range(it) => it.size_hint(),
        }
    }
}

impl ExactSizeIterator for Ports<'_> {}

/// Parse a ports file into a [`PortSpec`].
///
/// Supported formats per line:
/// - single port number: `80`
/// - inclusive range: `8000-8010`
/// - comments: everything after `#` is ignored
/// - whitespace and blank lines are ignored
pub fn parse_ports_str(s: &str) -> Result<PortSpec> {
    let mut out: Vec<u32> = Vec::new();

    for (idx, raw_line) in s.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.split('#').next().map(str::trim).unwrap_or("");
        if line.is_empty() {
            continue;
        }

        if let Some((a, b)) = line.split_once('-') {
            let start = parse_port_value(a.trim(), line_no)?;
            let end = parse_port_value(b.trim(), line_no)?;
            if start > end {
                return Err(ScanError::InvalidPort(format!(
                    "line {line_no}: invalid range {start}-{end} (start > end)"
                )));
            }
            out.extend(u32::from(start)..=u32::from(end));
            continue;
        }

        out.push(u32::from(parse_port_value(line, line_no)?));
    }

    PortSpec::list(out)
}

/// Load a ports file. Read failures carry the path as context.
pub fn load_ports_from_path(path: impl AsRef<Path>) -> anyhow::Result<PortSpec> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("failed to read ports file: {}", path.as_ref().display()))?;
    let spec = parse_ports_str(&content)
        .with_context(|| format!("invalid ports file: {}", path.as_ref().display()))?;
    Ok(spec)
}

/// A conservative list of commonly used TCP ports.
pub fn default_ports() -> PortSpec {
    const DEFAULT: &[u16] = &[
        20, 21, 22, 23, 25, 53, 69, 80, 110, 123, 135, 139, 143, 161, 179, 389, 443, 445, 465,
        514, 587, 631, 993, 995, 1080, 1433, 1521, 1723, 1883, 2049, 2375, 3000, 3128, 3306,
        3389, 5000, 5432, 5672, 5900, 5984, 6379, 8000, 8008, 8080, 8081, 8443, 8888, 9000,
        9092, 9200, 11211, 27017,
    ];
    PortSpec(Repr::List(DEFAULT.to_vec()))
}

/// Well-known service name for a TCP port, or `"unknown"`.
pub fn service_name(port: u16) -> &'static str {
    match port {
        20 => "ftp-data",
        21 => "ftp",
        22 => "ssh",
        23 => "telnet",
        25 => "smtp",
        38 => "rap",
        53 => "dns",
        69 => "tftp",
        80 => "http",
        110 => "pop3",
        123 => "ntp",
        137 => "netbios-ns",
        138 => "netbios-dgm",
        139 => "netbios-ssn",
        143 => "imap",
        161 => "snmp",
        179 => "bgp",
        194 => "irc",
        443 => "https",
        465 => "smtps",
        514 => "syslog",
        515 => "printer",
        993 => "imaps",
        995 => "pop3s",
        1080 => "socks",
        1433 => "ms-sql-s",
        1434 => "ms-sql-m",
        1723 => "pptp",
        3306 => "mysql",
        3389 => "rdp",
        5432 => "postgresql",
        5900 => "vnc",
        5984 => "couchdb",
        6379 => "redis",
        8080 => "http-alt",
        8443 => "https-alt",
        9000 => "mongodb",
        11211 => "memcached",
        27017 => "mongodb",
        _ => "unknown",
    }
}

fn parse_port_value(s: &str, line_no: usize) -> Result<u16> {
    let val: u32 = s
        .parse()
        .map_err(|e| ScanError::InvalidPort(format!("line {line_no}: invalid port value `{s}`: {e}")))?;
    u16::try_from(val)
        .map_err(|_| ScanError::InvalidPort(format!("line {line_no}: port out of range: {val}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_is_sorted_and_deduplicated() {
        let spec = PortSpec::list([443, 22, 80, 22]).unwrap();
        assert_eq!(spec.ports().collect::<Vec<_>>(), vec![22, 80, 443]);
        assert_eq!(spec.len(), 3);
    }

    #[test]
    fn list_rejects_out_of_range() {
        let err = PortSpec::list([80, 70_000]).unwrap_err();
        assert!(matches!(err, ScanError::InvalidPort(_)));
    }

    #[test]
    fn range_is_half_open() {
        let spec = PortSpec::range(20, 24).unwrap();
        assert_eq!(spec.ports().collect::<Vec<_>>(), vec![20, 21, 22, 23]);

        let top = PortSpec::range(65_534, 65_536).unwrap();
        assert_eq!(top.ports().collect::<Vec<_>>(), vec![65_534, 65_535]);

        assert!(PortSpec::range(10, 10).unwrap().is_empty());
    }

    #[test]
    fn full_range_yields_every_port_once_ascending() {
        let spec = PortSpec::range(0, 65_536).unwrap();
        let ports: Vec<u16> = spec.ports().collect();
        assert_eq!(ports.len(), spec.len());
        assert_eq!(ports.first(), Some(&0));
        assert_eq!(ports.last(), Some(&u16::MAX));
        assert!(ports.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(spec.ports().len(), 65_536);
    }

    #[test]
    fn list_and_range_agree() {
        let list = PortSpec::list(20..24).unwrap();
        let range = PortSpec::range(20, 24).unwrap();
        assert_eq!(list.ports().collect::<Vec<_>>(), range.ports().collect::<Vec<_>>());
    }

    #[test]
    fn range_validation() {
        assert!(PortSpec::range(0, 65_537).is_err());
        assert!(PortSpec::range(100, 50).is_err());
        assert_eq!(PortSpec::range(0, 65_536).unwrap().len(), 65_536);
    }

    #[test]
    fn parse_ranges_and_dedup() {
        let input = "8000-8002\n80\n8001\n";
        let spec = parse_ports_str(input).unwrap();
        assert_eq!(spec.ports().collect::<Vec<_>>(), vec![80, 8000, 8001, 8002]);
    }

    #[test]
    fn parse_with_comments_and_whitespace() {
        let input = r#"
            # common web ports
            80  # http
            443 # https
            8000-8002   # dev servers

            # blank lines and spaces should be fine
        "#;
        let spec = parse_ports_str(input).unwrap();
        assert_eq!(spec.ports().collect::<Vec<_>>(), vec![80, 443, 8000, 8001, 8002]);
    }

    #[test]
    fn parse_reports_line_number() {
        let err = parse_ports_str("22\n70000\n").unwrap_err();
        assert!(err.to_string().contains("line 2"), "{err}");
    }

    #[test]
    fn service_names() {
        assert_eq!(service_name(22), "ssh");
        assert_eq!(service_name(9000), "mongodb");
        assert_eq!(service_name(4444), "unknown");
    }

    #[test]
    fn default_has_common_ports() {
        let d: Vec<u16> = default_ports().ports().collect();
        assert!(d.contains(&80) && d.contains(&443));
        assert!(d.windows(2).all(|w| w[0] < w[1]));
    }
}
