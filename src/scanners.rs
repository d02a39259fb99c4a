//! Port scans and host sweeps built on [`ScanCoordinator`].

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use tracing::info;

use crate::address_space::AddressSpace;
use crate::error::Result;
use crate::ports::PortSpec;
use crate::probe::{PortProbe, Probe, ReachabilityProbe};
use crate::resolve::{self, Resolver, SystemResolver, Target};
use crate::scanner::{self, ScanCoordinator};

/// TCP connect scan of a port set on one target.
pub struct PortRangeScanner<P = PortProbe, R = SystemResolver> {
    probe: Arc<P>,
    resolver: R,
    coordinator: ScanCoordinator,
}

impl PortRangeScanner {
    pub fn new(probe: PortProbe) -> Self {
        Self::with_parts(probe, SystemResolver)
    }
}

impl<P, R> PortRangeScanner<P, R>
where
    P: Probe<SocketAddr> + 'static,
    R: Resolver,
{
    pub fn with_parts(probe: P, resolver: R) -> Self {
        Self {
            probe: Arc::new(probe),
            resolver,
            coordinator: ScanCoordinator::default(),
        }
    }

    pub fn with_coordinator(mut self, coordinator: ScanCoordinator) -> Self {
        self.coordinator = coordinator;
        self
    }

    pub fn coordinator(&self) -> &ScanCoordinator {
        &self.coordinator
    }

    /// Resolve `target` once. Fails with `UnresolvedTarget` for unknown hostnames.
    pub async fn resolve(&self, target: &Target) -> Result<IpAddr> {
        resolve::resolve_target(&self.resolver, target).await
    }

    /// Open ports on `target`, ascending.
    pub async fn scan(&self, target: &Target, ports: &PortSpec) -> Result<Vec<u16>> {
        let addr = self.resolve(target).await?;
        self.scan_address(addr, ports).await
    }

    /// Open ports on an already resolved address, ascending.
    pub async fn scan_address(&self, addr: IpAddr, ports: &PortSpec) -> Result<Vec<u16>> {
        info!(%addr, ports = ports.len(), "port scan started");
        let units = ports.ports().map(move |port| SocketAddr::new(addr, port));
        let open = self.coordinator.run(units, self.probe.clone()).await?;
        info!(%addr, open = open.len(), "port scan finished");
        Ok(open.into_iter().map(|sa| sa.port()).collect())
    }

    /// Whether a single port is open.
    pub async fn scan_one(&self, target: &Target, port: u16) -> Result<bool> {
        let open = self.scan(target, &PortSpec::single(port)).await?;
        Ok(!open.is_empty())
    }

    /// Scan the same ports on several addresses as one work set.
    ///
    /// Open endpoints come back target-major, then by ascending port, following
    /// the order of `targets`.
    pub async fn scan_many(&self, targets: &[IpAddr], ports: &PortSpec) -> Result<Vec<SocketAddr>> {
        info!(targets = targets.len(), ports = ports.len(), "multi-target port scan started");
        let units = targets
            .iter()
            .flat_map(|&ip| ports.ports().map(move |port| SocketAddr::new(ip, port)));
        let open = self.coordinator.run(units, self.probe.clone()).await?;
        info!(open = open.len(), "multi-target port scan finished");
        Ok(open)
    }
}

/// Ping sweep over the host addresses of a network.
pub struct HostSweepScanner<P = ReachabilityProbe> {
    space: AddressSpace,
    probe: Arc<P>,
    coordinator: ScanCoordinator,
}

impl<P> HostSweepScanner<P>
where
    P: Probe<IpAddr> + 'static,
{
    pub fn new(space: AddressSpace, probe: P) -> Self {
        Self {
            space,
            probe: Arc::new(probe),
            coordinator: ScanCoordinator::default(),
        }
    }

    pub fn with_coordinator(mut self, coordinator: ScanCoordinator) -> Self {
        self.coordinator = coordinator;
        self
    }

    pub fn space(&self) -> AddressSpace {
        self.space
    }

    /// Point the scanner at another network. The whole address space is replaced.
    pub fn set_network(&mut self, space: AddressSpace) {
        self.space = space;
    }

    /// Live hosts in ascending address order. Networks with more than
    /// [`scanner::MAX_WORK_UNITS`] hosts fail with `WorkSetTooLarge`.
    pub async fn scan(&self) -> Result<Vec<IpAddr>> {
        scanner::check_work_size(self.space.size())?;
        info!(network = %self.space.prefix(), hosts = %self.space.size(), "host sweep started");
        let live = self.coordinator.run(self.space.hosts(), self.probe.clone()).await?;
        info!(network = %self.space.prefix(), live = live.len(), "host sweep finished");
        Ok(live)
    }

    /// Whether one address answers.
    pub async fn scan_one(&self, addr: IpAddr) -> Result<bool> {
        let live = self.coordinator.run([addr], self.probe.clone()).await?;
        Ok(!live.is_empty())
    }
}
