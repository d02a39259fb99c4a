use std::net::IpAddr;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use lan_probe_rs::address_space::{self, AddressSpace};
use lan_probe_rs::config::ScanConfig;
use lan_probe_rs::listener::AckListener;
use lan_probe_rs::ports::{self, PortSpec};
use lan_probe_rs::resolve::Target;
use lan_probe_rs::scanner::ScanCoordinator;
use lan_probe_rs::scanners::{HostSweepScanner, PortRangeScanner};
use lan_probe_rs::server;
use lan_probe_rs::types::{OpenPort, ScanReport};

/// lan-probe-rs: find live hosts on a network and open TCP ports on a target.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "lan-probe-rs",
    version,
    about = "Find live hosts on a network and open TCP ports on a target.",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// TOML file with scan defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Max probes in flight. Computed from the work set size if omitted.
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    /// TCP connect timeout in milliseconds.
    #[arg(long = "timeout-ms", global = true)]
    timeout_ms: Option<u64>,

    /// More log output (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Ping every host address of a network. Without NETWORK, sweeps each local /24.
    Sweep {
        /// CIDR such as 192.168.1.0/24.
        network: Option<String>,

        /// Echo requests per host.
        #[arg(long)]
        count: Option<u32>,
    },

    /// TCP connect scan of one target (defaults to a list of common ports).
    Ports {
        /// IP address or hostname.
        target: String,

        /// Comma-separated ports, e.g. 22,80,443.
        #[arg(long, value_delimiter = ',', conflicts_with_all = ["range", "ports_file"])]
        list: Vec<u32>,

        /// Half-open range LO HI, e.g. `--range 1 1025`.
        #[arg(long, num_args = 2, value_names = ["LO", "HI"], conflicts_with = "ports_file")]
        range: Option<Vec<u32>>,

        /// Ports file (one port or inclusive range per line).
        #[arg(long = "ports-file")]
        ports_file: Option<PathBuf>,
    },

    /// Run the ACK responder for manual testing.
    Listen {
        #[arg(long, default_value = "0.0.0.0:9999")]
        bind: String,
    },

    /// Serve the JSON scan API.
    Serve {
        #[arg(long, default_value = "127.0.0.1:8080")]
        bind: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = match cli.config.as_deref() {
        Some(path) => ScanConfig::load(path)?,
        None => ScanConfig::default(),
    };
    if cli.concurrency.is_some() {
        config.concurrency = cli.concurrency;
    }
    if let Some(ms) = cli.timeout_ms {
        config.timeout_ms = ms;
    }

    match cli.command {
        Command::Sweep { network, count } => {
            if let Some(count) = count {
                config.ping.count = count;
            }
            run_sweep(&config, network.as_deref()).await
        }
        Command::Ports {
            target,
            list,
            range,
            ports_file,
        } => {
            let spec = port_spec(list, range, ports_file)?;
            run_ports(&config, &target, &spec).await
        }
        Command::Listen { bind } => {
            let listener = AckListener::bind(&bind)
                .await
                .with_context(|| format!("failed to bind {bind}"))?;
            println!("ACK listener on {} (Ctrl+C to stop)", listener.local_addr()?);
            listener.serve(cancel_on_ctrl_c()).await?;
            Ok(())
        }
        Command::Serve { bind } => {
            println!("Scan API starting at http://{bind}/api (Ctrl+C to stop)");
            tokio::select! {
                res = server::spawn_server(&bind, config) => res,
                _ = tokio::signal::ctrl_c() => Ok(()),
            }
        }
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// A token cancelled by Ctrl-C, so an interrupted scan reports `Canceled`.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let cancel_ctrlc = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel_ctrlc.cancel();
        }
    });
    cancel
}

fn port_spec(list: Vec<u32>, range: Option<Vec<u32>>, file: Option<PathBuf>) -> Result<PortSpec> {
    if let Some(path) = file {
        return ports::load_ports_from_path(path);
    }
    if let Some(bounds) = range {
        let [lo, hi] = bounds.as_slice() else {
            bail!("--range takes exactly two values");
        };
        return Ok(PortSpec::range(*lo, *hi)?);
    }
    if !list.is_empty() {
        return Ok(PortSpec::list(list)?);
    }
    Ok(ports::default_ports())
}

async fn run_sweep(config: &ScanConfig, network: Option<&str>) -> Result<()> {
    let spaces: Vec<AddressSpace> = match network {
        Some(n) => vec![AddressSpace::parse(n)?],
        None => {
            let detected = address_space::local_networks()
                .context("failed to detect local networks")?;
            if detected.is_empty() {
                bail!("no local IPv4 network found; pass a NETWORK");
            }
            detected.into_iter().map(AddressSpace::new).collect()
        }
    };

    let coordinator = ScanCoordinator::new(config.budget()).with_cancel(cancel_on_ctrl_c());
    let Some((first, rest)) = spaces.split_first() else {
        return Ok(());
    };
    let mut scanner = HostSweepScanner::new(*first, config.reachability_probe())
        .with_coordinator(coordinator);

    for space in std::iter::once(first).chain(rest) {
        scanner.set_network(*space);
        info!(network = %space.prefix(), hosts = %space.size(), "sweeping");
        let live = scanner.scan().await?;
        print_report(&ScanReport::sweep(space.prefix().to_string(), space.size(), live));
    }
    Ok(())
}

async fn run_ports(config: &ScanConfig, target: &str, spec: &PortSpec) -> Result<()> {
    let target: Target = target.parse()?;
    if spec.is_empty() {
        warn!("empty port set, nothing to scan");
    }
    let coordinator = ScanCoordinator::new(config.budget()).with_cancel(cancel_on_ctrl_c());
    let scanner = PortRangeScanner::new(config.port_probe()).with_coordinator(coordinator);

    let address: IpAddr = scanner.resolve(&target).await?;
    let open = scanner.scan_address(address, spec).await?;
    print_report(&ScanReport::ports(target.to_string(), address, spec.len(), &open));
    Ok(())
}

fn print_report(report: &ScanReport) {
    match report {
        ScanReport::Sweep {
            network,
            hosts_scanned,
            live_hosts,
        } => {
            println!(
                "\nLive hosts on {}: {} (scanned: {})",
                network,
                live_hosts.len(),
                hosts_scanned
            );
            for ip in live_hosts {
                println!("  {ip}");
            }
        }
        ScanReport::Ports {
            target,
            address,
            ports_scanned,
            open,
        } => {
            println!(
                "\nOpen ports for {} ({}): {} (scanned: {})",
                target,
                address,
                open.len(),
                ports_scanned
            );
            print_ports_table(open);
        }
    }
}

fn print_ports_table(open: &[OpenPort]) {
    let port_w = 5usize.max("port".len());
    let mut service_w = "service".len();
    for p in open {
        service_w = service_w.max(p.service.len());
    }

    println!(
        "{:>port_w$}  {:<service_w$}",
        "port",
        "service",
        port_w = port_w,
        service_w = service_w
    );
    println!(
        "{:-<port_w$}  {:-<service_w$}",
        "",
        "",
        port_w = port_w,
        service_w = service_w
    );
    for p in open {
        println!(
            "{:>port_w$}  {:<service_w$}",
            p.port,
            p.service,
            port_w = port_w,
            service_w = service_w
        );
    }
}
