//! Library crate for lan-probe-rs: bounded concurrent host discovery and TCP port scanning.
pub mod address_space;
pub mod config;
pub mod error;
pub mod listener;
pub mod ports;
pub mod probe;
pub mod resolve;
pub mod scanner;
pub mod scanners;
pub mod server;
pub mod types;

pub use error::{ProbeError, ResolveError, ScanError};
