//! Error types shared by the scanning core.

use std::io;

use thiserror::Error;

/// Errors surfaced by a scan call. Per-probe faults never appear here
/// individually; they are folded into a negative outcome unless every probe failed.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("invalid network prefix `{input}`: {reason}")]
    InvalidPrefix { input: String, reason: String },

    #[error("invalid port specification: {0}")]
    InvalidPort(String),

    #[error("work set of {size} units exceeds the limit of {max}")]
    WorkSetTooLarge { size: u128, max: usize },

    #[error("could not resolve target `{host}`")]
    UnresolvedTarget {
        host: String,
        #[source]
        source: ResolveError,
    },

    #[error("no probe could be attempted ({failed} failed locally)")]
    ProbesUnavailable {
        failed: usize,
        #[source]
        source: ProbeError,
    },

    #[error("scan canceled")]
    Canceled,
}

/// A local fault invoking the probing mechanism itself.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to launch `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("failed waiting for probe process: {0}")]
    Wait(#[source] io::Error),

    #[error("probe task failed: {0}")]
    Task(String),
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("lookup of `{host}` failed: {source}")]
    Lookup {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("`{0}` resolved to no addresses")]
    NoAddresses(String),
}

pub type Result<T, E = ScanError> = std::result::Result<T, E>;
