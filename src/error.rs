//! Error types for the pipeline simulator.

use std::path::PathBuf;

use thiserror::Error;

/// Rejected configuration.  Raised before any cycle is simulated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("number of device queues must be at least 1")]
    NoQueues,

    #[error("{0} must be at least 1")]
    ZeroDepth(&'static str),

    #[error("sector size {0} is not a non-zero power of two")]
    BadSectorSize(u32),

    #[error("{name} width {bits} is outside {min}..={max} bits")]
    IdWidth {
        name: &'static str,
        bits: u32,
        min: u32,
        max: u32,
    },

    #[error("max_inflight {max_inflight} exceeds the {id_space}-entry request id space")]
    InflightExceedsIdSpace { max_inflight: usize, id_space: usize },

    #[error("{slots} device queue slots exceed the {id_space}-entry operation id space")]
    SlotsExceedOpIdSpace { slots: usize, id_space: usize },

    #[error("clock rate must be positive, got {0} MHz")]
    BadClock(String),

    #[error("device bandwidth must be at least 1 byte per cycle")]
    ZeroBandwidth,

    #[error("read ratio must be within 0.0..=1.0, got {0}")]
    BadReadRatio(String),

    #[error("malformed config section: {0}")]
    Malformed(String),
}

/// Malformed command record, rejected at ingress before it enters the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("command {index}: zero-length transfer at address {address:#x}")]
    ZeroLength { index: usize, address: u64 },

    #[error("command {index}: transfer of {length} bytes at {address:#x} overflows the address space")]
    AddressOverflow {
        index: usize,
        address: u64,
        length: u32,
    },
}

/// Failure to read a command trace.
#[derive(Debug, Error)]
pub enum TraceError {
    #[error("cannot read trace {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("line {line}: {reason}")]
    Parse { line: usize, reason: String },
}

/// Top-level simulator failure.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("rejected command stream: {0}")]
    Command(#[from] CommandError),

    #[error(transparent)]
    Trace(#[from] TraceError),

    #[error("cannot parse config: {0}")]
    Toml(#[from] toml::de::Error),
}
