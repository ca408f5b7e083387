//! Command line surface.

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use biolat_common::{DEFAULT_DISPLAY_SLOTS, LATENCY_SLOTS};
use clap::{Parser, ValueEnum};
use thiserror::Error;

/// Longest accepted reporting interval, in seconds.
pub const MAX_INTERVAL_SECS: u64 = 60;

/// Where `cargo build --release` leaves the kernel object.
pub const DEFAULT_OBJECT_PATH: &str = "biolat-ebpf/target/bpfel-unknown-none/release/biolat";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IntervalError {
    #[error("{0:?} is not a whole number of seconds")]
    NotANumber(String),

    #[error("interval {0} is out of range (1..=60 seconds)")]
    OutOfRange(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Aligned table with a bar per slot
    Text,
    /// One JSON object per report
    Json,
}

/// Block I/O latency histogram, printed every INTERVAL seconds
#[derive(Debug, Parser)]
#[command(name = "biolat", version)]
pub struct Cli {
    /// Reporting interval in whole seconds (1-60)
    #[arg(value_name = "INTERVAL", value_parser = parse_interval, allow_hyphen_values = true)]
    pub interval: Duration,

    /// Compiled eBPF object holding the two block tracepoint handlers
    #[arg(long, env = "BIOLAT_OBJECT", default_value = DEFAULT_OBJECT_PATH)]
    pub object: PathBuf,

    /// Number of latency slots printed per report
    #[arg(
        long,
        default_value_t = DEFAULT_DISPLAY_SLOTS,
        value_parser = clap::value_parser!(u32).range(1..=LATENCY_SLOTS as i64)
    )]
    pub display_buckets: u32,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Serve Prometheus metrics for the last interval on this address
    #[arg(long)]
    pub metrics_addr: Option<SocketAddr>,
}

/// Accepts only plain decimal digits, then checks `1..=MAX_INTERVAL_SECS`.
pub fn parse_interval(raw: &str) -> Result<Duration, IntervalError> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(IntervalError::NotANumber(raw.to_owned()));
    }

    // Digits only, so a parse failure can only be overflow.
    let secs: u64 = raw
        .parse()
        .map_err(|_| IntervalError::OutOfRange(raw.to_owned()))?;
    if secs == 0 || secs > MAX_INTERVAL_SECS {
        return Err(IntervalError::OutOfRange(raw.to_owned()));
    }

    Ok(Duration::from_secs(secs))
}
