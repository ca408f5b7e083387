use std::{net::SocketAddr, path::PathBuf};

use thiserror::Error;

/// Anything that stops monitoring from starting. All of these are fatal.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("failed to load eBPF object {}", .path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: aya::EbpfError,
    },

    #[error("failed to read kernel BTF")]
    Btf(#[from] aya::BtfError),

    #[error("program {0} not found in eBPF object")]
    MissingProgram(&'static str),

    #[error("failed to attach program {name}")]
    Attach {
        name: &'static str,
        #[source]
        source: aya::programs::ProgramError,
    },

    #[error("map {0} not found in eBPF object")]
    MissingMap(&'static str),

    #[error("failed to open map {name}")]
    Map {
        name: &'static str,
        #[source]
        source: aya::maps::MapError,
    },

    #[error("metrics registry error: {0}")]
    Registry(#[from] prometheus::Error),

    #[error("failed to serve metrics on {addr}: {reason}")]
    Metrics { addr: SocketAddr, reason: String },
}
