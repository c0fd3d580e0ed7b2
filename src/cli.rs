//! Command line interface for the record server binary.
//!
//! Kept free of library imports so the build script can include this file
//! directly when rendering the man page.

use clap::Parser;

/// Default inbound payload limit, the full range of the 2-byte length
/// field.
const DEFAULT_MAX_PAYLOAD: usize = 65_535;

/// Command line arguments for the `recordwire` binary.
#[derive(Debug, Parser)]
#[command(
    name = "recordwire",
    version,
    about = "TCP record server - listens for client connections and echoes records back"
)]
pub struct Cli {
    /// Port number to listen on.
    #[arg(short, long, default_value_t = 4000, value_parser = clap::value_parser!(u16).range(1..))]
    pub port: u16,

    /// Largest inbound payload in bytes before a connection is dropped.
    #[arg(long, default_value_t = DEFAULT_MAX_PAYLOAD)]
    pub max_payload: usize,

    /// Seconds shutdown waits for connections to drain before forcing
    /// teardown.
    #[arg(long, default_value_t = 5)]
    pub shutdown_grace: u64,
}
