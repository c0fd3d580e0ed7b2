//! Record server binary.
//!
//! Parses CLI arguments, installs a logging subscriber, and runs the
//! server until interrupted.

mod cli;

use std::time::Duration;

use clap::Parser;
use recordwire::{RecordServer, ServerConfig, ServerError};

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    tracing_subscriber::fmt::init();

    let cli = cli::Cli::parse();
    let config = ServerConfig {
        port: cli.port,
        max_payload: cli.max_payload,
        shutdown_grace: Duration::from_secs(cli.shutdown_grace),
    };

    RecordServer::new(config).bind()?.run().await
}
