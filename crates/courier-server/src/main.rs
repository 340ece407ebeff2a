// SPDX-License-Identifier: MIT OR Apache-2.0
//! Stock worker binary: runs a Courier service exposing only the
//! default `introspect` and `status` actions. Useful for validating
//! broker wiring and settings before a real service binary exists;
//! services with their own actions link `courier-server` and call
//! [`courier_server::cli::run_from_args`] themselves.

#![deny(unsafe_code)]

use clap::Parser;
use courier_server::cli::{run_from_args, ServerArgs};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("courier=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = ServerArgs::parse();
    let code = run_from_args(args, Vec::new(), Vec::new(), None).await;
    std::process::exit(code);
}
