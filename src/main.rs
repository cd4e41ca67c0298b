#![allow(dead_code)]

mod cmd;
mod config;
mod db;
mod dialect;
mod differ;
mod error;
mod runtime;
mod schema;
mod segment;
mod uri;
mod value;

use clap::Parser;
use cmd::Cli;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = cmd::run(cli) {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
