//! Syndicate CLI - create and govern a party from the command line.
//!
//! State lives in a data directory; every command loads it, applies one
//! operation and writes it back.

pub mod commands;
pub mod config;
pub mod output;
pub mod state;
pub mod telemetry;

use clap::Parser;

fn main() {
    let cli = commands::Cli::parse();

    let logging = commands::resolve_logging(&cli);
    if let Err(e) = telemetry::init(&logging) {
        output::print_error(&format!("Logging disabled: {}", e));
    }

    if let Err(e) = commands::execute(cli) {
        output::print_error(&format!("Error: {:#}", e));
        std::process::exit(1);
    }
}
