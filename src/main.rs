//! xdeps CLI entry point
//!
//! Parses arguments, sets up logging, runs the batch and turns a failure
//! into a single `ERR` line on stderr with exit status 1.

use clap::Parser;
use colored::Colorize;
use xdeps_cli::cli;

#[tokio::main]
async fn main() {
    let cli = cli::Cli::parse();
    cli.init_logging();

    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    if let Err(e) = cli.execute().await {
        eprintln!("{} {e:#}", "ERR".red().bold());
        std::process::exit(1);
    }
}
