//! Scriptorium CLI entry point
//!
//! Thin composition layer: parse arguments, initialize logging, route the
//! command, and map errors to a non-zero exit.

use clap::Parser;
use tracing::error;

use scriptorium::cli::{execute_command, Cli, Command};
use scriptorium::logging;
use scriptorium::paths::ManagedPaths;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_dir = std::env::current_dir()
        .ok()
        .map(|repo| ManagedPaths::for_repo(&repo).logs());
    logging::init_logging(cli.verbose, log_dir.as_deref());

    let command = match (cli.init, cli.command) {
        (true, _) => Command::Init,
        (false, Some(command)) => command,
        (false, None) => {
            eprintln!("No command given; try `scriptorium --help`.");
            std::process::exit(2);
        }
    };

    if let Err(e) = execute_command(command).await {
        error!("{e:#}");
        std::process::exit(1);
    }
}
