use std::process::ExitCode;

use clap::Parser;
use glitchy::cli::{self, CliArgs};
use glitchy::logger;

fn main() -> ExitCode {
    let args = CliArgs::parse();

    // Initialize session log (overwrites previous session log)
    logger::init(args.verbose);

    cli::run(args)
}
