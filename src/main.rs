#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use clap::Parser;
use freightdesk_lib::Cli;
use std::process::ExitCode;

fn main() -> ExitCode {
    freightdesk_lib::run(Cli::parse())
}
