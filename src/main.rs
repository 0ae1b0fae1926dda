use clap::Parser;
use std::process::ExitCode;
use tiertrader::cli::{run, Cli};

fn main() -> ExitCode {
    run(Cli::parse())
}
