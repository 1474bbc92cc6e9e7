#![forbid(unsafe_code)]

//! mresource CLI entry point.

use std::process::ExitCode;

use clap::Parser;
use mresource::core::errors::ExitReason;

mod cli_app;

fn main() -> ExitCode {
    let args = match cli_app::Cli::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            // --help and --version come through here too.
            return if e.use_stderr() {
                ExitCode::from(ExitReason::ArgumentError.code())
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    match cli_app::run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", cli_app::render_error(&e));
            ExitCode::from(e.exit_code())
        }
    }
}
