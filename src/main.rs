//! # cfn-deploy CLI
//!
//! This is the binary entry point for the `cfn-deploy` command-line tool.
//!
//! Its primary responsibilities are:
//! - Parsing command-line arguments using `clap`.
//! - Running the requested pipeline job.
//! - Printing the job's exit code as the last line of output and exiting
//!   with it, which is what the CI pipeline reads.
//!
//! The core application logic is defined in the `lib.rs` library crate, ensuring
//! that the binary is a thin wrapper around the reusable library functionality.

mod cli;
mod commands;

use clap::Parser;

fn main() {
    let cli = cli::Cli::parse();
    let code = match cli.execute() {
        Ok(code) => code,
        Err(e) => {
            log::error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            1
        }
    };
    println!("{}", code);
    std::process::exit(code);
}
