//! drift CLI: offline entity mapping and configuration checks.

use std::process::ExitCode;

use clap::Parser;

use drift::{CliArgs, execute, init_tracing};

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let args = CliArgs::parse();

    match execute(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("drift failed: {e}");
            ExitCode::FAILURE
        }
    }
}
