//! Command-line interface.

use clap::{Parser, Subcommand};
use snafu::prelude::*;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::Config;
use crate::error::{ConfigError, DriftError, JoinSnafu, WriteOutputSnafu};
use crate::job::write_records;
use crate::mapping::FileSource;

#[derive(Parser, Debug)]
#[command(version, about)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Map an NDJSON entity file to canonical records, one per line.
    Map {
        /// Path to configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Data source code (overrides `data_source` in the config)
        #[arg(short, long, env = "DRIFT_DATA_SOURCE")]
        data_source: Option<String>,

        /// Entity file to map
        #[arg(short, long)]
        input: PathBuf,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Validate a configuration file.
    Check {
        /// Path to configuration file
        #[arg(short, long)]
        config: PathBuf,
    },
}

/// Run the parsed command.
pub async fn execute(args: CliArgs) -> Result<(), DriftError> {
    match args.command {
        Command::Map {
            config,
            data_source,
            input,
            output,
        } => map(config.as_deref(), data_source, input, output).await,
        Command::Check { config } => {
            let parsed = Config::from_file(&config)?;
            info!(
                path = %config.display(),
                primary = %parsed.queue.primary,
                dead_letter = %parsed.queue.dead_letter,
                "Configuration is valid"
            );
            Ok(())
        }
    }
}

async fn map(
    config: Option<&Path>,
    data_source: Option<String>,
    input: PathBuf,
    output: Option<PathBuf>,
) -> Result<(), DriftError> {
    let config = match config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    let code = data_source
        .or(config.data_source)
        .map(|ds| ds.trim().to_uppercase())
        .filter(|ds| !ds.is_empty())
        .ok_or(ConfigError::EmptyDataSource)?;
    let options = config.mapping;

    let report = tokio::task::spawn_blocking(move || {
        let source = FileSource::new(&input);
        let writer: Box<dyn Write> = match &output {
            Some(path) => Box::new(BufWriter::new(
                File::create(path).context(WriteOutputSnafu)?,
            )),
            None => Box::new(BufWriter::new(std::io::stdout().lock())),
        };
        write_records(source, &code, options, writer)
    })
    .await
    .context(JoinSnafu)??;

    info!(
        lines = report.lines,
        records = report.records,
        malformed = report.malformed,
        "Map complete"
    );
    Ok(())
}
