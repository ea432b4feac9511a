use std::fs::File;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use csv_migrator_rs::join::{JoinOptions, join_readers};
use csv_migrator_rs::logger;

/// Sort-merge outer join of two sorted CSV files on their common columns.
#[derive(Parser)]
#[command(name = "csvjoin", version)]
struct Cli {
    /// Source CSV file.
    source: PathBuf,

    /// Target CSV file (defaults to stdin).
    #[arg(long = "to")]
    to: Option<PathBuf>,

    /// Output CSV file (defaults to stdout).
    #[arg(long = "as")]
    output: Option<PathBuf>,

    /// Source-side columns to include (comma-separated; default all).
    #[arg(long, value_delimiter = ',')]
    fields: Option<Vec<String>>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            logger::log_error(&format!("csvjoin: {err}"));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> csv_migrator_rs::Result<()> {
    let source = File::open(&cli.source)?;
    let target: Box<dyn Read> = match &cli.to {
        Some(path) => Box::new(File::open(path)?),
        None => Box::new(io::stdin().lock()),
    };
    let output: Box<dyn Write> = match &cli.output {
        Some(path) => Box::new(File::create(path)?),
        None => Box::new(io::stdout().lock()),
    };
    let options = JoinOptions {
        source_fields: cli.fields,
        transform: None,
    };
    join_readers(source, target, output, options)
}
