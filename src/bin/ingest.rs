use anyhow::Result;
use clap::Parser;

use claimstat::io::{load_insurance_data, save_processed_data};

/// Copies a raw insurance dataset from `data/raw` into `data/processed`.
#[derive(Parser, Debug)]
#[command(author, version, about = "Move a raw claims CSV into the processed data folder", long_about = None)]
struct Args {
    /// File name inside data/raw.
    #[arg(default_value = "insurance_claims.csv")]
    file: String,

    /// File name to write inside data/processed.
    #[arg(default_value = "insurance_claims_clean.csv")]
    output: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let table = load_insurance_data(&args.file)?;
    save_processed_data(&table, &args.output)?;
    Ok(())
}
