use std::collections::HashSet;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use polars::prelude::*;

use crate::error::{Error, Result};

pub const RAW_DATA_PATH: &str = "data/raw";
pub const PROCESSED_DATA_PATH: &str = "data/processed";

/// Separator of the raw pipe-delimited insurance extract.
pub const DEFAULT_SEPARATOR: u8 = b'|';

/// Cell texts read as null on top of empty fields.
const NULL_VALUES: &[&str] = &["NA", "N/A", "NaN", "nan", "null", "NULL", "None", "<NA>"];

const INFER_SCHEMA_ROWS: usize = 10_000;

/// Repeated header names get a `.1`, `.2`, ... suffix, the first one is kept.
fn dedupe_names(names: &[String]) -> Vec<String> {
    let mut seen: HashSet<String> = names.iter().cloned().collect();
    let mut first = HashSet::new();
    names
        .iter()
        .map(|name| {
            if first.insert(name.as_str()) {
                return name.clone();
            }
            let mut k = 1;
            while seen.contains(&format!("{name}.{k}")) {
                k += 1;
            }
            let renamed = format!("{name}.{k}");
            seen.insert(renamed.clone());
            renamed
        })
        .collect()
}

fn header(path: &Path, sep: u8) -> Result<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new().delimiter(sep).has_headers(false).from_path(path)?;
    Ok(match reader.records().next() {
        Some(record) => record?.iter().map(str::to_string).collect(),
        None => Vec::new(),
    })
}

/// Load a delimited file with a header row. Column types are inferred and
/// empty or NA-like cells are null. Duplicate column names are suffixed.
pub fn load_data<P: AsRef<Path>>(path: P, sep: u8) -> Result<DataFrame> {
    let path = path.as_ref();
    let null_values = NULL_VALUES.iter().map(|s| (*s).into()).collect();
    let mut df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(INFER_SCHEMA_ROWS))
        .with_parse_options(
            CsvParseOptions::default()
                .with_separator(sep)
                .with_null_values(Some(NullValues::AllColumns(null_values))),
        )
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?;

    let names = header(path, sep)?;
    let unique = dedupe_names(&names);
    if unique != names && unique.len() == df.width() {
        log::warn!("{}: duplicate column names renamed to {unique:?}", path.display());
        df.set_column_names(unique)?;
    }
    log::debug!("parsed {} with shape {:?}", path.display(), df.shape());
    Ok(df)
}

/// Load `file_name` from [`RAW_DATA_PATH`] (comma separated).
pub fn load_insurance_data(file_name: &str) -> Result<DataFrame> {
    load_insurance_data_from(RAW_DATA_PATH, file_name)
}

pub fn load_insurance_data_from<P: AsRef<Path>>(dir: P, file_name: &str) -> Result<DataFrame> {
    let file_path = dir.as_ref().join(file_name);
    if !file_path.exists() {
        return Err(Error::FileNotFound { path: file_path });
    }

    log::info!("Loading data from {} ...", file_path.display());
    let df = load_data(&file_path, b',')?;
    let (rows, cols) = df.shape();
    log::info!("Loaded {rows} rows and {cols} columns.");
    Ok(df)
}

/// Write `df` as comma-separated text with a header row and no index column.
pub fn save_csv<P: AsRef<Path>>(df: &DataFrame, path: P) -> Result<()> {
    let mut out = df.clone();
    CsvWriter::new(File::create(path.as_ref())?).include_header(true).finish(&mut out)?;
    Ok(())
}

/// Save into [`PROCESSED_DATA_PATH`]; returns the written path.
pub fn save_processed_data(df: &DataFrame, output_name: &str) -> Result<PathBuf> {
    save_processed_data_to(df, PROCESSED_DATA_PATH, output_name)
}

pub fn save_processed_data_to<P: AsRef<Path>>(df: &DataFrame, dir: P, output_name: &str) -> Result<PathBuf> {
    fs::create_dir_all(dir.as_ref())?;
    let output_path = dir.as_ref().join(output_name);
    save_csv(df, &output_path)?;
    log::info!("Processed data saved to {}", output_path.display());
    Ok(output_path)
}
