use std::env;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use polars::prelude::*;
use tracing::info;

use crate::models::polars_err;

pub fn project_root() -> PathBuf {
    match env::var_os("PROJECT_ROOT") {
        Some(val) => PathBuf::from(val),
        None => {
            // Fall back to current directory if PROJECT_ROOT not set
            env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
        }
    }
}

/// Reads a CSV with every column kept as a string, so identifiers such as
/// chromosome `X` or placeholder `.` p-values survive untouched.
pub fn read_csv_as_strings(file_path: &Path) -> PolarsResult<DataFrame> {
    CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .try_into_reader_with_file_path(Some(file_path.to_path_buf()))?
        .finish()
}

pub fn write_parquet(df: &mut DataFrame, path: &Path) -> PolarsResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| polars_err(Box::new(e)))?;
    }
    let mut file = File::create(path).map_err(|e| polars_err(Box::new(e)))?;
    ParquetWriter::new(&mut file).finish(df)?;
    info!("Wrote {} rows to {}", df.height(), path.display());
    Ok(())
}

pub fn read_parquet(path: &Path) -> PolarsResult<DataFrame> {
    let file = File::open(path).map_err(|e| polars_err(Box::new(e)))?;
    ParquetReader::new(file).finish()
}

/// Name of the first of `candidates` present in `df`.
pub fn first_present_column<'a>(df: &DataFrame, candidates: &[&'a str]) -> Option<&'a str> {
    let names = df.get_column_names();
    candidates
        .iter()
        .copied()
        .find(|c| names.iter().any(|n| n.as_str() == *c))
}

/// Parses a numeric cell of a string-typed table; blanks and `.` are missing.
pub fn parse_f64_cell(cell: Option<&str>) -> Option<f64> {
    match cell.map(str::trim) {
        None | Some("") | Some(".") => None,
        Some(v) => v.parse::<f64>().ok(),
    }
}

/// A significance cell is usable when it holds anything but blank, `.` or `NA`.
pub fn is_usable_cell(cell: Option<&str>) -> bool {
    !matches!(
        cell.map(str::trim),
        None | Some("") | Some(".") | Some("NA") | Some("nan") | Some("NaN")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::df;

    #[test]
    fn csv_columns_stay_strings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.csv");
        fs::write(&path, "Chr,Bp,beta\n1,100,-0.5\nX,200,.\n").unwrap();
        let df = read_csv_as_strings(&path).unwrap();
        assert_eq!(df.column("Chr").unwrap().dtype(), &DataType::String);
        assert_eq!(df.column("Bp").unwrap().dtype(), &DataType::String);
        let beta = df.column("beta").unwrap().str().unwrap();
        assert_eq!(parse_f64_cell(beta.get(0)), Some(-0.5));
        assert_eq!(parse_f64_cell(beta.get(1)), None);
    }

    #[test]
    fn parquet_round_trip_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out.parquet");
        let mut df = df!["a" => &[1i64, 2], "b" => &["x", "y"]].unwrap();
        write_parquet(&mut df, &path).unwrap();
        let back = read_parquet(&path).unwrap();
        assert!(back.equals(&df));
    }

    #[test]
    fn column_fallbacks_and_cells() {
        let df = df!["Beta" => &[1.0]].unwrap();
        assert_eq!(first_present_column(&df, &["beta", "Beta"]), Some("Beta"));
        assert_eq!(first_present_column(&df, &["effect"]), None);
        assert!(is_usable_cell(Some("1.2e-5")));
        assert!(!is_usable_cell(Some(" . ")));
        assert!(!is_usable_cell(None));
    }
}
