use std::io::Cursor;
use std::path::{Path, PathBuf};

use polars::prelude::*;
use tracing::{info, warn};

use crate::config::{CsvFormat, PipelineConfig};
use crate::error::PesticideError;
use crate::schema::{commune, product, transaction};

/// Concatenated raw transactions plus which files fed them.
#[derive(Debug, Clone)]
pub struct TransactionBatch {
    /// Raw columns only (`transaction::RAW`), all strings.
    pub frame: DataFrame,
    pub loaded: Vec<PathBuf>,
    pub missing: Vec<PathBuf>,
}

/// Read a delimited file with all columns as String dtype.
/// Trims whitespace from column names. Non UTF-8 files are transcoded first.
pub fn read_csv_as_strings(path: &Path, format: &CsvFormat) -> Result<DataFrame, PesticideError> {
    let options = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(0)) // all columns as String
        .map_parse_options(|opts| opts.with_separator(format.separator));

    let mut df = if format.is_utf8() {
        options
            .try_into_reader_with_file_path(Some(path.to_path_buf()))?
            .finish()?
    } else {
        let bytes = std::fs::read(path)?;
        let (text, _, had_errors) = format.encoding.decode(&bytes);
        if had_errors {
            warn!(file = %path.display(), encoding = format.encoding.name(), "replaced undecodable bytes");
        }
        options
            .into_reader_with_file_handle(Cursor::new(text.into_owned().into_bytes()))
            .finish()?
    };

    let trimmed: Vec<String> = df
        .get_column_names_str()
        .iter()
        .map(|c| c.trim().to_string())
        .collect();
    df.set_column_names(trimmed.as_slice())?;

    Ok(df)
}

pub fn require_columns(df: &DataFrame, required: &[&str]) -> Result<(), PesticideError> {
    for &col_name in required {
        if df.column(col_name).is_err() {
            return Err(PesticideError::MissingColumn(col_name.to_string()));
        }
    }
    Ok(())
}

/// Read one file per (year, region) and stack them in iteration order.
///
/// A missing file is logged and skipped. Any other read failure aborts the
/// batch. If not a single file could be read the batch fails with `NoData`.
pub fn load_transactions(config: &PipelineConfig) -> Result<TransactionBatch, PesticideError> {
    let files = config.transaction_files();
    let expected = files.len();

    let mut frame: Option<DataFrame> = None;
    let mut loaded = Vec::new();
    let mut missing = Vec::new();

    for file in files {
        if !file.path.is_file() {
            warn!(
                file = %file.path.display(),
                region = %file.region,
                year = %file.year,
                "transaction file not found; skipping"
            );
            missing.push(file.path);
            continue;
        }

        let raw = read_csv_as_strings(&file.path, &config.transaction_format)?;
        require_columns(&raw, &transaction::RAW)?;
        let raw = raw.select(transaction::RAW)?;

        match frame.as_mut() {
            Some(acc) => {
                acc.vstack_mut(&raw)?;
            }
            None => frame = Some(raw),
        }
        loaded.push(file.path);
    }

    let Some(frame) = frame else {
        return Err(PesticideError::NoData(expected));
    };

    info!(
        files_loaded = loaded.len(),
        files_missing = missing.len(),
        rows = frame.height(),
        "loaded transaction files"
    );

    Ok(TransactionBatch {
        frame,
        loaded,
        missing,
    })
}

/// Load a reference table; absence is fatal.
fn load_reference(
    path: &Path,
    format: &CsvFormat,
    required: &[&str],
) -> Result<DataFrame, PesticideError> {
    if !path.is_file() {
        return Err(PesticideError::MissingReference(path.to_path_buf()));
    }
    let df = read_csv_as_strings(path, format)?;
    require_columns(&df, required)?;
    info!(file = %path.display(), rows = df.height(), "loaded reference table");
    Ok(df)
}

pub fn load_communes(config: &PipelineConfig) -> Result<DataFrame, PesticideError> {
    load_reference(
        &config.communes_path,
        &config.communes_format,
        &[commune::DEPARTMENT_CODE, commune::DEPARTMENT_NAME],
    )
}

pub fn load_products(config: &PipelineConfig) -> Result<DataFrame, PesticideError> {
    load_reference(
        &config.products_path,
        &config.products_format,
        &[product::AMM_NUMBER, product::NAME, product::FUNCTIONS],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn windows_1252_file_is_transcoded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("produits.csv");
        fs::write(
            &path,
            b"numero AMM;nom produit;fonctions\n2000001;Fongicide \xe9t\xe9;Fongicide\n",
        )
        .unwrap();

        let format = CsvFormat::new(b';', encoding_rs::WINDOWS_1252);
        let df = read_csv_as_strings(&path, &format).unwrap();
        let names = df.column(product::NAME).unwrap().str().unwrap();
        assert_eq!(names.get(0), Some("Fongicide été"));
        assert_eq!(df.column(product::AMM_NUMBER).unwrap().dtype(), &DataType::String);
    }

    #[test]
    fn header_whitespace_is_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("communes.csv");
        fs::write(&path, " code_departement , nom_departement\n01,Ain\n").unwrap();

        let df = read_csv_as_strings(&path, &CsvFormat::utf8(b',')).unwrap();
        require_columns(&df, &[commune::DEPARTMENT_CODE, commune::DEPARTMENT_NAME]).unwrap();
        let codes = df.column(commune::DEPARTMENT_CODE).unwrap().str().unwrap();
        assert_eq!(codes.get(0), Some("01"));
    }

    #[test]
    fn missing_reference_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::with_base_dir(dir.path());
        match load_communes(&config) {
            Err(PesticideError::MissingReference(path)) => assert_eq!(path, config.communes_path),
            other => panic!("expected MissingReference, got {other:?}"),
        }
    }

    #[test]
    fn all_transaction_files_missing_is_no_data() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::with_base_dir(dir.path());
        match load_transactions(&config) {
            Err(PesticideError::NoData(expected)) => assert_eq!(expected, 76),
            other => panic!("expected NoData, got {other:?}"),
        }
    }
}
