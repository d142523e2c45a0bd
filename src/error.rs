use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PesticideError {
    #[error("Data not loaded: {0}")]
    NotLoaded(String),

    #[error("Missing column: {0}")]
    MissingColumn(String),

    #[error("Reference file not found: {}", .0.display())]
    MissingReference(PathBuf),

    #[error("No transaction data: none of the {0} expected files could be read")]
    NoData(usize),

    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GeoJSON error: {0}")]
    GeoJson(#[from] Box<geojson::Error>),

    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration: {0}")]
    Config(String),
}

impl From<geojson::Error> for PesticideError {
    fn from(err: geojson::Error) -> Self {
        PesticideError::GeoJson(Box::new(err))
    }
}

#[cfg(feature = "python")]
impl From<PesticideError> for pyo3::PyErr {
    fn from(err: PesticideError) -> pyo3::PyErr {
        use pyo3::exceptions::{PyRuntimeError, PyValueError};
        match err {
            PesticideError::InvalidArgument(_) => PyValueError::new_err(err.to_string()),
            other => PyRuntimeError::new_err(other.to_string()),
        }
    }
}
