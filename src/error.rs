//! Error types for the cell-profiling pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the library.
#[derive(Error, Debug)]
pub enum ProfilingError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Image encoding error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No pipeline document found in configuration")]
    MissingPipeline,

    #[error("Batch '{0}' has no plates left to process")]
    EmptyPlateList(String),

    #[error("Expected exactly one platemap for plate '{plate}' in batch '{batch}', found {found}")]
    PlatemapLookup {
        batch: String,
        plate: String,
        found: usize,
    },

    #[error("Well '{well}' matched {found} rows in platemap '{platemap}'")]
    WellLookup {
        well: String,
        platemap: String,
        found: usize,
    },

    #[error("Missing input file: {}", .0.display())]
    MissingArtifact(PathBuf),

    #[error("Missing column '{0}'")]
    MissingColumn(String),

    #[error("Invalid value '{value}' in column '{column}' at row {row}")]
    InvalidValue {
        value: String,
        column: String,
        row: usize,
    },

    #[error("Duplicate key '{key}' in {source_name}")]
    DuplicateKey { key: String, source_name: String },

    #[error("Empty data: {0}")]
    EmptyData(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, ProfilingError>;
