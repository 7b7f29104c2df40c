use std::path::PathBuf;

use procura_core::LedgerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("parquet file not found: {0}")]
    ParquetNotFound(PathBuf),

    #[error("no results for query")]
    NoResults,

    #[cfg(feature = "duckdb")]
    #[error("duckdb error: {0}")]
    DuckDb(#[from] ::duckdb::Error),

    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("{0}")]
    Other(String),
}
