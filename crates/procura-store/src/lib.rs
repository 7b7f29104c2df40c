//! Storage layer: Parquet files, DuckDB tables, CSV exports and the JSON fix ledger.

pub mod batch;
mod error;
pub mod export;
pub mod ledger;
pub mod parquet_io;

pub use batch::{
    batches_to_raw_rows, buckets_to_batch, flags_to_batch, raw_rows_to_batch, records_to_batch,
};
pub use error::StoreError;
pub use export::{write_flags_csv, write_rows, write_views_csv};
pub use ledger::JsonLedgerStore;
pub use parquet_io::{read_parquet, write_parquet};

#[cfg(feature = "duckdb")]
mod duck;
#[cfg(feature = "duckdb")]
pub use duck::DuckStore;
