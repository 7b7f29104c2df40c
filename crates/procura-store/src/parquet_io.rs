//! Parquet file I/O.

use std::fs::File;
use std::path::Path;

use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use tracing::info;

use crate::StoreError;

/// Read a Parquet file into Arrow RecordBatches.
pub fn read_parquet(path: &Path) -> Result<Vec<RecordBatch>, StoreError> {
    if !path.exists() {
        return Err(StoreError::ParquetNotFound(path.to_path_buf()));
    }
    let file = File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
    let batches: Result<Vec<RecordBatch>, _> = reader.collect();
    Ok(batches?)
}

/// Write batches sharing one schema to a Parquet file, replacing it.
pub fn write_parquet(path: &Path, batches: &[RecordBatch]) -> Result<(), StoreError> {
    let first = batches
        .first()
        .ok_or_else(|| StoreError::Other("nothing to write".into()))?;
    let file = File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, first.schema(), None)?;
    let mut rows = 0;
    for batch in batches {
        writer.write(batch)?;
        rows += batch.num_rows();
    }
    writer.close()?;
    info!(path = %path.display(), rows, "wrote parquet");
    Ok(())
}
