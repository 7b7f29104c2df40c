//! DuckDB storage for raw registry pulls and canonical contracts.

use std::path::Path;

use arrow::record_batch::RecordBatch;
use duckdb::Connection;
use procura_core::RawRow;
use tracing::info;

use crate::StoreError;
use crate::batch::batches_to_raw_rows;

const RAW_CONTRACTS: &str = "raw_contracts";
const CONTRACTS: &str = "contracts";

/// DuckDB store over two tables.
///
/// `raw_contracts` holds scraper output exactly as fetched, one column per
/// registry field. `contracts` holds canonical records in the
/// `contracts_schema` layout, for ad-hoc SQL over normalized data.
///
/// Use [`open`](Self::open) for an ephemeral in-memory database and
/// [`open_persistent`](Self::open_persistent) for a file that keeps its
/// tables across runs.
pub struct DuckStore {
    conn: Connection,
}

impl DuckStore {
    /// Open an in-memory DuckDB database.
    pub fn open() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self { conn })
    }

    /// Open or create a persistent DuckDB database at the given path.
    ///
    /// Check [`has_raw_contracts`](Self::has_raw_contracts) to decide whether
    /// an import is needed.
    pub fn open_persistent(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Ok(Self { conn })
    }

    pub fn has_raw_contracts(&self) -> bool {
        self.raw_contract_count().is_ok()
    }

    /// Replace `raw_contracts` with the contents of a Parquet file.
    pub fn load_raw_contracts(&self, path: &Path) -> Result<usize, StoreError> {
        self.load_table(RAW_CONTRACTS, path)
    }

    /// Replace `contracts` with the contents of a Parquet file.
    pub fn load_contracts(&self, path: &Path) -> Result<usize, StoreError> {
        self.load_table(CONTRACTS, path)
    }

    fn load_table(&self, table: &str, path: &Path) -> Result<usize, StoreError> {
        if !path.exists() {
            return Err(StoreError::ParquetNotFound(path.to_path_buf()));
        }
        let literal = path.display().to_string().replace('\'', "''");
        let sql = format!("CREATE OR REPLACE TABLE {table} AS SELECT * FROM read_parquet('{literal}')");
        self.conn.execute_batch(&sql)?;
        let count = self.count_table(table)?;
        info!(table, count, "loaded table");
        Ok(count)
    }

    // ── Counts ──

    pub fn raw_contract_count(&self) -> Result<usize, StoreError> {
        self.count_table(RAW_CONTRACTS)
    }

    pub fn contract_count(&self) -> Result<usize, StoreError> {
        self.count_table(CONTRACTS)
    }

    fn count_table(&self, table: &str) -> Result<usize, StoreError> {
        let sql = format!("SELECT count(*)::BIGINT AS cnt FROM {table}");
        let mut stmt = self.conn.prepare(&sql)?;
        let batches: Vec<RecordBatch> = stmt.query_arrow([])?.collect();
        let batch = batches.first().ok_or(StoreError::NoResults)?;
        let col = batch
            .column(0)
            .as_any()
            .downcast_ref::<arrow::array::Int64Array>()
            .ok_or_else(|| StoreError::Other("count column not i64".into()))?;
        Ok(col.value(0) as usize)
    }

    // ── Reads ──

    /// Every `raw_contracts` row flattened for the normalizer.
    pub fn raw_rows(&self) -> Result<Vec<RawRow>, StoreError> {
        let batches = self.query_arrow(&format!("SELECT * FROM {RAW_CONTRACTS}"))?;
        let rows = batches_to_raw_rows(&batches)?;
        info!(rows = rows.len(), "read raw rows from duckdb");
        Ok(rows)
    }

    /// Execute arbitrary SQL and return Arrow RecordBatches.
    pub fn query_arrow(&self, sql: &str) -> Result<Vec<RecordBatch>, StoreError> {
        let mut stmt = self.conn.prepare(sql)?;
        let batches: Vec<RecordBatch> = stmt.query_arrow([])?.collect();
        Ok(batches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use arrow::array::StringArray;
    use arrow::datatypes::{DataType, Field, Schema};

    use crate::parquet_io::write_parquet;

    fn write_raw(dir: &Path) -> std::path::PathBuf {
        let schema = Arc::new(Schema::new(vec![
            Field::new("ContractId", DataType::Utf8, false),
            Field::new("AmountToPay", DataType::Utf8, true),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(vec!["A", "B", "C"])),
                Arc::new(StringArray::from(vec![Some("1,000.00"), None, Some("5")])),
            ],
        )
        .unwrap();
        let path = dir.join("raw's.parquet");
        write_parquet(&path, &[batch]).unwrap();
        path
    }

    #[test]
    fn open_in_memory() {
        let store = DuckStore::open().unwrap();
        let batches = store.query_arrow("SELECT 1 AS x").unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].num_rows(), 1);
    }

    #[test]
    fn load_missing_file_errors() {
        let store = DuckStore::open().unwrap();
        let result = store.load_raw_contracts(Path::new("/nonexistent/raw.parquet"));
        assert!(matches!(result, Err(StoreError::ParquetNotFound(_))));
    }

    #[test]
    fn empty_database_has_no_raw_contracts() {
        let store = DuckStore::open().unwrap();
        assert!(!store.has_raw_contracts());
    }

    #[test]
    fn raw_rows_round_trip_through_duckdb() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = write_raw(tmp.path());
        let store = DuckStore::open().unwrap();
        assert_eq!(store.load_raw_contracts(&path).unwrap(), 3);

        let mut rows = store.raw_rows().unwrap();
        rows.sort_by(|a, b| a["ContractId"].cmp(&b["ContractId"]));
        assert_eq!(rows[0]["AmountToPay"], "1,000.00");
        assert!(!rows[1].contains_key("AmountToPay"));
    }

    #[test]
    fn persistent_load_and_reopen() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = write_raw(tmp.path());
        let db_path = tmp.path().join("procura.duckdb");

        let store = DuckStore::open_persistent(&db_path).unwrap();
        assert!(!store.has_raw_contracts());
        store.load_raw_contracts(&path).unwrap();
        drop(store);

        let store = DuckStore::open_persistent(&db_path).unwrap();
        assert!(store.has_raw_contracts());
        assert_eq!(store.raw_contract_count().unwrap(), 3);
    }

    #[test]
    fn contracts_table_supports_sql() {
        use crate::batch::records_to_batch;
        use chrono::NaiveDate;
        use procura_core::{Money, Party, RecordId, RecordParts, ServiceCategory};

        let record = RecordParts {
            id: RecordId::new("A"),
            entity: Party::from_name("Salud"),
            contractor: Party::from_name("Acme"),
            service_category: ServiceCategory::classified("legal", "Legal"),
            amount: Money::new(100_000, "USD"),
            start_date: NaiveDate::from_ymd_opt(2023, 1, 5).unwrap(),
            end_date: None,
            contract_number: None,
            granted_on: None,
            cancelled_on: None,
            raw_fields: RawRow::new(),
        }
        .build()
        .unwrap();
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("contracts.parquet");
        write_parquet(&path, &[records_to_batch(&[record]).unwrap()]).unwrap();

        let store = DuckStore::open().unwrap();
        store.load_contracts(&path).unwrap();
        assert_eq!(store.contract_count().unwrap(), 1);
        let batches = store
            .query_arrow("SELECT sum(amount_minor)::BIGINT FROM contracts WHERE service_code = 'legal'")
            .unwrap();
        let total = batches[0]
            .column(0)
            .as_any()
            .downcast_ref::<arrow::array::Int64Array>()
            .unwrap();
        assert_eq!(total.value(0), 100_000);
    }
}
