/// Arrow schema definitions for the contract pipeline's tables.
pub mod tables {
    use std::sync::Arc;

    use arrow::datatypes::{DataType, Field, Schema, TimeUnit};

    /// Canonical contracts, one row per `ContractRecord`.
    ///
    /// Amounts are stored as integer minor units; there is no float column.
    pub fn contracts_schema() -> Schema {
        Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("entity_code", DataType::Utf8, false),
            Field::new("entity_name", DataType::Utf8, false),
            Field::new("contractor_code", DataType::Utf8, false),
            Field::new("contractor_name", DataType::Utf8, false),
            Field::new("service_code", DataType::Utf8, false),
            Field::new("service_label", DataType::Utf8, false),
            Field::new("service_raw", DataType::Utf8, true),
            Field::new("amount_minor", DataType::Int64, false),
            Field::new("currency", DataType::Utf8, false),
            Field::new("start_date", DataType::Date32, false),
            Field::new("end_date", DataType::Date32, true),
            Field::new("contract_number", DataType::Utf8, true),
            Field::new("granted_on", DataType::Date32, true),
            Field::new("cancelled_on", DataType::Date32, true),
            Field::new("raw_fields", DataType::Utf8, false),
        ])
    }

    /// Aggregate buckets for one dimension and period.
    pub fn aggregates_schema() -> Schema {
        Schema::new(vec![
            Field::new("dimension", DataType::Utf8, false),
            Field::new("group_key", DataType::Utf8, false),
            Field::new("label", DataType::Utf8, false),
            Field::new("currency", DataType::Utf8, false),
            Field::new("period_from", DataType::Date32, false),
            Field::new("period_to", DataType::Date32, false),
            Field::new("total_minor", DataType::Int64, false),
            Field::new("contract_count", DataType::UInt64, false),
            Field::new("mean_minor", DataType::Int64, false),
            Field::new("cancelled_count", DataType::UInt64, false),
            Field::new("contract_ids", id_list(), false),
            Field::new("cancelled_ids", id_list(), false),
        ])
    }

    fn id_list() -> DataType {
        DataType::List(Arc::new(Field::new("item", DataType::Utf8, true)))
    }

    /// Advisory anomaly flags from one detection run.
    pub fn flags_schema() -> Schema {
        Schema::new(vec![
            Field::new("record_id", DataType::Utf8, false),
            Field::new("reason", DataType::Utf8, false),
            Field::new("severity", DataType::Float64, false),
            Field::new(
                "detected_at",
                DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
                false,
            ),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::tables;

    #[test]
    fn contracts_schema_has_expected_fields() {
        let schema = tables::contracts_schema();
        assert_eq!(schema.fields().len(), 16);
        assert!(schema.field_with_name("amount_minor").is_ok());
        assert!(!schema.field_with_name("id").unwrap().is_nullable());
        assert!(schema.field_with_name("end_date").unwrap().is_nullable());
    }

    #[test]
    fn aggregates_schema_has_expected_fields() {
        let schema = tables::aggregates_schema();
        assert_eq!(schema.fields().len(), 12);
        assert!(schema.field_with_name("cancelled_count").is_ok());
        assert!(schema.field_with_name("contract_ids").is_ok());
    }

    #[test]
    fn flags_schema_has_expected_fields() {
        let schema = tables::flags_schema();
        assert_eq!(schema.fields().len(), 4);
        assert!(schema.field_with_name("severity").is_ok());
    }
}
