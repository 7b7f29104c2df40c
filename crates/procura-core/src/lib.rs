pub mod bucket;
mod error;
pub mod flag;
pub mod ledger;
pub mod money;
pub mod name_key;
pub mod record;
pub mod schema;

pub use bucket::{AggregateBucket, AggregateTrio, AggregateView, DateRange, Dimension};
pub use error::ModelError;
pub use flag::{AnomalyFlag, AnomalyReason, sort_flags};
pub use ledger::{FixAction, FixEntry, FixFields, FixKind, FixLedger, LedgerError, LedgerSnapshot, LedgerStore};
pub use money::{DEFAULT_CURRENCY, Money, is_currency_code};
pub use name_key::{display_form, name_key};
pub use record::{
    ContractRecord, FieldName, Party, RawRow, RecordId, RecordParts, ServiceCategory,
    UNCLASSIFIED_CODE, raw_row_from_json,
};
pub use schema::tables;
