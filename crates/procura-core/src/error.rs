use chrono::NaiveDate;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("end date {end} precedes start date {start}")]
    DateOrder { start: NaiveDate, end: NaiveDate },

    #[error("no such field on the contract record: '{0}'")]
    UnknownField(String),

    #[error("field '{0}' is read-only")]
    ReadOnlyField(String),

    #[error("invalid date range: {from} is after {to}")]
    InvalidRange { from: NaiveDate, to: NaiveDate },

    #[error("unknown grouping dimension: '{0}'")]
    UnknownDimension(String),
}
