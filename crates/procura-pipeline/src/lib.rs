//! Contract pipeline: raw registry rows → canonical records → anomaly flags
//! and fix reconciliation → aggregate views.

pub mod aggregate;
pub mod amount;
pub mod anomaly;
pub mod canonical;
pub mod config;
pub mod dates;
mod error;
pub mod normalize;
pub mod reconcile;
pub mod run;
pub mod stats;

pub use aggregate::{aggregate, aggregate_all};
pub use anomaly::detect;
pub use config::{
    AmountFormat, AnomalyConfig, CatalogMode, CategoryCatalog, CategoryDef, DateFormat, FieldMap,
    NamedPeriod, PipelineConfig, SlashDateOrder,
};
pub use error::{
    AggregateError, ConfigError, NormalizationError, NormalizationErrorKind, PipelineError,
    ReconciliationError,
};
pub use normalize::{NormalizeOutcome, Normalizer, normalize_row};
pub use reconcile::{ReconcileReport, Reconciled, reconcile};
pub use run::{Pipeline, RunOutput};
