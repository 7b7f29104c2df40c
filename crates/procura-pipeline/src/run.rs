//! One full pass: normalize, then detect and reconcile against a single
//! ledger snapshot.
//!
//! Every stage returns a complete in-memory result before the next starts,
//! so a failure between stages leaves nothing half-written.

use chrono::{DateTime, Utc};
use procura_core::{
    AggregateTrio, AggregateView, AnomalyFlag, DateRange, Dimension, LedgerSnapshot, RawRow,
};
use tracing::info;

use crate::aggregate::{aggregate, aggregate_all};
use crate::anomaly::detect;
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::normalize::{NormalizeOutcome, Normalizer};
use crate::reconcile::{Reconciled, reconcile};

#[derive(Debug)]
pub struct RunOutput {
    pub normalized: NormalizeOutcome,
    pub flags: Vec<AnomalyFlag>,
    pub reconciled: Reconciled,
}

impl RunOutput {
    pub fn aggregate(
        &self,
        period: DateRange,
        dimension: Dimension,
    ) -> Result<AggregateView, PipelineError> {
        Ok(aggregate(&self.reconciled.records, period, dimension)?)
    }

    pub fn aggregate_all(&self, period: DateRange) -> Result<AggregateTrio, PipelineError> {
        Ok(aggregate_all(&self.reconciled.records, period)?)
    }
}

pub struct Pipeline {
    normalizer: Normalizer,
}

impl Pipeline {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            normalizer: Normalizer::new(config),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        self.normalizer.config()
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    pub fn run(
        &self,
        rows: &[RawRow],
        ledger: &LedgerSnapshot,
        detected_at: DateTime<Utc>,
    ) -> Result<RunOutput, PipelineError> {
        info!(rows = rows.len(), fixes = ledger.len(), "pipeline run started");
        let normalized = self.normalizer.normalize_all(rows);
        let flags = detect(
            &normalized.records,
            ledger,
            &self.config().anomaly,
            detected_at,
        );
        let reconciled = reconcile(normalized.records.clone(), ledger, &self.normalizer)?;
        Ok(RunOutput {
            normalized,
            flags,
            reconciled,
        })
    }
}
