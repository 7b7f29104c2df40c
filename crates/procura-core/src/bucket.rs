//! Aggregate buckets: grouped spend summaries over a date window.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::money::Money;
use crate::record::RecordId;
use crate::ModelError;

/// Grouping dimension for an aggregate view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Entity,
    Contractor,
    Service,
}

impl Dimension {
    pub const ALL: [Dimension; 3] = [Self::Entity, Self::Contractor, Self::Service];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Entity => "entity",
            Self::Contractor => "contractor",
            Self::Service => "service",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dimension {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "entity" => Ok(Self::Entity),
            "contractor" => Ok(Self::Contractor),
            "service" => Ok(Self::Service),
            _ => Err(ModelError::UnknownDimension(s.to_string())),
        }
    }
}

/// Inclusive calendar date range `[from, to]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    from: NaiveDate,
    to: NaiveDate,
}

impl DateRange {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Result<Self, ModelError> {
        if from > to {
            return Err(ModelError::InvalidRange { from, to });
        }
        Ok(Self { from, to })
    }

    pub fn from(&self) -> NaiveDate {
        self.from
    }

    pub fn to(&self) -> NaiveDate {
        self.to
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.from <= date && date <= self.to
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.from, self.to)
    }
}

/// One grouped summary row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateBucket {
    /// Entity code, contractor code, or service category code.
    pub group_key: String,
    /// Canonical display name of the group.
    pub label: String,
    pub currency: String,
    pub period: DateRange,
    pub total_amount: Money,
    pub contract_count: u64,
    pub mean_amount: Money,
    /// Contracts in this bucket that carry a cancellation date.
    pub cancelled_count: u64,
    /// Every contract in the bucket, sorted.
    pub contract_ids: Vec<RecordId>,
    /// The cancelled subset of `contract_ids`, sorted.
    pub cancelled_ids: Vec<RecordId>,
}

/// All buckets for one dimension over one period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateView {
    pub dimension: Dimension,
    pub period: DateRange,
    /// Ordered by `(group_key, currency)`.
    pub buckets: Vec<AggregateBucket>,
}

impl AggregateView {
    /// Sum of contract counts across buckets.
    pub fn contract_count(&self) -> u64 {
        self.buckets.iter().map(|b| b.contract_count).sum()
    }

    /// Sum of cancelled counts across buckets.
    pub fn cancelled_count(&self) -> u64 {
        self.buckets.iter().map(|b| b.cancelled_count).sum()
    }

    /// Sum of bucket totals in one currency, in minor units.
    pub fn total_minor(&self, currency: &str) -> i64 {
        self.buckets
            .iter()
            .filter(|b| b.currency == currency)
            .map(|b| b.total_amount.minor)
            .sum()
    }

    /// A bucket's share of its currency's view total, in percent.
    ///
    /// Presentation only; the totals themselves stay exact.
    pub fn share_percent(&self, bucket: &AggregateBucket) -> f64 {
        let total = self.total_minor(&bucket.currency);
        if total == 0 {
            return 0.0;
        }
        bucket.total_amount.minor as f64 / total as f64 * 100.0
    }

    /// A bucket's share of all contracts in the view, in percent.
    pub fn count_share_percent(&self, bucket: &AggregateBucket) -> f64 {
        percent(bucket.contract_count, self.contract_count())
    }

    /// A bucket's share of all cancelled contracts in the view, in percent.
    pub fn cancelled_share_percent(&self, bucket: &AggregateBucket) -> f64 {
        percent(bucket.cancelled_count, self.cancelled_count())
    }

    /// Buckets sorted by total descending (ties by key), for display.
    pub fn ranked(&self) -> Vec<&AggregateBucket> {
        let mut out: Vec<&AggregateBucket> = self.buckets.iter().collect();
        out.sort_by(|a, b| {
            b.total_amount
                .minor
                .cmp(&a.total_amount.minor)
                .then_with(|| a.group_key.cmp(&b.group_key))
        });
        out
    }
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    part as f64 / whole as f64 * 100.0
}

/// The three independent views over one period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateTrio {
    pub entity: AggregateView,
    pub contractor: AggregateView,
    pub service: AggregateView,
}

impl AggregateTrio {
    pub fn get(&self, dimension: Dimension) -> &AggregateView {
        match dimension {
            Dimension::Entity => &self.entity,
            Dimension::Contractor => &self.contractor,
            Dimension::Service => &self.service,
        }
    }
}
