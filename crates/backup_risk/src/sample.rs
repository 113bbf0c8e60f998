//! Raw observations handed to the producers.
//!
//! A `Sample` is immutable once ingested. Producers only read it; every derived
//! series (daily rates, utilization points, recovery observations) is built
//! fresh from the sample window on each run.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of a backup session or restore test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Warning,
    Failure,
}

impl Outcome {
    /// Success credit used for rate computations (a warning counts as half)
    pub fn credit(&self) -> f64 {
        match self {
            Outcome::Success => 1.0,
            Outcome::Warning => 0.5,
            Outcome::Failure => 0.0,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failure)
    }

    /// Completed outcomes carry a usable duration
    pub fn is_completed(&self) -> bool {
        !self.is_failure()
    }

    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Warning => "warning",
            Outcome::Failure => "failure",
        }
    }
}

/// What kind of thing an entity is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    #[default]
    Job,
    Repository,
    Host,
}

/// One raw observation for an entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    #[serde(default)]
    pub entity: String,
    /// Sub-entity the observation is attributable to (a VM inside a job, a job writing to a repository)
    #[serde(default)]
    pub sub_entity: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub outcome: Option<Outcome>,
    #[serde(default)]
    pub duration_minutes: Option<f64>,
    #[serde(default)]
    pub size_gb: Option<f64>,
    #[serde(default)]
    pub capacity_gb: Option<f64>,
    #[serde(default)]
    pub dedup_ratio: Option<f64>,
    #[serde(default)]
    pub compression_ratio: Option<f64>,
}

impl Sample {
    pub fn new(entity: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            entity: entity.into(),
            sub_entity: None,
            timestamp,
            outcome: None,
            duration_minutes: None,
            size_gb: None,
            capacity_gb: None,
            dedup_ratio: None,
            compression_ratio: None,
        }
    }

    pub fn with_sub_entity(mut self, sub_entity: impl Into<String>) -> Self {
        self.sub_entity = Some(sub_entity.into());
        self
    }

    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    pub fn with_duration(mut self, minutes: f64) -> Self {
        self.duration_minutes = Some(minutes);
        self
    }

    pub fn with_usage(mut self, used_gb: f64, capacity_gb: f64) -> Self {
        self.size_gb = Some(used_gb);
        self.capacity_gb = Some(capacity_gb);
        self
    }

    pub fn with_ratios(mut self, dedup: f64, compression: f64) -> Self {
        self.dedup_ratio = Some(dedup);
        self.compression_ratio = Some(compression);
        self
    }

    pub fn day(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }

    /// True if the sample carries at least one measured value
    pub fn has_measurement(&self) -> bool {
        self.outcome.is_some()
            || self.duration_minutes.is_some()
            || self.size_gb.is_some()
            || self.dedup_ratio.is_some()
            || self.compression_ratio.is_some()
    }

    /// Metadata is complete when the sample is attributable and measured
    pub fn is_metadata_complete(&self) -> bool {
        self.sub_entity.is_some() && self.has_measurement()
    }
}

/// Pass/fail outcome of an independent recovery verification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationOutcome {
    Success,
    Partial,
    Failed,
}

/// One verification result (an instance booted from backup and checked)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub instance: String,
    pub timestamp: DateTime<Utc>,
    pub outcome: VerificationOutcome,
    #[serde(default)]
    pub boot_latency_ms: Option<u64>,
    #[serde(default)]
    pub failed_drives: u32,
}

/// Calendar days covered by the samples, inclusive of both ends
pub fn span_days(samples: &[Sample]) -> f64 {
    let first = samples.iter().map(|s| s.day()).min();
    let last = samples.iter().map(|s| s.day()).max();
    match (first, last) {
        (Some(first), Some(last)) => ((last - first).num_days() + 1) as f64,
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_outcome_credit() {
        assert_eq!(Outcome::Success.credit(), 1.0);
        assert_eq!(Outcome::Warning.credit(), 0.5);
        assert_eq!(Outcome::Failure.credit(), 0.0);
        assert!(Outcome::Warning.is_completed());
    }

    #[test]
    fn test_metadata_completeness() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 22, 0, 0).unwrap();
        let bare = Sample::new("JOB-A", ts);
        assert!(!bare.is_metadata_complete());

        let unattributed = Sample::new("JOB-A", ts).with_outcome(Outcome::Success);
        assert!(!unattributed.is_metadata_complete());

        let full = Sample::new("JOB-A", ts)
            .with_sub_entity("vm-01")
            .with_outcome(Outcome::Success);
        assert!(full.is_metadata_complete());
    }

    #[test]
    fn test_span_days() {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let samples = vec![
            Sample::new("R", start + chrono::Duration::hours(36)),
            Sample::new("R", start),
        ];
        assert_eq!(span_days(&samples), 2.0);
        assert_eq!(span_days(&samples[1..]), 1.0);
        assert_eq!(span_days(&[]), 0.0);
    }

    #[test]
    fn test_sample_deserializes_with_missing_optionals() {
        let json = r#"{"entity":"JOB-A","timestamp":"2026-03-01T22:00:00Z","outcome":"warning"}"#;
        let sample: Sample = serde_json::from_str(json).unwrap();
        assert_eq!(sample.outcome, Some(Outcome::Warning));
        assert!(sample.duration_minutes.is_none());
    }
}
