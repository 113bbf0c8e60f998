//! Metric records - the tagged envelope every producer writes
//!
//! One record per (entity, producer, analysis day). The payload is a sum type
//! with one variant per producer; the quality assessment and creation time are
//! shared by all of them, so the synthesizer reads every producer the same way.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::capacity::CapacityForecast;
use crate::efficiency::EfficiencyReport;
use crate::error::RiskError;
use crate::quality::QualityAssessment;
use crate::recovery::RecoveryEstimate;
use crate::trend::HealthReport;

/// Producers that write metric records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProducerKind {
    Health,
    Capacity,
    Efficiency,
    Recovery,
}

impl ProducerKind {
    pub const ALL: [ProducerKind; 4] = [
        ProducerKind::Health,
        ProducerKind::Capacity,
        ProducerKind::Efficiency,
        ProducerKind::Recovery,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProducerKind::Health => "health",
            ProducerKind::Capacity => "capacity",
            ProducerKind::Efficiency => "efficiency",
            ProducerKind::Recovery => "recovery",
        }
    }
}

impl fmt::Display for ProducerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProducerKind {
    type Err = RiskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "health" => Ok(ProducerKind::Health),
            "capacity" => Ok(ProducerKind::Capacity),
            "efficiency" => Ok(ProducerKind::Efficiency),
            "recovery" => Ok(ProducerKind::Recovery),
            other => Err(RiskError::Config(format!("unknown producer '{}'", other))),
        }
    }
}

/// Letter grade for a 0-100 score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Grade {
    A,
    B,
    C,
    D,
    F,
}

impl Grade {
    /// Grade from a score with lower bounds for A, B, C, D
    pub fn from_score(score: f64, bands: [f64; 4]) -> Self {
        match score {
            s if s >= bands[0] => Grade::A,
            s if s >= bands[1] => Grade::B,
            s if s >= bands[2] => Grade::C,
            s if s >= bands[3] => Grade::D,
            _ => Grade::F,
        }
    }

    /// 90 / 80 / 70 / 60
    pub fn standard(score: f64) -> Self {
        Self::from_score(score, [90.0, 80.0, 70.0, 60.0])
    }
}

/// Clamp a score to [0, 100]
pub fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        return 0.0;
    }
    score.clamp(0.0, 100.0)
}

/// Producer-specific body of a metric record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "producer", content = "data", rename_all = "lowercase")]
pub enum ProducerPayload {
    Health(HealthReport),
    Capacity(CapacityForecast),
    Efficiency(EfficiencyReport),
    Recovery(RecoveryEstimate),
}

impl ProducerPayload {
    pub fn kind(&self) -> ProducerKind {
        match self {
            ProducerPayload::Health(_) => ProducerKind::Health,
            ProducerPayload::Capacity(_) => ProducerKind::Capacity,
            ProducerPayload::Efficiency(_) => ProducerKind::Efficiency,
            ProducerPayload::Recovery(_) => ProducerKind::Recovery,
        }
    }

    /// Headline score in the producer's native scale, if it has one
    pub fn headline_score(&self) -> Option<f64> {
        match self {
            ProducerPayload::Health(h) => Some(h.health_score),
            ProducerPayload::Capacity(c) => c.days_to_threshold(80.0),
            ProducerPayload::Efficiency(e) => Some(e.efficiency_score),
            ProducerPayload::Recovery(r) => r.confidence_score,
        }
    }
}

/// One producer's output for one entity on one day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub entity: String,
    pub analysis_day: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub quality: QualityAssessment,
    pub payload: ProducerPayload,
}

impl MetricRecord {
    /// Record for the analysis day of `as_of`
    pub fn new(
        entity: impl Into<String>,
        as_of: DateTime<Utc>,
        quality: QualityAssessment,
        payload: ProducerPayload,
    ) -> Self {
        Self {
            entity: entity.into(),
            analysis_day: as_of.date_naive(),
            created_at: as_of,
            quality,
            payload,
        }
    }

    pub fn producer(&self) -> ProducerKind {
        self.payload.kind()
    }

    /// Hours between creation and `now` (never negative)
    pub fn age_hours(&self, now: DateTime<Utc>) -> f64 {
        ((now - self.created_at).num_seconds() as f64 / 3600.0).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_producer_kind_round_trip() {
        for kind in ProducerKind::ALL {
            assert_eq!(kind.as_str().parse::<ProducerKind>().unwrap(), kind);
        }
        assert!("backup".parse::<ProducerKind>().is_err());
        assert_eq!("Capacity".parse::<ProducerKind>().unwrap(), ProducerKind::Capacity);
    }

    #[test]
    fn test_grade_bands() {
        assert_eq!(Grade::standard(95.0), Grade::A);
        assert_eq!(Grade::standard(80.0), Grade::B);
        assert_eq!(Grade::standard(79.9), Grade::C);
        assert_eq!(Grade::standard(61.0), Grade::D);
        assert_eq!(Grade::standard(12.0), Grade::F);
        assert_eq!(Grade::from_score(56.0, [85.0, 70.0, 55.0, 40.0]), Grade::C);
    }

    #[test]
    fn test_clamp_score() {
        assert_eq!(clamp_score(120.0), 100.0);
        assert_eq!(clamp_score(-3.0), 0.0);
        assert_eq!(clamp_score(f64::NAN), 0.0);
        assert_eq!(clamp_score(42.5), 42.5);
    }
}
