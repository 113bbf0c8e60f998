//! Quality Gate - sample adequacy checks shared by every producer
//!
//! Each rule is evaluated independently against the current sample window:
//! - minimum sample count (fatal by default)
//! - minimum density (samples per covered day)
//! - maximum variance of per-sub-entity success rates
//! - maximum share of samples from one sub-entity (bias)
//! - minimum covered time span
//! - maximum share of samples with missing metadata
//!
//! A failed fatal rule yields tier INSUFFICIENT and the caller writes no record.
//! A failed non-fatal rule adds a flag and multiplies the confidence multiplier
//! by that rule's penalty. The tier is banded from the final multiplier.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

use crate::config::QualityThresholds;
use crate::error::{Result, RiskError};
use crate::record::ProducerKind;
use crate::sample::{span_days, Sample};
use crate::stats;

/// Quality rules the gate evaluates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityRule {
    MinSampleCount,
    MinDensity,
    MaxVariance,
    MaxSubEntityShare,
    MinTimespan,
    MaxMissingMetadata,
}

impl QualityRule {
    pub fn flag(&self) -> QualityFlag {
        match self {
            QualityRule::MinSampleCount => QualityFlag::InsufficientSamples,
            QualityRule::MinDensity => QualityFlag::SparseData,
            QualityRule::MaxVariance => QualityFlag::HighVariance,
            QualityRule::MaxSubEntityShare => QualityFlag::SubEntityDominates,
            QualityRule::MinTimespan => QualityFlag::InsufficientTimespan,
            QualityRule::MaxMissingMetadata => QualityFlag::IncompleteMetadata,
        }
    }
}

/// Named quality issue carried on an assessment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityFlag {
    InsufficientSamples,
    SparseData,
    HighVariance,
    SubEntityDominates,
    InsufficientTimespan,
    IncompleteMetadata,
    /// Capacity gaps were linearly interpolated
    GapsInterpolated,
    /// Capacity points beyond the sigma limit were dropped
    OutliersRemoved,
    /// Forecast R² fell in the LOW band
    LowFitQuality,
    /// Recovery score came from verification alone
    VerificationSubstituted,
    /// Fewer than two timed recovery tests
    InsufficientTimingHistory,
}

impl QualityFlag {
    pub fn label(&self) -> &'static str {
        match self {
            QualityFlag::InsufficientSamples => "insufficient_samples",
            QualityFlag::SparseData => "sparse_data",
            QualityFlag::HighVariance => "high_variance",
            QualityFlag::SubEntityDominates => "sub_entity_dominates",
            QualityFlag::InsufficientTimespan => "insufficient_timespan",
            QualityFlag::IncompleteMetadata => "incomplete_metadata",
            QualityFlag::GapsInterpolated => "gaps_interpolated",
            QualityFlag::OutliersRemoved => "outliers_removed",
            QualityFlag::LowFitQuality => "low_fit_quality",
            QualityFlag::VerificationSubstituted => "verification_substituted",
            QualityFlag::InsufficientTimingHistory => "insufficient_timing_history",
        }
    }
}

impl fmt::Display for QualityFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Qualitative trust level derived from the confidence multiplier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceTier {
    Insufficient,
    Low,
    Moderate,
    High,
}

impl ConfidenceTier {
    /// Fixed bands: >=0.85 HIGH, >=0.6 MODERATE, >=0.3 LOW, else INSUFFICIENT
    pub fn from_multiplier(multiplier: f64) -> Self {
        match multiplier {
            m if m >= 0.85 => ConfidenceTier::High,
            m if m >= 0.6 => ConfidenceTier::Moderate,
            m if m >= 0.3 => ConfidenceTier::Low,
            _ => ConfidenceTier::Insufficient,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ConfidenceTier::High => "HIGH",
            ConfidenceTier::Moderate => "MODERATE",
            ConfidenceTier::Low => "LOW",
            ConfidenceTier::Insufficient => "INSUFFICIENT",
        }
    }
}

impl fmt::Display for ConfidenceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Outcome of the gate, embedded in every metric record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityAssessment {
    pub confidence_tier: ConfidenceTier,
    pub confidence_multiplier: f64,
    pub flags: BTreeSet<QualityFlag>,
    pub sample_count: usize,
    pub span_days: f64,
    pub samples_per_day: f64,
    /// Human-readable reason for every flag
    #[serde(default)]
    pub notes: Vec<String>,
    /// Set when a fatal rule failed
    #[serde(default)]
    pub fatal_reason: Option<String>,
}

impl QualityAssessment {
    /// A clean assessment with full confidence
    pub fn clean(sample_count: usize, span_days: f64) -> Self {
        let samples_per_day = if span_days > 0.0 {
            sample_count as f64 / span_days
        } else {
            0.0
        };
        Self {
            confidence_tier: ConfidenceTier::High,
            confidence_multiplier: 1.0,
            flags: BTreeSet::new(),
            sample_count,
            span_days,
            samples_per_day,
            notes: Vec::new(),
            fatal_reason: None,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.fatal_reason.is_some()
    }

    pub fn has_flag(&self, flag: QualityFlag) -> bool {
        self.flags.contains(&flag)
    }

    /// Add a non-fatal flag and compound its penalty into the multiplier
    pub fn degrade(&mut self, flag: QualityFlag, penalty: f64, note: impl Into<String>) {
        self.flags.insert(flag);
        self.notes.push(note.into());
        if self.is_fatal() {
            return;
        }
        self.confidence_multiplier = (self.confidence_multiplier * penalty).clamp(0.0, 1.0);
        self.confidence_tier = ConfidenceTier::from_multiplier(self.confidence_multiplier);
    }

    /// Force the tier to INSUFFICIENT without making the record fatal
    pub fn mark_insufficient(&mut self, flag: QualityFlag, note: impl Into<String>) {
        self.flags.insert(flag);
        self.notes.push(note.into());
        self.confidence_multiplier = 0.0;
        self.confidence_tier = ConfidenceTier::Insufficient;
    }

    fn fail_fatally(&mut self, flag: QualityFlag, note: String) {
        self.flags.insert(flag);
        self.notes.push(note.clone());
        if self.fatal_reason.is_none() {
            self.fatal_reason = Some(note);
        }
        self.confidence_multiplier = 0.0;
        self.confidence_tier = ConfidenceTier::Insufficient;
    }
}

/// Pure rule evaluator for one producer's thresholds
#[derive(Debug, Clone)]
pub struct QualityGate {
    thresholds: QualityThresholds,
}

impl QualityGate {
    pub fn new(thresholds: QualityThresholds) -> Self {
        Self { thresholds }
    }

    /// Evaluate every rule and return the assessment (never fails)
    pub fn assess(&self, samples: &[Sample]) -> QualityAssessment {
        let t = &self.thresholds;
        let count = samples.len();
        let span = span_days(samples);
        let mut assessment = QualityAssessment::clean(count, span);

        let mut violations: Vec<(QualityRule, String)> = Vec::new();

        if count < t.min_samples {
            violations.push((
                QualityRule::MinSampleCount,
                format!("{} samples, {} required", count, t.min_samples),
            ));
        }

        if assessment.samples_per_day < t.min_samples_per_day {
            violations.push((
                QualityRule::MinDensity,
                format!(
                    "{:.2} samples/day, {:.2} required",
                    assessment.samples_per_day, t.min_samples_per_day
                ),
            ));
        }

        if let Some(variance) = sub_entity_rate_variance(samples) {
            if variance > t.max_variance {
                violations.push((
                    QualityRule::MaxVariance,
                    format!(
                        "success-rate variance {:.3} across sub-entities exceeds {:.3}",
                        variance, t.max_variance
                    ),
                ));
            }
        }

        if let Some((name, share)) = dominant_sub_entity(samples) {
            if share > t.max_sub_entity_share {
                violations.push((
                    QualityRule::MaxSubEntityShare,
                    format!(
                        "{} accounts for {:.0}% of samples (max {:.0}%)",
                        name,
                        share * 100.0,
                        t.max_sub_entity_share * 100.0
                    ),
                ));
            }
        }

        if span < t.min_span_days {
            violations.push((
                QualityRule::MinTimespan,
                format!("{:.0} days covered, {:.0} required", span, t.min_span_days),
            ));
        }

        if count > 0 {
            let missing = samples.iter().filter(|s| !s.is_metadata_complete()).count();
            let share = missing as f64 / count as f64;
            if share > t.max_missing_metadata_share {
                violations.push((
                    QualityRule::MaxMissingMetadata,
                    format!(
                        "{:.0}% of samples missing metadata (max {:.0}%)",
                        share * 100.0,
                        t.max_missing_metadata_share * 100.0
                    ),
                ));
            }
        }

        for (rule, note) in violations {
            if t.fatal_rules.contains(&rule) {
                assessment.fail_fatally(rule.flag(), note);
            } else {
                assessment.degrade(rule.flag(), t.penalties.for_rule(rule), note);
            }
        }

        assessment
    }

    /// Assess and turn a fatal result into `RiskError::InsufficientData`
    pub fn admit(
        &self,
        entity: &str,
        producer: ProducerKind,
        samples: &[Sample],
    ) -> Result<QualityAssessment> {
        let assessment = self.assess(samples);
        match &assessment.fatal_reason {
            Some(reason) => Err(RiskError::insufficient(entity, producer, reason.clone())),
            None => Ok(assessment),
        }
    }
}

/// Population variance of per-sub-entity success rates (None below two groups)
fn sub_entity_rate_variance(samples: &[Sample]) -> Option<f64> {
    let mut groups: HashMap<&str, (f64, usize)> = HashMap::new();
    for sample in samples {
        if let Some(outcome) = sample.outcome {
            let key = sample.sub_entity.as_deref().unwrap_or("");
            let entry = groups.entry(key).or_insert((0.0, 0));
            entry.0 += outcome.credit();
            entry.1 += 1;
        }
    }
    if groups.len() < 2 {
        return None;
    }
    let rates: Vec<f64> = groups.values().map(|(credit, n)| credit / *n as f64).collect();
    Some(stats::population_std(&rates).powi(2))
}

/// Largest sub-entity share, only meaningful with two or more sub-entities
fn dominant_sub_entity(samples: &[Sample]) -> Option<(String, f64)> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for sample in samples {
        if let Some(sub) = sample.sub_entity.as_deref() {
            *counts.entry(sub).or_insert(0) += 1;
        }
    }
    if counts.len() < 2 {
        return None;
    }
    let total: usize = counts.values().sum();
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(name, n)| (name.to_string(), n as f64 / total as f64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::Outcome;
    use chrono::{Duration, TimeZone, Utc};

    fn daily(n: usize) -> Vec<Sample> {
        let start = Utc.with_ymd_and_hms(2026, 1, 5, 22, 0, 0).unwrap();
        (0..n)
            .map(|i| {
                Sample::new("JOB-A", start + Duration::days(i as i64))
                    .with_sub_entity(format!("vm-{}", i % 3))
                    .with_outcome(Outcome::Success)
            })
            .collect()
    }

    #[test]
    fn test_tier_bands() {
        assert_eq!(ConfidenceTier::from_multiplier(1.0), ConfidenceTier::High);
        assert_eq!(ConfidenceTier::from_multiplier(0.85), ConfidenceTier::High);
        assert_eq!(ConfidenceTier::from_multiplier(0.84), ConfidenceTier::Moderate);
        assert_eq!(ConfidenceTier::from_multiplier(0.6), ConfidenceTier::Moderate);
        assert_eq!(ConfidenceTier::from_multiplier(0.3), ConfidenceTier::Low);
        assert_eq!(ConfidenceTier::from_multiplier(0.29), ConfidenceTier::Insufficient);
    }

    #[test]
    fn test_clean_series_is_high() {
        let gate = QualityGate::new(QualityThresholds::for_health());
        let a = gate.assess(&daily(30));
        assert_eq!(a.confidence_tier, ConfidenceTier::High);
        assert!(a.flags.is_empty());
        assert_eq!(a.span_days, 30.0);
    }

    #[test]
    fn test_penalties_compound() {
        let gate = QualityGate::new(QualityThresholds::for_health());
        let mut samples = daily(40);
        // Strip sub-entities from a third of the samples
        for s in samples.iter_mut().step_by(3) {
            s.sub_entity = None;
        }
        let a = gate.assess(&samples);
        assert!(a.has_flag(QualityFlag::IncompleteMetadata));
        assert!((a.confidence_multiplier - 0.7).abs() < 1e-9);
        assert_eq!(a.confidence_tier, ConfidenceTier::Moderate);

        let mut worse = a.clone();
        worse.degrade(QualityFlag::SparseData, 0.8, "sparse");
        assert!((worse.confidence_multiplier - 0.56).abs() < 1e-9);
        assert_eq!(worse.confidence_tier, ConfidenceTier::Low);
    }

    #[test]
    fn test_dominance_requires_two_sub_entities() {
        let gate = QualityGate::new(QualityThresholds::for_health());
        let mut samples = daily(30);
        for s in samples.iter_mut() {
            s.sub_entity = Some("vm-only".to_string());
        }
        assert!(!gate.assess(&samples).has_flag(QualityFlag::SubEntityDominates));

        for s in samples.iter_mut().take(3) {
            s.sub_entity = Some("vm-other".to_string());
        }
        let a = gate.assess(&samples);
        assert!(a.has_flag(QualityFlag::SubEntityDominates));
        assert!(a.notes.iter().any(|n| n.contains("vm-only")));
    }

    #[test]
    fn test_variance_across_sub_entities() {
        let gate = QualityGate::new(QualityThresholds::for_health());
        let mut samples = daily(30);
        for s in samples.iter_mut() {
            if s.sub_entity.as_deref() == Some("vm-0") {
                s.outcome = Some(Outcome::Failure);
            }
        }
        // Rates are 0, 1, 1 -> variance 2/9
        let a = gate.assess(&samples);
        assert!(a.has_flag(QualityFlag::HighVariance));
    }

    #[test]
    fn test_fatal_rule_short_circuits() {
        let gate = QualityGate::new(QualityThresholds::for_health());
        let a = gate.assess(&daily(29));
        assert!(a.is_fatal());
        assert_eq!(a.confidence_tier, ConfidenceTier::Insufficient);
        assert_eq!(a.confidence_multiplier, 0.0);

        let err = gate.admit("JOB-A", ProducerKind::Health, &daily(29)).unwrap_err();
        assert!(err.is_insufficient_data());
    }

    #[test]
    fn test_non_fatal_sample_count() {
        let gate = QualityGate::new(QualityThresholds::for_recovery());
        let a = gate.assess(&[]);
        assert!(!a.is_fatal());
        assert!(a.has_flag(QualityFlag::InsufficientSamples));
        assert_eq!(a.confidence_tier, ConfidenceTier::Low);
    }
}
