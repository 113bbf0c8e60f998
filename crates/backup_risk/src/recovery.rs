//! Recovery Model - how long a restore takes and how much to trust that
//!
//! From historical restore tests (success / warning / failure) this computes:
//! - median, p90 and p95 durations over completed tests
//! - a t-based 95% interval around the mean duration
//! - a weighted confidence score (success rate, recency, predictability,
//!   SLA margin, coverage), blended with an independent verification signal
//! - SLA status against the entity's RTO, using p95 as the prediction
//! - a concurrency projection with exponential per-resource overhead
//!
//! With fewer than two timed tests the timing statistics are None, never zero.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::RecoveryConfig;
use crate::record::{clamp_score, Grade};
use crate::sample::{Outcome, Sample, VerificationOutcome, VerificationResult};
use crate::stats;

/// One historical restore test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryObservation {
    pub completed_at: DateTime<Utc>,
    pub outcome: Outcome,
    pub duration_minutes: Option<f64>,
}

/// Restore tests from samples that carry an outcome
pub fn recovery_observations(samples: &[Sample]) -> Vec<RecoveryObservation> {
    samples
        .iter()
        .filter_map(|s| {
            Some(RecoveryObservation {
                completed_at: s.timestamp,
                outcome: s.outcome?,
                duration_minutes: s.duration_minutes.filter(|d| d.is_finite() && *d >= 0.0),
            })
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecencyLabel {
    Fresh,
    Current,
    Stale,
    Critical,
    Never,
}

impl RecencyLabel {
    pub fn from_days(days: Option<f64>) -> Self {
        match days {
            None => RecencyLabel::Never,
            Some(d) if d <= 7.0 => RecencyLabel::Fresh,
            Some(d) if d <= 30.0 => RecencyLabel::Current,
            Some(d) if d <= 90.0 => RecencyLabel::Stale,
            Some(_) => RecencyLabel::Critical,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlaStatus {
    Compliant,
    AtRisk,
    NonCompliant,
}

impl SlaStatus {
    pub fn label(&self) -> &'static str {
        match self {
            SlaStatus::Compliant => "COMPLIANT",
            SlaStatus::AtRisk => "AT_RISK",
            SlaStatus::NonCompliant => "NON_COMPLIANT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeanInterval {
    pub lower: f64,
    pub upper: f64,
    pub margin: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlaAssessment {
    pub target_minutes: f64,
    pub predicted_minutes: f64,
    /// (target - predicted) / target
    pub buffer: f64,
    pub status: SlaStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcurrencyProjection {
    pub single_vm_minutes: f64,
    /// Largest k meeting the target (0 when even one restore misses it)
    pub max_concurrent: u32,
    pub degraded_minutes_at_max: Option<f64>,
}

/// Weighted components of the base confidence score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryComponents {
    pub success_rate: f64,
    pub recency: f64,
    pub predictability: f64,
    pub sla_margin: f64,
    pub coverage: f64,
}

/// Recovery producer payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryEstimate {
    pub tests_total: usize,
    pub tests_timed: usize,
    pub success_rate: Option<f64>,
    pub median_minutes: Option<f64>,
    pub p90_minutes: Option<f64>,
    pub p95_minutes: Option<f64>,
    pub mean_minutes: Option<f64>,
    pub mean_interval: Option<MeanInterval>,
    pub coefficient_of_variation: Option<f64>,
    pub days_since_last_test: Option<f64>,
    pub recency: RecencyLabel,
    pub components: Option<RecoveryComponents>,
    pub base_score: Option<f64>,
    pub verification_score: Option<f64>,
    pub verification_instances: usize,
    /// Final blended confidence score, None when nothing supports one
    pub confidence_score: Option<f64>,
    pub grade: Option<Grade>,
    /// Score came from verification alone
    pub verification_only: bool,
    pub sla: Option<SlaAssessment>,
    pub concurrency: Option<ConcurrencyProjection>,
}

impl RecoveryEstimate {
    pub fn has_timing(&self) -> bool {
        self.tests_timed >= 2
    }
}

pub struct RecoveryModel {
    config: RecoveryConfig,
}

impl RecoveryModel {
    pub fn new(config: RecoveryConfig) -> Self {
        Self { config }
    }

    pub fn estimate(
        &self,
        entity: &str,
        observations: &[RecoveryObservation],
        verification: &[VerificationResult],
        as_of: DateTime<Utc>,
    ) -> RecoveryEstimate {
        let target = self.config.target_for(entity);
        let tests_total = observations.len();
        let completed = observations.iter().filter(|o| o.outcome.is_completed()).count();
        let success_rate = (tests_total > 0).then(|| completed as f64 / tests_total as f64);

        let durations = stats::sorted_copy(
            &observations
                .iter()
                .filter(|o| o.outcome.is_completed())
                .filter_map(|o| o.duration_minutes)
                .collect::<Vec<_>>(),
        );
        let tests_timed = durations.len();

        let days_since_last_test = observations
            .iter()
            .map(|o| o.completed_at)
            .max()
            .map(|last| ((as_of - last).num_seconds() as f64 / 86_400.0).max(0.0));

        let verification_score = self.verification_score(verification);

        let mut estimate = RecoveryEstimate {
            tests_total,
            tests_timed,
            success_rate,
            median_minutes: None,
            p90_minutes: None,
            p95_minutes: None,
            mean_minutes: None,
            mean_interval: None,
            coefficient_of_variation: None,
            days_since_last_test,
            recency: RecencyLabel::from_days(days_since_last_test),
            components: None,
            base_score: None,
            verification_score,
            verification_instances: verification.len(),
            confidence_score: None,
            grade: None,
            verification_only: false,
            sla: None,
            concurrency: None,
        };

        if tests_timed < 2 {
            if let Some(v) = verification_score {
                estimate.confidence_score = Some(v);
                estimate.grade = Some(Grade::standard(v));
                estimate.verification_only = true;
            }
            return estimate;
        }

        let p95 = stats::percentile(&durations, 95.0).unwrap_or(0.0);
        let mean = stats::mean(&durations);
        estimate.median_minutes = stats::percentile(&durations, 50.0);
        estimate.p90_minutes = stats::percentile(&durations, 90.0);
        estimate.p95_minutes = Some(p95);
        estimate.mean_minutes = Some(mean);
        estimate.mean_interval = Some(mean_interval(&durations));
        estimate.coefficient_of_variation = stats::coefficient_of_variation(&durations);

        let sla = self.sla(target, p95);
        let components = RecoveryComponents {
            success_rate: success_rate_score(success_rate.unwrap_or(0.0)),
            recency: recency_score(days_since_last_test),
            predictability: predictability_score(estimate.coefficient_of_variation),
            sla_margin: sla_margin_score(sla.buffer),
            coverage: coverage_score(tests_total),
        };
        let w = &self.config.weights;
        let base = clamp_score(
            components.success_rate * w.success_rate
                + components.recency * w.recency
                + components.predictability * w.predictability
                + components.sla_margin * w.sla_margin
                + components.coverage * w.coverage,
        );

        let blend = self.config.verification_blend;
        let confidence = match verification_score {
            Some(v) => clamp_score((1.0 - blend) * base + blend * v),
            None => base,
        };

        estimate.concurrency = Some(self.concurrency(p95, target));
        estimate.sla = Some(sla);
        estimate.components = Some(components);
        estimate.base_score = Some(base);
        estimate.confidence_score = Some(confidence);
        estimate.grade = Some(Grade::standard(confidence));
        estimate
    }

    fn sla(&self, target: f64, predicted: f64) -> SlaAssessment {
        let buffer = if target > 0.0 {
            (target - predicted) / target
        } else {
            -1.0
        };
        let status = if buffer >= self.config.compliant_buffer {
            SlaStatus::Compliant
        } else if buffer >= 0.0 {
            SlaStatus::AtRisk
        } else {
            SlaStatus::NonCompliant
        };
        SlaAssessment {
            target_minutes: target,
            predicted_minutes: predicted,
            buffer,
            status,
        }
    }

    /// Mean per-instance verification score
    fn verification_score(&self, results: &[VerificationResult]) -> Option<f64> {
        if results.is_empty() {
            return None;
        }
        let scores: Vec<f64> = results.iter().map(verification_points).collect();
        Some(clamp_score(stats::mean(&scores)))
    }

    /// Largest concurrency whose degraded duration still meets the target
    pub fn concurrency(&self, single_vm_minutes: f64, target: f64) -> ConcurrencyProjection {
        let resources = f64::from(self.config.parallel_resources.max(1));
        let mut best = 0;
        let mut degraded_at_best = None;
        for k in 1..=self.config.concurrency_ceiling {
            let degraded = single_vm_minutes * self.config.overhead_base.powf(f64::from(k) / resources);
            if degraded > target {
                break;
            }
            best = k;
            degraded_at_best = Some(degraded);
        }
        ConcurrencyProjection {
            single_vm_minutes,
            max_concurrent: best,
            degraded_minutes_at_max: degraded_at_best,
        }
    }
}

/// t-based 95% interval of the mean (needs two or more durations)
fn mean_interval(durations: &[f64]) -> MeanInterval {
    let n = durations.len() as f64;
    let mean = stats::mean(durations);
    let sem = stats::sample_std(durations) / n.sqrt();
    let margin = stats::student_t_quantile(0.975, n - 1.0) * sem;
    MeanInterval {
        lower: (mean - margin).max(0.0),
        upper: mean + margin,
        margin,
    }
}

/// One verified instance: clean 100, partial or any failed drive 60, failed 0
pub fn verification_points(result: &VerificationResult) -> f64 {
    match result.outcome {
        VerificationOutcome::Success if result.failed_drives == 0 => 100.0,
        VerificationOutcome::Success | VerificationOutcome::Partial => 60.0,
        VerificationOutcome::Failed => 0.0,
    }
}

pub fn success_rate_score(rate: f64) -> f64 {
    let score = match rate {
        r if r >= 0.95 => 100.0,
        r if r >= 0.80 => 75.0 + (r - 0.80) / 0.15 * 25.0,
        r if r >= 0.60 => 50.0 + (r - 0.60) / 0.20 * 25.0,
        r => r / 0.60 * 50.0,
    };
    clamp_score(score)
}

/// Recency score decaying through freshness bands
pub fn recency_score(days: Option<f64>) -> f64 {
    let Some(d) = days else {
        return 0.0;
    };
    let score = match d {
        d if d <= 7.0 => 100.0,
        d if d <= 30.0 => 85.0 + (30.0 - d) / 23.0 * 15.0,
        d if d <= 60.0 => 60.0 + (60.0 - d) / 30.0 * 25.0,
        d if d <= 90.0 => 30.0 + (90.0 - d) / 30.0 * 30.0,
        d => 30.0 - (d - 90.0) * 0.5,
    };
    clamp_score(score)
}

/// Inverse of the coefficient of variation
pub fn predictability_score(cv: Option<f64>) -> f64 {
    let Some(cv) = cv else {
        return 0.0;
    };
    let score = match cv {
        c if c <= 0.10 => 100.0,
        c if c <= 0.25 => 100.0 - (c - 0.10) / 0.15 * 25.0,
        c if c <= 0.50 => 75.0 - (c - 0.25) / 0.25 * 25.0,
        c => 50.0 - (c - 0.50) * 100.0,
    };
    clamp_score(score)
}

/// Score from the SLA buffer (fraction of target)
pub fn sla_margin_score(buffer: f64) -> f64 {
    let pct = buffer * 100.0;
    let score = match pct {
        b if b >= 50.0 => 100.0,
        b if b >= 30.0 => 85.0 + (b - 30.0) / 20.0 * 15.0,
        b if b >= 10.0 => 60.0 + (b - 10.0) / 20.0 * 25.0,
        b if b >= 0.0 => 30.0 + b / 10.0 * 30.0,
        b => 30.0 + b,
    };
    clamp_score(score)
}

pub fn coverage_score(tests: usize) -> f64 {
    match tests {
        t if t >= 10 => 100.0,
        t if t >= 5 => 70.0,
        _ => 40.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use chrono::{Duration, TimeZone};

    fn model() -> RecoveryModel {
        RecoveryModel::new(RecoveryConfig::default())
    }

    fn as_of() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 1, 6, 0, 0).unwrap()
    }

    fn tests(durations: &[f64]) -> Vec<RecoveryObservation> {
        durations
            .iter()
            .enumerate()
            .map(|(i, &d)| RecoveryObservation {
                completed_at: as_of() - Duration::days(i as i64 + 1),
                outcome: Outcome::Success,
                duration_minutes: Some(d),
            })
            .collect()
    }

    #[test]
    fn test_score_curves_are_monotone_and_bounded() {
        let mut prev = f64::MAX;
        for d in [0.0, 7.0, 15.0, 30.0, 45.0, 60.0, 75.0, 90.0, 120.0, 400.0] {
            let s = recency_score(Some(d));
            assert!((0.0..=100.0).contains(&s));
            assert!(s <= prev);
            prev = s;
        }
        assert_eq!(recency_score(None), 0.0);
        assert_eq!(predictability_score(Some(0.05)), 100.0);
        assert_eq!(predictability_score(Some(2.0)), 0.0);
        assert_eq!(success_rate_score(1.0), 100.0);
        assert!((success_rate_score(0.6) - 50.0).abs() < 1e-9);
        assert_eq!(sla_margin_score(0.6), 100.0);
        assert_eq!(sla_margin_score(-2.0), 0.0);
    }

    #[test]
    fn test_success_rate_band_edges() {
        let table = [
            (1.00, 100.0),
            (0.95, 100.0),
            (0.875, 87.5),
            (0.80, 75.0),
            (0.70, 62.5),
            (0.60, 50.0),
            (0.30, 25.0),
            (0.0, 0.0),
        ];
        for (rate, expected) in table {
            assert_abs_diff_eq!(success_rate_score(rate), expected, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_sla_margin_band_edges() {
        let table = [
            (0.60, 100.0),
            (0.50, 100.0),
            (0.40, 92.5),
            (0.30, 85.0),
            (0.20, 72.5),
            (0.10, 60.0),
            (0.05, 45.0),
            (0.0, 30.0),
            (-0.10, 20.0),
            (-0.30, 0.0),
            (-1.0, 0.0),
        ];
        for (buffer, expected) in table {
            assert_abs_diff_eq!(sla_margin_score(buffer), expected, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_single_test_is_insufficient() {
        let est = model().estimate("VM-1", &tests(&[12.0]), &[], as_of());
        assert_eq!(est.tests_timed, 1);
        assert!(est.median_minutes.is_none());
        assert!(est.p95_minutes.is_none());
        assert!(est.mean_interval.is_none());
        assert!(est.confidence_score.is_none());
        assert!(!est.has_timing());
    }

    #[test]
    fn test_failures_excluded_from_timing() {
        let mut obs = tests(&[10.0, 12.0, 14.0]);
        obs.push(RecoveryObservation {
            completed_at: as_of() - Duration::days(10),
            outcome: Outcome::Failure,
            duration_minutes: Some(500.0),
        });
        let est = model().estimate("VM-1", &obs, &[], as_of());
        assert_eq!(est.tests_total, 4);
        assert_eq!(est.tests_timed, 3);
        assert_eq!(est.median_minutes, Some(12.0));
        assert_eq!(est.success_rate, Some(0.75));
    }

    #[test]
    fn test_mean_interval_uses_t_margin() {
        let est = model().estimate("VM-1", &tests(&[10.0, 12.0, 14.0, 16.0]), &[], as_of());
        let ci = est.mean_interval.unwrap();
        // mean 13, s = 2.582, sem = 1.291, t(0.975, 3) = 3.182
        assert!((ci.margin - 3.182 * 1.291).abs() < 0.01);
        assert!((ci.lower + ci.upper - 26.0).abs() < 1e-9);
    }

    #[test]
    fn test_sla_status_bands() {
        let m = model();
        assert_eq!(m.sla(30.0, 20.0).status, SlaStatus::Compliant);
        assert_eq!(m.sla(30.0, 27.0).status, SlaStatus::AtRisk);
        assert_eq!(m.sla(30.0, 30.0).status, SlaStatus::AtRisk);
        assert_eq!(m.sla(30.0, 31.0).status, SlaStatus::NonCompliant);
    }

    #[test]
    fn test_concurrency_projection() {
        let m = model();
        // 10 * 1.1^(k/2) <= 30  ->  k <= 2 * ln 3 / ln 1.1 = 23.05, capped at 20
        assert_eq!(m.concurrency(10.0, 30.0).max_concurrent, 20);
        // 25 * 1.1^(k/2) <= 30  ->  k <= 3.83
        let p = m.concurrency(25.0, 30.0);
        assert_eq!(p.max_concurrent, 3);
        assert!(p.degraded_minutes_at_max.unwrap() <= 30.0);
        assert_eq!(m.concurrency(40.0, 30.0).max_concurrent, 0);
    }

    #[test]
    fn test_verification_blend_and_substitution() {
        let verification = vec![
            VerificationResult {
                instance: "vm-1".to_string(),
                timestamp: as_of() - Duration::days(1),
                outcome: VerificationOutcome::Success,
                boot_latency_ms: Some(60_000),
                failed_drives: 0,
            },
            VerificationResult {
                instance: "vm-2".to_string(),
                timestamp: as_of() - Duration::days(1),
                outcome: VerificationOutcome::Partial,
                boot_latency_ms: Some(600_000),
                failed_drives: 1,
            },
        ];
        // (100 + 60) / 2, boot latency does not change the points
        let only = model().estimate("VM-1", &[], &verification, as_of());
        assert!(only.verification_only);
        assert!((only.confidence_score.unwrap() - 80.0).abs() < 1e-9);
        assert!(only.p95_minutes.is_none());

        let blended = model().estimate("VM-1", &tests(&[10.0; 10]), &verification, as_of());
        let base = blended.base_score.unwrap();
        let expected = 0.7 * base + 0.3 * 80.0;
        assert!((blended.confidence_score.unwrap() - expected).abs() < 1e-9);
        assert!(!blended.verification_only);
    }
}
