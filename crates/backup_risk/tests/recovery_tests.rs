//! Golden tests for the recovery model.
//!
//! Skewed restore histories, SLA status from p95, and verification
//! substitution when timing history is too short.

use approx::assert_abs_diff_eq;
use backup_risk::config::RecoveryConfig;
use backup_risk::recovery::{RecoveryModel, RecoveryObservation, SlaStatus};
use backup_risk::{
    MetricStore, Outcome, Pipeline, ProducerPayload, QualityFlag, RiskConfig, Sample,
    VerificationOutcome, VerificationResult,
};
use chrono::{DateTime, Duration, TimeZone, Utc};

fn as_of() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 6, 0, 0).unwrap()
}

fn model() -> RecoveryModel {
    RecoveryModel::new(RecoveryConfig::default())
}

fn observations(durations: &[f64]) -> Vec<RecoveryObservation> {
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

fn verified(instance: &str, outcome: VerificationOutcome) -> VerificationResult {
    VerificationResult {
        instance: instance.to_string(),
        timestamp: as_of() - Duration::days(2),
        outcome,
        boot_latency_ms: Some(45_000),
        failed_drives: 0,
    }
}

// =============================================================================
// GOLDEN TEST 1: one slow restore pulls p95 far above the median
// =============================================================================

#[test]
fn test_skewed_history_uses_p95() {
    let mut durations = vec![10.0; 9];
    durations.push(100.0);
    let skewed = model().estimate("VM-1", &observations(&durations), &[], as_of());
    let steady = model().estimate("VM-1", &observations(&[15.0; 10]), &[], as_of());

    assert_eq!(skewed.median_minutes, Some(10.0));
    assert_abs_diff_eq!(skewed.p95_minutes.unwrap(), 59.5, epsilon = 1e-9);
    assert!(skewed.p95_minutes.unwrap() > 5.0 * skewed.median_minutes.unwrap());

    // ASSERT: SLA is judged on p95, not the typical restore
    assert_eq!(skewed.sla.as_ref().unwrap().status, SlaStatus::NonCompliant);
    assert_eq!(steady.sla.as_ref().unwrap().status, SlaStatus::Compliant);
    assert_eq!(skewed.concurrency.as_ref().unwrap().max_concurrent, 0);

    let skewed_parts = skewed.components.as_ref().unwrap();
    let steady_parts = steady.components.as_ref().unwrap();
    assert!(skewed_parts.predictability < steady_parts.predictability);
    assert!(skewed.confidence_score.unwrap() < steady.confidence_score.unwrap());
}

#[test]
fn test_mean_interval_contains_mean() {
    let mut durations = vec![10.0; 9];
    durations.push(100.0);
    for history in [durations, vec![12.0, 14.0, 13.0, 18.0], vec![15.0; 10]] {
        let estimate = model().estimate("VM-1", &observations(&history), &[], as_of());
        let mean = estimate.mean_minutes.unwrap();
        let ci = estimate.mean_interval.unwrap();
        assert!(ci.lower <= mean && mean <= ci.upper);
        assert!(ci.lower >= 0.0);
    }
}

#[test]
fn test_confidence_in_range() {
    let histories: Vec<Vec<f64>> = vec![
        vec![5.0, 6.0],
        vec![10.0; 12],
        vec![200.0, 10.0, 400.0],
        vec![29.0, 31.0, 30.0, 28.0, 32.0],
    ];
    for history in histories {
        let estimate = model().estimate("VM-1", &observations(&history), &[], as_of());
        let score = estimate.confidence_score.unwrap();
        assert!((0.0..=100.0).contains(&score));
        assert!(estimate.has_timing());
    }
}

// =============================================================================
// GOLDEN TEST 2: no timing history, verification results substitute
// =============================================================================

#[test]
fn test_verification_substitution_through_pipeline() {
    let store = MetricStore::open_in_memory().unwrap();
    let config = RiskConfig::default();
    let pipeline = Pipeline::new(&config, &store).unwrap();

    let verification = vec![
        verified("vm-01", VerificationOutcome::Success),
        verified("vm-02", VerificationOutcome::Success),
    ];
    let outcome = pipeline
        .run_recovery("JOB-A", &[], &verification, as_of())
        .unwrap();
    let record = outcome.written().unwrap();

    assert!(record.quality.has_flag(QualityFlag::VerificationSubstituted));
    match &record.payload {
        ProducerPayload::Recovery(estimate) => {
            assert!(estimate.verification_only);
            assert_eq!(estimate.confidence_score, Some(100.0));
            // ASSERT: timing statistics stay absent, never zero
            assert!(estimate.median_minutes.is_none());
            assert!(estimate.p95_minutes.is_none());
            assert!(estimate.sla.is_none());
        }
        other => panic!("unexpected payload {:?}", other.kind()),
    }
}

#[test]
fn test_future_restore_tests_are_ignored() {
    let store = MetricStore::open_in_memory().unwrap();
    let config = RiskConfig::default();
    let pipeline = Pipeline::new(&config, &store).unwrap();

    let tests: Vec<Sample> = [-3, -2, 5]
        .iter()
        .map(|d| {
            Sample::new("JOB-A", as_of() + Duration::days(*d))
                .with_sub_entity("vm-01")
                .with_outcome(Outcome::Success)
                .with_duration(14.0)
        })
        .collect();
    let outcome = pipeline.run_recovery("JOB-A", &tests, &[], as_of()).unwrap();
    match &outcome.written().unwrap().payload {
        ProducerPayload::Recovery(estimate) => assert_eq!(estimate.tests_total, 2),
        other => panic!("unexpected payload {:?}", other.kind()),
    }
}
