//! Golden tests for the quality gate.
//!
//! Covers the minimum-count boundary, compounding penalties and the
//! "no record on fatal insufficiency" contract through the pipeline.

use backup_risk::config::QualityThresholds;
use backup_risk::{
    ConfidenceTier, MetricStore, Outcome, Pipeline, ProducerKind, QualityFlag, QualityGate,
    RiskConfig, RunOutcome, Sample,
};
use chrono::{DateTime, Duration, TimeZone, Utc};

fn as_of() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 6, 0, 0).unwrap()
}

/// One session per `step_days`, newest first, alternating between two VMs
fn sessions(count: usize, step_days: i64, vm_for: impl Fn(usize) -> &'static str) -> Vec<Sample> {
    (0..count)
        .map(|i| {
            let ts = as_of() - Duration::days(1 + i as i64 * step_days) + Duration::hours(16);
            Sample::new("JOB-A", ts)
                .with_sub_entity(vm_for(i))
                .with_outcome(Outcome::Success)
                .with_duration(40.0)
        })
        .collect()
}

fn alternating(i: usize) -> &'static str {
    if i % 2 == 0 {
        "vm-01"
    } else {
        "vm-02"
    }
}

// =============================================================================
// GOLDEN TEST 1: exactly the minimum count is HIGH, one fewer is INSUFFICIENT
// =============================================================================

#[test]
fn test_minimum_sample_boundary() {
    let gate = QualityGate::new(QualityThresholds::for_health());

    let at_minimum = gate.assess(&sessions(30, 1, alternating));
    assert_eq!(at_minimum.confidence_tier, ConfidenceTier::High);
    assert_eq!(at_minimum.confidence_multiplier, 1.0);
    assert!(at_minimum.flags.is_empty());

    let one_short = gate.assess(&sessions(29, 1, alternating));
    assert_eq!(one_short.confidence_tier, ConfidenceTier::Insufficient);
    assert!(one_short.is_fatal());
    assert!(one_short.has_flag(QualityFlag::InsufficientSamples));

    // ASSERT: admit() turns the fatal assessment into an abort
    let err = gate
        .admit("JOB-A", ProducerKind::Health, &sessions(29, 1, alternating))
        .unwrap_err();
    assert!(err.is_insufficient_data());
}

// =============================================================================
// GOLDEN TEST 2: fatal insufficiency writes no record
// =============================================================================

#[test]
fn test_fatal_insufficiency_writes_nothing() {
    let store = MetricStore::open_in_memory().unwrap();
    let config = RiskConfig::default();
    let pipeline = Pipeline::new(&config, &store).unwrap();

    let outcome = pipeline
        .run_health("JOB-A", &sessions(29, 1, alternating), as_of())
        .unwrap();
    assert!(matches!(outcome, RunOutcome::Skipped(_)));
    assert_eq!(store.metric_count("JOB-A", ProducerKind::Health).unwrap(), 0);

    let outcome = pipeline
        .run_health("JOB-A", &sessions(30, 1, alternating), as_of())
        .unwrap();
    assert!(outcome.is_written());
    assert_eq!(store.metric_count("JOB-A", ProducerKind::Health).unwrap(), 1);
}

// =============================================================================
// GOLDEN TEST 3: non-fatal penalties compound
// =============================================================================

#[test]
fn test_sparse_and_dominated_compound() {
    let gate = QualityGate::new(QualityThresholds::for_health());
    // 30 sessions every 4 days (0.26/day), 27 of them from vm-01
    let samples = sessions(30, 4, |i| if i < 27 { "vm-01" } else { "vm-02" });
    let assessment = gate.assess(&samples);

    assert!(assessment.has_flag(QualityFlag::SparseData));
    assert!(assessment.has_flag(QualityFlag::SubEntityDominates));
    assert_eq!(assessment.flags.len(), 2);
    assert!((assessment.confidence_multiplier - 0.8 * 0.85).abs() < 1e-12);
    assert_eq!(assessment.confidence_tier, ConfidenceTier::Moderate);
    assert_eq!(assessment.notes.len(), 2);
}

#[test]
fn test_missing_metadata_flagged() {
    let gate = QualityGate::new(QualityThresholds::for_health());
    let mut samples = sessions(30, 1, alternating);
    samples[3].sub_entity = None;
    samples[7].sub_entity = None;

    let assessment = gate.assess(&samples);
    assert!(assessment.has_flag(QualityFlag::IncompleteMetadata));
    assert!((assessment.confidence_multiplier - 0.7).abs() < 1e-12);
    assert_eq!(assessment.confidence_tier, ConfidenceTier::Moderate);
}

// =============================================================================
// GOLDEN TEST 4: multipliers stay in [0, 1] however many rules fail
// =============================================================================

#[test]
fn test_multiplier_bounds() {
    let mut thresholds = QualityThresholds::for_health();
    thresholds.fatal_rules.clear();
    let gate = QualityGate::new(thresholds);

    let cases: Vec<Vec<Sample>> = vec![
        Vec::new(),
        sessions(1, 1, alternating),
        sessions(5, 9, |_| "vm-01"),
        sessions(30, 1, alternating),
        sessions(60, 3, |i| if i % 10 == 0 { "vm-02" } else { "vm-01" }),
    ];
    for samples in cases {
        let assessment = gate.assess(&samples);
        assert!((0.0..=1.0).contains(&assessment.confidence_multiplier));
        assert_eq!(
            assessment.confidence_tier,
            ConfidenceTier::from_multiplier(assessment.confidence_multiplier)
        );
    }
}
