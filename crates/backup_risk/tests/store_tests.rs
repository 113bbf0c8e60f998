//! Golden tests for the record store on disk.

use backup_risk::config::RiskConfigSection;
use backup_risk::risk::RiskInputs;
use backup_risk::store::SCHEMA_VERSION;
use backup_risk::{MetricStore, Outcome, Pipeline, ProducerKind, RiskConfig, RiskSynthesizer, Sample, Tier};
use chrono::{DateTime, Duration, TimeZone, Utc};
use tempfile::TempDir;

fn as_of() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 6, 0, 0).unwrap()
}

fn sessions() -> Vec<Sample> {
    (1..=30)
        .map(|d| {
            Sample::new("JOB-A", as_of() - Duration::days(d) + Duration::hours(16))
                .with_sub_entity(if d % 2 == 0 { "vm-01" } else { "vm-02" })
                .with_outcome(Outcome::Success)
                .with_duration(35.0)
        })
        .collect()
}

// =============================================================================
// GOLDEN TEST 1: records survive reopening the store file
// =============================================================================

#[test]
fn test_records_persist_across_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("state").join("risk.db");

    {
        let store = MetricStore::open(&path).unwrap();
        let config = RiskConfig::default();
        let pipeline = Pipeline::new(&config, &store).unwrap();
        assert!(pipeline.run_health("JOB-A", &sessions(), as_of()).unwrap().is_written());
        assert!(pipeline.run_risk("JOB-A", as_of()).unwrap().is_written());
    }

    // ASSERT: parent directories were created and the rows are still there
    assert!(path.exists());
    let store = MetricStore::open(&path).unwrap();
    assert_eq!(store.schema_version().unwrap(), SCHEMA_VERSION);
    assert_eq!(store.metric_count("JOB-A", ProducerKind::Health).unwrap(), 1);

    let health = store
        .latest_metric("JOB-A", ProducerKind::Health)
        .unwrap()
        .unwrap();
    assert_eq!(health.created_at, as_of());
    assert_eq!(health.quality.confidence_multiplier, 1.0);

    let risk = store.latest_risk("JOB-A").unwrap().unwrap();
    assert_eq!(risk.analysis_day, as_of().date_naive());
    assert_eq!(risk.tier, Tier::Low);
}

// =============================================================================
// GOLDEN TEST 2: re-running the same day replaces rows
// =============================================================================

#[test]
fn test_rerun_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let store = MetricStore::open(dir.path().join("risk.db")).unwrap();
    let config = RiskConfig::default();
    let pipeline = Pipeline::new(&config, &store).unwrap();

    for hour in [0, 2, 5] {
        let run_at = as_of() + Duration::hours(hour);
        pipeline.run_health("JOB-A", &sessions(), run_at).unwrap();
        pipeline.run_risk("JOB-A", run_at).unwrap();
    }

    assert_eq!(store.metric_count("JOB-A", ProducerKind::Health).unwrap(), 1);
    assert_eq!(store.risk_records_for_day(as_of().date_naive()).unwrap().len(), 1);
    let latest = store
        .latest_metric("JOB-A", ProducerKind::Health)
        .unwrap()
        .unwrap();
    assert_eq!(latest.created_at, as_of() + Duration::hours(5));

    // A new day adds a row next to the old one
    let tomorrow = as_of() + Duration::days(1);
    pipeline.run_health("JOB-A", &sessions(), tomorrow).unwrap();
    assert_eq!(store.metric_count("JOB-A", ProducerKind::Health).unwrap(), 2);
}

// =============================================================================
// GOLDEN TEST 3: a day's risk records rank by business impact
// =============================================================================

#[test]
fn test_risk_records_ranked_by_impact() {
    let dir = TempDir::new().unwrap();
    let store = MetricStore::open(dir.path().join("risk.db")).unwrap();
    let synth = RiskSynthesizer::new(RiskConfigSection::default()).unwrap();

    for entity in ["zeta-archive", "fileserver02", "PROD-SQL01", "alpha-archive", "erp-batch"] {
        let record = synth.synthesize(entity, &RiskInputs::default(), as_of());
        store.upsert_risk(&record).unwrap();
    }

    let ranked = store.risk_records_for_day(as_of().date_naive()).unwrap();
    let names: Vec<&str> = ranked.iter().map(|r| r.entity.as_str()).collect();
    assert_eq!(
        names,
        vec!["PROD-SQL01", "erp-batch", "fileserver02", "alpha-archive", "zeta-archive"]
    );
    assert!(ranked
        .windows(2)
        .all(|pair| pair[0].business_impact >= pair[1].business_impact));

    let other_day = as_of().date_naive() - Duration::days(1);
    assert!(store.risk_records_for_day(other_day).unwrap().is_empty());
}
