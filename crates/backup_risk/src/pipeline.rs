//! Batch run orchestration
//!
//! One run, per entity:
//! 1. health, capacity, efficiency, recovery producers (each gated, each
//!    upserting its own metric record)
//! 2. risk synthesis from the latest record of every producer
//!
//! An entity whose data is insufficient for a producer is skipped for that
//! producer with a logged reason. Provider and store failures abort only the
//! entity they happen on.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use crate::capacity::{utilization_points, CapacityForecastEngine, FitConfidence};
use crate::config::{QualityThresholds, RiskConfig};
use crate::efficiency::EfficiencyAnalyzer;
use crate::error::{Result, RiskError};
use crate::provider::{EntityDescriptor, SampleProvider};
use crate::quality::{QualityFlag, QualityGate};
use crate::record::{MetricRecord, ProducerKind, ProducerPayload};
use crate::recovery::{recovery_observations, RecoveryModel};
use crate::risk::{RiskInputs, RiskRecord, RiskSynthesizer};
use crate::sample::{EntityKind, Sample, VerificationResult};
use crate::store::MetricStore;
use crate::trend::{RepositoryStatus, TrendPatternAnalyzer};

/// Result of one producer or synthesis step
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome<T> {
    Written(T),
    Skipped(String),
}

impl<T> RunOutcome<T> {
    pub fn is_written(&self) -> bool {
        matches!(self, RunOutcome::Written(_))
    }

    pub fn written(&self) -> Option<&T> {
        match self {
            RunOutcome::Written(value) => Some(value),
            RunOutcome::Skipped(_) => None,
        }
    }
}

/// Counters for one full run
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub entities: usize,
    pub records_written: usize,
    pub skipped: usize,
    pub failed: usize,
    pub risk_records: Vec<RiskRecord>,
}

impl RunSummary {
    fn count<T>(&mut self, outcome: &Result<RunOutcome<T>>) {
        match outcome {
            Ok(RunOutcome::Written(_)) => self.records_written += 1,
            Ok(RunOutcome::Skipped(_)) => self.skipped += 1,
            Err(_) => self.failed += 1,
        }
    }
}

pub struct Pipeline<'a> {
    config: &'a RiskConfig,
    store: &'a MetricStore,
    analyzer: TrendPatternAnalyzer,
    capacity: CapacityForecastEngine,
    efficiency: EfficiencyAnalyzer,
    recovery: RecoveryModel,
    synthesizer: RiskSynthesizer,
    /// Entities the provider declared in the current run
    known_entities: BTreeSet<String>,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a RiskConfig, store: &'a MetricStore) -> Result<Self> {
        Ok(Self {
            config,
            store,
            analyzer: TrendPatternAnalyzer::new(config.trend.clone(), config.health.clone()),
            capacity: CapacityForecastEngine::new(config.capacity.clone()),
            efficiency: EfficiencyAnalyzer::new(config.efficiency.clone()),
            recovery: RecoveryModel::new(config.recovery.clone()),
            synthesizer: RiskSynthesizer::new(config.risk.clone())?,
            known_entities: BTreeSet::new(),
        })
    }

    pub fn synthesizer(&self) -> &RiskSynthesizer {
        &self.synthesizer
    }

    pub fn run_health(
        &self,
        entity: &str,
        samples: &[Sample],
        as_of: DateTime<Utc>,
    ) -> Result<RunOutcome<MetricRecord>> {
        let thresholds = &self.config.quality.health;
        let sessions = window(thresholds, samples, as_of, |s| s.outcome.is_some());
        if sessions.is_empty() {
            return Ok(nothing_to_do(entity, ProducerKind::Health, "no session samples"));
        }

        let quality = match QualityGate::new(thresholds.clone()).admit(entity, ProducerKind::Health, &sessions) {
            Ok(quality) => quality,
            Err(e) => return skip_if_insufficient(e),
        };
        let report = self.analyzer.analyze(&sessions, &self.repositories(entity));
        self.write(MetricRecord::new(entity, as_of, quality, ProducerPayload::Health(report)))
    }

    pub fn run_capacity(
        &self,
        entity: &str,
        samples: &[Sample],
        as_of: DateTime<Utc>,
    ) -> Result<RunOutcome<MetricRecord>> {
        let thresholds = &self.config.quality.capacity;
        let usage = window(thresholds, samples, as_of, |s| {
            s.size_gb.is_some() && s.capacity_gb.is_some()
        });
        if usage.is_empty() {
            return Ok(nothing_to_do(entity, ProducerKind::Capacity, "no usage samples"));
        }

        let mut quality = match QualityGate::new(thresholds.clone()).admit(entity, ProducerKind::Capacity, &usage) {
            Ok(quality) => quality,
            Err(e) => return skip_if_insufficient(e),
        };
        let forecast = match self.capacity.forecast(entity, &utilization_points(&usage)) {
            Ok(forecast) => forecast,
            Err(e) => return skip_if_insufficient(e),
        };

        if forecast.gaps_interpolated > 0 {
            quality.degrade(
                QualityFlag::GapsInterpolated,
                1.0,
                format!("{} missing days interpolated", forecast.gaps_interpolated),
            );
        }
        if forecast.outliers_removed > 0 {
            quality.degrade(
                QualityFlag::OutliersRemoved,
                1.0,
                format!("{} outlier points removed", forecast.outliers_removed),
            );
        }
        if forecast.fit_confidence == FitConfidence::Low {
            quality.degrade(
                QualityFlag::LowFitQuality,
                self.config.capacity.low_fit_penalty,
                format!("model R² {:.2} is below {:.2}", forecast.model.goodness_of_fit, self.config.capacity.r2_moderate),
            );
        }

        self.write(MetricRecord::new(entity, as_of, quality, ProducerPayload::Capacity(forecast)))
    }

    pub fn run_efficiency(
        &self,
        entity: &str,
        samples: &[Sample],
        as_of: DateTime<Utc>,
    ) -> Result<RunOutcome<MetricRecord>> {
        let thresholds = &self.config.quality.efficiency;
        let ratios = window(thresholds, samples, as_of, |s| {
            s.dedup_ratio.is_some() && s.compression_ratio.is_some()
        });
        if ratios.is_empty() {
            return Ok(nothing_to_do(entity, ProducerKind::Efficiency, "no ratio samples"));
        }

        let quality = match QualityGate::new(thresholds.clone()).admit(entity, ProducerKind::Efficiency, &ratios) {
            Ok(quality) => quality,
            Err(e) => return skip_if_insufficient(e),
        };
        let report = match self.efficiency.analyze(entity, &ratios) {
            Ok(report) => report,
            Err(e) => return skip_if_insufficient(e),
        };
        self.write(MetricRecord::new(entity, as_of, quality, ProducerPayload::Efficiency(report)))
    }

    pub fn run_recovery(
        &self,
        entity: &str,
        restore_tests: &[Sample],
        verification: &[VerificationResult],
        as_of: DateTime<Utc>,
    ) -> Result<RunOutcome<MetricRecord>> {
        let thresholds = &self.config.quality.recovery;
        let tests = window(thresholds, restore_tests, as_of, |s| s.outcome.is_some());
        let verification: Vec<VerificationResult> = verification
            .iter()
            .filter(|v| v.timestamp <= as_of)
            .cloned()
            .collect();
        if tests.is_empty() && verification.is_empty() {
            return Ok(nothing_to_do(
                entity,
                ProducerKind::Recovery,
                "no restore tests or verification results",
            ));
        }

        let mut quality = match QualityGate::new(thresholds.clone()).admit(entity, ProducerKind::Recovery, &tests) {
            Ok(quality) => quality,
            Err(e) => return skip_if_insufficient(e),
        };
        let estimate = self
            .recovery
            .estimate(entity, &recovery_observations(&tests), &verification, as_of);

        if estimate.verification_only {
            quality.degrade(
                QualityFlag::VerificationSubstituted,
                1.0,
                format!(
                    "{} timed restore tests, score from {} verification results",
                    estimate.tests_timed, estimate.verification_instances
                ),
            );
        } else if !estimate.has_timing() {
            quality.mark_insufficient(
                QualityFlag::InsufficientTimingHistory,
                format!("{} timed restore tests, 2 required", estimate.tests_timed),
            );
        }

        self.write(MetricRecord::new(entity, as_of, quality, ProducerPayload::Recovery(estimate)))
    }

    /// The job's linked repository, available when the provider declared it
    fn repositories(&self, entity: &str) -> Vec<RepositoryStatus> {
        self.synthesizer
            .config()
            .repository_links
            .get(entity)
            .map(|name| RepositoryStatus {
                name: name.clone(),
                available: self.known_entities.contains(name),
            })
            .into_iter()
            .collect()
    }

    /// Synthesize from the latest stored record of every producer
    pub fn run_risk(&self, entity: &str, as_of: DateTime<Utc>) -> Result<RunOutcome<RiskRecord>> {
        let mut inputs = RiskInputs::default();
        for producer in ProducerKind::ALL {
            let source = self.synthesizer.source_entity(entity, producer);
            // Records written after the analysis time do not exist yet for this run
            if let Some(record) = self.store.latest_metric_as_of(source, producer, as_of)? {
                inputs.set(record);
            }
        }

        let record = self.synthesizer.synthesize(entity, &inputs, as_of);
        self.store.upsert_risk(&record)?;
        info!(
            "Risk for {}: {} (impact {:.1}, confidence {:.2}, {} flags)",
            entity,
            record.category,
            record.business_impact,
            record.overall_confidence,
            record.flags.len()
        );
        Ok(RunOutcome::Written(record))
    }

    /// All producers for one entity, in order
    pub fn run_producers(
        &self,
        provider: &dyn SampleProvider,
        entity: &str,
        as_of: DateTime<Utc>,
        only: Option<ProducerKind>,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let wanted = |kind: ProducerKind| only.map_or(true, |o| o == kind);
        let samples = provider.samples(entity)?;

        if wanted(ProducerKind::Health) {
            let outcome = self.run_health(entity, &samples, as_of);
            summary.count(&outcome);
            log_failure(entity, ProducerKind::Health, &outcome);
        }
        if wanted(ProducerKind::Capacity) {
            let outcome = self.run_capacity(entity, &samples, as_of);
            summary.count(&outcome);
            log_failure(entity, ProducerKind::Capacity, &outcome);
        }
        if wanted(ProducerKind::Efficiency) {
            let outcome = self.run_efficiency(entity, &samples, as_of);
            summary.count(&outcome);
            log_failure(entity, ProducerKind::Efficiency, &outcome);
        }
        if wanted(ProducerKind::Recovery) {
            let tests = provider.restore_tests(entity)?;
            let verification = provider.verification(entity)?;
            let outcome = self.run_recovery(entity, &tests, &verification, as_of);
            summary.count(&outcome);
            log_failure(entity, ProducerKind::Recovery, &outcome);
        }
        Ok(())
    }

    /// Every producer for every entity, then synthesis for every job
    pub fn run_all(
        &mut self,
        provider: &dyn SampleProvider,
        as_of: DateTime<Utc>,
        only: Option<ProducerKind>,
    ) -> Result<RunSummary> {
        let entities: Vec<EntityDescriptor> = provider.entities()?;
        let mut summary = RunSummary {
            entities: entities.len(),
            ..RunSummary::default()
        };

        self.known_entities = entities.iter().map(|d| d.name.clone()).collect();
        for descriptor in &entities {
            if let Some(repository) = &descriptor.repository {
                self.synthesizer
                    .link_repository(descriptor.name.clone(), repository.clone());
            }
        }

        for descriptor in &entities {
            if let Err(e) = self.run_producers(provider, &descriptor.name, as_of, only, &mut summary) {
                warn!("Aborted {}: {}", descriptor.name, e);
                summary.failed += 1;
            }
        }

        if only.is_none() {
            for descriptor in entities.iter().filter(|d| d.kind == EntityKind::Job) {
                match self.run_risk(&descriptor.name, as_of) {
                    Ok(RunOutcome::Written(record)) => summary.risk_records.push(record),
                    Ok(RunOutcome::Skipped(_)) => summary.skipped += 1,
                    Err(e) => {
                        warn!("Risk synthesis failed for {}: {}", descriptor.name, e);
                        summary.failed += 1;
                    }
                }
            }
        }

        summary
            .risk_records
            .sort_by(|a, b| b.business_impact.total_cmp(&a.business_impact));
        Ok(summary)
    }

    fn write(&self, record: MetricRecord) -> Result<RunOutcome<MetricRecord>> {
        self.store.upsert_metric(&record)?;
        info!(
            "Wrote {} record for {} ({}, multiplier {:.2}, {} flags)",
            record.producer(),
            record.entity,
            record.quality.confidence_tier,
            record.quality.confidence_multiplier,
            record.quality.flags.len()
        );
        Ok(RunOutcome::Written(record))
    }
}

/// Samples inside the producer's lookback window that pass `keep`
fn window<F>(thresholds: &QualityThresholds, samples: &[Sample], as_of: DateTime<Utc>, keep: F) -> Vec<Sample>
where
    F: Fn(&Sample) -> bool,
{
    let since = thresholds
        .lookback_days
        .map(|days| as_of - Duration::days(i64::from(days)));
    let mut selected: Vec<Sample> = samples
        .iter()
        .filter(|s| s.timestamp <= as_of)
        .filter(|s| since.map_or(true, |since| s.timestamp > since))
        .filter(|s| keep(s))
        .cloned()
        .collect();
    selected.sort_by_key(|s| s.timestamp);
    selected
}

fn nothing_to_do<T>(entity: &str, producer: ProducerKind, reason: &str) -> RunOutcome<T> {
    debug!("{} has nothing for {}: {}", entity, producer, reason);
    RunOutcome::Skipped(reason.to_string())
}

fn skip_if_insufficient<T>(e: RiskError) -> Result<RunOutcome<T>> {
    if e.is_insufficient_data() {
        warn!("Skipped: {}", e);
        Ok(RunOutcome::Skipped(e.to_string()))
    } else {
        Err(e)
    }
}

fn log_failure<T>(entity: &str, producer: ProducerKind, outcome: &Result<RunOutcome<T>>) {
    if let Err(e) = outcome {
        warn!("{} failed for {}: [{}] {}", producer, entity, e.code(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::Outcome;
    use chrono::TimeZone;

    fn as_of() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 6, 0, 0).unwrap()
    }

    fn sessions(days: i64) -> Vec<Sample> {
        (1..=days)
            .map(|d| {
                Sample::new("JOB-A", as_of() - Duration::days(d) + Duration::hours(16))
                    .with_sub_entity(if d % 2 == 0 { "vm-01" } else { "vm-02" })
                    .with_outcome(Outcome::Success)
                    .with_duration(42.0)
            })
            .collect()
    }

    #[test]
    fn test_window_respects_as_of_and_lookback() {
        let mut thresholds = QualityThresholds::for_health();
        thresholds.lookback_days = Some(10);
        let mut samples = sessions(20);
        samples.push(
            Sample::new("JOB-A", as_of() + Duration::hours(1)).with_outcome(Outcome::Failure),
        );
        let selected = window(&thresholds, &samples, as_of(), |s| s.outcome.is_some());
        assert_eq!(selected.len(), 10);
        assert!(selected.iter().all(|s| s.timestamp <= as_of()));
    }

    #[test]
    fn test_insufficient_health_is_skipped_without_record() {
        let store = MetricStore::open_in_memory().unwrap();
        let config = RiskConfig::default();
        let pipeline = Pipeline::new(&config, &store).unwrap();

        let outcome = pipeline.run_health("JOB-A", &sessions(29), as_of()).unwrap();
        assert!(matches!(outcome, RunOutcome::Skipped(ref reason) if reason.contains("29 samples")));
        assert_eq!(store.metric_count("JOB-A", ProducerKind::Health).unwrap(), 0);
    }

    #[test]
    fn test_health_record_written_at_minimum() {
        let store = MetricStore::open_in_memory().unwrap();
        let config = RiskConfig::default();
        let pipeline = Pipeline::new(&config, &store).unwrap();

        let outcome = pipeline.run_health("JOB-A", &sessions(30), as_of()).unwrap();
        let record = outcome.written().unwrap();
        assert_eq!(record.quality.confidence_multiplier, 1.0);
        assert_eq!(store.metric_count("JOB-A", ProducerKind::Health).unwrap(), 1);
    }

    #[test]
    fn test_recovery_without_timing_is_insufficient() {
        let store = MetricStore::open_in_memory().unwrap();
        let config = RiskConfig::default();
        let pipeline = Pipeline::new(&config, &store).unwrap();

        let one_test = vec![Sample::new("JOB-A", as_of() - Duration::days(3))
            .with_sub_entity("vm-01")
            .with_outcome(Outcome::Success)
            .with_duration(12.0)];
        let outcome = pipeline.run_recovery("JOB-A", &one_test, &[], as_of()).unwrap();
        let record = outcome.written().unwrap();
        assert!(record.quality.has_flag(QualityFlag::InsufficientTimingHistory));
        assert_eq!(record.quality.confidence_multiplier, 0.0);
    }

    #[test]
    fn test_nothing_to_do_when_no_inputs() {
        let store = MetricStore::open_in_memory().unwrap();
        let config = RiskConfig::default();
        let pipeline = Pipeline::new(&config, &store).unwrap();
        let outcome = pipeline.run_capacity("JOB-A", &sessions(30), as_of()).unwrap();
        assert!(!outcome.is_written());
    }
}
