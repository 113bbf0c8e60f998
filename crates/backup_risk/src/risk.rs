//! Risk Synthesizer - folds the latest producer records into one RiskRecord
//!
//! Steps for one entity:
//! 1. Classify the business tier (exact overrides, then ordered regex rules)
//! 2. Check every producer slot: fresh, stale (older than its cadence) or missing
//! 3. Map each producer payload to a 0-100 component risk
//! 4. Weighted composite, scaled by the overall confidence, scaled by tier weight
//! 5. Category from business impact
//!
//! Staleness and missing producers never abort synthesis; they lower
//! confidence and leave a named flag on the record.

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

use crate::config::{ComponentWeights, RiskConfigSection};
use crate::error::{Result, RiskError};
use crate::quality::QualityFlag;
use crate::record::{clamp_score, MetricRecord, ProducerKind, ProducerPayload};

/// Business criticality of an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Critical,
    High,
    Medium,
    Low,
}

impl Tier {
    pub fn label(&self) -> &'static str {
        match self {
            Tier::Critical => "CRITICAL",
            Tier::High => "HIGH",
            Tier::Medium => "MEDIUM",
            Tier::Low => "LOW",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Compiled tier rules
#[derive(Debug, Clone)]
pub struct TierClassifier {
    overrides: BTreeMap<String, Tier>,
    rules: Vec<(Tier, Vec<Regex>)>,
    default_tier: Tier,
}

impl TierClassifier {
    pub fn new(config: &RiskConfigSection) -> Result<Self> {
        let mut rules = Vec::with_capacity(config.tier_rules.len());
        for rule in &config.tier_rules {
            let mut compiled = Vec::with_capacity(rule.patterns.len());
            for pattern in &rule.patterns {
                let regex = Regex::new(pattern).map_err(|source| RiskError::InvalidPattern {
                    pattern: pattern.clone(),
                    source,
                })?;
                compiled.push(regex);
            }
            rules.push((rule.tier, compiled));
        }
        Ok(Self {
            overrides: config.tier_overrides.clone(),
            rules,
            default_tier: config.default_tier,
        })
    }

    /// Override first, then the first rule with a matching pattern
    pub fn classify(&self, entity: &str) -> Tier {
        if let Some(tier) = self.overrides.get(entity) {
            return *tier;
        }
        self.rules
            .iter()
            .find(|(_, patterns)| patterns.iter().any(|p| p.is_match(entity)))
            .map(|(tier, _)| *tier)
            .unwrap_or(self.default_tier)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskCategory {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskCategory {
    pub fn label(&self) -> &'static str {
        match self {
            RiskCategory::Low => "LOW",
            RiskCategory::Medium => "MEDIUM",
            RiskCategory::High => "HIGH",
            RiskCategory::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for RiskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Named reason attached to a risk record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RiskFlag {
    /// Carried over from a producer's quality assessment
    Quality {
        producer: ProducerKind,
        flag: QualityFlag,
    },
    Stale {
        producer: ProducerKind,
        age_hours: f64,
    },
    Missing {
        producer: ProducerKind,
    },
    /// Some producers are stale while their peers are fresh
    StalenessCascade {
        stale: Vec<ProducerKind>,
        fresh: Vec<ProducerKind>,
    },
}

impl RiskFlag {
    pub fn describe(&self) -> String {
        match self {
            RiskFlag::Quality { producer, flag } => format!("{} quality: {}", producer, flag),
            RiskFlag::Stale {
                producer,
                age_hours,
            } => format!("{} record is {:.1}h old", producer, age_hours),
            RiskFlag::Missing { producer } => format!("{} record missing", producer),
            RiskFlag::StalenessCascade { stale, fresh } => format!(
                "stale [{}] while fresh [{}]",
                join_producers(stale),
                join_producers(fresh)
            ),
        }
    }
}

fn join_producers(kinds: &[ProducerKind]) -> String {
    kinds.iter().map(|k| k.as_str()).collect::<Vec<_>>().join(", ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProducerState {
    Fresh,
    Stale,
    Missing,
}

/// What the synthesizer saw for one producer slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProducerStatus {
    pub producer: ProducerKind,
    pub state: ProducerState,
    /// Entity the record was read from (a linked repository for capacity)
    pub source_entity: String,
    pub age_hours: Option<f64>,
    pub confidence_multiplier: Option<f64>,
}

/// Component risks, 0-100 each, higher is riskier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentRisks {
    pub failure: f64,
    pub capacity: f64,
    pub efficiency: f64,
    pub recovery: f64,
    pub data_quality: f64,
}

impl ComponentRisks {
    pub fn weighted(&self, weights: &ComponentWeights) -> f64 {
        clamp_score(
            self.failure * weights.failure
                + self.capacity * weights.capacity
                + self.efficiency * weights.efficiency
                + self.recovery * weights.recovery
                + self.data_quality * weights.data_quality,
        )
    }
}

/// Synthesized risk for one entity on one day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskRecord {
    pub entity: String,
    pub analysis_day: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub tier: Tier,
    pub tier_weight: f64,
    pub components: ComponentRisks,
    pub composite_score: f64,
    pub overall_confidence: f64,
    pub final_composite: f64,
    pub business_impact: f64,
    pub category: RiskCategory,
    pub flags: Vec<RiskFlag>,
    pub producer_status: Vec<ProducerStatus>,
}

impl RiskRecord {
    /// Composite from the stored components, for auditing a record
    pub fn recompute_composite(&self, weights: &ComponentWeights) -> f64 {
        self.components.weighted(weights)
    }

    pub fn status(&self, producer: ProducerKind) -> Option<&ProducerStatus> {
        self.producer_status.iter().find(|s| s.producer == producer)
    }
}

/// Latest record per producer for one entity
#[derive(Debug, Clone, Default)]
pub struct RiskInputs {
    pub health: Option<MetricRecord>,
    pub capacity: Option<MetricRecord>,
    pub efficiency: Option<MetricRecord>,
    pub recovery: Option<MetricRecord>,
}

impl RiskInputs {
    pub fn get(&self, producer: ProducerKind) -> Option<&MetricRecord> {
        match producer {
            ProducerKind::Health => self.health.as_ref(),
            ProducerKind::Capacity => self.capacity.as_ref(),
            ProducerKind::Efficiency => self.efficiency.as_ref(),
            ProducerKind::Recovery => self.recovery.as_ref(),
        }
    }

    pub fn set(&mut self, record: MetricRecord) {
        match record.producer() {
            ProducerKind::Health => self.health = Some(record),
            ProducerKind::Capacity => self.capacity = Some(record),
            ProducerKind::Efficiency => self.efficiency = Some(record),
            ProducerKind::Recovery => self.recovery = Some(record),
        }
    }

    pub fn present(&self) -> impl Iterator<Item = &MetricRecord> {
        ProducerKind::ALL.into_iter().filter_map(move |kind| self.get(kind))
    }
}

/// Capacity risk from days to the 80% threshold
pub fn capacity_risk(days_to_80: Option<f64>) -> f64 {
    match days_to_80 {
        Some(d) if d <= 30.0 => 100.0,
        Some(d) if d <= 60.0 => 70.0,
        Some(d) if d <= 120.0 => 40.0,
        _ => 10.0,
    }
}

/// Data-quality risk from the total quality flags on present records
pub fn data_quality_risk(present_records: usize, total_flags: usize) -> f64 {
    if present_records == 0 {
        return 75.0;
    }
    match total_flags {
        0..=2 => 10.0,
        3..=5 => 40.0,
        _ => 75.0,
    }
}

pub struct RiskSynthesizer {
    config: RiskConfigSection,
    classifier: TierClassifier,
}

impl RiskSynthesizer {
    pub fn new(config: RiskConfigSection) -> Result<Self> {
        let classifier = TierClassifier::new(&config)?;
        Ok(Self { config, classifier })
    }

    pub fn config(&self) -> &RiskConfigSection {
        &self.config
    }

    pub fn classify(&self, entity: &str) -> Tier {
        self.classifier.classify(entity)
    }

    /// Link a job to its repository unless the config already links it
    pub fn link_repository(&mut self, job: impl Into<String>, repository: impl Into<String>) {
        self.config
            .repository_links
            .entry(job.into())
            .or_insert_with(|| repository.into());
    }

    /// Entity whose records fill `producer`'s slot for `entity`
    pub fn source_entity<'a>(&'a self, entity: &'a str, producer: ProducerKind) -> &'a str {
        match producer {
            ProducerKind::Capacity => self
                .config
                .repository_links
                .get(entity)
                .map(String::as_str)
                .unwrap_or(entity),
            _ => entity,
        }
    }

    fn cadence_hours(&self, producer: ProducerKind) -> f64 {
        let c = &self.config.cadence_hours;
        match producer {
            ProducerKind::Health => c.health,
            ProducerKind::Capacity => c.capacity,
            ProducerKind::Efficiency => c.efficiency,
            ProducerKind::Recovery => c.recovery,
        }
    }

    fn component_risk(&self, producer: ProducerKind, record: Option<&MetricRecord>) -> f64 {
        let missing = &self.config.missing_risk;
        let risk = match (producer, record.map(|r| &r.payload)) {
            (ProducerKind::Health, Some(ProducerPayload::Health(h))) => 100.0 - h.health_score,
            (ProducerKind::Capacity, Some(ProducerPayload::Capacity(c))) => {
                capacity_risk(c.days_to_threshold(80.0))
            }
            (ProducerKind::Efficiency, Some(ProducerPayload::Efficiency(e))) => {
                100.0 - e.efficiency_score
            }
            (ProducerKind::Recovery, Some(ProducerPayload::Recovery(r))) => {
                r.confidence_score.map_or(missing.recovery, |s| 100.0 - s)
            }
            (ProducerKind::Health, _) => missing.failure,
            (ProducerKind::Capacity, _) => missing.capacity,
            (ProducerKind::Efficiency, _) => missing.efficiency,
            (ProducerKind::Recovery, _) => missing.recovery,
        };
        clamp_score(risk)
    }

    fn category(&self, business_impact: f64) -> RiskCategory {
        let bands = &self.config.category_bands;
        match business_impact {
            b if b >= bands.critical => RiskCategory::Critical,
            b if b >= bands.high => RiskCategory::High,
            b if b >= bands.medium => RiskCategory::Medium,
            _ => RiskCategory::Low,
        }
    }

    pub fn synthesize(&self, entity: &str, inputs: &RiskInputs, as_of: DateTime<Utc>) -> RiskRecord {
        let tier = self.classify(entity);
        let tier_weight = self.config.tier_weights.weight(tier);

        let mut flags = Vec::new();
        let mut producer_status = Vec::with_capacity(ProducerKind::ALL.len());
        let mut stale = Vec::new();
        let mut fresh = Vec::new();
        let mut confidence = 1.0;
        let mut total_quality_flags = 0;

        for producer in ProducerKind::ALL {
            let source_entity = self.source_entity(entity, producer).to_string();
            match inputs.get(producer) {
                Some(record) => {
                    let age = record.age_hours(as_of);
                    let multiplier = record.quality.confidence_multiplier.clamp(0.0, 1.0);
                    confidence *= multiplier;

                    let state = if age > self.cadence_hours(producer) {
                        confidence *= self.config.stale_penalty;
                        stale.push(producer);
                        flags.push(RiskFlag::Stale {
                            producer,
                            age_hours: age,
                        });
                        ProducerState::Stale
                    } else {
                        fresh.push(producer);
                        ProducerState::Fresh
                    };

                    total_quality_flags += record.quality.flags.len();
                    flags.extend(
                        record
                            .quality
                            .flags
                            .iter()
                            .map(|flag| RiskFlag::Quality { producer, flag: *flag }),
                    );

                    producer_status.push(ProducerStatus {
                        producer,
                        state,
                        source_entity,
                        age_hours: Some(age),
                        confidence_multiplier: Some(multiplier),
                    });
                }
                None => {
                    confidence *= self.config.missing_penalty;
                    flags.push(RiskFlag::Missing { producer });
                    producer_status.push(ProducerStatus {
                        producer,
                        state: ProducerState::Missing,
                        source_entity,
                        age_hours: None,
                        confidence_multiplier: None,
                    });
                }
            }
        }

        if !stale.is_empty() && !fresh.is_empty() {
            flags.push(RiskFlag::StalenessCascade { stale, fresh });
        }

        let present = inputs.present().count();
        let components = ComponentRisks {
            failure: self.component_risk(ProducerKind::Health, inputs.health.as_ref()),
            capacity: self.component_risk(ProducerKind::Capacity, inputs.capacity.as_ref()),
            efficiency: self.component_risk(ProducerKind::Efficiency, inputs.efficiency.as_ref()),
            recovery: self.component_risk(ProducerKind::Recovery, inputs.recovery.as_ref()),
            data_quality: data_quality_risk(present, total_quality_flags),
        };

        let composite_score = components.weighted(&self.config.weights);
        let overall_confidence = confidence.clamp(self.config.confidence_floor, 1.0);
        let final_composite = clamp_score(composite_score * overall_confidence);
        let business_impact = clamp_score(final_composite * tier_weight);
        let category = self.category(business_impact);

        for flag in &flags {
            debug!("{}: {}", entity, flag.describe());
        }

        RiskRecord {
            entity: entity.to_string(),
            analysis_day: as_of.date_naive(),
            created_at: as_of,
            tier,
            tier_weight,
            components,
            composite_score,
            overall_confidence,
            final_composite,
            business_impact,
            category,
            flags,
            producer_status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::efficiency::{EfficiencyReport, EfficiencyTrend};
    use crate::quality::QualityAssessment;
    use crate::record::Grade;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 6, 0, 0).unwrap()
    }

    fn efficiency_record(score: f64, created_at: DateTime<Utc>) -> MetricRecord {
        let report = EfficiencyReport {
            samples_used: 30,
            mean_dedup_ratio: 3.0,
            mean_compression_ratio: 1.9,
            dedup_score: score,
            compression_score: score,
            trend: EfficiencyTrend::Stable,
            trend_percentage: 0.0,
            trend_p_value: Some(0.8),
            trend_score: 85.0,
            consistency_score: score,
            anomalies: 0,
            anomaly_score: 100.0,
            efficiency_score: score,
            grade: Grade::from_score(score, [85.0, 70.0, 55.0, 40.0]),
        };
        MetricRecord::new(
            "JOB-A",
            created_at,
            QualityAssessment::clean(30, 30.0),
            ProducerPayload::Efficiency(report),
        )
    }

    #[test]
    fn test_tier_rules_in_order() {
        let classifier = TierClassifier::new(&RiskConfigSection::default()).unwrap();
        assert_eq!(classifier.classify("PROD-SQL01"), Tier::Critical);
        assert_eq!(classifier.classify("prd_web"), Tier::Critical);
        assert_eq!(classifier.classify("exchange-mbx"), Tier::Critical);
        assert_eq!(classifier.classify("erp-batch"), Tier::High);
        assert_eq!(classifier.classify("fileserver02"), Tier::Medium);
        assert_eq!(classifier.classify("NightlyArchive"), Tier::Low);
    }

    #[test]
    fn test_override_beats_rules() {
        let mut config = RiskConfigSection::default();
        config
            .tier_overrides
            .insert("fileserver02".to_string(), Tier::Critical);
        let classifier = TierClassifier::new(&config).unwrap();
        assert_eq!(classifier.classify("fileserver02"), Tier::Critical);
        assert_eq!(classifier.classify("fileserver03"), Tier::Medium);
    }

    #[test]
    fn test_capacity_and_data_quality_bands() {
        assert_eq!(capacity_risk(Some(0.0)), 100.0);
        assert_eq!(capacity_risk(Some(45.0)), 70.0);
        assert_eq!(capacity_risk(Some(120.0)), 40.0);
        assert_eq!(capacity_risk(Some(400.0)), 10.0);
        assert_eq!(capacity_risk(None), 10.0);

        assert_eq!(data_quality_risk(0, 0), 75.0);
        assert_eq!(data_quality_risk(3, 2), 10.0);
        assert_eq!(data_quality_risk(3, 5), 40.0);
        assert_eq!(data_quality_risk(1, 6), 75.0);
    }

    #[test]
    fn test_all_missing_uses_defaults_and_floor() {
        let synth = RiskSynthesizer::new(RiskConfigSection::default()).unwrap();
        let record = synth.synthesize("misc-box", &RiskInputs::default(), now());
        // 50*.25 + 50*.25 + 60*.15 + 90*.20 + 75*.15
        assert!((record.composite_score - 63.25).abs() < 1e-9);
        assert_eq!(record.overall_confidence, 0.3);
        assert!((record.final_composite - 18.975).abs() < 1e-9);
        assert_eq!(record.tier, Tier::Low);
        assert!((record.business_impact - 18.975 * 0.25).abs() < 1e-9);
        assert_eq!(record.category, RiskCategory::Low);
        let missing = record
            .flags
            .iter()
            .filter(|f| matches!(f, RiskFlag::Missing { .. }))
            .count();
        assert_eq!(missing, 4);
    }

    #[test]
    fn test_stale_record_flags_and_penalizes() {
        let mut config = RiskConfigSection::default();
        config.missing_penalty = 1.0;
        let synth = RiskSynthesizer::new(config).unwrap();

        let mut fresh = RiskInputs::default();
        fresh.set(efficiency_record(80.0, now() - Duration::hours(2)));
        let fresh_record = synth.synthesize("JOB-A", &fresh, now());

        let mut aged = RiskInputs::default();
        aged.set(efficiency_record(80.0, now() - Duration::hours(50)));
        let aged_record = synth.synthesize("JOB-A", &aged, now());

        assert_eq!(
            aged_record.status(ProducerKind::Efficiency).map(|s| s.state),
            Some(ProducerState::Stale)
        );
        assert!(aged_record
            .flags
            .iter()
            .any(|f| matches!(f, RiskFlag::Stale { producer: ProducerKind::Efficiency, .. })));
        assert_eq!(aged_record.components, fresh_record.components);
        assert_eq!(fresh_record.overall_confidence, 1.0);
        assert!((aged_record.overall_confidence - 0.7).abs() < 1e-9);
        assert!(aged_record.final_composite < fresh_record.final_composite);
    }

    #[test]
    fn test_cascade_flag_when_peer_is_fresh() {
        let mut config = RiskConfigSection::default();
        config.missing_penalty = 1.0;
        let synth = RiskSynthesizer::new(config).unwrap();

        let mut inputs = RiskInputs::default();
        inputs.set(efficiency_record(80.0, now() - Duration::hours(72)));
        // A payload in the wrong slot counts as that producer's default risk
        inputs.health = Some(efficiency_record(80.0, now()));

        let record = synth.synthesize("JOB-A", &inputs, now());
        assert!((record.overall_confidence - 0.7).abs() < 1e-9);
        assert_eq!(record.components.failure, 50.0);
        assert!(record.flags.iter().any(|f| matches!(
            f,
            RiskFlag::StalenessCascade { stale, fresh }
                if stale == &vec![ProducerKind::Efficiency] && fresh == &vec![ProducerKind::Health]
        )));
    }

    #[test]
    fn test_capacity_slot_follows_repository_link() {
        let mut config = RiskConfigSection::default();
        config
            .repository_links
            .insert("JOB-A".to_string(), "REPO-1".to_string());
        let synth = RiskSynthesizer::new(config).unwrap();
        assert_eq!(synth.source_entity("JOB-A", ProducerKind::Capacity), "REPO-1");
        assert_eq!(synth.source_entity("JOB-A", ProducerKind::Health), "JOB-A");
        assert_eq!(synth.source_entity("JOB-B", ProducerKind::Capacity), "JOB-B");
    }
}
