//! Configuration for the risk analytics core.
//!
//! Loads settings from /etc/backup-risk/config.toml or uses defaults.
//! Every threshold, weight and penalty the producers use lives here and is
//! passed explicitly into each component; nothing reads global state.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::error::{Result, RiskError};
use crate::quality::QualityRule;
use crate::risk::Tier;

/// Config file path
pub const CONFIG_PATH: &str = "/etc/backup-risk/config.toml";

/// Fallback config file path (working directory)
pub const LOCAL_CONFIG_PATH: &str = "backup-risk.toml";

// ============================================================================
// Quality gate
// ============================================================================

/// Confidence multiplier applied for each failed non-fatal rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityPenalties {
    #[serde(default = "default_sparse_penalty")]
    pub sparse_data: f64,
    #[serde(default = "default_variance_penalty")]
    pub high_variance: f64,
    #[serde(default = "default_dominance_penalty")]
    pub sub_entity_dominance: f64,
    #[serde(default = "default_timespan_penalty")]
    pub insufficient_timespan: f64,
    #[serde(default = "default_metadata_penalty")]
    pub incomplete_metadata: f64,
    /// Used when the sample-count rule is configured as non-fatal
    #[serde(default = "default_sample_count_penalty")]
    pub insufficient_samples: f64,
}

fn default_sparse_penalty() -> f64 {
    0.8
}

fn default_variance_penalty() -> f64 {
    0.85
}

fn default_dominance_penalty() -> f64 {
    0.85
}

fn default_timespan_penalty() -> f64 {
    0.75
}

fn default_metadata_penalty() -> f64 {
    0.7
}

fn default_sample_count_penalty() -> f64 {
    0.5
}

impl Default for QualityPenalties {
    fn default() -> Self {
        Self {
            sparse_data: default_sparse_penalty(),
            high_variance: default_variance_penalty(),
            sub_entity_dominance: default_dominance_penalty(),
            insufficient_timespan: default_timespan_penalty(),
            incomplete_metadata: default_metadata_penalty(),
            insufficient_samples: default_sample_count_penalty(),
        }
    }
}

impl QualityPenalties {
    pub fn for_rule(&self, rule: QualityRule) -> f64 {
        match rule {
            QualityRule::MinSampleCount => self.insufficient_samples,
            QualityRule::MinDensity => self.sparse_data,
            QualityRule::MaxVariance => self.high_variance,
            QualityRule::MaxSubEntityShare => self.sub_entity_dominance,
            QualityRule::MinTimespan => self.insufficient_timespan,
            QualityRule::MaxMissingMetadata => self.incomplete_metadata,
        }
    }
}

/// Thresholds for one producer's quality gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityThresholds {
    pub min_samples: usize,
    pub min_samples_per_day: f64,
    /// Maximum variance of per-sub-entity success rates
    pub max_variance: f64,
    pub max_sub_entity_share: f64,
    pub min_span_days: f64,
    pub max_missing_metadata_share: f64,
    #[serde(default)]
    pub penalties: QualityPenalties,
    #[serde(default = "default_fatal_rules")]
    pub fatal_rules: Vec<QualityRule>,
    /// Samples older than this many days before the analysis time are ignored
    #[serde(default)]
    pub lookback_days: Option<u32>,
}

fn default_fatal_rules() -> Vec<QualityRule> {
    vec![QualityRule::MinSampleCount]
}

impl QualityThresholds {
    /// Health/trend producer: 30 days of roughly daily sessions
    pub fn for_health() -> Self {
        Self {
            min_samples: 30,
            min_samples_per_day: 0.33,
            max_variance: 0.09,
            max_sub_entity_share: 0.80,
            min_span_days: 30.0,
            max_missing_metadata_share: 0.05,
            penalties: QualityPenalties::default(),
            fatal_rules: default_fatal_rules(),
            lookback_days: Some(90),
        }
    }

    /// Capacity producer: 14 daily points minimum
    pub fn for_capacity() -> Self {
        Self {
            min_samples: 14,
            min_samples_per_day: 0.5,
            max_sub_entity_share: 1.0,
            min_span_days: 14.0,
            ..Self::for_health()
        }
    }

    /// Recovery producer: small samples are normal, nothing is fatal
    pub fn for_recovery() -> Self {
        Self {
            min_samples: 2,
            min_samples_per_day: 0.0,
            max_sub_entity_share: 1.0,
            min_span_days: 0.0,
            fatal_rules: Vec::new(),
            lookback_days: None,
            ..Self::for_health()
        }
    }

    /// Efficiency producer: same window as health
    pub fn for_efficiency() -> Self {
        Self {
            max_sub_entity_share: 1.0,
            ..Self::for_health()
        }
    }
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self::for_health()
    }
}

/// Per-producer quality thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualitySection {
    #[serde(default = "QualityThresholds::for_health")]
    pub health: QualityThresholds,
    #[serde(default = "QualityThresholds::for_capacity")]
    pub capacity: QualityThresholds,
    #[serde(default = "QualityThresholds::for_recovery")]
    pub recovery: QualityThresholds,
    #[serde(default = "QualityThresholds::for_efficiency")]
    pub efficiency: QualityThresholds,
}

impl Default for QualitySection {
    fn default() -> Self {
        Self {
            health: QualityThresholds::for_health(),
            capacity: QualityThresholds::for_capacity(),
            recovery: QualityThresholds::for_recovery(),
            efficiency: QualityThresholds::for_efficiency(),
        }
    }
}

// ============================================================================
// Trend / pattern / health
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendConfig {
    /// Centered rolling-mean window in days
    #[serde(default = "default_smoothing_window")]
    pub smoothing_window: usize,

    /// Fewer daily points than this yields INSUFFICIENT_DATA
    #[serde(default = "default_min_trend_days")]
    pub min_days: usize,

    #[serde(default = "default_change_threshold")]
    pub change_threshold_pct: f64,

    #[serde(default = "default_significance")]
    pub significance_level: f64,

    #[serde(default = "default_weekday_share")]
    pub weekday_share: f64,

    #[serde(default = "default_hour_share")]
    pub hour_share: f64,

    #[serde(default = "default_regular_gap_cv")]
    pub regular_gap_cv: f64,

    /// Below this failure count the pattern is not classified
    #[serde(default = "default_min_failures")]
    pub min_failures: usize,

    /// Failures in one hour bucket at which they count as correlated
    #[serde(default = "default_correlated_failures")]
    pub correlated_failure_count: usize,

    #[serde(default = "default_month_end_day")]
    pub month_end_day: u32,

    #[serde(default = "default_month_end_diff")]
    pub month_end_diff: f64,

    #[serde(default = "default_weekend_diff")]
    pub weekend_diff: f64,
}

fn default_smoothing_window() -> usize {
    7
}

fn default_min_trend_days() -> usize {
    14
}

fn default_change_threshold() -> f64 {
    5.0
}

fn default_significance() -> f64 {
    0.05
}

fn default_weekday_share() -> f64 {
    0.70
}

fn default_hour_share() -> f64 {
    0.60
}

fn default_regular_gap_cv() -> f64 {
    0.30
}

fn default_min_failures() -> usize {
    3
}

fn default_correlated_failures() -> usize {
    3
}

fn default_month_end_day() -> u32 {
    26
}

fn default_month_end_diff() -> f64 {
    0.20
}

fn default_weekend_diff() -> f64 {
    0.15
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            smoothing_window: default_smoothing_window(),
            min_days: default_min_trend_days(),
            change_threshold_pct: default_change_threshold(),
            significance_level: default_significance(),
            weekday_share: default_weekday_share(),
            hour_share: default_hour_share(),
            regular_gap_cv: default_regular_gap_cv(),
            min_failures: default_min_failures(),
            correlated_failure_count: default_correlated_failures(),
            month_end_day: default_month_end_day(),
            month_end_diff: default_month_end_diff(),
            weekend_diff: default_weekend_diff(),
        }
    }
}

/// Weights and penalties for the job health score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_failure_rate_weight")]
    pub failure_rate_weight: f64,
    #[serde(default = "default_trend_weight")]
    pub trend_weight: f64,
    #[serde(default = "default_pattern_weight")]
    pub pattern_weight: f64,
    #[serde(default = "default_inventory_weight")]
    pub protected_objects_weight: f64,
    #[serde(default = "default_inventory_weight")]
    pub repository_weight: f64,
    /// Failures beyond this count cost extra points
    #[serde(default = "default_failure_allowance")]
    pub failure_allowance: usize,
    #[serde(default = "default_points_per_failure")]
    pub points_per_extra_failure: f64,
    /// Cap on the extra-failure penalty
    #[serde(default = "default_max_failure_penalty")]
    pub max_failure_penalty: f64,
}

fn default_failure_rate_weight() -> f64 {
    0.35
}

fn default_trend_weight() -> f64 {
    0.25
}

fn default_pattern_weight() -> f64 {
    0.20
}

fn default_inventory_weight() -> f64 {
    0.10
}

fn default_failure_allowance() -> usize {
    10
}

fn default_points_per_failure() -> f64 {
    0.5
}

fn default_max_failure_penalty() -> f64 {
    10.0
}

impl HealthConfig {
    pub fn weight_sum(&self) -> f64 {
        self.failure_rate_weight
            + self.trend_weight
            + self.pattern_weight
            + self.protected_objects_weight
            + self.repository_weight
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            failure_rate_weight: default_failure_rate_weight(),
            trend_weight: default_trend_weight(),
            pattern_weight: default_pattern_weight(),
            protected_objects_weight: default_inventory_weight(),
            repository_weight: default_inventory_weight(),
            failure_allowance: default_failure_allowance(),
            points_per_extra_failure: default_points_per_failure(),
            max_failure_penalty: default_max_failure_penalty(),
        }
    }
}

// ============================================================================
// Capacity
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapacityConfig {
    /// Utilization thresholds in percent of total capacity
    #[serde(default = "default_thresholds")]
    pub thresholds_pct: Vec<f64>,

    /// Minimum valid points after cleaning
    #[serde(default = "default_min_points")]
    pub min_points: usize,

    /// Gaps up to this many missing days are interpolated
    #[serde(default = "default_max_gap_days")]
    pub max_gap_days: i64,

    #[serde(default = "default_outlier_sigma")]
    pub outlier_sigma: f64,

    #[serde(default = "default_significance")]
    pub significance_level: f64,

    #[serde(default = "default_dedup_min_ratios")]
    pub dedup_min_ratios: usize,

    /// Absolute change in mean dedup ratio that counts as a trend
    #[serde(default = "default_dedup_dead_band")]
    pub dedup_dead_band: f64,

    /// Fractional growth-rate nudge applied for a dedup trend
    #[serde(default = "default_dedup_adjustment")]
    pub dedup_adjustment: f64,

    #[serde(default = "default_r2_high")]
    pub r2_high: f64,

    #[serde(default = "default_r2_moderate")]
    pub r2_moderate: f64,

    /// Quality multiplier applied when the fit confidence is LOW
    #[serde(default = "default_low_fit_penalty")]
    pub low_fit_penalty: f64,

    #[serde(default = "default_urgent_days")]
    pub urgent_days: f64,

    #[serde(default = "default_high_days")]
    pub high_days: f64,

    #[serde(default = "default_medium_days")]
    pub medium_days: f64,

    /// Crossings further out than this are reported as none
    #[serde(default = "default_horizon_days")]
    pub horizon_days: f64,

    /// Growth below this percent of capacity per day is STABLE
    #[serde(default = "default_stable_growth")]
    pub stable_growth_pct_per_day: f64,

    #[serde(default = "default_recommendation_days")]
    pub recommendation_days: f64,

    #[serde(default = "default_recommendation_headroom")]
    pub recommendation_headroom: f64,
}

fn default_thresholds() -> Vec<f64> {
    vec![80.0, 90.0, 100.0]
}

fn default_min_points() -> usize {
    14
}

fn default_max_gap_days() -> i64 {
    2
}

fn default_outlier_sigma() -> f64 {
    3.0
}

fn default_dedup_min_ratios() -> usize {
    10
}

fn default_dedup_dead_band() -> f64 {
    0.2
}

fn default_dedup_adjustment() -> f64 {
    0.05
}

fn default_r2_high() -> f64 {
    0.90
}

fn default_r2_moderate() -> f64 {
    0.70
}

fn default_low_fit_penalty() -> f64 {
    0.8
}

fn default_urgent_days() -> f64 {
    14.0
}

fn default_high_days() -> f64 {
    30.0
}

fn default_medium_days() -> f64 {
    90.0
}

fn default_horizon_days() -> f64 {
    730.0
}

fn default_stable_growth() -> f64 {
    0.05
}

fn default_recommendation_days() -> f64 {
    180.0
}

fn default_recommendation_headroom() -> f64 {
    1.2
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            thresholds_pct: default_thresholds(),
            min_points: default_min_points(),
            max_gap_days: default_max_gap_days(),
            outlier_sigma: default_outlier_sigma(),
            significance_level: default_significance(),
            dedup_min_ratios: default_dedup_min_ratios(),
            dedup_dead_band: default_dedup_dead_band(),
            dedup_adjustment: default_dedup_adjustment(),
            r2_high: default_r2_high(),
            r2_moderate: default_r2_moderate(),
            low_fit_penalty: default_low_fit_penalty(),
            urgent_days: default_urgent_days(),
            high_days: default_high_days(),
            medium_days: default_medium_days(),
            horizon_days: default_horizon_days(),
            stable_growth_pct_per_day: default_stable_growth(),
            recommendation_days: default_recommendation_days(),
            recommendation_headroom: default_recommendation_headroom(),
        }
    }
}

// ============================================================================
// Recovery
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryWeights {
    #[serde(default = "default_rw_success")]
    pub success_rate: f64,
    #[serde(default = "default_rw_recency")]
    pub recency: f64,
    #[serde(default = "default_rw_predictability")]
    pub predictability: f64,
    #[serde(default = "default_rw_sla")]
    pub sla_margin: f64,
    #[serde(default = "default_rw_coverage")]
    pub coverage: f64,
}

fn default_rw_success() -> f64 {
    0.30
}

fn default_rw_recency() -> f64 {
    0.25
}

fn default_rw_predictability() -> f64 {
    0.20
}

fn default_rw_sla() -> f64 {
    0.15
}

fn default_rw_coverage() -> f64 {
    0.10
}

impl Default for RecoveryWeights {
    fn default() -> Self {
        Self {
            success_rate: default_rw_success(),
            recency: default_rw_recency(),
            predictability: default_rw_predictability(),
            sla_margin: default_rw_sla(),
            coverage: default_rw_coverage(),
        }
    }
}

impl RecoveryWeights {
    pub fn sum(&self) -> f64 {
        self.success_rate + self.recency + self.predictability + self.sla_margin + self.coverage
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Default recovery time objective in minutes
    #[serde(default = "default_target_rto")]
    pub target_rto_minutes: f64,

    /// Per-entity RTO overrides
    #[serde(default)]
    pub rto_overrides: BTreeMap<String, f64>,

    #[serde(default)]
    pub weights: RecoveryWeights,

    /// Share of the final score taken from verification when present
    #[serde(default = "default_verification_blend")]
    pub verification_blend: f64,

    /// Buffer (fraction of target) required for COMPLIANT
    #[serde(default = "default_compliant_buffer")]
    pub compliant_buffer: f64,

    /// Parallel execution resources (proxies) for the concurrency projection
    #[serde(default = "default_resources")]
    pub parallel_resources: u32,

    #[serde(default = "default_overhead_base")]
    pub overhead_base: f64,

    #[serde(default = "default_concurrency_ceiling")]
    pub concurrency_ceiling: u32,
}

fn default_target_rto() -> f64 {
    30.0
}

fn default_verification_blend() -> f64 {
    0.3
}

fn default_compliant_buffer() -> f64 {
    0.20
}

fn default_resources() -> u32 {
    2
}

fn default_overhead_base() -> f64 {
    1.1
}

fn default_concurrency_ceiling() -> u32 {
    20
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            target_rto_minutes: default_target_rto(),
            rto_overrides: BTreeMap::new(),
            weights: RecoveryWeights::default(),
            verification_blend: default_verification_blend(),
            compliant_buffer: default_compliant_buffer(),
            parallel_resources: default_resources(),
            overhead_base: default_overhead_base(),
            concurrency_ceiling: default_concurrency_ceiling(),
        }
    }
}

impl RecoveryConfig {
    pub fn target_for(&self, entity: &str) -> f64 {
        self.rto_overrides
            .get(entity)
            .copied()
            .unwrap_or(self.target_rto_minutes)
    }
}

// ============================================================================
// Efficiency
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EfficiencyConfig {
    /// Excellent / good / fair dedup ratio bands
    #[serde(default = "default_dedup_bands")]
    pub dedup_bands: [f64; 3],

    /// Excellent / good / fair compression ratio bands
    #[serde(default = "default_compression_bands")]
    pub compression_bands: [f64; 3],

    #[serde(default = "default_outlier_sigma")]
    pub anomaly_sigma: f64,

    #[serde(default = "default_significance")]
    pub significance_level: f64,

    /// dedup, compression, trend, consistency, anomaly
    #[serde(default = "default_efficiency_weights")]
    pub weights: [f64; 5],
}

fn default_dedup_bands() -> [f64; 3] {
    [3.5, 2.5, 1.5]
}

fn default_compression_bands() -> [f64; 3] {
    [2.0, 1.8, 1.3]
}

fn default_efficiency_weights() -> [f64; 5] {
    [0.30, 0.25, 0.20, 0.15, 0.10]
}

impl Default for EfficiencyConfig {
    fn default() -> Self {
        Self {
            dedup_bands: default_dedup_bands(),
            compression_bands: default_compression_bands(),
            anomaly_sigma: default_outlier_sigma(),
            significance_level: default_significance(),
            weights: default_efficiency_weights(),
        }
    }
}

// ============================================================================
// Risk synthesis
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentWeights {
    #[serde(default = "default_cw_failure")]
    pub failure: f64,
    #[serde(default = "default_cw_capacity")]
    pub capacity: f64,
    #[serde(default = "default_cw_efficiency")]
    pub efficiency: f64,
    #[serde(default = "default_cw_recovery")]
    pub recovery: f64,
    #[serde(default = "default_cw_data_quality")]
    pub data_quality: f64,
}

fn default_cw_failure() -> f64 {
    0.25
}

fn default_cw_capacity() -> f64 {
    0.25
}

fn default_cw_efficiency() -> f64 {
    0.15
}

fn default_cw_recovery() -> f64 {
    0.20
}

fn default_cw_data_quality() -> f64 {
    0.15
}

impl Default for ComponentWeights {
    fn default() -> Self {
        Self {
            failure: default_cw_failure(),
            capacity: default_cw_capacity(),
            efficiency: default_cw_efficiency(),
            recovery: default_cw_recovery(),
            data_quality: default_cw_data_quality(),
        }
    }
}

impl ComponentWeights {
    pub fn sum(&self) -> f64 {
        self.failure + self.capacity + self.efficiency + self.recovery + self.data_quality
    }
}

/// One ordered tier rule: first rule with a matching pattern wins
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierRule {
    pub tier: Tier,
    pub patterns: Vec<String>,
}

fn default_tier_rules() -> Vec<TierRule> {
    vec![
        TierRule {
            tier: Tier::Critical,
            patterns: vec![
                r"(?i)^(prod|prd)[-_]".to_string(),
                r"(?i)(sql|oracle|exchange|\bdc\d*\b)".to_string(),
            ],
        },
        TierRule {
            tier: Tier::High,
            patterns: vec![r"(?i)(erp|sap|crm|app)".to_string()],
        },
        TierRule {
            tier: Tier::Medium,
            patterns: vec![r"(?i)(file|web|print)".to_string()],
        },
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierWeights {
    #[serde(default = "default_tw_critical")]
    pub critical: f64,
    #[serde(default = "default_tw_high")]
    pub high: f64,
    #[serde(default = "default_tw_medium")]
    pub medium: f64,
    #[serde(default = "default_tw_low")]
    pub low: f64,
}

fn default_tw_critical() -> f64 {
    1.0
}

fn default_tw_high() -> f64 {
    0.75
}

fn default_tw_medium() -> f64 {
    0.50
}

fn default_tw_low() -> f64 {
    0.25
}

impl Default for TierWeights {
    fn default() -> Self {
        Self {
            critical: default_tw_critical(),
            high: default_tw_high(),
            medium: default_tw_medium(),
            low: default_tw_low(),
        }
    }
}

impl TierWeights {
    pub fn weight(&self, tier: Tier) -> f64 {
        match tier {
            Tier::Critical => self.critical,
            Tier::High => self.high,
            Tier::Medium => self.medium,
            Tier::Low => self.low,
        }
    }
}

/// Expected refresh cadence per producer, in hours
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CadenceHours {
    #[serde(default = "default_cadence")]
    pub health: f64,
    #[serde(default = "default_cadence")]
    pub capacity: f64,
    #[serde(default = "default_cadence")]
    pub efficiency: f64,
    #[serde(default = "default_cadence")]
    pub recovery: f64,
}

fn default_cadence() -> f64 {
    24.0
}

impl Default for CadenceHours {
    fn default() -> Self {
        Self {
            health: default_cadence(),
            capacity: default_cadence(),
            efficiency: default_cadence(),
            recovery: default_cadence(),
        }
    }
}

/// Component risk assumed when a producer has no record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissingRisk {
    #[serde(default = "default_missing_failure")]
    pub failure: f64,
    #[serde(default = "default_missing_capacity")]
    pub capacity: f64,
    #[serde(default = "default_missing_efficiency")]
    pub efficiency: f64,
    #[serde(default = "default_missing_recovery")]
    pub recovery: f64,
}

fn default_missing_failure() -> f64 {
    50.0
}

fn default_missing_capacity() -> f64 {
    50.0
}

fn default_missing_efficiency() -> f64 {
    60.0
}

fn default_missing_recovery() -> f64 {
    90.0
}

impl Default for MissingRisk {
    fn default() -> Self {
        Self {
            failure: default_missing_failure(),
            capacity: default_missing_capacity(),
            efficiency: default_missing_efficiency(),
            recovery: default_missing_recovery(),
        }
    }
}

/// Category lower bounds on business impact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryBands {
    #[serde(default = "default_band_critical")]
    pub critical: f64,
    #[serde(default = "default_band_high")]
    pub high: f64,
    #[serde(default = "default_band_medium")]
    pub medium: f64,
}

fn default_band_critical() -> f64 {
    80.0
}

fn default_band_high() -> f64 {
    60.0
}

fn default_band_medium() -> f64 {
    40.0
}

impl Default for CategoryBands {
    fn default() -> Self {
        Self {
            critical: default_band_critical(),
            high: default_band_high(),
            medium: default_band_medium(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskConfigSection {
    #[serde(default)]
    pub weights: ComponentWeights,

    #[serde(default = "default_tier_rules")]
    pub tier_rules: Vec<TierRule>,

    /// Exact entity name to tier, checked before the rules
    #[serde(default)]
    pub tier_overrides: BTreeMap<String, Tier>,

    #[serde(default = "default_tier")]
    pub default_tier: Tier,

    #[serde(default)]
    pub tier_weights: TierWeights,

    #[serde(default)]
    pub cadence_hours: CadenceHours,

    /// Confidence multiplier per stale producer
    #[serde(default = "default_stale_penalty")]
    pub stale_penalty: f64,

    /// Confidence multiplier per missing producer
    #[serde(default = "default_missing_penalty")]
    pub missing_penalty: f64,

    #[serde(default = "default_confidence_floor")]
    pub confidence_floor: f64,

    #[serde(default)]
    pub missing_risk: MissingRisk,

    #[serde(default)]
    pub category_bands: CategoryBands,

    /// Job entity to the repository its capacity record is read from
    #[serde(default)]
    pub repository_links: BTreeMap<String, String>,
}

fn default_tier() -> Tier {
    Tier::Low
}

fn default_stale_penalty() -> f64 {
    0.7
}

fn default_missing_penalty() -> f64 {
    0.5
}

fn default_confidence_floor() -> f64 {
    0.3
}

impl Default for RiskConfigSection {
    fn default() -> Self {
        Self {
            weights: ComponentWeights::default(),
            tier_rules: default_tier_rules(),
            tier_overrides: BTreeMap::new(),
            default_tier: default_tier(),
            tier_weights: TierWeights::default(),
            cadence_hours: CadenceHours::default(),
            stale_penalty: default_stale_penalty(),
            missing_penalty: default_missing_penalty(),
            confidence_floor: default_confidence_floor(),
            missing_risk: MissingRisk::default(),
            category_bands: CategoryBands::default(),
            repository_links: BTreeMap::new(),
        }
    }
}

// ============================================================================
// Store
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "/var/lib/backup-risk/records.db".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

// ============================================================================
// Root
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskConfig {
    #[serde(default)]
    pub quality: QualitySection,

    #[serde(default)]
    pub trend: TrendConfig,

    #[serde(default)]
    pub health: HealthConfig,

    #[serde(default)]
    pub capacity: CapacityConfig,

    #[serde(default)]
    pub recovery: RecoveryConfig,

    #[serde(default)]
    pub efficiency: EfficiencyConfig,

    #[serde(default)]
    pub risk: RiskConfigSection,

    #[serde(default)]
    pub store: StoreConfig,
}

impl RiskConfig {
    /// Load config from the standard paths, or return defaults
    pub fn load() -> Self {
        Self::load_from_path(CONFIG_PATH)
            .or_else(|_| Self::load_from_path(LOCAL_CONFIG_PATH))
            .unwrap_or_else(|e| {
                warn!("Config not found, using defaults: {}", e);
                RiskConfig::default()
            })
    }

    /// Load and validate config from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        let config = Self::from_toml(&content)?;
        info!("Loaded config from {}", path.as_ref().display());
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: RiskConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config to a path (for init)
    pub fn save_default<P: AsRef<Path>>(path: P) -> Result<()> {
        let content = toml::to_string_pretty(&RiskConfig::default())
            .map_err(|e| RiskError::Config(e.to_string()))?;
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path.as_ref(), content)?;
        info!("Saved default config to {}", path.as_ref().display());
        Ok(())
    }

    /// Reject weights that do not sum to 1, out-of-range penalties and bad tier patterns
    pub fn validate(&self) -> Result<()> {
        check_weight_sum("risk.weights", self.risk.weights.sum())?;
        check_weight_sum("recovery.weights", self.recovery.weights.sum())?;
        check_weight_sum("efficiency.weights", self.efficiency.weights.iter().sum())?;
        check_weight_sum("health", self.health.weight_sum())?;

        for (name, value) in [
            ("risk.stale_penalty", self.risk.stale_penalty),
            ("risk.missing_penalty", self.risk.missing_penalty),
            ("risk.confidence_floor", self.risk.confidence_floor),
            ("capacity.low_fit_penalty", self.capacity.low_fit_penalty),
            ("recovery.verification_blend", self.recovery.verification_blend),
        ] {
            check_unit_interval(name, value)?;
        }

        for (producer, thresholds) in [
            ("health", &self.quality.health),
            ("capacity", &self.quality.capacity),
            ("recovery", &self.quality.recovery),
            ("efficiency", &self.quality.efficiency),
        ] {
            let p = &thresholds.penalties;
            for value in [
                p.sparse_data,
                p.high_variance,
                p.sub_entity_dominance,
                p.insufficient_timespan,
                p.incomplete_metadata,
                p.insufficient_samples,
            ] {
                check_unit_interval(&format!("quality.{}.penalties", producer), value)?;
            }
        }

        if self.recovery.parallel_resources == 0 {
            return Err(RiskError::Config(
                "recovery.parallel_resources must be at least 1".to_string(),
            ));
        }

        crate::risk::TierClassifier::new(&self.risk).map(|_| ())
    }
}

fn check_weight_sum(name: &str, sum: f64) -> Result<()> {
    if (sum - 1.0).abs() > 0.01 {
        return Err(RiskError::Config(format!(
            "{} must sum to 1.0 (got {:.3})",
            name, sum
        )));
    }
    Ok(())
}

fn check_unit_interval(name: &str, value: f64) -> Result<()> {
    if !(value > 0.0 && value <= 1.0) {
        return Err(RiskError::Config(format!(
            "{} must be in (0, 1] (got {})",
            name, value
        )));
    }
    Ok(())
}
