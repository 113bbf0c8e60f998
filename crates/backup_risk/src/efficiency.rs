//! Storage efficiency scoring (dedup and compression)
//!
//! Peer producer of the same shape as health, capacity and recovery: it reads
//! the ratio samples of one entity and emits a 0-100 efficiency score.

use serde::{Deserialize, Serialize};

use crate::config::EfficiencyConfig;
use crate::error::{Result, RiskError};
use crate::record::{clamp_score, Grade, ProducerKind};
use crate::sample::Sample;
use crate::stats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EfficiencyTrend {
    Improving,
    Stable,
    Degrading,
    InsufficientData,
}

impl EfficiencyTrend {
    /// Graded by the size of the change; an unknown trend scores like a flat one
    pub fn score(&self, percentage: f64) -> f64 {
        let change = percentage.abs();
        let score = match self {
            EfficiencyTrend::Improving => 85.0 + (change / 2.0).min(15.0),
            EfficiencyTrend::Stable => 70.0 + (15.0 - change).max(0.0),
            EfficiencyTrend::Degrading => 70.0 - change * 2.0,
            EfficiencyTrend::InsufficientData => 70.0,
        };
        clamp_score(score)
    }
}

/// Efficiency producer payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EfficiencyReport {
    pub samples_used: usize,
    pub mean_dedup_ratio: f64,
    pub mean_compression_ratio: f64,
    pub dedup_score: f64,
    pub compression_score: f64,
    pub trend: EfficiencyTrend,
    pub trend_percentage: f64,
    pub trend_p_value: Option<f64>,
    pub trend_score: f64,
    pub consistency_score: f64,
    pub anomalies: usize,
    pub anomaly_score: f64,
    pub efficiency_score: f64,
    pub grade: Grade,
}

/// Score a ratio against excellent / good / fair bands. Past excellent the
/// score climbs from 90 by `excellent_slope` per unit, up to 100.
pub fn banded_ratio_score(ratio: f64, bands: [f64; 3], excellent_slope: f64) -> f64 {
    let [excellent, good, fair] = bands;
    let score = if ratio >= excellent {
        90.0 + ((ratio - excellent) * excellent_slope).min(10.0)
    } else if ratio >= good {
        75.0 + (ratio - good) / (excellent - good) * 15.0
    } else if ratio >= fair {
        50.0 + (ratio - fair) / (good - fair) * 25.0
    } else if fair > 0.0 {
        (ratio / fair * 50.0).min(50.0)
    } else {
        0.0
    };
    clamp_score(score)
}

/// Fewer anomalies score higher: 100 for none, 75 at a 10% rate, 0 from 20%
pub fn anomaly_score(anomalies: usize, total: usize) -> f64 {
    if total == 0 {
        return 50.0;
    }
    let rate = anomalies as f64 / total as f64;
    let score = if anomalies == 0 {
        100.0
    } else if rate < 0.10 {
        75.0 + (1.0 - rate * 10.0) * 25.0
    } else if rate < 0.20 {
        75.0 - (rate - 0.10) * 750.0
    } else {
        0.0
    };
    clamp_score(score)
}

/// 100 − 200·CV; 50 with fewer than two values
pub fn consistency_score(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 50.0;
    }
    let cv = stats::coefficient_of_variation(values).unwrap_or(1.0);
    clamp_score(100.0 - cv * 200.0)
}

pub struct EfficiencyAnalyzer {
    config: EfficiencyConfig,
}

impl EfficiencyAnalyzer {
    pub fn new(config: EfficiencyConfig) -> Self {
        Self { config }
    }

    pub fn analyze(&self, entity: &str, samples: &[Sample]) -> Result<EfficiencyReport> {
        let mut ordered: Vec<&Sample> = samples
            .iter()
            .filter(|s| s.dedup_ratio.is_some() && s.compression_ratio.is_some())
            .collect();
        if ordered.is_empty() {
            return Err(RiskError::insufficient(
                entity,
                ProducerKind::Efficiency,
                "no samples carry dedup and compression ratios",
            ));
        }
        ordered.sort_by_key(|s| s.timestamp);

        let dedup: Vec<f64> = ordered.iter().filter_map(|s| s.dedup_ratio).collect();
        let compression: Vec<f64> = ordered.iter().filter_map(|s| s.compression_ratio).collect();
        let combined: Vec<f64> = dedup.iter().zip(&compression).map(|(d, c)| d * c).collect();

        let mean_dedup = stats::mean(&dedup);
        let mean_compression = stats::mean(&compression);
        let dedup_score = banded_ratio_score(mean_dedup, self.config.dedup_bands, 2.0);
        let compression_score = banded_ratio_score(mean_compression, self.config.compression_bands, 5.0);

        let (trend, trend_percentage, trend_p_value) = self.trend(&combined);
        let trend_score = trend.score(trend_percentage);
        let consistency_score = consistency_score(&combined);

        let anomalies = count_anomalies(&combined, self.config.anomaly_sigma);
        let anomaly_score = anomaly_score(anomalies, combined.len());

        let w = self.config.weights;
        let efficiency_score = clamp_score(
            dedup_score * w[0]
                + compression_score * w[1]
                + trend_score * w[2]
                + consistency_score * w[3]
                + anomaly_score * w[4],
        );

        Ok(EfficiencyReport {
            samples_used: ordered.len(),
            mean_dedup_ratio: mean_dedup,
            mean_compression_ratio: mean_compression,
            dedup_score,
            compression_score,
            trend,
            trend_percentage,
            trend_p_value,
            trend_score,
            consistency_score,
            anomalies,
            anomaly_score,
            efficiency_score,
            grade: Grade::from_score(efficiency_score, [85.0, 70.0, 55.0, 40.0]),
        })
    }

    /// First half vs second half of the combined ratio
    fn trend(&self, combined: &[f64]) -> (EfficiencyTrend, f64, Option<f64>) {
        if combined.len() < 10 {
            return (EfficiencyTrend::InsufficientData, 0.0, None);
        }
        let half = combined.len() / 2;
        let (early, late) = (&combined[..half], &combined[half..]);
        let early_mean = stats::mean(early);
        let change = if early_mean.abs() > f64::EPSILON {
            (stats::mean(late) - early_mean) / early_mean * 100.0
        } else {
            0.0
        };
        let p = stats::two_sample_t_test(early, late).map(|t| t.p_value);
        let significant = p.map_or(false, |p| p < self.config.significance_level);

        let trend = match change {
            c if c > 5.0 && significant => EfficiencyTrend::Improving,
            c if c < -5.0 && significant => EfficiencyTrend::Degrading,
            _ => EfficiencyTrend::Stable,
        };
        (trend, change, p)
    }
}

fn count_anomalies(values: &[f64], sigma: f64) -> usize {
    if values.len() < 5 {
        return 0;
    }
    let m = stats::mean(values);
    let sd = stats::population_std(values);
    if sd <= f64::EPSILON {
        return 0;
    }
    values.iter().filter(|v| ((*v - m) / sd).abs() > sigma).count()
}
