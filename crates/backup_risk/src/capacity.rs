//! Capacity Forecast Engine - when will a repository fill up
//!
//! Pipeline per storage entity:
//! 1. Build one utilization point per day, interpolate short gaps, drop outliers
//! 2. Fit linear and quadratic least-squares models
//! 3. Keep the quadratic only if its x² coefficient is significant (t-test, n-3 df)
//! 4. Nudge the growth terms by the dedup-ratio trend
//! 5. Solve each utilization threshold for its first future crossing, with a
//!    delta-method interval from the residual standard error and local slope
//!
//! Degenerate fits never divide by zero: they report no crossing.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::CapacityConfig;
use crate::error::{Result, RiskError};
use crate::record::ProducerKind;
use crate::sample::Sample;
use crate::stats::{self, PolyFit};

/// Coefficients below this are treated as zero by the solver
const COEFF_EPSILON: f64 = 1e-9;

/// One day of repository usage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UtilizationPoint {
    pub day: NaiveDate,
    pub used_gb: f64,
    pub capacity_gb: f64,
    pub dedup_ratio: Option<f64>,
    #[serde(default)]
    pub interpolated: bool,
}

impl UtilizationPoint {
    pub fn new(day: NaiveDate, used_gb: f64, capacity_gb: f64) -> Self {
        Self {
            day,
            used_gb,
            capacity_gb,
            dedup_ratio: None,
            interpolated: false,
        }
    }

    pub fn utilization_pct(&self) -> f64 {
        if self.capacity_gb <= 0.0 {
            return 0.0;
        }
        self.used_gb / self.capacity_gb * 100.0
    }
}

/// Latest usage sample per day, ordered by day
pub fn utilization_points(samples: &[Sample]) -> Vec<UtilizationPoint> {
    let mut by_day: BTreeMap<NaiveDate, &Sample> = BTreeMap::new();
    for sample in samples {
        if sample.size_gb.is_none() || sample.capacity_gb.is_none() {
            continue;
        }
        let keep = by_day
            .get(&sample.day())
            .map_or(true, |existing| sample.timestamp >= existing.timestamp);
        if keep {
            by_day.insert(sample.day(), sample);
        }
    }
    by_day
        .into_iter()
        .filter_map(|(day, s)| {
            Some(UtilizationPoint {
                day,
                used_gb: s.size_gb?,
                capacity_gb: s.capacity_gb?,
                dedup_ratio: s.dedup_ratio,
                interpolated: false,
            })
        })
        .collect()
}

/// Linearly interpolate runs of at most `max_gap_days` missing days
pub fn fill_gaps(points: &[UtilizationPoint], max_gap_days: i64) -> (Vec<UtilizationPoint>, usize) {
    let mut out = Vec::with_capacity(points.len());
    let mut filled = 0;
    for (i, point) in points.iter().enumerate() {
        if i > 0 {
            let prev = &points[i - 1];
            let distance = (point.day - prev.day).num_days();
            let missing = distance - 1;
            if missing >= 1 && missing <= max_gap_days {
                for step in 1..distance {
                    let frac = step as f64 / distance as f64;
                    out.push(UtilizationPoint {
                        day: prev.day + chrono::Duration::days(step),
                        used_gb: prev.used_gb + (point.used_gb - prev.used_gb) * frac,
                        capacity_gb: prev.capacity_gb + (point.capacity_gb - prev.capacity_gb) * frac,
                        dedup_ratio: None,
                        interpolated: true,
                    });
                    filled += 1;
                }
            }
        }
        out.push(point.clone());
    }
    (out, filled)
}

/// Drop points whose usage lies more than `sigma` standard deviations from the mean
pub fn remove_outliers(points: Vec<UtilizationPoint>, sigma: f64) -> (Vec<UtilizationPoint>, usize) {
    if points.len() < 3 {
        return (points, 0);
    }
    let used: Vec<f64> = points.iter().map(|p| p.used_gb).collect();
    let m = stats::mean(&used);
    let sd = stats::population_std(&used);
    if sd <= f64::EPSILON {
        return (points, 0);
    }
    let before = points.len();
    let kept: Vec<UtilizationPoint> = points
        .into_iter()
        .filter(|p| (p.used_gb - m).abs() <= sigma * sd)
        .collect();
    let removed = before - kept.len();
    (kept, removed)
}

/// Days from `current_day` until `a·x² + b·x + c` first reaches `target`.
///
/// Complex roots and roots at or before `current_day` are discarded; a
/// near-zero leading coefficient falls back to the linear solution and a flat
/// line never crosses.
pub fn solve_threshold(a: f64, b: f64, c: f64, target: f64, current_day: f64) -> Option<f64> {
    let c0 = c - target;

    if a.abs() < COEFF_EPSILON {
        if b.abs() < COEFF_EPSILON {
            return None;
        }
        let x = -c0 / b;
        return (x > current_day).then(|| x - current_day);
    }

    let disc = b * b - 4.0 * a * c0;
    if disc < 0.0 {
        return None;
    }
    let sq = disc.sqrt();
    // Cancellation-free form of the quadratic roots
    let q = -0.5 * (b + b.signum() * sq);
    let mut roots = vec![q / a];
    if q.abs() > f64::EPSILON {
        roots.push(c0 / q);
    }
    roots
        .into_iter()
        .filter(|x| x.is_finite() && *x > current_day)
        .min_by(|x, y| x.total_cmp(y))
        .map(|x| x - current_day)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelFamily {
    Linear,
    Quadratic,
}

/// Selected growth model in day-index space (day 0 = first point)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastModel {
    pub family: ModelFamily,
    /// `[a, b, c]` for `a·x² + b·x + c`; `a` is 0 for the linear family
    pub coefficients: [f64; 3],
    /// R² of the selected fit
    pub goodness_of_fit: f64,
    /// Two-tailed p-value of the quadratic coefficient
    pub p_value: f64,
    pub residual_std_error: f64,
    pub degrees_of_freedom: usize,
}

impl ForecastModel {
    pub fn predict(&self, x: f64) -> f64 {
        let [a, b, c] = self.coefficients;
        a * x * x + b * x + c
    }

    pub fn slope(&self, x: f64) -> f64 {
        let [a, b, _] = self.coefficients;
        2.0 * a * x + b
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupTrend {
    Improving,
    Stable,
    Degrading,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrowthPattern {
    Declining,
    Stable,
    Linear,
    Accelerating,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FitConfidence {
    High,
    Moderate,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

impl Priority {
    pub fn label(&self) -> &'static str {
        match self {
            Priority::Urgent => "URGENT",
            Priority::High => "HIGH",
            Priority::Medium => "MEDIUM",
            Priority::Low => "LOW",
        }
    }
}

/// Interval in days around a crossing estimate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DayInterval {
    pub lower: f64,
    pub upper: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdForecast {
    pub threshold_pct: f64,
    pub threshold_gb: f64,
    /// None means no crossing within the horizon
    pub days: Option<f64>,
    pub interval: Option<DayInterval>,
    pub already_crossed: bool,
}

/// Capacity producer payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapacityForecast {
    pub model: ForecastModel,
    pub current_used_gb: f64,
    pub capacity_gb: f64,
    pub utilization_pct: f64,
    /// Fitted growth at the latest day
    pub growth_gb_per_day: f64,
    pub growth_pattern: GrowthPattern,
    pub thresholds: Vec<ThresholdForecast>,
    pub fit_confidence: FitConfidence,
    pub priority: Priority,
    pub dedup_trend: DedupTrend,
    pub dedup_factor: f64,
    pub points_used: usize,
    pub gaps_interpolated: usize,
    pub outliers_removed: usize,
    pub recommended_capacity_gb: Option<f64>,
}

impl CapacityForecast {
    pub fn days_to_threshold(&self, pct: f64) -> Option<f64> {
        self.thresholds
            .iter()
            .find(|t| (t.threshold_pct - pct).abs() < 1e-9)
            .and_then(|t| t.days)
    }
}

pub struct CapacityForecastEngine {
    config: CapacityConfig,
}

impl CapacityForecastEngine {
    pub fn new(config: CapacityConfig) -> Self {
        Self { config }
    }

    /// Clean the series and forecast threshold crossings
    pub fn forecast(&self, entity: &str, points: &[UtilizationPoint]) -> Result<CapacityForecast> {
        let mut sorted = points.to_vec();
        sorted.sort_by_key(|p| p.day);
        sorted.dedup_by_key(|p| p.day);

        let (filled, gaps_interpolated) = fill_gaps(&sorted, self.config.max_gap_days);
        let (clean, outliers_removed) = remove_outliers(filled, self.config.outlier_sigma);

        if clean.len() < self.config.min_points {
            return Err(RiskError::insufficient(
                entity,
                ProducerKind::Capacity,
                format!(
                    "{} valid points after cleaning, {} required",
                    clean.len(),
                    self.config.min_points
                ),
            ));
        }

        let first_day = clean[0].day;
        let xs: Vec<f64> = clean
            .iter()
            .map(|p| (p.day - first_day).num_days() as f64)
            .collect();
        let ys: Vec<f64> = clean.iter().map(|p| p.used_gb).collect();

        let linear = stats::fit_polynomial(&xs, &ys, 1).ok_or_else(|| {
            RiskError::insufficient(entity, ProducerKind::Capacity, "linear fit is singular")
        })?;
        let quadratic = stats::fit_polynomial(&xs, &ys, 2);

        let mut model = self.select_model(&xs, &ys, &linear, quadratic.as_ref());

        let (dedup_trend, dedup_factor) = self.dedup_trend(&clean);
        model.coefficients[0] *= dedup_factor;
        model.coefficients[1] *= dedup_factor;

        let last = &clean[clean.len() - 1];
        let current_day = xs[xs.len() - 1];
        let current_used = last.used_gb;
        let capacity = last.capacity_gb;

        let thresholds: Vec<ThresholdForecast> = self
            .config
            .thresholds_pct
            .iter()
            .map(|&pct| self.threshold_forecast(&model, pct, capacity, current_used, current_day))
            .collect();

        let growth = model.slope(current_day);
        let growth_pattern = self.growth_pattern(&model, growth, capacity);
        let fit_confidence = self.fit_confidence(model.goodness_of_fit);

        let forecast_days = |pct: f64| {
            thresholds
                .iter()
                .find(|t| (t.threshold_pct - pct).abs() < 1e-9)
                .and_then(|t| t.days)
        };
        let priority = self.priority(forecast_days(80.0));
        let recommended_capacity_gb = forecast_days(100.0).map(|_| {
            capacity + growth.max(0.0) * self.config.recommendation_days * self.config.recommendation_headroom
        });

        Ok(CapacityForecast {
            model,
            current_used_gb: current_used,
            capacity_gb: capacity,
            utilization_pct: last.utilization_pct(),
            growth_gb_per_day: growth,
            growth_pattern,
            thresholds,
            fit_confidence,
            priority,
            dedup_trend,
            dedup_factor,
            points_used: clean.len(),
            gaps_interpolated,
            outliers_removed,
            recommended_capacity_gb,
        })
    }

    /// Prefer the linear model unless the quadratic term is significant
    fn select_model(
        &self,
        xs: &[f64],
        ys: &[f64],
        linear: &PolyFit,
        quadratic: Option<&PolyFit>,
    ) -> ForecastModel {
        let p_value = quadratic.map_or(1.0, |q| quadratic_p_value(xs, ys, q));

        match quadratic {
            Some(q) if p_value < self.config.significance_level => ForecastModel {
                family: ModelFamily::Quadratic,
                coefficients: [q.coefficients[0], q.coefficients[1], q.coefficients[2]],
                goodness_of_fit: q.r_squared(),
                p_value,
                residual_std_error: q.residual_variance().unwrap_or(0.0).sqrt(),
                degrees_of_freedom: q.n.saturating_sub(3),
            },
            _ => ForecastModel {
                family: ModelFamily::Linear,
                coefficients: [0.0, linear.coefficients[0], linear.coefficients[1]],
                goodness_of_fit: linear.r_squared(),
                p_value,
                residual_std_error: linear.residual_variance().unwrap_or(0.0).sqrt(),
                degrees_of_freedom: linear.n.saturating_sub(2),
            },
        }
    }

    fn dedup_trend(&self, points: &[UtilizationPoint]) -> (DedupTrend, f64) {
        let ratios: Vec<f64> = points.iter().filter_map(|p| p.dedup_ratio).collect();
        if ratios.len() < self.config.dedup_min_ratios {
            return (DedupTrend::Unknown, 1.0);
        }
        let half = ratios.len() / 2;
        let change = stats::mean(&ratios[half..]) - stats::mean(&ratios[..half]);
        let adj = self.config.dedup_adjustment;
        match change {
            c if c > self.config.dedup_dead_band => (DedupTrend::Improving, 1.0 - adj),
            c if c < -self.config.dedup_dead_band => (DedupTrend::Degrading, 1.0 + adj),
            _ => (DedupTrend::Stable, 1.0),
        }
    }

    fn threshold_forecast(
        &self,
        model: &ForecastModel,
        pct: f64,
        capacity: f64,
        current_used: f64,
        current_day: f64,
    ) -> ThresholdForecast {
        let threshold_gb = capacity * pct / 100.0;
        if current_used >= threshold_gb {
            return ThresholdForecast {
                threshold_pct: pct,
                threshold_gb,
                days: Some(0.0),
                interval: Some(DayInterval { lower: 0.0, upper: 0.0 }),
                already_crossed: true,
            };
        }

        let [a, b, c] = model.coefficients;
        let days = solve_threshold(a, b, c, threshold_gb, current_day)
            .filter(|d| *d <= self.config.horizon_days);
        let interval = days.and_then(|d| delta_interval(model, current_day + d, d));

        ThresholdForecast {
            threshold_pct: pct,
            threshold_gb,
            days,
            interval,
            already_crossed: false,
        }
    }

    fn growth_pattern(&self, model: &ForecastModel, growth: f64, capacity: f64) -> GrowthPattern {
        let rate_pct = if capacity > 0.0 {
            growth / capacity * 100.0
        } else {
            growth
        };
        let stable = self.config.stable_growth_pct_per_day;
        if rate_pct < -stable {
            GrowthPattern::Declining
        } else if rate_pct.abs() < stable {
            GrowthPattern::Stable
        } else if model.family == ModelFamily::Quadratic && model.coefficients[0] > 0.0 {
            GrowthPattern::Accelerating
        } else {
            GrowthPattern::Linear
        }
    }

    fn fit_confidence(&self, r_squared: f64) -> FitConfidence {
        if r_squared >= self.config.r2_high {
            FitConfidence::High
        } else if r_squared >= self.config.r2_moderate {
            FitConfidence::Moderate
        } else {
            FitConfidence::Low
        }
    }

    /// Priority from days until the 80% threshold
    pub fn priority(&self, days_to_80: Option<f64>) -> Priority {
        match days_to_80 {
            Some(d) if d < self.config.urgent_days => Priority::Urgent,
            Some(d) if d < self.config.high_days => Priority::High,
            Some(d) if d < self.config.medium_days => Priority::Medium,
            _ => Priority::Low,
        }
    }
}

/// p-value of the quadratic coefficient against zero
fn quadratic_p_value(xs: &[f64], ys: &[f64], quadratic: &PolyFit) -> f64 {
    let a = quadratic.coefficients[0];
    let span = xs.iter().fold(0.0_f64, |acc, x| acc.max(x.abs()));
    let y_min = ys.iter().copied().fold(f64::INFINITY, f64::min);
    let y_max = ys.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let y_scale = (y_max - y_min).abs().max(1.0);

    // Curvature contributes nothing measurable over the observed span
    if a.abs() * span * span <= 1e-9 * y_scale {
        return 1.0;
    }
    let df = quadratic.n.saturating_sub(3);
    if df == 0 {
        return 1.0;
    }
    match quadratic.standard_error(0) {
        Some(se) if se > f64::EPSILON * a.abs() => stats::two_tailed_p(a / se, df as f64),
        Some(_) => 0.0,
        None => 1.0,
    }
}

/// 95% interval for a crossing: t·s / |f'(x*)|, clamped at zero days
fn delta_interval(model: &ForecastModel, crossing_x: f64, days: f64) -> Option<DayInterval> {
    if model.degrees_of_freedom == 0 {
        return None;
    }
    let slope = model.slope(crossing_x).abs();
    if slope < COEFF_EPSILON {
        return None;
    }
    let t = stats::student_t_quantile(0.975, model.degrees_of_freedom as f64);
    let half = t * model.residual_std_error / slope;
    Some(DayInterval {
        lower: (days - half).max(0.0),
        upper: days + half,
    })
}
