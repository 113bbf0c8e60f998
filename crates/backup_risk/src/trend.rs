//! Trend & pattern analysis for job outcomes
//!
//! Turns a window of session outcomes into:
//! - a trend classification (improving / stable / degrading) backed by a
//!   two-sample t-test between the first and last thirds of the smoothed series
//! - a failure pattern classification from failure timestamps alone
//! - a health score combining success rate, trend, pattern, protected
//!   objects and repository availability
//!
//! Trend change is measured per weekday and then averaged, so one bad weekday
//! does not read as an overall trend. A consistent change across weekdays
//! counts as significant even when the pooled t-test does not.

use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::{HealthConfig, TrendConfig};
use crate::record::{clamp_score, Grade};
use crate::sample::{Outcome, Sample};
use crate::stats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendClassification {
    Improving,
    Stable,
    Degrading,
    InsufficientData,
}

impl TrendClassification {
    pub fn label(&self) -> &'static str {
        match self {
            TrendClassification::Improving => "IMPROVING",
            TrendClassification::Stable => "STABLE",
            TrendClassification::Degrading => "DEGRADING",
            TrendClassification::InsufficientData => "INSUFFICIENT_DATA",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternClassification {
    NoFailures,
    ConsistentWeekday,
    ConsistentTime,
    IntermittentRegular,
    IntermittentIrregular,
    Random,
}

impl PatternClassification {
    pub fn label(&self) -> &'static str {
        match self {
            PatternClassification::NoFailures => "NO_FAILURES",
            PatternClassification::ConsistentWeekday => "CONSISTENT_WEEKDAY",
            PatternClassification::ConsistentTime => "CONSISTENT_TIME",
            PatternClassification::IntermittentRegular => "INTERMITTENT_REGULAR",
            PatternClassification::IntermittentIrregular => "INTERMITTENT_IRREGULAR",
            PatternClassification::Random => "RANDOM",
        }
    }

    /// Base pattern score before confidence scaling
    pub fn base_score(&self) -> f64 {
        match self {
            PatternClassification::NoFailures => 100.0,
            PatternClassification::ConsistentTime => 80.0,
            PatternClassification::ConsistentWeekday => 75.0,
            PatternClassification::IntermittentRegular => 70.0,
            PatternClassification::Random => 60.0,
            PatternClassification::IntermittentIrregular => 55.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternConfidence {
    High,
    Moderate,
    Low,
    NotApplicable,
}

impl PatternConfidence {
    fn score_factor(&self) -> f64 {
        match self {
            PatternConfidence::High | PatternConfidence::NotApplicable => 1.0,
            PatternConfidence::Moderate => 0.95,
            PatternConfidence::Low => 0.85,
        }
    }
}

/// Calendar effects on the failure rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeasonalPattern {
    MonthEndSurge,
    WeekendPattern,
}

/// Success rate of one calendar day
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DailyRate {
    pub day: NaiveDate,
    pub rate: f64,
    pub sessions: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendAnalysis {
    pub classification: TrendClassification,
    /// Aggregated percentage change, late vs early
    pub trend_percentage: f64,
    pub is_significant: bool,
    pub p_value: Option<f64>,
    pub early_mean: Option<f64>,
    pub late_mean: Option<f64>,
    /// Per-weekday percentage change that fed the aggregate
    #[serde(default)]
    pub weekday_changes: BTreeMap<String, f64>,
    /// Weekday changes agree closely enough to count as significant
    #[serde(default)]
    pub weekday_significant: bool,
    pub days_analyzed: usize,
}

impl TrendAnalysis {
    fn insufficient(days: usize) -> Self {
        Self {
            classification: TrendClassification::InsufficientData,
            trend_percentage: 0.0,
            is_significant: false,
            p_value: None,
            early_mean: None,
            late_mean: None,
            weekday_changes: BTreeMap::new(),
            weekday_significant: false,
            days_analyzed: days,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternAnalysis {
    pub classification: PatternClassification,
    pub confidence: PatternConfidence,
    pub detail: String,
    pub failure_count: usize,
    pub dominant_weekday: Option<String>,
    pub weekday_share: f64,
    pub dominant_hour: Option<u32>,
    pub hour_share: f64,
    pub gap_cv: Option<f64>,
    /// Several failures land in the same hour bucket
    pub correlated_failures: bool,
    #[serde(default)]
    pub seasonal: Vec<SeasonalPattern>,
}

/// Health producer payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub total_sessions: usize,
    pub failures: usize,
    pub warnings: usize,
    /// Warnings count as half a success
    pub success_rate: f64,
    pub trend: TrendAnalysis,
    pub pattern: PatternAnalysis,
    pub failure_rate_score: f64,
    pub trend_score: f64,
    pub pattern_score: f64,
    pub protected_objects_score: f64,
    pub repository_score: f64,
    pub health_score: f64,
    pub grade: Grade,
}

/// A repository the job writes to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryStatus {
    pub name: String,
    pub available: bool,
}

/// Group outcome samples into per-day success rates, ordered by day
pub fn daily_success_rates(samples: &[Sample]) -> Vec<DailyRate> {
    let mut by_day: BTreeMap<NaiveDate, (f64, usize)> = BTreeMap::new();
    for sample in samples {
        if let Some(outcome) = sample.outcome {
            let entry = by_day.entry(sample.day()).or_insert((0.0, 0));
            entry.0 += outcome.credit();
            entry.1 += 1;
        }
    }
    by_day
        .into_iter()
        .map(|(day, (credit, n))| DailyRate {
            day,
            rate: credit / n as f64,
            sessions: n,
        })
        .collect()
}

/// Centered rolling mean; windows shrink at the edges
pub fn rolling_mean(values: &[f64], window: usize) -> Vec<f64> {
    if window <= 1 || values.len() < window {
        return values.to_vec();
    }
    let half = window / 2;
    (0..values.len())
        .map(|i| {
            let start = i.saturating_sub(half);
            let end = (i + window - half).min(values.len());
            stats::mean(&values[start..end])
        })
        .collect()
}

const WEEKDAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

/// Relative change in percent; from a zero baseline the absolute change in
/// percentage points
fn percent_change(early: f64, late: f64) -> f64 {
    if early.abs() < f64::EPSILON {
        return (late - early) * 100.0;
    }
    (late - early) / early * 100.0
}

/// Failure-rate component: success% less a capped penalty past the allowance
pub fn failure_rate_score(success_rate: f64, failures: usize, config: &HealthConfig) -> f64 {
    let extra = failures.saturating_sub(config.failure_allowance) as f64;
    let penalty = (extra * config.points_per_extra_failure).min(config.max_failure_penalty);
    clamp_score(success_rate * 100.0 - penalty)
}

/// Trend component, graded by size of change and, when stable, by the share
/// of sessions that did not fail
pub fn trend_score(classification: TrendClassification, percentage: f64, completion_rate: f64) -> f64 {
    let score = match classification {
        TrendClassification::Improving if percentage > 20.0 => 100.0,
        TrendClassification::Improving => 85.0 + percentage * 0.75,
        TrendClassification::Stable if completion_rate >= 0.95 => 90.0,
        TrendClassification::Stable if completion_rate >= 0.85 => 75.0,
        TrendClassification::Stable => 60.0,
        TrendClassification::Degrading if percentage < -20.0 => 30.0,
        TrendClassification::Degrading if percentage < -10.0 => 50.0 - (percentage.abs() - 10.0) * 2.0,
        TrendClassification::Degrading => 50.0,
        TrendClassification::InsufficientData => 70.0,
    };
    clamp_score(score)
}

/// Sub-entities whose latest session did not fail, with a penalty of 5 per
/// failing one (at most 20); 50 when there are none
pub fn protected_objects_score(samples: &[Sample]) -> f64 {
    let mut latest: BTreeMap<&str, (DateTime<Utc>, bool)> = BTreeMap::new();
    for sample in samples {
        let (Some(sub), Some(outcome)) = (sample.sub_entity.as_deref(), sample.outcome) else {
            continue;
        };
        let entry = latest.entry(sub).or_insert((sample.timestamp, outcome.is_failure()));
        if sample.timestamp >= entry.0 {
            *entry = (sample.timestamp, outcome.is_failure());
        }
    }
    availability_score(
        latest.len(),
        latest.values().filter(|(_, failed)| *failed).count(),
        5.0,
        20.0,
    )
}

/// Linked repositories that resolve, with a penalty of 10 per missing one
/// (at most 30); 50 when there are none
pub fn repository_score(repositories: &[RepositoryStatus]) -> f64 {
    availability_score(
        repositories.len(),
        repositories.iter().filter(|r| !r.available).count(),
        10.0,
        30.0,
    )
}

fn availability_score(total: usize, unavailable: usize, per_item: f64, cap: f64) -> f64 {
    if total == 0 {
        return 50.0;
    }
    let rate = (total - unavailable) as f64 / total as f64;
    let penalty = (unavailable as f64 * per_item).min(cap);
    clamp_score(rate * 100.0 - penalty)
}

pub struct TrendPatternAnalyzer {
    trend: TrendConfig,
    health: HealthConfig,
}

impl TrendPatternAnalyzer {
    pub fn new(trend: TrendConfig, health: HealthConfig) -> Self {
        Self { trend, health }
    }

    /// Full health analysis over one entity's session samples
    pub fn analyze(&self, samples: &[Sample], repositories: &[RepositoryStatus]) -> HealthReport {
        let outcomes: Vec<Outcome> = samples.iter().filter_map(|s| s.outcome).collect();
        let total = outcomes.len();
        let failures = outcomes.iter().filter(|o| o.is_failure()).count();
        let warnings = outcomes.iter().filter(|o| **o == Outcome::Warning).count();
        let (success_rate, completion_rate) = if total > 0 {
            (
                outcomes.iter().map(|o| o.credit()).sum::<f64>() / total as f64,
                (total - failures) as f64 / total as f64,
            )
        } else {
            (0.0, 0.0)
        };

        let trend = self.analyze_trend(&daily_success_rates(samples));
        let pattern = self.analyze_pattern(samples);

        let failure_rate_score = if total > 0 {
            failure_rate_score(success_rate, failures, &self.health)
        } else {
            50.0
        };
        let trend_score = trend_score(trend.classification, trend.trend_percentage, completion_rate);

        let mut pattern_score = pattern.classification.base_score() * pattern.confidence.score_factor();
        if pattern.correlated_failures {
            pattern_score -= 15.0;
        }
        let pattern_score = clamp_score(pattern_score);
        let protected_objects_score = protected_objects_score(samples);
        let repository_score = repository_score(repositories);

        let w = &self.health;
        let health_score = clamp_score(
            failure_rate_score * w.failure_rate_weight
                + trend_score * w.trend_weight
                + pattern_score * w.pattern_weight
                + protected_objects_score * w.protected_objects_weight
                + repository_score * w.repository_weight,
        );

        HealthReport {
            total_sessions: total,
            failures,
            warnings,
            success_rate,
            trend,
            pattern,
            failure_rate_score,
            trend_score,
            pattern_score,
            protected_objects_score,
            repository_score,
            health_score,
            grade: Grade::standard(health_score),
        }
    }

    /// Classify the trend of a daily success-rate series
    pub fn analyze_trend(&self, daily: &[DailyRate]) -> TrendAnalysis {
        let n = daily.len();
        let third = n / 3;
        if n < self.trend.min_days || third < 2 {
            return TrendAnalysis::insufficient(n);
        }

        let rates: Vec<f64> = daily.iter().map(|d| d.rate).collect();
        let smoothed = rolling_mean(&rates, self.trend.smoothing_window);
        let early = &smoothed[..third];
        let late = &smoothed[n - third..];
        let early_mean = stats::mean(early);
        let late_mean = stats::mean(late);

        let test = stats::two_sample_t_test(early, late);
        let p_value = test.map(|t| t.p_value);
        let pooled_significant = p_value.map_or(false, |p| p < self.trend.significance_level);

        let weekday_changes = self.weekday_changes(daily);
        let changes: Vec<f64> = weekday_changes.values().copied().collect();
        let weekday_significant = weekday_changes_agree(&changes);
        let is_significant = pooled_significant || weekday_significant;
        let trend_percentage = if changes.len() >= 2 {
            stats::mean(&changes)
        } else {
            percent_change(early_mean, late_mean)
        };

        let threshold = self.trend.change_threshold_pct;
        let classification = match trend_percentage {
            p if p < -threshold && is_significant => TrendClassification::Degrading,
            p if p > threshold && is_significant => TrendClassification::Improving,
            _ => TrendClassification::Stable,
        };

        TrendAnalysis {
            classification,
            trend_percentage,
            is_significant,
            p_value,
            early_mean: Some(early_mean),
            late_mean: Some(late_mean),
            weekday_changes,
            weekday_significant,
            days_analyzed: n,
        }
    }

    /// First-third vs last-third change for each weekday on its own
    fn weekday_changes(&self, daily: &[DailyRate]) -> BTreeMap<String, f64> {
        let mut by_weekday: BTreeMap<u32, Vec<f64>> = BTreeMap::new();
        for d in daily {
            by_weekday
                .entry(d.day.weekday().num_days_from_monday())
                .or_default()
                .push(d.rate);
        }

        let mut changes = BTreeMap::new();
        for (idx, values) in by_weekday {
            let k = values.len() / 3;
            if k == 0 {
                continue;
            }
            let early = stats::mean(&values[..k]);
            let late = stats::mean(&values[values.len() - k..]);
            changes.insert(
                weekday_name(WEEKDAYS[idx as usize]).to_string(),
                percent_change(early, late),
            );
        }
        changes
    }

    /// Classify failure timing
    pub fn analyze_pattern(&self, samples: &[Sample]) -> PatternAnalysis {
        let mut failure_times: Vec<_> = samples
            .iter()
            .filter(|s| s.outcome.map_or(false, |o| o.is_failure()))
            .map(|s| s.timestamp)
            .collect();
        failure_times.sort();
        let failure_count = failure_times.len();

        let seasonal = self.seasonal_patterns(samples);

        let mut analysis = PatternAnalysis {
            classification: PatternClassification::NoFailures,
            confidence: PatternConfidence::NotApplicable,
            detail: "No failures in window".to_string(),
            failure_count,
            dominant_weekday: None,
            weekday_share: 0.0,
            dominant_hour: None,
            hour_share: 0.0,
            gap_cv: None,
            correlated_failures: false,
            seasonal,
        };
        if failure_count == 0 {
            return analysis;
        }

        let mut weekday_counts = [0usize; 7];
        let mut hour_counts = [0usize; 24];
        for ts in &failure_times {
            weekday_counts[ts.weekday().num_days_from_monday() as usize] += 1;
            hour_counts[ts.hour() as usize] += 1;
        }
        let (top_weekday, top_weekday_count) = top_bucket(&weekday_counts);
        let (top_hour, top_hour_count) = top_bucket(&hour_counts);
        let weekday = WEEKDAYS[top_weekday];

        analysis.dominant_weekday = Some(weekday_name(weekday).to_string());
        analysis.weekday_share = top_weekday_count as f64 / failure_count as f64;
        analysis.dominant_hour = Some(top_hour as u32);
        analysis.hour_share = top_hour_count as f64 / failure_count as f64;
        analysis.correlated_failures = top_hour_count >= self.trend.correlated_failure_count;

        let observed_weekdays = samples
            .iter()
            .filter(|s| s.outcome.is_some())
            .map(|s| s.timestamp.weekday())
            .collect::<std::collections::HashSet<_>>()
            .len();

        if failure_count < self.trend.min_failures || observed_weekdays < 2 {
            analysis.classification = PatternClassification::Random;
            analysis.confidence = PatternConfidence::NotApplicable;
            analysis.detail = format!(
                "{} failure(s) over {} weekday(s); too few to classify",
                failure_count, observed_weekdays
            );
            return analysis;
        }

        if analysis.weekday_share >= self.trend.weekday_share {
            analysis.classification = PatternClassification::ConsistentWeekday;
            analysis.confidence = PatternConfidence::High;
            analysis.detail = format!(
                "{} of {} failures on {}",
                top_weekday_count,
                failure_count,
                weekday_name(weekday)
            );
            return analysis;
        }

        if analysis.hour_share >= self.trend.hour_share {
            analysis.classification = PatternClassification::ConsistentTime;
            analysis.confidence = PatternConfidence::High;
            analysis.detail = format!(
                "{} of {} failures around {:02}:00",
                top_hour_count, failure_count, top_hour
            );
            return analysis;
        }

        let gaps: Vec<f64> = failure_times
            .windows(2)
            .map(|w| (w[1] - w[0]).num_seconds() as f64 / 86_400.0)
            .collect();
        match stats::coefficient_of_variation(&gaps) {
            Some(cv) if cv < self.trend.regular_gap_cv => {
                analysis.gap_cv = Some(cv);
                analysis.classification = PatternClassification::IntermittentRegular;
                analysis.confidence = PatternConfidence::Moderate;
                analysis.detail = format!(
                    "Failures every {:.1} days on average (CV {:.2})",
                    stats::mean(&gaps),
                    cv
                );
            }
            Some(cv) => {
                analysis.gap_cv = Some(cv);
                analysis.classification = PatternClassification::IntermittentIrregular;
                analysis.confidence = PatternConfidence::Low;
                analysis.detail = format!("Irregular failure spacing (CV {:.2})", cv);
            }
            None => {
                analysis.classification = PatternClassification::Random;
                analysis.confidence = PatternConfidence::Low;
                analysis.detail = "No discernible failure pattern".to_string();
            }
        }
        analysis
    }

    /// Month-end and weekend effects on the failure rate
    fn seasonal_patterns(&self, samples: &[Sample]) -> Vec<SeasonalPattern> {
        let mut month_end = (0usize, 0usize);
        let mut rest = (0usize, 0usize);
        let mut weekend = (0usize, 0usize);
        let mut weekday = (0usize, 0usize);

        for sample in samples {
            let Some(outcome) = sample.outcome else {
                continue;
            };
            let failed = usize::from(outcome.is_failure());
            let bucket = if sample.timestamp.day() >= self.trend.month_end_day {
                &mut month_end
            } else {
                &mut rest
            };
            bucket.0 += failed;
            bucket.1 += 1;

            let bucket = match sample.timestamp.weekday() {
                Weekday::Sat | Weekday::Sun => &mut weekend,
                _ => &mut weekday,
            };
            bucket.0 += failed;
            bucket.1 += 1;
        }

        let rate = |(failed, total): (usize, usize)| {
            (total > 0).then(|| failed as f64 / total as f64)
        };

        let mut patterns = Vec::new();
        if let (Some(end), Some(other)) = (rate(month_end), rate(rest)) {
            if end - other > self.trend.month_end_diff {
                patterns.push(SeasonalPattern::MonthEndSurge);
            }
        }
        if let (Some(we), Some(wd)) = (rate(weekend), rate(weekday)) {
            if (we - wd).abs() > self.trend.weekend_diff {
                patterns.push(SeasonalPattern::WeekendPattern);
            }
        }
        patterns
    }
}

/// Three or more weekday changes averaging beyond 5% with a spread under
/// half their mean
fn weekday_changes_agree(changes: &[f64]) -> bool {
    if changes.len() < 3 {
        return false;
    }
    let avg = stats::mean(changes);
    avg.abs() > 5.0 && stats::population_std(changes) < avg.abs() * 0.5
}

/// Index and count of the largest bucket (lowest index on ties)
fn top_bucket(counts: &[usize]) -> (usize, usize) {
    counts
        .iter()
        .enumerate()
        .fold((0, 0), |best, (i, &c)| if c > best.1 { (i, c) } else { best })
}
