//! Metrics collection, guarded ratios and statistics.
//!
//! Every aggregate produced here is total: empty inputs and zero denominators
//! degrade to a defined value (`0.0`, [`Ratio::NotAvailable`] or a `0/0`
//! [`SuccessRate`]) and never to `NaN` or infinity.

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Errors raised when parsing a `k/n` success rate
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SuccessRateError {
    #[error("Success rate must look like k/n: {0}")]
    Malformed(String),

    #[error("Success rate numerator exceeds denominator: {0}")]
    OutOfRange(String),
}

/// Number of passed trials out of a total, written `k/n`.
///
/// `0/0` means "no data" and is distinct from `0/n`, a real total failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SuccessRate {
    pub passed: usize,
    pub total: usize,
}

impl SuccessRate {
    /// Create a success rate; `passed` is capped at `total`
    #[must_use]
    pub fn new(passed: usize, total: usize) -> Self {
        Self {
            passed: passed.min(total),
            total,
        }
    }

    /// Whether there is no data at all
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Passed fraction, or `None` for `0/0`
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn fraction(&self) -> Option<f64> {
        (self.total > 0).then(|| self.passed as f64 / self.total as f64)
    }

    /// Passed fraction with `0/0` treated as zero
    #[must_use]
    pub fn fraction_or_zero(&self) -> f64 {
        self.fraction().unwrap_or(0.0)
    }

    /// Percentage string, `N/A` for `0/0`
    #[must_use]
    pub fn percent_label(&self) -> String {
        self.fraction()
            .map_or_else(|| "N/A".to_string(), |f| format!("{:.1}%", f * 100.0))
    }
}

impl fmt::Display for SuccessRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.passed, self.total)
    }
}

impl FromStr for SuccessRate {
    type Err = SuccessRateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (passed, total) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| SuccessRateError::Malformed(s.to_string()))?;
        let passed: usize = passed
            .trim()
            .parse()
            .map_err(|_| SuccessRateError::Malformed(s.to_string()))?;
        let total: usize = total
            .trim()
            .parse()
            .map_err(|_| SuccessRateError::Malformed(s.to_string()))?;
        if passed > total {
            return Err(SuccessRateError::OutOfRange(s.to_string()));
        }
        Ok(Self { passed, total })
    }
}

impl TryFrom<String> for SuccessRate {
    type Error = SuccessRateError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SuccessRate> for String {
    fn from(rate: SuccessRate) -> Self {
        rate.to_string()
    }
}

/// A ratio that may be undefined
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Ratio {
    Value(f64),
    /// Denominator was zero or an input was missing
    NotAvailable,
}

impl Ratio {
    /// `num / den`, `NotAvailable` when the result would not be finite
    #[must_use]
    pub fn of(num: f64, den: f64) -> Self {
        if !num.is_finite() || !den.is_finite() || den.abs() < f64::EPSILON {
            return Self::NotAvailable;
        }
        let value = num / den;
        if value.is_finite() {
            Self::Value(value)
        } else {
            Self::NotAvailable
        }
    }

    #[must_use]
    pub const fn value(self) -> Option<f64> {
        match self {
            Self::Value(v) => Some(v),
            Self::NotAvailable => None,
        }
    }

    /// Whether the ratio is defined and at least `threshold`
    #[must_use]
    pub fn meets(self, threshold: f64) -> bool {
        self.value().is_some_and(|v| v >= threshold)
    }
}

impl fmt::Display for Ratio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => write!(f, "{v:.2}x"),
            Self::NotAvailable => f.write_str("N/A"),
        }
    }
}

impl Serialize for Ratio {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Value(v) => serializer.serialize_f64(*v),
            Self::NotAvailable => serializer.serialize_str("N/A"),
        }
    }
}

impl<'de> Deserialize<'de> for Ratio {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(f64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(v) if v.is_finite() => Ok(Self::Value(v)),
            Raw::Number(_) => Ok(Self::NotAvailable),
            Raw::Text(t) if t == "N/A" => Ok(Self::NotAvailable),
            Raw::Text(t) => Err(serde::de::Error::custom(format!("invalid ratio: {t}"))),
        }
    }
}

/// Collects per-trial measurements for one variant
#[derive(Debug, Default)]
pub struct MetricsCollector {
    accuracy: Vec<f64>,
    latency: Vec<Duration>,
    tokens: Vec<usize>,
    passed: usize,
}

impl MetricsCollector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one executed trial
    pub fn record_trial(&mut self, accuracy: f64, latency: Duration, tokens: usize, success: bool) {
        self.accuracy.push(accuracy.clamp(0.0, 1.0));
        self.latency.push(latency);
        self.tokens.push(tokens);
        if success {
            self.passed += 1;
        }
    }

    /// Number of recorded trials
    #[must_use]
    pub fn len(&self) -> usize {
        self.accuracy.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.accuracy.is_empty()
    }

    /// Recorded accuracy samples
    #[must_use]
    pub fn accuracy_samples(&self) -> &[f64] {
        &self.accuracy
    }

    /// Compute aggregated metrics
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn compute(&self, config: &StatConfig) -> AggregatedMetrics {
        let latency_ms: Vec<f64> = self
            .latency
            .iter()
            .map(|d| d.as_secs_f64() * 1000.0)
            .collect();
        let tokens: Vec<f64> = self.tokens.iter().map(|t| *t as f64).collect();

        AggregatedMetrics {
            success_rate: SuccessRate::new(self.passed, self.accuracy.len()),
            avg_accuracy: compute_mean(&self.accuracy),
            accuracy_ci: bootstrap_ci(&self.accuracy, config),
            avg_latency_ms: compute_mean(&latency_ms),
            latency_p50: percentile_duration(&self.latency, 0.50),
            latency_p95: percentile_duration(&self.latency, 0.95),
            avg_tokens: compute_mean(&tokens),
            sample_count: self.accuracy.len(),
        }
    }
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn percentile_duration(samples: &[Duration], percentile: f64) -> Duration {
    if samples.is_empty() {
        return Duration::ZERO;
    }

    let mut sorted = samples.to_vec();
    sorted.sort();

    let idx = ((samples.len() as f64 * percentile).ceil() as usize).saturating_sub(1);
    sorted
        .get(idx.min(sorted.len() - 1))
        .copied()
        .unwrap_or(Duration::ZERO)
}

/// Mean of samples, 0 for an empty slice
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn compute_mean(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().sum::<f64>() / samples.len() as f64
}

/// Sample standard deviation, 0 for fewer than two samples
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn compute_std(samples: &[f64]) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }
    let mean = compute_mean(samples);
    let variance =
        samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (samples.len() - 1) as f64;
    variance.sqrt()
}

/// Statistical configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatConfig {
    /// Number of bootstrap resamples
    pub bootstrap_n: usize,
    /// Confidence level (e.g., 0.95)
    pub confidence: f64,
    /// Significance threshold
    pub alpha: f64,
    /// Seed for the bootstrap resampler
    pub seed: u64,
}

impl Default for StatConfig {
    fn default() -> Self {
        Self {
            bootstrap_n: 2_000,
            confidence: 0.95,
            alpha: 0.05,
            seed: 42,
        }
    }
}

/// Bootstrap confidence interval of the mean (percentile method).
///
/// Seeded, so identical inputs always give identical intervals.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_sign_loss,
    clippy::cast_possible_truncation
)]
pub fn bootstrap_ci(samples: &[f64], config: &StatConfig) -> (f64, f64) {
    if samples.len() < 2 || config.bootstrap_n == 0 {
        let mean = compute_mean(samples);
        return (mean, mean);
    }

    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let mut means = Vec::with_capacity(config.bootstrap_n);

    for _ in 0..config.bootstrap_n {
        let resample_sum: f64 = (0..samples.len())
            .map(|_| samples[rng.next_u64() as usize % samples.len()])
            .sum();
        means.push(resample_sum / samples.len() as f64);
    }

    means.sort_by(f64::total_cmp);

    let alpha = 1.0 - config.confidence;
    let lower_idx = (config.bootstrap_n as f64 * (alpha / 2.0)).floor() as usize;
    let upper_idx = (config.bootstrap_n as f64 * (1.0 - alpha / 2.0)).ceil() as usize;

    let lower = means.get(lower_idx).copied().unwrap_or(0.0);
    let upper = means
        .get(upper_idx.min(means.len() - 1))
        .copied()
        .unwrap_or(0.0);

    (lower, upper)
}

/// Result of a Welch t-test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignificanceResult {
    pub t_statistic: f64,
    pub p_value: f64,
    pub degrees_of_freedom: f64,
    pub is_significant: bool,
    pub cohens_d: f64,
    pub effect_interpretation: String,
}

/// Independent samples t-test (Welch's t-test)
///
/// Returns `None` if either sample has fewer than two values or there is no
/// variance at all.
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::suboptimal_flops)]
pub fn welch_t_test(samples_a: &[f64], samples_b: &[f64], alpha: f64) -> Option<SignificanceResult> {
    if samples_a.len() < 2 || samples_b.len() < 2 {
        return None;
    }

    let n_a = samples_a.len() as f64;
    let n_b = samples_b.len() as f64;
    let mean_a = compute_mean(samples_a);
    let mean_b = compute_mean(samples_b);
    let var_a = compute_std(samples_a).powi(2);
    let var_b = compute_std(samples_b).powi(2);

    let se = ((var_a / n_a) + (var_b / n_b)).sqrt();
    if se < f64::EPSILON {
        return None;
    }

    let t_statistic = (mean_a - mean_b) / se;

    // Welch-Satterthwaite
    let df_num = ((var_a / n_a) + (var_b / n_b)).powi(2);
    let df_denom = ((var_a / n_a).powi(2) / (n_a - 1.0)) + ((var_b / n_b).powi(2) / (n_b - 1.0));
    let df = if df_denom > f64::EPSILON {
        df_num / df_denom
    } else {
        (n_a + n_b - 2.0).max(1.0)
    };

    let t_dist = StudentsT::new(0.0, 1.0, df).ok()?;
    let p_value = 2.0 * (1.0 - t_dist.cdf(t_statistic.abs()));

    let pooled_std = (((n_a - 1.0) * var_a + (n_b - 1.0) * var_b) / (n_a + n_b - 2.0)).sqrt();
    let cohens_d = if pooled_std > f64::EPSILON {
        (mean_a - mean_b) / pooled_std
    } else {
        0.0
    };

    Some(SignificanceResult {
        t_statistic,
        p_value,
        degrees_of_freedom: df,
        is_significant: p_value < alpha,
        cohens_d,
        effect_interpretation: interpret_cohens_d(cohens_d).to_string(),
    })
}

/// Interpret Cohen's d effect size
fn interpret_cohens_d(d: f64) -> &'static str {
    let abs_d = d.abs();
    if abs_d < 0.2 {
        "negligible"
    } else if abs_d < 0.5 {
        "small"
    } else if abs_d < 0.8 {
        "medium"
    } else {
        "large"
    }
}

/// Aggregated metrics for one variant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedMetrics {
    pub success_rate: SuccessRate,
    pub avg_accuracy: f64,
    /// Bootstrap confidence interval for accuracy (lower, upper)
    pub accuracy_ci: (f64, f64),
    pub avg_latency_ms: f64,
    pub latency_p50: Duration,
    pub latency_p95: Duration,
    pub avg_tokens: f64,
    pub sample_count: usize,
}

#[cfg(test)]
#[allow(
    clippy::float_cmp,
    clippy::cast_precision_loss,
    clippy::unwrap_used
)]
mod tests {
    use super::*;

    #[test]
    fn test_success_rate_display_and_parse() {
        let rate: SuccessRate = "3/4".parse().unwrap();
        assert_eq!(rate, SuccessRate::new(3, 4));
        assert_eq!(rate.to_string(), "3/4");
        assert_eq!(rate.fraction(), Some(0.75));
    }

    #[test]
    fn test_success_rate_no_data_is_distinct_from_zero() {
        let none = SuccessRate::new(0, 0);
        let zero = SuccessRate::new(0, 5);
        assert!(none.is_empty());
        assert_eq!(none.fraction(), None);
        assert_eq!(zero.fraction(), Some(0.0));
        assert_eq!(none.percent_label(), "N/A");
        assert_eq!(zero.percent_label(), "0.0%");
    }

    #[test]
    fn test_success_rate_rejects_garbage() {
        assert!(matches!(
            "three of four".parse::<SuccessRate>(),
            Err(SuccessRateError::Malformed(_))
        ));
        assert!(matches!(
            "5/4".parse::<SuccessRate>(),
            Err(SuccessRateError::OutOfRange(_))
        ));
        assert!("/4".parse::<SuccessRate>().is_err());
    }

    #[test]
    fn test_success_rate_parse_never_yields_nan() {
        for n in 0..20 {
            for k in 0..=n {
                let rate: SuccessRate = format!("{k}/{n}").parse().unwrap();
                let ratio = Ratio::of(rate.fraction_or_zero(), rate.fraction_or_zero());
                assert!(ratio.value().map_or(true, f64::is_finite));
                assert!(!rate.percent_label().contains("NaN"));
                assert!(rate.fraction().map_or(true, f64::is_finite));
            }
        }
    }

    #[test]
    fn test_success_rate_serde_as_string() {
        let json = serde_json::to_string(&SuccessRate::new(2, 3)).unwrap();
        assert_eq!(json, "\"2/3\"");
        let parsed: SuccessRate = serde_json::from_str("\"0/0\"").unwrap();
        assert!(parsed.is_empty());
    }

    #[test]
    fn test_ratio_guards_division() {
        assert_eq!(Ratio::of(0.9, 0.2).value().map(|v| (v * 10.0).round()), Some(45.0));
        assert_eq!(Ratio::of(1.0, 0.0), Ratio::NotAvailable);
        assert_eq!(Ratio::of(f64::NAN, 1.0), Ratio::NotAvailable);
        assert_eq!(Ratio::NotAvailable.to_string(), "N/A");
        assert!(!Ratio::NotAvailable.meets(0.0));
        assert!(Ratio::Value(1.5).meets(1.5));
    }

    #[test]
    fn test_ratio_serde() {
        assert_eq!(serde_json::to_string(&Ratio::NotAvailable).unwrap(), "\"N/A\"");
        assert_eq!(serde_json::to_string(&Ratio::Value(2.0)).unwrap(), "2.0");
        let parsed: Ratio = serde_json::from_str("\"N/A\"").unwrap();
        assert_eq!(parsed, Ratio::NotAvailable);
        let parsed: Ratio = serde_json::from_str("1.25").unwrap();
        assert_eq!(parsed, Ratio::Value(1.25));
    }

    #[test]
    fn test_metrics_collector_empty() {
        let metrics = MetricsCollector::new().compute(&StatConfig::default());
        assert_eq!(metrics.sample_count, 0);
        assert!(metrics.success_rate.is_empty());
        assert_eq!(metrics.avg_accuracy, 0.0);
        assert_eq!(metrics.avg_latency_ms, 0.0);
        assert_eq!(metrics.latency_p95, Duration::ZERO);
    }

    #[test]
    fn test_metrics_collector_with_trials() {
        let mut collector = MetricsCollector::new();
        collector.record_trial(1.0, Duration::from_millis(100), 10, true);
        collector.record_trial(0.5, Duration::from_millis(300), 30, false);
        collector.record_trial(1.4, Duration::from_millis(200), 20, true);

        let metrics = collector.compute(&StatConfig::default());
        assert_eq!(metrics.success_rate.to_string(), "2/3");
        // 1.4 is clamped to 1.0
        assert!((metrics.avg_accuracy - 2.5 / 3.0).abs() < 1e-9);
        assert!((metrics.avg_latency_ms - 200.0).abs() < 1e-9);
        assert!((metrics.avg_tokens - 20.0).abs() < 1e-9);
        assert_eq!(metrics.latency_p50, Duration::from_millis(200));
    }

    #[test]
    fn test_compute_std() {
        let samples = vec![2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let std = compute_std(&samples);
        assert!(std > 2.0 && std < 2.2, "std = {std}");
        assert_eq!(compute_std(&[5.0]), 0.0);
    }

    #[test]
    fn test_bootstrap_ci_reproducible_and_contains_mean() {
        let samples: Vec<f64> = (0..100).map(|i| 0.5 + (i as f64 * 0.004)).collect();
        let config = StatConfig::default();

        let first = bootstrap_ci(&samples, &config);
        let second = bootstrap_ci(&samples, &config);
        assert_eq!(first, second);

        let mean = compute_mean(&samples);
        assert!(first.0 <= mean && mean <= first.1);
    }

    #[test]
    fn test_bootstrap_ci_single_sample() {
        assert_eq!(bootstrap_ci(&[0.95], &StatConfig::default()), (0.95, 0.95));
        assert_eq!(bootstrap_ci(&[], &StatConfig::default()), (0.0, 0.0));
    }

    #[test]
    fn test_welch_t_test_significant() {
        let a: Vec<f64> = (0..50).map(|i| 0.95 - (i % 5) as f64 * 0.01).collect();
        let b: Vec<f64> = (0..50).map(|i| 0.55 - (i % 7) as f64 * 0.01).collect();

        let result = welch_t_test(&a, &b, 0.05).unwrap();
        assert!(result.is_significant);
        assert_eq!(result.effect_interpretation, "large");
    }

    #[test]
    fn test_welch_t_test_degenerate_inputs() {
        assert!(welch_t_test(&[0.9], &[0.8], 0.05).is_none());
        assert!(welch_t_test(&[1.0, 1.0], &[0.0, 0.0], 0.05).is_none());
    }

    #[test]
    fn test_cohens_d_interpretation() {
        assert_eq!(interpret_cohens_d(0.1), "negligible");
        assert_eq!(interpret_cohens_d(0.3), "small");
        assert_eq!(interpret_cohens_d(0.6), "medium");
        assert_eq!(interpret_cohens_d(-0.9), "large");
    }
}
