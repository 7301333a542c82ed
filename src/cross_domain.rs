//! Cross-domain consistency and significance reporting.
//!
//! Works on variant profiles (measured when a variant has run, the declared
//! expected profile otherwise), so it can describe a catalog before any
//! execution.
//!
//! The significance band here is a heuristic that maps the relative gap
//! between minimal and non-minimal success rates onto p-value style labels.
//! It is not a hypothesis test. When per-trial accuracy samples are
//! available a Welch t-test is reported next to it, labelled as such.

use crate::compare::{efficiency, Approach};
use crate::domain::Domain;
use crate::metrics::{compute_mean, compute_std, welch_t_test, Ratio, SignificanceResult};
use crate::runner::VariantStats;
use crate::walkthrough::DomainWalkthrough;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fallback triggers a robust domain is expected to declare
pub const CANONICAL_FALLBACK_TRIGGERS: &[&str] = &[
    "ambiguous_input",
    "missing_information",
    "low_confidence",
    "out_of_scope",
    "invalid_format",
    "timeout",
    "token_budget_exceeded",
];

/// Declared triggers needed for graceful degradation
pub const GRACEFUL_DEGRADATION_MIN_TRIGGERS: usize = 3;

pub const HEURISTIC_NOTE: &str =
    "heuristic band from the relative minimal vs non-minimal success gap; not a statistical test";

/// Means over the variant profiles of one approach group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileMeans {
    pub variants: usize,
    pub success_rate: f64,
    pub token_efficiency: f64,
    pub avg_latency_ms: f64,
    pub memory_kb: f64,
}

impl ProfileMeans {
    fn merge(parts: &[&Self]) -> Option<Self> {
        if parts.is_empty() {
            return None;
        }
        let pick = |f: fn(&Self) -> f64| compute_mean(&parts.iter().map(|p| f(p)).collect::<Vec<_>>());
        Some(Self {
            variants: parts.iter().map(|p| p.variants).sum(),
            success_rate: pick(|p| p.success_rate),
            token_efficiency: pick(|p| p.token_efficiency),
            avg_latency_ms: pick(|p| p.avg_latency_ms),
            memory_kb: pick(|p| p.memory_kb),
        })
    }
}

#[derive(Default)]
struct MeansBuilder {
    success: Vec<f64>,
    efficiency: Vec<f64>,
    latency: Vec<f64>,
    memory: Vec<f64>,
}

impl MeansBuilder {
    fn push(&mut self, success: f64, avg_tokens: f64, latency: f64, memory: f64) {
        self.success.push(success);
        self.efficiency.push(efficiency(success, avg_tokens));
        self.latency.push(latency);
        self.memory.push(memory);
    }

    fn build(&self) -> Option<ProfileMeans> {
        if self.success.is_empty() {
            return None;
        }
        Some(ProfileMeans {
            variants: self.success.len(),
            success_rate: compute_mean(&self.success),
            token_efficiency: compute_mean(&self.efficiency),
            avg_latency_ms: compute_mean(&self.latency),
            memory_kb: compute_mean(&self.memory),
        })
    }
}

/// Per-domain view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainSummary {
    pub domain: Domain,
    pub title: String,
    pub minimal: Option<ProfileMeans>,
    pub non_minimal: Option<ProfileMeans>,
    /// Declared triggers that belong to the canonical set
    pub canonical_triggers: Vec<String>,
    pub graceful_degradation: bool,
    pub significance: HeuristicSignificance,
}

/// Metric tracked for cross-domain consistency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsistencyMetric {
    TokenEfficiency,
    Latency,
    Memory,
    SuccessRate,
}

impl ConsistencyMetric {
    pub const ALL: [Self; 4] = [
        Self::TokenEfficiency,
        Self::Latency,
        Self::Memory,
        Self::SuccessRate,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TokenEfficiency => "token efficiency",
            Self::Latency => "latency",
            Self::Memory => "memory",
            Self::SuccessRate => "success rate",
        }
    }

    const fn value(self, means: &ProfileMeans) -> f64 {
        match self {
            Self::TokenEfficiency => means.token_efficiency,
            Self::Latency => means.avg_latency_ms,
            Self::Memory => means.memory_kb,
            Self::SuccessRate => means.success_rate,
        }
    }
}

/// Qualitative consistency level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsistencyLevel {
    High,
    Moderate,
    Low,
    InsufficientData,
}

impl ConsistencyLevel {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Moderate => "moderate",
            Self::Low => "low",
            Self::InsufficientData => "insufficient data",
        }
    }

    fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            Self::High
        } else if score >= 60.0 {
            Self::Moderate
        } else {
            Self::Low
        }
    }
}

/// How stable the minimal approach is across domains for one metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyPattern {
    pub metric: ConsistencyMetric,
    pub domains: usize,
    pub mean: f64,
    pub std_dev: f64,
    pub coefficient_of_variation: Ratio,
    /// 100 · (1 − CV), clamped to [0, 100]
    pub score: f64,
    pub level: ConsistencyLevel,
}

impl ConsistencyPattern {
    fn compute(metric: ConsistencyMetric, values: &[f64]) -> Self {
        let mean = compute_mean(values);
        let std_dev = compute_std(values);

        if values.len() < 2 {
            return Self {
                metric,
                domains: values.len(),
                mean,
                std_dev,
                coefficient_of_variation: Ratio::NotAvailable,
                score: 0.0,
                level: ConsistencyLevel::InsufficientData,
            };
        }

        let cv = if std_dev < f64::EPSILON {
            Ratio::Value(0.0)
        } else {
            Ratio::of(std_dev, mean.abs())
        };
        // a zero mean leaves CV undefined, which says nothing about spread
        let (score, level) = cv.value().map_or((0.0, ConsistencyLevel::InsufficientData), |cv| {
            let score = (100.0 * (1.0 - cv)).clamp(0.0, 100.0);
            (score, ConsistencyLevel::from_score(score))
        });

        Self {
            metric,
            domains: values.len(),
            mean,
            std_dev,
            coefficient_of_variation: cv,
            score,
            level,
        }
    }
}

/// Coarse significance label
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SignificanceBand {
    #[serde(rename = "p<0.001")]
    P001,
    #[serde(rename = "p<0.01")]
    P01,
    #[serde(rename = "p<0.05")]
    P05,
    #[serde(rename = "n.s.")]
    NotSignificant,
}

impl SignificanceBand {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::P001 => "p<0.001",
            Self::P01 => "p<0.01",
            Self::P05 => "p<0.05",
            Self::NotSignificant => "n.s.",
        }
    }

    /// Band for a relative gap in [0, 1]
    #[must_use]
    pub fn from_gap(gap: f64) -> Self {
        if gap >= 0.5 {
            Self::P001
        } else if gap >= 0.3 {
            Self::P01
        } else if gap >= 0.15 {
            Self::P05
        } else {
            Self::NotSignificant
        }
    }
}

impl fmt::Display for SignificanceBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Heuristic significance of the minimal vs non-minimal gap
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeuristicSignificance {
    pub band: SignificanceBand,
    /// |minimal − other| / max(minimal, other)
    pub normalized_gap: f64,
    pub favours_minimal: bool,
    pub method: String,
}

impl HeuristicSignificance {
    /// Band the gap between two success rates
    #[must_use]
    pub fn from_rates(minimal: f64, other: f64) -> Self {
        let gap = Ratio::of((minimal - other).abs(), minimal.max(other))
            .value()
            .unwrap_or(0.0)
            .clamp(0.0, 1.0);
        Self {
            band: SignificanceBand::from_gap(gap),
            normalized_gap: gap,
            favours_minimal: minimal > other,
            method: HEURISTIC_NOTE.to_string(),
        }
    }

    fn insufficient() -> Self {
        Self {
            band: SignificanceBand::NotSignificant,
            normalized_gap: 0.0,
            favours_minimal: false,
            method: format!("{HEURISTIC_NOTE} (insufficient data)"),
        }
    }

    fn between(minimal: Option<&ProfileMeans>, other: Option<&ProfileMeans>) -> Self {
        match (minimal, other) {
            (Some(m), Some(o)) => Self::from_rates(m.success_rate, o.success_rate),
            _ => Self::insufficient(),
        }
    }
}

/// Welch t-test on pooled per-trial accuracies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccuracyTest {
    pub minimal_samples: usize,
    pub non_minimal_samples: usize,
    pub result: SignificanceResult,
    pub method: String,
}

/// Everything the cross-domain reporter derives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossDomainAnalysis {
    pub domains: Vec<DomainSummary>,
    pub overall_minimal: Option<ProfileMeans>,
    pub overall_non_minimal: Option<ProfileMeans>,
    pub consistency: Vec<ConsistencyPattern>,
    pub graceful_degradation_domains: usize,
    pub significance: HeuristicSignificance,
    pub accuracy_test: Option<AccuracyTest>,
    /// Set when there was no minimal-design data in any domain
    pub is_fallback: bool,
    pub notes: Vec<String>,
}

/// Normalize a trigger name for comparison with the canonical set
fn normalize_trigger(trigger: &str) -> String {
    trigger
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect()
}

/// Declared triggers that match the canonical set
#[must_use]
pub fn canonical_triggers(declared: &[String]) -> Vec<String> {
    let mut matched: Vec<String> = CANONICAL_FALLBACK_TRIGGERS
        .iter()
        .filter(|canonical| {
            declared
                .iter()
                .any(|d| normalize_trigger(d).contains(*canonical))
        })
        .map(|c| (*c).to_string())
        .collect();
    matched.dedup();
    matched
}

fn summarize_domain(walkthrough: &DomainWalkthrough) -> DomainSummary {
    let mut minimal = MeansBuilder::default();
    let mut other = MeansBuilder::default();

    for variant in walkthrough.variants() {
        let profile = variant.effective_profile();
        let Some(success) = profile.success_rate.fraction() else {
            continue;
        };
        let target = if Approach::classify(variant.variant_type, &variant.name).is_minimal() {
            &mut minimal
        } else {
            &mut other
        };
        target.push(
            success,
            profile.avg_tokens,
            profile.avg_latency_ms,
            profile.memory_kb,
        );
    }

    let minimal = minimal.build();
    let non_minimal = other.build();
    let canonical = canonical_triggers(&walkthrough.fallback_triggers);

    DomainSummary {
        domain: walkthrough.domain,
        title: walkthrough.title.clone(),
        significance: HeuristicSignificance::between(minimal.as_ref(), non_minimal.as_ref()),
        minimal,
        non_minimal,
        graceful_degradation: canonical.len() >= GRACEFUL_DEGRADATION_MIN_TRIGGERS,
        canonical_triggers: canonical,
    }
}

fn accuracy_test(stats: &[VariantStats], alpha: f64) -> Option<AccuracyTest> {
    let (minimal, other): (Vec<&VariantStats>, Vec<&VariantStats>) = stats
        .iter()
        .partition(|s| Approach::classify(s.variant_type, &s.variant_name).is_minimal());
    let pool = |group: &[&VariantStats]| -> Vec<f64> {
        group
            .iter()
            .flat_map(|s| s.accuracy_samples.iter().copied())
            .collect()
    };
    let minimal_samples = pool(&minimal);
    let other_samples = pool(&other);

    welch_t_test(&minimal_samples, &other_samples, alpha).map(|result| AccuracyTest {
        minimal_samples: minimal_samples.len(),
        non_minimal_samples: other_samples.len(),
        result,
        method: "Welch t-test on pooled per-trial accuracy".to_string(),
    })
}

/// Aggregate all walkthroughs; `stats` feeds the optional accuracy test
#[must_use]
pub fn analyze(walkthroughs: &[DomainWalkthrough], stats: &[VariantStats], alpha: f64) -> CrossDomainAnalysis {
    let domains: Vec<DomainSummary> = walkthroughs.iter().map(summarize_domain).collect();

    let minimal_parts: Vec<&ProfileMeans> =
        domains.iter().filter_map(|d| d.minimal.as_ref()).collect();
    let other_parts: Vec<&ProfileMeans> = domains
        .iter()
        .filter_map(|d| d.non_minimal.as_ref())
        .collect();

    let overall_minimal = ProfileMeans::merge(&minimal_parts);
    let overall_non_minimal = ProfileMeans::merge(&other_parts);

    let consistency = ConsistencyMetric::ALL
        .iter()
        .map(|metric| {
            let values: Vec<f64> = minimal_parts.iter().map(|m| metric.value(m)).collect();
            ConsistencyPattern::compute(*metric, &values)
        })
        .collect();

    let mut notes = Vec::new();
    let is_fallback = overall_minimal.is_none();
    if domains.is_empty() {
        notes.push("Fallback analysis: no domains supplied".to_string());
    } else if is_fallback {
        notes.push("Fallback analysis: no minimal-design profile with data in any domain".to_string());
    }
    if overall_non_minimal.is_none() && !domains.is_empty() {
        notes.push("No non-minimal profile with data; significance not assessed".to_string());
    }

    let accuracy_test = accuracy_test(stats, alpha);
    if accuracy_test.is_none() && !stats.is_empty() {
        notes.push("Welch t-test skipped: fewer than two samples per group or no variance".to_string());
    }

    if is_fallback {
        tracing::warn!(domains = domains.len(), "Cross-domain analysis fell back");
    }

    CrossDomainAnalysis {
        graceful_degradation_domains: domains.iter().filter(|d| d.graceful_degradation).count(),
        significance: HeuristicSignificance::between(
            overall_minimal.as_ref(),
            overall_non_minimal.as_ref(),
        ),
        domains,
        overall_minimal,
        overall_non_minimal,
        consistency,
        accuracy_test,
        is_fallback,
        notes,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::metrics::SuccessRate;
    use crate::runner::{ResourceTier, TierCounts};
    use crate::walkthrough::{PerformanceProfile, VariantType, WalkthroughScenario, WalkthroughVariant};

    fn variant(id: &str, variant_type: VariantType, name: &str, rate: SuccessRate, tokens: f64) -> WalkthroughVariant {
        WalkthroughVariant {
            id: id.to_string(),
            variant_type,
            name: name.to_string(),
            prompt_template: "{input}".to_string(),
            architecture: String::new(),
            trials: Vec::new(),
            expected_performance: PerformanceProfile {
                avg_latency_ms: 400.0,
                avg_tokens: tokens,
                cpu_percent: 20.0,
                memory_kb: 1024.0,
                success_rate: rate,
            },
            measured_performance: None,
        }
    }

    fn walkthrough(domain: Domain, triggers: &[&str], variants: Vec<WalkthroughVariant>) -> DomainWalkthrough {
        DomainWalkthrough {
            id: format!("{domain}-walkthrough"),
            domain,
            title: domain.name().to_string(),
            principles: Vec::new(),
            fallback_triggers: triggers.iter().map(|t| (*t).to_string()).collect(),
            tier_expectations: Vec::new(),
            scenarios: vec![WalkthroughScenario {
                id: "s1".to_string(),
                description: String::new(),
                variants,
            }],
        }
    }

    fn catalog() -> Vec<DomainWalkthrough> {
        vec![
            walkthrough(
                Domain::AppointmentBooking,
                &["ambiguous input", "missing-information", "timeout"],
                vec![
                    variant("a", VariantType::Mcd, "Slots", SuccessRate::new(9, 10), 30.0),
                    variant("b", VariantType::NonMcd, "Chat", SuccessRate::new(3, 10), 120.0),
                ],
            ),
            walkthrough(
                Domain::SpatialNavigation,
                &["low confidence"],
                vec![
                    variant("c", VariantType::Mcd, "Slots", SuccessRate::new(8, 10), 30.0),
                    variant("d", VariantType::NonMcd, "Few-shot", SuccessRate::new(4, 10), 90.0),
                ],
            ),
        ]
    }

    #[test]
    fn test_canonical_trigger_matching() {
        let declared = vec![
            "Ambiguous Input".to_string(),
            "missing-information".to_string(),
            "user typed nonsense".to_string(),
        ];
        assert_eq!(
            canonical_triggers(&declared),
            vec!["ambiguous_input", "missing_information"]
        );
    }

    #[test]
    fn test_graceful_degradation_needs_three_triggers() {
        let analysis = analyze(&catalog(), &[], 0.05);
        assert!(analysis.domains[0].graceful_degradation);
        assert!(!analysis.domains[1].graceful_degradation);
        assert_eq!(analysis.graceful_degradation_domains, 1);
    }

    #[test]
    fn test_domain_means_split_by_approach() {
        let analysis = analyze(&catalog(), &[], 0.05);
        let d1 = &analysis.domains[0];
        assert_eq!(d1.minimal.as_ref().unwrap().success_rate, 0.9);
        assert_eq!(d1.non_minimal.as_ref().unwrap().success_rate, 0.3);
        // 0.3 / (120 / 50)
        assert!((d1.non_minimal.as_ref().unwrap().token_efficiency - 0.125).abs() < 1e-9);

        let overall = analysis.overall_minimal.as_ref().unwrap();
        assert!((overall.success_rate - 0.85).abs() < 1e-9);
        assert_eq!(overall.variants, 2);
    }

    #[test]
    fn test_heuristic_band() {
        assert_eq!(SignificanceBand::from_gap(0.6), SignificanceBand::P001);
        assert_eq!(SignificanceBand::from_gap(0.35), SignificanceBand::P01);
        assert_eq!(SignificanceBand::from_gap(0.2), SignificanceBand::P05);
        assert_eq!(SignificanceBand::from_gap(0.1), SignificanceBand::NotSignificant);

        let sig = HeuristicSignificance::from_rates(0.9, 0.3);
        assert_eq!(sig.band, SignificanceBand::P001);
        assert!(sig.favours_minimal);
        assert!(sig.method.contains("not a statistical test"));

        let none = HeuristicSignificance::from_rates(0.0, 0.0);
        assert_eq!(none.band, SignificanceBand::NotSignificant);
        assert_eq!(none.normalized_gap, 0.0);
    }

    #[test]
    fn test_consistency_patterns() {
        let analysis = analyze(&catalog(), &[], 0.05);
        assert_eq!(analysis.consistency.len(), 4);

        let latency = analysis
            .consistency
            .iter()
            .find(|c| c.metric == ConsistencyMetric::Latency)
            .unwrap();
        assert_eq!(latency.score, 100.0);
        assert_eq!(latency.level, ConsistencyLevel::High);

        for pattern in &analysis.consistency {
            assert!((0.0..=100.0).contains(&pattern.score));
        }
    }

    #[test]
    fn test_undefined_cv_is_insufficient_not_low() {
        let pattern = ConsistencyPattern::compute(ConsistencyMetric::Latency, &[-2.0, 2.0]);
        assert_eq!(pattern.domains, 2);
        assert_eq!(pattern.coefficient_of_variation, Ratio::NotAvailable);
        assert_eq!(pattern.level, ConsistencyLevel::InsufficientData);
        assert!(pattern.score.abs() < f64::EPSILON);

        let flat = ConsistencyPattern::compute(ConsistencyMetric::Latency, &[0.0, 0.0]);
        assert_eq!(flat.coefficient_of_variation, Ratio::Value(0.0));
        assert_eq!(flat.level, ConsistencyLevel::High);
    }

    #[test]
    fn test_single_domain_consistency_is_insufficient() {
        let analysis = analyze(&catalog()[..1], &[], 0.05);
        assert!(analysis
            .consistency
            .iter()
            .all(|c| c.level == ConsistencyLevel::InsufficientData));
    }

    #[test]
    fn test_measured_profile_takes_precedence() {
        let mut walkthroughs = catalog();
        let v = walkthroughs[0].variants_mut().next().unwrap();
        let mut measured = v.expected_performance.clone();
        measured.success_rate = SuccessRate::new(1, 2);
        v.measured_performance = Some(measured);

        let analysis = analyze(&walkthroughs, &[], 0.05);
        assert_eq!(analysis.domains[0].minimal.as_ref().unwrap().success_rate, 0.5);
    }

    #[test]
    fn test_empty_input_is_labelled_fallback() {
        let analysis = analyze(&[], &[], 0.05);
        assert!(analysis.is_fallback);
        assert!(analysis.domains.is_empty());
        assert_eq!(analysis.significance.band, SignificanceBand::NotSignificant);
        assert!(analysis.notes[0].starts_with("Fallback analysis"));
        assert!(!serde_json::to_string(&analysis).unwrap().contains("NaN"));
    }

    #[test]
    fn test_accuracy_test_uses_trial_samples() {
        let stats = |id: &str, variant_type, samples: Vec<f64>| VariantStats {
            variant_id: id.to_string(),
            variant_name: id.to_string(),
            variant_type,
            domain: Domain::AppointmentBooking,
            tier: ResourceTier::Q4,
            success_rate: SuccessRate::new(samples.len(), samples.len()),
            avg_tokens: 20.0,
            avg_latency_ms: 100.0,
            avg_accuracy: compute_mean(&samples),
            accuracy_ci: (0.0, 1.0),
            accuracy_samples: samples,
            tier_counts: TierCounts::default(),
            mcd_aligned: 0,
            execution_errors: 0,
        };
        let all = vec![
            stats("m", VariantType::Mcd, vec![0.95, 0.9, 0.92, 0.97, 0.93]),
            stats("c", VariantType::NonMcd, vec![0.4, 0.5, 0.45, 0.55, 0.35]),
        ];

        let analysis = analyze(&catalog(), &all, 0.05);
        let test = analysis.accuracy_test.unwrap();
        assert_eq!(test.minimal_samples, 5);
        assert!(test.result.is_significant);
        assert!(test.method.starts_with("Welch"));
    }
}
