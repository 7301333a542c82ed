//! Comparative analysis across prompting approaches.
//!
//! Variants are grouped into [`Approach`] buckets, compared against the
//! conversational bucket and ranked. The minimal-design advantage is an
//! acceptance check: a scorer that cannot tell approaches apart is reported
//! as a concern, never silently passed.

use crate::metrics::{compute_mean, Ratio};
use crate::runner::VariantStats;
use crate::walkthrough::VariantType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Required success advantage of minimal over the other approaches
pub const SUCCESS_ADVANTAGE_THRESHOLD: f64 = 1.5;
/// Required token-efficiency advantage of minimal over the other approaches
pub const EFFICIENCY_ADVANTAGE_THRESHOLD: f64 = 1.3;
/// Pass rates above both of these suggest the bar is too lenient
pub const INTEGRITY_MINIMAL_CEILING: f64 = 0.95;
pub const INTEGRITY_OTHER_CEILING: f64 = 0.8;

/// Tokens per unit of work in the efficiency normalization
const TOKENS_PER_UNIT: f64 = 50.0;

/// Baseline used when no conversational variant has data
pub const ASSUMED_BASELINE: Baseline = Baseline {
    success_rate: 0.5,
    efficiency: 0.25,
    avg_latency_ms: 1000.0,
    assumed: true,
};

/// Prompting approach bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Approach {
    Minimal,
    FewShot,
    SystemRole,
    Hybrid,
    Conversational,
}

impl Approach {
    pub const ALL: [Self; 5] = [
        Self::Minimal,
        Self::FewShot,
        Self::SystemRole,
        Self::Hybrid,
        Self::Conversational,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Minimal => "minimal",
            Self::FewShot => "fewShot",
            Self::SystemRole => "systemRole",
            Self::Hybrid => "hybrid",
            Self::Conversational => "conversational",
        }
    }

    /// Bucket for a variant: category tag first, then name keywords
    #[must_use]
    pub fn classify(variant_type: VariantType, name: &str) -> Self {
        match variant_type {
            VariantType::Mcd => Self::Minimal,
            VariantType::Hybrid => Self::Hybrid,
            VariantType::NonMcd => {
                let name = name.to_lowercase();
                let has = |words: &[&str]| words.iter().any(|w| name.contains(w));
                if has(&["few-shot", "few shot", "fewshot", "pattern", "example"]) {
                    Self::FewShot
                } else if has(&["system", "role"]) {
                    Self::SystemRole
                } else if has(&["hybrid"]) {
                    Self::Hybrid
                } else {
                    Self::Conversational
                }
            }
        }
    }

    #[must_use]
    pub const fn is_minimal(self) -> bool {
        matches!(self, Self::Minimal)
    }
}

impl fmt::Display for Approach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token-normalized productivity
#[must_use]
pub fn efficiency(success_rate: f64, avg_tokens: f64) -> f64 {
    success_rate / (avg_tokens / TOKENS_PER_UNIT).max(1.0)
}

/// Aggregate of the variants in one bucket that have data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketSummary {
    pub approach: Approach,
    pub variant_ids: Vec<String>,
    /// Mean of per-variant success fractions
    pub success_rate: f64,
    pub avg_tokens: f64,
    pub avg_latency_ms: f64,
    pub avg_accuracy: f64,
    pub efficiency: f64,
}

impl BucketSummary {
    /// Summarize variants; `None` if none of them has trial data
    #[must_use]
    pub fn from_variants<'a>(
        approach: Approach,
        variants: impl IntoIterator<Item = &'a VariantStats>,
    ) -> Option<Self> {
        let with_data: Vec<(&VariantStats, f64)> = variants
            .into_iter()
            .filter_map(|v| v.success_rate.fraction().map(|f| (v, f)))
            .collect();
        if with_data.is_empty() {
            return None;
        }

        let success: Vec<f64> = with_data.iter().map(|(_, f)| *f).collect();
        let tokens: Vec<f64> = with_data.iter().map(|(v, _)| v.avg_tokens).collect();
        let latency: Vec<f64> = with_data.iter().map(|(v, _)| v.avg_latency_ms).collect();
        let accuracy: Vec<f64> = with_data.iter().map(|(v, _)| v.avg_accuracy).collect();

        let success_rate = compute_mean(&success);
        let avg_tokens = compute_mean(&tokens);

        Some(Self {
            approach,
            variant_ids: with_data.iter().map(|(v, _)| v.variant_id.clone()).collect(),
            success_rate,
            avg_tokens,
            avg_latency_ms: compute_mean(&latency),
            avg_accuracy: compute_mean(&accuracy),
            efficiency: efficiency(success_rate, avg_tokens),
        })
    }
}

/// Reference point for all ratios
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub success_rate: f64,
    pub efficiency: f64,
    pub avg_latency_ms: f64,
    /// Whether the fixed assumed baseline was used
    pub assumed: bool,
}

impl Baseline {
    fn from_bucket(bucket: &BucketSummary) -> Self {
        Self {
            success_rate: bucket.success_rate,
            efficiency: bucket.efficiency,
            avg_latency_ms: bucket.avg_latency_ms,
            assumed: false,
        }
    }
}

/// One entry of the overall ranking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedApproach {
    pub rank: usize,
    pub approach: Approach,
    /// Mean of the available ratios
    pub score: Ratio,
}

/// Verdict on the minimal-design advantage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McdAdvantage {
    pub validated: bool,
    pub success_advantage: Ratio,
    pub efficiency_advantage: Ratio,
    pub minimal_success: Option<f64>,
    pub non_minimal_success: Option<f64>,
    pub concerns: Vec<String>,
    /// Set when minimal or non-minimal data was missing
    pub is_fallback: bool,
}

impl McdAdvantage {
    fn fallback(reason: &str, minimal: Option<&BucketSummary>, other: Option<&BucketSummary>) -> Self {
        Self {
            validated: false,
            success_advantage: Ratio::NotAvailable,
            efficiency_advantage: Ratio::NotAvailable,
            minimal_success: minimal.map(|b| b.success_rate),
            non_minimal_success: other.map(|b| b.success_rate),
            concerns: vec![format!("Insufficient data: {reason}")],
            is_fallback: true,
        }
    }

    /// Apply the acceptance checks to a minimal and a pooled non-minimal summary
    #[must_use]
    pub fn evaluate(minimal: &BucketSummary, other: &BucketSummary) -> Self {
        let success_advantage = Ratio::of(minimal.success_rate, other.success_rate);
        let efficiency_advantage = Ratio::of(minimal.efficiency, other.efficiency);
        let mut concerns = Vec::new();

        check_advantage(
            &mut concerns,
            "success",
            success_advantage,
            minimal.success_rate,
            SUCCESS_ADVANTAGE_THRESHOLD,
        );
        check_advantage(
            &mut concerns,
            "token efficiency",
            efficiency_advantage,
            minimal.efficiency,
            EFFICIENCY_ADVANTAGE_THRESHOLD,
        );

        if minimal.success_rate > INTEGRITY_MINIMAL_CEILING
            && other.success_rate > INTEGRITY_OTHER_CEILING
        {
            concerns.push(format!(
                "Integrity concern: minimal ({:.1}%) and non-minimal ({:.1}%) pass rates are both unrealistically high; scoring may be too lenient",
                minimal.success_rate * 100.0,
                other.success_rate * 100.0
            ));
        }

        Self {
            validated: concerns.is_empty(),
            success_advantage,
            efficiency_advantage,
            minimal_success: Some(minimal.success_rate),
            non_minimal_success: Some(other.success_rate),
            concerns,
            is_fallback: false,
        }
    }
}

/// An undefined ratio passes only when the numerator is positive, i.e. the
/// other approaches scored zero.
fn check_advantage(
    concerns: &mut Vec<String>,
    metric: &str,
    advantage: Ratio,
    minimal_value: f64,
    threshold: f64,
) {
    match advantage {
        Ratio::Value(v) if v < threshold => concerns.push(format!(
            "MCD {metric} advantage {v:.2}x is below the {threshold:.1}x threshold"
        )),
        Ratio::Value(_) => {}
        Ratio::NotAvailable if minimal_value > 0.0 => {}
        Ratio::NotAvailable => concerns.push(format!(
            "MCD {metric} advantage undefined: minimal approach has no {metric}"
        )),
    }
}

/// Cross-approach comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparativeAnalysis {
    pub buckets: Vec<BucketSummary>,
    pub baseline: Baseline,
    pub success_ratios: BTreeMap<Approach, Ratio>,
    pub token_efficiency_ratios: BTreeMap<Approach, Ratio>,
    /// Baseline latency over bucket latency; above 1 means faster
    pub latency_ratios: BTreeMap<Approach, Ratio>,
    pub overall_rankings: Vec<RankedApproach>,
    pub mcd_advantage: McdAdvantage,
    /// Set when no variant had any data
    pub is_fallback: bool,
}

impl ComparativeAnalysis {
    /// Summary for one approach, if it had data
    #[must_use]
    pub fn bucket(&self, approach: Approach) -> Option<&BucketSummary> {
        self.buckets.iter().find(|b| b.approach == approach)
    }
}

/// Compare all variants by approach bucket
#[must_use]
pub fn analyze(stats: &[VariantStats]) -> ComparativeAnalysis {
    let classified: Vec<(Approach, &VariantStats)> = stats
        .iter()
        .map(|s| (Approach::classify(s.variant_type, &s.variant_name), s))
        .collect();

    let buckets: Vec<BucketSummary> = Approach::ALL
        .iter()
        .filter_map(|approach| {
            BucketSummary::from_variants(
                *approach,
                classified
                    .iter()
                    .filter(|(a, _)| a == approach)
                    .map(|(_, s)| *s),
            )
        })
        .collect();

    let baseline = buckets
        .iter()
        .find(|b| b.approach == Approach::Conversational)
        .map_or(ASSUMED_BASELINE, Baseline::from_bucket);

    let mut success_ratios = BTreeMap::new();
    let mut token_efficiency_ratios = BTreeMap::new();
    let mut latency_ratios = BTreeMap::new();
    let mut scored = Vec::new();

    for bucket in &buckets {
        let success = Ratio::of(bucket.success_rate, baseline.success_rate);
        let eff = Ratio::of(bucket.efficiency, baseline.efficiency);
        let latency = Ratio::of(baseline.avg_latency_ms, bucket.avg_latency_ms);

        let available: Vec<f64> = [success, eff, latency]
            .iter()
            .filter_map(|r| r.value())
            .collect();
        let score = if available.is_empty() {
            Ratio::NotAvailable
        } else {
            Ratio::Value(compute_mean(&available))
        };

        success_ratios.insert(bucket.approach, success);
        token_efficiency_ratios.insert(bucket.approach, eff);
        latency_ratios.insert(bucket.approach, latency);
        scored.push((bucket.approach, score));
    }

    // undefined scores rank last; ties keep bucket order
    scored.sort_by(|(_, a), (_, b)| match (a.value(), b.value()) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
    let overall_rankings = scored
        .into_iter()
        .enumerate()
        .map(|(i, (approach, score))| RankedApproach {
            rank: i + 1,
            approach,
            score,
        })
        .collect();

    let minimal = buckets.iter().find(|b| b.approach.is_minimal());
    let pooled_other = BucketSummary::from_variants(
        Approach::Conversational,
        classified
            .iter()
            .filter(|(a, _)| !a.is_minimal())
            .map(|(_, s)| *s),
    );

    let mcd_advantage = match (minimal, pooled_other.as_ref()) {
        (Some(m), Some(o)) => McdAdvantage::evaluate(m, o),
        (None, other) => McdAdvantage::fallback("no minimal-design results", None, other),
        (Some(m), None) => McdAdvantage::fallback("no non-minimal results", Some(m), None),
    };

    if buckets.is_empty() {
        tracing::warn!(variants = stats.len(), "No variant data; comparative analysis is a fallback");
    }

    ComparativeAnalysis {
        is_fallback: buckets.is_empty(),
        buckets,
        baseline,
        success_ratios,
        token_efficiency_ratios,
        latency_ratios,
        overall_rankings,
        mcd_advantage,
    }
}
