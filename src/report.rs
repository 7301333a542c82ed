//! Report generation for walkthrough evaluations.
//!
//! Generates reports showing:
//! - Per-variant results with confidence intervals
//! - Approach rankings and the MCD advantage verdict
//! - Cross-domain consistency and significance bands

use crate::compare::{Approach, ComparativeAnalysis};
use crate::cross_domain::CrossDomainAnalysis;
use crate::domain::Domain;
use crate::metrics::{Ratio, StatConfig, SuccessRate};
use crate::runner::{ResourceTier, VariantStats};
use crate::scorer::TrialEvaluationResult;
use crate::session::AnalysisSession;
use crate::walkthrough::DomainWalkthrough;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as FmtWrite;
use tabled::{Table, Tabled};

const RULE: &str = "───────────────────────────────────────────────────────────────";
const BANNER: &str = "═══════════════════════════════════════════════════════════════";

/// Full evaluation report with all analysis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FullReport {
    pub metadata: ReportMetadata,
    pub summary: ReportSummary,
    pub variants: Vec<VariantStats>,
    /// Comparative analysis per domain
    pub domain_comparisons: Vec<DomainComparison>,
    /// Comparative analysis over all domains together
    pub overall: ComparativeAnalysis,
    pub cross_domain: Option<CrossDomainAnalysis>,
}

/// Report metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub title: String,
    pub generated_at: DateTime<Utc>,
    pub framework_version: String,
    pub backend: String,
    pub tier: ResourceTier,
    pub stat_config: StatConfigSummary,
}

/// Statistical configuration summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatConfigSummary {
    pub bootstrap_n: usize,
    pub confidence: f64,
    pub alpha: f64,
    pub seed: u64,
}

impl From<&StatConfig> for StatConfigSummary {
    fn from(config: &StatConfig) -> Self {
        Self {
            bootstrap_n: config.bootstrap_n,
            confidence: config.confidence,
            alpha: config.alpha,
            seed: config.seed,
        }
    }
}

/// High-level summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportSummary {
    pub domains: usize,
    pub variants: usize,
    pub trials: SuccessRate,
    pub execution_errors: usize,
    pub best_approach: Option<Approach>,
    pub mcd_validated: bool,
    pub mcd_concerns: usize,
}

/// Comparative analysis of one domain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainComparison {
    pub domain: Domain,
    pub analysis: ComparativeAnalysis,
}

/// Report builder for constructing full reports
pub struct ReportBuilder {
    title: String,
    backend: String,
    tier: ResourceTier,
    stat_config: StatConfig,
    results: Vec<VariantStats>,
    walkthroughs: Vec<DomainWalkthrough>,
}

impl ReportBuilder {
    /// Create a new report builder
    #[must_use]
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            backend: "none".to_string(),
            tier: ResourceTier::default(),
            stat_config: StatConfig::default(),
            results: Vec::new(),
            walkthroughs: Vec::new(),
        }
    }

    /// Set statistical configuration
    #[must_use]
    pub fn with_stat_config(mut self, config: StatConfig) -> Self {
        self.stat_config = config;
        self
    }

    /// Name the backend the results came from
    #[must_use]
    pub fn with_backend(mut self, backend: &str) -> Self {
        self.backend = backend.to_string();
        self
    }

    #[must_use]
    pub const fn with_tier(mut self, tier: ResourceTier) -> Self {
        self.tier = tier;
        self
    }

    /// Add variant statistics
    pub fn add_results(&mut self, results: impl IntoIterator<Item = VariantStats>) {
        self.results.extend(results);
    }

    /// Add walkthroughs for the cross-domain section
    pub fn add_walkthroughs(&mut self, walkthroughs: impl IntoIterator<Item = DomainWalkthrough>) {
        self.walkthroughs.extend(walkthroughs);
    }

    /// Build from a session and the walkthroughs it ran
    #[must_use]
    pub fn from_session(title: &str, session: &AnalysisSession, walkthroughs: &[DomainWalkthrough]) -> Self {
        let config = session.runner().config();
        let mut builder = Self::new(title)
            .with_stat_config(config.stats.clone())
            .with_tier(config.tier);
        builder.add_results(session.results().iter().cloned());
        builder.add_walkthroughs(walkthroughs.iter().cloned());
        builder
    }

    /// Build the full report
    #[must_use]
    pub fn build(self) -> FullReport {
        let overall = crate::compare::analyze(&self.results);

        let mut domains: Vec<Domain> = self.results.iter().map(|r| r.domain).collect();
        domains.sort();
        domains.dedup();

        let domain_comparisons: Vec<DomainComparison> = domains
            .iter()
            .map(|domain| {
                let stats: Vec<VariantStats> = self
                    .results
                    .iter()
                    .filter(|r| r.domain == *domain)
                    .cloned()
                    .collect();
                DomainComparison {
                    domain: *domain,
                    analysis: crate::compare::analyze(&stats),
                }
            })
            .collect();

        let cross_domain = (!self.walkthroughs.is_empty()).then(|| {
            crate::cross_domain::analyze(&self.walkthroughs, &self.results, self.stat_config.alpha)
        });

        let passed = self.results.iter().map(|r| r.success_rate.passed).sum();
        let total = self.results.iter().map(|r| r.success_rate.total).sum();

        let summary = ReportSummary {
            domains: domains.len(),
            variants: self.results.len(),
            trials: SuccessRate::new(passed, total),
            execution_errors: self.results.iter().map(|r| r.execution_errors).sum(),
            best_approach: overall.overall_rankings.first().map(|r| r.approach),
            mcd_validated: overall.mcd_advantage.validated,
            mcd_concerns: overall.mcd_advantage.concerns.len(),
        };

        FullReport {
            metadata: ReportMetadata {
                title: self.title,
                generated_at: Utc::now(),
                framework_version: env!("CARGO_PKG_VERSION").to_string(),
                backend: self.backend,
                tier: self.tier,
                stat_config: StatConfigSummary::from(&self.stat_config),
            },
            summary,
            variants: self.results,
            domain_comparisons,
            overall,
            cross_domain,
        }
    }
}

/// Table row for variant results
#[derive(Tabled)]
struct VariantTableRow {
    #[tabled(rename = "Domain")]
    domain: String,
    #[tabled(rename = "Variant")]
    variant: String,
    #[tabled(rename = "Approach")]
    approach: String,
    #[tabled(rename = "Success")]
    success: String,
    #[tabled(rename = "Accuracy [CI]")]
    accuracy: String,
    #[tabled(rename = "Tokens")]
    tokens: String,
    #[tabled(rename = "Latency")]
    latency: String,
    #[tabled(rename = "E/G/A/P")]
    tiers: String,
}

impl From<&VariantStats> for VariantTableRow {
    fn from(s: &VariantStats) -> Self {
        Self {
            domain: s.domain.to_string(),
            variant: s.variant_id.clone(),
            approach: Approach::classify(s.variant_type, &s.variant_name).to_string(),
            success: format!("{} ({})", s.success_rate, s.success_rate.percent_label()),
            accuracy: format!(
                "{:.2} [{:.2}-{:.2}]",
                s.avg_accuracy, s.accuracy_ci.0, s.accuracy_ci.1
            ),
            tokens: format!("{:.1}", s.avg_tokens),
            latency: format!("{:.0}ms", s.avg_latency_ms),
            tiers: format!(
                "{}/{}/{}/{}",
                s.tier_counts.excellent, s.tier_counts.good, s.tier_counts.acceptable, s.tier_counts.poor
            ),
        }
    }
}

/// Table row for approach rankings
#[derive(Tabled)]
struct RankingTableRow {
    #[tabled(rename = "Rank")]
    rank: usize,
    #[tabled(rename = "Approach")]
    approach: String,
    #[tabled(rename = "Success")]
    success: String,
    #[tabled(rename = "Success Ratio")]
    success_ratio: String,
    #[tabled(rename = "Efficiency Ratio")]
    efficiency_ratio: String,
    #[tabled(rename = "Latency Ratio")]
    latency_ratio: String,
    #[tabled(rename = "Score")]
    score: String,
}

fn ranking_rows(analysis: &ComparativeAnalysis) -> Vec<RankingTableRow> {
    let ratio = |map: &std::collections::BTreeMap<Approach, Ratio>, a: Approach| {
        map.get(&a).copied().unwrap_or(Ratio::NotAvailable).to_string()
    };
    analysis
        .overall_rankings
        .iter()
        .map(|r| RankingTableRow {
            rank: r.rank,
            approach: r.approach.to_string(),
            success: analysis
                .bucket(r.approach)
                .map_or_else(|| "N/A".to_string(), |b| format!("{:.1}%", b.success_rate * 100.0)),
            success_ratio: ratio(&analysis.success_ratios, r.approach),
            efficiency_ratio: ratio(&analysis.token_efficiency_ratios, r.approach),
            latency_ratio: ratio(&analysis.latency_ratios, r.approach),
            score: r.score.to_string(),
        })
        .collect()
}

/// Table row for per-domain cross analysis
#[derive(Tabled)]
struct DomainTableRow {
    #[tabled(rename = "Domain")]
    domain: String,
    #[tabled(rename = "MCD Success")]
    minimal: String,
    #[tabled(rename = "Other Success")]
    other: String,
    #[tabled(rename = "Triggers")]
    triggers: usize,
    #[tabled(rename = "Degradation")]
    degradation: String,
    #[tabled(rename = "Band*")]
    band: String,
}

/// Table row for consistency patterns
#[derive(Tabled)]
struct ConsistencyTableRow {
    #[tabled(rename = "Metric")]
    metric: String,
    #[tabled(rename = "Domains")]
    domains: usize,
    #[tabled(rename = "Mean")]
    mean: String,
    #[tabled(rename = "CV")]
    cv: String,
    #[tabled(rename = "Score")]
    score: String,
    #[tabled(rename = "Level")]
    level: String,
}

fn percent(value: Option<f64>) -> String {
    value.map_or_else(|| "N/A".to_string(), |v| format!("{:.1}%", v * 100.0))
}

fn cross_domain_tables(cross: &CrossDomainAnalysis) -> (String, String) {
    let domain_rows: Vec<DomainTableRow> = cross
        .domains
        .iter()
        .map(|d| DomainTableRow {
            domain: format!("{} {}", d.domain, d.title),
            minimal: percent(d.minimal.as_ref().map(|m| m.success_rate)),
            other: percent(d.non_minimal.as_ref().map(|m| m.success_rate)),
            triggers: d.canonical_triggers.len(),
            degradation: if d.graceful_degradation { "yes" } else { "no" }.to_string(),
            band: d.significance.band.to_string(),
        })
        .collect();

    let consistency_rows: Vec<ConsistencyTableRow> = cross
        .consistency
        .iter()
        .map(|c| ConsistencyTableRow {
            metric: c.metric.as_str().to_string(),
            domains: c.domains,
            mean: format!("{:.3}", c.mean),
            cv: c
                .coefficient_of_variation
                .value()
                .map_or_else(|| "N/A".to_string(), |v| format!("{v:.3}")),
            score: format!("{:.1}", c.score),
            level: c.level.as_str().to_string(),
        })
        .collect();

    (
        Table::new(domain_rows).to_string(),
        Table::new(consistency_rows).to_string(),
    )
}

impl FullReport {
    /// Render report as JSON
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Render report as markdown
    #[must_use]
    #[allow(clippy::too_many_lines)]
    pub fn to_markdown(&self) -> String {
        let mut output = String::new();

        writeln!(output, "# {}", self.metadata.title).ok();
        writeln!(output).ok();
        writeln!(
            output,
            "**Generated:** {}",
            self.metadata.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
        )
        .ok();
        writeln!(
            output,
            "**Framework Version:** {}",
            self.metadata.framework_version
        )
        .ok();
        writeln!(
            output,
            "**Backend:** {} at {}",
            self.metadata.backend, self.metadata.tier
        )
        .ok();
        writeln!(output).ok();

        writeln!(output, "## Summary").ok();
        writeln!(output).ok();
        writeln!(output, "| Metric | Value |").ok();
        writeln!(output, "|--------|-------|").ok();
        writeln!(output, "| Domains | {} |", self.summary.domains).ok();
        writeln!(output, "| Variants | {} |", self.summary.variants).ok();
        writeln!(
            output,
            "| Trials Passed | {} ({}) |",
            self.summary.trials,
            self.summary.trials.percent_label()
        )
        .ok();
        writeln!(
            output,
            "| Execution Errors | {} |",
            self.summary.execution_errors
        )
        .ok();
        if let Some(best) = self.summary.best_approach {
            writeln!(output, "| Best Approach | {best} |").ok();
        }
        writeln!(
            output,
            "| MCD Advantage Validated | {} |",
            if self.summary.mcd_validated { "Yes" } else { "No" }
        )
        .ok();
        writeln!(output).ok();

        writeln!(output, "## Variant Results").ok();
        writeln!(output).ok();
        let rows: Vec<VariantTableRow> = self.variants.iter().map(VariantTableRow::from).collect();
        writeln!(output, "{}", Table::new(rows)).ok();
        writeln!(output).ok();

        writeln!(output, "## Approach Rankings").ok();
        writeln!(output).ok();
        if self.overall.baseline.assumed {
            writeln!(
                output,
                "_No conversational data; ratios use the assumed baseline._"
            )
            .ok();
            writeln!(output).ok();
        }
        writeln!(output, "{}", Table::new(ranking_rows(&self.overall))).ok();
        writeln!(output).ok();

        writeln!(output, "## MCD Advantage").ok();
        writeln!(output).ok();
        let adv = &self.overall.mcd_advantage;
        writeln!(output, "- Success advantage: {}", adv.success_advantage).ok();
        writeln!(output, "- Efficiency advantage: {}", adv.efficiency_advantage).ok();
        writeln!(
            output,
            "- Verdict: {}",
            if adv.validated { "validated" } else { "not validated" }
        )
        .ok();
        for concern in &adv.concerns {
            writeln!(output, "- Concern: {concern}").ok();
        }
        writeln!(output).ok();

        for comparison in &self.domain_comparisons {
            writeln!(
                output,
                "### {} {}",
                comparison.domain,
                comparison.domain.name()
            )
            .ok();
            writeln!(output).ok();
            writeln!(output, "{}", Table::new(ranking_rows(&comparison.analysis))).ok();
            writeln!(output).ok();
            let adv = &comparison.analysis.mcd_advantage;
            writeln!(
                output,
                "MCD advantage: {} (success {}, efficiency {})",
                if adv.validated { "validated" } else { "not validated" },
                adv.success_advantage,
                adv.efficiency_advantage
            )
            .ok();
            writeln!(output).ok();
        }

        if let Some(cross) = &self.cross_domain {
            writeln!(output, "## Cross-Domain Analysis").ok();
            writeln!(output).ok();
            let (domains, consistency) = cross_domain_tables(cross);
            writeln!(output, "{domains}").ok();
            writeln!(output).ok();
            writeln!(output, "{consistency}").ok();
            writeln!(output).ok();
            writeln!(
                output,
                "**Significance band:** {} (gap {:.2})",
                cross.significance.band, cross.significance.normalized_gap
            )
            .ok();
            writeln!(output).ok();
            writeln!(output, "\\* {}", cross.significance.method).ok();
            if let Some(test) = &cross.accuracy_test {
                writeln!(output).ok();
                writeln!(
                    output,
                    "**{}:** t = {:.3}, p = {:.4}, d = {:.2} ({})",
                    test.method,
                    test.result.t_statistic,
                    test.result.p_value,
                    test.result.cohens_d,
                    test.result.effect_interpretation
                )
                .ok();
            }
            for note in &cross.notes {
                writeln!(output, "- {note}").ok();
            }
            writeln!(output).ok();
        }

        writeln!(output, "## Configuration").ok();
        writeln!(output).ok();
        writeln!(
            output,
            "- Bootstrap resamples: {}",
            self.metadata.stat_config.bootstrap_n
        )
        .ok();
        writeln!(
            output,
            "- Confidence level: {}%",
            self.metadata.stat_config.confidence * 100.0
        )
        .ok();
        writeln!(
            output,
            "- Significance threshold (α): {}",
            self.metadata.stat_config.alpha
        )
        .ok();

        output
    }

    /// Render report as plain text table
    #[must_use]
    pub fn to_text(&self) -> String {
        let mut output = String::new();

        writeln!(output, "{BANNER}").ok();
        writeln!(output, "  {}", self.metadata.title).ok();
        writeln!(output, "{BANNER}").ok();
        writeln!(output).ok();

        writeln!(output, "SUMMARY").ok();
        writeln!(output, "{RULE}").ok();
        writeln!(output, "  Backend:          {} ({})", self.metadata.backend, self.metadata.tier).ok();
        writeln!(output, "  Variants:         {}", self.summary.variants).ok();
        writeln!(
            output,
            "  Trials Passed:    {} ({})",
            self.summary.trials,
            self.summary.trials.percent_label()
        )
        .ok();
        writeln!(output, "  Errors:           {}", self.summary.execution_errors).ok();
        writeln!(
            output,
            "  MCD Validated:    {}",
            if self.summary.mcd_validated { "YES" } else { "NO" }
        )
        .ok();
        writeln!(output).ok();

        writeln!(output, "VARIANT RESULTS").ok();
        writeln!(output, "{RULE}").ok();
        let rows: Vec<VariantTableRow> = self.variants.iter().map(VariantTableRow::from).collect();
        writeln!(output, "{}", Table::new(rows)).ok();
        writeln!(output).ok();

        writeln!(output, "APPROACH RANKINGS").ok();
        writeln!(output, "{RULE}").ok();
        writeln!(output, "{}", Table::new(ranking_rows(&self.overall))).ok();
        for concern in &self.overall.mcd_advantage.concerns {
            writeln!(output, "  ! {concern}").ok();
        }
        writeln!(output).ok();

        if let Some(cross) = &self.cross_domain {
            writeln!(output, "CROSS-DOMAIN").ok();
            writeln!(output, "{RULE}").ok();
            let (domains, consistency) = cross_domain_tables(cross);
            writeln!(output, "{domains}").ok();
            writeln!(output, "{consistency}").ok();
            writeln!(
                output,
                "  Band: {} ({})",
                cross.significance.band, cross.significance.method
            )
            .ok();
            writeln!(output).ok();
        }

        output
    }
}

/// Render a cross-domain analysis on its own
#[must_use]
pub fn cross_domain_markdown(cross: &CrossDomainAnalysis) -> String {
    let mut output = String::new();
    writeln!(output, "# Cross-Domain Analysis").ok();
    writeln!(output).ok();
    if cross.is_fallback {
        writeln!(output, "_Fallback analysis: insufficient data._").ok();
        writeln!(output).ok();
    }
    let (domains, consistency) = cross_domain_tables(cross);
    writeln!(output, "{domains}").ok();
    writeln!(output).ok();
    writeln!(output, "{consistency}").ok();
    writeln!(output).ok();
    writeln!(
        output,
        "Significance band: {} (gap {:.2}, {} minimal)",
        cross.significance.band,
        cross.significance.normalized_gap,
        if cross.significance.favours_minimal { "favours" } else { "does not favour" }
    )
    .ok();
    writeln!(output, "\\* {}", cross.significance.method).ok();
    for note in &cross.notes {
        writeln!(output, "- {note}").ok();
    }
    output
}

/// Render a single trial verdict as text
#[must_use]
pub fn evaluation_text(trial_id: &str, result: &TrialEvaluationResult) -> String {
    let mut output = String::new();
    let m = &result.metrics;
    writeln!(output, "TRIAL {trial_id} ({})", result.thresholds.domain).ok();
    writeln!(output, "{RULE}").ok();
    writeln!(output, "  Tier:             {}", result.tier).ok();
    writeln!(output, "  Success:          {}", result.success).ok();
    writeln!(output, "  Accuracy:         {:.3}", result.accuracy).ok();
    writeln!(output, "  Structural:       {}", result.mcd_compliant).ok();
    writeln!(output, "  Required ratio:   {:.2}", m.required_ratio).ok();
    writeln!(output, "  Violations:       {}", m.prohibited_violations).ok();
    writeln!(
        output,
        "  Tokens:           {} of {} ({:.2} efficiency)",
        m.token_count, result.thresholds.max_tokens, m.token_efficiency
    )
    .ok();
    writeln!(output, "  Content quality:  {:.2}", m.content_quality).ok();
    writeln!(output, "  Functional score: {:.3}", m.functional_score).ok();
    for reason in &result.failure_reasons {
        writeln!(output, "  - {reason}").ok();
    }
    output
}
