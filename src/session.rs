//! Caller-owned analysis session.
//!
//! Holds everything that accumulates over a run: which domains passed catalog
//! validation, execution counters and the per-variant statistics. Nothing is
//! process-global; drop or [`AnalysisSession::reset`] the session to start
//! over.

use crate::backend::InferenceBackend;
use crate::compare::{self, ComparativeAnalysis};
use crate::cross_domain::{self, CrossDomainAnalysis};
use crate::domain::Domain;
use crate::matcher::ScoringError;
use crate::runner::{RunnerConfig, VariantRunner, VariantStats};
use crate::scorer::TrialScorer;
use crate::walkthrough::{DomainWalkthrough, VariantType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

/// Counters over everything the session executed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionStats {
    pub walkthroughs: usize,
    pub variants: usize,
    pub trials: usize,
    pub trials_passed: usize,
    pub execution_errors: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ExecutionStats {
    fn record(&mut self, stats: &VariantStats) {
        self.variants += 1;
        self.trials += stats.success_rate.total;
        self.trials_passed += stats.success_rate.passed;
        self.execution_errors += stats.execution_errors;
    }
}

/// Catalog problems found while validating a walkthrough
#[must_use]
pub fn catalog_issues(walkthrough: &DomainWalkthrough) -> Vec<String> {
    let mut issues = Vec::new();

    if walkthrough.variants().next().is_none() {
        issues.push(format!("{}: no variants", walkthrough.id));
    }
    if !walkthrough
        .variants()
        .any(|v| v.variant_type == VariantType::Mcd)
    {
        issues.push(format!("{}: no MCD variant to compare against", walkthrough.id));
    }

    let mut seen = HashSet::new();
    for variant in walkthrough.variants() {
        if variant.trials.is_empty() {
            issues.push(format!("{}: variant has no trials", variant.id));
        }
        for trial in &variant.trials {
            let key = (variant.id.as_str(), trial.id.as_str());
            if !seen.insert(key) {
                issues.push(format!("{}: duplicate trial id {}", variant.id, trial.id));
            }
            if trial.success_criteria.max_tokens == 0 {
                issues.push(format!("{}: token budget is zero", trial.id));
            }
            if let Some(min) = trial.success_criteria.min_accuracy {
                if !(0.0..=1.0).contains(&min) {
                    issues.push(format!("{}: min_accuracy {min} outside [0, 1]", trial.id));
                }
            }
            if trial.resolved_domain() != walkthrough.domain {
                issues.push(format!(
                    "{}: trial resolves to {} inside a {} walkthrough",
                    trial.id,
                    trial.resolved_domain(),
                    walkthrough.domain
                ));
            }
        }
    }

    issues
}

/// Outcome of one [`AnalysisSession::run_walkthrough`] call
#[derive(Debug)]
pub struct WalkthroughRun<'a> {
    /// Catalog problems found before execution; empty for a clean catalog
    pub issues: Vec<String>,
    /// Statistics of the variants executed by this call
    pub results: &'a [VariantStats],
}

/// Runs walkthroughs and keeps their results
pub struct AnalysisSession {
    runner: VariantRunner,
    validated_domains: BTreeSet<Domain>,
    execution: ExecutionStats,
    results: Vec<VariantStats>,
}

impl AnalysisSession {
    /// Create a session around a configured runner
    #[must_use]
    pub fn new(runner: VariantRunner) -> Self {
        Self {
            runner,
            validated_domains: BTreeSet::new(),
            execution: ExecutionStats::default(),
            results: Vec::new(),
        }
    }

    /// Session with a default scorer and the given runner configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the scorer's built-in patterns fail to compile.
    pub fn with_config(config: RunnerConfig) -> Result<Self, ScoringError> {
        Ok(Self::new(VariantRunner::new(config, TrialScorer::new()?)))
    }

    /// Forget all results, counters and validated domains
    pub fn reset(&mut self) {
        self.validated_domains.clear();
        self.execution = ExecutionStats::default();
        self.results.clear();
    }

    #[must_use]
    pub const fn runner(&self) -> &VariantRunner {
        &self.runner
    }

    /// Validate a walkthrough's catalog entry; the domain is remembered as
    /// validated when no issues were found
    pub fn validate(&mut self, walkthrough: &DomainWalkthrough) -> Vec<String> {
        if self.validated_domains.contains(&walkthrough.domain) {
            return Vec::new();
        }

        let issues = catalog_issues(walkthrough);
        if issues.is_empty() {
            self.validated_domains.insert(walkthrough.domain);
        } else {
            for issue in &issues {
                tracing::warn!(domain = %walkthrough.domain, issue = %issue, "Catalog issue");
            }
        }
        issues
    }

    #[must_use]
    pub fn is_validated(&self, domain: Domain) -> bool {
        self.validated_domains.contains(&domain)
    }

    /// Domains that passed validation
    #[must_use]
    pub const fn validated_domains(&self) -> &BTreeSet<Domain> {
        &self.validated_domains
    }

    /// Validate and execute a walkthrough. Catalog issues do not stop the
    /// run; they come back alongside the new statistics.
    pub fn run_walkthrough(
        &mut self,
        walkthrough: &mut DomainWalkthrough,
        backend: &mut dyn InferenceBackend,
    ) -> WalkthroughRun<'_> {
        let issues = self.validate(walkthrough);

        if self.execution.started_at.is_none() {
            self.execution.started_at = Some(Utc::now());
        }

        let start = self.results.len();
        for stats in self.runner.run_walkthrough(walkthrough, backend) {
            self.record(stats);
        }
        self.execution.walkthroughs += 1;
        self.execution.finished_at = Some(Utc::now());

        WalkthroughRun {
            issues,
            results: &self.results[start..],
        }
    }

    /// Add statistics produced elsewhere
    pub fn record(&mut self, stats: VariantStats) {
        self.execution.record(&stats);
        self.results.push(stats);
    }

    #[must_use]
    pub const fn execution_stats(&self) -> &ExecutionStats {
        &self.execution
    }

    #[must_use]
    pub fn results(&self) -> &[VariantStats] {
        &self.results
    }

    /// Results of one domain
    pub fn results_for(&self, domain: Domain) -> impl Iterator<Item = &VariantStats> {
        self.results.iter().filter(move |s| s.domain == domain)
    }

    /// Domains with at least one result, in order
    #[must_use]
    pub fn domains(&self) -> BTreeSet<Domain> {
        self.results.iter().map(|s| s.domain).collect()
    }

    /// Comparative analysis over every recorded variant
    #[must_use]
    pub fn compare(&self) -> ComparativeAnalysis {
        compare::analyze(&self.results)
    }

    /// Comparative analysis restricted to one domain
    #[must_use]
    pub fn compare_domain(&self, domain: Domain) -> ComparativeAnalysis {
        let stats: Vec<VariantStats> = self.results_for(domain).cloned().collect();
        compare::analyze(&stats)
    }

    /// Cross-domain report over `walkthroughs`, with this session's trial
    /// samples feeding the accuracy test
    #[must_use]
    pub fn cross_domain(&self, walkthroughs: &[DomainWalkthrough]) -> CrossDomainAnalysis {
        cross_domain::analyze(walkthroughs, &self.results, self.runner.config().stats.alpha)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, Completion, GenerationRequest};
    use crate::metrics::SuccessRate;
    use crate::walkthrough::{
        PerformanceProfile, SuccessCriteria, TrialSpecification, WalkthroughScenario,
        WalkthroughVariant,
    };

    /// Answers every prompt with the same text
    struct FixedBackend(&'static str);

    impl InferenceBackend for FixedBackend {
        fn name(&self) -> &str {
            "fixed"
        }

        fn generate(&mut self, _request: &GenerationRequest) -> Result<Completion, BackendError> {
            Ok(Completion::text(self.0))
        }
    }

    fn trial(id: &str) -> TrialSpecification {
        let mut trial = TrialSpecification::new(
            id,
            "Book cardiology Tuesday 3pm",
            SuccessCriteria {
                required_elements: vec!["cardiology".to_string(), "3pm".to_string()],
                prohibited_elements: Vec::new(),
                expected_completion: true,
                max_tokens: 45,
                max_latency_ms: 500,
                min_accuracy: None,
            },
        );
        trial.apply_defaults();
        trial
    }

    fn variant(id: &str, variant_type: VariantType, trials: Vec<TrialSpecification>) -> WalkthroughVariant {
        WalkthroughVariant {
            id: id.to_string(),
            variant_type,
            name: id.to_string(),
            prompt_template: "{input}".to_string(),
            architecture: String::new(),
            trials,
            expected_performance: PerformanceProfile {
                avg_latency_ms: 200.0,
                avg_tokens: 20.0,
                cpu_percent: 10.0,
                memory_kb: 512.0,
                success_rate: SuccessRate::new(1, 1),
            },
            measured_performance: None,
        }
    }

    fn walkthrough() -> DomainWalkthrough {
        DomainWalkthrough {
            id: "d1".to_string(),
            domain: Domain::AppointmentBooking,
            title: "Appointment Booking".to_string(),
            principles: Vec::new(),
            fallback_triggers: Vec::new(),
            tier_expectations: Vec::new(),
            scenarios: vec![WalkthroughScenario {
                id: "s1".to_string(),
                description: String::new(),
                variants: vec![
                    variant("D1-MCD", VariantType::Mcd, vec![trial("D1-T1"), trial("D1-T2")]),
                    variant("D1-CHAT", VariantType::NonMcd, vec![trial("D1-T3")]),
                ],
            }],
        }
    }

    fn session() -> AnalysisSession {
        AnalysisSession::with_config(RunnerConfig::default()).unwrap()
    }

    #[test]
    fn test_validate_remembers_clean_domains() {
        let mut session = session();
        assert!(session.validate(&walkthrough()).is_empty());
        assert!(session.is_validated(Domain::AppointmentBooking));
        assert!(!session.is_validated(Domain::SpatialNavigation));
    }

    #[test]
    fn test_catalog_issues_reports_problems() {
        let mut w = walkthrough();
        w.scenarios[0].variants.retain(|v| v.variant_type != VariantType::Mcd);
        w.scenarios[0].variants[0].trials.push(trial("D1-T3"));
        w.scenarios[0].variants[0].trials.push(trial("D2-T9"));

        let issues = catalog_issues(&w);
        assert!(issues.iter().any(|i| i.contains("no MCD variant")));
        assert!(issues.iter().any(|i| i.contains("duplicate trial id D1-T3")));
        assert!(issues.iter().any(|i| i.contains("resolves to D2")));

        let mut session = session();
        assert!(!session.validate(&w).is_empty());
        assert!(session.validated_domains().is_empty());
    }

    #[test]
    fn test_run_walkthrough_accumulates_results() {
        let mut session = session();
        let mut w = walkthrough();
        let mut backend = FixedBackend("Confirmed: Cardiology, Tue 3pm. Booking ID: #C001");

        let run = session.run_walkthrough(&mut w, &mut backend);
        assert!(run.issues.is_empty());
        assert_eq!(run.results.len(), 2);

        let stats = session.execution_stats();
        assert_eq!(stats.walkthroughs, 1);
        assert_eq!(stats.variants, 2);
        assert_eq!(stats.trials, 3);
        assert_eq!(stats.trials_passed, 3);
        assert!(stats.started_at.is_some());
        assert!(w.variants().all(|v| v.measured_performance.is_some()));

        assert_eq!(session.results_for(Domain::AppointmentBooking).count(), 2);
        assert_eq!(session.domains().len(), 1);
    }

    #[test]
    fn test_run_walkthrough_returns_catalog_issues() {
        let mut session = session();
        let mut w = walkthrough();
        w.scenarios[0].variants[1].trials.push(trial("D2-T9"));

        let run = session.run_walkthrough(&mut w, &mut FixedBackend("Booked cardiology 3pm"));
        assert_eq!(run.results.len(), 2);
        assert_eq!(run.issues.len(), 1);
        assert!(run.issues[0].contains("resolves to D2"));
        assert!(!session.is_validated(Domain::AppointmentBooking));
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut session = session();
        let mut w = walkthrough();
        session.run_walkthrough(&mut w, &mut FixedBackend("Booked cardiology 3pm"));

        session.reset();
        assert!(session.results().is_empty());
        assert_eq!(session.execution_stats(), &ExecutionStats::default());
        assert!(session.validated_domains().is_empty());
    }

    #[test]
    fn test_identical_outputs_raise_advantage_concern() {
        let mut session = session();
        let mut w = walkthrough();
        session.run_walkthrough(
            &mut w,
            &mut FixedBackend("Confirmed: Cardiology, Tue 3pm. Booking ID: #C001"),
        );

        let analysis = session.compare_domain(Domain::AppointmentBooking);
        assert!(!analysis.mcd_advantage.validated);
        assert!(!analysis.mcd_advantage.concerns.is_empty());

        let cross = session.cross_domain(std::slice::from_ref(&w));
        assert_eq!(cross.domains.len(), 1);
        assert!(!cross.is_fallback);
    }
}
