//! Trial scoring.
//!
//! Turns one response into a [`TrialEvaluationResult`]: required-element
//! coverage, literal prohibited-element checks, token efficiency and a
//! content-quality signal are combined into a functional score, which is then
//! classified into a performance tier using the domain's bands.
//!
//! ```text
//! functional = 0.5·required + 0.2·efficiency + 0.2·quality
//!            + 0.1·[no violations] − 0.15·violations
//! ```
//!
//! The scorer is a pure function of `(output, trial)`. It never performs I/O
//! and never consults a judge model.

use crate::domain::{self, AdjustedCriteria, Domain, DomainProfile, TierBands};
use crate::matcher::{compile, RequirementMatcher, ScoringError};
use crate::tokens::{HeuristicTokenCounter, TokenCounter};
use crate::walkthrough::TrialSpecification;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix marking an output that records an execution failure
pub const ERROR_SENTINEL: &str = "ERROR:";

/// Minimum trimmed output length for excellent/good/acceptable
const MIN_LENGTH_EXCELLENT: usize = 15;
const MIN_LENGTH_GOOD: usize = 12;
const MIN_LENGTH_ACCEPTABLE: usize = 8;

/// Fraction of structural checks that must pass
const STRUCTURAL_PASS_FRACTION: f64 = 0.6;
/// Token headroom allowed by the structural check
const STRUCTURAL_TOKEN_HEADROOM: f64 = 1.1;

const VIOLATION_PENALTY: f64 = 0.15;

const ACTION_VERBS: &str = r"(?i)\b(check\w*|verif\w*|confirm\w*|book\w*|schedul\w*|reserv\w*|navigat\w*|move|turn\w*|go|head|proceed|fix\w*|restart\w*|reboot\w*|replac\w*|inspect\w*|reset|diagnos\w*|call|contact)\b";

/// Performance tier of a single response
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PerformanceTier {
    Poor,
    Acceptable,
    Good,
    Excellent,
}

impl PerformanceTier {
    /// All tiers from best to worst
    pub const ALL: [Self; 4] = [Self::Excellent, Self::Good, Self::Acceptable, Self::Poor];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Excellent => "excellent",
            Self::Good => "good",
            Self::Acceptable => "acceptable",
            Self::Poor => "poor",
        }
    }

    /// Every tier except poor counts as a pass
    #[must_use]
    pub const fn is_pass(self) -> bool {
        !matches!(self, Self::Poor)
    }
}

impl fmt::Display for PerformanceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signals the functional score was built from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct EvaluationMetrics {
    pub required_ratio: f64,
    pub prohibited_ratio: f64,
    pub prohibited_violations: usize,
    pub token_count: usize,
    pub token_efficiency: f64,
    pub content_quality: f64,
    /// Unclamped functional score
    pub functional_score: f64,
}

/// Verdict for one response to one trial
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrialEvaluationResult {
    pub success: bool,
    pub tier: PerformanceTier,
    /// Functional score clamped to [0, 1]
    pub accuracy: f64,
    /// Whether the response has the domain's structural shape
    pub mcd_compliant: bool,
    pub failure_reasons: Vec<String>,
    pub metrics: EvaluationMetrics,
    pub thresholds: AdjustedCriteria,
}

/// Whether an output is empty or records an execution failure
#[must_use]
pub fn is_unusable_output(output: &str) -> bool {
    let trimmed = output.trim();
    trimmed.is_empty()
        || trimmed
            .get(..ERROR_SENTINEL.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(ERROR_SENTINEL))
}

struct DomainRules {
    lexical: Vec<Regex>,
    slots: Vec<Regex>,
}

impl DomainRules {
    fn compile(profile: &DomainProfile) -> Result<Self, ScoringError> {
        Ok(Self {
            lexical: profile
                .lexical_patterns
                .iter()
                .map(|p| compile(p))
                .collect::<Result<_, _>>()?,
            slots: profile
                .slot_patterns
                .iter()
                .map(|p| compile(p))
                .collect::<Result<_, _>>()?,
        })
    }
}

/// Objective, rule-based trial scorer
pub struct TrialScorer {
    matcher: RequirementMatcher,
    counter: Box<dyn TokenCounter + Send + Sync>,
    action_verbs: Regex,
    booking: DomainRules,
    navigation: DomainRules,
    diagnostics: DomainRules,
    generic: DomainRules,
}

impl TrialScorer {
    /// Build a scorer with the heuristic token counter
    ///
    /// # Errors
    ///
    /// Returns an error if a built-in pattern fails to compile.
    pub fn new() -> Result<Self, ScoringError> {
        Self::with_token_counter(HeuristicTokenCounter::new())
    }

    /// Build a scorer with a custom token counter
    ///
    /// # Errors
    ///
    /// Returns an error if a built-in pattern fails to compile.
    pub fn with_token_counter(
        counter: impl TokenCounter + Send + Sync + 'static,
    ) -> Result<Self, ScoringError> {
        Ok(Self {
            matcher: RequirementMatcher::new()?,
            counter: Box::new(counter),
            action_verbs: compile(ACTION_VERBS)?,
            booking: DomainRules::compile(Domain::AppointmentBooking.profile())?,
            navigation: DomainRules::compile(Domain::SpatialNavigation.profile())?,
            diagnostics: DomainRules::compile(Domain::FailureDiagnostics.profile())?,
            generic: DomainRules::compile(Domain::Unlisted(0).profile())?,
        })
    }

    /// Token counter used for efficiency
    #[must_use]
    pub fn token_counter(&self) -> &dyn TokenCounter {
        self.counter.as_ref()
    }

    /// Requirement matcher used for coverage
    #[must_use]
    pub const fn matcher(&self) -> &RequirementMatcher {
        &self.matcher
    }

    const fn rules_for(&self, domain: Domain) -> &DomainRules {
        match domain {
            Domain::AppointmentBooking => &self.booking,
            Domain::SpatialNavigation => &self.navigation,
            Domain::FailureDiagnostics => &self.diagnostics,
            Domain::Unlisted(_) => &self.generic,
        }
    }

    /// Score `output` against `trial`
    #[must_use]
    pub fn evaluate(&self, output: &str, trial: &TrialSpecification) -> TrialEvaluationResult {
        let thresholds = domain::adjust(trial);
        if is_unusable_output(output) {
            return unusable_result(output, trial, thresholds);
        }

        let domain = thresholds.domain;
        let profile = domain.profile();
        let rules = self.rules_for(domain);
        let criteria = &trial.success_criteria;
        let lowered = output.to_lowercase();
        let mut failure_reasons = Vec::new();

        let mut matched = 0usize;
        for element in &criteria.required_elements {
            if self.matcher.matches(output, element, domain) {
                matched += 1;
            } else {
                failure_reasons.push(format!("Missing required element: {element}"));
            }
        }
        let required_ratio = ratio_or(matched, criteria.required_elements.len(), 1.0);

        let mut violations = 0usize;
        for element in &criteria.prohibited_elements {
            let needle = element.trim().to_lowercase();
            if !needle.is_empty() && lowered.contains(&needle) {
                violations += 1;
                failure_reasons.push(format!("Contains prohibited element: {element}"));
            }
        }
        let prohibited_ratio = ratio_or(violations, criteria.prohibited_elements.len(), 0.0);

        let token_count = self.counter.count(output);
        let token_efficiency = token_efficiency(thresholds.max_tokens, token_count);
        let has_action = self.action_verbs.is_match(output);
        let content_quality = content_quality(rules, output, has_action);

        let functional_score = 0.2f64.mul_add(
            content_quality,
            0.5f64.mul_add(required_ratio, 0.2 * token_efficiency),
        ) + if violations == 0 { 0.1 } else { 0.0 }
            - VIOLATION_PENALTY * count_f64(violations);
        let accuracy = functional_score.clamp(0.0, 1.0);

        let length = output.trim().chars().count();
        let tier = classify(&profile.tiers, functional_score, required_ratio, length, violations);
        if tier == PerformanceTier::Poor {
            failure_reasons.push(format!(
                "Functional score {functional_score:.2} below acceptable threshold {:.2}",
                profile.tiers.acceptable.min_score
            ));
        }

        let mcd_compliant =
            structural_compliance(rules, output, has_action, token_count, thresholds.max_tokens);

        TrialEvaluationResult {
            success: tier.is_pass(),
            tier,
            accuracy,
            mcd_compliant,
            failure_reasons,
            metrics: EvaluationMetrics {
                required_ratio,
                prohibited_ratio,
                prohibited_violations: violations,
                token_count,
                token_efficiency,
                content_quality,
                functional_score,
            },
            thresholds,
        }
    }
}

fn unusable_result(
    output: &str,
    trial: &TrialSpecification,
    thresholds: AdjustedCriteria,
) -> TrialEvaluationResult {
    let trimmed = output.trim();
    let mut failure_reasons = vec![if trimmed.is_empty() {
        "Empty output".to_string()
    } else {
        format!("Execution error output: {trimmed}")
    }];
    failure_reasons.extend(
        trial
            .success_criteria
            .required_elements
            .iter()
            .map(|e| format!("Missing required element: {e}")),
    );

    TrialEvaluationResult {
        success: false,
        tier: PerformanceTier::Poor,
        accuracy: 0.0,
        mcd_compliant: false,
        failure_reasons,
        metrics: EvaluationMetrics {
            required_ratio: 0.0,
            prohibited_ratio: 0.0,
            prohibited_violations: 0,
            token_count: 0,
            token_efficiency: 0.0,
            content_quality: 0.0,
            functional_score: 0.0,
        },
        thresholds,
    }
}

#[allow(clippy::cast_precision_loss)]
fn count_f64(n: usize) -> f64 {
    n as f64
}

/// `num / den`, or `fallback` when there is nothing to divide by
fn ratio_or(num: usize, den: usize, fallback: f64) -> f64 {
    if den == 0 {
        fallback
    } else {
        (count_f64(num) / count_f64(den)).clamp(0.0, 1.0)
    }
}

fn token_efficiency(budget: usize, actual: usize) -> f64 {
    if actual == 0 || budget == 0 {
        return 0.0;
    }
    (count_f64(budget) / count_f64(actual)).min(1.0)
}

fn content_quality(rules: &DomainRules, output: &str, has_action: bool) -> f64 {
    let hits = rules.lexical.iter().filter(|re| re.is_match(output)).count();
    let lexical = ratio_or(hits, rules.lexical.len(), 0.0);
    let action = if has_action { 0.2 } else { 0.0 };
    0.3f64.mul_add(lexical, 0.5 + action).clamp(0.0, 1.0)
}

fn classify(
    tiers: &TierBands,
    score: f64,
    required_ratio: f64,
    length: usize,
    violations: usize,
) -> PerformanceTier {
    let meets = |band: crate::domain::TierBand, min_length: usize| {
        score >= band.min_score && required_ratio >= band.min_required_ratio && length >= min_length
    };

    if violations == 0 && meets(tiers.excellent, MIN_LENGTH_EXCELLENT) {
        PerformanceTier::Excellent
    } else if violations == 0 && meets(tiers.good, MIN_LENGTH_GOOD) {
        PerformanceTier::Good
    } else if meets(tiers.acceptable, MIN_LENGTH_ACCEPTABLE) {
        PerformanceTier::Acceptable
    } else {
        PerformanceTier::Poor
    }
}

fn structural_compliance(
    rules: &DomainRules,
    output: &str,
    has_action: bool,
    token_count: usize,
    budget: usize,
) -> bool {
    let mut checks: Vec<bool> = rules.slots.iter().map(|re| re.is_match(output)).collect();
    checks.push(has_action);
    checks.push(count_f64(token_count) <= count_f64(budget) * STRUCTURAL_TOKEN_HEADROOM);

    let passed = checks.iter().filter(|c| **c).count();
    ratio_or(passed, checks.len(), 0.0) >= STRUCTURAL_PASS_FRACTION
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::walkthrough::SuccessCriteria;

    fn scorer() -> TrialScorer {
        TrialScorer::new().unwrap()
    }

    fn booking_trial() -> TrialSpecification {
        TrialSpecification::new(
            "D1-T1",
            "Book cardiology for Tuesday 3pm",
            SuccessCriteria {
                required_elements: vec![
                    "cardiology".to_string(),
                    "tuesday".to_string(),
                    "3pm".to_string(),
                    "confirmed".to_string(),
                ],
                prohibited_elements: vec!["i think".to_string(), "maybe".to_string()],
                expected_completion: true,
                max_tokens: 45,
                max_latency_ms: 500,
                min_accuracy: None,
            },
        )
    }

    fn navigation_trial() -> TrialSpecification {
        TrialSpecification::new(
            "D2-T1",
            "Navigate to the charging dock",
            SuccessCriteria {
                required_elements: vec!["north".to_string(), "meters".to_string()],
                prohibited_elements: vec!["not sure".to_string()],
                expected_completion: true,
                max_tokens: 30,
                max_latency_ms: 600,
                min_accuracy: None,
            },
        )
    }

    #[test]
    fn test_structured_confirmation_is_excellent() {
        let result = scorer().evaluate(
            "Confirmed: Cardiology, Tue 3pm. Booking ID: #C001",
            &booking_trial(),
        );
        assert_eq!(result.metrics.required_ratio, 1.0);
        assert_eq!(result.metrics.prohibited_violations, 0);
        assert_eq!(result.tier, PerformanceTier::Excellent);
        assert!(result.success);
        assert!(result.mcd_compliant);
        assert!(result.failure_reasons.is_empty());
    }

    #[test]
    fn test_hedged_answer_is_degraded() {
        let result = scorer().evaluate(
            "Let me check, I think cardiology Tuesday 3pm might work",
            &booking_trial(),
        );
        assert_eq!(result.metrics.prohibited_violations, 1);
        assert!(result
            .failure_reasons
            .iter()
            .any(|r| r == "Contains prohibited element: i think"));
        assert!(result.tier < PerformanceTier::Good);
        assert!(result
            .failure_reasons
            .iter()
            .any(|r| r == "Missing required element: confirmed"));
    }

    #[test]
    fn test_empty_output_is_poor() {
        let trial = booking_trial();
        for output in ["", "   ", "\n"] {
            let result = scorer().evaluate(output, &trial);
            assert_eq!(result.tier, PerformanceTier::Poor);
            assert!(!result.success);
            assert_eq!(result.metrics.required_ratio, 0.0);
            assert_eq!(result.accuracy, 0.0);
        }
    }

    #[test]
    fn test_error_sentinel_is_poor() {
        let result = scorer().evaluate("ERROR: model timed out", &booking_trial());
        assert_eq!(result.tier, PerformanceTier::Poor);
        assert!(!result.success);
        assert!(result.failure_reasons[0].starts_with("Execution error output"));
        assert!(is_unusable_output("error: lowercase too"));
        assert!(!is_unusable_output("Errors were fixed"));
    }

    #[test]
    fn test_no_required_elements_gives_full_coverage() {
        let mut trial = navigation_trial();
        trial.success_criteria.required_elements.clear();
        let result = scorer().evaluate("Turn left, go 5 meters", &trial);
        assert_eq!(result.metrics.required_ratio, 1.0);
    }

    #[test]
    fn test_prohibited_check_is_literal() {
        let mut trial = booking_trial();
        trial.success_criteria.prohibited_elements = vec!["perhaps".to_string()];
        // "maybe" is not a synonym of "perhaps" for prohibited purposes
        let result = scorer().evaluate("Confirmed cardiology Tuesday 3pm, maybe", &trial);
        assert_eq!(result.metrics.prohibited_violations, 0);
        assert_eq!(result.metrics.prohibited_ratio, 0.0);
    }

    #[test]
    fn test_invariants_hold_for_varied_outputs() {
        let s = scorer();
        let trial = booking_trial();
        let outputs = [
            "x",
            "maybe maybe maybe I think",
            "Confirmed: Cardiology, Tue 3pm.",
            "I'd be happy to help you with your appointment! Let me look at the calendar for cardiology. \
             It seems Tuesday could work, maybe around 3pm, but I think we should double check with the clinic.",
            "Booked.",
        ];
        for output in outputs {
            let result = s.evaluate(output, &trial);
            assert!((0.0..=1.0).contains(&result.accuracy), "{output}");
            assert!((0.0..=1.0).contains(&result.metrics.required_ratio));
            assert!((0.0..=1.0).contains(&result.metrics.token_efficiency));
            assert!((0.0..=1.0).contains(&result.metrics.content_quality));
            assert_eq!(result.success, result.tier != PerformanceTier::Poor);
        }
    }

    #[test]
    fn test_scoring_is_idempotent() {
        let s = scorer();
        let trial = booking_trial();
        let output = "Booked cardiology Tue 3pm";
        assert_eq!(s.evaluate(output, &trial), s.evaluate(output, &trial));
    }

    #[test]
    fn test_adding_missing_element_never_lowers_score() {
        let s = scorer();
        let trial = booking_trial();
        let before = s.evaluate("Cardiology Tue 3pm", &trial);
        let after = s.evaluate("Cardiology Tue 3pm confirmed", &trial);
        assert!(after.metrics.required_ratio > before.metrics.required_ratio);
        assert!(after.metrics.functional_score >= before.metrics.functional_score);
    }

    #[test]
    fn test_required_ratio_is_monotone_per_element() {
        let s = scorer();
        let mut diagnostics = navigation_trial();
        diagnostics.id = "D3-T1".to_string();
        diagnostics.success_criteria.required_elements =
            vec!["sensor".to_string(), "check".to_string(), "steps".to_string()];
        let mut functional = booking_trial();
        functional.success_criteria.required_elements =
            vec!["time".to_string(), "day".to_string(), "booking id".to_string()];

        let fixtures = [
            (booking_trial(), ["Booked", "Cardiology Tue", "Confirmed 3pm"]),
            (navigation_trial(), ["Go", "north", "5 meters east"]),
            (diagnostics, ["Restart it", "Sensor fault", "1. check cable"]),
            (functional, ["Booked", "Tuesday", "at 3pm #C001"]),
        ];

        for (trial, bases) in &fixtures {
            let domain = trial.resolved_domain();
            for base in bases {
                let before = s.evaluate(base, trial).metrics.required_ratio;
                for element in &trial.success_criteria.required_elements {
                    let extended = format!("{base} {element}");
                    let after = s.evaluate(&extended, trial).metrics.required_ratio;
                    assert!(after >= before, "{} + {element}: {after} < {before}", trial.id);
                    if !s.matcher().matches(base, element, domain) {
                        assert!(after > before, "{} + {element} did not raise coverage", trial.id);
                    }
                }
            }
        }
    }

    #[test]
    fn test_short_output_cannot_reach_excellent() {
        let mut trial = booking_trial();
        trial.success_criteria.required_elements = vec!["booked".to_string()];
        let result = scorer().evaluate("Booked 3pm", &trial);
        // 10 characters: below the excellent and good length gates
        assert_eq!(result.tier, PerformanceTier::Acceptable);
    }

    #[test]
    fn test_verbose_output_loses_token_efficiency() {
        let s = scorer();
        let trial = navigation_trial();
        let verbose = "Well, to get to the charging dock you will want to head north for roughly \
                       five meters, then continue carefully past the shelving units while keeping \
                       an eye out for anything on the floor that could get in the way of the robot.";
        let result = s.evaluate(verbose, &trial);
        assert!(result.metrics.token_efficiency < 1.0);
        assert!(result.metrics.token_count > result.thresholds.max_tokens);
    }

    #[test]
    fn test_navigation_structural_compliance() {
        let s = scorer();
        let trial = navigation_trial();
        let result = s.evaluate("Move north 5 meters, then turn left.", &trial);
        assert!(result.mcd_compliant);
        assert!(result.success);

        let result = s.evaluate("The dock is somewhere over there.", &trial);
        assert!(!result.mcd_compliant);
    }

    #[test]
    fn test_diagnostics_budget_is_domain_scaled() {
        let mut trial = navigation_trial();
        trial.id = "D3-T4".to_string();
        trial.success_criteria.max_tokens = 50;
        let result = scorer().evaluate("Error E42: replace the fan sensor cable.", &trial);
        assert_eq!(result.thresholds.domain, Domain::FailureDiagnostics);
        assert_eq!(result.thresholds.max_tokens, 65);
    }

    #[test]
    fn test_tier_ordering_and_display() {
        assert!(PerformanceTier::Excellent > PerformanceTier::Good);
        assert!(PerformanceTier::Acceptable > PerformanceTier::Poor);
        assert_eq!(PerformanceTier::Good.to_string(), "good");
        assert!(!PerformanceTier::Poor.is_pass());
        let json = serde_json::to_string(&PerformanceTier::Excellent).unwrap();
        assert_eq!(json, "\"excellent\"");
    }
}
