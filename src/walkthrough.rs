//! Walkthrough data model: domains, scenarios, variants and trials.
//!
//! Everything here is deserialized from the static catalog. The core only
//! mutates two things: the defaulted `min_accuracy` of a trial and the
//! `actual_results` / `measured_performance` slots filled after execution.

use crate::domain::Domain;
use crate::metrics::SuccessRate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Difficulty class of a trial
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Simple,
    #[default]
    Moderate,
    Complex,
}

impl Difficulty {
    /// Minimum accuracy used when a trial leaves it unset
    #[must_use]
    pub const fn default_min_accuracy(self) -> f64 {
        match self {
            Self::Simple => 0.8,
            Self::Moderate => 0.7,
            Self::Complex => 0.6,
        }
    }
}

/// Declared category of a prompting variant
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum VariantType {
    /// Minimal-context design (structured, constrained prompting)
    #[serde(rename = "MCD")]
    Mcd,
    #[serde(rename = "Non-MCD")]
    NonMcd,
    #[serde(rename = "Hybrid")]
    Hybrid,
}

impl VariantType {
    /// Catalog tag for this category
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mcd => "MCD",
            Self::NonMcd => "Non-MCD",
            Self::Hybrid => "Hybrid",
        }
    }
}

/// Objective success criteria for a trial
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SuccessCriteria {
    /// Elements that must appear in the response
    #[serde(default)]
    pub required_elements: Vec<String>,
    /// Elements that must not appear in the response
    #[serde(default)]
    pub prohibited_elements: Vec<String>,
    /// Whether the task is expected to complete in one response
    #[serde(default = "default_expected_completion")]
    pub expected_completion: bool,
    /// Token budget before domain adjustment
    pub max_tokens: usize,
    /// Latency budget in milliseconds
    #[serde(default = "default_max_latency_ms")]
    pub max_latency_ms: u64,
    /// Minimum accuracy in [0, 1]; filled from the difficulty table when absent
    #[serde(default)]
    pub min_accuracy: Option<f64>,
}

const fn default_expected_completion() -> bool {
    true
}

const fn default_max_latency_ms() -> u64 {
    500
}

/// Token accounting for an executed trial
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TokenBreakdown {
    pub prompt: usize,
    pub completion: usize,
    pub total: usize,
}

/// Outcome of executing a trial, stored on the trial itself
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActualResults {
    /// Raw model output (or an `ERROR:` record when execution failed)
    pub output: String,
    pub tokens: TokenBreakdown,
    pub latency_ms: u64,
    pub success: bool,
    /// Accuracy in [0, 1]
    pub accuracy: f64,
    #[serde(default)]
    pub failure_reasons: Vec<String>,
    pub timestamp: DateTime<Utc>,
    /// Whether the response matched the domain's structural pattern
    pub mcd_aligned: bool,
}

/// A single test case
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrialSpecification {
    /// Unique id; `D<n>` prefix identifies the domain when `domain` is unset
    pub id: String,
    pub user_input: String,
    pub success_criteria: SuccessCriteria,
    #[serde(default = "default_evaluation_method")]
    pub evaluation_method: String,
    /// Reference benchmark, reporting only
    #[serde(default)]
    pub benchmark_comparison: Option<String>,
    #[serde(default)]
    pub difficulty: Difficulty,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub notes: String,
    /// Explicit domain; overrides the id prefix convention
    #[serde(default)]
    pub domain: Option<Domain>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_results: Option<ActualResults>,
}

fn default_evaluation_method() -> String {
    "functional_match".to_string()
}

impl TrialSpecification {
    /// Create a trial with default metadata
    #[must_use]
    pub fn new(id: &str, user_input: &str, success_criteria: SuccessCriteria) -> Self {
        Self {
            id: id.to_string(),
            user_input: user_input.to_string(),
            success_criteria,
            evaluation_method: default_evaluation_method(),
            benchmark_comparison: None,
            difficulty: Difficulty::default(),
            category: String::new(),
            notes: String::new(),
            domain: None,
            actual_results: None,
        }
    }

    /// Fill the minimum accuracy from the difficulty table if it is unset
    pub fn apply_defaults(&mut self) {
        if self.success_criteria.min_accuracy.is_none() {
            self.success_criteria.min_accuracy = Some(self.difficulty.default_min_accuracy());
        }
    }

    /// Domain of this trial, explicit field first, then the id prefix
    #[must_use]
    pub fn resolved_domain(&self) -> Domain {
        self.domain.unwrap_or_else(|| Domain::from_trial_id(&self.id))
    }

    /// Whether this trial has been executed
    #[must_use]
    pub const fn is_executed(&self) -> bool {
        self.actual_results.is_some()
    }
}

/// Advisory or measured resource profile of a variant
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PerformanceProfile {
    pub avg_latency_ms: f64,
    pub avg_tokens: f64,
    #[serde(default)]
    pub cpu_percent: f64,
    #[serde(default)]
    pub memory_kb: f64,
    pub success_rate: SuccessRate,
}

/// One prompting strategy with its trials
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WalkthroughVariant {
    pub id: String,
    pub variant_type: VariantType,
    pub name: String,
    /// Prompt template; `{input}` is replaced with the trial input
    pub prompt_template: String,
    #[serde(default)]
    pub architecture: String,
    #[serde(default)]
    pub trials: Vec<TrialSpecification>,
    pub expected_performance: PerformanceProfile,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measured_performance: Option<PerformanceProfile>,
}

impl WalkthroughVariant {
    /// Render the prompt for one trial input
    #[must_use]
    #[allow(clippy::literal_string_with_formatting_args)]
    pub fn render_prompt(&self, input: &str) -> String {
        if self.prompt_template.contains("{input}") {
            self.prompt_template.replace("{input}", input)
        } else {
            format!("{}\n\n{input}", self.prompt_template)
        }
    }

    /// Measured profile if available, otherwise the expected one
    #[must_use]
    pub fn effective_profile(&self) -> &PerformanceProfile {
        self.measured_performance
            .as_ref()
            .unwrap_or(&self.expected_performance)
    }

    /// Fill defaults on every trial
    pub fn apply_defaults(&mut self) {
        for trial in &mut self.trials {
            trial.apply_defaults();
        }
    }
}

/// A group of variants solving the same task
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WalkthroughScenario {
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub variants: Vec<WalkthroughVariant>,
}

/// Expected outcome for one resource tier
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TierExpectation {
    pub tier: crate::runner::ResourceTier,
    pub expected: String,
}

/// All scenarios of one domain
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DomainWalkthrough {
    pub id: String,
    pub domain: Domain,
    pub title: String,
    #[serde(default)]
    pub principles: Vec<String>,
    #[serde(default)]
    pub fallback_triggers: Vec<String>,
    #[serde(default)]
    pub tier_expectations: Vec<TierExpectation>,
    #[serde(default)]
    pub scenarios: Vec<WalkthroughScenario>,
}

impl DomainWalkthrough {
    /// Iterate over every variant of every scenario
    pub fn variants(&self) -> impl Iterator<Item = &WalkthroughVariant> {
        self.scenarios.iter().flat_map(|s| s.variants.iter())
    }

    /// Mutable iteration over every variant of every scenario
    pub fn variants_mut(&mut self) -> impl Iterator<Item = &mut WalkthroughVariant> {
        self.scenarios.iter_mut().flat_map(|s| s.variants.iter_mut())
    }

    /// Fill defaults on every trial in the walkthrough
    pub fn apply_defaults(&mut self) {
        for variant in self.variants_mut() {
            variant.apply_defaults();
        }
    }

    /// Total number of trials across all variants
    #[must_use]
    pub fn trial_count(&self) -> usize {
        self.variants().map(|v| v.trials.len()).sum()
    }
}
