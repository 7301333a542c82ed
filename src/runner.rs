//! Variant execution and aggregation.
//!
//! Runs every trial of a variant against an inference backend, scores each
//! response, writes the outcome back into the trial and aggregates the
//! per-trial outcomes into [`VariantStats`].

use crate::backend::{GenerationRequest, InferenceBackend};
use crate::domain::{self, Domain};
use crate::metrics::{MetricsCollector, StatConfig, SuccessRate};
use crate::scorer::{PerformanceTier, TrialScorer, ERROR_SENTINEL};
use crate::walkthrough::{
    ActualResults, DomainWalkthrough, PerformanceProfile, TokenBreakdown, TrialSpecification,
    VariantType, WalkthroughVariant,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors raised when parsing a resource tier
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TierError {
    #[error("Unknown resource tier (expected Q1, Q4 or Q8): {0}")]
    Unknown(String),
}

/// Quantization level the model runs at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum ResourceTier {
    /// 1-bit, most constrained
    Q1,
    /// 4-bit
    #[default]
    Q4,
    /// 8-bit
    Q8,
}

impl ResourceTier {
    pub const ALL: [Self; 3] = [Self::Q1, Self::Q4, Self::Q8];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Q1 => "Q1",
            Self::Q4 => "Q4",
            Self::Q8 => "Q8",
        }
    }

    /// Multiplier on the generation token limit
    #[must_use]
    pub const fn token_scale(self) -> f64 {
        match self {
            Self::Q1 => 0.75,
            Self::Q4 => 1.0,
            Self::Q8 => 1.25,
        }
    }
}

impl fmt::Display for ResourceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceTier {
    type Err = TierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "Q1" => Ok(Self::Q1),
            "Q4" => Ok(Self::Q4),
            "Q8" => Ok(Self::Q8),
            _ => Err(TierError::Unknown(s.to_string())),
        }
    }
}

/// Temperature and token headroom for one variant category
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationProfile {
    pub temperature: f64,
    /// Multiplier on the adjusted token budget
    pub headroom: f64,
}

/// Runner configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerConfig {
    pub tier: ResourceTier,
    pub mcd: GenerationProfile,
    pub hybrid: GenerationProfile,
    pub non_mcd: GenerationProfile,
    pub stats: StatConfig,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            tier: ResourceTier::default(),
            mcd: GenerationProfile {
                temperature: 0.0,
                headroom: 1.0,
            },
            hybrid: GenerationProfile {
                temperature: 0.1,
                headroom: 1.5,
            },
            non_mcd: GenerationProfile {
                temperature: 0.7,
                headroom: 2.0,
            },
            stats: StatConfig::default(),
        }
    }
}

impl RunnerConfig {
    /// Generation parameters for a variant category
    #[must_use]
    pub const fn profile_for(&self, variant_type: VariantType) -> GenerationProfile {
        match variant_type {
            VariantType::Mcd => self.mcd,
            VariantType::Hybrid => self.hybrid,
            VariantType::NonMcd => self.non_mcd,
        }
    }

    /// Token limit handed to the backend for a trial budget
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn generation_limit(&self, variant_type: VariantType, adjusted_budget: usize) -> usize {
        let profile = self.profile_for(variant_type);
        let limit = (adjusted_budget as f64 * profile.headroom * self.tier.token_scale()).round();
        (limit.max(1.0)) as usize
    }
}

/// Count of trials per performance tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TierCounts {
    pub excellent: usize,
    pub good: usize,
    pub acceptable: usize,
    pub poor: usize,
}

impl TierCounts {
    pub fn record(&mut self, tier: PerformanceTier) {
        match tier {
            PerformanceTier::Excellent => self.excellent += 1,
            PerformanceTier::Good => self.good += 1,
            PerformanceTier::Acceptable => self.acceptable += 1,
            PerformanceTier::Poor => self.poor += 1,
        }
    }

    #[must_use]
    pub const fn total(&self) -> usize {
        self.excellent + self.good + self.acceptable + self.poor
    }
}

/// Aggregate statistics of one executed variant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantStats {
    pub variant_id: String,
    pub variant_name: String,
    pub variant_type: VariantType,
    pub domain: Domain,
    pub tier: ResourceTier,
    /// `k/n`; `0/0` for a variant without trials
    pub success_rate: SuccessRate,
    pub avg_tokens: f64,
    pub avg_latency_ms: f64,
    pub avg_accuracy: f64,
    /// Bootstrap confidence interval of the mean accuracy
    pub accuracy_ci: (f64, f64),
    pub accuracy_samples: Vec<f64>,
    pub tier_counts: TierCounts,
    /// Trials whose response had the domain's structural shape
    pub mcd_aligned: usize,
    pub execution_errors: usize,
}

/// One executed trial
#[derive(Debug, Clone, PartialEq)]
struct TrialOutcome {
    tier: PerformanceTier,
    execution_error: bool,
}

/// Executes variants trial by trial
pub struct VariantRunner {
    config: RunnerConfig,
    scorer: TrialScorer,
}

impl VariantRunner {
    /// Create a runner with a configuration and scorer
    #[must_use]
    pub const fn new(config: RunnerConfig, scorer: TrialScorer) -> Self {
        Self { config, scorer }
    }

    /// Get current configuration
    #[must_use]
    pub const fn config(&self) -> &RunnerConfig {
        &self.config
    }

    #[must_use]
    pub const fn scorer(&self) -> &TrialScorer {
        &self.scorer
    }

    /// Run every variant of a walkthrough
    pub fn run_walkthrough(
        &self,
        walkthrough: &mut DomainWalkthrough,
        backend: &mut dyn InferenceBackend,
    ) -> Vec<VariantStats> {
        let domain = walkthrough.domain;
        tracing::info!(
            walkthrough = %walkthrough.id,
            domain = %domain,
            tier = %self.config.tier,
            trials = walkthrough.trial_count(),
            "Running walkthrough"
        );

        walkthrough
            .variants_mut()
            .map(|variant| self.run_variant(domain, variant, backend))
            .collect()
    }

    /// Execute all trials of `variant` sequentially and aggregate them.
    ///
    /// A failing backend call is recorded as a failed trial; the remaining
    /// trials still run. The variant's measured profile is replaced.
    pub fn run_variant(
        &self,
        domain: Domain,
        variant: &mut WalkthroughVariant,
        backend: &mut dyn InferenceBackend,
    ) -> VariantStats {
        tracing::info!(
            variant = %variant.id,
            variant_type = variant.variant_type.as_str(),
            backend = backend.name(),
            trials = variant.trials.len(),
            "Running variant"
        );

        let mut collector = MetricsCollector::new();
        let mut tier_counts = TierCounts::default();
        let mut mcd_aligned = 0;
        let mut execution_errors = 0;

        let variant_type = variant.variant_type;
        let prompts: Vec<String> = variant
            .trials
            .iter()
            .map(|t| variant.render_prompt(&t.user_input))
            .collect();

        for (trial, prompt) in variant.trials.iter_mut().zip(prompts) {
            let outcome = self.run_trial(variant_type, trial, prompt, backend);
            tier_counts.record(outcome.tier);
            if outcome.execution_error {
                execution_errors += 1;
            }
            if let Some(results) = &trial.actual_results {
                if results.mcd_aligned {
                    mcd_aligned += 1;
                }
                collector.record_trial(
                    results.accuracy,
                    Duration::from_millis(results.latency_ms),
                    results.tokens.total,
                    results.success,
                );
            }
        }

        let metrics = collector.compute(&self.config.stats);

        variant.measured_performance = Some(PerformanceProfile {
            avg_latency_ms: metrics.avg_latency_ms,
            avg_tokens: metrics.avg_tokens,
            // not measured here; carried over from the declared profile
            cpu_percent: variant.expected_performance.cpu_percent,
            memory_kb: variant.expected_performance.memory_kb,
            success_rate: metrics.success_rate,
        });

        tracing::info!(
            variant = %variant.id,
            success_rate = %metrics.success_rate,
            avg_accuracy = metrics.avg_accuracy,
            errors = execution_errors,
            "Variant complete"
        );

        VariantStats {
            variant_id: variant.id.clone(),
            variant_name: variant.name.clone(),
            variant_type,
            domain,
            tier: self.config.tier,
            success_rate: metrics.success_rate,
            avg_tokens: metrics.avg_tokens,
            avg_latency_ms: metrics.avg_latency_ms,
            avg_accuracy: metrics.avg_accuracy,
            accuracy_ci: metrics.accuracy_ci,
            accuracy_samples: collector.accuracy_samples().to_vec(),
            tier_counts,
            mcd_aligned,
            execution_errors,
        }
    }

    fn run_trial(
        &self,
        variant_type: VariantType,
        trial: &mut TrialSpecification,
        prompt: String,
        backend: &mut dyn InferenceBackend,
    ) -> TrialOutcome {
        let thresholds = domain::adjust(trial);
        let profile = self.config.profile_for(variant_type);
        let counter = self.scorer.token_counter();
        let prompt_tokens = counter.count(&prompt);

        let request = GenerationRequest {
            prompt,
            max_tokens: self.config.generation_limit(variant_type, thresholds.max_tokens),
            temperature: profile.temperature,
        };

        let start = Instant::now();
        let generated = backend.generate(&request);
        let latency_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        match generated {
            Ok(completion) => {
                let evaluation = self.scorer.evaluate(&completion.text, trial);
                let completion_tokens = completion
                    .tokens_used
                    .unwrap_or_else(|| counter.count(&completion.text));

                let mut failure_reasons = evaluation.failure_reasons.clone();
                if latency_ms > thresholds.max_latency_ms {
                    failure_reasons.push(format!(
                        "Latency {latency_ms}ms exceeds {} budget of {}ms",
                        thresholds.domain, thresholds.max_latency_ms
                    ));
                }
                let min_accuracy = trial
                    .success_criteria
                    .min_accuracy
                    .unwrap_or(thresholds.min_accuracy);
                if evaluation.accuracy < min_accuracy {
                    failure_reasons.push(format!(
                        "Accuracy {:.2} below minimum {min_accuracy:.2}",
                        evaluation.accuracy
                    ));
                }

                tracing::debug!(
                    trial = %trial.id,
                    tier = %evaluation.tier,
                    accuracy = evaluation.accuracy,
                    latency_ms,
                    "Scored trial"
                );

                trial.actual_results = Some(ActualResults {
                    output: completion.text,
                    tokens: TokenBreakdown {
                        prompt: prompt_tokens,
                        completion: completion_tokens,
                        total: prompt_tokens + completion_tokens,
                    },
                    latency_ms,
                    success: evaluation.success,
                    accuracy: evaluation.accuracy,
                    failure_reasons,
                    timestamp: Utc::now(),
                    mcd_aligned: evaluation.mcd_compliant,
                });

                TrialOutcome {
                    tier: evaluation.tier,
                    execution_error: false,
                }
            }
            Err(e) => {
                tracing::warn!(trial = %trial.id, error = %e, "Trial execution failed");

                trial.actual_results = Some(ActualResults {
                    output: format!("{ERROR_SENTINEL} {e}"),
                    tokens: TokenBreakdown {
                        prompt: prompt_tokens,
                        completion: 0,
                        total: prompt_tokens,
                    },
                    latency_ms,
                    success: false,
                    accuracy: 0.0,
                    failure_reasons: vec![format!("Execution error: {e}")],
                    timestamp: Utc::now(),
                    mcd_aligned: false,
                });

                TrialOutcome {
                    tier: PerformanceTier::Poor,
                    execution_error: true,
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, Completion};
    use crate::walkthrough::SuccessCriteria;
    use std::collections::VecDeque;

    /// Replays canned responses and records the requests it saw
    struct ScriptedBackend {
        responses: VecDeque<Result<String, String>>,
        requests: Vec<GenerationRequest>,
    }

    impl ScriptedBackend {
        fn new(responses: Vec<Result<&str, &str>>) -> Self {
            Self {
                responses: responses
                    .into_iter()
                    .map(|r| r.map(String::from).map_err(String::from))
                    .collect(),
                requests: Vec::new(),
            }
        }
    }

    impl InferenceBackend for ScriptedBackend {
        fn name(&self) -> &str {
            "scripted"
        }

        fn generate(&mut self, request: &GenerationRequest) -> Result<Completion, BackendError> {
            self.requests.push(request.clone());
            match self.responses.pop_front() {
                Some(Ok(text)) => Ok(Completion::text(text)),
                Some(Err(msg)) => Err(BackendError::ExecutionFailed(msg)),
                None => Err(BackendError::InvalidResponse("script exhausted".to_string())),
            }
        }
    }

    fn booking_trial(id: &str) -> TrialSpecification {
        let mut trial = TrialSpecification::new(
            id,
            "Book cardiology for Tuesday at 3pm",
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
        );
        trial.apply_defaults();
        trial
    }

    fn variant(variant_type: VariantType, trials: Vec<TrialSpecification>) -> WalkthroughVariant {
        WalkthroughVariant {
            id: "D1-V1".to_string(),
            variant_type,
            name: "Structured slots".to_string(),
            prompt_template: "Book: {input}. Reply with slots only.".to_string(),
            architecture: String::new(),
            trials,
            expected_performance: PerformanceProfile {
                avg_latency_ms: 300.0,
                avg_tokens: 20.0,
                cpu_percent: 30.0,
                memory_kb: 2048.0,
                success_rate: SuccessRate::new(4, 5),
            },
            measured_performance: None,
        }
    }

    fn runner(config: RunnerConfig) -> VariantRunner {
        VariantRunner::new(config, TrialScorer::new().unwrap())
    }

    const GOOD: &str = "Confirmed: Cardiology, Tue 3pm. Booking ID: #C001";

    #[test]
    fn test_runner_config_default_profiles() {
        let config = RunnerConfig::default();
        assert_eq!(config.tier, ResourceTier::Q4);
        assert_eq!(config.profile_for(VariantType::Mcd).temperature, 0.0);
        assert_eq!(config.profile_for(VariantType::Hybrid).temperature, 0.1);
        assert_eq!(config.profile_for(VariantType::NonMcd).temperature, 0.7);
    }

    #[test]
    fn test_generation_limit_scales_by_category_and_tier() {
        let mut config = RunnerConfig::default();
        assert_eq!(config.generation_limit(VariantType::Mcd, 45), 45);
        assert_eq!(config.generation_limit(VariantType::NonMcd, 45), 90);
        config.tier = ResourceTier::Q1;
        assert_eq!(config.generation_limit(VariantType::Hybrid, 40), 45);
        assert_eq!(config.generation_limit(VariantType::Mcd, 0), 1);
    }

    #[test]
    fn test_resource_tier_parse() {
        assert_eq!("q8".parse::<ResourceTier>().unwrap(), ResourceTier::Q8);
        assert!(matches!(
            "Q3".parse::<ResourceTier>(),
            Err(TierError::Unknown(_))
        ));
        assert_eq!(ResourceTier::Q1.to_string(), "Q1");
    }

    #[test]
    fn test_run_variant_scores_and_records_results() {
        let runner = runner(RunnerConfig::default());
        let mut v = variant(
            VariantType::Mcd,
            vec![booking_trial("D1-T1"), booking_trial("D1-T2")],
        );
        let mut backend = ScriptedBackend::new(vec![Ok(GOOD), Ok("maybe")]);

        let stats = runner.run_variant(Domain::AppointmentBooking, &mut v, &mut backend);

        assert_eq!(stats.success_rate, SuccessRate::new(1, 2));
        assert_eq!(stats.accuracy_samples.len(), 2);
        assert_eq!(stats.tier_counts.excellent, 1);
        assert_eq!(stats.tier_counts.poor, 1);
        assert_eq!(stats.execution_errors, 0);
        assert!(v.trials.iter().all(TrialSpecification::is_executed));

        let first = v.trials[0].actual_results.as_ref().unwrap();
        assert!(first.success);
        assert_eq!(first.output, GOOD);
        assert_eq!(first.tokens.total, first.tokens.prompt + first.tokens.completion);

        let measured = v.measured_performance.as_ref().unwrap();
        assert_eq!(measured.success_rate.to_string(), "1/2");
        assert_eq!(measured.memory_kb, 2048.0);
    }

    #[test]
    fn test_run_variant_uses_category_parameters() {
        let runner = runner(RunnerConfig::default());
        let mut v = variant(VariantType::NonMcd, vec![booking_trial("D1-T1")]);
        let mut backend = ScriptedBackend::new(vec![Ok(GOOD)]);

        runner.run_variant(Domain::AppointmentBooking, &mut v, &mut backend);

        let request = &backend.requests[0];
        assert_eq!(request.temperature, 0.7);
        assert_eq!(request.max_tokens, 90);
        assert!(request.prompt.starts_with("Book: Book cardiology"));
    }

    #[test]
    fn test_execution_error_does_not_abort_siblings() {
        let runner = runner(RunnerConfig::default());
        let mut v = variant(
            VariantType::Mcd,
            vec![booking_trial("D1-T1"), booking_trial("D1-T2")],
        );
        let mut backend = ScriptedBackend::new(vec![Err("model crashed"), Ok(GOOD)]);

        let stats = runner.run_variant(Domain::AppointmentBooking, &mut v, &mut backend);

        assert_eq!(stats.execution_errors, 1);
        assert_eq!(stats.success_rate, SuccessRate::new(1, 2));

        let failed = v.trials[0].actual_results.as_ref().unwrap();
        assert!(!failed.success);
        assert_eq!(failed.accuracy, 0.0);
        assert!(failed.output.starts_with(ERROR_SENTINEL));
        assert_eq!(failed.failure_reasons.len(), 1);
        assert!(failed.failure_reasons[0].starts_with("Execution error: "));
        assert!(failed.failure_reasons[0].contains("model crashed"));

        assert!(v.trials[1].actual_results.as_ref().unwrap().success);
    }

    #[test]
    fn test_zero_trial_variant_reports_no_data() {
        let runner = runner(RunnerConfig::default());
        let mut v = variant(VariantType::Mcd, Vec::new());
        let mut backend = ScriptedBackend::new(Vec::new());

        let stats = runner.run_variant(Domain::AppointmentBooking, &mut v, &mut backend);

        assert_eq!(stats.success_rate.to_string(), "0/0");
        assert!(stats.success_rate.fraction().is_none());
        assert_eq!(stats.avg_accuracy, 0.0);
        assert_eq!(stats.accuracy_ci, (0.0, 0.0));
        assert!(backend.requests.is_empty());
    }

    #[test]
    fn test_low_accuracy_adds_informational_reason() {
        let runner = runner(RunnerConfig::default());
        let mut v = variant(VariantType::Mcd, vec![booking_trial("D1-T1")]);
        let mut backend = ScriptedBackend::new(vec![Ok("Cardiology works")]);

        runner.run_variant(Domain::AppointmentBooking, &mut v, &mut backend);

        let results = v.trials[0].actual_results.as_ref().unwrap();
        assert!(results
            .failure_reasons
            .iter()
            .any(|r| r.starts_with("Accuracy ")));
    }

    #[test]
    fn test_tier_counts() {
        let mut counts = TierCounts::default();
        for tier in PerformanceTier::ALL {
            counts.record(tier);
        }
        counts.record(PerformanceTier::Poor);
        assert_eq!(counts.total(), 5);
        assert_eq!(counts.poor, 2);
    }
}
