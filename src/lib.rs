//! # Walkthrough Eval
//!
//! Comparative evaluation engine for minimal-context design (MCD) prompting
//! on constrained language models.
//!
//! ## Core Thesis
//!
//! A structured, constrained prompt that states only what the task needs
//! should match or beat verbose, few-shot and role-based prompts on the same
//! small model, while spending fewer tokens. This crate measures that claim
//! across domain walkthroughs and says when the data does not support it.
//!
//! ## Domains
//!
//! - D1 Appointment booking
//! - D2 Spatial navigation
//! - D3 Failure diagnostics
//!
//! ## Architecture
//!
//! ```text
//! Walkthrough catalog (YAML)
//!        ↓
//! Domain criteria adjustment (token budget, latency, tier bands)
//!        ↓
//! Model inference (ollama | llama.cpp | custom command)
//!        ↓
//! Trial scoring (requirement matching, structure, efficiency)
//!        ↓
//! Variant aggregation (success k/n, bootstrap CI)
//!        ↓
//! Comparative analysis (approach buckets, MCD advantage)
//!        ↓
//! Cross-domain report (consistency, heuristic significance)
//! ```

pub mod backend;
pub mod compare;
pub mod config;
pub mod cross_domain;
pub mod domain;
pub mod matcher;
pub mod metrics;
pub mod report;
pub mod runner;
pub mod scorer;
pub mod session;
pub mod tokens;
pub mod walkthrough;

pub use backend::{
    available_backends, list_ollama_models, BackendError, CommandBackend, Completion,
    GenerationRequest, InferenceBackend,
};
pub use compare::{Approach, BucketSummary, ComparativeAnalysis, McdAdvantage, RankedApproach};
pub use config::{
    load_walkthrough, walkthrough_from_yaml, BackendConfig, ConfigError, EvalSettings,
    WalkthroughLoader,
};
pub use cross_domain::{
    ConsistencyLevel, ConsistencyPattern, CrossDomainAnalysis, DomainSummary,
    HeuristicSignificance, SignificanceBand,
};
pub use domain::{adjust, AdjustedCriteria, Domain, DomainProfile};
pub use matcher::{MatchStrategy, RequirementMatcher, ScoringError};
pub use metrics::{
    bootstrap_ci, welch_t_test, AggregatedMetrics, MetricsCollector, Ratio, SignificanceResult,
    StatConfig, SuccessRate,
};
pub use report::{
    cross_domain_markdown, evaluation_text, FullReport, ReportBuilder, ReportMetadata,
    ReportSummary,
};
pub use runner::{ResourceTier, RunnerConfig, VariantRunner, VariantStats};
pub use scorer::{PerformanceTier, TrialEvaluationResult, TrialScorer};
pub use session::{catalog_issues, AnalysisSession, ExecutionStats, WalkthroughRun};
pub use tokens::{HeuristicTokenCounter, TokenCounter};
pub use walkthrough::{
    Difficulty, DomainWalkthrough, SuccessCriteria, TrialSpecification, VariantType,
    WalkthroughScenario, WalkthroughVariant,
};
