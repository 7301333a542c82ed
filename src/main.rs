//! Walkthrough Eval CLI
//!
//! Comparative evaluation of prompting strategies across domain walkthroughs

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::io::Read;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use walkthrough_eval::{
    available_backends, cross_domain_markdown, evaluation_text, AnalysisSession, BackendConfig,
    CommandBackend, Domain, EvalSettings, InferenceBackend, ReportBuilder, ResourceTier,
    TrialScorer, WalkthroughLoader,
};

#[derive(Parser)]
#[command(name = "walkthrough-eval")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Markdown,
    Text,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every variant of every walkthrough against a local model
    Evaluate {
        /// Walkthrough catalog files (glob pattern)
        #[arg(long, default_value = "walkthroughs/*.yaml")]
        walkthroughs: String,

        /// Evaluation settings file
        #[arg(long)]
        config: Option<String>,

        /// Ollama model name
        #[arg(long, conflicts_with_all = ["llama_cpp", "command"])]
        ollama: Option<String>,

        /// GGUF model path for llama.cpp
        #[arg(long, conflicts_with = "command")]
        llama_cpp: Option<String>,

        /// Custom inference command
        #[arg(long, requires = "args")]
        command: Option<String>,

        /// Argument template for --command ({prompt}, {max_tokens}, {temperature})
        #[arg(long)]
        args: Option<String>,

        /// Resource tier (overrides the settings file)
        #[arg(long)]
        tier: Option<ResourceTier>,

        /// Report format
        #[arg(long, value_enum, default_value = "markdown")]
        format: OutputFormat,

        /// Output report file (stdout if omitted)
        #[arg(long)]
        output: Option<String>,
    },

    /// Score one response against a catalog trial
    Score {
        /// Walkthrough catalog files (glob pattern)
        #[arg(long, default_value = "walkthroughs/*.yaml")]
        walkthroughs: String,

        /// Trial id, e.g. D1-T1
        #[arg(long)]
        trial: String,

        /// File with the model response (stdin if omitted)
        #[arg(long)]
        response: Option<String>,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Cross-domain analysis of the catalog's recorded performance profiles
    CrossDomain {
        /// Walkthrough catalog files (glob pattern)
        #[arg(long, default_value = "walkthroughs/*.yaml")]
        walkthroughs: String,

        /// Significance threshold for the accuracy test
        #[arg(long, default_value = "0.05")]
        alpha: f64,

        /// Print JSON instead of markdown
        #[arg(long)]
        json: bool,
    },

    /// Validate walkthrough catalogs
    Validate {
        /// Walkthrough catalog files (glob pattern)
        #[arg(long, default_value = "walkthroughs/*.yaml")]
        walkthroughs: String,
    },

    /// Show domain threshold tables
    Domains,

    /// List inference backends found on this machine
    Backends,
}

fn load_catalog(pattern: &str) -> Result<WalkthroughLoader> {
    let loader = WalkthroughLoader::load_glob(pattern)
        .with_context(|| format!("Failed to load walkthroughs from {pattern}"))?;
    if loader.is_empty() {
        bail!("No walkthroughs matched {pattern}");
    }
    tracing::info!(count = loader.len(), pattern = %pattern, "Loaded walkthroughs");
    Ok(loader)
}

fn write_output(content: &str, output: Option<&str>) -> Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, content).with_context(|| format!("Failed to write {path}"))?;
            tracing::info!(path = %path, "Report written");
        }
        None => println!("{content}"),
    }
    Ok(())
}

fn select_backend(
    ollama: Option<String>,
    llama_cpp: Option<String>,
    command: Option<String>,
    args: Option<String>,
    timeout: Duration,
) -> Result<CommandBackend> {
    let config = match (ollama, llama_cpp, command) {
        (Some(model), _, _) => BackendConfig::ollama(&model),
        (_, Some(path), _) => BackendConfig::llama_cpp(&path),
        (_, _, Some(command)) => BackendConfig {
            name: command.clone(),
            command,
            args_template: args.unwrap_or_default(),
        },
        _ => bail!("Choose a backend with --ollama, --llama-cpp or --command"),
    };
    let backend = CommandBackend::with_config(config, timeout);
    if !backend.is_available() {
        bail!("Inference backend '{}' not found on PATH", backend.name());
    }
    Ok(backend)
}

fn evaluate(
    walkthroughs: &str,
    mut backend: CommandBackend,
    mut settings: EvalSettings,
    tier: Option<ResourceTier>,
    format: OutputFormat,
    output: Option<&str>,
) -> Result<()> {
    if let Some(tier) = tier {
        settings.tier = tier;
    }

    let mut catalog: Vec<_> = load_catalog(walkthroughs)?.into_iter().collect();
    let mut session = AnalysisSession::with_config(settings.runner_config())
        .context("Failed to build trial scorer")?;

    for walkthrough in &mut catalog {
        if !session.validate(walkthrough).is_empty() {
            bail!("Walkthrough {} failed validation", walkthrough.id);
        }
        session.run_walkthrough(walkthrough, &mut backend);
    }

    let stats = session.execution_stats();
    tracing::info!(
        trials = stats.trials,
        passed = stats.trials_passed,
        errors = stats.execution_errors,
        "Evaluation complete"
    );

    let report = ReportBuilder::from_session("Walkthrough Evaluation", &session, &catalog)
        .with_backend(backend.name())
        .build();

    let rendered = match format {
        OutputFormat::Json => report.to_json()?,
        OutputFormat::Markdown => report.to_markdown(),
        OutputFormat::Text => report.to_text(),
    };
    write_output(&rendered, output)
}

fn score(walkthroughs: &str, trial_id: &str, response: Option<&str>, json: bool) -> Result<()> {
    let catalog = load_catalog(walkthroughs)?;
    let trial = catalog
        .iter()
        .flat_map(|w| w.variants())
        .flat_map(|v| v.trials.iter())
        .find(|t| t.id == trial_id)
        .with_context(|| format!("Trial {trial_id} not found"))?;

    let text = match response {
        Some(path) => std::fs::read_to_string(path).with_context(|| format!("Failed to read {path}"))?,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };

    let scorer = TrialScorer::new()?;
    let result = scorer.evaluate(&text, trial);
    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print!("{}", evaluation_text(trial_id, &result));
    }
    Ok(())
}

fn show_domains() {
    println!(
        "{:<8} {:<24} {:>9} {:>9} {:>10} {:>10}",
        "Domain", "Name", "Accuracy", "Latency", "Multiplier", "Excellent"
    );
    for domain in Domain::LISTED {
        let p = domain.profile();
        println!(
            "{:<8} {:<24} {:>9.2} {:>7}ms {:>9.2}x {:>10.2}",
            domain.to_string(),
            domain.name(),
            p.base.min_accuracy,
            p.base.max_latency_ms,
            p.complexity_multiplier,
            p.tiers.excellent.min_score
        );
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if cli.verbose {
        tracing::info!("Verbose mode enabled");
    }

    match cli.command {
        Commands::Evaluate {
            walkthroughs,
            config,
            ollama,
            llama_cpp,
            command,
            args,
            tier,
            format,
            output,
        } => {
            tracing::info!(
                walkthroughs = %walkthroughs,
                config = ?config,
                tier = ?tier,
                output = ?output,
                "Starting evaluation"
            );
            let settings = match &config {
                Some(path) => EvalSettings::load(path)
                    .with_context(|| format!("Failed to load settings from {path}"))?,
                None => EvalSettings::default(),
            };
            let backend = select_backend(
                ollama,
                llama_cpp,
                command,
                args,
                Duration::from_secs(settings.timeout_secs),
            )?;
            evaluate(&walkthroughs, backend, settings, tier, format, output.as_deref())
        }
        Commands::Score {
            walkthroughs,
            trial,
            response,
            json,
        } => score(&walkthroughs, &trial, response.as_deref(), json),
        Commands::CrossDomain {
            walkthroughs,
            alpha,
            json,
        } => {
            let catalog = load_catalog(&walkthroughs)?;
            let analysis =
                walkthrough_eval::cross_domain::analyze(catalog.walkthroughs(), &[], alpha);
            if json {
                println!("{}", serde_json::to_string_pretty(&analysis)?);
            } else {
                print!("{}", cross_domain_markdown(&analysis));
            }
            Ok(())
        }
        Commands::Validate { walkthroughs } => {
            let catalog = load_catalog(&walkthroughs)?;
            let mut failed = 0;
            for walkthrough in catalog.walkthroughs() {
                let issues = walkthrough_eval::catalog_issues(walkthrough);
                if issues.is_empty() {
                    println!(
                        "{} {}: OK ({} trials)",
                        walkthrough.domain,
                        walkthrough.title,
                        walkthrough.trial_count()
                    );
                } else {
                    failed += 1;
                    println!("{} {}: {} issue(s)", walkthrough.domain, walkthrough.title, issues.len());
                    for issue in issues {
                        println!("  - {issue}");
                    }
                }
            }
            if failed > 0 {
                bail!("{failed} walkthrough(s) failed validation");
            }
            Ok(())
        }
        Commands::Domains => {
            show_domains();
            Ok(())
        }
        Commands::Backends => {
            let found = available_backends();
            if found.is_empty() {
                println!("No inference backends found (tried ollama, llama-cli)");
            } else {
                for name in found {
                    println!("{name}");
                }
            }
            Ok(())
        }
    }
}
