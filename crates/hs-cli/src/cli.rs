//! CLI wiring for the `hypersweep` binary.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use hs_evaluator::CommandEvaluator;
use hs_optimizer::{
    CenteredSearch, NullTelemetry, ObservationLog, ParameterSpace, RunSummary, SchedulerConfig,
    SpaceKind, TelemetrySink, TracingTelemetry, TrialParameterInjector, TrialScheduler,
};
use hs_types::{ParameterDocument, RunConfig};

/// Where the evaluator is asked to dump its parameter document.
const DOCUMENT_DUMP_FILE: &str = "hyperparamsExample.json";
const OBSERVATIONS_FILE: &str = "observations.tsv";

#[derive(Parser, Debug)]
#[command(name = "hypersweep", about = "Black-box hyperparameter search over an external trainer")]
pub struct Cli {
    /// YAML run configuration. Defaults apply when omitted.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Parameter document to tune. When omitted the evaluator is asked to
    /// write one with `-hyperFile`.
    #[arg(long)]
    pub document: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the full search.
    Run {
        /// Seed for the built-in sampler.
        #[arg(long)]
        seed: Option<u64>,
        /// Override the configured trial count.
        #[arg(long)]
        trials: Option<usize>,
        /// Override the configured number of parallel workers.
        #[arg(long)]
        parallel: Option<usize>,
        /// Write the run summary as JSON.
        #[arg(long)]
        summary: Option<PathBuf>,
        /// Skip the per-observation log file.
        #[arg(long, default_value_t = false)]
        no_observation_log: bool,
    },
    /// Print the extracted search space.
    Space,
    /// Write a trial parameter file from the initial values.
    Inject {
        #[arg(long, default_value = "Initial")]
        label: String,
    },
}

pub fn run_cli(cli: Cli) -> Result<()> {
    tracing_subscriber::fmt::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let Cli {
        config,
        document,
        command,
    } = cli;
    let mut config = load_config(config.as_deref())?;

    match command {
        Command::Run {
            seed,
            trials,
            parallel,
            summary,
            no_observation_log,
        } => {
            if let Some(trials) = trials {
                config.num_trials = trials;
            }
            if let Some(parallel) = parallel {
                config.num_parallel = parallel;
            }
            config.validate()?;
            prepare_artifacts_dir(&config)?;

            let evaluator = CommandEvaluator::from_config(&config);
            let document = load_document(document.as_deref(), &config, &evaluator)?;
            let space = ParameterSpace::extract(&document)?;
            info!(
                project = %config.project_name,
                tunables = space.len(),
                trials = config.num_trials,
                parallel = config.num_parallel,
                "search space ready"
            );

            let injector = TrialParameterInjector::new(
                document,
                &space,
                &config.artifacts_dir,
                config.params_layout,
            );
            let optimizer = CenteredSearch::new(&space, config.direction(), seed);
            let telemetry: Box<dyn TelemetrySink> = if config.telemetry {
                Box::new(TracingTelemetry)
            } else {
                Box::new(NullTelemetry)
            };

            let mut scheduler = TrialScheduler::new(
                SchedulerConfig::from_run_config(&config),
                optimizer,
                injector,
                evaluator,
            )
            .with_telemetry(telemetry);
            if !no_observation_log {
                let path = config.artifacts_dir.join(OBSERVATIONS_FILE);
                let log = ObservationLog::open(&path)
                    .with_context(|| format!("opening observation log {}", path.display()))?;
                scheduler = scheduler.with_observation_log(log);
            }

            let result = scheduler.run()?;
            print!("{}", render_summary(&result));
            if let Some(path) = summary {
                fs::write(&path, serde_json::to_string_pretty(&result)?)
                    .with_context(|| format!("writing summary {}", path.display()))?;
            }
        }
        Command::Space => {
            prepare_artifacts_dir(&config)?;
            let evaluator = CommandEvaluator::from_config(&config);
            let document = load_document(document.as_deref(), &config, &evaluator)?;
            let space = ParameterSpace::extract(&document)?;
            print!("{}", render_space(&space));
        }
        Command::Inject { label } => {
            prepare_artifacts_dir(&config)?;
            let evaluator = CommandEvaluator::from_config(&config);
            let document = load_document(document.as_deref(), &config, &evaluator)?;
            let space = ParameterSpace::extract(&document)?;
            let injector = TrialParameterInjector::new(
                document,
                &space,
                &config.artifacts_dir,
                config.params_layout,
            );
            let path = injector.write(&space.initial_params, &label)?;
            println!("{}", path.display());
        }
    }

    Ok(())
}

fn prepare_artifacts_dir(config: &RunConfig) -> Result<()> {
    fs::create_dir_all(&config.artifacts_dir).with_context(|| {
        format!(
            "creating artifacts directory {}",
            config.artifacts_dir.display()
        )
    })
}

fn load_config(path: Option<&Path>) -> Result<RunConfig> {
    match path {
        Some(path) => RunConfig::from_yaml_file(path)
            .with_context(|| format!("loading configuration {}", path.display())),
        None => {
            let config = RunConfig::default();
            config.validate()?;
            Ok(config)
        }
    }
}

fn load_document(
    path: Option<&Path>,
    config: &RunConfig,
    evaluator: &CommandEvaluator,
) -> Result<ParameterDocument> {
    match path {
        Some(path) => ParameterDocument::load(path)
            .with_context(|| format!("loading parameter document {}", path.display())),
        None => {
            let dump = config.artifacts_dir.join(DOCUMENT_DUMP_FILE);
            evaluator
                .dump_document(&dump)
                .with_context(|| format!("dumping parameter document to {}", dump.display()))
        }
    }
}

fn render_space(space: &ParameterSpace) -> String {
    let mut out = String::new();
    for tunable in &space.tunables {
        let Some(dist) = space.search_space.get(&tunable.unique_name) else {
            continue;
        };
        let kind = match dist.kind {
            SpaceKind::Linear => "linear",
            SpaceKind::Log => "log",
        };
        let bound = |b: Option<f64>| b.map_or_else(|| "-".to_string(), |v| v.to_string());
        out.push_str(&format!(
            "{}\t{}[{}]\t{}\tinitial={}\tscale={}\tmin={}\tmax={}{}\n",
            tunable.unique_name,
            tunable.sheet,
            tunable.element_index,
            kind,
            space.initial_params[&tunable.unique_name],
            dist.scale,
            bound(dist.min),
            bound(dist.max),
            if dist.is_integer { "\tint" } else { "" },
        ));
    }
    out
}

fn render_summary(summary: &RunSummary) -> String {
    let mut out = format!(
        "run {}: {} completed, {} failed of {}\n",
        summary.run_id, summary.completed, summary.failed, summary.expected
    );
    match &summary.best {
        Some(best) => {
            out.push_str(&format!("best: {} score={}\n", best.label, best.score));
            let ordered: BTreeMap<_, _> = best.suggestion.iter().collect();
            for (name, value) in ordered {
                out.push_str(&format!("  {name} = {value}\n"));
            }
        }
        None => out.push_str("best: none\n"),
    }
    let results = summary.results();
    if !results.is_empty() {
        out.push_str("trials:\n");
        for result in results {
            out.push_str(&format!(
                "  {}\t{}\t{:.1}s{}\n",
                result.label,
                result.score,
                result.elapsed_seconds,
                if result.failed { "\tfailed" } else { "" },
            ));
        }
    }
    out
}
