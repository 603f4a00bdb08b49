//! Command handlers for CLI operations
//!
//! - evaluate: sample, score and persist one run per temperature
//! - show: print a persisted run
//! - runs: list persisted runs
//! - taxonomy: print the strategy taxonomy

use anyhow::{Context, Result};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::Config;
use crate::evaluation::{
    ArtifactStore, GenerationMode, LoadedRun, PersistedRun, RunAssembler, RunMetrics, Taxonomy,
};
use sdk::context::FrozenContext;

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// Arguments of the `evaluate` command after CLI parsing
#[derive(Debug, Clone)]
pub struct EvaluateArgs {
    pub context: PathBuf,
    pub trials: Option<usize>,
    pub temperatures: Vec<f64>,
    pub mode: Option<GenerationMode>,
    pub label: Option<String>,
}

fn load_taxonomy(config: &Config) -> Result<Arc<Taxonomy>> {
    let taxonomy = Taxonomy::load_or_builtin(config.core.taxonomy_path.as_deref())
        .context("Failed to load strategy taxonomy")?;
    Ok(Arc::new(taxonomy))
}

/// `null` stays visible in text output as "n/a"
fn format_score(value: Option<f64>) -> String {
    value
        .map(|v| format!("{:.3}", v))
        .unwrap_or_else(|| "n/a".to_string())
}

fn label_for(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "context".to_string())
}

fn print_metrics(metrics: &RunMetrics) {
    println!(
        "  Validity:     {:.3} ({}/{} valid, {} failed)",
        metrics.validity_rate, metrics.valid_trials, metrics.n_trials, metrics.failed_trials
    );
    println!(
        "  Stability:    {} over {} pairs{}",
        format_score(metrics.stability_mean),
        metrics.stability_pair_count,
        if metrics.stability_only_valid {
            " (valid trials)"
        } else {
            ""
        }
    );
    if metrics.stability_only_valid {
        println!(
            "  Stability*:   {} over {} pairs (all trials)",
            format_score(metrics.stability_all_mean),
            metrics.stability_all_pair_count
        );
    }
    println!(
        "  Consistency:  {} over {} pairs ({} failed)",
        format_score(metrics.consistency_mean),
        metrics.consistency_pair_count,
        metrics.consistency_failed_pairs
    );
    println!(
        "  Alignment:    {} over {} trials ({} failed)",
        format_score(metrics.alignment_mean),
        metrics.alignment_trial_count,
        metrics.alignment_failed_count
    );

    if !metrics.strategy_counts.is_empty() {
        println!("  Strategies:");
        for (id, count) in &metrics.strategy_counts {
            let alignment = metrics.alignment_per_strategy.get(id).copied();
            println!(
                "    {:<24} {:>3}x  alignment {}",
                id,
                count,
                format_score(alignment)
            );
        }
    }
}

/// Evaluate a frozen context
pub async fn handle_evaluate(args: EvaluateArgs, config: &Config, format: OutputFormat) -> Result<()> {
    let context = FrozenContext::load(&args.context)
        .with_context(|| format!("Failed to load context {}", args.context.display()))?;
    let context = Arc::new(context);

    let trials = args.trials.unwrap_or(config.sampling.trials);
    let temperatures = if args.temperatures.is_empty() {
        config.sampling.temperatures.clone()
    } else {
        args.temperatures
    };
    let mode = args.mode.unwrap_or(config.sampling.mode);
    let label = args.label.unwrap_or_else(|| label_for(&args.context));

    let taxonomy = load_taxonomy(config)?;
    let assembler = RunAssembler::from_config(config, taxonomy)
        .context("Failed to set up evaluation")?;
    let store = ArtifactStore::new(config.core.runs_dir.clone());

    let runs = assembler
        .sweep(&store, context, &label, trials, &temperatures, mode)
        .await
        .context("Evaluation failed")?;

    match format {
        OutputFormat::Text => {
            for PersistedRun { dir, result, .. } in &runs {
                println!("Run {}", result.run_id);
                println!(
                    "  Model:        {} ({}, {} mode, temperature {})",
                    result.model, result.provider, result.request.mode, result.request.temperature
                );
                print_metrics(&result.metrics);
                println!("  Artifacts:    {}", dir.display());
                println!();
            }
        }
        OutputFormat::Json => {
            let output: Vec<_> = runs
                .iter()
                .map(|run| {
                    json!({
                        "run_id": run.result.run_id,
                        "dir": run.dir,
                        "state": run.state,
                        "model": run.result.model,
                        "mode": run.result.request.mode,
                        "metrics": run.result.metrics,
                    })
                })
                .collect();
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({ "runs": output }))?
            );
        }
    }

    Ok(())
}

/// Show a persisted run
pub async fn handle_show(run_dir: &Path, format: OutputFormat) -> Result<()> {
    let LoadedRun {
        dir,
        manifest,
        metrics,
        trials,
        judgments,
    } = ArtifactStore::load_run(run_dir)
        .with_context(|| format!("Failed to load run {}", run_dir.display()))?;

    match format {
        OutputFormat::Text => {
            println!("Run {}", manifest.run_id);
            println!("  Created:      {}", manifest.created_at);
            println!(
                "  Model:        {} ({}, {} mode, temperature {})",
                manifest.model, manifest.provider, manifest.mode, manifest.temperature
            );
            println!(
                "  Context:      {} [{}]",
                manifest.label,
                &manifest.context_hash[..manifest.context_hash.len().min(12)]
            );
            print_metrics(&metrics);
            println!();
            println!("Trials:");
            for trial in &trials {
                let strategies = trial
                    .strategies()
                    .map(|s| s.to_string())
                    .unwrap_or_default();
                match trial.failure_reason() {
                    Some(reason) => println!("  #{:02} {:<14} {}", trial.index, trial.status(), reason),
                    None => println!("  #{:02} {:<14} {}", trial.index, trial.status(), strategies),
                }
            }
            println!();
            println!("Artifacts: {}", dir.display());
        }
        OutputFormat::Json => {
            let output = json!({
                "dir": dir,
                "manifest": manifest,
                "metrics": metrics,
                "trials": trials,
                "judgments": judgments,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// List persisted runs
pub async fn handle_runs(config: &Config, format: OutputFormat) -> Result<()> {
    let store = ArtifactStore::new(config.core.runs_dir.clone());
    let runs = store.list_runs().context("Failed to list runs")?;

    match format {
        OutputFormat::Text => {
            if runs.is_empty() {
                println!("No runs in {}", store.root().display());
                return Ok(());
            }
            println!("Runs in {}:", store.root().display());
            for dir in &runs {
                if let Some(name) = dir.file_name() {
                    println!("  {}", name.to_string_lossy());
                }
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "root": store.root(),
                "runs": runs,
                "count": runs.len(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Print the taxonomy in use
pub async fn handle_taxonomy(config: &Config, format: OutputFormat) -> Result<()> {
    let taxonomy = load_taxonomy(config)?;
    let bounds = taxonomy.bounds();

    match format {
        OutputFormat::Text => {
            println!(
                "Strategy taxonomy ({} strategies, {}-{} per plan):",
                taxonomy.len(),
                bounds.min,
                bounds.max
            );
            println!();
            println!("{}", taxonomy.definitions_block());
        }
        OutputFormat::Json => {
            let output = json!({
                "strategies": taxonomy.strategies(),
                "min_strategies": bounds.min,
                "max_strategies": bounds.max,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}
