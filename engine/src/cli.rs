//! CLI interface for restab
//!
//! Defines the commands and global flags using clap's derive API.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::evaluation::GenerationMode;

/// Rescripting stability evaluator
///
/// Samples repeated plan+response trials from a frozen conversation and
/// measures how stable the declared strategies, the responses and their
/// alignment are.
#[derive(Parser, Debug)]
#[command(name = "restab")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run N trials against a frozen context, once per temperature
    Evaluate {
        /// Frozen context JSON file
        #[arg(long, value_name = "PATH")]
        context: PathBuf,

        /// Number of trials (default: sampling.trials)
        #[arg(short = 'n', long)]
        trials: Option<usize>,

        /// Sampling temperature; repeat for a sweep (default: sampling.temperatures)
        #[arg(short, long = "temperature", value_name = "T")]
        temperatures: Vec<f64>,

        /// Generation mode: fused or chained (default: sampling.mode)
        #[arg(long)]
        mode: Option<GenerationMode>,

        /// Name recorded with the run (default: context file stem)
        #[arg(long)]
        label: Option<String>,
    },

    /// Show a persisted run
    Show {
        /// Run directory
        run_dir: PathBuf,
    },

    /// List persisted runs
    Runs,

    /// Print the strategy taxonomy and validity bounds
    Taxonomy,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evaluate_sweep_arguments() {
        let cli = Cli::try_parse_from([
            "restab",
            "--json",
            "evaluate",
            "--context",
            "ctx.json",
            "-n",
            "5",
            "-t",
            "0.2",
            "-t",
            "0.9",
            "--mode",
            "chained",
        ])
        .unwrap();

        assert!(cli.json);
        match cli.command {
            Command::Evaluate {
                context,
                trials,
                temperatures,
                mode,
                label,
            } => {
                assert_eq!(context, PathBuf::from("ctx.json"));
                assert_eq!(trials, Some(5));
                assert_eq!(temperatures, vec![0.2, 0.9]);
                assert_eq!(mode, Some(GenerationMode::Chained));
                assert!(label.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_mode_is_rejected() {
        let result = Cli::try_parse_from([
            "restab", "evaluate", "--context", "ctx.json", "--mode", "batch",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["restab", "taxonomy", "--log", "debug"]).unwrap();
        assert_eq!(cli.log.as_deref(), Some("debug"));
        assert!(matches!(cli.command, Command::Taxonomy));
    }
}
