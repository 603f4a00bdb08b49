// Restab
// Main entry point for the restab binary

use clap::Parser;
use restab_engine::cli::{Cli, Command};
use restab_engine::config::Config;
use restab_engine::handlers::{
    handle_evaluate, handle_runs, handle_show, handle_taxonomy, EvaluateArgs, OutputFormat,
};
use restab_engine::telemetry::{init_telemetry_with_level, resolve_level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    let config = if let Some(config_path) = &cli.config {
        Config::load_from_path(config_path)?
    } else {
        Config::load_or_create()?
    };

    // RUST_LOG still takes precedence inside the filter
    init_telemetry_with_level(resolve_level(
        cli.log.as_deref(),
        Some(config.core.log_level.as_str()),
    ));

    let version = env!("CARGO_PKG_VERSION");
    let commit = env!("GIT_COMMIT_HASH");
    let timestamp = env!("BUILD_TIMESTAMP");

    tracing::info!("Restab v{} ({} - {})", version, commit, timestamp);

    match cli.command {
        Command::Evaluate {
            context,
            trials,
            temperatures,
            mode,
            label,
        } => {
            tracing::info!("Evaluating context: {}", context.display());
            let args = EvaluateArgs {
                context,
                trials,
                temperatures,
                mode,
                label,
            };
            handle_evaluate(args, &config, format).await
        }

        Command::Show { run_dir } => handle_show(&run_dir, format).await,

        Command::Runs => handle_runs(&config, format).await,

        Command::Taxonomy => handle_taxonomy(&config, format).await,
    }
}
