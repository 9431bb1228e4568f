mod config;
mod telemetry;

use clap::{Args, Parser};
use std::path::PathBuf;

#[derive(Parser)]
#[command(version, about = "Collects airdrop qualifier sign-ups")]
enum CliCommand {
    /// Serve the intake API
    Run(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    /// YAML config file; defaults apply when omitted
    #[arg(long, env = "AIRDROP_CONFIG")]
    config_path: Option<PathBuf>,
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    #[error(transparent)]
    Metrics(#[from] telemetry::MetricsInitError),
    #[error("could not start runtime: {0}")]
    Runtime(std::io::Error),
    #[error(transparent)]
    Intake(#[from] intake::IntakeError),
}

fn main() {
    dotenvy::dotenv().ok();
    let cli = CliCommand::parse();

    let result = match cli {
        CliCommand::Run(args) => run(args),
    };

    if let Err(e) = result {
        eprintln!("airdrop: {e}");
        std::process::exit(1);
    }
}

fn run(args: RunArgs) -> Result<(), CliError> {
    let config = config::Config::load(args.config_path.as_deref())?;

    let _sentry = telemetry::init_logging(config.common.logging.as_ref());
    if let Some(metrics) = &config.common.metrics {
        telemetry::init_metrics(metrics)?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(CliError::Runtime)?;

    runtime.block_on(intake::run(config.intake))?;
    Ok(())
}
