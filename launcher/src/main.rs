use clap::{Args, Parser};
use std::path::PathBuf;
use std::process::ExitCode;
use url::Url;

mod app;
mod config;
mod login;
mod telemetry;
mod trials;

use config::Config;

#[derive(Args)]
struct CommonArgs {
    /// Path to the YAML configuration file
    #[arg(long, short)]
    config: PathBuf,

    /// URL the participant arrived on; its query string carries recruitment ids
    #[arg(long)]
    url: Option<Url>,
}

#[derive(Parser)]
#[command(name = "launcher", version, about = "Routes experiment data to its deployment backend")]
enum CliCommand {
    /// Resolve the deployment method, log in and record trials
    Run {
        #[command(flatten)]
        common: CommonArgs,

        /// JSON-lines file of trial data, or `-` for stdin
        #[arg(long, default_value = "-")]
        trials: PathBuf,
    },
    /// Print the session the current configuration resolves to
    Resolve {
        #[command(flatten)]
        common: CommonArgs,
    },
}

fn main() -> ExitCode {
    let cli = CliCommand::parse();
    let common = match &cli {
        CliCommand::Run { common, .. } | CliCommand::Resolve { common } => common,
    };

    let config = match Config::from_file(&common.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let _telemetry = match telemetry::init(&config.common) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!(error = %e, "Could not start the runtime");
            return ExitCode::FAILURE;
        }
    };

    let location = common.url.as_ref();
    let result = rt.block_on(async {
        match &cli {
            CliCommand::Run { trials, .. } => app::run(&config.deployment, location, trials).await,
            CliCommand::Resolve { .. } => app::resolve_only(&config.deployment, location),
        }
    });

    match result {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "Launcher failed");
            ExitCode::FAILURE
        }
    }
}
