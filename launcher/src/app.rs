use crate::login;
use crate::trials;
use deployment::bridge::{DesktopBridge, LocalBridge};
use deployment::config::Config as DeploymentConfig;
use deployment::identity::TurkInfo;
use deployment::resolver::ResolveError;
use deployment::session::GateError;
use deployment::types::start_timestamp;
use deployment::{
    BuildError, Probes, REJECTION_MESSAGE, SessionGate, SessionState, build_registry, resolve,
};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use url::Url;

#[derive(thiserror::Error, Debug)]
pub enum LauncherError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not resolve deployment method: {0}")]
    Resolve(#[from] ResolveError),
    #[error("could not set up sinks: {0}")]
    Build(#[from] BuildError),
    #[error("{0}")]
    Gate(#[from] GateError),
    #[error("could not encode session: {0}")]
    Json(#[from] serde_json::Error),
    #[error("input closed before login completed")]
    LoginAborted,
}

/// Resolves the deployment method and binds a fresh session to it.
pub fn prepare(
    config: &DeploymentConfig,
    location: Option<&Url>,
) -> Result<Arc<SessionGate>, LauncherError> {
    let features = config.features;
    let experiment = &config.experiment;
    tracing::info!(
        mturk = features.mturk,
        firebase = features.firebase,
        prolific = features.prolific,
        is_electron = features.is_electron,
        video = experiment.video,
        volume = ?experiment.volume,
        use_event_marker = experiment.use_event_marker,
        use_photodiode = experiment.use_photodiode,
        outside_turk = TurkInfo::from_url(location).outside_turk,
        "Starting launcher"
    );

    let start_date = start_timestamp();

    let bridge: Option<Arc<dyn DesktopBridge>> = if features.is_electron {
        config
            .desktop
            .as_ref()
            .map(|desktop| Arc::new(LocalBridge::new(desktop)) as Arc<dyn DesktopBridge>)
    } else {
        None
    };

    let probes = Probes {
        bridge: bridge.as_deref(),
        location,
    };
    let resolution = resolve(&features, &probes)?;
    let registry = build_registry(config, &resolution, bridge.clone(), &start_date)?;

    let gate = Arc::new(SessionGate::new(start_date));
    gate.apply(resolution, &registry)?;
    Ok(gate)
}

pub fn resolve_only(
    config: &DeploymentConfig,
    location: Option<&Url>,
) -> Result<ExitCode, LauncherError> {
    let gate = prepare(config, location)?;
    println!("{}", serde_json::to_string_pretty(&gate.session())?);

    if gate.state() == SessionState::Rejected {
        eprintln!("{REJECTION_MESSAGE}");
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

pub async fn run(
    config: &DeploymentConfig,
    location: Option<&Url>,
    trials_path: &Path,
) -> Result<ExitCode, LauncherError> {
    let gate = prepare(config, location)?;
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    match gate.state() {
        SessionState::Rejected => {
            eprintln!("{REJECTION_MESSAGE}");
            return Ok(ExitCode::FAILURE);
        }
        SessionState::AwaitingLogin => login::prompt(&gate, &mut stdin).await?,
        SessionState::LoggedIn | SessionState::Unresolved => {}
    }

    let recorded = if trials_path == Path::new("-") {
        trials::feed(&gate, &mut stdin).await?
    } else {
        let file = tokio::fs::File::open(trials_path).await?;
        trials::feed(&gate, &mut BufReader::new(file).lines()).await?
    };

    gate.finish().await?;
    tracing::info!(recorded, "All trials recorded");
    Ok(ExitCode::SUCCESS)
}
