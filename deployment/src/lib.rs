pub mod bridge;
pub mod config;
pub mod firestore;
pub mod identity;
pub mod metrics_defs;
pub mod resolver;
pub mod session;
pub mod sink;
pub mod turk;
pub mod types;

#[cfg(test)]
mod testutils;

use bridge::DesktopBridge;
use config::Config;
use firestore::{FirestoreClient, StorageError};
use resolver::Resolution;
use sink::{DesktopSink, FirebaseSink, SinkRegistry, TurkSink};
use std::sync::Arc;
use std::time::Duration;
use turk::PsiTurkClient;
use types::DeploymentMethod;

pub use resolver::{Probes, resolve};
pub use session::{LoginOutcome, REJECTION_MESSAGE, SessionGate, SessionState};
pub use types::{Datum, Identity};

#[derive(thiserror::Error, Debug)]
pub enum BuildError {
    #[error("could not create storage client: {0}")]
    Storage(#[from] StorageError),
}

/// Creates the sinks available to a resolved session.
///
/// The Mechanical Turk client is keyed by the worker's unique id, so its sink
/// only exists once resolution has picked that method.
pub fn build_registry(
    config: &Config,
    resolution: &Resolution,
    bridge: Option<Arc<dyn DesktopBridge>>,
    start_date: &str,
) -> Result<SinkRegistry, BuildError> {
    let mut registry = SinkRegistry::new();

    if let Some(bridge) = bridge {
        registry = registry.with_sink(Arc::new(DesktopSink::new(bridge)));
    }

    if let (Some(turk_config), Some(identity)) = (&config.mturk, resolution.identity())
        && resolution.method() == Some(DeploymentMethod::MTurk)
    {
        let client = PsiTurkClient::new(turk_config, identity.participant_id.clone());
        registry = registry.with_sink(Arc::new(TurkSink::new(
            Arc::new(client),
            Duration::from_secs(turk_config.grace_period_secs),
        )));
    }

    if let Some(firebase_config) = &config.firebase
        && config.features.firebase
    {
        let storage = FirestoreClient::new(firebase_config)?;
        registry = registry.with_sink(Arc::new(FirebaseSink::new(Arc::new(storage), start_date)));
    }

    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::{CallLog, RecordingBridge};

    fn config() -> Config {
        serde_yaml::from_str(
            r#"
            features:
                mturk: true
                firebase: true
            mturk:
                base_url: http://127.0.0.1:22362/
            firebase:
                project_id: honeycomb
            "#,
        )
        .unwrap()
    }

    #[test]
    fn test_build_registry_for_mturk() {
        let resolution = Resolution::LoggedIn {
            method: DeploymentMethod::MTurk,
            identity: Identity::new("W1:A1", "mturk"),
        };
        let registry = build_registry(&config(), &resolution, None, "t0").unwrap();

        assert!(registry.sink_for(DeploymentMethod::MTurk).is_ok());
        assert!(registry.sink_for(DeploymentMethod::Firebase).is_ok());
        assert!(registry.sink_for(DeploymentMethod::Desktop).is_err());
    }

    #[test]
    fn test_build_registry_without_turk_identity() {
        let resolution = Resolution::AwaitingLogin {
            method: DeploymentMethod::Firebase,
        };
        let bridge: Arc<dyn DesktopBridge> = Arc::new(RecordingBridge::new(CallLog::default()));
        let registry = build_registry(&config(), &resolution, Some(bridge), "t0").unwrap();

        assert!(registry.sink_for(DeploymentMethod::MTurk).is_err());
        assert!(registry.sink_for(DeploymentMethod::Firebase).is_ok());
        assert!(registry.sink_for(DeploymentMethod::Desktop).is_ok());
    }
}
