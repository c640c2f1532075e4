use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("feature `{0}` is enabled but its backend section is missing")]
    MissingBackend(&'static str),

    #[error("firebase project id cannot be empty")]
    EmptyProjectId,

    #[error("firebase collection cannot be empty")]
    EmptyCollection,

    #[error("environment variable name cannot be empty")]
    EmptyEnvVar,

    #[error("completion path must start with '/': {0}")]
    InvalidCompletionPath(String),
}

/// Switches read once at startup. Precedence between them is decided by the resolver.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FeatureFlags {
    pub mturk: bool,
    pub firebase: bool,
    pub prolific: bool,
    pub is_electron: bool,
}

/// Presentation options of the experiment itself. Only reported at startup.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExperimentOptions {
    pub video: bool,
    pub volume: Option<u8>,
    pub use_event_marker: bool,
    pub use_photodiode: bool,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct DesktopConfig {
    /// Root directory for per-participant data files
    pub output_dir: PathBuf,
    #[serde(default = "default_participant_env_var")]
    pub participant_env_var: String,
    #[serde(default = "default_study_env_var")]
    pub study_env_var: String,
}

fn default_participant_env_var() -> String {
    "REACT_APP_PARTICIPANT_ID".into()
}

fn default_study_env_var() -> String {
    "REACT_APP_STUDY_ID".into()
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct TurkConfig {
    /// Base URL of the psiTurk server
    pub base_url: Url,
    #[serde(default = "default_completion_path")]
    pub completion_path: String,
    /// Time between saving data and signaling completion
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,
}

fn default_completion_path() -> String {
    "/complete".into()
}

fn default_grace_period_secs() -> u64 {
    5
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct FirebaseConfig {
    pub project_id: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    pub api_key: Option<String>,
    /// Overrides the public Firestore REST endpoint
    pub base_url: Option<Url>,
    /// A request taking longer than this fails; a login check counts as refused
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_collection() -> String {
    "participant_responses".into()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub features: FeatureFlags,
    #[serde(default)]
    pub experiment: ExperimentOptions,
    pub desktop: Option<DesktopConfig>,
    pub mturk: Option<TurkConfig>,
    pub firebase: Option<FirebaseConfig>,
}

impl Config {
    /// Checks that every enabled feature has a usable backend section.
    ///
    /// Prolific only needs the firebase section when firebase is also enabled;
    /// otherwise the resolver rejects the session instead.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let features = &self.features;

        if features.is_electron {
            let desktop = self
                .desktop
                .as_ref()
                .ok_or(ValidationError::MissingBackend("is_electron"))?;
            if desktop.participant_env_var.is_empty() || desktop.study_env_var.is_empty() {
                return Err(ValidationError::EmptyEnvVar);
            }
        }

        if features.mturk {
            let mturk = self
                .mturk
                .as_ref()
                .ok_or(ValidationError::MissingBackend("mturk"))?;
            if !mturk.completion_path.starts_with('/') {
                return Err(ValidationError::InvalidCompletionPath(
                    mturk.completion_path.clone(),
                ));
            }
        }

        if features.firebase {
            let firebase = self
                .firebase
                .as_ref()
                .ok_or(ValidationError::MissingBackend("firebase"))?;
            if firebase.project_id.is_empty() {
                return Err(ValidationError::EmptyProjectId);
            }
            if firebase.collection.is_empty() {
                return Err(ValidationError::EmptyCollection);
            }
        }

        Ok(())
    }
}
