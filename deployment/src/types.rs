use serde::{Deserialize, Serialize};
use std::fmt;

/// One trial record produced by the experiment.
pub type Datum = serde_json::Map<String, serde_json::Value>;

/// Study id stamped on sessions admitted through Prolific.
pub const PROLIFIC_STUDY_ID: &str = "prolific";

/// Study id stamped on sessions admitted through Mechanical Turk.
pub const MTURK_STUDY_ID: &str = "mturk";

/// Where trial data and the completion signal are sent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentMethod {
    Desktop,
    #[serde(rename = "mturk")]
    MTurk,
    Firebase,
    #[default]
    Default,
}

impl DeploymentMethod {
    pub const fn as_str(&self) -> &'static str {
        match self {
            DeploymentMethod::Desktop => "desktop",
            DeploymentMethod::MTurk => "mturk",
            DeploymentMethod::Firebase => "firebase",
            DeploymentMethod::Default => "default",
        }
    }
}

impl fmt::Display for DeploymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Participant and study identifiers. Either field may be empty.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub participant_id: String,
    pub study_id: String,
}

impl Identity {
    pub fn new<P, S>(participant_id: P, study_id: S) -> Self
    where
        P: Into<String>,
        S: Into<String>,
    {
        Identity {
            participant_id: participant_id.into(),
            study_id: study_id.into(),
        }
    }
}

/// Identity fields written into every datum of a logged-in session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SessionMetadata {
    pub participant_id: String,
    pub study_id: String,
    pub start_date: String,
}

impl SessionMetadata {
    pub fn new(identity: Identity, start_date: &str) -> Self {
        SessionMetadata {
            participant_id: identity.participant_id,
            study_id: identity.study_id,
            start_date: start_date.to_string(),
        }
    }

    /// Writes the identity keys into the datum, replacing any existing values.
    pub fn stamp(&self, datum: &mut Datum) {
        datum.insert("participant_id".into(), self.participant_id.clone().into());
        datum.insert("study_id".into(), self.study_id.clone().into());
        datum.insert("start_date".into(), self.start_date.clone().into());
    }
}

/// Point-in-time view of the session record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Session {
    pub logged_in: bool,
    pub rejected: bool,
    pub method: DeploymentMethod,
    pub start_timestamp: String,
}

/// Current time in the `YYYY-MM-DDTHH:MM:SS.mmmZ` shape used for `start_date`.
pub fn start_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
