//! Extraction of participant and study identifiers from the launch environment.
use crate::bridge::Credentials;
use crate::types::Identity;
use url::Url;

pub const PROLIFIC_PID_PARAM: &str = "PROLIFIC_PID";

const PREVIEW_ASSIGNMENT_ID: &str = "ASSIGNMENT_ID_NOT_AVAILABLE";

/// Returns the first non-empty value of a query parameter.
pub fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(key, value)| key == name && !value.is_empty())
        .map(|(_, value)| value.into_owned())
}

/// The participant id assigned by Prolific, if the landing URL carries one.
pub fn prolific_id(url: Option<&Url>) -> Option<String> {
    url.and_then(|u| query_param(u, PROLIFIC_PID_PARAM))
}

/// Assignment details Mechanical Turk appends to the task URL.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TurkInfo {
    pub worker_id: Option<String>,
    pub assignment_id: Option<String>,
    pub hit_id: Option<String>,
    pub turk_submit_to: Option<String>,
    pub preview_mode: bool,
    pub outside_turk: bool,
}

impl TurkInfo {
    pub fn from_url(url: Option<&Url>) -> Self {
        let param = |name: &str| url.and_then(|u| query_param(u, name));

        let worker_id = param("workerId");
        let assignment_id = param("assignmentId");
        let hit_id = param("hitId");
        let turk_submit_to = param("turkSubmitTo");

        let preview_mode = assignment_id.as_deref() == Some(PREVIEW_ASSIGNMENT_ID);
        let outside_turk =
            !preview_mode && worker_id.is_none() && assignment_id.is_none() && hit_id.is_none();

        TurkInfo {
            worker_id,
            assignment_id,
            hit_id,
            turk_submit_to,
            preview_mode,
            outside_turk,
        }
    }

    /// `workerId:assignmentId`, the key psiTurk stores a participant under.
    /// Missing parts are left empty.
    pub fn unique_id(&self) -> String {
        format!(
            "{}:{}",
            self.worker_id.as_deref().unwrap_or_default(),
            self.assignment_id.as_deref().unwrap_or_default()
        )
    }
}

impl From<Credentials> for Identity {
    fn from(credentials: Credentials) -> Self {
        Identity {
            participant_id: credentials.env_participant_id.unwrap_or_default(),
            study_id: credentials.env_study_id.unwrap_or_default(),
        }
    }
}
