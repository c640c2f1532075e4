//! One-shot selection of the deployment method.
//!
//! Branches are tried in a fixed order and the first match wins:
//! desktop shell, Mechanical Turk, Prolific (through Firebase), Firebase,
//! and finally rejection when nothing usable is configured.

use crate::bridge::{BridgeError, DesktopBridge};
use crate::config::FeatureFlags;
use crate::identity::{TurkInfo, prolific_id};
use crate::metrics_defs::RESOLUTIONS;
use crate::types::{DeploymentMethod, Identity, MTURK_STUDY_ID, PROLIFIC_STUDY_ID};
use shared::counter;
use url::Url;

#[derive(thiserror::Error, Debug)]
pub enum ResolveError {
    #[error("running inside the desktop shell but no bridge is available")]
    BridgeUnavailable,
    #[error("desktop bridge error: {0}")]
    Bridge(#[from] BridgeError),
}

/// What the resolver may inspect besides the feature flags.
#[derive(Clone, Copy, Default)]
pub struct Probes<'a> {
    pub bridge: Option<&'a dyn DesktopBridge>,
    /// The URL the participant arrived on
    pub location: Option<&'a Url>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    /// Identity is known and accepted without a prompt.
    LoggedIn {
        method: DeploymentMethod,
        identity: Identity,
    },
    /// Identity must be entered and validated by the backend.
    AwaitingLogin { method: DeploymentMethod },
    /// No usable backend. Terminal for the process.
    Rejected,
}

impl Resolution {
    pub fn method(&self) -> Option<DeploymentMethod> {
        match self {
            Resolution::LoggedIn { method, .. } | Resolution::AwaitingLogin { method } => {
                Some(*method)
            }
            Resolution::Rejected => None,
        }
    }

    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Resolution::LoggedIn { identity, .. } => Some(identity),
            _ => None,
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Resolution::Rejected)
    }

    fn outcome(&self) -> &'static str {
        match self {
            Resolution::LoggedIn { .. } => "logged_in",
            Resolution::AwaitingLogin { .. } => "awaiting_login",
            Resolution::Rejected => "rejected",
        }
    }
}

pub fn resolve(flags: &FeatureFlags, probes: &Probes<'_>) -> Result<Resolution, ResolveError> {
    let resolution = decide(flags, probes)?;

    let method = resolution.method().unwrap_or_default();
    tracing::info!(
        method = %method,
        outcome = resolution.outcome(),
        "Resolved deployment method"
    );
    counter!(RESOLUTIONS, "method" => method.as_str(), "outcome" => resolution.outcome())
        .increment(1);

    Ok(resolution)
}

fn decide(flags: &FeatureFlags, probes: &Probes<'_>) -> Result<Resolution, ResolveError> {
    if flags.is_electron {
        let bridge = probes.bridge.ok_or(ResolveError::BridgeUnavailable)?;
        let identity = Identity::from(bridge.sync_credentials()?);
        return Ok(Resolution::LoggedIn {
            method: DeploymentMethod::Desktop,
            identity,
        });
    }

    if flags.mturk {
        let turk_info = TurkInfo::from_url(probes.location);
        tracing::debug!(
            outside_turk = turk_info.outside_turk,
            preview_mode = turk_info.preview_mode,
            turk_submit_to = ?turk_info.turk_submit_to,
            "Read MTurk assignment"
        );
        return Ok(Resolution::LoggedIn {
            method: DeploymentMethod::MTurk,
            identity: Identity::new(turk_info.unique_id(), MTURK_STUDY_ID),
        });
    }

    if flags.prolific {
        return Ok(match prolific_id(probes.location) {
            Some(participant_id) if flags.firebase => Resolution::LoggedIn {
                method: DeploymentMethod::Firebase,
                identity: Identity::new(participant_id, PROLIFIC_STUDY_ID),
            },
            _ => Resolution::Rejected,
        });
    }

    if flags.firebase {
        return Ok(Resolution::AwaitingLogin {
            method: DeploymentMethod::Firebase,
        });
    }

    Ok(Resolution::Rejected)
}
