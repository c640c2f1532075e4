//! In-memory collaborators that record every call they receive.
use crate::bridge::{BridgeError, Credentials, DesktopBridge};
use crate::firestore::{StorageBackend, StorageError};
use crate::turk::{PlatformError, RecruitmentClient};
use crate::types::Datum;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::time::Instant;

#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    Send(String, Value),
    RecordTrialData(Datum),
    SaveData,
    CompleteHit,
    InitParticipant(String, String, String),
    Append(Datum),
}

/// Shared, ordered log of calls across every double.
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<(Call, Instant)>>>);

impl CallLog {
    pub fn push(&self, call: Call) {
        self.0.lock().push((call, Instant::now()));
    }

    pub fn calls(&self) -> Vec<(Call, Instant)> {
        self.0.lock().clone()
    }

    pub fn kinds(&self) -> Vec<Call> {
        self.0.lock().iter().map(|(call, _)| call.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }
}

pub struct RecordingBridge {
    log: CallLog,
    credentials: Credentials,
}

impl RecordingBridge {
    pub fn new(log: CallLog) -> Self {
        Self::with_credentials(log, Credentials::default())
    }

    pub fn with_credentials(log: CallLog, credentials: Credentials) -> Self {
        RecordingBridge { log, credentials }
    }
}

impl DesktopBridge for RecordingBridge {
    fn sync_credentials(&self) -> Result<Credentials, BridgeError> {
        Ok(self.credentials.clone())
    }

    fn send(&self, channel: &str, payload: &Value) -> Result<(), BridgeError> {
        self.log.push(Call::Send(channel.to_string(), payload.clone()));
        Ok(())
    }
}

pub struct RecordingPlatform {
    log: CallLog,
}

impl RecordingPlatform {
    pub fn new(log: CallLog) -> Self {
        RecordingPlatform { log }
    }
}

#[async_trait]
impl RecruitmentClient for RecordingPlatform {
    fn record_trial_data(&self, datum: &Datum) -> Result<(), PlatformError> {
        self.log.push(Call::RecordTrialData(datum.clone()));
        Ok(())
    }

    async fn save_data(&self) -> Result<(), PlatformError> {
        self.log.push(Call::SaveData);
        Ok(())
    }

    async fn complete_hit(&self) -> Result<(), PlatformError> {
        self.log.push(Call::CompleteHit);
        Ok(())
    }
}

/// Storage double whose login verdicts can be released one at a time.
pub struct ScriptedStorage {
    log: CallLog,
    verdicts: Mutex<VecDeque<oneshot::Receiver<bool>>>,
    default_verdict: bool,
}

impl ScriptedStorage {
    pub fn accepting(log: CallLog) -> Self {
        Self::with_default(log, true)
    }

    pub fn refusing(log: CallLog) -> Self {
        Self::with_default(log, false)
    }

    fn with_default(log: CallLog, default_verdict: bool) -> Self {
        ScriptedStorage {
            log,
            verdicts: Mutex::new(VecDeque::new()),
            default_verdict,
        }
    }

    /// The n-th login check waits for the n-th returned sender.
    pub fn scripted(log: CallLog, attempts: usize) -> (Self, Vec<oneshot::Sender<bool>>) {
        let (senders, receivers): (Vec<_>, VecDeque<_>) =
            (0..attempts).map(|_| oneshot::channel()).unzip();
        let storage = ScriptedStorage {
            log,
            verdicts: Mutex::new(receivers),
            default_verdict: false,
        };
        (storage, senders)
    }
}

#[async_trait]
impl StorageBackend for ScriptedStorage {
    async fn init_participant(
        &self,
        participant_id: &str,
        study_id: &str,
        start_date: &str,
    ) -> bool {
        self.log.push(Call::InitParticipant(
            participant_id.into(),
            study_id.into(),
            start_date.into(),
        ));
        let verdict = self.verdicts.lock().pop_front();
        match verdict {
            Some(rx) => rx.await.unwrap_or(false),
            None => self.default_verdict,
        }
    }

    async fn append(&self, datum: &Datum) -> Result<(), StorageError> {
        self.log.push(Call::Append(datum.clone()));
        Ok(())
    }
}
