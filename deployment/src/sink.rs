use crate::bridge::{BridgeError, DATA_CHANNEL, DesktopBridge, END_CHANNEL};
use crate::firestore::{StorageBackend, StorageError};
use crate::turk::{PlatformError, RecruitmentClient};
use crate::types::{Datum, DeploymentMethod, Identity};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::{Duration, sleep};

/// Default wait between saving data and signaling completion on Mechanical Turk.
pub const TURK_GRACE_PERIOD: Duration = Duration::from_secs(5);

#[derive(thiserror::Error, Debug)]
pub enum SinkError {
    #[error("desktop bridge error: {0}")]
    Bridge(#[from] BridgeError),
    #[error("recruitment platform error: {0}")]
    Platform(#[from] PlatformError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum RegistryError {
    #[error("no sink registered for method `{0}`")]
    MissingSink(DeploymentMethod),
}

/// Destination for the data a logged-in session produces.
#[async_trait]
pub trait DataSink: Send + Sync {
    fn method(&self) -> DeploymentMethod;

    /// Checks identity supplied at a login prompt.
    async fn validate(&self, _identity: &Identity) -> bool {
        true
    }

    async fn record_datum(&self, datum: Datum) -> Result<(), SinkError>;

    async fn finish(&self) -> Result<(), SinkError>;
}

/// Forwards data to the desktop shell.
pub struct DesktopSink {
    bridge: Arc<dyn DesktopBridge>,
}

impl DesktopSink {
    pub fn new(bridge: Arc<dyn DesktopBridge>) -> Self {
        DesktopSink { bridge }
    }
}

#[async_trait]
impl DataSink for DesktopSink {
    fn method(&self) -> DeploymentMethod {
        DeploymentMethod::Desktop
    }

    async fn record_datum(&self, datum: Datum) -> Result<(), SinkError> {
        self.bridge.send(DATA_CHANNEL, &Value::Object(datum))?;
        Ok(())
    }

    async fn finish(&self) -> Result<(), SinkError> {
        self.bridge.send(END_CHANNEL, &Value::String("true".into()))?;
        Ok(())
    }
}

/// Buffers trials with the recruitment platform and completes the HIT on finish.
pub struct TurkSink {
    client: Arc<dyn RecruitmentClient>,
    grace_period: Duration,
}

impl TurkSink {
    pub fn new(client: Arc<dyn RecruitmentClient>, grace_period: Duration) -> Self {
        TurkSink {
            client,
            grace_period,
        }
    }
}

#[async_trait]
impl DataSink for TurkSink {
    fn method(&self) -> DeploymentMethod {
        DeploymentMethod::MTurk
    }

    async fn record_datum(&self, datum: Datum) -> Result<(), SinkError> {
        self.client.record_trial_data(&datum)?;
        Ok(())
    }

    // Completing before the saved data lands lets the platform close the task early.
    async fn finish(&self) -> Result<(), SinkError> {
        self.client.save_data().await?;
        sleep(self.grace_period).await;
        self.client.complete_hit().await?;
        Ok(())
    }
}

/// Appends every trial to the storage backend. Writes are durable individually.
pub struct FirebaseSink {
    storage: Arc<dyn StorageBackend>,
    start_date: String,
}

impl FirebaseSink {
    pub fn new(storage: Arc<dyn StorageBackend>, start_date: &str) -> Self {
        FirebaseSink {
            storage,
            start_date: start_date.to_string(),
        }
    }
}

#[async_trait]
impl DataSink for FirebaseSink {
    fn method(&self) -> DeploymentMethod {
        DeploymentMethod::Firebase
    }

    async fn validate(&self, identity: &Identity) -> bool {
        self.storage
            .init_participant(
                &identity.participant_id,
                &identity.study_id,
                &self.start_date,
            )
            .await
    }

    async fn record_datum(&self, datum: Datum) -> Result<(), SinkError> {
        self.storage.append(&datum).await?;
        Ok(())
    }

    async fn finish(&self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Discards everything. Bound before a method is resolved.
pub struct NoopSink;

#[async_trait]
impl DataSink for NoopSink {
    fn method(&self) -> DeploymentMethod {
        DeploymentMethod::Default
    }

    async fn record_datum(&self, _datum: Datum) -> Result<(), SinkError> {
        Ok(())
    }

    async fn finish(&self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Fixed table from deployment method to sink.
#[derive(Clone)]
pub struct SinkRegistry {
    sinks: HashMap<DeploymentMethod, Arc<dyn DataSink>>,
}

impl Default for SinkRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SinkRegistry {
    /// A registry holding only the no-op default sink.
    pub fn new() -> Self {
        let default: Arc<dyn DataSink> = Arc::new(NoopSink);
        SinkRegistry {
            sinks: HashMap::from([(DeploymentMethod::Default, default)]),
        }
    }

    /// Registers a sink under the method it reports, replacing any previous entry.
    pub fn with_sink(mut self, sink: Arc<dyn DataSink>) -> Self {
        self.sinks.insert(sink.method(), sink);
        self
    }

    pub fn sink_for(&self, method: DeploymentMethod) -> Result<Arc<dyn DataSink>, RegistryError> {
        self.sinks
            .get(&method)
            .cloned()
            .ok_or(RegistryError::MissingSink(method))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::{Call, CallLog, RecordingBridge, RecordingPlatform, ScriptedStorage};
    use serde_json::json;

    fn datum(trial_index: u64) -> Datum {
        json!({ "trial_index": trial_index })
            .as_object()
            .cloned()
            .unwrap()
    }

    fn all_sinks(log: &CallLog) -> SinkRegistry {
        SinkRegistry::new()
            .with_sink(Arc::new(DesktopSink::new(Arc::new(RecordingBridge::new(
                log.clone(),
            )))))
            .with_sink(Arc::new(TurkSink::new(
                Arc::new(RecordingPlatform::new(log.clone())),
                TURK_GRACE_PERIOD,
            )))
            .with_sink(Arc::new(FirebaseSink::new(
                Arc::new(ScriptedStorage::accepting(log.clone())),
                "t0",
            )))
    }

    #[tokio::test(start_paused = true)]
    async fn test_turk_finish_waits_for_grace_period() {
        let log = CallLog::default();
        let sink = all_sinks(&log).sink_for(DeploymentMethod::MTurk).unwrap();

        sink.record_datum(datum(0)).await.unwrap();
        sink.record_datum(datum(1)).await.unwrap();
        sink.finish().await.unwrap();

        let calls = log.calls();
        assert_eq!(
            calls.iter().map(|(call, _)| call.clone()).collect::<Vec<_>>(),
            vec![
                Call::RecordTrialData(datum(0)),
                Call::RecordTrialData(datum(1)),
                Call::SaveData,
                Call::CompleteHit,
            ]
        );
        let saved_at = calls[2].1;
        let completed_at = calls[3].1;
        assert!(completed_at - saved_at >= TURK_GRACE_PERIOD);
    }

    #[tokio::test]
    async fn test_desktop_sink_messages() {
        let log = CallLog::default();
        let sink = all_sinks(&log).sink_for(DeploymentMethod::Desktop).unwrap();

        sink.record_datum(datum(0)).await.unwrap();
        sink.finish().await.unwrap();

        assert_eq!(
            log.kinds(),
            vec![
                Call::Send(DATA_CHANNEL.into(), json!({ "trial_index": 0 })),
                Call::Send(END_CHANNEL.into(), json!("true")),
            ]
        );
    }

    #[tokio::test]
    async fn test_firebase_sink_calls() {
        let log = CallLog::default();
        let sink = all_sinks(&log).sink_for(DeploymentMethod::Firebase).unwrap();

        assert!(sink.validate(&Identity::new("p1", "s1")).await);
        sink.record_datum(datum(3)).await.unwrap();
        sink.finish().await.unwrap();

        assert_eq!(
            log.kinds(),
            vec![
                Call::InitParticipant("p1".into(), "s1".into(), "t0".into()),
                Call::Append(datum(3)),
            ]
        );
    }

    #[tokio::test]
    async fn test_firebase_refusal() {
        let log = CallLog::default();
        let sink = FirebaseSink::new(Arc::new(ScriptedStorage::refusing(log.clone())), "t0");
        assert!(!sink.validate(&Identity::new("unknown", "s1")).await);
        assert_eq!(log.len(), 1);
    }

    #[tokio::test]
    async fn test_finish_does_not_leak_across_sinks() {
        for method in [DeploymentMethod::Desktop, DeploymentMethod::Firebase] {
            let log = CallLog::default();
            let sink = all_sinks(&log).sink_for(method).unwrap();
            sink.finish().await.unwrap();

            for call in log.kinds() {
                let owned = match call {
                    Call::Send(..) => DeploymentMethod::Desktop,
                    Call::RecordTrialData(_) | Call::SaveData | Call::CompleteHit => {
                        DeploymentMethod::MTurk
                    }
                    Call::InitParticipant(..) | Call::Append(_) => DeploymentMethod::Firebase,
                };
                assert_eq!(owned, method, "{method} finish made a foreign call");
            }
        }
    }

    #[tokio::test]
    async fn test_registry() {
        let registry = SinkRegistry::new();
        let default = registry.sink_for(DeploymentMethod::Default).unwrap();
        assert!(default.validate(&Identity::default()).await);
        assert!(default.record_datum(datum(0)).await.is_ok());
        assert!(default.finish().await.is_ok());

        assert_eq!(
            registry.sink_for(DeploymentMethod::MTurk).err(),
            Some(RegistryError::MissingSink(DeploymentMethod::MTurk))
        );

        // Repeated lookups hand out the same instance
        let log = CallLog::default();
        let registry = all_sinks(&log);
        let first = registry.sink_for(DeploymentMethod::Firebase).unwrap();
        let second = registry.sink_for(DeploymentMethod::Firebase).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }
}
