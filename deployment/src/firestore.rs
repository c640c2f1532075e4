//! Storage backend over the Firestore REST API.
//!
//! Documents are laid out per study and participant:
//!
//! ```text
//! <collection>/<study_id>/participants/<participant_id>/data/<start_date>
//!   └─ trials/trial_<trial_index>
//! ```
//!
//! The session document doubles as the login check: security rules on the
//! project only allow it to be written for registered participants.

use crate::config::FirebaseConfig;
use crate::types::Datum;
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde_json::{Map, Value, json};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://firestore.googleapis.com/v1/";

#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("request failed: {0}")]
    ReqwestError(#[from] reqwest::Error),
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("datum is missing required field: {0}")]
    MissingField(&'static str),
    #[error("storage returned {0}")]
    UnexpectedStatus(StatusCode),
}

#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Registers the session. `false` covers both refusal and an unreachable backend.
    async fn init_participant(
        &self,
        participant_id: &str,
        study_id: &str,
        start_date: &str,
    ) -> bool;

    /// Writes one trial.
    async fn append(&self, datum: &Datum) -> Result<(), StorageError>;
}

pub struct FirestoreClient {
    client: reqwest::Client,
    base_url: Url,
    project_id: String,
    collection: String,
    api_key: Option<String>,
}

impl FirestoreClient {
    pub fn new(config: &FirebaseConfig) -> Result<Self, StorageError> {
        let base_url = match &config.base_url {
            Some(url) => url.clone(),
            None => Url::parse(DEFAULT_BASE_URL)
                .map_err(|e| StorageError::InvalidUrl(e.to_string()))?,
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;

        Ok(FirestoreClient {
            client,
            base_url,
            project_id: config.project_id.clone(),
            collection: config.collection.clone(),
            api_key: config.api_key.clone(),
        })
    }

    fn document_url(&self, path: &[&str]) -> Result<Url, StorageError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| StorageError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend([
                "projects",
                self.project_id.as_str(),
                "databases",
                "(default)",
                "documents",
                self.collection.as_str(),
            ])
            .extend(path);
        if let Some(key) = &self.api_key {
            url.query_pairs_mut().append_pair("key", key);
        }
        Ok(url)
    }

    fn session_url(
        &self,
        participant_id: &str,
        study_id: &str,
        start_date: &str,
    ) -> Result<Url, StorageError> {
        self.document_url(&[study_id, "participants", participant_id, "data", start_date])
    }

    fn trial_url(&self, datum: &Datum) -> Result<Url, StorageError> {
        let field = |key: &'static str| {
            datum
                .get(key)
                .and_then(Value::as_str)
                .ok_or(StorageError::MissingField(key))
        };
        let trial_index = datum
            .get("trial_index")
            .and_then(Value::as_u64)
            .ok_or(StorageError::MissingField("trial_index"))?;
        let trial = format!("trial_{trial_index}");

        self.document_url(&[
            field("study_id")?,
            "participants",
            field("participant_id")?,
            "data",
            field("start_date")?,
            "trials",
            trial.as_str(),
        ])
    }

    async fn write(&self, url: Url, fields: Map<String, Value>) -> Result<(), StorageError> {
        let response = self
            .client
            .patch(url)
            .json(&json!({ "fields": fields }))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(StorageError::UnexpectedStatus(status));
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for FirestoreClient {
    async fn init_participant(
        &self,
        participant_id: &str,
        study_id: &str,
        start_date: &str,
    ) -> bool {
        let url = match self.session_url(participant_id, study_id, start_date) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(error = %e, "Could not build session document URL");
                return false;
            }
        };

        let mut fields = Map::new();
        fields.insert("start_time".into(), to_firestore_value(&json!(start_date)));
        fields.insert(
            "app_version".into(),
            to_firestore_value(&json!(env!("CARGO_PKG_VERSION"))),
        );
        fields.insert(
            "app_platform".into(),
            to_firestore_value(&json!(std::env::consts::OS)),
        );

        match self.write(url, fields).await {
            Ok(()) => true,
            Err(e) => {
                tracing::info!(error = %e, participant_id, study_id, "Participant not registered");
                false
            }
        }
    }

    async fn append(&self, datum: &Datum) -> Result<(), StorageError> {
        let url = self.trial_url(datum)?;
        let fields = datum
            .iter()
            .map(|(key, value)| (key.clone(), to_firestore_value(value)))
            .collect();
        self.write(url, fields).await
    }
}

/// Encodes a JSON value in the typed representation the REST API expects.
pub fn to_firestore_value(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Number(n) => match n.as_i64() {
            // 64-bit integers travel as strings
            Some(i) => json!({ "integerValue": i.to_string() }),
            None => json!({ "doubleValue": n.as_f64() }),
        },
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(items) => {
            let values: Vec<Value> = items.iter().map(to_firestore_value).collect();
            json!({ "arrayValue": { "values": values } })
        }
        Value::Object(map) => {
            let fields: Map<String, Value> = map
                .iter()
                .map(|(key, value)| (key.clone(), to_firestore_value(value)))
                .collect();
            json!({ "mapValue": { "fields": fields } })
        }
    }
}
