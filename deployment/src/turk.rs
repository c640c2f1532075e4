const BASE_DELAY: u64 = 500;

use crate::config::TurkConfig;
use crate::types::Datum;
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::{StatusCode, Url};
use serde::Serialize;
use serde_json::Value;
use tokio::time::{Duration, sleep};

#[derive(thiserror::Error, Debug)]
pub enum PlatformError {
    #[error("request failed: {0}")]
    ReqwestError(#[from] reqwest::Error),
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("platform returned {0}")]
    UnexpectedStatus(StatusCode),
    #[error("platform unavailable")]
    RetriesExceeded,
}

/// Client of the recruitment platform that pays the participant.
#[async_trait]
pub trait RecruitmentClient: Send + Sync {
    /// Buffers one trial locally. Nothing is sent until `save_data`.
    fn record_trial_data(&self, datum: &Datum) -> Result<(), PlatformError>;

    /// Persists every buffered trial.
    async fn save_data(&self) -> Result<(), PlatformError>;

    /// Tells the platform the task is done.
    async fn complete_hit(&self) -> Result<(), PlatformError>;
}

#[derive(Clone, Debug, Serialize, PartialEq)]
struct TrialRecord {
    uniqueid: String,
    current_trial: usize,
    #[serde(rename = "dateTime")]
    date_time: i64,
    trialdata: Value,
}

#[derive(Serialize)]
struct SyncPayload<'a> {
    uniqueid: &'a str,
    currenttrial: usize,
    data: &'a [TrialRecord],
}

/// psiTurk server client.
pub struct PsiTurkClient {
    client: reqwest::Client,
    base_url: Url,
    unique_id: String,
    completion_path: String,
    trials: Mutex<Vec<TrialRecord>>,
}

impl PsiTurkClient {
    pub fn new(config: &TurkConfig, unique_id: String) -> Self {
        PsiTurkClient {
            client: reqwest::Client::new(),
            base_url: config.base_url.clone(),
            unique_id,
            completion_path: config.completion_path.clone(),
            trials: Mutex::new(Vec::new()),
        }
    }

    fn sync_url(&self) -> Result<Url, PlatformError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| PlatformError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(["sync", self.unique_id.as_str()]);
        Ok(url)
    }

    fn completion_url(&self) -> Result<Url, PlatformError> {
        let mut url = self
            .base_url
            .join(&self.completion_path)
            .map_err(|e| PlatformError::InvalidUrl(e.to_string()))?;
        url.query_pairs_mut().append_pair("uniqueId", &self.unique_id);
        Ok(url)
    }

    fn buffered(&self) -> usize {
        self.trials.lock().len()
    }
}

#[async_trait]
impl RecruitmentClient for PsiTurkClient {
    fn record_trial_data(&self, datum: &Datum) -> Result<(), PlatformError> {
        let mut trials = self.trials.lock();
        let current_trial = trials.len();
        trials.push(TrialRecord {
            uniqueid: self.unique_id.clone(),
            current_trial,
            date_time: chrono::Utc::now().timestamp_millis(),
            trialdata: Value::Object(datum.clone()),
        });
        Ok(())
    }

    async fn save_data(&self) -> Result<(), PlatformError> {
        const RETRIABLE_STATUS_CODES: &[StatusCode] = &[
            StatusCode::TOO_MANY_REQUESTS,     // 429
            StatusCode::INTERNAL_SERVER_ERROR, // 500
            StatusCode::BAD_GATEWAY,           // 502
            StatusCode::SERVICE_UNAVAILABLE,   // 503
            StatusCode::GATEWAY_TIMEOUT,       // 504
        ];

        let url = self.sync_url()?;
        let trials = self.trials.lock().clone();
        let payload = SyncPayload {
            uniqueid: &self.unique_id,
            currenttrial: trials.len(),
            data: &trials,
        };

        let mut retries = 0;

        loop {
            let response = self.client.put(url.clone()).json(&payload).send().await?;
            let status = response.status();

            if status.is_success() {
                break;
            }

            if RETRIABLE_STATUS_CODES.contains(&status) && retries < 3 {
                // Backoff between retries
                let retry_millis = BASE_DELAY * 2_u64.pow(retries);
                tracing::warn!(%status, retry_millis, "Saving trial data failed, retrying");
                sleep(Duration::from_millis(retry_millis)).await;
                retries += 1;
                continue;
            }

            return Err(if retries > 0 {
                PlatformError::RetriesExceeded
            } else {
                PlatformError::UnexpectedStatus(status)
            });
        }

        tracing::info!(trials = self.buffered(), "Saved trial data to psiTurk");
        Ok(())
    }

    async fn complete_hit(&self) -> Result<(), PlatformError> {
        let response = self.client.get(self.completion_url()?).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PlatformError::UnexpectedStatus(status));
        }
        tracing::info!(unique_id = %self.unique_id, "Completed HIT");
        Ok(())
    }
}
