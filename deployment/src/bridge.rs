//! The desktop bridge connects the experiment to the shell it runs inside of.
//! The shell supplies participant credentials and persists trial data locally.

use crate::config::DesktopConfig;
use crate::types::Datum;
use parking_lot::Mutex;
use serde_json::Value;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

pub const DATA_CHANNEL: &str = "data";
pub const END_CHANNEL: &str = "end";

#[derive(thiserror::Error, Debug)]
pub enum BridgeError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("could not encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("unknown channel: {0}")]
    UnknownChannel(String),

    #[error("payload on channel `{0}` has the wrong shape")]
    InvalidPayload(&'static str),

    #[error("the bridge was closed by an end message")]
    Closed,
}

/// Identifiers the shell found in its own environment. Either may be missing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Credentials {
    pub env_participant_id: Option<String>,
    pub env_study_id: Option<String>,
}

pub trait DesktopBridge: Send + Sync {
    /// Blocking round trip to the shell.
    fn sync_credentials(&self) -> Result<Credentials, BridgeError>;

    /// Fire-and-forget message to the shell.
    fn send(&self, channel: &str, payload: &Value) -> Result<(), BridgeError>;
}

enum Output {
    Pending,
    Open { path: PathBuf, writer: BufWriter<File> },
    Closed,
}

/// Bridge for a shell running on the same machine: credentials come from
/// environment variables and data is appended to one JSON-lines file per session.
pub struct LocalBridge {
    output_dir: PathBuf,
    participant_env_var: String,
    study_env_var: String,
    output: Mutex<Output>,
}

impl LocalBridge {
    pub fn new(config: &DesktopConfig) -> Self {
        LocalBridge {
            output_dir: config.output_dir.clone(),
            participant_env_var: config.participant_env_var.clone(),
            study_env_var: config.study_env_var.clone(),
            output: Mutex::new(Output::Pending),
        }
    }

    /// Path of the file currently receiving data, once the first datum arrived.
    pub fn output_path(&self) -> Option<PathBuf> {
        match &*self.output.lock() {
            Output::Open { path, .. } => Some(path.clone()),
            _ => None,
        }
    }

    fn write_datum(&self, datum: &Datum) -> Result<(), BridgeError> {
        let mut output = self.output.lock();

        if let Output::Pending = *output {
            let path = session_file(&self.output_dir, datum);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            tracing::info!(path = %path.display(), "Writing session data");
            *output = Output::Open {
                path,
                writer: BufWriter::new(file),
            };
        }

        match &mut *output {
            Output::Open { writer, .. } => {
                serde_json::to_writer(&mut *writer, datum)?;
                writer.write_all(b"\n")?;
                writer.flush()?;
                Ok(())
            }
            Output::Closed => Err(BridgeError::Closed),
            Output::Pending => unreachable!("output was opened above"),
        }
    }

    fn close(&self) -> Result<(), BridgeError> {
        let previous = std::mem::replace(&mut *self.output.lock(), Output::Closed);
        match previous {
            Output::Open { mut writer, path } => {
                writer.flush()?;
                tracing::info!(path = %path.display(), "Closed session data file");
                Ok(())
            }
            Output::Pending => Ok(()),
            Output::Closed => Err(BridgeError::Closed),
        }
    }
}

impl DesktopBridge for LocalBridge {
    fn sync_credentials(&self) -> Result<Credentials, BridgeError> {
        Ok(Credentials {
            env_participant_id: non_empty_var(&self.participant_env_var),
            env_study_id: non_empty_var(&self.study_env_var),
        })
    }

    fn send(&self, channel: &str, payload: &Value) -> Result<(), BridgeError> {
        match channel {
            DATA_CHANNEL => {
                let datum = payload
                    .as_object()
                    .ok_or(BridgeError::InvalidPayload(DATA_CHANNEL))?;
                self.write_datum(datum)
            }
            END_CHANNEL => self.close(),
            other => Err(BridgeError::UnknownChannel(other.to_string())),
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

// <output_dir>/<study>/<participant>/<participant>_<start_date>.jsonl
fn session_file(output_dir: &Path, datum: &Datum) -> PathBuf {
    let field = |key: &str| {
        datum
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(sanitize)
            .unwrap_or_else(|| "unknown".to_string())
    };

    let participant = field("participant_id");
    let study = field("study_id");
    let start_date = field("start_date");

    output_dir
        .join(study)
        .join(&participant)
        .join(format!("{participant}_{start_date}.jsonl"))
}

fn sanitize(segment: &str) -> String {
    segment
        .chars()
        .map(|c| match c {
            ':' | '/' | '\\' => '-',
            c => c,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::{BufRead, BufReader};

    fn get_bridge(dir: &tempfile::TempDir) -> LocalBridge {
        LocalBridge::new(&DesktopConfig {
            output_dir: dir.path().to_path_buf(),
            participant_env_var: "BRIDGE_TEST_PARTICIPANT".into(),
            study_env_var: "BRIDGE_TEST_STUDY_UNSET".into(),
        })
    }

    fn datum(trial_index: u64) -> Value {
        json!({
            "trial_index": trial_index,
            "participant_id": "p1",
            "study_id": "s1",
            "start_date": "2024-03-01T10:00:00.000Z",
        })
    }

    #[test]
    fn test_data_is_appended_per_session() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = get_bridge(&dir);
        assert_eq!(bridge.output_path(), None);

        bridge.send(DATA_CHANNEL, &datum(0)).unwrap();
        bridge.send(DATA_CHANNEL, &datum(1)).unwrap();

        let path = bridge.output_path().unwrap();
        assert_eq!(
            path,
            dir.path()
                .join("s1")
                .join("p1")
                .join("p1_2024-03-01T10-00-00.000Z.jsonl")
        );

        bridge.send(END_CHANNEL, &json!("true")).unwrap();

        let lines: Vec<Value> = BufReader::new(File::open(&path).unwrap())
            .lines()
            .map(|line| serde_json::from_str(&line.unwrap()).unwrap())
            .collect();
        assert_eq!(lines, vec![datum(0), datum(1)]);
    }

    #[test]
    fn test_send_after_end() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = get_bridge(&dir);

        bridge.send(END_CHANNEL, &json!("true")).unwrap();
        assert!(matches!(
            bridge.send(DATA_CHANNEL, &datum(0)),
            Err(BridgeError::Closed)
        ));
        assert!(matches!(
            bridge.send(END_CHANNEL, &json!("true")),
            Err(BridgeError::Closed)
        ));
    }

    #[test]
    fn test_invalid_messages() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = get_bridge(&dir);

        assert!(matches!(
            bridge.send("screenshot", &json!({})),
            Err(BridgeError::UnknownChannel(c)) if c == "screenshot"
        ));
        assert!(matches!(
            bridge.send(DATA_CHANNEL, &json!([1, 2])),
            Err(BridgeError::InvalidPayload(DATA_CHANNEL))
        ));
    }

    #[test]
    fn test_credentials_from_environment() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = get_bridge(&dir);

        // SAFETY: no other test reads or writes this variable.
        unsafe { std::env::set_var("BRIDGE_TEST_PARTICIPANT", "p42") };

        let credentials = bridge.sync_credentials().unwrap();
        assert_eq!(credentials.env_participant_id, Some("p42".into()));
        assert_eq!(credentials.env_study_id, None);
    }
}
