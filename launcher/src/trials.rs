use crate::app::LauncherError;
use deployment::{Datum, SessionGate};
use tokio::io::{AsyncBufRead, Lines};

/// Records every JSON object line of the input through the gate.
///
/// Lines that are not JSON objects are logged and skipped. A failing sink
/// stops the feed.
pub async fn feed<R>(gate: &SessionGate, input: &mut Lines<R>) -> Result<usize, LauncherError>
where
    R: AsyncBufRead + Unpin,
{
    let mut recorded = 0;
    let mut line_number = 0;

    while let Some(line) = input.next_line().await? {
        line_number += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let datum: Datum = match serde_json::from_str(line) {
            Ok(datum) => datum,
            Err(e) => {
                tracing::warn!(line_number, error = %e, "Skipping malformed trial");
                continue;
            }
        };

        gate.record_datum(datum).await?;
        recorded += 1;
    }

    Ok(recorded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use deployment::bridge::{DesktopBridge, LocalBridge};
    use deployment::config::DesktopConfig;
    use deployment::resolver::Resolution;
    use deployment::session::GateError;
    use deployment::sink::{DesktopSink, SinkRegistry};
    use deployment::types::DeploymentMethod;
    use deployment::{Identity, SessionState};
    use serde_json::{Value, json};
    use std::sync::Arc;
    use tokio::io::{AsyncBufReadExt, BufReader};

    fn desktop_gate(dir: &tempfile::TempDir) -> (SessionGate, Arc<LocalBridge>) {
        let bridge = Arc::new(LocalBridge::new(&DesktopConfig {
            output_dir: dir.path().to_path_buf(),
            participant_env_var: "TRIALS_TEST_PARTICIPANT_UNSET".into(),
            study_env_var: "TRIALS_TEST_STUDY_UNSET".into(),
        }));
        let sink_bridge: Arc<dyn DesktopBridge> = bridge.clone();
        let registry = SinkRegistry::new().with_sink(Arc::new(DesktopSink::new(sink_bridge)));

        let gate = SessionGate::new("2024-03-01T10:00:00.000Z");
        gate.apply(
            Resolution::LoggedIn {
                method: DeploymentMethod::Desktop,
                identity: Identity::new("p1", "s1"),
            },
            &registry,
        )
        .unwrap();
        (gate, bridge)
    }

    #[tokio::test]
    async fn test_feed_writes_stamped_trials() {
        let dir = tempfile::tempdir().unwrap();
        let (gate, bridge) = desktop_gate(&dir);
        let input = "{\"trial_index\": 0, \"rt\": 300}\n\nnot json\n[1, 2]\n{\"trial_index\": 1}\n";
        let mut lines = BufReader::new(input.as_bytes()).lines();

        assert_eq!(feed(&gate, &mut lines).await.unwrap(), 2);
        gate.finish().await.unwrap();

        let path = bridge.output_path();
        assert_eq!(path, None, "bridge output is closed after finish");

        let written = std::fs::read_to_string(
            dir.path()
                .join("s1")
                .join("p1")
                .join("p1_2024-03-01T10-00-00.000Z.jsonl"),
        )
        .unwrap();
        let trials: Vec<Value> = written
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(
            trials,
            vec![
                json!({
                    "trial_index": 0,
                    "rt": 300,
                    "participant_id": "p1",
                    "study_id": "s1",
                    "start_date": "2024-03-01T10:00:00.000Z",
                }),
                json!({
                    "trial_index": 1,
                    "participant_id": "p1",
                    "study_id": "s1",
                    "start_date": "2024-03-01T10:00:00.000Z",
                }),
            ]
        );
    }

    #[tokio::test]
    async fn test_feed_stops_on_sink_failure() {
        let dir = tempfile::tempdir().unwrap();
        let (gate, bridge) = desktop_gate(&dir);
        bridge.send("end", &json!("true")).unwrap();

        let mut lines = BufReader::new(&b"{\"trial_index\": 0}\n"[..]).lines();
        assert!(matches!(
            feed(&gate, &mut lines).await,
            Err(LauncherError::Gate(GateError::Sink(_)))
        ));
        assert_eq!(gate.state(), SessionState::LoggedIn);
    }
}
