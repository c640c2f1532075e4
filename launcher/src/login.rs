use crate::app::LauncherError;
use deployment::{Identity, LoginOutcome, SessionGate, SessionState};
use std::io::Write;
use tokio::io::{AsyncBufRead, Lines};

const REFUSED_MESSAGE: &str = "Incorrect participant/study ID. Please try again.";

/// Asks for participant and study ids until the storage backend accepts them.
///
/// The prompt keeps reading while a check is pending. A new pair of ids
/// supersedes the pending check.
pub async fn prompt<R>(gate: &SessionGate, input: &mut Lines<R>) -> Result<(), LauncherError>
where
    R: AsyncBufRead + Unpin,
{
    let mut identity = ask_identity(input, None).await?;

    loop {
        let attempt = gate.login(identity);
        tokio::pin!(attempt);
        // Participant id typed while the check is pending
        let mut typed: Option<String> = None;

        identity = loop {
            tokio::select! {
                biased;

                outcome = &mut attempt => {
                    if admitted(gate, outcome?) {
                        return Ok(());
                    }
                    break ask_identity(input, typed.take()).await?;
                }
                line = input.next_line() => {
                    let Some(line) = line? else {
                        // No more input; the pending check decides
                        return if admitted(gate, (&mut attempt).await?) {
                            Ok(())
                        } else {
                            Err(LauncherError::LoginAborted)
                        };
                    };
                    match typed.take() {
                        None => {
                            typed = Some(line.trim().to_string());
                            eprint!("Study ID: ");
                        }
                        Some(participant_id) => {
                            tracing::debug!("Superseding pending login check");
                            break Identity::new(participant_id, line.trim());
                        }
                    }
                }
            }
        };
    }
}

fn admitted(gate: &SessionGate, outcome: LoginOutcome) -> bool {
    match outcome {
        LoginOutcome::Admitted => true,
        LoginOutcome::Refused => {
            eprintln!("{REFUSED_MESSAGE}");
            false
        }
        LoginOutcome::Superseded => gate.state() == SessionState::LoggedIn,
    }
}

async fn ask_identity<R>(
    input: &mut Lines<R>,
    participant_id: Option<String>,
) -> Result<Identity, LauncherError>
where
    R: AsyncBufRead + Unpin,
{
    let participant_id = match participant_id {
        Some(participant_id) => participant_id,
        None => ask("Participant ID", input).await?,
    };
    let study_id = ask("Study ID", input).await?;
    Ok(Identity::new(participant_id, study_id))
}

async fn ask<R>(label: &str, input: &mut Lines<R>) -> Result<String, LauncherError>
where
    R: AsyncBufRead + Unpin,
{
    eprint!("{label}: ");
    std::io::stderr().flush()?;

    let line = input.next_line().await?.ok_or(LauncherError::LoginAborted)?;
    Ok(line.trim().to_string())
}
