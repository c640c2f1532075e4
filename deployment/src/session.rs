use crate::metrics_defs::{DATA_DROPPED, DATA_RECORDED, FINISH_DURATION, LOGIN_ATTEMPTS};
use crate::resolver::Resolution;
use crate::sink::{DataSink, NoopSink, RegistryError, SinkError, SinkRegistry};
use crate::types::{Datum, DeploymentMethod, Identity, Session, SessionMetadata};
use parking_lot::Mutex;
use serde::Serialize;
use shared::{counter, histogram};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::RwLock;

/// Shown when no backend can take the session. There is no retry.
pub const REJECTION_MESSAGE: &str =
    "Please ask your task provider to enable the firestore database before logging in online.";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Unresolved,
    AwaitingLogin,
    LoggedIn,
    Rejected,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoginOutcome {
    Admitted,
    /// The backend did not accept the identity. The prompt stays open.
    Refused,
    /// A newer attempt started, or the session already logged in.
    Superseded,
}

impl LoginOutcome {
    pub const fn as_str(&self) -> &'static str {
        match self {
            LoginOutcome::Admitted => "admitted",
            LoginOutcome::Refused => "refused",
            LoginOutcome::Superseded => "superseded",
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum GateError {
    #[error("the session was already resolved")]
    AlreadyResolved,
    #[error("no login is expected in state {0:?}")]
    NotAwaitingLogin(SessionState),
    #[error("the session is not logged in (state {0:?})")]
    NotLoggedIn(SessionState),
    #[error("the session was already finished")]
    AlreadyFinished,
    #[error("the session has completed and takes no more data")]
    Completed,
    #[error("{0}")]
    Registry(#[from] RegistryError),
    #[error("sink failed: {0}")]
    Sink(#[from] SinkError),
}

struct GateInner {
    state: SessionState,
    method: DeploymentMethod,
    sink: Arc<dyn DataSink>,
    // Written once, on entering LoggedIn.
    metadata: Option<Arc<SessionMetadata>>,
    // Set when finish starts, and when the sink's finish sequence has returned.
    finished: bool,
    completed: bool,
}

/// Holds the session record and admits data only once the session is logged in.
///
/// The gate is shared by the login prompt and the data producer. Locks are never
/// held while a sink call is pending, so a slow validation or finish sequence
/// does not block the other side.
pub struct SessionGate {
    start_date: String,
    inner: Mutex<GateInner>,
    latest_attempt: AtomicU64,
    // Readers are in-flight data hand-offs; finish takes the write side to drain them.
    handoff: RwLock<()>,
}

impl SessionGate {
    pub fn new<S: Into<String>>(start_date: S) -> Self {
        SessionGate {
            start_date: start_date.into(),
            inner: Mutex::new(GateInner {
                state: SessionState::Unresolved,
                method: DeploymentMethod::Default,
                sink: Arc::new(NoopSink),
                metadata: None,
                finished: false,
                completed: false,
            }),
            latest_attempt: AtomicU64::new(0),
            handoff: RwLock::new(()),
        }
    }

    /// Moves the session out of Unresolved and binds the sink for its lifetime.
    pub fn apply(
        &self,
        resolution: Resolution,
        registry: &SinkRegistry,
    ) -> Result<SessionState, GateError> {
        let mut inner = self.inner.lock();
        if inner.state != SessionState::Unresolved {
            return Err(GateError::AlreadyResolved);
        }

        match resolution {
            Resolution::LoggedIn { method, identity } => {
                inner.sink = registry.sink_for(method)?;
                inner.method = method;
                self.admit(&mut inner, identity);
            }
            Resolution::AwaitingLogin { method } => {
                inner.sink = registry.sink_for(method)?;
                inner.method = method;
                inner.state = SessionState::AwaitingLogin;
            }
            Resolution::Rejected => {
                inner.state = SessionState::Rejected;
            }
        }

        Ok(inner.state)
    }

    /// Validates an identity entered at the login prompt.
    ///
    /// Attempts may overlap. Only the most recently started one can log the
    /// session in; results of older attempts are discarded when they arrive.
    pub async fn login(&self, identity: Identity) -> Result<LoginOutcome, GateError> {
        let (sink, attempt) = {
            let inner = self.inner.lock();
            if inner.state != SessionState::AwaitingLogin {
                return Err(GateError::NotAwaitingLogin(inner.state));
            }
            let attempt = self.latest_attempt.fetch_add(1, Ordering::SeqCst) + 1;
            (inner.sink.clone(), attempt)
        };

        let valid = sink.validate(&identity).await;

        let outcome = {
            let mut inner = self.inner.lock();
            if self.latest_attempt.load(Ordering::SeqCst) != attempt
                || inner.state != SessionState::AwaitingLogin
            {
                LoginOutcome::Superseded
            } else if valid {
                self.admit(&mut inner, identity);
                LoginOutcome::Admitted
            } else {
                LoginOutcome::Refused
            }
        };

        tracing::info!(attempt, outcome = outcome.as_str(), "Login attempt finished");
        counter!(LOGIN_ATTEMPTS, "outcome" => outcome.as_str()).increment(1);
        Ok(outcome)
    }

    /// Stamps the session identity on the datum and hands it to the sink.
    ///
    /// Data is accepted while the finish sequence runs, but not after it returned.
    pub async fn record_datum(&self, mut datum: Datum) -> Result<(), GateError> {
        let _handoff = self.handoff.read().await;

        let (sink, metadata) = {
            let inner = self.inner.lock();
            if inner.completed {
                counter!(DATA_DROPPED).increment(1);
                tracing::warn!(method = %inner.method, "Dropping datum recorded after finish");
                return Err(GateError::Completed);
            }
            match (&inner.state, &inner.metadata) {
                (SessionState::LoggedIn, Some(metadata)) => (inner.sink.clone(), metadata.clone()),
                (state, _) => {
                    counter!(DATA_DROPPED).increment(1);
                    tracing::warn!(state = ?state, "Dropping datum recorded before login");
                    return Err(GateError::NotLoggedIn(*state));
                }
            }
        };

        metadata.stamp(&mut datum);
        sink.record_datum(datum).await?;
        counter!(DATA_RECORDED, "method" => sink.method().as_str()).increment(1);
        Ok(())
    }

    /// Runs the sink's completion sequence once every datum handed over
    /// before this call has reached the sink.
    pub async fn finish(&self) -> Result<(), GateError> {
        let sink = {
            let _drained = self.handoff.write().await;
            let mut inner = self.inner.lock();
            if inner.state != SessionState::LoggedIn {
                return Err(GateError::NotLoggedIn(inner.state));
            }
            if inner.finished {
                return Err(GateError::AlreadyFinished);
            }
            inner.finished = true;
            inner.sink.clone()
        };

        let started = Instant::now();
        sink.finish().await?;
        self.inner.lock().completed = true;
        histogram!(FINISH_DURATION, "method" => sink.method().as_str())
            .record(started.elapsed().as_secs_f64());
        tracing::info!(method = %sink.method(), "Session finished");
        Ok(())
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    pub fn method(&self) -> DeploymentMethod {
        self.inner.lock().method
    }

    pub fn metadata(&self) -> Option<SessionMetadata> {
        self.inner.lock().metadata.as_deref().cloned()
    }

    pub fn start_date(&self) -> &str {
        &self.start_date
    }

    pub fn session(&self) -> Session {
        let inner = self.inner.lock();
        Session {
            logged_in: inner.state == SessionState::LoggedIn,
            rejected: inner.state == SessionState::Rejected,
            method: inner.method,
            start_timestamp: self.start_date.clone(),
        }
    }

    fn admit(&self, inner: &mut GateInner, identity: Identity) {
        if inner.metadata.is_none() {
            let metadata = SessionMetadata::new(identity, &self.start_date);
            tracing::info!(
                method = %inner.method,
                participant_id = %metadata.participant_id,
                study_id = %metadata.study_id,
                "Session logged in"
            );
            inner.metadata = Some(Arc::new(metadata));
        }
        inner.state = SessionState::LoggedIn;
    }
}
