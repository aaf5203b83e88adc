//! Session lifecycle.
//!
//! The session manager owns the connect/disconnect state machine:
//!
//! ```text
//! Idle --connect--> Connecting --ok--> Connected --disconnect--> Idle
//!                        |
//!                        +--error--> Idle (session disposed, error reported)
//! ```
//!
//! The handshake runs in its own task so the caller can keep handling
//! discovery while the user authorizes the connection on the device. Only one
//! attempt may be in flight; a second `connect` while connecting or connected
//! is rejected without creating a session.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::{
    backend::BackendHandle,
    credentials::CredentialStore,
    error::{Error, Result},
    reporter::ErrorReporter,
    tracing::prelude::*,
};

/// Protocol session bound to one backend.
///
/// The manager only drives the handshake and the release; whatever the
/// session does in between belongs to the caller holding the handle.
#[async_trait]
pub trait Session: Send + Sync {
    fn backend(&self) -> &BackendHandle;

    /// Open the link and authenticate, answering challenges from
    /// `credentials`.
    async fn connect(&self, credentials: &dyn CredentialStore) -> Result<()>;

    /// Release the session and its link.
    async fn dispose(&self) -> Result<()>;
}

pub type SessionHandle = Arc<dyn Session>;

/// Builds sessions for backends.
pub trait SessionFactory: Send + Sync {
    /// Create an unconnected session. `span` is the logging sink the session
    /// should record into.
    fn create(&self, backend: BackendHandle, span: Span) -> SessionHandle;
}

/// Where the session state machine is.
#[derive(Clone)]
pub enum SessionState {
    Idle,
    Connecting { serial: String },
    Connected(SessionHandle),
}

impl std::fmt::Debug for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Connecting { serial } => write!(f, "Connecting({serial})"),
            Self::Connected(session) => write!(f, "Connected({})", session.backend().serial()),
        }
    }
}

/// In-flight handshake. The session is kept beside its task so it can still
/// be released if the task is aborted.
struct Attempt {
    session: SessionHandle,
    task: JoinHandle<Result<SessionHandle>>,
}

/// Connect/disconnect state machine for the single active session.
pub struct SessionManager {
    factory: Arc<dyn SessionFactory>,
    credentials: Arc<dyn CredentialStore>,
    reporter: Arc<dyn ErrorReporter>,
    state: SessionState,
    attempt: Option<Attempt>,
}

impl SessionManager {
    pub fn new(
        factory: Arc<dyn SessionFactory>,
        credentials: Arc<dyn CredentialStore>,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        Self {
            factory,
            credentials,
            reporter,
            state: SessionState::Idle,
            attempt: None,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// True strictly between the start and the end of a connection attempt.
    pub fn is_connecting(&self) -> bool {
        matches!(self.state, SessionState::Connecting { .. })
    }

    pub fn active(&self) -> Option<&SessionHandle> {
        match &self.state {
            SessionState::Connected(session) => Some(session),
            _ => None,
        }
    }

    /// Start connecting to `backend`.
    ///
    /// Creates the session and spawns its handshake. The attempt completes
    /// through [`attempt_finished`](Self::attempt_finished) and
    /// [`finish_connect`](Self::finish_connect). On handshake failure the
    /// session is disposed inside the attempt, before the error comes back.
    pub fn begin_connect(&mut self, backend: &BackendHandle) -> Result<()> {
        match self.state {
            SessionState::Idle => {}
            SessionState::Connecting { .. } => return Err(Error::ConnectInProgress),
            SessionState::Connected(_) => return Err(Error::AlreadyConnected),
        }

        let serial = backend.serial().to_string();
        let span = info_span!("session", serial = %serial);
        let session = self.factory.create(backend.clone(), span);
        let credentials = self.credentials.clone();

        info!(serial = %serial, "Connecting");
        let handshake = session.clone();
        let task = tokio::spawn(async move {
            match handshake.connect(credentials.as_ref()).await {
                Ok(()) => Ok(handshake),
                Err(e) => {
                    if let Err(dispose_err) = handshake.dispose().await {
                        warn!(
                            serial = %handshake.backend().serial(),
                            error = %dispose_err,
                            "Failed to release session after handshake failure"
                        );
                    }
                    Err(e)
                }
            }
        });
        self.attempt = Some(Attempt { session, task });
        self.state = SessionState::Connecting { serial };
        Ok(())
    }

    /// Wait for the in-flight attempt to finish. Never resolves when no
    /// attempt is in flight.
    pub async fn attempt_finished(&mut self) -> Result<SessionHandle> {
        let Some(attempt) = self.attempt.as_mut() else {
            return futures::future::pending().await;
        };
        match (&mut attempt.task).await {
            Ok(outcome) => outcome,
            Err(join_error) => Err(Error::Session(format!(
                "connection attempt aborted: {join_error}"
            ))),
        }
    }

    /// Apply the outcome of the attempt.
    ///
    /// Success stores the active session. Failure returns to idle and shows
    /// the error's message to the user.
    pub fn finish_connect(&mut self, outcome: Result<SessionHandle>) -> Result<()> {
        self.attempt = None;
        match outcome {
            Ok(session) => {
                info!(serial = %session.backend().serial(), "Connected");
                self.state = SessionState::Connected(session);
                Ok(())
            }
            Err(e) => {
                if let SessionState::Connecting { serial } = &self.state {
                    warn!(serial = %serial, error = %e, "Connection failed");
                }
                self.state = SessionState::Idle;
                self.reporter.show(&e.to_string());
                Err(e)
            }
        }
    }

    /// Connect to `backend` and wait for the outcome.
    pub async fn connect(&mut self, backend: &BackendHandle) -> Result<()> {
        self.begin_connect(backend)?;
        let outcome = self.attempt_finished().await;
        self.finish_connect(outcome)
    }

    /// Release the active session.
    ///
    /// The session is forgotten even if releasing it fails; the failure is
    /// shown to the user and returned. There is no retry.
    pub async fn disconnect(&mut self) -> Result<()> {
        let session = match std::mem::replace(&mut self.state, SessionState::Idle) {
            SessionState::Connected(session) => session,
            other => {
                self.state = other;
                return Err(Error::NotConnected);
            }
        };

        let serial = session.backend().serial().to_string();
        match session.dispose().await {
            Ok(()) => {
                info!(serial = %serial, "Disconnected");
                Ok(())
            }
            Err(e) => {
                error!(serial = %serial, error = %e, "Failed to release session");
                self.reporter.show(&e.to_string());
                Err(e)
            }
        }
    }

    /// Stop everything: abandon an in-flight attempt and release the active
    /// session.
    ///
    /// The abandoned attempt's session is released unless its handshake had
    /// already failed, in which case the attempt released it itself.
    pub async fn shutdown(&mut self) {
        if let Some(Attempt { session, task }) = self.attempt.take() {
            warn!("Abandoning in-flight connection attempt");
            task.abort();
            self.state = SessionState::Idle;

            // Aborting a finished task is a no-op, so the handshake may have
            // succeeded in the meantime.
            let released_by_attempt = matches!(task.await, Ok(Err(_)));
            if !released_by_attempt {
                if let Err(e) = session.dispose().await {
                    warn!(
                        serial = %session.backend().serial(),
                        error = %e,
                        "Failed to release abandoned session"
                    );
                }
            }
        }
        if self.active().is_some() {
            let _ = self.disconnect().await;
        }
    }
}

/// Session without a device protocol: authenticating means having a key
/// available, connecting means opening the backend link.
pub struct LinkSession {
    backend: BackendHandle,
    span: Span,
}

impl LinkSession {
    pub fn new(backend: BackendHandle, span: Span) -> Self {
        Self { backend, span }
    }
}

#[async_trait]
impl Session for LinkSession {
    fn backend(&self) -> &BackendHandle {
        &self.backend
    }

    async fn connect(&self, credentials: &dyn CredentialStore) -> Result<()> {
        async {
            let key = match credentials.keys()?.into_iter().next() {
                Some(key) => key,
                None => credentials.generate()?,
            };
            debug!(fingerprint = %key.fingerprint(), "Using credential");

            self.backend.connect().await?;
            debug!("Link open");
            Ok(())
        }
        .instrument(self.span.clone())
        .await
    }

    async fn dispose(&self) -> Result<()> {
        self.backend.dispose().instrument(self.span.clone()).await
    }
}

/// Factory for [`LinkSession`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinkSessionFactory;

impl SessionFactory for LinkSessionFactory {
    fn create(&self, backend: BackendHandle, span: Span) -> SessionHandle {
        Arc::new(LinkSession::new(backend, span))
    }
}
