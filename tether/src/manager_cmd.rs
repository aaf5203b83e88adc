//! Command queue for controlling the connection manager.
//!
//! The manager runs as a single task that owns all discovery and session
//! state. Front ends (the stdin console, tests, or anything else) talk to it
//! by sending commands through a [`ManagerHandle`]; each command is handled to
//! completion before the next one, so callers never observe a half-applied
//! change.

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use crate::{
    backend::BackendSummary,
    error::{Error, Result},
    session::SessionHandle,
};

/// Commands that can be sent to the manager for execution.
pub enum ManagerCommand {
    /// Snapshot of candidates, selection and session state
    Status {
        response_tx: oneshot::Sender<ManagerStatus>,
    },

    /// Re-list the enumerated source
    Refresh { response_tx: oneshot::Sender<()> },

    /// Select the candidate with this serial; responds whether it was found
    Select {
        serial: String,
        response_tx: oneshot::Sender<bool>,
    },

    /// Connect to the selected candidate; responds when the attempt ends
    Connect {
        response_tx: oneshot::Sender<Result<()>>,
    },

    /// Release the active session
    Disconnect {
        response_tx: oneshot::Sender<Result<()>>,
    },

    /// Ask the enumerated source for access to another device
    AddDevice {
        response_tx: oneshot::Sender<Result<Option<BackendSummary>>>,
    },

    /// Borrow the active session
    ActiveSession {
        response_tx: oneshot::Sender<Option<SessionHandle>>,
    },
}

/// Manager state as seen from outside.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManagerStatus {
    /// Candidate set in order
    pub candidates: Vec<BackendSummary>,
    /// Serial of the selected candidate
    pub selected: Option<String>,
    /// Whether a connection attempt is in flight
    pub connecting: bool,
    /// Serial of the backend the active session is bound to
    pub connected: Option<String>,
    /// Whether `add_device` can be used in this environment
    pub add_device_enabled: bool,
}

impl ManagerStatus {
    pub fn candidate_serials(&self) -> Vec<&str> {
        self.candidates.iter().map(|c| c.serial.as_str()).collect()
    }
}

/// Cloneable handle for sending commands to a running manager.
#[derive(Clone)]
pub struct ManagerHandle {
    cmd_tx: mpsc::Sender<ManagerCommand>,
}

impl ManagerHandle {
    pub(crate) fn new(cmd_tx: mpsc::Sender<ManagerCommand>) -> Self {
        Self { cmd_tx }
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> ManagerCommand,
    ) -> Result<T> {
        let (response_tx, response_rx) = oneshot::channel();
        self.cmd_tx
            .send(command(response_tx))
            .await
            .map_err(|_| Error::ManagerClosed)?;
        response_rx.await.map_err(|_| Error::ManagerClosed)
    }

    pub async fn status(&self) -> Result<ManagerStatus> {
        self.request(|response_tx| ManagerCommand::Status { response_tx })
            .await
    }

    pub async fn refresh(&self) -> Result<()> {
        self.request(|response_tx| ManagerCommand::Refresh { response_tx })
            .await
    }

    /// Select by serial. Returns false, changing nothing, if no candidate has
    /// that serial.
    pub async fn select(&self, serial: impl Into<String>) -> Result<bool> {
        let serial = serial.into();
        self.request(|response_tx| ManagerCommand::Select {
            serial,
            response_tx,
        })
        .await
    }

    /// Connect to the selected candidate and wait for the outcome.
    pub async fn connect(&self) -> Result<()> {
        self.request(|response_tx| ManagerCommand::Connect { response_tx })
            .await?
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.request(|response_tx| ManagerCommand::Disconnect { response_tx })
            .await?
    }

    pub async fn add_device(&self) -> Result<Option<BackendSummary>> {
        self.request(|response_tx| ManagerCommand::AddDevice { response_tx })
            .await?
    }

    pub async fn active_session(&self) -> Result<Option<SessionHandle>> {
        self.request(|response_tx| ManagerCommand::ActiveSession { response_tx })
            .await
    }
}
