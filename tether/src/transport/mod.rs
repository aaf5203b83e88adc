//! Physical transport layer for device connections.
//!
//! This module defines the two kinds of discovery source the connection
//! manager consumes, and provides thin implementations over USB serial ports
//! and TCP. It handles presence and raw link open/close only; no device
//! protocol lives here.

pub mod serial;
pub mod tcp;

use async_trait::async_trait;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{backend::BackendHandle, error::Result};

pub use serial::{SerialBackend, SerialPortSource};
pub use tcp::{TcpBackend, TcpSource};

/// Presence change reported by an enumerated source's watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A device with this serial appeared. Its handle is not part of the
    /// event; re-list to obtain it.
    DeviceAttached { serial: String },

    /// A device went away, or the list changed in some other way.
    DevicesChanged,
}

/// Source that can list the devices currently present on its transport and
/// notify when that list changes.
#[async_trait]
pub trait EnumeratedSource: Send + Sync {
    /// Whether the transport API this source needs is usable here.
    async fn is_supported(&self) -> bool;

    /// Currently present devices, in the order the transport reports them.
    async fn list(&self) -> Result<Vec<BackendHandle>>;

    /// Start watching for attach/detach, sending events to `events` until the
    /// returned subscription is cancelled or dropped.
    fn watch(&self, events: mpsc::Sender<TransportEvent>) -> Result<Subscription>;

    /// Ask for access to a device not yet listed. `Ok(None)` means the
    /// request was dismissed or nothing was available.
    async fn request_device(&self) -> Result<Option<BackendHandle>>;
}

/// Transport without presence notification, discovered by probing a fixed
/// endpoint.
pub trait PolledSource: Send + Sync {
    /// Create an unconnected backend for `endpoint`.
    fn open(&self, endpoint: &str) -> BackendHandle;
}

/// Handle to a running watcher. Cancelling or dropping it stops the watcher.
#[derive(Debug)]
pub struct Subscription {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(cancel: CancellationToken, task: JoinHandle<()>) -> Self {
        Self {
            cancel,
            task: Some(task),
        }
    }

    /// Subscription with no backing task, for sources that never fire.
    pub fn inert() -> Self {
        Self {
            cancel: CancellationToken::new(),
            task: None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stop the watcher and wait for its task to finish.
    pub async fn cancel(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
