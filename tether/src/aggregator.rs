//! Merge discovery sources into one candidate set.
//!
//! The candidate set is rebuilt from scratch on every discovery event: the
//! enumerated list in source order, followed by the polled backend if the
//! last probe found one. Discovery and probe failures never reach the user;
//! they simply leave fewer candidates.

use std::time::Duration;
use tokio::time;

use crate::{
    backend::{BackendHandle, BackendSummary},
    transport::{EnumeratedSource, PolledSource},
    tracing::prelude::*,
};

/// Ordered list of devices the user can pick from.
///
/// No uniqueness is enforced; lookups by serial return the first match.
#[derive(Debug, Clone, Default)]
pub struct CandidateSet {
    backends: Vec<BackendHandle>,
}

impl CandidateSet {
    pub fn new(backends: Vec<BackendHandle>) -> Self {
        Self { backends }
    }

    pub fn find(&self, serial: &str) -> Option<&BackendHandle> {
        self.backends.iter().find(|backend| backend.serial() == serial)
    }

    pub fn first(&self) -> Option<&BackendHandle> {
        self.backends.first()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BackendHandle> {
        self.backends.iter()
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    pub fn serials(&self) -> Vec<&str> {
        self.backends.iter().map(|backend| backend.serial()).collect()
    }

    pub fn summaries(&self) -> Vec<BackendSummary> {
        self.backends.iter().map(BackendSummary::from).collect()
    }
}

/// Enumerated-first concatenation. Performs no I/O.
pub fn aggregate(enumerated: &[BackendHandle], polled: Option<&BackendHandle>) -> CandidateSet {
    let backends = enumerated.iter().chain(polled).cloned().collect();
    CandidateSet::new(backends)
}

/// List the enumerated source, treating failure as an empty list.
pub async fn list_enumerated(source: &dyn EnumeratedSource) -> Vec<BackendHandle> {
    match source.list().await {
        Ok(list) => {
            trace!(count = list.len(), "Enumerated devices");
            list
        }
        Err(e) => {
            debug!(error = %e, "Device enumeration failed, treating as empty");
            Vec::new()
        }
    }
}

/// Probe `endpoint` once.
///
/// Opens a connection and releases it again before returning, whatever the
/// outcome. Returns the probed backend if the connection opened, `None` on
/// any failure or if the attempt takes longer than `timeout`.
pub async fn poll_once(
    source: &dyn PolledSource,
    endpoint: &str,
    timeout: Duration,
) -> Option<BackendHandle> {
    let backend = source.open(endpoint);

    let reachable = match time::timeout(timeout, backend.connect()).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            trace!(endpoint, error = %e, "Probe failed");
            false
        }
        Err(_) => {
            trace!(endpoint, "Probe timed out");
            false
        }
    };

    if let Err(e) = backend.dispose().await {
        debug!(endpoint, error = %e, "Failed to release probe connection");
    }

    reachable.then_some(backend)
}
