//! Connection manager.
//!
//! The manager ties discovery, selection and the session together. Like a
//! hardware backplane it is the one place devices plug into: the enumerated
//! source's watcher, the network probe, and external commands all feed a
//! single event loop, which owns the candidate set, the selection and the
//! active session. Every mutation runs to completion inside that loop, so no
//! locking is needed.
//!
//! The only work that runs outside the loop is the session handshake, which
//! may wait on the user for a long time. Discovery keeps flowing meanwhile;
//! the outcome comes back into the loop as one more event.

use std::sync::Arc;
use tokio::{
    sync::{mpsc, oneshot},
    time::{self, Instant, Interval, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    aggregator::{self, CandidateSet},
    backend::{self, BackendHandle, BackendSummary},
    config::Config,
    credentials::CredentialStore,
    error::{Error, Result},
    manager_cmd::{ManagerCommand, ManagerHandle, ManagerStatus},
    reporter::ErrorReporter,
    selection::SelectionTracker,
    session::{SessionFactory, SessionHandle, SessionManager},
    tracing::prelude::*,
    transport::{EnumeratedSource, PolledSource, Subscription, TransportEvent},
};

/// Shown once at startup when hardware discovery cannot work here.
pub const UNSUPPORTED_MESSAGE: &str = "USB serial enumeration is not available on this system, \
which is required to discover attached devices.\n\n\
Network devices can still be reached through the TCP endpoint.";

const EVENT_QUEUE: usize = 32;

/// Everything the manager talks to.
pub struct Collaborators {
    pub enumerated: Arc<dyn EnumeratedSource>,
    pub polled: Option<Arc<dyn PolledSource>>,
    pub sessions: Arc<dyn SessionFactory>,
    pub credentials: Arc<dyn CredentialStore>,
    pub reporter: Arc<dyn ErrorReporter>,
}

/// Owner of discovery, selection and session state.
pub struct ConnectionManager {
    config: Config,
    enumerated: Arc<dyn EnumeratedSource>,
    polled: Option<Arc<dyn PolledSource>>,
    reporter: Arc<dyn ErrorReporter>,
    /// Latest listing of the enumerated source
    enumerated_list: Vec<BackendHandle>,
    /// Backend found by the last successful probe
    polled_backend: Option<BackendHandle>,
    candidates: CandidateSet,
    selection: SelectionTracker,
    session: SessionManager,
    /// Whether the enumerated source passed its capability check
    supported: bool,
    event_tx: mpsc::Sender<TransportEvent>,
    event_rx: mpsc::Receiver<TransportEvent>,
    cmd_rx: mpsc::Receiver<ManagerCommand>,
    /// Reply owed to whoever asked for the in-flight connection attempt
    pending_connect: Option<oneshot::Sender<Result<()>>>,
}

impl ConnectionManager {
    /// Create a manager and the handle used to control it.
    pub fn new(config: Config, parts: Collaborators) -> (Self, ManagerHandle) {
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE);
        let (cmd_tx, cmd_rx) = mpsc::channel(config.session.command_queue);
        let session = SessionManager::new(
            parts.sessions,
            parts.credentials,
            parts.reporter.clone(),
        );

        let manager = Self {
            config,
            enumerated: parts.enumerated,
            polled: parts.polled,
            reporter: parts.reporter,
            enumerated_list: Vec::new(),
            polled_backend: None,
            candidates: CandidateSet::default(),
            selection: SelectionTracker::new(),
            session,
            supported: false,
            event_tx,
            event_rx,
            cmd_rx,
            pending_connect: None,
        };
        (manager, ManagerHandle::new(cmd_tx))
    }

    /// Run the manager event loop until `shutdown` is cancelled.
    ///
    /// On shutdown the watcher is stopped, an in-flight attempt is abandoned
    /// and the active session, if any, is released.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<()> {
        let _subscription = self.start().await;
        let mut probe_timer = self.probe_timer();

        loop {
            tokio::select! {
                // Discovery first so commands always see the freshest list
                biased;

                _ = shutdown.cancelled() => break,
                Some(event) = self.event_rx.recv() => {
                    self.handle_transport_event(event).await;
                }
                outcome = self.session.attempt_finished(), if self.session.is_connecting() => {
                    self.complete_connect(outcome);
                }
                Some(cmd) = self.cmd_rx.recv() => {
                    self.handle_command(cmd).await;
                }
                _ = tick(&mut probe_timer) => {
                    self.handle_probe_tick().await;
                }
            }
        }

        trace!("Shutting down connection manager.");
        self.session.shutdown().await;
        if let Some(reply) = self.pending_connect.take() {
            let _ = reply.send(Err(Error::ManagerClosed));
        }
        Ok(())
    }

    // Capability check, initial listing and watcher subscription.
    async fn start(&mut self) -> Option<Subscription> {
        self.supported = self.enumerated.is_supported().await;
        if !self.supported {
            warn!("Enumerated discovery unsupported, adding devices disabled");
            self.reporter.show(UNSUPPORTED_MESSAGE);
            return None;
        }

        self.refresh_enumerated().await;

        match self.enumerated.watch(self.event_tx.clone()) {
            Ok(subscription) => Some(subscription),
            Err(e) => {
                warn!(error = %e, "Failed to watch for device changes");
                None
            }
        }
    }

    fn probe_timer(&self) -> Option<Interval> {
        if self.polled.is_none() || !self.config.poll.enabled {
            return None;
        }
        let period = self.config.poll.interval();
        let mut timer = time::interval_at(Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Some(timer)
    }

    /// Rebuild the candidate set from the latest lists and reconcile the
    /// selection against it.
    fn rebuild_candidates(&mut self) {
        self.candidates =
            aggregator::aggregate(&self.enumerated_list, self.polled_backend.as_ref());

        let before = self.selection.selected_serial().map(str::to_string);
        let after = self
            .selection
            .reconcile(&self.candidates)
            .map(|backend| backend.serial().to_string());

        if before != after {
            debug!(
                from = ?before,
                to = ?after,
                candidates = self.candidates.len(),
                "Selection changed"
            );
        }
    }

    async fn refresh_enumerated(&mut self) {
        self.enumerated_list = aggregator::list_enumerated(self.enumerated.as_ref()).await;
        self.rebuild_candidates();
    }

    /// Handle a watcher event. Re-listing and re-selecting happen together
    /// before any other event is looked at.
    async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::DeviceAttached { serial } => {
                info!(serial = %serial, "Device attached");
                self.refresh_enumerated().await;

                if self.config.discovery.follow_new_devices
                    && !self.selection.select_manually(&serial, &self.candidates)
                {
                    debug!(serial = %serial, "Attached device missing from listing");
                }
            }
            TransportEvent::DevicesChanged => {
                debug!("Device list changed");
                self.refresh_enumerated().await;
            }
        }
    }

    /// Probe the network endpoint, unless a connection is in progress or
    /// established. Skipped ticks are not made up later.
    async fn handle_probe_tick(&mut self) {
        if self.session.is_connecting() || self.session.active().is_some() {
            trace!("Session busy, skipping probe");
            return;
        }
        let Some(source) = self.polled.clone() else {
            return;
        };

        let endpoint = self.config.poll.endpoint.clone();
        let found =
            aggregator::poll_once(source.as_ref(), &endpoint, self.config.poll.timeout()).await;

        match found {
            Some(backend) => {
                let newly_reachable = self.polled_backend.is_none();
                if newly_reachable {
                    info!(endpoint = %endpoint, "Network device reachable");
                }
                let serial = backend.serial().to_string();
                self.polled_backend = Some(backend);
                self.rebuild_candidates();

                if newly_reachable && self.config.discovery.follow_new_devices {
                    self.selection.select_manually(&serial, &self.candidates);
                }
            }
            None => {
                if self.polled_backend.take().is_some() {
                    info!(endpoint = %endpoint, "Network device no longer reachable");
                    self.rebuild_candidates();
                }
            }
        }
    }

    /// Handle commands from external interfaces.
    async fn handle_command(&mut self, cmd: ManagerCommand) {
        match cmd {
            ManagerCommand::Status { response_tx } => {
                let _ = response_tx.send(self.status());
            }
            ManagerCommand::Refresh { response_tx } => {
                self.refresh_enumerated().await;
                let _ = response_tx.send(());
            }
            ManagerCommand::Select {
                serial,
                response_tx,
            } => {
                let found = self.selection.select_manually(&serial, &self.candidates);
                if !found {
                    debug!(serial = %serial, "Ignoring selection of absent device");
                }
                let _ = response_tx.send(found);
            }
            ManagerCommand::Connect { response_tx } => {
                if let Err(e) = self.start_connect() {
                    let _ = response_tx.send(Err(e));
                    return;
                }
                self.pending_connect = Some(response_tx);
            }
            ManagerCommand::Disconnect { response_tx } => {
                let result = self.session.disconnect().await;
                if !matches!(result, Err(Error::NotConnected)) {
                    // Back to whatever is present now
                    self.refresh_enumerated().await;
                }
                let _ = response_tx.send(result);
            }
            ManagerCommand::AddDevice { response_tx } => {
                let result = self.add_device().await;
                let _ = response_tx.send(result);
            }
            ManagerCommand::ActiveSession { response_tx } => {
                let _ = response_tx.send(self.session.active().cloned());
            }
        }
    }

    fn start_connect(&mut self) -> Result<()> {
        let Some(backend) = self.selection.selected().cloned() else {
            return Err(Error::NoSelection);
        };
        self.session.begin_connect(&backend)
    }

    fn complete_connect(&mut self, outcome: Result<SessionHandle>) {
        let result = self.session.finish_connect(outcome);
        if let Some(reply) = self.pending_connect.take() {
            let _ = reply.send(result);
        }
    }

    async fn add_device(&mut self) -> Result<Option<BackendSummary>> {
        if !self.supported {
            return Err(Error::Unsupported(UNSUPPORTED_MESSAGE.to_string()));
        }

        let Some(granted) = self.enumerated.request_device().await? else {
            return Ok(None);
        };
        info!(device = %backend::label(granted.as_ref()), "Device added");

        self.refresh_enumerated().await;
        if !self.selection.select_manually(granted.serial(), &self.candidates) {
            debug!(serial = %granted.serial(), "Added device not listed yet");
        }
        Ok(Some(BackendSummary::from(&granted)))
    }

    fn status(&self) -> ManagerStatus {
        ManagerStatus {
            candidates: self.candidates.summaries(),
            selected: self.selection.selected_serial().map(str::to_string),
            connecting: self.session.is_connecting(),
            connected: self
                .session
                .active()
                .map(|session| session.backend().serial().to_string()),
            add_device_enabled: self.supported,
        }
    }
}

async fn tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => futures::future::pending().await,
    }
}
