//! Scripted stand-ins for transports, sessions and the error surface.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};
use tokio::sync::{mpsc, Notify};

use crate::{
    backend::{Backend, BackendHandle, BackendKind},
    credentials::CredentialStore,
    error::{Error, Result},
    reporter::ErrorReporter,
    session::{Session, SessionFactory, SessionHandle},
    tracing::prelude::*,
    transport::{EnumeratedSource, PolledSource, Subscription, TransportEvent},
};

#[derive(Debug)]
pub struct FakeBackend {
    serial: String,
    name: Option<String>,
    kind: BackendKind,
    connects: AtomicUsize,
    disposals: AtomicUsize,
    fail_connect: AtomicBool,
    hang_connect: AtomicBool,
}

impl FakeBackend {
    fn build(serial: &str, name: Option<&str>, kind: BackendKind) -> Arc<Self> {
        Arc::new(Self {
            serial: serial.to_string(),
            name: name.map(str::to_string),
            kind,
            connects: AtomicUsize::new(0),
            disposals: AtomicUsize::new(0),
            fail_connect: AtomicBool::new(false),
            hang_connect: AtomicBool::new(false),
        })
    }

    pub fn enumerated(serial: &str) -> Arc<Self> {
        Self::build(serial, None, BackendKind::Enumerated)
    }

    pub fn named(serial: &str, name: &str) -> Arc<Self> {
        Self::build(serial, Some(name), BackendKind::Enumerated)
    }

    pub fn polled(endpoint: &str) -> Arc<Self> {
        Self::build(endpoint, Some("TCP"), BackendKind::Polled)
    }

    pub fn fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn hang_connect(&self, hang: bool) {
        self.hang_connect.store(hang, Ordering::SeqCst);
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disposals(&self) -> usize {
        self.disposals.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backend for FakeBackend {
    fn serial(&self) -> &str {
        &self.serial
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn connect(&self) -> Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.hang_connect.load(Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(Error::Transport(format!("{} unreachable", self.serial)));
        }
        Ok(())
    }

    async fn dispose(&self) -> Result<()> {
        self.disposals.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Enumerated source whose device list and events are set by the test.
#[derive(Default)]
pub struct FakeEnumerated {
    devices: Mutex<Vec<BackendHandle>>,
    fail_listing: AtomicBool,
    unsupported: AtomicBool,
    listings: AtomicUsize,
    requestable: Mutex<Option<BackendHandle>>,
    events: Mutex<Option<mpsc::Sender<TransportEvent>>>,
}

impl FakeEnumerated {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_devices(&self, devices: Vec<BackendHandle>) {
        *self.devices.lock() = devices;
    }

    pub fn fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    pub fn set_unsupported(&self) {
        self.unsupported.store(true, Ordering::SeqCst);
    }

    /// Device handed out by the next `request_device`.
    pub fn offer(&self, device: BackendHandle) {
        *self.requestable.lock() = Some(device);
    }

    pub fn listings(&self) -> usize {
        self.listings.load(Ordering::SeqCst)
    }

    pub fn is_watched(&self) -> bool {
        self.events.lock().is_some()
    }

    /// Fire a watcher event, as the transport would.
    pub async fn emit(&self, event: TransportEvent) {
        let sender = self.events.lock().clone().expect("source is not being watched");
        sender.send(event).await.expect("watcher receiver dropped");
    }
}

#[async_trait]
impl EnumeratedSource for FakeEnumerated {
    async fn is_supported(&self) -> bool {
        !self.unsupported.load(Ordering::SeqCst)
    }

    async fn list(&self) -> Result<Vec<BackendHandle>> {
        self.listings.fetch_add(1, Ordering::SeqCst);
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(Error::Discovery("enumeration unavailable".into()));
        }
        Ok(self.devices.lock().clone())
    }

    fn watch(&self, events: mpsc::Sender<TransportEvent>) -> Result<Subscription> {
        *self.events.lock() = Some(events);
        Ok(Subscription::inert())
    }

    async fn request_device(&self) -> Result<Option<BackendHandle>> {
        let offered = self.requestable.lock().take();
        if let Some(device) = &offered {
            self.devices.lock().push(device.clone());
        }
        Ok(offered)
    }
}

/// Polled source whose backends succeed, fail or hang on connect.
pub struct FakePolled {
    reachable: AtomicBool,
    hanging: bool,
    opened: Mutex<Vec<Arc<FakeBackend>>>,
}

impl FakePolled {
    fn build(reachable: bool, hanging: bool) -> Self {
        Self {
            reachable: AtomicBool::new(reachable),
            hanging,
            opened: Mutex::new(Vec::new()),
        }
    }

    pub fn reachable() -> Self {
        Self::build(true, false)
    }

    pub fn unreachable() -> Self {
        Self::build(false, false)
    }

    pub fn hanging() -> Self {
        Self::build(true, true)
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Number of probe backends opened so far.
    pub fn probes(&self) -> usize {
        self.opened.lock().len()
    }

    pub fn last_backend(&self) -> Option<Arc<FakeBackend>> {
        self.opened.lock().last().cloned()
    }
}

impl PolledSource for FakePolled {
    fn open(&self, endpoint: &str) -> BackendHandle {
        let backend = FakeBackend::polled(endpoint);
        backend.fail_connect(!self.reachable.load(Ordering::SeqCst));
        backend.hang_connect(self.hanging);
        self.opened.lock().push(backend.clone());
        backend
    }
}

/// How fake sessions answer the handshake.
#[derive(Debug, Clone)]
pub enum Handshake {
    Accept,
    /// Fail with a credential error carrying this message
    Reject(String),
    /// Wait until [`FakeSessionFactory::release`], then accept
    Hold,
}

pub struct FakeSession {
    backend: BackendHandle,
    handshake: Handshake,
    gate: Arc<Notify>,
    fail_dispose: bool,
    handshakes: AtomicUsize,
    disposals: AtomicUsize,
}

impl FakeSession {
    pub fn handshakes(&self) -> usize {
        self.handshakes.load(Ordering::SeqCst)
    }

    pub fn disposals(&self) -> usize {
        self.disposals.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Session for FakeSession {
    fn backend(&self) -> &BackendHandle {
        &self.backend
    }

    async fn connect(&self, _credentials: &dyn CredentialStore) -> Result<()> {
        self.handshakes.fetch_add(1, Ordering::SeqCst);
        match &self.handshake {
            Handshake::Accept => Ok(()),
            Handshake::Reject(message) => Err(Error::Credential(message.clone())),
            Handshake::Hold => {
                self.gate.notified().await;
                Ok(())
            }
        }
    }

    async fn dispose(&self) -> Result<()> {
        self.disposals.fetch_add(1, Ordering::SeqCst);
        if self.fail_dispose {
            return Err(Error::Transport("device stopped responding".into()));
        }
        Ok(())
    }
}

pub struct FakeSessionFactory {
    handshake: Handshake,
    gate: Arc<Notify>,
    fail_dispose: AtomicBool,
    sessions: Mutex<Vec<Arc<FakeSession>>>,
}

impl FakeSessionFactory {
    pub fn new(handshake: Handshake) -> Self {
        Self {
            handshake,
            gate: Arc::new(Notify::new()),
            fail_dispose: AtomicBool::new(false),
            sessions: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_dispose(&self, fail: bool) {
        self.fail_dispose.store(fail, Ordering::SeqCst);
    }

    /// Let a held handshake complete.
    pub fn release(&self) {
        self.gate.notify_one();
    }

    pub fn created(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn session(&self, index: usize) -> Arc<FakeSession> {
        self.sessions.lock()[index].clone()
    }
}

impl SessionFactory for FakeSessionFactory {
    fn create(&self, backend: BackendHandle, span: Span) -> SessionHandle {
        span.in_scope(|| trace!("Creating fake session"));
        let session = Arc::new(FakeSession {
            backend,
            handshake: self.handshake.clone(),
            gate: self.gate.clone(),
            fail_dispose: self.fail_dispose.load(Ordering::SeqCst),
            handshakes: AtomicUsize::new(0),
            disposals: AtomicUsize::new(0),
        });
        self.sessions.lock().push(session.clone());
        session
    }
}

#[derive(Default)]
pub struct RecordingReporter {
    messages: Mutex<Vec<String>>,
}

impl RecordingReporter {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }
}

impl ErrorReporter for RecordingReporter {
    fn show(&self, message: &str) {
        self.messages.lock().push(message.to_string());
    }
}
