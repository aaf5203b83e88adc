//! USB serial discovery.
//!
//! Lists USB serial ports that report a serial number and exposes each as an
//! enumerated backend. Ports without a USB serial number are skipped since
//! they cannot be recognized again after a replug.
//!
//! Presence changes are detected by rescanning on an interval and comparing
//! serial numbers between scans.

use async_trait::async_trait;
use std::{collections::HashSet, fmt, sync::Arc, time::Duration};
use tokio::sync::{mpsc, Mutex};
use tokio::time::{self, MissedTickBehavior};
use tokio_serial::{SerialPortBuilderExt, SerialPortInfo, SerialPortType, SerialStream};
use tokio_util::sync::CancellationToken;

use super::{EnumeratedSource, Subscription, TransportEvent};
use crate::{
    backend::{Backend, BackendHandle, BackendKind},
    error::{Error, Result},
    tracing::prelude::*,
};

/// The parts of a USB serial port listing we care about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortEntry {
    pub port_name: String,
    pub serial_number: String,
    pub name: Option<String>,
}

impl PortEntry {
    /// Extract an entry from a port listing, if it is a USB port with a
    /// serial number.
    pub fn from_port_info(info: SerialPortInfo) -> Option<Self> {
        let SerialPortType::UsbPort(usb) = info.port_type else {
            return None;
        };
        let serial_number = usb.serial_number.filter(|s| !s.is_empty())?;
        Some(Self {
            port_name: info.port_name,
            serial_number,
            name: usb.product.or(usb.manufacturer),
        })
    }
}

/// A USB serial device.
pub struct SerialBackend {
    entry: PortEntry,
    baud_rate: u32,
    link: Mutex<Option<SerialStream>>,
}

impl SerialBackend {
    pub fn new(entry: PortEntry, baud_rate: u32) -> Self {
        Self {
            entry,
            baud_rate,
            link: Mutex::new(None),
        }
    }

    pub fn port_name(&self) -> &str {
        &self.entry.port_name
    }
}

impl fmt::Debug for SerialBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialBackend")
            .field("entry", &self.entry)
            .field("baud_rate", &self.baud_rate)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Backend for SerialBackend {
    fn serial(&self) -> &str {
        &self.entry.serial_number
    }

    fn name(&self) -> Option<&str> {
        self.entry.name.as_deref()
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Enumerated
    }

    async fn connect(&self) -> Result<()> {
        let mut link = self.link.lock().await;
        if link.is_some() {
            return Ok(());
        }

        let stream = tokio_serial::new(&self.entry.port_name, self.baud_rate).open_native_async()?;
        debug!(
            serial = %self.entry.serial_number,
            port = %self.entry.port_name,
            "Opened serial link"
        );
        *link = Some(stream);
        Ok(())
    }

    async fn dispose(&self) -> Result<()> {
        if self.link.lock().await.take().is_some() {
            debug!(serial = %self.entry.serial_number, "Closed serial link");
        }
        Ok(())
    }
}

/// Enumerated source over USB serial ports.
pub struct SerialPortSource {
    baud_rate: u32,
    watch_interval: Duration,
}

impl SerialPortSource {
    pub fn new(baud_rate: u32, watch_interval: Duration) -> Self {
        Self {
            baud_rate,
            watch_interval,
        }
    }

    async fn scan() -> Result<Vec<PortEntry>> {
        let ports = tokio::task::spawn_blocking(tokio_serial::available_ports)
            .await
            .map_err(|e| Error::Discovery(format!("port scan task failed: {e}")))??;
        Ok(ports.into_iter().filter_map(PortEntry::from_port_info).collect())
    }
}

#[async_trait]
impl EnumeratedSource for SerialPortSource {
    async fn is_supported(&self) -> bool {
        Self::scan().await.is_ok()
    }

    async fn list(&self) -> Result<Vec<BackendHandle>> {
        let entries = Self::scan().await?;
        Ok(entries
            .into_iter()
            .map(|entry| Arc::new(SerialBackend::new(entry, self.baud_rate)) as BackendHandle)
            .collect())
    }

    fn watch(&self, events: mpsc::Sender<TransportEvent>) -> Result<Subscription> {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(watch_task(self.watch_interval, events, cancel.clone()));
        Ok(Subscription::new(cancel, task))
    }

    // Serial ports need no access grant, so the first present device is
    // offered.
    async fn request_device(&self) -> Result<Option<BackendHandle>> {
        Ok(self.list().await?.into_iter().next())
    }
}

async fn watch_task(
    period: Duration,
    events: mpsc::Sender<TransportEvent>,
    cancel: CancellationToken,
) {
    trace!("Serial watcher started.");

    let mut known = serials_or_empty(SerialPortSource::scan().await);
    // The consumer listed before this first scan. Have it re-list once so a
    // device attached in between is not missed.
    if events.send(TransportEvent::DevicesChanged).await.is_err() {
        return;
    }
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let current = serials_or_empty(SerialPortSource::scan().await);
                for event in diff_serials(&known, &current) {
                    if events.send(event).await.is_err() {
                        trace!("Serial watcher receiver gone.");
                        return;
                    }
                }
                known = current;
            }
        }
    }

    trace!("Serial watcher stopped.");
}

fn serials_or_empty(scan: Result<Vec<PortEntry>>) -> Vec<String> {
    match scan {
        Ok(entries) => entries.into_iter().map(|e| e.serial_number).collect(),
        Err(e) => {
            debug!(error = %e, "Serial port scan failed");
            Vec::new()
        }
    }
}

/// Events describing the change from `previous` to `current`.
///
/// Every newly present serial produces an attach event. Removals produce a
/// single list-changed event, and only when nothing was attached, since an
/// attach already makes the consumer re-list.
pub fn diff_serials(previous: &[String], current: &[String]) -> Vec<TransportEvent> {
    let before: HashSet<&String> = previous.iter().collect();
    let after: HashSet<&String> = current.iter().collect();

    let attached: Vec<TransportEvent> = current
        .iter()
        .filter(|serial| !before.contains(serial))
        .map(|serial| TransportEvent::DeviceAttached {
            serial: serial.clone(),
        })
        .collect();

    if attached.is_empty() && previous.iter().any(|serial| !after.contains(serial)) {
        return vec![TransportEvent::DevicesChanged];
    }
    attached
}

#[cfg(test)]
mod tests {
    use super::*;

    fn serials(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn entry(serial: &str, name: Option<&str>) -> PortEntry {
        PortEntry {
            port_name: format!("/dev/ttyACM-{serial}"),
            serial_number: serial.to_string(),
            name: name.map(str::to_string),
        }
    }

    #[test]
    fn test_diff_no_change() {
        assert!(diff_serials(&serials(&["A", "B"]), &serials(&["B", "A"])).is_empty());
    }

    #[test]
    fn test_diff_attach() {
        assert_eq!(
            diff_serials(&serials(&["A"]), &serials(&["A", "B"])),
            vec![TransportEvent::DeviceAttached { serial: "B".into() }]
        );
    }

    #[test]
    fn test_diff_detach() {
        assert_eq!(
            diff_serials(&serials(&["A", "B"]), &serials(&["A"])),
            vec![TransportEvent::DevicesChanged]
        );
    }

    #[test]
    fn test_diff_swap_reports_attach_only() {
        assert_eq!(
            diff_serials(&serials(&["A"]), &serials(&["B"])),
            vec![TransportEvent::DeviceAttached { serial: "B".into() }]
        );
    }

    #[test]
    fn test_backend_fields() {
        let backend = SerialBackend::new(entry("ABC123", Some("Pixel")), 115_200);
        assert_eq!(backend.serial(), "ABC123");
        assert_eq!(backend.name(), Some("Pixel"));
        assert_eq!(backend.kind(), BackendKind::Enumerated);
        assert_eq!(backend.port_name(), "/dev/ttyACM-ABC123");
    }

    #[tokio::test]
    async fn test_dispose_unopened_is_noop() {
        let backend = SerialBackend::new(entry("ABC123", None), 115_200);
        backend.dispose().await.unwrap();
    }

    #[tokio::test]
    async fn test_watcher_starts_with_relist() {
        let source = SerialPortSource::new(115_200, Duration::from_secs(3600));
        let (tx, mut rx) = mpsc::channel(4);

        let subscription = source.watch(tx).unwrap();

        assert_eq!(rx.recv().await, Some(TransportEvent::DevicesChanged));
        subscription.cancel().await;
    }

    #[tokio::test]
    async fn test_capability_matches_port_scan() {
        let source = SerialPortSource::new(115_200, Duration::from_secs(1));
        let scannable = tokio::task::spawn_blocking(tokio_serial::available_ports)
            .await
            .unwrap()
            .is_ok();
        assert_eq!(source.is_supported().await, scannable);
    }

    #[tokio::test]
    async fn test_connect_missing_port_fails() {
        let mut missing = entry("GONE", None);
        missing.port_name = "/dev/tether-test-no-such-port".into();
        let backend = SerialBackend::new(missing, 115_200);
        assert!(backend.connect().await.is_err());
    }
}
