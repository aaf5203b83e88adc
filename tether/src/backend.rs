//! Backend handles produced by discovery sources.
//!
//! A backend is one reachable device on one transport. It is identified by a
//! serial that stays stable across replugs, but each discovery pass hands out
//! fresh instances: two handles with the same serial are distinct objects,
//! and the one in the latest candidate set is the one to use.

use async_trait::async_trait;
use serde::Serialize;
use std::{fmt, sync::Arc};
use strum::{Display, EnumString};

use crate::error::Result;

/// How a backend was discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Listed by a source that reports presence itself (attached hardware)
    Enumerated,
    /// Found by connect-and-release probing of a fixed endpoint
    Polled,
}

/// A device reachable over one transport.
///
/// `connect` opens the underlying link and `dispose` releases it. A backend
/// can be connected again after it has been disposed.
#[async_trait]
pub trait Backend: Send + Sync + fmt::Debug {
    /// Stable identifier of the physical or logical device.
    fn serial(&self) -> &str;

    /// Human readable name, if the transport reports one.
    fn name(&self) -> Option<&str>;

    fn kind(&self) -> BackendKind;

    /// Open the transport link.
    async fn connect(&self) -> Result<()>;

    /// Release the transport link. Releasing an unopened backend is a no-op.
    async fn dispose(&self) -> Result<()>;
}

/// Shared handle to a backend instance.
pub type BackendHandle = Arc<dyn Backend>;

/// Display label for a backend: `"<serial> (<name>)"`, or the bare serial.
pub fn label(backend: &dyn Backend) -> String {
    match backend.name() {
        Some(name) => format!("{} ({})", backend.serial(), name),
        None => backend.serial().to_string(),
    }
}

/// True if both handles point at the same backend instance.
pub fn same_instance(a: &BackendHandle, b: &BackendHandle) -> bool {
    Arc::ptr_eq(a, b)
}

/// Plain description of a backend for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendSummary {
    pub serial: String,
    pub name: Option<String>,
    pub kind: BackendKind,
    pub label: String,
}

impl From<&BackendHandle> for BackendSummary {
    fn from(backend: &BackendHandle) -> Self {
        Self {
            serial: backend.serial().to_string(),
            name: backend.name().map(str::to_string),
            kind: backend.kind(),
            label: label(backend.as_ref()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeBackend;
    use std::str::FromStr;

    #[test]
    fn test_label_with_name() {
        let backend = FakeBackend::named("0123456789ABCDEF", "Pixel 7");
        assert_eq!(label(backend.as_ref()), "0123456789ABCDEF (Pixel 7)");
    }

    #[test]
    fn test_label_without_name() {
        let backend = FakeBackend::enumerated("0123456789ABCDEF");
        assert_eq!(label(backend.as_ref()), "0123456789ABCDEF");
    }

    #[test]
    fn test_kind_strings() {
        assert_eq!(BackendKind::Polled.to_string(), "polled");
        assert_eq!(
            BackendKind::from_str("enumerated").unwrap(),
            BackendKind::Enumerated
        );
    }

    #[test]
    fn test_same_instance_is_identity_not_serial() {
        let a: BackendHandle = FakeBackend::enumerated("X");
        let b: BackendHandle = FakeBackend::enumerated("X");
        assert!(same_instance(&a, &a.clone()));
        assert!(!same_instance(&a, &b));
    }

    #[test]
    fn test_summary() {
        let backend: BackendHandle = FakeBackend::polled("127.0.0.1:15555");
        let summary = BackendSummary::from(&backend);
        assert_eq!(summary.kind, BackendKind::Polled);
        assert_eq!(summary.label, "127.0.0.1:15555 (TCP)");
    }
}
