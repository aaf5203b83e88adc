//! TCP transport.
//!
//! A TCP endpoint has no presence notification. The manager probes it by
//! opening and immediately releasing a connection; while something answers,
//! the endpoint is offered as a polled backend whose serial is the address.

use async_trait::async_trait;
use std::{sync::Arc, time::Duration};
use tokio::{io::AsyncWriteExt, net::TcpStream, sync::Mutex, time};

use super::PolledSource;
use crate::{
    backend::{Backend, BackendHandle, BackendKind},
    error::{Error, Result},
    tracing::prelude::*,
};

const NAME: &str = "TCP";

/// A device reachable at a TCP address.
#[derive(Debug)]
pub struct TcpBackend {
    address: String,
    connect_timeout: Duration,
    link: Mutex<Option<TcpStream>>,
}

impl TcpBackend {
    pub fn new(address: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            address: address.into(),
            connect_timeout,
            link: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Backend for TcpBackend {
    fn serial(&self) -> &str {
        &self.address
    }

    fn name(&self) -> Option<&str> {
        Some(NAME)
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Polled
    }

    async fn connect(&self) -> Result<()> {
        let mut link = self.link.lock().await;
        if link.is_some() {
            return Ok(());
        }

        let stream = time::timeout(self.connect_timeout, TcpStream::connect(&self.address))
            .await
            .map_err(|_| Error::Transport(format!("connect to {} timed out", self.address)))?
            .map_err(|e| Error::Transport(format!("connect to {}: {}", self.address, e)))?;
        stream.set_nodelay(true)?;

        trace!(address = %self.address, "Opened TCP link");
        *link = Some(stream);
        Ok(())
    }

    async fn dispose(&self) -> Result<()> {
        let Some(mut stream) = self.link.lock().await.take() else {
            return Ok(());
        };
        trace!(address = %self.address, "Closing TCP link");
        stream
            .shutdown()
            .await
            .map_err(|e| Error::Transport(format!("close {}: {}", self.address, e)))
    }
}

/// Polled source producing [`TcpBackend`]s.
#[derive(Debug, Clone)]
pub struct TcpSource {
    connect_timeout: Duration,
}

impl TcpSource {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl PolledSource for TcpSource {
    fn open(&self, endpoint: &str) -> BackendHandle {
        Arc::new(TcpBackend::new(endpoint, self.connect_timeout))
    }
}
