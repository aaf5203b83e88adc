//! Connection manager daemon.
//!
//! Discovers devices on USB serial ports and at the configured TCP endpoint,
//! and takes line commands on stdin to select, connect and disconnect.

use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal::unix::{self, SignalKind};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use tether::{
    backend::BackendSummary,
    config::Config,
    credentials::MemoryCredentialStore,
    manager::{Collaborators, ConnectionManager},
    manager_cmd::ManagerHandle,
    reporter::LogReporter,
    session::LinkSessionFactory,
    transport::{SerialPortSource, TcpSource},
};
use tether::tracing::{self, prelude::*};

const HELP: &str = "\
commands:
  list              show available devices
  status            show manager state as JSON
  select <serial>   choose a device
  connect           connect to the chosen device
  disconnect        release the active session
  add               request access to another device
  refresh           re-list attached devices
  quit              stop the daemon";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing::init_journald_or_stdout();

    let config = Config::load()?;
    debug!(?config, "Configuration");

    let parts = Collaborators {
        enumerated: Arc::new(SerialPortSource::new(
            config.discovery.baud_rate,
            config.discovery.watch_interval(),
        )),
        polled: Some(Arc::new(TcpSource::new(config.poll.timeout()))),
        sessions: Arc::new(LinkSessionFactory),
        credentials: Arc::new(MemoryCredentialStore::new()),
        reporter: Arc::new(LogReporter),
    };
    let (manager, handle) = ConnectionManager::new(config, parts);

    let running = CancellationToken::new();
    let tracker = TaskTracker::new();
    tracker.spawn({
        let running = running.clone();
        async move {
            if let Err(e) = manager.run(running.clone()).await {
                error!(error = %e, "Connection manager stopped");
                running.cancel();
            }
        }
    });
    tracker.spawn(console(handle, running.clone()));
    tracker.close();
    info!("Started.");

    let mut sigint = unix::signal(SignalKind::interrupt())?;
    let mut sigterm = unix::signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sigint.recv() => {},
        _ = sigterm.recv() => {},
        _ = running.cancelled() => {},
    }

    trace!("Shutting down.");
    running.cancel();

    tracker.wait().await;
    info!("Exiting.");
    Ok(())
}

/// Read commands from stdin until EOF or `quit`.
async fn console(handle: ManagerHandle, running: CancellationToken) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            _ = running.cancelled() => break,
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) => line,
            // No terminal attached (e.g. under systemd); keep running.
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Failed to read console input");
                break;
            }
        };

        let mut words = line.split_whitespace();
        let result = match (words.next(), words.next()) {
            (None, _) => continue,
            (Some("quit"), _) => {
                running.cancel();
                break;
            }
            (Some(command), argument) => run_command(&handle, command, argument).await,
        };

        if let Err(e) = result {
            println!("error: {e}");
        }
    }
}

async fn run_command(
    handle: &ManagerHandle,
    command: &str,
    argument: Option<&str>,
) -> anyhow::Result<()> {
    match (command, argument) {
        ("list", _) => {
            let status = handle.status().await?;
            if status.candidates.is_empty() {
                println!("No available devices");
            }
            for candidate in &status.candidates {
                let marker = if status.selected.as_deref() == Some(candidate.serial.as_str()) {
                    '*'
                } else {
                    ' '
                };
                println!("{} {} [{}]", marker, candidate.label, candidate.kind);
            }
        }
        ("status", _) => {
            let status = handle.status().await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        ("select", Some(serial)) => {
            if !handle.select(serial).await? {
                println!("{serial} is not available");
            }
        }
        ("connect", _) => {
            println!("Connecting... please authorize the connection on the device");
            handle.connect().await?;
            println!("Connected");
        }
        ("disconnect", _) => {
            handle.disconnect().await?;
            println!("Disconnected");
        }
        ("add", _) => match handle.add_device().await? {
            Some(BackendSummary { label, .. }) => println!("Added {label}"),
            None => println!("No device added"),
        },
        ("refresh", _) => handle.refresh().await?,
        _ => println!("{HELP}"),
    }
    Ok(())
}
