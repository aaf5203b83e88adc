//! Common error types for tether.
//!
//! This module provides a centralized Error enum using thiserror,
//! with conversions from underlying error types used throughout the crate.

use thiserror::Error;

/// Main error type for tether operations.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors from tokio or std
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial port errors
    #[error("Serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Device enumeration failed
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// Backend link could not be opened or released
    #[error("Transport error: {0}")]
    Transport(String),

    /// Credential store could not supply or create a key
    #[error("Credential error: {0}")]
    Credential(String),

    /// Device rejected the session handshake
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// Session lifecycle errors
    #[error("Session error: {0}")]
    Session(String),

    /// The environment lacks a required transport capability
    #[error("{0}")]
    Unsupported(String),

    #[error("No device selected")]
    NoSelection,

    #[error("A connection attempt is already in progress")]
    ConnectInProgress,

    #[error("A device is already connected")]
    AlreadyConnected,

    #[error("No device is connected")]
    NotConnected,

    /// The manager task has stopped and no longer accepts commands
    #[error("Connection manager is not running")]
    ManagerClosed,

    /// Generic errors for development
    #[error("{0}")]
    Other(String),
}

/// Convenience type alias for Results using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
