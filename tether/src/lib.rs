//! Device discovery and connection management.
//!
//! tether finds devices on two kinds of transport, attached USB serial
//! hardware that reports its own presence and a TCP endpoint that has to be
//! probed, keeps one of them selected while the device list changes, and
//! owns the single authenticated session to the chosen device.
//!
//! The [`manager::ConnectionManager`] task ties this together; everything
//! else talks to it through a [`manager_cmd::ManagerHandle`].

pub mod aggregator;
pub mod backend;
pub mod config;
pub mod credentials;
pub mod error;
pub mod manager;
pub mod manager_cmd;
pub mod reporter;
pub mod selection;
pub mod session;
pub mod tracing;
pub mod transport;

#[cfg(test)]
mod testing;
