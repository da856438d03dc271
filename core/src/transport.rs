//! Transport abstraction for the BlueST core
//!
//! The radio stack is an external collaborator. The core only needs the two
//! capabilities below: an adapter that scans and opens per-device links, and
//! a per-device link offering GATT read/write/notify. Implementations are not
//! required to be thread-safe; the `Node` serializes every call behind its
//! own lock.

use crate::advertising::AdStructure;
use crate::gatt::Service;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Errors reported by a transport implementation
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum TransportError {
    #[error("Not connected")]
    NotConnected,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Transport not available: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// One device seen during a scan slice
#[derive(Debug, Clone, PartialEq)]
pub struct ScanEntry {
    /// MAC address, colon separated (`"C0:85:23:31:43:5B"`)
    pub address: String,
    /// RSSI in dBm
    pub rssi: i16,
    /// Advertising structures as reported by the radio stack
    pub advertising: Vec<AdStructure>,
}

impl ScanEntry {
    pub fn new(address: impl Into<String>, rssi: i16, advertising: Vec<AdStructure>) -> Self {
        Self {
            address: address.into(),
            rssi,
            advertising,
        }
    }
}

/// A characteristic value change pushed by the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub handle: u16,
    pub data: Vec<u8>,
}

impl Notification {
    pub fn new(handle: u16, data: Vec<u8>) -> Self {
        Self { handle, data }
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Notification {{ handle: {:#06x}, data_len: {} }}",
            self.handle,
            self.data.len()
        )
    }
}

/// Host-side adapter: discovery plus opening a link to one device
pub trait BleAdapter: Send {
    /// Scan for `timeout` and return every advertisement seen.
    fn scan(&mut self, timeout: Duration) -> Result<Vec<ScanEntry>, TransportError>;

    /// Create an (unconnected) link to the device with the given address.
    fn open(&mut self, address: &str) -> Result<Box<dyn Transport>, TransportError>;
}

/// Per-device GATT link
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send {
    fn connect(&mut self) -> Result<(), TransportError>;

    fn disconnect(&mut self) -> Result<(), TransportError>;

    /// Discover the GATT database. Only valid while connected.
    fn services(&mut self) -> Result<Vec<Service>, TransportError>;

    fn read(&mut self, handle: u16) -> Result<Vec<u8>, TransportError>;

    fn write(&mut self, handle: u16, data: &[u8], with_response: bool)
        -> Result<(), TransportError>;

    /// Turn notifications for a characteristic on or off (CCCD write).
    fn set_notify(&mut self, handle: u16, enabled: bool) -> Result<(), TransportError>;

    /// Block for at most `timeout` waiting for one notification.
    fn wait_for_notification(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<Notification>, TransportError>;
}
