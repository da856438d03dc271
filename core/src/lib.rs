// BlueST SDK core
//
// Protocol layer for BLE sensor boards speaking BlueST: advertising decode,
// feature multiplexing over characteristic notifications, device timestamp
// unwrapping, firmware upgrade and AI algorithm control over the debug
// console. The radio stack itself lives behind the `transport` traits.

pub mod advertising;
pub mod ai_algos;
pub mod codec;
pub mod config;
pub mod console;
pub mod crc;
pub mod dispatch;
pub mod feature;
pub mod firmware;
pub mod gatt;
pub mod manager;
pub mod node;
pub mod registry;
pub mod timestamp;
pub mod transport;

use thiserror::Error;

pub use advertising::{AdStructure, AdvertisingDataParser, DeviceDescriptor, DeviceType};
pub use ai_algos::{AiAlgos, AiAlgosListener};
pub use config::SdkConfig;
pub use console::{DebugConsole, DebugConsoleListener};
pub use crc::Stm32Crc32;
pub use dispatch::{Dispatcher, SerialQueue};
pub use feature::{
    Extracted, Feature, FeatureDecoder, FeatureListener, FeatureLogger, Field, FieldType,
    HostTimestamp, Sample, Value,
};
pub use firmware::{
    FirmwareFile, FirmwareType, FirmwareUpgrade, FirmwareUpgradeError, FirmwareUpgradeListener,
};
pub use gatt::{CharProperties, Characteristic, Service};
pub use manager::{Manager, ManagerListener};
pub use node::{Node, NodeListener, NodeStatus};
pub use registry::{FeatureKind, FeatureRegistry};
pub use timestamp::TimestampUnwrapper;
pub use transport::{BleAdapter, Notification, ScanEntry, Transport, TransportError};

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BlueStError {
    #[error("Invalid advertising data: {0}")]
    InvalidAdvertisingData(String),
    #[error("Invalid feature bitmask: {0}")]
    InvalidFeatureBitmask(String),
    #[error("Insufficient data: needed {needed} bytes, {available} available")]
    InsufficientData { needed: usize, available: usize },
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
    #[error("Invalid length: {0} is not a multiple of 4")]
    InvalidLength(usize),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for BlueStError {
    fn from(err: std::io::Error) -> Self {
        BlueStError::Io(err.to_string())
    }
}

/// Install a `tracing` subscriber honouring `RUST_LOG` (default `info`).
///
/// Safe to call more than once; only the first call installs anything.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_conversion() {
        let err: BlueStError =
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing.bin").into();
        assert!(matches!(err, BlueStError::Io(ref msg) if msg.contains("missing.bin")));
    }

    #[test]
    fn test_transport_error_conversion() {
        let err: BlueStError = TransportError::NotConnected.into();
        assert_eq!(err, BlueStError::Transport(TransportError::NotConnected));
    }

    #[test]
    fn test_init_logging_is_idempotent() {
        init_logging();
        init_logging();
    }
}
