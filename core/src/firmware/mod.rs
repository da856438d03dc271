//! Firmware upgrade over the debug console
//!
//! The image is announced with a command frame, the device echoes the CRC,
//! then the image goes out in blocks and the device answers with a final
//! ACK. Results reach the caller only through `FirmwareUpgradeListener`.

pub mod file;
pub mod transfer;

pub use file::{FirmwareFile, FirmwareType};
pub use transfer::{FirmwareTransfer, TransferEvent, TransferState};

use crate::console::{DebugConsole, DebugConsoleListener};
use crate::dispatch::Dispatcher;
use crate::node::Node;
use crate::BlueStError;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum FirmwareUpgradeError {
    /// The image could not be read or the device rejected it
    #[error("Corrupted file")]
    CorruptedFile,

    /// The device did not acknowledge the command or the link failed
    #[error("Transmission error")]
    Transmission,

    #[error("Invalid firmware")]
    InvalidFirmware,

    #[error("Upgrade cancelled")]
    Cancelled,
}

/// Upgrade callbacks; each upload ends with exactly one of
/// `on_complete` / `on_error`.
pub trait FirmwareUpgradeListener: Send + Sync {
    fn on_progress(&self, _file: &FirmwareFile, _bytes_sent: u32, _total: u32) {}

    fn on_complete(&self, file: &FirmwareFile, bytes_sent: u32);

    fn on_error(&self, file: &FirmwareFile, error: FirmwareUpgradeError);
}

type ListenerList = Arc<RwLock<Vec<Arc<dyn FirmwareUpgradeListener>>>>;

/// Firmware upgrade front end for one node
pub struct FirmwareUpgrade {
    node: Arc<Node>,
    console: Arc<DebugConsole>,
    listeners: ListenerList,
    cancel: Arc<AtomicBool>,
}

impl FirmwareUpgrade {
    /// Upgrade service for `node`, if its board supports it and it exposes a
    /// debug console (connect first).
    pub fn for_node(node: &Arc<Node>) -> Option<Self> {
        if !node.device_type().accepts_console_commands() {
            return None;
        }
        let console = node.debug_console()?;
        Some(Self {
            node: node.clone(),
            console,
            listeners: Arc::new(RwLock::new(Vec::new())),
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    pub fn add_listener(&self, listener: Arc<dyn FirmwareUpgradeListener>) {
        let mut listeners = self.listeners.write();
        if !listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            listeners.push(listener);
        }
    }

    pub fn remove_listener(&self, listener: &Arc<dyn FirmwareUpgradeListener>) {
        self.listeners.write().retain(|l| !Arc::ptr_eq(l, listener));
    }

    pub fn is_upgrading(&self) -> bool {
        self.console.is_uploading()
    }

    /// Ask the running upload to stop at its next block boundary.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Start uploading `file`.
    ///
    /// Returns `Ok(false)` when an upload is already running on this node.
    /// Otherwise the outcome arrives through the listeners.
    pub fn upgrade_firmware(&self, file: &FirmwareFile) -> Result<bool, BlueStError> {
        if !self.console.try_begin_upload() {
            warn!("Node {}: firmware upload already running", self.node.tag());
            return Ok(false);
        }
        self.cancel.store(false, Ordering::SeqCst);

        let dispatcher = self.node.dispatcher();
        if file.is_empty() {
            self.console.end_upload();
            notify_error(
                &dispatcher,
                &self.listeners,
                file,
                FirmwareUpgradeError::InvalidFirmware,
            );
            return Ok(true);
        }

        let config = self.node.config();
        let transfer = FirmwareTransfer::new(
            file.reader(),
            file.size(),
            file.crc(),
            config.firmware_packet_bytes,
            config.firmware_packets_per_block,
            self.cancel.clone(),
        );
        let command = transfer.command();
        let session = UpgradeSession::new(
            file.clone(),
            transfer,
            self.console.clone(),
            self.listeners.clone(),
            dispatcher,
        );

        let as_listener: Arc<dyn DebugConsoleListener> = session.clone();
        if let Err(e) = self.console.add_listener(as_listener) {
            self.console.end_upload();
            return Err(e);
        }

        info!(
            "Node {}: upgrading firmware with {} ({} bytes, crc {:#010x})",
            self.node.tag(),
            file.path().display(),
            file.size(),
            file.crc()
        );
        match self.console.write(&command) {
            Ok(written) if written == command.len() => {}
            Ok(written) => {
                warn!(
                    "Firmware command short write: {} of {} bytes",
                    written,
                    command.len()
                );
                session.finish(TransferEvent::Failed(FirmwareUpgradeError::Transmission));
            }
            Err(e) => {
                error!("Firmware command write failed: {}", e);
                session.finish(TransferEvent::Failed(FirmwareUpgradeError::Transmission));
            }
        }
        Ok(true)
    }
}

fn notify_error(
    dispatcher: &Dispatcher,
    listeners: &ListenerList,
    file: &FirmwareFile,
    error: FirmwareUpgradeError,
) {
    for listener in listeners.read().clone() {
        let file = file.clone();
        dispatcher.submit(move || listener.on_error(&file, error));
    }
}

/// One running upload, registered as a console listener until it ends
struct UpgradeSession {
    me: Weak<UpgradeSession>,
    file: FirmwareFile,
    transfer: Mutex<FirmwareTransfer>,
    console: Arc<DebugConsole>,
    listeners: ListenerList,
    dispatcher: Arc<Dispatcher>,
    finished: AtomicBool,
}

impl UpgradeSession {
    fn new(
        file: FirmwareFile,
        transfer: FirmwareTransfer,
        console: Arc<DebugConsole>,
        listeners: ListenerList,
        dispatcher: Arc<Dispatcher>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            file,
            transfer: Mutex::new(transfer),
            console,
            listeners,
            dispatcher,
            finished: AtomicBool::new(false),
        })
    }

    fn publish(&self, event: TransferEvent) {
        match event {
            TransferEvent::Progress { bytes_sent, total } => {
                for listener in self.listeners.read().clone() {
                    let file = self.file.clone();
                    self.dispatcher
                        .submit(move || listener.on_progress(&file, bytes_sent, total));
                }
            }
            terminal => self.finish(terminal),
        }
    }

    /// Deliver the terminal event once, then release the console.
    fn finish(&self, event: TransferEvent) {
        if self.finished.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(mut transfer) = self.transfer.try_lock() {
            transfer.abort();
        }

        match event {
            TransferEvent::Complete { bytes_sent } => {
                for listener in self.listeners.read().clone() {
                    let file = self.file.clone();
                    self.dispatcher
                        .submit(move || listener.on_complete(&file, bytes_sent));
                }
            }
            TransferEvent::Failed(error) => {
                notify_error(&self.dispatcher, &self.listeners, &self.file, error)
            }
            TransferEvent::Progress { .. } => {}
        }

        if let Some(me) = self.me.upgrade() {
            let as_listener: Arc<dyn DebugConsoleListener> = me;
            if let Err(e) = self.console.remove_listener(&as_listener) {
                warn!("Failed to release debug console after upgrade: {}", e);
            }
        }
        self.console.end_upload();
    }
}

impl DebugConsoleListener for UpgradeSession {
    fn on_stdout_receive(&self, console: &Arc<DebugConsole>, data: &[u8]) {
        if self.finished.load(Ordering::SeqCst) {
            return;
        }
        let mut events = Vec::new();
        self.transfer
            .lock()
            .on_stdout(data, &**console, &mut |event| events.push(event));
        for event in events {
            self.publish(event);
        }
    }

    fn on_closed(&self, _console: &Arc<DebugConsole>) {
        warn!("Debug console closed during firmware upload");
        self.finish(TransferEvent::Failed(FirmwareUpgradeError::Transmission));
    }
}
