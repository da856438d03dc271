//! Firmware transfer state machine
//!
//! ```text
//! CrcCheck --echo == crc--> AckCheck --[0x01]--> Finished (complete)
//!    |                         |
//!    +--echo != crc--> Finished (Transmission)
//!                              +--other--> Finished (CorruptedFile)
//! ```
//!
//! The transfer is driven by stdout messages from the device and writes its
//! data through a `ConsoleSink`.

use super::FirmwareUpgradeError;
use crate::BlueStError;
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Command name that opens an upgrade on the device
pub const UPGRADE_COMMAND: &[u8] = b"upgradeFw";

/// Final message the device sends after a good image
pub const ACK_MESSAGE: &[u8] = &[0x01];

/// Byte sink the transfer writes to (the debug console's stdin)
pub(crate) trait ConsoleSink: Send + Sync {
    /// Write `data`, returning how many bytes actually went out.
    fn write(&self, data: &[u8]) -> Result<usize, BlueStError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    /// Waiting for the device to echo the CRC
    CrcCheck,
    /// Image sent or being sent, waiting for the final ACK
    AckCheck,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEvent {
    Progress { bytes_sent: u32, total: u32 },
    Complete { bytes_sent: u32 },
    Failed(FirmwareUpgradeError),
}

pub struct FirmwareTransfer {
    reader: Box<dyn Read + Send>,
    size: u32,
    crc: u32,
    packet_bytes: usize,
    packets_per_block: usize,
    cancel: Arc<AtomicBool>,
    state: TransferState,
    bytes_sent: u32,
}

impl FirmwareTransfer {
    pub fn new(
        reader: Box<dyn Read + Send>,
        size: u32,
        crc: u32,
        packet_bytes: usize,
        packets_per_block: usize,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            reader,
            size,
            crc,
            packet_bytes: packet_bytes.max(1),
            packets_per_block: packets_per_block.max(1),
            cancel,
            state: TransferState::CrcCheck,
            bytes_sent: 0,
        }
    }

    /// `upgradeFw` + size (LE u32) + crc (LE u32)
    pub fn command(&self) -> Vec<u8> {
        let mut command = Vec::with_capacity(UPGRADE_COMMAND.len() + 8);
        command.extend_from_slice(UPGRADE_COMMAND);
        command.extend_from_slice(&self.size.to_le_bytes());
        command.extend_from_slice(&self.crc.to_le_bytes());
        command
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    pub fn bytes_sent(&self) -> u32 {
        self.bytes_sent
    }

    /// Feed one stdout message from the device.
    ///
    /// Events are handed to `emit` in order; at most one terminal event is
    /// ever produced. Messages after the terminal event are ignored.
    pub(crate) fn on_stdout(
        &mut self,
        message: &[u8],
        sink: &dyn ConsoleSink,
        emit: &mut dyn FnMut(TransferEvent),
    ) {
        match self.state {
            TransferState::CrcCheck => self.on_crc_echo(message, sink, emit),
            TransferState::AckCheck => self.on_final_ack(message, emit),
            TransferState::Finished => {
                debug!("Firmware transfer finished, ignoring {} byte(s)", message.len())
            }
        }
    }

    /// Terminate early; false when already finished.
    pub(crate) fn abort(&mut self) -> bool {
        if self.state == TransferState::Finished {
            return false;
        }
        self.state = TransferState::Finished;
        true
    }

    fn on_crc_echo(
        &mut self,
        message: &[u8],
        sink: &dyn ConsoleSink,
        emit: &mut dyn FnMut(TransferEvent),
    ) {
        if self.is_cancelled() {
            self.fail(FirmwareUpgradeError::Cancelled, emit);
            return;
        }
        if message != self.crc.to_le_bytes() {
            warn!(
                "Firmware CRC echo mismatch: expected {:02x?}, got {:02x?}",
                self.crc.to_le_bytes(),
                message
            );
            self.fail(FirmwareUpgradeError::Transmission, emit);
            return;
        }

        info!("Firmware CRC accepted, sending {} bytes", self.size);
        self.state = TransferState::AckCheck;
        while self.bytes_sent < self.size {
            if self.is_cancelled() {
                self.fail(FirmwareUpgradeError::Cancelled, emit);
                return;
            }
            if let Err(error) = self.send_block(sink) {
                self.fail(error, emit);
                return;
            }
            debug!("Firmware progress {}/{}", self.bytes_sent, self.size);
            emit(TransferEvent::Progress {
                bytes_sent: self.bytes_sent,
                total: self.size,
            });
        }
    }

    fn on_final_ack(&mut self, message: &[u8], emit: &mut dyn FnMut(TransferEvent)) {
        self.state = TransferState::Finished;
        if message == ACK_MESSAGE {
            info!("Firmware upgrade complete ({} bytes)", self.bytes_sent);
            emit(TransferEvent::Complete {
                bytes_sent: self.bytes_sent,
            });
        } else {
            warn!("Firmware rejected by the device: {:02x?}", message);
            emit(TransferEvent::Failed(FirmwareUpgradeError::CorruptedFile));
        }
    }

    /// Send up to `packets_per_block` packets.
    fn send_block(&mut self, sink: &dyn ConsoleSink) -> Result<(), FirmwareUpgradeError> {
        for _ in 0..self.packets_per_block {
            let remaining = (self.size - self.bytes_sent) as usize;
            if remaining == 0 {
                break;
            }
            let wanted = remaining.min(self.packet_bytes);

            let mut packet = Vec::with_capacity(wanted);
            let read = self
                .reader
                .by_ref()
                .take(wanted as u64)
                .read_to_end(&mut packet)
                .map_err(|_| FirmwareUpgradeError::CorruptedFile)?;
            if read != wanted {
                warn!("Firmware image short read: {} of {} bytes", read, wanted);
                return Err(FirmwareUpgradeError::CorruptedFile);
            }

            let written = sink
                .write(&packet)
                .map_err(|_| FirmwareUpgradeError::Transmission)?;
            if written != wanted {
                warn!("Firmware packet short write: {} of {} bytes", written, wanted);
                return Err(FirmwareUpgradeError::CorruptedFile);
            }
            self.bytes_sent += wanted as u32;
        }
        Ok(())
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn fail(&mut self, error: FirmwareUpgradeError, emit: &mut dyn FnMut(TransferEvent)) {
        self.state = TransferState::Finished;
        emit(TransferEvent::Failed(error));
    }
}
