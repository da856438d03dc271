// Shared fixtures for the integration tests: an in-memory GATT peer with
// scripted notifications and a firmware responder, plus a scan adapter.

#![allow(dead_code)]

use bluestsdk_core::gatt::{
    feature_characteristic_uuid, DEBUG_SERVICE_UUID, DEBUG_STDERR_UUID, DEBUG_STDINOUT_UUID,
};
use bluestsdk_core::{
    AdStructure, BleAdapter, CharProperties, Characteristic, Dispatcher, FeatureRegistry, Node,
    Notification, ScanEntry, SdkConfig, Service, Transport, TransportError,
};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

pub const STDINOUT_HANDLE: u16 = 0x0100;
pub const STDERR_HANDLE: u16 = 0x0104;
pub const SENSOR_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_0000_0001_11E1_9AB4_0002_A5D5_C51B);

/// Device side of the firmware protocol
#[derive(Debug, Default)]
pub struct FirmwareResponder {
    /// Echo sent instead of the real CRC
    pub echo_override: Option<Vec<u8>>,
    /// Message sent once every image byte arrived (default ACK)
    pub final_message: Option<Vec<u8>>,
    pub command: Vec<u8>,
    pub expected: usize,
    pub image: Vec<u8>,
}

impl FirmwareResponder {
    fn on_write(&mut self, data: &[u8]) -> Option<Vec<u8>> {
        if self.command.len() < 17 {
            self.command.extend_from_slice(data);
            if self.command.len() < 17 || !self.command.starts_with(b"upgradeFw") {
                return None;
            }
            let size = u32::from_le_bytes([
                self.command[9],
                self.command[10],
                self.command[11],
                self.command[12],
            ]);
            self.expected = size as usize;
            return Some(
                self.echo_override
                    .clone()
                    .unwrap_or_else(|| self.command[13..17].to_vec()),
            );
        }

        self.image.extend_from_slice(data);
        if self.image.len() == self.expected {
            return Some(self.final_message.clone().unwrap_or_else(|| vec![0x01]));
        }
        None
    }

    pub fn command(&self) -> &[u8] {
        &self.command
    }
}

/// Everything the fake peer records or replays
#[derive(Debug, Default)]
pub struct PeerState {
    pub services: Vec<Service>,
    pub connected: bool,
    pub connect_count: usize,
    pub fail_connect: bool,
    pub fail_io: bool,
    pub reads: HashMap<u16, Vec<u8>>,
    pub writes: Vec<(u16, Vec<u8>)>,
    pub notify_log: Vec<(u16, bool)>,
    pub notifications: VecDeque<Notification>,
    pub firmware: Option<FirmwareResponder>,
    /// Stdout chunks sent back for each console write, in write order
    pub console_replies: VecDeque<Vec<Vec<u8>>>,
}

pub type SharedPeer = Arc<Mutex<PeerState>>;

pub struct FakeTransport {
    peer: SharedPeer,
}

impl FakeTransport {
    pub fn new(peer: SharedPeer) -> Self {
        Self { peer }
    }
}

impl Transport for FakeTransport {
    fn connect(&mut self) -> Result<(), TransportError> {
        let mut peer = self.peer.lock();
        if peer.fail_connect {
            return Err(TransportError::ConnectionFailed("peer refused".into()));
        }
        peer.connected = true;
        peer.connect_count += 1;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        self.peer.lock().connected = false;
        Ok(())
    }

    fn services(&mut self) -> Result<Vec<Service>, TransportError> {
        Ok(self.peer.lock().services.clone())
    }

    fn read(&mut self, handle: u16) -> Result<Vec<u8>, TransportError> {
        let peer = self.peer.lock();
        if peer.fail_io {
            return Err(TransportError::ReadFailed("link lost".into()));
        }
        peer.reads
            .get(&handle)
            .cloned()
            .ok_or_else(|| TransportError::ReadFailed(format!("no value for {:#06x}", handle)))
    }

    fn write(&mut self, handle: u16, data: &[u8], _with_response: bool) -> Result<(), TransportError> {
        let mut peer = self.peer.lock();
        if peer.fail_io {
            return Err(TransportError::WriteFailed("link lost".into()));
        }
        peer.writes.push((handle, data.to_vec()));
        if handle == STDINOUT_HANDLE {
            let reply = peer.firmware.as_mut().and_then(|fw| fw.on_write(data));
            if let Some(reply) = reply {
                peer.notifications
                    .push_back(Notification::new(STDINOUT_HANDLE, reply));
            }
            if let Some(chunks) = peer.console_replies.pop_front() {
                for chunk in chunks {
                    peer.notifications
                        .push_back(Notification::new(STDINOUT_HANDLE, chunk));
                }
            }
        }
        Ok(())
    }

    fn set_notify(&mut self, handle: u16, enabled: bool) -> Result<(), TransportError> {
        let mut peer = self.peer.lock();
        if peer.fail_io {
            return Err(TransportError::WriteFailed("link lost".into()));
        }
        peer.notify_log.push((handle, enabled));
        Ok(())
    }

    fn wait_for_notification(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<Notification>, TransportError> {
        {
            let mut peer = self.peer.lock();
            if !peer.connected {
                return Err(TransportError::NotConnected);
            }
            if let Some(notification) = peer.notifications.pop_front() {
                return Ok(Some(notification));
            }
        }
        std::thread::sleep(timeout.min(Duration::from_millis(2)));
        Ok(None)
    }
}

/// Scan adapter replaying one batch per scan slice
pub struct FakeAdapter {
    pub batches: VecDeque<Vec<ScanEntry>>,
    pub peers: HashMap<String, SharedPeer>,
    pub opened: Arc<Mutex<Vec<String>>>,
}

impl FakeAdapter {
    pub fn new(batches: Vec<Vec<ScanEntry>>) -> Self {
        Self {
            batches: batches.into(),
            peers: HashMap::new(),
            opened: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_peer(mut self, address: &str, peer: SharedPeer) -> Self {
        self.peers.insert(address.to_string(), peer);
        self
    }
}

impl BleAdapter for FakeAdapter {
    fn scan(&mut self, _timeout: Duration) -> Result<Vec<ScanEntry>, TransportError> {
        Ok(self.batches.pop_front().unwrap_or_default())
    }

    fn open(&mut self, address: &str) -> Result<Box<dyn Transport>, TransportError> {
        self.opened.lock().push(address.to_string());
        let peer = self.peers.get(address).cloned().unwrap_or_default();
        Ok(Box::new(FakeTransport::new(peer)))
    }
}

/// BlueST advertising for `device_id` exposing `mask`
pub fn bluest_advertising(name: &str, device_id: u8, mask: u32) -> Vec<AdStructure> {
    let mut payload = vec![0x01, device_id];
    payload.extend_from_slice(&mask.to_be_bytes());
    vec![
        AdStructure::complete_local_name(name),
        AdStructure::tx_power(4),
        AdStructure::manufacturer(&payload),
    ]
}

pub fn feature_characteristic(handle: u16, mask: u32, properties: CharProperties) -> Characteristic {
    Characteristic::new(handle, feature_characteristic_uuid(mask), properties)
}

pub fn sensor_service(characteristics: Vec<Characteristic>) -> Service {
    Service::new(SENSOR_SERVICE_UUID, characteristics)
}

pub fn debug_service() -> Service {
    Service::new(
        DEBUG_SERVICE_UUID,
        vec![
            Characteristic::new(STDINOUT_HANDLE, DEBUG_STDINOUT_UUID, CharProperties::all()),
            Characteristic::new(
                STDERR_HANDLE,
                DEBUG_STDERR_UUID,
                CharProperties::read_notify(),
            ),
        ],
    )
}

pub fn peer(services: Vec<Service>) -> SharedPeer {
    Arc::new(Mutex::new(PeerState {
        services,
        ..PeerState::default()
    }))
}

/// Node for `device_id`/`mask` talking to `peer`, not yet connected
pub fn node(device_id: u8, mask: u32, peer: &SharedPeer) -> Arc<Node> {
    let entry = ScanEntry::new(
        "C0:85:23:31:43:5B",
        -50,
        bluest_advertising("BCNT", device_id, mask),
    );
    Node::new(
        &entry,
        Box::new(FakeTransport::new(peer.clone())),
        &FeatureRegistry::new(),
        Arc::new(Dispatcher::new(4).expect("dispatcher")),
        SdkConfig::default(),
    )
    .expect("valid advertising")
}

/// Payload with a device timestamp followed by `body`
pub fn payload(timestamp: u16, body: &[u8]) -> Vec<u8> {
    let mut data = timestamp.to_le_bytes().to_vec();
    data.extend_from_slice(body);
    data
}

/// Pump notifications on `node` until `done` returns true or `timeout` expires.
pub fn pump_until(node: &Node, timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        node.wait_for_notifications(Duration::from_millis(5))
            .expect("wait for notifications");
    }
    done()
}
