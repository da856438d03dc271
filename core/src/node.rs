//! Node: one BlueST device
//!
//! A node is created from a device's advertising data. Its features come
//! from the advertised feature mask; connecting binds them to the GATT
//! characteristics that carry their data. Every call into the transport goes
//! through one lock, so a node never runs two radio operations at once.

use crate::advertising::{AdStructure, AdvertisingDataParser, DeviceDescriptor, DeviceType};
use crate::codec::LittleEndian;
use crate::config::SdkConfig;
use crate::console::DebugConsole;
use crate::dispatch::Dispatcher;
use crate::feature::{Feature, TIMESTAMP_OFFSET_BYTES};
use crate::gatt::{
    extract_feature_mask, is_feature_characteristic, Characteristic, DEBUG_STDERR_UUID,
    DEBUG_STDINOUT_UUID,
};
use crate::registry::{FeatureKind, FeatureRegistry};
use crate::timestamp::TimestampUnwrapper;
use crate::transport::{ScanEntry, Transport, TransportError};
use crate::BlueStError;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Connection state of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeStatus {
    /// Created, not yet usable
    Init,
    /// Advertising, not connected
    Idle,
    Connecting,
    Connected,
    Disconnecting,
    /// No advertising received for a while
    Lost,
    /// The link failed during an operation
    Unreachable,
    /// Connected but exposes no services
    Dead,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeStatus::Init => "INIT",
            NodeStatus::Idle => "IDLE",
            NodeStatus::Connecting => "CONNECTING",
            NodeStatus::Connected => "CONNECTED",
            NodeStatus::Disconnecting => "DISCONNECTING",
            NodeStatus::Lost => "LOST",
            NodeStatus::Unreachable => "UNREACHABLE",
            NodeStatus::Dead => "DEAD",
        };
        f.write_str(name)
    }
}

/// Status change notifications, dispatched off the calling thread
pub trait NodeListener: Send + Sync {
    fn on_status_change(&self, node: &Arc<Node>, new_status: NodeStatus, old_status: NodeStatus);
}

/// Characteristic and the features it carries, in payload order
struct Binding {
    characteristic: Characteristic,
    features: Vec<Arc<Feature>>,
}

pub struct Node {
    me: Weak<Node>,
    tag: String,
    descriptor: RwLock<DeviceDescriptor>,
    status: RwLock<NodeStatus>,
    rssi: RwLock<(i16, SystemTime)>,
    transport: Mutex<Box<dyn Transport>>,
    config: SdkConfig,
    dispatcher: Arc<Dispatcher>,
    features: RwLock<Vec<Arc<Feature>>>,
    mask_to_feature: HashMap<u32, Arc<Feature>>,
    bindings: RwLock<HashMap<u16, Binding>>,
    external_kinds: RwLock<HashMap<Uuid, Vec<FeatureKind>>>,
    external_features: RwLock<HashMap<Uuid, Vec<Arc<Feature>>>>,
    unwrapper: Mutex<TimestampUnwrapper>,
    console: RwLock<Option<Arc<DebugConsole>>>,
    listeners: RwLock<Vec<Arc<dyn NodeListener>>>,
}

impl Node {
    /// Build a node from one scan result.
    ///
    /// Fails with `InvalidAdvertisingData` when the advertisement is not a
    /// BlueST one; no node exists in that case.
    pub fn new(
        entry: &ScanEntry,
        transport: Box<dyn Transport>,
        registry: &FeatureRegistry,
        dispatcher: Arc<Dispatcher>,
        config: SdkConfig,
    ) -> Result<Arc<Self>, BlueStError> {
        let descriptor = AdvertisingDataParser::parse(&entry.advertising)?;
        let decoders = registry.features_for_device(descriptor.device_id);

        let node = Arc::new_cyclic(|me: &Weak<Node>| {
            let mut features = Vec::new();
            let mut mask_to_feature = HashMap::new();
            for bit in 0..32 {
                let mask = 1u32 << bit;
                if descriptor.feature_mask & mask == 0 {
                    continue;
                }
                if let Some(kind) = decoders.get(&mask) {
                    let feature = Feature::new(kind.build(), me.clone(), dispatcher.clone());
                    features.push(feature.clone());
                    mask_to_feature.insert(mask, feature);
                }
            }

            Node {
                me: me.clone(),
                tag: entry.address.clone(),
                descriptor: RwLock::new(descriptor),
                status: RwLock::new(NodeStatus::Init),
                rssi: RwLock::new((entry.rssi, SystemTime::now())),
                transport: Mutex::new(transport),
                config,
                dispatcher,
                features: RwLock::new(features),
                mask_to_feature,
                bindings: RwLock::new(HashMap::new()),
                external_kinds: RwLock::new(HashMap::new()),
                external_features: RwLock::new(HashMap::new()),
                unwrapper: Mutex::new(TimestampUnwrapper::new()),
                console: RwLock::new(None),
                listeners: RwLock::new(Vec::new()),
            }
        });

        debug!(
            "Node {} ({}) built with {} feature(s)",
            node.tag,
            node.name(),
            node.features.read().len()
        );
        node.update_status(NodeStatus::Idle);
        Ok(node)
    }

    // ------------------------------------------------------------------------
    // Identity
    // ------------------------------------------------------------------------

    /// MAC address reported by the scan
    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn name(&self) -> String {
        self.descriptor.read().name.clone()
    }

    /// `"<name> @<last 6 hex digits of the tag>"`
    pub fn friendly_name(&self) -> String {
        let clean: String = self.tag.chars().filter(|c| *c != ':').collect();
        let start = clean.len().saturating_sub(6);
        format!("{} @{}", self.name(), &clean[start..])
    }

    pub fn device_type(&self) -> DeviceType {
        self.descriptor.read().device_type
    }

    pub fn type_id(&self) -> u8 {
        self.descriptor.read().device_id
    }

    pub fn protocol_version(&self) -> u8 {
        self.descriptor.read().protocol_version
    }

    pub fn tx_power(&self) -> i8 {
        self.descriptor.read().tx_power
    }

    pub fn is_sleeping(&self) -> bool {
        self.descriptor.read().sleeping
    }

    pub fn advertising_data(&self) -> DeviceDescriptor {
        self.descriptor.read().clone()
    }

    /// Replace the descriptor; kept unchanged when the new data does not parse.
    pub fn update_advertising_data(&self, advertising: &[AdStructure]) -> Result<(), BlueStError> {
        let descriptor = AdvertisingDataParser::parse(advertising)?;
        *self.descriptor.write() = descriptor;
        Ok(())
    }

    pub fn last_rssi(&self) -> i16 {
        self.rssi.read().0
    }

    pub fn last_rssi_update(&self) -> SystemTime {
        self.rssi.read().1
    }

    /// Record a fresh RSSI report; a lost node becomes idle again.
    pub fn update_rssi(&self, rssi: i16) {
        *self.rssi.write() = (rssi, SystemTime::now());
        if self.status() == NodeStatus::Lost {
            self.update_status(NodeStatus::Idle);
        }
    }

    pub(crate) fn mark_lost(&self) {
        if self.status() == NodeStatus::Idle {
            self.update_status(NodeStatus::Lost);
        }
    }

    // ------------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------------

    pub fn status(&self) -> NodeStatus {
        *self.status.read()
    }

    pub fn is_connected(&self) -> bool {
        self.status() == NodeStatus::Connected
    }

    pub fn add_listener(&self, listener: Arc<dyn NodeListener>) {
        let mut listeners = self.listeners.write();
        if !listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            listeners.push(listener);
        }
    }

    pub fn remove_listener(&self, listener: &Arc<dyn NodeListener>) {
        self.listeners.write().retain(|l| !Arc::ptr_eq(l, listener));
    }

    fn update_status(&self, new_status: NodeStatus) {
        let old_status = std::mem::replace(&mut *self.status.write(), new_status);
        if old_status == new_status {
            return;
        }
        info!("Node {}: {} -> {}", self.tag, old_status, new_status);

        let Some(node) = self.me.upgrade() else {
            return;
        };
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            let node = node.clone();
            self.dispatcher
                .submit(move || listener.on_status_change(&node, new_status, old_status));
        }
    }

    // ------------------------------------------------------------------------
    // Features
    // ------------------------------------------------------------------------

    pub fn features(&self) -> Vec<Arc<Feature>> {
        self.features.read().clone()
    }

    pub fn features_by_name(&self, name: &str) -> Vec<Arc<Feature>> {
        self.features
            .read()
            .iter()
            .filter(|feature| feature.name() == name)
            .cloned()
            .collect()
    }

    pub fn feature(&self, name: &str) -> Option<Arc<Feature>> {
        self.features
            .read()
            .iter()
            .find(|feature| feature.name() == name)
            .cloned()
    }

    /// Register decoders for characteristics outside the BlueST mask
    /// convention. Takes effect on the next `connect`.
    pub fn add_external_features(&self, features: HashMap<Uuid, Vec<FeatureKind>>) {
        let mut external = self.external_kinds.write();
        for (uuid, kinds) in features {
            external.entry(uuid).or_default().extend(kinds);
        }
    }

    pub fn debug_console(&self) -> Option<Arc<DebugConsole>> {
        self.console.read().clone()
    }

    pub(crate) fn dispatcher(&self) -> Arc<Dispatcher> {
        self.dispatcher.clone()
    }

    pub(crate) fn config(&self) -> &SdkConfig {
        &self.config
    }

    // ------------------------------------------------------------------------
    // Connection
    // ------------------------------------------------------------------------

    /// Connect, discover services and bind features to characteristics.
    pub fn connect(
        &self,
        external: Option<HashMap<Uuid, Vec<FeatureKind>>>,
    ) -> Result<(), BlueStError> {
        if let Some(external) = external {
            self.add_external_features(external);
        }

        self.update_status(NodeStatus::Connecting);
        let services = self.with_transport(|transport| {
            transport.connect()?;
            transport.services()
        })?;

        if services.is_empty() {
            warn!("Node {} exposes no services", self.tag);
            if let Err(e) = self.transport.lock().disconnect() {
                debug!("Node {}: disconnect after empty discovery failed: {}", self.tag, e);
            }
            self.update_status(NodeStatus::Dead);
            return Ok(());
        }

        self.unwrapper.lock().reset();

        let external_kinds = self.external_kinds.read().clone();
        let mut ordered: Vec<u16> = Vec::new();
        let mut bindings: HashMap<u16, Binding> = HashMap::new();
        let mut stdinout = None;
        let mut stderr = None;

        for characteristic in services.iter().flat_map(|s| s.characteristics.iter()) {
            let features = if is_feature_characteristic(&characteristic.uuid) {
                self.bind_masked_features(extract_feature_mask(&characteristic.uuid))
            } else if let Some(kinds) = external_kinds.get(&characteristic.uuid) {
                self.bind_external_features(&characteristic.uuid, kinds)
            } else {
                if characteristic.uuid == DEBUG_STDINOUT_UUID {
                    stdinout = Some(characteristic.clone());
                } else if characteristic.uuid == DEBUG_STDERR_UUID {
                    stderr = Some(characteristic.clone());
                }
                continue;
            };

            if features.is_empty() {
                continue;
            }
            ordered.push(characteristic.handle);
            bindings.insert(
                characteristic.handle,
                Binding {
                    characteristic: characteristic.clone(),
                    features,
                },
            );
        }

        // Each feature is driven through the characteristic carrying the
        // most features; ties keep the first one discovered.
        for feature in self.features.read().iter() {
            let mut best: Option<(&Characteristic, usize)> = None;
            for handle in &ordered {
                if let Some(binding) = bindings.get(handle) {
                    let carries = binding.features.iter().any(|f| Arc::ptr_eq(f, feature));
                    let larger = best.map_or(true, |(_, size)| binding.features.len() > size);
                    if carries && larger {
                        best = Some((&binding.characteristic, binding.features.len()));
                    }
                }
            }
            match best {
                Some((characteristic, _)) => feature.set_characteristic(characteristic.clone()),
                None => {
                    // bound on an earlier connection, absent from this one
                    feature.set_enabled(false);
                    feature.set_notifying(false);
                    feature.clear_characteristic();
                }
            }
        }

        *self.bindings.write() = bindings;
        let console = self.refresh_console(stdinout, stderr);

        self.update_status(NodeStatus::Connected);
        if let Some(console) = console {
            console.resume()?;
        }
        Ok(())
    }

    /// Keep the current console when the debug characteristics did not move,
    /// otherwise close it and open one on the new characteristics.
    fn refresh_console(
        &self,
        stdinout: Option<Characteristic>,
        stderr: Option<Characteristic>,
    ) -> Option<Arc<DebugConsole>> {
        let mut current = self.console.write();
        if let (Some(console), Some(stdinout)) = (current.as_ref(), stdinout.as_ref()) {
            if console.uses(stdinout, stderr.as_ref()) {
                return Some(console.clone());
            }
        }
        if let Some(previous) = current.take() {
            debug!("Node {}: debug console characteristics changed", self.tag);
            previous.close();
        }
        *current = stdinout.map(|stdinout| {
            DebugConsole::new(
                self.me.clone(),
                stdinout,
                stderr,
                self.dispatcher.clone(),
                self.config.console_max_write_bytes,
            )
        });
        current.clone()
    }

    /// Features of `mask`, most significant bit first, enabled as they bind.
    fn bind_masked_features(&self, mask: u32) -> Vec<Arc<Feature>> {
        let mut features = Vec::new();
        for bit in (0..32).rev() {
            let bit_mask = 1u32 << bit;
            if mask & bit_mask == 0 {
                continue;
            }
            if let Some(feature) = self.mask_to_feature.get(&bit_mask) {
                feature.set_enabled(true);
                features.push(feature.clone());
            }
        }
        features
    }

    /// Instantiate (once per node) the decoders registered for `uuid`.
    fn bind_external_features(&self, uuid: &Uuid, kinds: &[FeatureKind]) -> Vec<Arc<Feature>> {
        if let Some(existing) = self.external_features.read().get(uuid) {
            if existing.len() == kinds.len() {
                existing.iter().for_each(|f| f.set_enabled(true));
                return existing.clone();
            }
        }

        let mut all = self.features.write();
        let mut external = self.external_features.write();
        if let Some(stale) = external.remove(uuid) {
            all.retain(|f| !stale.iter().any(|s| Arc::ptr_eq(f, s)));
        }

        let features: Vec<Arc<Feature>> = kinds
            .iter()
            .map(|kind| {
                let feature = Feature::new(kind.build(), self.me.clone(), self.dispatcher.clone());
                feature.set_enabled(true);
                feature
            })
            .collect();
        all.extend(features.iter().cloned());
        external.insert(*uuid, features.clone());
        features
    }

    pub fn disconnect(&self) -> Result<(), BlueStError> {
        if !self.is_connected() {
            return Ok(());
        }

        self.update_status(NodeStatus::Disconnecting);
        if let Err(e) = self.transport.lock().disconnect() {
            warn!("Node {}: disconnect failed: {}", self.tag, e);
        }
        for feature in self.features.read().iter() {
            feature.set_notifying(false);
        }
        self.update_status(NodeStatus::Idle);
        Ok(())
    }

    /// Run one transport operation under the node lock.
    ///
    /// A failure moves the node to `Unreachable` after a best-effort
    /// disconnect.
    fn with_transport<T>(
        &self,
        op: impl FnOnce(&mut dyn Transport) -> Result<T, TransportError>,
    ) -> Result<T, BlueStError> {
        let mut transport = self.transport.lock();
        match op(transport.as_mut()) {
            Ok(value) => Ok(value),
            Err(e) => {
                error!("Node {}: transport failure: {}", self.tag, e);
                if let Err(disconnect_error) = transport.disconnect() {
                    debug!(
                        "Node {}: best-effort disconnect failed: {}",
                        self.tag, disconnect_error
                    );
                }
                drop(transport);
                self.update_status(NodeStatus::Unreachable);
                Err(e.into())
            }
        }
    }

    fn ensure_connected(&self) -> Result<(), BlueStError> {
        if !self.is_connected() {
            return Err(BlueStError::InvalidOperation(format!(
                "node {} is not connected ({})",
                self.tag,
                self.status()
            )));
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Feature I/O
    // ------------------------------------------------------------------------

    /// Read a feature's characteristic and decode it without notifying
    /// listeners. Returns the raw bytes.
    pub fn read_feature(&self, feature: &Arc<Feature>) -> Result<Vec<u8>, BlueStError> {
        let characteristic = Self::usable_characteristic(feature)?;
        if !characteristic.properties.can_read() {
            return Err(BlueStError::InvalidOperation(format!(
                "{} cannot be read",
                feature.name()
            )));
        }
        self.ensure_connected()?;

        let data = self.with_transport(|transport| transport.read(characteristic.handle))?;
        self.update_features(characteristic.handle, &data, false)?;
        Ok(data)
    }

    pub fn write_feature(&self, feature: &Arc<Feature>, data: &[u8]) -> Result<(), BlueStError> {
        let characteristic = Self::usable_characteristic(feature)?;
        if !characteristic.properties.can_write() {
            return Err(BlueStError::InvalidOperation(format!(
                "{} cannot be written",
                feature.name()
            )));
        }
        self.ensure_connected()?;

        self.with_transport(|transport| transport.write(characteristic.handle, data, true))
    }

    fn usable_characteristic(feature: &Feature) -> Result<Characteristic, BlueStError> {
        if !feature.is_enabled() {
            return Err(BlueStError::InvalidOperation(format!(
                "{} is not enabled",
                feature.name()
            )));
        }
        feature.characteristic().ok_or_else(|| {
            BlueStError::InvalidOperation(format!("{} has no characteristic", feature.name()))
        })
    }

    /// Start notifications for `feature`.
    ///
    /// `Ok(false)` when the feature is disabled, belongs to another node or
    /// its characteristic cannot notify.
    pub fn enable_notifications(&self, feature: &Arc<Feature>) -> Result<bool, BlueStError> {
        let Some(characteristic) = self.notifiable_characteristic(feature) else {
            return Ok(false);
        };
        self.ensure_connected()?;

        self.with_transport(|transport| transport.set_notify(characteristic.handle, true))?;
        feature.set_notifying(true);
        Ok(true)
    }

    /// Stop notifications for `feature`.
    ///
    /// The characteristic keeps notifying while another feature sharing it
    /// still wants updates.
    pub fn disable_notifications(&self, feature: &Arc<Feature>) -> Result<bool, BlueStError> {
        let Some(characteristic) = self.notifiable_characteristic(feature) else {
            return Ok(false);
        };
        self.ensure_connected()?;

        feature.set_notifying(false);
        if self.has_other_notifying_features(characteristic.handle, feature) {
            debug!(
                "Node {}: {:#06x} still notifying for other features",
                self.tag, characteristic.handle
            );
            return Ok(true);
        }
        self.with_transport(|transport| transport.set_notify(characteristic.handle, false))?;
        Ok(true)
    }

    pub fn notifications_enabled(&self, feature: &Feature) -> bool {
        feature.is_notifying()
    }

    fn notifiable_characteristic(&self, feature: &Arc<Feature>) -> Option<Characteristic> {
        if !feature.is_enabled() || !feature.belongs_to(self) {
            return None;
        }
        feature
            .characteristic()
            .filter(|characteristic| characteristic.properties.can_notify())
    }

    fn has_other_notifying_features(&self, handle: u16, feature: &Arc<Feature>) -> bool {
        self.bindings
            .read()
            .get(&handle)
            .map(|binding| {
                binding
                    .features
                    .iter()
                    .any(|other| !Arc::ptr_eq(other, feature) && other.is_notifying())
            })
            .unwrap_or(false)
    }

    pub(crate) fn write_characteristic(
        &self,
        handle: u16,
        data: &[u8],
        with_response: bool,
    ) -> Result<(), BlueStError> {
        self.ensure_connected()?;
        self.with_transport(|transport| transport.write(handle, data, with_response))
    }

    pub(crate) fn set_notification_status(
        &self,
        handle: u16,
        enabled: bool,
    ) -> Result<(), BlueStError> {
        self.ensure_connected()?;
        self.with_transport(|transport| transport.set_notify(handle, enabled))
    }

    // ------------------------------------------------------------------------
    // Notifications
    // ------------------------------------------------------------------------

    /// Wait at most `timeout` for one notification and process it.
    ///
    /// The transport lock is released before the payload is decoded. Returns
    /// whether a notification arrived.
    pub fn wait_for_notifications(&self, timeout: Duration) -> Result<bool, BlueStError> {
        self.ensure_connected()?;
        let notification =
            self.with_transport(|transport| transport.wait_for_notification(timeout))?;
        match notification {
            Some(notification) => {
                self.handle_notification(notification.handle, &notification.data);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Entry point for transports that deliver notifications on their own thread.
    pub fn handle_notification(&self, handle: u16, data: &[u8]) {
        if let Some(console) = self.debug_console() {
            if console.handles(handle) {
                console.on_characteristic_update(handle, data);
                return;
            }
        }

        if let Err(e) = self.update_features(handle, data, true) {
            debug!("Node {}: notification on {:#06x} dropped: {}", self.tag, handle, e);
        }
    }

    /// Demultiplex one payload across the features bound to `handle`.
    ///
    /// Layout: `[timestamp:2 LE][feature 1][feature 2]...`. A decode failure
    /// stops the remaining features, whose offsets are then unknown.
    fn update_features(&self, handle: u16, data: &[u8], notify: bool) -> Result<bool, BlueStError> {
        let features = match self.bindings.read().get(&handle) {
            Some(binding) => binding.features.clone(),
            None => return Ok(false),
        };

        let raw_timestamp = LittleEndian::read_u16(data, 0)?;
        let timestamp = self.unwrapper.lock().unwrap(raw_timestamp);

        let mut offset = TIMESTAMP_OFFSET_BYTES;
        for feature in &features {
            offset += feature.update(timestamp, data, offset, notify)?;
        }
        Ok(true)
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.tag == other.tag
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("tag", &self.tag)
            .field("name", &self.name())
            .field("status", &self.status())
            .finish()
    }
}
