//! Manager: discovery and node bookkeeping
//!
//! Owns the BLE adapter, the feature registry and the callback dispatcher.
//! Scanning runs on the caller's thread (`discover`) or on a dedicated
//! background thread (`start_discovery`); it never takes a node's lock.

use crate::advertising::AdvertisingDataParser;
use crate::config::SdkConfig;
use crate::dispatch::Dispatcher;
use crate::node::{Node, NodeStatus};
use crate::registry::{FeatureKind, FeatureRegistry};
use crate::transport::{BleAdapter, ScanEntry};
use crate::BlueStError;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Discovery callbacks, dispatched off the scanning thread
pub trait ManagerListener: Send + Sync {
    fn on_discovery_change(&self, _manager: &Arc<Manager>, _enabled: bool) {}

    fn on_node_discovered(&self, _manager: &Arc<Manager>, _node: &Arc<Node>) {}
}

pub struct Manager {
    me: Weak<Manager>,
    adapter: Mutex<Box<dyn BleAdapter>>,
    config: SdkConfig,
    registry: Arc<FeatureRegistry>,
    dispatcher: Arc<Dispatcher>,
    nodes: RwLock<Vec<Arc<Node>>>,
    listeners: RwLock<Vec<Arc<dyn ManagerListener>>>,
    discovering: AtomicBool,
    stop: AtomicBool,
    discovery_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Manager {
    pub fn new(adapter: Box<dyn BleAdapter>, config: SdkConfig) -> Result<Arc<Self>, BlueStError> {
        config.validate()?;
        let dispatcher = Arc::new(Dispatcher::new(config.dispatcher_threads)?);

        Ok(Arc::new_cyclic(|me| Self {
            me: me.clone(),
            adapter: Mutex::new(adapter),
            config,
            registry: Arc::new(FeatureRegistry::new()),
            dispatcher,
            nodes: RwLock::new(Vec::new()),
            listeners: RwLock::new(Vec::new()),
            discovering: AtomicBool::new(false),
            stop: AtomicBool::new(false),
            discovery_thread: Mutex::new(None),
        }))
    }

    pub fn config(&self) -> &SdkConfig {
        &self.config
    }

    pub fn registry(&self) -> Arc<FeatureRegistry> {
        self.registry.clone()
    }

    /// Register extra decoders for every node of `device_id` discovered from
    /// now on. Nothing is registered when one mask is invalid.
    pub fn add_features_to_node(
        &self,
        device_id: u8,
        features: HashMap<u32, FeatureKind>,
    ) -> Result<(), BlueStError> {
        self.registry.add_features_to_node(device_id, features)
    }

    // ------------------------------------------------------------------------
    // Discovery
    // ------------------------------------------------------------------------

    pub fn is_discovering(&self) -> bool {
        self.discovering.load(Ordering::SeqCst)
    }

    /// Scan for `timeout` on the calling thread.
    ///
    /// Returns `Ok(false)` when a discovery is already running.
    pub fn discover(&self, timeout: Duration) -> Result<bool, BlueStError> {
        if !self.begin_discovery() {
            return Ok(false);
        }
        let result = self.run_discovery(timeout);
        self.end_discovery();
        result.map(|_| true)
    }

    /// Scan on a background thread until `stop_discovery`.
    ///
    /// Returns false when a discovery is already running.
    pub fn start_discovery(&self) -> Result<bool, BlueStError> {
        if !self.begin_discovery() {
            return Ok(false);
        }

        let weak = self.me.clone();
        let round = self.config.default_discovery_timeout();
        let spawned = std::thread::Builder::new()
            .name("bluest-discovery".to_string())
            .spawn(move || loop {
                let Some(manager) = weak.upgrade() else {
                    break;
                };
                if manager.stop.load(Ordering::SeqCst) {
                    break;
                }
                if let Err(e) = manager.run_discovery(round) {
                    error!("Discovery stopped: {}", e);
                    manager.end_discovery();
                    break;
                }
            });

        match spawned {
            Ok(handle) => {
                *self.discovery_thread.lock() = Some(handle);
                Ok(true)
            }
            Err(e) => {
                self.end_discovery();
                Err(e.into())
            }
        }
    }

    /// Stop a running discovery; false when none is running.
    pub fn stop_discovery(&self) -> bool {
        if !self.is_discovering() {
            return false;
        }
        self.stop.store(true, Ordering::SeqCst);

        let handle = self.discovery_thread.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() != std::thread::current().id() && handle.join().is_err() {
                warn!("Discovery thread panicked");
            }
        }
        self.end_discovery();
        true
    }

    /// Stop discovering and forget every node that is not connected.
    pub fn reset_discovery(&self) {
        self.stop_discovery();
        self.remove_nodes();
    }

    fn begin_discovery(&self) -> bool {
        if self
            .discovering
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        self.stop.store(false, Ordering::SeqCst);
        info!("Discovery started");
        self.notify_discovery_change(true);
        true
    }

    fn end_discovery(&self) {
        if self.discovering.swap(false, Ordering::SeqCst) {
            info!("Discovery stopped");
            self.notify_discovery_change(false);
        }
    }

    /// One discovery round. Idle nodes not heard from during a complete
    /// round are marked lost.
    fn run_discovery(&self, timeout: Duration) -> Result<(), BlueStError> {
        let deadline = Instant::now() + timeout;
        let mut seen = HashSet::new();

        loop {
            if self.stop.load(Ordering::SeqCst) {
                return Ok(());
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            let slice = remaining.min(self.config.scan_slice());
            let entries = self.adapter.lock().scan(slice)?;
            for entry in entries {
                seen.insert(entry.address.clone());
                self.process_scan_entry(entry);
            }
        }

        for node in self.nodes() {
            if !seen.contains(node.tag()) {
                node.mark_lost();
            }
        }
        Ok(())
    }

    fn process_scan_entry(&self, entry: ScanEntry) {
        if let Some(node) = self.node_with_tag(&entry.address) {
            node.update_rssi(entry.rssi);
            if let Err(e) = node.update_advertising_data(&entry.advertising) {
                debug!("Node {}: advertising refresh ignored: {}", node.tag(), e);
            }
            return;
        }

        if let Err(e) = AdvertisingDataParser::parse(&entry.advertising) {
            if self.config.show_warnings {
                warn!("Ignoring {}: {}", entry.address, e);
            } else {
                debug!("Ignoring {}: {}", entry.address, e);
            }
            return;
        }

        let transport = match self.adapter.lock().open(&entry.address) {
            Ok(transport) => transport,
            Err(e) => {
                warn!("Cannot open a link to {}: {}", entry.address, e);
                return;
            }
        };
        let node = match Node::new(
            &entry,
            transport,
            &self.registry,
            self.dispatcher.clone(),
            self.config.clone(),
        ) {
            Ok(node) => node,
            Err(e) => {
                debug!("Ignoring {}: {}", entry.address, e);
                return;
            }
        };

        info!("Discovered {} ({})", node.friendly_name(), node.device_type());
        self.nodes.write().push(node.clone());
        self.notify_node_discovered(&node);
    }

    // ------------------------------------------------------------------------
    // Nodes
    // ------------------------------------------------------------------------

    pub fn nodes(&self) -> Vec<Arc<Node>> {
        self.nodes.read().clone()
    }

    pub fn node_with_tag(&self, tag: &str) -> Option<Arc<Node>> {
        self.nodes
            .read()
            .iter()
            .find(|node| node.tag().eq_ignore_ascii_case(tag))
            .cloned()
    }

    pub fn node_with_name(&self, name: &str) -> Option<Arc<Node>> {
        self.nodes
            .read()
            .iter()
            .find(|node| node.name() == name)
            .cloned()
    }

    /// Forget every node that is not connected.
    pub fn remove_nodes(&self) {
        let mut nodes = self.nodes.write();
        let before = nodes.len();
        nodes.retain(|node| node.status() == NodeStatus::Connected);
        debug!("Removed {} node(s)", before - nodes.len());
    }

    // ------------------------------------------------------------------------
    // Listeners
    // ------------------------------------------------------------------------

    pub fn add_listener(&self, listener: Arc<dyn ManagerListener>) {
        let mut listeners = self.listeners.write();
        if !listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            listeners.push(listener);
        }
    }

    pub fn remove_listener(&self, listener: &Arc<dyn ManagerListener>) {
        self.listeners.write().retain(|l| !Arc::ptr_eq(l, listener));
    }

    fn notify_discovery_change(&self, enabled: bool) {
        let Some(manager) = self.me.upgrade() else {
            return;
        };
        for listener in self.listeners.read().clone() {
            let manager = manager.clone();
            self.dispatcher
                .submit(move || listener.on_discovery_change(&manager, enabled));
        }
    }

    fn notify_node_discovered(&self, node: &Arc<Node>) {
        let Some(manager) = self.me.upgrade() else {
            return;
        };
        for listener in self.listeners.read().clone() {
            let manager = manager.clone();
            let node = node.clone();
            self.dispatcher
                .submit(move || listener.on_node_discovered(&manager, &node));
        }
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}
