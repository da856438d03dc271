// Integration tests for discovery through the Manager
//
// Covers node creation from advertising, atomic decoder registration and the
// handling of advertisements that are not BlueST.

mod common;

use bluestsdk_core::codec::read_u8;
use bluestsdk_core::{
    AdStructure, BlueStError, DeviceType, Extracted, FeatureDecoder, FeatureKind, Field,
    FieldType, Manager, ManagerListener, Node, NodeStatus, Sample, ScanEntry, SdkConfig, Value,
};
use common::*;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{mpsc, Arc};
use std::time::Duration;

const COUNTER_FIELDS: [Field; 1] = [Field::new("Count", None, FieldType::UInt8, 0.0, 255.0)];

/// Application decoder registered at runtime
struct Counter;

impl FeatureDecoder for Counter {
    fn name(&self) -> &'static str {
        "Counter"
    }

    fn fields(&self) -> &[Field] {
        &COUNTER_FIELDS
    }

    fn extract(&self, timestamp: u64, data: &[u8], offset: usize) -> Result<Extracted, BlueStError> {
        let count = read_u8(data, offset)?;
        Ok(Extracted::new(
            Sample::new(timestamp, vec![Value::Int(count.into())], COUNTER_FIELDS.to_vec()),
            1,
        ))
    }
}

fn counter() -> Box<dyn FeatureDecoder> {
    Box::new(Counter)
}

fn counter_kind() -> FeatureKind {
    FeatureKind::Custom {
        name: "Counter",
        build: counter,
    }
}

enum Event {
    Discovery(bool),
    Node(String),
}

struct Recorder(Mutex<mpsc::Sender<Event>>);

impl ManagerListener for Recorder {
    fn on_discovery_change(&self, _manager: &Arc<Manager>, enabled: bool) {
        let _ = self.0.lock().send(Event::Discovery(enabled));
    }

    fn on_node_discovered(&self, _manager: &Arc<Manager>, node: &Arc<Node>) {
        let _ = self.0.lock().send(Event::Node(node.tag().to_string()));
    }
}

fn fast_config() -> SdkConfig {
    SdkConfig {
        scan_slice_ms: 1,
        ..SdkConfig::default()
    }
}

fn entry(address: &str, name: &str, device_id: u8, mask: u32, rssi: i16) -> ScanEntry {
    ScanEntry::new(address, rssi, bluest_advertising(name, device_id, mask))
}

#[test]
fn test_discover_creates_nodes_and_notifies() {
    let adapter = FakeAdapter::new(vec![vec![
        entry("C0:85:00:00:00:01", "STile", 0x02, 0x00E0_0000, -60),
        entry("C0:85:00:00:00:02", "Nucleo", 0x80, 0x2000_0000, -70),
    ]]);
    let manager = Manager::new(Box::new(adapter), fast_config()).expect("manager");
    let (tx, rx) = mpsc::channel();
    manager.add_listener(Arc::new(Recorder(Mutex::new(tx))));

    assert!(manager
        .discover(Duration::from_millis(20))
        .expect("discover"));

    assert_eq!(manager.nodes().len(), 2);
    let tile = manager.node_with_name("STile").expect("sensor tile");
    assert_eq!(tile.device_type(), DeviceType::SensorTile);
    assert_eq!(tile.tx_power(), 4);
    assert_eq!(tile.features().len(), 3);
    let nucleo = manager.node_with_tag("C0:85:00:00:00:02").expect("nucleo");
    assert_eq!(nucleo.device_type(), DeviceType::Nucleo);
    assert!(nucleo.feature("Switch").is_some());

    let mut discovery = Vec::new();
    let mut discovered = Vec::new();
    while let Ok(event) = rx.recv_timeout(Duration::from_millis(500)) {
        match event {
            Event::Discovery(enabled) => discovery.push(enabled),
            Event::Node(tag) => discovered.push(tag),
        }
    }
    discovery.sort();
    discovered.sort();
    assert_eq!(discovery, vec![false, true]);
    assert_eq!(discovered, vec!["C0:85:00:00:00:01", "C0:85:00:00:00:02"]);
}

#[test]
fn test_non_bluest_advertising_does_not_stop_discovery() {
    let stranger = ScanEntry::new(
        "11:22:33:44:55:66",
        -40,
        vec![AdStructure::complete_local_name("Speaker")],
    );
    let wrong_version = ScanEntry::new(
        "11:22:33:44:55:77",
        -40,
        vec![AdStructure::manufacturer(&[0x02, 0x80, 0, 0, 0, 0])],
    );
    let adapter = FakeAdapter::new(vec![vec![
        stranger,
        wrong_version,
        entry("C0:85:00:00:00:03", "Good", 0x80, 0, -50),
    ]]);
    let opened = adapter.opened.clone();
    let manager = Manager::new(Box::new(adapter), fast_config()).expect("manager");

    manager.discover(Duration::from_millis(10)).expect("discover");

    assert_eq!(manager.nodes().len(), 1);
    assert_eq!(*opened.lock(), vec!["C0:85:00:00:00:03".to_string()]);
}

#[test]
fn test_rediscovery_refreshes_existing_node() {
    let adapter = FakeAdapter::new(vec![
        vec![entry("C0:85:00:00:00:04", "Old", 0x80, 0, -80)],
        vec![entry("C0:85:00:00:00:04", "New", 0x80, 0, -30)],
    ]);
    let manager = Manager::new(Box::new(adapter), fast_config()).expect("manager");

    manager.discover(Duration::from_millis(20)).expect("discover");

    assert_eq!(manager.nodes().len(), 1);
    let node = manager.node_with_tag("C0:85:00:00:00:04").expect("node");
    assert_eq!(node.last_rssi(), -30);
    assert_eq!(node.name(), "New");
    assert_eq!(node.status(), NodeStatus::Idle);
}

#[test]
fn test_registered_decoder_used_for_new_nodes() {
    let adapter = FakeAdapter::new(vec![vec![entry(
        "C0:85:00:00:00:05",
        "Custom",
        0x81,
        0x0000_0001 | 0x0080_0000,
        -50,
    )]]);
    let manager = Manager::new(Box::new(adapter), fast_config()).expect("manager");
    manager
        .add_features_to_node(0x81, HashMap::from([(0x0000_0001, counter_kind())]))
        .expect("single-bit mask");

    manager.discover(Duration::from_millis(10)).expect("discover");

    let node = manager.node_with_tag("C0:85:00:00:00:05").expect("node");
    assert!(node.feature("Counter").is_some());
    // default decoders remain available for that device id
    assert!(node.feature("Accelerometer").is_some());
}

#[test]
fn test_invalid_bitmask_registers_nothing() {
    let manager = Manager::new(Box::new(FakeAdapter::new(vec![])), fast_config()).expect("manager");

    let result = manager.add_features_to_node(
        0x81,
        HashMap::from([
            (0x0000_0001, counter_kind()),
            (0x0000_0006, FeatureKind::Switch),
        ]),
    );

    assert!(matches!(result, Err(BlueStError::InvalidFeatureBitmask(_))));
    assert!(manager
        .registry()
        .features_for_device(0x81)
        .get(&0x0000_0001)
        .is_none());
}

#[test]
fn test_reset_discovery_keeps_connected_nodes() {
    let connected_peer = peer(vec![sensor_service(vec![])]);
    let adapter = FakeAdapter::new(vec![vec![
        entry("C0:85:00:00:00:06", "Linked", 0x80, 0, -50),
        entry("C0:85:00:00:00:07", "Idle", 0x80, 0, -50),
    ]])
    .with_peer("C0:85:00:00:00:06", connected_peer);
    let manager = Manager::new(Box::new(adapter), fast_config()).expect("manager");
    manager.discover(Duration::from_millis(10)).expect("discover");

    manager
        .node_with_tag("C0:85:00:00:00:06")
        .expect("node")
        .connect(None)
        .expect("connect");
    manager.reset_discovery();

    let remaining: Vec<_> = manager.nodes().iter().map(|n| n.name()).collect();
    assert_eq!(remaining, vec!["Linked".to_string()]);
}
