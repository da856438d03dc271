// Integration tests for feature multiplexing on a connected node
//
// Several features can share one characteristic; a notification carries a
// device timestamp followed by each feature's bytes in high-bit-first order.

mod common;

use bluestsdk_core::feature::sensors::{Accelerometer, Gyroscope, HeartRate};
use bluestsdk_core::registry::standard_characteristic_features;
use bluestsdk_core::{
    BlueStError, CharProperties, Characteristic, DebugConsoleListener, Feature, FeatureListener,
    FeatureLogger, NodeStatus, Notification, Sample, Value,
};
use common::*;
use parking_lot::Mutex;
use std::sync::{mpsc, Arc};
use std::time::Duration;

const ACC_GYRO_MASK: u32 = 0x00C0_0000;
const SHARED_HANDLE: u16 = 0x0010;

struct ChannelListener(Mutex<mpsc::Sender<(&'static str, Sample)>>);

impl FeatureListener for ChannelListener {
    fn on_update(&self, feature: &Arc<Feature>, sample: &Sample) {
        let _ = self.0.lock().send((feature.name(), sample.clone()));
    }
}

struct RawLogger(Mutex<mpsc::Sender<Vec<u8>>>);

impl FeatureLogger for RawLogger {
    fn log_update(&self, _feature: &Arc<Feature>, raw: &[u8], _sample: &Sample) {
        let _ = self.0.lock().send(raw.to_vec());
    }
}

struct NullConsoleListener;

impl DebugConsoleListener for NullConsoleListener {}

fn acc_gyro_peer() -> SharedPeer {
    peer(vec![sensor_service(vec![feature_characteristic(
        SHARED_HANDLE,
        ACC_GYRO_MASK,
        CharProperties::read_notify(),
    )])])
}

fn accel_gyro_body(accel: [i16; 3], gyro: [i16; 3]) -> Vec<u8> {
    accel
        .iter()
        .chain(gyro.iter())
        .flat_map(|v| v.to_le_bytes())
        .collect()
}

#[test]
fn test_two_features_share_one_characteristic() {
    let peer = acc_gyro_peer();
    let node = node(0x80, ACC_GYRO_MASK, &peer);
    node.connect(None).expect("connect");

    let accelerometer = node.feature("Accelerometer").expect("accelerometer");
    let gyroscope = node.feature("Gyroscope").expect("gyroscope");
    assert_eq!(accelerometer.characteristic().map(|c| c.handle), Some(SHARED_HANDLE));
    assert_eq!(gyroscope.characteristic().map(|c| c.handle), Some(SHARED_HANDLE));

    let (tx, rx) = mpsc::channel();
    let listener: Arc<dyn FeatureListener> = Arc::new(ChannelListener(Mutex::new(tx)));
    accelerometer.add_listener(listener.clone());
    gyroscope.add_listener(listener);

    // 2 bytes timestamp + 6 accelerometer + 6 gyroscope
    let data = payload(100, &accel_gyro_body([100, -200, 1000], [15, -25, 0]));
    assert_eq!(data.len(), 14);
    node.handle_notification(SHARED_HANDLE, &data);

    let mut updates = Vec::new();
    while updates.len() < 2 {
        updates.push(rx.recv_timeout(Duration::from_secs(2)).expect("two updates"));
    }
    updates.sort_by_key(|(name, _)| *name);

    let (name, accel) = &updates[0];
    assert_eq!(*name, "Accelerometer");
    assert_eq!(accel.timestamp, 100);
    assert_eq!(Accelerometer::x(accel), 100.0);
    assert_eq!(Accelerometer::y(accel), -200.0);
    assert_eq!(Accelerometer::z(accel), 1000.0);

    let (name, gyro) = &updates[1];
    assert_eq!(*name, "Gyroscope");
    assert_eq!(gyro.timestamp, 100);
    assert_eq!(Gyroscope::x(gyro), 1.5);
    assert_eq!(Gyroscope::y(gyro), -2.5);
    assert_eq!(Gyroscope::z(gyro), 0.0);
}

#[test]
fn test_truncated_payload_stops_at_failing_feature() {
    let peer = acc_gyro_peer();
    let node = node(0x80, ACC_GYRO_MASK, &peer);
    node.connect(None).expect("connect");

    let mut body = accel_gyro_body([1, 2, 3], [4, 5, 6]);
    body.truncate(9);
    node.handle_notification(SHARED_HANDLE, &payload(7, &body));

    let accel = node
        .feature("Accelerometer")
        .and_then(|f| f.last_sample())
        .expect("accelerometer decoded");
    assert_eq!(accel.values, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
    assert!(node
        .feature("Gyroscope")
        .and_then(|f| f.last_sample())
        .is_none());
}

#[test]
fn test_notification_pumped_from_transport() {
    let peer = acc_gyro_peer();
    let node = node(0x80, ACC_GYRO_MASK, &peer);
    node.connect(None).expect("connect");

    peer.lock().notifications.push_back(Notification::new(
        SHARED_HANDLE,
        payload(3, &accel_gyro_body([9, 9, 9], [10, 10, 10])),
    ));

    assert!(node
        .wait_for_notifications(Duration::from_millis(50))
        .expect("notification"));
    assert!(!node
        .wait_for_notifications(Duration::from_millis(5))
        .expect("no notification"));

    let gyro = node
        .feature("Gyroscope")
        .and_then(|f| f.last_sample())
        .expect("gyro sample");
    assert_eq!(gyro.values, vec![Value::Float(1.0); 3]);
}

#[test]
fn test_timestamp_unwraps_and_resets_on_reconnect() {
    let peer = acc_gyro_peer();
    let node = node(0x80, ACC_GYRO_MASK, &peer);
    node.connect(None).expect("connect");
    let accelerometer = node.feature("Accelerometer").expect("accelerometer");
    let body = accel_gyro_body([0; 3], [0; 3]);

    node.handle_notification(SHARED_HANDLE, &payload(65_500, &body));
    node.handle_notification(SHARED_HANDLE, &payload(20, &body));
    assert_eq!(
        accelerometer.last_sample().map(|s| s.timestamp),
        Some(65_536 + 20)
    );

    node.disconnect().expect("disconnect");
    node.connect(None).expect("reconnect");
    node.handle_notification(SHARED_HANDLE, &payload(5, &body));
    assert_eq!(accelerometer.last_sample().map(|s| s.timestamp), Some(5));
}

#[test]
fn test_disable_keeps_characteristic_on_for_co_tenant() {
    let peer = acc_gyro_peer();
    let node = node(0x80, ACC_GYRO_MASK, &peer);
    node.connect(None).expect("connect");
    let accelerometer = node.feature("Accelerometer").expect("accelerometer");
    let gyroscope = node.feature("Gyroscope").expect("gyroscope");

    assert!(node.enable_notifications(&accelerometer).expect("enable"));
    assert!(node.enable_notifications(&gyroscope).expect("enable"));
    assert!(node.disable_notifications(&accelerometer).expect("disable"));

    assert!(!accelerometer.is_notifying());
    assert!(gyroscope.is_notifying());
    assert_eq!(
        peer.lock().notify_log,
        vec![(SHARED_HANDLE, true), (SHARED_HANDLE, true)]
    );

    assert!(node.disable_notifications(&gyroscope).expect("disable"));
    assert_eq!(peer.lock().notify_log.last(), Some(&(SHARED_HANDLE, false)));
}

#[test]
fn test_feature_of_other_node_rejected() {
    let first_peer = acc_gyro_peer();
    let second_peer = acc_gyro_peer();
    let first = node(0x80, ACC_GYRO_MASK, &first_peer);
    let second = node(0x80, ACC_GYRO_MASK, &second_peer);
    first.connect(None).expect("connect");
    second.connect(None).expect("connect");

    let foreign = first.feature("Accelerometer").expect("accelerometer");
    assert!(!second.enable_notifications(&foreign).expect("no io"));
    assert!(second_peer.lock().notify_log.is_empty());
}

#[test]
fn test_transport_failure_marks_node_unreachable() {
    let peer = acc_gyro_peer();
    let node = node(0x80, ACC_GYRO_MASK, &peer);
    node.connect(None).expect("connect");
    let accelerometer = node.feature("Accelerometer").expect("accelerometer");

    peer.lock().fail_io = true;
    let result = node.read_feature(&accelerometer);

    assert!(matches!(result, Err(BlueStError::Transport(_))));
    assert_eq!(node.status(), NodeStatus::Unreachable);
    assert!(!peer.lock().connected);
}

#[test]
fn test_write_checked_before_any_io() {
    let peer = acc_gyro_peer();
    let node = node(0x80, ACC_GYRO_MASK, &peer);
    node.connect(None).expect("connect");
    let accelerometer = node.feature("Accelerometer").expect("accelerometer");

    let result = node.write_feature(&accelerometer, &[1, 2, 3]);

    assert!(matches!(result, Err(BlueStError::InvalidOperation(_))));
    assert!(peer.lock().writes.is_empty());
    assert_eq!(node.status(), NodeStatus::Connected);
}

#[test]
fn test_read_feature_notifies_loggers_only() {
    let peer = acc_gyro_peer();
    peer.lock()
        .reads
        .insert(SHARED_HANDLE, payload(1, &accel_gyro_body([5, 6, 7], [0; 3])));
    let node = node(0x80, ACC_GYRO_MASK, &peer);
    node.connect(None).expect("connect");
    let accelerometer = node.feature("Accelerometer").expect("accelerometer");

    let (sample_tx, sample_rx) = mpsc::channel();
    let (raw_tx, raw_rx) = mpsc::channel();
    accelerometer.add_listener(Arc::new(ChannelListener(Mutex::new(sample_tx))));
    accelerometer.add_logger(Arc::new(RawLogger(Mutex::new(raw_tx))));

    let raw = node.read_feature(&accelerometer).expect("read");

    assert_eq!(raw.len(), 14);
    assert_eq!(
        raw_rx.recv_timeout(Duration::from_secs(2)).expect("logger"),
        vec![5, 0, 6, 0, 7, 0]
    );
    assert!(sample_rx.recv_timeout(Duration::from_millis(200)).is_err());
}

#[test]
fn test_heart_rate_through_standard_characteristic() {
    let heart_rate = Characteristic::new(
        0x0030,
        bluestsdk_core::gatt::HEART_RATE_MEASUREMENT_UUID,
        CharProperties::read_notify(),
    );
    let peer = peer(vec![sensor_service(vec![heart_rate])]);
    let node = node(0x80, 0, &peer);

    node.connect(Some(standard_characteristic_features()))
        .expect("connect");
    // flags: 16-bit value + energy expended
    node.handle_notification(0x0030, &[0x09, 0x48, 0x00, 0x10, 0x00]);

    let feature = node.feature("Heart Rate").expect("heart rate");
    let sample = feature.last_sample().expect("sample");
    assert_eq!(HeartRate::heart_rate(&sample), 72);
    assert_eq!(HeartRate::energy_expended(&sample), 16);
    assert!(HeartRate::rr_interval(&sample).is_nan());

    // reconnecting reuses the same feature instance
    node.disconnect().expect("disconnect");
    node.connect(None).expect("reconnect");
    assert_eq!(node.features_by_name("Heart Rate").len(), 1);
}

#[test]
fn test_empty_service_list_marks_node_dead() {
    let peer = peer(vec![]);
    let node = node(0x80, ACC_GYRO_MASK, &peer);

    node.connect(None).expect("connect");

    assert_eq!(node.status(), NodeStatus::Dead);
    assert!(!peer.lock().connected);
}

#[test]
fn test_wait_for_notifications_requires_connection() {
    let peer = acc_gyro_peer();
    let node = node(0x80, ACC_GYRO_MASK, &peer);

    let result = node.wait_for_notifications(Duration::from_millis(5));

    assert!(matches!(result, Err(BlueStError::InvalidOperation(_))));
    assert_eq!(node.status(), NodeStatus::Idle);
    assert_eq!(peer.lock().connect_count, 0);
}

#[test]
fn test_reconnect_without_characteristic_disables_features() {
    let peer = acc_gyro_peer();
    let node = node(0x80, ACC_GYRO_MASK, &peer);
    node.connect(None).expect("connect");
    let accelerometer = node.feature("Accelerometer").expect("accelerometer");
    assert!(node.enable_notifications(&accelerometer).expect("enable"));

    node.disconnect().expect("disconnect");
    peer.lock().services = vec![sensor_service(vec![])];
    node.connect(None).expect("reconnect");

    assert!(!accelerometer.is_enabled());
    assert!(!accelerometer.is_notifying());
    assert!(accelerometer.characteristic().is_none());
    let notify_calls = peer.lock().notify_log.len();
    assert!(!node.enable_notifications(&accelerometer).expect("no io"));
    assert_eq!(peer.lock().notify_log.len(), notify_calls);

    // a stale handle no longer reaches the feature
    node.handle_notification(SHARED_HANDLE, &payload(1, &accel_gyro_body([1; 3], [2; 3])));
    assert!(accelerometer.last_sample().is_none());
}

#[test]
fn test_reconnect_keeps_console_and_reenables_notify() {
    let peer = peer(vec![debug_service()]);
    let node = node(0x80, 0, &peer);
    node.connect(None).expect("connect");
    let console = node.debug_console().expect("console");
    console
        .add_listener(Arc::new(NullConsoleListener))
        .expect("listener");

    node.disconnect().expect("disconnect");
    peer.lock().notify_log.clear();
    node.connect(None).expect("reconnect");

    let again = node.debug_console().expect("console");
    assert!(Arc::ptr_eq(&console, &again));
    assert!(!console.is_closed());
    assert_eq!(
        peer.lock().notify_log,
        vec![(STDINOUT_HANDLE, true), (STDERR_HANDLE, true)]
    );
}

#[test]
fn test_reconnect_without_debug_service_closes_console() {
    let peer = peer(vec![debug_service()]);
    let node = node(0x80, 0, &peer);
    node.connect(None).expect("connect");
    let console = node.debug_console().expect("console");

    node.disconnect().expect("disconnect");
    peer.lock().services = vec![sensor_service(vec![])];
    node.connect(None).expect("reconnect");

    assert!(node.debug_console().is_none());
    assert!(console.is_closed());
    assert!(matches!(
        console.write(b"help"),
        Err(BlueStError::InvalidOperation(_))
    ));
}
