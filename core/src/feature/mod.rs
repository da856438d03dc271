//! Features: one decoded data stream exposed by a node
//!
//! A concrete sensor implements `FeatureDecoder::extract`. The `Feature`
//! wrapper owns everything else: the last sample, enable/notify flags, the
//! characteristic it is bound to and the listener/logger fan-out.

pub mod sensors;

use crate::dispatch::Dispatcher;
use crate::gatt::Characteristic;
use crate::node::Node;
use crate::BlueStError;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Bytes of device timestamp at the head of every BlueST notification
pub const TIMESTAMP_OFFSET_BYTES: usize = 2;

/// Numeric type of a field on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    UInt8,
    Int8,
    UInt16,
    Int16,
    UInt32,
    Int32,
    Int64,
    Float,
}

/// Description of one value inside a sample
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Field {
    pub name: &'static str,
    pub unit: Option<&'static str>,
    pub field_type: FieldType,
    pub min: f64,
    pub max: f64,
}

impl Field {
    pub const fn new(
        name: &'static str,
        unit: Option<&'static str>,
        field_type: FieldType,
        min: f64,
        max: f64,
    ) -> Self {
        Self {
            name,
            unit,
            field_type,
            min,
            max,
        }
    }
}

/// One decoded value
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum Value {
    Int(i64),
    Float(f64),
}

impl Value {
    pub fn as_f64(&self) -> f64 {
        match *self {
            Value::Int(value) => value as f64,
            Value::Float(value) => value,
        }
    }

    pub fn as_i64(&self) -> i64 {
        match *self {
            Value::Int(value) => value,
            Value::Float(value) => value as i64,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(value) => write!(f, "{}", value),
            Value::Float(value) => write!(f, "{:.2}", value),
        }
    }
}

/// Snapshot of a feature's data at one device timestamp
#[derive(Debug, Clone, Serialize)]
pub struct Sample {
    pub timestamp: u64,
    pub values: Vec<Value>,
    pub fields: Vec<Field>,
    /// Host instant the data was decoded
    #[serde(skip)]
    pub notification_time: SystemTime,
}

impl Sample {
    pub fn new(timestamp: u64, values: Vec<Value>, fields: Vec<Field>) -> Self {
        Self {
            timestamp,
            values,
            fields,
            notification_time: SystemTime::now(),
        }
    }

    pub fn value(&self, index: usize) -> Option<Value> {
        self.values.get(index).copied()
    }
}

impl PartialEq for Sample {
    fn eq(&self, other: &Self) -> bool {
        self.timestamp == other.timestamp && self.values == other.values
    }
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ts: {}", self.timestamp)?;
        for (index, value) in self.values.iter().enumerate() {
            match self.fields.get(index) {
                Some(field) => {
                    write!(f, " {}: {}", field.name, value)?;
                    if let Some(unit) = field.unit {
                        write!(f, " {}", unit)?;
                    }
                }
                None => write!(f, " {}", value)?,
            }
        }
        Ok(())
    }
}

/// Result of one `extract` call
#[derive(Debug, Clone)]
pub struct Extracted {
    pub sample: Sample,
    pub bytes_read: usize,
}

impl Extracted {
    pub fn new(sample: Sample, bytes_read: usize) -> Self {
        Self { sample, bytes_read }
    }
}

/// Decoding contract every concrete feature implements
pub trait FeatureDecoder: Send + Sync {
    fn name(&self) -> &'static str;

    fn fields(&self) -> &[Field];

    /// Decode one sample starting at `offset`, returning how many bytes it used.
    fn extract(&self, timestamp: u64, data: &[u8], offset: usize)
        -> Result<Extracted, BlueStError>;
}

/// Decorator for characteristics without a BlueST timestamp
///
/// The wrapped decoder reads from the start of the payload (two bytes before
/// the offset the node hands out) and gets host time in milliseconds instead
/// of the device clock.
pub struct HostTimestamp<D> {
    inner: D,
}

impl<D: FeatureDecoder> HostTimestamp<D> {
    pub fn new(inner: D) -> Self {
        Self { inner }
    }

    fn host_time_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or(0)
    }
}

impl<D: FeatureDecoder> FeatureDecoder for HostTimestamp<D> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn fields(&self) -> &[Field] {
        self.inner.fields()
    }

    fn extract(
        &self,
        _timestamp: u64,
        data: &[u8],
        offset: usize,
    ) -> Result<Extracted, BlueStError> {
        let start = offset.checked_sub(TIMESTAMP_OFFSET_BYTES).ok_or_else(|| {
            BlueStError::InvalidOperation(format!(
                "{}: offset {} leaves no room for the timestamp bytes",
                self.inner.name(),
                offset
            ))
        })?;
        self.inner.extract(Self::host_time_ms(), data, start)
    }
}

/// Receives every sample update of a feature
pub trait FeatureListener: Send + Sync {
    fn on_update(&self, feature: &Arc<Feature>, sample: &Sample);
}

/// Receives the raw bytes behind every decoded sample
pub trait FeatureLogger: Send + Sync {
    fn log_update(&self, feature: &Arc<Feature>, raw: &[u8], sample: &Sample);
}

/// A feature instance bound to one node
pub struct Feature {
    decoder: Box<dyn FeatureDecoder>,
    node: Weak<Node>,
    enabled: AtomicBool,
    notifying: AtomicBool,
    characteristic: RwLock<Option<Characteristic>>,
    last_sample: Mutex<Option<Sample>>,
    listeners: RwLock<Vec<Arc<dyn FeatureListener>>>,
    loggers: RwLock<Vec<Arc<dyn FeatureLogger>>>,
    dispatcher: Arc<Dispatcher>,
}

impl Feature {
    pub(crate) fn new(
        decoder: Box<dyn FeatureDecoder>,
        node: Weak<Node>,
        dispatcher: Arc<Dispatcher>,
    ) -> Arc<Self> {
        Arc::new(Self {
            decoder,
            node,
            enabled: AtomicBool::new(false),
            notifying: AtomicBool::new(false),
            characteristic: RwLock::new(None),
            last_sample: Mutex::new(None),
            listeners: RwLock::new(Vec::new()),
            loggers: RwLock::new(Vec::new()),
            dispatcher,
        })
    }

    pub fn name(&self) -> &'static str {
        self.decoder.name()
    }

    pub fn fields(&self) -> &[Field] {
        self.decoder.fields()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn is_notifying(&self) -> bool {
        self.notifying.load(Ordering::SeqCst)
    }

    /// Characteristic used to read, write and toggle notifications
    pub fn characteristic(&self) -> Option<Characteristic> {
        self.characteristic.read().clone()
    }

    pub fn last_sample(&self) -> Option<Sample> {
        self.last_sample.lock().clone()
    }

    pub fn parent_node(&self) -> Option<Arc<Node>> {
        self.node.upgrade()
    }

    pub(crate) fn belongs_to(&self, node: &Node) -> bool {
        std::ptr::eq(self.node.as_ptr(), node as *const Node)
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub(crate) fn set_notifying(&self, notifying: bool) {
        self.notifying.store(notifying, Ordering::SeqCst);
    }

    pub(crate) fn set_characteristic(&self, characteristic: Characteristic) {
        *self.characteristic.write() = Some(characteristic);
    }

    pub(crate) fn clear_characteristic(&self) {
        *self.characteristic.write() = None;
    }

    pub fn add_listener(&self, listener: Arc<dyn FeatureListener>) {
        let mut listeners = self.listeners.write();
        if !listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            listeners.push(listener);
        }
    }

    pub fn remove_listener(&self, listener: &Arc<dyn FeatureListener>) {
        self.listeners.write().retain(|l| !Arc::ptr_eq(l, listener));
    }

    pub fn add_logger(&self, logger: Arc<dyn FeatureLogger>) {
        let mut loggers = self.loggers.write();
        if !loggers.iter().any(|l| Arc::ptr_eq(l, &logger)) {
            loggers.push(logger);
        }
    }

    pub fn remove_logger(&self, logger: &Arc<dyn FeatureLogger>) {
        self.loggers.write().retain(|l| !Arc::ptr_eq(l, logger));
    }

    /// Decode one sample from `data` at `offset` and publish it.
    ///
    /// Listeners run only when `notify_listeners` is set; loggers always
    /// run. Both are queued on the dispatcher after the state lock is
    /// released. Returns the number of bytes consumed.
    pub(crate) fn update(
        self: &Arc<Self>,
        timestamp: u64,
        data: &[u8],
        offset: usize,
        notify_listeners: bool,
    ) -> Result<usize, BlueStError> {
        let extracted = {
            let mut last_sample = self.last_sample.lock();
            let extracted = match self.decoder.extract(timestamp, data, offset) {
                Ok(extracted) => extracted,
                Err(e) => {
                    warn!("{}: failed to decode sample: {}", self.name(), e);
                    return Err(e);
                }
            };
            *last_sample = Some(extracted.sample.clone());
            extracted
        };

        let sample = Arc::new(extracted.sample);
        debug!("{} updated: {}", self.name(), sample);

        if notify_listeners {
            let listeners = self.listeners.read().clone();
            for listener in listeners {
                let feature = self.clone();
                let sample = sample.clone();
                self.dispatcher
                    .submit(move || listener.on_update(&feature, &sample));
            }
        }

        let loggers = self.loggers.read().clone();
        if !loggers.is_empty() {
            let end = offset.saturating_add(extracted.bytes_read).min(data.len());
            let raw: Arc<[u8]> = data.get(offset..end).unwrap_or(&[]).into();
            for logger in loggers {
                let feature = self.clone();
                let sample = sample.clone();
                let raw = raw.clone();
                self.dispatcher
                    .submit(move || logger.log_update(&feature, &raw, &sample));
            }
        }

        Ok(extracted.bytes_read)
    }
}

impl fmt::Debug for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Feature")
            .field("name", &self.name())
            .field("enabled", &self.is_enabled())
            .field("notifying", &self.is_notifying())
            .finish()
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.last_sample() {
            Some(sample) => write!(f, "{}: {}", self.name(), sample),
            None => write!(f, "{}: Unknown", self.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::sensors::{Accelerometer, HeartRate};
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    struct ChannelListener(Mutex<mpsc::Sender<(String, Sample)>>);

    impl FeatureListener for ChannelListener {
        fn on_update(&self, feature: &Arc<Feature>, sample: &Sample) {
            let _ = self
                .0
                .lock()
                .send((feature.name().to_string(), sample.clone()));
        }
    }

    struct ChannelLogger(Mutex<mpsc::Sender<Vec<u8>>>);

    impl FeatureLogger for ChannelLogger {
        fn log_update(&self, _feature: &Arc<Feature>, raw: &[u8], _sample: &Sample) {
            let _ = self.0.lock().send(raw.to_vec());
        }
    }

    fn detached_feature(decoder: Box<dyn FeatureDecoder>) -> Arc<Feature> {
        let dispatcher = Arc::new(Dispatcher::new(2).expect("dispatcher"));
        Feature::new(decoder, Weak::new(), dispatcher)
    }

    #[test]
    fn test_update_publishes_last_sample_and_bytes_read() {
        let feature = detached_feature(Box::new(Accelerometer::new()));
        let data = [0x00, 0x00, 0x01, 0x00, 0x02, 0x00, 0x03, 0x00];

        let read = feature.update(7, &data, 2, true).expect("decode");

        assert_eq!(read, 6);
        let sample = feature.last_sample().expect("sample");
        assert_eq!(sample.timestamp, 7);
        assert_eq!(
            sample.values,
            vec![Value::Int(1), Value::Int(2), Value::Int(3)]
        );
    }

    #[test]
    fn test_listener_and_logger_receive_update() {
        let feature = detached_feature(Box::new(Accelerometer::new()));
        let (sample_tx, sample_rx) = mpsc::channel();
        let (raw_tx, raw_rx) = mpsc::channel();
        feature.add_listener(Arc::new(ChannelListener(Mutex::new(sample_tx))));
        feature.add_logger(Arc::new(ChannelLogger(Mutex::new(raw_tx))));

        let data = [0xAA, 0xBB, 0x0A, 0x00, 0x0B, 0x00, 0x0C, 0x00, 0xFF];
        feature.update(1, &data, 2, true).expect("decode");

        let (name, sample) = sample_rx
            .recv_timeout(Duration::from_secs(2))
            .expect("listener called");
        assert_eq!(name, "Accelerometer");
        assert_eq!(sample.values[0], Value::Int(10));

        let raw = raw_rx
            .recv_timeout(Duration::from_secs(2))
            .expect("logger called");
        assert_eq!(raw, vec![0x0A, 0x00, 0x0B, 0x00, 0x0C, 0x00]);
    }

    #[test]
    fn test_silent_update_skips_listeners() {
        let feature = detached_feature(Box::new(Accelerometer::new()));
        let (sample_tx, sample_rx) = mpsc::channel();
        feature.add_listener(Arc::new(ChannelListener(Mutex::new(sample_tx))));

        feature
            .update(1, &[0, 0, 1, 0, 2, 0, 3, 0], 2, false)
            .expect("decode");

        assert!(feature.last_sample().is_some());
        assert!(sample_rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn test_short_payload_keeps_previous_sample() {
        let feature = detached_feature(Box::new(Accelerometer::new()));
        feature
            .update(1, &[0, 0, 1, 0, 2, 0, 3, 0], 2, true)
            .expect("decode");

        let err = feature.update(2, &[0, 0, 1, 0], 2, true).unwrap_err();

        assert_eq!(
            err,
            BlueStError::InsufficientData {
                needed: 6,
                available: 2
            }
        );
        assert_eq!(feature.last_sample().expect("sample").timestamp, 1);
    }

    #[test]
    fn test_duplicate_listener_registered_once() {
        let feature = detached_feature(Box::new(Accelerometer::new()));
        let (tx, rx) = mpsc::channel();
        let listener: Arc<dyn FeatureListener> = Arc::new(ChannelListener(Mutex::new(tx)));
        feature.add_listener(listener.clone());
        feature.add_listener(listener.clone());

        feature
            .update(1, &[0, 0, 1, 0, 2, 0, 3, 0], 2, true)
            .expect("decode");
        rx.recv_timeout(Duration::from_secs(2)).expect("first call");
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());

        feature.remove_listener(&listener);
        feature
            .update(2, &[0, 0, 1, 0, 2, 0, 3, 0], 2, true)
            .expect("decode");
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn test_host_timestamp_reads_from_payload_start() {
        let decoder = HostTimestamp::new(HeartRate::new());
        // flags 0x00: 8-bit heart rate
        let data = [0x00, 72];
        let before = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_millis() as u64;

        let extracted = decoder.extract(0, &data, 2).expect("decode");

        assert_eq!(extracted.bytes_read, 2);
        assert_eq!(extracted.sample.values[0], Value::Int(72));
        assert!(extracted.sample.timestamp >= before);
    }

    #[test]
    fn test_host_timestamp_rejects_offset_without_room() {
        let decoder = HostTimestamp::new(HeartRate::new());
        assert!(matches!(
            decoder.extract(0, &[0x00, 72], 1),
            Err(BlueStError::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_sample_equality_ignores_host_time() {
        let a = Sample::new(5, vec![Value::Int(1)], vec![]);
        std::thread::sleep(Duration::from_millis(2));
        let b = Sample::new(5, vec![Value::Int(1)], vec![]);
        assert_eq!(a, b);
        assert_ne!(a, Sample::new(6, vec![Value::Int(1)], vec![]));
    }

    #[test]
    fn test_sample_display() {
        let fields = vec![Field::new("X", Some("mg"), FieldType::Int16, -2000.0, 2000.0)];
        let sample = Sample::new(3, vec![Value::Int(-5)], fields);
        assert_eq!(sample.to_string(), "Ts: 3 X: -5 mg");
    }
}
