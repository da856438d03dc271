//! Feature registry
//!
//! Maps a device type id and a single-bit feature mask to the decoder that
//! handles it. One registry is built at startup and shared by the manager
//! and every node it creates.

use crate::feature::sensors::{
    Accelerometer, ActivityRecognition, AudioSceneClassification, Beamforming, Gyroscope,
    HeartRate, Humidity, Magnetometer, Pressure, Proximity, ProximityGesture, StepperMotor,
    Switch, Temperature,
};
use crate::feature::{FeatureDecoder, HostTimestamp};
use crate::gatt::HEART_RATE_MEASUREMENT_UUID;
use crate::BlueStError;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use tracing::info;
use uuid::Uuid;

/// Constructor for one kind of feature
#[derive(Clone, Copy)]
pub enum FeatureKind {
    Switch,
    Proximity,
    Accelerometer,
    Gyroscope,
    Magnetometer,
    Pressure,
    Humidity,
    Temperature,
    StepperMotor,
    ActivityRecognition,
    ProximityGesture,
    /// Not in the default table; register it per device id
    Beamforming,
    /// Not in the default table; register it per device id
    AudioSceneClassification,
    HeartRate,
    /// Application-defined decoder
    Custom {
        name: &'static str,
        build: fn() -> Box<dyn FeatureDecoder>,
    },
}

impl FeatureKind {
    pub fn build(&self) -> Box<dyn FeatureDecoder> {
        match self {
            FeatureKind::Switch => Box::new(Switch::new()),
            FeatureKind::Proximity => Box::new(Proximity::new()),
            FeatureKind::Accelerometer => Box::new(Accelerometer::new()),
            FeatureKind::Gyroscope => Box::new(Gyroscope::new()),
            FeatureKind::Magnetometer => Box::new(Magnetometer::new()),
            FeatureKind::Pressure => Box::new(Pressure::new()),
            FeatureKind::Humidity => Box::new(Humidity::new()),
            FeatureKind::Temperature => Box::new(Temperature::new()),
            FeatureKind::StepperMotor => Box::new(StepperMotor::new()),
            FeatureKind::ActivityRecognition => Box::new(ActivityRecognition::new()),
            FeatureKind::ProximityGesture => Box::new(ProximityGesture::new()),
            FeatureKind::Beamforming => Box::new(Beamforming::new()),
            FeatureKind::AudioSceneClassification => Box::new(AudioSceneClassification::new()),
            FeatureKind::HeartRate => Box::new(HostTimestamp::new(HeartRate::new())),
            FeatureKind::Custom { build, .. } => build(),
        }
    }

    /// Name of the feature this kind builds
    pub fn name(&self) -> &'static str {
        match self {
            FeatureKind::Switch => "Switch",
            FeatureKind::Proximity => "Proximity",
            FeatureKind::Accelerometer => "Accelerometer",
            FeatureKind::Gyroscope => "Gyroscope",
            FeatureKind::Magnetometer => "Magnetometer",
            FeatureKind::Pressure => "Pressure",
            FeatureKind::Humidity => "Humidity",
            FeatureKind::Temperature => "Temperature",
            FeatureKind::StepperMotor => "Stepper Motor",
            FeatureKind::ActivityRecognition => "Activity Recognition",
            FeatureKind::ProximityGesture => "Gesture",
            FeatureKind::Beamforming => "Beamforming",
            FeatureKind::AudioSceneClassification => "Audio Scene Classification",
            FeatureKind::HeartRate => "Heart Rate",
            FeatureKind::Custom { name, .. } => *name,
        }
    }
}

impl PartialEq for FeatureKind {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (FeatureKind::Custom { name: a, .. }, FeatureKind::Custom { name: b, .. }) => a == b,
            (FeatureKind::Custom { .. }, _) | (_, FeatureKind::Custom { .. }) => false,
            _ => std::mem::discriminant(self) == std::mem::discriminant(other),
        }
    }
}

impl fmt::Debug for FeatureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureKind::Custom { name, .. } => write!(f, "Custom({})", name),
            other => f.write_str(other.name()),
        }
    }
}

/// Decoder table used for every device id without its own registration
pub fn default_feature_table() -> HashMap<u32, FeatureKind> {
    HashMap::from([
        (0x2000_0000, FeatureKind::Switch),
        (0x0200_0000, FeatureKind::Proximity),
        (0x0080_0000, FeatureKind::Accelerometer),
        (0x0040_0000, FeatureKind::Gyroscope),
        (0x0020_0000, FeatureKind::Magnetometer),
        (0x0010_0000, FeatureKind::Pressure),
        (0x0008_0000, FeatureKind::Humidity),
        (0x0004_0000, FeatureKind::Temperature),
        (0x0001_0000, FeatureKind::Temperature),
        (0x0000_2000, FeatureKind::StepperMotor),
        (0x0000_0010, FeatureKind::ActivityRecognition),
        (0x0000_0004, FeatureKind::ProximityGesture),
    ])
}

/// Bluetooth SIG characteristics the SDK can decode without a BlueST mask
pub fn standard_characteristic_features() -> HashMap<Uuid, Vec<FeatureKind>> {
    HashMap::from([(HEART_RATE_MEASUREMENT_UUID, vec![FeatureKind::HeartRate])])
}

/// Per-device-type decoder tables
pub struct FeatureRegistry {
    tables: RwLock<HashMap<u8, HashMap<u32, FeatureKind>>>,
}

impl Default for FeatureRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FeatureRegistry {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
        }
    }

    /// Copy of the decoder table for `device_id`
    pub fn features_for_device(&self, device_id: u8) -> HashMap<u32, FeatureKind> {
        self.tables
            .read()
            .get(&device_id)
            .cloned()
            .unwrap_or_else(default_feature_table)
    }

    /// Register extra decoders for a device type.
    ///
    /// Every key must have exactly one bit set. The whole map is rejected
    /// when one key is invalid; nothing is registered in that case. A device
    /// id seen for the first time starts from the default table.
    pub fn add_features_to_node(
        &self,
        device_id: u8,
        features: HashMap<u32, FeatureKind>,
    ) -> Result<(), BlueStError> {
        let mut invalid: Vec<u32> = features
            .keys()
            .copied()
            .filter(|mask| mask.count_ones() != 1)
            .collect();
        if !invalid.is_empty() {
            invalid.sort_unstable();
            return Err(BlueStError::InvalidFeatureBitmask(format!(
                "every mask must have exactly one bit set, got {}",
                invalid
                    .iter()
                    .map(|mask| format!("{:#010x}", mask))
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }

        let count = features.len();
        self.tables
            .write()
            .entry(device_id)
            .or_insert_with(default_feature_table)
            .extend(features);
        info!(
            "Registered {} feature decoder(s) for device id {:#04x}",
            count, device_id
        );
        Ok(())
    }
}
