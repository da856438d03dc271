//! Built-in sensor decoders
//!
//! Every decoder is stateless; scale factors and ranges follow the board
//! firmware. The associated getter functions read a `Sample` back into typed
//! values, returning NaN or a negative sentinel when the value is missing.

use super::{Extracted, FeatureDecoder, Field, FieldType, Sample, Value};
use crate::codec::{ensure_available, read_u8, LittleEndian};
use crate::BlueStError;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

fn float_at(sample: &Sample, index: usize) -> f64 {
    sample.value(index).map(|v| v.as_f64()).unwrap_or(f64::NAN)
}

fn int_at(sample: &Sample, index: usize) -> i64 {
    sample.value(index).map(|v| v.as_i64()).unwrap_or(-1)
}

fn read_three_i16(data: &[u8], offset: usize) -> Result<[i16; 3], BlueStError> {
    ensure_available(data, offset, 6)?;
    Ok([
        LittleEndian::read_i16(data, offset)?,
        LittleEndian::read_i16(data, offset + 2)?,
        LittleEndian::read_i16(data, offset + 4)?,
    ])
}

// ----------------------------------------------------------------------------
// Switch
// ----------------------------------------------------------------------------

const SWITCH_FIELDS: [Field; 1] = [Field::new("Status", None, FieldType::UInt8, 0.0, 256.0)];

/// On/off switch state (1 byte)
#[derive(Debug, Default)]
pub struct Switch;

impl Switch {
    pub fn new() -> Self {
        Self
    }

    pub fn status(sample: &Sample) -> i64 {
        int_at(sample, 0)
    }

    /// Payload that sets the switch: zero timestamp then the status byte.
    pub fn status_payload(status: u8) -> Vec<u8> {
        let mut payload = LittleEndian::u16_bytes(0).to_vec();
        payload.push(status);
        payload
    }
}

impl FeatureDecoder for Switch {
    fn name(&self) -> &'static str {
        "Switch"
    }

    fn fields(&self) -> &[Field] {
        &SWITCH_FIELDS
    }

    fn extract(&self, timestamp: u64, data: &[u8], offset: usize) -> Result<Extracted, BlueStError> {
        let status = read_u8(data, offset)?;
        Ok(Extracted::new(
            Sample::new(timestamp, vec![Value::Int(status.into())], SWITCH_FIELDS.to_vec()),
            1,
        ))
    }
}

// ----------------------------------------------------------------------------
// Proximity
// ----------------------------------------------------------------------------

pub const PROXIMITY_OUT_OF_RANGE: i64 = 0xFFFF;
const PROXIMITY_LOW_RANGE_MAX: u16 = 0x00FE;
const PROXIMITY_HIGH_RANGE_MAX: u16 = 0x7FFE;

const PROXIMITY_LOW_RANGE_FIELDS: [Field; 1] = [Field::new(
    "Proximity",
    Some("mm"),
    FieldType::UInt16,
    0.0,
    PROXIMITY_LOW_RANGE_MAX as f64,
)];
const PROXIMITY_HIGH_RANGE_FIELDS: [Field; 1] = [Field::new(
    "Proximity",
    Some("mm"),
    FieldType::UInt16,
    0.0,
    PROXIMITY_HIGH_RANGE_MAX as f64,
)];

/// Time-of-flight distance; bit 15 selects the high range sensor
#[derive(Debug, Default)]
pub struct Proximity;

impl Proximity {
    pub fn new() -> Self {
        Self
    }

    pub fn distance(sample: &Sample) -> i64 {
        int_at(sample, 0)
    }

    pub fn is_out_of_range(sample: &Sample) -> bool {
        Self::distance(sample) == PROXIMITY_OUT_OF_RANGE
    }
}

impl FeatureDecoder for Proximity {
    fn name(&self) -> &'static str {
        "Proximity"
    }

    fn fields(&self) -> &[Field] {
        &PROXIMITY_HIGH_RANGE_FIELDS
    }

    fn extract(&self, timestamp: u64, data: &[u8], offset: usize) -> Result<Extracted, BlueStError> {
        let raw = LittleEndian::read_u16(data, offset)?;
        let low_range = raw & 0x8000 == 0;
        let (max, fields) = if low_range {
            (PROXIMITY_LOW_RANGE_MAX, &PROXIMITY_LOW_RANGE_FIELDS)
        } else {
            (PROXIMITY_HIGH_RANGE_MAX, &PROXIMITY_HIGH_RANGE_FIELDS)
        };

        let range = raw & !0x8000;
        let distance = if range > max {
            PROXIMITY_OUT_OF_RANGE
        } else {
            i64::from(range)
        };

        Ok(Extracted::new(
            Sample::new(timestamp, vec![Value::Int(distance)], fields.to_vec()),
            2,
        ))
    }
}

// ----------------------------------------------------------------------------
// Inertial sensors
// ----------------------------------------------------------------------------

const ACCELEROMETER_FIELDS: [Field; 3] = [
    Field::new("X", Some("mg"), FieldType::Int16, -2000.0, 2000.0),
    Field::new("Y", Some("mg"), FieldType::Int16, -2000.0, 2000.0),
    Field::new("Z", Some("mg"), FieldType::Int16, -2000.0, 2000.0),
];

/// Acceleration in mg on three axes (3 x i16)
#[derive(Debug, Default)]
pub struct Accelerometer;

impl Accelerometer {
    pub fn new() -> Self {
        Self
    }

    pub fn x(sample: &Sample) -> f64 {
        float_at(sample, 0)
    }

    pub fn y(sample: &Sample) -> f64 {
        float_at(sample, 1)
    }

    pub fn z(sample: &Sample) -> f64 {
        float_at(sample, 2)
    }
}

impl FeatureDecoder for Accelerometer {
    fn name(&self) -> &'static str {
        "Accelerometer"
    }

    fn fields(&self) -> &[Field] {
        &ACCELEROMETER_FIELDS
    }

    fn extract(&self, timestamp: u64, data: &[u8], offset: usize) -> Result<Extracted, BlueStError> {
        let axes = read_three_i16(data, offset)?;
        let values = axes.iter().map(|&v| Value::Int(v.into())).collect();
        Ok(Extracted::new(
            Sample::new(timestamp, values, ACCELEROMETER_FIELDS.to_vec()),
            6,
        ))
    }
}

const GYROSCOPE_MAX: f64 = (1u32 << 15) as f64 / 10.0;
const GYROSCOPE_FIELDS: [Field; 3] = [
    Field::new("X", Some("dps"), FieldType::Float, -GYROSCOPE_MAX, GYROSCOPE_MAX),
    Field::new("Y", Some("dps"), FieldType::Float, -GYROSCOPE_MAX, GYROSCOPE_MAX),
    Field::new("Z", Some("dps"), FieldType::Float, -GYROSCOPE_MAX, GYROSCOPE_MAX),
];

/// Angular rate in dps (3 x i16, tenths)
#[derive(Debug, Default)]
pub struct Gyroscope;

impl Gyroscope {
    pub fn new() -> Self {
        Self
    }

    pub fn x(sample: &Sample) -> f64 {
        float_at(sample, 0)
    }

    pub fn y(sample: &Sample) -> f64 {
        float_at(sample, 1)
    }

    pub fn z(sample: &Sample) -> f64 {
        float_at(sample, 2)
    }
}

impl FeatureDecoder for Gyroscope {
    fn name(&self) -> &'static str {
        "Gyroscope"
    }

    fn fields(&self) -> &[Field] {
        &GYROSCOPE_FIELDS
    }

    fn extract(&self, timestamp: u64, data: &[u8], offset: usize) -> Result<Extracted, BlueStError> {
        let axes = read_three_i16(data, offset)?;
        let values = axes
            .iter()
            .map(|&v| Value::Float(f64::from(v) / 10.0))
            .collect();
        Ok(Extracted::new(
            Sample::new(timestamp, values, GYROSCOPE_FIELDS.to_vec()),
            6,
        ))
    }
}

const MAGNETOMETER_FIELDS: [Field; 3] = [
    Field::new("X", Some("mGa"), FieldType::Int16, -2000.0, 2000.0),
    Field::new("Y", Some("mGa"), FieldType::Int16, -2000.0, 2000.0),
    Field::new("Z", Some("mGa"), FieldType::Int16, -2000.0, 2000.0),
];

/// Magnetic field in mGa (3 x i16)
#[derive(Debug, Default)]
pub struct Magnetometer;

impl Magnetometer {
    pub fn new() -> Self {
        Self
    }

    pub fn x(sample: &Sample) -> f64 {
        float_at(sample, 0)
    }

    pub fn y(sample: &Sample) -> f64 {
        float_at(sample, 1)
    }

    pub fn z(sample: &Sample) -> f64 {
        float_at(sample, 2)
    }
}

impl FeatureDecoder for Magnetometer {
    fn name(&self) -> &'static str {
        "Magnetometer"
    }

    fn fields(&self) -> &[Field] {
        &MAGNETOMETER_FIELDS
    }

    fn extract(&self, timestamp: u64, data: &[u8], offset: usize) -> Result<Extracted, BlueStError> {
        let axes = read_three_i16(data, offset)?;
        let values = axes.iter().map(|&v| Value::Int(v.into())).collect();
        Ok(Extracted::new(
            Sample::new(timestamp, values, MAGNETOMETER_FIELDS.to_vec()),
            6,
        ))
    }
}

// ----------------------------------------------------------------------------
// Environmental sensors
// ----------------------------------------------------------------------------

const PRESSURE_FIELDS: [Field; 1] =
    [Field::new("Pressure", Some("mBar"), FieldType::Float, 0.0, 2000.0)];

/// Barometric pressure in mBar (i32, hundredths)
#[derive(Debug, Default)]
pub struct Pressure;

impl Pressure {
    pub fn new() -> Self {
        Self
    }

    pub fn pressure(sample: &Sample) -> f64 {
        float_at(sample, 0)
    }
}

impl FeatureDecoder for Pressure {
    fn name(&self) -> &'static str {
        "Pressure"
    }

    fn fields(&self) -> &[Field] {
        &PRESSURE_FIELDS
    }

    fn extract(&self, timestamp: u64, data: &[u8], offset: usize) -> Result<Extracted, BlueStError> {
        let raw = LittleEndian::read_i32(data, offset)?;
        Ok(Extracted::new(
            Sample::new(
                timestamp,
                vec![Value::Float(f64::from(raw) / 100.0)],
                PRESSURE_FIELDS.to_vec(),
            ),
            4,
        ))
    }
}

const HUMIDITY_FIELDS: [Field; 1] =
    [Field::new("Humidity", Some("%"), FieldType::Float, 0.0, 100.0)];

/// Relative humidity in % (i16, tenths)
#[derive(Debug, Default)]
pub struct Humidity;

impl Humidity {
    pub fn new() -> Self {
        Self
    }

    pub fn humidity(sample: &Sample) -> f64 {
        float_at(sample, 0)
    }
}

impl FeatureDecoder for Humidity {
    fn name(&self) -> &'static str {
        "Humidity"
    }

    fn fields(&self) -> &[Field] {
        &HUMIDITY_FIELDS
    }

    fn extract(&self, timestamp: u64, data: &[u8], offset: usize) -> Result<Extracted, BlueStError> {
        let raw = LittleEndian::read_i16(data, offset)?;
        Ok(Extracted::new(
            Sample::new(
                timestamp,
                vec![Value::Float(f64::from(raw) / 10.0)],
                HUMIDITY_FIELDS.to_vec(),
            ),
            2,
        ))
    }
}

const TEMPERATURE_FIELDS: [Field; 1] =
    [Field::new("Temperature", Some("C"), FieldType::Float, 0.0, 100.0)];

/// Temperature in degrees Celsius (i16, tenths)
#[derive(Debug, Default)]
pub struct Temperature;

impl Temperature {
    pub fn new() -> Self {
        Self
    }

    pub fn temperature(sample: &Sample) -> f64 {
        float_at(sample, 0)
    }
}

impl FeatureDecoder for Temperature {
    fn name(&self) -> &'static str {
        "Temperature"
    }

    fn fields(&self) -> &[Field] {
        &TEMPERATURE_FIELDS
    }

    fn extract(&self, timestamp: u64, data: &[u8], offset: usize) -> Result<Extracted, BlueStError> {
        let raw = LittleEndian::read_i16(data, offset)?;
        Ok(Extracted::new(
            Sample::new(
                timestamp,
                vec![Value::Float(f64::from(raw) / 10.0)],
                TEMPERATURE_FIELDS.to_vec(),
            ),
            2,
        ))
    }
}

// ----------------------------------------------------------------------------
// Stepper motor
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepperMotorStatus {
    Inactive,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepperMotorCommand {
    StopWithoutTorque = 0,
    StopWithTorque = 1,
    RunForward = 2,
    RunBackward = 3,
    MoveStepsForward = 4,
    MoveStepsBackward = 5,
}

const STEPPER_MOTOR_FIELDS: [Field; 1] = [Field::new("Status", None, FieldType::UInt8, 0.0, 2.0)];

/// Stepper motor status (1 byte); commands are written back to the same characteristic
#[derive(Debug, Default)]
pub struct StepperMotor;

impl StepperMotor {
    pub fn new() -> Self {
        Self
    }

    pub fn status(sample: &Sample) -> Option<StepperMotorStatus> {
        match int_at(sample, 0) {
            0 => Some(StepperMotorStatus::Inactive),
            1 => Some(StepperMotorStatus::Running),
            _ => None,
        }
    }

    /// Encode a motor command; `steps` is appended only when non-zero.
    pub fn command_payload(command: StepperMotorCommand, steps: u16) -> Vec<u8> {
        let mut payload = vec![command as u8];
        if steps != 0 {
            payload.extend_from_slice(&LittleEndian::u16_bytes(steps));
        }
        payload
    }
}

impl FeatureDecoder for StepperMotor {
    fn name(&self) -> &'static str {
        "Stepper Motor"
    }

    fn fields(&self) -> &[Field] {
        &STEPPER_MOTOR_FIELDS
    }

    fn extract(&self, timestamp: u64, data: &[u8], offset: usize) -> Result<Extracted, BlueStError> {
        let status = read_u8(data, offset)?;
        Ok(Extracted::new(
            Sample::new(
                timestamp,
                vec![Value::Int(status.into())],
                STEPPER_MOTOR_FIELDS.to_vec(),
            ),
            1,
        ))
    }
}

// ----------------------------------------------------------------------------
// Activity recognition
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityType {
    NoActivity,
    Stationary,
    Walking,
    FastWalking,
    Jogging,
    Biking,
    Driving,
    Stairs,
    Error,
}

impl ActivityType {
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => ActivityType::NoActivity,
            1 => ActivityType::Stationary,
            2 => ActivityType::Walking,
            3 => ActivityType::FastWalking,
            4 => ActivityType::Jogging,
            5 => ActivityType::Biking,
            6 => ActivityType::Driving,
            7 => ActivityType::Stairs,
            _ => ActivityType::Error,
        }
    }
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

const ACTIVITY_FIELDS: [Field; 3] = [
    Field::new("Activity", None, FieldType::UInt8, 0.0, 7.0),
    Field::new("DateTime", Some("ms"), FieldType::Int64, 0.0, i64::MAX as f64),
    Field::new("Algorithm", None, FieldType::UInt8, 0.0, 255.0),
];

/// Recognized activity (1 byte) plus an optional algorithm id (1 byte)
///
/// The sample also carries the host time the activity was reported.
#[derive(Debug, Default)]
pub struct ActivityRecognition;

impl ActivityRecognition {
    pub fn new() -> Self {
        Self
    }

    pub fn activity(sample: &Sample) -> ActivityType {
        ActivityType::from_code(int_at(sample, 0))
    }

    /// Host time of the report in milliseconds since the UNIX epoch
    pub fn time_ms(sample: &Sample) -> Option<i64> {
        sample.value(1).map(|v| v.as_i64())
    }

    /// Algorithm id, 0 when the board did not send one
    pub fn algorithm(sample: &Sample) -> i64 {
        sample.value(2).map(|v| v.as_i64()).unwrap_or(0)
    }
}

impl FeatureDecoder for ActivityRecognition {
    fn name(&self) -> &'static str {
        "Activity Recognition"
    }

    fn fields(&self) -> &[Field] {
        &ACTIVITY_FIELDS
    }

    fn extract(&self, timestamp: u64, data: &[u8], offset: usize) -> Result<Extracted, BlueStError> {
        let activity = read_u8(data, offset)?;
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as i64)
            .unwrap_or(0);

        let mut values = vec![Value::Int(activity.into()), Value::Int(now_ms)];
        let bytes_read = if data.len().saturating_sub(offset) > 1 {
            values.push(Value::Int(read_u8(data, offset + 1)?.into()));
            2
        } else {
            1
        };

        let fields = ACTIVITY_FIELDS[..values.len()].to_vec();
        Ok(Extracted::new(Sample::new(timestamp, values, fields), bytes_read))
    }
}

// ----------------------------------------------------------------------------
// Proximity gesture
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gesture {
    Unknown,
    Tap,
    Left,
    Right,
    Error,
}

const GESTURE_FIELDS: [Field; 1] = [Field::new("Gesture", None, FieldType::UInt8, 0.0, 4.0)];

/// Gesture detected over the proximity sensor (1 byte)
#[derive(Debug, Default)]
pub struct ProximityGesture;

impl ProximityGesture {
    pub fn new() -> Self {
        Self
    }

    pub fn gesture(sample: &Sample) -> Gesture {
        match int_at(sample, 0) {
            0 => Gesture::Unknown,
            1 => Gesture::Tap,
            2 => Gesture::Left,
            3 => Gesture::Right,
            _ => Gesture::Error,
        }
    }
}

impl FeatureDecoder for ProximityGesture {
    fn name(&self) -> &'static str {
        "Gesture"
    }

    fn fields(&self) -> &[Field] {
        &GESTURE_FIELDS
    }

    fn extract(&self, timestamp: u64, data: &[u8], offset: usize) -> Result<Extracted, BlueStError> {
        let gesture = read_u8(data, offset)?;
        Ok(Extracted::new(
            Sample::new(timestamp, vec![Value::Int(gesture.into())], GESTURE_FIELDS.to_vec()),
            1,
        ))
    }
}

// ----------------------------------------------------------------------------
// Audio: beamforming direction and scene classification
// ----------------------------------------------------------------------------

/// Direction returned for a sample without a value
pub const BEAMFORMING_INVALID_DIRECTION: u8 = 0xFF;

const BEAMFORMING_FIELDS: [Field; 1] =
    [Field::new("Beamforming", None, FieldType::UInt8, 0.0, 7.0)];

/// Current beamforming direction (1 byte, 0..7)
#[derive(Debug, Default)]
pub struct Beamforming;

impl Beamforming {
    pub fn new() -> Self {
        Self
    }

    pub fn direction(sample: &Sample) -> u8 {
        sample
            .value(0)
            .and_then(|v| u8::try_from(v.as_i64()).ok())
            .unwrap_or(BEAMFORMING_INVALID_DIRECTION)
    }
}

impl FeatureDecoder for Beamforming {
    fn name(&self) -> &'static str {
        "Beamforming"
    }

    fn fields(&self) -> &[Field] {
        &BEAMFORMING_FIELDS
    }

    fn extract(&self, timestamp: u64, data: &[u8], offset: usize) -> Result<Extracted, BlueStError> {
        let direction = read_u8(data, offset)?;
        Ok(Extracted::new(
            Sample::new(timestamp, vec![Value::Int(direction.into())], BEAMFORMING_FIELDS.to_vec()),
            1,
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneType {
    Indoor,
    Outdoor,
    InVehicle,
    Error,
}

impl fmt::Display for SceneType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SceneType::Indoor => "Indoor",
            SceneType::Outdoor => "Outdoor",
            SceneType::InVehicle => "In vehicle",
            SceneType::Error => "Error",
        };
        f.write_str(name)
    }
}

const SCENE_FIELDS: [Field; 1] = [Field::new("SceneType", None, FieldType::UInt8, 0.0, 3.0)];

/// Audio scene detected by the board (1 byte)
#[derive(Debug, Default)]
pub struct AudioSceneClassification;

impl AudioSceneClassification {
    pub fn new() -> Self {
        Self
    }

    pub fn scene(sample: &Sample) -> SceneType {
        match int_at(sample, 0) {
            0 => SceneType::Indoor,
            1 => SceneType::Outdoor,
            2 => SceneType::InVehicle,
            _ => SceneType::Error,
        }
    }
}

impl FeatureDecoder for AudioSceneClassification {
    fn name(&self) -> &'static str {
        "Audio Scene Classification"
    }

    fn fields(&self) -> &[Field] {
        &SCENE_FIELDS
    }

    fn extract(&self, timestamp: u64, data: &[u8], offset: usize) -> Result<Extracted, BlueStError> {
        let scene = read_u8(data, offset)?;
        Ok(Extracted::new(
            Sample::new(timestamp, vec![Value::Int(scene.into())], SCENE_FIELDS.to_vec()),
            1,
        ))
    }
}

// ----------------------------------------------------------------------------
// Heart rate (Bluetooth SIG Heart Rate Measurement)
// ----------------------------------------------------------------------------

const HEART_RATE_FIELDS: [Field; 3] = [
    Field::new("Heart Rate Measurement", Some("bpm"), FieldType::UInt16, 0.0, 65536.0),
    Field::new("Energy Expended", Some("kJ"), FieldType::UInt16, 0.0, 65536.0),
    Field::new("RR-Interval", Some("s"), FieldType::Float, 0.0, f64::MAX),
];

const HR_FLAG_16_BIT: u8 = 0x01;
const HR_FLAG_ENERGY_EXPENDED: u8 = 0x08;
const HR_FLAG_RR_INTERVAL: u8 = 0x10;

/// Flags-driven heart rate measurement
///
/// The characteristic has no BlueST timestamp, so the registry always wraps
/// this decoder in `HostTimestamp`.
#[derive(Debug, Default)]
pub struct HeartRate;

impl HeartRate {
    pub fn new() -> Self {
        Self
    }

    pub fn heart_rate(sample: &Sample) -> i64 {
        int_at(sample, 0)
    }

    /// Energy expended in kJ, -1 when not reported
    pub fn energy_expended(sample: &Sample) -> i64 {
        int_at(sample, 1)
    }

    /// RR interval in seconds, NaN when not reported
    pub fn rr_interval(sample: &Sample) -> f64 {
        float_at(sample, 2)
    }
}

impl FeatureDecoder for HeartRate {
    fn name(&self) -> &'static str {
        "Heart Rate"
    }

    fn fields(&self) -> &[Field] {
        &HEART_RATE_FIELDS
    }

    fn extract(&self, timestamp: u64, data: &[u8], offset: usize) -> Result<Extracted, BlueStError> {
        ensure_available(data, offset, 2)?;
        let mut cursor = offset;
        let flags = read_u8(data, cursor)?;
        cursor += 1;

        let heart_rate = if flags & HR_FLAG_16_BIT == 0 {
            let value = i64::from(read_u8(data, cursor)?);
            cursor += 1;
            value
        } else {
            let value = i64::from(LittleEndian::read_u16(data, cursor)?);
            cursor += 2;
            value
        };

        let energy_expended = if flags & HR_FLAG_ENERGY_EXPENDED != 0 {
            let value = i64::from(LittleEndian::read_u16(data, cursor)?);
            cursor += 2;
            value
        } else {
            -1
        };

        let rr_interval = if flags & HR_FLAG_RR_INTERVAL != 0 {
            let value = f64::from(LittleEndian::read_u16(data, cursor)?) / 1024.0;
            cursor += 2;
            value
        } else {
            f64::NAN
        };

        Ok(Extracted::new(
            Sample::new(
                timestamp,
                vec![
                    Value::Int(heart_rate),
                    Value::Int(energy_expended),
                    Value::Float(rr_interval),
                ],
                HEART_RATE_FIELDS.to_vec(),
            ),
            cursor - offset,
        ))
    }
}
