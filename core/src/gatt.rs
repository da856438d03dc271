//! GATT model and BlueST UUID convention
//!
//! BlueST boards expose every sensor stream as a characteristic whose UUID
//! has the form `XXXXXXXX-0001-11e1-ac36-0002a5d5c51b`: the leading 32 bits
//! are the feature bitmask, the fixed tail marks it as a feature
//! characteristic. Debug and config characteristics use the same family with
//! a different service field.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Low 96 bits shared by every feature characteristic (`-0001-11e1-ac36-0002a5d5c51b`)
pub const FEATURE_CHARACTERISTIC_SUFFIX: u128 = 0x0001_11E1_AC36_0002_A5D5_C51B;

/// Low 96 bits shared by every BlueST service (`-XXXX-11e1-9ab4-0002a5d5c51b`)
const SERVICE_SUFFIX: u128 = 0x11E1_9AB4_0002_A5D5_C51B;

const LOW_96_BITS: u128 = (1 << 96) - 1;
const LOW_80_BITS: u128 = (1 << 80) - 1;

/// Debug service (`00000000-000E-11e1-9ab4-0002a5d5c51b`)
pub const DEBUG_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_0000_000E_11E1_9AB4_0002_A5D5_C51B);

/// Debug stdin/stdout characteristic (`00000001-000E-11e1-ac36-0002a5d5c51b`)
pub const DEBUG_STDINOUT_UUID: Uuid = Uuid::from_u128(0x0000_0001_000E_11E1_AC36_0002_A5D5_C51B);

/// Debug stderr characteristic (`00000002-000E-11e1-ac36-0002a5d5c51b`)
pub const DEBUG_STDERR_UUID: Uuid = Uuid::from_u128(0x0000_0002_000E_11E1_AC36_0002_A5D5_C51B);

/// Config service (`00000000-000F-11e1-9ab4-0002a5d5c51b`)
pub const CONFIG_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_0000_000F_11E1_9AB4_0002_A5D5_C51B);

/// Bluetooth SIG Heart Rate Measurement characteristic (0x2A37)
pub const HEART_RATE_MEASUREMENT_UUID: Uuid =
    Uuid::from_u128(0x0000_2A37_0000_1000_8000_0080_5F9B_34FB);

/// Build the feature characteristic UUID carrying `mask`.
pub fn feature_characteristic_uuid(mask: u32) -> Uuid {
    Uuid::from_u128((u128::from(mask) << 96) | FEATURE_CHARACTERISTIC_SUFFIX)
}

/// Whether `uuid` follows the feature characteristic convention.
pub fn is_feature_characteristic(uuid: &Uuid) -> bool {
    uuid.as_u128() & LOW_96_BITS == FEATURE_CHARACTERISTIC_SUFFIX
}

/// Feature bitmask encoded in the first 32 bits of a characteristic UUID.
pub fn extract_feature_mask(uuid: &Uuid) -> u32 {
    (uuid.as_u128() >> 96) as u32
}

/// Whether `uuid` is one of the BlueST services (`00000000-XXXX-11e1-9ab4-0002a5d5c51b`).
pub fn is_known_service(uuid: &Uuid) -> bool {
    let value = uuid.as_u128();
    value >> 96 == 0 && value & LOW_80_BITS == SERVICE_SUFFIX
}

pub fn is_debug_characteristic(uuid: &Uuid) -> bool {
    *uuid == DEBUG_STDINOUT_UUID || *uuid == DEBUG_STDERR_UUID
}

/// Characteristic property flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharProperties {
    pub read: bool,
    pub write: bool,
    pub write_without_response: bool,
    pub notify: bool,
    pub indicate: bool,
}

impl CharProperties {
    /// Read + notify, the shape of a plain sensor characteristic
    pub fn read_notify() -> Self {
        Self {
            read: true,
            notify: true,
            ..Self::default()
        }
    }

    /// Every property set
    pub fn all() -> Self {
        Self {
            read: true,
            write: true,
            write_without_response: true,
            notify: true,
            indicate: true,
        }
    }

    pub fn can_read(&self) -> bool {
        self.read
    }

    pub fn can_write(&self) -> bool {
        self.write || self.write_without_response
    }

    pub fn can_notify(&self) -> bool {
        self.notify || self.indicate
    }
}

/// A discovered GATT characteristic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Characteristic {
    /// Value handle, used for read/write/notify
    pub handle: u16,
    pub uuid: Uuid,
    pub properties: CharProperties,
}

impl Characteristic {
    pub fn new(handle: u16, uuid: Uuid, properties: CharProperties) -> Self {
        Self {
            handle,
            uuid,
            properties,
        }
    }
}

/// A discovered GATT service and its characteristics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub uuid: Uuid,
    pub characteristics: Vec<Characteristic>,
}

impl Service {
    pub fn new(uuid: Uuid, characteristics: Vec<Characteristic>) -> Self {
        Self {
            uuid,
            characteristics,
        }
    }
}
