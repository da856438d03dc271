//! BlueST advertising data parser
//!
//! Turns the advertising structures a radio stack reports for one device into
//! a `DeviceDescriptor`. The manufacturer-specific structure carries the whole
//! BlueST payload, hex encoded:
//!
//! `[version:1][device type / sleep:1][feature mask:4 BE][address:6, extended layout only]`
//!
//! Parsing is all-or-nothing: any malformed field rejects the whole
//! advertisement.

use crate::codec::BigEndian;
use crate::BlueStError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// AD type: complete local name
pub const AD_TYPE_COMPLETE_LOCAL_NAME: u8 = 0x09;
/// AD type: TX power level
pub const AD_TYPE_TX_POWER: u8 = 0x0A;
/// AD type: manufacturer specific data
pub const AD_TYPE_MANUFACTURER_SPECIFIC: u8 = 0xFF;

/// Manufacturer field length (including the stripped AD type byte), short layout
pub const MANUFACTURER_LENGTH_SHORT: usize = 7;
/// Manufacturer field length (including the stripped AD type byte), with address
pub const MANUFACTURER_LENGTH_EXTENDED: usize = 13;

pub const PROTOCOL_VERSION_MIN: u8 = 0x01;
pub const PROTOCOL_VERSION_MAX: u8 = 0x01;

/// Name reported when the device does not advertise one
pub const UNKNOWN_NAME: &str = "UNKNOWN";
/// TX power reported when the device does not advertise it
pub const UNKNOWN_TX_POWER: i8 = -1;

/// One advertising structure, value as reported by the radio stack
///
/// The local name is plain text; every other type carries its payload as a
/// hex string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdStructure {
    pub ad_type: u8,
    pub value: String,
}

impl AdStructure {
    pub fn new(ad_type: u8, value: impl Into<String>) -> Self {
        Self {
            ad_type,
            value: value.into(),
        }
    }

    pub fn complete_local_name(name: impl Into<String>) -> Self {
        Self::new(AD_TYPE_COMPLETE_LOCAL_NAME, name)
    }

    pub fn tx_power(dbm: i8) -> Self {
        Self::new(AD_TYPE_TX_POWER, hex::encode([dbm as u8]))
    }

    /// Manufacturer data from raw bytes (AD type byte already stripped).
    pub fn manufacturer(bytes: &[u8]) -> Self {
        Self::new(AD_TYPE_MANUFACTURER_SPECIFIC, hex::encode(bytes))
    }
}

/// Board category derived from the advertised device id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceType {
    Generic,
    StevalWesu1,
    SensorTile,
    BlueCoin,
    StevalIdb008vx,
    StevalBcn002v1,
    SensorTileBox,
    /// Companion MCU range (ids 0x80..=0xFF)
    Nucleo,
}

impl DeviceType {
    pub fn from_id(device_id: u8) -> Self {
        match device_id {
            0x01 => DeviceType::StevalWesu1,
            0x02 => DeviceType::SensorTile,
            0x03 => DeviceType::BlueCoin,
            0x04 => DeviceType::StevalIdb008vx,
            0x05 => DeviceType::StevalBcn002v1,
            0x06 => DeviceType::SensorTileBox,
            0x80..=0xFF => DeviceType::Nucleo,
            _ => DeviceType::Generic,
        }
    }

    /// Boards whose firmware accepts commands on the debug console
    pub fn accepts_console_commands(self) -> bool {
        matches!(
            self,
            DeviceType::Nucleo
                | DeviceType::SensorTile
                | DeviceType::BlueCoin
                | DeviceType::StevalBcn002v1
                | DeviceType::SensorTileBox
        )
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceType::Generic => "GENERIC",
            DeviceType::StevalWesu1 => "STEVAL_WESU1",
            DeviceType::SensorTile => "SENSOR_TILE",
            DeviceType::BlueCoin => "BLUE_COIN",
            DeviceType::StevalIdb008vx => "STEVAL_IDB008VX",
            DeviceType::StevalBcn002v1 => "STEVAL_BCN002V1",
            DeviceType::SensorTileBox => "SENSOR_TILE_BOX",
            DeviceType::Nucleo => "NUCLEO",
        };
        f.write_str(name)
    }
}

/// Decoded identity and capabilities of one advertising device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub name: String,
    pub tx_power: i8,
    pub protocol_version: u8,
    pub device_id: u8,
    pub device_type: DeviceType,
    pub feature_mask: u32,
    pub sleeping: bool,
    pub address: Option<[u8; 6]>,
}

impl DeviceDescriptor {
    /// Advertised address as `AA:BB:CC:DD:EE:FF`, if present
    pub fn address_string(&self) -> Option<String> {
        self.address.map(|address| {
            address
                .iter()
                .map(|byte| format!("{:02X}", byte))
                .collect::<Vec<_>>()
                .join(":")
        })
    }
}

/// Stateless parser for BlueST advertising data
pub struct AdvertisingDataParser;

impl AdvertisingDataParser {
    pub fn parse(advertising: &[AdStructure]) -> Result<DeviceDescriptor, BlueStError> {
        let mut name = UNKNOWN_NAME.to_string();
        let mut tx_power_field = None;
        let mut manufacturer_field = None;

        for structure in advertising {
            match structure.ad_type {
                AD_TYPE_COMPLETE_LOCAL_NAME => name = structure.value.clone(),
                AD_TYPE_TX_POWER => tx_power_field = Some(structure.value.as_str()),
                AD_TYPE_MANUFACTURER_SPECIFIC => manufacturer_field = Some(structure.value.as_str()),
                _ => {}
            }
        }

        let manufacturer = manufacturer_field.ok_or_else(|| {
            BlueStError::InvalidAdvertisingData(format!(
                "{}: manufacturer specific data is mandatory",
                name
            ))
        })?;
        let payload = hex::decode(manufacturer).map_err(|e| {
            BlueStError::InvalidAdvertisingData(format!(
                "{}: manufacturer specific data is not valid hex: {}",
                name, e
            ))
        })?;

        let length = payload.len() + 1;
        if length != MANUFACTURER_LENGTH_SHORT && length != MANUFACTURER_LENGTH_EXTENDED {
            return Err(BlueStError::InvalidAdvertisingData(format!(
                "{}: manufacturer specific data must be of length {} or {}, not {}",
                name, MANUFACTURER_LENGTH_SHORT, MANUFACTURER_LENGTH_EXTENDED, length
            )));
        }

        let protocol_version = payload[0];
        if !(PROTOCOL_VERSION_MIN..=PROTOCOL_VERSION_MAX).contains(&protocol_version) {
            return Err(BlueStError::InvalidAdvertisingData(format!(
                "{}: protocol version {} unsupported, must be in [{}..{}]",
                name, protocol_version, PROTOCOL_VERSION_MIN, PROTOCOL_VERSION_MAX
            )));
        }

        let type_byte = payload[1];
        let device_id = if type_byte & 0x80 == 0x80 {
            type_byte
        } else {
            type_byte & 0x1F
        };
        let sleeping = type_byte & 0x80 == 0 && type_byte & 0x40 == 0x40;
        let feature_mask = BigEndian::read_u32(&payload, 2)?;

        let address = if length == MANUFACTURER_LENGTH_EXTENDED {
            let mut address = [0u8; 6];
            address.copy_from_slice(&payload[6..12]);
            Some(address)
        } else {
            None
        };

        let tx_power = match tx_power_field {
            Some(value) => Self::parse_tx_power(&name, value)?,
            None => UNKNOWN_TX_POWER,
        };

        Ok(DeviceDescriptor {
            name,
            tx_power,
            protocol_version,
            device_id,
            device_type: DeviceType::from_id(device_id),
            feature_mask,
            sleeping,
            address,
        })
    }

    fn parse_tx_power(name: &str, value: &str) -> Result<i8, BlueStError> {
        match hex::decode(value) {
            Ok(bytes) if bytes.len() == 1 => Ok(bytes[0] as i8),
            _ => Err(BlueStError::InvalidAdvertisingData(format!(
                "{}: malformed TX power level {:?}",
                name, value
            ))),
        }
    }
}
