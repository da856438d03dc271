// btleplug backend for the SDK transport traits
//
// btleplug is async; the SDK drives transports synchronously. Both types
// share one private Tokio runtime and block on it for every operation.
// btleplug exposes no ATT handles, so handles are assigned in discovery
// order and mapped back to characteristic UUIDs.

use anyhow::{Context, Result};
use bluestsdk_core::{
    AdStructure, BleAdapter, CharProperties, Characteristic, Notification, ScanEntry, Service,
    Transport, TransportError,
};
use btleplug::api::{
    Central, CharPropFlags, Manager as _, Peripheral as _, PeripheralProperties, ScanFilter,
    ValueNotification, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::stream::{Stream, StreamExt};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use tracing::{debug, warn};
use uuid::Uuid;

type NotificationStream = Pin<Box<dyn Stream<Item = ValueNotification> + Send>>;

pub struct BtleAdapter {
    runtime: Arc<Runtime>,
    adapter: Adapter,
}

impl BtleAdapter {
    /// Open the `index`-th Bluetooth adapter of the host
    pub fn new(index: usize) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("bluest-ble")
            .enable_all()
            .build()
            .context("Failed to start BLE runtime")?;

        let adapter = runtime.block_on(async {
            let manager = Manager::new()
                .await
                .context("Failed to create BLE manager")?;
            let adapters = manager
                .adapters()
                .await
                .context("Failed to list BLE adapters")?;
            let count = adapters.len();
            adapters
                .into_iter()
                .nth(index)
                .with_context(|| format!("No Bluetooth adapter #{} ({} found)", index, count))
        })?;

        Ok(Self {
            runtime: Arc::new(runtime),
            adapter,
        })
    }

    fn find_peripheral(&self, address: &str) -> Result<Peripheral, TransportError> {
        let peripherals = self
            .runtime
            .block_on(self.adapter.peripherals())
            .map_err(|e| TransportError::Unavailable(e.to_string()))?;
        peripherals
            .into_iter()
            .find(|p| p.address().to_string().eq_ignore_ascii_case(address))
            .ok_or_else(|| TransportError::ConnectionFailed(format!("{} not in range", address)))
    }
}

/// Rebuild AD structures from what the host stack decoded.
///
/// The stack splits the first two manufacturer bytes off as a company id;
/// BlueST boards put protocol version and device id there, so they are
/// glued back in front.
fn scan_entry(properties: &PeripheralProperties) -> ScanEntry {
    let mut advertising = Vec::new();
    if let Some(name) = &properties.local_name {
        advertising.push(AdStructure::complete_local_name(name.clone()));
    }
    if let Some(tx_power) = properties.tx_power_level {
        let clamped = tx_power.clamp(i16::from(i8::MIN), i16::from(i8::MAX)) as i8;
        advertising.push(AdStructure::tx_power(clamped));
    }
    for (company_id, data) in &properties.manufacturer_data {
        let mut raw = company_id.to_le_bytes().to_vec();
        raw.extend_from_slice(data);
        advertising.push(AdStructure::manufacturer(&raw));
    }

    ScanEntry::new(
        properties.address.to_string(),
        properties.rssi.unwrap_or_default(),
        advertising,
    )
}

impl BleAdapter for BtleAdapter {
    fn scan(&mut self, timeout: Duration) -> Result<Vec<ScanEntry>, TransportError> {
        let runtime = self.runtime.clone();
        runtime.block_on(async {
            self.adapter
                .start_scan(ScanFilter::default())
                .await
                .map_err(|e| TransportError::Unavailable(e.to_string()))?;
            tokio::time::sleep(timeout).await;
            if let Err(e) = self.adapter.stop_scan().await {
                debug!("stop_scan failed: {}", e);
            }

            let peripherals = self
                .adapter
                .peripherals()
                .await
                .map_err(|e| TransportError::Unavailable(e.to_string()))?;
            let mut entries = Vec::with_capacity(peripherals.len());
            for peripheral in peripherals {
                match peripheral.properties().await {
                    Ok(Some(properties)) => entries.push(scan_entry(&properties)),
                    Ok(None) => {}
                    Err(e) => debug!("No properties for {}: {}", peripheral.address(), e),
                }
            }
            Ok(entries)
        })
    }

    fn open(&mut self, address: &str) -> Result<Box<dyn Transport>, TransportError> {
        let peripheral = self.find_peripheral(address)?;
        Ok(Box::new(BtleTransport::new(self.runtime.clone(), peripheral)))
    }
}

pub struct BtleTransport {
    runtime: Arc<Runtime>,
    peripheral: Peripheral,
    characteristics: HashMap<u16, btleplug::api::Characteristic>,
    handles: HashMap<Uuid, u16>,
    notifications: Option<NotificationStream>,
}

impl BtleTransport {
    fn new(runtime: Arc<Runtime>, peripheral: Peripheral) -> Self {
        Self {
            runtime,
            peripheral,
            characteristics: HashMap::new(),
            handles: HashMap::new(),
            notifications: None,
        }
    }

    fn characteristic(&self, handle: u16) -> Result<&btleplug::api::Characteristic, TransportError> {
        self.characteristics
            .get(&handle)
            .ok_or_else(|| TransportError::Internal(format!("unknown handle {:#06x}", handle)))
    }
}

/// Notifications carry only a UUID; a UUID seen twice keeps its first handle.
fn map_handle(handles: &mut HashMap<Uuid, u16>, uuid: Uuid, handle: u16) {
    match handles.entry(uuid) {
        Entry::Occupied(first) => warn!(
            "Characteristic {} exposed twice; notifications go to handle {}",
            uuid,
            first.get()
        ),
        Entry::Vacant(slot) => {
            slot.insert(handle);
        }
    }
}

fn properties(flags: CharPropFlags) -> CharProperties {
    CharProperties {
        read: flags.contains(CharPropFlags::READ),
        write: flags.contains(CharPropFlags::WRITE),
        write_without_response: flags.contains(CharPropFlags::WRITE_WITHOUT_RESPONSE),
        notify: flags.contains(CharPropFlags::NOTIFY),
        indicate: flags.contains(CharPropFlags::INDICATE),
    }
}

impl Transport for BtleTransport {
    fn connect(&mut self) -> Result<(), TransportError> {
        let stream = self.runtime.block_on(async {
            self.peripheral
                .connect()
                .await
                .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
            self.peripheral
                .notifications()
                .await
                .map_err(|e| TransportError::Internal(e.to_string()))
        })?;
        self.notifications = Some(stream);
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        self.notifications = None;
        self.runtime
            .block_on(self.peripheral.disconnect())
            .map_err(|e| TransportError::Internal(e.to_string()))
    }

    fn services(&mut self) -> Result<Vec<Service>, TransportError> {
        self.runtime
            .block_on(self.peripheral.discover_services())
            .map_err(|e| TransportError::Internal(e.to_string()))?;

        self.characteristics.clear();
        self.handles.clear();
        let mut next_handle: u16 = 1;
        let mut services = Vec::new();
        for service in self.peripheral.services() {
            let mut characteristics = Vec::new();
            for characteristic in &service.characteristics {
                let handle = next_handle;
                next_handle = next_handle.wrapping_add(1);
                map_handle(&mut self.handles, characteristic.uuid, handle);
                self.characteristics.insert(handle, characteristic.clone());
                characteristics.push(Characteristic::new(
                    handle,
                    characteristic.uuid,
                    properties(characteristic.properties),
                ));
            }
            services.push(Service::new(service.uuid, characteristics));
        }
        Ok(services)
    }

    fn read(&mut self, handle: u16) -> Result<Vec<u8>, TransportError> {
        let characteristic = self.characteristic(handle)?;
        self.runtime
            .block_on(self.peripheral.read(characteristic))
            .map_err(|e| TransportError::ReadFailed(e.to_string()))
    }

    fn write(&mut self, handle: u16, data: &[u8], with_response: bool) -> Result<(), TransportError> {
        let characteristic = self.characteristic(handle)?;
        let write_type = if with_response {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };
        self.runtime
            .block_on(self.peripheral.write(characteristic, data, write_type))
            .map_err(|e| TransportError::WriteFailed(e.to_string()))
    }

    fn set_notify(&mut self, handle: u16, enabled: bool) -> Result<(), TransportError> {
        let characteristic = self.characteristic(handle)?;
        let result = if enabled {
            self.runtime.block_on(self.peripheral.subscribe(characteristic))
        } else {
            self.runtime.block_on(self.peripheral.unsubscribe(characteristic))
        };
        result.map_err(|e| TransportError::WriteFailed(e.to_string()))
    }

    fn wait_for_notification(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<Notification>, TransportError> {
        let stream = self.notifications.as_mut().ok_or(TransportError::NotConnected)?;
        let next = self
            .runtime
            .block_on(async { tokio::time::timeout(timeout, stream.next()).await });

        match next {
            Err(_) => Ok(None),
            Ok(None) => Err(TransportError::NotConnected),
            Ok(Some(notification)) => match self.handles.get(&notification.uuid) {
                Some(handle) => Ok(Some(Notification::new(*handle, notification.value))),
                None => {
                    warn!("Notification from unknown characteristic {}", notification.uuid);
                    Ok(None)
                }
            },
        }
    }
}
