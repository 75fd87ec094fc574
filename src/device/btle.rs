use std::sync::Arc;
use async_trait::async_trait;
use btleplug::api::{Central, CharPropFlags, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::stream::{BoxStream, StreamExt};
use log::{log, warn, Level};
use tokio::sync::Mutex;

use crate::device::ids::{normalize_id, peripheral_matches};
use crate::device::radio::{Link, Radio};
use crate::device::types::{CharacteristicInfo, CharacteristicProperties, Device, Notification, ServiceInfo, WriteKind};
use crate::error::RadioError;

/// `Radio` backed by the platform bluetooth stack (BlueZ, CoreBluetooth or WinRT) through btleplug.
pub struct BtleRadio {
    adapters: Mutex<Option<Vec<Adapter>>>,
    level: Level,
}

impl BtleRadio {
    /// Progress is logged at `info` when `verbose`, at `debug` otherwise.
    pub fn new(verbose: bool) -> Self {
        BtleRadio {
            adapters: Mutex::new(None),
            level: if verbose { Level::Info } else { Level::Debug },
        }
    }
}

async fn open_adapters() -> Result<Vec<Adapter>, RadioError> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;

    if adapters.is_empty() {
        return Err(RadioError::NoAdapter);
    }

    Ok(adapters)
}

#[async_trait]
impl Radio for BtleRadio {
    async fn start_scan(&self) -> Result<(), RadioError> {
        let mut guard = self.adapters.lock().await;

        // obtain fresh adapters every time, a stale adapter may have been closed by the platform
        let adapters = open_adapters().await?;

        for adapter in &adapters {
            log!(self.level, "Scanning using adapter {}...", adapter.adapter_info().await.unwrap_or("UNKNOWN".to_string()));
            adapter.start_scan(ScanFilter::default()).await?;
        }

        *guard = Some(adapters);
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), RadioError> {
        let guard = self.adapters.lock().await;

        for adapter in guard.iter().flatten() {
            if let Err(err) = adapter.stop_scan().await {
                warn!("Failed to stop scanning: {}", err);
            }
        }

        Ok(())
    }

    async fn find_peripheral(&self, peripheral_id: &str) -> Result<Option<Arc<dyn Link>>, RadioError> {
        let guard = self.adapters.lock().await;
        let adapters = match guard.as_ref() {
            Some(adapters) => adapters,
            None => return Ok(None),
        };

        for adapter in adapters {
            let peripherals = match adapter.peripherals().await {
                Ok(v) => v,
                Err(err) => {
                    warn!("Failed to query BLE adapter for peripherals: {}", err);
                    continue;
                },
            };

            for peripheral in peripherals {
                let link = BtleLink { peripheral, level: self.level };
                let properties = match link.peripheral.properties().await {
                    Err(err) => {
                        warn!("Could not query peripheral for properties: {:?}", err);
                        continue;
                    },
                    Ok(None) => continue,
                    Ok(Some(properties)) => properties,
                };

                let address = properties.address.to_string();
                if peripheral_matches(peripheral_id, &link.id(), Some(&address), properties.local_name.as_deref()) {
                    log!(
                        self.level,
                        "Using peripheral {} {:?} {} {:?}",
                        properties.address,
                        properties.address_type,
                        properties.local_name.unwrap_or(String::from("NONE")),
                        properties.services,
                    );
                    let link: Arc<dyn Link> = Arc::new(link);
                    return Ok(Some(link));
                }
            }
        }

        Ok(None)
    }

    async fn devices(&self) -> Result<Vec<Device>, RadioError> {
        let guard = self.adapters.lock().await;
        let mut devices = Vec::new();

        for adapter in guard.iter().flatten() {
            for peripheral in adapter.peripherals().await? {
                let link = BtleLink { peripheral, level: self.level };
                let name = match link.peripheral.properties().await {
                    Ok(properties) => properties.and_then(|properties| properties.local_name),
                    Err(err) => {
                        warn!("Could not query peripheral for properties: {:?}", err);
                        None
                    },
                };

                devices.push(Device { name: name.unwrap_or_default(), address: link.id() });
            }
        }

        Ok(devices)
    }
}

pub struct BtleLink {
    peripheral: Peripheral,
    level: Level,
}

impl BtleLink {
    fn characteristic(&self, info: &CharacteristicInfo) -> Result<Characteristic, RadioError> {
        let wanted = normalize_id(&info.id);

        self.peripheral
            .characteristics()
            .into_iter()
            .find(|characteristic| characteristic.uuid.to_string() == wanted)
            .ok_or(RadioError::UnknownCharacteristic { characteristic_id: info.id.clone() })
    }
}

fn convert_properties(flags: CharPropFlags) -> CharacteristicProperties {
    CharacteristicProperties {
        read: flags.contains(CharPropFlags::READ),
        write: flags.contains(CharPropFlags::WRITE),
        write_without_response: flags.contains(CharPropFlags::WRITE_WITHOUT_RESPONSE),
        notify: flags.contains(CharPropFlags::NOTIFY),
        indicate: flags.contains(CharPropFlags::INDICATE),
    }
}

#[async_trait]
impl Link for BtleLink {
    fn id(&self) -> String {
        let address = self.peripheral.address().to_string();

        // CoreBluetooth hides addresses, fall back to the platform identifier
        if address == "00:00:00:00:00:00" {
            format!("{:?}", self.peripheral.id())
        } else {
            address
        }
    }

    async fn connect(&self) -> Result<(), RadioError> {
        self.peripheral.connect().await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), RadioError> {
        self.peripheral.disconnect().await?;
        Ok(())
    }

    async fn is_connected(&self) -> Result<bool, RadioError> {
        Ok(self.peripheral.is_connected().await?)
    }

    async fn discover_services(&self) -> Result<Vec<ServiceInfo>, RadioError> {
        self.peripheral.discover_services().await?;

        Ok(self.peripheral
            .services()
            .into_iter()
            .map(|service| ServiceInfo { id: service.uuid.to_string() })
            .collect())
    }

    async fn discover_characteristics(&self, service: &ServiceInfo) -> Result<Vec<CharacteristicInfo>, RadioError> {
        let wanted = normalize_id(&service.id);

        // btleplug discovers characteristics together with their services
        Ok(self.peripheral
            .services()
            .into_iter()
            .filter(|candidate| candidate.uuid.to_string() == wanted)
            .flat_map(|candidate| candidate.characteristics.into_iter())
            .map(|characteristic| CharacteristicInfo {
                id: characteristic.uuid.to_string(),
                service_id: characteristic.service_uuid.to_string(),
                properties: convert_properties(characteristic.properties),
            })
            .collect())
    }

    async fn subscribe(&self, characteristic: &CharacteristicInfo) -> Result<(), RadioError> {
        let characteristic = self.characteristic(characteristic)?;
        log!(self.level, "Subscribing to characteristic {:?} {:?}", characteristic.service_uuid, characteristic.uuid);
        self.peripheral.subscribe(&characteristic).await?;
        Ok(())
    }

    async fn write(&self, characteristic: &CharacteristicInfo, payload: &[u8], kind: WriteKind) -> Result<(), RadioError> {
        let characteristic = self.characteristic(characteristic)?;
        let write_type = match kind {
            WriteKind::WithResponse => WriteType::WithResponse,
            WriteKind::WithoutResponse => WriteType::WithoutResponse,
        };

        self.peripheral.write(&characteristic, payload, write_type).await?;
        Ok(())
    }

    async fn notifications(&self) -> Result<BoxStream<'static, Notification>, RadioError> {
        let stream = self.peripheral.notifications().await?;

        Ok(stream
            .map(|data| Notification {
                characteristic_id: data.uuid.to_string(),
                value: data.value,
            })
            .boxed())
    }

    async fn rssi(&self) -> Result<Option<i16>, RadioError> {
        Ok(self.peripheral.properties().await?.and_then(|properties| properties.rssi))
    }
}
