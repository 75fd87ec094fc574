use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use async_trait::async_trait;
use futures::channel::mpsc::{unbounded, UnboundedSender};
use futures::future::pending;
use futures::stream::{BoxStream, StreamExt};
use tokio::time::sleep;

use crate::device::ids::{normalize_id, peripheral_matches, same_id};
use crate::device::radio::{Link, Radio};
use crate::device::types::{CharacteristicInfo, CharacteristicProperties, Device, Notification, ServiceInfo, WriteKind};
use crate::error::RadioError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimService {
    pub id: String,
    pub characteristics: Vec<CharacteristicInfo>,
}

impl SimService {
    pub fn new(id: &str) -> Self {
        SimService { id: id.to_string(), characteristics: Vec::new() }
    }

    pub fn with_characteristic(mut self, id: &str, properties: CharacteristicProperties) -> Self {
        self.characteristics.push(CharacteristicInfo {
            id: id.to_string(),
            service_id: self.id.clone(),
            properties,
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimPeripheral {
    pub id: String,
    pub local_name: Option<String>,
    pub services: Vec<SimService>,
}

impl SimPeripheral {
    pub fn new(id: &str) -> Self {
        SimPeripheral { id: id.to_string(), local_name: None, services: Vec::new() }
    }

    pub fn with_local_name(mut self, name: &str) -> Self {
        self.local_name = Some(name.to_string());
        self
    }

    pub fn with_service(mut self, service: SimService) -> Self {
        self.services.push(service);
        self
    }
}

/// Failures and delays the simulated stack should produce.
#[derive(Debug, Clone, Default)]
pub struct SimBehavior {
    pub radio_unavailable: bool,
    pub connect_error: Option<String>,
    pub connect_hangs: bool,
    pub connect_delay: Option<Duration>,
    pub subscribe_error: Option<String>,
    pub write_error: Option<String>,
    pub rssi: Option<i16>,
}

#[derive(Debug, Default)]
struct SimInner {
    peripherals: Vec<SimPeripheral>,
    behavior: SimBehavior,
    scanning: bool,
    connected: Option<String>,
    subscribed: Vec<String>,
    listeners: Vec<UnboundedSender<Notification>>,
    writes: Vec<(String, Vec<u8>)>,
    connects: usize,
}

/// An in-memory bluetooth stack. Clones share state, so a test keeps one clone to inject
/// notifications or drop the link while the adapter drives the other.
#[derive(Debug, Clone, Default)]
pub struct SimRadio {
    inner: Arc<Mutex<SimInner>>,
}

impl SimRadio {
    pub fn new(peripherals: Vec<SimPeripheral>) -> Self {
        let radio = SimRadio::default();
        radio.lock().peripherals = peripherals;
        radio
    }

    pub fn with_behavior(self, behavior: SimBehavior) -> Self {
        self.lock().behavior = behavior;
        self
    }

    fn lock(&self) -> MutexGuard<'_, SimInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_behavior(&self, behavior: SimBehavior) {
        self.lock().behavior = behavior;
    }

    /// Pushes a value for `characteristic_id`. Only subscribed characteristics of a connected
    /// peripheral notify; returns whether the value was delivered.
    pub fn notify(&self, characteristic_id: &str, value: &[u8]) -> bool {
        let mut inner = self.lock();
        if inner.connected.is_none() || !inner.subscribed.contains(&normalize_id(characteristic_id)) {
            return false;
        }

        let notification = Notification { characteristic_id: characteristic_id.to_string(), value: value.to_vec() };
        inner.listeners.retain(|listener| listener.unbounded_send(notification.clone()).is_ok());
        !inner.listeners.is_empty()
    }

    /// Simulates the peripheral going out of range.
    pub fn drop_link(&self) {
        let mut inner = self.lock();
        inner.connected = None;
        inner.subscribed.clear();
        inner.listeners.clear();
    }

    pub fn writes(&self) -> Vec<(String, Vec<u8>)> {
        self.lock().writes.clone()
    }

    pub fn is_scanning(&self) -> bool {
        self.lock().scanning
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected.is_some()
    }

    pub fn connect_count(&self) -> usize {
        self.lock().connects
    }

    pub fn subscribed(&self) -> Vec<String> {
        self.lock().subscribed.clone()
    }
}

#[async_trait]
impl Radio for SimRadio {
    async fn start_scan(&self) -> Result<(), RadioError> {
        let mut inner = self.lock();
        if inner.behavior.radio_unavailable {
            return Err(RadioError::PermissionDenied);
        }
        inner.scanning = true;
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), RadioError> {
        self.lock().scanning = false;
        Ok(())
    }

    async fn find_peripheral(&self, peripheral_id: &str) -> Result<Option<Arc<dyn Link>>, RadioError> {
        let inner = self.lock();
        if !inner.scanning {
            return Ok(None);
        }

        let found = inner.peripherals
            .iter()
            .find(|peripheral| peripheral_matches(peripheral_id, &peripheral.id, None, peripheral.local_name.as_deref()))
            .cloned();

        Ok(found.map(|peripheral| {
            let link: Arc<dyn Link> = Arc::new(SimLink { radio: self.clone(), peripheral });
            link
        }))
    }

    async fn devices(&self) -> Result<Vec<Device>, RadioError> {
        let inner = self.lock();
        if !inner.scanning {
            return Ok(Vec::new());
        }

        Ok(inner.peripherals
            .iter()
            .map(|peripheral| Device {
                name: peripheral.local_name.clone().unwrap_or_default(),
                address: peripheral.id.clone(),
            })
            .collect())
    }
}

struct SimLink {
    radio: SimRadio,
    peripheral: SimPeripheral,
}

impl SimLink {
    fn ensure_connected(&self) -> Result<(), RadioError> {
        match &self.radio.lock().connected {
            Some(id) if *id == self.peripheral.id => Ok(()),
            _ => Err(RadioError::NotConnected),
        }
    }
}

#[async_trait]
impl Link for SimLink {
    fn id(&self) -> String {
        self.peripheral.id.clone()
    }

    async fn connect(&self) -> Result<(), RadioError> {
        let behavior = self.radio.lock().behavior.clone();

        if let Some(delay) = behavior.connect_delay {
            sleep(delay).await;
        }
        if behavior.connect_hangs {
            pending::<()>().await;
        }
        if let Some(message) = behavior.connect_error {
            return Err(RadioError::Failed { message });
        }

        let mut inner = self.radio.lock();
        inner.connected = Some(self.peripheral.id.clone());
        inner.connects += 1;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), RadioError> {
        let mut inner = self.radio.lock();
        if inner.connected.as_deref() == Some(self.peripheral.id.as_str()) {
            inner.connected = None;
            inner.subscribed.clear();
            inner.listeners.clear();
        }
        Ok(())
    }

    async fn is_connected(&self) -> Result<bool, RadioError> {
        Ok(self.ensure_connected().is_ok())
    }

    async fn discover_services(&self) -> Result<Vec<ServiceInfo>, RadioError> {
        self.ensure_connected()?;
        Ok(self.peripheral.services.iter().map(|service| ServiceInfo { id: service.id.clone() }).collect())
    }

    async fn discover_characteristics(&self, service: &ServiceInfo) -> Result<Vec<CharacteristicInfo>, RadioError> {
        self.ensure_connected()?;
        Ok(self.peripheral.services
            .iter()
            .filter(|candidate| same_id(&candidate.id, &service.id))
            .flat_map(|candidate| candidate.characteristics.iter().cloned())
            .collect())
    }

    async fn subscribe(&self, characteristic: &CharacteristicInfo) -> Result<(), RadioError> {
        self.ensure_connected()?;
        let mut inner = self.radio.lock();
        if let Some(message) = inner.behavior.subscribe_error.clone() {
            return Err(RadioError::Failed { message });
        }
        inner.subscribed.push(normalize_id(&characteristic.id));
        Ok(())
    }

    async fn write(&self, characteristic: &CharacteristicInfo, payload: &[u8], _kind: WriteKind) -> Result<(), RadioError> {
        self.ensure_connected()?;
        let mut inner = self.radio.lock();
        if let Some(message) = inner.behavior.write_error.clone() {
            return Err(RadioError::Failed { message });
        }
        inner.writes.push((characteristic.id.clone(), payload.to_vec()));
        Ok(())
    }

    async fn notifications(&self) -> Result<BoxStream<'static, Notification>, RadioError> {
        self.ensure_connected()?;
        let (sender, receiver) = unbounded();
        self.radio.lock().listeners.push(sender);
        Ok(receiver.boxed())
    }

    async fn rssi(&self) -> Result<Option<i16>, RadioError> {
        self.ensure_connected()?;
        Ok(self.radio.lock().behavior.rssi)
    }
}
