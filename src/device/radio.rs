use std::sync::Arc;
use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::device::types::{CharacteristicInfo, Device, Notification, ServiceInfo, WriteKind};
use crate::error::RadioError;

/// The central-role primitives of a bluetooth stack.
#[async_trait]
pub trait Radio: Send + Sync {
    async fn start_scan(&self) -> Result<(), RadioError>;

    async fn stop_scan(&self) -> Result<(), RadioError>;

    /// Looks through the peripherals seen so far for one matching `peripheral_id`.
    async fn find_peripheral(&self, peripheral_id: &str) -> Result<Option<Arc<dyn Link>>, RadioError>;

    /// Every peripheral seen so far.
    async fn devices(&self) -> Result<Vec<Device>, RadioError>;
}

/// A single peripheral as seen by the central.
#[async_trait]
pub trait Link: Send + Sync {
    fn id(&self) -> String;

    async fn connect(&self) -> Result<(), RadioError>;

    async fn disconnect(&self) -> Result<(), RadioError>;

    async fn is_connected(&self) -> Result<bool, RadioError>;

    async fn discover_services(&self) -> Result<Vec<ServiceInfo>, RadioError>;

    async fn discover_characteristics(&self, service: &ServiceInfo) -> Result<Vec<CharacteristicInfo>, RadioError>;

    async fn subscribe(&self, characteristic: &CharacteristicInfo) -> Result<(), RadioError>;

    async fn write(&self, characteristic: &CharacteristicInfo, payload: &[u8], kind: WriteKind) -> Result<(), RadioError>;

    /// Values of every subscribed characteristic, in arrival order.
    async fn notifications(&self) -> Result<BoxStream<'static, Notification>, RadioError>;

    async fn rssi(&self) -> Result<Option<i16>, RadioError>;
}
