/// Where an adapter is in its connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Idle,
    Scanning,
    Connecting,
    DiscoveringServices,
    DiscoveringCharacteristics,
    Subscribing,
    Ready,
    Disconnecting,
    Error,
}

impl Phase {
    /// True for the scan to subscribe pipeline.
    pub fn is_connecting(self) -> bool {
        matches!(
            self,
            Phase::Scanning
                | Phase::Connecting
                | Phase::DiscoveringServices
                | Phase::DiscoveringCharacteristics
                | Phase::Subscribing
        )
    }

    /// True while a peripheral handle may be held.
    pub fn holds_peripheral(self) -> bool {
        matches!(
            self,
            Phase::Connecting
                | Phase::DiscoveringServices
                | Phase::DiscoveringCharacteristics
                | Phase::Subscribing
                | Phase::Ready
        )
    }

    /// Describes the step for timeout messages.
    pub fn stage(self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Scanning => "scanning",
            Phase::Connecting => "connecting",
            Phase::DiscoveringServices => "discovering services",
            Phase::DiscoveringCharacteristics => "discovering characteristics",
            Phase::Subscribing => "subscribing",
            Phase::Ready => "ready",
            Phase::Disconnecting => "disconnecting",
            Phase::Error => "error",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.stage())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CharacteristicProperties {
    pub read: bool,
    pub write: bool,
    pub write_without_response: bool,
    pub notify: bool,
    pub indicate: bool,
}

impl CharacteristicProperties {
    pub fn can_write(&self) -> bool {
        self.write || self.write_without_response
    }

    pub fn can_notify(&self) -> bool {
        self.notify || self.indicate
    }
}

/// A discovered characteristic. Compare ids with `device::ids::same_id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CharacteristicInfo {
    pub id: String,
    pub service_id: String,
    pub properties: CharacteristicProperties,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceInfo {
    pub id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    WithResponse,
    WithoutResponse,
}

impl WriteKind {
    pub fn for_properties(properties: &CharacteristicProperties) -> WriteKind {
        if properties.write { WriteKind::WithResponse } else { WriteKind::WithoutResponse }
    }
}

/// A peripheral seen while scanning.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Device {
    /// Advertised local name, empty when the peripheral advertises none.
    pub name: String,
    /// MAC address, or the platform identifier where the stack hides addresses.
    pub address: String,
}

/// A value pushed by the peripheral for a subscribed characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub characteristic_id: String,
    pub value: Vec<u8>,
}
