use crate::device::ids::{normalize_id, same_id};
use crate::device::types::{CharacteristicInfo, Phase, ServiceInfo};
use crate::error::AdapterError;

/// Identifies one connection attempt. Radio results carry the attempt they were produced for,
/// so that late callbacks from an abandoned attempt can be recognised and dropped.
pub type Attempt = u64;

/// Inputs produced by the radio stack (through the driver) for the current attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    PeripheralFound { peripheral_id: String },
    ScanTimedOut,
    LinkEstablished,
    ServicesDiscovered { services: Vec<ServiceInfo> },
    CharacteristicsDiscovered { service_id: String, characteristics: Vec<CharacteristicInfo> },
    NotificationsOpened,
    Subscribed { characteristic_id: String },
    /// A step of the pipeline did not complete within its deadline.
    StepTimedOut,
    /// A primitive of the pipeline failed.
    Failed { error: AdapterError },
    LinkLost,
    TeardownComplete,
    WriteCompleted { result: Result<(), String> },
}

/// Work the driver has to perform against the radio stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    StartScan { peripheral_id: String },
    StopScan,
    Connect,
    DiscoverServices,
    DiscoverCharacteristics { service: ServiceInfo },
    /// Start forwarding values of these characteristics into the inbound buffer. Opened before
    /// subscribing so that no early value is missed.
    OpenNotifications { characteristic_ids: Vec<String> },
    Subscribe { characteristic: CharacteristicInfo },
    /// Watch the link of a ready peripheral.
    Supervise,
    /// Drop the link of a failed attempt.
    Release,
    /// Disconnect the link and report `TeardownComplete`.
    Teardown,
}

/// The connection state machine. It performs no I/O: every transition returns the actions that
/// the driver has to carry out, and the driver feeds the results back in as events.
#[derive(Debug, Clone)]
pub struct ConnectionState {
    phase: Phase,
    running: bool,
    peripheral_id: String,
    characteristic_ids: Vec<String>,
    current_peripheral: Option<String>,
    last_error: Option<AdapterError>,
    attempt: Attempt,
    settled: Option<(Attempt, Result<(), AdapterError>)>,
    pending_services: usize,
    discovered: Vec<Option<CharacteristicInfo>>,
    to_subscribe: Vec<CharacteristicInfo>,
    pending_subscriptions: Vec<String>,
    notify_ids: Vec<String>,
    write_target: Option<CharacteristicInfo>,
}

impl Default for ConnectionState {
    fn default() -> Self {
        ConnectionState {
            phase: Phase::Idle,
            running: false,
            peripheral_id: String::new(),
            characteristic_ids: Vec::new(),
            current_peripheral: None,
            last_error: None,
            attempt: 0,
            settled: None,
            pending_services: 0,
            discovered: Vec::new(),
            to_subscribe: Vec::new(),
            pending_subscriptions: Vec::new(),
            notify_ids: Vec::new(),
            write_target: None,
        }
    }
}

impl ConnectionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn running(&self) -> bool {
        self.running
    }

    pub fn connecting(&self) -> bool {
        self.phase.is_connecting()
    }

    pub fn connected(&self) -> bool {
        self.phase == Phase::Ready
    }

    pub fn attempt(&self) -> Attempt {
        self.attempt
    }

    pub fn peripheral_id(&self) -> &str {
        &self.peripheral_id
    }

    pub fn characteristic_ids(&self) -> &[String] {
        &self.characteristic_ids
    }

    pub fn current_peripheral(&self) -> Option<&str> {
        self.current_peripheral.as_deref()
    }

    pub fn last_error(&self) -> Option<&AdapterError> {
        self.last_error.as_ref()
    }

    /// The characteristic writes go to, once ready.
    pub fn write_target(&self) -> Option<&CharacteristicInfo> {
        self.write_target.as_ref()
    }

    /// Targets may only change while no attempt holds them.
    fn configurable(&self) -> bool {
        !self.running && matches!(self.phase, Phase::Idle | Phase::Error)
    }

    pub fn set_peripheral_id(&mut self, id: &str) -> Result<(), AdapterError> {
        if !self.configurable() {
            return Err(AdapterError::Busy);
        }
        self.peripheral_id = id.trim().to_string();
        Ok(())
    }

    pub fn set_characteristic_ids(&mut self, ids: &[String]) -> Result<(), AdapterError> {
        if !self.configurable() {
            return Err(AdapterError::Busy);
        }
        self.characteristic_ids = ids.iter().map(|id| id.trim().to_string()).collect();
        Ok(())
    }

    /// Starts a new attempt from `Idle` or `Error` (the latter resets automatically).
    pub fn request_connect(&mut self) -> Result<Vec<Action>, AdapterError> {
        if !matches!(self.phase, Phase::Idle | Phase::Error) {
            return Err(AdapterError::Busy);
        }

        self.attempt += 1;
        self.reset_discovery();
        self.current_peripheral = None;

        if self.peripheral_id.is_empty() || self.characteristic_ids.is_empty() {
            self.fail(AdapterError::NotConfigured);
            return Err(AdapterError::NotConfigured);
        }

        self.phase = Phase::Scanning;
        self.running = true;
        Ok(vec![Action::StartScan { peripheral_id: self.peripheral_id.clone() }])
    }

    /// Leaves whatever phase the adapter is in. A no-op when idle or already disconnecting.
    pub fn request_disconnect(&mut self) -> Vec<Action> {
        match self.phase {
            Phase::Idle | Phase::Disconnecting => Vec::new(),
            // a failed attempt already released its link
            Phase::Error => {
                self.phase = Phase::Idle;
                Vec::new()
            },
            phase => {
                let mut actions = Vec::new();
                if phase == Phase::Scanning {
                    actions.push(Action::StopScan);
                }
                if phase.is_connecting() {
                    self.settle(Err(AdapterError::connection_failed("connection attempt cancelled")));
                }
                actions.push(Action::Teardown);
                self.enter_disconnecting();
                actions
            },
        }
    }

    /// True once the given attempt reached `Ready` or failed.
    pub fn is_settled(&self, attempt: Attempt) -> bool {
        self.attempt != attempt || matches!(self.settled, Some((settled, _)) if settled == attempt)
    }

    pub fn outcome(&self, attempt: Attempt) -> Result<(), AdapterError> {
        match &self.settled {
            Some((settled, result)) if *settled == attempt => result.clone(),
            _ => Err(AdapterError::connection_failed("connection attempt superseded")),
        }
    }

    pub fn handle(&mut self, attempt: Attempt, event: ConnectionEvent) -> Vec<Action> {
        if attempt != self.attempt {
            return Vec::new();
        }

        match (self.phase, event) {
            (Phase::Scanning, ConnectionEvent::PeripheralFound { peripheral_id }) => {
                self.phase = Phase::Connecting;
                self.current_peripheral = Some(peripheral_id);
                vec![Action::StopScan, Action::Connect]
            },
            (Phase::Scanning, ConnectionEvent::ScanTimedOut) => {
                self.fail(AdapterError::DeviceNotFound { peripheral_id: self.peripheral_id.clone() });
                vec![Action::StopScan]
            },
            (Phase::Connecting, ConnectionEvent::LinkEstablished) => {
                self.phase = Phase::DiscoveringServices;
                vec![Action::DiscoverServices]
            },
            (Phase::DiscoveringServices, ConnectionEvent::ServicesDiscovered { services }) => {
                if services.is_empty() {
                    return self.fail_missing_characteristic();
                }
                self.phase = Phase::DiscoveringCharacteristics;
                self.pending_services = services.len();
                services
                    .into_iter()
                    .map(|service| Action::DiscoverCharacteristics { service })
                    .collect()
            },
            (Phase::DiscoveringCharacteristics, ConnectionEvent::CharacteristicsDiscovered { characteristics, .. }) => {
                self.record_characteristics(characteristics);
                self.pending_services = self.pending_services.saturating_sub(1);

                if self.discovered.iter().all(Option::is_some) {
                    self.enter_subscribing()
                } else if self.pending_services == 0 {
                    self.fail_missing_characteristic()
                } else {
                    Vec::new()
                }
            },
            (Phase::Subscribing, ConnectionEvent::NotificationsOpened) if !self.to_subscribe.is_empty() => {
                std::mem::take(&mut self.to_subscribe)
                    .into_iter()
                    .map(|characteristic| Action::Subscribe { characteristic })
                    .collect()
            },
            (Phase::Subscribing, ConnectionEvent::Subscribed { characteristic_id }) => {
                let characteristic_id = normalize_id(&characteristic_id);
                self.pending_subscriptions.retain(|id| *id != characteristic_id);
                if self.pending_subscriptions.is_empty() {
                    self.enter_ready()
                } else {
                    Vec::new()
                }
            },
            (phase, ConnectionEvent::StepTimedOut) if phase.is_connecting() => {
                self.fail(AdapterError::TimedOut { stage: phase.stage().to_string() });
                vec![Self::cleanup_for(phase)]
            },
            (phase, ConnectionEvent::Failed { error }) if phase.is_connecting() => {
                self.fail(error);
                vec![Self::cleanup_for(phase)]
            },
            (phase, ConnectionEvent::LinkLost) if phase.holds_peripheral() => {
                let error = AdapterError::connection_failed("connection lost");
                if phase.is_connecting() {
                    self.settle(Err(error.clone()));
                }
                self.last_error = Some(error);
                self.enter_disconnecting();
                vec![Action::Teardown]
            },
            (Phase::Disconnecting, ConnectionEvent::TeardownComplete) => {
                self.phase = Phase::Idle;
                self.running = false;
                Vec::new()
            },
            (_, ConnectionEvent::WriteCompleted { result: Err(message) }) => {
                self.last_error = Some(AdapterError::WriteFailed { message });
                Vec::new()
            },
            // duplicate or out of order callbacks
            _ => Vec::new(),
        }
    }

    /// The relations between the flags that must hold after every transition.
    pub fn invariants_hold(&self) -> bool {
        let connecting = self.connecting();
        let connected = self.connected();

        !(connecting && connected)
            && (self.current_peripheral.is_none() || connecting || connected)
            && (!connected || self.current_peripheral.is_some())
            && (!connected || self.running)
            && (!connecting || self.running)
    }

    fn cleanup_for(phase: Phase) -> Action {
        if phase == Phase::Scanning { Action::StopScan } else { Action::Release }
    }

    /// A characteristic fills every configured slot naming it, so one characteristic may serve
    /// as both the write and the notify target.
    fn record_characteristics(&mut self, characteristics: Vec<CharacteristicInfo>) {
        for characteristic in characteristics {
            let slots = self.characteristic_ids.iter().zip(self.discovered.iter_mut());
            for (id, found) in slots {
                if found.is_none() && same_id(id, &characteristic.id) {
                    *found = Some(characteristic.clone());
                }
            }
        }
    }

    fn enter_subscribing(&mut self) -> Vec<Action> {
        let found: Vec<CharacteristicInfo> = self.discovered.iter().flatten().cloned().collect();

        let write_target = found.iter().find(|c| c.properties.write)
            .or_else(|| found.iter().find(|c| c.properties.can_write()))
            .cloned();
        self.write_target = write_target;

        let mut to_subscribe: Vec<CharacteristicInfo> = Vec::new();
        for characteristic in found.into_iter().filter(|c| c.properties.can_notify()) {
            if !to_subscribe.iter().any(|c| c.id == characteristic.id) {
                to_subscribe.push(characteristic);
            }
        }

        self.notify_ids = to_subscribe.iter().map(|c| normalize_id(&c.id)).collect();
        if to_subscribe.is_empty() {
            return self.enter_ready();
        }

        self.phase = Phase::Subscribing;
        self.pending_subscriptions = self.notify_ids.clone();
        self.to_subscribe = to_subscribe;
        vec![Action::OpenNotifications { characteristic_ids: self.notify_ids.clone() }]
    }

    fn enter_ready(&mut self) -> Vec<Action> {
        self.phase = Phase::Ready;
        self.last_error = None;
        self.settle(Ok(()));
        vec![Action::Supervise]
    }

    fn enter_disconnecting(&mut self) {
        self.phase = Phase::Disconnecting;
        self.current_peripheral = None;
        self.write_target = None;
    }

    fn fail_missing_characteristic(&mut self) -> Vec<Action> {
        let missing = self.characteristic_ids
            .iter()
            .zip(self.discovered.iter())
            .find(|(_, found)| found.is_none())
            .map(|(id, _)| id.clone())
            .unwrap_or_default();

        self.fail(AdapterError::CharacteristicNotFound { characteristic_id: missing });
        vec![Action::Release]
    }

    fn fail(&mut self, error: AdapterError) {
        self.phase = Phase::Error;
        self.running = false;
        self.current_peripheral = None;
        self.write_target = None;
        self.last_error = Some(error.clone());
        self.settle(Err(error));
    }

    fn settle(&mut self, result: Result<(), AdapterError>) {
        self.settled = Some((self.attempt, result));
    }

    fn reset_discovery(&mut self) {
        self.pending_services = 0;
        self.discovered = vec![None; self.characteristic_ids.len()];
        self.to_subscribe.clear();
        self.pending_subscriptions.clear();
        self.notify_ids.clear();
        self.write_target = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::types::CharacteristicProperties;

    fn characteristic(id: &str, write: bool, notify: bool) -> CharacteristicInfo {
        CharacteristicInfo {
            id: id.to_string(),
            service_id: "service".to_string(),
            properties: CharacteristicProperties { write, notify, ..Default::default() },
        }
    }

    fn configured() -> ConnectionState {
        let mut state = ConnectionState::new();
        state.set_peripheral_id("AA:BB").unwrap();
        state.set_characteristic_ids(&["notify-uuid".to_string(), "write-uuid".to_string()]).unwrap();
        state
    }

    fn drive_to_discovery(state: &mut ConnectionState) -> Attempt {
        state.request_connect().unwrap();
        let attempt = state.attempt();
        state.handle(attempt, ConnectionEvent::PeripheralFound { peripheral_id: "AA:BB".into() });
        state.handle(attempt, ConnectionEvent::LinkEstablished);
        let actions = state.handle(attempt, ConnectionEvent::ServicesDiscovered {
            services: vec![ServiceInfo { id: "service".into() }],
        });
        assert_eq!(actions, vec![Action::DiscoverCharacteristics { service: ServiceInfo { id: "service".into() } }]);
        attempt
    }

    #[test]
    fn connect_without_peripheral_id_fails() {
        let mut state = ConnectionState::new();
        assert_eq!(state.request_connect(), Err(AdapterError::NotConfigured));
        assert_eq!(state.phase(), Phase::Error);
        assert_eq!(state.last_error(), Some(&AdapterError::NotConfigured));
        assert!(state.is_settled(state.attempt()));

        state.set_peripheral_id("AA:BB").unwrap();
        state.set_characteristic_ids(&["write-uuid".to_string()]).unwrap();
        assert!(state.request_connect().is_ok());
    }

    #[test]
    fn full_pipeline_reaches_ready() {
        let mut state = configured();
        let attempt = drive_to_discovery(&mut state);

        let actions = state.handle(attempt, ConnectionEvent::CharacteristicsDiscovered {
            service_id: "service".into(),
            characteristics: vec![characteristic("notify-uuid", false, true), characteristic("write-uuid", true, false)],
        });
        assert_eq!(actions, vec![Action::OpenNotifications { characteristic_ids: vec!["notify-uuid".into()] }]);
        assert_eq!(state.phase(), Phase::Subscribing);

        let actions = state.handle(attempt, ConnectionEvent::NotificationsOpened);
        assert_eq!(actions, vec![Action::Subscribe { characteristic: characteristic("notify-uuid", false, true) }]);
        assert!(state.handle(attempt, ConnectionEvent::NotificationsOpened).is_empty());

        let actions = state.handle(attempt, ConnectionEvent::Subscribed { characteristic_id: "NOTIFY-UUID".into() });
        assert_eq!(actions, vec![Action::Supervise]);
        assert!(state.connected());
        assert!(!state.connecting());
        assert_eq!(state.write_target().map(|c| c.id.as_str()), Some("write-uuid"));
        assert_eq!(state.outcome(attempt), Ok(()));
        assert!(state.invariants_hold());
    }

    #[test]
    fn missing_characteristic_fails_after_all_services() {
        let mut state = configured();
        let attempt = drive_to_discovery(&mut state);

        let actions = state.handle(attempt, ConnectionEvent::CharacteristicsDiscovered {
            service_id: "service".into(),
            characteristics: vec![characteristic("notify-uuid", false, true)],
        });
        assert_eq!(actions, vec![Action::Release]);
        assert_eq!(state.phase(), Phase::Error);
        assert_eq!(
            state.outcome(attempt),
            Err(AdapterError::CharacteristicNotFound { characteristic_id: "write-uuid".into() })
        );
        assert!(state.current_peripheral().is_none());
    }

    #[test]
    fn one_characteristic_serves_repeated_ids() {
        let mut state = ConnectionState::new();
        state.set_peripheral_id("AA:BB").unwrap();
        state.set_characteristic_ids(&["FFE1".to_string(), "ffe1".to_string()]).unwrap();
        let attempt = drive_to_discovery(&mut state);

        let both = CharacteristicInfo {
            id: "0000ffe1-0000-1000-8000-00805f9b34fb".to_string(),
            service_id: "service".to_string(),
            properties: CharacteristicProperties { write: true, notify: true, ..Default::default() },
        };
        let actions = state.handle(attempt, ConnectionEvent::CharacteristicsDiscovered {
            service_id: "service".into(),
            characteristics: vec![both.clone()],
        });
        assert_eq!(actions, vec![Action::OpenNotifications { characteristic_ids: vec![both.id.clone()] }]);

        let actions = state.handle(attempt, ConnectionEvent::NotificationsOpened);
        assert_eq!(actions, vec![Action::Subscribe { characteristic: both.clone() }]);

        state.handle(attempt, ConnectionEvent::Subscribed { characteristic_id: both.id.clone() });
        assert!(state.connected());
        assert_eq!(state.write_target(), Some(&both));
    }

    #[test]
    fn stale_and_duplicate_events_are_ignored() {
        let mut state = configured();
        state.request_connect().unwrap();
        let attempt = state.attempt();

        assert!(state.handle(attempt + 1, ConnectionEvent::PeripheralFound { peripheral_id: "x".into() }).is_empty());
        assert_eq!(state.phase(), Phase::Scanning);

        state.handle(attempt, ConnectionEvent::PeripheralFound { peripheral_id: "AA:BB".into() });
        assert!(state.handle(attempt, ConnectionEvent::PeripheralFound { peripheral_id: "AA:BB".into() }).is_empty());
        assert_eq!(state.phase(), Phase::Connecting);
    }

    #[test]
    fn scan_timeout_is_device_not_found() {
        let mut state = configured();
        state.request_connect().unwrap();
        let attempt = state.attempt();

        assert_eq!(state.handle(attempt, ConnectionEvent::ScanTimedOut), vec![Action::StopScan]);
        assert_eq!(state.outcome(attempt), Err(AdapterError::DeviceNotFound { peripheral_id: "AA:BB".into() }));
        assert!(!state.running());
        assert!(state.set_peripheral_id("CC:DD").is_ok());
    }

    #[test]
    fn connect_timeout_names_the_stage() {
        let mut state = configured();
        state.request_connect().unwrap();
        let attempt = state.attempt();
        state.handle(attempt, ConnectionEvent::PeripheralFound { peripheral_id: "AA:BB".into() });

        assert_eq!(state.handle(attempt, ConnectionEvent::StepTimedOut), vec![Action::Release]);
        assert_eq!(state.outcome(attempt), Err(AdapterError::TimedOut { stage: "connecting".into() }));
    }

    #[test]
    fn reconfiguring_mid_connection_is_rejected() {
        let mut state = configured();
        state.request_connect().unwrap();
        assert_eq!(state.set_peripheral_id("other"), Err(AdapterError::Busy));
        assert_eq!(state.set_characteristic_ids(&[]), Err(AdapterError::Busy));
        assert_eq!(state.request_connect(), Err(AdapterError::Busy));
    }

    #[test]
    fn disconnect_cancels_attempt_and_is_idempotent() {
        let mut state = configured();
        state.request_connect().unwrap();
        let attempt = state.attempt();

        assert_eq!(state.request_disconnect(), vec![Action::StopScan, Action::Teardown]);
        assert_eq!(state.phase(), Phase::Disconnecting);
        assert!(state.is_settled(attempt));
        assert!(state.outcome(attempt).is_err());
        assert!(state.request_disconnect().is_empty());

        state.handle(attempt, ConnectionEvent::TeardownComplete);
        assert_eq!(state.phase(), Phase::Idle);
        assert!(!state.running());
        assert!(state.request_disconnect().is_empty());
        assert_eq!(state.phase(), Phase::Idle);
    }

    #[test]
    fn link_loss_while_ready_records_error() {
        let mut state = configured();
        let attempt = drive_to_discovery(&mut state);
        state.handle(attempt, ConnectionEvent::CharacteristicsDiscovered {
            service_id: "service".into(),
            characteristics: vec![characteristic("notify-uuid", true, false), characteristic("write-uuid", true, false)],
        });
        assert!(state.connected());

        assert_eq!(state.handle(attempt, ConnectionEvent::LinkLost), vec![Action::Teardown]);
        assert_eq!(state.phase(), Phase::Disconnecting);
        assert_eq!(state.last_error().map(AdapterError::kind), Some(crate::error::ErrorKind::ConnectionFailed));
    }

    #[test]
    fn failed_write_is_recorded_without_leaving_ready() {
        let mut state = configured();
        let attempt = drive_to_discovery(&mut state);
        state.handle(attempt, ConnectionEvent::CharacteristicsDiscovered {
            service_id: "service".into(),
            characteristics: vec![characteristic("notify-uuid", true, false), characteristic("write-uuid", true, false)],
        });

        state.handle(attempt, ConnectionEvent::WriteCompleted { result: Err("rejected".into()) });
        assert!(state.connected());
        assert_eq!(state.last_error(), Some(&AdapterError::WriteFailed { message: "rejected".into() }));
    }

    #[test]
    fn error_state_auto_resets_on_connect() {
        let mut state = configured();
        state.request_connect().unwrap();
        let first = state.attempt();
        state.handle(first, ConnectionEvent::ScanTimedOut);

        state.request_connect().unwrap();
        assert_eq!(state.phase(), Phase::Scanning);
        assert_ne!(state.attempt(), first);
        assert!(!state.is_settled(state.attempt()));
    }

    #[test]
    fn disconnect_clears_error() {
        let mut state = configured();
        state.request_connect().unwrap();
        let attempt = state.attempt();
        state.handle(attempt, ConnectionEvent::ScanTimedOut);

        assert!(state.request_disconnect().is_empty());
        assert_eq!(state.phase(), Phase::Idle);
        assert!(state.last_error().is_some());
    }
}
