use std::future::Future;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use futures::StreamExt;
use futures::channel::mpsc::{UnboundedReceiver, UnboundedSender};
use futures::channel::oneshot;
use futures::stream::BoxStream;
use log::{debug, log, warn, Level};
use tokio::spawn;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::types::AdapterConfig;
use crate::device::buffer::InboundBuffer;
use crate::device::ids::normalize_id;
use crate::device::radio::{Link, Radio};
use crate::device::state::{Action, Attempt, ConnectionEvent, ConnectionState};
use crate::device::types::{CharacteristicInfo, Notification, Phase, WriteKind};
use crate::error::{AdapterError, RadioError};

pub(crate) enum DriverMessage {
    Perform { attempt: Attempt, action: Action },
    Found { attempt: Attempt, link: Arc<dyn Link> },
    Write { attempt: Attempt, characteristic: CharacteristicInfo, payload: Vec<u8> },
    Rssi { reply: oneshot::Sender<Result<Option<i16>, AdapterError>> },
}

/// State shared between foreign callers and the event-delivery runtime.
///
/// Every transition of the state machine happens under `state`, and the actions it produces are
/// queued to the driver before the lock is released, so the driver sees them in transition order.
pub(crate) struct Core {
    state: Mutex<ConnectionState>,
    changed: Condvar,
    pub(crate) buffer: InboundBuffer,
    driver: UnboundedSender<DriverMessage>,
    level: Level,
}

impl Core {
    pub(crate) fn new(verbose: bool, capacity: Option<usize>, driver: UnboundedSender<DriverMessage>) -> Self {
        Core {
            state: Mutex::new(ConnectionState::new()),
            changed: Condvar::new(),
            buffer: InboundBuffer::new(capacity),
            driver,
            level: if verbose { Level::Info } else { Level::Debug },
        }
    }

    pub(crate) fn level(&self) -> Level {
        self.level
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition<R, F>(&self, change: F) -> R
    where
        F: FnOnce(&mut ConnectionState) -> (R, Vec<Action>),
    {
        let mut state = self.state();
        let previous = state.phase();
        let (result, actions) = change(&mut *state);
        let current = state.phase();

        if previous != current {
            log!(self.level, "Connection phase {} -> {}", previous, current);

            if current == Phase::Ready {
                self.buffer.open();
            } else if previous == Phase::Ready {
                self.buffer.close();
            }
        }

        let attempt = state.attempt();
        for action in actions {
            debug!("Queueing {:?} for attempt {}", action, attempt);
            self.send(DriverMessage::Perform { attempt, action });
        }

        self.changed.notify_all();
        result
    }

    fn send(&self, message: DriverMessage) {
        if self.driver.unbounded_send(message).is_err() {
            warn!("Connection driver has stopped; dropping request");
        }
    }

    pub(crate) fn apply(&self, attempt: Attempt, event: ConnectionEvent) {
        self.transition(|state| ((), state.handle(attempt, event)));
    }

    pub(crate) fn request_connect(&self) -> Result<Attempt, AdapterError> {
        self.transition(|state| match state.request_connect() {
            Ok(actions) => (Ok(state.attempt()), actions),
            Err(err) => (Err(err), Vec::new()),
        })
    }

    pub(crate) fn request_disconnect(&self) {
        self.transition(|state| ((), state.request_disconnect()))
    }

    /// Blocks until `attempt` reached `Ready` or failed.
    pub(crate) fn wait_settled(&self, attempt: Attempt) -> Result<(), AdapterError> {
        let state = self.state();
        let state = self.changed
            .wait_while(state, |state| !state.is_settled(attempt))
            .unwrap_or_else(PoisonError::into_inner);

        state.outcome(attempt)
    }

    /// Blocks until a pending teardown finished, or `limit` passed.
    pub(crate) fn wait_torn_down(&self, limit: Duration) {
        let state = self.state();
        let (state, result) = self.changed
            .wait_timeout_while(state, limit, |state| state.phase() == Phase::Disconnecting)
            .unwrap_or_else(PoisonError::into_inner);

        if result.timed_out() {
            warn!("Teardown still pending after {:?} (phase {})", limit, state.phase());
        }
    }

    /// Issues a write to the write target; does not wait for the acknowledgement.
    pub(crate) fn submit_write(&self, payload: Vec<u8>) -> Result<(), AdapterError> {
        let state = self.state();
        if !state.connected() {
            return Err(AdapterError::NotConnected);
        }

        let characteristic = state.write_target().cloned().ok_or_else(|| AdapterError::CharacteristicNotFound {
            characteristic_id: state.characteristic_ids().join(","),
        })?;

        self.driver
            .unbounded_send(DriverMessage::Write { attempt: state.attempt(), characteristic, payload })
            .map_err(|_| AdapterError::NotConnected)
    }

    /// Buffers a notification of `attempt`. Values are kept only while that attempt is subscribing
    /// or ready, so nothing arrives in the buffer after it closed on leaving `Ready`.
    pub(crate) fn deliver(&self, attempt: Attempt, payload: Vec<u8>) -> bool {
        let state = self.state();
        if state.attempt() != attempt || !matches!(state.phase(), Phase::Subscribing | Phase::Ready) {
            return false;
        }

        self.buffer.push(payload);
        true
    }

    pub(crate) fn request_rssi(&self) -> oneshot::Receiver<Result<Option<i16>, AdapterError>> {
        let (reply, receiver) = oneshot::channel();
        self.send(DriverMessage::Rssi { reply });
        receiver
    }
}

/// Executes the actions of the state machine against the radio. Runs on the event-delivery
/// runtime; it never awaits radio I/O itself, every step runs in its own task and reports back
/// through `Core::apply`.
pub(crate) struct Driver {
    core: Arc<Core>,
    radio: Arc<dyn Radio>,
    config: AdapterConfig,
    sender: UnboundedSender<DriverMessage>,
    link: Option<Arc<dyn Link>>,
    // cancels the scan, pending steps, notification forwarding and supervision of an attempt
    attempt_cancel: CancellationToken,
    // writes issued on the current link; teardown lets them finish before disconnecting
    writes: TaskTracker,
}

impl Driver {
    pub(crate) fn new(
        core: Arc<Core>,
        radio: Arc<dyn Radio>,
        config: AdapterConfig,
        sender: UnboundedSender<DriverMessage>,
    ) -> Self {
        Driver {
            core,
            radio,
            config,
            sender,
            link: None,
            attempt_cancel: CancellationToken::new(),
            writes: TaskTracker::new(),
        }
    }

    pub(crate) async fn run(mut self, shutdown: CancellationToken, mut inbox: UnboundedReceiver<DriverMessage>) {
        'mainloop: loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    break 'mainloop;
                },
                message = inbox.next() => match message {
                    Some(message) => self.dispatch(message),
                    None => break 'mainloop,
                },
            }
        }

        self.attempt_cancel.cancel();
        if let Some(link) = self.link.take() {
            let _ = timeout(self.config.disconnect_deadline(), link.disconnect()).await;
        }
        debug!("Connection driver stopped");
    }

    fn dispatch(&mut self, message: DriverMessage) {
        match message {
            DriverMessage::Perform { attempt, action } => self.perform(attempt, action),
            DriverMessage::Found { attempt, link } => {
                let expected = {
                    let state = self.core.state();
                    state.attempt() == attempt && state.phase() == Phase::Scanning
                };
                if !expected {
                    debug!("Ignoring peripheral found for a stale attempt");
                    return;
                }

                let peripheral_id = link.id();
                self.link = Some(link);
                self.core.apply(attempt, ConnectionEvent::PeripheralFound { peripheral_id });
            },
            DriverMessage::Write { attempt, characteristic, payload } => self.write(attempt, characteristic, payload),
            DriverMessage::Rssi { reply } => {
                let link = self.link.clone();
                spawn(async move {
                    let result = match link {
                        None => Err(AdapterError::NotConnected),
                        Some(link) => link.rssi().await.map_err(|err| AdapterError::connection_failed(err)),
                    };
                    let _ = reply.send(result);
                });
            },
        }
    }

    fn perform(&mut self, attempt: Attempt, action: Action) {
        match action {
            Action::StartScan { peripheral_id } => {
                self.attempt_cancel.cancel();
                self.attempt_cancel = CancellationToken::new();
                self.scan(attempt, peripheral_id);
            },
            Action::StopScan => {
                let radio = self.radio.clone();
                spawn(async move {
                    if let Err(err) = radio.stop_scan().await {
                        warn!("Failed to stop scanning: {}", err);
                    }
                });
            },
            Action::Connect => {
                let level = self.core.level();
                self.step(attempt, |link| async move {
                    log!(level, "Connecting to peripheral {}...", link.id());
                    link.connect().await.map(|()| ConnectionEvent::LinkEstablished)
                });
            },
            Action::DiscoverServices => {
                let level = self.core.level();
                self.step(attempt, |link| async move {
                    log!(level, "Connected; Discovering services...");
                    link.discover_services()
                        .await
                        .map(|services| ConnectionEvent::ServicesDiscovered { services })
                });
            },
            Action::DiscoverCharacteristics { service } => {
                self.step(attempt, |link| async move {
                    link.discover_characteristics(&service)
                        .await
                        .map(|characteristics| ConnectionEvent::CharacteristicsDiscovered {
                            service_id: service.id.clone(),
                            characteristics,
                        })
                });
            },
            Action::OpenNotifications { characteristic_ids } => self.open_notifications(attempt, characteristic_ids),
            Action::Subscribe { characteristic } => {
                self.step(attempt, |link| async move {
                    link.subscribe(&characteristic)
                        .await
                        .map(|()| ConnectionEvent::Subscribed { characteristic_id: characteristic.id.clone() })
                });
            },
            Action::Supervise => self.supervise(attempt),
            Action::Release => {
                self.attempt_cancel.cancel();
                self.attempt_cancel = CancellationToken::new();
                if let Some(link) = self.link.take() {
                    let deadline = self.config.disconnect_deadline();
                    spawn(async move {
                        if let Ok(Err(err)) = timeout(deadline, link.disconnect()).await {
                            debug!("Releasing link of failed attempt: {}", err);
                        }
                    });
                }
            },
            Action::Teardown => {
                self.attempt_cancel.cancel();
                self.attempt_cancel = CancellationToken::new();
                let link = self.link.take();
                let core = self.core.clone();
                let deadline = self.config.disconnect_deadline();
                let writes = std::mem::replace(&mut self.writes, TaskTracker::new());
                let write_deadline = self.config.write_deadline();

                spawn(async move {
                    writes.close();
                    if timeout(write_deadline, writes.wait()).await.is_err() {
                        warn!("{} writes still pending, disconnecting anyway", writes.len());
                    }

                    if let Some(link) = link {
                        match timeout(deadline, link.disconnect()).await {
                            Err(_) => warn!("Disconnecting took too long"),
                            Ok(Err(err)) => warn!("Failed to disconnect: {}", err),
                            Ok(Ok(())) => {},
                        }
                    }
                    core.apply(attempt, ConnectionEvent::TeardownComplete);
                });
            },
        }
    }

    fn scan(&self, attempt: Attempt, peripheral_id: String) {
        let core = self.core.clone();
        let radio = self.radio.clone();
        let sender = self.sender.clone();
        let cancel = self.attempt_cancel.clone();
        let scan_timeout = self.config.scan_timeout();
        let poll = self.config.scan_poll();

        spawn(async move {
            if let Err(err) = radio.start_scan().await {
                warn!("Scanning failed {:?}", err);
                core.apply(attempt, ConnectionEvent::Failed { error: AdapterError::from_radio(err) });
                return;
            }
            log!(core.level(), "Scanning for peripheral {}...", peripheral_id);

            let search = async {
                loop {
                    match radio.find_peripheral(&peripheral_id).await {
                        Ok(Some(link)) => return link,
                        Ok(None) => debug!("No peripherals matched"),
                        Err(err) => warn!("Finding peripheral failed: {:?}", err),
                    }
                    sleep(poll).await;
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => {},
                result = timeout(scan_timeout, search) => match result {
                    Ok(link) => {
                        if sender.unbounded_send(DriverMessage::Found { attempt, link }).is_err() {
                            warn!("Connection driver has stopped; dropping found peripheral");
                        }
                    },
                    Err(_) => {
                        warn!("No peripheral matching {} found within {:?}", peripheral_id, scan_timeout);
                        core.apply(attempt, ConnectionEvent::ScanTimedOut);
                    },
                },
            }
        });
    }

    /// Runs one pipeline step on the current link under the connect deadline.
    fn step<F, Fut>(&self, attempt: Attempt, make: F)
    where
        F: FnOnce(Arc<dyn Link>) -> Fut,
        Fut: Future<Output = Result<ConnectionEvent, RadioError>> + Send + 'static,
    {
        let core = self.core.clone();
        let link = match self.link.clone() {
            Some(link) => link,
            None => {
                core.apply(attempt, ConnectionEvent::Failed { error: AdapterError::connection_failed("no peripheral") });
                return;
            },
        };
        let cancel = self.attempt_cancel.clone();
        let deadline = self.config.connect_timeout();
        let future = make(link);

        spawn(async move {
            let event = tokio::select! {
                _ = cancel.cancelled() => return,
                result = timeout(deadline, future) => match result {
                    Err(_) => ConnectionEvent::StepTimedOut,
                    Ok(Err(err)) => {
                        warn!("Connecting to peripheral failed: {:?}", err);
                        ConnectionEvent::Failed { error: AdapterError::from_radio(err) }
                    },
                    Ok(Ok(event)) => event,
                },
            };
            core.apply(attempt, event);
        });
    }

    fn open_notifications(&self, attempt: Attempt, characteristic_ids: Vec<String>) {
        let core = self.core.clone();
        let link = match self.link.clone() {
            Some(link) => link,
            None => {
                core.apply(attempt, ConnectionEvent::Failed { error: AdapterError::connection_failed("no peripheral") });
                return;
            },
        };
        let cancel = self.attempt_cancel.clone();
        let deadline = self.config.connect_timeout();

        spawn(async move {
            let opened = tokio::select! {
                _ = cancel.cancelled() => return,
                result = timeout(deadline, link.notifications()) => result,
            };

            let stream = match opened {
                Err(_) => return core.apply(attempt, ConnectionEvent::StepTimedOut),
                Ok(Err(err)) => return core.apply(attempt, ConnectionEvent::Failed { error: AdapterError::from_radio(err) }),
                Ok(Ok(stream)) => stream,
            };

            core.apply(attempt, ConnectionEvent::NotificationsOpened);
            forward_notifications(core, attempt, cancel, stream, characteristic_ids).await;
        });
    }

    fn supervise(&self, attempt: Attempt) {
        let core = self.core.clone();
        let link = match self.link.clone() {
            Some(link) => link,
            None => return,
        };
        let cancel = self.attempt_cancel.clone();
        let interval = self.config.supervision_interval();
        let deadline = self.config.is_connected_deadline();

        spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = sleep(interval) => {},
                }

                let lost = tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = sleep(deadline) => {
                        warn!("Checking for connection status took too long");
                        true
                    },
                    result = link.is_connected() => match result {
                        Err(err) => {
                            warn!("Error checking for connection state: {:?}", err);
                            true
                        },
                        Ok(false) => {
                            warn!("Connection lost");
                            true
                        },
                        Ok(true) => false,
                    },
                };

                if lost {
                    core.apply(attempt, ConnectionEvent::LinkLost);
                    return;
                }
            }
        });
    }

    fn write(&self, attempt: Attempt, characteristic: CharacteristicInfo, payload: Vec<u8>) {
        let core = self.core.clone();
        let link = match self.link.clone() {
            Some(link) => link,
            None => {
                warn!("Dropping write of {} bytes, no peripheral", payload.len());
                core.apply(attempt, ConnectionEvent::WriteCompleted { result: Err("not connected".to_string()) });
                return;
            },
        };
        let deadline = self.config.write_deadline();
        let kind = WriteKind::for_properties(&characteristic.properties);

        self.writes.spawn(async move {
            let result = match timeout(deadline, link.write(&characteristic, &payload, kind)).await {
                Err(_) => {
                    warn!("Sending to characteristic {} took too long", characteristic.id);
                    Err("write timed out".to_string())
                },
                Ok(Err(err)) => {
                    warn!("Failed to send to characteristic {}: {:?}", characteristic.id, err);
                    Err(err.to_string())
                },
                Ok(Ok(())) => {
                    log!(core.level(), "Sent {} bytes to characteristic {}", payload.len(), characteristic.id);
                    Ok(())
                },
            };
            core.apply(attempt, ConnectionEvent::WriteCompleted { result });
        });
    }
}

async fn forward_notifications(
    core: Arc<Core>,
    attempt: Attempt,
    cancel: CancellationToken,
    mut stream: BoxStream<'static, Notification>,
    characteristic_ids: Vec<String>,
) {
    'mainloop: loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break 'mainloop;
            },
            data = stream.next() => match data {
                Some(data) => {
                    if characteristic_ids.contains(&normalize_id(&data.characteristic_id)) {
                        log!(core.level(), "Received {} bytes from {}", data.value.len(), data.characteristic_id);
                        if !core.deliver(attempt, data.value) {
                            debug!("Dropping notification received after leaving the ready state");
                        }
                    }
                },
                None => {
                    debug!("Notification stream ended");
                    break 'mainloop;
                },
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::channel::mpsc::unbounded;
    use super::*;
    use crate::device::types::{CharacteristicProperties, ServiceInfo};

    fn subscribing_core() -> (Core, Attempt) {
        let (sender, _inbox) = unbounded();
        let core = Core::new(false, None, sender);
        core.state().set_peripheral_id("AA:BB").unwrap();
        core.state().set_characteristic_ids(&["notify-uuid".to_string()]).unwrap();

        let attempt = core.request_connect().unwrap();
        core.apply(attempt, ConnectionEvent::PeripheralFound { peripheral_id: "AA:BB".into() });
        core.apply(attempt, ConnectionEvent::LinkEstablished);
        core.apply(attempt, ConnectionEvent::ServicesDiscovered { services: vec![ServiceInfo { id: "service".into() }] });
        core.apply(attempt, ConnectionEvent::CharacteristicsDiscovered {
            service_id: "service".into(),
            characteristics: vec![CharacteristicInfo {
                id: "notify-uuid".into(),
                service_id: "service".into(),
                properties: CharacteristicProperties { notify: true, ..Default::default() },
            }],
        });
        assert_eq!(core.state().phase(), Phase::Subscribing);
        (core, attempt)
    }

    #[test]
    fn values_before_ready_are_kept() {
        let (core, attempt) = subscribing_core();
        assert!(core.deliver(attempt, vec![1]));

        core.apply(attempt, ConnectionEvent::NotificationsOpened);
        core.apply(attempt, ConnectionEvent::Subscribed { characteristic_id: "notify-uuid".into() });
        assert!(core.state().connected());
        assert_eq!(core.buffer.pop(), Ok(vec![1]));
    }

    #[test]
    fn values_after_leaving_ready_are_dropped() {
        let (core, attempt) = subscribing_core();
        core.apply(attempt, ConnectionEvent::NotificationsOpened);
        core.apply(attempt, ConnectionEvent::Subscribed { characteristic_id: "notify-uuid".into() });
        assert!(core.deliver(attempt, vec![1]));

        core.request_disconnect();
        assert!(!core.deliver(attempt, vec![2]));
        core.apply(attempt, ConnectionEvent::TeardownComplete);
        assert!(!core.deliver(attempt, vec![3]));
        assert!(!core.deliver(attempt + 1, vec![4]));

        assert_eq!(core.buffer.pop(), Ok(vec![1]));
        assert_eq!(core.buffer.pop(), Err(AdapterError::NotConnected));
        assert_eq!(core.buffer.last(), Some(vec![1]));
    }
}
