use std::sync::Arc;
use std::time::Duration;
use futures::channel::mpsc::unbounded;
use log::{debug, log, warn};
use tokio::runtime::{Builder, Runtime};
use tokio_util::sync::CancellationToken;

use crate::config::types::AdapterConfig;
use crate::device::btle::BtleRadio;
use crate::device::connection::{Core, Driver};
use crate::device::radio::Radio;
use crate::device::types::Phase;
use crate::error::AdapterError;

const TEARDOWN_MARGIN: Duration = Duration::from_millis(1000);

/// A blocking handle to one peripheral.
///
/// Every operation may be called from any thread. Radio events are processed on a runtime owned
/// by the adapter; `connect` and `read_message` block the calling thread until the runtime
/// reports back, and `disconnect` unblocks both.
pub struct Adapter {
    verbose: bool,
    config: AdapterConfig,
    core: Arc<Core>,
    shutdown: CancellationToken,
    runtime: Option<Runtime>,
}

impl Adapter {
    /// An adapter on the host's bluetooth stack, with default timeouts.
    pub fn new(verbose: bool) -> Result<Adapter, AdapterError> {
        Adapter::with_config(verbose, AdapterConfig::default())
    }

    pub fn with_config(verbose: bool, config: AdapterConfig) -> Result<Adapter, AdapterError> {
        Adapter::with_radio(verbose, config, Arc::new(BtleRadio::new(verbose)))
    }

    pub fn with_radio(verbose: bool, config: AdapterConfig, radio: Arc<dyn Radio>) -> Result<Adapter, AdapterError> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("ble-events")
            .enable_all()
            .build()
            .map_err(|err| AdapterError::Runtime { message: err.to_string() })?;

        let (sender, inbox) = unbounded();
        let core = Arc::new(Core::new(verbose, config.inbound_capacity, sender.clone()));
        let shutdown = CancellationToken::new();

        let driver = Driver::new(core.clone(), radio, config.clone(), sender);
        runtime.spawn(driver.run(shutdown.clone(), inbox));
        debug!("Adapter created (verbose: {})", verbose);

        Ok(Adapter {
            verbose,
            config,
            core,
            shutdown,
            runtime: Some(runtime),
        })
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    /// Fails with `Busy` while an attempt is running or the adapter is connected.
    pub fn set_peripheral_id(&self, id: &str) -> Result<(), AdapterError> {
        self.core.state().set_peripheral_id(id)
    }

    pub fn set_characteristic_ids<S: AsRef<str>>(&self, ids: &[S]) -> Result<(), AdapterError> {
        let ids: Vec<String> = ids.iter().map(|id| id.as_ref().to_string()).collect();
        self.core.state().set_characteristic_ids(&ids)
    }

    /// Scans for the configured peripheral, connects, discovers the configured characteristics
    /// and subscribes to those that notify. Blocks until the adapter is ready or the attempt
    /// failed; the failure is also kept as `last_error`.
    pub fn connect(&self) -> Result<(), AdapterError> {
        let attempt = self.core.request_connect()?;
        log!(self.core.level(), "Connecting to {} (attempt {})", self.peripheral_id(), attempt);

        let result = self.core.wait_settled(attempt);
        match &result {
            Ok(()) => log!(self.core.level(), "Connected to {}", self.peripheral_id()),
            Err(err) => warn!("Connecting to {} failed: {}", self.peripheral_id(), err),
        }
        result
    }

    /// Tears down any link or pending attempt and returns to `Idle`. Writes already submitted are
    /// given up to the write deadline to complete first. Calling it again is a no-op.
    pub fn disconnect(&self) {
        self.core.request_disconnect();
        let limit = self.config.write_deadline() + self.config.disconnect_deadline() + TEARDOWN_MARGIN;
        self.core.wait_torn_down(limit);
    }

    /// Issues a write to the write-capable characteristic. Returns once the write is submitted;
    /// a failure to acknowledge it shows up in `last_error`.
    pub fn send_message(&self, payload: &[u8]) -> Result<(), AdapterError> {
        self.core.submit_write(payload.to_vec())
    }

    /// Pops the oldest received message, waiting for one while connected.
    pub fn read_message(&self) -> Result<Vec<u8>, AdapterError> {
        self.core.buffer.pop()
    }

    /// Like `read_message`, but gives up with `Ok(None)` after `timeout`.
    pub fn read_message_timeout(&self, timeout: Duration) -> Result<Option<Vec<u8>>, AdapterError> {
        self.core.buffer.pop_timeout(timeout)
    }

    /// The most recently received message; does not consume it.
    pub fn last_read(&self) -> Option<Vec<u8>> {
        self.core.buffer.last()
    }

    pub fn running(&self) -> bool {
        self.core.state().running()
    }

    pub fn connected(&self) -> bool {
        self.core.state().connected()
    }

    pub fn connecting(&self) -> bool {
        self.core.state().connecting()
    }

    pub fn phase(&self) -> Phase {
        self.core.state().phase()
    }

    pub fn peripheral_id(&self) -> String {
        self.core.state().peripheral_id().to_string()
    }

    pub fn characteristic_ids(&self) -> Vec<String> {
        self.core.state().characteristic_ids().to_vec()
    }

    pub fn last_error(&self) -> Option<AdapterError> {
        self.core.state().last_error().cloned()
    }

    /// Signal strength of the connected peripheral, if the stack reports one.
    ///
    /// Must not be called from within an async context.
    pub fn rssi(&self) -> Result<Option<i16>, AdapterError> {
        let runtime = self.runtime.as_ref().ok_or(AdapterError::NotConnected)?;
        if !self.connected() {
            return Err(AdapterError::NotConnected);
        }

        runtime
            .block_on(self.core.request_rssi())
            .unwrap_or(Err(AdapterError::NotConnected))
    }
}

impl Drop for Adapter {
    fn drop(&mut self) {
        self.disconnect();
        self.shutdown.cancel();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}
