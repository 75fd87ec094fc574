use std::sync::Arc;
use log::info;

use crate::adapter::Adapter;
use crate::config::types::AdapterConfig;
use crate::device::radio::Radio;
use crate::error::AdapterError;

/// A byte pipe to a peripheral.
pub trait Communicator {
    /// Blocks for the next message. With `max_len`, anything beyond it is discarded.
    fn read(&mut self, max_len: Option<usize>) -> Result<Vec<u8>, AdapterError>;

    /// Returns the number of bytes submitted.
    fn write(&mut self, payload: &[u8]) -> Result<usize, AdapterError>;

    fn close(&mut self);
}

impl Communicator for Adapter {
    fn read(&mut self, max_len: Option<usize>) -> Result<Vec<u8>, AdapterError> {
        let mut message = self.read_message()?;
        if let Some(max_len) = max_len {
            message.truncate(max_len);
        }
        Ok(message)
    }

    fn write(&mut self, payload: &[u8]) -> Result<usize, AdapterError> {
        self.send_message(payload)?;
        Ok(payload.len())
    }

    fn close(&mut self) {
        self.disconnect();
    }
}

/// A `Communicator` that logs what is written and never receives anything.
#[derive(Debug, Clone, Default)]
pub struct Printer {
    written: usize,
}

impl Printer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of bytes written so far.
    pub fn written(&self) -> usize {
        self.written
    }
}

impl Communicator for Printer {
    fn read(&mut self, _max_len: Option<usize>) -> Result<Vec<u8>, AdapterError> {
        Ok(Vec::new())
    }

    fn write(&mut self, payload: &[u8]) -> Result<usize, AdapterError> {
        info!("PRINTER {} >>> {}", payload.len(), hex::encode(payload));
        self.written += payload.len();
        Ok(payload.len())
    }

    fn close(&mut self) {}
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    /// Peripheral id, MAC address or local name.
    pub address: String,
    /// Left unset when `None`; connecting then fails with `NotConfigured`.
    pub characteristic_ids: Option<Vec<String>>,
    pub verbose: bool,
}

/// Creates an adapter on the host's bluetooth stack and connects it.
pub fn connect(params: &Params) -> Result<Adapter, AdapterError> {
    let adapter = Adapter::new(params.verbose)?;
    configure_and_connect(adapter, params)
}

pub fn connect_with_radio(params: &Params, config: AdapterConfig, radio: Arc<dyn Radio>) -> Result<Adapter, AdapterError> {
    let adapter = Adapter::with_radio(params.verbose, config, radio)?;
    configure_and_connect(adapter, params)
}

fn configure_and_connect(adapter: Adapter, params: &Params) -> Result<Adapter, AdapterError> {
    adapter.set_peripheral_id(&params.address)?;
    if let Some(characteristic_ids) = &params.characteristic_ids {
        adapter.set_characteristic_ids(characteristic_ids)?;
    }

    adapter.connect()?;
    Ok(adapter)
}
