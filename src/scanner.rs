use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use log::{log, warn, Level};
use tokio::runtime::{Builder, Runtime};
use tokio::time::sleep;

use crate::device::btle::BtleRadio;
use crate::device::radio::Radio;
use crate::device::types::Device;
use crate::error::AdapterError;

/// Lists the Bluetooth LE peripherals in range. Independent of any `Adapter`.
///
/// Must not be used from within an async context.
pub struct Scanner {
    radio: Arc<dyn Radio>,
    runtime: Runtime,
    level: Level,
}

impl Scanner {
    /// A scanner on the host's bluetooth stack.
    pub fn new(verbose: bool) -> Result<Scanner, AdapterError> {
        Scanner::with_radio(verbose, Arc::new(BtleRadio::new(verbose)))
    }

    pub fn with_radio(verbose: bool, radio: Arc<dyn Radio>) -> Result<Scanner, AdapterError> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("ble-scan")
            .enable_all()
            .build()
            .map_err(|err| AdapterError::Runtime { message: err.to_string() })?;

        Ok(Scanner {
            radio,
            runtime,
            level: if verbose { Level::Info } else { Level::Debug },
        })
    }

    /// Scans for `duration` and returns every peripheral seen, once per address.
    pub fn scan(&self, duration: Duration) -> Result<Vec<Device>, AdapterError> {
        self.runtime.block_on(async {
            self.radio.start_scan().await.map_err(AdapterError::from_radio)?;
            log!(self.level, "Scanning for peripherals for {:?}...", duration);
            sleep(duration).await;

            let devices = self.radio.devices().await;
            if let Err(err) = self.radio.stop_scan().await {
                warn!("Failed to stop scanning: {}", err);
            }

            let mut seen = HashSet::new();
            let devices: Vec<Device> = devices
                .map_err(AdapterError::from_radio)?
                .into_iter()
                .filter(|device| seen.insert(device.address.clone()))
                .collect();

            log!(self.level, "Found {} peripherals", devices.len());
            Ok(devices)
        })
    }
}
