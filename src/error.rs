use std::io;
use std::str::Utf8Error;
use thiserror::Error;
use btleplug;
use serde_json;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to determine path to config file")]
    NoConfigPath,

    #[error("Failed to encode/decode config as utf-8: {source}")]
    Utf8Error { #[from] source: Utf8Error },

    #[error("Failed to read/write config file: {source}")]
    IOError { #[from] source: io::Error },

    #[error("Failed to parse/build config file: {source}")]
    JsonError { #[from] source: serde_json::Error },
}

impl ConfigError {
    pub fn is_file_not_found_error(&self) -> bool {
        match self {
            ConfigError::IOError { source } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Failed to open log file: {source}")]
    LogFile { #[from] source: io::Error },

    #[error("Failed to install logger: {source}")]
    SetLogger { #[from] source: log::SetLoggerError },
}

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Failed to load configuration: {source}")]
    Config { #[from] source: ConfigError },

    #[error("Failed to initialize logging: {source}")]
    Logging { #[from] source: LoggingError },

    #[error("{source}")]
    Adapter { #[from] source: AdapterError },

    #[error("Invalid hex payload: {source}")]
    Hex { #[from] source: hex::FromHexError },
}

/// Failures reported by the radio stack primitives.
#[derive(Error, Debug)]
pub enum RadioError {
    #[error("Error communicating with device (btleplug): {source}")]
    Btle { #[from] source: btleplug::Error },

    #[error("No bluetooth adapter is available")]
    NoAdapter,

    #[error("Bluetooth access was denied")]
    PermissionDenied,

    #[error("The peripheral is not connected")]
    NotConnected,

    #[error("Unknown characteristic {characteristic_id}")]
    UnknownCharacteristic { characteristic_id: String },

    #[error("{message}")]
    Failed { message: String },
}

// BlueZ reports a powered off controller as `org.bluez.Error.NotReady`
const UNPOWERED_MARKERS: [&str; 4] = ["notready", "not ready", "powered off", "not powered"];

impl RadioError {
    /// True when the radio itself can not be used (powered off, unauthorized, absent).
    pub fn is_unavailable(&self) -> bool {
        match self {
            RadioError::NoAdapter | RadioError::PermissionDenied => true,
            RadioError::Btle { source: btleplug::Error::PermissionDenied } => true,
            RadioError::Btle { source } => {
                let message = source.to_string().to_lowercase();
                UNPOWERED_MARKERS.iter().any(|marker| message.contains(marker))
            },
            _ => false,
        }
    }
}

/// Distinguishes the kind of an `AdapterError` without its payload.
///
/// The integer codes are part of the C ABI (`lastErrorKind`), 0 meaning "no error".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorKind {
    NotConfigured = 1,
    DeviceNotFound = 2,
    ConnectionFailed = 3,
    CharacteristicNotFound = 4,
    NotConnected = 5,
    WriteFailed = 6,
    RadioUnavailable = 7,
    TimedOut = 8,
    Busy = 9,
    Runtime = 10,
}

impl ErrorKind {
    pub fn code(self) -> i32 {
        self as i32
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    #[error("The peripheral ID or characteristic IDs have not been configured")]
    NotConfigured,

    #[error("No peripheral matching {peripheral_id} was found")]
    DeviceNotFound { peripheral_id: String },

    #[error("Connecting to the peripheral failed: {message}")]
    ConnectionFailed { message: String },

    #[error("The characteristic {characteristic_id} is not available")]
    CharacteristicNotFound { characteristic_id: String },

    #[error("The adapter is not connected")]
    NotConnected,

    #[error("Writing to the peripheral failed: {message}")]
    WriteFailed { message: String },

    #[error("The bluetooth radio is not available: {message}")]
    RadioUnavailable { message: String },

    #[error("Timed out while {stage}")]
    TimedOut { stage: String },

    #[error("A connection attempt is in progress; disconnect first")]
    Busy,

    #[error("Failed to start the event runtime: {message}")]
    Runtime { message: String },
}

impl AdapterError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AdapterError::NotConfigured => ErrorKind::NotConfigured,
            AdapterError::DeviceNotFound { .. } => ErrorKind::DeviceNotFound,
            AdapterError::ConnectionFailed { .. } => ErrorKind::ConnectionFailed,
            AdapterError::CharacteristicNotFound { .. } => ErrorKind::CharacteristicNotFound,
            AdapterError::NotConnected => ErrorKind::NotConnected,
            AdapterError::WriteFailed { .. } => ErrorKind::WriteFailed,
            AdapterError::RadioUnavailable { .. } => ErrorKind::RadioUnavailable,
            AdapterError::TimedOut { .. } => ErrorKind::TimedOut,
            AdapterError::Busy => ErrorKind::Busy,
            AdapterError::Runtime { .. } => ErrorKind::Runtime,
        }
    }

    pub(crate) fn connection_failed<T: ToString>(message: T) -> Self {
        AdapterError::ConnectionFailed { message: message.to_string() }
    }

    /// Classifies a failed radio primitive.
    pub(crate) fn from_radio(err: RadioError) -> Self {
        if err.is_unavailable() {
            AdapterError::RadioUnavailable { message: err.to_string() }
        } else {
            AdapterError::connection_failed(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_have_stable_codes() {
        assert_eq!(AdapterError::NotConfigured.kind().code(), 1);
        assert_eq!(AdapterError::NotConnected.kind().code(), 5);
        assert_eq!(AdapterError::Runtime { message: String::new() }.kind().code(), 10);
    }

    #[test]
    fn permission_denied_is_unavailable() {
        assert!(RadioError::Btle { source: btleplug::Error::PermissionDenied }.is_unavailable());
        assert!(RadioError::NoAdapter.is_unavailable());
        assert!(!RadioError::NotConnected.is_unavailable());
    }

    #[test]
    fn powered_off_radio_is_unavailable() {
        let bluez = btleplug::Error::RuntimeError("org.bluez.Error.NotReady: Resource Not Ready".into());
        let err = AdapterError::from_radio(RadioError::from(bluez));
        assert_eq!(err.kind(), ErrorKind::RadioUnavailable);

        let other = btleplug::Error::RuntimeError("org.bluez.Error.Failed: Operation already in progress".into());
        assert_eq!(AdapterError::from_radio(RadioError::from(other)).kind(), ErrorKind::ConnectionFailed);
    }

    #[test]
    fn missing_config_file_is_detected() {
        let err = ConfigError::from(io::Error::new(io::ErrorKind::NotFound, "gone"));
        assert!(err.is_file_not_found_error());
        assert!(!ConfigError::NoConfigPath.is_file_not_found_error());
    }
}
