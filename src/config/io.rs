use std::env::{self, current_exe};
use std::fs;
use std::path::{Path, PathBuf};
use std::str;
use directories_next::ProjectDirs;
use log::{debug, info, warn};
use serde_json;

use crate::config::types::AdapterConfig;
use crate::error::ConfigError;

/// Environment variable naming the config file, checked after an explicit path.
pub const CONFIG_PATH_ENV: &str = "BLE_BRIDGE_CONFIG";

// creates a path to <exe name>.json in the same directory as the executable
// this could be useful for usb sticks
fn get_portable_config_path() -> Option<PathBuf> {
    match current_exe() {
        Ok(mut path) => {
            // F:\ble-bridge.exe => F:\ble-bridge.json
            if !path.set_extension("json") {
                warn!("current exe has no filename: {}", path.to_string_lossy());
                return None
            }

            Some(path)
        },
        Err(err) => {
            warn!("failed to get current exe path: {:?}", err);
            None
        },
    }
}

// creates a path to ble-bridge.json in an os dependent standard directory, such as %AppData% on
// windows.
fn get_local_config_path() -> Option<PathBuf> {
    ProjectDirs::from("org", "ble-bridge", "ble-bridge").map(|dirs| {
        dirs.config_dir().join("ble-bridge.json")
    })
}

fn get_config_path(explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }

    if let Some(path) = env::var_os(CONFIG_PATH_ENV).filter(|path| !path.is_empty()) {
        return Ok(PathBuf::from(path));
    }

    if let Some(path) = get_portable_config_path() {
        match fs::metadata(&path) {
            Ok(attr) => {
                if attr.is_file() {
                    return Ok(path);
                }
            },
            Err(err) => {
                debug!("Could not read metadata of: {}; Using local path instead. ({:?})", path.to_string_lossy(), err);
            },
        }
    }

    match get_local_config_path() {
        None => Err(ConfigError::NoConfigPath),
        Some(path) => Ok(path),
    }
}

/// The JSON file holding an `AdapterConfig`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigFile {
    path: PathBuf,
}

impl ConfigFile {
    pub fn at<P: Into<PathBuf>>(path: P) -> Self {
        ConfigFile { path: path.into() }
    }

    /// Resolves, in order: `explicit`, `BLE_BRIDGE_CONFIG`, a portable `<exe>.json` next to the
    /// executable (only if it exists), the per-user config directory.
    pub fn locate(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = get_config_path(explicit)?;
        info!("Using config file {}", path.to_string_lossy());
        Ok(ConfigFile { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing or empty file yields the defaults.
    pub fn read(&self) -> Result<AdapterConfig, ConfigError> {
        debug!("Reading config file");

        let content = match fs::read(&self.path) {
            Ok(content) => content,
            Err(source) => {
                let err = ConfigError::from(source);
                if err.is_file_not_found_error() {
                    return Ok(AdapterConfig::default());
                }
                return Err(err);
            },
        };

        if content.is_empty() {
            return Ok(AdapterConfig::default());
        }

        let content = str::from_utf8(&content)?;
        Ok(serde_json::from_str(content)?)
    }

    pub fn save(&self, config: &AdapterConfig) -> Result<(), ConfigError> {
        debug!("Saving config");

        if let Some(directory) = self.path.parent().filter(|directory| !directory.as_os_str().is_empty()) {
            fs::create_dir_all(directory)?;
        }

        let content = serde_json::to_string_pretty(config)?;
        fs::write(&self.path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_path_wins() {
        let file = ConfigFile::locate(Some(Path::new("/tmp/explicit.json"))).unwrap();
        assert_eq!(file.path(), Path::new("/tmp/explicit.json"));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let file = ConfigFile::at(dir.path().join("absent.json"));

        assert_eq!(file.read().unwrap(), AdapterConfig::default());
    }

    #[test]
    fn invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();

        let err = ConfigFile::at(path).read().unwrap_err();
        assert!(matches!(err, ConfigError::JsonError { .. }));
        assert!(!err.is_file_not_found_error());
    }
}
