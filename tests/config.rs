use std::env;
use std::fs;
use ble_bridge::config::io::{ConfigFile, CONFIG_PATH_ENV};
use ble_bridge::config::types::AdapterConfig;

#[test]
fn saved_config_is_read_back() {
    let dir = tempfile::tempdir().unwrap();
    let file = ConfigFile::at(dir.path().join("nested").join("ble-bridge.json"));

    let config = AdapterConfig { scan_timeout_ms: 1234, inbound_capacity: Some(8), ..AdapterConfig::default() };
    file.save(&config).unwrap();

    assert!(fs::read_to_string(file.path()).unwrap().contains("\"scanTimeoutMs\": 1234"));
    assert_eq!(file.read().unwrap(), config);
}

#[test]
fn empty_file_yields_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.json");
    fs::write(&path, "").unwrap();

    assert_eq!(ConfigFile::at(path).read().unwrap(), AdapterConfig::default());
}

#[test]
fn environment_variable_names_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("from-env.json");
    fs::write(&path, r#"{"connectTimeoutMs": 50}"#).unwrap();

    env::set_var(CONFIG_PATH_ENV, &path);
    let file = ConfigFile::locate(None).unwrap();
    env::remove_var(CONFIG_PATH_ENV);

    assert_eq!(file.path(), path.as_path());
    assert_eq!(file.read().unwrap().connect_timeout_ms, 50);
}
