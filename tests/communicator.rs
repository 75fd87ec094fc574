use std::sync::Arc;
use ble_bridge::communicator::{connect_with_radio, Communicator, Params};
use ble_bridge::config::types::AdapterConfig;
use ble_bridge::device::types::CharacteristicProperties;
use ble_bridge::error::AdapterError;
use ble_bridge::sim::radio::{SimPeripheral, SimRadio, SimService};

fn radio() -> SimRadio {
    SimRadio::new(vec![SimPeripheral::new("54:81:2D:7E:CD:D2").with_service(
        SimService::new("service")
            .with_characteristic("0000ffe1-0000-1000-8000-00805f9b34fb", CharacteristicProperties {
                notify: true,
                write_without_response: true,
                ..Default::default()
            }),
    )])
}

fn config() -> AdapterConfig {
    AdapterConfig { scan_timeout_ms: 300, scan_poll_ms: 5, ..AdapterConfig::default() }
}

#[test]
fn connects_by_address_and_short_uuid() {
    let radio = radio();
    let params = Params {
        address: "54:81:2d:7e:cd:d2".into(),
        characteristic_ids: Some(vec!["FFE1".into()]),
        verbose: true,
    };

    let mut communicator = connect_with_radio(&params, config(), Arc::new(radio.clone())).unwrap();
    assert!(communicator.connected());

    assert_eq!(communicator.write(b"hello").unwrap(), 5);

    radio.notify("0000ffe1-0000-1000-8000-00805f9b34fb", b"abcdef");
    assert_eq!(communicator.read(Some(3)).unwrap(), b"abc".to_vec());

    communicator.close();
    assert!(!communicator.connected());
    assert_eq!(communicator.read(None), Err(AdapterError::NotConnected));
}

#[test]
fn missing_characteristic_ids_is_not_configured() {
    let params = Params { address: "54:81:2D:7E:CD:D2".into(), characteristic_ids: None, verbose: false };

    let result = connect_with_radio(&params, config(), Arc::new(radio()));
    assert_eq!(result.err(), Some(AdapterError::NotConfigured));
}
