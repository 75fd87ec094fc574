use std::sync::Arc;
use std::time::Duration;
use ble_bridge::device::types::Device;
use ble_bridge::error::ErrorKind;
use ble_bridge::scanner::Scanner;
use ble_bridge::sim::radio::{SimBehavior, SimPeripheral, SimRadio};

#[test]
fn lists_peripherals_in_range() {
    let radio = SimRadio::new(vec![
        SimPeripheral::new("54:81:2D:7E:CD:D2").with_local_name("HM-10"),
        SimPeripheral::new("74:1A:E0:21:75:CA"),
    ]);
    let scanner = Scanner::with_radio(false, Arc::new(radio.clone())).unwrap();

    let devices = scanner.scan(Duration::from_millis(20)).unwrap();
    assert_eq!(devices, vec![
        Device { name: "HM-10".into(), address: "54:81:2D:7E:CD:D2".into() },
        Device { name: String::new(), address: "74:1A:E0:21:75:CA".into() },
    ]);
    assert!(!radio.is_scanning());
}

#[test]
fn empty_neighbourhood_is_not_an_error() {
    let scanner = Scanner::with_radio(true, Arc::new(SimRadio::new(vec![]))).unwrap();
    assert_eq!(scanner.scan(Duration::from_millis(5)), Ok(vec![]));
}

#[test]
fn unavailable_radio_is_reported() {
    let radio = SimRadio::new(vec![SimPeripheral::new("AA:BB")])
        .with_behavior(SimBehavior { radio_unavailable: true, ..Default::default() });
    let scanner = Scanner::with_radio(false, Arc::new(radio)).unwrap();

    let err = scanner.scan(Duration::from_millis(5)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RadioUnavailable);
}
