use std::ffi::{c_char, CStr, CString};
use std::ptr;
use std::slice;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use ble_bridge::Adapter;
use ble_bridge::config::types::AdapterConfig;
use ble_bridge::device::types::CharacteristicProperties;
use ble_bridge::error::ErrorKind;
use ble_bridge::ffi::{
    connect, connected, create_adapter, destroy_adapter, disconnect, get_peripheral_id, into_handle, last_error_kind,
    last_error_message, last_read, read_message, running, send_message, set_characteristic_ids, set_peripheral_id,
    AdapterHandle,
};
use ble_bridge::sim::radio::{SimPeripheral, SimRadio, SimService};

fn sim_handle(radio: &SimRadio) -> *mut AdapterHandle {
    let config = AdapterConfig {
        scan_timeout_ms: 300,
        scan_poll_ms: 5,
        supervision_interval_ms: 20,
        ..AdapterConfig::default()
    };
    into_handle(Adapter::with_radio(false, config, Arc::new(radio.clone())).unwrap())
}

fn radio() -> SimRadio {
    SimRadio::new(vec![SimPeripheral::new("AA:BB").with_service(
        SimService::new("service")
            .with_characteristic("notify-uuid", CharacteristicProperties { notify: true, ..Default::default() })
            .with_characteristic("write-uuid", CharacteristicProperties { write: true, ..Default::default() }),
    )])
}

unsafe fn configure(handle: *mut AdapterHandle, peripheral: &str) {
    let id = CString::new(peripheral).unwrap();
    assert!(set_peripheral_id(handle, id.as_ptr()));

    let ids = [CString::new("notify-uuid").unwrap(), CString::new("write-uuid").unwrap()];
    let pointers: Vec<*const c_char> = ids.iter().map(|id| id.as_ptr()).collect();
    assert!(set_characteristic_ids(handle, pointers.as_ptr(), pointers.len() as i32));
}

#[test]
fn null_handle_is_tolerated() {
    unsafe {
        let mut len = 7usize;
        assert!(!connect(ptr::null_mut()));
        disconnect(ptr::null_mut());
        assert!(!running(ptr::null_mut()));
        assert!(!connected(ptr::null_mut()));
        assert!(!send_message(ptr::null_mut(), [1u8].as_ptr(), 1));
        assert!(read_message(ptr::null_mut(), &mut len).is_null());
        assert_eq!(len, 0);
        assert!(last_read(ptr::null_mut(), ptr::null_mut()).is_null());
        assert!(get_peripheral_id(ptr::null_mut()).is_null());
        assert_eq!(last_error_kind(ptr::null_mut()), 0);
        assert!(last_error_message(ptr::null_mut()).is_null());
        destroy_adapter(ptr::null_mut());
    }
}

#[test]
fn connect_send_and_read_through_c_interface() {
    let radio = radio();
    let handle = sim_handle(&radio);

    unsafe {
        configure(handle, "AA:BB");
        assert_eq!(CStr::from_ptr(get_peripheral_id(handle)).to_str().unwrap(), "AA:BB");

        assert!(connect(handle));
        assert!(connected(handle));
        assert!(running(handle));
        assert_eq!(last_error_kind(handle), 0);

        assert!(send_message(handle, [5u8, 6].as_ptr(), 2));
        let deadline = Instant::now() + Duration::from_secs(5);
        while radio.writes().is_empty() {
            assert!(Instant::now() < deadline);
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(radio.writes()[0].1, vec![5, 6]);

        radio.notify("notify-uuid", &[1, 2]);
        let mut len = 0usize;
        let data = read_message(handle, &mut len);
        assert!(!data.is_null());
        assert_eq!(slice::from_raw_parts(data, len), &[1, 2]);

        let data = last_read(handle, &mut len);
        assert_eq!(slice::from_raw_parts(data, len), &[1, 2]);

        disconnect(handle);
        assert!(!connected(handle));
        assert!(read_message(handle, &mut len).is_null());
        assert_eq!(last_error_kind(handle), ErrorKind::NotConnected.code());

        destroy_adapter(handle);
    }
}

#[test]
fn failed_connect_reports_kind_and_message() {
    let radio = radio();
    let handle = sim_handle(&radio);

    unsafe {
        configure(handle, "CC:DD");
        assert!(!connect(handle));
        assert_eq!(last_error_kind(handle), ErrorKind::DeviceNotFound.code());

        let message = CStr::from_ptr(last_error_message(handle)).to_string_lossy().into_owned();
        assert!(message.contains("CC:DD"), "{}", message);

        assert!(!send_message(handle, [1u8].as_ptr(), 1));
        assert_eq!(last_error_kind(handle), ErrorKind::NotConnected.code());
        assert!(radio.writes().is_empty());

        destroy_adapter(handle);
    }
}

#[test]
fn create_adapter_installs_logger() {
    let handle = create_adapter(true);
    assert!(!handle.is_null());
    assert_eq!(log::max_level(), log::LevelFilter::Debug);

    // a second adapter keeps the logger in place
    let second = create_adapter(false);
    assert!(!second.is_null());
    assert_eq!(log::max_level(), log::LevelFilter::Debug);

    unsafe {
        assert!(!running(handle));
        destroy_adapter(second);
        destroy_adapter(handle);
    }
}
