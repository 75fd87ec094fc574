//! C interface of the adapter.
//!
//! Strings and byte buffers passed in are owned by the caller and copied. Pointers handed out are
//! owned by the handle: a `readMessage` result stays valid until the next `readMessage` on the
//! same handle, and likewise for `lastRead`, `getPeripheralID` and `lastErrorMessage`. A null
//! handle is tolerated by every function.

use std::ffi::{c_char, c_int, CStr, CString};
use std::ptr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use log::{debug, error};

use crate::adapter::Adapter;
use crate::init_logging;
use crate::error::AdapterError;

pub struct AdapterHandle {
    adapter: Adapter,
    slots: Mutex<Slots>,
}

#[derive(Default)]
struct Slots {
    peripheral_id: CString,
    read: Vec<u8>,
    last: Vec<u8>,
    // failure of the most recent fallible call; `None` after a successful one
    error: Option<AdapterError>,
    error_message: CString,
}

impl AdapterHandle {
    fn slots(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record<T>(&self, result: Result<T, AdapterError>) -> Option<T> {
        let mut slots = self.slots();
        match result {
            Ok(value) => {
                slots.error = None;
                Some(value)
            },
            Err(err) => {
                slots.error = Some(err);
                None
            },
        }
    }

    fn error(&self) -> Option<AdapterError> {
        let recorded = self.slots().error.clone();
        recorded.or_else(|| self.adapter.last_error())
    }
}

/// Moves an adapter behind a handle for use through this interface. Release with `destroyAdapter`.
pub fn into_handle(adapter: Adapter) -> *mut AdapterHandle {
    Box::into_raw(Box::new(AdapterHandle { adapter, slots: Mutex::new(Slots::default()) }))
}

fn to_c_string(value: &str) -> CString {
    CString::new(value.replace('\0', "")).unwrap_or_default()
}

unsafe fn string_from_c<'a>(value: *const c_char) -> Option<std::borrow::Cow<'a, str>> {
    if value.is_null() {
        return None;
    }
    Some(CStr::from_ptr(value).to_string_lossy())
}

unsafe fn write_len(len: *mut usize, value: usize) {
    if let Some(len) = len.as_mut() {
        *len = value;
    }
}

/// Installs the stderr (and `LOG_FILE`) logger on first use, at debug level when `verbose`. A
/// logger installed earlier, by the host or a previous call, is kept.
fn install_logging(verbose: bool) {
    if let Err(err) = init_logging(verbose) {
        debug!("Keeping the installed logger: {}", err);
    }
}

/// Returns NULL when the event runtime cannot be started.
#[export_name = "createAdapter"]
pub extern "C" fn create_adapter(verbose: bool) -> *mut AdapterHandle {
    install_logging(verbose);

    match Adapter::new(verbose) {
        Ok(adapter) => into_handle(adapter),
        Err(err) => {
            error!("Failed to create adapter: {}", err);
            ptr::null_mut()
        },
    }
}

/// Disconnects and frees the adapter.
///
/// # Safety
/// `handle` must come from `createAdapter` (or `into_handle`) and must not be used afterwards.
#[export_name = "destroyAdapter"]
pub unsafe extern "C" fn destroy_adapter(handle: *mut AdapterHandle) {
    if !handle.is_null() {
        drop(Box::from_raw(handle));
    }
}

/// # Safety
/// `handle` must be null or a live handle; `id` must be null or a NUL-terminated string.
#[export_name = "setPeripheralID"]
pub unsafe extern "C" fn set_peripheral_id(handle: *mut AdapterHandle, id: *const c_char) -> bool {
    let Some(handle) = handle.as_ref() else { return false };
    let id = string_from_c(id).unwrap_or_default();
    handle.record(handle.adapter.set_peripheral_id(&id)).is_some()
}

/// # Safety
/// `handle` must be null or a live handle; `ids` must point to `count` NUL-terminated strings.
/// Null entries are skipped.
#[export_name = "setCharacteristicIDs"]
pub unsafe extern "C" fn set_characteristic_ids(handle: *mut AdapterHandle, ids: *const *const c_char, count: c_int) -> bool {
    let Some(handle) = handle.as_ref() else { return false };

    let mut collected = Vec::new();
    if !ids.is_null() {
        for index in 0..usize::try_from(count).unwrap_or(0) {
            if let Some(id) = string_from_c(*ids.add(index)) {
                collected.push(id.into_owned());
            }
        }
    }

    handle.record(handle.adapter.set_characteristic_ids(&collected)).is_some()
}

/// Blocks until the adapter is ready (true) or the attempt failed (false).
///
/// # Safety
/// `handle` must be null or a live handle.
#[export_name = "_connect"]
pub unsafe extern "C" fn connect(handle: *mut AdapterHandle) -> bool {
    let Some(handle) = handle.as_ref() else { return false };
    handle.record(handle.adapter.connect()).is_some()
}

/// # Safety
/// `handle` must be null or a live handle.
#[export_name = "_disconnect"]
pub unsafe extern "C" fn disconnect(handle: *mut AdapterHandle) {
    if let Some(handle) = handle.as_ref() {
        handle.adapter.disconnect();
    }
}

/// Empty string when unset, NULL for a null handle.
///
/// # Safety
/// `handle` must be null or a live handle.
#[export_name = "getPeripheralID"]
pub unsafe extern "C" fn get_peripheral_id(handle: *mut AdapterHandle) -> *const c_char {
    let Some(handle) = handle.as_ref() else { return ptr::null() };
    let id = to_c_string(&handle.adapter.peripheral_id());

    let mut slots = handle.slots();
    slots.peripheral_id = id;
    slots.peripheral_id.as_ptr()
}

/// # Safety
/// `handle` must be null or a live handle.
#[export_name = "running"]
pub unsafe extern "C" fn running(handle: *mut AdapterHandle) -> bool {
    handle.as_ref().map_or(false, |handle| handle.adapter.running())
}

/// # Safety
/// `handle` must be null or a live handle.
#[export_name = "connected"]
pub unsafe extern "C" fn connected(handle: *mut AdapterHandle) -> bool {
    handle.as_ref().map_or(false, |handle| handle.adapter.connected())
}

/// True once the write was submitted.
///
/// # Safety
/// `handle` must be null or a live handle; `data` must point to `len` readable bytes.
#[export_name = "sendMessage"]
pub unsafe extern "C" fn send_message(handle: *mut AdapterHandle, data: *const u8, len: usize) -> bool {
    let Some(handle) = handle.as_ref() else { return false };

    let payload: &[u8] = if len == 0 {
        &[]
    } else if data.is_null() {
        return false;
    } else {
        std::slice::from_raw_parts(data, len)
    };

    handle.record(handle.adapter.send_message(payload)).is_some()
}

/// Blocks for the next message. Returns NULL (and a zero `len`) once the adapter is disconnected
/// and no messages are left.
///
/// # Safety
/// `handle` must be null or a live handle; `len` must be null or writable.
#[export_name = "readMessage"]
pub unsafe extern "C" fn read_message(handle: *mut AdapterHandle, len: *mut usize) -> *const u8 {
    write_len(len, 0);
    let Some(handle) = handle.as_ref() else { return ptr::null() };

    let Some(payload) = handle.record(handle.adapter.read_message()) else { return ptr::null() };

    let mut slots = handle.slots();
    slots.read = payload;
    write_len(len, slots.read.len());
    slots.read.as_ptr()
}

/// The most recently received message, NULL if none arrived yet.
///
/// # Safety
/// `handle` must be null or a live handle; `len` must be null or writable.
#[export_name = "lastRead"]
pub unsafe extern "C" fn last_read(handle: *mut AdapterHandle, len: *mut usize) -> *const u8 {
    write_len(len, 0);
    let Some(handle) = handle.as_ref() else { return ptr::null() };
    let Some(payload) = handle.adapter.last_read() else { return ptr::null() };

    let mut slots = handle.slots();
    slots.last = payload;
    write_len(len, slots.last.len());
    slots.last.as_ptr()
}

/// `0` when the last call succeeded and the adapter holds no error, otherwise an `ErrorKind` code.
///
/// # Safety
/// `handle` must be null or a live handle.
#[export_name = "lastErrorKind"]
pub unsafe extern "C" fn last_error_kind(handle: *mut AdapterHandle) -> c_int {
    handle.as_ref()
        .and_then(|handle| handle.error())
        .map_or(0, |err| err.kind().code())
}

/// # Safety
/// `handle` must be null or a live handle.
#[export_name = "lastErrorMessage"]
pub unsafe extern "C" fn last_error_message(handle: *mut AdapterHandle) -> *const c_char {
    let Some(handle) = handle.as_ref() else { return ptr::null() };
    let Some(err) = handle.error() else { return ptr::null() };
    let message = to_c_string(&err.to_string());

    let mut slots = handle.slots();
    slots.error_message = message;
    slots.error_message.as_ptr()
}
