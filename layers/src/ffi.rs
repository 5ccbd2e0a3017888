//! C-ABI Entry Points
//!
//! A minimal embedding surface: create a station from a YAML configuration
//! file, run it, request a stop, fetch the equalized constellation window,
//! and destroy it. All functions are safe to call from C; `station_start`
//! blocks until the run finishes.

use crate::config::StationConfig;
use crate::station::Station;
use std::ffi::{c_char, c_float, c_int, CStr};
use tracing::error;

/// Create a station from a YAML configuration file. Returns null on any
/// configuration error.
///
/// # Safety
/// `config_path` must be a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn station_new(config_path: *const c_char) -> *mut Station {
    if config_path.is_null() {
        return std::ptr::null_mut();
    }
    let Ok(path) = CStr::from_ptr(config_path).to_str() else {
        return std::ptr::null_mut();
    };
    let cfg = match StationConfig::from_yaml_file(path) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("station_new: {}", e);
            return std::ptr::null_mut();
        }
    };
    match Station::new(cfg) {
        Ok(station) => Box::into_raw(Box::new(station)),
        Err(e) => {
            error!("station_new: {}", e);
            std::ptr::null_mut()
        }
    }
}

/// Run the station to completion. Returns 0 on success.
///
/// # Safety
/// `station` must be a pointer returned by [`station_new`].
#[no_mangle]
pub unsafe extern "C" fn station_start(station: *mut Station) -> c_int {
    let Some(station) = station.as_mut() else {
        return -1;
    };
    match station.start() {
        Ok(()) => 0,
        Err(e) => {
            error!("station_start: {}", e);
            -1
        }
    }
}

/// Request a cooperative stop.
///
/// # Safety
/// `station` must be a pointer returned by [`station_new`].
#[no_mangle]
pub unsafe extern "C" fn station_stop(station: *mut Station) {
    if let Some(station) = station.as_ref() {
        station.stop();
    }
}

/// Copy the equalized constellation of the most recent frame into `out`
/// (at most `max_len` floats, interleaved re/im). Returns the number of
/// floats written, or -1 on a null pointer.
///
/// # Safety
/// `station` must be a pointer returned by [`station_new`]; `out` must
/// point to at least `max_len` floats.
#[no_mangle]
pub unsafe extern "C" fn station_get_equal_data(
    station: *mut Station,
    out: *mut c_float,
    max_len: c_int,
) -> c_int {
    let Some(station) = station.as_ref() else {
        return -1;
    };
    if out.is_null() || max_len < 0 {
        return -1;
    }
    let data = station.equal_data();
    let n = data.len().min(max_len as usize);
    std::ptr::copy_nonoverlapping(data.as_ptr(), out, n);
    n as c_int
}

/// Destroy a station created by [`station_new`].
///
/// # Safety
/// `station` must be a pointer returned by [`station_new`], not yet
/// destroyed; it is invalid afterwards.
#[no_mangle]
pub unsafe extern "C" fn station_destroy(station: *mut Station) {
    if !station.is_null() {
        drop(Box::from_raw(station));
    }
}
