//! In-process stand-in for the DM API native component.
//!
//! Exports the full DM API symbol surface with C linkage and simulates the
//! background update service behind it: a connectable pipe, the update state
//! machine with a sequence counter, long-poll waits, and the post-update
//! handshake. Activation calls keep just enough state to answer the queries.
//!
//! Built as a `cdylib` it can be loaded like the real library; as an `rlib`,
//! [`symbol_table`] hands the exported addresses to a test without going
//! through the dynamic loader.
//!
//! All state is process-wide, like the real component. Tests that use it
//! should run serially and call [`reset`] first.

#![allow(non_snake_case)]

mod activation;
mod service;
mod state;

pub use state::{
    close_count, complete_download, connect_count, fail_download, fire_license_callback,
    free_count, is_connected, live_strings, reset, set_available_version, set_download_hold,
    set_drop_responses, set_pending_post_update_info, set_reject_callbacks, set_service_running,
    update_sequence,
};

use std::ffi::{c_char, c_void, CStr, CString};

pub use activation::*;
pub use service::*;

/// Every exported symbol and its address.
pub fn symbol_table() -> Vec<(&'static str, *const c_void)> {
    vec![
        ("DM_GetVersion", DM_GetVersion as *const c_void),
        ("DM_RestartAppIfNecessary", DM_RestartAppIfNecessary as *const c_void),
        ("DM_GetLastError", DM_GetLastError as *const c_void),
        ("DM_JsonToCanonical", DM_JsonToCanonical as *const c_void),
        ("DM_FreeString", DM_FreeString as *const c_void),
        ("DM_Connect", DM_Connect as *const c_void),
        ("DM_Close", DM_Close as *const c_void),
        ("DM_CheckForUpdates", DM_CheckForUpdates as *const c_void),
        ("DM_DownloadUpdate", DM_DownloadUpdate as *const c_void),
        ("DM_CancelUpdateDownload", DM_CancelUpdateDownload as *const c_void),
        ("DM_GetUpdateState", DM_GetUpdateState as *const c_void),
        ("DM_WaitForUpdateStateChange", DM_WaitForUpdateStateChange as *const c_void),
        ("DM_GetPostUpdateInfo", DM_GetPostUpdateInfo as *const c_void),
        ("DM_AckPostUpdateInfo", DM_AckPostUpdateInfo as *const c_void),
        ("DM_QuitAndInstall", DM_QuitAndInstall as *const c_void),
        ("SetProductData", SetProductData as *const c_void),
        ("SetProductId", SetProductId as *const c_void),
        ("SetDataDirectory", SetDataDirectory as *const c_void),
        ("SetDebugMode", SetDebugMode as *const c_void),
        ("SetCustomDeviceFingerprint", SetCustomDeviceFingerprint as *const c_void),
        ("SetLicenseKey", SetLicenseKey as *const c_void),
        ("SetActivationMetadata", SetActivationMetadata as *const c_void),
        ("SetLicenseCallback", SetLicenseCallback as *const c_void),
        ("ActivateLicense", ActivateLicense as *const c_void),
        ("ActivateLicenseOffline", ActivateLicenseOffline as *const c_void),
        (
            "GenerateOfflineDeactivationRequest",
            GenerateOfflineDeactivationRequest as *const c_void,
        ),
        ("GetLastActivationError", GetLastActivationError as *const c_void),
        ("IsLicenseGenuine", IsLicenseGenuine as *const c_void),
        ("IsLicenseValid", IsLicenseValid as *const c_void),
        (
            "GetServerSyncGracePeriodExpiryDate",
            GetServerSyncGracePeriodExpiryDate as *const c_void,
        ),
        ("GetActivationMode", GetActivationMode as *const c_void),
        ("GetLicenseKey", GetLicenseKey as *const c_void),
        ("GetLicenseExpiryDate", GetLicenseExpiryDate as *const c_void),
        ("GetLicenseCreationDate", GetLicenseCreationDate as *const c_void),
        ("GetLicenseActivationDate", GetLicenseActivationDate as *const c_void),
        ("GetActivationCreationDate", GetActivationCreationDate as *const c_void),
        ("GetActivationLastSyncedDate", GetActivationLastSyncedDate as *const c_void),
        ("GetActivationId", GetActivationId as *const c_void),
        ("GetLibraryVersion", GetLibraryVersion as *const c_void),
        ("Reset", Reset as *const c_void),
    ]
}

/// Hands `value` to the caller as a native-owned string.
fn into_owned_ptr(value: String) -> *mut c_char {
    let ptr = CString::new(value).unwrap_or_default().into_raw();
    state::track_alloc();
    ptr
}

/// Reads a caller-owned input string.
///
/// # Safety
/// `ptr` must be null or a valid NUL-terminated string.
unsafe fn read_arg(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
}

/// Copies `value` plus a terminator into `buf`. False when it does not fit.
///
/// # Safety
/// `buf` must be null or writable for `len` bytes.
unsafe fn write_buf(buf: *mut c_char, len: u32, value: &str) -> bool {
    let bytes = value.as_bytes();
    if buf.is_null() || bytes.len() + 1 > len as usize {
        return false;
    }
    unsafe {
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), buf.cast::<u8>(), bytes.len());
        *buf.add(bytes.len()) = 0;
    }
    true
}

/// Version of the stub. Static; callers must not free it.
#[unsafe(no_mangle)]
pub extern "C" fn DM_GetVersion() -> *const c_char {
    c"1.4.0-stub".as_ptr()
}

/// Releases a string returned by any `DM_*` or licensing call.
///
/// # Safety
/// `ptr` must be null or a string returned by this library and not yet freed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn DM_FreeString(ptr: *mut c_char) {
    if ptr.is_null() {
        return;
    }
    unsafe {
        drop(CString::from_raw(ptr));
    }
    state::track_free();
}

/// Last error message recorded by the stub.
#[unsafe(no_mangle)]
pub extern "C" fn DM_GetLastError() -> *mut c_char {
    into_owned_ptr(state::with(|s| s.last_error.clone()))
}

/// Always 0: the stub never asks the app to relaunch.
#[unsafe(no_mangle)]
pub extern "C" fn DM_RestartAppIfNecessary() -> i32 {
    0
}

/// Re-serializes `json` with sorted keys and no whitespace. Null on invalid
/// input.
///
/// # Safety
/// `json` must be null or a valid NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn DM_JsonToCanonical(json: *const c_char) -> *mut c_char {
    let Some(raw) = (unsafe { read_arg(json) }) else {
        return std::ptr::null_mut();
    };
    match serde_json::from_str::<serde_json::Value>(&raw) {
        Ok(value) => into_owned_ptr(value.to_string()),
        Err(e) => {
            state::with(|s| s.last_error = format!("invalid json: {e}"));
            std::ptr::null_mut()
        }
    }
}
