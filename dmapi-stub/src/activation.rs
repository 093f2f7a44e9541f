//! Activation and licensing exports.
//!
//! Status calls return 0 on success. Failures also record the activation
//! error code read back through `GetLastActivationError`.

use crate::state::{self, LicenseCallback, StubState};
use crate::{read_arg, write_buf};
use serde_json::json;
use std::ffi::c_char;

const ERR_FAIL: u32 = 1;
const ERR_INVALID_PARAMETER: u32 = 2;
const ERR_APPID_NOT_SET: u32 = 3;
const ERR_LICENSE_KEY_NOT_SET: u32 = 4;
const ERR_NOT_ACTIVATED: u32 = 5;
const ERR_FILE_IO: u32 = 8;
const ERR_BUFFER_TOO_SMALL: u32 = 10;

/// Fixed dates reported once activated (Unix seconds).
const LICENSE_CREATED: u32 = 1_700_000_000;
const LICENSE_ACTIVATED: u32 = 1_700_086_400;
const LICENSE_EXPIRES: u32 = 1_800_000_000;
const GRACE_PERIOD_ENDS: u32 = 1_700_691_200;

fn fail(s: &mut StubState, code: u32) -> i32 {
    s.last_activation_error = code;
    1
}

fn succeed(s: &mut StubState) -> i32 {
    s.last_activation_error = 0;
    0
}

/// Stores a string setting; null input is an invalid parameter.
///
/// # Safety
/// `value` must be null or a valid NUL-terminated string.
unsafe fn set_string(value: *const c_char, apply: impl FnOnce(&mut StubState, String)) -> i32 {
    let value = unsafe { read_arg(value) };
    state::with(|s| match value {
        Some(v) => {
            apply(s, v);
            succeed(s)
        }
        None => fail(s, ERR_INVALID_PARAMETER),
    })
}

fn activation_id(s: &StubState) -> String {
    format!(
        "act-{}-{}",
        s.product_id.as_deref().unwrap_or("unknown"),
        s.license_key.as_deref().unwrap_or("none").len()
    )
}

/// # Safety
/// `data` must be null or a valid NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn SetProductData(data: *const c_char) -> i32 {
    unsafe { set_string(data, |s, v| s.product_data = Some(v)) }
}

/// # Safety
/// `id` must be null or a valid NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn SetProductId(id: *const c_char) -> i32 {
    unsafe {
        set_string(id, |s, v| {
            s.product_id = (!v.is_empty()).then_some(v);
        })
    }
}

/// # Safety
/// `dir` must be null or a valid NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn SetDataDirectory(dir: *const c_char) -> i32 {
    unsafe { set_string(dir, |s, v| s.data_directory = Some(v)) }
}

#[unsafe(no_mangle)]
pub extern "C" fn SetDebugMode(enable: u32) -> i32 {
    state::with(|s| {
        s.debug = enable != 0;
        succeed(s)
    })
}

/// # Safety
/// `fingerprint` must be null or a valid NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn SetCustomDeviceFingerprint(fingerprint: *const c_char) -> i32 {
    unsafe { set_string(fingerprint, |s, v| s.fingerprint = Some(v)) }
}

/// # Safety
/// `key` must be null or a valid NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn SetLicenseKey(key: *const c_char) -> i32 {
    unsafe {
        set_string(key, |s, v| {
            s.license_key = (!v.is_empty()).then_some(v);
        })
    }
}

/// # Safety
/// `key` and `value` must each be null or a valid NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn SetActivationMetadata(key: *const c_char, value: *const c_char) -> i32 {
    let key = unsafe { read_arg(key) };
    let value = unsafe { read_arg(value) };
    state::with(|s| match (key, value) {
        (Some(k), Some(v)) if !k.is_empty() => {
            s.metadata.insert(k, json!(v));
            succeed(s)
        }
        _ => fail(s, ERR_INVALID_PARAMETER),
    })
}

/// Stores `callback`; the stub invokes it from `fire_license_callback`.
#[unsafe(no_mangle)]
pub extern "C" fn SetLicenseCallback(callback: LicenseCallback) -> i32 {
    state::with(|s| {
        if s.reject_callbacks {
            return fail(s, ERR_FAIL);
        }
        s.callback = Some(callback);
        succeed(s)
    })
}

/// Activates with the configured product id and license key. The key
/// `invalid` is refused.
#[unsafe(no_mangle)]
pub extern "C" fn ActivateLicense() -> i32 {
    state::with(|s| {
        if s.product_id.is_none() {
            return fail(s, ERR_APPID_NOT_SET);
        }
        match s.license_key.as_deref() {
            None => fail(s, ERR_LICENSE_KEY_NOT_SET),
            Some("invalid") => fail(s, ERR_FAIL),
            Some(_) => {
                s.activated = true;
                s.activation_mode = "online";
                succeed(s)
            }
        }
    })
}

/// Activates from a non-empty response file.
///
/// # Safety
/// `path` must be null or a valid NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ActivateLicenseOffline(path: *const c_char) -> i32 {
    let Some(path) = (unsafe { read_arg(path) }) else {
        return state::with(|s| fail(s, ERR_INVALID_PARAMETER));
    };
    let contents = std::fs::read_to_string(&path).unwrap_or_default();
    state::with(|s| {
        if s.product_id.is_none() {
            return fail(s, ERR_APPID_NOT_SET);
        }
        if contents.trim().is_empty() {
            return fail(s, ERR_FILE_IO);
        }
        s.activated = true;
        s.activation_mode = "offline";
        succeed(s)
    })
}

/// Writes a deactivation request for the current activation to `path`.
///
/// # Safety
/// `path` must be null or a valid NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn GenerateOfflineDeactivationRequest(path: *const c_char) -> i32 {
    let Some(path) = (unsafe { read_arg(path) }) else {
        return state::with(|s| fail(s, ERR_INVALID_PARAMETER));
    };
    let request = state::with(|s| {
        if !s.activated {
            fail(s, ERR_NOT_ACTIVATED);
            return None;
        }
        Some(json!({
            "product_id": s.product_id,
            "activation_id": activation_id(s),
        }))
    });
    let Some(request) = request else {
        return 1;
    };
    match std::fs::write(&path, request.to_string()) {
        Ok(()) => state::with(succeed),
        Err(_) => state::with(|s| fail(s, ERR_FILE_IO)),
    }
}

/// # Safety
/// `code` must be null or writable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn GetLastActivationError(code: *mut u32) -> i32 {
    if code.is_null() {
        return 1;
    }
    let value = state::with(|s| s.last_activation_error);
    unsafe { *code = value };
    0
}

fn licensed() -> i32 {
    state::with(|s| if s.activated { 0 } else { fail(s, ERR_NOT_ACTIVATED) })
}

#[unsafe(no_mangle)]
pub extern "C" fn IsLicenseGenuine() -> i32 {
    licensed()
}

#[unsafe(no_mangle)]
pub extern "C" fn IsLicenseValid() -> i32 {
    licensed()
}

/// Writes `value` through `out` when activated.
///
/// # Safety
/// `out` must be null or writable.
unsafe fn date_out(out: *mut u32, value: u32) -> i32 {
    if out.is_null() {
        return state::with(|s| fail(s, ERR_INVALID_PARAMETER));
    }
    if licensed() != 0 {
        return 1;
    }
    unsafe { *out = value };
    0
}

/// # Safety
/// `out` must be null or writable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn GetServerSyncGracePeriodExpiryDate(out: *mut u32) -> i32 {
    unsafe { date_out(out, GRACE_PERIOD_ENDS) }
}

/// # Safety
/// `out` must be null or writable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn GetLicenseExpiryDate(out: *mut u32) -> i32 {
    unsafe { date_out(out, LICENSE_EXPIRES) }
}

/// # Safety
/// `out` must be null or writable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn GetLicenseCreationDate(out: *mut u32) -> i32 {
    unsafe { date_out(out, LICENSE_CREATED) }
}

/// # Safety
/// `out` must be null or writable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn GetLicenseActivationDate(out: *mut u32) -> i32 {
    unsafe { date_out(out, LICENSE_ACTIVATED) }
}

/// # Safety
/// `out` must be null or writable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn GetActivationCreationDate(out: *mut u32) -> i32 {
    unsafe { date_out(out, LICENSE_ACTIVATED) }
}

/// Never synced: always 0 once activated.
///
/// # Safety
/// `out` must be null or writable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn GetActivationLastSyncedDate(out: *mut u32) -> i32 {
    unsafe { date_out(out, 0) }
}

/// # Safety
/// `initial` and `current` must each be null or writable for their lengths.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn GetActivationMode(
    initial: *mut c_char,
    initial_len: u32,
    current: *mut c_char,
    current_len: u32,
) -> i32 {
    if licensed() != 0 {
        return 1;
    }
    let mode = state::with(|s| s.activation_mode);
    let written = unsafe {
        write_buf(initial, initial_len, mode) && write_buf(current, current_len, mode)
    };
    if written { 0 } else { state::with(|s| fail(s, ERR_BUFFER_TOO_SMALL)) }
}

/// # Safety
/// `buf` must be null or writable for `len` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn GetLicenseKey(buf: *mut c_char, len: u32) -> i32 {
    let Some(key) = state::with(|s| s.license_key.clone()) else {
        return state::with(|s| fail(s, ERR_LICENSE_KEY_NOT_SET));
    };
    if unsafe { write_buf(buf, len, &key) } {
        0
    } else {
        state::with(|s| fail(s, ERR_BUFFER_TOO_SMALL))
    }
}

/// # Safety
/// `buf` must be null or writable for `len` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn GetActivationId(buf: *mut c_char, len: u32) -> i32 {
    if licensed() != 0 {
        return 1;
    }
    let id = state::with(|s| activation_id(s));
    if unsafe { write_buf(buf, len, &id) } {
        0
    } else {
        state::with(|s| fail(s, ERR_BUFFER_TOO_SMALL))
    }
}

/// Version of the licensing library. Static; callers must not free it.
#[unsafe(no_mangle)]
pub extern "C" fn GetLibraryVersion() -> *const c_char {
    c"3.2.0-stub".as_ptr()
}

/// Clears activation state. The registered callback and service state are
/// kept.
#[unsafe(no_mangle)]
pub extern "C" fn Reset() -> i32 {
    state::with(|s| {
        s.product_data = None;
        s.product_id = None;
        s.data_directory = None;
        s.fingerprint = None;
        s.license_key = None;
        s.metadata.clear();
        s.activated = false;
        s.activation_mode = "online";
        succeed(s)
    })
}
