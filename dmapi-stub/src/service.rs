//! Session channel and update service exports.

use crate::state::{self, StubState};
use crate::{into_owned_ptr, read_arg};
use serde_json::{json, Value};
use std::ffi::c_char;
use std::time::Duration;

fn ok(data: Option<Value>) -> String {
    match data {
        Some(data) => json!({ "status": "ok", "data": data }).to_string(),
        None => json!({ "status": "ok" }).to_string(),
    }
}

fn err(message: &str) -> String {
    json!({ "status": "error", "error": message }).to_string()
}

/// Runs `f` when a channel is open and returns its response as an owned
/// string. Null when no channel is open or responses are being dropped.
fn respond(f: impl FnOnce(&mut StubState) -> String) -> *mut c_char {
    let response = state::with(|s| {
        if !s.connected || s.drop_responses {
            return None;
        }
        Some(f(s))
    });
    match response {
        Some(body) => into_owned_ptr(body),
        None => std::ptr::null_mut(),
    }
}

/// Parses the request payload; the native side rejects anything but an
/// object.
///
/// # Safety
/// `options` must be null or a valid NUL-terminated string.
unsafe fn parse_options(options: *const c_char) -> Result<Value, String> {
    let raw = unsafe { read_arg(options) }.ok_or("options payload is null")?;
    match serde_json::from_str::<Value>(&raw) {
        Ok(v @ Value::Object(_)) => Ok(v),
        Ok(_) => Err("options payload is not an object".into()),
        Err(e) => Err(format!("invalid options payload: {e}")),
    }
}

/// Connects to the service pipe. 0 on success.
///
/// # Safety
/// `pipe` must be null or a valid NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn DM_Connect(pipe: *const c_char, _timeout_ms: u32) -> i32 {
    let pipe = unsafe { read_arg(pipe) }.unwrap_or_default();
    state::with(|s| {
        if pipe.is_empty() || !s.running {
            s.last_error = format!("cannot connect to pipe '{pipe}'");
            return 1;
        }
        s.connected = true;
        state::count_connect();
        0
    })
}

/// Closes the service pipe. 0 on success.
#[unsafe(no_mangle)]
pub extern "C" fn DM_Close() -> i32 {
    state::count_close();
    state::with(|s| s.connected = false);
    0
}

/// Starts an update check; the simulated check resolves immediately.
///
/// # Safety
/// `options` must be null or a valid NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn DM_CheckForUpdates(options: *const c_char) -> *mut c_char {
    let options = unsafe { parse_options(options) };
    respond(|s| {
        if let Err(e) = options {
            return err(&e);
        }
        if matches!(s.update.state, "checking" | "downloading" | "installing") {
            return err("update operation already in progress");
        }
        s.update.error = None;
        s.update.progress = None;
        s.transition("checking");
        match s.available_version.clone() {
            Some(version) => {
                s.update.version = Some(version);
                s.transition("available");
            }
            None => {
                s.update.version = None;
                s.transition("up_to_date");
            }
        }
        ok(Some(s.update.snapshot()))
    })
}

/// Starts downloading the available update.
///
/// # Safety
/// `options` must be null or a valid NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn DM_DownloadUpdate(options: *const c_char) -> *mut c_char {
    let options = unsafe { parse_options(options) };
    respond(|s| {
        if let Err(e) = options {
            return err(&e);
        }
        if !matches!(s.update.state, "available" | "download_failed") {
            return err("no update available to download");
        }
        s.update.error = None;
        s.update.progress = Some(0.0);
        s.transition("downloading");
        if !s.download_hold {
            s.update.progress = Some(1.0);
            s.transition("downloaded");
        }
        ok(Some(s.update.snapshot()))
    })
}

/// Cancels an in-flight download, returning to idle.
///
/// # Safety
/// `options` must be null or a valid NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn DM_CancelUpdateDownload(options: *const c_char) -> *mut c_char {
    let options = unsafe { parse_options(options) };
    respond(|s| {
        if let Err(e) = options {
            return err(&e);
        }
        if s.update.state != "downloading" {
            return err("no download in progress");
        }
        s.update.progress = None;
        s.transition("idle");
        ok(Some(s.update.snapshot()))
    })
}

/// Immediate update-state snapshot.
#[unsafe(no_mangle)]
pub extern "C" fn DM_GetUpdateState() -> *mut c_char {
    respond(|s| ok(Some(s.update.snapshot())))
}

/// Blocks until the sequence passes `last_sequence` or `timeout_ms` elapses.
#[unsafe(no_mangle)]
pub extern "C" fn DM_WaitForUpdateStateChange(last_sequence: u64, timeout_ms: u32) -> *mut c_char {
    let usable = state::with(|s| s.connected && !s.drop_responses);
    if !usable {
        return std::ptr::null_mut();
    }
    let snapshot = state::wait_for_change(last_sequence, Duration::from_millis(timeout_ms.into()));
    into_owned_ptr(ok(Some(snapshot)))
}

/// Pending post-update information; unchanged until acknowledged.
#[unsafe(no_mangle)]
pub extern "C" fn DM_GetPostUpdateInfo() -> *mut c_char {
    respond(|s| ok(s.pending_info.clone()))
}

/// Acknowledges pending post-update information. Acknowledging again
/// without new information repeats the previous acknowledgement.
///
/// # Safety
/// `options` must be null or a valid NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn DM_AckPostUpdateInfo(options: *const c_char) -> *mut c_char {
    let options = unsafe { parse_options(options) };
    respond(|s| {
        if let Err(e) = options {
            return err(&e);
        }
        if let Some(info) = s.pending_info.take() {
            s.last_ack = Some(json!({ "acknowledged": true, "info": info }));
        }
        match &s.last_ack {
            Some(ack) => ok(Some(ack.clone())),
            None => err("no post-update info to acknowledge"),
        }
    })
}

/// Quits the app and installs the downloaded update. 1 when accepted.
///
/// # Safety
/// `options` must be null or a valid NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn DM_QuitAndInstall(options: *const c_char) -> i32 {
    if unsafe { parse_options(options) }.is_err() {
        return 0;
    }
    state::with(|s| {
        if !s.connected || s.update.state != "downloaded" {
            return 0;
        }
        s.transition("installing");
        1
    })
}
