//! Process-wide stub state and the test control surface.

use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, LazyLock, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

/// Native license callback signature.
pub type LicenseCallback = unsafe extern "C" fn();

#[derive(Debug)]
pub(crate) struct UpdateSim {
    pub state: &'static str,
    pub sequence: u64,
    pub progress: Option<f64>,
    pub version: Option<String>,
    pub error: Option<String>,
}

impl UpdateSim {
    fn new() -> Self {
        Self {
            state: "idle",
            sequence: 0,
            progress: None,
            version: None,
            error: None,
        }
    }

    pub fn snapshot(&self) -> Value {
        let mut data = json!({
            "state": self.state,
            "sequence": self.sequence,
        });
        if let Some(p) = self.progress {
            data["progress"] = json!(p);
        }
        if let Some(v) = &self.version {
            data["version"] = json!(v);
        }
        if let Some(e) = &self.error {
            data["error"] = json!(e);
        }
        data
    }
}

#[derive(Debug)]
pub(crate) struct StubState {
    // Service
    pub running: bool,
    pub connected: bool,
    pub drop_responses: bool,
    pub update: UpdateSim,
    pub available_version: Option<String>,
    pub download_hold: bool,
    pub pending_info: Option<Value>,
    pub last_ack: Option<Value>,

    // Activation
    pub product_id: Option<String>,
    pub product_data: Option<String>,
    pub data_directory: Option<String>,
    pub debug: bool,
    pub fingerprint: Option<String>,
    pub license_key: Option<String>,
    pub metadata: serde_json::Map<String, Value>,
    pub activated: bool,
    pub activation_mode: &'static str,
    pub last_activation_error: u32,
    pub callback: Option<LicenseCallback>,
    pub reject_callbacks: bool,
    pub last_error: String,
}

impl StubState {
    fn new() -> Self {
        Self {
            running: true,
            connected: false,
            drop_responses: false,
            update: UpdateSim::new(),
            available_version: None,
            download_hold: false,
            pending_info: None,
            last_ack: None,
            product_id: None,
            product_data: None,
            data_directory: None,
            debug: false,
            fingerprint: None,
            license_key: None,
            metadata: serde_json::Map::new(),
            activated: false,
            activation_mode: "online",
            last_activation_error: 0,
            callback: None,
            reject_callbacks: false,
            last_error: String::new(),
        }
    }

    /// Moves the update state machine and wakes long-poll waiters.
    pub fn transition(&mut self, next: &'static str) {
        debug!(from = self.update.state, to = next, "Stub update transition");
        self.update.state = next;
        self.update.sequence += 1;
        CHANGED.notify_all();
    }
}

static STATE: LazyLock<Mutex<StubState>> = LazyLock::new(|| Mutex::new(StubState::new()));
static CHANGED: Condvar = Condvar::new();

static CONNECTS: AtomicUsize = AtomicUsize::new(0);
static CLOSES: AtomicUsize = AtomicUsize::new(0);
static ALLOCS: AtomicUsize = AtomicUsize::new(0);
static FREES: AtomicUsize = AtomicUsize::new(0);

fn lock() -> MutexGuard<'static, StubState> {
    STATE.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn with<T>(f: impl FnOnce(&mut StubState) -> T) -> T {
    f(&mut lock())
}

/// Blocks until the sequence passes `last` or `timeout` elapses, then
/// returns the current snapshot.
pub(crate) fn wait_for_change(last: u64, timeout: Duration) -> Value {
    let deadline = Instant::now() + timeout;
    let mut guard = lock();
    while guard.update.sequence <= last {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        guard = CHANGED
            .wait_timeout(guard, deadline - now)
            .unwrap_or_else(PoisonError::into_inner)
            .0;
    }
    guard.update.snapshot()
}

pub(crate) fn count_connect() {
    CONNECTS.fetch_add(1, Ordering::SeqCst);
}

pub(crate) fn count_close() {
    CLOSES.fetch_add(1, Ordering::SeqCst);
}

pub(crate) fn track_alloc() {
    ALLOCS.fetch_add(1, Ordering::SeqCst);
}

pub(crate) fn track_free() {
    FREES.fetch_add(1, Ordering::SeqCst);
}

// ── Control surface ──────────────────────────────────────────────

/// Restores the initial state and zeroes every counter.
pub fn reset() {
    *lock() = StubState::new();
    for counter in [&CONNECTS, &CLOSES, &ALLOCS, &FREES] {
        counter.store(0, Ordering::SeqCst);
    }
}

/// When false, `DM_Connect` fails as if no service were listening.
pub fn set_service_running(running: bool) {
    with(|s| s.running = running);
}

/// When true, stateful calls return null after a successful connect.
pub fn set_drop_responses(drop: bool) {
    with(|s| s.drop_responses = drop);
}

/// Version the next check will offer; `None` means up to date.
pub fn set_available_version(version: Option<&str>) {
    with(|s| s.available_version = version.map(String::from));
}

/// When true, downloads stay in `downloading` until [`complete_download`].
pub fn set_download_hold(hold: bool) {
    with(|s| s.download_hold = hold);
}

/// Finishes a held download.
pub fn complete_download() {
    with(|s| {
        if s.update.state == "downloading" {
            s.update.progress = Some(1.0);
            s.transition("downloaded");
        }
    });
}

/// Fails a held download with `message`.
pub fn fail_download(message: &str) {
    with(|s| {
        if s.update.state == "downloading" {
            s.update.error = Some(message.to_string());
            s.transition("download_failed");
        }
    });
}

/// Stages post-update information for the next fetch.
pub fn set_pending_post_update_info(info: Option<Value>) {
    with(|s| {
        s.pending_info = info;
        s.last_ack = None;
    });
}

/// When true, `SetLicenseCallback` refuses new callbacks.
pub fn set_reject_callbacks(reject: bool) {
    with(|s| s.reject_callbacks = reject);
}

/// Invokes the registered license callback, as the native side would.
/// Returns false when none is registered.
pub fn fire_license_callback() -> bool {
    // Not called under the lock: the callback may call back into the stub.
    let Some(callback) = with(|s| s.callback) else {
        return false;
    };
    unsafe { callback() };
    true
}

/// Current update sequence.
pub fn update_sequence() -> u64 {
    with(|s| s.update.sequence)
}

/// Whether a session channel is currently open.
pub fn is_connected() -> bool {
    with(|s| s.connected)
}

/// Successful `DM_Connect` calls since the last reset.
pub fn connect_count() -> usize {
    CONNECTS.load(Ordering::SeqCst)
}

/// `DM_Close` calls since the last reset.
pub fn close_count() -> usize {
    CLOSES.load(Ordering::SeqCst)
}

/// `DM_FreeString` calls on non-null pointers since the last reset.
pub fn free_count() -> usize {
    FREES.load(Ordering::SeqCst)
}

/// Strings handed out and not yet freed since the last reset.
///
/// Negative when strings allocated before a reset are freed after it.
pub fn live_strings() -> isize {
    outstanding(ALLOCS.load(Ordering::SeqCst), FREES.load(Ordering::SeqCst))
}

fn outstanding(allocs: usize, frees: usize) -> isize {
    let allocs = isize::try_from(allocs).unwrap_or(isize::MAX);
    let frees = isize::try_from(frees).unwrap_or(isize::MAX);
    allocs.saturating_sub(frees)
}
