//! License callback bridge.
//!
//! The native component stores a bare `void (*)(void)` and may call it at any
//! time until the process exits or the callback is replaced. A single
//! `extern "C"` trampoline is handed over, and it dispatches to whichever host
//! function is in the process-wide slot. The slot keeps that function alive;
//! nothing but a confirmed replacement releases it.
//!
//! While a registration is in flight the new function sits in a pending slot
//! that the trampoline prefers, so a notification delivered during
//! `SetLicenseCallback` already reaches it.

use crate::error::{DmError, DmResult};
use crate::gateway::Gateway;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

type HostCallback = Arc<dyn Fn() + Send + Sync>;

struct Registration {
    generation: u64,
    callback: HostCallback,
}

/// Function currently reachable from the trampoline.
static ACTIVE: Mutex<Option<Registration>> = Mutex::new(None);

/// Function being registered; wins over `ACTIVE` until the native side
/// answers.
static PENDING: Mutex<Option<HostCallback>> = Mutex::new(None);

/// Serializes registrations so commit steps never interleave. Holds the last
/// handed-out generation.
static COMMIT: Mutex<u64> = Mutex::new(0);

fn lock<T>(m: &'static Mutex<T>) -> MutexGuard<'static, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

extern "C" fn license_callback_thunk() {
    // Clone out of the lock so the callback may itself re-register.
    let pending = lock(&PENDING).as_ref().map(Arc::clone);
    let callback =
        pending.or_else(|| lock(&ACTIVE).as_ref().map(|r| Arc::clone(&r.callback)));
    let Some(callback) = callback else {
        debug!("License callback fired with no registration");
        return;
    };
    if panic::catch_unwind(AssertUnwindSafe(|| callback())).is_err() {
        warn!("License callback panicked; unwinding stopped at the native boundary");
    }
}

/// Registers `callback` as the native license callback.
///
/// `None` is rejected without crossing the boundary. The previous
/// registration stays live until the native side accepts the new one, and is
/// released only then; a rejected registration leaves it in place.
pub fn register_license_callback<F>(gateway: &Gateway, callback: Option<F>) -> DmResult<()>
where
    F: Fn() + Send + Sync + 'static,
{
    let Some(callback) = callback else {
        return Err(DmError::InvalidArgument("license callback is null".into()));
    };
    let staged: HostCallback = Arc::new(callback);

    let mut generation = lock(&COMMIT);
    *lock(&PENDING) = Some(Arc::clone(&staged));
    let set = gateway.procs().set_license_callback;
    // SAFETY: the trampoline is a `'static` function with the native
    // callback ABI.
    let accepted = Gateway::status("SetLicenseCallback", unsafe { set(license_callback_thunk) });
    if let Err(e) = accepted {
        lock(&PENDING).take();
        debug!("License callback rejected; previous registration kept");
        return Err(e);
    }

    *generation += 1;
    let previous = lock(&ACTIVE).replace(Registration {
        generation: *generation,
        callback: staged,
    });
    // Promoted before the pending slot is cleared, so the trampoline never
    // falls back to the old function.
    lock(&PENDING).take();
    debug!(generation = *generation, "License callback registered");
    // Dropped after the swap so the old function is never reachable once
    // released.
    drop(previous);
    Ok(())
}

/// Generation of the live registration, if any.
pub fn active_generation() -> Option<u64> {
    lock(&ACTIVE).as_ref().map(|r| r.generation)
}

/// Number of live registrations; 0 or 1.
pub fn live_registrations() -> usize {
    usize::from(lock(&ACTIVE).is_some())
}
