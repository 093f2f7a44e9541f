//! Call gateway: owns the loaded native component and its resolved
//! procedures, and turns raw return codes into results.
//!
//! The process-wide instance is built once through [`OnceGate`]; concurrent
//! first callers block on the same attempt and all observe its outcome.

use crate::boundary::{BoundaryString, NativeText, OutBuffer};
use crate::error::{DmError, DmResult};
use crate::loader::{self, NativeLibrary};
use crate::symbols::{
    BufOutFn, OwnedStrArgFn, OwnedStrFn, Procedures, StatusFn, StatusStrFn, SymbolSource,
    U32OutFn,
};
use std::path::Path;
use std::sync::{Arc, OnceLock};

/// Resolved native component.
pub struct Gateway {
    procs: Procedures,
    // Kept alive for as long as any procedure pointer may be called.
    _source: Box<dyn SymbolSource>,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway").finish_non_exhaustive()
    }
}

impl Gateway {
    /// Resolves every procedure from `source`.
    pub fn from_source(source: impl SymbolSource + 'static) -> DmResult<Self> {
        let procs = Procedures::resolve(&source)?;
        Ok(Self {
            procs,
            _source: Box::new(source),
        })
    }

    /// Loads the native component from `path` and resolves it.
    ///
    /// # Safety
    /// See [`NativeLibrary::load`].
    pub unsafe fn load(path: &Path) -> DmResult<Self> {
        // SAFETY: forwarded to the caller.
        let library = unsafe { NativeLibrary::load(path) }?;
        Self::from_source(library)
    }

    /// The process-wide gateway, loaded on first use.
    ///
    /// `explicit_path` only matters for the first call; later calls return
    /// the cached gateway or the cached fatal error.
    pub fn global(explicit_path: Option<&Path>) -> DmResult<Arc<Gateway>> {
        static GLOBAL: OnceGate = OnceGate::new();
        GLOBAL.get_or_init(|| {
            let env_path = std::env::var(loader::ENV_API_PATH).ok();
            let path = loader::resolve_library_path(explicit_path, env_path.as_deref());
            // SAFETY: the library path comes from the hosting application's
            // own configuration.
            unsafe { Self::load(&path) }
        })
    }

    /// Resolved procedure table.
    pub fn procs(&self) -> &Procedures {
        &self.procs
    }

    /// Maps a native status code: zero is success, anything else a failure.
    pub fn status(symbol: &'static str, code: i32) -> DmResult<()> {
        if code == 0 {
            Ok(())
        } else {
            Err(DmError::CallFailed { symbol, code })
        }
    }

    /// Invokes an argument-less status procedure.
    pub fn call_status(&self, symbol: &'static str, proc_: StatusFn) -> DmResult<()> {
        // SAFETY: resolved with a matching signature.
        Self::status(symbol, unsafe { proc_() })
    }

    /// Invokes a status procedure taking one string.
    pub fn call_status_str(
        &self,
        symbol: &'static str,
        proc_: StatusStrFn,
        value: &str,
    ) -> DmResult<()> {
        let arg = BoundaryString::new(value);
        // SAFETY: `arg` outlives the call.
        Self::status(symbol, unsafe { proc_(arg.as_ptr()) })
    }

    /// Invokes a procedure that writes a `u32` through an output parameter.
    pub fn call_u32_out(&self, symbol: &'static str, proc_: U32OutFn) -> DmResult<u32> {
        let mut value = 0u32;
        // SAFETY: `value` is a valid, writable u32 for the call.
        Self::status(symbol, unsafe { proc_(&mut value) })?;
        Ok(value)
    }

    /// Invokes a procedure that fills a fixed-size buffer.
    pub fn call_buffer_out(
        &self,
        symbol: &'static str,
        proc_: BufOutFn,
        size: u32,
        fallback: u32,
    ) -> DmResult<String> {
        let mut buf = OutBuffer::with_len(size, fallback);
        let len = buf.len();
        // SAFETY: `buf` is writable for `len` bytes.
        Self::status(symbol, unsafe { proc_(buf.as_mut_ptr(), len) })?;
        Ok(buf.to_text())
    }

    /// Invokes a procedure returning a native-owned string.
    pub fn call_owned(&self, proc_: OwnedStrFn) -> NativeText {
        // SAFETY: the returned address is owned by the native allocator.
        unsafe { NativeText::owned(proc_(), self.procs.free_string) }
    }

    /// Invokes a procedure taking one string and returning a native-owned
    /// string. The argument is released after the call returns.
    pub fn call_owned_with(&self, proc_: OwnedStrArgFn, arg: &BoundaryString) -> NativeText {
        // SAFETY: `arg` outlives the call; the result is native-owned.
        unsafe { NativeText::owned(proc_(arg.as_ptr()), self.procs.free_string) }
    }
}

/// Single-flight cache for an expensive fallible setup.
///
/// The first caller runs the initializer while others block; success and
/// failure are both cached and handed to everyone afterwards.
#[derive(Debug)]
pub struct OnceGate {
    cell: OnceLock<Result<Arc<Gateway>, DmError>>,
}

impl OnceGate {
    /// Creates an empty gate.
    pub const fn new() -> Self {
        Self {
            cell: OnceLock::new(),
        }
    }

    /// Returns the cached outcome, running `init` if nobody has yet.
    pub fn get_or_init<F>(&self, init: F) -> DmResult<Arc<Gateway>>
    where
        F: FnOnce() -> DmResult<Gateway>,
    {
        self.cell
            .get_or_init(|| init().map(Arc::new))
            .clone()
    }

    /// Returns the outcome if initialization already ran.
    pub fn get(&self) -> Option<DmResult<Arc<Gateway>>> {
        self.cell.get().cloned()
    }
}

impl Default for OnceGate {
    fn default() -> Self {
        Self::new()
    }
}
