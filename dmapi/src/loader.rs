//! Locating and loading the native component.

use crate::error::{DmError, DmResult};
use crate::symbols::SymbolSource;
use libloading::Library;
use std::ffi::c_void;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable naming the native component path.
pub const ENV_API_PATH: &str = "DM_API_PATH";

/// Platform file name used when nothing else is configured.
#[cfg(target_os = "windows")]
pub const DEFAULT_LIBRARY_NAME: &str = "dm_api.dll";
#[cfg(target_os = "macos")]
pub const DEFAULT_LIBRARY_NAME: &str = "libdm_api.dylib";
#[cfg(not(any(target_os = "windows", target_os = "macos")))]
pub const DEFAULT_LIBRARY_NAME: &str = "libdm_api.so";

/// Picks the path the native component is loaded from.
///
/// Precedence: `explicit`, then `env_path`, then [`DEFAULT_LIBRARY_NAME`].
/// A relative result is probed next to the executable, then in the
/// executable's parent directory, then as given; the first candidate that
/// exists wins. When none exists the executable-relative candidate is used.
pub fn resolve_library_path(explicit: Option<&Path>, env_path: Option<&str>) -> PathBuf {
    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf));
    resolve_library_path_from(explicit, env_path, exe_dir.as_deref())
}

/// [`resolve_library_path`] with the executable directory supplied.
pub fn resolve_library_path_from(
    explicit: Option<&Path>,
    env_path: Option<&str>,
    exe_dir: Option<&Path>,
) -> PathBuf {
    let resolved = explicit
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .or_else(|| {
            env_path
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
        })
        .unwrap_or_else(|| PathBuf::from(DEFAULT_LIBRARY_NAME));

    if resolved.is_absolute() {
        return resolved;
    }

    let Some(exe_dir) = exe_dir else {
        return resolved;
    };

    let mut candidates = vec![exe_dir.join(&resolved)];
    if let Some(parent) = exe_dir.parent() {
        candidates.push(parent.join(&resolved));
    }
    candidates.push(resolved);

    for candidate in &candidates {
        if candidate.exists() {
            return candidate.clone();
        }
    }
    candidates.swap_remove(0)
}

/// A native component loaded through the platform dynamic loader.
///
/// Never unloaded by the client; the process-wide gateway keeps it for the
/// life of the process.
#[derive(Debug)]
pub struct NativeLibrary {
    path: PathBuf,
    library: Library,
}

impl NativeLibrary {
    /// Loads the library at `path`.
    ///
    /// # Safety
    ///
    /// Loading runs the library's initialization code in this process. The
    /// caller must trust the file at `path`.
    pub unsafe fn load(path: &Path) -> DmResult<Self> {
        // SAFETY: guaranteed by the caller.
        let library = unsafe { Library::new(path) }.map_err(|e| DmError::LibraryLoad {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        info!(path = %path.display(), "Loaded native DM API library");
        Ok(Self {
            path: path.to_path_buf(),
            library,
        })
    }

    /// Path the library was loaded from.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SymbolSource for NativeLibrary {
    fn lookup(&self, name: &str) -> Option<*const c_void> {
        // SAFETY: the address is only reinterpreted by `Procedures::resolve`
        // with the ABI documented for `name`.
        let symbol = unsafe { self.library.get::<*const c_void>(name.as_bytes()) };
        match symbol {
            Ok(sym) => Some(*sym),
            Err(e) => {
                debug!(symbol = name, "Symbol lookup failed: {}", e);
                None
            }
        }
    }
}
