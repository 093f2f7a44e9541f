//! The native symbol surface and its one-time resolution.
//!
//! Names are fixed, case-sensitive identifiers exported by the native
//! component. Required symbols must all resolve or initialization fails;
//! optional ones were added in later native versions and resolve to `None`
//! when absent.

use crate::boundary::FreeStringFn;
use crate::error::{DmError, DmResult};
use std::collections::HashMap;
use std::ffi::{c_char, c_void};

/// `int fn(void)`
pub type StatusFn = unsafe extern "C" fn() -> i32;
/// `int fn(const char*)`
pub type StatusStrFn = unsafe extern "C" fn(*const c_char) -> i32;
/// `int fn(const char*, const char*)`
pub type StatusStr2Fn = unsafe extern "C" fn(*const c_char, *const c_char) -> i32;
/// `int fn(uint32_t)`
pub type StatusU32Fn = unsafe extern "C" fn(u32) -> i32;
/// `int fn(uint32_t*)`
pub type U32OutFn = unsafe extern "C" fn(*mut u32) -> i32;
/// `int fn(char* buf, uint32_t len)`
pub type BufOutFn = unsafe extern "C" fn(*mut c_char, u32) -> i32;
/// `int fn(char* initial, uint32_t, char* current, uint32_t)`
pub type ModeOutFn = unsafe extern "C" fn(*mut c_char, u32, *mut c_char, u32) -> i32;
/// `const char* fn(void)` returning a process-owned constant.
pub type StaticStrFn = unsafe extern "C" fn() -> *const c_char;
/// `char* fn(void)` returning a string released via `DM_FreeString`.
pub type OwnedStrFn = unsafe extern "C" fn() -> *mut c_char;
/// `char* fn(const char*)` returning a string released via `DM_FreeString`.
pub type OwnedStrArgFn = unsafe extern "C" fn(*const c_char) -> *mut c_char;
/// `char* fn(uint64_t last_sequence, uint32_t timeout_ms)`
pub type WaitStateFn = unsafe extern "C" fn(u64, u32) -> *mut c_char;
/// `int fn(const char* pipe, uint32_t timeout_ms)`
pub type ConnectFn = unsafe extern "C" fn(*const c_char, u32) -> i32;
/// Native license callback signature.
pub type LicenseCallbackFn = unsafe extern "C" fn();
/// `int fn(callback)`
pub type SetCallbackFn = unsafe extern "C" fn(LicenseCallbackFn) -> i32;

/// Anything that can hand out symbol addresses by name.
pub trait SymbolSource: Send + Sync {
    /// Returns the address of `name`, or `None` when it is not exported.
    fn lookup(&self, name: &str) -> Option<*const c_void>;
}

/// In-memory name → address table.
///
/// Used to bind an in-process implementation of the native surface without
/// going through the dynamic loader.
#[derive(Debug, Default, Clone)]
pub struct SymbolTable {
    entries: HashMap<String, usize>,
}

impl SymbolTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `addr` under `name`, replacing any previous entry.
    pub fn insert(&mut self, name: impl Into<String>, addr: *const c_void) {
        self.entries.insert(name.into(), addr as usize);
    }

    /// Removes `name` from the table.
    pub fn remove(&mut self, name: &str) -> bool {
        self.entries.remove(name).is_some()
    }

    /// Number of registered symbols.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when no symbol is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(&'static str, *const c_void)> for SymbolTable {
    fn from_iter<I: IntoIterator<Item = (&'static str, *const c_void)>>(iter: I) -> Self {
        let mut table = Self::new();
        for (name, addr) in iter {
            table.insert(name, addr);
        }
        table
    }
}

impl SymbolSource for SymbolTable {
    fn lookup(&self, name: &str) -> Option<*const c_void> {
        self.entries
            .get(name)
            .map(|&addr| addr as *const c_void)
            .filter(|addr| !addr.is_null())
    }
}

/// Symbols that may be missing from older native builds.
pub const OPTIONAL_SYMBOLS: &[&str] = &[
    "SetActivationMetadata",
    "ActivateLicenseOffline",
    "GenerateOfflineDeactivationRequest",
];

/// Every resolved entry point. Immutable once built.
#[derive(Debug, Clone, Copy)]
pub struct Procedures {
    // Runtime
    pub get_version: StaticStrFn,
    pub restart_app_if_necessary: StatusFn,
    pub get_last_error: OwnedStrFn,
    pub json_to_canonical: OwnedStrArgFn,
    pub free_string: FreeStringFn,

    // Session channel
    pub connect: ConnectFn,
    pub close: StatusFn,

    // Update
    pub check_for_updates: OwnedStrArgFn,
    pub download_update: OwnedStrArgFn,
    pub cancel_update_download: OwnedStrArgFn,
    pub get_update_state: OwnedStrFn,
    pub wait_for_update_state_change: WaitStateFn,
    pub get_post_update_info: OwnedStrFn,
    pub ack_post_update_info: OwnedStrArgFn,
    pub quit_and_install: StatusStrFn,

    // Activation configuration
    pub set_product_data: StatusStrFn,
    pub set_product_id: StatusStrFn,
    pub set_data_directory: StatusStrFn,
    pub set_debug_mode: StatusU32Fn,
    pub set_custom_device_fingerprint: StatusStrFn,
    pub set_license_key: StatusStrFn,
    pub set_activation_metadata: Option<StatusStr2Fn>,
    pub set_license_callback: SetCallbackFn,

    // Activation
    pub activate_license: StatusFn,
    pub activate_license_offline: Option<StatusStrFn>,
    pub generate_offline_deactivation_request: Option<StatusStrFn>,
    pub get_last_activation_error: U32OutFn,

    // License queries
    pub is_license_genuine: StatusFn,
    pub is_license_valid: StatusFn,
    pub get_server_sync_grace_period_expiry_date: U32OutFn,
    pub get_activation_mode: ModeOutFn,
    pub get_license_key: BufOutFn,
    pub get_license_expiry_date: U32OutFn,
    pub get_license_creation_date: U32OutFn,
    pub get_license_activation_date: U32OutFn,
    pub get_activation_creation_date: U32OutFn,
    pub get_activation_last_synced_date: U32OutFn,
    pub get_activation_id: BufOutFn,
    pub get_library_version: StaticStrFn,
    pub reset: StatusFn,
}

/// Reinterprets a symbol address as a function pointer.
///
/// # Safety
/// `addr` must be the address of a function whose ABI matches `F`.
unsafe fn cast<F: Copy>(addr: *const c_void) -> F {
    debug_assert_eq!(size_of::<F>(), size_of::<*const c_void>());
    // SAFETY: guaranteed by the caller; `F` is a pointer-sized fn type.
    unsafe { std::mem::transmute_copy(&addr) }
}

struct Resolver<'a> {
    source: &'a dyn SymbolSource,
}

impl Resolver<'_> {
    fn required<F: Copy>(&self, name: &'static str) -> DmResult<F> {
        match self.source.lookup(name) {
            // SAFETY: the native component exports `name` with the ABI
            // declared on the matching `Procedures` field.
            Some(addr) => Ok(unsafe { cast(addr) }),
            None => Err(DmError::MissingSymbol { symbol: name }),
        }
    }

    fn optional<F: Copy>(&self, name: &'static str) -> Option<F> {
        // SAFETY: as above.
        self.source.lookup(name).map(|addr| unsafe { cast(addr) })
    }
}

impl Procedures {
    /// Resolves the full symbol surface from `source`.
    ///
    /// Fails on the first missing required symbol.
    pub fn resolve(source: &dyn SymbolSource) -> DmResult<Self> {
        let r = Resolver { source };
        Ok(Self {
            get_version: r.required("DM_GetVersion")?,
            restart_app_if_necessary: r.required("DM_RestartAppIfNecessary")?,
            get_last_error: r.required("DM_GetLastError")?,
            json_to_canonical: r.required("DM_JsonToCanonical")?,
            free_string: r.required("DM_FreeString")?,

            connect: r.required("DM_Connect")?,
            close: r.required("DM_Close")?,

            check_for_updates: r.required("DM_CheckForUpdates")?,
            download_update: r.required("DM_DownloadUpdate")?,
            cancel_update_download: r.required("DM_CancelUpdateDownload")?,
            get_update_state: r.required("DM_GetUpdateState")?,
            wait_for_update_state_change: r.required("DM_WaitForUpdateStateChange")?,
            get_post_update_info: r.required("DM_GetPostUpdateInfo")?,
            ack_post_update_info: r.required("DM_AckPostUpdateInfo")?,
            quit_and_install: r.required("DM_QuitAndInstall")?,

            set_product_data: r.required("SetProductData")?,
            set_product_id: r.required("SetProductId")?,
            set_data_directory: r.required("SetDataDirectory")?,
            set_debug_mode: r.required("SetDebugMode")?,
            set_custom_device_fingerprint: r.required("SetCustomDeviceFingerprint")?,
            set_license_key: r.required("SetLicenseKey")?,
            set_activation_metadata: r.optional("SetActivationMetadata"),
            set_license_callback: r.required("SetLicenseCallback")?,

            activate_license: r.required("ActivateLicense")?,
            activate_license_offline: r.optional("ActivateLicenseOffline"),
            generate_offline_deactivation_request: r
                .optional("GenerateOfflineDeactivationRequest"),
            get_last_activation_error: r.required("GetLastActivationError")?,

            is_license_genuine: r.required("IsLicenseGenuine")?,
            is_license_valid: r.required("IsLicenseValid")?,
            get_server_sync_grace_period_expiry_date: r
                .required("GetServerSyncGracePeriodExpiryDate")?,
            get_activation_mode: r.required("GetActivationMode")?,
            get_license_key: r.required("GetLicenseKey")?,
            get_license_expiry_date: r.required("GetLicenseExpiryDate")?,
            get_license_creation_date: r.required("GetLicenseCreationDate")?,
            get_license_activation_date: r.required("GetLicenseActivationDate")?,
            get_activation_creation_date: r.required("GetActivationCreationDate")?,
            get_activation_last_synced_date: r.required("GetActivationLastSyncedDate")?,
            get_activation_id: r.required("GetActivationId")?,
            get_library_version: r.required("GetLibraryVersion")?,
            reset: r.required("Reset")?,
        })
    }
}
