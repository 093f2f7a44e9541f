//! Stateless activation and licensing calls.
//!
//! Each method maps onto exactly one native call. Configuration setters are
//! sticky: the native component holds the value and later operations read
//! it, so product identity, data directory and license key must be pushed
//! before activating or querying.

use crate::boundary::{
    BoundaryString, NativeText, OutBuffer, DEFAULT_BUFFER_SIZE, DEFAULT_MODE_BUFFER_SIZE,
};
use crate::callback;
use crate::client::DmApi;
use crate::error::{DmError, DmResult};
use crate::gateway::Gateway;
use crate::symbols::StatusStrFn;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Error codes reported by `GetLastActivationError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivationErrorCode {
    Ok,
    Fail,
    InvalidParameter,
    AppIdNotSet,
    LicenseKeyNotSet,
    NotActivated,
    LicenseExpired,
    Network,
    FileIo,
    Signature,
    BufferTooSmall,
    /// A code newer than this client.
    Unknown(u32),
}

impl ActivationErrorCode {
    /// Symbolic name as used by the native headers.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ok => "DM_ERR_OK",
            Self::Fail => "DM_ERR_FAIL",
            Self::InvalidParameter => "DM_ERR_INVALID_PARAMETER",
            Self::AppIdNotSet => "DM_ERR_APPID_NOT_SET",
            Self::LicenseKeyNotSet => "DM_ERR_LICENSE_KEY_NOT_SET",
            Self::NotActivated => "DM_ERR_NOT_ACTIVATED",
            Self::LicenseExpired => "DM_ERR_LICENSE_EXPIRED",
            Self::Network => "DM_ERR_NETWORK",
            Self::FileIo => "DM_ERR_FILE_IO",
            Self::Signature => "DM_ERR_SIGNATURE",
            Self::BufferTooSmall => "DM_ERR_BUFFER_TOO_SMALL",
            Self::Unknown(_) => "DM_ERR_UNKNOWN",
        }
    }

    /// Raw numeric code.
    pub fn code(&self) -> u32 {
        match self {
            Self::Ok => 0,
            Self::Fail => 1,
            Self::InvalidParameter => 2,
            Self::AppIdNotSet => 3,
            Self::LicenseKeyNotSet => 4,
            Self::NotActivated => 5,
            Self::LicenseExpired => 6,
            Self::Network => 7,
            Self::FileIo => 8,
            Self::Signature => 9,
            Self::BufferTooSmall => 10,
            Self::Unknown(code) => *code,
        }
    }
}

impl From<u32> for ActivationErrorCode {
    fn from(code: u32) -> Self {
        match code {
            0 => Self::Ok,
            1 => Self::Fail,
            2 => Self::InvalidParameter,
            3 => Self::AppIdNotSet,
            4 => Self::LicenseKeyNotSet,
            5 => Self::NotActivated,
            6 => Self::LicenseExpired,
            7 => Self::Network,
            8 => Self::FileIo,
            9 => Self::Signature,
            10 => Self::BufferTooSmall,
            other => Self::Unknown(other),
        }
    }
}

impl std::fmt::Display for ActivationErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown(code) => write!(f, "DM_ERR_UNKNOWN({code})"),
            other => f.write_str(other.name()),
        }
    }
}

/// Activation mode pair returned by `GetActivationMode`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationMode {
    /// Mode the license was first activated with.
    pub initial: String,
    /// Mode currently in effect.
    pub current: String,
}

/// Converts a native Unix-seconds date to UTC. Zero means "unset".
pub fn timestamp_to_utc(secs: u32) -> Option<DateTime<Utc>> {
    if secs == 0 {
        return None;
    }
    DateTime::from_timestamp(i64::from(secs), 0)
}

impl DmApi {
    fn optional_status_str(
        &self,
        symbol: &'static str,
        proc_: Option<StatusStrFn>,
        value: &str,
    ) -> DmResult<()> {
        let proc_ = proc_.ok_or(DmError::SymbolUnavailable { symbol })?;
        self.gateway().call_status_str(symbol, proc_, value)
    }

    /// Pushes the signed product data blob.
    pub fn set_product_data(&self, product_data: &str) -> DmResult<()> {
        let p = self.gateway().procs().set_product_data;
        self.gateway().call_status_str("SetProductData", p, product_data)
    }

    /// Pushes the product id.
    pub fn set_product_id(&self, product_id: &str) -> DmResult<()> {
        let p = self.gateway().procs().set_product_id;
        self.gateway().call_status_str("SetProductId", p, product_id)
    }

    /// Sets where the native component keeps its activation data.
    pub fn set_data_directory(&self, directory: impl AsRef<Path>) -> DmResult<()> {
        let p = self.gateway().procs().set_data_directory;
        let dir = directory.as_ref().to_string_lossy();
        self.gateway().call_status_str("SetDataDirectory", p, &dir)
    }

    /// Toggles native debug logging.
    pub fn set_debug_mode(&self, enable: bool) -> DmResult<()> {
        let p = self.gateway().procs().set_debug_mode;
        // SAFETY: resolved with a matching signature.
        Gateway::status("SetDebugMode", unsafe { p(u32::from(enable)) })
    }

    /// Overrides the device fingerprint the native component binds to.
    pub fn set_custom_device_fingerprint(&self, fingerprint: &str) -> DmResult<()> {
        let p = self.gateway().procs().set_custom_device_fingerprint;
        self.gateway()
            .call_status_str("SetCustomDeviceFingerprint", p, fingerprint)
    }

    /// Sets the license key used by subsequent activation.
    pub fn set_license_key(&self, license_key: &str) -> DmResult<()> {
        let p = self.gateway().procs().set_license_key;
        self.gateway().call_status_str("SetLicenseKey", p, license_key)
    }

    /// Attaches a metadata pair to the next activation.
    pub fn set_activation_metadata(&self, key: &str, value: &str) -> DmResult<()> {
        let symbol = "SetActivationMetadata";
        let p = self
            .gateway()
            .procs()
            .set_activation_metadata
            .ok_or(DmError::SymbolUnavailable { symbol })?;
        let key = BoundaryString::new(key);
        let value = BoundaryString::new(value);
        // SAFETY: both strings outlive the call.
        Gateway::status(symbol, unsafe { p(key.as_ptr(), value.as_ptr()) })
    }

    /// Registers `callback` to be invoked when the license state changes.
    ///
    /// See [`callback::register_license_callback`].
    pub fn set_license_callback<F>(&self, callback: Option<F>) -> DmResult<()>
    where
        F: Fn() + Send + Sync + 'static,
    {
        callback::register_license_callback(self.gateway(), callback)
    }

    /// Activates online using the configured license key.
    pub fn activate_license(&self) -> DmResult<()> {
        let p = self.gateway().procs().activate_license;
        self.gateway().call_status("ActivateLicense", p)
    }

    /// Activates from an offline response file.
    pub fn activate_license_offline(&self, response_file: impl AsRef<Path>) -> DmResult<()> {
        let p = self.gateway().procs().activate_license_offline;
        let path = response_file.as_ref().to_string_lossy();
        self.optional_status_str("ActivateLicenseOffline", p, &path)
    }

    /// Writes an offline deactivation request to `output_file`.
    pub fn generate_offline_deactivation_request(
        &self,
        output_file: impl AsRef<Path>,
    ) -> DmResult<()> {
        let p = self.gateway().procs().generate_offline_deactivation_request;
        let path = output_file.as_ref().to_string_lossy();
        self.optional_status_str("GenerateOfflineDeactivationRequest", p, &path)
    }

    /// Code describing why the last activation failed.
    pub fn get_last_activation_error(&self) -> DmResult<ActivationErrorCode> {
        let p = self.gateway().procs().get_last_activation_error;
        self.gateway()
            .call_u32_out("GetLastActivationError", p)
            .map(ActivationErrorCode::from)
    }

    /// Verifies the license against the activation server's signature.
    pub fn is_license_genuine(&self) -> bool {
        let p = self.gateway().procs().is_license_genuine;
        self.gateway().call_status("IsLicenseGenuine", p).is_ok()
    }

    /// Verifies the license locally.
    pub fn is_license_valid(&self) -> bool {
        let p = self.gateway().procs().is_license_valid;
        self.gateway().call_status("IsLicenseValid", p).is_ok()
    }

    /// Unix seconds at which the server-sync grace period ends.
    pub fn get_server_sync_grace_period_expiry_date(&self) -> DmResult<u32> {
        let p = self.gateway().procs().get_server_sync_grace_period_expiry_date;
        self.gateway()
            .call_u32_out("GetServerSyncGracePeriodExpiryDate", p)
    }

    /// Initial and current activation modes. `buffer_size` 0 uses 64 bytes.
    pub fn get_activation_mode(&self, buffer_size: u32) -> DmResult<ActivationMode> {
        let p = self.gateway().procs().get_activation_mode;
        let mut initial = OutBuffer::with_len(buffer_size, DEFAULT_MODE_BUFFER_SIZE);
        let mut current = OutBuffer::with_len(buffer_size, DEFAULT_MODE_BUFFER_SIZE);
        let (initial_len, current_len) = (initial.len(), current.len());
        // SAFETY: both buffers are writable for their declared lengths.
        let code = unsafe {
            p(
                initial.as_mut_ptr(),
                initial_len,
                current.as_mut_ptr(),
                current_len,
            )
        };
        Gateway::status("GetActivationMode", code)?;
        Ok(ActivationMode {
            initial: initial.to_text(),
            current: current.to_text(),
        })
    }

    /// The license key in use. `buffer_size` 0 uses 256 bytes.
    pub fn get_license_key(&self, buffer_size: u32) -> DmResult<String> {
        let p = self.gateway().procs().get_license_key;
        self.gateway()
            .call_buffer_out("GetLicenseKey", p, buffer_size, DEFAULT_BUFFER_SIZE)
    }

    /// Unix seconds at which the license expires.
    pub fn get_license_expiry_date(&self) -> DmResult<u32> {
        let p = self.gateway().procs().get_license_expiry_date;
        self.gateway().call_u32_out("GetLicenseExpiryDate", p)
    }

    /// Unix seconds at which the license was created.
    pub fn get_license_creation_date(&self) -> DmResult<u32> {
        let p = self.gateway().procs().get_license_creation_date;
        self.gateway().call_u32_out("GetLicenseCreationDate", p)
    }

    /// Unix seconds at which the license was first activated.
    pub fn get_license_activation_date(&self) -> DmResult<u32> {
        let p = self.gateway().procs().get_license_activation_date;
        self.gateway().call_u32_out("GetLicenseActivationDate", p)
    }

    /// Unix seconds at which this activation was created.
    pub fn get_activation_creation_date(&self) -> DmResult<u32> {
        let p = self.gateway().procs().get_activation_creation_date;
        self.gateway().call_u32_out("GetActivationCreationDate", p)
    }

    /// Unix seconds of the last successful server sync.
    pub fn get_activation_last_synced_date(&self) -> DmResult<u32> {
        let p = self.gateway().procs().get_activation_last_synced_date;
        self.gateway().call_u32_out("GetActivationLastSyncedDate", p)
    }

    /// Activation id. `buffer_size` 0 uses 256 bytes.
    pub fn get_activation_id(&self, buffer_size: u32) -> DmResult<String> {
        let p = self.gateway().procs().get_activation_id;
        self.gateway()
            .call_buffer_out("GetActivationId", p, buffer_size, DEFAULT_BUFFER_SIZE)
    }

    /// Version of the licensing library. Static; never freed.
    pub fn get_library_version(&self) -> String {
        let p = self.gateway().procs().get_library_version;
        // SAFETY: documented as returning a process-owned constant.
        unsafe { NativeText::borrowed_static(p()) }.into_string()
    }

    /// Clears all activation state held by the native component.
    pub fn reset(&self) -> DmResult<()> {
        let p = self.gateway().procs().reset;
        self.gateway().call_status("Reset", p)
    }
}
