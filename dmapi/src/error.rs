//! Error types for the DM API client.

use thiserror::Error;

/// Remediation text returned when the local development license cannot be used.
pub const DEV_LICENSE_ERROR_TEXT: &str = "Development license is missing or corrupted. Run `distromate sdk renew` to regenerate the dev certificate.";

/// Result type for DM API operations.
pub type DmResult<T> = Result<T, DmError>;

/// Errors surfaced by the client.
///
/// `Clone` so a failed initialization can be cached and handed to every
/// caller that races on first use.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DmError {
    /// The native component could not be loaded.
    #[error("load native library {path}: {reason}")]
    LibraryLoad { path: String, reason: String },

    /// A required entry point is missing from the native component.
    #[error("find proc {symbol}: symbol not found")]
    MissingSymbol { symbol: &'static str },

    /// An optional entry point is not exported by this native version.
    #[error("{symbol} is not available in the loaded native library")]
    SymbolUnavailable { symbol: &'static str },

    /// A native call returned a non-zero status.
    #[error("{symbol} failed with status {code}")]
    CallFailed { symbol: &'static str, code: i32 },

    /// The service answered with a failure status.
    #[error("{symbol} rejected by service: {message}")]
    Service { symbol: &'static str, message: String },

    /// No session channel could be established with the background service.
    #[error("session channel unavailable: {0}")]
    ChannelUnavailable(String),

    /// A response could not be decoded.
    #[error("decode failed: {0}")]
    Decode(String),

    /// Dev-license checks were requested without an app identity.
    #[error(
        "app identity is required for dev-license checks. Provide app_id/public_key or set DM_APP_ID and DM_PUBLIC_KEY"
    )]
    IdentityMissing,

    /// The local development license does not permit skipping checks.
    #[error("{0}")]
    DevLicense(String),

    /// The caller passed an argument the native layer cannot accept.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl DmError {
    /// Returns true for errors that are reported once at initialization.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::LibraryLoad { .. } | Self::MissingSymbol { .. })
    }

    /// Builds the dev-license refusal carrying the documented remediation text.
    #[must_use]
    pub fn dev_license() -> Self {
        Self::DevLicense(DEV_LICENSE_ERROR_TEXT.to_string())
    }
}

impl From<serde_json::Error> for DmError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}
