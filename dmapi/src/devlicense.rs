//! Development-license bypass.
//!
//! During development the app is usually started without the launcher, so the
//! native license checks would fail. A dev certificate issued by
//! `distromate sdk renew` is stored per app id under the user's home, and a
//! matching public key lets the app skip the runtime checks.

use crate::config::SdkConfig;
use crate::error::{DmError, DmResult};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Directory under the home directory holding the CLI's state.
pub const CLI_DIR: &str = ".distromate-cli";

/// Path of the stored dev public key for `app_id`.
pub fn dev_pubkey_path(home: &Path, app_id: &str) -> PathBuf {
    home.join(CLI_DIR)
        .join("dev_licenses")
        .join(app_id)
        .join("pubkey")
}

/// Reports whether runtime license checks can be skipped, reading the
/// process environment and the user's home directory.
///
/// Empty `app_id`/`public_key` arguments fall back to `DM_APP_ID` and
/// `DM_PUBLIC_KEY`.
pub fn should_skip_check(app_id: &str, public_key: &str) -> DmResult<bool> {
    let config = SdkConfig::from_env();
    should_skip_check_with(&config, app_id, public_key, dirs::home_dir().as_deref())
}

/// [`should_skip_check`] with configuration and home directory supplied.
///
/// - Launcher endpoint and token both set: `Ok(true)`, no file access.
/// - No app id or public key: [`DmError::IdentityMissing`].
/// - Stored key equal to `public_key` after trimming: `Ok(true)`.
/// - Anything else: [`DmError::DevLicense`] with the remediation text.
pub fn should_skip_check_with(
    config: &SdkConfig,
    app_id: &str,
    public_key: &str,
    home: Option<&Path>,
) -> DmResult<bool> {
    if config.launched_by_launcher() {
        debug!("Launcher environment present; license checks already satisfied");
        return Ok(true);
    }

    let app_id = resolve(app_id, config.app_id.as_deref()).ok_or(DmError::IdentityMissing)?;
    let public_key =
        resolve(public_key, config.public_key.as_deref()).ok_or(DmError::IdentityMissing)?;

    let home = home.ok_or_else(DmError::dev_license)?;
    let path = dev_pubkey_path(home, app_id);
    let raw = std::fs::read_to_string(&path).map_err(|e| {
        debug!(path = %path.display(), "Dev license unreadable: {}", e);
        DmError::dev_license()
    })?;

    let stored = raw.trim();
    if stored.is_empty() || stored != public_key {
        debug!(app_id, "Dev license public key does not match");
        return Err(DmError::dev_license());
    }
    Ok(true)
}

fn resolve<'a>(explicit: &'a str, fallback: Option<&'a str>) -> Option<&'a str> {
    let explicit = explicit.trim();
    if !explicit.is_empty() {
        return Some(explicit);
    }
    fallback.map(str::trim).filter(|s| !s.is_empty())
}
