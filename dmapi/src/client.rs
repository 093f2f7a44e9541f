//! High-level client.
//!
//! Stateless calls (activation, licensing queries) go straight through the
//! gateway; see [`crate::activation`]. Stateful update calls open a session
//! channel, invoke, and close it again. Channel and decode failures on those
//! calls collapse into `None`/`false`; use [`DmApi::with_session`] to batch
//! several calls over one channel and see the precise error.

use crate::boundary::{BoundaryString, NativeText};
use crate::config::SdkConfig;
use crate::devlicense;
use crate::envelope::{Envelope, Options};
use crate::error::{DmError, DmResult};
use crate::gateway::Gateway;
use crate::session::{SessionChannel, DEFAULT_PIPE_TIMEOUT_MS};
use crate::update::{UpdateEvent, UpdateSession, UpdateSnapshot, UpdateWatcher};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Client for the DM API native component and its background service.
#[derive(Debug, Clone)]
pub struct DmApi {
    gateway: Arc<Gateway>,
    config: SdkConfig,
}

impl DmApi {
    /// Loads the native component (once per process) and builds a client.
    pub fn new(config: SdkConfig) -> DmResult<Self> {
        let gateway = Gateway::global(config.library_path.as_deref())?;
        Ok(Self::with_gateway(gateway, config))
    }

    /// [`DmApi::new`] with configuration read from the environment.
    pub fn from_env() -> DmResult<Self> {
        Self::new(SdkConfig::from_env())
    }

    /// Builds a client over an already resolved gateway.
    pub fn with_gateway(gateway: Arc<Gateway>, config: SdkConfig) -> Self {
        Self { gateway, config }
    }

    /// The resolved native component.
    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    /// Configuration this client was built with.
    pub fn config(&self) -> &SdkConfig {
        &self.config
    }

    /// Connect timeout used for update calls. 0 restores the default.
    pub fn set_pipe_timeout(&mut self, timeout_ms: u32) {
        self.config.pipe_timeout_ms = timeout_ms;
    }

    /// Effective connect timeout.
    pub fn pipe_timeout(&self) -> u32 {
        match self.config.pipe_timeout_ms {
            0 => DEFAULT_PIPE_TIMEOUT_MS,
            ms => ms,
        }
    }

    // ── Runtime ──────────────────────────────────────────────────

    /// Version of the native component. Static; never freed.
    pub fn get_version(&self) -> String {
        let p = self.gateway.procs().get_version;
        // SAFETY: documented as returning a process-owned constant.
        unsafe { NativeText::borrowed_static(p()) }.into_string()
    }

    /// Last error recorded by the native component.
    pub fn get_last_error(&self) -> String {
        self.gateway
            .call_owned(self.gateway.procs().get_last_error)
            .into_string()
    }

    /// Relaunches through the launcher when required. True means the process
    /// should exit now.
    pub fn restart_app_if_necessary(&self) -> bool {
        let p = self.gateway.procs().restart_app_if_necessary;
        // SAFETY: resolved with a matching signature.
        unsafe { p() != 0 }
    }

    /// Canonical JSON form of `json`, as produced by the native component.
    pub fn json_to_canonical(&self, json: &str) -> DmResult<String> {
        let request = BoundaryString::new(json);
        let text = self
            .gateway
            .call_owned_with(self.gateway.procs().json_to_canonical, &request);
        if text.is_null() {
            return Err(DmError::CallFailed {
                symbol: "DM_JsonToCanonical",
                code: -1,
            });
        }
        Ok(text.into_string())
    }

    /// Dev-license bypass using this client's configuration.
    pub fn should_skip_check(&self, app_id: &str, public_key: &str) -> DmResult<bool> {
        devlicense::should_skip_check_with(
            &self.config,
            app_id,
            public_key,
            dirs::home_dir().as_deref(),
        )
    }

    // ── Session channel ──────────────────────────────────────────

    /// Opens a channel for a batch of update calls.
    pub fn open_session(&self) -> DmResult<UpdateSession<'_>> {
        let channel = SessionChannel::open(
            &self.gateway,
            self.config.pipe.as_deref(),
            self.pipe_timeout(),
            self.config.protocol,
        )?;
        Ok(UpdateSession::new(channel))
    }

    /// Runs `f` over one open channel, which is closed afterwards whatever
    /// the outcome.
    pub fn with_session<T, F>(&self, f: F) -> DmResult<T>
    where
        F: FnOnce(&mut UpdateSession<'_>) -> DmResult<T>,
    {
        let mut session = self.open_session()?;
        f(&mut session)
    }

    fn stateful<T, F>(&self, op: &'static str, f: F) -> Option<T>
    where
        F: FnOnce(&mut UpdateSession<'_>) -> DmResult<T>,
    {
        match self.with_session(f) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(op, "Stateful call produced no result: {}", e);
                None
            }
        }
    }

    // ── Update ───────────────────────────────────────────────────

    /// Asks the service to check for updates.
    pub fn check_for_updates(&self, options: Option<&Options>) -> Option<Envelope> {
        self.stateful("check_for_updates", |s| s.check_for_updates(options))
    }

    /// Asks the service to download the available update.
    pub fn download_update(&self, options: Option<&Options>) -> Option<Envelope> {
        self.stateful("download_update", |s| s.download_update(options))
    }

    /// Cancels an in-flight download.
    pub fn cancel_update_download(&self, options: Option<&Options>) -> Option<Envelope> {
        self.stateful("cancel_update_download", |s| {
            s.cancel_update_download(options)
        })
    }

    /// Immediate update-state snapshot.
    pub fn get_update_state(&self) -> Option<UpdateSnapshot> {
        self.stateful("get_update_state", |s| s.get_update_state())
    }

    /// Long-poll for the next state change after `last_sequence`.
    ///
    /// A wait that times out still returns a snapshot (same state, same
    /// sequence); `None` means there was no usable response at all.
    pub fn wait_for_update_state_change(
        &self,
        last_sequence: u64,
        timeout_ms: u32,
    ) -> Option<UpdateSnapshot> {
        self.stateful("wait_for_update_state_change", |s| {
            s.wait_for_update_state_change(last_sequence, timeout_ms)
        })
    }

    /// Seeds `watcher` from an immediate snapshot.
    pub fn prime_watcher(&self, watcher: &mut UpdateWatcher) -> Option<UpdateSnapshot> {
        let snapshot = self.get_update_state()?;
        watcher.observe(snapshot.clone());
        Some(snapshot)
    }

    /// Blocks until the state moves past what `watcher` last saw or its
    /// timeout elapses.
    ///
    /// `None` when the channel is unavailable or the response could not be
    /// decoded.
    pub fn poll_watcher(&self, watcher: &mut UpdateWatcher) -> Option<UpdateEvent> {
        let snapshot =
            self.wait_for_update_state_change(watcher.last_sequence(), watcher.timeout_ms())?;
        Some(watcher.observe(snapshot))
    }

    /// Post-update information, or `None` when there is nothing pending.
    pub fn get_post_update_info(&self) -> Option<Value> {
        self.stateful("get_post_update_info", |s| s.get_post_update_info())
            .filter(Envelope::is_success)
            .and_then(Envelope::into_data)
    }

    /// Acknowledges the pending post-update information.
    pub fn ack_post_update_info(&self, options: Option<&Options>) -> Option<Envelope> {
        self.stateful("ack_post_update_info", |s| s.ack_post_update_info(options))
    }

    /// Asks the service to quit this app and install the update. True when
    /// the service accepted the request.
    pub fn quit_and_install(&self, options: Option<&Options>) -> bool {
        self.stateful("quit_and_install", |s| s.quit_and_install(options))
            .unwrap_or(false)
    }
}

/// Canonical JSON via the process-wide native component.
pub fn json_to_canonical(json: &str) -> DmResult<String> {
    let gateway = Gateway::global(None)?;
    DmApi::with_gateway(gateway, SdkConfig::default()).json_to_canonical(json)
}
