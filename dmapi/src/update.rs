//! Update lifecycle as observed through the session channel.
//!
//! The service drives the transitions; the client only observes them. Every
//! transition bumps a sequence number, and long-poll waits pass the last seen
//! sequence back so the service can answer immediately if it has moved on.
//!
//! ```text
//! Idle --check--> Checking --> {UpToDate | Available}
//! Available --download--> Downloading --> {Downloaded | DownloadFailed}
//! Downloaded --quit_and_install--> Installing
//! Downloading --cancel--> {Idle | DownloadFailed}
//! ```

use crate::boundary::NativeText;
use crate::envelope::{encode_request, Envelope, Options};
use crate::error::{DmError, DmResult};
use crate::session::SessionChannel;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Default server-side wait used by [`UpdateWatcher`].
pub const DEFAULT_WAIT_TIMEOUT_MS: u32 = 30_000;

/// Update lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateState {
    Idle,
    Checking,
    UpToDate,
    #[serde(alias = "update_available")]
    Available,
    Downloading,
    Downloaded,
    DownloadFailed,
    Installing,
    /// A state this client version does not know about.
    #[serde(other)]
    Unknown,
}

impl UpdateState {
    /// Whether the service may move from `self` to `next` in one step.
    pub fn can_transition_to(self, next: UpdateState) -> bool {
        use UpdateState::*;
        match (self, next) {
            (Unknown, _) | (_, Unknown) => true,
            (Idle | UpToDate | Available | Downloaded | DownloadFailed, Checking) => true,
            (Checking, UpToDate | Available | Idle) => true,
            (Available | DownloadFailed, Downloading) => true,
            (Downloading, Downloaded | DownloadFailed | Idle) => true,
            (Downloaded, Installing) => true,
            _ => false,
        }
    }

    /// States in which the service is doing work.
    pub fn is_busy(self) -> bool {
        matches!(self, Self::Checking | Self::Downloading | Self::Installing)
    }
}

/// Snapshot of the service's update state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateSnapshot {
    pub state: UpdateState,
    pub sequence: u64,
    /// Download progress in `0.0..=1.0`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    /// Version being offered or downloaded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Fields this client does not model.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl UpdateSnapshot {
    /// Extracts a snapshot from a decoded response.
    pub fn from_envelope(symbol: &'static str, envelope: Envelope) -> DmResult<Self> {
        if !envelope.is_success() {
            return Err(DmError::Service {
                symbol,
                message: envelope.error_message().unwrap_or_default(),
            });
        }
        let data = envelope
            .into_data()
            .ok_or_else(|| DmError::Decode(format!("{symbol} returned no state")))?;
        Ok(serde_json::from_value(data)?)
    }
}

/// Outcome of one long-poll round.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateEvent {
    /// The sequence or the state differs from what was last observed.
    Changed(UpdateSnapshot),
    /// The wait elapsed with no transition; same state, same sequence.
    TimedOut(UpdateSnapshot),
}

impl UpdateEvent {
    /// The snapshot carried by either outcome.
    pub fn snapshot(&self) -> &UpdateSnapshot {
        match self {
            Self::Changed(s) | Self::TimedOut(s) => s,
        }
    }
}

/// Tracks the last observed sequence across long-poll waits.
#[derive(Debug, Clone)]
pub struct UpdateWatcher {
    last_sequence: u64,
    last_state: Option<UpdateState>,
    timeout_ms: u32,
}

impl UpdateWatcher {
    /// Starts watching from sequence 0.
    pub fn new(timeout_ms: u32) -> Self {
        Self {
            last_sequence: 0,
            last_state: None,
            timeout_ms,
        }
    }

    /// Starts watching from an already observed sequence.
    pub fn starting_at(last_sequence: u64, timeout_ms: u32) -> Self {
        Self {
            last_sequence,
            ..Self::new(timeout_ms)
        }
    }

    /// Last sequence handed back to the service.
    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    /// Last state observed, if any.
    pub fn last_state(&self) -> Option<UpdateState> {
        self.last_state
    }

    /// Server-side wait used per poll.
    pub fn timeout_ms(&self) -> u32 {
        self.timeout_ms
    }

    /// Long-polls once on an already open session.
    pub fn poll_session(&mut self, session: &mut UpdateSession<'_>) -> DmResult<UpdateEvent> {
        let snapshot =
            session.wait_for_update_state_change(self.last_sequence, self.timeout_ms)?;
        Ok(self.observe(snapshot))
    }

    /// Records `snapshot` and classifies it against the last observation.
    ///
    /// Only the same sequence with the same state is a timeout. A sequence
    /// that went backwards means the service restarted and always counts as
    /// a change.
    pub fn observe(&mut self, snapshot: UpdateSnapshot) -> UpdateEvent {
        if snapshot.sequence < self.last_sequence {
            debug!(
                previous = self.last_sequence,
                sequence = snapshot.sequence,
                "Update sequence went backwards; service restarted"
            );
        }
        if let Some(prev) = self.last_state {
            let single_step = snapshot.sequence == self.last_sequence.wrapping_add(1);
            if single_step && prev != snapshot.state && !prev.can_transition_to(snapshot.state) {
                warn!(from = ?prev, to = ?snapshot.state, "Unexpected update state transition");
            }
        }
        let changed = snapshot.sequence != self.last_sequence
            || self.last_state.is_some_and(|prev| prev != snapshot.state);
        self.last_sequence = snapshot.sequence;
        self.last_state = Some(snapshot.state);

        if changed {
            UpdateEvent::Changed(snapshot)
        } else {
            UpdateEvent::TimedOut(snapshot)
        }
    }
}

impl Default for UpdateWatcher {
    fn default() -> Self {
        Self::new(DEFAULT_WAIT_TIMEOUT_MS)
    }
}

/// Update calls batched over one open channel.
///
/// Obtained from [`crate::DmApi::with_session`]; every method reports the precise
/// failure instead of collapsing it.
#[derive(Debug)]
pub struct UpdateSession<'g> {
    channel: SessionChannel<'g>,
}

impl<'g> UpdateSession<'g> {
    pub(crate) fn new(channel: SessionChannel<'g>) -> Self {
        Self { channel }
    }

    /// The underlying channel.
    pub fn channel(&self) -> &SessionChannel<'g> {
        &self.channel
    }

    /// Asks the service to check for a newer version.
    pub fn check_for_updates(&mut self, options: Option<&Options>) -> DmResult<Envelope> {
        let request = encode_request(options);
        self.channel.invoke("DM_CheckForUpdates", |gw| {
            gw.call_owned_with(gw.procs().check_for_updates, &request)
        })
    }

    /// Asks the service to download the available update.
    pub fn download_update(&mut self, options: Option<&Options>) -> DmResult<Envelope> {
        let request = encode_request(options);
        self.channel.invoke("DM_DownloadUpdate", |gw| {
            gw.call_owned_with(gw.procs().download_update, &request)
        })
    }

    /// Cancels an in-flight download.
    pub fn cancel_update_download(&mut self, options: Option<&Options>) -> DmResult<Envelope> {
        let request = encode_request(options);
        self.channel.invoke("DM_CancelUpdateDownload", |gw| {
            gw.call_owned_with(gw.procs().cancel_update_download, &request)
        })
    }

    /// Immediate snapshot of the update state.
    pub fn get_update_state(&mut self) -> DmResult<UpdateSnapshot> {
        let symbol = "DM_GetUpdateState";
        let envelope = self
            .channel
            .invoke(symbol, |gw| gw.call_owned(gw.procs().get_update_state))?;
        UpdateSnapshot::from_envelope(symbol, envelope)
    }

    /// Waits server-side until the sequence passes `last_sequence` or
    /// `timeout_ms` elapses, then returns the current snapshot.
    pub fn wait_for_update_state_change(
        &mut self,
        last_sequence: u64,
        timeout_ms: u32,
    ) -> DmResult<UpdateSnapshot> {
        let symbol = "DM_WaitForUpdateStateChange";
        let envelope = self.channel.invoke(symbol, |gw| {
            let wait = gw.procs().wait_for_update_state_change;
            // SAFETY: the result is native-owned and released by NativeText.
            unsafe { NativeText::owned(wait(last_sequence, timeout_ms), gw.procs().free_string) }
        })?;
        UpdateSnapshot::from_envelope(symbol, envelope)
    }

    /// Fetches post-update information; repeated until acknowledged.
    pub fn get_post_update_info(&mut self) -> DmResult<Envelope> {
        self.channel.invoke("DM_GetPostUpdateInfo", |gw| {
            gw.call_owned(gw.procs().get_post_update_info)
        })
    }

    /// Acknowledges the pending post-update information.
    pub fn ack_post_update_info(&mut self, options: Option<&Options>) -> DmResult<Envelope> {
        let request = encode_request(options);
        self.channel.invoke("DM_AckPostUpdateInfo", |gw| {
            gw.call_owned_with(gw.procs().ack_post_update_info, &request)
        })
    }

    /// Asks the service to quit this process and install the update.
    pub fn quit_and_install(&mut self, options: Option<&Options>) -> DmResult<bool> {
        let request = encode_request(options);
        self.channel.invoke_accepted("DM_QuitAndInstall", |gw| {
            // SAFETY: `request` outlives the call.
            unsafe { (gw.procs().quit_and_install)(request.as_ptr()) }
        })
    }
}
