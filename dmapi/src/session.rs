//! Session channel to the background update service.
//!
//! A channel is opened for one logical operation, used for one or more calls,
//! and closed when it goes out of scope. Calls take `&mut self`, so two
//! operations can never interleave on the same channel.

use crate::boundary::{BoundaryString, NativeText};
use crate::envelope::{Envelope, ProtocolVersion};
use crate::error::{DmError, DmResult};
use crate::gateway::Gateway;
use tracing::{debug, warn};

/// Default connect timeout in milliseconds.
pub const DEFAULT_PIPE_TIMEOUT_MS: u32 = 5000;

/// Lifecycle of a [`SessionChannel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Not connected.
    Closed,
    /// Connected and usable.
    Open,
}

/// An open connection to the background service.
#[derive(Debug)]
pub struct SessionChannel<'g> {
    gateway: &'g Gateway,
    protocol: ProtocolVersion,
    state: ChannelState,
}

impl<'g> SessionChannel<'g> {
    /// Connects to `pipe` within `timeout_ms`.
    ///
    /// A missing or blank identifier means the channel is unavailable for
    /// this process; that is reported as [`DmError::ChannelUnavailable`], as is
    /// a failed connect.
    pub fn open(
        gateway: &'g Gateway,
        pipe: Option<&str>,
        timeout_ms: u32,
        protocol: ProtocolVersion,
    ) -> DmResult<Self> {
        let pipe = pipe.map(str::trim).filter(|p| !p.is_empty()).ok_or_else(|| {
            DmError::ChannelUnavailable("no pipe identifier configured".into())
        })?;
        let timeout_ms = if timeout_ms == 0 {
            DEFAULT_PIPE_TIMEOUT_MS
        } else {
            timeout_ms
        };

        let name = BoundaryString::new(pipe);
        // SAFETY: `name` outlives the call.
        let code = unsafe { (gateway.procs().connect)(name.as_ptr(), timeout_ms) };
        if code != 0 {
            return Err(DmError::ChannelUnavailable(format!(
                "connect to {pipe} failed with status {code}"
            )));
        }
        debug!(pipe = pipe, timeout_ms, "Session channel opened");

        Ok(Self {
            gateway,
            protocol,
            state: ChannelState::Open,
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Wire shape used to decode responses.
    pub fn protocol(&self) -> ProtocolVersion {
        self.protocol
    }

    /// The gateway this channel calls through.
    pub fn gateway(&self) -> &'g Gateway {
        self.gateway
    }

    /// Runs a call that returns a JSON response and decodes it.
    ///
    /// A null response after a successful connect means the service went away
    /// mid-call and is reported as [`DmError::ChannelUnavailable`].
    pub fn invoke<F>(&mut self, symbol: &'static str, call: F) -> DmResult<Envelope>
    where
        F: FnOnce(&Gateway) -> NativeText,
    {
        self.ensure_open(symbol)?;
        let response = call(self.gateway);
        if response.is_null() {
            return Err(DmError::ChannelUnavailable(format!(
                "{symbol} returned no response"
            )));
        }
        let raw = response.into_string();
        Envelope::decode(&raw, self.protocol)
    }

    /// Runs a call whose return value `1` means the service accepted it.
    pub fn invoke_accepted<F>(&mut self, symbol: &'static str, call: F) -> DmResult<bool>
    where
        F: FnOnce(&Gateway) -> i32,
    {
        self.ensure_open(symbol)?;
        Ok(call(self.gateway) == 1)
    }

    /// Closes the channel. Safe to call more than once.
    pub fn close(&mut self) {
        if self.state == ChannelState::Closed {
            return;
        }
        self.state = ChannelState::Closed;
        // SAFETY: resolved with a matching signature.
        let code = unsafe { (self.gateway.procs().close)() };
        if code != 0 {
            warn!(code, "DM_Close reported a non-zero status");
        }
        debug!("Session channel closed");
    }

    fn ensure_open(&self, symbol: &'static str) -> DmResult<()> {
        match self.state {
            ChannelState::Open => Ok(()),
            ChannelState::Closed => Err(DmError::ChannelUnavailable(format!(
                "{symbol} called on a closed channel"
            ))),
        }
    }
}

impl Drop for SessionChannel<'_> {
    fn drop(&mut self) {
        self.close();
    }
}
