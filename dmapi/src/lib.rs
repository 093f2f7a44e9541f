//! Client for the DistroMate DM API.
//!
//! The DM API is a native component that performs license activation and
//! talks to a background update service. This crate is the boundary and
//! protocol layer on top of it:
//!
//! - **Boundary values**: terminated strings, fixed buffers and native-owned
//!   results, each with an explicit release rule
//! - **Call gateway**: one-time, race-free resolution of the native symbol
//!   surface
//! - **Session channel**: scoped connect → invoke → close against the
//!   background service
//! - **Envelopes**: JSON requests and `status`/`data`/`error` responses
//! - **Update protocol**: sequence-numbered long polling of the update state
//!   machine, plus the stateless activation and licensing calls
//! - **Callback bridge**: keeps the license callback alive for the native side
//!
//! # Example
//!
//! ```no_run
//! use dmapi::{DmApi, UpdateEvent, UpdateWatcher};
//!
//! let api = DmApi::from_env()?;
//! api.set_product_id("com.example.app")?;
//! api.set_license_key("XXXX-XXXX")?;
//! api.activate_license()?;
//!
//! api.check_for_updates(None);
//! let mut watcher = UpdateWatcher::default();
//! while let Some(event) = api.poll_watcher(&mut watcher) {
//!     if let UpdateEvent::Changed(snapshot) = event {
//!         println!("update state: {:?}", snapshot.state);
//!     }
//! }
//! # Ok::<(), dmapi::DmError>(())
//! ```

pub mod activation;
pub mod boundary;
pub mod callback;
mod client;
pub mod config;
pub mod devlicense;
pub mod envelope;
mod error;
pub mod gateway;
pub mod loader;
pub mod logging;
pub mod session;
pub mod symbols;
pub mod update;

pub use activation::{timestamp_to_utc, ActivationErrorCode, ActivationMode};
pub use boundary::{from_fixed_buffer, BoundaryString, NativeText, Ownership};
pub use client::{json_to_canonical, DmApi};
pub use config::SdkConfig;
pub use devlicense::should_skip_check;
pub use envelope::{encode_request, Envelope, Options, ProtocolVersion};
pub use error::{DmError, DmResult, DEV_LICENSE_ERROR_TEXT};
pub use gateway::{Gateway, OnceGate};
pub use session::{ChannelState, SessionChannel};
pub use symbols::{SymbolSource, SymbolTable};
pub use update::{UpdateEvent, UpdateSession, UpdateSnapshot, UpdateState, UpdateWatcher};
