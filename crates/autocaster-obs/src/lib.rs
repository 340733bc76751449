//! Autocaster OBS - obs-websocket session management and idempotent control.
//!
//! This crate handles all interactions with OBS Studio, including:
//! - Connecting, identifying and tracking connection health
//! - Gating scene-graph reads while a scene collection is rebuilding
//! - Retrying transient request failures
//! - Creating scenes, inputs and collections without duplicates
//! - Provisioning broadcast profiles and driving outputs

pub mod connection;
pub mod control;
pub mod ensure;
pub mod error;
pub mod event;
pub mod ops_log;
pub mod protocol;
pub mod provision;
pub mod readiness;
pub mod requests;
pub mod retry;
pub mod transport;

#[cfg(test)]
mod testing;

pub use connection::{ConnectionManager, DEFAULT_UNSTABLE_GRACE, Subscription};
pub use control::ObsController;
pub use ensure::{InputSpec, ResourceEnsurer, SettingsPolicy};
pub use error::{ObsError, ObsResult};
pub use event::ObsEvent;
pub use ops_log::{OpsEntry, OpsLog};
pub use provision::ProfileProvisioner;
pub use readiness::{DEFAULT_READY_TIMEOUT, Readiness};
pub use requests::Output;
pub use retry::RetryPolicy;
pub use transport::{Connector, DEFAULT_URL, Endpoint, Transport, WsConnector};
