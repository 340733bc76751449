//! Autocaster Core - Domain types shared by the OBS control layer and the daemon.
//!
//! This crate holds everything that can be reasoned about without a live OBS
//! connection: the connection state machine values, the declarative asset map
//! and the profile plan derived from it, stream-service presets, and the
//! summary shapes returned to callers.

pub mod assets;
pub mod error;
pub mod profile;
pub mod state;
pub mod stream_service;
pub mod summary;

pub use assets::{AssetLocation, AssetMap, AssetRef, AssetRole, ResolvedAsset};
pub use error::{Error, Result};
pub use profile::{InputKind, PlannedInput, ProfilePlan, SceneRole};
pub use state::{ConnectInfo, ConnectionEvent, ConnectionState, StateSnapshot};
pub use stream_service::{Platform, ResolvedStreamService, StreamServiceSettings};
pub use summary::{
    AudioInput, CurrentSelection, OutputOutcome, OutputStatus, ProfileSummary, SceneCollections,
    SceneSource, SceneSources, SceneSummary, ScenesAndSources,
};
