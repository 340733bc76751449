//! IPC message types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use autocaster_core::{AssetMap, StreamServiceSettings};

use crate::events::EventType;

/// Request envelope sent from client to daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    /// Unique request ID for matching responses
    pub id: u64,
    /// The method to invoke
    pub method: Method,
}

/// Response envelope sent from daemon to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Request ID this is responding to
    pub id: u64,
    /// Result of the request
    pub result: Result<Value, ErrorInfo>,
}

/// Error information in a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Error code
    pub code: i32,
    /// Human-readable error message
    pub message: String,
}

impl ErrorInfo {
    /// Create a new error.
    #[must_use]
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }
}

/// Error codes produced by the IPC layer itself.
pub mod codes {
    /// The line was not a valid request (bad JSON, unknown method or field)
    pub const INVALID_REQUEST: i32 = -32600;
    /// The daemon failed to produce a response
    pub const INTERNAL: i32 = -32603;
}

/// Methods that can be invoked via IPC.
///
/// Unknown methods and unknown parameter fields are rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "params", deny_unknown_fields)]
pub enum Method {
    // Connection
    /// Connect to OBS; missing fields come from the saved connection config
    Connect {
        #[serde(default)]
        url: Option<String>,
        #[serde(default)]
        password: Option<String>,
    },
    /// Close the OBS connection
    Disconnect,
    /// Connection state, readiness and session details
    GetState,
    /// Whether the connection is usable
    IsConnected,
    /// Saved connection config (password redacted)
    GetConfig,
    /// Persist the connection config
    SaveConfig {
        url: String,
        #[serde(default)]
        password: Option<String>,
    },

    // Scene collections and scenes
    ListSceneCollections,
    SelectSceneCollection { name: String },
    /// Scenes and sources of the current collection, or of a named one
    ScenesAndSources {
        #[serde(default)]
        collection: Option<String>,
        /// Switch back to the previous collection after reading
        #[serde(default)]
        peek: bool,
    },
    ListScenes,
    SwitchScene { scene: String },

    // Outputs
    StartStream,
    StopStream,
    GetStreamStatus,
    StartRecord,
    StopRecord,
    GetRecordStatus,
    StartVirtualCam,
    StopVirtualCam,
    GetVirtualCamStatus,

    // Profiles
    /// Scene collections, as profiles
    ListProfiles,
    /// Create or update a profile from an asset map
    CreateProfile { name: String, assets: AssetMap },
    SelectProfile { name: String },
    /// Make sure a profile has its canonical scenes, and inputs when assets
    /// are given
    EnsureProfileDefaults {
        name: String,
        #[serde(default)]
        assets: Option<AssetMap>,
    },
    GetProfileState { name: String },

    // Stream service
    GetStreamService,
    SetStreamService(StreamServiceSettings),
    ValidateStreamService { platform: String, server: String },

    // Ops log
    /// Most recent ops log entries, oldest first
    GetOpsLog {
        #[serde(default)]
        limit: Option<usize>,
    },

    // Subscriptions
    /// Subscribe to event types
    Subscribe { events: Vec<EventType> },
    /// Unsubscribe from event types
    Unsubscribe { events: Vec<EventType> },

    // System
    /// Stop the virtual camera, disconnect and exit
    Shutdown,
}
