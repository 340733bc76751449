//! IPC event types (server to client).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use autocaster_core::ConnectionState;

/// Event sent from daemon to subscribed clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Event type
    pub event: EventType,
    /// Event data
    pub data: Value,
}

impl Event {
    /// Build an event from any serializable payload.
    #[must_use]
    pub fn new(event: EventType, data: impl Serialize) -> Self {
        Self { event, data: serde_json::to_value(data).unwrap_or(Value::Null) }
    }
}

/// Types of events that can be subscribed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// OBS connection state changed
    ConnectionStateChanged,
    /// Raw OBS event, re-broadcast as received
    Obs,
    /// New ops log entry
    OpsLog,
    /// Error occurred
    Error,
}

/// Connection state changed event data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStateChangedData {
    pub state: ConnectionState,
    pub scene_graph_ready: bool,
}

/// Error event data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorData {
    pub code: i32,
    pub message: String,
    pub source: String,
}
