//! Connection state machine and session snapshots.

use serde::{Deserialize, Serialize};

/// Connection status of the OBS session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Identified and serving requests
    Connected,
    /// Connected, but the transport reported an error recently
    Unstable,
    /// No live transport
    #[default]
    Disconnected,
}

/// Events that can trigger connection state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Handshake completed and the transport is live
    Opened,
    /// The remote closed the connection or the socket dropped
    Closed,
    /// The transport reported a client-side error mid-session
    TransportError,
    /// The remote re-identified the session
    Reidentified,
    /// The unstable grace period elapsed
    GraceElapsed { still_connected: bool },
    /// Local teardown requested via disconnect
    Teardown,
}

impl ConnectionState {
    /// Compute the next state for an event.
    ///
    /// Transitions that are not part of the state machine leave the state
    /// unchanged.
    #[must_use]
    pub fn on_event(self, event: ConnectionEvent) -> Self {
        match (self, event) {
            (Self::Disconnected, ConnectionEvent::Opened)
            | (Self::Unstable, ConnectionEvent::Reidentified)
            | (Self::Unstable, ConnectionEvent::GraceElapsed { still_connected: true }) => {
                Self::Connected
            }
            (Self::Connected, ConnectionEvent::TransportError) => Self::Unstable,
            (Self::Connected | Self::Unstable, ConnectionEvent::Closed)
            | (Self::Unstable, ConnectionEvent::GraceElapsed { still_connected: false })
            | (_, ConnectionEvent::Teardown) => Self::Disconnected,
            (state, _) => state,
        }
    }

    /// Whether requests may be issued in this state.
    #[must_use]
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Connected => "connected",
            Self::Unstable => "unstable",
            Self::Disconnected => "disconnected",
        };
        f.write_str(label)
    }
}

/// Result of a connect call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectInfo {
    /// Version string reported by obs-websocket in its Hello
    pub obs_web_socket_version: String,
    /// RPC version agreed during Identify
    pub negotiated_rpc_version: u32,
    /// True when the call found an existing live session
    pub already_connected: bool,
}

/// Complete snapshot of the connection session.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StateSnapshot {
    /// Current connection state
    pub connection: ConnectionState,
    /// Whether the remote scene graph is stable and queryable
    pub scene_graph_ready: bool,
    /// Endpoint of the live or last attempted session
    pub endpoint: Option<String>,
    /// Handshake details of the live session
    pub session: Option<ConnectInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATES: [ConnectionState; 3] =
        [ConnectionState::Connected, ConnectionState::Unstable, ConnectionState::Disconnected];

    #[test]
    fn test_initial_state_is_disconnected() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_connect_success_from_disconnected() {
        let next = ConnectionState::Disconnected.on_event(ConnectionEvent::Opened);
        assert_eq!(next, ConnectionState::Connected);
    }

    #[test]
    fn test_transport_error_marks_unstable() {
        let next = ConnectionState::Connected.on_event(ConnectionEvent::TransportError);
        assert_eq!(next, ConnectionState::Unstable);
    }

    #[test]
    fn test_grace_elapsed_recovers_only_when_still_connected() {
        let unstable = ConnectionState::Unstable;
        assert_eq!(
            unstable.on_event(ConnectionEvent::GraceElapsed { still_connected: true }),
            ConnectionState::Connected
        );
        assert_eq!(
            unstable.on_event(ConnectionEvent::GraceElapsed { still_connected: false }),
            ConnectionState::Disconnected
        );
    }

    #[test]
    fn test_reidentify_while_unstable_reconnects() {
        let next = ConnectionState::Unstable.on_event(ConnectionEvent::Reidentified);
        assert_eq!(next, ConnectionState::Connected);
    }

    #[test]
    fn test_closed_while_unstable_disconnects() {
        // Closing must win over the pending grace timer
        let next = ConnectionState::Unstable.on_event(ConnectionEvent::Closed);
        assert_eq!(next, ConnectionState::Disconnected);
    }

    #[test]
    fn test_closed_while_connected_disconnects() {
        let next = ConnectionState::Connected.on_event(ConnectionEvent::Closed);
        assert_eq!(next, ConnectionState::Disconnected);
    }

    #[test]
    fn test_teardown_always_disconnects() {
        for state in ALL_STATES {
            assert_eq!(state.on_event(ConnectionEvent::Teardown), ConnectionState::Disconnected);
        }
    }

    #[test]
    fn test_unlisted_transitions_are_noops() {
        let noops = [
            (ConnectionState::Connected, ConnectionEvent::Opened),
            (ConnectionState::Connected, ConnectionEvent::Reidentified),
            (ConnectionState::Connected, ConnectionEvent::GraceElapsed { still_connected: false }),
            (ConnectionState::Unstable, ConnectionEvent::Opened),
            (ConnectionState::Unstable, ConnectionEvent::TransportError),
            (ConnectionState::Disconnected, ConnectionEvent::Closed),
            (ConnectionState::Disconnected, ConnectionEvent::TransportError),
            (ConnectionState::Disconnected, ConnectionEvent::Reidentified),
            (ConnectionState::Disconnected, ConnectionEvent::GraceElapsed { still_connected: true }),
        ];

        for (state, event) in noops {
            assert_eq!(state.on_event(event), state, "{state:?} + {event:?} should be a no-op");
        }
    }

    #[test]
    fn test_state_serializes_snake_case() {
        let json = serde_json::to_string(&ConnectionState::Unstable).unwrap();
        assert_eq!(json, "\"unstable\"");
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
    }
}
