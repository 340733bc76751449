//! obs-websocket 5.x wire messages.
//!
//! Every frame is a JSON object `{ "op": <opcode>, "d": <payload> }`. The
//! session starts with Hello (server), Identify (client) and Identified
//! (server); afterwards requests and responses are matched by `requestId`
//! and events arrive unsolicited.

use base64::Engine;
use serde::Deserialize;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};

use crate::error::{ObsError, ObsResult};

/// Protocol opcodes.
pub mod op {
    pub const HELLO: u8 = 0;
    pub const IDENTIFY: u8 = 1;
    pub const IDENTIFIED: u8 = 2;
    pub const EVENT: u8 = 5;
    pub const REQUEST: u8 = 6;
    pub const REQUEST_RESPONSE: u8 = 7;
}

/// Request status codes this crate reacts to.
pub mod status {
    pub const SUCCESS: u16 = 100;
    pub const NOT_READY: u16 = 207;
    pub const OUTPUT_RUNNING: u16 = 500;
    pub const OUTPUT_NOT_RUNNING: u16 = 501;
    pub const RESOURCE_NOT_FOUND: u16 = 600;
    pub const RESOURCE_ALREADY_EXISTS: u16 = 601;
}

/// Close code sent by OBS when authentication fails.
pub const CLOSE_AUTHENTICATION_FAILED: u16 = 4009;

/// RPC version requested during Identify.
pub const RPC_VERSION: u32 = 1;

/// Event subscription mask for every non high-volume category.
pub const EVENT_SUBSCRIPTION_ALL: u32 = 2047;

/// Raw frame envelope.
#[derive(Debug, Deserialize)]
pub struct Envelope {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
}

impl Envelope {
    /// Parse a text frame.
    ///
    /// # Errors
    /// Returns an error if the frame is not a valid envelope.
    pub fn parse(text: &str) -> ObsResult<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Hello payload (server to client).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hello {
    pub obs_web_socket_version: String,
    pub rpc_version: u32,
    #[serde(default)]
    pub authentication: Option<AuthChallenge>,
}

/// Authentication challenge from the server.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthChallenge {
    pub challenge: String,
    pub salt: String,
}

/// Identified payload (server to client).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identified {
    pub negotiated_rpc_version: u32,
}

/// Request status block of a response.
#[derive(Debug, Clone, Deserialize)]
pub struct RequestStatus {
    pub result: bool,
    pub code: u16,
    #[serde(default)]
    pub comment: Option<String>,
}

/// RequestResponse payload (server to client).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestResponse {
    pub request_type: String,
    pub request_id: String,
    pub request_status: RequestStatus,
    #[serde(default)]
    pub response_data: Option<Value>,
}

impl RequestResponse {
    /// Convert into the response data or a classified error.
    ///
    /// # Errors
    /// Returns the classified error when the status reports failure.
    pub fn into_result(self) -> ObsResult<Value> {
        if self.request_status.result {
            Ok(self.response_data.unwrap_or_else(|| json!({})))
        } else {
            Err(ObsError::from_status(self.request_status.code, self.request_status.comment))
        }
    }
}

/// Event payload (server to client).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMessage {
    pub event_type: String,
    #[serde(default)]
    pub event_data: Value,
}

/// Generate the authentication string for a challenge.
///
/// `base64(sha256(base64(sha256(password + salt)) + challenge))`
#[must_use]
pub fn auth_response(password: &str, challenge: &str, salt: &str) -> String {
    let engine = base64::engine::general_purpose::STANDARD;
    let secret = engine.encode(Sha256::digest(format!("{password}{salt}").as_bytes()));
    engine.encode(Sha256::digest(format!("{secret}{challenge}").as_bytes()))
}

/// Build the Identify frame for a Hello.
///
/// # Errors
/// Returns [`ObsError::Auth`] if the server requires a password and none was
/// supplied.
pub fn identify(hello: &Hello, password: Option<&str>) -> ObsResult<Value> {
    let mut d = json!({
        "rpcVersion": RPC_VERSION,
        "eventSubscriptions": EVENT_SUBSCRIPTION_ALL,
    });

    if let Some(auth) = &hello.authentication {
        let password = password
            .filter(|p| !p.is_empty())
            .ok_or_else(|| ObsError::Auth("OBS requires authentication but no password provided".into()))?;
        d["authentication"] = Value::String(auth_response(password, &auth.challenge, &auth.salt));
    }

    Ok(json!({ "op": op::IDENTIFY, "d": d }))
}

/// Build a Request frame.
#[must_use]
pub fn request(request_type: &str, request_id: &str, data: Option<Value>) -> Value {
    let mut d = json!({
        "requestType": request_type,
        "requestId": request_id,
    });
    if let Some(data) = data {
        d["requestData"] = data;
    }
    json!({ "op": op::REQUEST, "d": d })
}
