//! Transport layer: the seam between the connection manager and obs-websocket.
//!
//! [`Connector`] opens an identified session and [`Transport`] issues
//! requests on it. The WebSocket implementation runs a dedicated reader task
//! that matches responses to pending requests by id and forwards events, so
//! awaiting a response never blocks event delivery.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::error::{ObsError, ObsResult};
use crate::event::ObsEvent;
use crate::protocol::{self, EventMessage, Hello, Identified, RequestResponse, op};

/// Default obs-websocket endpoint.
pub const DEFAULT_URL: &str = "ws://127.0.0.1:4455";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Pending = Arc<Mutex<HashMap<String, oneshot::Sender<ObsResult<Value>>>>>;

/// Where and how to reach OBS.
#[derive(Clone, PartialEq, Eq)]
pub struct Endpoint {
    url: String,
    password: Option<String>,
}

impl Endpoint {
    /// Create an endpoint from a `ws://` or `wss://` URL.
    ///
    /// An empty password is treated as no password.
    ///
    /// # Errors
    /// Returns [`ObsError::InvalidArgument`] for a malformed URL or a
    /// non-WebSocket scheme.
    pub fn new(url: &str, password: Option<String>) -> ObsResult<Self> {
        let url = url.trim();
        let parsed = Url::parse(url)
            .map_err(|e| ObsError::InvalidArgument(format!("invalid OBS URL {url}: {e}")))?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(ObsError::InvalidArgument(format!(
                "OBS URL must use ws:// or wss://, got {}",
                parsed.scheme()
            )));
        }
        let password = password.filter(|p| !p.is_empty());
        Ok(Self { url: url.to_string(), password })
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    #[must_use]
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self { url: DEFAULT_URL.to_string(), password: None }
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("url", &self.url)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Notifications from a live transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// An OBS event
    Event(ObsEvent),
    /// A client-side error that did not close the socket by itself
    Error(String),
    /// The server identified the session again
    Reidentified,
    /// The socket is gone; no further events follow
    Closed { code: Option<u16>, reason: String },
}

/// Request/response channel to OBS.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue a named request and wait for its response data.
    async fn call(&self, request_type: &str, data: Option<Value>) -> ObsResult<Value>;

    /// Close the connection.
    async fn close(&self) -> ObsResult<()>;

    /// Whether the underlying socket is still usable.
    fn is_open(&self) -> bool;
}

/// An identified session returned by a [`Connector`].
pub struct Session {
    pub transport: Arc<dyn Transport>,
    pub events: mpsc::Receiver<TransportEvent>,
    pub obs_web_socket_version: String,
    pub negotiated_rpc_version: u32,
}

/// Opens identified sessions.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &Endpoint) -> ObsResult<Session>;
}

/// obs-websocket connector over `tokio-tungstenite`.
#[derive(Debug, Clone)]
pub struct WsConnector {
    handshake_timeout: Duration,
    request_timeout: Duration,
}

impl Default for WsConnector {
    fn default() -> Self {
        Self { handshake_timeout: Duration::from_secs(10), request_timeout: Duration::from_secs(30) }
    }
}

impl WsConnector {
    #[must_use]
    pub fn new(handshake_timeout: Duration, request_timeout: Duration) -> Self {
        Self { handshake_timeout, request_timeout }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, endpoint: &Endpoint) -> ObsResult<Session> {
        debug!(url = %endpoint.url(), auth = endpoint.password().is_some(), "Opening OBS WebSocket");

        let (mut ws, _response) = timeout(self.handshake_timeout, connect_async(endpoint.url()))
            .await
            .map_err(|_| ObsError::Transport(format!("timed out connecting to {}", endpoint.url())))?
            .map_err(|e| ObsError::Transport(format!("failed to connect to {}: {e}", endpoint.url())))?;

        let (hello, identified) =
            timeout(self.handshake_timeout, handshake(&mut ws, endpoint.password()))
                .await
                .map_err(|_| ObsError::Transport("timed out during handshake".into()))??;

        info!(
            version = %hello.obs_web_socket_version,
            rpc = identified.negotiated_rpc_version,
            "OBS session identified"
        );

        Ok(WsTransport::spawn(ws, hello, identified, self.request_timeout))
    }
}

/// Run Hello / Identify / Identified on a fresh socket.
async fn handshake(ws: &mut WsStream, password: Option<&str>) -> ObsResult<(Hello, Identified)> {
    let envelope = next_envelope(ws).await?;
    if envelope.op != op::HELLO {
        return Err(ObsError::Protocol(format!("expected Hello, got op {}", envelope.op)));
    }
    let hello: Hello = serde_json::from_value(envelope.d)?;

    let identify = protocol::identify(&hello, password)?;
    ws.send(Message::Text(identify.to_string()))
        .await
        .map_err(|e| ObsError::Transport(format!("failed to send Identify: {e}")))?;

    let envelope = next_envelope(ws).await?;
    if envelope.op != op::IDENTIFIED {
        return Err(ObsError::Protocol(format!("expected Identified, got op {}", envelope.op)));
    }
    let identified: Identified = serde_json::from_value(envelope.d)?;

    Ok((hello, identified))
}

/// Read the next text frame during the handshake.
async fn next_envelope(ws: &mut WsStream) -> ObsResult<protocol::Envelope> {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => return protocol::Envelope::parse(&text),
            Some(Ok(Message::Close(frame))) => {
                let code = frame.as_ref().map(|f| u16::from(f.code));
                let reason = frame.map(|f| f.reason.into_owned()).unwrap_or_default();
                if code == Some(protocol::CLOSE_AUTHENTICATION_FAILED) {
                    return Err(ObsError::Auth(if reason.is_empty() {
                        "authentication rejected by OBS".into()
                    } else {
                        reason
                    }));
                }
                return Err(ObsError::Transport(format!(
                    "connection closed during handshake ({}): {reason}",
                    code.unwrap_or_default()
                )));
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(ObsError::Transport(e.to_string())),
            None => return Err(ObsError::Transport("connection closed during handshake".into())),
        }
    }
}

/// Live obs-websocket transport.
pub struct WsTransport {
    outgoing: mpsc::Sender<Message>,
    pending: Pending,
    next_id: AtomicU64,
    open: Arc<AtomicBool>,
    request_timeout: Duration,
}

impl WsTransport {
    /// Start the reader and writer tasks for an identified socket.
    fn spawn(ws: WsStream, hello: Hello, identified: Identified, request_timeout: Duration) -> Session {
        let (sink, stream) = ws.split();
        let (outgoing_tx, outgoing_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::channel(256);
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let open = Arc::new(AtomicBool::new(true));

        tokio::spawn(write_loop(sink, outgoing_rx, event_tx.clone()));
        tokio::spawn(read_loop(stream, Arc::clone(&pending), event_tx, Arc::clone(&open)));

        let transport = Self { outgoing: outgoing_tx, pending, next_id: AtomicU64::new(1), open, request_timeout };

        Session {
            transport: Arc::new(transport),
            events: event_rx,
            obs_web_socket_version: hello.obs_web_socket_version,
            negotiated_rpc_version: identified.negotiated_rpc_version,
        }
    }

    fn closed() -> ObsError {
        ObsError::Transport("connection closed".into())
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn call(&self, request_type: &str, data: Option<Value>) -> ObsResult<Value> {
        if !self.is_open() {
            return Err(Self::closed());
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id.clone(), tx);

        trace!(request_type, request_id = %id, "Sending request");
        let frame = protocol::request(request_type, &id, data).to_string();
        if self.outgoing.send(Message::Text(frame)).await.is_err() {
            self.pending.lock().remove(&id);
            return Err(Self::closed());
        }

        match timeout(self.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Self::closed()),
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(ObsError::Transport(format!("{request_type} timed out")))
            }
        }
    }

    async fn close(&self) -> ObsResult<()> {
        self.outgoing
            .send(Message::Close(None))
            .await
            .map_err(|_| ObsError::Transport("connection already closed".into()))
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.outgoing.is_closed()
    }
}

async fn write_loop(
    mut sink: SplitSink<WsStream, Message>,
    mut outgoing: mpsc::Receiver<Message>,
    events: mpsc::Sender<TransportEvent>,
) {
    while let Some(message) = outgoing.recv().await {
        let closing = matches!(message, Message::Close(_));
        if let Err(e) = sink.send(message).await {
            warn!(error = %e, "OBS write failed");
            let _ = events.send(TransportEvent::Error(e.to_string())).await;
            break;
        }
        if closing {
            break;
        }
    }
    let _ = sink.close().await;
}

async fn read_loop(
    mut stream: SplitStream<WsStream>,
    pending: Pending,
    events: mpsc::Sender<TransportEvent>,
    open: Arc<AtomicBool>,
) {
    let mut close_code = None;
    let mut close_reason = String::from("connection lost");

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => handle_text(&text, &pending, &events).await,
            Ok(Message::Close(frame)) => {
                close_code = frame.as_ref().map(|f| u16::from(f.code));
                close_reason = frame.map(|f| f.reason.into_owned()).unwrap_or_default();
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "OBS read failed");
                let _ = events.send(TransportEvent::Error(e.to_string())).await;
                break;
            }
        }
    }

    open.store(false, Ordering::Release);
    for (_, tx) in pending.lock().drain() {
        let _ = tx.send(Err(WsTransport::closed()));
    }

    debug!(code = ?close_code, reason = %close_reason, "OBS reader finished");
    let _ = events.send(TransportEvent::Closed { code: close_code, reason: close_reason }).await;
}

async fn handle_text(text: &str, pending: &Pending, events: &mpsc::Sender<TransportEvent>) {
    let envelope = match protocol::Envelope::parse(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(error = %e, "Malformed frame from OBS");
            let _ = events.send(TransportEvent::Error(format!("malformed frame: {e}"))).await;
            return;
        }
    };

    match envelope.op {
        op::REQUEST_RESPONSE => match serde_json::from_value::<RequestResponse>(envelope.d) {
            Ok(response) => {
                let waiter = pending.lock().remove(&response.request_id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(response.into_result());
                    }
                    None => debug!(request_id = %response.request_id, "Response without a waiter"),
                }
            }
            Err(e) => {
                let _ = events.send(TransportEvent::Error(format!("malformed response: {e}"))).await;
            }
        },
        op::EVENT => match serde_json::from_value::<EventMessage>(envelope.d) {
            Ok(message) => {
                let event = ObsEvent::from_wire(&message.event_type, message.event_data);
                let _ = events.send(TransportEvent::Event(event)).await;
            }
            Err(e) => {
                let _ = events.send(TransportEvent::Error(format!("malformed event: {e}"))).await;
            }
        },
        op::IDENTIFIED => {
            let _ = events.send(TransportEvent::Reidentified).await;
        }
        other => debug!(op = other, "Ignoring frame"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    #[test]
    fn test_endpoint_validation() {
        let endpoint = Endpoint::new("ws://10.0.0.5:4455", Some(String::new())).unwrap();
        assert_eq!(endpoint.url(), "ws://10.0.0.5:4455");
        assert_eq!(endpoint.password(), None);

        assert_matches!(Endpoint::new("http://localhost:4455", None), Err(ObsError::InvalidArgument(_)));
        assert_matches!(Endpoint::new("not a url", None), Err(ObsError::InvalidArgument(_)));
        assert_eq!(Endpoint::default().url(), "ws://127.0.0.1:4455");
    }

    #[test]
    fn test_endpoint_debug_redacts_password() {
        let endpoint = Endpoint::new("ws://127.0.0.1:4455", Some("hunter2".into())).unwrap();
        let debug = format!("{endpoint:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("redacted"));
    }

    /// Minimal obs-websocket server: handshake, one response, one event.
    async fn serve_once(listener: TcpListener) {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(tcp).await.unwrap();

        let hello = json!({ "op": 0, "d": { "obsWebSocketVersion": "5.4.2", "rpcVersion": 1 } });
        ws.send(Message::Text(hello.to_string())).await.unwrap();

        let identify = ws.next().await.unwrap().unwrap();
        let identify: Value = serde_json::from_str(identify.to_text().unwrap()).unwrap();
        assert_eq!(identify["op"], 1);
        ws.send(Message::Text(json!({ "op": 2, "d": { "negotiatedRpcVersion": 1 } }).to_string()))
            .await
            .unwrap();

        let request = ws.next().await.unwrap().unwrap();
        let request: Value = serde_json::from_str(request.to_text().unwrap()).unwrap();
        let event = json!({
            "op": 5,
            "d": { "eventType": "CurrentProgramSceneChanged", "eventIntent": 4, "eventData": { "sceneName": "Break" } }
        });
        ws.send(Message::Text(event.to_string())).await.unwrap();
        let response = json!({
            "op": 7,
            "d": {
                "requestType": request["d"]["requestType"],
                "requestId": request["d"]["requestId"],
                "requestStatus": { "result": true, "code": 100 },
                "responseData": { "outputActive": true }
            }
        });
        ws.send(Message::Text(response.to_string())).await.unwrap();

        ws.close(None).await.unwrap();
    }

    #[tokio::test]
    async fn test_ws_session_roundtrip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(serve_once(listener));

        let endpoint = Endpoint::new(&format!("ws://{addr}"), None).unwrap();
        let mut session = WsConnector::default().connect(&endpoint).await.unwrap();
        assert_eq!(session.obs_web_socket_version, "5.4.2");
        assert_eq!(session.negotiated_rpc_version, 1);

        let status = session.transport.call("GetStreamStatus", None).await.unwrap();
        assert_eq!(status["outputActive"], true);

        let event = session.events.recv().await.unwrap();
        assert_eq!(
            event,
            TransportEvent::Event(ObsEvent::CurrentProgramSceneChanged { scene: "Break".into() })
        );

        let closed = session.events.recv().await.unwrap();
        assert_matches!(closed, TransportEvent::Closed { .. });
        assert!(!session.transport.is_open());
        assert_matches!(
            session.transport.call("GetStreamStatus", None).await,
            Err(ObsError::Transport(_))
        );

        server.await.unwrap();
    }
}
