//! IPC server implementation.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::{Sink, SinkExt, StreamExt};
use serde::Serialize;
use serde_json::{Value, json};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{RwLock, broadcast, mpsc};
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{debug, error, info, warn};

use crate::error::{IpcError, IpcResult};
use crate::events::{Event, EventType};
use crate::messages::{ErrorInfo, Method, Request, Response, codes};

/// Longest accepted request line.
pub const MAX_LINE_LENGTH: usize = 1024 * 1024;

/// A request forwarded to the daemon with the channel to answer on.
pub type IncomingRequest = (u64, Request, mpsc::Sender<Response>);

type Clients = Arc<RwLock<HashMap<u64, ClientHandle>>>;

/// IPC server that listens for client connections.
pub struct IpcServer {
    listener: UnixListener,
    clients: Clients,
    next_client_id: AtomicU64,
    event_tx: broadcast::Sender<Event>,
    request_tx: mpsc::Sender<IncomingRequest>,
}

#[derive(Default)]
struct ClientHandle {
    subscriptions: HashSet<EventType>,
}

impl IpcServer {
    /// Create a new IPC server bound to the given socket path.
    ///
    /// # Errors
    /// Returns an error if the socket cannot be created.
    pub async fn bind(socket_path: &Path) -> IpcResult<(Self, mpsc::Receiver<IncomingRequest>)> {
        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Remove stale socket file if it exists
        if socket_path.exists() {
            tokio::fs::remove_file(socket_path).await?;
        }

        let listener = UnixListener::bind(socket_path)?;
        info!(?socket_path, "IPC server listening");

        let (event_tx, _) = broadcast::channel(256);
        let (request_tx, request_rx) = mpsc::channel(64);

        Ok((
            Self {
                listener,
                clients: Arc::new(RwLock::new(HashMap::new())),
                next_client_id: AtomicU64::new(1),
                event_tx,
                request_tx,
            },
            request_rx,
        ))
    }

    /// Run the server, accepting connections.
    pub async fn run(&self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, _)) => {
                    let client_id = self.next_client_id.fetch_add(1, Ordering::SeqCst);
                    info!(client_id, "Client connected");

                    let clients = Arc::clone(&self.clients);
                    let event_rx = self.event_tx.subscribe();
                    let request_tx = self.request_tx.clone();

                    tokio::spawn(async move {
                        if let Err(e) = Self::handle_client(client_id, stream, clients, event_rx, request_tx).await {
                            error!(client_id, error = %e, "Client error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Accept error");
                }
            }
        }
    }

    /// Broadcast an event to all subscribed clients.
    pub fn broadcast(&self, event: Event) {
        let _ = self.event_tx.send(event);
    }

    /// Get a clone of the event sender for broadcasting from other tasks.
    #[must_use]
    pub fn event_sender(&self) -> broadcast::Sender<Event> {
        self.event_tx.clone()
    }

    /// Number of connected clients.
    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    async fn handle_client(
        client_id: u64,
        stream: UnixStream,
        clients: Clients,
        mut event_rx: broadcast::Receiver<Event>,
        request_tx: mpsc::Sender<IncomingRequest>,
    ) -> IpcResult<()> {
        let framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
        let (mut sink, mut lines) = framed.split();
        let (response_tx, mut response_rx) = mpsc::channel::<Response>(16);

        clients.write().await.insert(client_id, ClientHandle::default());

        let result = loop {
            tokio::select! {
                // Read request from client
                line = lines.next() => {
                    let line = match line {
                        None => {
                            debug!(client_id, "Client disconnected");
                            break Ok(());
                        }
                        Some(Err(e)) => break Err(IpcError::from(e)),
                        Some(Ok(line)) => line,
                    };
                    if line.trim().is_empty() {
                        continue;
                    }

                    let request = match parse_request(&line) {
                        Ok(request) => request,
                        Err(rejection) => {
                            warn!(client_id, "Invalid request format");
                            if let Err(e) = send(&mut sink, &rejection).await {
                                break Err(e);
                            }
                            continue;
                        }
                    };
                    debug!(client_id, request_id = request.id, "Received request");

                    let local = match &request.method {
                        Method::Subscribe { events } => Some(update_subscriptions(&clients, client_id, events, true).await),
                        Method::Unsubscribe { events } => Some(update_subscriptions(&clients, client_id, events, false).await),
                        _ => None,
                    };
                    if let Some(subscribed) = local {
                        let response = Response { id: request.id, result: Ok(json!({ "subscribed": subscribed })) };
                        if let Err(e) = send(&mut sink, &response).await {
                            break Err(e);
                        }
                    } else if request_tx.send((client_id, request, response_tx.clone())).await.is_err() {
                        break Err(IpcError::ChannelClosed);
                    }
                }

                // Send response to client
                Some(response) = response_rx.recv() => {
                    if let Err(e) = send(&mut sink, &response).await {
                        break Err(e);
                    }
                }

                // Forward events to client
                event = event_rx.recv() => {
                    match event {
                        Ok(event) => {
                            let subscribed = clients
                                .read()
                                .await
                                .get(&client_id)
                                .is_some_and(|handle| handle.subscriptions.contains(&event.event));
                            if subscribed && let Err(e) = send(&mut sink, &event).await {
                                break Err(e);
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(client_id, skipped, "Client fell behind on events");
                        }
                        Err(broadcast::error::RecvError::Closed) => break Ok(()),
                    }
                }
            }
        };

        // Unregister client
        clients.write().await.remove(&client_id);

        info!(client_id, "Client handler exiting");
        result
    }
}

/// Parse a request line, or build the error response for it.
fn parse_request(line: &str) -> Result<Request, Response> {
    serde_json::from_str::<Request>(line).map_err(|e| {
        let id = serde_json::from_str::<Value>(line)
            .ok()
            .and_then(|value| value.get("id").and_then(Value::as_u64))
            .unwrap_or_default();
        Response { id, result: Err(ErrorInfo::new(codes::INVALID_REQUEST, format!("Invalid request: {e}"))) }
    })
}

async fn update_subscriptions(clients: &Clients, client_id: u64, events: &[EventType], add: bool) -> Vec<EventType> {
    let mut clients = clients.write().await;
    let Some(handle) = clients.get_mut(&client_id) else {
        return Vec::new();
    };
    for event in events {
        if add {
            handle.subscriptions.insert(*event);
        } else {
            handle.subscriptions.remove(event);
        }
    }
    debug!(client_id, subscriptions = ?handle.subscriptions, "Subscriptions updated");
    handle.subscriptions.iter().copied().collect()
}

async fn send<S>(sink: &mut S, message: &impl Serialize) -> IpcResult<()>
where
    S: Sink<String, Error = LinesCodecError> + Unpin,
{
    let line = serde_json::to_string(message)?;
    sink.send(line).await?;
    Ok(())
}
