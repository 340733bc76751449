//! Connection lifecycle manager.
//!
//! [`ConnectionManager`] is the only owner of the live transport. It drives
//! the connection state machine from transport notifications, keeps the
//! readiness gate in step with collection-change events, and re-broadcasts
//! OBS events to the rest of the process.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use autocaster_core::{ConnectInfo, ConnectionEvent, ConnectionState, StateSnapshot};

use crate::error::{ObsError, ObsResult};
use crate::event::ObsEvent;
use crate::readiness::Readiness;
use crate::requests;
use crate::transport::{Connector, Endpoint, Transport, TransportEvent, WsConnector};

/// How long an unstable session may take to recover before it is dropped.
pub const DEFAULT_UNSTABLE_GRACE: Duration = Duration::from_millis(1500);

type Listener = Arc<dyn Fn(ConnectionState) + Send + Sync>;

/// The live session.
struct Live {
    transport: Arc<dyn Transport>,
    info: ConnectInfo,
    /// Session generation this transport belongs to
    generation: u64,
}

struct Shared {
    state: watch::Sender<ConnectionState>,
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_listener: AtomicU64,
    /// Serializes transitions so listeners observe them in order
    transition: Mutex<()>,
    live: ArcSwapOption<Live>,
    endpoint: Mutex<Option<String>>,
    connecting: AtomicBool,
    /// Bumped by every connect and disconnect; stale tasks compare against it
    generation: AtomicU64,
    readiness: Readiness,
    events: broadcast::Sender<ObsEvent>,
    pump: Mutex<Option<JoinHandle<()>>>,
    grace: Duration,
}

impl Shared {
    fn current_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Apply a state machine event, notifying listeners on change.
    ///
    /// Returns the previous and the new state.
    fn apply(&self, event: ConnectionEvent) -> (ConnectionState, ConnectionState) {
        let _guard = self.transition.lock();
        let current = self.current_state();
        let next = current.on_event(event);
        if next != current {
            self.state.send_replace(next);
            info!(from = %current, to = %next, ?event, "OBS connection state changed");
            let listeners: Vec<Listener> =
                self.listeners.lock().iter().map(|(_, listener)| Arc::clone(listener)).collect();
            for listener in listeners {
                listener(next);
            }
        }
        (current, next)
    }

    /// Drop the session of `generation` if it is still the live one.
    fn end_session(&self, generation: u64, event: ConnectionEvent) {
        let previous = self.live.rcu(|live| match live {
            Some(l) if l.generation == generation => None,
            other => other.clone(),
        });
        if previous.as_ref().is_some_and(|l| l.generation == generation) {
            self.readiness.reset();
            self.apply(event);
        }
    }
}

/// Handle returned by [`ConnectionManager::subscribe`].
///
/// Dropping it leaves the listener attached; call
/// [`Subscription::unsubscribe`] to detach.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    shared: Weak<Shared>,
}

impl std::fmt::Debug for Shared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shared").field("state", &self.current_state()).finish_non_exhaustive()
    }
}

impl Subscription {
    /// Detach the listener.
    pub fn unsubscribe(self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.listeners.lock().retain(|(id, _)| *id != self.id);
        }
    }
}

/// Clears the in-flight flag when a connect attempt ends.
struct ConnectingGuard<'a>(&'a AtomicBool);

impl<'a> ConnectingGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> ObsResult<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| ObsError::AlreadyConnecting)?;
        Ok(Self(flag))
    }
}

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Owner of the OBS session.
#[derive(Clone)]
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
}

impl ConnectionManager {
    /// Create a manager that connects through `connector`.
    #[must_use]
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self::with_grace(connector, DEFAULT_UNSTABLE_GRACE)
    }

    /// Create a manager with a custom unstable grace period.
    #[must_use]
    pub fn with_grace(connector: Arc<dyn Connector>, grace: Duration) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (events, _) = broadcast::channel(256);
        let shared = Shared {
            state,
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(1),
            transition: Mutex::new(()),
            live: ArcSwapOption::empty(),
            endpoint: Mutex::new(None),
            connecting: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            readiness: Readiness::new(),
            events,
            pump: Mutex::new(None),
            grace,
        };
        Self { connector, shared: Arc::new(shared) }
    }

    /// Create a manager using the WebSocket connector.
    #[must_use]
    pub fn websocket(grace: Duration) -> Self {
        Self::with_grace(Arc::new(WsConnector::default()), grace)
    }

    /// Connect to OBS.
    ///
    /// Returns the existing session details when already connected.
    ///
    /// # Errors
    /// Returns [`ObsError::AlreadyConnecting`] if another connect is in
    /// flight, or the transport / authentication failure of the attempt.
    pub async fn connect(&self, endpoint: &Endpoint) -> ObsResult<ConnectInfo> {
        if self.state() != ConnectionState::Disconnected {
            if let Some(live) = self.shared.live.load_full() {
                debug!("Connect requested while already connected");
                return Ok(ConnectInfo { already_connected: true, ..live.info.clone() });
            }
        }

        let _connecting = ConnectingGuard::acquire(&self.shared.connecting)?;
        let started = self.shared.generation.load(Ordering::SeqCst);
        *self.shared.endpoint.lock() = Some(endpoint.url().to_string());

        info!(url = %endpoint.url(), "Connecting to OBS");
        let session = self.connector.connect(endpoint).await.inspect_err(|e| {
            warn!(url = %endpoint.url(), error = %e, "OBS connection failed");
        })?;

        let generation = started + 1;
        if self
            .shared
            .generation
            .compare_exchange(started, generation, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            // A disconnect ran while the handshake was in flight
            if let Err(e) = session.transport.close().await {
                debug!(error = %e, "Failed to close cancelled OBS session");
            }
            return Err(ObsError::Transport("connection attempt cancelled by disconnect".into()));
        }

        let info = ConnectInfo {
            obs_web_socket_version: session.obs_web_socket_version,
            negotiated_rpc_version: session.negotiated_rpc_version,
            already_connected: false,
        };
        let transport = session.transport;

        self.shared.readiness.reset();
        self.shared.live.store(Some(Arc::new(Live {
            transport: Arc::clone(&transport),
            info: info.clone(),
            generation,
        })));

        // Opened must land before the pump can apply a Closed
        self.shared.apply(ConnectionEvent::Opened);
        let pump = tokio::spawn(pump(Arc::clone(&self.shared), session.events, generation));
        if let Some(previous) = self.shared.pump.lock().replace(pump) {
            previous.abort();
        }
        self.probe_scene_graph(transport.as_ref(), generation).await;

        Ok(info)
    }

    /// One direct scene-graph read after connect; success means ready.
    async fn probe_scene_graph(&self, transport: &dyn Transport, generation: u64) {
        match requests::scene_list(transport).await {
            Ok(_) if self.shared.is_current(generation) => self.shared.readiness.mark_ready(),
            Ok(_) => {}
            Err(e) => debug!(error = %e, "Scene graph probe failed; waiting for collection events"),
        }
    }

    /// Tear down the session. Always ends in `Disconnected`.
    pub async fn disconnect(&self) {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        let live = self.shared.live.swap(None);
        if let Some(pump) = self.shared.pump.lock().take() {
            pump.abort();
        }

        if let Some(live) = live {
            if let Err(e) = live.transport.close().await {
                warn!(error = %e, "Error closing OBS connection");
            }
            info!("Disconnected from OBS");
        }

        self.shared.readiness.reset();
        self.shared.apply(ConnectionEvent::Teardown);
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.current_state()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Register a state listener.
    ///
    /// The listener runs synchronously with the current state before this
    /// returns, then on every transition. It must not call back into the
    /// manager's subscribe or transition paths.
    pub fn subscribe(&self, listener: impl Fn(ConnectionState) + Send + Sync + 'static) -> Subscription {
        let listener: Listener = Arc::new(listener);
        let _guard = self.shared.transition.lock();
        let id = self.shared.next_listener.fetch_add(1, Ordering::Relaxed);
        listener(self.shared.current_state());
        self.shared.listeners.lock().push((id, listener));
        Subscription { id, shared: Arc::downgrade(&self.shared) }
    }

    /// Async view of the connection state.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Stream of OBS events from the live session.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<ObsEvent> {
        self.shared.events.subscribe()
    }

    #[must_use]
    pub fn readiness(&self) -> &Readiness {
        &self.shared.readiness
    }

    #[must_use]
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            connection: self.state(),
            scene_graph_ready: self.shared.readiness.is_ready(),
            endpoint: self.shared.endpoint.lock().clone(),
            session: self.shared.live.load_full().map(|live| live.info.clone()),
        }
    }

    /// The live transport.
    ///
    /// # Errors
    /// Returns [`ObsError::NotConnected`] unless the state is `Connected`.
    pub fn transport(&self) -> ObsResult<Arc<dyn Transport>> {
        if !self.is_connected() {
            return Err(ObsError::NotConnected);
        }
        self.shared
            .live
            .load_full()
            .map(|live| Arc::clone(&live.transport))
            .ok_or(ObsError::NotConnected)
    }

    /// Issue a raw request on the live transport.
    ///
    /// # Errors
    /// Returns [`ObsError::NotConnected`] or the request's failure.
    pub async fn call(&self, request_type: &str, data: Option<Value>) -> ObsResult<Value> {
        self.transport()?.call(request_type, data).await
    }
}

/// Consume transport notifications for one session.
async fn pump(shared: Arc<Shared>, mut events: mpsc::Receiver<TransportEvent>, generation: u64) {
    while let Some(event) = events.recv().await {
        if !shared.is_current(generation) {
            return;
        }
        match event {
            TransportEvent::Event(event) => {
                match &event {
                    ObsEvent::CurrentSceneCollectionChanging { name } => {
                        debug!(collection = %name, "Scene collection changing");
                        shared.readiness.mark_not_ready();
                    }
                    ObsEvent::CurrentSceneCollectionChanged { name } => {
                        debug!(collection = %name, "Scene collection changed");
                        shared.readiness.mark_ready();
                    }
                    ObsEvent::ExitStarted => info!("OBS is shutting down"),
                    _ => {}
                }
                let _ = shared.events.send(event);
            }
            TransportEvent::Error(message) => {
                warn!(error = %message, "OBS transport error");
                let (from, to) = shared.apply(ConnectionEvent::TransportError);
                if from == ConnectionState::Connected && to == ConnectionState::Unstable {
                    schedule_grace(Arc::clone(&shared), generation);
                }
            }
            TransportEvent::Reidentified => {
                shared.apply(ConnectionEvent::Reidentified);
            }
            TransportEvent::Closed { code, reason } => {
                info!(?code, %reason, "OBS connection closed");
                break;
            }
        }
    }

    if shared.is_current(generation) {
        shared.end_session(generation, ConnectionEvent::Closed);
    }
}

/// Re-evaluate an unstable session once the grace period passes.
fn schedule_grace(shared: Arc<Shared>, generation: u64) {
    tokio::spawn(async move {
        tokio::time::sleep(shared.grace).await;
        if !shared.is_current(generation) {
            return;
        }
        let still_connected = shared
            .live
            .load_full()
            .is_some_and(|live| live.generation == generation && live.transport.is_open());
        if still_connected {
            shared.apply(ConnectionEvent::GraceElapsed { still_connected });
        } else {
            shared.end_session(generation, ConnectionEvent::GraceElapsed { still_connected });
        }
    });
}
