//! Autocaster Daemon - OBS control-plane service.
//!
//! This is the main entry point for the Autocaster daemon, which keeps a
//! session with OBS Studio and serves broadcast automation requests over a
//! Unix socket.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

mod config;
mod server;
mod signals;

use autocaster_ipc::messages::codes;
use autocaster_ipc::{ConnectionStateChangedData, ErrorInfo, Event, EventType, IpcServer, Response, socket_path};
use autocaster_obs::{ConnectionManager, ObsController, OpsLog};

use crate::server::Daemon;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = config::load_config()?;

    // Initialize logging
    let level: LevelFilter = config.daemon.log_level.parse().unwrap_or(LevelFilter::INFO);
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy()
                .add_directive("autocaster=info".parse()?)
                .add_directive("autocaster_daemon=debug".parse()?)
                .add_directive("autocaster_obs=debug".parse()?),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "Starting Autocaster daemon");
    debug!(?config, "Configuration loaded");

    // Ops log
    let ops_log = if config.ops_log.persist {
        let dir = config::ops_log_dir(&config.ops_log)?;
        OpsLog::persistent(config.ops_log.capacity, &dir)
            .await
            .with_context(|| format!("Failed to create ops log directory: {dir:?}"))?
    } else {
        OpsLog::new(config.ops_log.capacity)
    };
    let ops_log = Arc::new(ops_log);

    // OBS controller
    let connection = ConnectionManager::websocket(config.obs.unstable_grace());
    let controller = ObsController::new(connection, config.obs.retry_policy(), config.obs.ready_timeout());

    let shutdown = CancellationToken::new();
    let daemon = Arc::new(Daemon {
        controller: controller.clone(),
        ops_log: Arc::clone(&ops_log),
        connection_config: config::connection_config_path()?,
        shutdown: shutdown.clone(),
    });

    // Start IPC server
    let socket_path = config.daemon.socket_path.clone().unwrap_or_else(socket_path);
    let (ipc_server, mut request_rx) = IpcServer::bind(&socket_path).await.context("Failed to start IPC server")?;
    let event_tx = ipc_server.event_sender();
    let ipc_handle = tokio::spawn(async move { ipc_server.run().await });
    info!(?socket_path, "IPC server started");

    // Forward connection state changes to clients
    let state_events = {
        let event_tx = event_tx.clone();
        let readiness = controller.connection().readiness().clone();
        controller.connection().subscribe(move |state| {
            let data = ConnectionStateChangedData { state, scene_graph_ready: readiness.is_ready() };
            let _ = event_tx.send(Event::new(EventType::ConnectionStateChanged, data));
        })
    };

    // Forward OBS events to clients and the ops log
    let mut obs_events = controller.connection().events();
    let event_tx_obs = event_tx.clone();
    let bridge_handle = tokio::spawn(async move {
        loop {
            match obs_events.recv().await {
                Ok(event) => {
                    if let Some(entry) = ops_log.record(&event) {
                        let _ = event_tx_obs.send(Event::new(EventType::OpsLog, entry));
                    }
                    let _ = event_tx_obs.send(Event::new(EventType::Obs, event));
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "OBS event bridge fell behind");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // Set up signal handlers
    signals::setup_signal_handlers(shutdown.clone())?;

    if config.obs.auto_connect {
        let daemon = Arc::clone(&daemon);
        tokio::spawn(async move {
            match daemon.connect(None, None).await {
                Ok(info) => info!(?info, "Auto-connected to OBS"),
                Err(e) => warn!(code = e.code, error = %e.message, "Auto-connect failed"),
            }
        });
    }

    info!("Autocaster daemon running");

    // Main event loop
    loop {
        tokio::select! {
            // Handle IPC requests
            Some((client_id, request, response_tx)) = request_rx.recv() => {
                debug!(client_id, request_id = request.id, "Handling IPC request");
                let daemon = Arc::clone(&daemon);
                tokio::spawn(async move {
                    let result = tokio::select! {
                        result = server::handle_request(&daemon, request.method) => result,
                        () = daemon.shutdown.cancelled() => {
                            Err(ErrorInfo::new(codes::INTERNAL, "Daemon is shutting down"))
                        }
                    };
                    let _ = response_tx.send(Response { id: request.id, result }).await;
                });
            }

            // Handle shutdown signal or request
            () = shutdown.cancelled() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    // Cleanup
    info!("Shutting down...");
    state_events.unsubscribe();
    controller.shutdown().await;
    bridge_handle.abort();
    ipc_handle.abort();
    daemon.ops_log.flush().await;

    info!("Autocaster daemon stopped");
    Ok(())
}
