//! Request handling for the IPC server.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use autocaster_ipc::messages::{ErrorInfo, Method, codes};
use autocaster_obs::{ObsController, ObsError, OpsLog, Output};

use crate::config::{self, ConnectionConfig};

/// Everything a request handler can reach.
pub struct Daemon {
    pub controller: ObsController,
    pub ops_log: Arc<OpsLog>,
    /// Where `connection.json` lives
    pub connection_config: PathBuf,
    /// Cancelled to stop the daemon
    pub shutdown: CancellationToken,
}

fn obs_error(e: ObsError) -> ErrorInfo {
    ErrorInfo::new(e.code(), e.to_string())
}

fn internal(e: &anyhow::Error) -> ErrorInfo {
    ErrorInfo::new(codes::INTERNAL, format!("{e:#}"))
}

fn to_value(value: impl Serialize) -> Result<Value, ErrorInfo> {
    serde_json::to_value(value).map_err(|e| ErrorInfo::new(codes::INTERNAL, e.to_string()))
}

impl Daemon {
    fn load_connection_config(&self) -> Result<ConnectionConfig, ErrorInfo> {
        config::load_connection_config(&self.connection_config).map_err(|e| internal(&e))
    }

    /// Connect using the saved config, with explicit arguments taking
    /// precedence.
    pub async fn connect(&self, url: Option<&str>, password: Option<&str>) -> Result<Value, ErrorInfo> {
        let endpoint = self.load_connection_config()?.merged(url, password).endpoint().map_err(obs_error)?;
        info!(url = %endpoint.url(), "Connecting to OBS");
        let info = self.controller.connect(&endpoint).await.map_err(obs_error)?;
        to_value(info)
    }
}

/// Handle an IPC request and return a response value.
pub async fn handle_request(daemon: &Daemon, method: Method) -> Result<Value, ErrorInfo> {
    let controller = &daemon.controller;

    match method {
        // Connection
        Method::Connect { url, password } => daemon.connect(url.as_deref(), password.as_deref()).await,

        Method::Disconnect => {
            controller.disconnect().await;
            Ok(json!({ "success": true }))
        }

        Method::GetState => to_value(controller.snapshot()),

        Method::IsConnected => Ok(json!({ "connected": controller.connection().is_connected() })),

        Method::GetConfig => Ok(daemon.load_connection_config()?.redacted()),

        Method::SaveConfig { url, password } => {
            let saved = daemon.load_connection_config()?;
            let updated = ConnectionConfig { url, password: password.unwrap_or(saved.password) };
            updated.endpoint().map_err(obs_error)?;
            config::save_connection_config(&daemon.connection_config, &updated).map_err(|e| internal(&e))?;
            Ok(updated.redacted())
        }

        // Scene collections and scenes
        Method::ListSceneCollections => to_value(controller.list_scene_collections().await.map_err(obs_error)?),

        Method::SelectSceneCollection { name } => {
            to_value(controller.select_scene_collection(&name).await.map_err(obs_error)?)
        }

        Method::ScenesAndSources { collection, peek } => {
            to_value(controller.scenes_and_sources_for(collection.as_deref(), peek).await.map_err(obs_error)?)
        }

        Method::ListScenes => to_value(controller.list_scenes().await.map_err(obs_error)?),

        Method::SwitchScene { scene } => {
            let scene = controller.switch_scene(&scene).await.map_err(obs_error)?;
            Ok(json!({ "success": true, "scene": scene }))
        }

        // Outputs
        Method::StartStream => to_value(controller.start_stream().await.map_err(obs_error)?),
        Method::StopStream => to_value(controller.stop_stream().await.map_err(obs_error)?),
        Method::GetStreamStatus => to_value(controller.output_status(Output::Stream).await.map_err(obs_error)?),
        Method::StartRecord => to_value(controller.start_record().await.map_err(obs_error)?),
        Method::StopRecord => to_value(controller.stop_record().await.map_err(obs_error)?),
        Method::GetRecordStatus => to_value(controller.output_status(Output::Record).await.map_err(obs_error)?),
        Method::StartVirtualCam => to_value(controller.start_virtual_cam().await.map_err(obs_error)?),
        Method::StopVirtualCam => to_value(controller.stop_virtual_cam().await.map_err(obs_error)?),
        Method::GetVirtualCamStatus => {
            to_value(controller.output_status(Output::VirtualCam).await.map_err(obs_error)?)
        }

        // Profiles
        Method::ListProfiles => to_value(controller.profiles().list_profiles().await.map_err(obs_error)?),

        Method::CreateProfile { name, assets } => {
            info!(profile = %name, "Creating profile");
            to_value(controller.profiles().create_or_update_profile(&name, &assets).await.map_err(obs_error)?)
        }

        Method::SelectProfile { name } => {
            to_value(controller.profiles().select_profile(&name).await.map_err(obs_error)?)
        }

        Method::EnsureProfileDefaults { name, assets } => to_value(
            controller.profiles().ensure_profile_defaults(&name, assets.as_ref()).await.map_err(obs_error)?,
        ),

        Method::GetProfileState { name } => {
            to_value(controller.profiles().profile_state(&name).await.map_err(obs_error)?)
        }

        // Stream service
        Method::GetStreamService => controller.stream_service().await.map_err(obs_error),

        Method::SetStreamService(settings) => {
            let platform = controller.set_stream_service(&settings).await.map_err(obs_error)?;
            Ok(json!({ "success": true, "platform": platform }))
        }

        Method::ValidateStreamService { platform, server } => {
            let platform = controller.validate_stream_service(&platform, &server).map_err(obs_error)?;
            Ok(json!({ "ok": true, "platform": platform }))
        }

        // Ops log
        Method::GetOpsLog { limit } => to_value(daemon.ops_log.snapshot(limit)),

        // The IPC server answers these itself
        Method::Subscribe { events } | Method::Unsubscribe { events } => {
            debug!(?events, "Subscription request reached the daemon");
            Ok(json!({ "success": true }))
        }

        Method::Shutdown => {
            info!("Shutdown requested via IPC");
            daemon.shutdown.cancel();
            Ok(json!({ "success": true }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autocaster_obs::{ConnectionManager, DEFAULT_READY_TIMEOUT, DEFAULT_UNSTABLE_GRACE, RetryPolicy};

    fn daemon(dir: &tempfile::TempDir) -> Daemon {
        let connection = ConnectionManager::websocket(DEFAULT_UNSTABLE_GRACE);
        Daemon {
            controller: ObsController::new(connection, RetryPolicy::default(), DEFAULT_READY_TIMEOUT),
            ops_log: Arc::new(OpsLog::new(16)),
            connection_config: dir.path().join("connection.json"),
            shutdown: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn test_requests_without_connection() {
        let dir = tempfile::tempdir().unwrap();
        let daemon = daemon(&dir);

        assert_eq!(handle_request(&daemon, Method::IsConnected).await.unwrap(), json!({ "connected": false }));

        let err = handle_request(&daemon, Method::StartStream).await.unwrap_err();
        assert_eq!(err.code, 1001);
        assert_eq!(err.message, "Not connected to OBS");

        let state = handle_request(&daemon, Method::GetState).await.unwrap();
        assert_eq!(state["connection"], "disconnected");
    }

    #[tokio::test]
    async fn test_validate_stream_service_needs_no_connection() {
        let dir = tempfile::tempdir().unwrap();
        let daemon = daemon(&dir);

        let ok = handle_request(
            &daemon,
            Method::ValidateStreamService {
                platform: "twitch".into(),
                server: "rtmp://live.twitch.tv/app".into(),
            },
        )
        .await
        .unwrap();
        assert_eq!(ok, json!({ "ok": true, "platform": "twitch" }));

        let err = handle_request(
            &daemon,
            Method::ValidateStreamService { platform: "myspace".into(), server: "rtmp://x".into() },
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, 1009);
    }

    #[tokio::test]
    async fn test_save_config_keeps_password_when_omitted() {
        let dir = tempfile::tempdir().unwrap();
        let daemon = daemon(&dir);

        let saved = handle_request(
            &daemon,
            Method::SaveConfig { url: "ws://obs.local:4455".into(), password: Some("secret".into()) },
        )
        .await
        .unwrap();
        assert_eq!(saved, json!({ "url": "ws://obs.local:4455", "has_password": true }));

        handle_request(&daemon, Method::SaveConfig { url: "ws://obs.local:4460".into(), password: None })
            .await
            .unwrap();
        let stored = config::load_connection_config(&daemon.connection_config).unwrap();
        assert_eq!(stored.url, "ws://obs.local:4460");
        assert_eq!(stored.password, "secret");

        let err = handle_request(&daemon, Method::SaveConfig { url: "not a url".into(), password: None })
            .await
            .unwrap_err();
        assert_eq!(err.code, 1009);
    }

    #[tokio::test]
    async fn test_ops_log_and_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let daemon = daemon(&dir);
        daemon.ops_log.push("note", "Daemon started", Value::Null);

        let log = handle_request(&daemon, Method::GetOpsLog { limit: Some(5) }).await.unwrap();
        assert_eq!(log[0]["msg"], "Daemon started");
        assert_eq!(log[0]["type"], "note");

        handle_request(&daemon, Method::Shutdown).await.unwrap();
        assert!(daemon.shutdown.is_cancelled());
    }
}
