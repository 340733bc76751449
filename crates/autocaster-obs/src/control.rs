//! High-level OBS control operations.
//!
//! [`ObsController`] is what the daemon talks to. Scene-graph reads go
//! through the readiness gate and the retry policy; output toggles check the
//! current output state first so repeated requests are harmless.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use autocaster_core::stream_service::{self, Platform, StreamServiceSettings};
use autocaster_core::summary::{
    CurrentSelection, OutputOutcome, OutputStatus, SceneCollections, SceneSources, ScenesAndSources,
};
use autocaster_core::{ConnectInfo, ConnectionState, StateSnapshot};

use crate::connection::ConnectionManager;
use crate::ensure::ResourceEnsurer;
use crate::error::{ObsError, ObsResult};
use crate::provision::ProfileProvisioner;
use crate::requests::{self, Output, SceneList, same_name};
use crate::retry::RetryPolicy;
use crate::transport::{Endpoint, Transport};

/// Status polls after a stop request.
const STOP_POLL_ATTEMPTS: u32 = 25;
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(120);

const HINT_NO_SERVICE: &str = "No stream service configured in OBS (Settings → Stream).";
const HINT_UNREADABLE: &str = "Unable to read stream service settings (likely not configured).";
const HINT_DEFAULT: &str = "Check OBS stream settings.";

/// Whether a lowercased error message contains any of `needles`, with runs
/// of whitespace collapsed.
fn mentions_any(message: &str, needles: &[&str]) -> bool {
    let collapsed = message.split_whitespace().collect::<Vec<_>>().join(" ");
    needles.iter().any(|needle| collapsed.contains(needle))
}

/// Facade over the connection, readiness gate, retry policy and provisioner.
#[derive(Clone)]
pub struct ObsController {
    connection: ConnectionManager,
    provisioner: Arc<ProfileProvisioner>,
    retry: RetryPolicy,
    ready_timeout: Duration,
}

impl ObsController {
    #[must_use]
    pub fn new(connection: ConnectionManager, retry: RetryPolicy, ready_timeout: Duration) -> Self {
        let ensurer =
            Arc::new(ResourceEnsurer::new(retry, connection.readiness().clone()).with_ready_timeout(ready_timeout));
        let provisioner = Arc::new(ProfileProvisioner::new(connection.clone(), ensurer, retry, ready_timeout));
        Self { connection, provisioner, retry, ready_timeout }
    }

    #[must_use]
    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    #[must_use]
    pub fn profiles(&self) -> &ProfileProvisioner {
        &self.provisioner
    }

    /// Connect to OBS. See [`ConnectionManager::connect`].
    ///
    /// # Errors
    /// Returns the connection failure.
    pub async fn connect(&self, endpoint: &Endpoint) -> ObsResult<ConnectInfo> {
        self.connection.connect(endpoint).await
    }

    pub async fn disconnect(&self) {
        self.connection.disconnect().await;
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    #[must_use]
    pub fn snapshot(&self) -> StateSnapshot {
        self.connection.snapshot()
    }

    // Scene collections and scenes

    /// # Errors
    /// Returns [`ObsError::NotConnected`] or the request failure.
    pub async fn list_scene_collections(&self) -> ObsResult<SceneCollections> {
        self.provisioner.list_profiles().await
    }

    /// Switch the current scene collection, waiting for the rebuild.
    ///
    /// # Errors
    /// Returns [`ObsError::NotReady`] if the rebuild does not finish in time.
    pub async fn select_scene_collection(&self, name: &str) -> ObsResult<CurrentSelection> {
        self.provisioner.select_profile(name).await
    }

    /// # Errors
    /// Returns [`ObsError::NotReady`] or the request failure.
    pub async fn current_selection(&self) -> ObsResult<CurrentSelection> {
        self.provisioner.current_selection().await
    }

    /// Scenes and their sources in the current collection.
    ///
    /// # Errors
    /// Returns [`ObsError::NotReady`] while the graph is rebuilding past the
    /// timeout, or the request failure.
    pub async fn scenes_and_sources(&self) -> ObsResult<ScenesAndSources> {
        let transport = self.connection.transport()?;
        let t = transport.as_ref();
        let retry = &self.retry;
        self.connection
            .readiness()
            .read_scene_graph(self.ready_timeout, move || retry.run("GetSceneList", move || read_scenes_and_sources(t)))
            .await
    }

    /// Scenes and sources of a named collection.
    ///
    /// Without `peek` the named collection becomes current. With `peek` the
    /// previous collection is restored after the read, even when the read
    /// fails.
    ///
    /// # Errors
    /// As [`Self::scenes_and_sources`], plus switch failures.
    pub async fn scenes_and_sources_for(&self, collection: Option<&str>, peek: bool) -> ObsResult<ScenesAndSources> {
        let Some(name) = collection.map(str::trim).filter(|name| !name.is_empty()) else {
            return self.scenes_and_sources().await;
        };

        let previous = self.list_scene_collections().await?.current_scene_collection_name;
        if same_name(&previous, name) {
            return self.scenes_and_sources().await;
        }

        self.provisioner.select_collection(name).await?;
        if !peek {
            let mut result = self.scenes_and_sources().await?;
            result.switched = true;
            return Ok(result);
        }

        let result = self.scenes_and_sources().await;
        if let Err(e) = self.provisioner.select_collection(&previous).await {
            warn!(collection = %previous, error = %e, "Failed to restore scene collection after peek");
        }
        let mut result = result?;
        result.peeked = true;
        Ok(result)
    }

    /// # Errors
    /// Returns [`ObsError::NotReady`] or the request failure.
    pub async fn list_scenes(&self) -> ObsResult<SceneList> {
        let transport = self.connection.transport()?;
        let t = transport.as_ref();
        let retry = &self.retry;
        self.connection
            .readiness()
            .read_scene_graph(self.ready_timeout, move || retry.run("GetSceneList", move || requests::scene_list(t)))
            .await
    }

    /// Make `name` the program scene, returning the scene's actual name.
    ///
    /// # Errors
    /// Returns a 600 remote error for an unknown scene.
    pub async fn switch_scene(&self, name: &str) -> ObsResult<String> {
        let scenes = self.list_scenes().await?;
        let target = scenes.find(name).map(str::to_string).ok_or_else(|| ObsError::Remote {
            code: crate::protocol::status::RESOURCE_NOT_FOUND,
            message: format!("No scene named {}", name.trim()),
        })?;

        let transport = self.connection.transport()?;
        let t = transport.as_ref();
        self.retry.run("SetCurrentProgramScene", || requests::set_current_program_scene(t, &target)).await?;
        info!(scene = %target, "Switched program scene");
        Ok(target)
    }

    // Outputs

    /// # Errors
    /// Returns [`ObsError::NotConnected`] or the request failure.
    pub async fn output_status(&self, output: Output) -> ObsResult<OutputStatus> {
        let transport = self.connection.transport()?;
        requests::output_status(transport.as_ref(), output).await
    }

    /// Start streaming unless already live.
    ///
    /// # Errors
    /// A failed start carries a hint derived from the stream-service
    /// settings.
    pub async fn start_stream(&self) -> ObsResult<OutputOutcome> {
        let transport = self.connection.transport()?;
        let t = transport.as_ref();

        if requests::output_status(t, Output::Stream).await?.output_active {
            return Ok(OutputOutcome::already_active());
        }
        match requests::start_output(t, Output::Stream).await {
            Ok(()) => {
                info!("Stream start requested");
                Ok(OutputOutcome::done())
            }
            Err(e) if mentions_any(&e.message_lower(), &["already", "active", "starting"]) => {
                Ok(OutputOutcome::already_active().with_note(e.to_string()))
            }
            Err(ObsError::Remote { code, message }) => {
                let hint = stream_service_hint(t).await;
                warn!(code, %message, hint, "StartStream failed");
                Err(ObsError::Remote { code, message: format!("StartStream failed. {hint} :: {message}") })
            }
            Err(e) => Err(e),
        }
    }

    /// # Errors
    /// Returns the stop failure unless it says the stream is not running.
    pub async fn stop_stream(&self) -> ObsResult<OutputOutcome> {
        self.stop_and_wait(Output::Stream).await
    }

    /// # Errors
    /// Returns the start failure unless it says recording is running.
    pub async fn start_record(&self) -> ObsResult<OutputOutcome> {
        self.start_simple(Output::Record).await
    }

    /// # Errors
    /// Returns the stop failure unless it says recording is not running.
    pub async fn stop_record(&self) -> ObsResult<OutputOutcome> {
        self.stop_and_wait(Output::Record).await
    }

    /// # Errors
    /// Returns the start failure unless it says the camera is running.
    pub async fn start_virtual_cam(&self) -> ObsResult<OutputOutcome> {
        self.start_simple(Output::VirtualCam).await
    }

    /// Stop the virtual camera; "not active" counts as success.
    ///
    /// # Errors
    /// Returns any other stop failure.
    pub async fn stop_virtual_cam(&self) -> ObsResult<OutputOutcome> {
        let transport = self.connection.transport()?;
        match requests::stop_output(transport.as_ref(), Output::VirtualCam).await {
            Ok(()) => Ok(OutputOutcome::done()),
            Err(e) if mentions_any(&e.message_lower(), &["not active"]) => {
                Ok(OutputOutcome::noop().with_note(e.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    async fn start_simple(&self, output: Output) -> ObsResult<OutputOutcome> {
        let transport = self.connection.transport()?;
        let t = transport.as_ref();

        if requests::output_status(t, output).await?.output_active {
            return Ok(OutputOutcome::already_active());
        }
        match requests::start_output(t, output).await {
            Ok(()) => {
                info!(output = output.label(), "Output start requested");
                Ok(OutputOutcome::done())
            }
            Err(e) if mentions_any(&e.message_lower(), &["already", "active", "starting"]) => {
                Ok(OutputOutcome::already_active().with_note(e.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    async fn stop_and_wait(&self, output: Output) -> ObsResult<OutputOutcome> {
        let transport = self.connection.transport()?;
        let t = transport.as_ref();

        if !requests::output_status(t, output).await?.output_active {
            return Ok(OutputOutcome::already_stopped());
        }
        match requests::stop_output(t, output).await {
            Ok(()) => {}
            Err(e) if mentions_any(&e.message_lower(), &["not active", "already", "stopping", "stoping"]) => {
                return Ok(OutputOutcome::noop().with_note(e.to_string()));
            }
            Err(e) => return Err(e),
        }

        for _ in 0..STOP_POLL_ATTEMPTS {
            if !requests::output_status(t, output).await?.output_active {
                info!(output = output.label(), "Output stopped");
                return Ok(OutputOutcome::done());
            }
            tokio::time::sleep(STOP_POLL_INTERVAL).await;
        }
        warn!(output = output.label(), "Output still reports active after stop");
        Ok(OutputOutcome::done().with_note(format!("OBS still reports the {} as active", output.label())))
    }

    // Stream service

    /// Raw stream-service settings from OBS.
    ///
    /// # Errors
    /// Returns [`ObsError::NotConnected`] or the request failure.
    pub async fn stream_service(&self) -> ObsResult<Value> {
        let transport = self.connection.transport()?;
        requests::stream_service_settings(transport.as_ref()).await
    }

    /// Write custom RTMP settings for a platform preset or a custom server.
    ///
    /// # Errors
    /// Returns [`ObsError::InvalidArgument`] for an unknown platform, a
    /// missing key, or a custom server that is missing.
    pub async fn set_stream_service(&self, settings: &StreamServiceSettings) -> ObsResult<Platform> {
        let resolved = settings.resolve()?;
        let transport = self.connection.transport()?;
        requests::set_stream_service_settings(transport.as_ref(), resolved.to_request_data()).await?;
        info!(platform = %resolved.platform, server = %resolved.server, "Stream service updated");
        Ok(resolved.platform)
    }

    /// Check that `server` belongs to `platform`. Needs no connection.
    ///
    /// # Errors
    /// Returns [`ObsError::InvalidArgument`] describing the mismatch.
    pub fn validate_stream_service(&self, platform: &str, server: &str) -> ObsResult<Platform> {
        Ok(stream_service::validate_platform_url(platform, server)?)
    }

    /// Stop the virtual camera, then disconnect. Never fails.
    pub async fn shutdown(&self) {
        if self.connection.is_connected() {
            match self.stop_virtual_cam().await {
                Ok(outcome) => debug!(?outcome, "Virtual camera stopped for shutdown"),
                Err(e) => warn!(error = %e, "Failed to stop virtual camera during shutdown"),
            }
        }
        self.connection.disconnect().await;
    }
}

/// Explain a failed stream start from the configured service.
async fn stream_service_hint(t: &dyn Transport) -> &'static str {
    match requests::stream_service_settings(t).await {
        Ok(service) => {
            let service_type = service.get("streamServiceType").and_then(Value::as_str).unwrap_or_default();
            let configured = service
                .get("streamServiceSettings")
                .and_then(Value::as_object)
                .is_some_and(|settings| !settings.is_empty());
            if service_type.is_empty() || !configured { HINT_NO_SERVICE } else { HINT_DEFAULT }
        }
        Err(_) => HINT_UNREADABLE,
    }
}

async fn read_scenes_and_sources(t: &dyn Transport) -> ObsResult<ScenesAndSources> {
    let collections = requests::scene_collection_list(t).await?;
    let list = requests::scene_list(t).await?;

    let mut scenes = Vec::with_capacity(list.scenes.len());
    for scene in list.scenes {
        let sources = requests::scene_item_list(t, &scene).await?.into_iter().map(|item| item.source_name).collect();
        scenes.push(SceneSources { scene_name: scene, sources });
    }

    Ok(ScenesAndSources {
        scene_collection_name: collections.current_scene_collection_name,
        current_program_scene_name: list.current_program_scene_name,
        scenes,
        switched: false,
        peeked: false,
    })
}
