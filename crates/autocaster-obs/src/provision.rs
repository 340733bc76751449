//! Profile provisioning.
//!
//! A profile is a scene collection holding the four canonical scenes and the
//! inputs derived from an asset map. Provisioning composes the ensure
//! operations, so running it again converges on the same state.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use autocaster_core::summary::{AudioInput, CurrentSelection, SceneCollections, SceneSource, SceneSummary};
use autocaster_core::{AssetMap, InputKind, ProfilePlan, ProfileSummary};

use crate::connection::ConnectionManager;
use crate::ensure::{InputSpec, ResourceEnsurer};
use crate::error::{ObsError, ObsResult};
use crate::protocol::status;
use crate::requests::{self, same_name};
use crate::retry::RetryPolicy;
use crate::transport::Transport;

/// Builds and inspects profiles on the connected OBS.
pub struct ProfileProvisioner {
    connection: ConnectionManager,
    ensurer: Arc<ResourceEnsurer>,
    retry: RetryPolicy,
    ready_timeout: Duration,
}

impl ProfileProvisioner {
    #[must_use]
    pub fn new(
        connection: ConnectionManager,
        ensurer: Arc<ResourceEnsurer>,
        retry: RetryPolicy,
        ready_timeout: Duration,
    ) -> Self {
        Self { connection, ensurer, retry, ready_timeout }
    }

    /// Create the profile if needed and bring it in line with `assets`.
    ///
    /// Assets are validated before anything is sent to OBS.
    ///
    /// # Errors
    /// Returns [`ObsError::MissingAsset`] for the first missing local file,
    /// or any failure of the underlying ensure and switch operations.
    pub async fn create_or_update_profile(&self, name: &str, assets: &AssetMap) -> ObsResult<ProfileSummary> {
        assets.validate()?;
        let plan = ProfilePlan::from_assets(assets)?;
        self.provision(name, &plan).await
    }

    /// Ensure the canonical scenes, plus the asset inputs when a non-empty
    /// map is given.
    ///
    /// # Errors
    /// As [`Self::create_or_update_profile`].
    pub async fn ensure_profile_defaults(&self, name: &str, assets: Option<&AssetMap>) -> ObsResult<ProfileSummary> {
        match assets {
            Some(assets) if !assets.is_empty() => self.create_or_update_profile(name, assets).await,
            _ => self.provision(name, &ProfilePlan::scenes_only()).await,
        }
    }

    async fn provision(&self, name: &str, plan: &ProfilePlan) -> ObsResult<ProfileSummary> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ObsError::InvalidArgument("profile name is required".into()));
        }
        let transport = self.connection.transport()?;
        let t = transport.as_ref();

        let collection = self.ensurer.ensure_scene_collection(t, name).await?;
        self.select_collection(&collection.name).await?;

        let mut scenes = Vec::with_capacity(plan.scenes.len());
        for scene in &plan.scenes {
            scenes.push(self.ensurer.ensure_scene(t, scene.scene_name()).await?.name);
        }
        for input in &plan.inputs {
            self.ensurer.ensure_input_in_scene(t, &InputSpec::from(input)).await?;
        }

        // A fresh collection still shows the scene OBS seeded it with
        if collection.created
            && let Some(first) = scenes.first()
        {
            self.retry.run("SetCurrentProgramScene", || requests::set_current_program_scene(t, first)).await?;
        }

        info!(
            profile = %collection.name,
            created = collection.created,
            inputs = plan.inputs.len(),
            "Profile provisioned"
        );
        let mut summary = self.summary().await?;
        summary.retain_scenes(scenes.iter().map(String::as_str));
        Ok(summary)
    }

    /// Scene collections known to OBS.
    ///
    /// # Errors
    /// Returns [`ObsError::NotConnected`] or the request failure.
    pub async fn list_profiles(&self) -> ObsResult<SceneCollections> {
        let transport = self.connection.transport()?;
        let t = transport.as_ref();
        self.retry.run("GetSceneCollectionList", || requests::scene_collection_list(t)).await
    }

    /// Make `name` the current scene collection and wait for the rebuild.
    ///
    /// Returns whether a switch happened.
    ///
    /// # Errors
    /// Returns [`ObsError::NotReady`] if OBS does not finish the rebuild in
    /// time, or a 600 remote error for an unknown collection.
    pub async fn select_collection(&self, name: &str) -> ObsResult<bool> {
        let transport = self.connection.transport()?;
        let t = transport.as_ref();
        let readiness = self.connection.readiness();

        readiness.wait_until_ready(self.ready_timeout).await?;
        let list = self.retry.run("GetSceneCollectionList", || requests::scene_collection_list(t)).await?;
        let target = list
            .scene_collections
            .iter()
            .find(|c| same_name(c, name))
            .cloned()
            .ok_or_else(|| ObsError::Remote {
                code: status::RESOURCE_NOT_FOUND,
                message: format!("No scene collection named {}", name.trim()),
            })?;

        if same_name(&list.current_scene_collection_name, &target) {
            debug!(collection = %target, "Scene collection already current");
            return Ok(false);
        }

        readiness.mark_not_ready();
        if let Err(e) = requests::set_current_scene_collection(t, &target).await {
            readiness.mark_ready();
            return Err(e);
        }
        info!(collection = %target, "Switching scene collection");
        readiness.wait_until_ready(self.ready_timeout).await?;
        Ok(true)
    }

    /// Switch to a profile and report the resulting selection.
    ///
    /// # Errors
    /// As [`Self::select_collection`].
    pub async fn select_profile(&self, name: &str) -> ObsResult<CurrentSelection> {
        self.select_collection(name).await?;
        self.current_selection().await
    }

    /// Current collection and program scene.
    ///
    /// # Errors
    /// Returns [`ObsError::NotReady`] while the scene graph is rebuilding
    /// past the timeout, or the request failure.
    pub async fn current_selection(&self) -> ObsResult<CurrentSelection> {
        let transport = self.connection.transport()?;
        let t = transport.as_ref();
        let retry = &self.retry;
        self.connection
            .readiness()
            .read_scene_graph(self.ready_timeout, move || retry.run("GetSceneList", move || read_selection(t)))
            .await
    }

    /// Switch to a profile and summarize it.
    ///
    /// # Errors
    /// As [`Self::select_collection`].
    pub async fn profile_state(&self, name: &str) -> ObsResult<ProfileSummary> {
        self.select_collection(name).await?;
        self.summary().await
    }

    /// Summarize the current collection.
    ///
    /// # Errors
    /// Returns [`ObsError::NotReady`] or the request failure.
    pub async fn summary(&self) -> ObsResult<ProfileSummary> {
        let transport = self.connection.transport()?;
        let t = transport.as_ref();
        let retry = &self.retry;
        self.connection
            .readiness()
            .read_scene_graph(self.ready_timeout, move || retry.run("GetSceneList", move || read_summary(t)))
            .await
    }
}

async fn read_selection(t: &dyn Transport) -> ObsResult<CurrentSelection> {
    let collections = requests::scene_collection_list(t).await?;
    let scenes = requests::scene_list(t).await?;
    Ok(CurrentSelection {
        scene_collection: collections.current_scene_collection_name,
        current_scene: scenes.current_program_scene_name,
    })
}

async fn read_summary(t: &dyn Transport) -> ObsResult<ProfileSummary> {
    let collections = requests::scene_collection_list(t).await?;
    let scenes = requests::scene_list(t).await?;

    let mut summaries = Vec::with_capacity(scenes.scenes.len());
    for scene in &scenes.scenes {
        let items = requests::scene_item_list(t, scene).await?;
        summaries.push(SceneSummary {
            scene_name: scene.clone(),
            sources: items
                .into_iter()
                .map(|item| SceneSource { source_name: item.source_name, scene_item_id: item.scene_item_id })
                .collect(),
        });
    }

    let audio_inputs = requests::input_list(t)
        .await?
        .into_iter()
        .filter(|input| InputKind::from(input.base_kind()).is_audio_capture())
        .map(|input| AudioInput { input_name: input.input_name, kind: input.input_kind })
        .collect();

    Ok(ProfileSummary {
        scene_collection: collections.current_scene_collection_name,
        current_scene: scenes.current_program_scene_name,
        scenes: summaries,
        audio_inputs,
    })
}
