//! Idempotent create-or-reuse of scene collections, scenes and inputs.
//!
//! Every operation first looks for the named object and only creates what is
//! missing. "Already exists" failures are treated as a lost race with another
//! client and resolved by re-reading, so repeating any call converges on the
//! same remote state without duplicates.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use autocaster_core::{InputKind, PlannedInput};

use crate::error::{ObsError, ObsResult};
use crate::protocol::status;
use crate::readiness::{DEFAULT_READY_TIMEOUT, Readiness};
use crate::requests::{self, InputEntry, normalize, same_name};
use crate::retry::RetryPolicy;
use crate::transport::Transport;

/// Upper bound on numbered rename candidates.
const MAX_RENAME_CANDIDATES: usize = 32;

/// What to do when updating an existing input's settings fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingsPolicy {
    /// Surface the failure
    Strict,
    /// Log it and carry on
    #[default]
    BestEffort,
}

/// Desired state of one input.
#[derive(Debug, Clone, PartialEq)]
pub struct InputSpec {
    /// Scene the input must be attached to
    pub scene: String,
    pub name: String,
    pub kind: InputKind,
    /// Settings merged into the input
    pub settings: Map<String, Value>,
    /// Visibility of a newly created scene item
    pub enabled: bool,
    pub settings_policy: SettingsPolicy,
}

impl InputSpec {
    #[must_use]
    pub fn new(scene: impl Into<String>, name: impl Into<String>, kind: InputKind) -> Self {
        Self {
            scene: scene.into(),
            name: name.into(),
            kind,
            settings: Map::new(),
            enabled: true,
            settings_policy: SettingsPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_settings(mut self, settings: Map<String, Value>) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn strict(mut self) -> Self {
        self.settings_policy = SettingsPolicy::Strict;
        self
    }
}

impl From<&PlannedInput> for InputSpec {
    fn from(planned: &PlannedInput) -> Self {
        Self::new(planned.scene.scene_name(), planned.name.clone(), planned.kind.clone())
            .with_settings(planned.settings.clone())
    }
}

/// Outcome of [`ResourceEnsurer::ensure_input_in_scene`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnsuredInput {
    /// Name as OBS knows it
    pub name: String,
    pub scene_item_id: i64,
    /// The input did not exist before
    pub created: bool,
    /// A scene item was added for it
    pub attached: bool,
}

/// Outcome of [`ResourceEnsurer::ensure_scene`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnsuredScene {
    pub name: String,
    pub created: bool,
    /// New name of an input that held the scene's name
    pub renamed_input: Option<String>,
}

/// Outcome of [`ResourceEnsurer::ensure_scene_collection`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnsuredCollection {
    pub name: String,
    /// Creating a collection also makes it current
    pub created: bool,
}

/// Create-or-reuse operations over a transport.
pub struct ResourceEnsurer {
    retry: RetryPolicy,
    readiness: Readiness,
    /// Bound on waiting for the scene graph before touching scenes or inputs
    ready_timeout: Duration,
    /// Per-name locks serializing ensures of the same object in this process
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ResourceEnsurer {
    #[must_use]
    pub fn new(retry: RetryPolicy, readiness: Readiness) -> Self {
        Self { retry, readiness, ready_timeout: DEFAULT_READY_TIMEOUT, locks: Mutex::new(HashMap::new()) }
    }

    #[must_use]
    pub fn with_ready_timeout(mut self, ready_timeout: Duration) -> Self {
        self.ready_timeout = ready_timeout;
        self
    }

    fn lock_for(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(self.locks.lock().entry(normalize(name)).or_default())
    }

    async fn find_input(&self, t: &dyn Transport, name: &str) -> ObsResult<Option<InputEntry>> {
        let inputs = self.retry.run("GetInputList", || requests::input_list(t)).await?;
        Ok(inputs.into_iter().find(|input| same_name(&input.input_name, name)))
    }

    fn check_kind(spec: &InputSpec, entry: &InputEntry) -> ObsResult<()> {
        if spec.kind.matches(entry.base_kind()) {
            Ok(())
        } else {
            Err(ObsError::KindMismatch {
                name: entry.input_name.clone(),
                expected: spec.kind.to_string(),
                actual: entry.input_kind.clone(),
            })
        }
    }

    /// Make sure an input exists with the requested kind and settings and is
    /// attached to `spec.scene`.
    ///
    /// Waits for the scene graph to be ready before reading anything.
    ///
    /// # Errors
    /// Returns [`ObsError::NotReady`] if the scene graph stays unstable past
    /// the ready timeout, [`ObsError::KindMismatch`] when the name belongs to
    /// an input of another kind, a settings failure under
    /// [`SettingsPolicy::Strict`], or any other remote failure.
    pub async fn ensure_input_in_scene(&self, t: &dyn Transport, spec: &InputSpec) -> ObsResult<EnsuredInput> {
        let lock = self.lock_for(&spec.name);
        let _held = lock.lock().await;
        self.readiness.wait_until_ready(self.ready_timeout).await?;

        let existing = match self.find_input(t, &spec.name).await? {
            Some(entry) => entry,
            None => {
                let created = self
                    .retry
                    .run("CreateInput", || {
                        requests::create_input(t, &spec.scene, &spec.name, &spec.kind, &spec.settings, spec.enabled)
                    })
                    .await;
                match created {
                    Ok(scene_item_id) => {
                        info!(input = %spec.name, scene = %spec.scene, kind = %spec.kind, "Created input");
                        return Ok(EnsuredInput {
                            name: spec.name.clone(),
                            scene_item_id,
                            created: true,
                            attached: true,
                        });
                    }
                    Err(e) if e.is_conflict() => {
                        debug!(input = %spec.name, "Input appeared concurrently; reusing it");
                        self.find_input(t, &spec.name).await?.ok_or(e)?
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        Self::check_kind(spec, &existing)?;
        let name = existing.input_name;

        if !spec.settings.is_empty() {
            if let Err(e) = requests::set_input_settings(t, &name, &spec.settings, true).await {
                match spec.settings_policy {
                    SettingsPolicy::Strict => return Err(e),
                    SettingsPolicy::BestEffort => {
                        warn!(input = %name, error = %e, "Failed to update input settings");
                    }
                }
            }
        }

        let items = self.retry.run("GetSceneItemList", || requests::scene_item_list(t, &spec.scene)).await?;
        if let Some(item) = items.iter().find(|item| same_name(&item.source_name, &name)) {
            return Ok(EnsuredInput { name, scene_item_id: item.scene_item_id, created: false, attached: false });
        }

        let scene_item_id = self
            .retry
            .run("CreateSceneItem", || requests::create_scene_item(t, &spec.scene, &name, spec.enabled))
            .await?;
        info!(input = %name, scene = %spec.scene, "Attached input to scene");
        Ok(EnsuredInput { name, scene_item_id, created: false, attached: true })
    }

    /// Make sure a scene named `name` exists.
    ///
    /// An input holding the name is renamed to `"<name> (Source)"`, or a
    /// numbered variant when that is taken, before the scene is created. The
    /// rename is in place, so the input keeps its scene items.
    ///
    /// # Errors
    /// Returns [`ObsError::NotReady`] if the scene graph stays unstable past
    /// the ready timeout, or any remote failure other than a resolved
    /// "already exists".
    pub async fn ensure_scene(&self, t: &dyn Transport, name: &str) -> ObsResult<EnsuredScene> {
        let lock = self.lock_for(name);
        let _held = lock.lock().await;
        self.readiness.wait_until_ready(self.ready_timeout).await?;

        let scenes = self.retry.run("GetSceneList", || requests::scene_list(t)).await?;
        if let Some(existing) = scenes.find(name) {
            return Ok(EnsuredScene { name: existing.to_string(), created: false, renamed_input: None });
        }

        let mut renamed_input = self.free_scene_name(t, name, &scenes.scenes).await?;

        match self.retry.run("CreateScene", || requests::create_scene(t, name)).await {
            Ok(()) => {
                info!(scene = %name, "Created scene");
                return Ok(EnsuredScene { name: name.to_string(), created: true, renamed_input });
            }
            Err(e) if e.is_conflict() => {
                debug!(scene = %name, error = %e, "Scene creation raced; re-checking");
            }
            Err(e) => return Err(e),
        }

        // Lost a race: either the scene now exists or a new claimant took the name
        let scenes = self.retry.run("GetSceneList", || requests::scene_list(t)).await?;
        if let Some(existing) = scenes.find(name) {
            return Ok(EnsuredScene { name: existing.to_string(), created: false, renamed_input });
        }
        if let Some(again) = self.free_scene_name(t, name, &scenes.scenes).await? {
            renamed_input = Some(again);
        }
        match self.retry.run("CreateScene", || requests::create_scene(t, name)).await {
            Ok(()) => {
                info!(scene = %name, "Created scene");
                Ok(EnsuredScene { name: name.to_string(), created: true, renamed_input })
            }
            Err(e) if e.is_conflict() => {
                let scenes = self.retry.run("GetSceneList", || requests::scene_list(t)).await?;
                scenes
                    .find(name)
                    .map(|existing| EnsuredScene { name: existing.to_string(), created: false, renamed_input })
                    .ok_or(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Rename an input that holds `name`, returning its new name.
    async fn free_scene_name(&self, t: &dyn Transport, name: &str, scenes: &[String]) -> ObsResult<Option<String>> {
        let inputs = self.retry.run("GetInputList", || requests::input_list(t)).await?;
        let Some(claimant) = inputs.iter().find(|input| same_name(&input.input_name, name)) else {
            return Ok(None);
        };

        let taken: HashSet<String> = inputs
            .iter()
            .map(|input| normalize(&input.input_name))
            .chain(scenes.iter().map(|scene| normalize(scene)))
            .collect();
        let base = name.trim();
        let candidates = std::iter::once(format!("{base} (Source)"))
            .chain((1..MAX_RENAME_CANDIDATES).map(|n| format!("{base} (Source {n})")))
            .filter(|candidate| !taken.contains(&normalize(candidate)));

        for candidate in candidates {
            match requests::set_input_name(t, &claimant.input_name, &candidate).await {
                Ok(()) => {
                    info!(from = %claimant.input_name, to = %candidate, "Renamed input to free scene name");
                    return Ok(Some(candidate));
                }
                Err(e) if e.is_conflict() => {
                    debug!(candidate = %candidate, "Rename target taken; trying next");
                }
                Err(e) => return Err(e),
            }
        }

        Err(ObsError::Conflict {
            code: status::RESOURCE_ALREADY_EXISTS,
            message: format!("no free name to move input {} out of the way", claimant.input_name),
        })
    }

    /// Make sure a scene collection named `name` exists.
    ///
    /// OBS switches to a collection it creates, so readiness is dropped
    /// before the create request is sent.
    ///
    /// # Errors
    /// Returns any remote failure other than "already exists".
    pub async fn ensure_scene_collection(&self, t: &dyn Transport, name: &str) -> ObsResult<EnsuredCollection> {
        let lock = self.lock_for(name);
        let _held = lock.lock().await;

        let list = self.retry.run("GetSceneCollectionList", || requests::scene_collection_list(t)).await?;
        if let Some(existing) = list.scene_collections.iter().find(|c| same_name(c, name)) {
            return Ok(EnsuredCollection { name: existing.clone(), created: false });
        }

        let was_ready = self.readiness.is_ready();
        self.readiness.mark_not_ready();
        match requests::create_scene_collection(t, name).await {
            Ok(()) => {
                info!(collection = %name, "Created scene collection");
                Ok(EnsuredCollection { name: name.to_string(), created: true })
            }
            Err(e) => {
                // No switch happened
                if was_ready {
                    self.readiness.mark_ready();
                }
                if e.is_conflict() || e.message_lower().contains("exists") {
                    debug!(collection = %name, "Scene collection already exists");
                    Ok(EnsuredCollection { name: name.to_string(), created: false })
                } else {
                    Err(e)
                }
            }
        }
    }
}
