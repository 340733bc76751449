//! Result shapes returned to callers of the control layer.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A source bound into a scene.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneSource {
    pub source_name: String,
    pub scene_item_id: i64,
}

/// One scene of a profile and its items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneSummary {
    pub scene_name: String,
    pub sources: Vec<SceneSource>,
}

/// An audio capture input present in the collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioInput {
    pub input_name: String,
    pub kind: String,
}

/// Resolved state of a profile after provisioning or on query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileSummary {
    /// Current scene collection
    pub scene_collection: String,
    /// Current program scene
    pub current_scene: String,
    /// Scenes in OBS order
    pub scenes: Vec<SceneSummary>,
    /// Audio capture inputs in the collection
    pub audio_inputs: Vec<AudioInput>,
}

impl ProfileSummary {
    /// Look up a scene by exact name.
    #[must_use]
    pub fn scene(&self, name: &str) -> Option<&SceneSummary> {
        self.scenes.iter().find(|s| s.scene_name == name)
    }

    /// Keep only the named scenes, in the order given.
    pub fn retain_scenes<'a>(&mut self, names: impl IntoIterator<Item = &'a str>) {
        let mut scenes = std::mem::take(&mut self.scenes);
        self.scenes = names
            .into_iter()
            .filter_map(|name| {
                let index = scenes.iter().position(|s| s.scene_name == name)?;
                Some(scenes.remove(index))
            })
            .collect();
    }
}

/// Scene names and their source names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneSources {
    pub scene_name: String,
    pub sources: Vec<String>,
}

/// Scenes and sources of a scene collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenesAndSources {
    pub scene_collection_name: String,
    pub current_program_scene_name: String,
    pub scenes: Vec<SceneSources>,
    /// The current collection was changed and left changed
    #[serde(default)]
    pub switched: bool,
    /// The collection was switched for the read and then restored
    #[serde(default)]
    pub peeked: bool,
}

/// Scene collections known to OBS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneCollections {
    pub scene_collections: Vec<String>,
    pub current_scene_collection_name: String,
}

/// Current collection and program scene.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentSelection {
    pub scene_collection: String,
    pub current_scene: String,
}

/// Outcome of an output start or stop.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputOutcome {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub already_active: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub already_stopped: bool,
    /// The remote reported the transition was already under way
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub noop: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl OutputOutcome {
    #[must_use]
    pub fn done() -> Self {
        Self { ok: true, ..Self::default() }
    }

    #[must_use]
    pub fn already_active() -> Self {
        Self { ok: true, already_active: true, ..Self::default() }
    }

    #[must_use]
    pub fn already_stopped() -> Self {
        Self { ok: true, already_stopped: true, ..Self::default() }
    }

    #[must_use]
    pub fn noop() -> Self {
        Self { ok: true, noop: true, ..Self::default() }
    }

    #[must_use]
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// Status of an output (stream, record, virtual camera).
///
/// `output_active` is always present; the rest of the OBS response is kept
/// verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputStatus {
    #[serde(default)]
    pub output_active: bool,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}
