//! Typed OBS events.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::requests::SceneEntry;

/// Events emitted by OBS that this system reacts to.
///
/// Anything not modelled here is kept as [`ObsEvent::Other`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObsEvent {
    /// OBS is shutting down
    ExitStarted,
    /// The current collection is about to change; the scene graph is unstable
    CurrentSceneCollectionChanging { name: String },
    /// The current collection finished changing
    CurrentSceneCollectionChanged { name: String },
    SceneCollectionListChanged { collections: Vec<String> },
    SceneListChanged { scenes: Vec<String> },
    CurrentProgramSceneChanged { scene: String },
    CurrentPreviewSceneChanged { scene: String },
    SceneCreated { scene: String, is_group: bool },
    SceneRemoved { scene: String, is_group: bool },
    InputMuteStateChanged { input: String, muted: bool },
    InputVolumeChanged { input: String, volume_mul: f64, volume_db: f64 },
    InputActiveStateChanged { input: String, active: bool },
    SourceFilterEnableStateChanged { source: String, filter: String, enabled: bool },
    StreamStateChanged { active: bool, state: String },
    RecordStateChanged { active: bool, state: String, path: Option<String> },
    VirtualcamStateChanged { active: bool, state: String },
    StudioModeStateChanged { enabled: bool },
    CurrentSceneTransitionChanged { transition: String },
    SceneTransitionStarted { transition: String },
    SceneTransitionEnded { transition: String, from: Option<String>, to: Option<String> },
    Other { event_type: String, data: Value },
}

fn text(data: &Value, key: &str) -> String {
    data.get(key).and_then(Value::as_str).unwrap_or_default().to_string()
}

fn opt_text(data: &Value, key: &str) -> Option<String> {
    data.get(key).and_then(Value::as_str).map(str::to_string)
}

fn flag(data: &Value, key: &str) -> bool {
    data.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn number(data: &Value, key: &str) -> f64 {
    data.get(key).and_then(Value::as_f64).unwrap_or_default()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SceneCollectionListData {
    scene_collections: Vec<String>,
}

#[derive(Deserialize)]
struct SceneListData {
    scenes: Vec<SceneEntry>,
}

fn decode<T: DeserializeOwned>(data: &Value) -> Option<T> {
    T::deserialize(data).ok()
}

impl ObsEvent {
    /// Decode an event from its wire type and data.
    #[must_use]
    pub fn from_wire(event_type: &str, data: Value) -> Self {
        let d = &data;
        match event_type {
            "ExitStarted" => Self::ExitStarted,
            "CurrentSceneCollectionChanging" => {
                Self::CurrentSceneCollectionChanging { name: text(d, "sceneCollectionName") }
            }
            "CurrentSceneCollectionChanged" => {
                Self::CurrentSceneCollectionChanged { name: text(d, "sceneCollectionName") }
            }
            "SceneCollectionListChanged" => match decode::<SceneCollectionListData>(d) {
                Some(list) => Self::SceneCollectionListChanged { collections: list.scene_collections },
                None => Self::Other { event_type: event_type.to_string(), data },
            },
            "SceneListChanged" => match decode::<SceneListData>(d) {
                Some(list) => {
                    Self::SceneListChanged { scenes: list.scenes.into_iter().map(|s| s.scene_name).collect() }
                }
                None => Self::Other { event_type: event_type.to_string(), data },
            },
            "CurrentProgramSceneChanged" => {
                Self::CurrentProgramSceneChanged { scene: text(d, "sceneName") }
            }
            "CurrentPreviewSceneChanged" => {
                Self::CurrentPreviewSceneChanged { scene: text(d, "sceneName") }
            }
            "SceneCreated" => {
                Self::SceneCreated { scene: text(d, "sceneName"), is_group: flag(d, "isGroup") }
            }
            "SceneRemoved" => {
                Self::SceneRemoved { scene: text(d, "sceneName"), is_group: flag(d, "isGroup") }
            }
            "InputMuteStateChanged" => Self::InputMuteStateChanged {
                input: text(d, "inputName"),
                muted: flag(d, "inputMuted"),
            },
            "InputVolumeChanged" => Self::InputVolumeChanged {
                input: text(d, "inputName"),
                volume_mul: number(d, "inputVolumeMul"),
                volume_db: number(d, "inputVolumeDb"),
            },
            "InputActiveStateChanged" => Self::InputActiveStateChanged {
                input: text(d, "inputName"),
                active: flag(d, "videoActive"),
            },
            "SourceFilterEnableStateChanged" => Self::SourceFilterEnableStateChanged {
                source: text(d, "sourceName"),
                filter: text(d, "filterName"),
                enabled: flag(d, "filterEnabled"),
            },
            "StreamStateChanged" => Self::StreamStateChanged {
                active: flag(d, "outputActive"),
                state: text(d, "outputState"),
            },
            "RecordStateChanged" => Self::RecordStateChanged {
                active: flag(d, "outputActive"),
                state: text(d, "outputState"),
                path: opt_text(d, "outputPath"),
            },
            "VirtualcamStateChanged" => Self::VirtualcamStateChanged {
                active: flag(d, "outputActive"),
                state: text(d, "outputState"),
            },
            "StudioModeStateChanged" => {
                Self::StudioModeStateChanged { enabled: flag(d, "studioModeEnabled") }
            }
            "CurrentSceneTransitionChanged" => {
                Self::CurrentSceneTransitionChanged { transition: text(d, "transitionName") }
            }
            "SceneTransitionStarted" => {
                Self::SceneTransitionStarted { transition: text(d, "transitionName") }
            }
            "SceneTransitionEnded" => Self::SceneTransitionEnded {
                transition: text(d, "transitionName"),
                from: opt_text(d, "fromSceneName"),
                to: opt_text(d, "toSceneName"),
            },
            other => Self::Other { event_type: other.to_string(), data },
        }
    }

    /// Wire name of the event.
    #[must_use]
    pub fn event_type(&self) -> &str {
        match self {
            Self::ExitStarted => "ExitStarted",
            Self::CurrentSceneCollectionChanging { .. } => "CurrentSceneCollectionChanging",
            Self::CurrentSceneCollectionChanged { .. } => "CurrentSceneCollectionChanged",
            Self::SceneCollectionListChanged { .. } => "SceneCollectionListChanged",
            Self::SceneListChanged { .. } => "SceneListChanged",
            Self::CurrentProgramSceneChanged { .. } => "CurrentProgramSceneChanged",
            Self::CurrentPreviewSceneChanged { .. } => "CurrentPreviewSceneChanged",
            Self::SceneCreated { .. } => "SceneCreated",
            Self::SceneRemoved { .. } => "SceneRemoved",
            Self::InputMuteStateChanged { .. } => "InputMuteStateChanged",
            Self::InputVolumeChanged { .. } => "InputVolumeChanged",
            Self::InputActiveStateChanged { .. } => "InputActiveStateChanged",
            Self::SourceFilterEnableStateChanged { .. } => "SourceFilterEnableStateChanged",
            Self::StreamStateChanged { .. } => "StreamStateChanged",
            Self::RecordStateChanged { .. } => "RecordStateChanged",
            Self::VirtualcamStateChanged { .. } => "VirtualcamStateChanged",
            Self::StudioModeStateChanged { .. } => "StudioModeStateChanged",
            Self::CurrentSceneTransitionChanged { .. } => "CurrentSceneTransitionChanged",
            Self::SceneTransitionStarted { .. } => "SceneTransitionStarted",
            Self::SceneTransitionEnded { .. } => "SceneTransitionEnded",
            Self::Other { event_type, .. } => event_type,
        }
    }
}
