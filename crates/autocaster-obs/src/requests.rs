//! Typed wrappers over the obs-websocket requests this crate issues.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use autocaster_core::InputKind;
use autocaster_core::summary::{OutputStatus, SceneCollections};

use crate::error::ObsResult;
use crate::transport::Transport;

/// Trim and lowercase a name for comparison.
///
/// OBS names are matched loosely so that `" Webcam"` and `"webcam"` refer to
/// the same source.
#[must_use]
pub fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Whether two names refer to the same OBS object.
#[must_use]
pub fn same_name(a: &str, b: &str) -> bool {
    normalize(a) == normalize(b)
}

/// An input as reported by `GetInputList`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputEntry {
    pub input_name: String,
    #[serde(default)]
    pub input_kind: String,
    #[serde(default)]
    pub unversioned_input_kind: Option<String>,
}

impl InputEntry {
    /// Kind without a version suffix.
    #[must_use]
    pub fn base_kind(&self) -> &str {
        self.unversioned_input_kind.as_deref().unwrap_or(&self.input_kind)
    }
}

/// A scene item as reported by `GetSceneItemList`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneItem {
    pub source_name: String,
    pub scene_item_id: i64,
    #[serde(default)]
    pub input_kind: Option<String>,
}

/// One entry of the `scenes` array in `GetSceneList` and `SceneListChanged`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneEntry {
    pub scene_name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SceneCollectionListResponse {
    current_scene_collection_name: String,
    scene_collections: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SceneListResponse {
    #[serde(default)]
    current_program_scene_name: Option<String>,
    scenes: Vec<SceneEntry>,
}

/// Result of `GetSceneList`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SceneList {
    pub current_program_scene_name: String,
    pub scenes: Vec<String>,
}

impl SceneList {
    /// Find a scene by loose name match, returning its actual name.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&str> {
        self.scenes.iter().map(String::as_str).find(|s| same_name(s, name))
    }
}

/// OBS outputs with start/stop/status requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Output {
    Stream,
    Record,
    VirtualCam,
}

impl Output {
    fn suffix(self) -> &'static str {
        match self {
            Self::Stream => "Stream",
            Self::Record => "Record",
            Self::VirtualCam => "VirtualCam",
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Stream => "stream",
            Self::Record => "record",
            Self::VirtualCam => "virtual camera",
        }
    }
}

pub async fn scene_collection_list(t: &dyn Transport) -> ObsResult<SceneCollections> {
    let data = t.call("GetSceneCollectionList", None).await?;
    let list: SceneCollectionListResponse = serde_json::from_value(data)?;
    Ok(SceneCollections {
        scene_collections: list.scene_collections,
        current_scene_collection_name: list.current_scene_collection_name,
    })
}

pub async fn create_scene_collection(t: &dyn Transport, name: &str) -> ObsResult<()> {
    t.call("CreateSceneCollection", Some(json!({ "sceneCollectionName": name }))).await?;
    Ok(())
}

pub async fn set_current_scene_collection(t: &dyn Transport, name: &str) -> ObsResult<()> {
    t.call("SetCurrentSceneCollection", Some(json!({ "sceneCollectionName": name }))).await?;
    Ok(())
}

pub async fn scene_list(t: &dyn Transport) -> ObsResult<SceneList> {
    let data = t.call("GetSceneList", None).await?;
    let list: SceneListResponse = serde_json::from_value(data)?;
    Ok(SceneList {
        // Null while OBS has no program scene
        current_program_scene_name: list.current_program_scene_name.unwrap_or_default(),
        scenes: list.scenes.into_iter().map(|scene| scene.scene_name).collect(),
    })
}

pub async fn create_scene(t: &dyn Transport, name: &str) -> ObsResult<()> {
    t.call("CreateScene", Some(json!({ "sceneName": name }))).await?;
    Ok(())
}

pub async fn scene_item_list(t: &dyn Transport, scene: &str) -> ObsResult<Vec<SceneItem>> {
    let mut data = t.call("GetSceneItemList", Some(json!({ "sceneName": scene }))).await?;
    let items = data.get_mut("sceneItems").map(Value::take).unwrap_or_else(|| json!([]));
    Ok(serde_json::from_value(items)?)
}

/// Attach an existing source to a scene, returning the new scene item id.
pub async fn create_scene_item(t: &dyn Transport, scene: &str, source: &str, enabled: bool) -> ObsResult<i64> {
    let data = t
        .call(
            "CreateSceneItem",
            Some(json!({ "sceneName": scene, "sourceName": source, "sceneItemEnabled": enabled })),
        )
        .await?;
    Ok(data.get("sceneItemId").and_then(Value::as_i64).unwrap_or_default())
}

pub async fn input_list(t: &dyn Transport) -> ObsResult<Vec<InputEntry>> {
    let mut data = t.call("GetInputList", None).await?;
    let inputs = data.get_mut("inputs").map(Value::take).unwrap_or_else(|| json!([]));
    Ok(serde_json::from_value(inputs)?)
}

/// Create an input attached to a scene, returning its scene item id.
pub async fn create_input(
    t: &dyn Transport,
    scene: &str,
    name: &str,
    kind: &InputKind,
    settings: &Map<String, Value>,
    enabled: bool,
) -> ObsResult<i64> {
    let data = t
        .call(
            "CreateInput",
            Some(json!({
                "sceneName": scene,
                "inputName": name,
                "inputKind": kind.as_str(),
                "inputSettings": settings,
                "sceneItemEnabled": enabled,
            })),
        )
        .await?;
    Ok(data.get("sceneItemId").and_then(Value::as_i64).unwrap_or_default())
}

/// Merge (`overlay`) or replace an input's settings.
pub async fn set_input_settings(
    t: &dyn Transport,
    name: &str,
    settings: &Map<String, Value>,
    overlay: bool,
) -> ObsResult<()> {
    t.call(
        "SetInputSettings",
        Some(json!({ "inputName": name, "inputSettings": settings, "overlay": overlay })),
    )
    .await?;
    Ok(())
}

pub async fn set_input_name(t: &dyn Transport, name: &str, new_name: &str) -> ObsResult<()> {
    t.call("SetInputName", Some(json!({ "inputName": name, "newInputName": new_name }))).await?;
    Ok(())
}

pub async fn set_current_program_scene(t: &dyn Transport, scene: &str) -> ObsResult<()> {
    t.call("SetCurrentProgramScene", Some(json!({ "sceneName": scene }))).await?;
    Ok(())
}

pub async fn output_status(t: &dyn Transport, output: Output) -> ObsResult<OutputStatus> {
    let data = t.call(&format!("Get{}Status", output.suffix()), None).await?;
    Ok(serde_json::from_value(data)?)
}

pub async fn start_output(t: &dyn Transport, output: Output) -> ObsResult<()> {
    t.call(&format!("Start{}", output.suffix()), None).await?;
    Ok(())
}

pub async fn stop_output(t: &dyn Transport, output: Output) -> ObsResult<()> {
    t.call(&format!("Stop{}", output.suffix()), None).await?;
    Ok(())
}

pub async fn stream_service_settings(t: &dyn Transport) -> ObsResult<Value> {
    t.call("GetStreamServiceSettings", None).await
}

pub async fn set_stream_service_settings(t: &dyn Transport, data: Value) -> ObsResult<()> {
    t.call("SetStreamServiceSettings", Some(data)).await?;
    Ok(())
}
