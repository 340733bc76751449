//! In-memory OBS used by the unit tests.
//!
//! [`FakeObs`] implements both [`Connector`] and [`Transport`] over a small
//! model of OBS: scene collections holding scenes, scene items and inputs,
//! plus output flags and stream-service settings. It mirrors the remote
//! status codes this crate depends on (207, 500, 501, 600, 601) and emits the
//! collection-change events around a switch.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value, json};
use tokio::sync::mpsc;

use crate::error::{ObsError, ObsResult};
use crate::event::ObsEvent;
use crate::protocol::status;
use crate::transport::{Connector, Endpoint, Session, Transport, TransportEvent};

#[derive(Debug, Clone)]
struct FakeInput {
    name: String,
    kind: String,
    settings: Map<String, Value>,
}

#[derive(Debug, Clone)]
struct FakeScene {
    name: String,
    items: Vec<(String, i64)>,
}

#[derive(Debug, Clone, Default)]
struct FakeCollection {
    scenes: Vec<FakeScene>,
    inputs: Vec<FakeInput>,
    program: String,
}

impl FakeCollection {
    fn with_scene(name: &str) -> Self {
        Self {
            scenes: vec![FakeScene { name: name.to_string(), items: Vec::new() }],
            inputs: Vec::new(),
            program: name.to_string(),
        }
    }

    fn name_taken(&self, name: &str) -> bool {
        self.scenes.iter().any(|s| s.name == name) || self.inputs.iter().any(|i| i.name == name)
    }

    fn scene_mut(&mut self, name: &str) -> ObsResult<&mut FakeScene> {
        self.scenes
            .iter_mut()
            .find(|s| s.name == name)
            .ok_or_else(|| not_found(&format!("No scene named {name}")))
    }
}

struct FakeState {
    collections: Vec<(String, FakeCollection)>,
    current: String,
    outputs: HashMap<&'static str, bool>,
    /// Status polls that still report active after a stop request
    stop_lag: u32,
    lagging: HashMap<&'static str, u32>,
    stream_service: Value,
    calls: Vec<(String, Option<Value>)>,
    failures: VecDeque<(String, u16, String)>,
    rebuilding: bool,
    withhold_changed: bool,
    pending_changed: Option<String>,
    events: Option<mpsc::Sender<TransportEvent>>,
    open: bool,
    connect_error: Option<ObsError>,
    close_after_handshake: bool,
    connects: usize,
    next_item_id: i64,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            collections: vec![("Untitled".to_string(), FakeCollection::with_scene("Scene"))],
            current: "Untitled".to_string(),
            outputs: HashMap::new(),
            stop_lag: 0,
            lagging: HashMap::new(),
            stream_service: json!({ "streamServiceType": "rtmp_common", "streamServiceSettings": {} }),
            calls: Vec::new(),
            failures: VecDeque::new(),
            rebuilding: false,
            withhold_changed: false,
            pending_changed: None,
            events: None,
            open: false,
            connect_error: None,
            close_after_handshake: false,
            connects: 0,
            next_item_id: 1,
        }
    }
}

fn not_found(message: &str) -> ObsError {
    ObsError::from_status(status::RESOURCE_NOT_FOUND, Some(message.to_string()))
}

fn conflict(message: &str) -> ObsError {
    ObsError::from_status(status::RESOURCE_ALREADY_EXISTS, Some(message.to_string()))
}

fn arg<'a>(data: Option<&'a Value>, key: &str) -> &'a str {
    data.and_then(|d| d.get(key)).and_then(Value::as_str).unwrap_or_default()
}

fn output_key(request_type: &str) -> Option<&'static str> {
    if request_type.ends_with("VirtualCam") || request_type.ends_with("VirtualCamStatus") {
        Some("virtualcam")
    } else if request_type.ends_with("Stream") || request_type.ends_with("StreamStatus") {
        Some("stream")
    } else if request_type.ends_with("Record") || request_type.ends_with("RecordStatus") {
        Some("record")
    } else {
        None
    }
}

impl FakeState {
    fn current_mut(&mut self) -> &mut FakeCollection {
        let current = self.current.clone();
        if let Some(index) = self.collections.iter().position(|(name, _)| *name == current) {
            &mut self.collections[index].1
        } else {
            self.collections.push((current, FakeCollection::default()));
            let last = self.collections.len() - 1;
            &mut self.collections[last].1
        }
    }

    fn emit(&self, event: TransportEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.try_send(event);
        }
    }

    fn switch_to(&mut self, name: &str) {
        self.emit(TransportEvent::Event(ObsEvent::CurrentSceneCollectionChanging {
            name: self.current.clone(),
        }));
        self.current = name.to_string();
        if self.withhold_changed {
            self.pending_changed = Some(name.to_string());
        } else {
            self.emit(TransportEvent::Event(ObsEvent::CurrentSceneCollectionChanged {
                name: name.to_string(),
            }));
        }
    }

    fn scene_graph_busy(&self) -> bool {
        self.rebuilding || self.pending_changed.is_some()
    }

    fn handle(&mut self, request_type: &str, data: Option<&Value>) -> ObsResult<Value> {
        match request_type {
            "GetSceneCollectionList" => Ok(json!({
                "currentSceneCollectionName": self.current,
                "sceneCollections": self.collections.iter().map(|(n, _)| n.clone()).collect::<Vec<_>>(),
            })),
            "CreateSceneCollection" => {
                let name = arg(data, "sceneCollectionName");
                if self.collections.iter().any(|(n, _)| n == name) {
                    return Err(conflict("A scene collection already exists by that name"));
                }
                // OBS seeds every new collection with one empty scene
                self.collections.push((name.to_string(), FakeCollection::with_scene("Scene")));
                self.switch_to(name);
                Ok(json!({}))
            }
            "SetCurrentSceneCollection" => {
                let name = arg(data, "sceneCollectionName");
                if !self.collections.iter().any(|(n, _)| n == name) {
                    return Err(not_found("No scene collection exists by that name"));
                }
                self.switch_to(name);
                Ok(json!({}))
            }
            "GetSceneList" => {
                if self.scene_graph_busy() {
                    return Err(ObsError::from_status(status::NOT_READY, Some("OBS is not ready".into())));
                }
                let collection = self.current_mut();
                let scenes: Vec<Value> = collection
                    .scenes
                    .iter()
                    .enumerate()
                    .map(|(i, s)| json!({ "sceneName": s.name, "sceneIndex": i }))
                    .collect();
                Ok(json!({ "currentProgramSceneName": collection.program, "scenes": scenes }))
            }
            "CreateScene" => {
                let name = arg(data, "sceneName").to_string();
                let collection = self.current_mut();
                if collection.name_taken(&name) {
                    return Err(conflict("A source already exists by that scene name"));
                }
                if collection.program.is_empty() {
                    collection.program.clone_from(&name);
                }
                collection.scenes.push(FakeScene { name, items: Vec::new() });
                Ok(json!({}))
            }
            "GetSceneItemList" => {
                if self.scene_graph_busy() {
                    return Err(ObsError::from_status(status::NOT_READY, Some("OBS is not ready".into())));
                }
                let scene_name = arg(data, "sceneName").to_string();
                let collection = self.current_mut();
                let kinds: HashMap<String, String> =
                    collection.inputs.iter().map(|i| (i.name.clone(), i.kind.clone())).collect();
                let scene = collection.scene_mut(&scene_name)?;
                let items: Vec<Value> = scene
                    .items
                    .iter()
                    .map(|(source, id)| {
                        json!({ "sourceName": source, "sceneItemId": id, "inputKind": kinds.get(source) })
                    })
                    .collect();
                Ok(json!({ "sceneItems": items }))
            }
            "CreateSceneItem" => {
                let scene_name = arg(data, "sceneName").to_string();
                let source = arg(data, "sourceName").to_string();
                let id = self.next_item_id;
                let collection = self.current_mut();
                if !collection.name_taken(&source) {
                    return Err(not_found("No source was found by the name"));
                }
                collection.scene_mut(&scene_name)?.items.push((source, id));
                self.next_item_id += 1;
                Ok(json!({ "sceneItemId": id }))
            }
            "GetInputList" => {
                let inputs: Vec<Value> = self
                    .current_mut()
                    .inputs
                    .iter()
                    .map(|i| json!({ "inputName": i.name, "inputKind": i.kind, "unversionedInputKind": i.kind }))
                    .collect();
                Ok(json!({ "inputs": inputs }))
            }
            "CreateInput" => {
                let scene_name = arg(data, "sceneName").to_string();
                let name = arg(data, "inputName").to_string();
                let kind = arg(data, "inputKind").to_string();
                let settings = data
                    .and_then(|d| d.get("inputSettings"))
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();
                let id = self.next_item_id;
                let collection = self.current_mut();
                if collection.name_taken(&name) {
                    return Err(conflict("A source already exists by that input name"));
                }
                collection.scene_mut(&scene_name)?.items.push((name.clone(), id));
                collection.inputs.push(FakeInput { name, kind, settings });
                self.next_item_id += 1;
                Ok(json!({ "inputUuid": format!("uuid-{id}"), "sceneItemId": id }))
            }
            "SetInputSettings" => {
                let name = arg(data, "inputName").to_string();
                let overlay = data.and_then(|d| d.get("overlay")).and_then(Value::as_bool).unwrap_or(true);
                let settings = data
                    .and_then(|d| d.get("inputSettings"))
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();
                let input = self
                    .current_mut()
                    .inputs
                    .iter_mut()
                    .find(|i| i.name == name)
                    .ok_or_else(|| not_found("No source was found by the name"))?;
                if overlay {
                    input.settings.extend(settings);
                } else {
                    input.settings = settings;
                }
                Ok(json!({}))
            }
            "SetInputName" => {
                let name = arg(data, "inputName").to_string();
                let new_name = arg(data, "newInputName").to_string();
                let collection = self.current_mut();
                if collection.name_taken(&new_name) {
                    return Err(conflict("A source already exists by that new input name"));
                }
                let input = collection
                    .inputs
                    .iter_mut()
                    .find(|i| i.name == name)
                    .ok_or_else(|| not_found("No source was found by the name"))?;
                input.name.clone_from(&new_name);
                for scene in &mut collection.scenes {
                    for (source, _) in &mut scene.items {
                        if *source == name {
                            source.clone_from(&new_name);
                        }
                    }
                }
                Ok(json!({}))
            }
            "SetCurrentProgramScene" => {
                let name = arg(data, "sceneName").to_string();
                let collection = self.current_mut();
                collection.scene_mut(&name)?;
                collection.program = name;
                Ok(json!({}))
            }
            "GetStreamStatus" | "GetRecordStatus" | "GetVirtualCamStatus" => {
                let key = output_key(request_type).unwrap_or_default();
                let mut active = self.outputs.get(key).copied().unwrap_or(false);
                if let Some(remaining) = self.lagging.get_mut(key) {
                    if *remaining > 0 {
                        *remaining -= 1;
                        active = true;
                    }
                }
                Ok(json!({ "outputActive": active }))
            }
            "StartStream" | "StartRecord" | "StartVirtualCam" => {
                let key = output_key(request_type).unwrap_or_default();
                if self.outputs.get(key).copied().unwrap_or(false) {
                    return Err(ObsError::from_status(status::OUTPUT_RUNNING, Some("Output already active".into())));
                }
                self.outputs.insert(key, true);
                Ok(json!({}))
            }
            "StopStream" | "StopRecord" | "StopVirtualCam" => {
                let key = output_key(request_type).unwrap_or_default();
                if !self.outputs.get(key).copied().unwrap_or(false) {
                    return Err(ObsError::from_status(status::OUTPUT_NOT_RUNNING, Some("Output not active".into())));
                }
                self.outputs.insert(key, false);
                self.lagging.insert(key, self.stop_lag);
                Ok(json!({}))
            }
            "GetStreamServiceSettings" => Ok(self.stream_service.clone()),
            "SetStreamServiceSettings" => {
                self.stream_service = data.cloned().unwrap_or(Value::Null);
                Ok(json!({}))
            }
            other => Err(ObsError::from_status(204, Some(format!("Unknown request type {other}")))),
        }
    }
}

/// Shared handle to the in-memory OBS.
#[derive(Clone, Default)]
pub(crate) struct FakeObs {
    state: Arc<Mutex<FakeState>>,
}

impl FakeObs {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Make the next `request_type` call fail with a remote status.
    pub(crate) fn fail_next(&self, request_type: &str, code: u16, message: &str) {
        self.state.lock().failures.push_back((request_type.to_string(), code, message.to_string()));
    }

    pub(crate) fn fail_connect(&self, error: ObsError) {
        self.state.lock().connect_error = Some(error);
    }

    /// Drop the next session as soon as it is identified.
    pub(crate) fn close_after_handshake(&self) {
        self.state.lock().close_after_handshake = true;
    }

    /// Scene reads answer 207 while set.
    pub(crate) fn set_rebuilding(&self, rebuilding: bool) {
        self.state.lock().rebuilding = rebuilding;
    }

    /// Hold back the "collection changed" event of later switches.
    pub(crate) fn withhold_changed(&self, withhold: bool) {
        self.state.lock().withhold_changed = withhold;
    }

    /// Deliver a held "collection changed" event.
    pub(crate) fn release_changed(&self) {
        let mut state = self.state.lock();
        if let Some(name) = state.pending_changed.take() {
            state.emit(TransportEvent::Event(ObsEvent::CurrentSceneCollectionChanged { name }));
        }
    }

    pub(crate) fn emit(&self, event: TransportEvent) {
        self.state.lock().emit(event);
    }

    /// Report a client-side error without closing the socket.
    pub(crate) fn emit_error(&self, message: &str) {
        self.emit(TransportEvent::Error(message.to_string()));
    }

    /// Drop the socket from the remote side.
    pub(crate) fn drop_connection(&self) {
        let mut state = self.state.lock();
        state.open = false;
        state.emit(TransportEvent::Closed { code: Some(1006), reason: "connection lost".into() });
        state.events = None;
    }

    pub(crate) fn set_output_active(&self, output: &'static str, active: bool) {
        self.state.lock().outputs.insert(output, active);
    }

    pub(crate) fn output_active(&self, output: &'static str) -> bool {
        self.state.lock().outputs.get(output).copied().unwrap_or(false)
    }

    /// Status polls that keep reporting active after each stop.
    pub(crate) fn set_stop_lag(&self, polls: u32) {
        self.state.lock().stop_lag = polls;
    }

    pub(crate) fn set_stream_service(&self, value: Value) {
        self.state.lock().stream_service = value;
    }

    pub(crate) fn stream_service(&self) -> Value {
        self.state.lock().stream_service.clone()
    }

    /// Add a collection with the given scenes.
    pub(crate) fn add_collection(&self, name: &str, scenes: &[&str]) {
        let collection = FakeCollection {
            scenes: scenes.iter().map(|s| FakeScene { name: (*s).to_string(), items: Vec::new() }).collect(),
            inputs: Vec::new(),
            program: scenes.first().map(|s| (*s).to_string()).unwrap_or_default(),
        };
        self.state.lock().collections.push((name.to_string(), collection));
    }

    /// Add an input to the current collection, attached to `scene`.
    pub(crate) fn add_input(&self, scene: &str, name: &str, kind: &str) {
        let mut state = self.state.lock();
        let id = state.next_item_id;
        state.next_item_id += 1;
        let collection = state.current_mut();
        collection.inputs.push(FakeInput { name: name.to_string(), kind: kind.to_string(), settings: Map::new() });
        if let Ok(scene) = collection.scene_mut(scene) {
            scene.items.push((name.to_string(), id));
        }
    }

    pub(crate) fn add_scene(&self, name: &str) {
        self.state.lock().current_mut().scenes.push(FakeScene { name: name.to_string(), items: Vec::new() });
    }

    pub(crate) fn current_collection(&self) -> String {
        self.state.lock().current.clone()
    }

    pub(crate) fn collections(&self) -> Vec<String> {
        self.state.lock().collections.iter().map(|(n, _)| n.clone()).collect()
    }

    pub(crate) fn scenes(&self) -> Vec<String> {
        self.state.lock().current_mut().scenes.iter().map(|s| s.name.clone()).collect()
    }

    /// `(name, kind)` of every input in the current collection.
    pub(crate) fn inputs(&self) -> Vec<(String, String)> {
        self.state.lock().current_mut().inputs.iter().map(|i| (i.name.clone(), i.kind.clone())).collect()
    }

    pub(crate) fn input_settings(&self, name: &str) -> Option<Map<String, Value>> {
        self.state.lock().current_mut().inputs.iter().find(|i| i.name == name).map(|i| i.settings.clone())
    }

    /// Source names attached to `scene` in the current collection.
    pub(crate) fn items(&self, scene: &str) -> Vec<String> {
        self.state
            .lock()
            .current_mut()
            .scenes
            .iter()
            .find(|s| s.name == scene)
            .map(|s| s.items.iter().map(|(n, _)| n.clone()).collect())
            .unwrap_or_default()
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.state.lock().calls.iter().map(|(t, _)| t.clone()).collect()
    }

    pub(crate) fn count(&self, request_type: &str) -> usize {
        self.state.lock().calls.iter().filter(|(t, _)| t == request_type).count()
    }

    /// Request data of the last `request_type` call.
    pub(crate) fn last_data(&self, request_type: &str) -> Option<Value> {
        self.state.lock().calls.iter().rev().find(|(t, _)| t == request_type).and_then(|(_, d)| d.clone())
    }

    pub(crate) fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    pub(crate) fn connects(&self) -> usize {
        self.state.lock().connects
    }
}

#[async_trait]
impl Transport for FakeObs {
    async fn call(&self, request_type: &str, data: Option<Value>) -> ObsResult<Value> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(ObsError::Transport("connection closed".into()));
        }
        state.calls.push((request_type.to_string(), data.clone()));
        if let Some(index) = state.failures.iter().position(|(t, _, _)| t == request_type) {
            if let Some((_, code, message)) = state.failures.remove(index) {
                return Err(ObsError::from_status(code, Some(message)));
            }
        }
        state.handle(request_type, data.as_ref())
    }

    async fn close(&self) -> ObsResult<()> {
        let mut state = self.state.lock();
        state.open = false;
        state.events = None;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.state.lock().open
    }
}

#[async_trait]
impl Connector for FakeObs {
    async fn connect(&self, _endpoint: &Endpoint) -> ObsResult<Session> {
        let mut state = self.state.lock();
        if let Some(error) = state.connect_error.take() {
            return Err(error);
        }
        let (tx, rx) = mpsc::channel(256);
        state.connects += 1;
        if std::mem::take(&mut state.close_after_handshake) {
            let _ = tx.try_send(TransportEvent::Closed { code: Some(1001), reason: "going away".into() });
        } else {
            state.events = Some(tx);
            state.open = true;
        }
        drop(state);

        Ok(Session {
            transport: Arc::new(self.clone()),
            events: rx,
            obs_web_socket_version: "5.4.2".to_string(),
            negotiated_rpc_version: 1,
        })
    }
}
