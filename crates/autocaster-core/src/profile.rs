//! Broadcast profile layout: canonical scenes and the inputs planned for them.
//!
//! A profile is an OBS scene collection holding the four canonical scenes.
//! [`ProfilePlan`] is the pure, ordered description of what the provisioner
//! must ensure for a given asset map.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::assets::{AssetMap, AssetRole};
use crate::error::Result;

/// The canonical scenes of a broadcast profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SceneRole {
    StartingSoon,
    InGame,
    Break,
    End,
}

impl SceneRole {
    /// Canonical scenes in creation order.
    pub const ALL: [Self; 4] = [Self::StartingSoon, Self::InGame, Self::Break, Self::End];

    /// OBS scene name.
    #[must_use]
    pub fn scene_name(self) -> &'static str {
        match self {
            Self::StartingSoon => "StartingSoon",
            Self::InGame => "InGame",
            Self::Break => "Break",
            Self::End => "End",
        }
    }
}

impl fmt::Display for SceneRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scene_name())
    }
}

/// OBS input kinds this system creates or recognises.
///
/// Serialised as the raw OBS kind string; unknown kinds round-trip through
/// [`InputKind::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum InputKind {
    ImageSource,
    FfmpegSource,
    BrowserSource,
    DshowInput,
    WindowCapture,
    WasapiInputCapture,
    WasapiOutputCapture,
    PulseInputCapture,
    PulseOutputCapture,
    CoreaudioInputCapture,
    CoreaudioOutputCapture,
    Other(String),
}

impl InputKind {
    /// The OBS kind identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::ImageSource => "image_source",
            Self::FfmpegSource => "ffmpeg_source",
            Self::BrowserSource => "browser_source",
            Self::DshowInput => "dshow_input",
            Self::WindowCapture => "window_capture",
            Self::WasapiInputCapture => "wasapi_input_capture",
            Self::WasapiOutputCapture => "wasapi_output_capture",
            Self::PulseInputCapture => "pulse_input_capture",
            Self::PulseOutputCapture => "pulse_output_capture",
            Self::CoreaudioInputCapture => "coreaudio_input_capture",
            Self::CoreaudioOutputCapture => "coreaudio_output_capture",
            Self::Other(kind) => kind,
        }
    }

    /// Whether this kind captures or plays audio devices.
    #[must_use]
    pub fn is_audio_capture(&self) -> bool {
        matches!(
            self,
            Self::WasapiInputCapture
                | Self::WasapiOutputCapture
                | Self::PulseInputCapture
                | Self::PulseOutputCapture
                | Self::CoreaudioInputCapture
                | Self::CoreaudioOutputCapture
        )
    }

    /// Compare against a kind reported by OBS.
    ///
    /// OBS may report versioned kinds (`browser_source_v2`); the comparison
    /// ignores a trailing `_v<N>` suffix.
    #[must_use]
    pub fn matches(&self, reported: &str) -> bool {
        unversioned(reported) == unversioned(self.as_str())
    }
}

fn unversioned(kind: &str) -> &str {
    match kind.rsplit_once("_v") {
        Some((base, version)) if !version.is_empty() && version.bytes().all(|b| b.is_ascii_digit()) => {
            base
        }
        _ => kind,
    }
}

impl From<String> for InputKind {
    fn from(kind: String) -> Self {
        match kind.as_str() {
            "image_source" => Self::ImageSource,
            "ffmpeg_source" => Self::FfmpegSource,
            "browser_source" => Self::BrowserSource,
            "dshow_input" => Self::DshowInput,
            "window_capture" => Self::WindowCapture,
            "wasapi_input_capture" => Self::WasapiInputCapture,
            "wasapi_output_capture" => Self::WasapiOutputCapture,
            "pulse_input_capture" => Self::PulseInputCapture,
            "pulse_output_capture" => Self::PulseOutputCapture,
            "coreaudio_input_capture" => Self::CoreaudioInputCapture,
            "coreaudio_output_capture" => Self::CoreaudioOutputCapture,
            _ => Self::Other(kind),
        }
    }
}

impl From<&str> for InputKind {
    fn from(kind: &str) -> Self {
        Self::from(kind.to_string())
    }
}

impl From<InputKind> for String {
    fn from(kind: InputKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for InputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An input the provisioner must ensure.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedInput {
    /// Scene the input is attached to
    pub scene: SceneRole,
    /// Input name (unique within the collection)
    pub name: String,
    /// Input kind
    pub kind: InputKind,
    /// Settings applied on create and merged on update
    pub settings: Map<String, Value>,
}

/// Device capture inputs created empty in the gameplay scene.
const CAPTURE_INPUTS: [(&str, InputKind); 3] = [
    ("Webcam", InputKind::DshowInput),
    ("Mic", InputKind::WasapiInputCapture),
    ("WindowCapture", InputKind::WindowCapture),
];

/// Ordered plan of scenes and inputs for one profile.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfilePlan {
    pub scenes: Vec<SceneRole>,
    pub inputs: Vec<PlannedInput>,
}

impl ProfilePlan {
    /// Plan only the canonical scenes.
    #[must_use]
    pub fn scenes_only() -> Self {
        Self { scenes: SceneRole::ALL.to_vec(), inputs: Vec::new() }
    }

    /// Plan the canonical scenes plus every input the asset map implies.
    ///
    /// The break loop takes precedence over the break image; the capture
    /// inputs are always planned after the gameplay overlay.
    ///
    /// # Errors
    /// Returns an error if an asset cannot be resolved to a kind.
    pub fn from_assets(assets: &AssetMap) -> Result<Self> {
        let mut plan = Self::scenes_only();

        for role in AssetRole::ALL {
            if role == AssetRole::BreakImage && assets.get(AssetRole::BreakLoop).is_some() {
                continue;
            }
            if let Some(resolved) = assets.resolve(role)? {
                plan.inputs.push(PlannedInput {
                    scene: role.scene(),
                    name: role.input_name().to_string(),
                    kind: resolved.kind,
                    settings: resolved.settings,
                });
            }
            if role == AssetRole::InGameOverlay {
                plan.push_captures();
            }
        }

        Ok(plan)
    }

    fn push_captures(&mut self) {
        for (name, kind) in CAPTURE_INPUTS {
            self.inputs.push(PlannedInput {
                scene: SceneRole::InGame,
                name: name.to_string(),
                kind,
                settings: Map::new(),
            });
        }
    }

    /// Planned inputs for one scene, in order.
    pub fn inputs_for(&self, scene: SceneRole) -> impl Iterator<Item = &PlannedInput> {
        self.inputs.iter().filter(move |input| input.scene == scene)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::AssetRef;

    fn full_map() -> AssetMap {
        AssetMap::new()
            .with(AssetRole::StartingImage, AssetRef::new("https://cdn.example.com/logo.png"))
            .with(AssetRole::IntroLoop, AssetRef::new("https://cdn.example.com/intro.mp4"))
            .with(AssetRole::CountdownTimer, AssetRef::new("https://cdn.example.com/timer"))
            .with(AssetRole::InGameOverlay, AssetRef::new("https://cdn.example.com/frame.png"))
            .with(AssetRole::BreakLoop, AssetRef::new("https://cdn.example.com/break.mp4"))
            .with(AssetRole::BreakImage, AssetRef::new("https://cdn.example.com/break.png"))
            .with(AssetRole::BreakTimer, AssetRef::new("https://cdn.example.com/break-timer"))
            .with(AssetRole::EndImage, AssetRef::new("https://cdn.example.com/end.png"))
    }

    fn names(plan: &ProfilePlan, scene: SceneRole) -> Vec<&str> {
        plan.inputs_for(scene).map(|i| i.name.as_str()).collect()
    }

    #[test]
    fn test_scenes_only_plan() {
        let plan = ProfilePlan::scenes_only();
        assert_eq!(plan.scenes, SceneRole::ALL.to_vec());
        assert!(plan.inputs.is_empty());
    }

    #[test]
    fn test_full_plan_layout() {
        let plan = ProfilePlan::from_assets(&full_map()).unwrap();

        assert_eq!(
            names(&plan, SceneRole::StartingSoon),
            vec!["LogoImage", "IntroVideoLoop", "CountdownTimer"]
        );
        assert_eq!(
            names(&plan, SceneRole::InGame),
            vec!["OverlayImage", "Webcam", "Mic", "WindowCapture"]
        );
        // Break loop wins over the break image
        assert_eq!(names(&plan, SceneRole::Break), vec!["BreakVideoLoop", "BreakTimer"]);
        assert_eq!(names(&plan, SceneRole::End), vec!["EndImage"]);
    }

    #[test]
    fn test_break_image_used_without_loop() {
        let map = AssetMap::new()
            .with(AssetRole::BreakImage, AssetRef::new("https://cdn.example.com/break.png"));
        let plan = ProfilePlan::from_assets(&map).unwrap();
        assert_eq!(names(&plan, SceneRole::Break), vec!["BreakImage"]);
    }

    #[test]
    fn test_captures_planned_without_overlay() {
        let plan = ProfilePlan::from_assets(&AssetMap::new()).unwrap();
        assert_eq!(names(&plan, SceneRole::InGame), vec!["Webcam", "Mic", "WindowCapture"]);
        let mic = plan.inputs.iter().find(|i| i.name == "Mic").unwrap();
        assert_eq!(mic.kind, InputKind::WasapiInputCapture);
        assert!(mic.settings.is_empty());
    }

    #[test]
    fn test_input_kind_string_roundtrip() {
        let kind: InputKind = serde_json::from_str("\"ffmpeg_source\"").unwrap();
        assert_eq!(kind, InputKind::FfmpegSource);

        let other: InputKind = serde_json::from_str("\"text_gdiplus_v3\"").unwrap();
        assert_eq!(other, InputKind::Other("text_gdiplus_v3".to_string()));
        assert_eq!(serde_json::to_string(&other).unwrap(), "\"text_gdiplus_v3\"");
    }

    #[test]
    fn test_input_kind_matches_versioned_kind() {
        assert!(InputKind::BrowserSource.matches("browser_source"));
        assert!(InputKind::BrowserSource.matches("browser_source_v2"));
        assert!(!InputKind::BrowserSource.matches("image_source"));
        assert!(InputKind::Other("text_gdiplus".into()).matches("text_gdiplus_v3"));
    }

    #[test]
    fn test_audio_capture_kinds() {
        assert!(InputKind::PulseOutputCapture.is_audio_capture());
        assert!(InputKind::from("coreaudio_input_capture").is_audio_capture());
        assert!(!InputKind::DshowInput.is_audio_capture());
    }
}
