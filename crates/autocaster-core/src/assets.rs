//! Declarative per-profile asset maps.
//!
//! An [`AssetMap`] binds logical roles ("intro loop", "countdown timer") to a
//! local file or URL, optionally with an explicit OBS input kind. The map is
//! validated before any remote call is made so that provisioning fails fast
//! on a missing file instead of leaving a half-built collection behind.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};
use crate::profile::{InputKind, SceneRole};

/// File extensions rendered with `image_source`.
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "webp", "tga", "psd"];

/// File extensions rendered with `ffmpeg_source`.
const VIDEO_EXTENSIONS: &[&str] =
    &["mp4", "mov", "mkv", "webm", "flv", "ts", "m4v", "avi", "mpg", "mpeg"];

/// File extensions rendered with `browser_source`.
const PAGE_EXTENSIONS: &[&str] = &["html", "htm"];

/// Canvas size used for browser sources.
pub const BROWSER_WIDTH: u32 = 1920;
pub const BROWSER_HEIGHT: u32 = 1080;

/// Logical asset roles of a broadcast profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetRole {
    /// Logo or frame shown before the broadcast starts
    StartingImage,
    /// Looping intro background video
    IntroLoop,
    /// Countdown timer page on the starting scene
    CountdownTimer,
    /// Frame overlay drawn over gameplay
    InGameOverlay,
    /// Looping background video during breaks
    BreakLoop,
    /// Still background during breaks (used when no break loop is set)
    BreakImage,
    /// Timer page on the break scene
    BreakTimer,
    /// Closing image
    EndImage,
}

impl AssetRole {
    /// All roles in provisioning order.
    pub const ALL: [Self; 8] = [
        Self::StartingImage,
        Self::IntroLoop,
        Self::CountdownTimer,
        Self::InGameOverlay,
        Self::BreakLoop,
        Self::BreakImage,
        Self::BreakTimer,
        Self::EndImage,
    ];

    /// Scene the role's input lives in.
    #[must_use]
    pub fn scene(self) -> SceneRole {
        match self {
            Self::StartingImage | Self::IntroLoop | Self::CountdownTimer => SceneRole::StartingSoon,
            Self::InGameOverlay => SceneRole::InGame,
            Self::BreakLoop | Self::BreakImage | Self::BreakTimer => SceneRole::Break,
            Self::EndImage => SceneRole::End,
        }
    }

    /// OBS input name used for the role.
    #[must_use]
    pub fn input_name(self) -> &'static str {
        match self {
            Self::StartingImage => "LogoImage",
            Self::IntroLoop => "IntroVideoLoop",
            Self::CountdownTimer => "CountdownTimer",
            Self::InGameOverlay => "OverlayImage",
            Self::BreakLoop => "BreakVideoLoop",
            Self::BreakImage => "BreakImage",
            Self::BreakTimer => "BreakTimer",
            Self::EndImage => "EndImage",
        }
    }

    /// Human-readable label used in error messages.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::StartingImage => "StartingSoon image",
            Self::IntroLoop => "StartingSoon media",
            Self::CountdownTimer => "StartingSoon timer",
            Self::InGameOverlay => "InGame overlay",
            Self::BreakLoop => "Break media",
            Self::BreakImage => "Break image",
            Self::BreakTimer => "Break timer",
            Self::EndImage => "End image",
        }
    }
}

/// Where an asset lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetLocation {
    /// Absolute path on the machine running OBS
    File(PathBuf),
    /// Remote or `file://` URL
    Url(Url),
}

impl AssetLocation {
    /// Parse a location string as either a URL or an absolute path.
    ///
    /// # Errors
    /// Returns an error if the location is empty, a malformed URL, or a
    /// relative path.
    pub fn parse(role: AssetRole, raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(Error::InvalidAsset {
                role: role.label().to_string(),
                reason: "location is empty".to_string(),
            });
        }

        let lower = raw.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") || lower.starts_with("file://") {
            let url = Url::parse(raw).map_err(|e| Error::InvalidAsset {
                role: role.label().to_string(),
                reason: format!("invalid URL {raw}: {e}"),
            })?;
            return Ok(Self::Url(url));
        }

        let path = PathBuf::from(raw);
        if !path.is_absolute() {
            return Err(Error::InvalidAsset {
                role: role.label().to_string(),
                reason: format!("path must be absolute: {raw}"),
            });
        }
        Ok(Self::File(path))
    }

    /// Local filesystem path backing this location, if any.
    #[must_use]
    pub fn local_path(&self) -> Option<PathBuf> {
        match self {
            Self::File(path) => Some(path.clone()),
            Self::Url(url) if url.scheme() == "file" => url.to_file_path().ok(),
            Self::Url(_) => None,
        }
    }

    /// Lowercased file extension of the location.
    fn extension(&self) -> Option<String> {
        let from_path = |p: &Path| p.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase);
        match self {
            Self::File(path) => from_path(path),
            Self::Url(url) => url
                .path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
                .and_then(|last| from_path(Path::new(&last))),
        }
    }

    /// Whether this is a remote web page.
    fn is_web(&self) -> bool {
        matches!(self, Self::Url(url) if url.scheme() == "http" || url.scheme() == "https")
    }

    /// URL form suitable for a browser source.
    fn to_browser_url(&self, role: AssetRole) -> Result<String> {
        match self {
            Self::Url(url) => Ok(url.to_string()),
            Self::File(path) => Url::from_file_path(path).map(|u| u.to_string()).map_err(|()| {
                Error::InvalidAsset {
                    role: role.label().to_string(),
                    reason: format!("cannot convert {} to a file URL", path.display()),
                }
            }),
        }
    }

    /// Display form used in settings and messages.
    fn display_string(&self) -> String {
        match self {
            Self::File(path) => path.display().to_string(),
            Self::Url(url) => url.to_string(),
        }
    }
}

/// One entry of an asset map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AssetRef {
    /// Absolute file path or URL
    pub location: String,
    /// Explicit input kind; inferred from the extension when absent
    #[serde(default)]
    pub kind: Option<InputKind>,
}

impl AssetRef {
    /// Create a reference whose kind is inferred from the location.
    #[must_use]
    pub fn new(location: impl Into<String>) -> Self {
        Self { location: location.into(), kind: None }
    }

    /// Create a reference with an explicit input kind.
    #[must_use]
    pub fn with_kind(location: impl Into<String>, kind: InputKind) -> Self {
        Self { location: location.into(), kind: Some(kind) }
    }
}

/// A resolved asset: the input kind plus the settings to apply.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedAsset {
    pub kind: InputKind,
    pub settings: Map<String, Value>,
}

/// Declarative per-profile asset map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetMap {
    assets: BTreeMap<AssetRole, AssetRef>,
}

impl AssetMap {
    /// Create an empty asset map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an entry.
    #[must_use]
    pub fn with(mut self, role: AssetRole, asset: AssetRef) -> Self {
        self.assets.insert(role, asset);
        self
    }

    /// Add or replace an entry in place.
    pub fn insert(&mut self, role: AssetRole, asset: AssetRef) {
        self.assets.insert(role, asset);
    }

    /// Look up an entry.
    #[must_use]
    pub fn get(&self, role: AssetRole) -> Option<&AssetRef> {
        self.assets.get(&role)
    }

    /// Whether the map has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    /// Iterate entries in role order.
    pub fn iter(&self) -> impl Iterator<Item = (AssetRole, &AssetRef)> {
        self.assets.iter().map(|(role, asset)| (*role, asset))
    }

    /// Check that every referenced local file exists.
    ///
    /// Remote URLs are not fetched. Fails on the first missing file in role
    /// order, naming the role and path.
    ///
    /// # Errors
    /// Returns [`Error::MissingAsset`] for a missing file, or
    /// [`Error::InvalidAsset`] for an unparseable location.
    pub fn validate(&self) -> Result<()> {
        for (role, asset) in self.iter() {
            let location = AssetLocation::parse(role, &asset.location)?;
            if let Some(path) = location.local_path() {
                if !path.exists() {
                    return Err(Error::MissingAsset { role: role.label().to_string(), path });
                }
            }
        }
        debug!(count = self.assets.len(), "Asset map validated");
        Ok(())
    }

    /// Resolve the input kind and settings for a role.
    ///
    /// # Errors
    /// Returns an error if the location cannot be parsed or no kind can be
    /// inferred.
    pub fn resolve(&self, role: AssetRole) -> Result<Option<ResolvedAsset>> {
        let Some(asset) = self.get(role) else {
            return Ok(None);
        };
        let location = AssetLocation::parse(role, &asset.location)?;
        let kind = match &asset.kind {
            Some(kind) => kind.clone(),
            None => infer_kind(role, &location)?,
        };
        let settings = settings_for(role, &kind, &location)?;
        Ok(Some(ResolvedAsset { kind, settings }))
    }
}

/// Infer the input kind from a location.
fn infer_kind(role: AssetRole, location: &AssetLocation) -> Result<InputKind> {
    let extension = location.extension();
    match extension.as_deref() {
        Some(ext) if IMAGE_EXTENSIONS.contains(&ext) => Ok(InputKind::ImageSource),
        Some(ext) if VIDEO_EXTENSIONS.contains(&ext) => Ok(InputKind::FfmpegSource),
        Some(ext) if PAGE_EXTENSIONS.contains(&ext) => Ok(InputKind::BrowserSource),
        _ if location.is_web() => Ok(InputKind::BrowserSource),
        _ => Err(Error::UnknownAssetKind {
            role: role.label().to_string(),
            location: location.display_string(),
        }),
    }
}

/// Build the OBS settings object for a kind.
fn settings_for(
    role: AssetRole,
    kind: &InputKind,
    location: &AssetLocation,
) -> Result<Map<String, Value>> {
    let value = match kind {
        InputKind::ImageSource => json!({ "file": location_as_file(location) }),
        InputKind::FfmpegSource => match location.local_path() {
            Some(path) => json!({
                "is_local_file": true,
                "local_file": path.display().to_string(),
                "looping": true,
            }),
            None => json!({
                "is_local_file": false,
                "input": location.display_string(),
                "looping": true,
            }),
        },
        InputKind::BrowserSource => json!({
            "url": location.to_browser_url(role)?,
            "width": BROWSER_WIDTH,
            "height": BROWSER_HEIGHT,
        }),
        _ => json!({ "file": location_as_file(location) }),
    };

    match value {
        Value::Object(map) => Ok(map),
        _ => Ok(Map::new()),
    }
}

fn location_as_file(location: &AssetLocation) -> String {
    location
        .local_path()
        .map_or_else(|| location.display_string(), |p| p.display().to_string())
}
