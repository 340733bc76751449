//! Stream-service (RTMP ingest) presets and validation.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{Error, Result};

/// OBS stream service type used for every preset.
pub const RTMP_CUSTOM: &str = "rtmp_custom";

/// Streaming platforms with known ingest endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    YouTube,
    Twitch,
    Facebook,
    Custom,
}

impl Platform {
    /// Canonical ingest URL, or `None` for custom servers.
    #[must_use]
    pub fn ingest_url(self) -> Option<&'static str> {
        match self {
            Self::YouTube => Some("rtmp://a.rtmp.youtube.com/live2"),
            Self::Twitch => Some("rtmp://live.twitch.tv/app"),
            Self::Facebook => Some("rtmps://live-api-s.facebook.com:443/rtmp/"),
            Self::Custom => None,
        }
    }

    /// Check that a server URL belongs to this platform.
    ///
    /// Custom servers accept any URL.
    ///
    /// # Errors
    /// Returns [`Error::MissingField`] for an empty URL or
    /// [`Error::PlatformUrlMismatch`] when the prefix does not match.
    pub fn validate_url(self, server: &str) -> Result<()> {
        let Some(expected) = self.ingest_url() else {
            return Ok(());
        };
        let server = server.trim();
        if server.is_empty() {
            return Err(Error::MissingField("Server URL"));
        }
        if !server.starts_with(expected) {
            return Err(Error::PlatformUrlMismatch {
                platform: self.to_string(),
                expected: expected.to_string(),
                got: server.to_string(),
            });
        }
        Ok(())
    }
}

impl FromStr for Platform {
    type Err = Error;

    /// Parse a loosely written platform name by prefix.
    fn from_str(raw: &str) -> Result<Self> {
        let lower = raw.trim().to_ascii_lowercase();
        if lower.starts_with("yt") || lower == "youtube" {
            Ok(Self::YouTube)
        } else if lower.starts_with("face") {
            Ok(Self::Facebook)
        } else if lower.starts_with("tw") {
            Ok(Self::Twitch)
        } else if lower == "custom" {
            Ok(Self::Custom)
        } else {
            Err(Error::UnknownPlatform(raw.to_string()))
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::YouTube => "youtube",
            Self::Twitch => "twitch",
            Self::Facebook => "facebook",
            Self::Custom => "custom",
        };
        f.write_str(name)
    }
}

/// Caller-provided stream-service settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StreamServiceSettings {
    /// Platform name, parsed loosely
    pub platform: String,
    /// Server URL; only used for custom platforms
    #[serde(default)]
    pub server: Option<String>,
    /// Stream key
    #[serde(default)]
    pub key: Option<String>,
}

/// Stream-service settings ready to send to OBS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedStreamService {
    pub platform: Platform,
    pub server: String,
    pub key: String,
}

impl StreamServiceSettings {
    /// Resolve the platform preset and validate the result.
    ///
    /// # Errors
    /// Returns an error when the platform or key is missing, the platform is
    /// unknown.
    pub fn resolve(&self) -> Result<ResolvedStreamService> {
        if self.platform.trim().is_empty() {
            return Err(Error::MissingField("platform"));
        }
        let key = self
            .key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or(Error::MissingField("stream key"))?;

        let platform: Platform = self.platform.parse()?;
        let server = match platform.ingest_url() {
            Some(url) => url.to_string(),
            None => self.server.as_deref().map(str::trim).unwrap_or_default().to_string(),
        };
        platform.validate_url(&server)?;

        Ok(ResolvedStreamService { platform, server, key: key.to_string() })
    }
}

impl ResolvedStreamService {
    /// Request data for `SetStreamServiceSettings`.
    #[must_use]
    pub fn to_request_data(&self) -> Value {
        json!({
            "streamServiceType": RTMP_CUSTOM,
            "streamServiceSettings": {
                "server": self.server,
                "key": self.key,
            },
        })
    }
}

/// Validate a platform name against a server URL without applying anything.
///
/// # Errors
/// Returns an error when the platform is unknown or the URL does not match.
pub fn validate_platform_url(platform: &str, server: &str) -> Result<Platform> {
    let platform: Platform = platform.parse()?;
    platform.validate_url(server)?;
    Ok(platform)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_platform_parsing_by_prefix() {
        assert_eq!("YT".parse::<Platform>().unwrap(), Platform::YouTube);
        assert_eq!("youtube".parse::<Platform>().unwrap(), Platform::YouTube);
        assert_eq!("Facebook Live".parse::<Platform>().unwrap(), Platform::Facebook);
        assert_eq!("twitch".parse::<Platform>().unwrap(), Platform::Twitch);
        assert_eq!(" Custom ".parse::<Platform>().unwrap(), Platform::Custom);
        assert_matches!("kick".parse::<Platform>(), Err(Error::UnknownPlatform(p)) if p == "kick");
    }

    #[test]
    fn test_preset_ignores_supplied_server() {
        let settings = StreamServiceSettings {
            platform: "twitch".into(),
            server: Some("rtmp://elsewhere/app".into()),
            key: Some("live_123".into()),
        };
        let resolved = settings.resolve().unwrap();
        assert_eq!(resolved.server, "rtmp://live.twitch.tv/app");

        let data = resolved.to_request_data();
        assert_eq!(data["streamServiceType"], "rtmp_custom");
        assert_eq!(data["streamServiceSettings"]["key"], "live_123");
    }

    #[test]
    fn test_custom_server_passthrough() {
        let settings = StreamServiceSettings {
            platform: "custom".into(),
            server: None,
            key: Some("k".into()),
        };
        // Custom servers are sent verbatim
        let resolved = settings.resolve().unwrap();
        assert_eq!(resolved.server, "");

        let settings = StreamServiceSettings {
            platform: "custom".into(),
            server: Some(" rtmp://ingest.example.com/live ".into()),
            key: Some("k".into()),
        };
        assert_eq!(settings.resolve().unwrap().server, "rtmp://ingest.example.com/live");
    }

    #[test]
    fn test_missing_key_and_platform() {
        let no_key = StreamServiceSettings { platform: "yt".into(), server: None, key: None };
        let err = no_key.resolve().unwrap_err();
        assert_eq!(err.to_string(), "stream key is required");

        let no_platform = StreamServiceSettings { platform: " ".into(), server: None, key: Some("k".into()) };
        assert_matches!(no_platform.resolve(), Err(Error::MissingField("platform")));
    }

    #[test]
    fn test_validate_platform_url() {
        assert!(validate_platform_url("youtube", "rtmp://a.rtmp.youtube.com/live2/extra").is_ok());
        assert!(validate_platform_url("custom", "srt://anything").is_ok());
        assert_matches!(
            validate_platform_url("facebook", "rtmp://live.twitch.tv/app"),
            Err(Error::PlatformUrlMismatch { .. })
        );
        assert_matches!(validate_platform_url("tw", ""), Err(Error::MissingField(_)));
    }
}
