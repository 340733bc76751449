//! Error types for Autocaster core.

use std::path::PathBuf;

use thiserror::Error;

/// Core error type for Autocaster domain validation.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Missing required asset for {role}: {}", path.display())]
    MissingAsset { role: String, path: PathBuf },

    #[error("Invalid asset for {role}: {reason}")]
    InvalidAsset { role: String, reason: String },

    #[error("Cannot infer input kind for {role} from {location}")]
    UnknownAssetKind { role: String, location: String },

    #[error("Unknown platform: {0}")]
    UnknownPlatform(String),

    #[error(
        "The server URL does not match the selected platform. Platform: {platform} Expected prefix: {expected} Got: {got}"
    )]
    PlatformUrlMismatch { platform: String, expected: String, got: String },

    #[error("{0} is required")]
    MissingField(&'static str),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Result type alias for Autocaster core operations.
pub type Result<T> = std::result::Result<T, Error>;
