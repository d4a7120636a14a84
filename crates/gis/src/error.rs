//! Error types for the GIS subsystem.

use crate::models::{ConfigId, LayerId};

#[derive(Debug, thiserror::Error)]
pub enum GisError {
    /// Malformed or unreadable source data. Raised before any preview;
    /// never leaves partial state behind.
    #[error("parse error: {message}")]
    Parse { message: String },

    #[error("unsupported upload format: {0}")]
    UnsupportedFormat(String),

    /// A remote source with the same normalized URL already has a saved
    /// config; the caller should point the user at it instead of
    /// creating a second one.
    #[error("a saved import already exists for this source (config {existing})")]
    DuplicateSource { existing: ConfigId },

    /// Another import or refresh is already running against this layer.
    #[error("an import is already running for layer {layer_id}; retry later")]
    Busy { layer_id: LayerId },

    #[error("layer not found: {0}")]
    LayerNotFound(LayerId),

    #[error("import config not found: {0}")]
    ConfigNotFound(ConfigId),

    #[error("geometry kind mismatch: layer expects {expected}, source has {found}")]
    GeometryMismatch { expected: String, found: String },

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Route(#[from] flare_routes::RouteError),
}

impl GisError {
    /// Shorthand for a parse failure with positional detail.
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, GisError>;
