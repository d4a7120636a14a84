//! # flare-gis
//!
//! Format-agnostic GIS feature import and reconciliation, plus the
//! SQLite-backed stores behind it.
//!
//! ## Pipeline
//!
//! A source (remote feature service or uploaded file) is normalized by a
//! format parser into a canonical [`formats::ParsedSource`] — geometry
//! kind, field list, sample values, raw features. The caller previews
//! that, picks a target layer and style, and the [`reconcile`] module
//! writes `Feature` rows by upsert on `(layer_id, external_id)`.
//! [`config::ImportService`] wraps the whole path, persists re-runnable
//! import configs, and holds the per-layer import lock.
//!
//! Highway routes live in the same database; [`store::GisStore`] loads
//! the resolvable ones to build a `flare_routes::MileMarkerResolver`
//! for dispatch-address geocoding.

pub mod config;
pub mod error;
pub mod formats;
pub mod layers;
pub mod models;
pub mod projection;
pub mod reconcile;
pub mod remote;
pub mod store;

pub mod prelude {
    pub use crate::config::{normalize_source_url, ImportService, LayerLocks};
    pub use crate::error::{GisError, Result};
    pub use crate::formats::{ParsedSource, RawFeature};
    pub use crate::models::{
        ConfigId, Feature, FeatureGeometry, FeatureId, FieldDef, FieldMapping, FieldType,
        GeometryKind, GisImportConfig, GisLayer, ImportMode, ImportStats, LayerId, LayerStyle,
        RefreshStatus, SourceRef,
    };
    pub use crate::store::GisStore;
}

pub use prelude::*;
