//! Layer, feature, and import-config data types.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use geo::Point;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use flare_routes::impl_record_id;

impl_record_id! {
    /// A typed collection bucket for features.
    LayerId,
    /// A single imported or manually placed map entity.
    FeatureId,
    /// A saved, re-runnable import definition.
    ConfigId,
}

// ============================================================================
// Layers
// ============================================================================

/// Geometry kind shared by every feature in a layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeometryKind {
    Point,
    PointRadius,
    Polygon,
}

impl GeometryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Point => "point",
            Self::PointRadius => "point_radius",
            Self::Polygon => "polygon",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "point" => Some(Self::Point),
            "point_radius" => Some(Self::PointRadius),
            "polygon" => Some(Self::Polygon),
            _ => None,
        }
    }

    /// Whether a stored geometry of this shape fits the layer kind.
    /// Point geometry serves both plain point and point-radius layers.
    pub fn accepts(self, geometry: &FeatureGeometry) -> bool {
        match (self, geometry) {
            (Self::Point | Self::PointRadius, FeatureGeometry::Point { .. }) => true,
            (Self::Polygon, FeatureGeometry::Polygon { .. }) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for GeometryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-field type in a layer's property schema.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Number,
    Date,
    Select,
    Json,
}

/// Declared shape of one schema field.
///
/// Validated against stored properties only for display and editing;
/// storage itself stays schema-flexible so no source attribute is lost.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub label: String,
    /// Allowed values; meaningful only for `Select`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

/// Rendering style for polygon layers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LayerStyle {
    pub fill_color: String,
    pub fill_opacity: f64,
    pub stroke_color: String,
    pub stroke_opacity: f64,
    pub stroke_weight: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GisLayer {
    pub id: LayerId,
    pub name: String,
    pub geometry_kind: GeometryKind,
    pub property_schema: BTreeMap<String, FieldDef>,
    /// Meaningful only for polygon geometry.
    pub style: Option<LayerStyle>,
}

// ============================================================================
// Features
// ============================================================================

/// Stored feature geometry, matching the owning layer's kind.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeatureGeometry {
    Point { lng: f64, lat: f64 },
    /// Ring set; first ring is the exterior boundary.
    Polygon { rings: Vec<Vec<[f64; 2]>> },
}

impl FeatureGeometry {
    pub fn point(p: Point) -> Self {
        Self::Point {
            lng: p.x(),
            lat: p.y(),
        }
    }

    pub fn as_point(&self) -> Option<Point> {
        match self {
            Self::Point { lng, lat } => Some(Point::new(*lng, *lat)),
            Self::Polygon { .. } => None,
        }
    }

    pub fn kind_str(&self) -> &'static str {
        match self {
            Self::Point { .. } => "point",
            Self::Polygon { .. } => "polygon",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Feature {
    pub id: FeatureId,
    pub layer_id: LayerId,
    /// Identifier from the data source; reconciliation key for repeated
    /// imports, unique within the layer. Manually placed features have
    /// none.
    pub external_id: Option<String>,
    pub title: Option<String>,
    pub notes: Option<String>,
    pub address: Option<String>,
    /// Only for point-radius layers.
    pub radius_m: Option<f64>,
    /// Source attributes preserved verbatim; no schema enforcement.
    pub properties: Map<String, Value>,
    pub geometry: FeatureGeometry,
    /// Import config that produced this row, if any.
    pub config_id: Option<ConfigId>,
    /// Last time an import saw this feature in its source pull. Lets an
    /// operator audit staleness, since merge never deletes.
    pub last_seen_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Imports
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportMode {
    /// Upsert by external id; rows absent from the pull are left alone.
    Merge,
    /// Delete everything previously imported for this layer/config,
    /// then insert the full pull.
    Replace,
}

impl ImportMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Merge => "merge",
            Self::Replace => "replace",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "merge" => Some(Self::Merge),
            "replace" => Some(Self::Replace),
            _ => None,
        }
    }
}

/// Outcome counts for one import run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportStats {
    pub imported: u32,
    pub updated: u32,
    pub skipped: u32,
    pub errors: u32,
}

/// Optional source-column names feeding the feature's core fields.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub external_id: Option<String>,
    pub title: Option<String>,
    pub notes: Option<String>,
    pub address: Option<String>,
    pub radius_m: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshStatus {
    Ok,
    Failed,
}

impl RefreshStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ok" => Some(Self::Ok),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Where a saved import pulls from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source_type", rename_all = "snake_case")]
pub enum SourceRef {
    Remote { url: String },
    File { filename: String },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GisImportConfig {
    pub id: ConfigId,
    pub name: String,
    pub source: SourceRef,
    pub layer_id: LayerId,
    pub mode: ImportMode,
    pub field_mapping: FieldMapping,
    /// Forwarded verbatim to remote sources; never evaluated locally.
    pub filter_expression: Option<String>,
    pub last_refresh_at: Option<DateTime<Utc>>,
    pub last_refresh_status: Option<RefreshStatus>,
    pub last_refresh_count: Option<u32>,
}
