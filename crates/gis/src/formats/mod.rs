//! Source normalization.
//!
//! Every parser produces the same canonical [`ParsedSource`] so the
//! preview UI and the reconciler never care where data came from.
//! Reserved/system fields are hidden from the preview field list but
//! are never dropped from stored properties.

pub mod arcgis;
pub mod csv;
pub mod geojson;
pub mod kml;
pub mod shp;

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::error::{GisError, Result};
use crate::models::{FeatureGeometry, FieldType, GeometryKind};

/// Source attribute names that are service bookkeeping, not user data.
/// Hidden from previews; still stored verbatim in `properties`.
const RESERVED_FIELDS: &[&str] = &[
    "objectid",
    "fid",
    "gid",
    "globalid",
    "shape__area",
    "shape__length",
    "shape_area",
    "shape_length",
    "shape.starea()",
    "shape.stlength()",
];

/// Attribute names that can serve as the reconciliation key.
const ID_FIELDS: &[&str] = &["objectid", "globalid", "id", "fid", "gid"];

const SAMPLE_LIMIT: usize = 5;

pub fn is_reserved_field(name: &str) -> bool {
    RESERVED_FIELDS.contains(&name.to_ascii_lowercase().as_str())
}

/// One feature as delivered by a parser, before reconciliation.
#[derive(Clone, Debug)]
pub struct RawFeature {
    pub external_id: Option<String>,
    pub geometry: Option<FeatureGeometry>,
    /// Why the geometry is unusable, when the record carried one that
    /// failed to parse. Distinguishes `errors` from `skipped`.
    pub geometry_error: Option<String>,
    /// All source attributes, verbatim.
    pub properties: Map<String, Value>,
}

impl RawFeature {
    pub fn new(
        external_id: Option<String>,
        geometry: Option<FeatureGeometry>,
        properties: Map<String, Value>,
    ) -> Self {
        Self {
            external_id,
            geometry,
            geometry_error: None,
            properties,
        }
    }
}

/// Displayed field metadata.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldInfo {
    pub name: String,
    pub field_type: FieldType,
    pub alias: Option<String>,
}

/// Canonical parse result: preview metadata plus the raw features.
#[derive(Clone, Debug)]
pub struct ParsedSource {
    pub geometry_kind: GeometryKind,
    pub feature_count: usize,
    pub fields: Vec<FieldInfo>,
    /// Up to five example values per displayed field.
    pub samples: BTreeMap<String, Vec<String>>,
    pub features: Vec<RawFeature>,
}

/// Parse an uploaded file, dispatching on its extension.
///
/// Anything unrecognized is rejected here, before any preview exists.
pub fn parse_upload(filename: &str, bytes: &[u8]) -> Result<ParsedSource> {
    let ext = filename
        .rsplit('.')
        .next()
        .unwrap_or("")
        .to_ascii_lowercase();
    match ext.as_str() {
        "geojson" | "json" => geojson::parse(bytes),
        "kml" => kml::parse_kml(bytes),
        "kmz" => kml::parse_kmz(bytes),
        "zip" => shp::parse_bundle(bytes),
        "csv" => csv::parse(bytes),
        _ => Err(GisError::UnsupportedFormat(filename.to_string())),
    }
}

/// Pull the external id out of a property map, trying the conventional
/// id column names in priority order.
pub(crate) fn detect_external_id(properties: &Map<String, Value>) -> Option<String> {
    for candidate in ID_FIELDS {
        for (key, value) in properties {
            if key.to_ascii_lowercase() == *candidate {
                return value_to_id(value);
            }
        }
    }
    None
}

pub(crate) fn value_to_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub(crate) fn value_to_display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Assemble preview metadata from parsed features.
///
/// `declared_fields` comes from sources that publish their own schema
/// (feature services, dbf tables); other formats derive the field list
/// from the union of property keys and sniff types from samples.
pub(crate) fn build_preview(
    features: Vec<RawFeature>,
    declared_fields: Option<Vec<FieldInfo>>,
    geometry_kind: GeometryKind,
) -> ParsedSource {
    let mut samples: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut seen_order: Vec<String> = Vec::new();

    for feature in &features {
        for (key, value) in &feature.properties {
            if is_reserved_field(key) {
                continue;
            }
            if !samples.contains_key(key) {
                seen_order.push(key.clone());
            }
            let bucket = samples.entry(key.clone()).or_default();
            if bucket.len() < SAMPLE_LIMIT {
                let display = value_to_display(value);
                if !display.is_empty() {
                    bucket.push(display);
                }
            }
        }
    }

    let fields = match declared_fields {
        Some(fields) => fields
            .into_iter()
            .filter(|f| !is_reserved_field(&f.name))
            .collect(),
        None => seen_order
            .iter()
            .map(|name| FieldInfo {
                name: name.clone(),
                field_type: sniff_field_type(samples.get(name).map(Vec::as_slice).unwrap_or(&[])),
                alias: None,
            })
            .collect(),
    };

    ParsedSource {
        geometry_kind,
        feature_count: features.len(),
        fields,
        samples,
        features,
    }
}

/// Guess a field type from example values: all-numeric wins Number,
/// all-date wins Date, anything else is Text.
pub(crate) fn sniff_field_type(samples: &[String]) -> FieldType {
    if samples.is_empty() {
        return FieldType::Text;
    }
    if samples.iter().all(|s| s.trim().parse::<f64>().is_ok()) {
        return FieldType::Number;
    }
    if samples.iter().all(|s| looks_like_date(s)) {
        return FieldType::Date;
    }
    FieldType::Text
}

fn looks_like_date(s: &str) -> bool {
    let s = s.trim();
    chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
        || chrono::NaiveDate::parse_from_str(s, "%m/%d/%Y").is_ok()
}
