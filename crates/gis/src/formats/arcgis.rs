//! ArcGIS FeatureServer `f=json` query responses.
//!
//! Only the slice of the protocol the importer needs: per-feature
//! attributes, point/polygon geometry, the field list, and the
//! transfer-limit flag that drives pagination. Everything else in the
//! payload is ignored.

use serde::Deserialize;
use serde_json::{Map, Value};

use super::{build_preview, detect_external_id, FieldInfo, ParsedSource, RawFeature};
use crate::error::{GisError, Result};
use crate::models::{FeatureGeometry, FieldType, GeometryKind};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPage {
    #[serde(default)]
    pub features: Vec<AgsFeature>,
    #[serde(default)]
    pub fields: Vec<AgsField>,
    pub geometry_type: Option<String>,
    #[serde(default)]
    pub exceeded_transfer_limit: bool,
    pub error: Option<AgsError>,
}

#[derive(Debug, Deserialize)]
pub struct AgsError {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct AgsFeature {
    #[serde(default)]
    pub attributes: Map<String, Value>,
    pub geometry: Option<AgsGeometry>,
}

#[derive(Debug, Deserialize)]
pub struct AgsGeometry {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub rings: Option<Vec<Vec<[f64; 2]>>>,
}

#[derive(Debug, Deserialize)]
pub struct AgsField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    pub alias: Option<String>,
}

pub fn field_type_from_esri(esri: &str) -> FieldType {
    match esri {
        "esriFieldTypeInteger"
        | "esriFieldTypeSmallInteger"
        | "esriFieldTypeDouble"
        | "esriFieldTypeSingle"
        | "esriFieldTypeOID" => FieldType::Number,
        "esriFieldTypeDate" => FieldType::Date,
        "esriFieldTypeBlob" | "esriFieldTypeXML" => FieldType::Json,
        _ => FieldType::Text,
    }
}

fn geometry_kind_from_esri(esri: Option<&str>) -> Result<GeometryKind> {
    match esri {
        Some("esriGeometryPoint") => Ok(GeometryKind::Point),
        Some("esriGeometryPolygon") => Ok(GeometryKind::Polygon),
        Some(other) => Err(GisError::parse(format!(
            "unsupported service geometry type: {other}"
        ))),
        None => Err(GisError::parse("service reported no geometry type")),
    }
}

fn feature_to_raw(feature: AgsFeature) -> RawFeature {
    let AgsFeature {
        attributes,
        geometry,
    } = feature;
    let mut raw = RawFeature::new(detect_external_id(&attributes), None, attributes);
    match geometry {
        Some(AgsGeometry {
            x: Some(x),
            y: Some(y),
            ..
        }) => {
            raw.geometry = Some(FeatureGeometry::Point { lng: x, lat: y });
        }
        Some(AgsGeometry {
            rings: Some(rings), ..
        }) if !rings.is_empty() => {
            raw.geometry = Some(FeatureGeometry::Polygon { rings });
        }
        Some(_) => {
            raw.geometry_error = Some("feature geometry has neither x/y nor rings".into());
        }
        None => {}
    }
    raw
}

/// Stitch fetched pages into one canonical parse.
///
/// Field list and geometry type come from the first page; later pages
/// only contribute features.
pub fn assemble(pages: Vec<QueryPage>) -> Result<ParsedSource> {
    let first = pages
        .first()
        .ok_or_else(|| GisError::parse("service returned no pages"))?;

    let kind = geometry_kind_from_esri(first.geometry_type.as_deref())?;
    let fields: Vec<FieldInfo> = first
        .fields
        .iter()
        .map(|f| FieldInfo {
            name: f.name.clone(),
            field_type: field_type_from_esri(&f.field_type),
            alias: f.alias.clone(),
        })
        .collect();

    let features: Vec<RawFeature> = pages
        .into_iter()
        .flat_map(|page| page.features)
        .map(feature_to_raw)
        .collect();

    Ok(build_preview(features, Some(fields), kind))
}
