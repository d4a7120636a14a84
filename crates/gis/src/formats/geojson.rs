//! GeoJSON normalization.

use geojson::{FeatureCollection, GeoJson, Value as GeoValue};

use super::{build_preview, detect_external_id, ParsedSource, RawFeature};
use crate::error::{GisError, Result};
use crate::models::{FeatureGeometry, GeometryKind};

pub fn parse(bytes: &[u8]) -> Result<ParsedSource> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| GisError::parse("GeoJSON upload is not valid UTF-8"))?;
    let geojson: GeoJson = text
        .parse()
        .map_err(|e| GisError::parse(format!("invalid GeoJSON: {e}")))?;

    let collection: FeatureCollection = match geojson {
        GeoJson::FeatureCollection(fc) => fc,
        GeoJson::Feature(f) => FeatureCollection {
            bbox: None,
            features: vec![f],
            foreign_members: None,
        },
        GeoJson::Geometry(_) => {
            return Err(GisError::parse(
                "bare GeoJSON geometry has no attributes to import",
            ))
        }
    };

    let mut features = Vec::new();
    let mut geometry_kind = None;

    for feature in collection.features {
        let properties = feature.properties.unwrap_or_default();

        let external_id = feature
            .id
            .as_ref()
            .map(|id| match id {
                geojson::feature::Id::String(s) => s.clone(),
                geojson::feature::Id::Number(n) => n.to_string(),
            })
            .or_else(|| detect_external_id(&properties));

        let mut raw = RawFeature::new(external_id, None, properties);
        match feature.geometry.map(|g| g.value) {
            Some(GeoValue::Point(coords)) => {
                if coords.len() >= 2 {
                    raw.geometry = Some(FeatureGeometry::Point {
                        lng: coords[0],
                        lat: coords[1],
                    });
                    geometry_kind.get_or_insert(GeometryKind::Point);
                } else {
                    raw.geometry_error = Some("point with fewer than 2 coordinates".into());
                }
            }
            Some(GeoValue::Polygon(rings)) => {
                raw.geometry = Some(FeatureGeometry::Polygon {
                    rings: convert_rings(&rings),
                });
                geometry_kind.get_or_insert(GeometryKind::Polygon);
            }
            Some(GeoValue::MultiPolygon(polys)) => {
                // Flattened into one ring set; first ring stays exterior
                let rings: Vec<Vec<[f64; 2]>> = polys
                    .iter()
                    .flat_map(|p| convert_rings(p))
                    .collect();
                raw.geometry = Some(FeatureGeometry::Polygon { rings });
                geometry_kind.get_or_insert(GeometryKind::Polygon);
            }
            Some(other) => {
                raw.geometry_error = Some(format!("unsupported geometry: {}", geometry_name(&other)));
            }
            None => {}
        }
        features.push(raw);
    }

    let kind = geometry_kind.ok_or_else(|| {
        GisError::parse("GeoJSON contains no importable point or polygon geometry")
    })?;
    Ok(build_preview(features, None, kind))
}

fn geometry_name(value: &GeoValue) -> &'static str {
    match value {
        GeoValue::Point(_) => "Point",
        GeoValue::MultiPoint(_) => "MultiPoint",
        GeoValue::LineString(_) => "LineString",
        GeoValue::MultiLineString(_) => "MultiLineString",
        GeoValue::Polygon(_) => "Polygon",
        GeoValue::MultiPolygon(_) => "MultiPolygon",
        GeoValue::GeometryCollection(_) => "GeometryCollection",
    }
}

fn convert_rings(rings: &[Vec<Vec<f64>>]) -> Vec<Vec<[f64; 2]>> {
    rings
        .iter()
        .map(|ring| {
            ring.iter()
                .filter(|pos| pos.len() >= 2)
                .map(|pos| [pos[0], pos[1]])
                .collect()
        })
        .collect()
}
