//! Zipped shapefile bundle normalization.
//!
//! The upload is a zip holding `.shp` geometry, a `.dbf` attribute
//! table, and optionally a `.prj` with the declared projection. When a
//! `.prj` is present and names something other than the working
//! reference system, every coordinate is reprojected before storage;
//! a bundle without one is assumed to already be WGS84.

use std::io::{Cursor, Read};

use serde_json::{Map, Value};
use shapefile::dbase::FieldValue;
use shapefile::{PolygonRing, Shape, ShapeReader};

use super::{build_preview, detect_external_id, ParsedSource, RawFeature};
use crate::error::{GisError, Result};
use crate::models::{FeatureGeometry, GeometryKind};
use crate::projection::Projection;

pub fn parse_bundle(bytes: &[u8]) -> Result<ParsedSource> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| GisError::parse(format!("invalid zip archive: {e}")))?;

    let mut shp_bytes = None;
    let mut dbf_bytes = None;
    let mut prj_text = None;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| GisError::parse(format!("unreadable zip entry: {e}")))?;
        let name = entry.name().to_ascii_lowercase();
        if name.starts_with("__macosx") || name.rsplit('/').next().is_some_and(|n| n.starts_with('.')) {
            continue;
        }
        let mut contents = Vec::new();
        if name.ends_with(".shp") {
            entry.read_to_end(&mut contents)?;
            shp_bytes = Some(contents);
        } else if name.ends_with(".dbf") {
            entry.read_to_end(&mut contents)?;
            dbf_bytes = Some(contents);
        } else if name.ends_with(".prj") {
            entry.read_to_end(&mut contents)?;
            prj_text = Some(String::from_utf8_lossy(&contents).into_owned());
        }
    }

    let shp_bytes = shp_bytes.ok_or_else(|| GisError::parse("bundle has no .shp entry"))?;
    let dbf_bytes =
        dbf_bytes.ok_or_else(|| GisError::parse("bundle has no .dbf attribute table"))?;
    let projection = match prj_text {
        Some(wkt) => Projection::detect(&wkt)?,
        // No declared projection: treated as already WGS84
        None => Projection::Wgs84,
    };

    let shape_reader = ShapeReader::new(Cursor::new(shp_bytes))
        .map_err(|e| GisError::parse(format!("invalid .shp: {e}")))?;
    let dbase_reader = shapefile::dbase::Reader::new(Cursor::new(dbf_bytes))
        .map_err(|e| GisError::parse(format!("invalid .dbf: {e}")))?;
    let mut reader = shapefile::Reader::new(shape_reader, dbase_reader);

    let mut features = Vec::new();
    let mut geometry_kind = None;

    for pair in reader.iter_shapes_and_records() {
        let (shape, record) =
            pair.map_err(|e| GisError::parse(format!("unreadable shapefile record: {e}")))?;

        let mut properties = Map::new();
        for (name, value) in record {
            properties.insert(name, field_to_json(value));
        }

        let mut raw = RawFeature::new(detect_external_id(&properties), None, properties);
        match shape {
            Shape::Point(p) => {
                raw.geometry = Some(projected_point(projection, p.x, p.y));
                geometry_kind.get_or_insert(GeometryKind::Point);
            }
            Shape::PointM(p) => {
                raw.geometry = Some(projected_point(projection, p.x, p.y));
                geometry_kind.get_or_insert(GeometryKind::Point);
            }
            Shape::PointZ(p) => {
                raw.geometry = Some(projected_point(projection, p.x, p.y));
                geometry_kind.get_or_insert(GeometryKind::Point);
            }
            Shape::Polygon(polygon) => {
                let rings = polygon
                    .rings()
                    .iter()
                    .map(|ring| {
                        let points = match ring {
                            PolygonRing::Outer(pts) | PolygonRing::Inner(pts) => pts,
                        };
                        points
                            .iter()
                            .map(|p| {
                                let w = projection.to_wgs84(p.x, p.y);
                                [w.x(), w.y()]
                            })
                            .collect()
                    })
                    .collect();
                raw.geometry = Some(FeatureGeometry::Polygon { rings });
                geometry_kind.get_or_insert(GeometryKind::Polygon);
            }
            Shape::NullShape => {}
            other => {
                raw.geometry_error =
                    Some(format!("unsupported shape type: {}", shape_name(&other)));
            }
        }
        features.push(raw);
    }

    if features.is_empty() {
        return Err(GisError::parse("shapefile bundle contains no records"));
    }
    let kind = geometry_kind.unwrap_or(GeometryKind::Point);
    Ok(build_preview(features, None, kind))
}

fn projected_point(projection: Projection, x: f64, y: f64) -> FeatureGeometry {
    let p = projection.to_wgs84(x, y);
    FeatureGeometry::Point {
        lng: p.x(),
        lat: p.y(),
    }
}

fn shape_name(shape: &Shape) -> &'static str {
    match shape {
        Shape::NullShape => "Null",
        Shape::Point(_) | Shape::PointM(_) | Shape::PointZ(_) => "Point",
        Shape::Polyline(_) | Shape::PolylineM(_) | Shape::PolylineZ(_) => "Polyline",
        Shape::Polygon(_) | Shape::PolygonM(_) | Shape::PolygonZ(_) => "Polygon",
        Shape::Multipoint(_) | Shape::MultipointM(_) | Shape::MultipointZ(_) => "Multipoint",
        Shape::Multipatch(_) => "Multipatch",
    }
}

fn field_to_json(value: FieldValue) -> Value {
    match value {
        FieldValue::Character(Some(s)) => Value::String(s.trim().to_string()),
        FieldValue::Character(None) => Value::Null,
        FieldValue::Numeric(Some(n)) => number_value(n),
        FieldValue::Numeric(None) => Value::Null,
        FieldValue::Float(Some(f)) => number_value(f64::from(f)),
        FieldValue::Float(None) => Value::Null,
        FieldValue::Integer(i) => Value::from(i),
        FieldValue::Double(d) => number_value(d),
        FieldValue::Currency(c) => number_value(c),
        FieldValue::Logical(Some(b)) => Value::Bool(b),
        FieldValue::Logical(None) => Value::Null,
        FieldValue::Date(Some(d)) => {
            Value::String(format!("{:04}-{:02}-{:02}", d.year(), d.month(), d.day()))
        }
        FieldValue::Date(None) => Value::Null,
        FieldValue::Memo(s) => Value::String(s),
        other => Value::String(format!("{other:?}")),
    }
}

fn number_value(n: f64) -> Value {
    serde_json::Number::from_f64(n)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}
