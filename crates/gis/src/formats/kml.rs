//! KML and KMZ normalization.
//!
//! Placemarks are collected from the whole document tree, so nested
//! `Folder`/`Document` containers are flattened. ExtendedData pairs
//! (both `Data`/`value` and `SchemaData`/`SimpleData`) land in the
//! property map alongside `name` and `description`.

use std::io::Read;

use roxmltree::{Document, Node};
use serde_json::{Map, Value};

use super::{build_preview, detect_external_id, ParsedSource, RawFeature};
use crate::error::{GisError, Result};
use crate::models::{FeatureGeometry, GeometryKind};

pub fn parse_kml(bytes: &[u8]) -> Result<ParsedSource> {
    let text =
        std::str::from_utf8(bytes).map_err(|_| GisError::parse("KML upload is not valid UTF-8"))?;
    let doc = Document::parse(text).map_err(|e| GisError::parse(format!("invalid KML: {e}")))?;

    let mut features = Vec::new();
    let mut geometry_kind = None;

    for placemark in doc
        .descendants()
        .filter(|n| n.has_tag_name("Placemark"))
    {
        let mut properties = Map::new();

        if let Some(name) = child_text(placemark, "name") {
            properties.insert("name".into(), Value::String(name));
        }
        if let Some(description) = child_text(placemark, "description") {
            properties.insert("description".into(), Value::String(description));
        }
        for data in placemark
            .descendants()
            .filter(|n| n.has_tag_name("Data"))
        {
            if let (Some(key), Some(value)) = (data.attribute("name"), child_text(data, "value")) {
                properties.insert(key.to_string(), Value::String(value));
            }
        }
        for simple in placemark
            .descendants()
            .filter(|n| n.has_tag_name("SimpleData"))
        {
            if let (Some(key), Some(value)) = (
                simple.attribute("name"),
                simple.text().map(|t| t.trim().to_string()),
            ) {
                properties.insert(key.to_string(), Value::String(value));
            }
        }

        let external_id = placemark
            .attribute("id")
            .map(str::to_string)
            .or_else(|| detect_external_id(&properties));

        let mut raw = RawFeature::new(external_id, None, properties);
        if let Some(point) = placemark.descendants().find(|n| n.has_tag_name("Point")) {
            match parse_coordinates(point) {
                Ok(coords) if !coords.is_empty() => {
                    raw.geometry = Some(FeatureGeometry::Point {
                        lng: coords[0][0],
                        lat: coords[0][1],
                    });
                    geometry_kind.get_or_insert(GeometryKind::Point);
                }
                Ok(_) => raw.geometry_error = Some("Point without coordinates".into()),
                Err(e) => raw.geometry_error = Some(e),
            }
        } else if let Some(polygon) = placemark.descendants().find(|n| n.has_tag_name("Polygon")) {
            match parse_polygon(polygon) {
                Ok(rings) if !rings.is_empty() => {
                    raw.geometry = Some(FeatureGeometry::Polygon { rings });
                    geometry_kind.get_or_insert(GeometryKind::Polygon);
                }
                Ok(_) => raw.geometry_error = Some("Polygon without rings".into()),
                Err(e) => raw.geometry_error = Some(e),
            }
        }
        features.push(raw);
    }

    if features.is_empty() {
        return Err(GisError::parse("KML contains no placemarks"));
    }
    let kind = geometry_kind.unwrap_or(GeometryKind::Point);
    Ok(build_preview(features, None, kind))
}

/// KMZ is a zip with the KML as its first `.kml` entry.
pub fn parse_kmz(bytes: &[u8]) -> Result<ParsedSource> {
    let cursor = std::io::Cursor::new(bytes);
    let mut archive = zip::ZipArchive::new(cursor)
        .map_err(|e| GisError::parse(format!("invalid KMZ archive: {e}")))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| GisError::parse(format!("unreadable KMZ entry: {e}")))?;
        let name = entry.name().to_ascii_lowercase();
        if name.ends_with(".kml") && !name.starts_with("__macosx") {
            let mut contents = Vec::new();
            entry.read_to_end(&mut contents)?;
            return parse_kml(&contents);
        }
    }
    Err(GisError::parse("KMZ archive contains no .kml entry"))
}

fn child_text(node: Node, tag: &str) -> Option<String> {
    node.children()
        .find(|n| n.has_tag_name(tag))
        .and_then(|n| n.text())
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Parse a `<coordinates>` blob: whitespace-separated `lon,lat[,alt]`.
fn parse_coordinates(parent: Node) -> std::result::Result<Vec<[f64; 2]>, String> {
    let text = parent
        .descendants()
        .find(|n| n.has_tag_name("coordinates"))
        .and_then(|n| n.text())
        .ok_or_else(|| "missing coordinates element".to_string())?;

    let mut out = Vec::new();
    for token in text.split_whitespace() {
        let mut parts = token.split(',');
        let lng = parts
            .next()
            .and_then(|s| s.trim().parse::<f64>().ok())
            .ok_or_else(|| format!("bad coordinate tuple {token:?}"))?;
        let lat = parts
            .next()
            .and_then(|s| s.trim().parse::<f64>().ok())
            .ok_or_else(|| format!("bad coordinate tuple {token:?}"))?;
        out.push([lng, lat]);
    }
    Ok(out)
}

fn parse_polygon(polygon: Node) -> std::result::Result<Vec<Vec<[f64; 2]>>, String> {
    let mut rings = Vec::new();
    // Exterior first, then any holes
    for boundary_tag in ["outerBoundaryIs", "innerBoundaryIs"] {
        for boundary in polygon
            .descendants()
            .filter(|n| n.has_tag_name(boundary_tag))
        {
            let ring = parse_coordinates(boundary)?;
            if !ring.is_empty() {
                rings.push(ring);
            }
        }
    }
    Ok(rings)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<kml xmlns="http://www.opengis.net/kml/2.2">
  <Document>
    <Folder>
      <name>Hydrants</name>
      <Placemark id="pm-1">
        <name>Hydrant 1</name>
        <description>Corner of 5th and Main</description>
        <ExtendedData>
          <Data name="flow_gpm"><value>1250</value></Data>
        </ExtendedData>
        <Point><coordinates>-75.1638,39.9526,0</coordinates></Point>
      </Placemark>
      <Folder>
        <Placemark>
          <name>Hydrant 2</name>
          <Point><coordinates>-75.1700,39.9600</coordinates></Point>
        </Placemark>
      </Folder>
    </Folder>
  </Document>
</kml>"#;

    #[test]
    fn test_placemarks_flattened_across_folders() {
        let parsed = parse_kml(KML.as_bytes()).unwrap();
        assert_eq!(parsed.geometry_kind, GeometryKind::Point);
        assert_eq!(parsed.feature_count, 2);
        assert_eq!(parsed.features[0].external_id.as_deref(), Some("pm-1"));
        assert_eq!(
            parsed.features[0].properties["flow_gpm"],
            Value::String("1250".into())
        );
        let geom = parsed.features[1].geometry.as_ref().unwrap();
        assert_eq!(
            *geom,
            FeatureGeometry::Point { lng: -75.17, lat: 39.96 }
        );
    }

    #[test]
    fn test_polygon_placemark() {
        let kml = r#"<?xml version="1.0"?>
<kml xmlns="http://www.opengis.net/kml/2.2">
  <Placemark>
    <name>Response Zone</name>
    <Polygon>
      <outerBoundaryIs><LinearRing>
        <coordinates>-75.0,40.0 -75.0,40.1 -74.9,40.1 -75.0,40.0</coordinates>
      </LinearRing></outerBoundaryIs>
      <innerBoundaryIs><LinearRing>
        <coordinates>-74.98,40.05 -74.97,40.05 -74.97,40.06 -74.98,40.05</coordinates>
      </LinearRing></innerBoundaryIs>
    </Polygon>
  </Placemark>
</kml>"#;
        let parsed = parse_kml(kml.as_bytes()).unwrap();
        assert_eq!(parsed.geometry_kind, GeometryKind::Polygon);
        match parsed.features[0].geometry.as_ref().unwrap() {
            FeatureGeometry::Polygon { rings } => {
                assert_eq!(rings.len(), 2);
                assert_eq!(rings[0].len(), 4);
            }
            other => panic!("expected polygon, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_kml_rejected() {
        let kml = r#"<kml xmlns="http://www.opengis.net/kml/2.2"><Document/></kml>"#;
        assert!(parse_kml(kml.as_bytes()).is_err());
    }

    #[test]
    fn test_kmz_round_trip() {
        use std::io::Write;
        let mut buf = Vec::new();
        {
            let mut writer = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            writer
                .start_file("doc.kml", zip::write::SimpleFileOptions::default())
                .unwrap();
            writer.write_all(KML.as_bytes()).unwrap();
            writer.finish().unwrap();
        }
        let parsed = parse_kmz(&buf).unwrap();
        assert_eq!(parsed.feature_count, 2);
    }
}
