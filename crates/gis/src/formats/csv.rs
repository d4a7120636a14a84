//! Delimited-text parsing with header-based coordinate detection.
//!
//! Geometry columns are located by matching header names against a
//! small alias set, case-insensitively. A header with no recognizable
//! coordinate columns is a parse error; there is nothing useful to
//! preview without geometry.

use serde_json::{Map, Value};

use super::{build_preview, detect_external_id, ParsedSource, RawFeature};
use crate::error::{GisError, Result};
use crate::models::{FeatureGeometry, GeometryKind};

const LAT_ALIASES: &[&str] = &["lat", "latitude", "y"];
const LNG_ALIASES: &[&str] = &["lng", "lon", "long", "longitude", "x"];

pub fn parse(bytes: &[u8]) -> Result<ParsedSource> {
    let mut reader = ::csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(::csv::Trim::All)
        .flexible(true)
        .from_reader(bytes);

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| GisError::parse(format!("unreadable CSV header: {e}")))?
        .iter()
        .map(str::to_string)
        .collect();

    let lat_col = find_column(&headers, LAT_ALIASES);
    let lng_col = find_column(&headers, LNG_ALIASES);
    let (lat_col, lng_col) = match (lat_col, lng_col) {
        (Some(lat), Some(lng)) => (lat, lng),
        _ => {
            return Err(GisError::parse(
                "no recognizable coordinate columns in CSV header \
                 (expected lat/latitude/y and lng/lon/longitude/x)",
            ))
        }
    };

    let mut features = Vec::new();
    for (row_index, record) in reader.records().enumerate() {
        let record =
            record.map_err(|e| GisError::parse(format!("CSV row {}: {e}", row_index + 2)))?;

        let mut properties = Map::new();
        for (i, header) in headers.iter().enumerate() {
            let value = record.get(i).unwrap_or("");
            properties.insert(header.clone(), cell_to_value(value));
        }

        let mut feature = RawFeature::new(detect_external_id(&properties), None, properties);
        let lat_cell = record.get(lat_col).unwrap_or("").trim();
        let lng_cell = record.get(lng_col).unwrap_or("").trim();
        if lat_cell.is_empty() && lng_cell.is_empty() {
            // No geometry on this row; reconciler counts it as skipped
            features.push(feature);
            continue;
        }
        match (lat_cell.parse::<f64>(), lng_cell.parse::<f64>()) {
            (Ok(lat), Ok(lng)) if (-90.0..=90.0).contains(&lat) => {
                feature.geometry = Some(FeatureGeometry::Point { lng, lat });
            }
            _ => {
                feature.geometry_error = Some(format!(
                    "row {}: unparseable coordinates ({lat_cell:?}, {lng_cell:?})",
                    row_index + 2
                ));
            }
        }
        features.push(feature);
    }

    Ok(build_preview(features, None, GeometryKind::Point))
}

fn find_column(headers: &[String], aliases: &[&str]) -> Option<usize> {
    headers
        .iter()
        .position(|h| aliases.contains(&h.trim().to_ascii_lowercase().as_str()))
}

/// Keep numeric cells numeric so stored properties round-trip cleanly.
fn cell_to_value(cell: &str) -> Value {
    let trimmed = cell.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    if let Ok(n) = trimmed.parse::<i64>() {
        return Value::from(n);
    }
    if let Ok(f) = trimmed.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(f) {
            return Value::Number(n);
        }
    }
    Value::String(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lat_lng_name_header() {
        // Header `Lat,Lng,Name` with 12 data rows
        let mut data = String::from("Lat,Lng,Name\n");
        for i in 0..12 {
            data.push_str(&format!("40.0{i},-75.0{i},Station {i}\n"));
        }
        let parsed = parse(data.as_bytes()).unwrap();
        assert_eq!(parsed.geometry_kind, GeometryKind::Point);
        assert_eq!(parsed.feature_count, 12);
        assert!(parsed.features.iter().all(|f| f.geometry.is_some()));
    }

    #[test]
    fn test_alias_and_case_insensitive_headers() {
        let data = "LONGITUDE,LATITUDE,label\n-75.1,40.1,Engine 5\n";
        let parsed = parse(data.as_bytes()).unwrap();
        let geom = parsed.features[0].geometry.as_ref().unwrap();
        assert_eq!(
            *geom,
            FeatureGeometry::Point { lng: -75.1, lat: 40.1 }
        );
    }

    #[test]
    fn test_missing_coordinate_columns_fails() {
        let err = parse(b"name,address\nStation 1,100 Main St\n").unwrap_err();
        assert!(matches!(err, GisError::Parse { .. }));
    }

    #[test]
    fn test_blank_and_malformed_rows() {
        let data = "lat,lng,name\n40.0,-75.0,ok\n,,no geometry\nbogus,-75.0,bad\n";
        let parsed = parse(data.as_bytes()).unwrap();
        assert_eq!(parsed.feature_count, 3);
        assert!(parsed.features[0].geometry.is_some());
        assert!(parsed.features[1].geometry.is_none());
        assert!(parsed.features[1].geometry_error.is_none());
        assert!(parsed.features[2].geometry.is_none());
        assert!(parsed.features[2].geometry_error.is_some());
    }

    #[test]
    fn test_id_column_becomes_external_id() {
        let data = "id,lat,lng\nH-17,40.0,-75.0\n";
        let parsed = parse(data.as_bytes()).unwrap();
        assert_eq!(parsed.features[0].external_id.as_deref(), Some("H-17"));
    }
}
