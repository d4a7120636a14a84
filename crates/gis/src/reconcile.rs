//! Merge/replace reconciliation of parsed features into a layer.
//!
//! One transaction per call: either the whole batch lands or none of it
//! does. Per-feature problems (missing geometry, kind mismatch) are
//! counted and logged, never fatal to the rest of the batch.

use serde_json::Value;
use tracing::{info, warn};

use crate::error::Result;
use crate::formats::{value_to_id, ParsedSource, RawFeature};
use crate::models::{ConfigId, FieldMapping, GisLayer, ImportMode, ImportStats};
use crate::store::{
    delete_imported_tx, insert_feature_tx, upsert_feature_tx, GisStore, NewFeature, UpsertOutcome,
};

/// Run one import batch against a layer.
///
/// Merge upserts by `(layer_id, external_id)` and leaves rows absent
/// from the pull untouched; replace deletes everything previously
/// attributed to this layer/config first. Re-running merge with
/// identical source data reports `imported = 0` and changes nothing
/// but timestamps.
pub fn reconcile(
    store: &GisStore,
    layer: &GisLayer,
    config_id: Option<ConfigId>,
    parsed: &ParsedSource,
    mode: ImportMode,
    mapping: &FieldMapping,
) -> Result<ImportStats> {
    let stats = store.with_conn(|conn| {
        let tx = conn.transaction()?;
        let mut stats = ImportStats::default();

        if mode == ImportMode::Replace {
            let deleted = delete_imported_tx(&tx, layer.id, config_id)?;
            info!(layer = %layer.name, deleted, "replace mode cleared previous import");
        }

        for (index, raw) in parsed.features.iter().enumerate() {
            if let Some(reason) = &raw.geometry_error {
                warn!(layer = %layer.name, index, %reason, "feature rejected");
                stats.errors += 1;
                continue;
            }
            let geometry = match &raw.geometry {
                Some(geometry) => geometry.clone(),
                None => {
                    stats.skipped += 1;
                    continue;
                }
            };
            if !layer.geometry_kind.accepts(&geometry) {
                warn!(
                    layer = %layer.name,
                    index,
                    expected = %layer.geometry_kind,
                    found = geometry.kind_str(),
                    "geometry kind mismatch"
                );
                stats.errors += 1;
                continue;
            }

            let external_id = mapped_external_id(raw, mapping);
            let new = build_feature(raw, mapping, geometry);

            match (mode, external_id) {
                (_, Some(external_id)) => {
                    match upsert_feature_tx(&tx, layer.id, config_id, &external_id, &new)? {
                        UpsertOutcome::Inserted => stats.imported += 1,
                        UpsertOutcome::Updated => stats.updated += 1,
                    }
                }
                // No reconciliation identity: plain insert
                (_, None) => {
                    insert_feature_tx(&tx, layer.id, config_id, None, &new)?;
                    stats.imported += 1;
                }
            }
        }

        tx.commit()?;
        Ok(stats)
    })?;

    info!(
        layer = %layer.name,
        mode = mode.as_str(),
        imported = stats.imported,
        updated = stats.updated,
        skipped = stats.skipped,
        errors = stats.errors,
        "import reconciled"
    );
    Ok(stats)
}

fn mapped_external_id(raw: &RawFeature, mapping: &FieldMapping) -> Option<String> {
    mapping
        .external_id
        .as_deref()
        .and_then(|column| lookup(raw, column))
        .and_then(|v| value_to_id(&v))
        .or_else(|| raw.external_id.clone())
}

fn build_feature(raw: &RawFeature, mapping: &FieldMapping, geometry: crate::models::FeatureGeometry) -> NewFeature {
    NewFeature {
        title: mapped_string(raw, mapping.title.as_deref()),
        notes: mapped_string(raw, mapping.notes.as_deref()),
        address: mapped_string(raw, mapping.address.as_deref()),
        radius_m: mapping
            .radius_m
            .as_deref()
            .and_then(|column| lookup(raw, column))
            .and_then(|v| match v {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse().ok(),
                _ => None,
            }),
        properties: raw.properties.clone(),
        geometry,
    }
}

fn mapped_string(raw: &RawFeature, column: Option<&str>) -> Option<String> {
    let value = lookup(raw, column?)?;
    let s = match value {
        Value::String(s) => s,
        Value::Null => return None,
        other => other.to_string(),
    };
    let s = s.trim().to_string();
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

/// Case-insensitive property lookup; source headers rarely agree on
/// capitalization with the mapping the operator typed.
fn lookup(raw: &RawFeature, column: &str) -> Option<Value> {
    raw.properties
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(column))
        .map(|(_, value)| value.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::build_preview;
    use crate::models::{FeatureGeometry, GeometryKind};
    use serde_json::{json, Map};

    fn hydrant(id: u32) -> RawFeature {
        let mut props = Map::new();
        props.insert("OBJECTID".into(), json!(id));
        props.insert("name".into(), json!(format!("Hydrant {id}")));
        props.insert("flow_gpm".into(), json!(1000 + id));
        RawFeature::new(
            Some(id.to_string()),
            Some(FeatureGeometry::Point {
                lng: -75.16 - f64::from(id) * 1e-4,
                lat: 39.95,
            }),
            props,
        )
    }

    fn hydrants(n: u32) -> ParsedSource {
        build_preview((1..=n).map(hydrant).collect(), None, GeometryKind::Point)
    }

    #[test]
    fn test_repeated_remote_import_scenario() {
        // First run over 50 hydrant records imports all of them; an
        // unchanged second run updates all and imports none.
        let store = GisStore::open_in_memory().unwrap();
        let layer = store.create_layer("Hydrants", GeometryKind::Point).unwrap();
        let parsed = hydrants(50);
        let mapping = FieldMapping {
            title: Some("name".into()),
            ..FieldMapping::default()
        };

        let first = reconcile(&store, &layer, None, &parsed, ImportMode::Merge, &mapping).unwrap();
        assert_eq!(
            first,
            ImportStats { imported: 50, updated: 0, skipped: 0, errors: 0 }
        );

        let second = reconcile(&store, &layer, None, &parsed, ImportMode::Merge, &mapping).unwrap();
        assert_eq!(
            second,
            ImportStats { imported: 0, updated: 50, skipped: 0, errors: 0 }
        );
        assert_eq!(store.count_features(layer.id).unwrap(), 50);

        let features = store.features_in_layer(layer.id).unwrap();
        assert_eq!(features[0].title.as_deref(), Some("Hydrant 1"));
        assert_eq!(features[0].properties["flow_gpm"], json!(1001));
    }

    #[test]
    fn test_replace_exactness() {
        let store = GisStore::open_in_memory().unwrap();
        let layer = store.create_layer("Hydrants", GeometryKind::Point).unwrap();
        let mapping = FieldMapping::default();

        reconcile(&store, &layer, None, &hydrants(5), ImportMode::Merge, &mapping).unwrap();
        assert_eq!(store.count_features(layer.id).unwrap(), 5);

        // Upstream shrank to 3 records; replace removes the stale rows
        let stats =
            reconcile(&store, &layer, None, &hydrants(3), ImportMode::Replace, &mapping).unwrap();
        assert_eq!(stats.imported, 3);
        assert_eq!(store.count_features(layer.id).unwrap(), 3);
    }

    #[test]
    fn test_merge_leaves_absent_rows_untouched() {
        let store = GisStore::open_in_memory().unwrap();
        let layer = store.create_layer("Hydrants", GeometryKind::Point).unwrap();
        let mapping = FieldMapping::default();

        reconcile(&store, &layer, None, &hydrants(5), ImportMode::Merge, &mapping).unwrap();
        let stats =
            reconcile(&store, &layer, None, &hydrants(2), ImportMode::Merge, &mapping).unwrap();
        assert_eq!(stats.updated, 2);
        // Rows 3..5 disappeared upstream but merge does not delete
        assert_eq!(store.count_features(layer.id).unwrap(), 5);
    }

    #[test]
    fn test_skipped_and_errors_counted() {
        let store = GisStore::open_in_memory().unwrap();
        let layer = store.create_layer("Hydrants", GeometryKind::Point).unwrap();

        let mut no_geometry = hydrant(100);
        no_geometry.geometry = None;
        let mut bad_geometry = hydrant(101);
        bad_geometry.geometry = None;
        bad_geometry.geometry_error = Some("row 3: unparseable coordinates".into());
        let mut wrong_kind = hydrant(102);
        wrong_kind.geometry = Some(FeatureGeometry::Polygon { rings: vec![] });

        let parsed = build_preview(
            vec![hydrant(1), no_geometry, bad_geometry, wrong_kind],
            None,
            GeometryKind::Point,
        );
        let stats = reconcile(
            &store,
            &layer,
            None,
            &parsed,
            ImportMode::Merge,
            &FieldMapping::default(),
        )
        .unwrap();
        assert_eq!(
            stats,
            ImportStats { imported: 1, updated: 0, skipped: 1, errors: 2 }
        );
        assert_eq!(store.count_features(layer.id).unwrap(), 1);
    }

    #[test]
    fn test_mapping_feeds_core_fields() {
        let store = GisStore::open_in_memory().unwrap();
        let layer = store
            .create_layer("Tanks", GeometryKind::PointRadius)
            .unwrap();

        let mut props = Map::new();
        props.insert("Label".into(), json!("Tanker fill site"));
        props.insert("Radius".into(), json!("150"));
        let raw = RawFeature::new(
            Some("T-1".into()),
            Some(FeatureGeometry::Point { lng: -75.0, lat: 40.0 }),
            props,
        );
        let parsed = build_preview(vec![raw], None, GeometryKind::Point);

        let mapping = FieldMapping {
            title: Some("label".into()),
            radius_m: Some("radius".into()),
            ..FieldMapping::default()
        };
        reconcile(&store, &layer, None, &parsed, ImportMode::Merge, &mapping).unwrap();

        let features = store.features_in_layer(layer.id).unwrap();
        assert_eq!(features[0].title.as_deref(), Some("Tanker fill site"));
        assert_eq!(features[0].radius_m, Some(150.0));
    }
}
