//! Feature persistence.
//!
//! The reconciliation write path is a single `INSERT .. ON CONFLICT`
//! against the partial unique index on `(layer_id, external_id)` —
//! conflict-resolve-on-write, so a retried page fetch after a transient
//! network failure cannot create duplicate rows.

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::{Map, Value};

use crate::error::{GisError, Result};
use crate::models::{ConfigId, Feature, FeatureGeometry, FeatureId, LayerId};
use crate::store::{parse_db_time, GisStore};

/// Mutable fields of a feature write, shared by insert and upsert.
#[derive(Clone, Debug)]
pub(crate) struct NewFeature {
    pub title: Option<String>,
    pub notes: Option<String>,
    pub address: Option<String>,
    pub radius_m: Option<f64>,
    pub properties: Map<String, Value>,
    pub geometry: FeatureGeometry,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Upsert by `(layer_id, external_id)` inside the caller's transaction.
///
/// The insert/update distinction only feeds the stats report; the
/// existence probe runs inside the same transaction, so it cannot race
/// the write it precedes.
pub(crate) fn upsert_feature_tx(
    conn: &Connection,
    layer_id: LayerId,
    config_id: Option<ConfigId>,
    external_id: &str,
    new: &NewFeature,
) -> Result<UpsertOutcome> {
    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM features WHERE layer_id = ?1 AND external_id = ?2",
            params![layer_id.raw(), external_id],
            |row| row.get(0),
        )
        .optional()?;

    conn.execute(
        "INSERT INTO features
            (layer_id, config_id, external_id, title, notes, address, radius_m,
             properties_json, geometry_json, last_seen_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, datetime('now'))
         ON CONFLICT(layer_id, external_id) WHERE external_id IS NOT NULL
         DO UPDATE SET
            config_id = excluded.config_id,
            title = excluded.title,
            notes = excluded.notes,
            address = excluded.address,
            radius_m = excluded.radius_m,
            properties_json = excluded.properties_json,
            geometry_json = excluded.geometry_json,
            updated_at = datetime('now'),
            last_seen_at = excluded.last_seen_at",
        params![
            layer_id.raw(),
            config_id.map(ConfigId::raw),
            external_id,
            new.title,
            new.notes,
            new.address,
            new.radius_m,
            serde_json::to_string(&new.properties)?,
            serde_json::to_string(&new.geometry)?,
        ],
    )?;

    Ok(match existing {
        Some(_) => UpsertOutcome::Updated,
        None => UpsertOutcome::Inserted,
    })
}

/// Plain insert for rows with no reconciliation identity.
pub(crate) fn insert_feature_tx(
    conn: &Connection,
    layer_id: LayerId,
    config_id: Option<ConfigId>,
    external_id: Option<&str>,
    new: &NewFeature,
) -> Result<FeatureId> {
    conn.execute(
        "INSERT INTO features
            (layer_id, config_id, external_id, title, notes, address, radius_m,
             properties_json, geometry_json, last_seen_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, datetime('now'))",
        params![
            layer_id.raw(),
            config_id.map(ConfigId::raw),
            external_id,
            new.title,
            new.notes,
            new.address,
            new.radius_m,
            serde_json::to_string(&new.properties)?,
            serde_json::to_string(&new.geometry)?,
        ],
    )?;
    Ok(FeatureId::new(conn.last_insert_rowid()))
}

/// Remove every feature a previous import attributed to this
/// layer/config pair. Manually placed features (no external id) are
/// never touched.
pub(crate) fn delete_imported_tx(
    conn: &Connection,
    layer_id: LayerId,
    config_id: Option<ConfigId>,
) -> Result<usize> {
    let deleted = match config_id {
        Some(config_id) => conn.execute(
            "DELETE FROM features
             WHERE layer_id = ?1 AND external_id IS NOT NULL AND config_id = ?2",
            params![layer_id.raw(), config_id.raw()],
        )?,
        None => conn.execute(
            "DELETE FROM features
             WHERE layer_id = ?1 AND external_id IS NOT NULL AND config_id IS NULL",
            params![layer_id.raw()],
        )?,
    };
    Ok(deleted)
}

impl GisStore {
    /// Manually place a feature (no external id, no owning config).
    pub fn insert_feature(
        &self,
        layer_id: LayerId,
        title: Option<&str>,
        geometry: FeatureGeometry,
        properties: Map<String, Value>,
    ) -> Result<FeatureId> {
        let new = NewFeature {
            title: title.map(str::to_string),
            notes: None,
            address: None,
            radius_m: None,
            properties,
            geometry,
        };
        self.with_conn(|conn| insert_feature_tx(conn, layer_id, None, None, &new))
    }

    pub fn get_feature(&self, id: FeatureId) -> Result<Option<Feature>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("{FEATURE_SELECT} WHERE id = ?1"),
                params![id.raw()],
                row_to_feature,
            )
            .optional()
            .map_err(GisError::from)
        })
    }

    pub fn features_in_layer(&self, layer_id: LayerId) -> Result<Vec<Feature>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("{FEATURE_SELECT} WHERE layer_id = ?1 ORDER BY id"))?;
            let rows = stmt.query_map(params![layer_id.raw()], row_to_feature)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
    }

    pub fn count_features(&self, layer_id: LayerId) -> Result<usize> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM features WHERE layer_id = ?1",
                params![layer_id.raw()],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
    }

    /// Hard delete. Closures use this as their "reopened" action.
    pub fn delete_feature(&self, id: FeatureId) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM features WHERE id = ?1", params![id.raw()])?;
            Ok(changed > 0)
        })
    }
}

const FEATURE_SELECT: &str = "SELECT id, layer_id, config_id, external_id, title, notes, address,
        radius_m, properties_json, geometry_json, last_seen_at
 FROM features";

fn row_to_feature(row: &Row<'_>) -> rusqlite::Result<Feature> {
    let properties_json: String = row.get("properties_json")?;
    let geometry_json: String = row.get("geometry_json")?;
    let last_seen: Option<String> = row.get("last_seen_at")?;

    let properties = serde_json::from_str(&properties_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(8, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let geometry = serde_json::from_str(&geometry_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(9, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(Feature {
        id: FeatureId::new(row.get("id")?),
        layer_id: LayerId::new(row.get("layer_id")?),
        external_id: row.get("external_id")?,
        title: row.get("title")?,
        notes: row.get("notes")?,
        address: row.get("address")?,
        radius_m: row.get("radius_m")?,
        properties,
        geometry,
        config_id: row.get::<_, Option<i64>>("config_id")?.map(ConfigId::new),
        last_seen_at: last_seen.as_deref().and_then(parse_db_time),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GeometryKind;

    fn point() -> FeatureGeometry {
        FeatureGeometry::Point {
            lng: -75.16,
            lat: 39.95,
        }
    }

    fn new_feature(title: &str) -> NewFeature {
        NewFeature {
            title: Some(title.to_string()),
            notes: None,
            address: None,
            radius_m: None,
            properties: Map::new(),
            geometry: point(),
        }
    }

    #[test]
    fn test_upsert_inserts_then_updates() {
        let store = GisStore::open_in_memory().unwrap();
        let layer = store.create_layer("Hydrants", GeometryKind::Point).unwrap();

        let outcome = store
            .with_conn(|conn| upsert_feature_tx(conn, layer.id, None, "17", &new_feature("v1")))
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Inserted);

        let outcome = store
            .with_conn(|conn| upsert_feature_tx(conn, layer.id, None, "17", &new_feature("v2")))
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Updated);

        let features = store.features_in_layer(layer.id).unwrap();
        assert_eq!(features.len(), 1);
        assert_eq!(features[0].title.as_deref(), Some("v2"));
        assert!(features[0].last_seen_at.is_some());
    }

    #[test]
    fn test_same_external_id_in_different_layers() {
        let store = GisStore::open_in_memory().unwrap();
        let a = store.create_layer("Hydrants", GeometryKind::Point).unwrap();
        let b = store.create_layer("Valves", GeometryKind::Point).unwrap();

        store
            .with_conn(|conn| {
                upsert_feature_tx(conn, a.id, None, "17", &new_feature("hydrant"))?;
                upsert_feature_tx(conn, b.id, None, "17", &new_feature("valve"))
            })
            .unwrap();
        assert_eq!(store.count_features(a.id).unwrap(), 1);
        assert_eq!(store.count_features(b.id).unwrap(), 1);
    }

    #[test]
    fn test_manual_features_multiply_freely() {
        let store = GisStore::open_in_memory().unwrap();
        let layer = store.create_layer("Notes", GeometryKind::Point).unwrap();
        store
            .insert_feature(layer.id, Some("one"), point(), Map::new())
            .unwrap();
        store
            .insert_feature(layer.id, Some("two"), point(), Map::new())
            .unwrap();
        assert_eq!(store.count_features(layer.id).unwrap(), 2);
    }

    #[test]
    fn test_delete_imported_spares_manual_features(){
        let store = GisStore::open_in_memory().unwrap();
        let layer = store.create_layer("Mixed", GeometryKind::Point).unwrap();

        store
            .insert_feature(layer.id, Some("manual"), point(), Map::new())
            .unwrap();
        store
            .with_conn(|conn| {
                upsert_feature_tx(conn, layer.id, None, "a", &new_feature("imported"))?;
                let deleted = delete_imported_tx(conn, layer.id, None)?;
                assert_eq!(deleted, 1);
                Ok(())
            })
            .unwrap();

        let remaining = store.features_in_layer(layer.id).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].title.as_deref(), Some("manual"));
    }

    #[test]
    fn test_hard_delete() {
        let store = GisStore::open_in_memory().unwrap();
        let layer = store.create_layer("Closures", GeometryKind::Point).unwrap();
        let id = store
            .insert_feature(layer.id, Some("closed"), point(), Map::new())
            .unwrap();
        assert!(store.delete_feature(id).unwrap());
        assert!(store.get_feature(id).unwrap().is_none());
    }
}
