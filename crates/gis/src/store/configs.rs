//! Import config persistence.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::error::{GisError, Result};
use crate::models::{
    ConfigId, FieldMapping, GisImportConfig, ImportMode, LayerId, RefreshStatus, SourceRef,
};
use crate::store::{parse_db_time, GisStore};

/// Fields of a config at creation time.
#[derive(Clone, Debug)]
pub struct NewConfig {
    pub name: String,
    pub source: SourceRef,
    /// Normalized form of the remote URL; the dedup key.
    pub source_url_normalized: Option<String>,
    pub layer_id: LayerId,
    pub mode: ImportMode,
    pub field_mapping: FieldMapping,
    pub filter_expression: Option<String>,
}

impl GisStore {
    pub fn insert_config(&self, new: &NewConfig) -> Result<ConfigId> {
        let (source_type, source_url, source_filename) = match &new.source {
            SourceRef::Remote { url } => ("remote", Some(url.as_str()), None),
            SourceRef::File { filename } => ("file", None, Some(filename.as_str())),
        };
        let mapping_json = serde_json::to_string(&new.field_mapping)?;

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO import_configs
                    (name, source_type, source_url, source_url_normalized, source_filename,
                     layer_id, mode, field_mapping_json, filter_expression)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    new.name,
                    source_type,
                    source_url,
                    new.source_url_normalized,
                    source_filename,
                    new.layer_id.raw(),
                    new.mode.as_str(),
                    mapping_json,
                    new.filter_expression,
                ],
            )?;
            Ok(ConfigId::new(conn.last_insert_rowid()))
        })
    }

    pub fn get_config(&self, id: ConfigId) -> Result<Option<GisImportConfig>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("{CONFIG_SELECT} WHERE id = ?1"),
                params![id.raw()],
                row_to_config,
            )
            .optional()
            .map_err(GisError::from)
        })
    }

    /// Look up a remote config by its normalized source URL.
    pub fn find_config_by_url(&self, normalized_url: &str) -> Result<Option<GisImportConfig>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("{CONFIG_SELECT} WHERE source_url_normalized = ?1"),
                params![normalized_url],
                row_to_config,
            )
            .optional()
            .map_err(GisError::from)
        })
    }

    pub fn list_configs(&self) -> Result<Vec<GisImportConfig>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{CONFIG_SELECT} ORDER BY id"))?;
            let rows = stmt.query_map([], row_to_config)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
    }

    /// Record the outcome of a refresh run.
    pub fn update_refresh_result(
        &self,
        id: ConfigId,
        status: RefreshStatus,
        count: Option<u32>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE import_configs SET
                    last_refresh_at = datetime('now'),
                    last_refresh_status = ?2,
                    last_refresh_count = ?3
                 WHERE id = ?1",
                params![id.raw(), status.as_str(), count],
            )?;
            if changed == 0 {
                return Err(GisError::ConfigNotFound(id));
            }
            Ok(())
        })
    }

    /// Delete the config only; the features it produced stay unless the
    /// caller also issues a layer-scoped delete.
    pub fn delete_config(&self, id: ConfigId) -> Result<bool> {
        self.with_conn(|conn| {
            let changed =
                conn.execute("DELETE FROM import_configs WHERE id = ?1", params![id.raw()])?;
            Ok(changed > 0)
        })
    }
}

const CONFIG_SELECT: &str = "SELECT id, name, source_type, source_url, source_filename, layer_id,
        mode, field_mapping_json, filter_expression,
        last_refresh_at, last_refresh_status, last_refresh_count
 FROM import_configs";

fn row_to_config(row: &Row<'_>) -> rusqlite::Result<GisImportConfig> {
    let source_type: String = row.get("source_type")?;
    let source = match source_type.as_str() {
        "remote" => SourceRef::Remote {
            url: row.get::<_, Option<String>>("source_url")?.unwrap_or_default(),
        },
        _ => SourceRef::File {
            filename: row
                .get::<_, Option<String>>("source_filename")?
                .unwrap_or_default(),
        },
    };

    let mapping_json: String = row.get("field_mapping_json")?;
    let field_mapping: FieldMapping = serde_json::from_str(&mapping_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let mode_str: String = row.get("mode")?;
    let last_refresh_at: Option<DateTime<Utc>> = row
        .get::<_, Option<String>>("last_refresh_at")?
        .as_deref()
        .and_then(parse_db_time);

    Ok(GisImportConfig {
        id: ConfigId::new(row.get("id")?),
        name: row.get("name")?,
        source,
        layer_id: LayerId::new(row.get("layer_id")?),
        mode: ImportMode::parse(&mode_str).unwrap_or(ImportMode::Merge),
        field_mapping,
        filter_expression: row.get("filter_expression")?,
        last_refresh_at,
        last_refresh_status: row
            .get::<_, Option<String>>("last_refresh_status")?
            .as_deref()
            .and_then(RefreshStatus::parse),
        last_refresh_count: row
            .get::<_, Option<i64>>("last_refresh_count")?
            .map(|n| n as u32),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GeometryKind;

    fn remote_config(layer_id: LayerId) -> NewConfig {
        NewConfig {
            name: "City hydrants".into(),
            source: SourceRef::Remote {
                url: "https://gis.example.com/FeatureServer/0".into(),
            },
            source_url_normalized: Some("https://gis.example.com/featureserver/0".into()),
            layer_id,
            mode: ImportMode::Merge,
            field_mapping: FieldMapping::default(),
            filter_expression: Some("STATUS='ACTIVE'".into()),
        }
    }

    #[test]
    fn test_insert_and_fetch_config() {
        let store = GisStore::open_in_memory().unwrap();
        let layer = store.create_layer("Hydrants", GeometryKind::Point).unwrap();
        let id = store.insert_config(&remote_config(layer.id)).unwrap();

        let config = store.get_config(id).unwrap().unwrap();
        assert_eq!(config.mode, ImportMode::Merge);
        assert_eq!(config.filter_expression.as_deref(), Some("STATUS='ACTIVE'"));
        assert!(config.last_refresh_at.is_none());
        assert!(matches!(config.source, SourceRef::Remote { .. }));
    }

    #[test]
    fn test_find_by_normalized_url() {
        let store = GisStore::open_in_memory().unwrap();
        let layer = store.create_layer("Hydrants", GeometryKind::Point).unwrap();
        store.insert_config(&remote_config(layer.id)).unwrap();

        let found = store
            .find_config_by_url("https://gis.example.com/featureserver/0")
            .unwrap();
        assert!(found.is_some());
        assert!(store.find_config_by_url("https://elsewhere").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_normalized_url_constrained() {
        let store = GisStore::open_in_memory().unwrap();
        let layer = store.create_layer("Hydrants", GeometryKind::Point).unwrap();
        let config = remote_config(layer.id);
        store.insert_config(&config).unwrap();
        assert!(store.insert_config(&config).is_err());
    }

    #[test]
    fn test_refresh_bookkeeping() {
        let store = GisStore::open_in_memory().unwrap();
        let layer = store.create_layer("Hydrants", GeometryKind::Point).unwrap();
        let id = store.insert_config(&remote_config(layer.id)).unwrap();

        store
            .update_refresh_result(id, RefreshStatus::Ok, Some(50))
            .unwrap();
        let config = store.get_config(id).unwrap().unwrap();
        assert_eq!(config.last_refresh_status, Some(RefreshStatus::Ok));
        assert_eq!(config.last_refresh_count, Some(50));
        assert!(config.last_refresh_at.is_some());
    }

    #[test]
    fn test_delete_config_only() {
        let store = GisStore::open_in_memory().unwrap();
        let layer = store.create_layer("Hydrants", GeometryKind::Point).unwrap();
        let id = store.insert_config(&remote_config(layer.id)).unwrap();
        assert!(store.delete_config(id).unwrap());
        assert!(store.get_config(id).unwrap().is_none());
    }
}
