//! Layer persistence.

use std::collections::BTreeMap;

use rusqlite::{params, OptionalExtension, Row};

use crate::error::{GisError, Result};
use crate::models::{FieldDef, GeometryKind, GisLayer, LayerId, LayerStyle};
use crate::store::GisStore;

impl GisStore {
    pub fn create_layer(&self, name: &str, geometry_kind: GeometryKind) -> Result<GisLayer> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO layers (name, geometry_kind) VALUES (?1, ?2)",
                params![name, geometry_kind.as_str()],
            )?;
            Ok(GisLayer {
                id: LayerId::new(conn.last_insert_rowid()),
                name: name.to_string(),
                geometry_kind,
                property_schema: BTreeMap::new(),
                style: None,
            })
        })
    }

    pub fn get_layer(&self, id: LayerId) -> Result<Option<GisLayer>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("{LAYER_SELECT} WHERE id = ?1"),
                params![id.raw()],
                row_to_layer,
            )
            .optional()
            .map_err(GisError::from)
        })
    }

    pub fn get_layer_by_name(&self, name: &str) -> Result<Option<GisLayer>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("{LAYER_SELECT} WHERE name = ?1"),
                params![name],
                row_to_layer,
            )
            .optional()
            .map_err(GisError::from)
        })
    }

    pub fn list_layers(&self) -> Result<Vec<GisLayer>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{LAYER_SELECT} ORDER BY name"))?;
            let rows = stmt.query_map([], row_to_layer)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
    }

    pub fn update_layer_style(&self, id: LayerId, style: &LayerStyle) -> Result<()> {
        let style_json = serde_json::to_string(style)?;
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE layers SET style_json = ?2 WHERE id = ?1",
                params![id.raw(), style_json],
            )?;
            if changed == 0 {
                return Err(GisError::LayerNotFound(id));
            }
            Ok(())
        })
    }

    pub fn update_layer_schema(
        &self,
        id: LayerId,
        schema: &BTreeMap<String, FieldDef>,
    ) -> Result<()> {
        let schema_json = serde_json::to_string(schema)?;
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE layers SET property_schema_json = ?2 WHERE id = ?1",
                params![id.raw(), schema_json],
            )?;
            if changed == 0 {
                return Err(GisError::LayerNotFound(id));
            }
            Ok(())
        })
    }
}

const LAYER_SELECT: &str =
    "SELECT id, name, geometry_kind, property_schema_json, style_json FROM layers";

fn row_to_layer(row: &Row<'_>) -> rusqlite::Result<GisLayer> {
    let kind_str: String = row.get("geometry_kind")?;
    let schema_json: String = row.get("property_schema_json")?;
    let style_json: Option<String> = row.get("style_json")?;

    let geometry_kind = GeometryKind::parse(&kind_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown geometry kind {kind_str:?}").into(),
        )
    })?;
    let property_schema = serde_json::from_str(&schema_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let style = match style_json {
        Some(json) => serde_json::from_str(&json).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?,
        None => None,
    };

    Ok(GisLayer {
        id: LayerId::new(row.get("id")?),
        name: row.get("name")?,
        geometry_kind,
        property_schema,
        style,
    })
}
