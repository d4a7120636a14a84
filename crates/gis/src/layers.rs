//! Layer style and property-schema maintenance during imports.
//!
//! Imports may only add to a layer's schema; fields an operator already
//! defined (types, labels, select options) are never overwritten, and
//! nothing is ever removed. Schema checks against stored properties are
//! display-level only — storage stays schema-flexible.

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::Result;
use crate::formats::ParsedSource;
use crate::models::{FieldDef, FieldType, GeometryKind, GisLayer, LayerStyle};
use crate::store::GisStore;

/// Fold a parse's field list and optional style into the layer record.
/// Returns the layer as it now stands.
pub fn apply_import_metadata(
    store: &GisStore,
    layer: &GisLayer,
    parsed: &ParsedSource,
    style: Option<&LayerStyle>,
) -> Result<GisLayer> {
    let mut updated = layer.clone();
    let mut schema_changed = false;

    for field in &parsed.fields {
        if updated.property_schema.contains_key(&field.name) {
            continue;
        }
        updated.property_schema.insert(
            field.name.clone(),
            FieldDef {
                field_type: field.field_type,
                label: field.alias.clone().unwrap_or_else(|| field.name.clone()),
                options: Vec::new(),
            },
        );
        schema_changed = true;
    }
    if schema_changed {
        debug!(layer = %layer.name, fields = updated.property_schema.len(), "schema extended");
        store.update_layer_schema(updated.id, &updated.property_schema)?;
    }

    if let Some(style) = style {
        if updated.geometry_kind == GeometryKind::Polygon {
            store.update_layer_style(updated.id, style)?;
            updated.style = Some(style.clone());
        }
    }

    Ok(updated)
}

/// A display-level mismatch between a stored property and the layer
/// schema.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldIssue {
    pub field: String,
    pub message: String,
}

/// Check stored properties against the layer schema for the editing UI.
/// Issues never block storage; unknown properties are fine.
pub fn validate_for_display(layer: &GisLayer, properties: &Map<String, Value>) -> Vec<FieldIssue> {
    let mut issues = Vec::new();

    for (name, def) in &layer.property_schema {
        let Some(value) = properties.get(name) else {
            continue;
        };
        if value.is_null() {
            continue;
        }
        let ok = match def.field_type {
            FieldType::Text | FieldType::Json => true,
            FieldType::Number => {
                value.is_number()
                    || value
                        .as_str()
                        .is_some_and(|s| s.trim().parse::<f64>().is_ok())
            }
            FieldType::Date => value.as_str().is_some_and(|s| {
                chrono::NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").is_ok()
                    || chrono::NaiveDate::parse_from_str(s.trim(), "%m/%d/%Y").is_ok()
            }),
            FieldType::Select => value
                .as_str()
                .is_some_and(|s| def.options.iter().any(|o| o == s)),
        };
        if !ok {
            issues.push(FieldIssue {
                field: name.clone(),
                message: format!("value {value} does not fit {:?}", def.field_type),
            });
        }
    }
    issues
}
