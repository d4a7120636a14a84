//! Saved import configs, refresh, and the per-layer import lock.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use crate::error::{GisError, Result};
use crate::formats::{self, ParsedSource};
use crate::layers::apply_import_metadata;
use crate::models::{
    ConfigId, FieldMapping, GisImportConfig, GisLayer, ImportMode, ImportStats, LayerId,
    LayerStyle, RefreshStatus, SourceRef,
};
use crate::reconcile::reconcile;
use crate::remote::FeatureServiceClient;
use crate::store::{GisStore, NewConfig};

/// Canonical form of a remote source URL, used to detect duplicates:
/// query string and fragment stripped, trailing slashes stripped,
/// case folded.
pub fn normalize_source_url(url: &str) -> String {
    let trimmed = url.trim();
    let without_suffix = trimmed.split(['?', '#']).next().unwrap_or(trimmed);
    without_suffix.trim_end_matches('/').to_ascii_lowercase()
}

// ============================================================================
// Per-layer import lock
// ============================================================================

/// Fail-fast lock registry: one in-flight import or refresh per layer.
///
/// Never blocks — a second caller gets `Busy` immediately rather than
/// queueing behind a long fetch and interleaving its writes.
#[derive(Default)]
pub struct LayerLocks {
    held: Mutex<HashSet<i64>>,
}

impl LayerLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self, layer_id: LayerId) -> Result<LayerLockGuard<'_>> {
        let mut held = self
            .held
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !held.insert(layer_id.raw()) {
            return Err(GisError::Busy { layer_id });
        }
        Ok(LayerLockGuard {
            locks: self,
            layer_id,
        })
    }
}

pub struct LayerLockGuard<'a> {
    locks: &'a LayerLocks,
    layer_id: LayerId,
}

impl Drop for LayerLockGuard<'_> {
    fn drop(&mut self) {
        let mut held = self
            .locks
            .held
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        held.remove(&self.layer_id.raw());
    }
}

// ============================================================================
// Import service
// ============================================================================

/// The full import path: preview, reconcile, config bookkeeping.
pub struct ImportService {
    store: Arc<GisStore>,
    locks: LayerLocks,
    client: FeatureServiceClient,
}

impl ImportService {
    pub fn new(store: Arc<GisStore>) -> Result<Self> {
        Ok(Self {
            store,
            locks: LayerLocks::new(),
            client: FeatureServiceClient::new()?,
        })
    }

    pub fn store(&self) -> &GisStore {
        &self.store
    }

    /// Parse an upload for preview only; nothing is written.
    pub fn preview_upload(&self, filename: &str, bytes: &[u8]) -> Result<ParsedSource> {
        formats::parse_upload(filename, bytes)
    }

    /// Import an uploaded file into a layer.
    ///
    /// With `save_as`, a file-backed config is persisted so the import
    /// can be re-run later against a fresh upload.
    pub fn import_file(
        &self,
        layer_id: LayerId,
        filename: &str,
        bytes: &[u8],
        mode: ImportMode,
        mapping: &FieldMapping,
        style: Option<&LayerStyle>,
        save_as: Option<&str>,
    ) -> Result<(ImportStats, Option<ConfigId>)> {
        let layer = self.require_layer(layer_id)?;
        let _guard = self.locks.acquire(layer_id)?;

        let parsed = formats::parse_upload(filename, bytes)?;
        let config_id = match save_as {
            Some(name) => Some(self.store.insert_config(&NewConfig {
                name: name.to_string(),
                source: SourceRef::File {
                    filename: filename.to_string(),
                },
                source_url_normalized: None,
                layer_id,
                mode,
                field_mapping: mapping.clone(),
                filter_expression: None,
            })?),
            None => None,
        };

        let stats = self.finish_import(&layer, config_id, &parsed, mode, mapping, style)?;
        Ok((stats, config_id))
    }

    /// Import from a remote feature service.
    ///
    /// A source whose normalized URL already has a saved config is
    /// rejected before any fetch, pointing at the existing config.
    pub async fn import_remote(
        &self,
        layer_id: LayerId,
        url: &str,
        filter: Option<&str>,
        mode: ImportMode,
        mapping: &FieldMapping,
        style: Option<&LayerStyle>,
        save_as: Option<&str>,
    ) -> Result<(ImportStats, Option<ConfigId>)> {
        let normalized = normalize_source_url(url);
        if let Some(existing) = self.store.find_config_by_url(&normalized)? {
            return Err(GisError::DuplicateSource {
                existing: existing.id,
            });
        }

        let layer = self.require_layer(layer_id)?;
        let _guard = self.locks.acquire(layer_id)?;

        let parsed = self.client.fetch(url, filter).await?;
        let config_id = match save_as {
            Some(name) => Some(self.store.insert_config(&NewConfig {
                name: name.to_string(),
                source: SourceRef::Remote {
                    url: url.to_string(),
                },
                source_url_normalized: Some(normalized),
                layer_id,
                mode,
                field_mapping: mapping.clone(),
                filter_expression: filter.map(str::to_string),
            })?),
            None => None,
        };

        let stats = self.finish_import(&layer, config_id, &parsed, mode, mapping, style)?;
        Ok((stats, config_id))
    }

    /// Re-run a saved remote import with its stored source, filter,
    /// mode, and mapping. A failed refresh records `failed` and leaves
    /// the config and its prior features intact for retry.
    pub async fn refresh(&self, config_id: ConfigId) -> Result<ImportStats> {
        let config = self.require_config(config_id)?;
        let url = match &config.source {
            SourceRef::Remote { url } => url.clone(),
            SourceRef::File { .. } => {
                return Err(GisError::parse(
                    "file-backed configs refresh from a new upload, not a fetch",
                ))
            }
        };

        let layer = self.require_layer(config.layer_id)?;
        let _guard = self.locks.acquire(config.layer_id)?;

        let outcome = match self
            .client
            .fetch(&url, config.filter_expression.as_deref())
            .await
        {
            Ok(parsed) => self.run(
                &layer,
                Some(config_id),
                &parsed,
                config.mode,
                &config.field_mapping,
                None,
            ),
            Err(e) => Err(e),
        };
        self.finish_refresh(config_id, outcome)
    }

    /// Re-run a saved file import against freshly uploaded bytes.
    pub fn refresh_with_file(&self, config_id: ConfigId, bytes: &[u8]) -> Result<ImportStats> {
        let config = self.require_config(config_id)?;
        let filename = match &config.source {
            SourceRef::File { filename } => filename.clone(),
            SourceRef::Remote { .. } => {
                return Err(GisError::parse(
                    "remote configs refresh from their service, not an upload",
                ))
            }
        };

        let layer = self.require_layer(config.layer_id)?;
        let _guard = self.locks.acquire(config.layer_id)?;

        let outcome = formats::parse_upload(&filename, bytes).and_then(|parsed| {
            self.run(
                &layer,
                Some(config_id),
                &parsed,
                config.mode,
                &config.field_mapping,
                None,
            )
        });
        self.finish_refresh(config_id, outcome)
    }

    fn run(
        &self,
        layer: &GisLayer,
        config_id: Option<ConfigId>,
        parsed: &ParsedSource,
        mode: ImportMode,
        mapping: &FieldMapping,
        style: Option<&LayerStyle>,
    ) -> Result<ImportStats> {
        let layer = apply_import_metadata(&self.store, layer, parsed, style)?;
        reconcile(&self.store, &layer, config_id, parsed, mode, mapping)
    }

    /// Run a first import and settle its config bookkeeping: a config
    /// only survives a successful import.
    fn finish_import(
        &self,
        layer: &GisLayer,
        config_id: Option<ConfigId>,
        parsed: &ParsedSource,
        mode: ImportMode,
        mapping: &FieldMapping,
        style: Option<&LayerStyle>,
    ) -> Result<ImportStats> {
        match self.run(layer, config_id, parsed, mode, mapping, style) {
            Ok(stats) => {
                if let Some(config_id) = config_id {
                    self.store.update_refresh_result(
                        config_id,
                        RefreshStatus::Ok,
                        Some(stats.imported + stats.updated),
                    )?;
                }
                Ok(stats)
            }
            Err(e) => {
                if let Some(config_id) = config_id {
                    let _ = self.store.delete_config(config_id);
                }
                Err(e)
            }
        }
    }

    fn finish_refresh(
        &self,
        config_id: ConfigId,
        outcome: Result<ImportStats>,
    ) -> Result<ImportStats> {
        match outcome {
            Ok(stats) => {
                self.store.update_refresh_result(
                    config_id,
                    RefreshStatus::Ok,
                    Some(stats.imported + stats.updated),
                )?;
                info!(config = %config_id, "refresh complete");
                Ok(stats)
            }
            Err(e) => {
                warn!(config = %config_id, error = %e, "refresh failed; prior features left intact");
                self.store
                    .update_refresh_result(config_id, RefreshStatus::Failed, None)?;
                Err(e)
            }
        }
    }

    fn require_layer(&self, layer_id: LayerId) -> Result<GisLayer> {
        self.store
            .get_layer(layer_id)?
            .ok_or(GisError::LayerNotFound(layer_id))
    }

    fn require_config(&self, config_id: ConfigId) -> Result<GisImportConfig> {
        self.store
            .get_config(config_id)?
            .ok_or(GisError::ConfigNotFound(config_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GeometryKind;

    #[test]
    fn test_normalize_source_url() {
        assert_eq!(
            normalize_source_url("https://GIS.Example.com/FeatureServer/0/"),
            "https://gis.example.com/featureserver/0"
        );
        assert_eq!(
            normalize_source_url("https://gis.example.com/FeatureServer/0?token=abc&f=json"),
            "https://gis.example.com/featureserver/0"
        );
        assert_eq!(
            normalize_source_url("https://gis.example.com/a///"),
            "https://gis.example.com/a"
        );
        assert_eq!(
            normalize_source_url("  https://gis.example.com/a#frag "),
            "https://gis.example.com/a"
        );
        // Variants collapse to the same key
        assert_eq!(
            normalize_source_url("https://Gis.example.com/A/?x=1"),
            normalize_source_url("https://gis.example.com/a")
        );
    }

    #[test]
    fn test_layer_lock_fail_fast() {
        let locks = LayerLocks::new();
        let a = LayerId::new(1);
        let guard = locks.acquire(a).unwrap();
        assert!(matches!(locks.acquire(a), Err(GisError::Busy { .. })));
        // Another layer is unaffected
        assert!(locks.acquire(LayerId::new(2)).is_ok());
        drop(guard);
        assert!(locks.acquire(a).is_ok());
    }

    fn service() -> ImportService {
        ImportService::new(Arc::new(GisStore::open_in_memory().unwrap())).unwrap()
    }

    fn csv_bytes(n: usize) -> Vec<u8> {
        let mut data = String::from("id,lat,lng,name\n");
        for i in 0..n {
            data.push_str(&format!("H-{i},40.0,-75.0,Hydrant {i}\n"));
        }
        data.into_bytes()
    }

    #[test]
    fn test_import_file_saves_config_and_attributes_features() {
        let service = service();
        let layer = service
            .store()
            .create_layer("Hydrants", GeometryKind::Point)
            .unwrap();

        let (stats, config_id) = service
            .import_file(
                layer.id,
                "hydrants.csv",
                &csv_bytes(4),
                ImportMode::Merge,
                &FieldMapping {
                    title: Some("name".into()),
                    ..FieldMapping::default()
                },
                None,
                Some("Hydrant upload"),
            )
            .unwrap();
        assert_eq!(stats.imported, 4);
        let config_id = config_id.unwrap();

        let config = service.store().get_config(config_id).unwrap().unwrap();
        assert_eq!(config.last_refresh_status, Some(RefreshStatus::Ok));
        assert_eq!(config.last_refresh_count, Some(4));

        let features = service.store().features_in_layer(layer.id).unwrap();
        assert!(features.iter().all(|f| f.config_id == Some(config_id)));
    }

    #[test]
    fn test_refresh_with_file_uses_stored_mode() {
        let service = service();
        let layer = service
            .store()
            .create_layer("Hydrants", GeometryKind::Point)
            .unwrap();

        let (_, config_id) = service
            .import_file(
                layer.id,
                "hydrants.csv",
                &csv_bytes(5),
                ImportMode::Replace,
                &FieldMapping::default(),
                None,
                Some("Hydrant upload"),
            )
            .unwrap();
        let config_id = config_id.unwrap();

        // Replacement upload shrank; replace mode clears stale rows
        let stats = service.refresh_with_file(config_id, &csv_bytes(2)).unwrap();
        assert_eq!(stats.imported, 2);
        assert_eq!(service.store().count_features(layer.id).unwrap(), 2);
    }

    #[test]
    fn test_failed_refresh_records_status_and_keeps_features() {
        let service = service();
        let layer = service
            .store()
            .create_layer("Hydrants", GeometryKind::Point)
            .unwrap();
        let (_, config_id) = service
            .import_file(
                layer.id,
                "hydrants.csv",
                &csv_bytes(3),
                ImportMode::Merge,
                &FieldMapping::default(),
                None,
                Some("Hydrant upload"),
            )
            .unwrap();
        let config_id = config_id.unwrap();

        // Garbage upload fails the parse; prior rows survive
        let err = service.refresh_with_file(config_id, b"name\nonly").unwrap_err();
        assert!(matches!(err, GisError::Parse { .. }));
        assert_eq!(service.store().count_features(layer.id).unwrap(), 3);
        let config = service.store().get_config(config_id).unwrap().unwrap();
        assert_eq!(config.last_refresh_status, Some(RefreshStatus::Failed));
    }

    #[tokio::test]
    async fn test_duplicate_remote_source_rejected_before_fetch() {
        let service = service();
        let layer = service
            .store()
            .create_layer("Hydrants", GeometryKind::Point)
            .unwrap();
        service
            .store()
            .insert_config(&NewConfig {
                name: "existing".into(),
                source: SourceRef::Remote {
                    url: "https://gis.example.com/FeatureServer/0".into(),
                },
                source_url_normalized: Some(normalize_source_url(
                    "https://gis.example.com/FeatureServer/0",
                )),
                layer_id: layer.id,
                mode: ImportMode::Merge,
                field_mapping: FieldMapping::default(),
                filter_expression: None,
            })
            .unwrap();

        // Same source, different casing and trailing slash: rejected
        // with a pointer to the existing config, no network touched
        let err = service
            .import_remote(
                layer.id,
                "https://GIS.example.com/featureserver/0/",
                None,
                ImportMode::Merge,
                &FieldMapping::default(),
                None,
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GisError::DuplicateSource { .. }));
    }

    #[test]
    fn test_concurrent_import_on_same_layer_busy() {
        let service = service();
        let layer = service
            .store()
            .create_layer("Hydrants", GeometryKind::Point)
            .unwrap();

        let _guard = service.locks.acquire(layer.id).unwrap();
        let err = service
            .import_file(
                layer.id,
                "hydrants.csv",
                &csv_bytes(1),
                ImportMode::Merge,
                &FieldMapping::default(),
                None,
                None,
            )
            .unwrap_err();
        assert!(matches!(err, GisError::Busy { .. }));
    }
}
