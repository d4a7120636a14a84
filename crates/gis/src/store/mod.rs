//! SQLite persistence for routes, layers, features, and import configs.
//!
//! One connection behind a mutex: SQLite is single-writer anyway, and
//! the mutex also serializes route saves so a stale anchor-index shift
//! can never race a concurrent edit. Import batches run inside a single
//! transaction per parsed page or file, so an interrupted run never
//! leaves partial writes.

mod configs;
mod features;
mod layers;
mod routes;

pub use configs::NewConfig;
pub(crate) use features::{
    delete_imported_tx, insert_feature_tx, upsert_feature_tx, NewFeature, UpsertOutcome,
};

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;

use crate::error::Result;

pub struct GisStore {
    conn: Mutex<Connection>,
}

impl GisStore {
    /// Open (or create) a database file and ensure the schema exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run `f` with exclusive access to the connection.
    ///
    /// All store methods funnel through here; multi-statement callers
    /// (the reconciler) open their own transaction inside.
    pub(crate) fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut conn)
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS routes (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            aliases_json TEXT NOT NULL DEFAULT '[]',
            points_json TEXT NOT NULL,
            bidirectional INTEGER NOT NULL DEFAULT 1,
            direction TEXT,
            limited_access INTEGER NOT NULL DEFAULT 0,
            anchor_index INTEGER,
            anchor_value REAL,
            miles_decrease_toward TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT
        );

        CREATE TABLE IF NOT EXISTS layers (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            geometry_kind TEXT NOT NULL
                CHECK(geometry_kind IN ('point','point_radius','polygon')),
            property_schema_json TEXT NOT NULL DEFAULT '{}',
            style_json TEXT
        );

        CREATE TABLE IF NOT EXISTS features (
            id INTEGER PRIMARY KEY,
            layer_id INTEGER NOT NULL REFERENCES layers(id),
            config_id INTEGER,
            external_id TEXT,
            title TEXT,
            notes TEXT,
            address TEXT,
            radius_m REAL,
            properties_json TEXT NOT NULL DEFAULT '{}',
            geometry_json TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT,
            last_seen_at TEXT
        );

        -- Reconciliation identity: one row per source record per layer.
        -- Partial so manually placed features (no external id) are free
        -- to multiply.
        CREATE UNIQUE INDEX IF NOT EXISTS idx_features_layer_external
            ON features(layer_id, external_id)
            WHERE external_id IS NOT NULL;

        CREATE INDEX IF NOT EXISTS idx_features_layer ON features(layer_id);

        CREATE TABLE IF NOT EXISTS import_configs (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            source_type TEXT NOT NULL CHECK(source_type IN ('remote','file')),
            source_url TEXT,
            source_url_normalized TEXT UNIQUE,
            source_filename TEXT,
            layer_id INTEGER NOT NULL REFERENCES layers(id),
            mode TEXT NOT NULL DEFAULT 'merge',
            field_mapping_json TEXT NOT NULL DEFAULT '{}',
            filter_expression TEXT,
            last_refresh_at TEXT,
            last_refresh_status TEXT,
            last_refresh_count INTEGER
        );
        "#,
    )?;
    Ok(())
}

/// SQLite `datetime('now')` ↔ chrono.
pub(crate) fn parse_db_time(s: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}
