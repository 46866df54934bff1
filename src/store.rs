// 💾 Model persistence - trained model state behind a narrow interface
//
// The blob is JSON either way; stores only differ in where it lives.
// Loading always re-checks compatibility with the current taxonomy.

use crate::error::ModelStoreError;
use crate::model::TrainedModel;
use crate::taxonomy::Taxonomy;
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};

pub trait ModelStore {
    /// Persist a model, replacing whatever was stored before
    fn save(&self, model: &TrainedModel) -> Result<(), ModelStoreError>;

    /// Raw stored model, `None` when nothing was saved yet
    fn load_raw(&self) -> Result<Option<TrainedModel>, ModelStoreError>;

    /// Stored model, rejected when it no longer fits the taxonomy or the
    /// current feature pipeline
    fn load(&self, taxonomy: &Taxonomy) -> Result<Option<TrainedModel>, ModelStoreError> {
        match self.load_raw()? {
            Some(model) => match model.incompatibility(taxonomy) {
                Some(reason) => Err(ModelStoreError::Incompatible { reason }),
                None => Ok(Some(model)),
            },
            None => Ok(None),
        }
    }
}

// ============================================================================
// JSON FILE
// ============================================================================

/// One JSON document on disk
pub struct JsonFileModelStore {
    path: PathBuf,
}

impl JsonFileModelStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonFileModelStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ModelStore for JsonFileModelStore {
    fn save(&self, model: &TrainedModel) -> Result<(), ModelStoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        // Write-then-rename: readers never see a truncated model
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(model)?)?;
        fs::rename(&tmp, &self.path)?;

        log::info!("saved model {} to {}", model.model_id, self.path.display());
        Ok(())
    }

    fn load_raw(&self) -> Result<Option<TrainedModel>, ModelStoreError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&self.path)?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }
}

// ============================================================================
// SQLITE
// ============================================================================

/// Models kept in a `trained_models` table; the newest row is current
pub struct SqliteModelStore<'c> {
    conn: &'c Connection,
}

impl<'c> SqliteModelStore<'c> {
    pub fn new(conn: &'c Connection) -> Result<Self, ModelStoreError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS trained_models (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                model_id TEXT UNIQUE NOT NULL,
                trained_at TEXT NOT NULL,
                feature_pipeline_version INTEGER NOT NULL,
                label_count INTEGER NOT NULL,
                blob TEXT NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;
        Ok(SqliteModelStore { conn })
    }

    /// Model ids, newest first
    pub fn history(&self) -> Result<Vec<String>, ModelStoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT model_id FROM trained_models ORDER BY id DESC")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }
}

impl ModelStore for SqliteModelStore<'_> {
    fn save(&self, model: &TrainedModel) -> Result<(), ModelStoreError> {
        let blob = serde_json::to_string(model)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO trained_models
                (model_id, trained_at, feature_pipeline_version, label_count, blob)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                model.model_id.to_string(),
                model.trained_at.to_rfc3339(),
                model.feature_pipeline_version,
                model.labels.len() as i64,
                blob,
            ],
        )?;
        Ok(())
    }

    fn load_raw(&self) -> Result<Option<TrainedModel>, ModelStoreError> {
        let blob: Option<String> = self
            .conn
            .query_row(
                "SELECT blob FROM trained_models ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;

        match blob {
            Some(blob) => Ok(Some(serde_json::from_str(&blob)?)),
            None => Ok(None),
        }
    }
}
