use std::path::PathBuf;

use serde_json::Value;

use super::error::{StorageError, StorageResult};
use super::key_value::KeyValueStore;

/// File-per-key JSON store under the user config directory
/// (`~/.config/glimpse/<key>.json` on Linux)
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new() -> StorageResult<Self> {
        let dir = dirs::config_dir()
            .ok_or_else(|| StorageError::Initialization {
                message: "Could not determine config directory".to_string(),
            })?
            .join("glimpse");
        Ok(Self { dir })
    }

    /// Store rooted at an explicit directory
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        let path = self.key_path(key);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn set(&self, key: &str, value: Value) -> StorageResult<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.key_path(key);
        let json = serde_json::to_string_pretty(&value)?;

        // Write to a temp file, then rename into place
        let temp_path = path.with_extension("json.tmp");
        std::fs::write(&temp_path, json)?;
        std::fs::rename(&temp_path, &path)?;

        Ok(())
    }
}
