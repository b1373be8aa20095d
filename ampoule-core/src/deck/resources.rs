//! Persisted key-value resource map (`resources_cfg.json`)
//!
//! The file is an open JSON object. Keys this crate does not know about are
//! kept untouched. Every mutation is written back immediately through a
//! temporary file in the same directory, then renamed over the original.

use std::io::Write as _;
use std::path::{Path, PathBuf};

use log::debug;
use parking_lot::Mutex;
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Default resource file name inside a bed directory
pub const RESOURCE_FILE: &str = "resources_cfg.json";

/// Key/value resources shared by every operation on one bed
#[derive(Debug)]
pub struct ResourceStore {
    path: Option<PathBuf>,
    values: Mutex<Map<String, Value>>,
}

impl ResourceStore {
    /// Open `path`, creating it with `{}` when absent
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let values = if path.exists() {
            read_map(&path)?
        } else {
            debug!("Creating resource file {}", path.display());
            let empty = Map::new();
            write_map(&path, &empty)?;
            empty
        };
        Ok(Self {
            path: Some(path),
            values: Mutex::new(values),
        })
    }

    /// Store that never touches the filesystem
    pub fn in_memory() -> Self {
        Self {
            path: None,
            values: Mutex::new(Map::new()),
        }
    }

    /// Backing file, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.lock().get(key).cloned()
    }

    /// Numeric value of `key`, `None` when absent or not a number
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.values.lock().get(key).and_then(Value::as_f64)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.lock().contains_key(key)
    }

    /// Snapshot of every entry
    pub fn entries(&self) -> Map<String, Value> {
        self.values.lock().clone()
    }

    /// Set `key` and flush
    pub fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut values = self.values.lock();
        self.reload_into(&mut values)?;
        values.insert(key.to_owned(), value);
        self.write(&values)
    }

    /// Read-modify-write a numeric value against the on-disk copy
    ///
    /// Returns the new value, or `None` (and writes nothing) when the key is
    /// missing or not a number.
    pub fn update_f64(&self, key: &str, f: impl FnOnce(f64) -> f64) -> Result<Option<f64>> {
        let mut values = self.values.lock();
        self.reload_into(&mut values)?;
        let Some(current) = values.get(key).and_then(Value::as_f64) else {
            return Ok(None);
        };
        let updated = f(current);
        let number = serde_json::Number::from_f64(updated).ok_or_else(|| {
            Error::descriptor(key, format!("{updated} cannot be stored as a number"))
        })?;
        values.insert(key.to_owned(), Value::Number(number));
        self.write(&values)?;
        Ok(Some(updated))
    }

    /// Write the current map to disk
    pub fn flush(&self) -> Result<()> {
        let values = self.values.lock();
        self.write(&values)
    }

    fn reload_into(&self, values: &mut Map<String, Value>) -> Result<()> {
        if let Some(path) = &self.path {
            if path.exists() {
                *values = read_map(path)?;
            }
        }
        Ok(())
    }

    fn write(&self, values: &Map<String, Value>) -> Result<()> {
        match &self.path {
            Some(path) => write_map(path, values),
            None => Ok(()),
        }
    }
}

fn read_map(path: &Path) -> Result<Map<String, Value>> {
    let text = std::fs::read_to_string(path)?;
    if text.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str(&text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(Error::descriptor(
            path.display().to_string(),
            "resource file must hold a JSON object",
        )),
        Err(e) => Err(Error::descriptor(path.display().to_string(), e)),
    }
}

fn write_map(path: &Path, values: &Map<String, Value>) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let text = serde_json::to_string_pretty(values)
        .map_err(|e| Error::descriptor(path.display().to_string(), e))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(text.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_open_creates_empty_object() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(RESOURCE_FILE);
        let store = ResourceStore::open(&path).unwrap();
        assert!(store.entries().is_empty());
        assert_eq!(std::fs::read_to_string(&path).unwrap().trim(), "{}");
    }

    #[test]
    fn test_update_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(RESOURCE_FILE);
        std::fs::write(&path, r#"{"system_fluid_volume_mL": 500, "operator": "lab 3"}"#).unwrap();

        let store = ResourceStore::open(&path).unwrap();
        let left = store.update_f64("system_fluid_volume_mL", |v| v - 0.05).unwrap();
        assert_eq!(left, Some(499.95));

        let reopened = ResourceStore::open(&path).unwrap();
        assert_eq!(reopened.get_f64("system_fluid_volume_mL"), Some(499.95));
        assert_eq!(reopened.get("operator"), Some(json!("lab 3")));
    }

    #[test]
    fn test_update_reads_other_writers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(RESOURCE_FILE);
        std::fs::write(&path, r#"{"count": 1}"#).unwrap();

        let store = ResourceStore::open(&path).unwrap();
        std::fs::write(&path, r#"{"count": 10}"#).unwrap();
        assert_eq!(store.update_f64("count", |v| v + 1.0).unwrap(), Some(11.0));
    }

    #[test]
    fn test_update_missing_key_writes_nothing() {
        let store = ResourceStore::in_memory();
        assert_eq!(store.update_f64("absent", |v| v - 1.0).unwrap(), None);
        assert!(!store.contains("absent"));
    }

    #[test]
    fn test_rejects_non_object() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(RESOURCE_FILE);
        std::fs::write(&path, "[1, 2]").unwrap();
        assert!(matches!(
            ResourceStore::open(&path),
            Err(Error::Descriptor { .. })
        ));
    }

    #[test]
    fn test_in_memory_set() {
        let store = ResourceStore::in_memory();
        store.set("shifting_cursor.reservoirs", json!(2)).unwrap();
        assert_eq!(store.get_f64("shifting_cursor.reservoirs"), Some(2.0));
        assert!(store.path().is_none());
    }
}
