use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{bail, Context};
use serde_json::{Map, Value};

/// String-keyed persistence substrate behind the history store.
///
/// Every call goes to the backing medium; implementations must not serve reads
/// from a cached snapshot.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> anyhow::Result<()>;
    fn remove(&self, key: &str) -> anyhow::Result<()>;
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for Box<T> {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> anyhow::Result<()> {
        (**self).remove(key)
    }
}

/// One JSON object on disk, each key holding a string value.
#[derive(Debug, Clone)]
pub struct FileKeyValueStore {
    path: PathBuf,
}

impl FileKeyValueStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KeyValueStore for FileKeyValueStore {
    /// A missing file reads as empty; an unreadable or corrupt one is an error.
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let Some(raw) = read_store_file(&self.path)? else {
            return Ok(None);
        };
        let payload = parse_json_object(&self.path, &raw)?;
        Ok(payload.get(key).and_then(Value::as_str).map(str::to_string))
    }

    fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let mut payload = self.load_for_write()?;
        payload.insert(key.to_string(), Value::String(value.to_string()));
        write_json_object(&self.path, &payload)
    }

    fn remove(&self, key: &str) -> anyhow::Result<()> {
        if read_store_file(&self.path)?.is_none() {
            return Ok(());
        }
        let mut payload = self.load_for_write()?;
        payload.remove(key);
        write_json_object(&self.path, &payload)
    }
}

impl FileKeyValueStore {
    /// I/O failures propagate. Corrupt content is logged and replaced on the next write.
    fn load_for_write(&self) -> anyhow::Result<Map<String, Value>> {
        let Some(raw) = read_store_file(&self.path)? else {
            return Ok(Map::new());
        };
        match parse_json_object(&self.path, &raw) {
            Ok(payload) => Ok(payload),
            Err(err) => {
                tracing::warn!(path = %self.path.display(), "overwriting corrupt store: {err:#}");
                Ok(Map::new())
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> anyhow::Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))?;
        entries.remove(key);
        Ok(())
    }
}

fn read_store_file(path: &Path) -> anyhow::Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(raw) => Ok(Some(raw)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("failed to read {}", path.display())),
    }
}

fn parse_json_object(path: &Path, raw: &str) -> anyhow::Result<Map<String, Value>> {
    let parsed: Value = serde_json::from_str(raw)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;
    match parsed {
        Value::Object(payload) => Ok(payload),
        _ => bail!("{} does not hold a JSON object", path.display()),
    }
}

fn write_json_object(path: &Path, payload: &Map<String, Value>) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(
        path,
        serde_json::to_string_pretty(&Value::Object(payload.clone()))?,
    )
    .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
