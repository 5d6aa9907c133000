use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::storage::KeyValueStore;

pub const HISTORY_KEY: &str = "cinesnap.history";
pub const MAX_HISTORY_ITEMS: usize = 30;

/// One successful generation. Fields are fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryItem {
    id: String,
    prompt: String,
    image_url: String,
    timestamp: i64,
}

impl HistoryItem {
    pub fn new(prompt: impl Into<String>, image_url: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            prompt: prompt.into(),
            image_url: image_url.into(),
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The composed prompt that was sent, including style and negative clauses.
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// Self-contained `data:` URI.
    pub fn image_url(&self) -> &str {
        &self.image_url
    }

    /// Unix milliseconds.
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }
}

/// Bounded, newest-first list of [`HistoryItem`] persisted under one key.
///
/// Each operation re-reads the substrate. `append` is a full read-modify-write;
/// callers that can run concurrently must serialize access themselves.
#[derive(Debug)]
pub struct HistoryStore<S> {
    store: S,
    key: String,
    capacity: usize,
}

impl<S: KeyValueStore> HistoryStore<S> {
    pub fn new(store: S) -> Self {
        Self::with_capacity(store, MAX_HISTORY_ITEMS)
    }

    pub fn with_capacity(store: S, capacity: usize) -> Self {
        Self {
            store,
            key: HISTORY_KEY.to_string(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Missing, unreadable or corrupt data all load as an empty history.
    pub fn load(&self) -> Vec<HistoryItem> {
        let raw = match self.store.get(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(err) => {
                tracing::warn!(key = %self.key, "history read failed: {err:#}");
                return Vec::new();
            }
        };
        match serde_json::from_str::<Vec<HistoryItem>>(&raw) {
            Ok(items) => items,
            Err(err) => {
                tracing::warn!(key = %self.key, "discarding unparseable history: {err}");
                Vec::new()
            }
        }
    }

    /// Inserts at the head, drops tail entries past capacity, writes the result back.
    pub fn append(&self, item: HistoryItem) -> anyhow::Result<Vec<HistoryItem>> {
        let mut items = self.load();
        items.insert(0, item);
        items.truncate(self.capacity);
        let encoded = serde_json::to_string(&items)?;
        self.store.set(&self.key, &encoded)?;
        Ok(items)
    }

    pub fn clear(&self) -> anyhow::Result<()> {
        self.store.remove(&self.key)
    }

    pub fn get(&self, id: &str) -> Option<HistoryItem> {
        self.load().into_iter().find(|item| item.id == id)
    }

    /// Resolves `#n` (1-based position, newest first), an exact id, or a unique id prefix.
    pub fn find(&self, selector: &str) -> Option<HistoryItem> {
        let selector = selector.trim();
        if selector.is_empty() {
            return None;
        }
        let items = self.load();
        if let Some(position) = selector.strip_prefix('#') {
            let index = position.parse::<usize>().ok()?.checked_sub(1)?;
            return items.into_iter().nth(index);
        }
        if let Some(exact) = items.iter().find(|item| item.id == selector) {
            return Some(exact.clone());
        }
        let mut matches = items
            .into_iter()
            .filter(|item| item.id.starts_with(selector));
        let first = matches.next()?;
        if matches.next().is_some() {
            return None;
        }
        Some(first)
    }

    pub fn len(&self) -> usize {
        self.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::io::{self, Write};
    use std::sync::{Arc, Mutex};

    use crate::storage::{FileKeyValueStore, KeyValueStore, MemoryKeyValueStore};

    use super::{HistoryItem, HistoryStore, HISTORY_KEY, MAX_HISTORY_ITEMS};

    fn item(n: usize) -> HistoryItem {
        HistoryItem::new(format!("prompt {n}"), format!("data:image/jpeg;base64,{n}"))
    }

    #[test]
    fn load_without_data_is_empty() {
        let history = HistoryStore::new(MemoryKeyValueStore::new());
        assert!(history.load().is_empty());
        assert!(history.is_empty());
    }

    #[test]
    fn length_is_bounded_and_newest_first() -> anyhow::Result<()> {
        for count in [0usize, 1, 29, 30, 31, 45] {
            let history = HistoryStore::new(MemoryKeyValueStore::new());
            for n in 0..count {
                history.append(item(n))?;
            }
            let items = history.load();
            assert_eq!(items.len(), count.min(MAX_HISTORY_ITEMS));
            for (position, stored) in items.iter().enumerate() {
                assert_eq!(stored.prompt(), format!("prompt {}", count - 1 - position));
            }
        }
        Ok(())
    }

    #[test]
    fn append_at_capacity_drops_only_the_oldest() -> anyhow::Result<()> {
        let history = HistoryStore::new(MemoryKeyValueStore::new());
        for n in 0..MAX_HISTORY_ITEMS {
            history.append(item(n))?;
        }
        let before = history.load();
        let newest = item(99);
        let after = history.append(newest.clone())?;

        assert_eq!(after.len(), MAX_HISTORY_ITEMS);
        assert_eq!(after[0], newest);
        assert_eq!(&after[1..], &before[..MAX_HISTORY_ITEMS - 1]);
        assert!(!after.iter().any(|stored| stored.prompt() == "prompt 0"));
        Ok(())
    }

    #[test]
    fn clear_empties_regardless_of_contents() -> anyhow::Result<()> {
        let history = HistoryStore::new(MemoryKeyValueStore::new());
        history.clear()?;
        assert!(history.load().is_empty());

        history.append(item(1))?;
        history.append(item(2))?;
        history.clear()?;
        assert!(history.load().is_empty());
        history.clear()?;
        assert!(history.load().is_empty());
        Ok(())
    }

    #[test]
    fn corrupt_blob_loads_as_empty() -> anyhow::Result<()> {
        for blob in ["{not json", "42", r#"{"id":"x"}"#, r#"[{"id":1}]"#] {
            let store = MemoryKeyValueStore::new();
            store.set(HISTORY_KEY, blob)?;
            let history = HistoryStore::new(store);
            assert!(history.load().is_empty(), "blob {blob:?} should load empty");
        }
        Ok(())
    }

    #[test]
    fn append_after_corrupt_blob_recovers() -> anyhow::Result<()> {
        let store = MemoryKeyValueStore::new();
        store.set(HISTORY_KEY, "garbage")?;
        let history = HistoryStore::new(store);
        history.append(item(1))?;
        assert_eq!(history.len(), 1);
        Ok(())
    }

    #[derive(Clone, Default)]
    struct CapturedLog(Arc<Mutex<Vec<u8>>>);

    impl Write for CapturedLog {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if let Ok(mut bytes) = self.0.lock() {
                bytes.extend_from_slice(buf);
            }
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl CapturedLog {
        fn text(&self) -> String {
            self.0
                .lock()
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                .unwrap_or_default()
        }
    }

    #[test]
    fn garbage_history_file_loads_empty_and_warns() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("history.json");
        std::fs::write(&path, "\u{0}\u{1}definitely not json")?;
        let history = HistoryStore::new(FileKeyValueStore::new(&path));

        let log = CapturedLog::default();
        let writer = log.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let items = tracing::subscriber::with_default(subscriber, || history.load());

        assert!(items.is_empty());
        let text = log.text();
        assert!(text.contains("WARN"), "missing warning: {text}");
        assert!(text.contains("history read failed"), "missing warning: {text}");

        history.append(item(1))?;
        assert_eq!(history.len(), 1);
        Ok(())
    }

    #[test]
    fn persisted_shape_uses_camel_case_fields() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("history.json");
        let history = HistoryStore::new(FileKeyValueStore::new(&path));
        let stored = item(7);
        history.append(stored.clone())?;

        let raw = FileKeyValueStore::new(&path)
            .get(HISTORY_KEY)?
            .unwrap_or_default();
        let parsed: serde_json::Value = serde_json::from_str(&raw)?;
        assert_eq!(parsed[0]["id"], serde_json::json!(stored.id()));
        assert_eq!(parsed[0]["imageUrl"], serde_json::json!(stored.image_url()));
        assert_eq!(parsed[0]["timestamp"], serde_json::json!(stored.timestamp()));

        let reopened = HistoryStore::new(FileKeyValueStore::new(&path));
        assert_eq!(reopened.get(stored.id()), Some(stored));
        Ok(())
    }

    #[test]
    fn find_by_position_id_and_prefix() -> anyhow::Result<()> {
        let history = HistoryStore::new(MemoryKeyValueStore::new());
        let older = item(1);
        let newer = item(2);
        history.append(older.clone())?;
        history.append(newer.clone())?;

        assert_eq!(history.find("#1"), Some(newer.clone()));
        assert_eq!(history.find("#2"), Some(older.clone()));
        assert_eq!(history.find("#3"), None);
        assert_eq!(history.find("#0"), None);
        assert_eq!(history.find(older.id()), Some(older.clone()));
        assert_eq!(history.find(&newer.id()[..8]), Some(newer));
        assert_eq!(history.find(""), None);
        Ok(())
    }

    #[test]
    fn custom_capacity_is_respected() -> anyhow::Result<()> {
        let history = HistoryStore::with_capacity(MemoryKeyValueStore::new(), 2);
        for n in 0..5 {
            history.append(item(n))?;
        }
        let prompts: Vec<String> = history
            .load()
            .iter()
            .map(|stored| stored.prompt().to_string())
            .collect();
        assert_eq!(prompts, vec!["prompt 4", "prompt 3"]);
        Ok(())
    }
}
