//! History and favorites persistence.
//!
//! Writes are best-effort: callers log failures and carry on.

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::models::ActionKind;

const HISTORY_FILE: &str = "history.jsonl";
const FAVORITES_FILE: &str = "favorites.jsonl";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: ActionKind,
    pub prompt: String,
    pub response: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub timestamp: DateTime<Local>,
}

impl HistoryRecord {
    pub fn new(kind: ActionKind, prompt: &str, response: &str, metadata: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            prompt: prompt.to_string(),
            response: response.to_string(),
            metadata,
            timestamp: Local::now(),
        }
    }

    /// A favorite copy that remembers which history entry it came from.
    pub fn to_favorite(&self) -> Self {
        let mut metadata = match &self.metadata {
            serde_json::Value::Object(map) => map.clone(),
            _ => serde_json::Map::new(),
        };
        metadata.insert("sourceId".to_string(), serde_json::Value::String(self.id.to_string()));
        Self {
            id: Uuid::new_v4(),
            metadata: serde_json::Value::Object(metadata),
            timestamp: Local::now(),
            ..self.clone()
        }
    }

    fn source_id(&self) -> Option<&str> {
        self.metadata.get("sourceId").and_then(|v| v.as_str())
    }
}

/// Two favorites are the same if they share a source entry, or if type,
/// prompt and response are identical.
pub fn is_duplicate_favorite(existing: &HistoryRecord, candidate: &HistoryRecord) -> bool {
    let same_source = matches!(
        (existing.source_id(), candidate.source_id()),
        (Some(a), Some(b)) if a == b
    );
    same_source
        || (existing.kind == candidate.kind
            && existing.prompt == candidate.prompt
            && existing.response == candidate.response)
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("history store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    pub kind: Option<ActionKind>,
    pub query: Option<String>,
    pub limit: Option<usize>,
}

impl HistoryFilter {
    fn matches(&self, record: &HistoryRecord) -> bool {
        if self.kind.is_some_and(|k| k != record.kind) {
            return false;
        }
        match &self.query {
            Some(q) => {
                let q = q.to_lowercase();
                record.prompt.to_lowercase().contains(&q) || record.response.to_lowercase().contains(&q)
            }
            None => true,
        }
    }

    /// Newest first, filtered and limited.
    fn apply(&self, mut records: Vec<HistoryRecord>) -> Vec<HistoryRecord> {
        records.retain(|r| self.matches(r));
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if let Some(limit) = self.limit {
            records.truncate(limit);
        }
        records
    }
}

pub trait HistoryStore: Send + Sync {
    fn append(&self, record: &HistoryRecord) -> Result<(), PersistenceError>;

    fn list(&self, filter: &HistoryFilter) -> Result<Vec<HistoryRecord>, PersistenceError>;

    /// Returns `false` when an equivalent favorite already exists.
    fn add_favorite(&self, record: &HistoryRecord) -> Result<bool, PersistenceError>;

    fn favorites(&self) -> Result<Vec<HistoryRecord>, PersistenceError>;
}

/// JSON-lines files in a data directory.
pub struct JsonlHistoryStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlHistoryStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, write_lock: Mutex::new(()) })
    }

    /// `~/.config/selectai` unless configured otherwise.
    pub fn default_dir() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".config").join("selectai"))
    }

    fn append_line(&self, file: &str, record: &HistoryRecord) -> Result<(), PersistenceError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let line = serde_json::to_string(record)?;
        let mut f = OpenOptions::new().create(true).append(true).open(self.dir.join(file))?;
        writeln!(f, "{line}")?;
        Ok(())
    }

    fn read_all(&self, file: &str) -> Result<Vec<HistoryRecord>, PersistenceError> {
        read_jsonl(&self.dir.join(file))
    }
}

fn read_jsonl(path: &Path) -> Result<Vec<HistoryRecord>, PersistenceError> {
    let f = match fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut records = Vec::new();
    for line in BufReader::new(f).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(record) => records.push(record),
            Err(e) => tracing::warn!(path = %path.display(), "skipping unreadable history line: {e}"),
        }
    }
    Ok(records)
}

impl HistoryStore for JsonlHistoryStore {
    fn append(&self, record: &HistoryRecord) -> Result<(), PersistenceError> {
        self.append_line(HISTORY_FILE, record)
    }

    fn list(&self, filter: &HistoryFilter) -> Result<Vec<HistoryRecord>, PersistenceError> {
        Ok(filter.apply(self.read_all(HISTORY_FILE)?))
    }

    fn add_favorite(&self, record: &HistoryRecord) -> Result<bool, PersistenceError> {
        let existing = self.read_all(FAVORITES_FILE)?;
        if existing.iter().any(|f| is_duplicate_favorite(f, record)) {
            return Ok(false);
        }
        self.append_line(FAVORITES_FILE, record)?;
        Ok(true)
    }

    fn favorites(&self) -> Result<Vec<HistoryRecord>, PersistenceError> {
        Ok(HistoryFilter::default().apply(self.read_all(FAVORITES_FILE)?))
    }
}

/// In-process store, used when no data directory is available.
#[derive(Default)]
pub struct MemoryHistoryStore {
    history: Mutex<Vec<HistoryRecord>>,
    favorites: Mutex<Vec<HistoryRecord>>,
    read_only: bool,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose writes always fail.
    #[cfg(test)]
    pub fn read_only() -> Self {
        Self { read_only: true, ..Self::default() }
    }

    fn check_writable(&self) -> Result<(), PersistenceError> {
        if self.read_only {
            return Err(PersistenceError::Unavailable("store is read-only".to_string()));
        }
        Ok(())
    }
}

impl HistoryStore for MemoryHistoryStore {
    fn append(&self, record: &HistoryRecord) -> Result<(), PersistenceError> {
        self.check_writable()?;
        self.history.lock().unwrap_or_else(|e| e.into_inner()).push(record.clone());
        Ok(())
    }

    fn list(&self, filter: &HistoryFilter) -> Result<Vec<HistoryRecord>, PersistenceError> {
        let records = self.history.lock().unwrap_or_else(|e| e.into_inner()).clone();
        Ok(filter.apply(records))
    }

    fn add_favorite(&self, record: &HistoryRecord) -> Result<bool, PersistenceError> {
        self.check_writable()?;
        let mut favorites = self.favorites.lock().unwrap_or_else(|e| e.into_inner());
        if favorites.iter().any(|f| is_duplicate_favorite(f, record)) {
            return Ok(false);
        }
        favorites.push(record.clone());
        Ok(true)
    }

    fn favorites(&self) -> Result<Vec<HistoryRecord>, PersistenceError> {
        let records = self.favorites.lock().unwrap_or_else(|e| e.into_inner()).clone();
        Ok(HistoryFilter::default().apply(records))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(kind: ActionKind, prompt: &str, response: &str) -> HistoryRecord {
        HistoryRecord::new(kind, prompt, response, serde_json::json!({}))
    }

    #[test]
    fn jsonl_store_appends_and_filters() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlHistoryStore::open(dir.path()).unwrap();
        store.append(&record(ActionKind::Rephrase, "a fox", "the fox")).unwrap();
        store.append(&record(ActionKind::Summarize, "long text", "short")).unwrap();

        let all = store.list(&HistoryFilter::default()).unwrap();
        assert_eq!(all.len(), 2);

        let rephrases = store
            .list(&HistoryFilter { kind: Some(ActionKind::Rephrase), ..Default::default() })
            .unwrap();
        assert_eq!(rephrases.len(), 1);
        assert_eq!(rephrases[0].response, "the fox");

        let found = store
            .list(&HistoryFilter { query: Some("SHORT".into()), ..Default::default() })
            .unwrap();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn serializes_kind_as_type() {
        let json = serde_json::to_value(record(ActionKind::Translate, "p", "r")).unwrap();
        assert_eq!(json["type"], "translate");
    }

    #[test]
    fn favorites_skip_same_source_and_identical_text() {
        let store = MemoryHistoryStore::new();
        let original = record(ActionKind::Summarize, "text", "summary");
        let fav = original.to_favorite();
        assert!(store.add_favorite(&fav).unwrap());
        assert!(!store.add_favorite(&original.to_favorite()).unwrap());

        // A different operation that produced identical text is treated as the same favorite.
        let twin = record(ActionKind::Summarize, "text", "summary").to_favorite();
        assert!(!store.add_favorite(&twin).unwrap());

        let other = record(ActionKind::Summarize, "text", "another summary").to_favorite();
        assert!(store.add_favorite(&other).unwrap());
        assert_eq!(store.favorites().unwrap().len(), 2);
    }

    #[test]
    fn read_only_store_rejects_writes() {
        let store = MemoryHistoryStore::read_only();
        assert!(matches!(
            store.append(&record(ActionKind::Discuss, "q", "a")),
            Err(PersistenceError::Unavailable(_))
        ));
    }
}
