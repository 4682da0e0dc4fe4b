use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use hypesignal_common::{Record, StoreEntry};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::error::{Result, ScoutError};

/// Hands out discovery ids. Shared by every worker of a run.
#[derive(Debug)]
pub struct IdAllocator {
    next: AtomicU64,
}

impl IdAllocator {
    /// Ids start at 1; 0 means "not yet assigned".
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first.max(1)),
        }
    }

    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Ensure future ids are greater than `id`.
    pub fn advance_past(&self, id: u64) {
        self.next.fetch_max(id.saturating_add(1), Ordering::Relaxed);
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted(u64),
    Merged(u64),
}

impl UpsertOutcome {
    pub fn id(&self) -> u64 {
        match self {
            UpsertOutcome::Inserted(id) | UpsertOutcome::Merged(id) => *id,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, UpsertOutcome::Inserted(_))
    }
}

#[derive(Default)]
struct StoreState {
    entries: Vec<StoreEntry>,
    by_link: HashMap<(String, String), usize>,
    by_id: HashMap<u64, usize>,
}

impl StoreState {
    fn index(&mut self, pos: usize) {
        let entry = &self.entries[pos];
        if let Some(link) = entry.permalink() {
            self.by_link
                .insert((entry.source.clone(), link.to_string()), pos);
        }
        self.by_id.insert(entry.id, pos);
    }

    fn find(&self, record: &Record) -> Option<usize> {
        if let Some(link) = record.permalink() {
            if let Some(&pos) = self.by_link.get(&(record.source.clone(), link.to_string())) {
                return Some(pos);
            }
        }
        if record.id != 0 {
            return self.by_id.get(&record.id).copied();
        }
        None
    }
}

/// Merged view of every record collected so far, keyed by
/// `(source, permalink)`. One mutex guards the map and the backing file.
pub struct Store {
    path: Option<PathBuf>,
    ids: Arc<IdAllocator>,
    state: Mutex<StoreState>,
}

impl Store {
    /// In-memory store with no backing file.
    pub fn in_memory(ids: Arc<IdAllocator>) -> Self {
        Self {
            path: None,
            ids,
            state: Mutex::new(StoreState::default()),
        }
    }

    /// Open a store backed by `path`, loading any existing document.
    ///
    /// A missing or empty file is an empty store. An unreadable or corrupt
    /// file is logged and treated as empty; it is replaced on the next
    /// successful persist.
    pub fn open(path: impl Into<PathBuf>, ids: Arc<IdAllocator>) -> Self {
        let path = path.into();
        let entries = load_document(&path);

        let mut state = StoreState::default();
        for entry in entries {
            ids.advance_past(entry.id);
            state.entries.push(entry);
            let pos = state.entries.len() - 1;
            state.index(pos);
        }
        if !state.entries.is_empty() {
            info!(path = %path.display(), entries = state.entries.len(), "Loaded existing store");
        }

        Self {
            path: Some(path),
            ids,
            state: Mutex::new(state),
        }
    }

    /// Insert a record, or merge it into the entry with the same
    /// `(source, permalink)`. Records without a permalink only merge into
    /// the entry carrying their own discovery id.
    pub fn upsert(&self, mut record: Record) -> UpsertOutcome {
        let mut state = self.lock();
        if let Some(pos) = state.find(&record) {
            let entry = &mut state.entries[pos];
            entry.merge_from(record);
            let id = entry.id;
            // a merge can add a permalink the entry lacked
            state.index(pos);
            return UpsertOutcome::Merged(id);
        }

        if record.id == 0 {
            record.id = self.ids.next_id();
        } else {
            self.ids.advance_past(record.id);
        }
        let id = record.id;
        state.entries.push(record);
        let pos = state.entries.len() - 1;
        state.index(pos);
        UpsertOutcome::Inserted(id)
    }

    pub fn get(&self, id: u64) -> Option<StoreEntry> {
        let state = self.lock();
        state.by_id.get(&id).map(|&pos| state.entries[pos].clone())
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries without a classification label.
    pub fn missing_labels(&self) -> usize {
        self.lock()
            .entries
            .iter()
            .filter(|e| e.token_name.is_none())
            .count()
    }

    /// Copy of every entry sorted by source, then discovery order.
    pub fn snapshot(&self) -> Vec<StoreEntry> {
        sorted_snapshot(&self.lock())
    }

    /// Write the full snapshot to the backing file via a temp file and
    /// rename, under the same lock as upserts. Returns the entry count.
    pub fn persist(&self) -> Result<usize> {
        let Some(path) = self.path.as_deref() else {
            return Ok(self.len());
        };

        let state = self.lock();
        let snapshot = sorted_snapshot(&state);
        let json = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| ScoutError::StoreIo(e.to_string()))?;
        write_atomically(path, json.as_bytes())?;
        debug!(path = %path.display(), entries = snapshot.len(), "Store persisted");
        Ok(snapshot.len())
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn sorted_snapshot(state: &StoreState) -> Vec<StoreEntry> {
    let mut entries = state.entries.clone();
    entries.sort_by(|a, b| a.source.cmp(&b.source).then(a.id.cmp(&b.id)));
    entries
}

fn load_document(path: &Path) -> Vec<StoreEntry> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Store file unreadable, starting empty");
            return Vec::new();
        }
    };
    if raw.trim().is_empty() {
        return Vec::new();
    }
    match serde_json::from_str::<Vec<StoreEntry>>(&raw) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Store file corrupt, starting empty");
            Vec::new()
        }
    }
}

fn write_atomically(path: &Path, content: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)?;

    let mut tmp = NamedTempFile::new_in(&dir)?;
    tmp.write_all(content)?;
    tmp.flush()?;
    tmp.as_file_mut().sync_all()?;
    tmp.persist(path).map_err(|e| ScoutError::StoreIo(e.error.to_string()))?;
    Ok(())
}
