//! Persistent semantic memory of commands that ran successfully.
//!
//! Entries live in memory behind a single mutex and are written through to a
//! JSON file after every append. The mutex is never held across embedding
//! requests; a second lock serialises file writes so concurrent recordings
//! cannot interleave their output.

use crate::error::{Error, Result};
use crate::ollama::Embedder;
use crate::types::HistoryEntry;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Marker that starts every agent directive (`/chat`, `/search`, ...).
pub const DIRECTIVE_PREFIX: char = '/';

/// How the persisted file looked when the store was opened.
#[derive(Debug)]
pub enum LoadStatus {
    /// No file yet; first run.
    Missing,
    Loaded(usize),
    /// The file was unreadable or corrupt and the store started empty.
    Recovered(Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Recorded,
    AlreadyPresent,
    /// Empty commands, directives and directory changes are never stored.
    Ignored,
}

pub struct SemanticStore {
    path: PathBuf,
    entries: Mutex<Vec<HistoryEntry>>,
    write_lock: Mutex<()>,
}

impl SemanticStore {
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self::with_entries(path.into(), Vec::new())
    }

    fn with_entries(path: PathBuf, entries: Vec<HistoryEntry>) -> Self {
        Self {
            path,
            entries: Mutex::new(entries),
            write_lock: Mutex::new(()),
        }
    }

    /// Opens the store at `path`. Never fails: a missing file is a first run
    /// and an unreadable or corrupt one is replaced by an empty history.
    pub fn load(path: impl Into<PathBuf>) -> (Self, LoadStatus) {
        let path = path.into();
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return (Self::empty(path), LoadStatus::Missing);
            }
            Err(e) => {
                tracing::warn!("cannot read history {:?}: {}", path, e);
                return (Self::empty(path), LoadStatus::Recovered(Error::Io(e)));
            }
        };

        match serde_json::from_slice::<Vec<HistoryEntry>>(&data) {
            Ok(entries) => {
                let count = entries.len();
                tracing::debug!("loaded {} history entries from {:?}", count, path);
                (Self::with_entries(path, entries), LoadStatus::Loaded(count))
            }
            Err(e) => {
                tracing::warn!("history {:?} is corrupt, starting fresh: {}", path, e);
                let err = Error::StorageCorrupt {
                    path: path.clone(),
                    reason: e.to_string(),
                };
                (Self::empty(path), LoadStatus::Recovered(err))
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_entries(&self) -> MutexGuard<'_, Vec<HistoryEntry>> {
        // A panicking writer cannot leave a half-appended entry behind, so a
        // poisoned lock still guards consistent data.
        self.entries.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_entries().is_empty()
    }

    pub fn contains(&self, command: &str) -> bool {
        self.lock_entries().iter().any(|e| e.command == command)
    }

    /// Copy of every entry, in insertion order.
    pub fn snapshot(&self) -> Vec<HistoryEntry> {
        self.lock_entries().clone()
    }

    /// Embeds `command` and appends it unless it is already stored.
    ///
    /// The embedding request runs without holding the lock. Presence is
    /// checked again before the append, so two concurrent calls for the same
    /// command store it exactly once.
    pub fn record_if_absent(
        &self,
        command: &str,
        client: &dyn Embedder,
        model: &str,
    ) -> Result<RecordOutcome> {
        if !is_recordable(command) {
            return Ok(RecordOutcome::Ignored);
        }
        if self.contains(command) {
            return Ok(RecordOutcome::AlreadyPresent);
        }

        let embedding = client.embed(command, model)?;

        {
            let mut entries = self.lock_entries();
            if entries.iter().any(|e| e.command == command) {
                return Ok(RecordOutcome::AlreadyPresent);
            }
            entries.push(HistoryEntry {
                command: command.to_string(),
                embedding,
            });
        }

        self.persist()?;
        Ok(RecordOutcome::Recorded)
    }

    /// Drops every entry and overwrites the file with an empty list.
    pub fn clear(&self) -> Result<()> {
        let _write = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        self.lock_entries().clear();
        write_atomic(&self.path, b"[]")
    }

    /// Writes the current entries to disk.
    pub fn persist(&self) -> Result<()> {
        let _write = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        // Serialise from a snapshot taken after acquiring the write lock so
        // the last writer always stores the newest state.
        let data = serde_json::to_vec(&self.snapshot())?;
        write_atomic(&self.path, &data)
    }
}

/// Whether a successfully executed command belongs in semantic memory.
pub fn is_recordable(command: &str) -> bool {
    let trimmed = command.trim();
    if trimmed.is_empty() || trimmed.starts_with(DIRECTIVE_PREFIX) {
        return false;
    }
    !(trimmed == "cd" || trimmed.starts_with("cd ") || trimmed.starts_with("cd\t"))
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, data)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;

    /// Embeds text as its byte count and first byte; counts calls.
    #[derive(Default)]
    struct FakeEmbedder {
        calls: AtomicUsize,
    }

    impl Embedder for FakeEmbedder {
        fn embed(&self, text: &str, _model: &str) -> Result<Vec<f64>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let first = text.bytes().next().unwrap_or(0) as f64;
            Ok(vec![text.len() as f64, first, 1.0])
        }
    }

    struct FailingEmbedder;

    impl Embedder for FailingEmbedder {
        fn embed(&self, _text: &str, _model: &str) -> Result<Vec<f64>> {
            Err(Error::Service("connection refused".to_string()))
        }
    }

    fn history_path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("history.json")
    }

    #[test]
    fn missing_file_is_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let (store, status) = SemanticStore::load(history_path(&dir));
        assert!(matches!(status, LoadStatus::Missing));
        assert!(store.is_empty());
    }

    #[test]
    fn corrupt_file_recovers_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = history_path(&dir);
        fs::write(&path, "{not json").unwrap();

        let (store, status) = SemanticStore::load(&path);
        assert!(matches!(
            status,
            LoadStatus::Recovered(Error::StorageCorrupt { .. })
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn null_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = history_path(&dir);
        fs::write(&path, "null").unwrap();
        let (store, status) = SemanticStore::load(&path);
        assert!(matches!(status, LoadStatus::Recovered(_)));
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn record_twice_stores_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = SemanticStore::empty(history_path(&dir));
        let client = FakeEmbedder::default();

        let first = store.record_if_absent("ls -la", &client, "m").unwrap();
        let second = store.record_if_absent("ls -la", &client, "m").unwrap();

        assert_eq!(first, RecordOutcome::Recorded);
        assert_eq!(second, RecordOutcome::AlreadyPresent);
        assert_eq!(store.len(), 1);
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn record_persists_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let path = history_path(&dir);
        let store = SemanticStore::empty(&path);
        store
            .record_if_absent("git status", &FakeEmbedder::default(), "m")
            .unwrap();

        let (reloaded, status) = SemanticStore::load(&path);
        assert!(matches!(status, LoadStatus::Loaded(1)));
        assert_eq!(reloaded.snapshot(), store.snapshot());
    }

    #[test]
    fn filtered_commands_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let store = SemanticStore::empty(history_path(&dir));
        let client = FakeEmbedder::default();

        for cmd in ["", "   ", "/chat hello", "cd /tmp", "cd"] {
            assert_eq!(
                store.record_if_absent(cmd, &client, "m").unwrap(),
                RecordOutcome::Ignored
            );
        }
        assert!(store.is_empty());
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
        assert!(!history_path(&dir).exists());
    }

    #[test]
    fn cdrom_is_not_a_directory_change() {
        assert!(is_recordable("cdrecord -v"));
        assert!(!is_recordable("cd .."));
    }

    #[test]
    fn embedding_failure_records_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = SemanticStore::empty(history_path(&dir));
        let result = store.record_if_absent("make build", &FailingEmbedder, "m");
        assert!(matches!(result, Err(Error::Service(_))));
        assert!(store.is_empty());
    }

    #[test]
    fn insertion_order_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let store = SemanticStore::empty(history_path(&dir));
        let client = FakeEmbedder::default();
        for cmd in ["b", "a", "c"] {
            store.record_if_absent(cmd, &client, "m").unwrap();
        }
        let commands: Vec<_> = store.snapshot().into_iter().map(|e| e.command).collect();
        assert_eq!(commands, ["b", "a", "c"]);
    }

    #[test]
    fn clear_writes_empty_list() {
        let dir = tempfile::tempdir().unwrap();
        let path = history_path(&dir);
        let store = SemanticStore::empty(&path);
        store
            .record_if_absent("echo hi", &FakeEmbedder::default(), "m")
            .unwrap();

        store.clear().unwrap();

        assert!(store.is_empty());
        assert_eq!(fs::read_to_string(&path).unwrap(), "[]");
    }

    #[test]
    fn clear_without_file_creates_one() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("history.json");
        SemanticStore::empty(&path).clear().unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "[]");
    }

    #[test]
    fn save_load_save_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let path = history_path(&dir);
        let store = SemanticStore::empty(&path);
        let client = FakeEmbedder::default();
        for cmd in ["docker ps", "du -sh *", "grep -rn TODO src"] {
            store.record_if_absent(cmd, &client, "m").unwrap();
        }
        let first = fs::read(&path).unwrap();

        let (reloaded, _) = SemanticStore::load(&path);
        reloaded.persist().unwrap();
        assert_eq!(fs::read(&path).unwrap(), first);
    }

    #[test]
    fn awkward_floats_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = history_path(&dir);
        fs::write(
            &path,
            r#"[{"command":"uptime","embedding":[0.1,-2.5e-7,0.30000000000000004,1e300,-0.0]}]"#,
        )
        .unwrap();

        let (store, _) = SemanticStore::load(&path);
        store.persist().unwrap();
        let once = fs::read(&path).unwrap();
        let (again, _) = SemanticStore::load(&path);
        again.persist().unwrap();

        assert_eq!(fs::read(&path).unwrap(), once);
        assert_eq!(again.snapshot(), store.snapshot());
    }

    #[test]
    fn empty_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = history_path(&dir);
        SemanticStore::empty(&path).persist().unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "[]");

        let (store, status) = SemanticStore::load(&path);
        assert!(matches!(status, LoadStatus::Loaded(0)));
        store.persist().unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "[]");
    }

    #[test]
    fn concurrent_records_of_same_command_store_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SemanticStore::empty(history_path(&dir)));
        let client = Arc::new(FakeEmbedder::default());
        let threads = 8;
        let barrier = Arc::new(Barrier::new(threads));

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let store = Arc::clone(&store);
                let client = Arc::clone(&client);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    store
                        .record_if_absent("cargo test", client.as_ref(), "m")
                        .unwrap()
                })
            })
            .collect();

        let recorded = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|o| *o == RecordOutcome::Recorded)
            .count();

        assert_eq!(recorded, 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn concurrent_distinct_records_all_persist() {
        let dir = tempfile::tempdir().unwrap();
        let path = history_path(&dir);
        let store = Arc::new(SemanticStore::empty(&path));
        let client = Arc::new(FakeEmbedder::default());

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let store = Arc::clone(&store);
                let client = Arc::clone(&client);
                thread::spawn(move || {
                    store
                        .record_if_absent(&format!("echo {}", i), client.as_ref(), "m")
                        .unwrap()
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let (reloaded, status) = SemanticStore::load(&path);
        assert!(matches!(status, LoadStatus::Loaded(16)));
        assert_eq!(reloaded.len(), 16);
    }
}
