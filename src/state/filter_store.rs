use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::{AppError, Result};
use crate::types::{FilterSpec, OwnerId};

// ---------------------------------------------------------------------------
// FilterEntry
// ---------------------------------------------------------------------------

/// One live filter: the persisted spec plus the handle of its polling task.
/// `id` is stable for the process lifetime so a running watcher can find its
/// own entry after user-facing indices shift; it is never persisted.
struct FilterEntry {
    id: u64,
    spec: FilterSpec,
    task: Option<JoinHandle<()>>,
}

/// Read-only row handed to the command surface. `index` is the user-facing
/// 1-based position and shifts when earlier entries are removed.
#[derive(Debug, Clone, Serialize)]
pub struct FilterView {
    pub index: usize,
    pub name: String,
    pub url: String,
    pub min_price: f64,
    pub max_price: f64,
    pub paused: bool,
}

// ---------------------------------------------------------------------------
// FilterStore
// ---------------------------------------------------------------------------

/// In-memory filter registry, snapshotted to a single JSON file on every
/// mutation. Per-owner entries keep insertion order.
pub struct FilterStore {
    /// owner id → ordered filter entries
    owners: DashMap<OwnerId, Vec<FilterEntry>>,
    next_id: AtomicU64,
    path: PathBuf,
}

impl FilterStore {
    pub fn new(path: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            owners: DashMap::new(),
            next_id: AtomicU64::new(1),
            path: path.into(),
        })
    }

    /// Append a filter to the owner's sequence and return its internal id.
    /// Does not persist — creation composes insert → spawn → attach →
    /// persist, and restore must not rewrite the file it just read.
    pub fn insert(&self, owner: OwnerId, spec: FilterSpec) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.owners
            .entry(owner)
            .or_default()
            .push(FilterEntry { id, spec, task: None });
        id
    }

    /// Store the spawned watcher's handle on its entry. No-op if the entry
    /// was already removed (delete racing a slow spawn).
    pub fn attach_task(&self, owner: OwnerId, id: u64, task: JoinHandle<()>) {
        if let Some(mut entries) = self.owners.get_mut(&owner) {
            if let Some(entry) = entries.iter_mut().find(|e| e.id == id) {
                entry.task = Some(task);
            }
        }
    }

    /// Ordered snapshot of one owner's filters.
    pub fn list(&self, owner: OwnerId) -> Vec<FilterView> {
        let Some(entries) = self.owners.get(&owner) else {
            return Vec::new();
        };
        entries
            .iter()
            .enumerate()
            .map(|(i, e)| FilterView {
                index: i + 1,
                name: e.spec.name.clone(),
                url: e.spec.url.clone(),
                min_price: e.spec.min_price,
                max_price: e.spec.max_price,
                paused: e.spec.paused,
            })
            .collect()
    }

    /// User-facing 1-based position of an entry, by internal id.
    pub fn position_of(&self, owner: OwnerId, id: u64) -> Option<usize> {
        let entries = self.owners.get(&owner)?;
        entries.iter().position(|e| e.id == id).map(|p| p + 1)
    }

    /// Loop-side read: a watcher polls this for its own pause flag and price
    /// bounds every cycle. `None` means the entry is gone and the loop must
    /// exit.
    pub fn filter_state(&self, owner: OwnerId, id: u64) -> Option<FilterSpec> {
        let entries = self.owners.get(&owner)?;
        entries.iter().find(|e| e.id == id).map(|e| e.spec.clone())
    }

    /// Remove by 1-based index, cancelling the entry's watcher task.
    /// Remaining entries keep their relative order.
    pub fn remove_at(&self, owner: OwnerId, index: usize) -> Result<FilterSpec> {
        let removed = {
            let mut entries = self.owners.get_mut(&owner).ok_or(AppError::InvalidIndex)?;
            if index < 1 || index > entries.len() {
                return Err(AppError::InvalidIndex);
            }
            entries.remove(index - 1)
        };
        if let Some(task) = removed.task {
            task.abort();
        }
        self.persist();
        Ok(removed.spec)
    }

    /// Self-removal path for a watcher that hit its error threshold. The
    /// loop exits on its own, so the task handle is dropped, not aborted.
    pub fn remove_by_id(&self, owner: OwnerId, id: u64) -> Option<FilterSpec> {
        let removed = {
            let mut entries = self.owners.get_mut(&owner)?;
            let pos = entries.iter().position(|e| e.id == id)?;
            entries.remove(pos)
        };
        self.persist();
        Some(removed.spec)
    }

    /// Flip the paused flag in place. Never touches the watcher task —
    /// pausing is cooperative, the loop re-reads the flag each cycle.
    pub fn set_paused(&self, owner: OwnerId, index: usize, paused: bool) -> Result<()> {
        {
            let mut entries = self.owners.get_mut(&owner).ok_or(AppError::InvalidIndex)?;
            if index < 1 || index > entries.len() {
                return Err(AppError::InvalidIndex);
            }
            entries[index - 1].spec.paused = paused;
        }
        self.persist();
        Ok(())
    }

    /// Total live filters across all owners.
    pub fn active_count(&self) -> usize {
        self.owners.iter().map(|e| e.value().len()).sum()
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    /// Serializable view of the whole registry: owner id (string form) →
    /// ordered records. Task handles are not part of the snapshot.
    pub fn snapshot(&self) -> BTreeMap<String, Vec<FilterSpec>> {
        self.owners
            .iter()
            .map(|entry| {
                (
                    entry.key().to_string(),
                    entry.value().iter().map(|e| e.spec.clone()).collect(),
                )
            })
            .collect()
    }

    /// Write the whole registry to the snapshot file. Called synchronously
    /// after every mutation, before the caller yields. Failures are logged;
    /// the in-memory state stays authoritative either way.
    pub fn persist(&self) {
        if let Err(e) = self.write_snapshot() {
            error!("Failed to persist filters to {}: {e}", self.path.display());
        }
    }

    fn write_snapshot(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.snapshot())?;
        // temp + rename: a crash mid-write can't truncate the previous file
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Load the snapshot file into the registry. Missing or unreadable
    /// storage restores nothing — startup proceeds with an empty registry.
    /// Returns the (owner, id) pairs so the caller can spawn one watcher per
    /// restored entry; restored watchers always start with empty dedup state.
    pub fn restore(&self) -> Vec<(OwnerId, u64)> {
        let data = match std::fs::read_to_string(&self.path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!("Cannot read filter snapshot {}: {e}", self.path.display());
                return Vec::new();
            }
        };

        let records: BTreeMap<String, Vec<FilterSpec>> = match serde_json::from_str(&data) {
            Ok(r) => r,
            Err(e) => {
                warn!("Ignoring unreadable filter snapshot {}: {e}", self.path.display());
                return Vec::new();
            }
        };

        let mut restored = Vec::new();
        for (owner_str, specs) in records {
            let Ok(owner) = owner_str.parse::<OwnerId>() else {
                warn!("Skipping records for unparsable owner id {owner_str:?}");
                continue;
            };
            for spec in specs {
                let id = self.insert(owner, spec);
                restored.push((owner, id));
            }
        }
        info!("Restored {} filters from {}", restored.len(), self.path.display());
        restored
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_path(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("skinbaron-filters-{}-{}.json", std::process::id(), tag))
    }

    fn spec(url: &str, min: f64, max: f64, name: &str) -> FilterSpec {
        FilterSpec {
            url: url.to_string(),
            min_price: min,
            max_price: max,
            name: name.to_string(),
            paused: false,
            channel: None,
        }
    }

    #[test]
    fn remove_at_validates_index() {
        let path = test_path("remove-validate");
        let store = FilterStore::new(&path);
        assert!(matches!(store.remove_at(1, 1), Err(AppError::InvalidIndex)));

        store.insert(1, spec("https://example/a", 0.0, 1.0, "a"));
        assert!(matches!(store.remove_at(1, 0), Err(AppError::InvalidIndex)));
        assert!(matches!(store.remove_at(1, 2), Err(AppError::InvalidIndex)));
        assert!(store.remove_at(1, 1).is_ok());
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn remove_at_preserves_relative_order() {
        let path = test_path("remove-order");
        let store = FilterStore::new(&path);
        for name in ["a", "b", "c"] {
            store.insert(7, spec(&format!("https://example/{name}"), 0.0, 1.0, name));
        }

        let removed = store.remove_at(7, 2).unwrap();
        assert_eq!(removed.name, "b");

        let names: Vec<String> = store.list(7).into_iter().map(|v| v.name).collect();
        assert_eq!(names, vec!["a", "c"]);
        // indices renumber after removal
        let indices: Vec<usize> = store.list(7).into_iter().map(|v| v.index).collect();
        assert_eq!(indices, vec![1, 2]);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn set_paused_flips_only_the_flag() {
        let path = test_path("pause-flag");
        let store = FilterStore::new(&path);
        let id = store.insert(3, spec("https://example/a", 5.0, 10.0, "a"));

        store.set_paused(3, 1, true).unwrap();
        let state = store.filter_state(3, id).unwrap();
        assert!(state.paused);
        assert_eq!(state.min_price, 5.0);

        store.set_paused(3, 1, false).unwrap();
        assert!(!store.filter_state(3, id).unwrap().paused);

        assert!(matches!(store.set_paused(3, 2, true), Err(AppError::InvalidIndex)));
        assert!(matches!(store.set_paused(99, 1, true), Err(AppError::InvalidIndex)));
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn remove_by_id_targets_the_right_entry() {
        let path = test_path("remove-by-id");
        let store = FilterStore::new(&path);
        // same url twice — id keeps the two apart where url matching couldn't
        let first = store.insert(4, spec("https://example/same", 0.0, 1.0, "one"));
        let second = store.insert(4, spec("https://example/same", 0.0, 1.0, "two"));

        let removed = store.remove_by_id(4, second).unwrap();
        assert_eq!(removed.name, "two");
        assert!(store.filter_state(4, first).is_some());
        assert!(store.filter_state(4, second).is_none());
        assert!(store.remove_by_id(4, second).is_none());
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn persist_then_restore_round_trips() {
        let path = test_path("round-trip");
        let store = FilterStore::new(&path);
        let mut with_channel = spec("https://example/knife", 100.0, 250.0, "knife");
        with_channel.channel = Some("alerts".to_string());
        store.insert(42, with_channel);
        let mut paused = spec("https://example/gloves", 10.0, 20.0, "gloves");
        paused.paused = true;
        store.insert(42, paused);
        store.insert(7, spec("https://example/ak", 1.0, 2.0, "ak"));
        store.persist();

        let reloaded = FilterStore::new(&path);
        let restored = reloaded.restore();
        assert_eq!(restored.len(), 3);

        let views = reloaded.list(42);
        assert_eq!(views.len(), 2);
        assert_eq!(views[0].name, "knife");
        assert_eq!(views[0].min_price, 100.0);
        assert_eq!(views[0].max_price, 250.0);
        assert_eq!(views[1].name, "gloves");
        assert!(views[1].paused);
        assert_eq!(reloaded.list(7).len(), 1);

        // channel binding does not survive a restart
        let (owner, id) = restored
            .iter()
            .find(|(owner, _)| *owner == 42)
            .copied()
            .unwrap();
        assert!(reloaded.filter_state(owner, id).unwrap().channel.is_none());
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn restore_missing_file_is_empty() {
        let store = FilterStore::new(test_path("no-such-file-ever"));
        assert!(store.restore().is_empty());
        assert_eq!(store.active_count(), 0);
    }

    #[test]
    fn restore_garbage_file_is_empty() {
        let path = test_path("garbage");
        std::fs::write(&path, "{ not json").unwrap();
        let store = FilterStore::new(&path);
        assert!(store.restore().is_empty());
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn snapshot_keys_are_string_owner_ids() {
        let path = test_path("snapshot-keys");
        let store = FilterStore::new(&path);
        store.insert(42, spec("https://example/a", 1.0, 2.0, "a"));
        let snapshot = store.snapshot();
        assert!(snapshot.contains_key("42"));
        assert_eq!(snapshot["42"][0].url, "https://example/a");
    }
}
