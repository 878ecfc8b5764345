//! Entity Registry: identifier → legislative session.
//!
//! Shared by all reconciliation workers behind an `RwLock`. Writes stay in
//! memory until [`EntityRegistry::flush`], which the run calls exactly once.
//!
//! Identifiers are reused across sessions (every session has an `HB 1`), so
//! the registry keeps the greatest session string seen for an identifier.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use legisync_shared::{BillMetadata, LegisyncError, Result};
use tracing::{debug, info, instrument, warn};

use crate::kv::{Store, read_json, write_json};
use crate::layout::{Layout, REGISTRY_KEY};

#[derive(Debug, Default)]
struct RegistryState {
    sessions: HashMap<String, String>,
    dirty: bool,
}

/// In-memory bill/session mapping with a single durable flush.
pub struct EntityRegistry {
    store: Arc<dyn Store>,
    state: RwLock<RegistryState>,
}

impl EntityRegistry {
    /// Load the mapping. An unreadable file is `RegistryCorrupt`.
    pub fn load(store: Arc<dyn Store>) -> Result<Self> {
        let sessions = match read_json::<HashMap<String, String>>(store.as_ref(), REGISTRY_KEY) {
            Ok(Some(map)) => map,
            Ok(None) => HashMap::new(),
            Err(e) => return Err(LegisyncError::RegistryCorrupt(e.to_string())),
        };
        debug!(entries = sessions.len(), "loaded entity registry");
        Ok(Self {
            store,
            state: RwLock::new(RegistryState {
                sessions,
                dirty: false,
            }),
        })
    }

    /// Whether a mapping file exists in the store.
    pub fn is_persisted(store: &dyn Store) -> Result<bool> {
        store.exists(REGISTRY_KEY)
    }

    /// Rebuild the mapping by scanning every bill `metadata.json` in the tree.
    #[instrument(skip_all, fields(jurisdiction = %layout.jurisdiction()))]
    pub fn rebuild(store: Arc<dyn Store>, layout: &Layout) -> Result<Self> {
        let registry = Self {
            store: store.clone(),
            state: RwLock::new(RegistryState::default()),
        };
        for session in store.children(&layout.sessions_root())? {
            for dir_name in store.children(&layout.bills_root(&session))? {
                let key = layout.metadata(&layout.bill_dir_by_name(&session, &dir_name));
                match read_json::<BillMetadata>(store.as_ref(), &key) {
                    Ok(Some(bill)) => {
                        registry.record(&bill.identifier, &bill.legislative_session);
                    }
                    Ok(None) => {}
                    Err(e) => warn!(key, error = %e, "skipping unreadable metadata"),
                }
            }
        }
        info!(entries = registry.len(), "rebuilt entity registry from tree");
        Ok(registry)
    }

    /// Session of `identifier`, if known.
    pub fn resolve(&self, identifier: &str) -> Option<String> {
        self.read().sessions.get(identifier).cloned()
    }

    /// Upsert `identifier → session`. Returns whether the mapping changed.
    pub fn record(&self, identifier: &str, session: &str) -> bool {
        let mut state = self.write();
        let replace = match state.sessions.get(identifier) {
            Some(existing) => session > existing.as_str(),
            None => true,
        };
        if replace {
            state
                .sessions
                .insert(identifier.to_string(), session.to_string());
            state.dirty = true;
        }
        replace
    }

    pub fn len(&self) -> usize {
        self.read().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Persist the mapping (sorted by identifier) if anything changed.
    pub fn flush(&self) -> Result<bool> {
        let mut state = self.write();
        if !state.dirty {
            return Ok(false);
        }
        let entries = {
            let sorted: BTreeMap<&String, &String> = state.sessions.iter().collect();
            write_json(self.store.as_ref(), REGISTRY_KEY, &sorted)?;
            sorted.len()
        };
        state.dirty = false;
        info!(entries, "flushed entity registry");
        Ok(true)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryStore;
    use legisync_shared::Jurisdiction;
    use serde_json::json;

    #[test]
    fn record_and_resolve() {
        let registry = EntityRegistry::load(Arc::new(MemoryStore::new())).unwrap();
        assert_eq!(registry.resolve("HB 1"), None);

        assert!(registry.record("HB 1", "2024"));
        assert!(!registry.record("HB 1", "2024"));
        assert!(registry.record("HB 1", "2025"));
        assert!(!registry.record("HB 1", "2023"));
        assert_eq!(registry.resolve("HB 1").as_deref(), Some("2025"));
    }

    #[test]
    fn flush_persists_sorted_mapping() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let registry = EntityRegistry::load(store.clone()).unwrap();
        registry.record("SF 2", "2025");
        registry.record("HB 1", "2025");
        assert!(registry.flush().unwrap());
        assert!(!registry.flush().unwrap());

        let text = String::from_utf8(store.get(REGISTRY_KEY).unwrap().unwrap()).unwrap();
        assert!(text.find("HB 1").unwrap() < text.find("SF 2").unwrap());

        let reloaded = EntityRegistry::load(store).unwrap();
        assert_eq!(reloaded.resolve("SF 2").as_deref(), Some("2025"));
    }

    #[test]
    fn corrupt_file_is_fatal() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        store.put(REGISTRY_KEY, b"[1, 2").unwrap();
        let err = EntityRegistry::load(store).err().expect("corrupt registry");
        assert!(matches!(err, LegisyncError::RegistryCorrupt(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn rebuild_scans_bill_metadata() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let layout = Layout::new(Jurisdiction::new("us", "wy"));
        let dir = layout.bill_dir("2025", "HB 7");
        write_json(
            store.as_ref(),
            &layout.metadata(&dir),
            &json!({"identifier": "HB 7", "legislative_session": "2025"}),
        )
        .unwrap();
        let orphan = layout.bill_dir("2025", "HR 999");
        write_json(
            store.as_ref(),
            &layout.placeholder(&orphan),
            &json!({"identifier": "HR 999", "placeholder": true}),
        )
        .unwrap();

        let registry = EntityRegistry::rebuild(store, &layout).unwrap();
        assert_eq!(registry.resolve("HB 7").as_deref(), Some("2025"));
        assert_eq!(registry.resolve("HR 999"), None);
    }
}
