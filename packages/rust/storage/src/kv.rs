//! Key-value view over the output tree.
//!
//! Keys are `/`-separated paths relative to the output root
//! (`country:us/state:wy/sessions/2025/bills/HB1/metadata.json`). Directories
//! exist only implicitly, as prefixes of file keys.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use legisync_shared::{LegisyncError, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use uuid::Uuid;

/// Marker embedded in temporary file names written by [`FsStore::put`].
const TEMP_MARKER: &str = ".tmp-";

/// Storage backend for every durable artifact of a run.
pub trait Store: Send + Sync {
    /// Read the bytes at `key`, `None` if absent.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Replace the bytes at `key` atomically.
    fn put(&self, key: &str, bytes: &[u8]) -> Result<()>;

    /// Remove `key`. Returns whether something was removed.
    fn delete(&self, key: &str) -> Result<bool>;

    fn exists(&self, key: &str) -> Result<bool>;

    /// All file keys below `prefix`, sorted.
    fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Names of the immediate children (files or directories) of `prefix`, sorted.
    fn children(&self, prefix: &str) -> Result<Vec<String>>;

    /// Remove every key below `prefix`. Returns the number of keys removed.
    fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        let mut removed = 0;
        for key in self.list(prefix)? {
            if self.delete(&key)? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Join key segments with `/`, skipping empty ones.
pub fn join_key(parts: &[&str]) -> String {
    parts
        .iter()
        .filter(|p| !p.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("/")
}

/// Last segment of a key.
pub fn key_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

/// Read and deserialize a JSON value.
pub fn read_json<T: DeserializeOwned>(store: &dyn Store, key: &str) -> Result<Option<T>> {
    match store.get(key)? {
        Some(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| LegisyncError::json(key, e)),
        None => Ok(None),
    }
}

/// Serialize `value` as pretty JSON with a trailing newline.
pub fn to_json_bytes<T: Serialize + ?Sized>(key: &str, value: &T) -> Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec_pretty(value).map_err(|e| LegisyncError::json(key, e))?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Serialize and write a JSON value.
pub fn write_json<T: Serialize + ?Sized>(store: &dyn Store, key: &str, value: &T) -> Result<()> {
    store.put(key, &to_json_bytes(key, value)?)
}

fn check_key(key: &str) -> Result<()> {
    if key.is_empty()
        || key.starts_with('/')
        || key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..")
    {
        return Err(LegisyncError::Storage(format!("invalid key: {key:?}")));
    }
    Ok(())
}

fn dir_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_end_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}/")
    }
}

// ---------------------------------------------------------------------------
// FsStore
// ---------------------------------------------------------------------------

/// [`Store`] rooted at a directory on disk.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| LegisyncError::io(&root, e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, key: &str) -> PathBuf {
        key.split('/')
            .filter(|s| !s.is_empty())
            .fold(self.root.clone(), |p, seg| p.join(seg))
    }

    /// Remove now-empty directories from `dir` up to (not including) the root.
    fn prune_empty_dirs(&self, mut dir: Option<&Path>) {
        while let Some(d) = dir {
            if d == self.root || !d.starts_with(&self.root) {
                break;
            }
            // remove_dir fails on non-empty directories, which ends the walk.
            if std::fs::remove_dir(d).is_err() {
                break;
            }
            dir = d.parent();
        }
    }

    fn walk(&self, dir: &Path, key_prefix: &str, out: &mut Vec<String>) -> Result<()> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(LegisyncError::io(dir, e)),
        };
        for entry in entries {
            let entry = entry.map_err(|e| LegisyncError::io(dir, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let key = format!("{key_prefix}{name}");
            let file_type = entry.file_type().map_err(|e| LegisyncError::io(entry.path(), e))?;
            if file_type.is_dir() {
                self.walk(&entry.path(), &format!("{key}/"), out)?;
            } else if !name.contains(TEMP_MARKER) {
                out.push(key);
            }
        }
        Ok(())
    }
}

impl Store for FsStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        check_key(key)?;
        let path = self.path_of(key);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(LegisyncError::io(path, e)),
        }
    }

    fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        check_key(key)?;
        let path = self.path_of(key);
        let parent = path
            .parent()
            .ok_or_else(|| LegisyncError::Storage(format!("key has no parent: {key}")))?;
        std::fs::create_dir_all(parent).map_err(|e| LegisyncError::io(parent, e))?;

        let tmp = parent.join(format!(".{}{TEMP_MARKER}{}", key_name(key), Uuid::now_v7()));
        std::fs::write(&tmp, bytes).map_err(|e| LegisyncError::io(&tmp, e))?;
        if let Err(e) = std::fs::rename(&tmp, &path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(LegisyncError::io(path, e));
        }
        debug!(key, bytes = bytes.len(), "wrote key");
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        check_key(key)?;
        let path = self.path_of(key);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                self.prune_empty_dirs(path.parent());
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(LegisyncError::io(path, e)),
        }
    }

    fn exists(&self, key: &str) -> Result<bool> {
        check_key(key)?;
        Ok(self.path_of(key).is_file())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let prefix = dir_prefix(prefix);
        let mut out = Vec::new();
        self.walk(&self.path_of(&prefix), &prefix, &mut out)?;
        out.sort();
        Ok(out)
    }

    fn children(&self, prefix: &str) -> Result<Vec<String>> {
        let dir = self.path_of(&dir_prefix(prefix));
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(LegisyncError::io(dir, e)),
        };
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| LegisyncError::io(&dir, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.contains(TEMP_MARKER) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// In-memory [`Store`] for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every entry, for whole-tree comparisons.
    pub fn snapshot(&self) -> BTreeMap<String, Vec<u8>> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        // A poisoned map is still structurally valid.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Store for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        check_key(key)?;
        Ok(self.lock().get(key).cloned())
    }

    fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        check_key(key)?;
        self.lock().insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        check_key(key)?;
        Ok(self.lock().remove(key).is_some())
    }

    fn exists(&self, key: &str) -> Result<bool> {
        check_key(key)?;
        Ok(self.lock().contains_key(key))
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let prefix = dir_prefix(prefix);
        Ok(self
            .lock()
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    fn children(&self, prefix: &str) -> Result<Vec<String>> {
        let prefix = dir_prefix(prefix);
        let mut names: Vec<String> = self
            .lock()
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .filter_map(|(k, _)| k[prefix.len()..].split('/').next().map(str::to_string))
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn temp_root() -> PathBuf {
        std::env::temp_dir().join(format!("legisync-store-{}", Uuid::now_v7()))
    }

    fn exercise(store: &dyn Store) {
        store.put("a/b/one.json", b"1").unwrap();
        store.put("a/b/two.json", b"2").unwrap();
        store.put("a/c/three.json", b"3").unwrap();
        store.put("ab/four.json", b"4").unwrap();

        assert_eq!(store.get("a/b/one.json").unwrap().as_deref(), Some(&b"1"[..]));
        assert_eq!(store.get("a/b/missing.json").unwrap(), None);
        assert!(store.exists("a/c/three.json").unwrap());

        assert_eq!(
            store.list("a").unwrap(),
            vec!["a/b/one.json", "a/b/two.json", "a/c/three.json"]
        );
        assert_eq!(store.children("a").unwrap(), vec!["b", "c"]);
        assert_eq!(store.children("a/b/").unwrap(), vec!["one.json", "two.json"]);
        assert!(store.children("zzz").unwrap().is_empty());

        store.put("a/b/one.json", b"uno").unwrap();
        assert_eq!(store.get("a/b/one.json").unwrap().as_deref(), Some(&b"uno"[..]));

        assert!(store.delete("a/b/two.json").unwrap());
        assert!(!store.delete("a/b/two.json").unwrap());
        assert_eq!(store.delete_prefix("a").unwrap(), 2);
        assert!(store.list("a").unwrap().is_empty());
        assert_eq!(store.children("").unwrap(), vec!["ab"]);
    }

    #[test]
    fn memory_store_contract() {
        exercise(&MemoryStore::new());
    }

    #[test]
    fn fs_store_contract() {
        let root = temp_root();
        let store = FsStore::open(&root).unwrap();
        exercise(&store);
        // Emptied directories are pruned.
        assert!(!root.join("a").exists());
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn fs_store_put_leaves_no_temp_files() {
        let root = temp_root();
        let store = FsStore::open(&root).unwrap();
        store.put(".legisync/watermark.json", b"{}").unwrap();
        store.put(".legisync/watermark.json", b"{ }").unwrap();

        let names: Vec<_> = std::fs::read_dir(root.join(".legisync"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["watermark.json"]);
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn rejects_escaping_keys() {
        let store = MemoryStore::new();
        assert!(store.put("../outside.json", b"x").is_err());
        assert!(store.put("/abs.json", b"x").is_err());
        assert!(store.get("a//b").is_err());
    }

    #[test]
    fn json_helpers() {
        let store = MemoryStore::new();
        write_json(&store, "x/value.json", &json!({"k": 1})).unwrap();
        let raw = store.get("x/value.json").unwrap().unwrap();
        assert!(raw.ends_with(b"\n"));

        let value: Option<serde_json::Value> = read_json(&store, "x/value.json").unwrap();
        assert_eq!(value, Some(json!({"k": 1})));

        store.put("x/bad.json", b"{not json").unwrap();
        let err = read_json::<serde_json::Value>(&store, "x/bad.json").unwrap_err();
        assert_eq!(err.kind(), "json");
    }

    #[test]
    fn key_helpers() {
        assert_eq!(join_key(&["a", "", "b.json"]), "a/b.json");
        assert_eq!(key_name("a/b/c.json"), "c.json");
        assert_eq!(key_name("c.json"), "c.json");
    }
}
