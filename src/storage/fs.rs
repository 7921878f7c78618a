//! Filesystem Backend
//!
//! Stores scalars and hashes as plain files under a root directory:
//!
//! ```text
//! <root>/
//! ├── scalars/
//! │   ├── alpha          <- scalar "alpha", file contents are the value
//! │   └── counter
//! └── hashes/
//!     └── beta/          <- hash "beta"
//!         ├── f1         <- field "f1", file contents are the value
//!         └── f2
//! <root>.lock            <- advisory lock serializing writers
//! ```
//!
//! ## Writes
//!
//! Values are written to a temporary file in the root and renamed into place,
//! so readers see either the old or the new value, never a torn one.
//!
//! Every mutating operation holds an exclusive advisory lock on `<root>.lock`
//! for its whole check-then-write sequence. The lock file sits next to the
//! root so `flush_db` cannot remove it while another writer is waiting on it.

use crate::storage::backend::{key_matches, Backend, StoreError, StoreResult, StoreState};
use bytes::Bytes;
use fs2::FileExt;
use std::collections::BTreeSet;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};

/// Directory holding one file per scalar key.
const SCALARS_DIR: &str = "scalars";

/// Directory holding one sub-directory per hash.
const HASHES_DIR: &str = "hashes";

/// Exclusive advisory lock on `<root>.lock`, released on drop.
#[derive(Debug)]
pub struct RootLock {
    file: File,
}

impl RootLock {
    /// Blocks until the lock at `path` is held.
    pub fn acquire(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)?;
        file.lock_exclusive()?;
        trace!(lock = %path.display(), "Acquired root lock");
        Ok(Self { file })
    }
}

impl Drop for RootLock {
    fn drop(&mut self) {
        // The file stays on disk: unlinking it would let a waiter lock an orphaned inode.
        let _ = FileExt::unlock(&self.file);
    }
}

/// A store rooted at a directory.
///
/// # Example
///
/// ```no_run
/// use jkv::storage::{Backend, FsStore};
///
/// let mut store = FsStore::new("jkv_db");
/// store.open()?;
/// store.set("name", b"Joe")?;
/// assert_eq!(&store.get("name")?[..], b"Joe");
/// # Ok::<(), jkv::storage::StoreError>(())
/// ```
#[derive(Debug)]
pub struct FsStore {
    root: PathBuf,
    lock_path: PathBuf,
    state: StoreState,
}

impl FsStore {
    /// Creates a closed store rooted at `root`. Nothing is touched on disk.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        // Rebuilt from components so a trailing separator cannot put the lock inside the root
        let trimmed: PathBuf = root.components().collect();
        let mut lock_name = OsString::from(trimmed.as_os_str());
        lock_name.push(".lock");
        Self {
            root,
            lock_path: PathBuf::from(lock_name),
            state: StoreState::Closed,
        }
    }

    /// The root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The current lifecycle state.
    pub fn state(&self) -> StoreState {
        self.state
    }

    fn scalar_dir(&self) -> PathBuf {
        self.root.join(SCALARS_DIR)
    }

    fn hash_root(&self) -> PathBuf {
        self.root.join(HASHES_DIR)
    }

    fn scalar_path(&self, key: &str) -> PathBuf {
        self.scalar_dir().join(key)
    }

    fn hash_dir(&self, hash: &str) -> PathBuf {
        self.hash_root().join(hash)
    }

    fn field_path(&self, hash: &str, field: &str) -> PathBuf {
        self.hash_dir(hash).join(field)
    }

    fn lock(&self) -> StoreResult<RootLock> {
        Ok(RootLock::acquire(&self.lock_path)?)
    }

    /// Writes `value` to a temp file in the root, then renames it over `dest`.
    ///
    /// Callers hold the root lock, so one fixed temp name per process is enough.
    /// It must stay short: `dest` may already use the longest name allowed.
    fn write_atomic(&self, dest: &Path, value: &[u8]) -> StoreResult<()> {
        let tmp = self.root.join(format!(".jkv.{}.tmp", std::process::id()));
        fs::write(&tmp, value)?;
        if let Err(e) = fs::rename(&tmp, dest) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }
}

/// Rejects names that would escape or alias their namespace directory.
fn validate_name(name: &str) -> StoreResult<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\0']) {
        return Err(StoreError::InvalidKey(name.to_string()));
    }
    Ok(())
}

/// Maps a missing file to `NotFound(name)`, anything else to `Io`.
fn not_found_as(name: impl Into<String>) -> impl FnOnce(io::Error) -> StoreError {
    move |e| match e.kind() {
        ErrorKind::NotFound => StoreError::NotFound(name.into()),
        _ => StoreError::Io(e),
    }
}

/// Entry names of a directory, unordered.
fn list_names(dir: &Path) -> io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        names.push(entry?.file_name().to_string_lossy().into_owned());
    }
    Ok(names)
}

impl Backend for FsStore {
    fn open(&mut self) -> StoreResult<()> {
        self.state = StoreState::Closed;
        for dir in [self.scalar_dir(), self.hash_root()] {
            fs::create_dir_all(&dir)?;
        }
        self.state = StoreState::Open;
        debug!(root = %self.root.display(), "Store opened");
        Ok(())
    }

    fn close(&mut self) {
        self.state = StoreState::Closed;
        debug!(root = %self.root.display(), "Store closed");
    }

    fn flush_db(&self) {
        let _lock = match self.lock() {
            Ok(lock) => lock,
            Err(e) => {
                warn!(root = %self.root.display(), error = %e, "FLUSHDB could not take the root lock");
                return;
            }
        };
        match fs::remove_dir_all(&self.root) {
            Ok(()) => debug!(root = %self.root.display(), "Store flushed"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(root = %self.root.display(), error = %e, "FLUSHDB left data behind"),
        }
    }

    fn location(&self) -> String {
        self.root.display().to_string()
    }

    fn ping(&self) -> StoreResult<String> {
        self.state.ensure_open()?;
        Ok("PONG".to_string())
    }

    fn get(&self, key: &str) -> StoreResult<Bytes> {
        self.state.ensure_open()?;
        validate_name(key)?;
        let data = fs::read(self.scalar_path(key)).map_err(not_found_as(key))?;
        Ok(Bytes::from(data))
    }

    fn set(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        self.state.ensure_open()?;
        validate_name(key)?;
        let _lock = self.lock()?;
        if self.hash_dir(key).is_dir() {
            return Err(StoreError::TypeConflict(key.to_string()));
        }
        self.write_atomic(&self.scalar_path(key), value)?;
        trace!(key = %key, len = value.len(), "SET");
        Ok(())
    }

    fn del(&self, keys: &[&str]) -> StoreResult<usize> {
        self.state.ensure_open()?;
        let _lock = self.lock()?;
        let mut removed = 0;
        for key in keys {
            validate_name(key)?;
            fs::remove_file(self.scalar_path(key)).map_err(not_found_as(*key))?;
            removed += 1;
        }
        Ok(removed)
    }

    fn exists(&self, keys: &[&str]) -> StoreResult<usize> {
        self.state.ensure_open()?;
        let mut count = 0;
        for key in keys {
            validate_name(key)?;
            if self.scalar_path(key).is_file() {
                count += 1;
            }
        }
        Ok(count)
    }

    fn keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        self.state.ensure_open()?;
        let mut names = BTreeSet::new();
        for dir in [self.scalar_dir(), self.hash_root()] {
            for name in list_names(&dir)? {
                if key_matches(pattern, &name) {
                    names.insert(name);
                }
            }
        }
        Ok(names.into_iter().collect())
    }

    fn hget(&self, hash: &str, field: &str) -> StoreResult<Bytes> {
        self.state.ensure_open()?;
        validate_name(hash)?;
        validate_name(field)?;
        let data = fs::read(self.field_path(hash, field))
            .map_err(not_found_as(format!("{}/{}", hash, field)))?;
        Ok(Bytes::from(data))
    }

    fn hset(&self, hash: &str, field: &str, value: &[u8]) -> StoreResult<()> {
        self.state.ensure_open()?;
        validate_name(hash)?;
        validate_name(field)?;
        let _lock = self.lock()?;
        if self.exists(&[hash])? > 0 {
            return Err(StoreError::TypeConflict(hash.to_string()));
        }
        fs::create_dir_all(self.hash_dir(hash))?;
        self.write_atomic(&self.field_path(hash, field), value)?;
        trace!(hash = %hash, field = %field, len = value.len(), "HSET");
        Ok(())
    }

    fn hdel(&self, hash: &str, field: &str) -> StoreResult<usize> {
        self.state.ensure_open()?;
        validate_name(hash)?;
        validate_name(field)?;
        let _lock = self.lock()?;
        fs::remove_file(self.field_path(hash, field))
            .map_err(not_found_as(format!("{}/{}", hash, field)))?;

        let dir = self.hash_dir(hash);
        let remaining = fs::read_dir(&dir)?.count();
        if remaining == 0 {
            fs::remove_dir(&dir)?;
            debug!(hash = %hash, "Removed empty hash");
        }
        Ok(remaining)
    }

    fn hkeys(&self, hash: &str) -> StoreResult<Vec<String>> {
        self.state.ensure_open()?;
        validate_name(hash)?;
        let mut fields = list_names(&self.hash_dir(hash)).map_err(not_found_as(hash))?;
        fields.sort();
        Ok(fields)
    }

    fn hexists(&self, hash: &str, field: &str) -> StoreResult<bool> {
        self.state.ensure_open()?;
        validate_name(hash)?;
        validate_name(field)?;
        Ok(self.field_path(hash, field).is_file())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store() -> (TempDir, FsStore) {
        let dir = TempDir::new().unwrap();
        let mut store = FsStore::new(dir.path().join("db"));
        store.open().unwrap();
        (dir, store)
    }

    #[test]
    fn test_open_creates_layout() {
        let (_dir, store) = open_store();
        assert!(store.root().join("scalars").is_dir());
        assert!(store.root().join("hashes").is_dir());
        assert_eq!(store.state(), StoreState::Open);
    }

    #[test]
    fn test_open_is_idempotent() {
        let (_dir, mut store) = open_store();
        store.set("k", b"v").unwrap();
        store.open().unwrap();
        assert_eq!(&store.get("k").unwrap()[..], b"v");
    }

    #[test]
    fn test_closed_store_rejects_everything() {
        let (_dir, mut store) = open_store();
        store.set("k", b"v").unwrap();
        store.close();

        assert!(matches!(store.get("k"), Err(StoreError::NotOpen)));
        assert!(matches!(store.set("k", b"x"), Err(StoreError::NotOpen)));
        assert!(matches!(store.del(&["k"]), Err(StoreError::NotOpen)));
        assert!(matches!(store.exists(&["k"]), Err(StoreError::NotOpen)));
        assert!(matches!(store.keys("*"), Err(StoreError::NotOpen)));
        assert!(matches!(store.hget("h", "f"), Err(StoreError::NotOpen)));
        assert!(matches!(store.hset("h", "f", b"v"), Err(StoreError::NotOpen)));
        assert!(matches!(store.hdel("h", "f"), Err(StoreError::NotOpen)));
        assert!(matches!(store.hkeys("h"), Err(StoreError::NotOpen)));
        assert!(matches!(store.hexists("h", "f"), Err(StoreError::NotOpen)));
        assert!(matches!(store.ping(), Err(StoreError::NotOpen)));

        // Data survives a close
        assert!(store.root().join("scalars/k").is_file());
    }

    #[test]
    fn test_set_get() {
        let (_dir, store) = open_store();
        store.set("name", b"Joe").unwrap();
        assert_eq!(&store.get("name").unwrap()[..], b"Joe");

        store.set("name", b"Jane").unwrap();
        assert_eq!(&store.get("name").unwrap()[..], b"Jane");
    }

    #[test]
    fn test_binary_value() {
        let (_dir, store) = open_store();
        store.set("bin", b"a\x00b\xffc").unwrap();
        assert_eq!(&store.get("bin").unwrap()[..], b"a\x00b\xffc");
    }

    #[test]
    fn test_get_missing() {
        let (_dir, store) = open_store();
        assert!(matches!(store.get("nope"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_del() {
        let (_dir, store) = open_store();
        store.set("k", b"v").unwrap();
        assert_eq!(store.del(&["k"]).unwrap(), 1);
        assert_eq!(store.exists(&["k"]).unwrap(), 0);
        assert!(matches!(store.get("k"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_del_missing_surfaces_not_found() {
        let (_dir, store) = open_store();
        assert!(matches!(store.del(&["ghost"]), Err(StoreError::NotFound(k)) if k == "ghost"));
    }

    #[test]
    fn test_del_many_stops_at_first_missing() {
        let (_dir, store) = open_store();
        store.set("a", b"1").unwrap();
        store.set("c", b"3").unwrap();
        assert!(store.del(&["a", "b", "c"]).is_err());
        assert_eq!(store.exists(&["a"]).unwrap(), 0);
        assert_eq!(store.exists(&["c"]).unwrap(), 1);
    }

    #[test]
    fn test_exists_counts_scalars_only() {
        let (_dir, store) = open_store();
        store.set("a", b"1").unwrap();
        store.set("b", b"2").unwrap();
        store.hset("h", "f", b"v").unwrap();
        assert_eq!(store.exists(&["a", "b", "c", "h"]).unwrap(), 2);
    }

    #[test]
    fn test_exists_tolerates_missing_root() {
        let (_dir, store) = open_store();
        store.flush_db();
        assert_eq!(store.exists(&["a"]).unwrap(), 0);
        assert!(!store.hexists("h", "f").unwrap());
        assert!(!store.root().exists());
    }

    #[test]
    fn test_hset_hget_hkeys() {
        let (_dir, store) = open_store();
        store.hset("user", "name", b"Joe").unwrap();
        store.hset("user", "age", b"42").unwrap();

        assert_eq!(&store.hget("user", "name").unwrap()[..], b"Joe");
        assert_eq!(store.hkeys("user").unwrap(), vec!["age", "name"]);
        assert!(store.hexists("user", "age").unwrap());
        assert!(!store.hexists("user", "email").unwrap());
    }

    #[test]
    fn test_hget_missing() {
        let (_dir, store) = open_store();
        assert!(matches!(store.hget("h", "f"), Err(StoreError::NotFound(_))));
        store.hset("h", "a", b"1").unwrap();
        assert!(matches!(store.hget("h", "f"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_hset_on_scalar_conflicts() {
        let (_dir, store) = open_store();
        store.set("alpha", b"1").unwrap();
        assert!(matches!(
            store.hset("alpha", "z", b"1"),
            Err(StoreError::TypeConflict(k)) if k == "alpha"
        ));
        assert!(!store.root().join("hashes/alpha").exists());
    }

    #[test]
    fn test_set_on_hash_conflicts() {
        let (_dir, store) = open_store();
        store.hset("beta", "f", b"x").unwrap();
        assert!(matches!(
            store.set("beta", b"1"),
            Err(StoreError::TypeConflict(_))
        ));
        assert!(!store.root().join("scalars/beta").exists());
    }

    #[test]
    fn test_hdel_removes_empty_hash() {
        let (_dir, store) = open_store();
        store.hset("h", "a", b"1").unwrap();
        store.hset("h", "b", b"2").unwrap();

        assert_eq!(store.hdel("h", "a").unwrap(), 1);
        assert_eq!(store.hkeys("h").unwrap(), vec!["b"]);

        assert_eq!(store.hdel("h", "b").unwrap(), 0);
        assert!(matches!(store.hkeys("h"), Err(StoreError::NotFound(_))));
        assert!(!store.root().join("hashes/h").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_hdel_unlistable_hash_surfaces_error() {
        use std::os::unix::fs::PermissionsExt;

        let (_dir, store) = open_store();
        store.hset("h", "a", b"1").unwrap();
        store.hset("h", "b", b"2").unwrap();

        // Write and search but no read: the field can go, the listing cannot
        let hash_dir = store.root().join("hashes/h");
        fs::set_permissions(&hash_dir, fs::Permissions::from_mode(0o300)).unwrap();
        if fs::read_dir(&hash_dir).is_ok() {
            // Permission bits are not enforced (running as root)
            fs::set_permissions(&hash_dir, fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let result = store.hdel("h", "a");
        fs::set_permissions(&hash_dir, fs::Permissions::from_mode(0o755)).unwrap();

        assert!(matches!(result, Err(StoreError::Io(_))));
        assert!(hash_dir.is_dir());
        assert_eq!(store.hkeys("h").unwrap(), vec!["b"]);
    }

    #[test]
    fn test_hdel_missing_field() {
        let (_dir, store) = open_store();
        store.hset("h", "a", b"1").unwrap();
        assert!(matches!(store.hdel("h", "zz"), Err(StoreError::NotFound(_))));
        assert!(matches!(store.hdel("nohash", "a"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_keys_union_sorted() {
        let (_dir, store) = open_store();
        store.set("b", b"1").unwrap();
        store.set("a", b"1").unwrap();
        store.hset("c", "f", b"1").unwrap();
        assert_eq!(store.keys("*").unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_keys_pattern() {
        let (_dir, store) = open_store();
        store.set("user:1", b"a").unwrap();
        store.set("user:2", b"b").unwrap();
        store.hset("session:1", "f", b"x").unwrap();
        assert_eq!(store.keys("user:*").unwrap(), vec!["user:1", "user:2"]);
        assert_eq!(store.keys("*:1").unwrap(), vec!["session:1", "user:1"]);
    }

    #[test]
    fn test_flush_then_open_is_empty() {
        let (_dir, mut store) = open_store();
        store.set("a", b"1").unwrap();
        store.hset("h", "f", b"1").unwrap();

        store.flush_db();
        assert_eq!(store.state(), StoreState::Open);
        assert!(!store.root().exists());

        store.open().unwrap();
        assert!(store.keys("*").unwrap().is_empty());
    }

    #[test]
    fn test_invalid_names_rejected() {
        let (_dir, store) = open_store();
        for bad in ["", ".", "..", "a/b", "../escape"] {
            assert!(matches!(store.set(bad, b"v"), Err(StoreError::InvalidKey(_))));
            assert!(matches!(store.hset("h", bad, b"v"), Err(StoreError::InvalidKey(_))));
        }
    }

    #[test]
    fn test_longest_names_round_trip() {
        let (_dir, store) = open_store();
        let long = "k".repeat(250);

        store.set(&long, b"scalar").unwrap();
        assert_eq!(&store.get(&long).unwrap()[..], b"scalar");

        store.hset("h", &long, b"field").unwrap();
        assert_eq!(&store.hget("h", &long).unwrap()[..], b"field");
        assert_eq!(store.hkeys("h").unwrap(), vec![long]);
    }

    #[test]
    fn test_lock_sits_beside_root_with_trailing_separator() {
        let dir = TempDir::new().unwrap();
        let mut store = FsStore::new(format!("{}/", dir.path().join("db").display()));
        assert_eq!(store.lock_path, dir.path().join("db.lock"));

        store.open().unwrap();
        store.set("a", b"1").unwrap();
        store.flush_db();
        assert!(!dir.path().join("db").exists());
        assert!(dir.path().join("db.lock").is_file());
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let (_dir, store) = open_store();
        store.set("a", b"1").unwrap();
        store.hset("h", "f", b"2").unwrap();
        let stray: Vec<_> = fs::read_dir(store.root())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(stray.is_empty());
    }

    #[test]
    fn test_concurrent_writers_keep_types_disjoint() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("db");

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let root = root.clone();
                std::thread::spawn(move || {
                    let mut store = FsStore::new(root);
                    store.open().unwrap();
                    if i % 2 == 0 {
                        let _ = store.set("contested", b"scalar");
                    } else {
                        let _ = store.hset("contested", "f", b"hash");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let is_scalar = root.join("scalars/contested").exists();
        let is_hash = root.join("hashes/contested").exists();
        assert!(is_scalar ^ is_hash);
    }
}
