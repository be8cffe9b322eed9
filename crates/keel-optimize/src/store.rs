//! Durable storage for demonstration configurations.
//!
//! Writes are atomic: a loader sees either the previous blob or the new
//! one, never a partial write. Concurrent savers to the same key race with
//! last-writer-wins.

use std::{
    collections::HashMap,
    fs,
    io::Write,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use tracing::{debug, info};

use keel_contracts::{
    demo::DemoConfiguration,
    error::{KeelError, KeelResult},
};

/// A keyed byte store.
pub trait BlobStore: Send + Sync {
    /// Store `bytes` under `key`, returning where they landed.
    fn save(&self, key: &str, bytes: &[u8]) -> KeelResult<String>;

    /// `None` when nothing was ever saved under `key`.
    fn load(&self, key: &str) -> KeelResult<Option<Vec<u8>>>;
}

fn persistence(reason: impl Into<String>) -> KeelError {
    KeelError::Persistence { reason: reason.into() }
}

/// Keys become file names, so they are restricted to a safe alphabet.
fn check_key(key: &str) -> KeelResult<()> {
    let ok = !key.is_empty()
        && !key.starts_with('.')
        && key.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if ok {
        Ok(())
    } else {
        Err(persistence(format!("invalid key '{key}': use letters, digits, '_', '-' or '.'")))
    }
}

/// One JSON file per key under a root directory.
#[derive(Debug, Clone)]
pub struct FileBlobStore {
    root: PathBuf,
}

impl FileBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }
}

impl BlobStore for FileBlobStore {
    fn save(&self, key: &str, bytes: &[u8]) -> KeelResult<String> {
        check_key(key)?;
        fs::create_dir_all(&self.root)
            .map_err(|e| persistence(format!("cannot create {}: {e}", self.root.display())))?;

        let target = self.path_for(key);
        let temp = self.root.join(format!(".{key}.{}.tmp", uuid::Uuid::new_v4()));
        write_atomic(&temp, &target, bytes)?;

        debug!(key, path = %target.display(), bytes = bytes.len(), "blob saved");
        Ok(target.display().to_string())
    }

    fn load(&self, key: &str) -> KeelResult<Option<Vec<u8>>> {
        check_key(key)?;
        let path = self.path_for(key);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(persistence(format!("cannot read {}: {e}", path.display()))),
        }
    }
}

fn write_atomic(temp: &Path, target: &Path, bytes: &[u8]) -> KeelResult<()> {
    let written = fs::File::create(temp)
        .and_then(|mut f| {
            f.write_all(bytes)?;
            f.sync_all()
        })
        .and_then(|()| fs::rename(temp, target));

    if let Err(e) = written {
        let _ = fs::remove_file(temp);
        return Err(persistence(format!("cannot write {}: {e}", target.display())));
    }
    Ok(())
}

/// A process-local store, mostly for tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBlobStore {
    blobs: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobStore for InMemoryBlobStore {
    fn save(&self, key: &str, bytes: &[u8]) -> KeelResult<String> {
        check_key(key)?;
        self.blobs
            .lock()
            .map_err(|_| persistence("blob store lock poisoned"))?
            .insert(key.to_string(), bytes.to_vec());
        Ok(format!("memory://{key}"))
    }

    fn load(&self, key: &str) -> KeelResult<Option<Vec<u8>>> {
        check_key(key)?;
        let blobs = self.blobs.lock().map_err(|_| persistence("blob store lock poisoned"))?;
        Ok(blobs.get(key).cloned())
    }
}

/// Persist `config` as pretty JSON under `key`.
pub fn save_configuration(store: &dyn BlobStore, key: &str, config: &DemoConfiguration) -> KeelResult<String> {
    let bytes = serde_json::to_vec_pretty(config)
        .map_err(|e| persistence(format!("cannot serialize configuration: {e}")))?;
    let location = store.save(key, &bytes)?;
    info!(key, location = %location, demos = config.demos.len(), score = config.score, "configuration saved");
    Ok(location)
}

/// Load the configuration saved under `key`, if any.
///
/// A missing key is `Ok(None)`: callers run with zero demonstrations. A
/// blob that does not deserialize is an error.
pub fn load_configuration(store: &dyn BlobStore, key: &str) -> KeelResult<Option<DemoConfiguration>> {
    let Some(bytes) = store.load(key)? else {
        debug!(key, "no saved configuration");
        return Ok(None);
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| persistence(format!("configuration '{key}' is unreadable: {e}")))
}
