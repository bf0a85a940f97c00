use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use sirix_io::FilePageStore;
use sirix_types::{Result, SirixError};

use crate::config::Config;
use crate::resource::Resource;

/// The process-wide registry of open resources, keyed by resource path (spec
/// §9 Design Notes: "model the page-cache/resource set as an explicit
/// registry, not a global static"). An embedding application typically owns
/// one `Database` for its lifetime; tests construct a fresh one per test
/// instead of relying on process-wide state.
#[derive(Default)]
pub struct Database {
    resources: Mutex<HashMap<PathBuf, Arc<Resource<FilePageStore>>>>,
}

impl Database {
    pub fn new() -> Self {
        Self { resources: Mutex::new(HashMap::new()) }
    }

    /// Opens the resource at `path`, creating it on first use. Subsequent
    /// calls with the same (canonicalized) path return the same `Resource`
    /// instance, so every caller shares one write lock and one page cache.
    pub fn open(&self, path: impl AsRef<Path>, config: Config) -> Result<Arc<Resource<FilePageStore>>> {
        std::fs::create_dir_all(path.as_ref())?;
        let key = path.as_ref().canonicalize()?;
        let mut resources = self.resources.lock();
        if let Some(existing) = resources.get(&key) {
            return Ok(existing.clone());
        }
        let resource = Arc::new(Resource::open(&key, config)?);
        resources.insert(key, resource.clone());
        Ok(resource)
    }

    /// Drops this database's handle to the resource at `path`. The resource
    /// itself stays alive as long as another `Arc` (e.g. a caller mid-write)
    /// holds it; once the last handle drops, its files remain on disk for a
    /// future `open`.
    pub fn close(&self, path: impl AsRef<Path>) -> Result<()> {
        let key = path.as_ref().canonicalize().map_err(SirixError::Io)?;
        self.resources.lock().remove(&key);
        Ok(())
    }

    pub fn is_open(&self, path: impl AsRef<Path>) -> bool {
        match path.as_ref().canonicalize() {
            Ok(key) => self.resources.lock().contains_key(&key),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opening_the_same_path_twice_shares_one_resource() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new();
        let a = db.open(dir.path(), Config::default()).unwrap();
        let b = db.open(dir.path(), Config::default()).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn close_lets_a_later_open_rebuild_the_resource() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new();
        let first = db.open(dir.path(), Config::default()).unwrap();
        drop(first);
        db.close(dir.path()).unwrap();
        assert!(!db.is_open(dir.path()));
        assert!(db.open(dir.path(), Config::default()).is_ok());
    }
}
