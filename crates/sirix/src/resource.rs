use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use sirix_io::{FilePageStore, InMemoryPageStore, PageReader, PageWriter};
use sirix_node_trx::NodeWriteTrx;
use sirix_page_trx::{PageCache, PageReadTrx};
use sirix_types::{Result, RevisionNumber, SirixError};
use sirix_wal::WriteAheadLog;

use crate::config::Config;
use crate::timer::AutoCommitTimer;

const WAL_DIR: &str = "wal";

/// If a commit marker from an interrupted commit is present under
/// `wal_dir`, discards it along with whatever it guarded. `PageWriteTrx`'s
/// commit protocol writes the uber-page reference last, so a crash that
/// leaves the marker behind never left a partially-visible revision — the
/// on-disk uber pointer still names the last commit that actually finished.
/// True replay would need the mid-commit `revision_root` state, which is
/// never itself persisted before the physical write loop runs, so the
/// spec's documented fallback (discard the stale logs, keep reading the
/// last good revision) is what's implemented here (spec §4.8, §8 scenario
/// 6).
fn recover_wal(wal_dir: &Path) -> Result<()> {
    let mut wal = WriteAheadLog::open(wal_dir, sirix_wal::DEFAULT_SPILL_THRESHOLD)?;
    if wal.commit_marker_present() {
        tracing::warn!(dir = %wal_dir.display(), "found commit marker from an interrupted commit; discarding its logs");
        wal.close()?;
    }
    Ok(())
}

/// A [`PageReader`]/[`PageWriter`] pair that can be freshly created at a
/// filesystem path, so [`Database::open`] can construct one without the
/// caller having to build the store by hand. Every production store type
/// (currently just [`FilePageStore`]) implements this; [`InMemoryPageStore`]
/// does not, since it has no path to open — it is built directly and handed
/// to [`Resource::new`] for tests.
pub trait OpenableStore: PageReader + PageWriter + Sized {
    fn open_at(dir: &Path) -> Result<Self>;
}

impl OpenableStore for FilePageStore {
    fn open_at(dir: &Path) -> Result<Self> {
        FilePageStore::open(dir)
    }
}

const SALT_FILE: &str = "SALT";

fn load_or_create_salt(dir: &Path) -> Result<u64> {
    let path = dir.join(SALT_FILE);
    match std::fs::read(&path) {
        Ok(bytes) if bytes.len() == 8 => Ok(u64::from_be_bytes(bytes.try_into().unwrap())),
        Ok(_) => Err(SirixError::Corruption("salt file has unexpected length")),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            use rand::RngCore;
            let salt = rand::rngs::OsRng.next_u64();
            std::fs::write(&path, salt.to_be_bytes())?;
            Ok(salt)
        }
        Err(e) => Err(SirixError::Io(e)),
    }
}

/// A single tree-structured document under management: the page store, the
/// shared page cache, the per-resource integrity salt, and the concurrency
/// gates spec §5 requires (a single writer, a bounded pool of readers).
pub struct Resource<S: PageReader + PageWriter> {
    store: S,
    cache: Arc<PageCache>,
    config: Config,
    salt: u64,
    wal_dir: Option<PathBuf>,
    write_lock: Mutex<()>,
    read_permits: Mutex<usize>,
}

impl<S: PageReader + PageWriter + OpenableStore> Resource<S> {
    /// Opens (creating if absent) the resource rooted at `dir`. Also
    /// performs the commit-marker recovery check (spec §4.8) before handing
    /// the resource back, so a crash mid-commit on a prior run never leaks
    /// into this session.
    pub fn open(dir: impl AsRef<Path>, config: Config) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let salt = load_or_create_salt(dir)?;
        let store = S::open_at(dir)?;
        let wal_dir = dir.join(WAL_DIR);
        recover_wal(&wal_dir)?;
        let mut resource = Self::new(store, salt, config);
        resource.wal_dir = Some(wal_dir);
        Ok(resource)
    }
}

impl<S: PageReader + PageWriter> Resource<S> {
    /// Wraps an already-constructed store (e.g. [`InMemoryPageStore`], or a
    /// [`FilePageStore`] opened by other means) with a fixed integrity salt.
    /// `salt` must be stable across reopens of the same store or every CRC
    /// check on previously written pages will report `Corruption`. Write
    /// transactions opened on a `Resource` built this way use a purely
    /// in-memory write-ahead log; use [`Resource::open`] for the disk-backed
    /// WAL and crash-recovery contract.
    pub fn new(store: S, salt: u64, config: Config) -> Self {
        Self {
            store,
            cache: PageCache::new(),
            config,
            salt,
            wal_dir: None,
            write_lock: Mutex::new(()),
            read_permits: Mutex::new(0),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The underlying store, for callers that need to drive it directly —
    /// e.g. arming [`InMemoryPageStore::crash_after`] in a crash-recovery
    /// test.
    pub fn store(&self) -> &S {
        &self.store
    }

    fn latest_revision(&self) -> Result<RevisionNumber> {
        PageReadTrx::latest_revision(&self.store, &self.cache, self.salt)
    }

    /// Opens the single write transaction for this resource (spec §5: "at
    /// most one write transaction open at a time"). A second call while one
    /// is already open fails immediately with `Concurrency` rather than
    /// blocking — callers that want to wait should retry explicitly.
    pub fn begin_write(&self) -> Result<WriteGuard<'_, S>> {
        let lock = self
            .write_lock
            .try_lock()
            .ok_or(SirixError::Concurrency("a write transaction is already open for this resource"))?;
        let mut trx = NodeWriteTrx::begin(
            &self.store,
            &self.store,
            self.cache.clone(),
            self.config.versioning_policy(),
            self.config.revisions_to_restore,
            self.salt,
            self.config.hash_kind_setting(),
            self.wal_dir.as_deref(),
        )?;
        trx.set_auto_commit_threshold(self.config.auto_commit_threshold());
        let (tick_tx, tick_rx) = mpsc::channel();
        let timer = self
            .config
            .auto_commit_interval()
            .map(|interval| AutoCommitTimer::spawn(interval, tick_tx));
        tracing::debug!("opened write transaction");
        Ok(WriteGuard {
            resource: self,
            _lock: lock,
            trx: Some(trx),
            timer,
            ticks: tick_rx,
        })
    }

    /// Opens a read-only snapshot at the latest committed revision, subject
    /// to the `max_read_trx` admission bound (spec §5, §6.5). Readers never
    /// block on the writer or on each other.
    pub fn begin_read(&self) -> Result<ReadGuard<'_, S>> {
        self.begin_read_at(self.latest_revision()?)
    }

    pub fn begin_read_at(&self, revision: RevisionNumber) -> Result<ReadGuard<'_, S>> {
        {
            let mut permits = self.read_permits.lock();
            if *permits >= self.config.max_read_trx {
                return Err(SirixError::Concurrency("read-transaction admission limit reached"));
            }
            *permits += 1;
        }
        let trx = PageReadTrx::open(
            &self.store,
            self.cache.clone(),
            revision,
            self.salt,
            self.config.versioning_policy(),
            self.config.revisions_to_restore,
        );
        match trx {
            Ok(trx) => Ok(ReadGuard { resource: self, trx: Some(trx) }),
            Err(e) => {
                *self.read_permits.lock() -= 1;
                Err(e)
            }
        }
    }
}

/// A bare in-memory resource, handy for tests that don't want a temp
/// directory (see also [`Resource::open`] for the on-disk path).
pub fn in_memory_resource(config: Config) -> Resource<InMemoryPageStore> {
    use rand::RngCore;
    let salt = rand::rngs::OsRng.next_u64();
    Resource::new(InMemoryPageStore::new(), salt, config)
}

/// The single open write transaction for a [`Resource`]. Releases the
/// resource's write lock on drop, whether or not `commit`/`abort`/`close` was
/// called explicitly. Dropping one with pending mutations and neither
/// `commit` nor an explicit `close`/`abort` silently discards them; call
/// [`WriteGuard::close`] first if the caller needs that surfaced as
/// `SirixError::DirtyOnClose` instead.
pub struct WriteGuard<'r, S: PageReader + PageWriter> {
    resource: &'r Resource<S>,
    _lock: parking_lot::MutexGuard<'r, ()>,
    trx: Option<NodeWriteTrx<'r, S, S>>,
    timer: Option<AutoCommitTimer>,
    ticks: Receiver<()>,
}

impl<'r, S: PageReader + PageWriter> WriteGuard<'r, S> {
    /// Checks whether the `max_time` timer has ticked since the last poll
    /// and, if so, commits the current revision and transparently opens a
    /// fresh write transaction under the same guard (spec §6.5: "max_time"
    /// auto-commit). Call this between logical units of work in a
    /// long-running session; it is also called once from `commit`/`abort`.
    pub fn poll_auto_commit(&mut self) -> Result<()> {
        if self.ticks.try_recv().is_err() {
            return Ok(());
        }
        tracing::debug!("auto-commit timer fired, rolling over write transaction");
        let trx = self.trx.take().expect("transaction is open");
        trx.commit()?;
        let mut next = NodeWriteTrx::begin(
            &self.resource.store,
            &self.resource.store,
            self.resource.cache.clone(),
            self.resource.config.versioning_policy(),
            self.resource.config.revisions_to_restore,
            self.resource.salt,
            self.resource.config.hash_kind_setting(),
            self.resource.wal_dir.as_deref(),
        )?;
        next.set_auto_commit_threshold(self.resource.config.auto_commit_threshold());
        self.trx = Some(next);
        Ok(())
    }

    pub fn commit(mut self) -> Result<RevisionNumber> {
        self.timer.take();
        self.trx.take().expect("transaction is open").commit()
    }

    pub fn abort(mut self) -> Result<()> {
        self.timer.take();
        self.trx.take().expect("transaction is open").abort()
    }

    /// Releases the transaction without committing, reporting
    /// `SirixError::DirtyOnClose` if it still had unpublished mutations.
    pub fn close(mut self) -> Result<()> {
        self.timer.take();
        self.trx.take().expect("transaction is open").close()
    }
}

impl<'r, S: PageReader + PageWriter> std::ops::Deref for WriteGuard<'r, S> {
    type Target = NodeWriteTrx<'r, S, S>;
    fn deref(&self) -> &Self::Target {
        self.trx.as_ref().expect("transaction is open")
    }
}

impl<'r, S: PageReader + PageWriter> std::ops::DerefMut for WriteGuard<'r, S> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.trx.as_mut().expect("transaction is open")
    }
}

/// An admitted read-only snapshot. Releases its admission slot on drop.
pub struct ReadGuard<'r, S: PageReader + PageWriter> {
    resource: &'r Resource<S>,
    trx: Option<PageReadTrx<'r, S>>,
}

impl<'r, S: PageReader + PageWriter> std::ops::Deref for ReadGuard<'r, S> {
    type Target = PageReadTrx<'r, S>;
    fn deref(&self) -> &Self::Target {
        self.trx.as_ref().expect("read transaction is open")
    }
}

impl<'r, S: PageReader + PageWriter> Drop for ReadGuard<'r, S> {
    fn drop(&mut self) {
        self.trx = None;
        *self.resource.read_permits.lock() -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_concurrent_writer_is_rejected() {
        let resource = in_memory_resource(Config::default());
        let first = resource.begin_write().unwrap();
        let err = resource.begin_write().unwrap_err();
        assert!(matches!(err, SirixError::Concurrency(_)));
        first.abort().unwrap();
        assert!(resource.begin_write().is_ok());
    }

    #[test]
    fn writer_and_reader_do_not_contend() {
        let resource = in_memory_resource(Config::default());
        let writer = resource.begin_write().unwrap();
        let reader = resource.begin_read().unwrap();
        assert_eq!(reader.revision(), writer.revision());
    }

    #[test]
    fn read_admission_limit_is_enforced() {
        let mut config = Config::default();
        config.max_read_trx = 1;
        let resource = in_memory_resource(config);
        let _first = resource.begin_read().unwrap();
        let err = resource.begin_read().unwrap_err();
        assert!(matches!(err, SirixError::Concurrency(_)));
    }

    #[test]
    fn dropping_a_reader_frees_its_admission_slot() {
        let mut config = Config::default();
        config.max_read_trx = 1;
        let resource = in_memory_resource(config);
        {
            let _first = resource.begin_read().unwrap();
        }
        assert!(resource.begin_read().is_ok());
    }

    #[test]
    fn write_then_commit_is_visible_to_a_new_reader() {
        let resource = in_memory_resource(Config::default());
        let mut writer = resource.begin_write().unwrap();
        let root = writer.root();
        writer.insert_element_as_first_child(root, None, "a", "").unwrap();
        writer.commit().unwrap();

        let reader = resource.begin_read().unwrap();
        assert_eq!(reader.revision(), RevisionNumber::BOOTSTRAP);
    }
}
