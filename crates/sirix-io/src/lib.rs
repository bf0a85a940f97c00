#![forbid(unsafe_code)]
//! Reference implementations of the two narrow interfaces the core storage
//! engine consumes (spec §6.1, §6.2): [`PageReader`] and [`PageWriter`].
//!
//! The core never depends on these concrete types directly — only on the
//! traits — but a complete, testable crate needs at least one real
//! implementation to exercise end-to-end commit/read round trips and crash
//! recovery. [`FilePageStore`] is a single-file, offset-addressed
//! implementation; [`InMemoryPageStore`] is a test double with fault
//! injection for simulating a crash mid-commit.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use sirix_types::{compute_crc32, PageReference, Result, SirixError};

/// Resolves a persisted page by its physical key, and locates the uber-page
/// reference that roots the most recently published revision.
pub trait PageReader: Send + Sync {
    /// Reads the current uber-page reference. Returns `PageReference::NULL`
    /// on a freshly bootstrapped resource.
    fn read_uber_page_reference(&self) -> Result<PageReference>;
    /// Resolves a persisted page's bytes by its physical key.
    fn read(&self, key: u64) -> Result<Vec<u8>>;
}

/// Persists a page given a reference, assigning its physical key on return.
pub trait PageWriter: Send + Sync {
    /// Serializes `bytes` and assigns `reference.key`.
    fn write(&self, reference: &mut PageReference, bytes: &[u8]) -> Result<()>;
    /// Atomically publishes a new uber-page reference. Must leave the
    /// previous uber-page discoverable if the process dies mid-call.
    fn write_uber_page_reference(&self, reference: &PageReference) -> Result<()>;
    /// Flushes all buffered writes to stable storage.
    fn close(&self) -> Result<()>;
}

const FRAME_LEN_PREFIX: usize = 4;
const FRAME_CRC_SUFFIX: usize = 4;
const UBER_POINTER_FILE: &str = "UBER";
const DATA_FILE: &str = "data";

/// Single-file, append-only [`PageReader`]/[`PageWriter`] addressing pages
/// by file offset, per the on-disk layout contracted in spec §6.3. The
/// uber-page pointer lives in a small sibling file published via
/// write-to-temp-then-rename so a crash mid-publish leaves the previous
/// pointer intact.
pub struct FilePageStore {
    data: Mutex<File>,
    dir: PathBuf,
    append_offset: AtomicU64,
}

impl FilePageStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        let data_path = dir.join(DATA_FILE);
        let mut data = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&data_path)?;
        let len = data.seek(SeekFrom::End(0))?;
        Ok(Self {
            data: Mutex::new(data),
            dir,
            append_offset: AtomicU64::new(len),
        })
    }

    fn uber_path(&self) -> PathBuf {
        self.dir.join(UBER_POINTER_FILE)
    }
}

impl PageReader for FilePageStore {
    fn read_uber_page_reference(&self) -> Result<PageReference> {
        let path = self.uber_path();
        let mut file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(PageReference::NULL),
            Err(e) => return Err(SirixError::Io(e)),
        };
        let mut buf = [0u8; 12];
        file.read_exact(&mut buf)?;
        let key = u64::from_be_bytes(buf[0..8].try_into().unwrap());
        let crc = u32::from_be_bytes(buf[8..12].try_into().unwrap());
        if compute_crc32(&[&buf[0..8]]) != crc {
            return Err(SirixError::Corruption("uber pointer crc mismatch"));
        }
        Ok(PageReference {
            key: Some(key),
            log_key: None,
        })
    }

    fn read(&self, key: u64) -> Result<Vec<u8>> {
        let mut guard = self.data.lock();
        guard.seek(SeekFrom::Start(key))?;
        let mut len_buf = [0u8; FRAME_LEN_PREFIX];
        guard.read_exact(&mut len_buf)?;
        let len = u32::from_be_bytes(len_buf) as usize;
        let mut payload = vec![0u8; len];
        guard.read_exact(&mut payload)?;
        let mut crc_buf = [0u8; FRAME_CRC_SUFFIX];
        guard.read_exact(&mut crc_buf)?;
        let crc = u32::from_be_bytes(crc_buf);
        if compute_crc32(&[&payload]) != crc {
            return Err(SirixError::Corruption("page frame crc mismatch"));
        }
        Ok(payload)
    }
}

impl PageWriter for FilePageStore {
    fn write(&self, reference: &mut PageReference, bytes: &[u8]) -> Result<()> {
        let crc = compute_crc32(&[bytes]);
        let offset = self
            .append_offset
            .fetch_add((FRAME_LEN_PREFIX + bytes.len() + FRAME_CRC_SUFFIX) as u64, Ordering::SeqCst);
        let mut guard = self.data.lock();
        guard.seek(SeekFrom::Start(offset))?;
        guard.write_all(&(bytes.len() as u32).to_be_bytes())?;
        guard.write_all(bytes)?;
        guard.write_all(&crc.to_be_bytes())?;
        reference.key = Some(offset);
        Ok(())
    }

    fn write_uber_page_reference(&self, reference: &PageReference) -> Result<()> {
        let key = reference
            .key
            .ok_or(SirixError::Usage("uber page reference has no physical key"))?;
        let mut buf = [0u8; 12];
        buf[0..8].copy_from_slice(&key.to_be_bytes());
        let crc = compute_crc32(&[&buf[0..8]]);
        buf[8..12].copy_from_slice(&crc.to_be_bytes());

        let tmp_path = self.dir.join(format!("{UBER_POINTER_FILE}.tmp"));
        {
            let mut tmp = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)?;
            tmp.write_all(&buf)?;
            tmp.sync_all()?;
        }
        std::fs::rename(&tmp_path, self.uber_path())?;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.data.lock().sync_all()?;
        Ok(())
    }
}

/// In-memory [`PageReader`]/[`PageWriter`] test double. Supports injecting a
/// crash after a fixed number of physical writes to exercise the
/// crash-recovery invariant (spec §8 scenario 6) without an actual process
/// kill.
#[derive(Default)]
pub struct InMemoryPageStore {
    inner: Mutex<InMemoryState>,
}

#[derive(Default)]
struct InMemoryState {
    pages: HashMap<u64, Vec<u8>>,
    uber: Option<u64>,
    next_key: u64,
    writes_remaining: Option<u64>,
}

impl InMemoryPageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Causes the `n`th subsequent physical page write to succeed but the
    /// following write call (of either kind) to fail with `SirixError::Io`,
    /// simulating a process crash mid-commit.
    pub fn crash_after(&self, n: u64) {
        self.inner.lock().writes_remaining = Some(n);
    }

    fn tick(&self, state: &mut InMemoryState) -> Result<()> {
        if let Some(remaining) = state.writes_remaining.as_mut() {
            if *remaining == 0 {
                return Err(SirixError::Io(std::io::Error::other("simulated crash")));
            }
            *remaining -= 1;
        }
        Ok(())
    }
}

impl PageReader for InMemoryPageStore {
    fn read_uber_page_reference(&self) -> Result<PageReference> {
        let state = self.inner.lock();
        Ok(match state.uber {
            Some(key) => PageReference {
                key: Some(key),
                log_key: None,
            },
            None => PageReference::NULL,
        })
    }

    fn read(&self, key: u64) -> Result<Vec<u8>> {
        let state = self.inner.lock();
        state
            .pages
            .get(&key)
            .cloned()
            .ok_or(SirixError::NotFound("page"))
    }
}

impl PageWriter for InMemoryPageStore {
    fn write(&self, reference: &mut PageReference, bytes: &[u8]) -> Result<()> {
        let mut state = self.inner.lock();
        self.tick(&mut state)?;
        let key = state.next_key;
        state.next_key += 1;
        state.pages.insert(key, bytes.to_vec());
        reference.key = Some(key);
        Ok(())
    }

    fn write_uber_page_reference(&self, reference: &PageReference) -> Result<()> {
        let mut state = self.inner.lock();
        self.tick(&mut state)?;
        state.uber = reference.key;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_store_round_trips_pages_and_uber_pointer() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilePageStore::open(dir.path()).unwrap();
        let mut reference = PageReference::NULL;
        store.write(&mut reference, b"hello page").unwrap();
        let read_back = store.read(reference.key.unwrap()).unwrap();
        assert_eq!(read_back, b"hello page");

        assert!(store.read_uber_page_reference().unwrap().is_null());
        store.write_uber_page_reference(&reference).unwrap();
        let reopened = FilePageStore::open(dir.path()).unwrap();
        let uber = reopened.read_uber_page_reference().unwrap();
        assert_eq!(uber.key, reference.key);
    }

    #[test]
    fn file_store_detects_corrupted_frame() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilePageStore::open(dir.path()).unwrap();
        let mut reference = PageReference::NULL;
        store.write(&mut reference, b"payload").unwrap();
        drop(store);

        let data_path = dir.path().join(DATA_FILE);
        let mut bytes = std::fs::read(&data_path).unwrap();
        let mutate_at = FRAME_LEN_PREFIX;
        bytes[mutate_at] ^= 0xFF;
        std::fs::write(&data_path, bytes).unwrap();

        let reopened = FilePageStore::open(dir.path()).unwrap();
        let err = reopened.read(reference.key.unwrap()).unwrap_err();
        assert!(matches!(err, SirixError::Corruption(_)));
    }

    #[test]
    fn in_memory_store_simulates_crash_mid_commit() {
        let store = InMemoryPageStore::new();
        let mut first = PageReference::NULL;
        store.write(&mut first, b"a").unwrap();
        store.crash_after(0);
        let mut second = PageReference::NULL;
        let err = store.write(&mut second, b"b").unwrap_err();
        assert!(matches!(err, SirixError::Io(_)));
        assert!(store.read(first.key.unwrap()).is_ok());
    }
}
