#![forbid(unsafe_code)]
//! Per-family write-ahead logs a write transaction accumulates between
//! `begin` and `commit` (spec §3.5, §4.8): the `page_log` for non-record
//! pages and one `record_log` per page family for record-page containers.
//!
//! Logs are in-memory, optionally backed by a spill file once the resident
//! entry count crosses a configured threshold. A commit marker file is the
//! crash signal: its presence after a restart means this transaction's
//! logs should be replayed (or discarded) rather than treated as clean.

mod page_log;
mod record_log;

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

pub use page_log::PageLog;
pub use record_log::RecordLog;

use sirix_page::RecordPageContainer;
use sirix_types::{IndirectPageLogKey, PageFamily, PageKey, Result};

const COMMIT_MARKER_FILE: &str = "COMMIT_PENDING";

/// Default resident-entry threshold before a log spills to disk.
pub const DEFAULT_SPILL_THRESHOLD: usize = 4096;

/// The full set of logs a single write transaction accumulates.
pub struct WriteAheadLog {
    page_log: PageLog,
    record_logs: [RecordLog; 5],
    commit_marker_path: Option<PathBuf>,
}

impl WriteAheadLog {
    pub fn new_in_memory() -> Self {
        Self::with_threshold_in_memory(DEFAULT_SPILL_THRESHOLD)
    }

    pub fn with_threshold_in_memory(spill_threshold: usize) -> Self {
        Self {
            page_log: PageLog::new(spill_threshold),
            record_logs: PageFamily::ALL.map(|family| RecordLog::new(family, 0, spill_threshold)),
            commit_marker_path: None,
        }
    }

    /// Opens (or reuses) a directory for spill files and the commit marker,
    /// so this transaction's in-flight state can be found after a crash.
    pub fn open(dir: impl AsRef<Path>, spill_threshold: usize) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let page_log = PageLog::open(dir, spill_threshold)?;
        let mut record_logs = Vec::with_capacity(5);
        for family in PageFamily::ALL {
            record_logs.push(RecordLog::open(dir, family, 0, spill_threshold)?);
        }
        Ok(Self {
            page_log,
            record_logs: record_logs
                .try_into()
                .unwrap_or_else(|_| unreachable!("exactly 5 page families")),
            commit_marker_path: Some(dir.join(COMMIT_MARKER_FILE)),
        })
    }

    fn record_log_mut(&mut self, family: PageFamily) -> &mut RecordLog {
        &mut self.record_logs[family.as_u8() as usize]
    }

    pub fn put_page(&mut self, key: IndirectPageLogKey, bytes: Vec<u8>) -> Result<()> {
        self.page_log.put(key, bytes)
    }

    pub fn get_page(&mut self, key: &IndirectPageLogKey) -> Result<Option<Vec<u8>>> {
        self.page_log.get(key)
    }

    pub fn remove_page(&mut self, key: &IndirectPageLogKey) {
        self.page_log.remove(key)
    }

    pub fn iter_page_keys(&self) -> impl Iterator<Item = &IndirectPageLogKey> {
        self.page_log.iter_keys()
    }

    pub fn put_record(
        &mut self,
        family: PageFamily,
        page_key: PageKey,
        container: RecordPageContainer,
    ) -> Result<()> {
        self.record_log_mut(family).put(page_key, container)
    }

    pub fn get_record(
        &mut self,
        family: PageFamily,
        page_key: PageKey,
    ) -> Result<Option<RecordPageContainer>> {
        self.record_log_mut(family).get(page_key)
    }

    pub fn remove_record(&mut self, family: PageFamily, page_key: PageKey) {
        self.record_log_mut(family).remove(page_key)
    }

    pub fn iter_record_keys(&self, family: PageFamily) -> impl Iterator<Item = &PageKey> {
        self.record_logs[family.as_u8() as usize].iter_keys()
    }

    /// Flushes every resident entry to its spill file, bounding the
    /// transaction's memory footprint right before commit (spec §4.8).
    pub fn to_secondary(&mut self) -> Result<()> {
        self.page_log.spill_all()?;
        for log in &mut self.record_logs {
            log.spill_all()?;
        }
        Ok(())
    }

    /// Writes the crash-signal marker. Must be called before the external
    /// `PageWriter` begins publishing this transaction's pages, so a crash
    /// mid-publish leaves evidence that replay/discard is needed.
    pub fn mark_commit_pending(&self) -> Result<()> {
        if let Some(path) = &self.commit_marker_path {
            OpenOptions::new().write(true).create(true).truncate(true).open(path)?;
        }
        Ok(())
    }

    pub fn commit_marker_present(&self) -> bool {
        self.commit_marker_path
            .as_ref()
            .is_some_and(|path| path.exists())
    }

    /// Discards all logs and the commit marker (spec §4.8: "on close, all
    /// logs are deleted"). Called after a successful commit or an abort.
    pub fn close(&mut self) -> Result<()> {
        self.page_log.clear();
        for log in &mut self.record_logs {
            log.clear();
        }
        if let Some(path) = &self.commit_marker_path {
            if path.exists() {
                fs::remove_file(path)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sirix_page::RecordPage;
    use sirix_types::RevisionNumber;

    #[test]
    fn commit_marker_signals_in_flight_transaction_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let mut wal = WriteAheadLog::open(dir.path(), 10).unwrap();
        assert!(!wal.commit_marker_present());
        wal.mark_commit_pending().unwrap();
        assert!(wal.commit_marker_present());

        let reopened = WriteAheadLog::open(dir.path(), 10).unwrap();
        assert!(reopened.commit_marker_present());
    }

    #[test]
    fn close_clears_logs_and_marker() {
        let dir = tempfile::tempdir().unwrap();
        let mut wal = WriteAheadLog::open(dir.path(), 10).unwrap();
        wal.mark_commit_pending().unwrap();
        wal.put_page(
            IndirectPageLogKey::new(PageFamily::Record, 0, 0, 1),
            b"x".to_vec(),
        )
        .unwrap();
        wal.close().unwrap();
        assert!(!wal.commit_marker_present());
        assert_eq!(wal.iter_page_keys().count(), 0);
    }

    #[test]
    fn record_log_is_isolated_per_family() {
        let mut wal = WriteAheadLog::new_in_memory();
        let container = RecordPageContainer::new(
            RecordPage::empty(PageFamily::Cas, 0, PageKey(1), RevisionNumber(0)),
            RecordPage::empty(PageFamily::Cas, 0, PageKey(1), RevisionNumber(1)),
        );
        wal.put_record(PageFamily::Cas, PageKey(1), container).unwrap();
        assert!(wal.get_record(PageFamily::Record, PageKey(1)).unwrap().is_none());
        assert!(wal.get_record(PageFamily::Cas, PageKey(1)).unwrap().is_some());
    }
}
