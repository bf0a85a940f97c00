use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use rustc_hash::FxHashMap;
use sirix_types::{compute_crc32, IndirectPageLogKey, Result, SirixError};

const SPILL_MAGIC: &[u8; 4] = b"SWPL";

enum Slot {
    Resident(Vec<u8>),
    Spilled { offset: u64, len: u32 },
}

/// The transaction-scoped `page_log` (spec §3.5, §4.8): every non-record
/// page a write transaction has prepared this commit, keyed by its routing
/// coordinates. Once the resident entry count exceeds `spill_threshold`,
/// the least-recently-put entries are appended to a frame file and replaced
/// with a pointer, bounding the transaction's memory footprint.
pub struct PageLog {
    slots: FxHashMap<IndirectPageLogKey, Slot>,
    insertion_order: Vec<IndirectPageLogKey>,
    spill_threshold: usize,
    spill_file: Option<File>,
}

impl PageLog {
    pub fn new(spill_threshold: usize) -> Self {
        Self {
            slots: HashMap::default(),
            insertion_order: Vec::new(),
            spill_threshold,
            spill_file: None,
        }
    }

    pub fn open(dir: impl AsRef<Path>, spill_threshold: usize) -> Result<Self> {
        let path = dir.as_ref().join("page_log.spill");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        let mut log = Self::new(spill_threshold);
        log.spill_file = Some(file);
        Ok(log)
    }

    pub fn put(&mut self, key: IndirectPageLogKey, bytes: Vec<u8>) -> Result<()> {
        if !self.slots.contains_key(&key) {
            self.insertion_order.push(key);
        }
        self.slots.insert(key, Slot::Resident(bytes));
        self.spill_if_needed()
    }

    pub fn get(&mut self, key: &IndirectPageLogKey) -> Result<Option<Vec<u8>>> {
        match self.slots.get(key) {
            Some(Slot::Resident(bytes)) => Ok(Some(bytes.clone())),
            Some(Slot::Spilled { offset, len }) => {
                let (offset, len) = (*offset, *len);
                Ok(Some(self.read_spilled(offset, len)?))
            }
            None => Ok(None),
        }
    }

    pub fn remove(&mut self, key: &IndirectPageLogKey) {
        self.slots.remove(key);
        self.insertion_order.retain(|k| k != key);
    }

    pub fn iter_keys(&self) -> impl Iterator<Item = &IndirectPageLogKey> {
        self.slots.keys()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.insertion_order.clear();
    }

    fn resident_count(&self) -> usize {
        self.slots
            .values()
            .filter(|s| matches!(s, Slot::Resident(_)))
            .count()
    }

    /// Forces every resident entry to the spill file regardless of
    /// threshold (spec §4.8 `to_secondary`), bounding memory ahead of
    /// commit.
    pub fn spill_all(&mut self) -> Result<()> {
        self.spill_threshold = 0;
        self.spill_if_needed()
    }

    fn spill_if_needed(&mut self) -> Result<()> {
        if self.spill_file.is_none() || self.resident_count() <= self.spill_threshold {
            return Ok(());
        }
        let candidates: Vec<IndirectPageLogKey> = self
            .insertion_order
            .iter()
            .filter(|k| matches!(self.slots.get(*k), Some(Slot::Resident(_))))
            .take(self.resident_count() - self.spill_threshold)
            .copied()
            .collect();
        for key in candidates {
            if let Some(Slot::Resident(bytes)) = self.slots.remove(&key) {
                let (offset, len) = self.append_frame(&bytes)?;
                self.slots.insert(key, Slot::Spilled { offset, len });
            }
        }
        Ok(())
    }

    fn append_frame(&mut self, bytes: &[u8]) -> Result<(u64, u32)> {
        let file = self
            .spill_file
            .as_mut()
            .expect("spill_if_needed only called when spill_file is set");
        let offset = file.seek(SeekFrom::End(0))?;
        let crc = compute_crc32(&[bytes]);
        file.write_all(SPILL_MAGIC)?;
        file.write_all(&(bytes.len() as u32).to_be_bytes())?;
        file.write_all(bytes)?;
        file.write_all(&crc.to_be_bytes())?;
        Ok((offset, bytes.len() as u32))
    }

    fn read_spilled(&mut self, offset: u64, len: u32) -> Result<Vec<u8>> {
        let file = self
            .spill_file
            .as_mut()
            .ok_or(SirixError::Corruption("spilled page_log entry with no spill file"))?;
        file.seek(SeekFrom::Start(offset))?;
        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != SPILL_MAGIC {
            return Err(SirixError::Corruption("page_log spill frame magic mismatch"));
        }
        let mut len_buf = [0u8; 4];
        file.read_exact(&mut len_buf)?;
        if u32::from_be_bytes(len_buf) != len {
            return Err(SirixError::Corruption("page_log spill frame length mismatch"));
        }
        let mut payload = vec![0u8; len as usize];
        file.read_exact(&mut payload)?;
        let mut crc_buf = [0u8; 4];
        file.read_exact(&mut crc_buf)?;
        if compute_crc32(&[&payload]) != u32::from_be_bytes(crc_buf) {
            return Err(SirixError::Corruption("page_log spill frame crc mismatch"));
        }
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sirix_types::PageFamily;

    fn key(offset: u64) -> IndirectPageLogKey {
        IndirectPageLogKey::new(PageFamily::Record, 0, 0, offset)
    }

    #[test]
    fn put_and_get_round_trips_resident_entries() {
        let mut log = PageLog::new(100);
        log.put(key(1), b"hello".to_vec()).unwrap();
        assert_eq!(log.get(&key(1)).unwrap(), Some(b"hello".to_vec()));
    }

    #[test]
    fn entries_beyond_threshold_spill_and_remain_readable() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = PageLog::open(dir.path(), 2).unwrap();
        for i in 0..5 {
            log.put(key(i), format!("page-{i}").into_bytes()).unwrap();
        }
        assert!(log.resident_count() <= 2);
        for i in 0..5 {
            assert_eq!(
                log.get(&key(i)).unwrap(),
                Some(format!("page-{i}").into_bytes())
            );
        }
    }

    #[test]
    fn remove_drops_an_entry() {
        let mut log = PageLog::new(10);
        log.put(key(1), b"a".to_vec()).unwrap();
        log.remove(&key(1));
        assert_eq!(log.get(&key(1)).unwrap(), None);
    }
}
