use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use rustc_hash::FxHashMap;
use sirix_page::{RecordPage, RecordPageContainer};
use sirix_types::{PageFamily, PageKey, Result, SirixError};

const SPILL_MAGIC: &[u8; 4] = b"SWRL";
/// Salt the record log uses for its own spill-frame CRCs. Unrelated to the
/// resource-wide page store salt — this data never outlives the process.
const WAL_SALT: u64 = 0;

enum Slot {
    Resident(RecordPageContainer),
    Spilled { offset: u64, complete_len: u32, modified_len: u32 },
}

/// One family's `record_log` (spec §3.5, §4.8): `page_key -> RecordPageContainer`
/// for every record page a write transaction has touched this commit.
pub struct RecordLog {
    family: PageFamily,
    index: u8,
    slots: FxHashMap<PageKey, Slot>,
    insertion_order: Vec<PageKey>,
    spill_threshold: usize,
    spill_file: Option<File>,
}

impl RecordLog {
    pub fn new(family: PageFamily, index: u8, spill_threshold: usize) -> Self {
        Self {
            family,
            index,
            slots: FxHashMap::default(),
            insertion_order: Vec::new(),
            spill_threshold,
            spill_file: None,
        }
    }

    pub fn open(dir: impl AsRef<Path>, family: PageFamily, index: u8, spill_threshold: usize) -> Result<Self> {
        let path = dir
            .as_ref()
            .join(format!("record_log.{}.{index}.spill", family.as_u8()));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        let mut log = Self::new(family, index, spill_threshold);
        log.spill_file = Some(file);
        Ok(log)
    }

    pub fn put(&mut self, page_key: PageKey, container: RecordPageContainer) -> Result<()> {
        if !self.slots.contains_key(&page_key) {
            self.insertion_order.push(page_key);
        }
        self.slots.insert(page_key, Slot::Resident(container));
        self.spill_if_needed()
    }

    pub fn get(&mut self, page_key: PageKey) -> Result<Option<RecordPageContainer>> {
        match self.slots.get(&page_key) {
            Some(Slot::Resident(container)) => Ok(Some(container.clone())),
            Some(Slot::Spilled {
                offset,
                complete_len,
                modified_len,
            }) => {
                let (offset, complete_len, modified_len) = (*offset, *complete_len, *modified_len);
                Ok(Some(self.read_spilled(page_key, offset, complete_len, modified_len)?))
            }
            None => Ok(None),
        }
    }

    pub fn remove(&mut self, page_key: PageKey) {
        self.slots.remove(&page_key);
        self.insertion_order.retain(|k| *k != page_key);
    }

    pub fn iter_keys(&self) -> impl Iterator<Item = &PageKey> {
        self.slots.keys()
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
    /// threshold (spec §4.8 `to_secondary`).
    pub fn spill_all(&mut self) -> Result<()> {
        self.spill_threshold = 0;
        self.spill_if_needed()
    }

    fn spill_if_needed(&mut self) -> Result<()> {
        if self.spill_file.is_none() || self.resident_count() <= self.spill_threshold {
            return Ok(());
        }
        let candidates: Vec<PageKey> = self
            .insertion_order
            .iter()
            .filter(|k| matches!(self.slots.get(*k), Some(Slot::Resident(_))))
            .take(self.resident_count() - self.spill_threshold)
            .copied()
            .collect();
        for page_key in candidates {
            if let Some(Slot::Resident(container)) = self.slots.remove(&page_key) {
                let slot = self.append_frame(&container)?;
                self.slots.insert(page_key, slot);
            }
        }
        Ok(())
    }

    fn append_frame(&mut self, container: &RecordPageContainer) -> Result<Slot> {
        let complete = container.complete.encode(WAL_SALT);
        let modified = container.modified.encode(WAL_SALT);
        let file = self
            .spill_file
            .as_mut()
            .expect("spill_if_needed only called when spill_file is set");
        let offset = file.seek(SeekFrom::End(0))?;
        file.write_all(SPILL_MAGIC)?;
        file.write_all(&(complete.len() as u32).to_be_bytes())?;
        file.write_all(&complete)?;
        file.write_all(&(modified.len() as u32).to_be_bytes())?;
        file.write_all(&modified)?;
        Ok(Slot::Spilled {
            offset,
            complete_len: complete.len() as u32,
            modified_len: modified.len() as u32,
        })
    }

    fn read_spilled(
        &mut self,
        page_key: PageKey,
        offset: u64,
        complete_len: u32,
        modified_len: u32,
    ) -> Result<RecordPageContainer> {
        let file = self
            .spill_file
            .as_mut()
            .ok_or(SirixError::Corruption("spilled record_log entry with no spill file"))?;
        file.seek(SeekFrom::Start(offset))?;
        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != SPILL_MAGIC {
            return Err(SirixError::Corruption("record_log spill frame magic mismatch"));
        }
        let mut len_buf = [0u8; 4];
        file.read_exact(&mut len_buf)?;
        if u32::from_be_bytes(len_buf) != complete_len {
            return Err(SirixError::Corruption("record_log spill frame length mismatch"));
        }
        let mut complete_bytes = vec![0u8; complete_len as usize];
        file.read_exact(&mut complete_bytes)?;
        file.read_exact(&mut len_buf)?;
        if u32::from_be_bytes(len_buf) != modified_len {
            return Err(SirixError::Corruption("record_log spill frame length mismatch"));
        }
        let mut modified_bytes = vec![0u8; modified_len as usize];
        file.read_exact(&mut modified_bytes)?;

        let complete = RecordPage::decode(page_key, &complete_bytes, WAL_SALT)?;
        let modified = RecordPage::decode(page_key, &modified_bytes, WAL_SALT)?;
        let _ = (self.family, self.index);
        Ok(RecordPageContainer::new(complete, modified))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sirix_types::RevisionNumber;

    fn container(page_key: PageKey) -> RecordPageContainer {
        let mut modified = RecordPage::empty(PageFamily::Record, 0, page_key, RevisionNumber(1));
        modified.put(0, b"v".to_vec());
        RecordPageContainer::new(
            RecordPage::empty(PageFamily::Record, 0, page_key, RevisionNumber(0)),
            modified,
        )
    }

    #[test]
    fn put_and_get_round_trips_resident_entries() {
        let mut log = RecordLog::new(PageFamily::Record, 0, 10);
        log.put(PageKey(1), container(PageKey(1))).unwrap();
        let got = log.get(PageKey(1)).unwrap().unwrap();
        assert_eq!(got.get(0), Some(&b"v"[..]));
    }

    #[test]
    fn entries_beyond_threshold_spill_and_remain_readable() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = RecordLog::open(dir.path(), PageFamily::Record, 0, 1).unwrap();
        for i in 0..4 {
            log.put(PageKey(i), container(PageKey(i))).unwrap();
        }
        for i in 0..4 {
            let got = log.get(PageKey(i)).unwrap().unwrap();
            assert_eq!(got.get(0), Some(&b"v"[..]));
        }
    }
}
