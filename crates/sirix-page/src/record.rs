use std::collections::BTreeMap;

use sirix_types::page::{PageHeader, PageKind, PAGE_HDR_LEN};
use sirix_types::{page_crc32, PageFamily, PageKey, PageReference, Result, RevisionNumber, SirixError};

/// A bounded-capacity `node_key -> record` page (spec §3.2). `entries` is
/// keyed by the in-page slot offset (`node_key & (RECORD_PAGE_CAPACITY-1)`),
/// not the absolute node key. A `None` entry is an explicit tombstone
/// recorded by this page's delta — distinct from a slot simply absent from
/// the map, which means "unchanged, consult an earlier version".
#[derive(Clone, Debug, PartialEq)]
pub struct RecordPage {
    pub family: PageFamily,
    pub index: u8,
    pub page_key: PageKey,
    pub revision: RevisionNumber,
    /// For Differential policy: the milestone this page deltas against. For
    /// Incremental: the immediately prior version. `None` for a Full page
    /// or the very first version of a page.
    pub previous: Option<PageReference>,
    pub entries: BTreeMap<u64, Option<Vec<u8>>>,
}

impl RecordPage {
    pub fn empty(family: PageFamily, index: u8, page_key: PageKey, revision: RevisionNumber) -> Self {
        Self {
            family,
            index,
            page_key,
            revision,
            previous: None,
            entries: BTreeMap::new(),
        }
    }

    pub fn get(&self, offset: u64) -> Option<&[u8]> {
        self.entries.get(&offset).and_then(|slot| slot.as_deref())
    }

    pub fn put(&mut self, offset: u64, record: Vec<u8>) {
        self.entries.insert(offset, Some(record));
    }

    pub fn remove(&mut self, offset: u64) {
        self.entries.insert(offset, None);
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, &[u8])> {
        self.entries
            .iter()
            .filter_map(|(k, v)| v.as_deref().map(|bytes| (*k, bytes)))
    }

    pub fn encode(&self, salt: u64) -> Vec<u8> {
        let mut payload = Vec::new();
        match self.previous {
            Some(r) => {
                payload.push(1);
                payload.extend_from_slice(&r.key.unwrap_or(0).to_be_bytes());
            }
            None => payload.push(0),
        }
        payload.extend_from_slice(&(self.entries.len() as u32).to_be_bytes());
        for (offset, slot) in &self.entries {
            payload.extend_from_slice(&offset.to_be_bytes());
            match slot {
                Some(bytes) => {
                    payload.push(1);
                    payload.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
                    payload.extend_from_slice(bytes);
                }
                None => payload.push(0),
            }
        }

        let mut buf = vec![0u8; PAGE_HDR_LEN];
        let header = PageHeader::new(
            PageKind::Record,
            self.family,
            self.index,
            0,
            self.revision.0,
            salt,
        );
        header.encode(&mut buf).expect("header buffer sized correctly");
        buf.extend_from_slice(&payload);
        let crc = page_crc32(self.page_key.0, salt, &buf);
        buf[sirix_types::page::header::CRC32].copy_from_slice(&crc.to_be_bytes());
        buf
    }

    pub fn decode(page_key: PageKey, bytes: &[u8], salt: u64) -> Result<Self> {
        if bytes.len() < PAGE_HDR_LEN {
            return Err(SirixError::Corruption("record page truncated"));
        }
        let header = PageHeader::decode(&bytes[..PAGE_HDR_LEN])?;
        if header.kind != PageKind::Record {
            return Err(SirixError::Corruption("record page kind mismatch"));
        }
        let mut scratch = bytes.to_vec();
        sirix_types::page::clear_crc32(&mut scratch[..PAGE_HDR_LEN])?;
        if page_crc32(page_key.0, salt, &scratch) != header.crc32 {
            return Err(SirixError::Corruption("record page crc mismatch"));
        }

        let mut pos = PAGE_HDR_LEN;
        let has_previous = read_u8(bytes, &mut pos)?;
        let previous = if has_previous == 1 {
            let key = read_u64(bytes, &mut pos)?;
            Some(PageReference {
                key: Some(key),
                log_key: None,
            })
        } else {
            None
        };
        let count = read_u32(bytes, &mut pos)? as usize;
        let mut entries = BTreeMap::new();
        for _ in 0..count {
            let offset = read_u64(bytes, &mut pos)?;
            let present = read_u8(bytes, &mut pos)?;
            let slot = if present == 1 {
                let len = read_u32(bytes, &mut pos)? as usize;
                if pos + len > bytes.len() {
                    return Err(SirixError::Corruption("record page entry truncated"));
                }
                let value = bytes[pos..pos + len].to_vec();
                pos += len;
                Some(value)
            } else {
                None
            };
            entries.insert(offset, slot);
        }

        Ok(Self {
            family: header.family,
            index: header.index,
            page_key,
            revision: RevisionNumber(header.revision),
            previous,
            entries,
        })
    }
}

fn read_u8(bytes: &[u8], pos: &mut usize) -> Result<u8> {
    if *pos + 1 > bytes.len() {
        return Err(SirixError::Corruption("record page truncated"));
    }
    let v = bytes[*pos];
    *pos += 1;
    Ok(v)
}

fn read_u32(bytes: &[u8], pos: &mut usize) -> Result<u32> {
    if *pos + 4 > bytes.len() {
        return Err(SirixError::Corruption("record page truncated"));
    }
    let v = u32::from_be_bytes(bytes[*pos..*pos + 4].try_into().unwrap());
    *pos += 4;
    Ok(v)
}

fn read_u64(bytes: &[u8], pos: &mut usize) -> Result<u64> {
    if *pos + 8 > bytes.len() {
        return Err(SirixError::Corruption("record page truncated"));
    }
    let v = u64::from_be_bytes(bytes[*pos..*pos + 8].try_into().unwrap());
    *pos += 8;
    Ok(v)
}

/// Pairs the fully materialized pre-image of a record page with the
/// transaction's working delta (spec §4.2). All writes target `modified`;
/// reads consult `modified` first, falling back to `complete`.
#[derive(Clone, Debug)]
pub struct RecordPageContainer {
    pub complete: RecordPage,
    pub modified: RecordPage,
}

impl RecordPageContainer {
    pub fn new(complete: RecordPage, modified: RecordPage) -> Self {
        Self { complete, modified }
    }

    pub fn get(&self, offset: u64) -> Option<&[u8]> {
        match self.modified.entries.get(&offset) {
            Some(Some(bytes)) => Some(bytes),
            Some(None) => None,
            None => self.complete.get(offset),
        }
    }

    /// `true` when `offset` is present in the reconstructed pre-image, i.e.
    /// a `prepare_entry_for_modification` call may copy it up.
    pub fn contains_in_complete(&self, offset: u64) -> bool {
        self.complete.get(offset).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_page_round_trips_entries_and_tombstones() {
        let mut page = RecordPage::empty(PageFamily::Record, 0, PageKey(3), RevisionNumber(1));
        page.put(5, b"alice".to_vec());
        page.put(6, b"bob".to_vec());
        page.remove(6);
        let bytes = page.encode(0xBEEF);
        let decoded = RecordPage::decode(PageKey(3), &bytes, 0xBEEF).unwrap();
        assert_eq!(decoded.get(5), Some(&b"alice"[..]));
        assert_eq!(decoded.get(6), None);
        assert!(decoded.entries.contains_key(&6));
    }

    #[test]
    fn container_prefers_modified_over_complete() {
        let mut complete = RecordPage::empty(PageFamily::Record, 0, PageKey(0), RevisionNumber(1));
        complete.put(1, b"old".to_vec());
        let mut modified = RecordPage::empty(PageFamily::Record, 0, PageKey(0), RevisionNumber(2));
        modified.put(1, b"new".to_vec());
        let container = RecordPageContainer::new(complete, modified);
        assert_eq!(container.get(1), Some(&b"new"[..]));
    }

    #[test]
    fn salt_mismatch_is_detected_as_corruption() {
        let page = RecordPage::empty(PageFamily::Record, 0, PageKey(0), RevisionNumber(1));
        let bytes = page.encode(1);
        let err = RecordPage::decode(PageKey(0), &bytes, 2).unwrap_err();
        assert!(matches!(err, SirixError::Corruption(_)));
    }
}
