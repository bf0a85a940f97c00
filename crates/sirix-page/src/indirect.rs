use sirix_types::page::{PageHeader, PageKind, PAGE_HDR_LEN};
use sirix_types::{
    page_crc32, PageFamily, PageReference, Result, RevisionNumber, SirixError, INDIRECT_FANOUT,
};

/// A fixed-fanout routing page in a family's page-key addressing trie
/// (spec §3.3). `level` is the page's own depth (0 = the level whose slots
/// are leaf [`super::record::RecordPage`] references).
#[derive(Clone, Debug, PartialEq)]
pub struct IndirectPage {
    pub family: PageFamily,
    pub index: u8,
    pub level: u32,
    pub revision: RevisionNumber,
    pub slots: Vec<PageReference>,
}

impl IndirectPage {
    pub fn empty(family: PageFamily, index: u8, level: u32, revision: RevisionNumber) -> Self {
        Self {
            family,
            index,
            level,
            revision,
            slots: vec![PageReference::NULL; INDIRECT_FANOUT as usize],
        }
    }

    pub fn slot(&self, i: usize) -> &PageReference {
        &self.slots[i]
    }

    pub fn slot_mut(&mut self, i: usize) -> &mut PageReference {
        &mut self.slots[i]
    }

    pub fn encode(&self, physical_key: u64, salt: u64) -> Vec<u8> {
        let mut buf = vec![0u8; PAGE_HDR_LEN];
        let header = PageHeader::new(
            PageKind::Indirect,
            self.family,
            self.index,
            physical_key,
            self.revision.0,
            salt,
        );
        header.encode(&mut buf).expect("header buffer sized correctly");
        buf.extend_from_slice(&self.level.to_be_bytes());
        for slot in &self.slots {
            buf.extend_from_slice(&slot.key.unwrap_or(0).to_be_bytes());
            buf.push(slot.key.is_some() as u8);
        }
        let crc = page_crc32(physical_key, salt, &buf);
        buf[sirix_types::page::header::CRC32].copy_from_slice(&crc.to_be_bytes());
        buf
    }

    pub fn decode(bytes: &[u8], salt: u64) -> Result<Self> {
        if bytes.len() < PAGE_HDR_LEN + 4 {
            return Err(SirixError::Corruption("indirect page truncated"));
        }
        let header = PageHeader::decode(&bytes[..PAGE_HDR_LEN])?;
        if header.kind != PageKind::Indirect {
            return Err(SirixError::Corruption("indirect page kind mismatch"));
        }
        let mut scratch = bytes.to_vec();
        sirix_types::page::clear_crc32(&mut scratch[..PAGE_HDR_LEN])?;
        if page_crc32(header.physical_key, salt, &scratch) != header.crc32 {
            return Err(SirixError::Corruption("indirect page crc mismatch"));
        }
        let level = u32::from_be_bytes(bytes[PAGE_HDR_LEN..PAGE_HDR_LEN + 4].try_into().unwrap());
        let mut pos = PAGE_HDR_LEN + 4;
        let mut slots = Vec::with_capacity(INDIRECT_FANOUT as usize);
        for _ in 0..INDIRECT_FANOUT {
            if pos + 9 > bytes.len() {
                return Err(SirixError::Corruption("indirect page slots truncated"));
            }
            let key = u64::from_be_bytes(bytes[pos..pos + 8].try_into().unwrap());
            let present = bytes[pos + 8] == 1;
            slots.push(PageReference {
                key: present.then_some(key),
                log_key: None,
            });
            pos += 9;
        }
        Ok(Self {
            family: header.family,
            index: header.index,
            level,
            revision: RevisionNumber(header.revision),
            slots,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indirect_page_round_trips_slots() {
        let mut page = IndirectPage::empty(PageFamily::PathSummary, 0, 2, RevisionNumber(4));
        *page.slot_mut(7) = PageReference {
            key: Some(999),
            log_key: None,
        };
        let bytes = page.encode(1, 0xCAFE);
        let decoded = IndirectPage::decode(&bytes, 0xCAFE).unwrap();
        assert_eq!(decoded.slot(7).key, Some(999));
        assert!(decoded.slot(0).is_null());
    }
}
