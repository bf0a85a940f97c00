use sirix_types::page::{PageHeader, PageKind, PAGE_HDR_LEN};
use sirix_types::{
    page_crc32, PageFamily, PageReference, Result, RevisionNumber, SirixError,
};

/// Per-revision root: one indirect-tree root reference per page family,
/// plus the node-key/per-index-key allocation counters (spec §3.4).
#[derive(Clone, Debug, PartialEq)]
pub struct RevisionRootPage {
    pub revision: RevisionNumber,
    /// Indexed by `PageFamily::as_u8()`.
    pub family_roots: [PageReference; 5],
    pub max_node_key: u64,
    /// Per-family `max_key` counters (path-summary node keys, path-index
    /// entry keys, CAS entry keys, name-dictionary keys).
    pub max_keys: [u64; 5],
    pub commit_timestamp: u64,
}

impl RevisionRootPage {
    pub fn bootstrap() -> Self {
        Self {
            revision: RevisionNumber::BOOTSTRAP,
            family_roots: [PageReference::NULL; 5],
            max_node_key: 0,
            max_keys: [0; 5],
            commit_timestamp: 0,
        }
    }

    pub fn family_root(&self, family: PageFamily) -> &PageReference {
        &self.family_roots[family.as_u8() as usize]
    }

    pub fn family_root_mut(&mut self, family: PageFamily) -> &mut PageReference {
        &mut self.family_roots[family.as_u8() as usize]
    }

    pub fn max_key(&self, family: PageFamily) -> u64 {
        self.max_keys[family.as_u8() as usize]
    }

    pub fn max_key_mut(&mut self, family: PageFamily) -> &mut u64 {
        &mut self.max_keys[family.as_u8() as usize]
    }

    pub fn encode(&self, physical_key: u64, salt: u64) -> Vec<u8> {
        let mut buf = vec![0u8; PAGE_HDR_LEN];
        let header = PageHeader::new(
            PageKind::RevisionRoot,
            PageFamily::Record,
            0,
            physical_key,
            self.revision.0,
            salt,
        );
        header.encode(&mut buf).expect("header buffer sized correctly");
        for reference in &self.family_roots {
            buf.extend_from_slice(&reference.key.unwrap_or(0).to_be_bytes());
            buf.push(reference.key.is_some() as u8);
        }
        buf.extend_from_slice(&self.max_node_key.to_be_bytes());
        for max_key in &self.max_keys {
            buf.extend_from_slice(&max_key.to_be_bytes());
        }
        buf.extend_from_slice(&self.commit_timestamp.to_be_bytes());
        let crc = page_crc32(physical_key, salt, &buf);
        buf[sirix_types::page::header::CRC32].copy_from_slice(&crc.to_be_bytes());
        buf
    }

    pub fn decode(bytes: &[u8], salt: u64) -> Result<Self> {
        let header = PageHeader::decode(bytes)?;
        if header.kind != PageKind::RevisionRoot {
            return Err(SirixError::Corruption("revision root page kind mismatch"));
        }
        let mut scratch = bytes.to_vec();
        sirix_types::page::clear_crc32(&mut scratch[..PAGE_HDR_LEN])?;
        if page_crc32(header.physical_key, salt, &scratch) != header.crc32 {
            return Err(SirixError::Corruption("revision root page crc mismatch"));
        }
        let mut pos = PAGE_HDR_LEN;
        let mut family_roots = [PageReference::NULL; 5];
        for slot in family_roots.iter_mut() {
            let key = read_u64(bytes, &mut pos)?;
            let present = read_u8(bytes, &mut pos)? == 1;
            *slot = PageReference {
                key: present.then_some(key),
                log_key: None,
            };
        }
        let max_node_key = read_u64(bytes, &mut pos)?;
        let mut max_keys = [0u64; 5];
        for slot in max_keys.iter_mut() {
            *slot = read_u64(bytes, &mut pos)?;
        }
        let commit_timestamp = read_u64(bytes, &mut pos)?;
        Ok(Self {
            revision: RevisionNumber(header.revision),
            family_roots,
            max_node_key,
            max_keys,
            commit_timestamp,
        })
    }
}

/// The single top-level page whose write publishes a new revision
/// (spec §3.4, glossary). Holds the indirect tree of revision-root pages
/// keyed by revision number.
#[derive(Clone, Debug, PartialEq)]
pub struct UberPage {
    pub revision_tree_root: PageReference,
    pub current_revision: RevisionNumber,
    pub bootstrap: bool,
}

impl UberPage {
    pub fn bootstrap() -> Self {
        Self {
            revision_tree_root: PageReference::NULL,
            current_revision: RevisionNumber::BOOTSTRAP,
            bootstrap: true,
        }
    }

    pub fn encode(&self, physical_key: u64, salt: u64) -> Vec<u8> {
        let mut buf = vec![0u8; PAGE_HDR_LEN];
        let header = PageHeader::new(
            PageKind::Uber,
            PageFamily::Record,
            0,
            physical_key,
            self.current_revision.0,
            salt,
        );
        header.encode(&mut buf).expect("header buffer sized correctly");
        buf.extend_from_slice(&self.revision_tree_root.key.unwrap_or(0).to_be_bytes());
        buf.push(self.revision_tree_root.key.is_some() as u8);
        buf.push(self.bootstrap as u8);
        let crc = page_crc32(physical_key, salt, &buf);
        buf[sirix_types::page::header::CRC32].copy_from_slice(&crc.to_be_bytes());
        buf
    }

    pub fn decode(bytes: &[u8], salt: u64) -> Result<Self> {
        let header = PageHeader::decode(bytes)?;
        if header.kind != PageKind::Uber {
            return Err(SirixError::Corruption("uber page kind mismatch"));
        }
        let mut scratch = bytes.to_vec();
        sirix_types::page::clear_crc32(&mut scratch[..PAGE_HDR_LEN])?;
        if page_crc32(header.physical_key, salt, &scratch) != header.crc32 {
            return Err(SirixError::Corruption("uber page crc mismatch"));
        }
        let mut pos = PAGE_HDR_LEN;
        let key = read_u64(bytes, &mut pos)?;
        let present = read_u8(bytes, &mut pos)? == 1;
        let bootstrap = read_u8(bytes, &mut pos)? == 1;
        Ok(Self {
            revision_tree_root: PageReference {
                key: present.then_some(key),
                log_key: None,
            },
            current_revision: RevisionNumber(header.revision),
            bootstrap,
        })
    }
}

fn read_u8(bytes: &[u8], pos: &mut usize) -> Result<u8> {
    if *pos + 1 > bytes.len() {
        return Err(SirixError::Corruption("revision/uber page truncated"));
    }
    let v = bytes[*pos];
    *pos += 1;
    Ok(v)
}

fn read_u64(bytes: &[u8], pos: &mut usize) -> Result<u64> {
    if *pos + 8 > bytes.len() {
        return Err(SirixError::Corruption("revision/uber page truncated"));
    }
    let v = u64::from_be_bytes(bytes[*pos..*pos + 8].try_into().unwrap());
    *pos += 8;
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revision_root_round_trips_counters_and_roots() {
        let mut root = RevisionRootPage::bootstrap();
        root.max_node_key = 77;
        *root.max_key_mut(PageFamily::Cas) = 3;
        *root.family_root_mut(PageFamily::Record) = PageReference {
            key: Some(123),
            log_key: None,
        };
        let bytes = root.encode(5, 0xFEED);
        let decoded = RevisionRootPage::decode(&bytes, 0xFEED).unwrap();
        assert_eq!(decoded.max_node_key, 77);
        assert_eq!(decoded.max_key(PageFamily::Cas), 3);
        assert_eq!(decoded.family_root(PageFamily::Record).key, Some(123));
    }

    #[test]
    fn uber_page_round_trips() {
        let uber = UberPage {
            revision_tree_root: PageReference {
                key: Some(42),
                log_key: None,
            },
            current_revision: RevisionNumber(9),
            bootstrap: false,
        };
        let bytes = uber.encode(1, 77);
        let decoded = UberPage::decode(&bytes, 77).unwrap();
        assert_eq!(decoded, uber);
    }
}
