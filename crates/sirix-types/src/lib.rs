#![forbid(unsafe_code)]
//! Foundational identifiers, error types, and the on-disk page header shared
//! by every layer of the versioned page-and-node subsystem.

use std::fmt;

pub use sirix_checksum::{compute_crc32, page_crc32};

/// Stable 64-bit identity of a node, unique for the lifetime of a resource.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct NodeKey(pub u64);

/// Key of a fixed-capacity record page: `node_key / RECORD_PAGE_CAPACITY`.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct PageKey(pub u64);

/// Monotonically increasing revision number. Revision 0 is the bootstrap
/// revision created when a resource is first opened.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct RevisionNumber(pub u64);

impl RevisionNumber {
    pub const BOOTSTRAP: RevisionNumber = RevisionNumber(0);

    pub fn next(self) -> RevisionNumber {
        RevisionNumber(self.0 + 1)
    }
}

/// Physical offset assigned to a page by a [`PageWriter`](crate::page) on
/// persist; `None` denotes a page that has never been written.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct PhysicalKey(pub u64);

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for PageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for RevisionNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// One of the five addressable page families (spec §3.2, glossary). Each
/// family owns its own indirect-page tree and record-page capacity counter.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub enum PageFamily {
    /// Ordinary tree nodes.
    Record,
    /// Path-summary tree nodes (§3.6, §4.10).
    PathSummary,
    /// Path index: secondary index keyed by root-to-node path.
    Path,
    /// Content-and-structure (value) index (§3.6).
    Cas,
    /// Name dictionary pages.
    Name,
}

impl PageFamily {
    pub const ALL: [PageFamily; 5] = [
        PageFamily::Record,
        PageFamily::PathSummary,
        PageFamily::Path,
        PageFamily::Cas,
        PageFamily::Name,
    ];

    pub const fn as_u8(self) -> u8 {
        match self {
            PageFamily::Record => 0,
            PageFamily::PathSummary => 1,
            PageFamily::Path => 2,
            PageFamily::Cas => 3,
            PageFamily::Name => 4,
        }
    }

    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(PageFamily::Record),
            1 => Some(PageFamily::PathSummary),
            2 => Some(PageFamily::Path),
            3 => Some(PageFamily::Cas),
            4 => Some(PageFamily::Name),
            _ => None,
        }
    }
}

/// Fixed fanout of every indirect page (spec §3.3: "e.g. 128").
pub const INDIRECT_FANOUT: u32 = 128;
/// `log2(INDIRECT_FANOUT)`.
pub const INDIRECT_FANOUT_SHIFT: u32 = 7;
/// Fixed height of each family's indirect-page tree. Five levels of 128-way
/// fanout address `128^5 * RECORD_PAGE_CAPACITY` node keys, comfortably
/// inside `u64`.
pub const INDIRECT_TREE_HEIGHT: u32 = 5;
/// Bounded capacity of a record page (spec §3.2: "conceptually 256-1024").
pub const RECORD_PAGE_CAPACITY: u64 = 512;
/// `log2(RECORD_PAGE_CAPACITY)`.
pub const RECORD_PAGE_SHIFT: u32 = 9;

/// Splits a node key into its record-page key and the in-page slot offset.
pub fn split_node_key(node_key: NodeKey) -> (PageKey, usize) {
    let page_key = node_key.0 >> RECORD_PAGE_SHIFT;
    let offset = (node_key.0 & (RECORD_PAGE_CAPACITY - 1)) as usize;
    (PageKey(page_key), offset)
}

/// Returns the routing slot index within the indirect page at tree level
/// `level` (0 = page closest to the record-page leaves) for `page_key`.
pub fn indirect_slot(page_key: PageKey, level: u32) -> usize {
    ((page_key.0 >> (level * INDIRECT_FANOUT_SHIFT)) & (INDIRECT_FANOUT as u64 - 1)) as usize
}

/// Identifies a non-record page staged in [`sirix_wal`](../sirix_wal)'s
/// `page_log` during a write transaction: the family it belongs to, which
/// index of that family (0 for the family's sole structure), the tree
/// level, and the full (unshifted) key being routed to at that level (spec
/// §3.5). Keeping the whole key rather than just this level's masked slot
/// lets a write transaction recompute the *parent* level's slot for the
/// same page on the way back up the indirect tree.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct IndirectPageLogKey {
    pub family: PageFamily,
    pub index: u8,
    pub level: u32,
    pub page_key: u64,
}

impl IndirectPageLogKey {
    pub fn new(family: PageFamily, index: u8, level: u32, page_key: u64) -> Self {
        Self {
            family,
            index,
            level,
            page_key,
        }
    }
}

/// A slot inside an indirect page, or the root slot of a revision-root /
/// uber page: a physical key once written, plus the log key used to find
/// the in-flight version while a transaction is open (spec §3.3).
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
pub struct PageReference {
    pub key: Option<u64>,
    pub log_key: Option<IndirectPageLogKey>,
}

impl PageReference {
    pub const NULL: PageReference = PageReference {
        key: None,
        log_key: None,
    };

    pub fn is_null(&self) -> bool {
        self.key.is_none() && self.log_key.is_none()
    }
}

/// Error categories per spec §7. `Usage` and `NotFound` are caller-facing
/// precondition failures; `Io` and `Corruption` surface storage-layer
/// failures; `Concurrency` reports writer/reader admission conflicts.
#[derive(thiserror::Error, Debug)]
pub enum SirixError {
    #[error("usage error: {0}")]
    Usage(&'static str),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corruption: {0}")]
    Corruption(&'static str),
    #[error("concurrency error: {0}")]
    Concurrency(&'static str),
    #[error("duplicate attribute")]
    DuplicateAttribute,
    #[error("cycle forbidden: node is an ancestor of the move target")]
    CycleForbidden,
    #[error("transaction has pending modifications and was closed without commit or abort")]
    DirtyOnClose,
    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, SirixError>;

/// On-disk page header shared by every page kind: record pages, indirect
/// pages, revision-root pages, and the uber page.
pub mod page {
    use super::{PageFamily, Result, SirixError};

    pub const PAGE_MAGIC: [u8; 4] = *b"SIRX";
    pub const PAGE_FORMAT_VERSION: u16 = 1;
    pub const PAGE_HDR_LEN: usize = 40;

    pub mod header {
        use std::ops::Range;

        pub const MAGIC: Range<usize> = 0..4;
        pub const FORMAT_VERSION: Range<usize> = 4..6;
        pub const PAGE_KIND: usize = 6;
        pub const FAMILY: usize = 7;
        pub const INDEX: usize = 8;
        pub const RESERVED: Range<usize> = 9..12;
        pub const PHYSICAL_KEY: Range<usize> = 12..20;
        pub const REVISION: Range<usize> = 20..28;
        pub const SALT: Range<usize> = 28..36;
        pub const CRC32: Range<usize> = 36..40;
    }

    #[repr(u8)]
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub enum PageKind {
        Record = 1,
        Indirect = 2,
        RevisionRoot = 3,
        Uber = 4,
    }

    impl PageKind {
        pub const fn as_u8(self) -> u8 {
            self as u8
        }

        pub const fn from_u8(value: u8) -> Option<Self> {
            match value {
                1 => Some(PageKind::Record),
                2 => Some(PageKind::Indirect),
                3 => Some(PageKind::RevisionRoot),
                4 => Some(PageKind::Uber),
                _ => None,
            }
        }
    }

    /// Fixed header prefixed to every serialized page.
    #[derive(Clone, Debug, Eq, PartialEq)]
    pub struct PageHeader {
        pub format_version: u16,
        pub kind: PageKind,
        pub family: PageFamily,
        pub index: u8,
        pub physical_key: u64,
        pub revision: u64,
        pub salt: u64,
        pub crc32: u32,
    }

    impl PageHeader {
        pub fn new(
            kind: PageKind,
            family: PageFamily,
            index: u8,
            physical_key: u64,
            revision: u64,
            salt: u64,
        ) -> Self {
            Self {
                format_version: PAGE_FORMAT_VERSION,
                kind,
                family,
                index,
                physical_key,
                revision,
                salt,
                crc32: 0,
            }
        }

        pub fn with_crc32(mut self, crc32: u32) -> Self {
            self.crc32 = crc32;
            self
        }

        pub fn encode(&self, dst: &mut [u8]) -> Result<()> {
            if dst.len() < PAGE_HDR_LEN {
                return Err(SirixError::Usage("page header buffer too small"));
            }
            let hdr = &mut dst[..PAGE_HDR_LEN];
            hdr[header::MAGIC].copy_from_slice(&PAGE_MAGIC);
            hdr[header::FORMAT_VERSION].copy_from_slice(&self.format_version.to_be_bytes());
            hdr[header::PAGE_KIND] = self.kind.as_u8();
            hdr[header::FAMILY] = self.family.as_u8();
            hdr[header::INDEX] = self.index;
            hdr[header::RESERVED].fill(0);
            hdr[header::PHYSICAL_KEY].copy_from_slice(&self.physical_key.to_be_bytes());
            hdr[header::REVISION].copy_from_slice(&self.revision.to_be_bytes());
            hdr[header::SALT].copy_from_slice(&self.salt.to_be_bytes());
            hdr[header::CRC32].copy_from_slice(&self.crc32.to_be_bytes());
            Ok(())
        }

        pub fn decode(src: &[u8]) -> Result<Self> {
            if src.len() < PAGE_HDR_LEN {
                return Err(SirixError::Corruption("page header truncated"));
            }
            let hdr = &src[..PAGE_HDR_LEN];
            if hdr[header::MAGIC] != PAGE_MAGIC {
                return Err(SirixError::Corruption("invalid page magic"));
            }
            let format_version =
                u16::from_be_bytes(hdr[header::FORMAT_VERSION].try_into().unwrap());
            if format_version != PAGE_FORMAT_VERSION {
                return Err(SirixError::Corruption("unsupported page format version"));
            }
            if hdr[header::RESERVED].iter().any(|&b| b != 0) {
                return Err(SirixError::Corruption("page header reserved bytes non-zero"));
            }
            let kind = PageKind::from_u8(hdr[header::PAGE_KIND])
                .ok_or(SirixError::Corruption("unknown page kind"))?;
            let family = PageFamily::from_u8(hdr[header::FAMILY])
                .ok_or(SirixError::Corruption("unknown page family"))?;
            let index = hdr[header::INDEX];
            let physical_key = u64::from_be_bytes(hdr[header::PHYSICAL_KEY].try_into().unwrap());
            let revision = u64::from_be_bytes(hdr[header::REVISION].try_into().unwrap());
            let salt = u64::from_be_bytes(hdr[header::SALT].try_into().unwrap());
            let crc32 = u32::from_be_bytes(hdr[header::CRC32].try_into().unwrap());
            Ok(Self {
                format_version,
                kind,
                family,
                index,
                physical_key,
                revision,
                salt,
                crc32,
            })
        }
    }

    pub fn clear_crc32(buf: &mut [u8]) -> Result<()> {
        if buf.len() < header::CRC32.end {
            return Err(SirixError::Usage("page header buffer too small"));
        }
        buf[header::CRC32].fill(0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::page::{self, PageHeader, PageKind};
    use super::*;

    #[test]
    fn page_header_roundtrip() {
        let mut buf = [0u8; page::PAGE_HDR_LEN];
        let header = PageHeader::new(PageKind::Record, PageFamily::Cas, 2, 99, 7, 555)
            .with_crc32(0xDEADBEEF);
        header.encode(&mut buf).unwrap();
        let decoded = PageHeader::decode(&buf).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn split_node_key_round_trips_within_a_page() {
        let (page_key, offset) = split_node_key(NodeKey(RECORD_PAGE_CAPACITY * 3 + 17));
        assert_eq!(page_key, PageKey(3));
        assert_eq!(offset, 17);
    }

    #[test]
    fn indirect_slot_uses_low_bits_at_level_zero() {
        let slot0 = indirect_slot(PageKey(INDIRECT_FANOUT as u64 + 5), 0);
        let slot1 = indirect_slot(PageKey(INDIRECT_FANOUT as u64 + 5), 1);
        assert_eq!(slot0, 5);
        assert_eq!(slot1, 1);
    }
}
