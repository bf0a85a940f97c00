use sirix_io::PageReader;
use sirix_page::IndirectPage;
use sirix_types::{indirect_slot, PageKey, PageReference, Result};

use crate::cache::PageCache;

/// Walks `height` levels of a fixed-fanout indirect-page tree rooted at
/// `root`, following the slot `indirect_slot(key, level)` at each level,
/// and returns the reference found at the leaf (level 0) slot. Returns
/// `None` the moment the path runs into a `NULL` reference — the addressed
/// leaf was never written.
///
/// Used both for the family indirect trees (keyed by a record page's
/// `PageKey`) and for the uber-page's indirect tree of revision-root pages
/// (keyed by a [`sirix_types::RevisionNumber`]), since both trees share the
/// same fixed fanout and height (spec §3.3, §3.4).
pub fn dereference_indirect_chain<R: PageReader>(
    reader: &R,
    cache: &PageCache,
    root: PageReference,
    key: u64,
    height: u32,
    salt: u64,
) -> Result<Option<PageReference>> {
    let mut reference = root;
    for level in (0..height).rev() {
        let Some(physical_key) = reference.key else {
            return Ok(None);
        };
        let bytes = cache.get_or_read(reader, physical_key)?;
        let page = IndirectPage::decode(&bytes, salt)?;
        let slot = indirect_slot(PageKey(key), level);
        reference = *page.slot(slot);
    }
    Ok(Some(reference))
}
