use std::sync::Arc;

use sirix_io::PageReader;
use sirix_page::{RecordPage, RevisionRootPage, UberPage};
use sirix_types::{
    split_node_key, NodeKey, PageFamily, PageKey, PageReference, Result, RevisionNumber,
    SirixError, INDIRECT_TREE_HEIGHT,
};
use sirix_versioning::VersioningPolicy;

use crate::cache::PageCache;
use crate::deref::dereference_indirect_chain;

/// A read-only snapshot of a resource as of a fixed revision (spec §4.6).
/// Never blocks or is blocked by a concurrent [`crate::write::PageWriteTrx`]
/// — it only ever resolves pages reachable from the uber-page reference
/// that was current when it opened.
pub struct PageReadTrx<'r, R: PageReader> {
    reader: &'r R,
    cache: Arc<PageCache>,
    revision: RevisionNumber,
    revision_root: RevisionRootPage,
    salt: u64,
    versioning: VersioningPolicy,
    revisions_to_restore: u32,
}

impl<'r, R: PageReader> PageReadTrx<'r, R> {
    /// Opens a snapshot at `revision`. Pass `RevisionNumber::BOOTSTRAP` or
    /// any revision `<=` the uber-page's `current_revision` to read an
    /// older revision; the indirect tree of revision-root pages makes every
    /// past revision independently reachable (spec §3.4).
    pub fn open(
        reader: &'r R,
        cache: Arc<PageCache>,
        revision: RevisionNumber,
        salt: u64,
        versioning: VersioningPolicy,
        revisions_to_restore: u32,
    ) -> Result<Self> {
        let uber = Self::read_uber(reader, &cache, salt)?;
        let revision_root = Self::read_revision_root(reader, &cache, &uber, revision, salt)?;
        Ok(Self {
            reader,
            cache,
            revision,
            revision_root,
            salt,
            versioning,
            revisions_to_restore,
        })
    }

    pub(crate) fn read_uber(reader: &R, cache: &PageCache, salt: u64) -> Result<UberPage> {
        let uber_ref = reader.read_uber_page_reference()?;
        match uber_ref.key {
            None => Ok(UberPage::bootstrap()),
            Some(key) => {
                let bytes = cache.get_or_read(reader, key)?;
                UberPage::decode(&bytes, salt)
            }
        }
    }

    fn read_revision_root(
        reader: &R,
        cache: &PageCache,
        uber: &UberPage,
        revision: RevisionNumber,
        salt: u64,
    ) -> Result<RevisionRootPage> {
        if uber.bootstrap {
            return Ok(RevisionRootPage::bootstrap());
        }
        let leaf = dereference_indirect_chain(
            reader,
            cache,
            uber.revision_tree_root,
            revision.0,
            INDIRECT_TREE_HEIGHT,
            salt,
        )?;
        let key = leaf
            .and_then(|r| r.key)
            .ok_or(SirixError::NotFound("revision root page"))?;
        let bytes = cache.get_or_read(reader, key)?;
        RevisionRootPage::decode(&bytes, salt)
    }

    pub fn revision(&self) -> RevisionNumber {
        self.revision
    }

    pub fn revision_root(&self) -> &RevisionRootPage {
        &self.revision_root
    }

    pub fn salt(&self) -> u64 {
        self.salt
    }

    /// Resolves the most recently committed revision number without opening
    /// a full snapshot, so callers (e.g. the facade's `Resource`) can open a
    /// read transaction "at the latest revision" without guessing it.
    pub fn latest_revision(reader: &R, cache: &PageCache, salt: u64) -> Result<RevisionNumber> {
        let uber = Self::read_uber(reader, cache, salt)?;
        Ok(if uber.bootstrap {
            RevisionNumber::BOOTSTRAP
        } else {
            uber.current_revision
        })
    }

    /// Gathers the chain of on-disk versions backing `page_key` in `family`,
    /// oldest first, exactly as `combine_for_read`/`combine_for_modification`
    /// expect it (spec §4.5).
    pub fn get_snapshot_pages(&self, page_key: PageKey, family: PageFamily) -> Result<Vec<RecordPage>> {
        Ok(self.get_snapshot_chain(page_key, family)?.0)
    }

    /// Like [`Self::get_snapshot_pages`], but also returns the reference
    /// pointing at the oldest page in the chain — the milestone a
    /// `Differential` delta points straight at, rather than at the
    /// immediately prior version (spec §4.5).
    pub fn get_snapshot_chain(
        &self,
        page_key: PageKey,
        family: PageFamily,
    ) -> Result<(Vec<RecordPage>, Option<PageReference>)> {
        let root = *self.revision_root.family_root(family);
        if root.is_null() {
            return Ok((Vec::new(), None));
        }
        let leaf = dereference_indirect_chain(
            self.reader,
            &self.cache,
            root,
            page_key.0,
            INDIRECT_TREE_HEIGHT,
            self.salt,
        )?;
        let Some(mut reference) = leaf else {
            return Ok((Vec::new(), None));
        };

        let mut chain = Vec::new();
        let mut milestone_reference = None;
        let chain_cap = self.revisions_to_restore.max(1) as usize + 1;
        while let Some(key) = reference.key {
            milestone_reference = Some(reference);
            let bytes = self.cache.get_or_read(self.reader, key)?;
            let page = RecordPage::decode(page_key, &bytes, self.salt)?;
            let previous = page.previous;
            chain.push(page);
            match previous {
                Some(next) => reference = next,
                None => break,
            }
            if chain.len() >= chain_cap {
                break;
            }
        }
        chain.reverse();
        Ok((chain, milestone_reference))
    }

    /// Reconstructs the record at `node_key`, folding its version history
    /// per the active versioning policy (spec §4.5, §4.6).
    pub fn get_record(&self, node_key: NodeKey, family: PageFamily) -> Result<Option<Vec<u8>>> {
        let (page_key, offset) = split_node_key(node_key);
        let versions = self.get_snapshot_pages(page_key, family)?;
        if versions.is_empty() {
            return Ok(None);
        }
        let page = self.versioning.combine_for_read(&versions)?;
        Ok(page.get(offset as u64).map(|bytes| bytes.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sirix_io::InMemoryPageStore;

    #[test]
    fn opening_a_fresh_store_yields_the_bootstrap_snapshot() {
        let store = InMemoryPageStore::new();
        let cache = PageCache::new();
        let trx = PageReadTrx::open(
            &store,
            cache,
            RevisionNumber::BOOTSTRAP,
            0,
            VersioningPolicy::Full,
            1,
        )
        .unwrap();
        assert_eq!(trx.revision(), RevisionNumber::BOOTSTRAP);
        assert!(trx.revision_root().family_root(PageFamily::Record).is_null());
    }

    #[test]
    fn get_snapshot_pages_is_empty_for_an_unwritten_page_key() {
        let store = InMemoryPageStore::new();
        let cache = PageCache::new();
        let trx = PageReadTrx::open(
            &store,
            cache,
            RevisionNumber::BOOTSTRAP,
            0,
            VersioningPolicy::Full,
            1,
        )
        .unwrap();
        let versions = trx.get_snapshot_pages(PageKey(0), PageFamily::Record).unwrap();
        assert!(versions.is_empty());
    }
}
