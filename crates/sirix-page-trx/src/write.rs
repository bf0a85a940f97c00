use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use sirix_io::{PageReader, PageWriter};
use sirix_page::{IndirectPage, RecordPage, RecordPageContainer, RevisionRootPage, UberPage};
use sirix_types::{
    indirect_slot, split_node_key, IndirectPageLogKey, NodeKey, PageFamily, PageKey,
    PageReference, Result, RevisionNumber, SirixError, INDIRECT_TREE_HEIGHT,
};
use sirix_versioning::VersioningPolicy;
use sirix_wal::WriteAheadLog;

use crate::cache::PageCache;
use crate::read::PageReadTrx;

/// The uber-page's own indirect tree of revision-root pages is staged
/// under this reserved `(family, index)` pair so it shares the same
/// `page_log` machinery as the five real page families without colliding
/// with any of their entries (spec §3.4: "the uber page roots an indirect
/// tree of revision-root pages, addressed by revision number").
const REVISION_TREE_FAMILY: PageFamily = PageFamily::Record;
const REVISION_TREE_INDEX: u8 = 255;

/// The single writer for a resource (spec §4.7, §5: at most one open at a
/// time). Stages every change in [`WriteAheadLog`] as copy-on-write clones
/// of the indirect-page path down to each touched slot; nothing is visible
/// to readers of prior revisions until [`PageWriteTrx::commit`] publishes a
/// new uber-page reference.
pub struct PageWriteTrx<'r, R: PageReader, W: PageWriter> {
    reader: &'r R,
    cache: Arc<PageCache>,
    base_uber: UberPage,
    base_read: PageReadTrx<'r, R>,
    next_revision: RevisionNumber,
    revision_root: RevisionRootPage,
    wal: WriteAheadLog,
    versioning: VersioningPolicy,
    revisions_to_restore: u32,
    salt: u64,
    pending_uber_root: Option<PageReference>,
    _writer: std::marker::PhantomData<W>,
}

impl<'r, R: PageReader, W: PageWriter> PageWriteTrx<'r, R, W> {
    /// Opens a new write transaction against the latest committed
    /// revision, cloning its revision-root page as the working copy for
    /// `next_revision` (spec §4.4, §4.7).
    pub fn begin(
        reader: &'r R,
        cache: Arc<PageCache>,
        wal: WriteAheadLog,
        versioning: VersioningPolicy,
        revisions_to_restore: u32,
        salt: u64,
    ) -> Result<Self> {
        let base_uber = PageReadTrx::read_uber(reader, &cache, salt)?;
        let base_read = PageReadTrx::open(
            reader,
            cache.clone(),
            base_uber.current_revision,
            salt,
            versioning,
            revisions_to_restore,
        )?;
        let next_revision = if base_uber.bootstrap {
            RevisionNumber::BOOTSTRAP
        } else {
            base_uber.current_revision.next()
        };
        let mut revision_root = base_read.revision_root().clone();
        revision_root.revision = next_revision;

        Ok(Self {
            reader,
            cache,
            base_uber,
            base_read,
            next_revision,
            revision_root,
            wal,
            versioning,
            revisions_to_restore,
            salt,
            pending_uber_root: None,
            _writer: std::marker::PhantomData,
        })
    }

    pub fn revision(&self) -> RevisionNumber {
        self.next_revision
    }

    pub fn revision_root(&self) -> &RevisionRootPage {
        &self.revision_root
    }

    /// Reads `node_key`, preferring this transaction's own uncommitted
    /// writes over the base revision (spec §4.7: "reads inside the write
    /// transaction see its own writes").
    pub fn get_record(&mut self, node_key: NodeKey, family: PageFamily) -> Result<Option<Vec<u8>>> {
        let (page_key, offset) = split_node_key(node_key);
        if let Some(container) = self.wal.get_record(family, page_key)? {
            return Ok(container.get(offset as u64).map(|bytes| bytes.to_vec()));
        }
        self.base_read.get_record(node_key, family)
    }

    /// Copies the current value at `node_key` up into this transaction's
    /// working delta, ready for in-place mutation via [`Self::write_entry`].
    pub fn prepare_entry_for_modification(
        &mut self,
        node_key: NodeKey,
        family: PageFamily,
    ) -> Result<Vec<u8>> {
        let (page_key, offset) = split_node_key(node_key);
        let offset = offset as u64;
        let mut container = self.prepare_record_page(family, page_key)?;
        if container.modified.get(offset).is_none() {
            let existing = container
                .complete
                .get(offset)
                .ok_or(SirixError::NotFound("record"))?
                .to_vec();
            container.modified.put(offset, existing);
        }
        let bytes = container
            .modified
            .get(offset)
            .expect("just ensured present")
            .to_vec();
        self.wal.put_record(family, page_key, container)?;
        Ok(bytes)
    }

    /// Overwrites the bytes at `node_key`, which must already have gone
    /// through [`Self::prepare_entry_for_modification`] this transaction.
    pub fn write_entry(&mut self, node_key: NodeKey, family: PageFamily, bytes: Vec<u8>) -> Result<()> {
        let (page_key, offset) = split_node_key(node_key);
        let mut container = self
            .wal
            .get_record(family, page_key)?
            .ok_or(SirixError::Usage("prepare_entry_for_modification must run before write_entry"))?;
        container.modified.put(offset as u64, bytes);
        self.wal.put_record(family, page_key, container)?;
        Ok(())
    }

    /// Allocates a fresh key in `family` and stores `bytes` under it.
    pub fn create_entry(&mut self, family: PageFamily, bytes: Vec<u8>) -> Result<NodeKey> {
        let node_key = NodeKey(self.next_key(family));
        let (page_key, offset) = split_node_key(node_key);
        let mut container = self.prepare_record_page(family, page_key)?;
        container.modified.put(offset as u64, bytes);
        self.wal.put_record(family, page_key, container)?;
        Ok(node_key)
    }

    /// Records a tombstone for `node_key` (spec §4.2: record deletion is a
    /// delta entry, not a hole — readers of older revisions must still see
    /// the value).
    pub fn remove_entry(&mut self, node_key: NodeKey, family: PageFamily) -> Result<()> {
        let (page_key, offset) = split_node_key(node_key);
        let mut container = self.prepare_record_page(family, page_key)?;
        container.modified.remove(offset as u64);
        self.wal.put_record(family, page_key, container)?;
        Ok(())
    }

    fn next_key(&mut self, family: PageFamily) -> u64 {
        if family == PageFamily::Record {
            let key = self.revision_root.max_node_key;
            self.revision_root.max_node_key += 1;
            key
        } else {
            let counter = self.revision_root.max_key_mut(family);
            let key = *counter;
            *counter += 1;
            key
        }
    }

    /// Returns the `{complete, modified}` container for `page_key`,
    /// reconstructing it from the active versioning policy on first touch
    /// this transaction and caching the result in the record log
    /// thereafter (spec §4.5, §4.7's `prepare_record_page`).
    fn prepare_record_page(&mut self, family: PageFamily, page_key: PageKey) -> Result<RecordPageContainer> {
        if let Some(container) = self.wal.get_record(family, page_key)? {
            return Ok(container);
        }
        let leaf_ref = self.prepare_leaf(family, page_key)?;
        let container = if leaf_ref.is_null() {
            let complete = RecordPage::empty(family, 0, page_key, self.base_read.revision());
            let modified = RecordPage::empty(family, 0, page_key, self.next_revision);
            RecordPageContainer::new(complete, modified)
        } else {
            let (versions, milestone_reference) = self.base_read.get_snapshot_chain(page_key, family)?;
            self.versioning.combine_for_modification(
                &versions,
                self.revisions_to_restore,
                self.next_revision,
                Some(leaf_ref),
                milestone_reference,
            )?
        };
        self.wal.put_record(family, page_key, container.clone())?;
        Ok(container)
    }

    /// Clone-on-write descent to `page_key`'s leaf slot in `family`'s
    /// indirect tree: every ancestor on the path is cloned (or freshly
    /// allocated) and pinned in the page log, and `family_root` is updated
    /// to route through the log from now on. Returns the leaf's *existing*
    /// reference (the record page to read history from, if any); the leaf
    /// slot itself is only patched once the new physical key is known, via
    /// [`Self::set_leaf_reference`] (spec §4.7's internal `prepare_leaf`).
    fn prepare_leaf(&mut self, family: PageFamily, page_key: PageKey) -> Result<PageReference> {
        let root = *self.revision_root.family_root(family);
        let (new_root, leaf_ref) =
            self.prepare_leaf_at(family, 0, page_key.0, INDIRECT_TREE_HEIGHT, root)?;
        *self.revision_root.family_root_mut(family) = new_root;
        Ok(leaf_ref)
    }

    fn prepare_leaf_at(
        &mut self,
        family: PageFamily,
        index: u8,
        key: u64,
        remaining: u32,
        reference: PageReference,
    ) -> Result<(PageReference, PageReference)> {
        if remaining == 0 {
            return Ok((reference, reference));
        }
        let level = remaining - 1;
        let log_key = IndirectPageLogKey::new(family, index, level, key);

        let mut page = if let Some(bytes) = self.wal.get_page(&log_key)? {
            IndirectPage::decode(&bytes, self.salt)?
        } else if let Some(physical_key) = reference.key {
            let bytes = self.cache.get_or_read(self.reader, physical_key)?;
            let mut decoded = IndirectPage::decode(&bytes, self.salt)?;
            decoded.revision = self.next_revision;
            decoded
        } else {
            IndirectPage::empty(family, index, level, self.next_revision)
        };

        let child_slot = indirect_slot(PageKey(key), level);
        let child_ref = *page.slot(child_slot);
        let (new_child_ref, leaf_ref) = self.prepare_leaf_at(family, index, key, level, child_ref)?;
        *page.slot_mut(child_slot) = new_child_ref;

        self.wal.put_page(log_key, page.encode(0, self.salt))?;
        let new_reference = PageReference {
            key: None,
            log_key: Some(log_key),
        };
        Ok((new_reference, leaf_ref))
    }

    /// Patches the level-0 indirect page's leaf slot in the log with a
    /// freshly assigned physical key. `prepare_leaf`/`prepare_leaf_at` must
    /// have already pinned that page this transaction.
    fn set_leaf_reference(
        &mut self,
        family: PageFamily,
        index: u8,
        key: u64,
        leaf_ref: PageReference,
    ) -> Result<()> {
        let log_key = IndirectPageLogKey::new(family, index, 0, key);
        let bytes = self
            .wal
            .get_page(&log_key)?
            .ok_or(SirixError::Usage("prepare_leaf must run before set_leaf_reference"))?;
        let mut page = IndirectPage::decode(&bytes, self.salt)?;
        let slot = indirect_slot(PageKey(key), 0);
        *page.slot_mut(slot) = leaf_ref;
        self.wal.put_page(log_key, page.encode(0, self.salt))?;
        Ok(())
    }

    /// After writing the indirect page staged under `child_log_key`,
    /// routes its parent's slot to the newly assigned physical key — or,
    /// at the top of the tree, updates `revision_root.family_root`
    /// (`pending_uber_root` for the reserved revision-tree family/index).
    fn patch_parent_slot(&mut self, child_log_key: IndirectPageLogKey, new_ref: PageReference) -> Result<()> {
        let IndirectPageLogKey {
            family,
            index,
            level,
            page_key,
        } = child_log_key;

        if level + 1 >= INDIRECT_TREE_HEIGHT {
            if index == REVISION_TREE_INDEX {
                self.pending_uber_root = Some(new_ref);
            } else {
                *self.revision_root.family_root_mut(family) = new_ref;
            }
            return Ok(());
        }

        let parent_level = level + 1;
        let parent_log_key = IndirectPageLogKey::new(family, index, parent_level, page_key);
        let bytes = self
            .wal
            .get_page(&parent_log_key)?
            .ok_or(SirixError::Usage("parent indirect page missing from log"))?;
        let mut parent_page = IndirectPage::decode(&bytes, self.salt)?;
        let slot = indirect_slot(PageKey(page_key), parent_level);
        *parent_page.slot_mut(slot) = new_ref;
        self.wal.put_page(parent_log_key, parent_page.encode(0, self.salt))?;
        Ok(())
    }

    /// Publishes every staged page through `writer`, following spec
    /// §4.7's commit protocol: touch the crash marker, flush record pages
    /// and their indirect routing bottom-up, write the revision root, route
    /// it into the uber-page's own revision tree, then publish the
    /// uber-page reference last. Pre/post-commit hooks are the caller's
    /// responsibility (they live at the node-transaction layer).
    pub fn commit(mut self, writer: &W) -> Result<UberPage> {
        self.wal.mark_commit_pending()?;
        self.wal.to_secondary()?;

        for family in PageFamily::ALL {
            let page_keys: Vec<PageKey> = self.wal.iter_record_keys(family).copied().collect();
            for page_key in page_keys {
                let container = self
                    .wal
                    .get_record(family, page_key)?
                    .expect("key came from iter_record_keys");
                if container.modified.entries.is_empty() {
                    continue;
                }
                let bytes = container.modified.encode(self.salt);
                let mut reference = PageReference::NULL;
                writer.write(&mut reference, &bytes)?;
                self.set_leaf_reference(family, 0, page_key.0, reference)?;
            }
        }

        for level in 0..INDIRECT_TREE_HEIGHT {
            let log_keys: Vec<IndirectPageLogKey> = self
                .wal
                .iter_page_keys()
                .filter(|k| k.level == level && k.index != REVISION_TREE_INDEX)
                .copied()
                .collect();
            for log_key in log_keys {
                let bytes = self
                    .wal
                    .get_page(&log_key)?
                    .expect("key came from iter_page_keys");
                let mut reference = PageReference::NULL;
                writer.write(&mut reference, &bytes)?;
                self.patch_parent_slot(log_key, reference)?;
            }
        }

        self.revision_root.commit_timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let revision_root_bytes = self.revision_root.encode(0, self.salt);
        let mut revision_root_ref = PageReference::NULL;
        writer.write(&mut revision_root_ref, &revision_root_bytes)?;

        let _ = self.prepare_leaf_at(
            REVISION_TREE_FAMILY,
            REVISION_TREE_INDEX,
            self.next_revision.0,
            INDIRECT_TREE_HEIGHT,
            self.base_uber.revision_tree_root,
        )?;
        self.set_leaf_reference(
            REVISION_TREE_FAMILY,
            REVISION_TREE_INDEX,
            self.next_revision.0,
            revision_root_ref,
        )?;

        for level in 0..INDIRECT_TREE_HEIGHT {
            let log_keys: Vec<IndirectPageLogKey> = self
                .wal
                .iter_page_keys()
                .filter(|k| k.level == level && k.index == REVISION_TREE_INDEX)
                .copied()
                .collect();
            for log_key in log_keys {
                let bytes = self.wal.get_page(&log_key)?.expect("staged above");
                let mut reference = PageReference::NULL;
                writer.write(&mut reference, &bytes)?;
                self.patch_parent_slot(log_key, reference)?;
            }
        }

        let new_uber = UberPage {
            revision_tree_root: self
                .pending_uber_root
                .take()
                .expect("prepare_leaf_at always stages the top-level revision-tree page"),
            current_revision: self.next_revision,
            bootstrap: false,
        };
        let uber_bytes = new_uber.encode(0, self.salt);
        let mut uber_ref = PageReference::NULL;
        writer.write(&mut uber_ref, &uber_bytes)?;
        writer.write_uber_page_reference(&uber_ref)?;
        writer.close()?;

        self.wal.close()?;
        Ok(new_uber)
    }

    /// Discards every staged page without publishing anything (spec §4.7,
    /// §4.9: `abort()`). The next write transaction reopens at the last
    /// committed revision untouched.
    pub fn abort(mut self) -> Result<()> {
        self.wal.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sirix_io::InMemoryPageStore;

    #[test]
    fn create_and_commit_makes_a_record_visible_at_the_new_revision() {
        let store = InMemoryPageStore::new();
        let cache = PageCache::new();

        let mut write_trx = PageWriteTrx::begin(
            &store,
            cache.clone(),
            WriteAheadLog::new_in_memory(),
            VersioningPolicy::Full,
            1,
            0,
        )
        .unwrap();
        let node_key = write_trx
            .create_entry(PageFamily::Record, b"hello".to_vec())
            .unwrap();
        assert_eq!(
            write_trx.get_record(node_key, PageFamily::Record).unwrap().as_deref(),
            Some(&b"hello"[..])
        );
        let uber = write_trx.commit(&store).unwrap();
        assert_eq!(uber.current_revision, RevisionNumber::BOOTSTRAP);

        let read_trx = PageReadTrx::open(
            &store,
            cache,
            RevisionNumber::BOOTSTRAP,
            0,
            VersioningPolicy::Full,
            1,
        )
        .unwrap();
        assert_eq!(
            read_trx.get_record(node_key, PageFamily::Record).unwrap().as_deref(),
            Some(&b"hello"[..])
        );
    }

    #[test]
    fn abort_discards_every_staged_write() {
        let store = InMemoryPageStore::new();
        let cache = PageCache::new();
        let mut write_trx = PageWriteTrx::begin(
            &store,
            cache,
            WriteAheadLog::new_in_memory(),
            VersioningPolicy::Full,
            1,
            0,
        )
        .unwrap();
        write_trx.create_entry(PageFamily::Record, b"x".to_vec()).unwrap();
        write_trx.abort().unwrap();
        assert!(store.read_uber_page_reference().unwrap().is_null());
    }

    #[test]
    fn second_revision_preserves_the_first_revisions_record() {
        let store = InMemoryPageStore::new();
        let cache = PageCache::new();

        let mut first = PageWriteTrx::begin(
            &store,
            cache.clone(),
            WriteAheadLog::new_in_memory(),
            VersioningPolicy::Full,
            1,
            0,
        )
        .unwrap();
        let key = first.create_entry(PageFamily::Record, b"v1".to_vec()).unwrap();
        first.commit(&store).unwrap();

        let mut second = PageWriteTrx::begin(
            &store,
            cache.clone(),
            WriteAheadLog::new_in_memory(),
            VersioningPolicy::Full,
            1,
            0,
        )
        .unwrap();
        let other_key = second.create_entry(PageFamily::Record, b"v2".to_vec()).unwrap();
        let uber = second.commit(&store).unwrap();
        assert_eq!(uber.current_revision, RevisionNumber(1));

        let read_trx = PageReadTrx::open(&store, cache, RevisionNumber(1), 0, VersioningPolicy::Full, 1).unwrap();
        assert_eq!(
            read_trx.get_record(key, PageFamily::Record).unwrap().as_deref(),
            Some(&b"v1"[..])
        );
        assert_eq!(
            read_trx.get_record(other_key, PageFamily::Record).unwrap().as_deref(),
            Some(&b"v2"[..])
        );
    }
}
