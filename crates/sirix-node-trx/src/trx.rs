use std::path::{Path, PathBuf};
use std::sync::Arc;

use sirix_index::{PathSummaryTree, ValueIndex};
use sirix_io::{PageReader, PageWriter};
use sirix_node::{
    leaf_content_hash, propagate_rolling_add, propagate_rolling_remove, propagate_rolling_update,
    recompute_postorder_hash, NameDictionary, NamedData, HashKind, Node, NodeKind, QName,
    StructuralData, ValuedData,
};
use sirix_page_trx::{PageCache, PageReadTrx, PageWriteTrx};
use sirix_types::{NodeKey, PageFamily, Result, RevisionNumber, SirixError};
use sirix_versioning::VersioningPolicy;
use sirix_wal::WriteAheadLog;

use crate::events::NodeEvent;

/// Where a freshly built node attaches relative to an existing anchor node.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum InsertPosition {
    FirstChild,
    LeftSibling,
    RightSibling,
}

struct InsertFrame {
    key: NodeKey,
    last_child: Option<NodeKey>,
}

/// The node-level write transaction: the single writer for a resource,
/// layered over [`PageWriteTrx`] with typed node encode/decode, structural
/// bookkeeping (sibling/child/descendant counts), hash maintenance, and the
/// path-summary/value-index/name-dictionary side structures kept coherent
/// with every mutation (spec §4.9-§4.10).
///
/// `page_trx` is `Option` so [`Self::maybe_auto_commit`] can retire the
/// current page transaction and open a fresh one without needing to consume
/// and rebuild `Self` itself.
pub struct NodeWriteTrx<'r, R: PageReader, W: PageWriter> {
    reader: &'r R,
    writer: &'r W,
    cache: Arc<PageCache>,
    versioning: VersioningPolicy,
    revisions_to_restore: u32,
    salt: u64,
    wal_dir: Option<PathBuf>,
    page_trx: Option<PageWriteTrx<'r, R, W>>,
    path_summary: PathSummaryTree,
    value_index: ValueIndex,
    names: NameDictionary,
    hash_kind: HashKind,
    modification_count: u64,
    auto_commit_threshold: Option<u64>,
    pre_commit_hooks: Vec<Box<dyn FnMut(&mut Self) -> Result<()>>>,
    post_commit_hooks: Vec<Box<dyn FnMut(&mut Self) -> Result<()>>>,
    closed: bool,
}

impl<'r, R: PageReader, W: PageWriter> NodeWriteTrx<'r, R, W> {
    /// Opens a new write transaction, loading the path-summary tree, value
    /// index, and name dictionary from whatever the latest committed
    /// revision left behind (or bootstrapping fresh ones, along with the
    /// document-root node, on a brand-new resource).
    ///
    /// `wal_dir` is the directory the write-ahead log spills to and writes
    /// its commit marker under; pass `None` for a purely in-memory resource
    /// (the marker/crash-recovery contract only applies to disk-backed
    /// resources, spec §4.8).
    pub fn begin(
        reader: &'r R,
        writer: &'r W,
        cache: Arc<PageCache>,
        versioning: VersioningPolicy,
        revisions_to_restore: u32,
        salt: u64,
        hash_kind: HashKind,
        wal_dir: Option<&Path>,
    ) -> Result<Self> {
        let page_trx = PageWriteTrx::begin(
            reader,
            cache.clone(),
            open_wal(wal_dir)?,
            versioning,
            revisions_to_restore,
            salt,
        )?;
        let mut trx = Self {
            reader,
            writer,
            cache,
            versioning,
            revisions_to_restore,
            salt,
            wal_dir: wal_dir.map(Path::to_path_buf),
            page_trx: Some(page_trx),
            path_summary: PathSummaryTree::bootstrap(),
            value_index: ValueIndex::new(),
            names: NameDictionary::new(),
            hash_kind,
            modification_count: 0,
            auto_commit_threshold: None,
            pre_commit_hooks: Vec::new(),
            post_commit_hooks: Vec::new(),
            closed: false,
        };
        trx.load_indexes()?;
        if trx.ptx().get_record(NodeKey(0), PageFamily::Record)?.is_none() {
            trx.bootstrap_document_root()?;
        }
        Ok(trx)
    }

    pub fn set_auto_commit_threshold(&mut self, threshold: Option<u64>) {
        self.auto_commit_threshold = threshold;
    }

    pub fn add_pre_commit_hook(&mut self, hook: impl FnMut(&mut Self) -> Result<()> + 'static) {
        self.pre_commit_hooks.push(Box::new(hook));
    }

    pub fn add_post_commit_hook(&mut self, hook: impl FnMut(&mut Self) -> Result<()> + 'static) {
        self.post_commit_hooks.push(Box::new(hook));
    }

    pub fn root(&self) -> NodeKey {
        NodeKey(0)
    }

    pub fn revision(&self) -> RevisionNumber {
        self.page_trx.as_ref().expect("transaction is open").revision()
    }

    /// Resolves a name-dictionary key back to its qualified string, for
    /// callers that want to print or compare node names.
    pub fn resolve_name(&self, name_key: u32) -> Option<&str> {
        self.names.resolve(name_key)
    }

    pub fn path_summary(&self) -> &PathSummaryTree {
        &self.path_summary
    }

    /// Reads the node at `key`, including this transaction's own uncommitted
    /// writes.
    pub fn node(&mut self, key: NodeKey) -> Result<Node> {
        let bytes = self
            .ptx()
            .get_record(key, PageFamily::Record)?
            .ok_or(SirixError::NotFound("node"))?;
        sirix_node::decode(&bytes)
    }

    fn ptx(&mut self) -> &mut PageWriteTrx<'r, R, W> {
        self.page_trx.as_mut().expect("node transaction is closed")
    }

    fn load_indexes(&mut self) -> Result<()> {
        if let Some(bytes) = self.ptx().get_record(NodeKey(0), PageFamily::PathSummary)? {
            self.path_summary = PathSummaryTree::decode(&bytes)?;
        }
        if let Some(bytes) = self.ptx().get_record(NodeKey(0), PageFamily::Cas)? {
            self.value_index = ValueIndex::decode(&bytes)?;
        }
        if let Some(bytes) = self.ptx().get_record(NodeKey(0), PageFamily::Name)? {
            self.names = NameDictionary::decode(&bytes)?;
        }
        Ok(())
    }

    fn bootstrap_document_root(&mut self) -> Result<()> {
        let key = self.ptx().create_entry(PageFamily::Record, Vec::new())?;
        debug_assert_eq!(key, NodeKey(0));
        let mut node = Node::DocumentRoot {
            key,
            hash: 0,
            structural: StructuralData::default(),
        };
        let hash = if self.hash_kind == HashKind::None { 0 } else { leaf_content_hash(&node) };
        node.set_hash(hash);
        self.store(&node)
    }

    fn stage(&mut self, key: NodeKey) -> Result<Node> {
        let bytes = self.ptx().prepare_entry_for_modification(key, PageFamily::Record)?;
        sirix_node::decode(&bytes)
    }

    fn store(&mut self, node: &Node) -> Result<()> {
        let bytes = sirix_node::encode(node);
        self.ptx().write_entry(node.node_key(), PageFamily::Record, bytes)
    }

    fn ancestor_chain(&mut self, start: Option<NodeKey>) -> Result<Vec<NodeKey>> {
        let mut chain = Vec::new();
        let mut current = start;
        while let Some(key) = current {
            chain.push(key);
            current = self.node(key)?.parent_key();
        }
        Ok(chain)
    }

    fn adjust_descendant_counts(&mut self, start: Option<NodeKey>, delta: i64) -> Result<()> {
        for key in self.ancestor_chain(start)? {
            let mut node = self.stage(key)?;
            if delta >= 0 {
                node.increment_descendant_count(delta as u64);
            } else {
                node.decrement_descendant_count((-delta) as u64);
            }
            self.store(&node)?;
        }
        Ok(())
    }

    fn propagate_hash_add(&mut self, start: Option<NodeKey>, leaf_delta: u64) -> Result<()> {
        match self.hash_kind {
            HashKind::None => Ok(()),
            HashKind::Rolling => {
                for key in self.ancestor_chain(start)? {
                    let mut node = self.stage(key)?;
                    let h = node.hash().unwrap_or(0);
                    node.set_hash(propagate_rolling_add(h, leaf_delta));
                    self.store(&node)?;
                }
                Ok(())
            }
            HashKind::PostOrder => self.recompute_postorder_chain(start),
        }
    }

    fn propagate_hash_remove(&mut self, start: Option<NodeKey>, leaf_delta: u64) -> Result<()> {
        match self.hash_kind {
            HashKind::None => Ok(()),
            HashKind::Rolling => {
                for key in self.ancestor_chain(start)? {
                    let mut node = self.stage(key)?;
                    let h = node.hash().unwrap_or(0);
                    node.set_hash(propagate_rolling_remove(h, leaf_delta));
                    self.store(&node)?;
                }
                Ok(())
            }
            HashKind::PostOrder => self.recompute_postorder_chain(start),
        }
    }

    fn propagate_hash_update(&mut self, start: Option<NodeKey>, old: u64, new: u64) -> Result<()> {
        match self.hash_kind {
            HashKind::None => Ok(()),
            HashKind::Rolling => {
                for key in self.ancestor_chain(start)? {
                    let mut node = self.stage(key)?;
                    let h = node.hash().unwrap_or(0);
                    node.set_hash(propagate_rolling_update(h, old, new));
                    self.store(&node)?;
                }
                Ok(())
            }
            HashKind::PostOrder => self.recompute_postorder_chain(start),
        }
    }

    /// Recomputes each ancestor's own hash, one level at a time, from its
    /// seed content plus its immediate children's already-correct hashes.
    fn recompute_postorder_chain(&mut self, start: Option<NodeKey>) -> Result<()> {
        let mut current = start;
        while let Some(key) = current {
            let mut node = self.stage(key)?;
            let mut child_hashes = Vec::new();
            for &a in node.attributes() {
                child_hashes.push(self.node(a)?.hash().unwrap_or(0));
            }
            for &n in node.namespaces() {
                child_hashes.push(self.node(n)?.hash().unwrap_or(0));
            }
            if let Some(structural) = node.structural() {
                let mut child_key = structural.first_child_key;
                while let Some(ck) = child_key {
                    let child = self.node(ck)?;
                    child_hashes.push(child.hash().unwrap_or(0));
                    child_key = child.structural().and_then(|s| s.right_sibling_key);
                }
            }
            let new_hash = recompute_postorder_hash(&node, &child_hashes);
            node.set_hash(new_hash);
            let parent = node.parent_key();
            self.store(&node)?;
            current = parent;
        }
        Ok(())
    }

    fn path_node_key_of(&mut self, key: NodeKey) -> Result<NodeKey> {
        let node = self.node(key)?;
        match &node {
            Node::DocumentRoot { .. } => Ok(self.path_summary.root()),
            _ => node
                .named()
                .and_then(|n| n.path_node_key)
                .ok_or(SirixError::Usage("anchor has no path-summary binding")),
        }
    }

    fn resolve_path_node(
        &mut self,
        parent_path_key: NodeKey,
        name_key: u32,
        uri_key: u32,
        kind: NodeKind,
    ) -> Result<NodeKey> {
        let (nk, uk) = (name_key as u64, uri_key as u64);
        if let Some(existing) = self.path_summary.child_matching(parent_path_key, nk, uk, kind, None) {
            self.path_summary.increment_reference(existing)?;
            Ok(existing)
        } else {
            self.path_summary.insert_child(parent_path_key, nk, uk, kind)
        }
    }

    /// Rebinds every named node's `path_node_key` after `root`'s subtree
    /// was relinked under `new_parent` (spec §4.9: "update path summary
    /// with MOVED/MOVEDSAMELEVEL classification"; §4.10: "each live node's
    /// path_node_key is rebound after a move"). Descends top-down so a
    /// child's new path parent is always already resolved by the time the
    /// child itself is rebound.
    fn rebind_path_after_move(&mut self, root: NodeKey, new_parent: NodeKey) -> Result<()> {
        let new_parent_path = self.path_node_key_of(new_parent)?;
        self.rebind_path_rec(root, new_parent_path)
    }

    fn rebind_path_rec(&mut self, key: NodeKey, new_parent_path: NodeKey) -> Result<()> {
        let node = self.node(key)?;
        let own_new_path = if let Some(named) = node.named() {
            let old_path_key = named
                .path_node_key
                .ok_or(SirixError::Corruption("named node missing path binding"))?;
            let rebound = self.path_summary.rebind_after_move(
                old_path_key,
                new_parent_path,
                named.name_key as u64,
                named.uri_key as u64,
                node.kind().expect("named node always has a kind"),
            )?;
            if rebound != old_path_key {
                let mut staged = self.stage(key)?;
                staged.named_mut().expect("checked above").path_node_key = Some(rebound);
                self.store(&staged)?;
            }
            Some(rebound)
        } else {
            None
        };

        // Attributes and namespaces hang off the same path-tree parent as
        // their owning element.
        let attr_parent = own_new_path.unwrap_or(new_parent_path);
        self.rebind_descendants_path(key, attr_parent)
    }

    /// Recursively rebinds `key`'s attributes, namespaces, and structural
    /// children onto `new_path_parent`, without touching `key`'s own
    /// `path_node_key`. Shared by `rebind_path_rec` (moves, where the
    /// anchor's own rebinding already happened above) and `set_qname`
    /// (renames, where the renamed node's own path key is set directly by
    /// `adapt_for_changed_node` rather than via `rebind_after_move`) — both
    /// cases leave descendants pointing at the old path subtree otherwise
    /// (spec §3.6's path summary coverage invariant).
    fn rebind_descendants_path(&mut self, key: NodeKey, new_path_parent: NodeKey) -> Result<()> {
        let node = self.node(key)?;
        for &a in node.attributes() {
            self.rebind_path_rec(a, new_path_parent)?;
        }
        for &n in node.namespaces() {
            self.rebind_path_rec(n, new_path_parent)?;
        }
        if let Some(structural) = node.structural() {
            let mut child = structural.first_child_key;
            while let Some(ck) = child {
                self.rebind_path_rec(ck, new_path_parent)?;
                child = self.node(ck)?.structural().and_then(|s| s.right_sibling_key);
            }
        }
        Ok(())
    }

    /// Resolves the parent and left/right neighbors a new node inserted at
    /// `position` relative to `anchor` must splice into, without mutating
    /// anything yet.
    fn resolve_insert_links(
        &mut self,
        anchor: NodeKey,
        position: InsertPosition,
    ) -> Result<(NodeKey, Option<NodeKey>, Option<NodeKey>)> {
        match position {
            InsertPosition::FirstChild => {
                let anchor_node = self.node(anchor)?;
                let old_first = anchor_node.structural().and_then(|s| s.first_child_key);
                Ok((anchor, None, old_first))
            }
            InsertPosition::LeftSibling => {
                let anchor_node = self.node(anchor)?;
                let parent = anchor_node
                    .parent_key()
                    .ok_or(SirixError::Usage("the document root has no siblings"))?;
                let old_left = anchor_node.structural().and_then(|s| s.left_sibling_key);
                Ok((parent, old_left, Some(anchor)))
            }
            InsertPosition::RightSibling => {
                let anchor_node = self.node(anchor)?;
                let parent = anchor_node
                    .parent_key()
                    .ok_or(SirixError::Usage("the document root has no siblings"))?;
                let old_right = anchor_node.structural().and_then(|s| s.right_sibling_key);
                Ok((parent, Some(anchor), old_right))
            }
        }
    }

    /// Patches `parent`, `left`, and `right`'s link fields to splice
    /// `new_key` in between them. `new_key`'s own link fields must already
    /// match `left`/`right`.
    fn splice_into_links(
        &mut self,
        parent_key: NodeKey,
        new_key: NodeKey,
        left: Option<NodeKey>,
        right: Option<NodeKey>,
    ) -> Result<()> {
        let mut parent = self.stage(parent_key)?;
        parent.increment_child_count();
        if left.is_none() {
            parent.set_first_child(Some(new_key));
        }
        self.store(&parent)?;
        if let Some(l) = left {
            let mut left_node = self.stage(l)?;
            left_node.set_right_sibling(Some(new_key));
            self.store(&left_node)?;
        }
        if let Some(r) = right {
            let mut right_node = self.stage(r)?;
            right_node.set_left_sibling(Some(new_key));
            self.store(&right_node)?;
        }
        Ok(())
    }

    fn finish_insert(
        &mut self,
        parent_key: NodeKey,
        left: Option<NodeKey>,
        right: Option<NodeKey>,
        mut node: Node,
    ) -> Result<NodeKey> {
        let new_key = self.ptx().create_entry(PageFamily::Record, Vec::new())?;
        set_node_key(&mut node, new_key);
        let leaf_hash = leaf_content_hash(&node);
        node.set_hash(leaf_hash);
        self.store(&node)?;
        self.splice_into_links(parent_key, new_key, left, right)?;
        self.adjust_descendant_counts(Some(parent_key), 1)?;
        self.propagate_hash_add(Some(parent_key), leaf_hash)?;
        self.modification_count += 1;
        self.maybe_auto_commit()?;
        Ok(new_key)
    }

    pub fn insert_element_as_first_child(
        &mut self,
        parent: NodeKey,
        prefix: Option<&str>,
        local_name: &str,
        uri: &str,
    ) -> Result<NodeKey> {
        self.insert_element(parent, InsertPosition::FirstChild, prefix, local_name, uri)
    }

    pub fn insert_element_as_left_sibling(
        &mut self,
        anchor: NodeKey,
        prefix: Option<&str>,
        local_name: &str,
        uri: &str,
    ) -> Result<NodeKey> {
        self.insert_element(anchor, InsertPosition::LeftSibling, prefix, local_name, uri)
    }

    pub fn insert_element_as_right_sibling(
        &mut self,
        anchor: NodeKey,
        prefix: Option<&str>,
        local_name: &str,
        uri: &str,
    ) -> Result<NodeKey> {
        self.insert_element(anchor, InsertPosition::RightSibling, prefix, local_name, uri)
    }

    fn insert_element(
        &mut self,
        anchor: NodeKey,
        position: InsertPosition,
        prefix: Option<&str>,
        local_name: &str,
        uri: &str,
    ) -> Result<NodeKey> {
        let qname = QName::new(prefix, local_name)?;
        let (parent_key, left, right) = self.resolve_insert_links(anchor, position)?;
        let name_key = self.names.intern(&qname.to_qualified());
        let uri_key = self.names.intern(uri);
        let parent_path_key = self.path_node_key_of(parent_key)?;
        let path_node_key = self.resolve_path_node(parent_path_key, name_key, uri_key, NodeKind::Element)?;

        self.finish_insert(
            parent_key,
            left,
            right,
            Node::Element {
                key: NodeKey(0),
                parent_key,
                hash: 0,
                structural: StructuralData {
                    left_sibling_key: left,
                    right_sibling_key: right,
                    ..Default::default()
                },
                named: NamedData { name_key, uri_key, path_node_key: Some(path_node_key) },
                attributes: Vec::new(),
                namespaces: Vec::new(),
            },
        )
    }

    pub fn insert_comment_as_first_child(&mut self, parent: NodeKey, value: Vec<u8>) -> Result<NodeKey> {
        self.insert_comment(parent, InsertPosition::FirstChild, value)
    }

    pub fn insert_comment_as_left_sibling(&mut self, anchor: NodeKey, value: Vec<u8>) -> Result<NodeKey> {
        self.insert_comment(anchor, InsertPosition::LeftSibling, value)
    }

    pub fn insert_comment_as_right_sibling(&mut self, anchor: NodeKey, value: Vec<u8>) -> Result<NodeKey> {
        self.insert_comment(anchor, InsertPosition::RightSibling, value)
    }

    fn insert_comment(&mut self, anchor: NodeKey, position: InsertPosition, value: Vec<u8>) -> Result<NodeKey> {
        let (parent_key, left, right) = self.resolve_insert_links(anchor, position)?;
        self.finish_insert(
            parent_key,
            left,
            right,
            Node::Comment {
                key: NodeKey(0),
                parent_key,
                hash: 0,
                structural: StructuralData {
                    left_sibling_key: left,
                    right_sibling_key: right,
                    ..Default::default()
                },
                valued: ValuedData { value, compressed: false },
            },
        )
    }

    pub fn insert_pi_as_first_child(&mut self, parent: NodeKey, target: &str, data: Vec<u8>) -> Result<NodeKey> {
        self.insert_pi(parent, InsertPosition::FirstChild, target, data)
    }

    pub fn insert_pi_as_left_sibling(&mut self, anchor: NodeKey, target: &str, data: Vec<u8>) -> Result<NodeKey> {
        self.insert_pi(anchor, InsertPosition::LeftSibling, target, data)
    }

    pub fn insert_pi_as_right_sibling(&mut self, anchor: NodeKey, target: &str, data: Vec<u8>) -> Result<NodeKey> {
        self.insert_pi(anchor, InsertPosition::RightSibling, target, data)
    }

    fn insert_pi(
        &mut self,
        anchor: NodeKey,
        position: InsertPosition,
        target: &str,
        data: Vec<u8>,
    ) -> Result<NodeKey> {
        let qname = QName::new(None, target)?;
        let (parent_key, left, right) = self.resolve_insert_links(anchor, position)?;
        let name_key = self.names.intern(&qname.to_qualified());
        self.finish_insert(
            parent_key,
            left,
            right,
            Node::ProcessingInstruction {
                key: NodeKey(0),
                parent_key,
                hash: 0,
                structural: StructuralData {
                    left_sibling_key: left,
                    right_sibling_key: right,
                    ..Default::default()
                },
                named: NamedData { name_key, uri_key: 0, path_node_key: None },
                valued: ValuedData { value: data, compressed: false },
            },
        )
    }

    pub fn insert_text_as_first_child(&mut self, parent: NodeKey, value: Vec<u8>) -> Result<NodeKey> {
        self.insert_text(parent, InsertPosition::FirstChild, value)
    }

    pub fn insert_text_as_left_sibling(&mut self, anchor: NodeKey, value: Vec<u8>) -> Result<NodeKey> {
        self.insert_text(anchor, InsertPosition::LeftSibling, value)
    }

    pub fn insert_text_as_right_sibling(&mut self, anchor: NodeKey, value: Vec<u8>) -> Result<NodeKey> {
        self.insert_text(anchor, InsertPosition::RightSibling, value)
    }

    /// Inserts `value` as a text node, coalescing into an adjacent text
    /// sibling instead of creating a second one (spec §4.3: "no two
    /// adjacent text nodes").
    fn insert_text(&mut self, anchor: NodeKey, position: InsertPosition, value: Vec<u8>) -> Result<NodeKey> {
        let (parent_key, left, right) = self.resolve_insert_links(anchor, position)?;

        if let Some(l) = left {
            if matches!(self.node(l)?, Node::Text { .. }) {
                let mut existing = self.node(l)?.valued().expect("checked above").value.clone();
                existing.extend_from_slice(&value);
                self.set_value(l, existing)?;
                return Ok(l);
            }
        }
        if let Some(r) = right {
            if matches!(self.node(r)?, Node::Text { .. }) {
                let mut combined = value.clone();
                combined.extend_from_slice(&self.node(r)?.valued().expect("checked above").value);
                self.set_value(r, combined)?;
                return Ok(r);
            }
        }

        let new_key = self.finish_insert(
            parent_key,
            left,
            right,
            Node::Text {
                key: NodeKey(0),
                parent_key,
                hash: 0,
                structural: StructuralData {
                    left_sibling_key: left,
                    right_sibling_key: right,
                    ..Default::default()
                },
                valued: ValuedData { value: value.clone(), compressed: false },
            },
        )?;
        self.value_index.insert(&value, new_key);
        Ok(new_key)
    }

    /// Inserts `x="1"`-style attributes, overwriting the value in place
    /// when `owner` already carries an attribute of the same qualified
    /// name. Equivalent to `insert_attribute(owner, ..., true)`.
    pub fn insert_attribute(
        &mut self,
        owner: NodeKey,
        prefix: Option<&str>,
        local_name: &str,
        uri: &str,
        value: Vec<u8>,
    ) -> Result<NodeKey> {
        self.insert_attribute_with(owner, prefix, local_name, uri, value, true)
    }

    /// Like [`Self::insert_attribute`], but `overwrite = false` rejects a
    /// same-name attribute with [`SirixError::DuplicateAttribute`] instead
    /// of updating it (spec §4.9: "either overwrite value or fail").
    pub fn insert_attribute_with(
        &mut self,
        owner: NodeKey,
        prefix: Option<&str>,
        local_name: &str,
        uri: &str,
        value: Vec<u8>,
        overwrite: bool,
    ) -> Result<NodeKey> {
        let qname = QName::new(prefix, local_name)?;
        let name_key = self.names.intern(&qname.to_qualified());
        let uri_key = self.names.intern(uri);

        let owner_node = self.node(owner)?;
        for &existing in owner_node.attributes() {
            let attr = self.node(existing)?;
            if let Some(named) = attr.named() {
                if named.name_key == name_key && named.uri_key == uri_key {
                    if overwrite {
                        self.set_value(existing, value)?;
                        return Ok(existing);
                    }
                    return Err(SirixError::DuplicateAttribute);
                }
            }
        }

        let parent_path_key = self.path_node_key_of(owner)?;
        let path_node_key = self.resolve_path_node(parent_path_key, name_key, uri_key, NodeKind::Attribute)?;

        let new_key = self.ptx().create_entry(PageFamily::Record, Vec::new())?;
        let mut node = Node::Attribute {
            key: new_key,
            parent_key: owner,
            hash: 0,
            named: NamedData { name_key, uri_key, path_node_key: Some(path_node_key) },
            valued: ValuedData { value: value.clone(), compressed: false },
        };
        let leaf_hash = leaf_content_hash(&node);
        node.set_hash(leaf_hash);
        self.store(&node)?;

        let mut owner_mut = self.stage(owner)?;
        owner_mut
            .attributes_mut()
            .ok_or(SirixError::Usage("attributes may only attach to elements"))?
            .push(new_key);
        self.store(&owner_mut)?;

        self.value_index.insert(&value, new_key);
        self.propagate_hash_add(Some(owner), leaf_hash)?;
        self.modification_count += 1;
        self.maybe_auto_commit()?;
        Ok(new_key)
    }

    pub fn insert_namespace(&mut self, owner: NodeKey, prefix: &str, uri: &str) -> Result<NodeKey> {
        let name_key = self.names.intern(prefix);
        let uri_key = self.names.intern(uri);
        let parent_path_key = self.path_node_key_of(owner)?;
        let path_node_key = self.resolve_path_node(parent_path_key, name_key, uri_key, NodeKind::Namespace)?;

        let new_key = self.ptx().create_entry(PageFamily::Record, Vec::new())?;
        let mut node = Node::Namespace {
            key: new_key,
            parent_key: owner,
            hash: 0,
            named: NamedData { name_key, uri_key, path_node_key: Some(path_node_key) },
        };
        let leaf_hash = leaf_content_hash(&node);
        node.set_hash(leaf_hash);
        self.store(&node)?;

        let mut owner_mut = self.stage(owner)?;
        owner_mut
            .namespaces_mut()
            .ok_or(SirixError::Usage("namespaces may only attach to elements"))?
            .push(new_key);
        self.store(&owner_mut)?;

        self.propagate_hash_add(Some(owner), leaf_hash)?;
        self.modification_count += 1;
        self.maybe_auto_commit()?;
        Ok(new_key)
    }

    /// Overwrites a text/attribute/comment/PI node's value in place.
    pub fn set_value(&mut self, key: NodeKey, new_value: Vec<u8>) -> Result<()> {
        let mut node = self.stage(key)?;
        if node.valued().is_none() {
            return Err(SirixError::Usage("node has no value"));
        }
        let old_leaf_hash = leaf_content_hash(&node);
        let old_value = node.valued().expect("checked above").value.clone();
        let parent = node.parent_key();
        node.valued_mut().expect("checked above").value = new_value.clone();
        let new_leaf_hash = leaf_content_hash(&node);
        node.set_hash(new_leaf_hash);
        let is_indexed = matches!(node, Node::Text { .. } | Node::Attribute { .. });
        self.store(&node)?;

        if is_indexed {
            self.value_index.remove(&old_value, key);
            self.value_index.insert(&new_value, key);
        }
        self.propagate_hash_update(parent, old_leaf_hash, new_leaf_hash)?;
        self.modification_count += 1;
        self.maybe_auto_commit()
    }

    /// Renames an element/attribute/namespace/PI, adapting the path-summary
    /// tree per `adapt_for_changed_node`'s cases (spec §4.10). When renaming
    /// forks or merges the path node, every descendant still pointing at
    /// the old path subtree is rebound onto the new one, same as a move.
    pub fn set_qname(&mut self, key: NodeKey, prefix: Option<&str>, local_name: &str, uri: &str) -> Result<()> {
        let qname = QName::new(prefix, local_name)?;
        let new_name_key = self.names.intern(&qname.to_qualified());
        let new_uri_key = self.names.intern(uri);

        let mut node = self.stage(key)?;
        let old_leaf_hash = leaf_content_hash(&node);
        let parent = node.parent_key();
        let old_path_key = node.named().and_then(|n| n.path_node_key);

        let new_path_key = match old_path_key {
            Some(path_key) => Some(self.path_summary.adapt_for_changed_node(
                path_key,
                new_name_key as u64,
                new_uri_key as u64,
            )?),
            None => None,
        };

        let named = node.named_mut().ok_or(SirixError::Usage("node has no name"))?;
        named.name_key = new_name_key;
        named.uri_key = new_uri_key;
        if let Some(path_key) = new_path_key {
            named.path_node_key = Some(path_key);
        }
        let new_leaf_hash = leaf_content_hash(&node);
        node.set_hash(new_leaf_hash);
        self.store(&node)?;

        if let (Some(new_key), Some(old_key)) = (new_path_key, old_path_key) {
            if new_key != old_key {
                self.rebind_descendants_path(key, new_key)?;
            }
        }

        self.propagate_hash_update(parent, old_leaf_hash, new_leaf_hash)?;
        self.modification_count += 1;
        self.maybe_auto_commit()
    }

    fn check_no_cycle(&mut self, subtree_root: NodeKey, destination: NodeKey) -> Result<()> {
        if subtree_root == destination {
            return Err(SirixError::CycleForbidden);
        }
        for key in self.ancestor_chain(Some(destination))? {
            if key == subtree_root {
                return Err(SirixError::CycleForbidden);
            }
        }
        Ok(())
    }

    fn detach_subtree(&mut self, root: NodeKey) -> Result<(NodeKey, u64, u64)> {
        let node = self.node(root)?;
        let parent = node
            .parent_key()
            .ok_or(SirixError::Usage("cannot move the document root"))?;
        let structural = node
            .structural()
            .ok_or(SirixError::Usage("only structural nodes can be moved"))?;
        let left = structural.left_sibling_key;
        let right = structural.right_sibling_key;
        let subtree_size = 1 + structural.descendant_count;
        let root_hash = node.hash().unwrap_or(0);

        match left {
            Some(l) => {
                let mut left_node = self.stage(l)?;
                left_node.set_right_sibling(right);
                self.store(&left_node)?;
            }
            None => {
                let mut parent_node = self.stage(parent)?;
                parent_node.set_first_child(right);
                self.store(&parent_node)?;
            }
        }
        if let Some(r) = right {
            let mut right_node = self.stage(r)?;
            right_node.set_left_sibling(left);
            self.store(&right_node)?;
        }
        let mut parent_node = self.stage(parent)?;
        parent_node.decrement_child_count();
        self.store(&parent_node)?;

        self.adjust_descendant_counts(Some(parent), -(subtree_size as i64))?;
        self.propagate_hash_remove(Some(parent), root_hash)?;
        self.merge_adjacent_text(left, right)?;
        Ok((parent, subtree_size, root_hash))
    }

    /// Enforces the "no two adjacent text siblings" invariant (spec §3.1,
    /// §4.9) wherever a mutation may have just made `left` and `right`
    /// immediate neighbors. Concatenates `right`'s value onto `left` and
    /// drops `right` when both are text nodes.
    fn merge_adjacent_text(&mut self, left: Option<NodeKey>, right: Option<NodeKey>) -> Result<()> {
        let (Some(l), Some(r)) = (left, right) else { return Ok(()) };
        if !matches!(self.node(l)?, Node::Text { .. }) || !matches!(self.node(r)?, Node::Text { .. }) {
            return Ok(());
        }
        let parent = self.node(l)?.parent_key();
        let mut left_value = self.node(l)?.valued().expect("checked above").value.clone();
        let right_node = self.node(r)?;
        left_value.extend_from_slice(&right_node.valued().expect("checked above").value);
        self.set_value(l, left_value)?;

        let right_structural = right_node.structural().expect("text is structural");
        let new_right_sibling = right_structural.right_sibling_key;
        let right_hash = right_node.hash().unwrap_or(0);
        let right_descendants = right_structural.descendant_count;

        let mut left_node = self.stage(l)?;
        left_node.set_right_sibling(new_right_sibling);
        self.store(&left_node)?;
        if let Some(rr) = new_right_sibling {
            let mut rr_node = self.stage(rr)?;
            rr_node.set_left_sibling(Some(l));
            self.store(&rr_node)?;
        }
        if let Some(valued) = right_node.valued() {
            self.value_index.remove(&valued.value, r);
        }
        self.ptx().remove_entry(r, PageFamily::Record)?;

        if let Some(p) = parent {
            let mut parent_node = self.stage(p)?;
            parent_node.decrement_child_count();
            self.store(&parent_node)?;
            self.adjust_descendant_counts(Some(p), -(1 + right_descendants as i64))?;
            self.propagate_hash_remove(Some(p), right_hash)?;
        }
        Ok(())
    }

    fn attach_subtree(
        &mut self,
        root: NodeKey,
        new_parent: NodeKey,
        left: Option<NodeKey>,
        right: Option<NodeKey>,
        subtree_size: u64,
        root_hash: u64,
    ) -> Result<()> {
        let mut node = self.stage(root)?;
        node.set_left_sibling(left);
        node.set_right_sibling(right);
        set_node_parent(&mut node, new_parent);
        self.store(&node)?;
        self.splice_into_links(new_parent, root, left, right)?;
        self.adjust_descendant_counts(Some(new_parent), subtree_size as i64)?;
        self.propagate_hash_add(Some(new_parent), root_hash)?;
        self.rebind_path_after_move(root, new_parent)?;

        // `root` only ever merges away as the target of text coalescing;
        // an element subtree's root is left untouched by either call.
        let merged_into_left = left.is_some() && matches!(self.node(root)?, Node::Text { .. });
        self.merge_adjacent_text(left, Some(root))?;
        let effective = if merged_into_left { left } else { Some(root) };
        self.merge_adjacent_text(effective, right)
    }

    pub fn move_subtree_to_first_child(&mut self, subtree_root: NodeKey, new_parent: NodeKey) -> Result<()> {
        self.check_no_cycle(subtree_root, new_parent)?;
        let (_, subtree_size, root_hash) = self.detach_subtree(subtree_root)?;
        let new_parent_node = self.node(new_parent)?;
        let old_first = new_parent_node.structural().and_then(|s| s.first_child_key);
        self.attach_subtree(subtree_root, new_parent, None, old_first, subtree_size, root_hash)?;
        self.modification_count += 1;
        self.maybe_auto_commit()
    }

    pub fn move_subtree_to_left_sibling(&mut self, subtree_root: NodeKey, anchor: NodeKey) -> Result<()> {
        self.check_no_cycle(subtree_root, anchor)?;
        let anchor_node = self.node(anchor)?;
        let new_parent = anchor_node
            .parent_key()
            .ok_or(SirixError::Usage("cannot move next to the document root"))?;
        let left = anchor_node.structural().and_then(|s| s.left_sibling_key);
        let (_, subtree_size, root_hash) = self.detach_subtree(subtree_root)?;
        self.attach_subtree(subtree_root, new_parent, left, Some(anchor), subtree_size, root_hash)?;
        self.modification_count += 1;
        self.maybe_auto_commit()
    }

    pub fn move_subtree_to_right_sibling(&mut self, subtree_root: NodeKey, anchor: NodeKey) -> Result<()> {
        self.check_no_cycle(subtree_root, anchor)?;
        let anchor_node = self.node(anchor)?;
        let new_parent = anchor_node
            .parent_key()
            .ok_or(SirixError::Usage("cannot move next to the document root"))?;
        let right = anchor_node.structural().and_then(|s| s.right_sibling_key);
        let (_, subtree_size, root_hash) = self.detach_subtree(subtree_root)?;
        self.attach_subtree(subtree_root, new_parent, Some(anchor), right, subtree_size, root_hash)?;
        self.modification_count += 1;
        self.maybe_auto_commit()
    }

    fn collect_subtree_postorder(&mut self, root: NodeKey) -> Result<Vec<NodeKey>> {
        let mut out = Vec::new();
        self.collect_postorder_rec(root, &mut out)?;
        Ok(out)
    }

    fn collect_postorder_rec(&mut self, key: NodeKey, out: &mut Vec<NodeKey>) -> Result<()> {
        let node = self.node(key)?;
        if let Some(structural) = node.structural() {
            let mut child = structural.first_child_key;
            while let Some(ck) = child {
                self.collect_postorder_rec(ck, out)?;
                child = self.node(ck)?.structural().and_then(|s| s.right_sibling_key);
            }
        }
        for &a in node.attributes() {
            out.push(a);
        }
        for &n in node.namespaces() {
            out.push(n);
        }
        out.push(key);
        Ok(())
    }

    /// Removes `key` and, if structural, its whole subtree (spec §4.9).
    /// Attributes/namespaces are simply unlinked from their owner.
    pub fn remove(&mut self, key: NodeKey) -> Result<()> {
        let node = self.node(key)?;
        if matches!(node, Node::DocumentRoot { .. }) {
            return Err(SirixError::Usage("cannot remove the document root"));
        }
        if node.structural().is_some() {
            self.detach_subtree(key)?;
            self.remove_subtree_nodes(key)?;
        } else {
            self.remove_non_structural(key)?;
        }
        self.modification_count += 1;
        self.maybe_auto_commit()
    }

    fn remove_subtree_nodes(&mut self, root: NodeKey) -> Result<()> {
        let victims = self.collect_subtree_postorder(root)?;
        for victim in victims {
            let victim_node = self.node(victim)?;
            if let Some(path_key) = victim_node.named().and_then(|n| n.path_node_key) {
                self.path_summary.decrement_reference(path_key)?;
            }
            if matches!(victim_node, Node::Text { .. } | Node::Attribute { .. }) {
                if let Some(valued) = victim_node.valued() {
                    self.value_index.remove(&valued.value, victim);
                }
            }
            self.ptx().remove_entry(victim, PageFamily::Record)?;
        }
        Ok(())
    }

    fn remove_non_structural(&mut self, key: NodeKey) -> Result<()> {
        let node = self.node(key)?;
        let owner = node.parent_key().ok_or(SirixError::Usage("node has no owner"))?;
        let leaf_hash = node.hash().unwrap_or(0);

        let mut owner_node = self.stage(owner)?;
        if let Some(attrs) = owner_node.attributes_mut() {
            attrs.retain(|&k| k != key);
        }
        if let Some(namespaces) = owner_node.namespaces_mut() {
            namespaces.retain(|&k| k != key);
        }
        self.store(&owner_node)?;

        if let Some(path_key) = node.named().and_then(|n| n.path_node_key) {
            self.path_summary.decrement_reference(path_key)?;
        }
        if let Node::Attribute { valued, .. } = &node {
            self.value_index.remove(&valued.value, key);
        }
        self.ptx().remove_entry(key, PageFamily::Record)?;
        self.propagate_hash_remove(Some(owner), leaf_hash)
    }

    pub fn insert_subtree_as_first_child(&mut self, parent: NodeKey, events: &[NodeEvent]) -> Result<NodeKey> {
        self.insert_subtree(parent, InsertPosition::FirstChild, events)
    }

    pub fn insert_subtree_as_left_sibling(&mut self, anchor: NodeKey, events: &[NodeEvent]) -> Result<NodeKey> {
        self.insert_subtree(anchor, InsertPosition::LeftSibling, events)
    }

    pub fn insert_subtree_as_right_sibling(&mut self, anchor: NodeKey, events: &[NodeEvent]) -> Result<NodeKey> {
        self.insert_subtree(anchor, InsertPosition::RightSibling, events)
    }

    fn next_slot(
        stack: &[InsertFrame],
        last_top: Option<NodeKey>,
        anchor: NodeKey,
        position: InsertPosition,
    ) -> (NodeKey, InsertPosition) {
        if let Some(frame) = stack.last() {
            match frame.last_child {
                Some(prev) => (prev, InsertPosition::RightSibling),
                None => (frame.key, InsertPosition::FirstChild),
            }
        } else {
            match last_top {
                Some(prev) => (prev, InsertPosition::RightSibling),
                None => (anchor, position),
            }
        }
    }

    fn record_inserted(stack: &mut [InsertFrame], last_top: &mut Option<NodeKey>, new_key: NodeKey) {
        if let Some(frame) = stack.last_mut() {
            frame.last_child = Some(new_key);
        } else {
            *last_top = Some(new_key);
        }
    }

    /// Replays a flat event stream into a subtree (spec §4.3: bulk insert).
    /// `OpenElement`/`CloseElement` must balance; every other event becomes
    /// a child of the innermost open element, or a sibling of the subtree
    /// root at the top level.
    fn insert_subtree(&mut self, anchor: NodeKey, position: InsertPosition, events: &[NodeEvent]) -> Result<NodeKey> {
        let mut stack: Vec<InsertFrame> = Vec::new();
        let mut last_top: Option<NodeKey> = None;
        let mut root_key: Option<NodeKey> = None;

        for event in events {
            match event {
                NodeEvent::OpenElement { prefix, local_name, uri } => {
                    let (slot_anchor, slot_position) = Self::next_slot(&stack, last_top, anchor, position);
                    let new_key = match slot_position {
                        InsertPosition::FirstChild => {
                            self.insert_element_as_first_child(slot_anchor, prefix.as_deref(), local_name, uri)?
                        }
                        InsertPosition::LeftSibling => {
                            self.insert_element_as_left_sibling(slot_anchor, prefix.as_deref(), local_name, uri)?
                        }
                        InsertPosition::RightSibling => {
                            self.insert_element_as_right_sibling(slot_anchor, prefix.as_deref(), local_name, uri)?
                        }
                    };
                    if root_key.is_none() && stack.is_empty() {
                        root_key = Some(new_key);
                    }
                    Self::record_inserted(&mut stack, &mut last_top, new_key);
                    stack.push(InsertFrame { key: new_key, last_child: None });
                }
                NodeEvent::CloseElement => {
                    stack.pop().ok_or(SirixError::Usage("unbalanced CloseElement event"))?;
                }
                NodeEvent::Attribute { prefix, local_name, uri, value } => {
                    let owner = stack
                        .last()
                        .ok_or(SirixError::Usage("attribute event outside any open element"))?
                        .key;
                    self.insert_attribute(owner, prefix.as_deref(), local_name, uri, value.clone())?;
                }
                NodeEvent::Namespace { prefix, uri } => {
                    let owner = stack
                        .last()
                        .ok_or(SirixError::Usage("namespace event outside any open element"))?
                        .key;
                    self.insert_namespace(owner, prefix, uri)?;
                }
                NodeEvent::Text(value) => {
                    let (slot_anchor, slot_position) = Self::next_slot(&stack, last_top, anchor, position);
                    let new_key = match slot_position {
                        InsertPosition::FirstChild => self.insert_text_as_first_child(slot_anchor, value.clone())?,
                        InsertPosition::LeftSibling => self.insert_text_as_left_sibling(slot_anchor, value.clone())?,
                        InsertPosition::RightSibling => {
                            self.insert_text_as_right_sibling(slot_anchor, value.clone())?
                        }
                    };
                    if root_key.is_none() && stack.is_empty() {
                        root_key = Some(new_key);
                    }
                    Self::record_inserted(&mut stack, &mut last_top, new_key);
                }
                NodeEvent::Comment(value) => {
                    let (slot_anchor, slot_position) = Self::next_slot(&stack, last_top, anchor, position);
                    let new_key = match slot_position {
                        InsertPosition::FirstChild => self.insert_comment_as_first_child(slot_anchor, value.clone())?,
                        InsertPosition::LeftSibling => {
                            self.insert_comment_as_left_sibling(slot_anchor, value.clone())?
                        }
                        InsertPosition::RightSibling => {
                            self.insert_comment_as_right_sibling(slot_anchor, value.clone())?
                        }
                    };
                    if root_key.is_none() && stack.is_empty() {
                        root_key = Some(new_key);
                    }
                    Self::record_inserted(&mut stack, &mut last_top, new_key);
                }
                NodeEvent::ProcessingInstruction { target, data } => {
                    let (slot_anchor, slot_position) = Self::next_slot(&stack, last_top, anchor, position);
                    let new_key = match slot_position {
                        InsertPosition::FirstChild => self.insert_pi_as_first_child(slot_anchor, target, data.clone())?,
                        InsertPosition::LeftSibling => self.insert_pi_as_left_sibling(slot_anchor, target, data.clone())?,
                        InsertPosition::RightSibling => {
                            self.insert_pi_as_right_sibling(slot_anchor, target, data.clone())?
                        }
                    };
                    if root_key.is_none() && stack.is_empty() {
                        root_key = Some(new_key);
                    }
                    Self::record_inserted(&mut stack, &mut last_top, new_key);
                }
            }
        }

        if !stack.is_empty() {
            return Err(SirixError::Usage("event stream left elements unclosed"));
        }
        root_key.ok_or(SirixError::Usage("event stream produced no root node"))
    }

    fn split_qualified(&self, name_key: u32) -> Result<(Option<String>, String)> {
        let qualified = self.names.resolve(name_key).ok_or(SirixError::Corruption("dangling name key"))?;
        match QName::parse(qualified) {
            Ok(q) => Ok((q.prefix, q.local_name)),
            Err(_) => Ok((None, qualified.to_string())),
        }
    }

    fn read_events_from_source(&mut self, source: &PageReadTrx<'_, R>, root: NodeKey) -> Result<Vec<NodeEvent>> {
        let mut events = Vec::new();
        self.read_events_rec(source, root, &mut events)?;
        Ok(events)
    }

    fn read_events_rec(&mut self, source: &PageReadTrx<'_, R>, key: NodeKey, out: &mut Vec<NodeEvent>) -> Result<()> {
        let bytes = source.get_record(key, PageFamily::Record)?.ok_or(SirixError::NotFound("node"))?;
        let node = sirix_node::decode(&bytes)?;
        match &node {
            Node::Element { named, attributes, namespaces, structural, .. } => {
                let (prefix, local_name) = self.split_qualified(named.name_key)?;
                let uri = self.names.resolve(named.uri_key).unwrap_or("").to_string();
                out.push(NodeEvent::OpenElement { prefix, local_name, uri });

                for &ns in namespaces {
                    let ns_bytes = source.get_record(ns, PageFamily::Record)?.ok_or(SirixError::NotFound("node"))?;
                    if let Node::Namespace { named: ns_named, .. } = sirix_node::decode(&ns_bytes)? {
                        let prefix = self.names.resolve(ns_named.name_key).unwrap_or("").to_string();
                        let uri = self.names.resolve(ns_named.uri_key).unwrap_or("").to_string();
                        out.push(NodeEvent::Namespace { prefix, uri });
                    }
                }
                for &attr in attributes {
                    let attr_bytes =
                        source.get_record(attr, PageFamily::Record)?.ok_or(SirixError::NotFound("node"))?;
                    if let Node::Attribute { named: a_named, valued, .. } = sirix_node::decode(&attr_bytes)? {
                        let (a_prefix, a_local) = self.split_qualified(a_named.name_key)?;
                        let a_uri = self.names.resolve(a_named.uri_key).unwrap_or("").to_string();
                        out.push(NodeEvent::Attribute {
                            prefix: a_prefix,
                            local_name: a_local,
                            uri: a_uri,
                            value: valued.value.clone(),
                        });
                    }
                }

                let mut child = structural.first_child_key;
                while let Some(ck) = child {
                    self.read_events_rec(source, ck, out)?;
                    let child_bytes =
                        source.get_record(ck, PageFamily::Record)?.ok_or(SirixError::NotFound("node"))?;
                    child = sirix_node::decode(&child_bytes)?.structural().and_then(|s| s.right_sibling_key);
                }
                out.push(NodeEvent::CloseElement);
            }
            Node::Text { valued, .. } => out.push(NodeEvent::Text(valued.value.clone())),
            Node::Comment { valued, .. } => out.push(NodeEvent::Comment(valued.value.clone())),
            Node::ProcessingInstruction { named, valued, .. } => {
                let target = self.names.resolve(named.name_key).unwrap_or("").to_string();
                out.push(NodeEvent::ProcessingInstruction { target, data: valued.value.clone() });
            }
            _ => return Err(SirixError::Usage("node kind cannot be copied as a subtree")),
        }
        Ok(())
    }

    pub fn copy_subtree_as_first_child(
        &mut self,
        source: &PageReadTrx<'_, R>,
        source_root: NodeKey,
        dest_parent: NodeKey,
    ) -> Result<NodeKey> {
        let events = self.read_events_from_source(source, source_root)?;
        self.insert_subtree(dest_parent, InsertPosition::FirstChild, &events)
    }

    pub fn copy_subtree_as_right_sibling(
        &mut self,
        source: &PageReadTrx<'_, R>,
        source_root: NodeKey,
        dest_anchor: NodeKey,
    ) -> Result<NodeKey> {
        let events = self.read_events_from_source(source, source_root)?;
        self.insert_subtree(dest_anchor, InsertPosition::RightSibling, &events)
    }

    /// Inserts `events` as a right sibling of `target`, then removes
    /// `target` (spec §4.9: `replace_node`). The replacement therefore ends
    /// up in `target`'s old position among its former siblings.
    pub fn replace_node_with_events(&mut self, target: NodeKey, events: &[NodeEvent]) -> Result<NodeKey> {
        let replacement = self.insert_subtree(target, InsertPosition::RightSibling, events)?;
        self.remove(target)?;
        Ok(replacement)
    }

    /// As [`Self::replace_node_with_events`], but the replacement subtree is
    /// read live from another transaction's snapshot.
    pub fn replace_node_with_copy(
        &mut self,
        target: NodeKey,
        source: &PageReadTrx<'_, R>,
        source_root: NodeKey,
    ) -> Result<NodeKey> {
        let events = self.read_events_from_source(source, source_root)?;
        self.replace_node_with_events(target, &events)
    }

    /// Discards every live child of the document root and replays
    /// `target`'s children back in, effectively resetting the working
    /// revision's content to a historical snapshot (spec §4.9: `revertTo`).
    /// The revert itself becomes part of the next commit, as a new
    /// revision — history is append-only, so the reverted-from state
    /// remains independently readable.
    pub fn revert_to(&mut self, target: RevisionNumber) -> Result<()> {
        tracing::warn!(target = target.0, "reverting working revision to a historical snapshot");
        let source = PageReadTrx::open(
            self.reader,
            self.cache.clone(),
            target,
            self.salt,
            self.versioning,
            self.revisions_to_restore,
        )?;

        let root = self.root();
        let current_root = self.node(root)?;
        let mut child = current_root.structural().and_then(|s| s.first_child_key);
        let mut to_remove = Vec::new();
        while let Some(ck) = child {
            to_remove.push(ck);
            child = self.node(ck)?.structural().and_then(|s| s.right_sibling_key);
        }
        for ck in to_remove {
            self.remove(ck)?;
        }

        let Some(root_bytes) = source.get_record(root, PageFamily::Record)? else {
            return Ok(());
        };
        let Node::DocumentRoot { structural, .. } = sirix_node::decode(&root_bytes)? else {
            return Err(SirixError::Corruption("target revision root is not a document root"));
        };

        let mut source_child = structural.first_child_key;
        let mut last_inserted: Option<NodeKey> = None;
        while let Some(ck) = source_child {
            let events = self.read_events_from_source(&source, ck)?;
            let new_key = match last_inserted {
                None => self.insert_subtree(root, InsertPosition::FirstChild, &events)?,
                Some(prev) => self.insert_subtree(prev, InsertPosition::RightSibling, &events)?,
            };
            last_inserted = Some(new_key);

            let ck_bytes = source.get_record(ck, PageFamily::Record)?.ok_or(SirixError::NotFound("node"))?;
            source_child = sirix_node::decode(&ck_bytes)?.structural().and_then(|s| s.right_sibling_key);
        }
        Ok(())
    }

    fn persist_indexes(&mut self) -> Result<()> {
        let path_bytes = self.path_summary.encode();
        let value_bytes = self.value_index.encode();
        let name_bytes = self.names.encode();
        self.persist_blob(PageFamily::PathSummary, path_bytes)?;
        self.persist_blob(PageFamily::Cas, value_bytes)?;
        self.persist_blob(PageFamily::Name, name_bytes)?;
        Ok(())
    }

    fn persist_blob(&mut self, family: PageFamily, bytes: Vec<u8>) -> Result<()> {
        if self.ptx().get_record(NodeKey(0), family)?.is_some() {
            self.ptx().prepare_entry_for_modification(NodeKey(0), family)?;
            self.ptx().write_entry(NodeKey(0), family, bytes)?;
        } else {
            let key = self.ptx().create_entry(family, bytes)?;
            debug_assert_eq!(key, NodeKey(0));
        }
        Ok(())
    }

    fn run_pre_commit_hooks(&mut self) -> Result<()> {
        let mut hooks = std::mem::take(&mut self.pre_commit_hooks);
        for hook in hooks.iter_mut() {
            hook(self)?;
        }
        self.pre_commit_hooks = hooks;
        Ok(())
    }

    fn run_post_commit_hooks(&mut self) -> Result<()> {
        let mut hooks = std::mem::take(&mut self.post_commit_hooks);
        for hook in hooks.iter_mut() {
            hook(self)?;
        }
        self.post_commit_hooks = hooks;
        Ok(())
    }

    fn maybe_auto_commit(&mut self) -> Result<()> {
        let Some(threshold) = self.auto_commit_threshold else { return Ok(()) };
        if self.modification_count < threshold {
            return Ok(());
        }
        tracing::debug!(modification_count = self.modification_count, "auto-committing write transaction");
        self.run_pre_commit_hooks()?;
        self.persist_indexes()?;
        let page_trx = self.page_trx.take().expect("transaction is open");
        page_trx.commit(self.writer)?;
        self.run_post_commit_hooks()?;
        self.modification_count = 0;
        self.page_trx = Some(PageWriteTrx::begin(
            self.reader,
            self.cache.clone(),
            open_wal(self.wal_dir.as_deref())?,
            self.versioning,
            self.revisions_to_restore,
            self.salt,
        )?);
        Ok(())
    }

    /// Runs pre-commit hooks, persists the side indexes, and publishes the
    /// revision through the underlying page transaction (spec §4.7, §4.9).
    ///
    /// `page_trx.commit` consumes the underlying page transaction whether it
    /// succeeds or fails, so this transaction is marked closed before that
    /// call rather than after: a mid-commit I/O failure must surface as
    /// `Err` (spec §7), not as a panic from `Drop` finding a half-finished
    /// transaction.
    pub fn commit(mut self) -> Result<RevisionNumber> {
        self.run_pre_commit_hooks()?;
        self.persist_indexes()?;
        let page_trx = self.page_trx.take().expect("transaction is open");
        self.closed = true;
        let uber = page_trx.commit(self.writer)?;
        self.run_post_commit_hooks()?;
        tracing::debug!(revision = uber.current_revision.0, "committed write transaction");
        Ok(uber.current_revision)
    }

    /// Discards every staged change; the resource is left exactly as it was
    /// before this transaction opened.
    pub fn abort(mut self) -> Result<()> {
        if let Some(page_trx) = self.page_trx.take() {
            page_trx.abort()?;
        }
        self.closed = true;
        tracing::debug!("aborted write transaction");
        Ok(())
    }

    /// Releases the transaction without committing. Idempotent: closing an
    /// already-committed or already-aborted transaction is a no-op. Closing
    /// one with pending, unpublished mutations aborts them (per `abort`) but
    /// reports `SirixError::DirtyOnClose` rather than silently discarding the
    /// caller's unfinished work (spec §7).
    pub fn close(mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        let dirty = self.modification_count > 0;
        if let Some(page_trx) = self.page_trx.take() {
            let _ = page_trx.abort();
        }
        self.closed = true;
        if dirty {
            tracing::warn!("write transaction closed with uncommitted modifications");
            Err(SirixError::DirtyOnClose)
        } else {
            Ok(())
        }
    }
}

/// Builds the write-ahead log for a new page transaction: disk-backed (with
/// a real commit marker and spill files) when `wal_dir` is given, purely
/// in-memory otherwise.
fn open_wal(wal_dir: Option<&Path>) -> Result<WriteAheadLog> {
    match wal_dir {
        Some(dir) => WriteAheadLog::open(dir, sirix_wal::DEFAULT_SPILL_THRESHOLD),
        None => Ok(WriteAheadLog::new_in_memory()),
    }
}

fn set_node_key(node: &mut Node, new_key: NodeKey) {
    match node {
        Node::DocumentRoot { key, .. }
        | Node::Element { key, .. }
        | Node::Text { key, .. }
        | Node::Attribute { key, .. }
        | Node::Namespace { key, .. }
        | Node::Comment { key, .. }
        | Node::ProcessingInstruction { key, .. }
        | Node::Deleted { key } => *key = new_key,
    }
}

fn set_node_parent(node: &mut Node, new_parent: NodeKey) {
    match node {
        Node::Element { parent_key, .. }
        | Node::Text { parent_key, .. }
        | Node::Attribute { parent_key, .. }
        | Node::Namespace { parent_key, .. }
        | Node::Comment { parent_key, .. }
        | Node::ProcessingInstruction { parent_key, .. } => *parent_key = new_parent,
        Node::DocumentRoot { .. } | Node::Deleted { .. } => {}
    }
}

impl<'r, R: PageReader, W: PageWriter> Drop for NodeWriteTrx<'r, R, W> {
    fn drop(&mut self) {
        if !self.closed {
            if let Some(page_trx) = self.page_trx.take() {
                let _ = page_trx.abort();
            }
        }
    }
}
