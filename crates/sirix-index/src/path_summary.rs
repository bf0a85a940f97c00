use std::collections::HashMap;

use sirix_axis::{NodeSource, NodeView, PostOrderAxis};
use sirix_node::NodeKind;
use sirix_types::{NodeKey, Result, SirixError};

/// A node in the path-summary tree: one entry per distinct root-to-node
/// path, reference-counted by how many live main-tree nodes share it
/// (spec §3.6).
#[derive(Clone, Debug)]
pub struct PathNode {
    pub path_node_key: NodeKey,
    pub parent: Option<NodeKey>,
    pub first_child: Option<NodeKey>,
    pub right_sibling: Option<NodeKey>,
    pub left_sibling: Option<NodeKey>,
    pub name_key: u64,
    pub uri_key: u64,
    pub kind: NodeKind,
    pub level: u32,
    pub reference_count: u64,
}

/// A view onto [`PathNode`] for [`sirix_axis`]'s generic axes.
#[derive(Copy, Clone)]
pub struct PathNodeView {
    first_child: Option<NodeKey>,
    right_sibling: Option<NodeKey>,
    left_sibling: Option<NodeKey>,
    parent: Option<NodeKey>,
    name: Option<(u64, u64)>,
    kind_tag: u8,
    level: u32,
}

impl NodeView for PathNodeView {
    fn first_child(&self) -> Option<NodeKey> {
        self.first_child
    }
    fn right_sibling(&self) -> Option<NodeKey> {
        self.right_sibling
    }
    fn left_sibling(&self) -> Option<NodeKey> {
        self.left_sibling
    }
    fn parent(&self) -> Option<NodeKey> {
        self.parent
    }
    fn name(&self) -> Option<(u64, u64)> {
        self.name
    }
    fn kind_tag(&self) -> u8 {
        self.kind_tag
    }
    fn level(&self) -> u32 {
        self.level
    }
}

fn kind_tag(kind: NodeKind) -> u8 {
    match kind {
        NodeKind::DocumentRoot => 0,
        NodeKind::Element => 1,
        NodeKind::Text => 2,
        NodeKind::Attribute => 3,
        NodeKind::Namespace => 4,
        NodeKind::Comment => 5,
        NodeKind::ProcessingInstruction => 6,
    }
}

fn kind_from_tag(tag: u8) -> Result<NodeKind> {
    Ok(match tag {
        0 => NodeKind::DocumentRoot,
        1 => NodeKind::Element,
        2 => NodeKind::Text,
        3 => NodeKind::Attribute,
        4 => NodeKind::Namespace,
        5 => NodeKind::Comment,
        6 => NodeKind::ProcessingInstruction,
        _ => return Err(SirixError::Corruption("path node kind tag")),
    })
}

fn put_option_key(buf: &mut Vec<u8>, key: Option<NodeKey>) {
    match key {
        Some(k) => {
            buf.push(1);
            buf.extend_from_slice(&k.0.to_be_bytes());
        }
        None => buf.push(0),
    }
}

fn read_option_key(bytes: &[u8], pos: &mut usize) -> Result<Option<NodeKey>> {
    let tag = read_u8(bytes, pos)?;
    if tag == 0 {
        return Ok(None);
    }
    Ok(Some(NodeKey(read_u64(bytes, pos)?)))
}

fn read_u8(bytes: &[u8], pos: &mut usize) -> Result<u8> {
    let v = *bytes.get(*pos).ok_or(SirixError::Corruption("path summary truncated"))?;
    *pos += 1;
    Ok(v)
}

fn read_u32(bytes: &[u8], pos: &mut usize) -> Result<u32> {
    let end = *pos + 4;
    let slice = bytes.get(*pos..end).ok_or(SirixError::Corruption("path summary truncated"))?;
    *pos = end;
    Ok(u32::from_be_bytes(slice.try_into().unwrap()))
}

fn read_u64(bytes: &[u8], pos: &mut usize) -> Result<u64> {
    let end = *pos + 8;
    let slice = bytes.get(*pos..end).ok_or(SirixError::Corruption("path summary truncated"))?;
    *pos = end;
    Ok(u64::from_be_bytes(slice.try_into().unwrap()))
}

/// The path-summary tree itself: one per resource, mutated transactionally
/// alongside the main node tree.
pub struct PathSummaryTree {
    nodes: HashMap<u64, PathNode>,
    next_key: u64,
    root: NodeKey,
}

impl PathSummaryTree {
    /// A fresh tree with a single `DocumentRoot` path node at level 0.
    pub fn bootstrap() -> Self {
        let root = NodeKey(0);
        let mut nodes = HashMap::new();
        nodes.insert(
            0,
            PathNode {
                path_node_key: root,
                parent: None,
                first_child: None,
                right_sibling: None,
                left_sibling: None,
                name_key: 0,
                uri_key: 0,
                kind: NodeKind::DocumentRoot,
                level: 0,
                reference_count: 1,
            },
        );
        Self {
            nodes,
            next_key: 1,
            root,
        }
    }

    pub fn root(&self) -> NodeKey {
        self.root
    }

    pub fn get(&self, key: NodeKey) -> Option<&PathNode> {
        self.nodes.get(&key.0)
    }

    fn get_mut(&mut self, key: NodeKey) -> Result<&mut PathNode> {
        self.nodes
            .get_mut(&key.0)
            .ok_or(SirixError::NotFound("path node"))
    }

    fn last_child(&self, parent: NodeKey) -> Option<NodeKey> {
        let mut current = self.nodes.get(&parent.0)?.first_child?;
        while let Some(next) = self.nodes.get(&current.0).and_then(|n| n.right_sibling) {
            current = next;
        }
        Some(current)
    }

    /// Finds a child of `parent` matching `(name_key, uri_key, kind)`,
    /// excluding `skip` if given.
    pub fn child_matching(
        &self,
        parent: NodeKey,
        name_key: u64,
        uri_key: u64,
        kind: NodeKind,
        skip: Option<NodeKey>,
    ) -> Option<NodeKey> {
        let mut current = self.nodes.get(&parent.0)?.first_child;
        while let Some(key) = current {
            let node = self.nodes.get(&key.0)?;
            if Some(key) != skip && node.name_key == name_key && node.uri_key == uri_key && node.kind == kind {
                return Some(key);
            }
            current = node.right_sibling;
        }
        None
    }

    /// Appends a brand-new path-summary child under `parent` with
    /// `reference_count = 1`.
    pub fn insert_child(
        &mut self,
        parent: NodeKey,
        name_key: u64,
        uri_key: u64,
        kind: NodeKind,
    ) -> Result<NodeKey> {
        let level = self.get(parent).ok_or(SirixError::NotFound("path node"))?.level + 1;
        let key = NodeKey(self.next_key);
        self.next_key += 1;
        let last_child = self.last_child(parent);

        self.nodes.insert(
            key.0,
            PathNode {
                path_node_key: key,
                parent: Some(parent),
                first_child: None,
                right_sibling: None,
                left_sibling: last_child,
                name_key,
                uri_key,
                kind,
                level,
                reference_count: 1,
            },
        );
        match last_child {
            Some(sibling) => self.get_mut(sibling)?.right_sibling = Some(key),
            None => self.get_mut(parent)?.first_child = Some(key),
        }
        Ok(key)
    }

    /// Implements the `adapt_for_changed_node` cases (spec §4.10): renaming
    /// in place when `path_key` is solely referenced, and either merging
    /// into an existing sibling/child path node or forking a fresh one
    /// otherwise.
    pub fn adapt_for_changed_node(
        &mut self,
        path_key: NodeKey,
        new_name_key: u64,
        new_uri_key: u64,
    ) -> Result<NodeKey> {
        let node = self.get(path_key).ok_or(SirixError::NotFound("path node"))?.clone();

        if node.reference_count == 1 {
            let sibling_match = node
                .parent
                .and_then(|p| self.child_matching(p, new_name_key, new_uri_key, node.kind, Some(path_key)));
            if let Some(sibling) = sibling_match {
                self.get_mut(sibling)?.reference_count += 1;
                self.unlink_and_remove(path_key)?;
                return Ok(sibling);
            }
            let entry = self.get_mut(path_key)?;
            entry.name_key = new_name_key;
            entry.uri_key = new_uri_key;
            return Ok(path_key);
        }

        self.get_mut(path_key)?.reference_count -= 1;
        self.prune_if_unreferenced(path_key)?;

        let parent = node.parent.ok_or(SirixError::Usage("path node has no parent"))?;
        if let Some(existing) = self.child_matching(parent, new_name_key, new_uri_key, node.kind, None) {
            self.get_mut(existing)?.reference_count += 1;
            Ok(existing)
        } else {
            self.insert_child(parent, new_name_key, new_uri_key, node.kind)
        }
    }

    /// Bumps `key`'s reference count when an existing path node is reused
    /// by another live main-tree node.
    pub fn increment_reference(&mut self, key: NodeKey) -> Result<()> {
        self.get_mut(key)?.reference_count += 1;
        Ok(())
    }

    /// Rebinds a single named node's path reference after it (or an
    /// ancestor) moved under `new_parent` (spec §4.9/§4.10, the
    /// `MOVED`/`MOVEDSAMELEVEL` cases): reuses a matching child path node
    /// under `new_parent` if one exists, otherwise forks a fresh path
    /// subtree there. `old_path_key`'s reference count is released either
    /// way; when `new_parent`'s matching child turns out to be
    /// `old_path_key` itself (a same-level move that didn't change the
    /// path shape), this is a no-op.
    pub fn rebind_after_move(
        &mut self,
        old_path_key: NodeKey,
        new_parent: NodeKey,
        name_key: u64,
        uri_key: u64,
        kind: NodeKind,
    ) -> Result<NodeKey> {
        if let Some(existing) = self.child_matching(new_parent, name_key, uri_key, kind, Some(old_path_key)) {
            self.get_mut(existing)?.reference_count += 1;
            self.get_mut(old_path_key)?.reference_count -= 1;
            self.prune_if_unreferenced(old_path_key)?;
            Ok(existing)
        } else if self.get(old_path_key).map(|n| n.parent) == Some(Some(new_parent)) {
            Ok(old_path_key)
        } else {
            self.get_mut(old_path_key)?.reference_count -= 1;
            self.prune_if_unreferenced(old_path_key)?;
            self.insert_child(new_parent, name_key, uri_key, kind)
        }
    }

    /// Serializes the whole tree to a flat byte blob, one record per path
    /// node in key order.
    pub fn encode(&self) -> Vec<u8> {
        let mut order: Vec<&PathNode> = self.nodes.values().collect();
        order.sort_by_key(|n| n.path_node_key.0);

        let mut buf = Vec::new();
        buf.extend_from_slice(&self.next_key.to_be_bytes());
        buf.extend_from_slice(&self.root.0.to_be_bytes());
        buf.extend_from_slice(&(order.len() as u32).to_be_bytes());
        for node in order {
            buf.extend_from_slice(&node.path_node_key.0.to_be_bytes());
            put_option_key(&mut buf, node.parent);
            put_option_key(&mut buf, node.first_child);
            put_option_key(&mut buf, node.right_sibling);
            put_option_key(&mut buf, node.left_sibling);
            buf.extend_from_slice(&node.name_key.to_be_bytes());
            buf.extend_from_slice(&node.uri_key.to_be_bytes());
            buf.push(kind_tag(node.kind));
            buf.extend_from_slice(&node.level.to_be_bytes());
            buf.extend_from_slice(&node.reference_count.to_be_bytes());
        }
        buf
    }

    /// Inverse of [`Self::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut pos = 0usize;
        let next_key = read_u64(bytes, &mut pos)?;
        let root = NodeKey(read_u64(bytes, &mut pos)?);
        let count = read_u32(bytes, &mut pos)?;

        let mut nodes = HashMap::with_capacity(count as usize);
        for _ in 0..count {
            let path_node_key = NodeKey(read_u64(bytes, &mut pos)?);
            let parent = read_option_key(bytes, &mut pos)?;
            let first_child = read_option_key(bytes, &mut pos)?;
            let right_sibling = read_option_key(bytes, &mut pos)?;
            let left_sibling = read_option_key(bytes, &mut pos)?;
            let name_key = read_u64(bytes, &mut pos)?;
            let uri_key = read_u64(bytes, &mut pos)?;
            let kind = kind_from_tag(read_u8(bytes, &mut pos)?)?;
            let level = read_u32(bytes, &mut pos)?;
            let reference_count = read_u64(bytes, &mut pos)?;
            nodes.insert(
                path_node_key.0,
                PathNode {
                    path_node_key,
                    parent,
                    first_child,
                    right_sibling,
                    left_sibling,
                    name_key,
                    uri_key,
                    kind,
                    level,
                    reference_count,
                },
            );
        }
        Ok(Self { nodes, next_key, root })
    }

    /// Decrements `key`'s reference count; if it reaches zero, removes it
    /// and its descendants (spec §4.10: "removing the last node bearing a
    /// path also removes the path").
    pub fn decrement_reference(&mut self, key: NodeKey) -> Result<()> {
        self.get_mut(key)?.reference_count -= 1;
        self.prune_if_unreferenced(key)
    }

    fn prune_if_unreferenced(&mut self, key: NodeKey) -> Result<()> {
        if self.get(key).map(|n| n.reference_count) != Some(0) {
            return Ok(());
        }
        let doomed: Vec<NodeKey> = PostOrderAxis::new(self, key, true).collect();
        for victim in doomed {
            self.unlink_and_remove(victim)?;
        }
        Ok(())
    }

    fn unlink_and_remove(&mut self, key: NodeKey) -> Result<()> {
        let node = self.nodes.remove(&key.0).ok_or(SirixError::NotFound("path node"))?;
        match node.left_sibling {
            Some(left) => {
                if let Some(left_node) = self.nodes.get_mut(&left.0) {
                    left_node.right_sibling = node.right_sibling;
                }
            }
            None => {
                if let Some(parent) = node.parent.and_then(|p| self.nodes.get_mut(&p.0)) {
                    parent.first_child = node.right_sibling;
                }
            }
        }
        if let Some(right) = node.right_sibling {
            if let Some(right_node) = self.nodes.get_mut(&right.0) {
                right_node.left_sibling = node.left_sibling;
            }
        }
        Ok(())
    }
}

impl NodeSource for PathSummaryTree {
    type View = PathNodeView;

    fn view(&self, key: NodeKey) -> Option<PathNodeView> {
        let node = self.nodes.get(&key.0)?;
        Some(PathNodeView {
            first_child: node.first_child,
            right_sibling: node.right_sibling,
            left_sibling: node.left_sibling,
            parent: node.parent,
            name: Some((node.name_key, node.uri_key)),
            kind_tag: kind_tag(node.kind),
            level: node.level,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_child_appends_in_sibling_order() {
        let mut tree = PathSummaryTree::bootstrap();
        let root = tree.root();
        let a = tree.insert_child(root, 1, 0, NodeKind::Element).unwrap();
        let b = tree.insert_child(root, 2, 0, NodeKind::Element).unwrap();
        assert_eq!(tree.get(root).unwrap().first_child, Some(a));
        assert_eq!(tree.get(a).unwrap().right_sibling, Some(b));
    }

    #[test]
    fn sole_reference_setname_renames_in_place_without_sibling_match() {
        let mut tree = PathSummaryTree::bootstrap();
        let root = tree.root();
        let a = tree.insert_child(root, 1, 0, NodeKind::Element).unwrap();
        let renamed = tree.adapt_for_changed_node(a, 99, 0).unwrap();
        assert_eq!(renamed, a);
        assert_eq!(tree.get(a).unwrap().name_key, 99);
    }

    #[test]
    fn sole_reference_setname_merges_into_existing_sibling() {
        let mut tree = PathSummaryTree::bootstrap();
        let root = tree.root();
        let a = tree.insert_child(root, 1, 0, NodeKind::Element).unwrap();
        let b = tree.insert_child(root, 2, 0, NodeKind::Element).unwrap();
        let merged = tree.adapt_for_changed_node(a, 2, 0).unwrap();
        assert_eq!(merged, b);
        assert_eq!(tree.get(b).unwrap().reference_count, 2);
        assert!(tree.get(a).is_none());
    }

    #[test]
    fn multiple_references_forks_a_new_path_node() {
        let mut tree = PathSummaryTree::bootstrap();
        let root = tree.root();
        let a = tree.insert_child(root, 1, 0, NodeKind::Element).unwrap();
        tree.get_mut(a).unwrap().reference_count = 2;
        let forked = tree.adapt_for_changed_node(a, 5, 0).unwrap();
        assert_ne!(forked, a);
        assert_eq!(tree.get(a).unwrap().reference_count, 1);
        assert_eq!(tree.get(forked).unwrap().name_key, 5);
    }

    #[test]
    fn encode_decode_round_trips_the_whole_tree() {
        let mut tree = PathSummaryTree::bootstrap();
        let root = tree.root();
        let a = tree.insert_child(root, 1, 0, NodeKind::Element).unwrap();
        tree.insert_child(a, 2, 0, NodeKind::Attribute).unwrap();
        tree.increment_reference(a).unwrap();

        let bytes = tree.encode();
        let restored = PathSummaryTree::decode(&bytes).unwrap();
        assert_eq!(restored.root(), root);
        assert_eq!(restored.get(a).unwrap().reference_count, 2);
        assert_eq!(restored.get(a).unwrap().first_child.is_some(), true);
    }

    #[test]
    fn decrement_to_zero_removes_subtree() {
        let mut tree = PathSummaryTree::bootstrap();
        let root = tree.root();
        let a = tree.insert_child(root, 1, 0, NodeKind::Element).unwrap();
        let child = tree.insert_child(a, 2, 0, NodeKind::Element).unwrap();
        tree.decrement_reference(a).unwrap();
        assert!(tree.get(a).is_none());
        assert!(tree.get(child).is_none());
        assert_eq!(tree.get(root).unwrap().first_child, None);
    }
}
