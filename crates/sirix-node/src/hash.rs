use sirix_checksum::content_hash64;

use crate::node::Node;

/// Which of the two hashing schemes a resource was bootstrapped with (spec
/// §4.2). Chosen once at resource creation and fixed for its lifetime —
/// mixing schemes within one resource would make ancestor hashes meaningless.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum HashKind {
    /// No hashing; `Node::hash()` is always `0`.
    None,
    /// Additive/subtractive propagation to every ancestor on each edit,
    /// weighted by a fixed multiplier so reordering siblings is detectable.
    Rolling,
    /// Each node's hash folds in the hashes of its own children; recomputed
    /// bottom-up from the edited node to the root on every edit.
    PostOrder,
}

/// Multiplier applied when a child's hash is folded into an ancestor under
/// [`HashKind::Rolling`]. Arbitrary odd constant distinct from small node
/// counts, chosen so sibling permutations are very unlikely to collide.
const ROLLING_HASH_P: u64 = 77_081;

/// The hash contribution of a node's own content, ignoring children. Forms
/// the seed for both hashing schemes.
pub fn leaf_content_hash(node: &Node) -> u64 {
    match node {
        Node::DocumentRoot { .. } => content_hash64(&[b"document-root"]),
        Node::Element { named, .. } => {
            content_hash64(&[b"element", &named.name_key.to_be_bytes(), &named.uri_key.to_be_bytes()])
        }
        Node::Attribute { named, valued, .. } => content_hash64(&[
            b"attribute",
            &named.name_key.to_be_bytes(),
            &named.uri_key.to_be_bytes(),
            &valued.value,
        ]),
        Node::Namespace { named, .. } => {
            content_hash64(&[b"namespace", &named.name_key.to_be_bytes(), &named.uri_key.to_be_bytes()])
        }
        Node::Text { valued, .. } => content_hash64(&[b"text", &valued.value]),
        Node::Comment { valued, .. } => content_hash64(&[b"comment", &valued.value]),
        Node::ProcessingInstruction { named, valued, .. } => content_hash64(&[
            b"pi",
            &named.name_key.to_be_bytes(),
            &valued.value,
        ]),
        Node::Deleted { .. } => 0,
    }
}

/// Adds `delta`'s weighted contribution into `ancestor_hash` (spec §4.2:
/// rolling hash, insert case). Applied once per ancestor, from the new
/// node's parent up to the document root — the same constant weight at
/// every level, so the update is `O(depth)` and never compounds.
pub fn propagate_rolling_add(ancestor_hash: u64, delta: u64) -> u64 {
    ancestor_hash.wrapping_add(delta.wrapping_mul(ROLLING_HASH_P))
}

/// Inverse of [`propagate_rolling_add`], applied on removal.
pub fn propagate_rolling_remove(ancestor_hash: u64, delta: u64) -> u64 {
    ancestor_hash.wrapping_sub(delta.wrapping_mul(ROLLING_HASH_P))
}

/// Replaces one child's weighted contribution with another's in a single
/// step, for in-place content changes (`set_value`/`set_qname`) that don't
/// change the tree shape.
pub fn propagate_rolling_update(ancestor_hash: u64, old: u64, new: u64) -> u64 {
    let removed = propagate_rolling_remove(ancestor_hash, old);
    propagate_rolling_add(removed, new)
}

/// Recomputes a node's own hash under [`HashKind::PostOrder`] from its leaf
/// content plus the already-correct hashes of its immediate non-structural
/// and structural children (spec §4.2: post-order hash). Callers climb the
/// ancestor chain repeating this one level at a time; grandchildren are
/// never revisited because the immediate children's stored hashes are
/// already up to date.
pub fn recompute_postorder_hash(node: &Node, child_hashes: &[u64]) -> u64 {
    let seed = leaf_content_hash(node);
    if child_hashes.is_empty() {
        return seed;
    }
    let mut bytes = Vec::with_capacity(8 + child_hashes.len() * 8);
    bytes.extend_from_slice(&seed.to_be_bytes());
    for h in child_hashes {
        bytes.extend_from_slice(&h.to_be_bytes());
    }
    content_hash64(&[&bytes])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{NamedData, StructuralData, ValuedData};
    use sirix_types::NodeKey;

    fn text(value: &[u8]) -> Node {
        Node::Text {
            key: NodeKey(1),
            parent_key: NodeKey(0),
            hash: 0,
            structural: StructuralData::default(),
            valued: ValuedData { value: value.to_vec(), compressed: false },
        }
    }

    #[test]
    fn leaf_content_hash_differs_by_value() {
        assert_ne!(leaf_content_hash(&text(b"a")), leaf_content_hash(&text(b"b")));
    }

    #[test]
    fn rolling_add_then_remove_is_identity() {
        let base = 12345u64;
        let delta = leaf_content_hash(&text(b"hello"));
        let added = propagate_rolling_add(base, delta);
        assert_ne!(added, base);
        let restored = propagate_rolling_remove(added, delta);
        assert_eq!(restored, base);
    }

    #[test]
    fn rolling_update_matches_remove_then_add() {
        let base = 999u64;
        let old = leaf_content_hash(&text(b"old"));
        let new = leaf_content_hash(&text(b"new"));
        let via_update = propagate_rolling_update(base, old, new);
        let via_steps = propagate_rolling_add(propagate_rolling_remove(base, old), new);
        assert_eq!(via_update, via_steps);
    }

    #[test]
    fn postorder_hash_changes_when_child_hash_changes() {
        let node = Node::Element {
            key: NodeKey(1),
            parent_key: NodeKey(0),
            hash: 0,
            structural: StructuralData::default(),
            named: NamedData { name_key: 1, uri_key: 0, path_node_key: None },
            attributes: Vec::new(),
            namespaces: Vec::new(),
        };
        let a = recompute_postorder_hash(&node, &[1, 2, 3]);
        let b = recompute_postorder_hash(&node, &[1, 2, 4]);
        assert_ne!(a, b);
    }

    #[test]
    fn postorder_hash_with_no_children_is_just_the_seed() {
        let node = text(b"leaf");
        assert_eq!(recompute_postorder_hash(&node, &[]), leaf_content_hash(&node));
    }
}
