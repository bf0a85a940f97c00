#![allow(clippy::uninlined_format_args)]

use proptest::prelude::*;
use sirix::{in_memory_resource, Config, NodeKind, NodeKey, Result};

#[derive(Debug, Clone)]
enum Op {
    InsertFirstChild { anchor: usize },
    InsertRightSibling { anchor: usize },
    InsertAttribute { anchor: usize, value: u8 },
    InsertText { anchor: usize, value: u8 },
}

/// `anchor` is reduced modulo the number of nodes created so far at replay
/// time (see `anchor % keys.len()` below), so any `usize` here generates a
/// structurally valid op — the index just has to exist, not be exact.
fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0usize..64).prop_map(|anchor| Op::InsertFirstChild { anchor }),
        (0usize..64).prop_map(|anchor| Op::InsertRightSibling { anchor }),
        (0usize..64, any::<u8>()).prop_map(|(anchor, value)| Op::InsertAttribute { anchor, value }),
        (0usize..64, any::<u8>()).prop_map(|(anchor, value)| Op::InsertText { anchor, value }),
    ]
}

fn arb_ops() -> impl Strategy<Value = Vec<Op>> {
    prop::collection::vec(arb_op(), 1..200)
}

/// Walks the whole structural tree from `root`, checking that every node's
/// sibling links are mutually consistent and that every stored
/// `child_count`/`descendant_count` matches what's actually reachable (spec
/// §8: sibling symmetry, count correctness).
fn check_structural_invariants(
    writer: &mut sirix::WriteGuard<'_, sirix::InMemoryPageStore>,
    key: NodeKey,
) -> Result<(u64, u64)> {
    let node = writer.node(key)?;
    let structural = node.structural().expect("structural node");

    let mut seen_left: Option<NodeKey> = None;
    let mut child_count = 0u64;
    let mut descendant_count = 0u64;
    let mut child = structural.first_child_key;

    while let Some(child_key) = child {
        let child_node = writer.node(child_key)?;
        let child_structural = child_node.structural().expect("structural child");

        assert_eq!(
            child_structural.left_sibling_key, seen_left,
            "left-sibling link must match traversal order"
        );
        if let Some(left_key) = seen_left {
            let left_node = writer.node(left_key)?;
            assert_eq!(
                left_node.structural().unwrap().right_sibling_key,
                Some(child_key),
                "right-sibling link must point back at the node we just visited"
            );
        }

        let (grandchildren, child_descendants) = check_structural_invariants(writer, child_key)?;
        child_count += 1;
        descendant_count += 1 + child_descendants;
        let _ = grandchildren;

        seen_left = Some(child_key);
        child = child_structural.right_sibling_key;
    }

    assert_eq!(structural.child_count, child_count, "child_count must match the number of linked children");
    assert_eq!(
        structural.descendant_count, descendant_count,
        "descendant_count must match the full subtree size"
    );

    // No two adjacent children are both Text nodes (spec §8: text non-adjacency).
    let mut child = structural.first_child_key;
    let mut previous_was_text = false;
    while let Some(child_key) = child {
        let child_node = writer.node(child_key)?;
        let is_text = child_node.kind() == Some(NodeKind::Text);
        assert!(!(is_text && previous_was_text), "two adjacent Text siblings must never exist");
        previous_was_text = is_text;
        child = child_node.structural().unwrap().right_sibling_key;
    }

    Ok((child_count, descendant_count))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn random_insert_sequences_preserve_sibling_symmetry_and_counts(ops in arb_ops()) {
        let resource = in_memory_resource(Config::default());
        let mut writer = resource.begin_write().unwrap();
        let root = writer.root();
        let mut keys = vec![root];

        for op in ops {
            match op {
                Op::InsertFirstChild { anchor } => {
                    let anchor_key = keys[anchor % keys.len()];
                    if let Ok(new_key) = writer.insert_element_as_first_child(anchor_key, None, "e", "") {
                        keys.push(new_key);
                    }
                }
                Op::InsertRightSibling { anchor } => {
                    let anchor_key = keys[anchor % keys.len()];
                    if anchor_key == root {
                        continue; // the document root has no siblings to anchor to
                    }
                    if let Ok(new_key) = writer.insert_element_as_right_sibling(anchor_key, None, "e", "") {
                        keys.push(new_key);
                    }
                }
                Op::InsertAttribute { anchor, value } => {
                    let anchor_key = keys[anchor % keys.len()];
                    // Attributes only attach to elements; skip anchors that
                    // aren't (the document root, other attributes).
                    let _ = writer.insert_attribute(anchor_key, None, "a", "", vec![value]);
                }
                Op::InsertText { anchor, value } => {
                    let anchor_key = keys[anchor % keys.len()];
                    // A text node never becomes an anchor itself (it has no
                    // children and `keys` only holds elements/root), so this
                    // can only coalesce with an existing Text sibling or
                    // create a fresh one — never split or duplicate one.
                    let _ = writer.insert_text_as_first_child(anchor_key, vec![value]);
                }
            }
        }

        check_structural_invariants(&mut writer, root).unwrap();
        writer.abort().unwrap();
    }
}
