#![forbid(unsafe_code)]
//! Lazy, forward-only node-key iterators over any tree that implements
//! [`NodeSource`] (spec §4.11) — used by `remove`'s teardown order and by
//! path-summary maintenance. Each axis is deterministic and finite;
//! `FilterAxis` composes predicates with short-circuit evaluation.

mod axis;
mod predicate;
mod source;

pub use axis::{ChildAxis, DescendantAxis, FilterAxis, LevelOrderAxis, PostOrderAxis};
pub use predicate::{NameFilter, Predicate, PathKindFilter, PathLevelFilter};
pub use source::{NodeSource, NodeView};

#[cfg(test)]
mod tests {
    use super::*;
    use sirix_types::NodeKey;
    use std::collections::HashMap;

    #[derive(Copy, Clone)]
    struct TestView {
        first_child: Option<NodeKey>,
        right_sibling: Option<NodeKey>,
        left_sibling: Option<NodeKey>,
        parent: Option<NodeKey>,
        name: Option<(u64, u64)>,
        kind_tag: u8,
        level: u32,
    }

    impl NodeView for TestView {
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

    struct TestTree(HashMap<u64, TestView>);

    impl NodeSource for TestTree {
        type View = TestView;
        fn view(&self, key: NodeKey) -> Option<TestView> {
            self.0.get(&key.0).copied()
        }
    }

    /// Builds:
    ///        1
    ///      / | \
    ///     2  3  4
    ///       / \
    ///      5   6
    fn sample_tree() -> TestTree {
        let mut nodes = HashMap::new();
        nodes.insert(
            1,
            TestView {
                first_child: Some(NodeKey(2)),
                right_sibling: None,
                left_sibling: None,
                parent: None,
                name: None,
                kind_tag: 0,
                level: 0,
            },
        );
        nodes.insert(
            2,
            TestView {
                first_child: None,
                right_sibling: Some(NodeKey(3)),
                left_sibling: None,
                parent: Some(NodeKey(1)),
                name: Some((10, 0)),
                kind_tag: 1,
                level: 1,
            },
        );
        nodes.insert(
            3,
            TestView {
                first_child: Some(NodeKey(5)),
                right_sibling: Some(NodeKey(4)),
                left_sibling: Some(NodeKey(2)),
                parent: Some(NodeKey(1)),
                name: None,
                kind_tag: 1,
                level: 1,
            },
        );
        nodes.insert(
            4,
            TestView {
                first_child: None,
                right_sibling: None,
                left_sibling: Some(NodeKey(3)),
                parent: Some(NodeKey(1)),
                name: None,
                kind_tag: 1,
                level: 1,
            },
        );
        nodes.insert(
            5,
            TestView {
                first_child: None,
                right_sibling: Some(NodeKey(6)),
                left_sibling: None,
                parent: Some(NodeKey(3)),
                name: None,
                kind_tag: 1,
                level: 2,
            },
        );
        nodes.insert(
            6,
            TestView {
                first_child: None,
                right_sibling: None,
                left_sibling: Some(NodeKey(5)),
                parent: Some(NodeKey(3)),
                name: None,
                kind_tag: 1,
                level: 2,
            },
        );
        TestTree(nodes)
    }

    fn keys(v: Vec<NodeKey>) -> Vec<u64> {
        v.into_iter().map(|k| k.0).collect()
    }

    #[test]
    fn child_axis_yields_direct_children_left_to_right() {
        let tree = sample_tree();
        let children: Vec<NodeKey> = ChildAxis::new(&tree, NodeKey(1)).collect();
        assert_eq!(keys(children), vec![2, 3, 4]);
    }

    #[test]
    fn descendant_axis_is_pre_order_and_scoped_to_subtree() {
        let tree = sample_tree();
        let descendants: Vec<NodeKey> = DescendantAxis::new(&tree, NodeKey(1), false).collect();
        assert_eq!(keys(descendants), vec![2, 3, 5, 6, 4]);

        let subtree: Vec<NodeKey> = DescendantAxis::new(&tree, NodeKey(3), true).collect();
        assert_eq!(keys(subtree), vec![3, 5, 6]);
    }

    #[test]
    fn post_order_axis_visits_children_before_parent() {
        let tree = sample_tree();
        let order: Vec<NodeKey> = PostOrderAxis::new(&tree, NodeKey(1), true).collect();
        assert_eq!(keys(order), vec![2, 5, 6, 3, 4, 1]);
    }

    #[test]
    fn level_order_axis_can_restrict_to_one_depth() {
        let tree = sample_tree();
        let level_two: Vec<NodeKey> = LevelOrderAxis::new(&tree, NodeKey(1), Some(2), true).collect();
        assert_eq!(keys(level_two), vec![5, 6]);
    }

    #[test]
    fn filter_axis_applies_conjunction_of_predicates() {
        let tree = sample_tree();
        let named: Vec<NodeKey> = FilterAxis::new(
            &tree,
            DescendantAxis::new(&tree, NodeKey(1), false),
            vec![Box::new(NameFilter {
                name_key: 10,
                uri_key: 0,
            })],
        )
        .collect();
        assert_eq!(keys(named), vec![2]);
    }
}
