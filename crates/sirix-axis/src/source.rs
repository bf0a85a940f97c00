use sirix_types::NodeKey;

/// The subset of a node's linkage and identity an axis needs to navigate
/// and filter, abstracted so the same axis implementations serve both the
/// main node tree and the path-summary tree (spec §3.6, §4.11).
pub trait NodeView: Copy {
    fn first_child(&self) -> Option<NodeKey>;
    fn right_sibling(&self) -> Option<NodeKey>;
    fn left_sibling(&self) -> Option<NodeKey>;
    fn parent(&self) -> Option<NodeKey>;
    /// `(name_key, uri_key)`, for nodes that carry a name.
    fn name(&self) -> Option<(u64, u64)>;
    /// Caller-defined discriminant (node kind, path-node kind, ...).
    fn kind_tag(&self) -> u8;
    /// Depth from the tree's root, for `LevelOrderAxis`/`PathLevelFilter`.
    fn level(&self) -> u32;
}

/// Resolves a node-key to its navigable view. Implemented once per tree
/// (the main node tree, the path-summary tree) against whatever backs it.
pub trait NodeSource {
    type View: NodeView;

    fn view(&self, key: NodeKey) -> Option<Self::View>;
}
