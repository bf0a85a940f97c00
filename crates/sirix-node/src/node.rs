use sirix_types::NodeKey;

/// The kind of a node, per spec §3.1. Every node is one of these seven
/// variants; capability is layered on top via the `Structural`, `Named`,
/// and `Valued` traits below rather than a class hierarchy.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum NodeKind {
    DocumentRoot,
    Element,
    Text,
    Attribute,
    Namespace,
    Comment,
    ProcessingInstruction,
}

impl NodeKind {
    /// Structural nodes participate in the sibling/child/descendant graph.
    /// Attributes and namespaces are non-structural children of elements.
    pub fn is_structural(self) -> bool {
        !matches!(self, NodeKind::Attribute | NodeKind::Namespace)
    }

    pub fn is_named(self) -> bool {
        matches!(
            self,
            NodeKind::Element | NodeKind::Attribute | NodeKind::Namespace | NodeKind::ProcessingInstruction
        )
    }

    pub fn is_valued(self) -> bool {
        matches!(
            self,
            NodeKind::Text | NodeKind::Attribute | NodeKind::Comment | NodeKind::ProcessingInstruction
        )
    }
}

/// Link state shared by every structural node (spec §3.1, §4.1).
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct StructuralData {
    pub first_child_key: Option<NodeKey>,
    pub left_sibling_key: Option<NodeKey>,
    pub right_sibling_key: Option<NodeKey>,
    pub child_count: u64,
    pub descendant_count: u64,
}

/// Name/URI/path-summary binding shared by every named node.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct NamedData {
    pub name_key: u32,
    pub uri_key: u32,
    pub path_node_key: Option<NodeKey>,
}

/// Byte-valued payload shared by every valued node.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ValuedData {
    pub value: Vec<u8>,
    pub compressed: bool,
}

/// A typed tree node. Tagged variant over `NodeKind`, each carrying exactly
/// the capability data its kind owns (spec §9 design note: "tagged variant
/// ... traits expose only capability sets").
#[derive(Clone, Debug, PartialEq)]
pub enum Node {
    DocumentRoot {
        key: NodeKey,
        hash: u64,
        structural: StructuralData,
    },
    Element {
        key: NodeKey,
        parent_key: NodeKey,
        hash: u64,
        structural: StructuralData,
        named: NamedData,
        attributes: Vec<NodeKey>,
        namespaces: Vec<NodeKey>,
    },
    Text {
        key: NodeKey,
        parent_key: NodeKey,
        hash: u64,
        structural: StructuralData,
        valued: ValuedData,
    },
    Attribute {
        key: NodeKey,
        parent_key: NodeKey,
        hash: u64,
        named: NamedData,
        valued: ValuedData,
    },
    Namespace {
        key: NodeKey,
        parent_key: NodeKey,
        hash: u64,
        named: NamedData,
    },
    Comment {
        key: NodeKey,
        parent_key: NodeKey,
        hash: u64,
        structural: StructuralData,
        valued: ValuedData,
    },
    ProcessingInstruction {
        key: NodeKey,
        parent_key: NodeKey,
        hash: u64,
        structural: StructuralData,
        named: NamedData,
        valued: ValuedData,
    },
    /// Tombstone written over a removed node's slot (spec §4.1). Any fetch
    /// resolving to this variant is reported to callers as absent.
    Deleted { key: NodeKey },
}

impl Node {
    pub fn kind(&self) -> Option<NodeKind> {
        match self {
            Node::DocumentRoot { .. } => Some(NodeKind::DocumentRoot),
            Node::Element { .. } => Some(NodeKind::Element),
            Node::Text { .. } => Some(NodeKind::Text),
            Node::Attribute { .. } => Some(NodeKind::Attribute),
            Node::Namespace { .. } => Some(NodeKind::Namespace),
            Node::Comment { .. } => Some(NodeKind::Comment),
            Node::ProcessingInstruction { .. } => Some(NodeKind::ProcessingInstruction),
            Node::Deleted { .. } => None,
        }
    }

    pub fn node_key(&self) -> NodeKey {
        match self {
            Node::DocumentRoot { key, .. }
            | Node::Element { key, .. }
            | Node::Text { key, .. }
            | Node::Attribute { key, .. }
            | Node::Namespace { key, .. }
            | Node::Comment { key, .. }
            | Node::ProcessingInstruction { key, .. }
            | Node::Deleted { key } => *key,
        }
    }

    pub fn parent_key(&self) -> Option<NodeKey> {
        match self {
            Node::DocumentRoot { .. } | Node::Deleted { .. } => None,
            Node::Element { parent_key, .. }
            | Node::Text { parent_key, .. }
            | Node::Attribute { parent_key, .. }
            | Node::Namespace { parent_key, .. }
            | Node::Comment { parent_key, .. }
            | Node::ProcessingInstruction { parent_key, .. } => Some(*parent_key),
        }
    }

    pub fn is_tombstone(&self) -> bool {
        matches!(self, Node::Deleted { .. })
    }

    pub fn hash(&self) -> Option<u64> {
        match self {
            Node::DocumentRoot { hash, .. }
            | Node::Element { hash, .. }
            | Node::Text { hash, .. }
            | Node::Attribute { hash, .. }
            | Node::Namespace { hash, .. }
            | Node::Comment { hash, .. }
            | Node::ProcessingInstruction { hash, .. } => Some(*hash),
            Node::Deleted { .. } => None,
        }
    }

    pub fn set_hash(&mut self, new_hash: u64) {
        match self {
            Node::DocumentRoot { hash, .. }
            | Node::Element { hash, .. }
            | Node::Text { hash, .. }
            | Node::Attribute { hash, .. }
            | Node::Namespace { hash, .. }
            | Node::Comment { hash, .. }
            | Node::ProcessingInstruction { hash, .. } => *hash = new_hash,
            Node::Deleted { .. } => {}
        }
    }

    pub fn structural(&self) -> Option<&StructuralData> {
        match self {
            Node::DocumentRoot { structural, .. }
            | Node::Element { structural, .. }
            | Node::Text { structural, .. }
            | Node::Comment { structural, .. }
            | Node::ProcessingInstruction { structural, .. } => Some(structural),
            _ => None,
        }
    }

    pub fn structural_mut(&mut self) -> Option<&mut StructuralData> {
        match self {
            Node::DocumentRoot { structural, .. }
            | Node::Element { structural, .. }
            | Node::Text { structural, .. }
            | Node::Comment { structural, .. }
            | Node::ProcessingInstruction { structural, .. } => Some(structural),
            _ => None,
        }
    }

    pub fn named(&self) -> Option<&NamedData> {
        match self {
            Node::Element { named, .. }
            | Node::Attribute { named, .. }
            | Node::Namespace { named, .. }
            | Node::ProcessingInstruction { named, .. } => Some(named),
            _ => None,
        }
    }

    pub fn named_mut(&mut self) -> Option<&mut NamedData> {
        match self {
            Node::Element { named, .. }
            | Node::Attribute { named, .. }
            | Node::Namespace { named, .. }
            | Node::ProcessingInstruction { named, .. } => Some(named),
            _ => None,
        }
    }

    pub fn valued(&self) -> Option<&ValuedData> {
        match self {
            Node::Text { valued, .. }
            | Node::Attribute { valued, .. }
            | Node::Comment { valued, .. }
            | Node::ProcessingInstruction { valued, .. } => Some(valued),
            _ => None,
        }
    }

    pub fn valued_mut(&mut self) -> Option<&mut ValuedData> {
        match self {
            Node::Text { valued, .. }
            | Node::Attribute { valued, .. }
            | Node::Comment { valued, .. }
            | Node::ProcessingInstruction { valued, .. } => Some(valued),
            _ => None,
        }
    }

    pub fn attributes(&self) -> &[NodeKey] {
        match self {
            Node::Element { attributes, .. } => attributes,
            _ => &[],
        }
    }

    pub fn attributes_mut(&mut self) -> Option<&mut Vec<NodeKey>> {
        match self {
            Node::Element { attributes, .. } => Some(attributes),
            _ => None,
        }
    }

    pub fn namespaces(&self) -> &[NodeKey] {
        match self {
            Node::Element { namespaces, .. } => namespaces,
            _ => &[],
        }
    }

    pub fn namespaces_mut(&mut self) -> Option<&mut Vec<NodeKey>> {
        match self {
            Node::Element { namespaces, .. } => Some(namespaces),
            _ => None,
        }
    }

    // Structural link mutators (spec §4.1).

    pub fn set_first_child(&mut self, child: Option<NodeKey>) {
        if let Some(s) = self.structural_mut() {
            s.first_child_key = child;
        }
    }

    pub fn set_left_sibling(&mut self, sibling: Option<NodeKey>) {
        if let Some(s) = self.structural_mut() {
            s.left_sibling_key = sibling;
        }
    }

    pub fn set_right_sibling(&mut self, sibling: Option<NodeKey>) {
        if let Some(s) = self.structural_mut() {
            s.right_sibling_key = sibling;
        }
    }

    pub fn increment_child_count(&mut self) {
        if let Some(s) = self.structural_mut() {
            s.child_count += 1;
        }
    }

    pub fn decrement_child_count(&mut self) {
        if let Some(s) = self.structural_mut() {
            s.child_count = s.child_count.saturating_sub(1);
        }
    }

    pub fn increment_descendant_count(&mut self, by: u64) {
        if let Some(s) = self.structural_mut() {
            s.descendant_count += by;
        }
    }

    pub fn decrement_descendant_count(&mut self, by: u64) {
        if let Some(s) = self.structural_mut() {
            s.descendant_count = s.descendant_count.saturating_sub(by);
        }
    }
}
