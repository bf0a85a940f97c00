/// An abstract tree-construction event, used to bulk-load a subtree without
/// this crate ever parsing a concrete document syntax (that belongs to an
/// external shredder, out of scope here). A flat stream of these, in
/// document order, fully determines a subtree: `OpenElement` must be
/// balanced by a later `CloseElement`, and every non-`OpenElement`/
/// `CloseElement` event becomes a leaf child of the innermost still-open
/// element (or a sibling of the subtree root if no element is open).
#[derive(Clone, Debug, PartialEq)]
pub enum NodeEvent {
    OpenElement { prefix: Option<String>, local_name: String, uri: String },
    CloseElement,
    Text(Vec<u8>),
    Attribute { prefix: Option<String>, local_name: String, uri: String, value: Vec<u8> },
    Namespace { prefix: String, uri: String },
    Comment(Vec<u8>),
    ProcessingInstruction { target: String, data: Vec<u8> },
}
