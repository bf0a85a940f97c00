#![forbid(unsafe_code)]
//! Typed tree nodes with structural/name/value capability, plus their
//! record-page byte encoding (spec §3.1, §4.1).

mod codec;
mod hash;
mod names;
mod node;
mod qname;

pub use codec::{decode, encode};
pub use hash::{
    leaf_content_hash, propagate_rolling_add, propagate_rolling_remove, propagate_rolling_update,
    recompute_postorder_hash, HashKind,
};
pub use names::NameDictionary;
pub use node::{NamedData, Node, NodeKind, StructuralData, ValuedData};
pub use qname::QName;
