#![forbid(unsafe_code)]
//! The two secondary structures kept coherent with node mutations: the
//! path-summary tree and the content-and-structure (value) index
//! (spec §3.6, §4.10).

mod path_summary;
mod value_index;

pub use path_summary::{PathNode, PathNodeView, PathSummaryTree};
pub use value_index::{TextReferences, ValueIndex};
