#![forbid(unsafe_code)]
//! Versioned, copy-on-write storage engine for tree-structured documents.
//!
//! This crate is the facade: it wires the lower-level `sirix-*` crates
//! (node model, page layer, versioning, write-ahead log, node/page
//! transactions, path summary and value index, axes) into a usable library
//! surface — [`Database`] and [`Resource`] for opening and holding
//! resources, [`Config`] for the options spec §6.5 names, and re-exports of
//! the node write/read transactions and axis iterators callers actually
//! operate on.

mod config;
mod database;
pub mod logging;
mod resource;
mod timer;

pub use config::{Config, HashKindConfig, IndexKind, VersioningKind};
pub use database::Database;
pub use resource::{in_memory_resource, OpenableStore, ReadGuard, Resource, WriteGuard};

pub use sirix_axis::{ChildAxis, DescendantAxis, FilterAxis, LevelOrderAxis, NodeSource, NodeView, PostOrderAxis};
pub use sirix_index::{PathNode, PathNodeView, PathSummaryTree};
pub use sirix_io::{FilePageStore, InMemoryPageStore, PageReader, PageWriter};
pub use sirix_node::{HashKind, NamedData, Node, NodeKind, QName, StructuralData, ValuedData};
pub use sirix_node_trx::{InsertPosition, NodeEvent, NodeWriteTrx};
pub use sirix_page_trx::PageReadTrx;
pub use sirix_types::{NodeKey, Result, RevisionNumber, SirixError};
pub use sirix_versioning::VersioningPolicy;
