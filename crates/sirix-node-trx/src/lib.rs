#![forbid(unsafe_code)]
//! The node-level write transaction (spec §4.9): the single writer for a
//! resource, layered over [`sirix_page_trx::PageWriteTrx`] with typed node
//! encode/decode, structural bookkeeping, hash maintenance, and the
//! path-summary/value-index/name-dictionary side structures.

mod events;
mod trx;

pub use events::NodeEvent;
pub use trx::{InsertPosition, NodeWriteTrx};
