#![forbid(unsafe_code)]
//! The page-level transaction pair every higher layer builds on: a
//! many-reader [`read::PageReadTrx`] snapshot and the single-writer
//! [`write::PageWriteTrx`] that stages copy-on-write page clones and
//! publishes them atomically on commit (spec §4.6, §4.7).

mod cache;
mod deref;
mod read;
mod write;

pub use cache::PageCache;
pub use deref::dereference_indirect_chain;
pub use read::PageReadTrx;
pub use write::PageWriteTrx;
