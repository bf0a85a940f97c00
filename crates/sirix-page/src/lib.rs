#![forbid(unsafe_code)]
//! On-disk page layouts: bounded record pages, fixed-fanout indirect
//! routing pages, and the per-revision/uber root pages that anchor them
//! (spec §3.2-§3.4, §4.2-§4.4).

mod indirect;
mod record;
mod revision;

pub use indirect::IndirectPage;
pub use record::{RecordPage, RecordPageContainer};
pub use revision::{RevisionRootPage, UberPage};
