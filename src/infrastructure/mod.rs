pub mod fs_walker;
pub mod sqlite_catalog;

pub use fs_walker::*;
pub use sqlite_catalog::*;

#[cfg(test)]
pub(crate) use sqlite_catalog::{sample_record, TestDb};
