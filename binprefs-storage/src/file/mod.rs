//! File layer: byte-level adapter and the atomic transaction protocol on top.

pub mod adapter;
pub mod transaction;

pub use adapter::{FileAdapter, FsFileAdapter, StagedFile};
pub use transaction::{FileTransaction, Mutation, MultiProcessTransaction, TransactionRecord};
