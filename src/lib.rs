//! Atomic rename transaction engine for a local markdown knowledge vault.
//!
//! Renaming a note is not a single filesystem call: every `[[wikilink]]`
//! reference to it elsewhere in the vault has to be rewritten in the same
//! breath, and the whole thing has to survive a crash, a cloud-sync race,
//! or a concurrent edit landing mid-transaction. This crate is the engine
//! that makes that safe: a write-ahead log protects an in-progress
//! rename, and a five-phase protocol (Plan, Prepare, Validate, Commit,
//! Cleanup) gives every rename a point it can be rolled back from.
//!
//! Tool dispatch, natural-language search, template processing, YAML
//! front-matter rules, and any outer protocol surface are out of scope.
//! This crate only ever renames one note and rewrites references to it.

pub mod config;
pub mod error;
pub mod io;
pub mod link_updater;
pub mod manifest;
pub mod reference;
pub mod recovery;
pub mod scanner;
pub mod transaction;
pub mod utils;
pub mod wal;

pub use config::VaultConfig;
pub use error::TransactionError;
pub use transaction::{RenameRequest, RenameSuccess, TransactionManager};
