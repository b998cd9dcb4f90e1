//! Persistence boundary: document store contract and SQLite backend.
//!
//! # Responsibility
//! - Define the single-item, conditional-write store contract services rely on.
//! - Keep SQL details inside one backend module.
//!
//! # Invariants
//! - Services never issue SQL; every read/write goes through `DocumentStore`.
//! - Store failures are classified (`ConditionFailed`, `Unavailable`,
//!   `Cancelled`, ...) before they leave this layer.

pub mod document_store;
pub mod sqlite_store;
