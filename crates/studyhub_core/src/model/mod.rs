//! Domain model for the study platform.
//!
//! # Responsibility
//! - Define entity shapes and request/read models used by services.
//! - Own pure invariants (status table, id formats, membership filters).
//!
//! # Invariants
//! - Models never perform I/O; persistence mapping lives in services.

pub mod experiment;
pub mod ids;
pub mod membership;
pub mod questionnaire;
pub mod resource;
pub mod response;
