//! Researcher-owned resources without a lifecycle: tasks, protocol sessions
//! and session occurrences.
//!
//! # Invariants
//! - `data` is always a JSON object.
//! - Soft-deleted records stay readable with `include_deleted`.

use serde_json::Value;

/// Who created/changed a record and when.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Audit {
    pub created_at: String,
    pub created_by: String,
    pub updated_at: String,
    pub updated_by: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    /// Uppercased key matching `^[A-Z0-9_]{3,64}$`.
    pub key: String,
    pub data: Value,
    pub audit: Audit,
    pub deleted: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolSession {
    pub id: String,
    pub experiment_id: String,
    pub data: Value,
    pub audit: Audit,
    pub deleted: bool,
}

/// One run of a session by a participant.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: String,
    pub experiment_id: String,
    pub participant_id: String,
    pub data: Value,
    pub audit: Audit,
    pub deleted: bool,
}

/// Create request for a session occurrence; `id` is generated when absent.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSession {
    pub id: Option<String>,
    pub participant_id: String,
    pub data: Value,
}

/// Listing options shared by resource listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceListQuery {
    pub include_deleted: bool,
    pub limit: Option<u32>,
}
