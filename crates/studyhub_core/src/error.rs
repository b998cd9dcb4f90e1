//! Crate-level failure taxonomy.
//!
//! # Responsibility
//! - Classify every failure into a kind the boundary layer can map to a
//!   transport status.
//! - Convert lower-layer errors (`StoreError`, `CodecError`, `DbError`).
//!
//! # Invariants
//! - Only `Unavailable` is retryable.
//! - `Validation` always carries the full list of offending ids.

use crate::codec::CodecError;
use crate::db::DbError;
use crate::keyspace::EntityKind;
use crate::model::experiment::ExperimentStatus;
use crate::repo::document_store::StoreError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type CoreResult<T> = Result<T, CoreError>;

/// Coarse failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    Unauthenticated,
    Forbidden,
    NotFound,
    Conflict,
    Unavailable,
    Cancelled,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Unauthenticated => "unauthenticated",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Unavailable => "unavailable",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        }
    }
}

/// Why a conditional write lost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictReason {
    /// Create targeted a key that already holds an item.
    AlreadyExists,
    /// The entity is not in a state the transition accepts.
    InvalidTransition {
        attempted: ExperimentStatus,
        current: ExperimentStatus,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    Validation {
        message: String,
        offending_ids: Vec<String>,
    },
    Unauthenticated,
    Forbidden {
        action: &'static str,
        username: String,
    },
    NotFound {
        entity: EntityKind,
        id: String,
    },
    Conflict {
        entity: EntityKind,
        id: String,
        reason: ConflictReason,
    },
    Unavailable(String),
    Cancelled,
    Internal(String),
}

impl CoreError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            offending_ids: Vec::new(),
        }
    }

    pub fn not_found(entity: EntityKind, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn already_exists(entity: EntityKind, id: impl Into<String>) -> Self {
        Self::Conflict {
            entity,
            id: id.into(),
            reason: ConflictReason::AlreadyExists,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Unauthenticated => ErrorKind::Unauthenticated,
            Self::Forbidden { .. } => ErrorKind::Forbidden,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Unavailable(_) => ErrorKind::Unavailable,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Unavailable
    }
}

impl Display for CoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation {
                message,
                offending_ids,
            } => {
                if offending_ids.is_empty() {
                    write!(f, "validation failed: {message}")
                } else {
                    write!(f, "validation failed: {message}: {}", offending_ids.join(", "))
                }
            }
            Self::Unauthenticated => write!(f, "caller identity is missing"),
            Self::Forbidden { action, username } => {
                write!(f, "`{username}` is not allowed to {action}")
            }
            Self::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            Self::Conflict { entity, id, reason } => match reason {
                ConflictReason::AlreadyExists => write!(f, "{entity} already exists: {id}"),
                ConflictReason::InvalidTransition { attempted, current } => write!(
                    f,
                    "{entity} {id} cannot move to {attempted} from {current}"
                ),
            },
            Self::Unavailable(message) => write!(f, "temporarily unavailable: {message}"),
            Self::Cancelled => write!(f, "operation cancelled"),
            Self::Internal(message) => write!(f, "internal error: {message}"),
        }
    }
}

impl Error for CoreError {}

impl From<StoreError> for CoreError {
    // Condition failures carry entity semantics, so services translate them
    // before this conversion is reached.
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Unavailable(message) => Self::Unavailable(message),
            StoreError::Cancelled => Self::Cancelled,
            StoreError::ConditionFailed(key) => {
                Self::Internal(format!("unclassified condition failure on {key}"))
            }
            StoreError::InvalidData(message) | StoreError::Backend(message) => {
                Self::Internal(message)
            }
        }
    }
}

impl From<CodecError> for CoreError {
    fn from(value: CodecError) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<DbError> for CoreError {
    fn from(value: DbError) -> Self {
        match value {
            DbError::Sqlite(err) | DbError::Migration { source: err, .. } => {
                crate::repo::sqlite_store::classify_sqlite_error(err).into()
            }
            other => Self::Internal(other.to_string()),
        }
    }
}
