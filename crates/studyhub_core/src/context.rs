//! Per-request context: caller identity, cancellation and time.
//!
//! # Responsibility
//! - Carry the opaque "caller identity + role" capability into services.
//! - Carry a cancellation signal checked at every store boundary.
//! - Produce ISO-8601 UTC timestamps with a fixed width.
//!
//! # Invariants
//! - A missing or blank username is an authentication failure.
//! - Timestamps always have microsecond precision so lexical order equals
//!   chronological order.

use crate::error::{CoreError, CoreResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

const TIMESTAMP_FORMAT: &[BorrowedFormatItem<'static>] = format_description!(
    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:6]Z"
);

/// Cloneable cancellation flag shared between a caller and its operation.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Identity resolved by the boundary layer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CallerIdentity {
    pub username: Option<String>,
    pub is_researcher: bool,
}

impl CallerIdentity {
    pub fn researcher(username: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            is_researcher: true,
        }
    }

    pub fn participant(username: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            is_researcher: false,
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }
}

/// Resolves a caller identity from an inbound request of type `R`.
pub trait IdentityResolver<R: ?Sized> {
    fn resolve(&self, request: &R) -> CallerIdentity;
}

/// Local/offline mode resolver that ignores the request entirely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalIdentityResolver {
    identity: CallerIdentity,
}

impl LocalIdentityResolver {
    pub fn new(identity: CallerIdentity) -> Self {
        Self { identity }
    }
}

impl<R: ?Sized> IdentityResolver<R> for LocalIdentityResolver {
    fn resolve(&self, _request: &R) -> CallerIdentity {
        self.identity.clone()
    }
}

/// Everything a service operation needs to know about its caller.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    identity: CallerIdentity,
    cancel: CancellationToken,
}

impl RequestContext {
    pub fn new(identity: CallerIdentity) -> Self {
        Self {
            identity,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn identity(&self) -> &CallerIdentity {
        &self.identity
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_researcher(&self) -> bool {
        self.identity.is_researcher
    }

    /// Returns the acting username or `Unauthenticated`.
    pub fn performed_by(&self) -> CoreResult<&str> {
        match self.identity.username.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => Ok(name),
            _ => Err(CoreError::Unauthenticated),
        }
    }

    /// Returns the acting username when the caller holds the researcher role.
    pub fn require_researcher(&self, action: &'static str) -> CoreResult<&str> {
        let username = self.performed_by()?;
        if !self.identity.is_researcher {
            return Err(CoreError::Forbidden {
                action,
                username: username.to_string(),
            });
        }
        Ok(username)
    }

    /// Fails with `Cancelled` once the token has been raised.
    pub fn ensure_active(&self) -> CoreResult<()> {
        if self.cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }
        Ok(())
    }
}

/// Source of wall-clock time for audit stamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// Formats an instant as `YYYY-MM-DDTHH:MM:SS.ffffffZ` in UTC.
pub fn format_timestamp(instant: OffsetDateTime) -> CoreResult<String> {
    instant
        .to_offset(UtcOffset::UTC)
        .format(TIMESTAMP_FORMAT)
        .map_err(|err| CoreError::Internal(format!("timestamp formatting failed: {err}")))
}

/// Parses an RFC 3339 timestamp from a caller and re-formats it in the
/// stored fixed-width UTC form.
pub fn normalize_timestamp(field: &'static str, raw: &str) -> CoreResult<String> {
    let parsed = OffsetDateTime::parse(raw.trim(), &Rfc3339).map_err(|_| CoreError::Validation {
        message: format!("{field} must be an RFC 3339 timestamp"),
        offending_ids: vec![raw.trim().to_string()],
    })?;
    format_timestamp(parsed)
}
