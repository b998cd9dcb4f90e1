//! Identifier checks run before key derivation.
//!
//! # Invariants
//! - Ids never contain the key separator `#`.
//! - Task keys and questionnaire ids are compared case-insensitively and
//!   stored uppercased.

use crate::error::{CoreError, CoreResult};
use crate::keyspace::KEY_SEPARATOR;
use once_cell::sync::Lazy;
use regex::Regex;

const MAX_ID_CHARS: usize = 128;

static TASK_KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z0-9_]{3,64}$").expect("valid task key regex"));

/// Trims and checks a free-form identifier.
pub fn normalize_id(field: &'static str, raw: &str) -> CoreResult<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(CoreError::validation(format!("{field} must not be empty")));
    }
    if trimmed.contains(KEY_SEPARATOR) {
        return Err(CoreError::Validation {
            message: format!("{field} must not contain `{KEY_SEPARATOR}`"),
            offending_ids: vec![trimmed.to_string()],
        });
    }
    if trimmed.chars().count() > MAX_ID_CHARS {
        return Err(CoreError::Validation {
            message: format!("{field} must be at most {MAX_ID_CHARS} characters"),
            offending_ids: vec![trimmed.to_string()],
        });
    }
    Ok(trimmed.to_string())
}

/// Uppercases a task key and checks it against `^[A-Z0-9_]{3,64}$`.
pub fn normalize_task_key(raw: &str) -> CoreResult<String> {
    let normalized = raw.trim().to_ascii_uppercase();
    if !TASK_KEY_RE.is_match(&normalized) {
        return Err(CoreError::Validation {
            message: "task key must match ^[A-Z0-9_]{3,64}$".to_string(),
            offending_ids: vec![raw.trim().to_string()],
        });
    }
    Ok(normalized)
}

/// Trims and uppercases a questionnaire id; `None` when blank.
pub fn normalize_questionnaire_id(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_uppercase())
    }
}

#[cfg(test)]
mod tests {
    use super::{normalize_id, normalize_questionnaire_id, normalize_task_key};
    use crate::error::ErrorKind;

    #[test]
    fn task_keys_are_uppercased_then_checked() {
        assert_eq!(normalize_task_key(" pvt_10 ").unwrap(), "PVT_10");
        assert_eq!(normalize_task_key("ab").unwrap_err().kind(), ErrorKind::Validation);
        assert_eq!(normalize_task_key("has-dash").unwrap_err().kind(), ErrorKind::Validation);
        assert!(normalize_task_key(&"X".repeat(64)).is_ok());
        assert!(normalize_task_key(&"X".repeat(65)).is_err());
    }

    #[test]
    fn ids_reject_separator_and_blank() {
        assert_eq!(normalize_id("experiment id", " E1 ").unwrap(), "E1");
        assert!(normalize_id("experiment id", "   ").is_err());
        assert!(normalize_id("experiment id", "E#1").is_err());
    }

    #[test]
    fn questionnaire_ids_fold_case() {
        assert_eq!(normalize_questionnaire_id(" pq "), Some("PQ".to_string()));
        assert_eq!(normalize_questionnaire_id("  "), None);
    }
}
