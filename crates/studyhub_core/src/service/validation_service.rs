//! Referential checks from experiment payloads into the questionnaire catalog.
//!
//! # Responsibility
//! - Collect questionnaire ids reachable from an experiment payload.
//! - Resolve which of them are missing, in assert or report mode.
//!
//! # Invariants
//! - Ids are compared trimmed and uppercased; duplicates collapse.
//! - Assert mode names every missing id, never only the first.

use crate::context::CancellationToken;
use crate::error::{CoreError, CoreResult};
use crate::model::experiment::{ExperimentData, ValidationReport};
use crate::model::ids::normalize_questionnaire_id;
use crate::service::questionnaire_service::QuestionnaireLookup;
use std::collections::BTreeSet;

/// Which parts of the payload count as references.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceScope {
    /// `sessionTypes.*.questionnaires` only.
    SessionTypes,
    /// Session types plus the `questionnaireConfig` schedule map.
    SessionTypesAndSchedule,
}

/// Collects the normalized questionnaire ids referenced by `data`.
pub fn collect_questionnaire_ids(data: &ExperimentData, scope: ReferenceScope) -> BTreeSet<String> {
    let from_sessions = data
        .session_types
        .values()
        .flat_map(|session_type| session_type.questionnaires.iter());
    let from_schedule = match scope {
        ReferenceScope::SessionTypes => None,
        ReferenceScope::SessionTypesAndSchedule => Some(data.questionnaire_config.keys()),
    };

    from_sessions
        .chain(from_schedule.into_iter().flatten())
        .filter_map(|raw| normalize_questionnaire_id(raw))
        .collect()
}

pub struct ReferentialValidator<Q: QuestionnaireLookup> {
    lookup: Q,
}

impl<Q: QuestionnaireLookup> ReferentialValidator<Q> {
    pub fn new(lookup: Q) -> Self {
        Self { lookup }
    }

    /// Issues one existence read per id and returns the absent ones in order.
    pub fn missing_ids(
        &self,
        ids: &BTreeSet<String>,
        cancel: &CancellationToken,
    ) -> CoreResult<Vec<String>> {
        let mut missing = Vec::new();
        for id in ids {
            if !self.lookup.questionnaire_exists(id, cancel)? {
                missing.push(id.clone());
            }
        }
        Ok(missing)
    }

    /// Returns the referenced ids, or a `Validation` error listing every missing one.
    pub fn assert_valid(
        &self,
        data: &ExperimentData,
        scope: ReferenceScope,
        cancel: &CancellationToken,
    ) -> CoreResult<Vec<String>> {
        let referenced = collect_questionnaire_ids(data, scope);
        let missing = self.missing_ids(&referenced, cancel)?;
        if !missing.is_empty() {
            return Err(CoreError::Validation {
                message: "experiment references unknown questionnaires".to_string(),
                offending_ids: missing,
            });
        }
        Ok(referenced.into_iter().collect())
    }

    /// Dry-run variant that reports instead of failing.
    pub fn report(
        &self,
        data: &ExperimentData,
        scope: ReferenceScope,
        cancel: &CancellationToken,
    ) -> CoreResult<ValidationReport> {
        let referenced = collect_questionnaire_ids(data, scope);
        let missing = self.missing_ids(&referenced, cancel)?;
        let message = if missing.is_empty() {
            format!("all {} referenced questionnaires exist", referenced.len())
        } else {
            format!("missing questionnaires: {}", missing.join(", "))
        };
        Ok(ValidationReport {
            valid: missing.is_empty(),
            referenced_ids: referenced.into_iter().collect(),
            missing_ids: missing,
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{collect_questionnaire_ids, ReferenceScope, ReferentialValidator};
    use crate::context::CancellationToken;
    use crate::error::{CoreError, CoreResult};
    use crate::model::experiment::{ExperimentData, ScheduleRule, SessionType};
    use crate::service::questionnaire_service::QuestionnaireLookup;
    use std::cell::Cell;

    struct Known {
        ids: &'static [&'static str],
        calls: Cell<usize>,
    }

    impl QuestionnaireLookup for Known {
        fn questionnaire_exists(&self, id: &str, _cancel: &CancellationToken) -> CoreResult<bool> {
            self.calls.set(self.calls.get() + 1);
            Ok(self.ids.contains(&id))
        }
    }

    fn payload() -> ExperimentData {
        ExperimentData::named("sleep")
            .with_session_type("daily", SessionType::with_questionnaires([" pq ", "PQ", "Mood"]))
            .with_session_type("weekly", SessionType::with_questionnaires(["", "mood"]))
            .with_schedule("sched_only", ScheduleRule::Weekly)
    }

    #[test]
    fn collection_normalizes_and_deduplicates() {
        let ids = collect_questionnaire_ids(&payload(), ReferenceScope::SessionTypes);
        assert_eq!(ids.into_iter().collect::<Vec<_>>(), vec!["MOOD", "PQ"]);

        let ids = collect_questionnaire_ids(&payload(), ReferenceScope::SessionTypesAndSchedule);
        assert_eq!(ids.into_iter().collect::<Vec<_>>(), vec!["MOOD", "PQ", "SCHED_ONLY"]);
    }

    #[test]
    fn assert_mode_lists_every_missing_id() {
        let validator = ReferentialValidator::new(Known {
            ids: &["MOOD"],
            calls: Cell::new(0),
        });
        let err = validator
            .assert_valid(
                &payload(),
                ReferenceScope::SessionTypesAndSchedule,
                &CancellationToken::new(),
            )
            .unwrap_err();

        match err {
            CoreError::Validation { offending_ids, .. } => {
                assert_eq!(offending_ids, vec!["PQ", "SCHED_ONLY"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(validator.lookup.calls.get(), 3);
    }

    #[test]
    fn report_mode_never_fails_on_missing_ids() {
        let validator = ReferentialValidator::new(Known {
            ids: &["PQ"],
            calls: Cell::new(0),
        });
        let report = validator
            .report(&payload(), ReferenceScope::SessionTypes, &CancellationToken::new())
            .unwrap();

        assert!(!report.valid);
        assert_eq!(report.referenced_ids, vec!["MOOD", "PQ"]);
        assert_eq!(report.missing_ids, vec!["MOOD"]);
        assert!(report.message.contains("MOOD"));
    }
}
