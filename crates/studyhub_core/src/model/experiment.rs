//! Experiment aggregate and its status state machine.
//!
//! # Responsibility
//! - Define the experiment payload (`ExperimentData`) and read models.
//! - Own the transition table and the two-source status resolution.
//!
//! # Invariants
//! - Status is always one of `Draft | Active | Paused | Closed`.
//! - `Draft` is only ever an initial state; nothing transitions into it.
//! - The top-level status wins over the legacy nested `data.status` field.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

/// Lifecycle state of an experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ExperimentStatus {
    Draft,
    Active,
    Paused,
    Closed,
}

impl ExperimentStatus {
    pub const ALL: [ExperimentStatus; 4] = [Self::Draft, Self::Active, Self::Paused, Self::Closed];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "Draft",
            Self::Active => "Active",
            Self::Paused => "Paused",
            Self::Closed => "Closed",
        }
    }

    /// Parses a stored status; legacy rows used lowercase names.
    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim();
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(normalized))
    }

    /// States from which `self` may be entered.
    ///
    /// | from \ to | Active | Paused | Closed |
    /// |-----------|--------|--------|--------|
    /// | Draft     | yes    |        |        |
    /// | Active    |        | yes    | yes    |
    /// | Paused    | yes    |        | yes    |
    /// | Closed    |        |        |        |
    pub fn allowed_sources(self) -> &'static [ExperimentStatus] {
        match self {
            Self::Draft => &[],
            Self::Active => &[Self::Draft, Self::Paused],
            Self::Paused => &[Self::Active],
            Self::Closed => &[Self::Active, Self::Paused],
        }
    }

    pub fn can_transition_to(self, target: ExperimentStatus) -> bool {
        target.allowed_sources().contains(&self)
    }
}

impl Display for ExperimentStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a resolved status was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusSource {
    /// Canonical top-level `status` attribute.
    TopLevel,
    /// Legacy `data.status` field of rows written before the migration.
    LegacyPayload,
}

/// Status resolution failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusResolutionError {
    Missing,
    Unknown(String),
}

impl Display for StatusResolutionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing => write!(f, "experiment has neither a status nor a legacy status"),
            Self::Unknown(value) => write!(f, "unknown experiment status `{value}`"),
        }
    }
}

impl std::error::Error for StatusResolutionError {}

/// Resolves the effective status from the canonical and legacy sources.
///
/// The top-level value is authoritative whenever present; the legacy value
/// is only consulted when the top-level one is absent.
pub fn resolve_status(
    top_level: Option<&str>,
    legacy: Option<&str>,
) -> Result<(ExperimentStatus, StatusSource), StatusResolutionError> {
    let (raw, source) = match (top_level, legacy) {
        (Some(value), _) => (value, StatusSource::TopLevel),
        (None, Some(value)) => (value, StatusSource::LegacyPayload),
        (None, None) => return Err(StatusResolutionError::Missing),
    };
    ExperimentStatus::parse(raw)
        .map(|status| (status, source))
        .ok_or_else(|| StatusResolutionError::Unknown(raw.to_string()))
}

/// How often a questionnaire is administered.
///
/// Rules written by newer clients land in `Other` with their text intact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleRule {
    EverySession,
    Daily,
    Weekly,
    Once,
    Other(String),
}

impl ScheduleRule {
    pub fn as_str(&self) -> &str {
        match self {
            Self::EverySession => "every_session",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Once => "once",
            Self::Other(raw) => raw,
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "every_session" => Self::EverySession,
            "daily" => Self::Daily,
            "weekly" => Self::Weekly,
            "once" => Self::Once,
            other => Self::Other(other.to_string()),
        }
    }
}

impl Serialize for ScheduleRule {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ScheduleRule {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

/// One kind of session participants run within an experiment.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionType {
    #[serde(default)]
    pub questionnaires: Vec<String>,
    #[serde(default)]
    pub tasks: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_minutes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
    /// Session settings this crate does not interpret, kept verbatim.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl SessionType {
    pub fn with_questionnaires<I, S>(questionnaires: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            questionnaires: questionnaires.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }
}

/// Researcher-editable experiment payload, stored as the `data` attribute.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentData {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub session_types: BTreeMap<String, SessionType>,
    #[serde(default)]
    pub questionnaire_config: BTreeMap<String, ScheduleRule>,
    /// Fields this crate does not interpret, kept verbatim.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl ExperimentData {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_session_type(mut self, name: impl Into<String>, session_type: SessionType) -> Self {
        self.session_types.insert(name.into(), session_type);
        self
    }

    pub fn with_schedule(mut self, questionnaire_id: impl Into<String>, rule: ScheduleRule) -> Self {
        self.questionnaire_config.insert(questionnaire_id.into(), rule);
        self
    }
}

/// Create request; `id` is generated when absent.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NewExperiment {
    pub id: Option<String>,
    pub data: ExperimentData,
}

/// Full experiment read model.
#[derive(Debug, Clone, PartialEq)]
pub struct Experiment {
    pub id: String,
    pub data: ExperimentData,
    pub status: ExperimentStatus,
    /// Which attribute `status` was resolved from.
    pub status_source: StatusSource,
    /// Denormalized, uppercased questionnaire ids referenced by `data`.
    pub questionnaire_ids: Vec<String>,
    pub created_at: String,
    pub created_by: String,
    pub updated_at: String,
    pub updated_by: String,
}

/// Index projection returned by experiment listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExperimentSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    /// `None` for legacy rows whose status lives only in the payload.
    pub status: Option<ExperimentStatus>,
}

/// Dry-run referential check result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub valid: bool,
    pub referenced_ids: Vec<String>,
    pub missing_ids: Vec<String>,
    pub message: String,
}
