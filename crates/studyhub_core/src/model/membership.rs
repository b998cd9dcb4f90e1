//! Enrollment records stored in the experiment partition.
//!
//! # Invariants
//! - At most one row per (experiment, participant); re-adding overwrites it.
//! - Filters are evaluated on fetched rows, never pushed into the store.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
    #[default]
    Participant,
    Researcher,
}

impl MemberRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Participant => "participant",
            Self::Researcher => "researcher",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "participant" => Some(Self::Participant),
            "researcher" => Some(Self::Researcher),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    #[default]
    Active,
    Paused,
    Withdrawn,
    Completed,
}

impl MemberStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Withdrawn => "withdrawn",
            Self::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "active" => Some(Self::Active),
            "paused" => Some(Self::Paused),
            "withdrawn" => Some(Self::Withdrawn),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

/// Role/status/cohort written by an add.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AddMemberRequest {
    pub role: MemberRole,
    pub status: MemberStatus,
    pub cohort: Option<String>,
}

impl AddMemberRequest {
    pub fn participant() -> Self {
        Self::default()
    }

    pub fn in_cohort(mut self, cohort: impl Into<String>) -> Self {
        self.cohort = Some(cohort.into());
        self
    }

    pub fn with_role(mut self, role: MemberRole) -> Self {
        self.role = role;
        self
    }

    pub fn with_status(mut self, status: MemberStatus) -> Self {
        self.status = status;
        self
    }
}

/// One enrollment row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    pub experiment_id: String,
    pub participant_id: String,
    pub role: MemberRole,
    pub status: MemberStatus,
    pub cohort: Option<String>,
    pub enrolled_at: String,
    pub added_by: String,
}

/// In-memory filter applied to a fetched membership list.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MembershipFilter {
    pub cohort: Option<String>,
    pub status: Option<MemberStatus>,
    pub role: Option<MemberRole>,
}

impl MembershipFilter {
    pub fn matches(&self, membership: &Membership) -> bool {
        let cohort_matches = match self.cohort.as_deref() {
            Some(cohort) => membership.cohort.as_deref() == Some(cohort),
            None => true,
        };
        cohort_matches
            && self.status.map_or(true, |status| membership.status == status)
            && self.role.map_or(true, |role| membership.role == role)
    }
}

/// "My experiments" entry read from the participant index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantExperiment {
    pub experiment_id: String,
    pub role: MemberRole,
    pub status: MemberStatus,
    pub cohort: Option<String>,
    pub enrolled_at: String,
}
