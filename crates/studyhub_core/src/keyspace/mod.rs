//! Single-table key design.
//!
//! # Responsibility
//! - Map (entity type, identifiers) to partition/sort keys and index keys.
//! - Own every access pattern used by the services, so no caller concatenates
//!   key strings on its own.
//!
//! # Invariants
//! - Functions are pure and deterministic; no I/O, no validation.
//! - Callers check and normalize identifiers before deriving keys.
//!
//! # Layout
//! | entity            | pk                         | sk                    |
//! |-------------------|----------------------------|-----------------------|
//! | experiment        | `EXPERIMENT#{id}`          | `METADATA`            |
//! | membership        | `EXPERIMENT#{id}`          | `MEMBER#{participant}`|
//! | protocol session  | `EXPERIMENT#{id}`          | `PROTOCOL#{id}`       |
//! | session           | `EXPERIMENT#{id}`          | `SESSION#{id}`        |
//! | task              | `TASK#{key}`               | `METADATA`            |
//! | questionnaire     | `QUESTIONNAIRE#{id}`       | `CONFIG`              |
//! | response          | `RESPONSE#{id}`            | `METADATA`            |

use crate::repo::document_store::Query;

pub const KEY_SEPARATOR: char = '#';
pub const METADATA_SORT_KEY: &str = "METADATA";
pub const QUESTIONNAIRE_SORT_KEY: &str = "CONFIG";

const EXPERIMENT_PREFIX: &str = "EXPERIMENT#";
const MEMBER_PREFIX: &str = "MEMBER#";
const PROTOCOL_PREFIX: &str = "PROTOCOL#";
const SESSION_PREFIX: &str = "SESSION#";
const TASK_PREFIX: &str = "TASK#";
const QUESTIONNAIRE_PREFIX: &str = "QUESTIONNAIRE#";
const RESPONSE_PREFIX: &str = "RESPONSE#";
const PARTICIPANT_PREFIX: &str = "PARTICIPANT#";

const ALL_EXPERIMENTS_PARTITION: &str = "EXPERIMENTS";
const ALL_TASKS_PARTITION: &str = "TASKS";

/// Entity types sharing the keyspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Experiment,
    Membership,
    ProtocolSession,
    Session,
    Task,
    Questionnaire,
    Response,
}

impl EntityKind {
    /// Stable name stored in the `entityType` attribute.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Experiment => "EXPERIMENT",
            Self::Membership => "MEMBERSHIP",
            Self::ProtocolSession => "PROTOCOL_SESSION",
            Self::Session => "SESSION",
            Self::Task => "TASK",
            Self::Questionnaire => "QUESTIONNAIRE",
            Self::Response => "RESPONSE",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Table primary key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PrimaryKey {
    pub partition: String,
    pub sort: String,
}

impl PrimaryKey {
    pub fn new(partition: impl Into<String>, sort: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            sort: sort.into(),
        }
    }
}

impl std::fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.partition, self.sort)
    }
}

/// Secondary indexes of the shared table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexName {
    /// Collection listings ordered by time.
    ByCollection,
    /// Reverse lookups keyed by participant.
    ByParticipant,
    /// Response lookups keyed by experiment session.
    BySession,
}

impl IndexName {
    pub const ALL: [IndexName; 3] = [Self::ByCollection, Self::ByParticipant, Self::BySession];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ByCollection => "gsi1",
            Self::ByParticipant => "gsi2",
            Self::BySession => "gsi3",
        }
    }
}

/// One secondary-index entry for an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexKey {
    pub index: IndexName,
    pub partition: String,
    pub sort: String,
}

impl IndexKey {
    pub fn new(index: IndexName, partition: impl Into<String>, sort: impl Into<String>) -> Self {
        Self {
            index,
            partition: partition.into(),
            sort: sort.into(),
        }
    }
}

/// Key derivation contract implemented once per entity type.
pub trait EntityKey {
    /// Entity type owning the key.
    fn kind(&self) -> EntityKind;
    /// Table primary key of the entity's item.
    fn primary_key(&self) -> PrimaryKey;
}

fn experiment_partition(experiment_id: &str) -> String {
    format!("{EXPERIMENT_PREFIX}{experiment_id}")
}

fn participant_partition(participant_id: &str) -> String {
    format!("{PARTICIPANT_PREFIX}{participant_id}")
}

/// Root experiment record key.
#[derive(Debug, Clone, Copy)]
pub struct ExperimentKey<'a> {
    pub experiment_id: &'a str,
}

impl<'a> ExperimentKey<'a> {
    pub fn new(experiment_id: &'a str) -> Self {
        Self { experiment_id }
    }

    /// "All experiments, newest first" index entry.
    pub fn listing_index(&self, created_at: &str) -> IndexKey {
        IndexKey::new(IndexName::ByCollection, ALL_EXPERIMENTS_PARTITION, created_at)
    }

    /// Query listing every experiment newest-first.
    pub fn listing_query() -> Query {
        Query::index(IndexName::ByCollection, ALL_EXPERIMENTS_PARTITION).newest_first()
    }
}

impl EntityKey for ExperimentKey<'_> {
    fn kind(&self) -> EntityKind {
        EntityKind::Experiment
    }

    fn primary_key(&self) -> PrimaryKey {
        PrimaryKey::new(experiment_partition(self.experiment_id), METADATA_SORT_KEY)
    }
}

/// Enrollment row key inside the experiment partition.
#[derive(Debug, Clone, Copy)]
pub struct MembershipKey<'a> {
    pub experiment_id: &'a str,
    pub participant_id: &'a str,
}

impl<'a> MembershipKey<'a> {
    pub fn new(experiment_id: &'a str, participant_id: &'a str) -> Self {
        Self {
            experiment_id,
            participant_id,
        }
    }

    /// Reverse lookup entry for "my experiments".
    pub fn participant_index(&self) -> IndexKey {
        IndexKey::new(
            IndexName::ByParticipant,
            participant_partition(self.participant_id),
            experiment_partition(self.experiment_id),
        )
    }

    /// Query returning every membership row of one experiment.
    pub fn experiment_members_query(experiment_id: &str) -> Query {
        Query::partition(experiment_partition(experiment_id)).begins_with(MEMBER_PREFIX)
    }

    /// Query returning every experiment a participant is enrolled in.
    pub fn participant_experiments_query(participant_id: &str) -> Query {
        Query::index(IndexName::ByParticipant, participant_partition(participant_id))
            .begins_with(EXPERIMENT_PREFIX)
    }
}

impl EntityKey for MembershipKey<'_> {
    fn kind(&self) -> EntityKind {
        EntityKind::Membership
    }

    fn primary_key(&self) -> PrimaryKey {
        PrimaryKey::new(
            experiment_partition(self.experiment_id),
            format!("{MEMBER_PREFIX}{}", self.participant_id),
        )
    }
}

/// Protocol session key inside the experiment partition.
#[derive(Debug, Clone, Copy)]
pub struct ProtocolSessionKey<'a> {
    pub experiment_id: &'a str,
    pub protocol_session_id: &'a str,
}

impl<'a> ProtocolSessionKey<'a> {
    pub fn new(experiment_id: &'a str, protocol_session_id: &'a str) -> Self {
        Self {
            experiment_id,
            protocol_session_id,
        }
    }

    pub fn experiment_query(experiment_id: &str) -> Query {
        Query::partition(experiment_partition(experiment_id)).begins_with(PROTOCOL_PREFIX)
    }
}

impl EntityKey for ProtocolSessionKey<'_> {
    fn kind(&self) -> EntityKind {
        EntityKind::ProtocolSession
    }

    fn primary_key(&self) -> PrimaryKey {
        PrimaryKey::new(
            experiment_partition(self.experiment_id),
            format!("{PROTOCOL_PREFIX}{}", self.protocol_session_id),
        )
    }
}

/// Session occurrence key inside the experiment partition.
#[derive(Debug, Clone, Copy)]
pub struct SessionKey<'a> {
    pub experiment_id: &'a str,
    pub session_id: &'a str,
}

impl<'a> SessionKey<'a> {
    pub fn new(experiment_id: &'a str, session_id: &'a str) -> Self {
        Self {
            experiment_id,
            session_id,
        }
    }

    fn activity_partition(experiment_id: &str) -> String {
        format!("{}#SESSIONS", experiment_partition(experiment_id))
    }

    /// Experiment-scoped entry ordered by last update.
    pub fn activity_index(&self, updated_at: &str) -> IndexKey {
        IndexKey::new(
            IndexName::ByCollection,
            Self::activity_partition(self.experiment_id),
            format!("{updated_at}#{}", self.session_id),
        )
    }

    /// Participant-scoped entry ordered by last update.
    pub fn participant_index(&self, participant_id: &str, updated_at: &str) -> IndexKey {
        IndexKey::new(
            IndexName::ByParticipant,
            participant_partition(participant_id),
            format!("{SESSION_PREFIX}{updated_at}#{}", self.session_id),
        )
    }

    pub fn experiment_query(experiment_id: &str) -> Query {
        Query::partition(experiment_partition(experiment_id)).begins_with(SESSION_PREFIX)
    }

    /// Sessions of one experiment updated strictly after `since`, oldest first.
    pub fn changes_since_query(experiment_id: &str, since: &str) -> Query {
        // The sentinel sorts after every id character, so entries stamped
        // exactly `since` fall below the bound.
        Query::index(IndexName::ByCollection, Self::activity_partition(experiment_id))
            .after(format!("{since}{KEY_SEPARATOR}\u{10FFFF}"))
    }

    pub fn participant_query(participant_id: &str) -> Query {
        Query::index(IndexName::ByParticipant, participant_partition(participant_id))
            .begins_with(SESSION_PREFIX)
            .newest_first()
    }
}

impl EntityKey for SessionKey<'_> {
    fn kind(&self) -> EntityKind {
        EntityKind::Session
    }

    fn primary_key(&self) -> PrimaryKey {
        PrimaryKey::new(
            experiment_partition(self.experiment_id),
            format!("{SESSION_PREFIX}{}", self.session_id),
        )
    }
}

/// Task key; `task_key` must already be validated and uppercased.
#[derive(Debug, Clone, Copy)]
pub struct TaskKey<'a> {
    pub task_key: &'a str,
}

impl<'a> TaskKey<'a> {
    pub fn new(task_key: &'a str) -> Self {
        Self { task_key }
    }

    pub fn listing_index(&self, created_at: &str) -> IndexKey {
        IndexKey::new(IndexName::ByCollection, ALL_TASKS_PARTITION, created_at)
    }

    pub fn listing_query() -> Query {
        Query::index(IndexName::ByCollection, ALL_TASKS_PARTITION).newest_first()
    }
}

impl EntityKey for TaskKey<'_> {
    fn kind(&self) -> EntityKind {
        EntityKind::Task
    }

    fn primary_key(&self) -> PrimaryKey {
        PrimaryKey::new(format!("{TASK_PREFIX}{}", self.task_key), METADATA_SORT_KEY)
    }
}

/// Questionnaire key in the questionnaire collection.
#[derive(Debug, Clone, Copy)]
pub struct QuestionnaireKey<'a> {
    pub questionnaire_id: &'a str,
}

impl<'a> QuestionnaireKey<'a> {
    pub fn new(questionnaire_id: &'a str) -> Self {
        Self { questionnaire_id }
    }
}

impl EntityKey for QuestionnaireKey<'_> {
    fn kind(&self) -> EntityKind {
        EntityKind::Questionnaire
    }

    fn primary_key(&self) -> PrimaryKey {
        PrimaryKey::new(
            format!("{QUESTIONNAIRE_PREFIX}{}", self.questionnaire_id),
            QUESTIONNAIRE_SORT_KEY,
        )
    }
}

/// Response record key plus its three lookup entries.
#[derive(Debug, Clone, Copy)]
pub struct ResponseKey<'a> {
    pub response_id: &'a str,
}

impl<'a> ResponseKey<'a> {
    pub fn new(response_id: &'a str) -> Self {
        Self { response_id }
    }

    fn experiment_responses_partition(experiment_id: &str) -> String {
        format!("{}#RESPONSES", experiment_partition(experiment_id))
    }

    fn session_partition(experiment_id: &str, session_id: &str) -> String {
        format!("{}#{SESSION_PREFIX}{session_id}", experiment_partition(experiment_id))
    }

    /// (experiment, participant, questionnaire) entry.
    pub fn experiment_index(
        &self,
        experiment_id: &str,
        participant_id: &str,
        questionnaire_id: &str,
        submitted_at: &str,
    ) -> IndexKey {
        IndexKey::new(
            IndexName::ByCollection,
            Self::experiment_responses_partition(experiment_id),
            format!(
                "{PARTICIPANT_PREFIX}{participant_id}#{QUESTIONNAIRE_PREFIX}{questionnaire_id}#{submitted_at}#{}",
                self.response_id
            ),
        )
    }

    /// Participant entry ordered by submission time.
    pub fn participant_index(&self, participant_id: &str, submitted_at: &str) -> IndexKey {
        IndexKey::new(
            IndexName::ByParticipant,
            participant_partition(participant_id),
            format!("{RESPONSE_PREFIX}{submitted_at}#{}", self.response_id),
        )
    }

    /// (experiment, session, task) entry.
    pub fn session_index(
        &self,
        experiment_id: &str,
        session_id: &str,
        task_id: Option<&str>,
        submitted_at: &str,
    ) -> IndexKey {
        IndexKey::new(
            IndexName::BySession,
            Self::session_partition(experiment_id, session_id),
            format!(
                "{TASK_PREFIX}{}#{submitted_at}#{}",
                task_id.unwrap_or("-"),
                self.response_id
            ),
        )
    }

    /// Responses of one experiment, optionally narrowed to a participant and
    /// then to a questionnaire.
    pub fn experiment_query(
        experiment_id: &str,
        participant_id: Option<&str>,
        questionnaire_id: Option<&str>,
    ) -> Query {
        let query = Query::index(
            IndexName::ByCollection,
            Self::experiment_responses_partition(experiment_id),
        );
        match (participant_id, questionnaire_id) {
            (Some(participant), Some(questionnaire)) => query.begins_with(format!(
                "{PARTICIPANT_PREFIX}{participant}#{QUESTIONNAIRE_PREFIX}{questionnaire}#"
            )),
            (Some(participant), None) => {
                query.begins_with(format!("{PARTICIPANT_PREFIX}{participant}#"))
            }
            _ => query,
        }
    }

    pub fn participant_query(participant_id: &str) -> Query {
        Query::index(IndexName::ByParticipant, participant_partition(participant_id))
            .begins_with(RESPONSE_PREFIX)
            .newest_first()
    }

    pub fn session_query(experiment_id: &str, session_id: &str, task_id: Option<&str>) -> Query {
        let query = Query::index(
            IndexName::BySession,
            Self::session_partition(experiment_id, session_id),
        );
        match task_id {
            Some(task) => query.begins_with(format!("{TASK_PREFIX}{task}#")),
            None => query,
        }
    }
}

impl EntityKey for ResponseKey<'_> {
    fn kind(&self) -> EntityKind {
        EntityKind::Response
    }

    fn primary_key(&self) -> PrimaryKey {
        PrimaryKey::new(
            format!("{RESPONSE_PREFIX}{}", self.response_id),
            METADATA_SORT_KEY,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::{
        EntityKey, ExperimentKey, IndexName, MembershipKey, QuestionnaireKey, ResponseKey,
        SessionKey, TaskKey,
    };
    use crate::repo::document_store::{QueryTarget, SortCondition};

    #[test]
    fn root_records_use_metadata_sort_key() {
        let key = ExperimentKey::new("E1").primary_key();
        assert_eq!(key.partition, "EXPERIMENT#E1");
        assert_eq!(key.sort, "METADATA");

        let task = TaskKey::new("PVT_10").primary_key();
        assert_eq!(task.partition, "TASK#PVT_10");
        assert_eq!(task.sort, "METADATA");

        let questionnaire = QuestionnaireKey::new("PQ").primary_key();
        assert_eq!(questionnaire.partition, "QUESTIONNAIRE#PQ");
        assert_eq!(questionnaire.sort, "CONFIG");
    }

    #[test]
    fn membership_rows_share_the_experiment_partition() {
        let membership = MembershipKey::new("E1", "bob");
        assert_eq!(
            membership.primary_key().partition,
            ExperimentKey::new("E1").primary_key().partition
        );
        assert_eq!(membership.primary_key().sort, "MEMBER#bob");

        let reverse = membership.participant_index();
        assert_eq!(reverse.index, IndexName::ByParticipant);
        assert_eq!(reverse.partition, "PARTICIPANT#bob");
        assert_eq!(reverse.sort, "EXPERIMENT#E1");
    }

    #[test]
    fn key_derivation_is_deterministic() {
        let first = SessionKey::new("E1", "S9").activity_index("2026-01-01T00:00:00.000000Z");
        let second = SessionKey::new("E1", "S9").activity_index("2026-01-01T00:00:00.000000Z");
        assert_eq!(first, second);
        assert_eq!(
            ResponseKey::new("R1").primary_key(),
            ResponseKey::new("R1").primary_key()
        );
    }

    #[test]
    fn listing_queries_target_expected_indexes() {
        let query = ExperimentKey::listing_query();
        assert_eq!(query.target, QueryTarget::Index(IndexName::ByCollection));
        assert_eq!(query.partition, "EXPERIMENTS");
        assert!(query.descending);

        let members = MembershipKey::experiment_members_query("E1");
        assert_eq!(members.target, QueryTarget::Table);
        assert_eq!(members.sort, SortCondition::BeginsWith("MEMBER#".to_string()));
    }

    #[test]
    fn response_experiment_query_narrows_by_prefix() {
        let query = ResponseKey::experiment_query("E1", Some("bob"), Some("PQ"));
        assert_eq!(
            query.sort,
            SortCondition::BeginsWith("PARTICIPANT#bob#QUESTIONNAIRE#PQ#".to_string())
        );
        let entry = ResponseKey::new("R1").experiment_index("E1", "bob", "PQ", "T");
        assert!(entry.sort.starts_with("PARTICIPANT#bob#QUESTIONNAIRE#PQ#"));
    }
}
