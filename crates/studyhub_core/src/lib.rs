//! Core domain logic for the study platform.
//!
//! Experiments, memberships, sessions and responses live in one shared
//! keyspace on a document store with conditional single-item writes. This
//! crate owns the key design, the status state machine, referential checks
//! and the error taxonomy; transport layers sit on top of it.

pub mod codec;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod keyspace;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use config::{ConfigError, CoreConfig};
pub use context::{
    CallerIdentity, CancellationToken, Clock, IdentityResolver, LocalIdentityResolver,
    RequestContext, SystemClock,
};
pub use error::{ConflictReason, CoreError, CoreResult, ErrorKind};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::experiment::{
    Experiment, ExperimentData, ExperimentStatus, ExperimentSummary, NewExperiment,
    ScheduleRule, SessionType, StatusSource, ValidationReport,
};
pub use model::membership::{
    AddMemberRequest, MemberRole, MemberStatus, Membership, MembershipFilter,
    ParticipantExperiment,
};
pub use model::questionnaire::{Questionnaire, QuestionnaireDraft};
pub use model::resource::{NewSession, ProtocolSession, ResourceListQuery, Session, Task};
pub use model::response::{Response, SubmitResponse};
pub use repo::document_store::{DocumentStore, StoreError};
pub use repo::sqlite_store::{Collection, SqliteDocumentStore};
pub use service::batch::{BatchItemResult, BatchSummary};
pub use service::experiment_service::ExperimentService;
pub use service::membership_service::MembershipService;
pub use service::protocol_session_service::ProtocolSessionService;
pub use service::questionnaire_service::{QuestionnaireLookup, QuestionnaireService};
pub use service::response_service::ResponseService;
pub use service::session_service::SessionService;
pub use service::task_service::TaskService;

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
