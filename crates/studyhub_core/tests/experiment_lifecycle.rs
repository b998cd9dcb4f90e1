mod common;

use common::{catalog, participant, researcher, seed_questionnaires, StepClock};
use rusqlite::Connection;
use serde_json::json;
use studyhub_core::codec::{AttributeValue, Item};
use studyhub_core::db::open_db_in_memory;
use studyhub_core::keyspace::{EntityKey, EntityKind, ExperimentKey};
use studyhub_core::repo::document_store::{DocumentStore, ItemWrite};
use studyhub_core::{
    CallerIdentity, ConflictReason, CoreError, ErrorKind, ExperimentData, ExperimentService,
    ExperimentStatus, NewExperiment, QuestionnaireService, RequestContext, ScheduleRule,
    SessionType, SqliteDocumentStore, StatusSource,
};

type Experiments<'a> =
    ExperimentService<SqliteDocumentStore<'a>, QuestionnaireService<SqliteDocumentStore<'a>>>;

fn service(conn: &Connection) -> Experiments<'_> {
    ExperimentService::new(SqliteDocumentStore::study_items(conn).unwrap(), catalog(conn))
        .with_clock(StepClock::new())
}

fn daily(questionnaires: &[&str]) -> ExperimentData {
    ExperimentData::named("Sleep study")
        .with_session_type("daily", SessionType::with_questionnaires(questionnaires.to_vec()))
}

fn create(experiments: &Experiments<'_>, id: &str, data: ExperimentData) -> studyhub_core::Experiment {
    experiments
        .create(
            &researcher(),
            &NewExperiment {
                id: Some(id.to_string()),
                data,
            },
        )
        .unwrap()
}

#[test]
fn create_stores_draft_with_normalized_questionnaire_ids() {
    let conn = open_db_in_memory().unwrap();
    seed_questionnaires(&conn, &["PQ", "MOOD"]);
    let experiments = service(&conn);

    let created = create(
        &experiments,
        "E1",
        daily(&[" pq", "Mood", "PQ"]).with_schedule("mood", ScheduleRule::Daily),
    );
    assert_eq!(created.status, ExperimentStatus::Draft);
    assert_eq!(created.status_source, StatusSource::TopLevel);
    assert_eq!(created.questionnaire_ids, vec!["MOOD", "PQ"]);
    assert_eq!(created.created_by, "rita");

    let loaded = experiments.get(&researcher(), "E1").unwrap().unwrap();
    assert_eq!(loaded, created);
    assert_eq!(loaded.data.session_types["daily"].questionnaires, vec![" pq", "Mood", "PQ"]);
}

#[test]
fn create_without_id_generates_one() {
    let conn = open_db_in_memory().unwrap();
    let experiments = service(&conn);

    let created = experiments
        .create(
            &researcher(),
            &NewExperiment {
                id: None,
                data: ExperimentData::named("No questionnaires"),
            },
        )
        .unwrap();
    assert!(!created.id.is_empty());
    assert!(experiments.get(&researcher(), &created.id).unwrap().is_some());
}

#[test]
fn create_lists_every_missing_questionnaire() {
    let conn = open_db_in_memory().unwrap();
    seed_questionnaires(&conn, &["MOOD"]);
    let experiments = service(&conn);

    let err = experiments
        .create(
            &researcher(),
            &NewExperiment {
                id: Some("E1".to_string()),
                data: daily(&["pq", "mood", "x1"]).with_schedule("sched", ScheduleRule::Once),
            },
        )
        .unwrap_err();

    match err {
        CoreError::Validation { offending_ids, .. } => {
            assert_eq!(offending_ids, vec!["PQ", "SCHED", "X1"]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(experiments.get(&researcher(), "E1").unwrap().is_none());
}

#[test]
fn second_create_with_same_id_conflicts_and_keeps_first() {
    let conn = open_db_in_memory().unwrap();
    let experiments = service(&conn);
    create(&experiments, "E1", ExperimentData::named("first"));

    let err = experiments
        .create(
            &researcher(),
            &NewExperiment {
                id: Some("E1".to_string()),
                data: ExperimentData::named("second"),
            },
        )
        .unwrap_err();
    assert_eq!(
        err,
        CoreError::Conflict {
            entity: EntityKind::Experiment,
            id: "E1".to_string(),
            reason: ConflictReason::AlreadyExists,
        }
    );
    let loaded = experiments.get(&researcher(), "E1").unwrap().unwrap();
    assert_eq!(loaded.data.name, "first");
}

#[test]
fn list_returns_newest_first_summaries() {
    let conn = open_db_in_memory().unwrap();
    let experiments = service(&conn);
    assert!(experiments.list(&researcher()).unwrap().is_empty());

    create(&experiments, "OLD", ExperimentData::named("old"));
    let mut newer = ExperimentData::named("new");
    newer.description = "second".to_string();
    create(&experiments, "NEW", newer);

    let summaries = experiments.list(&researcher()).unwrap();
    let ids: Vec<_> = summaries.iter().map(|summary| summary.id.as_str()).collect();
    assert_eq!(ids, vec!["NEW", "OLD"]);
    assert_eq!(summaries[0].description, "second");
    assert_eq!(summaries[0].status, Some(ExperimentStatus::Draft));
}

#[test]
fn update_replaces_payload_and_keeps_status() {
    let conn = open_db_in_memory().unwrap();
    seed_questionnaires(&conn, &["PQ", "MOOD"]);
    let experiments = service(&conn);
    create(&experiments, "E1", daily(&["PQ"]));
    experiments
        .transition(&researcher(), "E1", ExperimentStatus::Active)
        .unwrap();

    // The schedule map is not re-validated on update.
    let mut data = daily(&["mood"]).with_schedule("unknown_q", ScheduleRule::Weekly);
    data.extra.insert("irb".to_string(), json!({ "approved": true }));
    let updated = experiments.update(&researcher(), "E1", &data).unwrap();

    assert_eq!(updated.status, ExperimentStatus::Active);
    assert_eq!(updated.questionnaire_ids, vec!["MOOD"]);
    assert_eq!(updated.data, data);
    assert_eq!(experiments.get(&researcher(), "E1").unwrap().unwrap(), updated);
}

#[test]
fn unknown_session_settings_and_schedule_rules_are_kept() {
    let conn = open_db_in_memory().unwrap();
    seed_questionnaires(&conn, &["PQ"]);
    let experiments = service(&conn);
    let session = json!({
        "questionnaires": ["PQ"],
        "tasks": [],
        "durationMinutes": 10,
        "order": ["PQ"],
        "estimatedDuration": 12
    });
    let data: ExperimentData = serde_json::from_value(json!({
        "name": "Sleep study",
        "sessionTypes": { "daily": session.clone() },
        "questionnaireConfig": { "PQ": "biweekly" }
    }))
    .unwrap();
    assert_eq!(data.session_types["daily"].extra["estimatedDuration"], json!(12));

    create(&experiments, "E1", data.clone());
    let loaded = experiments.get(&researcher(), "E1").unwrap().unwrap();
    assert_eq!(loaded.data, data);
    assert_eq!(
        loaded.data.questionnaire_config["PQ"],
        ScheduleRule::Other("biweekly".to_string())
    );
    let back = serde_json::to_value(&loaded.data).unwrap();
    assert_eq!(back["sessionTypes"]["daily"], session);
    assert_eq!(back["questionnaireConfig"]["PQ"], json!("biweekly"));
}

#[test]
fn update_rejects_unknown_session_questionnaires() {
    let conn = open_db_in_memory().unwrap();
    let experiments = service(&conn);
    create(&experiments, "E1", ExperimentData::named("empty"));

    let err = experiments
        .update(&researcher(), "E1", &daily(&["ghost"]))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[test]
fn update_and_delete_of_missing_experiment_are_not_found() {
    let conn = open_db_in_memory().unwrap();
    let experiments = service(&conn);

    let err = experiments
        .update(&researcher(), "NOPE", &ExperimentData::named("x"))
        .unwrap_err();
    assert_eq!(err, CoreError::not_found(EntityKind::Experiment, "NOPE"));

    let err = experiments.delete(&researcher(), "NOPE").unwrap_err();
    assert_eq!(err, CoreError::not_found(EntityKind::Experiment, "NOPE"));
}

#[test]
fn delete_removes_root_record() {
    let conn = open_db_in_memory().unwrap();
    let experiments = service(&conn);
    create(&experiments, "E1", ExperimentData::named("x"));

    experiments.delete(&researcher(), "E1").unwrap();
    assert!(experiments.get(&researcher(), "E1").unwrap().is_none());
    assert!(experiments.list(&researcher()).unwrap().is_empty());
    assert_eq!(
        experiments.delete(&researcher(), "E1").unwrap_err().kind(),
        ErrorKind::NotFound
    );
}

/// Walks a fresh experiment from `Draft` to `state` along allowed edges.
fn reach(experiments: &Experiments<'_>, id: &str, state: ExperimentStatus) {
    create(experiments, id, ExperimentData::named(id));
    let path: &[ExperimentStatus] = match state {
        ExperimentStatus::Draft => &[],
        ExperimentStatus::Active => &[ExperimentStatus::Active],
        ExperimentStatus::Paused => &[ExperimentStatus::Active, ExperimentStatus::Paused],
        ExperimentStatus::Closed => &[ExperimentStatus::Active, ExperimentStatus::Closed],
    };
    for step in path {
        experiments.transition(&researcher(), id, *step).unwrap();
    }
}

#[test]
fn every_transition_pair_follows_the_table() {
    let conn = open_db_in_memory().unwrap();
    let experiments = service(&conn);
    let targets = [
        ExperimentStatus::Active,
        ExperimentStatus::Paused,
        ExperimentStatus::Closed,
    ];

    for from in ExperimentStatus::ALL {
        for target in targets {
            let id = format!("{from}_TO_{target}");
            reach(&experiments, &id, from);
            let outcome = experiments.transition(&researcher(), &id, target);

            if from.can_transition_to(target) {
                let moved = outcome.unwrap();
                assert_eq!(moved.status, target, "{from} -> {target}");
            } else {
                assert_eq!(
                    outcome.unwrap_err(),
                    CoreError::Conflict {
                        entity: EntityKind::Experiment,
                        id: id.clone(),
                        reason: ConflictReason::InvalidTransition {
                            attempted: target,
                            current: from,
                        },
                    },
                    "{from} -> {target}"
                );
                let unchanged = experiments.get(&researcher(), &id).unwrap().unwrap();
                assert_eq!(unchanged.status, from);
            }
        }
    }
}

#[test]
fn transition_to_draft_or_missing_experiment_fails() {
    let conn = open_db_in_memory().unwrap();
    let experiments = service(&conn);
    create(&experiments, "E1", ExperimentData::named("x"));

    let err = experiments
        .transition(&researcher(), "E1", ExperimentStatus::Draft)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = experiments
        .transition(&researcher(), "GHOST", ExperimentStatus::Active)
        .unwrap_err();
    assert_eq!(err, CoreError::not_found(EntityKind::Experiment, "GHOST"));
}

fn insert_legacy_row(conn: &Connection, id: &str, nested_status: &str) {
    let store = SqliteDocumentStore::study_items(conn).unwrap();
    let key = ExperimentKey::new(id);
    let mut data = Item::new();
    data.insert("name".to_string(), AttributeValue::string("legacy"));
    data.insert("status".to_string(), AttributeValue::string(nested_status));

    let mut attributes = Item::new();
    attributes.insert("entityType".to_string(), AttributeValue::string("EXPERIMENT"));
    attributes.insert("id".to_string(), AttributeValue::string(id));
    attributes.insert("name".to_string(), AttributeValue::string("legacy"));
    attributes.insert("data".to_string(), AttributeValue::M(data));
    for name in ["createdAt", "updatedAt"] {
        attributes.insert(name.to_string(), AttributeValue::string("2025-01-01T00:00:00.000000Z"));
    }
    for name in ["createdBy", "updatedBy"] {
        attributes.insert(name.to_string(), AttributeValue::string("importer"));
    }

    let write = ItemWrite {
        key: key.primary_key(),
        index_keys: vec![key.listing_index("2025-01-01T00:00:00.000000Z")],
        attributes,
    };
    store
        .put(&write, None, &studyhub_core::CancellationToken::new())
        .unwrap();
}

#[test]
fn legacy_nested_status_is_resolved_and_reported() {
    let conn = open_db_in_memory().unwrap();
    insert_legacy_row(&conn, "LEGACY", "active");
    let experiments = service(&conn);

    let loaded = experiments.get(&researcher(), "LEGACY").unwrap().unwrap();
    assert_eq!(loaded.status, ExperimentStatus::Active);
    assert_eq!(loaded.status_source, StatusSource::LegacyPayload);
    assert!(loaded.data.extra.is_empty());

    let summaries = experiments.list(&researcher()).unwrap();
    assert_eq!(summaries[0].status, None);
}

#[test]
fn legacy_status_survives_update_and_gates_transitions() {
    let conn = open_db_in_memory().unwrap();
    insert_legacy_row(&conn, "LEGACY", "active");
    let experiments = service(&conn);

    let updated = experiments
        .update(&researcher(), "LEGACY", &ExperimentData::named("renamed"))
        .unwrap();
    assert_eq!(updated.status, ExperimentStatus::Active);
    assert_eq!(updated.status_source, StatusSource::LegacyPayload);

    let err = experiments
        .transition(&researcher(), "LEGACY", ExperimentStatus::Active)
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::Conflict {
            reason: ConflictReason::InvalidTransition {
                current: ExperimentStatus::Active,
                ..
            },
            ..
        }
    ));

    let paused = experiments
        .transition(&researcher(), "LEGACY", ExperimentStatus::Paused)
        .unwrap();
    assert_eq!(paused.status, ExperimentStatus::Paused);
    assert_eq!(paused.status_source, StatusSource::TopLevel);
    assert_eq!(paused.data.name, "renamed");
}

#[test]
fn payload_cannot_smuggle_status() {
    let conn = open_db_in_memory().unwrap();
    let experiments = service(&conn);
    let mut data = ExperimentData::named("sneaky");
    data.extra.insert("status".to_string(), json!("Active"));

    let err = experiments
        .create(
            &researcher(),
            &NewExperiment {
                id: Some("E1".to_string()),
                data,
            },
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[test]
fn mutations_require_an_authenticated_researcher() {
    let conn = open_db_in_memory().unwrap();
    let experiments = service(&conn);
    let request = NewExperiment {
        id: Some("E1".to_string()),
        data: ExperimentData::named("x"),
    };

    let err = experiments
        .create(&RequestContext::new(CallerIdentity::anonymous()), &request)
        .unwrap_err();
    assert_eq!(err, CoreError::Unauthenticated);

    let err = experiments.create(&participant("bob"), &request).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    // Reads are not gated by the core.
    assert!(experiments.get(&participant("bob"), "E1").unwrap().is_none());
}

#[test]
fn validate_reports_without_failing() {
    let conn = open_db_in_memory().unwrap();
    seed_questionnaires(&conn, &["PQ"]);
    let experiments = service(&conn);

    let report = experiments
        .validate(
            &researcher(),
            &daily(&["pq", "gad7"]).with_schedule("phq9", ScheduleRule::Weekly),
        )
        .unwrap();
    assert!(!report.valid);
    assert_eq!(report.referenced_ids, vec!["GAD7", "PHQ9", "PQ"]);
    assert_eq!(report.missing_ids, vec!["GAD7", "PHQ9"]);

    let report = experiments.validate(&researcher(), &daily(&["PQ"])).unwrap();
    assert!(report.valid);
    assert!(report.missing_ids.is_empty());
}
