mod common;

use common::{participant, researcher, StepClock};
use rusqlite::Connection;
use serde_json::json;
use studyhub_core::db::open_db_in_memory;
use studyhub_core::keyspace::EntityKind;
use studyhub_core::{
    CallerIdentity, CoreError, ErrorKind, RequestContext, ResponseService, SqliteDocumentStore,
    SubmitResponse,
};

fn service(conn: &Connection) -> ResponseService<SqliteDocumentStore<'_>> {
    ResponseService::new(SqliteDocumentStore::study_items(conn).unwrap())
        .with_clock(StepClock::new())
}

fn ids(responses: &[studyhub_core::Response]) -> Vec<&str> {
    responses.iter().map(|response| response.id.as_str()).collect()
}

fn submit_as(
    responses: &ResponseService<SqliteDocumentStore<'_>>,
    id: &str,
    participant_id: &str,
    questionnaire_id: &str,
) {
    let mut request = SubmitResponse::new("E1", participant_id, questionnaire_id, json!({ "q1": 3 }));
    request.id = Some(id.to_string());
    responses.submit(&participant(participant_id), &request).unwrap();
}

#[test]
fn participants_submit_only_for_themselves() {
    let conn = open_db_in_memory().unwrap();
    let responses = service(&conn);

    let own = responses
        .submit(
            &participant("bob"),
            &SubmitResponse::new("E1", "bob", " pq ", json!({ "mood": 4 })),
        )
        .unwrap();
    assert_eq!(own.questionnaire_id, "PQ");
    assert_eq!(own.submitted_by, "bob");
    assert_eq!(own.session_id, None);

    let err = responses
        .submit(
            &participant("bob"),
            &SubmitResponse::new("E1", "amy", "PQ", json!({})),
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    let on_behalf = responses
        .submit(&researcher(), &SubmitResponse::new("E1", "amy", "PQ", json!({})))
        .unwrap();
    assert_eq!(on_behalf.participant_id, "amy");
    assert_eq!(on_behalf.submitted_by, "rita");

    let anonymous = RequestContext::new(CallerIdentity::anonymous());
    let err = responses
        .submit(&anonymous, &SubmitResponse::new("E1", "bob", "PQ", json!({})))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthenticated);
}

#[test]
fn submission_shape_is_validated() {
    let conn = open_db_in_memory().unwrap();
    let responses = service(&conn);

    let mut orphan_task = SubmitResponse::new("E1", "bob", "PQ", json!({}));
    orphan_task.task_id = Some("PVT_10".to_string());
    let err = responses.submit(&participant("bob"), &orphan_task).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = responses
        .submit(
            &participant("bob"),
            &SubmitResponse::new("E1", "bob", "PQ", json!("not an object")),
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let mut duplicate = SubmitResponse::new("E1", "bob", "PQ", json!({}));
    duplicate.id = Some("R1".to_string());
    responses.submit(&participant("bob"), &duplicate).unwrap();
    let err = responses.submit(&participant("bob"), &duplicate).unwrap_err();
    assert_eq!(err, CoreError::already_exists(EntityKind::Response, "R1"));
}

#[test]
fn experiment_listing_narrows_by_participant_then_questionnaire() {
    let conn = open_db_in_memory().unwrap();
    let responses = service(&conn);
    submit_as(&responses, "R1", "bob", "PQ");
    submit_as(&responses, "R2", "bob", "SLEEP");
    submit_as(&responses, "R3", "amy", "PQ");
    submit_as(&responses, "R4", "bob", "PQ");

    let all = responses
        .list_for_experiment(&researcher(), "E1", None, None)
        .unwrap();
    assert_eq!(all.len(), 4);

    let bob = responses
        .list_for_experiment(&researcher(), "E1", Some("bob"), None)
        .unwrap();
    assert_eq!(ids(&bob), vec!["R1", "R4", "R2"]);

    let bob_pq = responses
        .list_for_experiment(&researcher(), "E1", Some("bob"), Some("pq"))
        .unwrap();
    assert_eq!(ids(&bob_pq), vec!["R1", "R4"]);

    let err = responses
        .list_for_experiment(&researcher(), "E1", None, Some("PQ"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let mine = responses.list_for_participant(&participant("bob"), "bob").unwrap();
    assert_eq!(ids(&mine), vec!["R4", "R2", "R1"]);
}

#[test]
fn session_listing_narrows_by_task() {
    let conn = open_db_in_memory().unwrap();
    let responses = service(&conn);
    let in_session = |id: &str, task: Option<&str>| {
        let mut request = SubmitResponse::new("E1", "bob", "PQ", json!({})).in_session("S1", task);
        request.id = Some(id.to_string());
        responses.submit(&participant("bob"), &request).unwrap()
    };
    in_session("R1", Some("pvt_10"));
    in_session("R2", None);
    in_session("R3", Some("STROOP"));
    let stored = in_session("R4", Some("PVT_10"));
    assert_eq!(stored.task_id.as_deref(), Some("PVT_10"));

    let session = responses
        .list_for_session(&researcher(), "E1", "S1", None)
        .unwrap();
    assert_eq!(session.len(), 4);

    let pvt = responses
        .list_for_session(&researcher(), "E1", "S1", Some("pvt_10"))
        .unwrap();
    assert_eq!(ids(&pvt), vec!["R1", "R4"]);

    assert!(responses
        .list_for_session(&researcher(), "E1", "S2", None)
        .unwrap()
        .is_empty());
}

#[test]
fn owners_and_researchers_may_change_a_response() {
    let conn = open_db_in_memory().unwrap();
    let responses = service(&conn);
    submit_as(&responses, "R1", "bob", "PQ");

    let updated = responses
        .update(&participant("bob"), "R1", &json!({ "q1": 5 }))
        .unwrap();
    assert_eq!(updated.answers, json!({ "q1": 5 }));
    assert_eq!(updated.updated_by, "bob");
    assert_eq!(updated.questionnaire_id, "PQ");

    let err = responses
        .update(&participant("amy"), "R1", &json!({}))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
    let err = responses.delete(&participant("amy"), "R1").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    let corrected = responses
        .update(&researcher(), "R1", &json!({ "q1": 1 }))
        .unwrap();
    assert_eq!(corrected.updated_by, "rita");
    assert_eq!(corrected.submitted_by, "bob");

    responses.delete(&participant("bob"), "R1").unwrap();
    assert_eq!(responses.get(&researcher(), "R1").unwrap(), None);
    assert!(responses
        .list_for_experiment(&researcher(), "E1", Some("bob"), None)
        .unwrap()
        .is_empty());
    assert!(responses.list_for_participant(&researcher(), "bob").unwrap().is_empty());

    let err = responses.delete(&researcher(), "R1").unwrap_err();
    assert_eq!(err, CoreError::not_found(EntityKind::Response, "R1"));
    let err = responses.update(&researcher(), "R1", &json!({})).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}
