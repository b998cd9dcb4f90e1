//! Questionnaire response service.
//!
//! # Responsibility
//! - Accept submissions and maintain the experiment, participant and session
//!   lookup entries of each response.
//! - Enforce who may submit or change a response.
//!
//! # Invariants
//! - A participant may only submit for themselves; researchers may submit for anyone.
//! - Update/delete is limited to the participant the response belongs to and
//!   to researchers.
//! - Only `answers` changes after submission.

use crate::codec::{self, Item};
use crate::context::{Clock, RequestContext, SystemClock};
use crate::error::{CoreError, CoreResult};
use crate::keyspace::{EntityKey, EntityKind, ResponseKey};
use crate::model::ids::{normalize_id, normalize_task_key};
use crate::model::response::{Response, SubmitResponse};
use crate::repo::document_store::{Condition, DocumentStore, ItemUpdate, ItemWrite, Query, ReadConsistency};
use crate::service::common::{
    duplicate_on_condition, generate_id, missing_on_condition, new_item, now, require_object,
    string_attr, ATTR_ID, ATTR_UPDATED_AT, ATTR_UPDATED_BY,
};
use log::info;
use serde_json::Value;
use std::sync::Arc;

const ATTR_EXPERIMENT_ID: &str = "experimentId";
const ATTR_PARTICIPANT_ID: &str = "participantId";
const ATTR_QUESTIONNAIRE_ID: &str = "questionnaireId";
const ATTR_SESSION_ID: &str = "sessionId";
const ATTR_TASK_ID: &str = "taskId";
const ATTR_ANSWERS: &str = "answers";
const ATTR_SUBMITTED_AT: &str = "submittedAt";
const ATTR_SUBMITTED_BY: &str = "submittedBy";

pub struct ResponseService<S: DocumentStore> {
    store: S,
    clock: Arc<dyn Clock>,
}

impl<S: DocumentStore> ResponseService<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn submit(&self, ctx: &RequestContext, request: &SubmitResponse) -> CoreResult<Response> {
        let performed_by = ctx.performed_by()?;
        let experiment_id = normalize_id("experiment id", &request.experiment_id)?;
        let participant_id = normalize_id("participant id", &request.participant_id)?;
        if !ctx.is_researcher() && participant_id != performed_by {
            return Err(CoreError::Forbidden {
                action: "submit responses for another participant",
                username: performed_by.to_string(),
            });
        }
        let questionnaire_id =
            normalize_id("questionnaire id", &request.questionnaire_id)?.to_uppercase();
        let session_id = request
            .session_id
            .as_deref()
            .map(|raw| normalize_id("session id", raw))
            .transpose()?;
        let task_id = request.task_id.as_deref().map(normalize_task_key).transpose()?;
        if task_id.is_some() && session_id.is_none() {
            return Err(CoreError::validation("task id requires a session id"));
        }
        require_object("answers", &request.answers)?;
        let response_id = match request.id.as_deref() {
            Some(raw) => normalize_id("response id", raw)?,
            None => generate_id(),
        };
        let submitted_at = now(self.clock.as_ref())?;

        let key = ResponseKey::new(&response_id);
        let mut attributes = new_item(EntityKind::Response);
        attributes.insert(ATTR_ID.to_string(), string_attr(response_id.as_str()));
        attributes.insert(ATTR_EXPERIMENT_ID.to_string(), string_attr(experiment_id.as_str()));
        attributes.insert(ATTR_PARTICIPANT_ID.to_string(), string_attr(participant_id.as_str()));
        attributes.insert(
            ATTR_QUESTIONNAIRE_ID.to_string(),
            string_attr(questionnaire_id.as_str()),
        );
        if let Some(session_id) = session_id.as_deref() {
            attributes.insert(ATTR_SESSION_ID.to_string(), string_attr(session_id));
        }
        if let Some(task_id) = task_id.as_deref() {
            attributes.insert(ATTR_TASK_ID.to_string(), string_attr(task_id));
        }
        attributes.insert(ATTR_ANSWERS.to_string(), codec::encode(&request.answers));
        attributes.insert(ATTR_SUBMITTED_AT.to_string(), string_attr(submitted_at.as_str()));
        attributes.insert(ATTR_SUBMITTED_BY.to_string(), string_attr(performed_by));
        attributes.insert(ATTR_UPDATED_AT.to_string(), string_attr(submitted_at.as_str()));
        attributes.insert(ATTR_UPDATED_BY.to_string(), string_attr(performed_by));

        let mut index_keys = vec![
            key.experiment_index(&experiment_id, &participant_id, &questionnaire_id, &submitted_at),
            key.participant_index(&participant_id, &submitted_at),
        ];
        if let Some(session_id) = session_id.as_deref() {
            index_keys.push(key.session_index(
                &experiment_id,
                session_id,
                task_id.as_deref(),
                &submitted_at,
            ));
        }

        let write = ItemWrite {
            key: key.primary_key(),
            index_keys,
            attributes,
        };
        self.store
            .put(&write, Some(&Condition::NotExists), ctx.cancellation())
            .map_err(|err| duplicate_on_condition(err, EntityKind::Response, &response_id))?;
        info!(
            "event=response_submit module=response status=ok response_id={} experiment_id={} questionnaire_id={} performed_by={}",
            response_id, experiment_id, questionnaire_id, performed_by
        );
        decode_response(&write.attributes)
    }

    pub fn get(&self, ctx: &RequestContext, response_id: &str) -> CoreResult<Option<Response>> {
        let response_id = normalize_id("response id", response_id)?;
        self.store
            .get(
                &ResponseKey::new(&response_id).primary_key(),
                ReadConsistency::Strong,
                ctx.cancellation(),
            )?
            .map(|item| decode_response(&item))
            .transpose()
    }

    /// Replaces the full answer set.
    pub fn update(
        &self,
        ctx: &RequestContext,
        response_id: &str,
        answers: &Value,
    ) -> CoreResult<Response> {
        let performed_by = ctx.performed_by()?;
        let response_id = normalize_id("response id", response_id)?;
        require_object("answers", answers)?;
        self.authorize_change(ctx, &response_id, "update this response")?;
        let updated_at = now(self.clock.as_ref())?;

        let update = ItemUpdate::new(ResponseKey::new(&response_id).primary_key())
            .set(ATTR_ANSWERS, codec::encode(answers))
            .set(ATTR_UPDATED_AT, string_attr(updated_at.as_str()))
            .set(ATTR_UPDATED_BY, string_attr(performed_by))
            .when(Condition::Exists);
        let item = self
            .store
            .update(&update, ctx.cancellation())
            .map_err(|err| missing_on_condition(err, EntityKind::Response, &response_id))?;
        info!(
            "event=response_update module=response status=ok response_id={} performed_by={}",
            response_id, performed_by
        );
        decode_response(&item)
    }

    /// Hard-deletes a response record and, with it, its lookup entries.
    pub fn delete(&self, ctx: &RequestContext, response_id: &str) -> CoreResult<()> {
        let performed_by = ctx.performed_by()?;
        let response_id = normalize_id("response id", response_id)?;
        self.authorize_change(ctx, &response_id, "delete this response")?;
        self.store
            .delete(
                &ResponseKey::new(&response_id).primary_key(),
                Some(&Condition::Exists),
                ctx.cancellation(),
            )
            .map_err(|err| missing_on_condition(err, EntityKind::Response, &response_id))?;
        info!(
            "event=response_delete module=response status=ok response_id={} performed_by={}",
            response_id, performed_by
        );
        Ok(())
    }

    /// Responses of one experiment, optionally narrowed to a participant and
    /// then to one questionnaire.
    pub fn list_for_experiment(
        &self,
        ctx: &RequestContext,
        experiment_id: &str,
        participant_id: Option<&str>,
        questionnaire_id: Option<&str>,
    ) -> CoreResult<Vec<Response>> {
        let experiment_id = normalize_id("experiment id", experiment_id)?;
        let participant_id = participant_id
            .map(|raw| normalize_id("participant id", raw))
            .transpose()?;
        let questionnaire_id = questionnaire_id
            .map(|raw| normalize_id("questionnaire id", raw).map(|id| id.to_uppercase()))
            .transpose()?;
        if questionnaire_id.is_some() && participant_id.is_none() {
            return Err(CoreError::validation(
                "a questionnaire filter requires a participant filter",
            ));
        }
        self.run(
            ctx,
            &ResponseKey::experiment_query(
                &experiment_id,
                participant_id.as_deref(),
                questionnaire_id.as_deref(),
            ),
        )
    }

    /// Responses of one participant, newest first.
    pub fn list_for_participant(
        &self,
        ctx: &RequestContext,
        participant_id: &str,
    ) -> CoreResult<Vec<Response>> {
        let participant_id = normalize_id("participant id", participant_id)?;
        self.run(ctx, &ResponseKey::participant_query(&participant_id))
    }

    /// Responses recorded in one session, optionally for one task.
    pub fn list_for_session(
        &self,
        ctx: &RequestContext,
        experiment_id: &str,
        session_id: &str,
        task_id: Option<&str>,
    ) -> CoreResult<Vec<Response>> {
        let experiment_id = normalize_id("experiment id", experiment_id)?;
        let session_id = normalize_id("session id", session_id)?;
        let task_id = task_id.map(normalize_task_key).transpose()?;
        self.run(
            ctx,
            &ResponseKey::session_query(&experiment_id, &session_id, task_id.as_deref()),
        )
    }

    /// Allows the owning participant or any researcher; `NotFound` when absent.
    fn authorize_change(
        &self,
        ctx: &RequestContext,
        response_id: &str,
        action: &'static str,
    ) -> CoreResult<()> {
        let performed_by = ctx.performed_by()?;
        let Some(current) = self.store.get(
            &ResponseKey::new(response_id).primary_key(),
            ReadConsistency::Strong,
            ctx.cancellation(),
        )?
        else {
            return Err(CoreError::not_found(EntityKind::Response, response_id));
        };
        let owner = codec::required_string(&current, ATTR_PARTICIPANT_ID)?;
        if ctx.is_researcher() || owner == performed_by {
            return Ok(());
        }
        Err(CoreError::Forbidden {
            action,
            username: performed_by.to_string(),
        })
    }

    fn run(&self, ctx: &RequestContext, query: &Query) -> CoreResult<Vec<Response>> {
        self.store
            .query(query, ctx.cancellation())?
            .iter()
            .map(decode_response)
            .collect()
    }
}

fn decode_response(item: &Item) -> CoreResult<Response> {
    Ok(Response {
        id: codec::required_string(item, ATTR_ID)?,
        experiment_id: codec::required_string(item, ATTR_EXPERIMENT_ID)?,
        participant_id: codec::required_string(item, ATTR_PARTICIPANT_ID)?,
        questionnaire_id: codec::required_string(item, ATTR_QUESTIONNAIRE_ID)?,
        session_id: codec::optional_string(item, ATTR_SESSION_ID)?,
        task_id: codec::optional_string(item, ATTR_TASK_ID)?,
        answers: codec::structured(item, ATTR_ANSWERS)?,
        submitted_at: codec::required_string(item, ATTR_SUBMITTED_AT)?,
        submitted_by: codec::required_string(item, ATTR_SUBMITTED_BY)?,
        updated_at: codec::required_string(item, ATTR_UPDATED_AT)?,
        updated_by: codec::required_string(item, ATTR_UPDATED_BY)?,
    })
}
