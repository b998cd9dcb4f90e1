//! Session occurrences: one participant running one session of an experiment.
//!
//! # Responsibility
//! - CRUD for session records inside the experiment partition.
//! - Keep the activity and participant index entries keyed by `updatedAt`
//!   so clients can pull changes incrementally.
//!
//! # Invariants
//! - Every write, soft delete included, re-keys both index entries to the
//!   new `updatedAt`.
//! - `changes_since` returns tombstones so offline clients can drop them.

use crate::codec::{self, AttributeValue, Item};
use crate::context::{normalize_timestamp, Clock, RequestContext, SystemClock};
use crate::error::{CoreError, CoreResult};
use crate::keyspace::{EntityKey, EntityKind, SessionKey};
use crate::model::ids::normalize_id;
use crate::model::resource::{NewSession, ResourceListQuery, Session};
use crate::repo::document_store::{
    Condition, DocumentStore, ItemUpdate, ItemWrite, Query, ReadConsistency,
};
use crate::service::common::{
    apply_listing, decode_audit, duplicate_on_condition, generate_id, live_condition,
    missing_on_condition, new_item, now, require_object, stamp_created, string_attr, ATTR_DATA,
    ATTR_DELETED, ATTR_ID, ATTR_UPDATED_AT, ATTR_UPDATED_BY,
};
use log::info;
use serde_json::Value;
use std::sync::Arc;

const ATTR_EXPERIMENT_ID: &str = "experimentId";
const ATTR_PARTICIPANT_ID: &str = "participantId";

pub struct SessionService<S: DocumentStore> {
    store: S,
    clock: Arc<dyn Clock>,
}

impl<S: DocumentStore> SessionService<S> {
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

    pub fn create(
        &self,
        ctx: &RequestContext,
        experiment_id: &str,
        request: &NewSession,
    ) -> CoreResult<Session> {
        let performed_by = ctx.require_researcher("create sessions")?;
        let experiment_id = normalize_id("experiment id", experiment_id)?;
        let participant_id = normalize_id("participant id", &request.participant_id)?;
        let session_id = match request.id.as_deref() {
            Some(raw) => normalize_id("session id", raw)?,
            None => generate_id(),
        };
        require_object("session data", &request.data)?;
        let created_at = now(self.clock.as_ref())?;

        let key = SessionKey::new(&experiment_id, &session_id);
        let mut attributes = new_item(EntityKind::Session);
        attributes.insert(ATTR_ID.to_string(), string_attr(session_id.as_str()));
        attributes.insert(ATTR_EXPERIMENT_ID.to_string(), string_attr(experiment_id.as_str()));
        attributes.insert(ATTR_PARTICIPANT_ID.to_string(), string_attr(participant_id.as_str()));
        attributes.insert(ATTR_DATA.to_string(), codec::encode(&request.data));
        attributes.insert(ATTR_DELETED.to_string(), AttributeValue::Bool(false));
        stamp_created(&mut attributes, &created_at, performed_by);

        let write = ItemWrite {
            key: key.primary_key(),
            index_keys: vec![
                key.activity_index(&created_at),
                key.participant_index(&participant_id, &created_at),
            ],
            attributes,
        };
        self.store
            .put(&write, Some(&Condition::NotExists), ctx.cancellation())
            .map_err(|err| duplicate_on_condition(err, EntityKind::Session, &session_id))?;
        info!(
            "event=session_create module=session status=ok experiment_id={} session_id={} participant_id={} performed_by={}",
            experiment_id, session_id, participant_id, performed_by
        );
        decode_session(&write.attributes)
    }

    pub fn get(
        &self,
        ctx: &RequestContext,
        experiment_id: &str,
        session_id: &str,
    ) -> CoreResult<Option<Session>> {
        let experiment_id = normalize_id("experiment id", experiment_id)?;
        let session_id = normalize_id("session id", session_id)?;
        self.store
            .get(
                &SessionKey::new(&experiment_id, &session_id).primary_key(),
                ReadConsistency::Strong,
                ctx.cancellation(),
            )?
            .map(|item| decode_session(&item))
            .transpose()
    }

    /// Replaces the session payload.
    pub fn update(
        &self,
        ctx: &RequestContext,
        experiment_id: &str,
        session_id: &str,
        data: &Value,
    ) -> CoreResult<Session> {
        let performed_by = ctx.require_researcher("update sessions")?;
        require_object("session data", data)?;
        let (session_id, update) = self.touch(ctx, experiment_id, session_id, performed_by)?;
        let update = update.set(ATTR_DATA, codec::encode(data));
        let item = self.apply(ctx, &session_id, &update)?;
        let session = decode_session(&item)?;
        info!(
            "event=session_update module=session status=ok experiment_id={} session_id={} performed_by={}",
            session.experiment_id, session.id, performed_by
        );
        Ok(session)
    }

    /// Marks the session deleted; the tombstone stays visible to `changes_since`.
    pub fn soft_delete(
        &self,
        ctx: &RequestContext,
        experiment_id: &str,
        session_id: &str,
    ) -> CoreResult<()> {
        let performed_by = ctx.require_researcher("delete sessions")?;
        let (session_id, update) = self.touch(ctx, experiment_id, session_id, performed_by)?;
        let update = update.set(ATTR_DELETED, AttributeValue::Bool(true));
        self.apply(ctx, &session_id, &update)?;
        info!(
            "event=session_delete module=session status=ok experiment_id={} session_id={} performed_by={}",
            experiment_id.trim(),
            session_id,
            performed_by
        );
        Ok(())
    }

    /// Sessions of one experiment in id order.
    pub fn list_for_experiment(
        &self,
        ctx: &RequestContext,
        experiment_id: &str,
        query: &ResourceListQuery,
    ) -> CoreResult<Vec<Session>> {
        let experiment_id = normalize_id("experiment id", experiment_id)?;
        let sessions = self.run(ctx, &SessionKey::experiment_query(&experiment_id))?;
        Ok(apply_listing(sessions, query, |session| session.deleted))
    }

    /// Sessions of one participant across experiments, most recently updated first.
    pub fn list_for_participant(
        &self,
        ctx: &RequestContext,
        participant_id: &str,
        query: &ResourceListQuery,
    ) -> CoreResult<Vec<Session>> {
        let participant_id = normalize_id("participant id", participant_id)?;
        let sessions = self.run(ctx, &SessionKey::participant_query(&participant_id))?;
        Ok(apply_listing(sessions, query, |session| session.deleted))
    }

    /// Sessions updated strictly after `since` (RFC 3339, any offset or
    /// precision), oldest change first.
    pub fn changes_since(
        &self,
        ctx: &RequestContext,
        experiment_id: &str,
        since: &str,
    ) -> CoreResult<Vec<Session>> {
        let experiment_id = normalize_id("experiment id", experiment_id)?;
        if since.trim().is_empty() {
            return Err(CoreError::validation("changes cursor must not be empty"));
        }
        let since = normalize_timestamp("changes cursor", since)?;
        self.run(ctx, &SessionKey::changes_since_query(&experiment_id, &since))
    }

    /// Reads the live session and prepares an update stamped with a fresh
    /// `updatedAt`, re-keying both index entries.
    fn touch(
        &self,
        ctx: &RequestContext,
        experiment_id: &str,
        session_id: &str,
        performed_by: &str,
    ) -> CoreResult<(String, ItemUpdate)> {
        let experiment_id = normalize_id("experiment id", experiment_id)?;
        let session_id = normalize_id("session id", session_id)?;
        let key = SessionKey::new(&experiment_id, &session_id);

        let current = match self.store.get(
            &key.primary_key(),
            ReadConsistency::Strong,
            ctx.cancellation(),
        )? {
            Some(item) if !codec::flag(&item, ATTR_DELETED)? => item,
            _ => return Err(CoreError::not_found(EntityKind::Session, session_id)),
        };
        let participant_id = codec::required_string(&current, ATTR_PARTICIPANT_ID)?;
        let updated_at = now(self.clock.as_ref())?;

        let update = ItemUpdate::new(key.primary_key())
            .set(ATTR_UPDATED_AT, string_attr(updated_at.as_str()))
            .set(ATTR_UPDATED_BY, string_attr(performed_by))
            .index_key(key.activity_index(&updated_at))
            .index_key(key.participant_index(&participant_id, &updated_at))
            .when(live_condition());
        Ok((session_id, update))
    }

    fn apply(&self, ctx: &RequestContext, session_id: &str, update: &ItemUpdate) -> CoreResult<Item> {
        self.store
            .update(update, ctx.cancellation())
            .map_err(|err| missing_on_condition(err, EntityKind::Session, session_id))
    }

    fn run(&self, ctx: &RequestContext, query: &Query) -> CoreResult<Vec<Session>> {
        self.store
            .query(query, ctx.cancellation())?
            .iter()
            .map(decode_session)
            .collect()
    }
}

fn decode_session(item: &Item) -> CoreResult<Session> {
    Ok(Session {
        id: codec::required_string(item, ATTR_ID)?,
        experiment_id: codec::required_string(item, ATTR_EXPERIMENT_ID)?,
        participant_id: codec::required_string(item, ATTR_PARTICIPANT_ID)?,
        data: codec::structured(item, ATTR_DATA)?,
        audit: decode_audit(item)?,
        deleted: codec::flag(item, ATTR_DELETED)?,
    })
}
