//! Protocol session definitions stored in the experiment partition.

use crate::codec::{self, AttributeValue, Item};
use crate::context::{Clock, RequestContext, SystemClock};
use crate::error::CoreResult;
use crate::keyspace::{EntityKey, EntityKind, ProtocolSessionKey};
use crate::model::ids::normalize_id;
use crate::model::resource::{ProtocolSession, ResourceListQuery};
use crate::repo::document_store::{Condition, DocumentStore, ItemUpdate, ItemWrite, ReadConsistency};
use crate::service::common::{
    apply_listing, decode_audit, duplicate_on_condition, generate_id, live_condition,
    missing_on_condition, new_item, now, require_object, stamp_created, string_attr, ATTR_DATA,
    ATTR_DELETED, ATTR_ID, ATTR_UPDATED_AT, ATTR_UPDATED_BY,
};
use log::info;
use serde_json::Value;
use std::sync::Arc;

const ATTR_EXPERIMENT_ID: &str = "experimentId";

pub struct ProtocolSessionService<S: DocumentStore> {
    store: S,
    clock: Arc<dyn Clock>,
}

impl<S: DocumentStore> ProtocolSessionService<S> {
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

    /// Creates a protocol session; an id is generated when `id` is `None`.
    pub fn create(
        &self,
        ctx: &RequestContext,
        experiment_id: &str,
        id: Option<&str>,
        data: &Value,
    ) -> CoreResult<ProtocolSession> {
        let performed_by = ctx.require_researcher("create protocol sessions")?;
        let experiment_id = normalize_id("experiment id", experiment_id)?;
        let id = match id {
            Some(raw) => normalize_id("protocol session id", raw)?,
            None => generate_id(),
        };
        require_object("protocol session data", data)?;
        let created_at = now(self.clock.as_ref())?;

        let mut attributes = new_item(EntityKind::ProtocolSession);
        attributes.insert(ATTR_ID.to_string(), string_attr(id.as_str()));
        attributes.insert(ATTR_EXPERIMENT_ID.to_string(), string_attr(experiment_id.as_str()));
        attributes.insert(ATTR_DATA.to_string(), codec::encode(data));
        attributes.insert(ATTR_DELETED.to_string(), AttributeValue::Bool(false));
        stamp_created(&mut attributes, &created_at, performed_by);

        let write = ItemWrite {
            key: ProtocolSessionKey::new(&experiment_id, &id).primary_key(),
            index_keys: Vec::new(),
            attributes,
        };
        self.store
            .put(&write, Some(&Condition::NotExists), ctx.cancellation())
            .map_err(|err| duplicate_on_condition(err, EntityKind::ProtocolSession, &id))?;
        info!(
            "event=protocol_session_create module=protocol_session status=ok experiment_id={} protocol_session_id={} performed_by={}",
            experiment_id, id, performed_by
        );
        decode_protocol_session(&write.attributes)
    }

    pub fn get(
        &self,
        ctx: &RequestContext,
        experiment_id: &str,
        id: &str,
    ) -> CoreResult<Option<ProtocolSession>> {
        let experiment_id = normalize_id("experiment id", experiment_id)?;
        let id = normalize_id("protocol session id", id)?;
        self.store
            .get(
                &ProtocolSessionKey::new(&experiment_id, &id).primary_key(),
                ReadConsistency::Strong,
                ctx.cancellation(),
            )?
            .map(|item| decode_protocol_session(&item))
            .transpose()
    }

    pub fn update(
        &self,
        ctx: &RequestContext,
        experiment_id: &str,
        id: &str,
        data: &Value,
    ) -> CoreResult<ProtocolSession> {
        let performed_by = ctx.require_researcher("update protocol sessions")?;
        let experiment_id = normalize_id("experiment id", experiment_id)?;
        let id = normalize_id("protocol session id", id)?;
        require_object("protocol session data", data)?;
        let updated_at = now(self.clock.as_ref())?;

        let update = ItemUpdate::new(ProtocolSessionKey::new(&experiment_id, &id).primary_key())
            .set(ATTR_DATA, codec::encode(data))
            .set(ATTR_UPDATED_AT, string_attr(updated_at.as_str()))
            .set(ATTR_UPDATED_BY, string_attr(performed_by))
            .when(live_condition());
        let item = self
            .store
            .update(&update, ctx.cancellation())
            .map_err(|err| missing_on_condition(err, EntityKind::ProtocolSession, &id))?;
        info!(
            "event=protocol_session_update module=protocol_session status=ok experiment_id={} protocol_session_id={} performed_by={}",
            experiment_id, id, performed_by
        );
        decode_protocol_session(&item)
    }

    pub fn soft_delete(&self, ctx: &RequestContext, experiment_id: &str, id: &str) -> CoreResult<()> {
        let performed_by = ctx.require_researcher("delete protocol sessions")?;
        let experiment_id = normalize_id("experiment id", experiment_id)?;
        let id = normalize_id("protocol session id", id)?;
        let updated_at = now(self.clock.as_ref())?;

        let update = ItemUpdate::new(ProtocolSessionKey::new(&experiment_id, &id).primary_key())
            .set(ATTR_DELETED, AttributeValue::Bool(true))
            .set(ATTR_UPDATED_AT, string_attr(updated_at.as_str()))
            .set(ATTR_UPDATED_BY, string_attr(performed_by))
            .when(live_condition());
        self.store
            .update(&update, ctx.cancellation())
            .map_err(|err| missing_on_condition(err, EntityKind::ProtocolSession, &id))?;
        info!(
            "event=protocol_session_delete module=protocol_session status=ok experiment_id={} protocol_session_id={} performed_by={}",
            experiment_id, id, performed_by
        );
        Ok(())
    }

    /// Protocol sessions of one experiment in id order.
    pub fn list_for_experiment(
        &self,
        ctx: &RequestContext,
        experiment_id: &str,
        query: &ResourceListQuery,
    ) -> CoreResult<Vec<ProtocolSession>> {
        let experiment_id = normalize_id("experiment id", experiment_id)?;
        let sessions = self
            .store
            .query(
                &ProtocolSessionKey::experiment_query(&experiment_id),
                ctx.cancellation(),
            )?
            .iter()
            .map(decode_protocol_session)
            .collect::<CoreResult<Vec<_>>>()?;
        Ok(apply_listing(sessions, query, |session| session.deleted))
    }
}

fn decode_protocol_session(item: &Item) -> CoreResult<ProtocolSession> {
    Ok(ProtocolSession {
        id: codec::required_string(item, ATTR_ID)?,
        experiment_id: codec::required_string(item, ATTR_EXPERIMENT_ID)?,
        data: codec::structured(item, ATTR_DATA)?,
        audit: decode_audit(item)?,
        deleted: codec::flag(item, ATTR_DELETED)?,
    })
}
