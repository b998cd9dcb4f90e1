//! Task catalog service.
//!
//! # Invariants
//! - Task keys are uppercased and match `^[A-Z0-9_]{3,64}$`.
//! - Soft-deleted tasks reject updates and are hidden from listings by default.

use crate::codec::{self, AttributeValue, Item};
use crate::context::{Clock, RequestContext, SystemClock};
use crate::error::CoreResult;
use crate::keyspace::{EntityKey, EntityKind, TaskKey};
use crate::model::ids::normalize_task_key;
use crate::model::resource::{ResourceListQuery, Task};
use crate::repo::document_store::{Condition, DocumentStore, ItemUpdate, ItemWrite, ReadConsistency};
use crate::service::common::{
    apply_listing, decode_audit, duplicate_on_condition, live_condition, missing_on_condition,
    new_item, now, require_object, stamp_created, string_attr, ATTR_DATA, ATTR_DELETED, ATTR_ID,
    ATTR_UPDATED_AT, ATTR_UPDATED_BY,
};
use log::info;
use serde_json::Value;
use std::sync::Arc;

pub struct TaskService<S: DocumentStore> {
    store: S,
    clock: Arc<dyn Clock>,
}

impl<S: DocumentStore> TaskService<S> {
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

    pub fn create(&self, ctx: &RequestContext, task_key: &str, data: &Value) -> CoreResult<Task> {
        let performed_by = ctx.require_researcher("create tasks")?;
        let task_key = normalize_task_key(task_key)?;
        require_object("task data", data)?;
        let created_at = now(self.clock.as_ref())?;

        let key = TaskKey::new(&task_key);
        let mut attributes = new_item(EntityKind::Task);
        attributes.insert(ATTR_ID.to_string(), string_attr(task_key.as_str()));
        attributes.insert(ATTR_DATA.to_string(), codec::encode(data));
        attributes.insert(ATTR_DELETED.to_string(), AttributeValue::Bool(false));
        stamp_created(&mut attributes, &created_at, performed_by);

        let write = ItemWrite {
            key: key.primary_key(),
            index_keys: vec![key.listing_index(&created_at)],
            attributes,
        };
        self.store
            .put(&write, Some(&Condition::NotExists), ctx.cancellation())
            .map_err(|err| duplicate_on_condition(err, EntityKind::Task, &task_key))?;
        info!(
            "event=task_create module=task status=ok task_key={} performed_by={}",
            task_key, performed_by
        );
        decode_task(&write.attributes)
    }

    /// Point read; soft-deleted tasks are returned with `deleted = true`.
    pub fn get(&self, ctx: &RequestContext, task_key: &str) -> CoreResult<Option<Task>> {
        let task_key = normalize_task_key(task_key)?;
        self.store
            .get(
                &TaskKey::new(&task_key).primary_key(),
                ReadConsistency::Strong,
                ctx.cancellation(),
            )?
            .map(|item| decode_task(&item))
            .transpose()
    }

    /// Replaces the task payload.
    pub fn update(&self, ctx: &RequestContext, task_key: &str, data: &Value) -> CoreResult<Task> {
        let performed_by = ctx.require_researcher("update tasks")?;
        let task_key = normalize_task_key(task_key)?;
        require_object("task data", data)?;
        let updated_at = now(self.clock.as_ref())?;

        let update = ItemUpdate::new(TaskKey::new(&task_key).primary_key())
            .set(ATTR_DATA, codec::encode(data))
            .set(ATTR_UPDATED_AT, string_attr(updated_at.as_str()))
            .set(ATTR_UPDATED_BY, string_attr(performed_by))
            .when(live_condition());
        let item = self
            .store
            .update(&update, ctx.cancellation())
            .map_err(|err| missing_on_condition(err, EntityKind::Task, &task_key))?;
        info!(
            "event=task_update module=task status=ok task_key={} performed_by={}",
            task_key, performed_by
        );
        decode_task(&item)
    }

    pub fn soft_delete(&self, ctx: &RequestContext, task_key: &str) -> CoreResult<()> {
        let performed_by = ctx.require_researcher("delete tasks")?;
        let task_key = normalize_task_key(task_key)?;
        let updated_at = now(self.clock.as_ref())?;

        let update = ItemUpdate::new(TaskKey::new(&task_key).primary_key())
            .set(ATTR_DELETED, AttributeValue::Bool(true))
            .set(ATTR_UPDATED_AT, string_attr(updated_at.as_str()))
            .set(ATTR_UPDATED_BY, string_attr(performed_by))
            .when(live_condition());
        self.store
            .update(&update, ctx.cancellation())
            .map_err(|err| missing_on_condition(err, EntityKind::Task, &task_key))?;
        info!(
            "event=task_delete module=task status=ok task_key={} performed_by={}",
            task_key, performed_by
        );
        Ok(())
    }

    /// Tasks newest-first by creation time.
    pub fn list(&self, ctx: &RequestContext, query: &ResourceListQuery) -> CoreResult<Vec<Task>> {
        let tasks = self
            .store
            .query(&TaskKey::listing_query(), ctx.cancellation())?
            .iter()
            .map(decode_task)
            .collect::<CoreResult<Vec<_>>>()?;
        Ok(apply_listing(tasks, query, |task| task.deleted))
    }
}

fn decode_task(item: &Item) -> CoreResult<Task> {
    Ok(Task {
        key: codec::required_string(item, ATTR_ID)?,
        data: codec::structured(item, ATTR_DATA)?,
        audit: decode_audit(item)?,
        deleted: codec::flag(item, ATTR_DELETED)?,
    })
}
