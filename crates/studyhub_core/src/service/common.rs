//! Item mapping helpers shared by the services.

use crate::codec::{self, AttributeValue, Item};
use crate::context::{format_timestamp, Clock};
use crate::error::{CoreError, CoreResult};
use crate::keyspace::EntityKind;
use crate::model::resource::{Audit, ResourceListQuery};
use crate::repo::document_store::{Condition, StoreError};
use serde_json::Value;
use uuid::Uuid;

pub(crate) const ATTR_ENTITY_TYPE: &str = "entityType";
pub(crate) const ATTR_ID: &str = "id";
pub(crate) const ATTR_DATA: &str = "data";
pub(crate) const ATTR_DELETED: &str = "deleted";
pub(crate) const ATTR_CREATED_AT: &str = "createdAt";
pub(crate) const ATTR_CREATED_BY: &str = "createdBy";
pub(crate) const ATTR_UPDATED_AT: &str = "updatedAt";
pub(crate) const ATTR_UPDATED_BY: &str = "updatedBy";

pub(crate) fn now(clock: &dyn Clock) -> CoreResult<String> {
    format_timestamp(clock.now())
}

pub(crate) fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

pub(crate) fn string_attr(value: impl Into<String>) -> AttributeValue {
    AttributeValue::S(value.into())
}

/// Starts an item with the entity type tag set.
pub(crate) fn new_item(kind: EntityKind) -> Item {
    let mut item = Item::new();
    item.insert(ATTR_ENTITY_TYPE.to_string(), string_attr(kind.as_str()));
    item
}

/// Writes all four audit attributes for a freshly created record.
pub(crate) fn stamp_created(item: &mut Item, at: &str, by: &str) {
    item.insert(ATTR_CREATED_AT.to_string(), string_attr(at));
    item.insert(ATTR_CREATED_BY.to_string(), string_attr(by));
    item.insert(ATTR_UPDATED_AT.to_string(), string_attr(at));
    item.insert(ATTR_UPDATED_BY.to_string(), string_attr(by));
}

pub(crate) fn decode_audit(item: &Item) -> CoreResult<Audit> {
    Ok(Audit {
        created_at: codec::required_string(item, ATTR_CREATED_AT)?,
        created_by: codec::required_string(item, ATTR_CREATED_BY)?,
        updated_at: codec::required_string(item, ATTR_UPDATED_AT)?,
        updated_by: codec::required_string(item, ATTR_UPDATED_BY)?,
    })
}

/// Checks that a free-form payload is a JSON object.
pub(crate) fn require_object(field: &'static str, value: &Value) -> CoreResult<()> {
    if value.is_object() {
        Ok(())
    } else {
        Err(CoreError::validation(format!("{field} must be a JSON object")))
    }
}

/// Item exists and is not soft-deleted.
pub(crate) fn live_condition() -> Condition {
    Condition::And(vec![
        Condition::Exists,
        Condition::Or(vec![
            Condition::attribute_missing(&[ATTR_DELETED]),
            Condition::attribute_in(&[ATTR_DELETED], vec![AttributeValue::Bool(false)]),
        ]),
    ])
}

/// Maps a lost existence-gated write to `NotFound`.
pub(crate) fn missing_on_condition(err: StoreError, entity: EntityKind, id: &str) -> CoreError {
    match err {
        StoreError::ConditionFailed(_) => CoreError::not_found(entity, id),
        other => other.into(),
    }
}

/// Maps a lost create-only write to `Conflict`.
pub(crate) fn duplicate_on_condition(err: StoreError, entity: EntityKind, id: &str) -> CoreError {
    match err {
        StoreError::ConditionFailed(_) => CoreError::already_exists(entity, id),
        other => other.into(),
    }
}

/// Drops soft-deleted records unless asked for, then applies the limit.
pub(crate) fn apply_listing<T>(
    records: Vec<T>,
    query: &ResourceListQuery,
    is_deleted: impl Fn(&T) -> bool,
) -> Vec<T> {
    let limit = query.limit.map_or(usize::MAX, |limit| limit as usize);
    records
        .into_iter()
        .filter(|record| query.include_deleted || !is_deleted(record))
        .take(limit)
        .collect()
}
