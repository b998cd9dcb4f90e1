//! Document store contract shared by every service.
//!
//! # Responsibility
//! - Describe the single-item operations the core needs from a partition/sort
//!   keyed store with secondary indexes and conditional writes.
//! - Keep conditions backend-neutral so any store with an atomic
//!   read-check-write primitive can host the keyspace.
//!
//! # Invariants
//! - Every write touches exactly one item.
//! - A condition is evaluated against the current item atomically with the write.
//! - A raised cancellation token aborts the call without applying the write.

use crate::codec::{AttributeValue, Item};
use crate::context::CancellationToken;
use crate::keyspace::{IndexKey, IndexName, PrimaryKey};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type StoreResult<T> = Result<T, StoreError>;

/// Store-level failure classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The write condition did not hold for the current item.
    ConditionFailed(PrimaryKey),
    /// Busy, locked, throttled or timed out. Safe to retry.
    Unavailable(String),
    /// The caller cancelled the request.
    Cancelled,
    /// Stored bytes could not be mapped back to attributes.
    InvalidData(String),
    /// Any other backend failure.
    Backend(String),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConditionFailed(key) => write!(f, "conditional write failed for {key}"),
            Self::Unavailable(message) => write!(f, "store unavailable: {message}"),
            Self::Cancelled => write!(f, "store call cancelled"),
            Self::InvalidData(message) => write!(f, "invalid stored item: {message}"),
            Self::Backend(message) => write!(f, "store failure: {message}"),
        }
    }
}

impl Error for StoreError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadConsistency {
    #[default]
    Strong,
    Eventual,
}

/// Which key set a query runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryTarget {
    Table,
    Index(IndexName),
}

/// Sort-key predicate of a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SortCondition {
    Any,
    BeginsWith(String),
    /// Strictly greater than the bound.
    After(String),
}

/// Single-partition query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub target: QueryTarget,
    pub partition: String,
    pub sort: SortCondition,
    pub descending: bool,
    pub limit: Option<u32>,
    /// Top-level attributes to return; `None` returns whole items.
    pub projection: Option<Vec<String>>,
}

impl Query {
    pub fn partition(partition: impl Into<String>) -> Self {
        Self {
            target: QueryTarget::Table,
            partition: partition.into(),
            sort: SortCondition::Any,
            descending: false,
            limit: None,
            projection: None,
        }
    }

    pub fn index(index: IndexName, partition: impl Into<String>) -> Self {
        Self {
            target: QueryTarget::Index(index),
            ..Self::partition(partition)
        }
    }

    pub fn begins_with(mut self, prefix: impl Into<String>) -> Self {
        self.sort = SortCondition::BeginsWith(prefix.into());
        self
    }

    pub fn after(mut self, bound: impl Into<String>) -> Self {
        self.sort = SortCondition::After(bound.into());
        self
    }

    pub fn newest_first(mut self) -> Self {
        self.descending = true;
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn project(mut self, attributes: &[&str]) -> Self {
        self.projection = Some(attributes.iter().map(|name| (*name).to_string()).collect());
        self
    }
}

/// Write predicate over the current item state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    Exists,
    NotExists,
    /// Attribute at `path` is present and equal to one of `values`.
    AttributeIn {
        path: Vec<String>,
        values: Vec<AttributeValue>,
    },
    /// Attribute at `path` is absent or `NULL`.
    AttributeMissing { path: Vec<String> },
    And(Vec<Condition>),
    Or(Vec<Condition>),
}

impl Condition {
    pub fn attribute_in(path: &[&str], values: Vec<AttributeValue>) -> Self {
        Self::AttributeIn {
            path: path.iter().map(|part| (*part).to_string()).collect(),
            values,
        }
    }

    pub fn attribute_missing(path: &[&str]) -> Self {
        Self::AttributeMissing {
            path: path.iter().map(|part| (*part).to_string()).collect(),
        }
    }

    /// Evaluates the predicate; `current` is `None` when no item exists.
    pub fn evaluate(&self, current: Option<&Item>) -> bool {
        match self {
            Self::Exists => current.is_some(),
            Self::NotExists => current.is_none(),
            Self::AttributeIn { path, values } => current
                .and_then(|item| resolve_path(item, path))
                .is_some_and(|value| values.contains(value)),
            Self::AttributeMissing { path } => !matches!(
                current.and_then(|item| resolve_path(item, path)),
                Some(value) if *value != AttributeValue::Null
            ),
            Self::And(parts) => parts.iter().all(|part| part.evaluate(current)),
            Self::Or(parts) => parts.iter().any(|part| part.evaluate(current)),
        }
    }
}

fn resolve_path<'a>(item: &'a Item, path: &[String]) -> Option<&'a AttributeValue> {
    let (first, rest) = path.split_first()?;
    let mut value = item.get(first)?;
    for part in rest {
        value = value.as_map()?.get(part)?;
    }
    Some(value)
}

/// Full-item write.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemWrite {
    pub key: PrimaryKey,
    pub index_keys: Vec<IndexKey>,
    pub attributes: Item,
}

/// Partial update of top-level attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemUpdate {
    pub key: PrimaryKey,
    pub set: Item,
    pub remove: Vec<String>,
    /// Index entries to overwrite; indexes not listed keep their entry.
    pub index_keys: Vec<IndexKey>,
    pub condition: Option<Condition>,
}

impl ItemUpdate {
    pub fn new(key: PrimaryKey) -> Self {
        Self {
            key,
            set: Item::new(),
            remove: Vec::new(),
            index_keys: Vec::new(),
            condition: None,
        }
    }

    pub fn set(mut self, name: &str, value: AttributeValue) -> Self {
        self.set.insert(name.to_string(), value);
        self
    }

    pub fn index_key(mut self, key: IndexKey) -> Self {
        self.index_keys.push(key);
        self
    }

    pub fn when(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }
}

/// Partition/sort keyed document store with conditional single-item writes.
pub trait DocumentStore {
    /// Point read; `None` when the item does not exist.
    fn get(
        &self,
        key: &PrimaryKey,
        consistency: ReadConsistency,
        cancel: &CancellationToken,
    ) -> StoreResult<Option<Item>>;

    /// Replaces the whole item when `condition` holds.
    fn put(
        &self,
        write: &ItemWrite,
        condition: Option<&Condition>,
        cancel: &CancellationToken,
    ) -> StoreResult<()>;

    /// Applies `update` when its condition holds and returns the new item.
    ///
    /// An update on a missing item creates it from the `set` attributes,
    /// so existence-gated callers must say so in the condition.
    fn update(&self, update: &ItemUpdate, cancel: &CancellationToken) -> StoreResult<Item>;

    /// Deletes the item when `condition` holds; deleting nothing is not an error.
    fn delete(
        &self,
        key: &PrimaryKey,
        condition: Option<&Condition>,
        cancel: &CancellationToken,
    ) -> StoreResult<()>;

    /// Runs a single-partition query.
    fn query(&self, query: &Query, cancel: &CancellationToken) -> StoreResult<Vec<Item>>;
}

impl<T: DocumentStore + ?Sized> DocumentStore for &T {
    fn get(
        &self,
        key: &PrimaryKey,
        consistency: ReadConsistency,
        cancel: &CancellationToken,
    ) -> StoreResult<Option<Item>> {
        (**self).get(key, consistency, cancel)
    }

    fn put(
        &self,
        write: &ItemWrite,
        condition: Option<&Condition>,
        cancel: &CancellationToken,
    ) -> StoreResult<()> {
        (**self).put(write, condition, cancel)
    }

    fn update(&self, update: &ItemUpdate, cancel: &CancellationToken) -> StoreResult<Item> {
        (**self).update(update, cancel)
    }

    fn delete(
        &self,
        key: &PrimaryKey,
        condition: Option<&Condition>,
        cancel: &CancellationToken,
    ) -> StoreResult<()> {
        (**self).delete(key, condition, cancel)
    }

    fn query(&self, query: &Query, cancel: &CancellationToken) -> StoreResult<Vec<Item>> {
        (**self).query(query, cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::Condition;
    use crate::codec::{AttributeValue, Item};
    use std::collections::BTreeMap;

    fn item_with_status(top: Option<&str>, nested: Option<&str>) -> Item {
        let mut item = Item::new();
        if let Some(status) = top {
            item.insert("status".to_string(), AttributeValue::string(status));
        }
        if let Some(status) = nested {
            let mut data = BTreeMap::new();
            data.insert("status".to_string(), AttributeValue::string(status));
            item.insert("data".to_string(), AttributeValue::M(data));
        }
        item
    }

    #[test]
    fn existence_conditions() {
        let item = Item::new();
        assert!(Condition::Exists.evaluate(Some(&item)));
        assert!(!Condition::Exists.evaluate(None));
        assert!(Condition::NotExists.evaluate(None));
        assert!(!Condition::NotExists.evaluate(Some(&item)));
    }

    #[test]
    fn attribute_in_follows_nested_paths() {
        let item = item_with_status(None, Some("Active"));
        let nested = Condition::attribute_in(&["data", "status"], vec![AttributeValue::string("Active")]);
        let top = Condition::attribute_in(&["status"], vec![AttributeValue::string("Active")]);
        assert!(nested.evaluate(Some(&item)));
        assert!(!top.evaluate(Some(&item)));
        assert!(!nested.evaluate(None));
    }

    #[test]
    fn attribute_missing_treats_null_as_missing() {
        let mut item = item_with_status(None, None);
        assert!(Condition::attribute_missing(&["status"]).evaluate(Some(&item)));
        item.insert("status".to_string(), AttributeValue::Null);
        assert!(Condition::attribute_missing(&["status"]).evaluate(Some(&item)));
        item.insert("status".to_string(), AttributeValue::string("Draft"));
        assert!(!Condition::attribute_missing(&["status"]).evaluate(Some(&item)));
    }

    #[test]
    fn combinators_short_circuit_as_expected() {
        let item = item_with_status(Some("Paused"), Some("Active"));
        let allowed = vec![AttributeValue::string("Active")];
        let condition = Condition::Or(vec![
            Condition::attribute_in(&["status"], allowed.clone()),
            Condition::And(vec![
                Condition::attribute_missing(&["status"]),
                Condition::attribute_in(&["data", "status"], allowed),
            ]),
        ]);
        assert!(!condition.evaluate(Some(&item)));
    }
}
