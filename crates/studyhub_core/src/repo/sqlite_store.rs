//! SQLite implementation of the document store contract.
//!
//! # Responsibility
//! - Persist items of one collection as `(pk, sk, gsi*, attributes)` rows.
//! - Evaluate write conditions inside `BEGIN IMMEDIATE` transactions so the
//!   read-check-write sequence is atomic across connections.
//!
//! # Invariants
//! - Attribute maps are stored as JSON text of `codec::Item`.
//! - A failed condition or a raised cancellation rolls the transaction back.
//! - Busy/locked database errors surface as `StoreError::Unavailable`.

use crate::codec::Item;
use crate::context::CancellationToken;
use crate::keyspace::{IndexKey, IndexName, PrimaryKey};
use crate::repo::document_store::{
    Condition, DocumentStore, ItemUpdate, ItemWrite, Query, QueryTarget, ReadConsistency,
    SortCondition, StoreError, StoreResult,
};
use log::debug;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension};
use rusqlite::{Transaction, TransactionBehavior};

/// Physical collections sharing one database file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    /// The single shared keyspace for experiments and their sub-entities.
    StudyItems,
    /// External questionnaire collection, referenced by id only.
    Questionnaires,
}

impl Collection {
    fn table(self) -> &'static str {
        match self {
            Self::StudyItems => "study_items",
            Self::Questionnaires => "questionnaire_items",
        }
    }
}

/// Maps a rusqlite failure onto the store taxonomy.
pub fn classify_sqlite_error(err: rusqlite::Error) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _)
            if matches!(
                failure.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
            ) =>
        {
            StoreError::Unavailable(err.to_string())
        }
        _ => StoreError::Backend(err.to_string()),
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        classify_sqlite_error(value)
    }
}

#[derive(Debug, Default)]
struct StoredRow {
    attributes: Item,
    indexes: [Option<(String, String)>; 3],
}

/// SQLite-backed document store for one collection.
pub struct SqliteDocumentStore<'conn> {
    conn: &'conn Connection,
    collection: Collection,
}

impl<'conn> SqliteDocumentStore<'conn> {
    /// Constructs a store from a migrated connection.
    pub fn try_new(conn: &'conn Connection, collection: Collection) -> StoreResult<Self> {
        let exists: i64 = conn.query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [collection.table()],
            |row| row.get(0),
        )?;
        if exists != 1 {
            return Err(StoreError::Backend(format!(
                "missing required table `{}`; was the database migrated?",
                collection.table()
            )));
        }
        Ok(Self { conn, collection })
    }

    pub fn study_items(conn: &'conn Connection) -> StoreResult<Self> {
        Self::try_new(conn, Collection::StudyItems)
    }

    pub fn questionnaires(conn: &'conn Connection) -> StoreResult<Self> {
        Self::try_new(conn, Collection::Questionnaires)
    }

    pub fn collection(&self) -> Collection {
        self.collection
    }

    fn begin(&self) -> StoreResult<Transaction<'conn>> {
        Ok(Transaction::new_unchecked(
            self.conn,
            TransactionBehavior::Immediate,
        )?)
    }

    fn read_row(&self, conn: &Connection, key: &PrimaryKey) -> StoreResult<Option<StoredRow>> {
        let table = self.collection.table();
        let row = conn
            .query_row(
                &format!(
                    "SELECT attributes, gsi1pk, gsi1sk, gsi2pk, gsi2sk, gsi3pk, gsi3sk
                     FROM {table}
                     WHERE pk = ?1 AND sk = ?2;"
                ),
                params![key.partition, key.sort],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        [
                            index_pair(row.get(1)?, row.get(2)?),
                            index_pair(row.get(3)?, row.get(4)?),
                            index_pair(row.get(5)?, row.get(6)?),
                        ],
                    ))
                },
            )
            .optional()?;

        match row {
            Some((attributes, indexes)) => Ok(Some(StoredRow {
                attributes: parse_attributes(&attributes)?,
                indexes,
            })),
            None => Ok(None),
        }
    }

    fn write_row(&self, conn: &Connection, key: &PrimaryKey, row: &StoredRow) -> StoreResult<()> {
        let table = self.collection.table();
        let attributes = serde_json::to_string(&row.attributes)
            .map_err(|err| StoreError::InvalidData(err.to_string()))?;
        let column = |slot: usize, part: usize| -> Option<&str> {
            row.indexes[slot]
                .as_ref()
                .map(|(pk, sk)| if part == 0 { pk.as_str() } else { sk.as_str() })
        };
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO {table} (
                    pk, sk, gsi1pk, gsi1sk, gsi2pk, gsi2sk, gsi3pk, gsi3sk, attributes
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9);"
            ),
            params![
                key.partition,
                key.sort,
                column(0, 0),
                column(0, 1),
                column(1, 0),
                column(1, 1),
                column(2, 0),
                column(2, 1),
                attributes,
            ],
        )?;
        Ok(())
    }

    fn check_condition(
        &self,
        key: &PrimaryKey,
        condition: Option<&Condition>,
        current: Option<&StoredRow>,
    ) -> StoreResult<()> {
        if let Some(condition) = condition {
            if !condition.evaluate(current.map(|row| &row.attributes)) {
                debug!(
                    "event=conditional_write module=store status=condition_failed collection={} key={}",
                    self.collection.table(),
                    key
                );
                return Err(StoreError::ConditionFailed(key.clone()));
            }
        }
        Ok(())
    }
}

impl DocumentStore for SqliteDocumentStore<'_> {
    fn get(
        &self,
        key: &PrimaryKey,
        _consistency: ReadConsistency,
        cancel: &CancellationToken,
    ) -> StoreResult<Option<Item>> {
        // SQLite reads are always strongly consistent.
        ensure_not_cancelled(cancel)?;
        Ok(self.read_row(self.conn, key)?.map(|row| row.attributes))
    }

    fn put(
        &self,
        write: &ItemWrite,
        condition: Option<&Condition>,
        cancel: &CancellationToken,
    ) -> StoreResult<()> {
        ensure_not_cancelled(cancel)?;
        let tx = self.begin()?;
        let current = self.read_row(&tx, &write.key)?;
        self.check_condition(&write.key, condition, current.as_ref())?;

        let mut row = StoredRow {
            attributes: write.attributes.clone(),
            ..StoredRow::default()
        };
        apply_index_keys(&mut row, &write.index_keys);
        self.write_row(&tx, &write.key, &row)?;

        ensure_not_cancelled(cancel)?;
        tx.commit()?;
        Ok(())
    }

    fn update(&self, update: &ItemUpdate, cancel: &CancellationToken) -> StoreResult<Item> {
        ensure_not_cancelled(cancel)?;
        let tx = self.begin()?;
        let current = self.read_row(&tx, &update.key)?;
        self.check_condition(&update.key, update.condition.as_ref(), current.as_ref())?;

        let mut row = current.unwrap_or_default();
        for name in &update.remove {
            row.attributes.remove(name);
        }
        for (name, value) in &update.set {
            row.attributes.insert(name.clone(), value.clone());
        }
        apply_index_keys(&mut row, &update.index_keys);
        self.write_row(&tx, &update.key, &row)?;

        ensure_not_cancelled(cancel)?;
        tx.commit()?;
        Ok(row.attributes)
    }

    fn delete(
        &self,
        key: &PrimaryKey,
        condition: Option<&Condition>,
        cancel: &CancellationToken,
    ) -> StoreResult<()> {
        ensure_not_cancelled(cancel)?;
        let tx = self.begin()?;
        let current = self.read_row(&tx, key)?;
        self.check_condition(key, condition, current.as_ref())?;

        tx.execute(
            &format!(
                "DELETE FROM {} WHERE pk = ?1 AND sk = ?2;",
                self.collection.table()
            ),
            params![key.partition, key.sort],
        )?;

        ensure_not_cancelled(cancel)?;
        tx.commit()?;
        Ok(())
    }

    fn query(&self, query: &Query, cancel: &CancellationToken) -> StoreResult<Vec<Item>> {
        ensure_not_cancelled(cancel)?;
        let (pk_column, sk_column) = match query.target {
            QueryTarget::Table => ("pk", "sk"),
            QueryTarget::Index(IndexName::ByCollection) => ("gsi1pk", "gsi1sk"),
            QueryTarget::Index(IndexName::ByParticipant) => ("gsi2pk", "gsi2sk"),
            QueryTarget::Index(IndexName::BySession) => ("gsi3pk", "gsi3sk"),
        };

        let mut sql = format!(
            "SELECT attributes FROM {} WHERE {pk_column} = ?",
            self.collection.table()
        );
        let mut bind_values: Vec<Value> = vec![Value::Text(query.partition.clone())];

        match &query.sort {
            SortCondition::Any => {}
            SortCondition::BeginsWith(prefix) => {
                sql.push_str(&format!(" AND substr({sk_column}, 1, length(?)) = ?"));
                bind_values.push(Value::Text(prefix.clone()));
                bind_values.push(Value::Text(prefix.clone()));
            }
            SortCondition::After(bound) => {
                sql.push_str(&format!(" AND {sk_column} > ?"));
                bind_values.push(Value::Text(bound.clone()));
            }
        }

        let direction = if query.descending { "DESC" } else { "ASC" };
        sql.push_str(&format!(
            " ORDER BY {sk_column} {direction}, pk {direction}, sk {direction}"
        ));

        if let Some(limit) = query.limit {
            sql.push_str(" LIMIT ?");
            bind_values.push(Value::Integer(i64::from(limit)));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            if cancel.is_cancelled() {
                return Err(StoreError::Cancelled);
            }
            let text: String = row.get(0)?;
            let mut item = parse_attributes(&text)?;
            if let Some(projection) = &query.projection {
                item.retain(|name, _| projection.iter().any(|wanted| wanted == name));
            }
            items.push(item);
        }

        Ok(items)
    }
}

fn ensure_not_cancelled(cancel: &CancellationToken) -> StoreResult<()> {
    if cancel.is_cancelled() {
        return Err(StoreError::Cancelled);
    }
    Ok(())
}

fn index_pair(partition: Option<String>, sort: Option<String>) -> Option<(String, String)> {
    match (partition, sort) {
        (Some(partition), Some(sort)) => Some((partition, sort)),
        _ => None,
    }
}

fn index_slot(index: IndexName) -> usize {
    match index {
        IndexName::ByCollection => 0,
        IndexName::ByParticipant => 1,
        IndexName::BySession => 2,
    }
}

fn apply_index_keys(row: &mut StoredRow, keys: &[IndexKey]) {
    for key in keys {
        row.indexes[index_slot(key.index)] = Some((key.partition.clone(), key.sort.clone()));
    }
}

fn parse_attributes(text: &str) -> StoreResult<Item> {
    serde_json::from_str(text)
        .map_err(|err| StoreError::InvalidData(format!("attribute map is not valid: {err}")))
}

#[cfg(test)]
mod tests {
    use super::{classify_sqlite_error, Collection, SqliteDocumentStore};
    use crate::codec::{AttributeValue, Item};
    use crate::context::CancellationToken;
    use crate::db::open_db_in_memory;
    use crate::keyspace::{IndexKey, IndexName, PrimaryKey};
    use crate::repo::document_store::{
        Condition, DocumentStore, ItemUpdate, ItemWrite, Query, ReadConsistency, StoreError,
    };

    fn write(pk: &str, sk: &str, name: &str) -> ItemWrite {
        let mut attributes = Item::new();
        attributes.insert("name".to_string(), AttributeValue::string(name));
        ItemWrite {
            key: PrimaryKey::new(pk, sk),
            index_keys: Vec::new(),
            attributes,
        }
    }

    #[test]
    fn busy_and_locked_are_unavailable() {
        let busy = rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(5), None);
        assert!(matches!(classify_sqlite_error(busy), StoreError::Unavailable(_)));
        let locked = rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(6), None);
        assert!(matches!(classify_sqlite_error(locked), StoreError::Unavailable(_)));
        let other = rusqlite::Error::InvalidQuery;
        assert!(matches!(classify_sqlite_error(other), StoreError::Backend(_)));
    }

    #[test]
    fn conditional_put_rejects_existing_item() {
        let conn = open_db_in_memory().unwrap();
        let store = SqliteDocumentStore::study_items(&conn).unwrap();
        let cancel = CancellationToken::new();

        store
            .put(&write("A", "METADATA", "first"), Some(&Condition::NotExists), &cancel)
            .unwrap();
        let err = store
            .put(&write("A", "METADATA", "second"), Some(&Condition::NotExists), &cancel)
            .unwrap_err();
        assert!(matches!(err, StoreError::ConditionFailed(_)));

        let stored = store
            .get(&PrimaryKey::new("A", "METADATA"), ReadConsistency::Strong, &cancel)
            .unwrap()
            .unwrap();
        assert_eq!(stored["name"], AttributeValue::string("first"));
    }

    #[test]
    fn update_keeps_untouched_attributes_and_index_entries() {
        let conn = open_db_in_memory().unwrap();
        let store = SqliteDocumentStore::study_items(&conn).unwrap();
        let cancel = CancellationToken::new();
        let mut initial = write("A", "METADATA", "first");
        initial.attributes.insert("kept".to_string(), AttributeValue::Bool(true));
        initial
            .index_keys
            .push(IndexKey::new(IndexName::ByCollection, "ALL", "2026"));
        store.put(&initial, None, &cancel).unwrap();

        let updated = store
            .update(
                &ItemUpdate::new(PrimaryKey::new("A", "METADATA"))
                    .set("name", AttributeValue::string("renamed"))
                    .when(Condition::Exists),
                &cancel,
            )
            .unwrap();
        assert_eq!(updated["name"], AttributeValue::string("renamed"));
        assert_eq!(updated["kept"], AttributeValue::Bool(true));

        let listed = store
            .query(&Query::index(IndexName::ByCollection, "ALL"), &cancel)
            .unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[test]
    fn query_orders_and_filters_by_sort_prefix() {
        let conn = open_db_in_memory().unwrap();
        let store = SqliteDocumentStore::study_items(&conn).unwrap();
        let cancel = CancellationToken::new();
        for (sk, name) in [("MEMBER#b", "b"), ("MEMBER#a", "a"), ("METADATA", "root")] {
            store.put(&write("E", sk, name), None, &cancel).unwrap();
        }

        let members = store
            .query(&Query::partition("E").begins_with("MEMBER#"), &cancel)
            .unwrap();
        let names: Vec<_> = members
            .iter()
            .map(|item| item["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a", "b"]);

        let newest = store
            .query(&Query::partition("E").newest_first().limit(1).project(&["name"]), &cancel)
            .unwrap();
        assert_eq!(newest.len(), 1);
        assert_eq!(newest[0]["name"], AttributeValue::string("root"));
    }

    #[test]
    fn cancelled_token_prevents_write() {
        let conn = open_db_in_memory().unwrap();
        let store = SqliteDocumentStore::try_new(&conn, Collection::Questionnaires).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = store.put(&write("Q", "CONFIG", "x"), None, &cancel).unwrap_err();
        assert_eq!(err, StoreError::Cancelled);

        let live = CancellationToken::new();
        assert!(store
            .get(&PrimaryKey::new("Q", "CONFIG"), ReadConsistency::Strong, &live)
            .unwrap()
            .is_none());
    }

    #[test]
    fn conditional_delete_requires_existing_item() {
        let conn = open_db_in_memory().unwrap();
        let store = SqliteDocumentStore::study_items(&conn).unwrap();
        let cancel = CancellationToken::new();
        let key = PrimaryKey::new("E", "MEMBER#x");

        let err = store.delete(&key, Some(&Condition::Exists), &cancel).unwrap_err();
        assert!(matches!(err, StoreError::ConditionFailed(_)));
        store.delete(&key, None, &cancel).unwrap();
    }
}
