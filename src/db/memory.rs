use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use bson::{Bson, Document};
use chrono::Utc;
use log::debug;
use parking_lot::Mutex;

use crate::db::store::{
    DocumentStore, IndexKey, Query, StoreError, WriteBatch, WriteOp, CREATED_AT, ID_FIELD,
    UPDATED_AT,
};

type Collections = HashMap<String, BTreeMap<String, Document>>;

#[derive(Default)]
struct MemoryState {
    collections: Collections,
    enforce_indexes: bool,
    ready_indexes: HashSet<IndexKey>,
    failing_collections: HashSet<String>,
    fail_batch_after: Option<usize>,
    clock: i64,
}

impl MemoryState {
    /// Millisecond clock that never repeats, so `createdAt` orders writes.
    fn tick(&mut self) -> i64 {
        let now = Utc::now().timestamp_millis();
        self.clock = now.max(self.clock + 1);
        self.clock
    }
}

/// In-process document store. Backs local development and the test suite, and
/// can mimic a hosted store whose composite indexes are still building.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compound queries fail with `IndexNotReady` until `ensure_indexes`
    /// has provisioned the matching key.
    pub fn with_index_enforcement() -> Self {
        let store = Self::new();
        store.set_index_enforcement(true);
        store
    }

    pub fn set_index_enforcement(&self, enforce: bool) {
        self.state.lock().enforce_indexes = enforce;
    }

    /// Every read on `collection` fails with a backend error.
    pub fn fail_queries_on(&self, collection: &str) {
        self.state.lock().failing_collections.insert(collection.to_string());
    }

    /// The next batch fails after applying `ops` of its writes.
    pub fn fail_next_batch_after(&self, ops: usize) {
        self.state.lock().fail_batch_after = Some(ops);
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.lock();
        state.failing_collections.clear();
        state.fail_batch_after = None;
    }

    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.state
            .lock()
            .collections
            .get(collection)
            .map(|documents| documents.values().cloned().collect())
            .unwrap_or_default()
    }

    fn check_readable(state: &MemoryState, collection: &str) -> Result<(), StoreError> {
        if state.failing_collections.contains(collection) {
            return Err(StoreError::Backend(format!(
                "simulated outage reading {}",
                collection
            )));
        }
        Ok(())
    }
}

fn set_path(document: &mut Document, path: &str, value: Bson) {
    match path.split_once('.') {
        None => {
            document.insert(path, value);
        }
        Some((head, rest)) => {
            if !matches!(document.get(head), Some(Bson::Document(_))) {
                document.insert(head, Document::new());
            }
            if let Some(Bson::Document(child)) = document.get_mut(head) {
                set_path(child, rest, value);
            }
        }
    }
}

fn not_found(collection: &str, id: &str) -> StoreError {
    StoreError::NotFound {
        collection: collection.to_string(),
        id: id.to_string(),
    }
}

fn numeric(value: Option<&Bson>) -> Option<i64> {
    match value? {
        Bson::Int32(v) => Some(i64::from(*v)),
        Bson::Int64(v) => Some(*v),
        Bson::Double(v) => Some(*v as i64),
        _ => None,
    }
}

fn apply(collections: &mut Collections, op: &WriteOp, now: i64) -> Result<(), StoreError> {
    match op {
        WriteOp::Insert {
            collection,
            id,
            document,
        } => {
            let documents = collections.entry(collection.to_string()).or_default();
            if documents.contains_key(id) {
                return Err(StoreError::Precondition {
                    collection: collection.to_string(),
                    id: id.clone(),
                    reason: "document already exists".to_string(),
                });
            }
            let mut document = document.clone();
            document.insert(ID_FIELD, id.clone());
            document.insert(CREATED_AT, now);
            document.insert(UPDATED_AT, now);
            documents.insert(id.clone(), document);
        }
        WriteOp::Set {
            collection,
            id,
            fields,
        } => {
            let document = collections
                .get_mut(*collection)
                .and_then(|documents| documents.get_mut(id))
                .ok_or_else(|| not_found(collection, id))?;
            for (path, value) in fields {
                set_path(document, path, value.clone());
            }
            document.insert(UPDATED_AT, now);
        }
        WriteOp::Decrement {
            collection,
            id,
            field,
            amount,
        } => {
            let document = collections
                .get_mut(*collection)
                .and_then(|documents| documents.get_mut(id))
                .ok_or_else(|| not_found(collection, id))?;
            let current = numeric(document.get(field.as_str())).unwrap_or(0);
            if current < *amount {
                return Err(StoreError::Precondition {
                    collection: collection.to_string(),
                    id: id.clone(),
                    reason: format!("{} is {}, cannot take {}", field, current, amount),
                });
            }
            let remaining = current - amount;
            if matches!(document.get(field.as_str()), Some(Bson::Int32(_))) {
                document.insert(field.clone(), remaining as i32);
            } else {
                document.insert(field.clone(), remaining);
            }
            document.insert(UPDATED_AT, now);
        }
        WriteOp::Append {
            collection,
            id,
            field,
            value,
            defaults,
        } => {
            let documents = collections.entry(collection.to_string()).or_default();
            let document = documents.entry(id.clone()).or_insert_with(|| {
                let mut created = defaults.clone();
                created.insert(ID_FIELD, id.clone());
                created.insert(CREATED_AT, now);
                created
            });
            let has_array = matches!(document.get(field.as_str()), Some(Bson::Array(_)));
            if !has_array {
                document.insert(field.clone(), Vec::<Bson>::new());
            }
            if let Some(Bson::Array(items)) = document.get_mut(field.as_str()) {
                items.push(value.clone());
            }
            document.insert(UPDATED_AT, now);
        }
    }
    Ok(())
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        let state = self.state.lock();
        Self::check_readable(&state, query.collection)?;

        if state.enforce_indexes {
            if let Some(key) = query.index_key() {
                if !state.ready_indexes.contains(&key) {
                    return Err(StoreError::IndexNotReady(format!(
                        "The query requires an index on {} {:?}. That index is currently building.",
                        key.collection, key.fields
                    )));
                }
            }
        }

        let documents = state
            .collections
            .get(query.collection)
            .map(|documents| documents.values().cloned().collect())
            .unwrap_or_default();
        Ok(query.evaluate(documents))
    }

    async fn get(&self, collection: &'static str, id: &str) -> Result<Option<Document>, StoreError> {
        let state = self.state.lock();
        Self::check_readable(&state, collection)?;
        Ok(state
            .collections
            .get(collection)
            .and_then(|documents| documents.get(id))
            .cloned())
    }

    async fn insert(&self, collection: &'static str, id: &str, document: Document) -> Result<(), StoreError> {
        let mut batch = WriteBatch::new();
        batch.insert(collection, id, document);
        self.commit(batch).await
    }

    async fn update(&self, collection: &'static str, id: &str, fields: Document) -> Result<(), StoreError> {
        let mut batch = WriteBatch::new();
        batch.set(collection, id, fields);
        self.commit(batch).await
    }

    async fn delete(&self, collection: &'static str, id: &str) -> Result<bool, StoreError> {
        let mut state = self.state.lock();
        Ok(state
            .collections
            .get_mut(collection)
            .map_or(false, |documents| documents.remove(id).is_some()))
    }

    async fn count(&self, collection: &'static str) -> Result<u64, StoreError> {
        let state = self.state.lock();
        Self::check_readable(&state, collection)?;
        Ok(state
            .collections
            .get(collection)
            .map_or(0, |documents| documents.len() as u64))
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        let now = state.tick();
        let fail_after = state.fail_batch_after.take();

        // Writes land in a staged copy that only replaces the live data once
        // every operation has succeeded.
        let mut staged = state.collections.clone();
        for (applied, op) in batch.ops().iter().enumerate() {
            if fail_after == Some(applied) {
                debug!("Simulated batch failure after {} writes", applied);
                return Err(StoreError::Backend("simulated batch failure".to_string()));
            }
            apply(&mut staged, op, now)?;
        }
        state.collections = staged;
        Ok(())
    }

    async fn ensure_indexes(&self, keys: &[IndexKey]) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        state.ready_indexes.extend(keys.iter().cloned());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::store::{collections, Direction};
    use bson::doc;

    #[actix_rt::test]
    async fn test_batch_is_all_or_nothing() {
        let store = MemoryStore::new();
        store
            .insert(collections::SLOTS, "s1", doc! { "availableSpots": 3 })
            .await
            .unwrap();

        let mut batch = WriteBatch::new();
        batch
            .insert(collections::BOOKINGS, "b1", doc! { "guestCount": 2 })
            .decrement(collections::SLOTS, "s1", "availableSpots", 5);

        let result = store.commit(batch).await;
        assert!(matches!(result, Err(StoreError::Precondition { .. })));
        assert!(store.documents(collections::BOOKINGS).is_empty());
        assert_eq!(
            store.documents(collections::SLOTS)[0].get_i32("availableSpots").unwrap(),
            3
        );
    }

    #[actix_rt::test]
    async fn test_append_creates_missing_document() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        batch.append(
            collections::USERS,
            "u1",
            "bookingHistory",
            "b1",
            doc! { "email": "guest@example.com" },
        );
        store.commit(batch).await.unwrap();

        let profile = store.get(collections::USERS, "u1").await.unwrap().unwrap();
        assert_eq!(profile.get_str("email").unwrap(), "guest@example.com");
        assert_eq!(profile.get_array("bookingHistory").unwrap().len(), 1);
        assert!(profile.contains_key(CREATED_AT));
    }

    #[actix_rt::test]
    async fn test_index_enforcement_until_provisioned() {
        let store = MemoryStore::with_index_enforcement();
        let query = Query::collection(collections::TOURS)
            .where_eq("active", true)
            .order_by("rating", Direction::Desc);

        let err = store.query(&query).await.unwrap_err();
        assert!(err.is_index_not_ready());

        let key = query.index_key().unwrap();
        store.ensure_indexes(&[key]).await.unwrap();
        assert!(store.query(&query).await.unwrap().is_empty());
    }

    #[actix_rt::test]
    async fn test_dotted_update() {
        let store = MemoryStore::new();
        store
            .insert(collections::USERS, "u1", doc! { "preferences": { "maxPrice": 50.0 } })
            .await
            .unwrap();
        store
            .update(collections::USERS, "u1", doc! { "preferences.favoriteCompanies": ["Apple"] })
            .await
            .unwrap();

        let profile = store.get(collections::USERS, "u1").await.unwrap().unwrap();
        let preferences = profile.get_document("preferences").unwrap();
        assert_eq!(preferences.get_f64("maxPrice").unwrap(), 50.0);
        assert_eq!(preferences.get_array("favoriteCompanies").unwrap().len(), 1);
    }
}
