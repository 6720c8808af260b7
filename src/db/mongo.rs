use async_trait::async_trait;
use bson::{doc, Bson, Document};
use chrono::Utc;
use futures::TryStreamExt;
use log::{info, warn};
use mongodb::{
    error::{Error as MongoError, ErrorKind},
    options::{ClientOptions, Hint, ServerApi, ServerApiVersion},
    Client, ClientSession, Collection, IndexModel,
};
use std::sync::Arc;
use std::time::Duration;

use crate::db::store::{
    classify_read_failure, Direction, DocumentStore, FilterOp, IndexKey, Query, StoreError,
    WriteBatch, WriteOp, CREATED_AT, ID_FIELD, UPDATED_AT,
};

pub async fn create_mongo_client(uri: &str) -> Result<Arc<Client>, StoreError> {
    info!("Connecting to MongoDB");

    let mut client_options = ClientOptions::parse(uri)
        .await
        .map_err(|e| StoreError::Backend(format!("MongoDB URI may be incorrect: {}", e)))?;

    client_options.connect_timeout = Some(Duration::from_secs(10));
    client_options.server_selection_timeout = Some(Duration::from_secs(10));
    client_options.max_pool_size = Some(10);
    client_options.min_pool_size = Some(1);

    let server_api = ServerApi::builder().version(ServerApiVersion::V1).build();
    client_options.server_api = Some(server_api);

    let client = Client::with_options(client_options)
        .map_err(|e| StoreError::Backend(format!("Failed to create MongoDB client: {}", e)))?;

    match client
        .database("admin")
        .run_command(doc! {"ping": 1})
        .await
    {
        Ok(_) => info!("Successfully connected to MongoDB and verified with ping command"),
        Err(e) => {
            warn!("Connected to MongoDB but ping test failed: {}", e);
            warn!("The API may still work, but some functionality might be impaired");
        }
    }

    Ok(Arc::new(client))
}

fn command_code(err: &MongoError) -> Option<i32> {
    match err.kind.as_ref() {
        ErrorKind::Command(command_error) => Some(command_error.code),
        _ => None,
    }
}

fn read_error(err: MongoError) -> StoreError {
    classify_read_failure(command_code(&err), &err.to_string())
}

fn write_error(err: MongoError) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn filter_document(query: &Query) -> Document {
    let mut filter = Document::new();
    for condition in &query.filters {
        if !matches!(filter.get(&condition.field), Some(Bson::Document(_))) {
            filter.insert(condition.field.clone(), Document::new());
        }
        if let Ok(operators) = filter.get_document_mut(&condition.field) {
            operators.insert(condition.op.operator(), condition.value.clone());
        }
    }

    let Some(cursor) = &query.start_after else {
        return filter;
    };

    // Keyset pagination: (a > x) or (a = x and b > y) or ...
    let mut clauses = Vec::new();
    for (position, ((field, direction), value)) in query.order_by.iter().zip(cursor).enumerate() {
        let mut clause = Document::new();
        for ((previous, _), previous_value) in query.order_by.iter().zip(cursor).take(position) {
            clause.insert(previous.clone(), doc! { "$eq": previous_value.clone() });
        }
        let op = match direction {
            Direction::Asc => FilterOp::Gt,
            Direction::Desc => FilterOp::Lt,
        };
        clause.insert(field.clone(), doc! { op.operator(): value.clone() });
        clauses.push(Bson::Document(clause));
    }

    doc! { "$and": [filter, { "$or": clauses }] }
}

fn sort_document(query: &Query) -> Document {
    let mut sort = Document::new();
    for (field, direction) in &query.order_by {
        sort.insert(field.clone(), direction.as_i32());
    }
    sort
}

/// Upsert that appends `value` to `field`. The appended field is left out of
/// `$setOnInsert`: the server rejects two operators on one path, and `$push`
/// creates the array on insert anyway.
fn append_update(field: &str, value: &Bson, defaults: &Document, now: i64) -> Document {
    let mut push = Document::new();
    push.insert(field, value.clone());
    let mut on_insert = defaults.clone();
    on_insert.remove(field);
    on_insert.remove(UPDATED_AT);
    on_insert.insert(CREATED_AT, now);
    doc! {
        "$push": push,
        "$set": { UPDATED_AT: now },
        "$setOnInsert": on_insert,
    }
}

/// MongoDB-backed store. With `require_indexes`, compound queries are hinted
/// at their composite index so a missing index fails fast instead of falling
/// back to a collection scan.
pub struct MongoStore {
    client: Arc<Client>,
    database: String,
    require_indexes: bool,
}

impl MongoStore {
    pub fn new(client: Arc<Client>, database: impl Into<String>, require_indexes: bool) -> Self {
        Self {
            client,
            database: database.into(),
            require_indexes,
        }
    }

    fn collection(&self, name: &str) -> Collection<Document> {
        self.client.database(&self.database).collection(name)
    }

    async fn apply(&self, session: &mut ClientSession, op: &WriteOp) -> Result<(), StoreError> {
        let now = Utc::now().timestamp_millis();
        match op {
            WriteOp::Insert {
                collection,
                id,
                document,
            } => {
                let mut document = document.clone();
                document.insert(ID_FIELD, id.clone());
                document.insert(CREATED_AT, now);
                document.insert(UPDATED_AT, now);
                self.collection(collection)
                    .insert_one(document)
                    .session(&mut *session)
                    .await
                    .map_err(write_error)?;
            }
            WriteOp::Set {
                collection,
                id,
                fields,
            } => {
                let mut fields = fields.clone();
                fields.insert(UPDATED_AT, now);
                let result = self
                    .collection(collection)
                    .update_one(doc! { ID_FIELD: id.clone() }, doc! { "$set": fields })
                    .session(&mut *session)
                    .await
                    .map_err(write_error)?;
                if result.matched_count == 0 {
                    return Err(StoreError::NotFound {
                        collection: collection.to_string(),
                        id: id.clone(),
                    });
                }
            }
            WriteOp::Decrement {
                collection,
                id,
                field,
                amount,
            } => {
                let mut filter = doc! { ID_FIELD: id.clone() };
                filter.insert(field.clone(), doc! { "$gte": *amount });
                let mut decrement = Document::new();
                decrement.insert(field.clone(), -*amount);

                let result = self
                    .collection(collection)
                    .update_one(filter, doc! { "$inc": decrement, "$set": { UPDATED_AT: now } })
                    .session(&mut *session)
                    .await
                    .map_err(write_error)?;
                if result.matched_count == 0 {
                    return Err(StoreError::Precondition {
                        collection: collection.to_string(),
                        id: id.clone(),
                        reason: format!("{} is missing or below {}", field, amount),
                    });
                }
            }
            WriteOp::Append {
                collection,
                id,
                field,
                value,
                defaults,
            } => {
                self.collection(collection)
                    .update_one(doc! { ID_FIELD: id.clone() }, append_update(field, value, defaults, now))
                    .upsert(true)
                    .session(&mut *session)
                    .await
                    .map_err(write_error)?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MongoStore {
    async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        let collection = self.collection(query.collection);
        let mut find = collection.find(filter_document(query));
        if !query.order_by.is_empty() {
            find = find.sort(sort_document(query));
        }
        if let Some(limit) = query.limit {
            find = find.limit(limit as i64);
        }
        if self.require_indexes {
            if let Some(key) = query.index_key() {
                find = find.hint(Hint::Keys(key.to_document()));
            }
        }

        let cursor = find.await.map_err(read_error)?;
        cursor.try_collect::<Vec<Document>>().await.map_err(read_error)
    }

    async fn get(&self, collection: &'static str, id: &str) -> Result<Option<Document>, StoreError> {
        self.collection(collection)
            .find_one(doc! { ID_FIELD: id })
            .await
            .map_err(read_error)
    }

    async fn insert(&self, collection: &'static str, id: &str, document: Document) -> Result<(), StoreError> {
        let now = Utc::now().timestamp_millis();
        let mut document = document;
        document.insert(ID_FIELD, id);
        document.insert(CREATED_AT, now);
        document.insert(UPDATED_AT, now);
        self.collection(collection)
            .insert_one(document)
            .await
            .map_err(write_error)?;
        Ok(())
    }

    async fn update(&self, collection: &'static str, id: &str, fields: Document) -> Result<(), StoreError> {
        let mut fields = fields;
        fields.insert(UPDATED_AT, Utc::now().timestamp_millis());
        let result = self
            .collection(collection)
            .update_one(doc! { ID_FIELD: id }, doc! { "$set": fields })
            .await
            .map_err(write_error)?;
        if result.matched_count == 0 {
            return Err(StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn delete(&self, collection: &'static str, id: &str) -> Result<bool, StoreError> {
        let result = self
            .collection(collection)
            .delete_one(doc! { ID_FIELD: id })
            .await
            .map_err(write_error)?;
        Ok(result.deleted_count > 0)
    }

    async fn count(&self, collection: &'static str) -> Result<u64, StoreError> {
        self.collection(collection)
            .count_documents(doc! {})
            .await
            .map_err(read_error)
    }

    /// Runs the batch inside a multi-document transaction (requires a
    /// replica set or sharded cluster).
    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut session = self.client.start_session().await.map_err(write_error)?;
        session.start_transaction().await.map_err(write_error)?;

        for op in batch.ops() {
            if let Err(err) = self.apply(&mut session, op).await {
                if let Err(abort_err) = session.abort_transaction().await {
                    warn!("Failed to abort transaction: {}", abort_err);
                }
                return Err(err);
            }
        }

        session.commit_transaction().await.map_err(write_error)
    }

    async fn ensure_indexes(&self, keys: &[IndexKey]) -> Result<(), StoreError> {
        for key in keys {
            info!("Ensuring index on {}: {:?}", key.collection, key.fields);
            self.collection(&key.collection)
                .create_index(IndexModel::builder().keys(key.to_document()).build())
                .await
                .map_err(write_error)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::store::collections;

    #[test]
    fn test_filter_document_merges_operators_per_field() {
        let query = Query::collection(collections::SLOTS)
            .where_eq("tourId", "t1")
            .where_gte("date", "2026-11-01")
            .where_lte("date", "2026-11-30");

        assert_eq!(
            filter_document(&query),
            doc! {
                "tourId": { "$eq": "t1" },
                "date": { "$gte": "2026-11-01", "$lte": "2026-11-30" },
            }
        );
    }

    #[test]
    fn test_filter_document_with_cursor() {
        let query = Query::collection(collections::TOURS)
            .where_eq("active", true)
            .order_by("rating", Direction::Desc)
            .order_by("_id", Direction::Asc)
            .start_after(vec![Bson::Double(4.8), Bson::String("t3".into())]);

        assert_eq!(
            filter_document(&query),
            doc! {
                "$and": [
                    { "active": { "$eq": true } },
                    { "$or": [
                        { "rating": { "$lt": 4.8 } },
                        { "rating": { "$eq": 4.8 }, "_id": { "$gt": "t3" } },
                    ] },
                ]
            }
        );
    }

    #[test]
    fn test_append_update_keeps_operators_on_separate_paths() {
        let defaults = doc! {
            "email": "ada@example.com",
            "firstName": "Ada",
            "bookingHistory": [],
        };
        let update = append_update("bookingHistory", &Bson::String("b1".into()), &defaults, 42);

        let push = update.get_document("$push").unwrap();
        let set = update.get_document("$set").unwrap();
        let on_insert = update.get_document("$setOnInsert").unwrap();
        for key in push.keys().chain(set.keys()) {
            assert!(!on_insert.contains_key(key), "{} is written by two operators", key);
        }
        assert_eq!(push, &doc! { "bookingHistory": "b1" });
        assert_eq!(on_insert.get_str("email").unwrap(), "ada@example.com");
        assert_eq!(on_insert.get_i64(CREATED_AT).unwrap(), 42);
    }

    #[test]
    fn test_sort_document() {
        let query = Query::collection(collections::BOOKINGS).order_by("createdAt", Direction::Desc);
        assert_eq!(sort_document(&query), doc! { "createdAt": -1 });
    }
}
