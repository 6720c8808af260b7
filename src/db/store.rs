use std::cmp::Ordering;

use async_trait::async_trait;
use bson::{oid::ObjectId, Bson, Document};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

pub mod collections {
    pub const TOURS: &str = "tours";
    pub const BOOKINGS: &str = "bookings";
    pub const USERS: &str = "users";
    pub const SLOTS: &str = "available_slots";
    pub const REVIEWS: &str = "reviews";
    pub const ACCOUNTS: &str = "accounts";
    pub const PASSWORD_RESETS: &str = "password_resets";
}

pub const ID_FIELD: &str = "_id";
/// Stamped by the store on insert.
pub const CREATED_AT: &str = "createdAt";
/// Stamped by the store on every write.
pub const UPDATED_AT: &str = "updatedAt";

/// Server codes that mean the planner could not find the index a compound
/// query needs: IndexNotFound, IndexBuildAborted, NoQueryExecutionPlans.
const INDEX_ERROR_CODES: &[i32] = &[27, 276, 291];
/// BadValue. Only an index problem when the message is about the hint.
const BAD_VALUE: i32 = 2;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    #[error("index not ready: {0}")]
    IndexNotReady(String),
    #[error("document {collection}/{id} not found")]
    NotFound { collection: String, id: String },
    #[error("precondition failed on {collection}/{id}: {reason}")]
    Precondition {
        collection: String,
        id: String,
        reason: String,
    },
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_index_not_ready(&self) -> bool {
        matches!(self, StoreError::IndexNotReady(_))
    }
}

impl From<bson::ser::Error> for StoreError {
    fn from(err: bson::ser::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<bson::de::Error> for StoreError {
    fn from(err: bson::de::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Sorts a failed read into "the index is missing or still building" versus
/// everything else.
pub fn classify_read_failure(code: Option<i32>, message: &str) -> StoreError {
    let lowered = message.to_lowercase();
    let bad_hint = code == Some(BAD_VALUE) && (lowered.contains("hint") || lowered.contains("index"));
    let code_matches = bad_hint || code.map_or(false, |code| INDEX_ERROR_CODES.contains(&code));
    let message_matches = lowered.contains("index")
        && (lowered.contains("building")
            || lowered.contains("not ready")
            || lowered.contains("requires an index")
            || lowered.contains("hint"));

    if code_matches || message_matches {
        StoreError::IndexNotReady(message.to_string())
    } else {
        StoreError::Backend(message.to_string())
    }
}

pub fn new_id() -> String {
    ObjectId::new().to_hex()
}

pub fn to_document<T: Serialize>(value: &T) -> Result<Document, StoreError> {
    Ok(bson::to_document(value)?)
}

pub fn from_document<T: DeserializeOwned>(document: Document) -> Result<T, StoreError> {
    Ok(bson::from_document(document)?)
}

pub fn from_documents<T: DeserializeOwned>(documents: Vec<Document>) -> Result<Vec<T>, StoreError> {
    documents.into_iter().map(from_document).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterOp {
    Eq,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl FilterOp {
    pub fn is_equality(self) -> bool {
        self == FilterOp::Eq
    }

    pub fn operator(self) -> &'static str {
        match self {
            FilterOp::Eq => "$eq",
            FilterOp::Lt => "$lt",
            FilterOp::Lte => "$lte",
            FilterOp::Gt => "$gt",
            FilterOp::Gte => "$gte",
        }
    }

    fn accepts(self, ordering: Ordering) -> bool {
        match self {
            FilterOp::Eq => ordering == Ordering::Equal,
            FilterOp::Lt => ordering == Ordering::Less,
            FilterOp::Lte => ordering != Ordering::Greater,
            FilterOp::Gt => ordering == Ordering::Greater,
            FilterOp::Gte => ordering != Ordering::Less,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Bson,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub fn as_i32(self) -> i32 {
        match self {
            Direction::Asc => 1,
            Direction::Desc => -1,
        }
    }
}

/// Composite index a query needs before the store will plan it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexKey {
    pub collection: String,
    pub fields: Vec<(String, Direction)>,
}

impl IndexKey {
    pub fn to_document(&self) -> Document {
        let mut keys = Document::new();
        for (field, direction) in &self.fields {
            keys.insert(field.clone(), direction.as_i32());
        }
        keys
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: &'static str,
    pub filters: Vec<Filter>,
    pub order_by: Vec<(String, Direction)>,
    pub limit: Option<usize>,
    /// Keyset cursor: the values of `order_by` fields of the last document seen.
    pub start_after: Option<Vec<Bson>>,
}

impl Query {
    pub fn collection(collection: &'static str) -> Self {
        Self {
            collection,
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            start_after: None,
        }
    }

    fn with_filter(mut self, field: &str, op: FilterOp, value: impl Into<Bson>) -> Self {
        self.filters.push(Filter {
            field: field.to_string(),
            op,
            value: value.into(),
        });
        self
    }

    pub fn where_eq(self, field: &str, value: impl Into<Bson>) -> Self {
        self.with_filter(field, FilterOp::Eq, value)
    }

    pub fn where_lt(self, field: &str, value: impl Into<Bson>) -> Self {
        self.with_filter(field, FilterOp::Lt, value)
    }

    pub fn where_lte(self, field: &str, value: impl Into<Bson>) -> Self {
        self.with_filter(field, FilterOp::Lte, value)
    }

    pub fn where_gt(self, field: &str, value: impl Into<Bson>) -> Self {
        self.with_filter(field, FilterOp::Gt, value)
    }

    pub fn where_gte(self, field: &str, value: impl Into<Bson>) -> Self {
        self.with_filter(field, FilterOp::Gte, value)
    }

    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order_by.push((field.to_string(), direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn start_after(mut self, values: Vec<Bson>) -> Self {
        self.start_after = Some(values);
        self
    }

    /// The composite index this query needs, if any. Queries touching a
    /// single field, or made only of equality filters, are served by the
    /// automatic single-field indexes. Fields follow equality, sort, range.
    pub fn index_key(&self) -> Option<IndexKey> {
        let only_equality = self.filters.iter().all(|filter| filter.op.is_equality());
        if self.order_by.is_empty() && only_equality {
            return None;
        }

        let mut fields: Vec<(String, Direction)> = Vec::new();
        let mut push = |field: &str, direction: Direction| {
            if !fields.iter().any(|(existing, _)| existing == field) {
                fields.push((field.to_string(), direction));
            }
        };
        for filter in self.filters.iter().filter(|f| f.op.is_equality()) {
            push(&filter.field, Direction::Asc);
        }
        for (field, direction) in &self.order_by {
            push(field, *direction);
        }
        for filter in self.filters.iter().filter(|f| !f.op.is_equality()) {
            push(&filter.field, Direction::Asc);
        }

        if fields.len() <= 1 {
            return None;
        }
        Some(IndexKey {
            collection: self.collection.to_string(),
            fields,
        })
    }

    pub fn matches(&self, document: &Document) -> bool {
        self.filters.iter().all(|filter| {
            let value = lookup(document, &filter.field).unwrap_or(&Bson::Null);
            compare_values(value, &filter.value).map_or(false, |ordering| filter.op.accepts(ordering))
        })
    }

    /// Runs this query over documents already in memory: filters, ordering,
    /// cursor and limit, the same way a store would.
    pub fn evaluate(&self, documents: Vec<Document>) -> Vec<Document> {
        let mut matched: Vec<Document> = documents
            .into_iter()
            .filter(|document| self.matches(document))
            .collect();

        matched.sort_by(|a, b| self.compare_documents(a, b));

        if let Some(cursor) = &self.start_after {
            matched.retain(|document| self.compare_to_cursor(document, cursor) == Ordering::Greater);
        }
        if let Some(limit) = self.limit {
            matched.truncate(limit);
        }
        matched
    }

    fn compare_documents(&self, a: &Document, b: &Document) -> Ordering {
        for (field, direction) in &self.order_by {
            let left = lookup(a, field).unwrap_or(&Bson::Null);
            let right = lookup(b, field).unwrap_or(&Bson::Null);
            let ordering = sort_order(left, right);
            let ordering = match direction {
                Direction::Asc => ordering,
                Direction::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }

    fn compare_to_cursor(&self, document: &Document, cursor: &[Bson]) -> Ordering {
        for ((field, direction), cursor_value) in self.order_by.iter().zip(cursor) {
            let value = lookup(document, field).unwrap_or(&Bson::Null);
            let ordering = sort_order(value, cursor_value);
            let ordering = match direction {
                Direction::Asc => ordering,
                Direction::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

/// Reads a possibly dotted path (`preferences.maxPrice`).
pub fn lookup<'a>(document: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut parts = path.split('.');
    let first = parts.next()?;
    let mut current = document.get(first)?;
    for part in parts {
        current = current.as_document()?.get(part)?;
    }
    Some(current)
}

fn as_number(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(v) => Some(f64::from(*v)),
        Bson::Int64(v) => Some(*v as f64),
        Bson::Double(v) => Some(*v),
        _ => None,
    }
}

/// Comparison used by filters: values of different types never match.
pub fn compare_values(left: &Bson, right: &Bson) -> Option<Ordering> {
    if let (Some(l), Some(r)) = (as_number(left), as_number(right)) {
        return l.partial_cmp(&r);
    }
    match (left, right) {
        (Bson::String(l), Bson::String(r)) => Some(l.cmp(r)),
        (Bson::Boolean(l), Bson::Boolean(r)) => Some(l.cmp(r)),
        (Bson::DateTime(l), Bson::DateTime(r)) => Some(l.cmp(r)),
        (Bson::Null, Bson::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

fn type_rank(value: &Bson) -> u8 {
    match value {
        Bson::Null | Bson::Undefined => 0,
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) => 1,
        Bson::String(_) => 2,
        Bson::Document(_) => 3,
        Bson::Array(_) => 4,
        Bson::ObjectId(_) => 5,
        Bson::Boolean(_) => 6,
        Bson::DateTime(_) => 7,
        _ => 8,
    }
}

/// Total order used for sorting, ranking mismatched types the way MongoDB does.
fn sort_order(left: &Bson, right: &Bson) -> Ordering {
    compare_values(left, right).unwrap_or_else(|| type_rank(left).cmp(&type_rank(right)))
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Insert {
        collection: &'static str,
        id: String,
        document: Document,
    },
    Set {
        collection: &'static str,
        id: String,
        fields: Document,
    },
    /// Subtracts `amount` from a numeric field; fails unless the current
    /// value is at least `amount`.
    Decrement {
        collection: &'static str,
        id: String,
        field: String,
        amount: i64,
    },
    /// Pushes onto an array field, creating the document from `defaults`
    /// when it does not exist yet.
    Append {
        collection: &'static str,
        id: String,
        field: String,
        value: Bson,
        defaults: Document,
    },
}

/// Writes committed all together or not at all.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, collection: &'static str, id: &str, document: Document) -> &mut Self {
        self.ops.push(WriteOp::Insert {
            collection,
            id: id.to_string(),
            document,
        });
        self
    }

    pub fn set(&mut self, collection: &'static str, id: &str, fields: Document) -> &mut Self {
        self.ops.push(WriteOp::Set {
            collection,
            id: id.to_string(),
            fields,
        });
        self
    }

    pub fn decrement(&mut self, collection: &'static str, id: &str, field: &str, amount: i64) -> &mut Self {
        self.ops.push(WriteOp::Decrement {
            collection,
            id: id.to_string(),
            field: field.to_string(),
            amount,
        });
        self
    }

    pub fn append(
        &mut self,
        collection: &'static str,
        id: &str,
        field: &str,
        value: impl Into<Bson>,
        defaults: Document,
    ) -> &mut Self {
        self.ops.push(WriteOp::Append {
            collection,
            id: id.to_string(),
            field: field.to_string(),
            value: value.into(),
            defaults,
        });
        self
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError>;

    async fn get(&self, collection: &'static str, id: &str) -> Result<Option<Document>, StoreError>;

    async fn insert(&self, collection: &'static str, id: &str, document: Document) -> Result<(), StoreError>;

    /// Sets (possibly dotted) fields; `NotFound` when the document is missing.
    async fn update(&self, collection: &'static str, id: &str, fields: Document) -> Result<(), StoreError>;

    async fn delete(&self, collection: &'static str, id: &str) -> Result<bool, StoreError>;

    async fn count(&self, collection: &'static str) -> Result<u64, StoreError>;

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError>;

    async fn ensure_indexes(&self, keys: &[IndexKey]) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn tours() -> Vec<Document> {
        vec![
            doc! { "_id": "a", "company": "Apple", "rating": 4.9, "popular": true, "price": 89.0 },
            doc! { "_id": "b", "company": "Meta", "rating": 4.7, "popular": false, "price": 69.0 },
            doc! { "_id": "c", "company": "Tesla", "rating": 4.8, "popular": true, "price": 99.0 },
            doc! { "_id": "d", "company": "Stanford", "rating": 4.7, "popular": false, "price": 65 },
        ]
    }

    fn ids(documents: &[Document]) -> Vec<&str> {
        documents
            .iter()
            .map(|d| d.get_str("_id").unwrap())
            .collect()
    }

    #[test]
    fn test_evaluate_filters_and_orders() {
        let query = Query::collection(collections::TOURS)
            .where_lte("price", 90.0)
            .order_by("popular", Direction::Desc)
            .order_by("rating", Direction::Desc);

        let result = query.evaluate(tours());
        assert_eq!(ids(&result), vec!["a", "b", "d"]);
    }

    #[test]
    fn test_numeric_types_compare_across_widths() {
        let query = Query::collection(collections::TOURS).where_lt("price", 66_i32);
        assert_eq!(ids(&query.evaluate(tours())), vec!["d"]);
    }

    #[test]
    fn test_mismatched_types_never_match() {
        let query = Query::collection(collections::TOURS).where_eq("rating", "4.9");
        assert!(query.evaluate(tours()).is_empty());
    }

    #[test]
    fn test_keyset_cursor_and_limit() {
        let base = Query::collection(collections::TOURS)
            .order_by("rating", Direction::Desc)
            .order_by("_id", Direction::Asc)
            .limit(2);

        let first = base.clone().evaluate(tours());
        assert_eq!(ids(&first), vec!["a", "c"]);

        let second = base
            .start_after(vec![Bson::Double(4.8), Bson::String("c".into())])
            .evaluate(tours());
        assert_eq!(ids(&second), vec!["b", "d"]);
    }

    #[test]
    fn test_index_key_rules() {
        let single = Query::collection(collections::TOURS).where_eq("active", true);
        assert_eq!(single.index_key(), None);

        let equality_only = Query::collection(collections::BOOKINGS)
            .where_eq("userId", "u1")
            .where_eq("status", "confirmed");
        assert_eq!(equality_only.index_key(), None);

        let sorted_on_own_field = Query::collection(collections::TOURS).order_by("rating", Direction::Desc);
        assert_eq!(sorted_on_own_field.index_key(), None);

        let compound = Query::collection(collections::SLOTS)
            .where_eq("tourId", "t1")
            .where_gte("date", "2026-01-01")
            .where_gt("availableSpots", 0)
            .order_by("date", Direction::Asc)
            .order_by("time", Direction::Asc);
        let key = compound.index_key().expect("compound query needs an index");
        let fields: Vec<&str> = key.fields.iter().map(|(f, _)| f.as_str()).collect();
        assert_eq!(fields, vec!["tourId", "date", "time", "availableSpots"]);
    }

    #[test]
    fn test_dotted_lookup() {
        let document = doc! { "preferences": { "maxPrice": 120.0 } };
        assert_eq!(lookup(&document, "preferences.maxPrice"), Some(&Bson::Double(120.0)));
        assert_eq!(lookup(&document, "preferences.missing"), None);
    }

    #[test]
    fn test_classify_read_failure() {
        assert!(classify_read_failure(Some(291), "No query solutions").is_index_not_ready());
        assert!(classify_read_failure(
            None,
            "The query requires an index. That index is currently building"
        )
        .is_index_not_ready());
        assert!(classify_read_failure(Some(2), "error processing query: planner returned error :: caused by :: hint provided does not correspond to an existing index")
            .is_index_not_ready());
        assert_eq!(
            classify_read_failure(Some(2), "unknown operator: $regexx"),
            StoreError::Backend("unknown operator: $regexx".to_string())
        );
        assert_eq!(
            classify_read_failure(Some(11600), "interrupted at shutdown"),
            StoreError::Backend("interrupted at shutdown".to_string())
        );
    }
}
