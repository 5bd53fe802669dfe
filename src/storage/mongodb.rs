//! MongoDB storage backend using the official MongoDB async driver.
//!
//! # Feature flag
//!
//! This module is gated behind the `mongodb_backend` feature flag:
//! ```toml
//! [dependencies]
//! mongoke = { version = "0.1", features = ["mongodb_backend"] }
//! ```
//!
//! # Connection
//!
//! The database name is taken from the connection string
//! (`mongodb://host/<db>`); a string without one is rejected. The database
//! handle is created once, either eagerly through [`MongoStore::connect`] or
//! on first use.
//!
//! # Value mapping
//!
//! Filters are translated operator by operator (`eq` → `$eq`, `neq` → `$ne`,
//! ...). String values compared against `_id`, or against a field declared
//! `ID` in the schema (see [`MongoStore::with_id_fields`]), are sent as
//! `ObjectId` when they are valid 24 character hex ids. On the way back `ObjectId`s become
//! hex strings and dates become RFC 3339 strings.

use crate::core::error::StorageError;
use crate::core::filter::{Filter, Operator};
use crate::core::pagination::Sort;
use crate::core::schema::ID_FIELD;
use crate::core::store::{CONNECT_TIMEOUT, Deadline, Document, DocumentStore};
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{self, Bson, doc, oid::ObjectId};
use mongodb::options::ClientOptions;
use mongodb::{Client, Database};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::OnceCell;

const BACKEND: &str = "mongodb";

fn query_error(e: impl std::fmt::Display) -> StorageError {
    StorageError::QueryError {
        backend: BACKEND.to_string(),
        message: e.to_string(),
    }
}

fn connection_error(e: impl std::fmt::Display) -> StorageError {
    StorageError::ConnectionError {
        backend: BACKEND.to_string(),
        message: e.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Conversion helpers
// ---------------------------------------------------------------------------

fn mongo_operator(op: Operator) -> &'static str {
    match op {
        Operator::Eq => "$eq",
        Operator::Neq => "$ne",
        Operator::Gt => "$gt",
        Operator::Lt => "$lt",
        Operator::Gte => "$gte",
        Operator::Lte => "$lte",
        Operator::In => "$in",
        Operator::Nin => "$nin",
    }
}

/// Convert a filter operand, turning hex strings on id fields into `ObjectId`s
fn operand_to_bson(is_id: bool, value: &Value) -> Result<Bson, StorageError> {
    if is_id {
        match value {
            Value::String(s) => {
                if let Ok(oid) = ObjectId::parse_str(s) {
                    return Ok(Bson::ObjectId(oid));
                }
            }
            Value::Array(items) => {
                return items
                    .iter()
                    .map(|item| operand_to_bson(is_id, item))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Bson::Array);
            }
            _ => {}
        }
    }
    bson::to_bson(value).map_err(|e| query_error(format!("Failed to convert JSON to BSON: {}", e)))
}

/// Translate a [`Filter`] into a MongoDB query document
///
/// `id_fields` names the fields besides `_id` that hold `ObjectId`s.
pub fn filter_to_document(
    filter: &Filter,
    id_fields: &HashSet<String>,
) -> Result<bson::Document, StorageError> {
    let mut query = bson::Document::new();

    for (field, ops) in &filter.fields {
        let is_id = field == ID_FIELD || id_fields.contains(field);
        let mut conditions = bson::Document::new();
        for (op, value) in ops.iter() {
            conditions.insert(mongo_operator(op), operand_to_bson(is_id, value)?);
        }
        query.insert(field.clone(), conditions);
    }

    for (key, branches) in [("$and", &filter.and), ("$or", &filter.or)] {
        if branches.is_empty() {
            continue;
        }
        let branches = branches
            .iter()
            .map(|branch| filter_to_document(branch, id_fields).map(Bson::Document))
            .collect::<Result<Vec<_>, _>>()?;
        query.insert(key, Bson::Array(branches));
    }

    Ok(query)
}

fn normalize(value: Bson) -> Bson {
    match value {
        Bson::ObjectId(oid) => Bson::String(oid.to_hex()),
        Bson::DateTime(dt) => dt
            .try_to_rfc3339_string()
            .map(Bson::String)
            .unwrap_or(Bson::DateTime(dt)),
        Bson::Document(doc) => Bson::Document(
            doc.into_iter()
                .map(|(key, value)| (key, normalize(value)))
                .collect(),
        ),
        Bson::Array(items) => Bson::Array(items.into_iter().map(normalize).collect()),
        other => other,
    }
}

/// Convert a BSON document into a JSON object
pub fn document_to_json(doc: bson::Document) -> Document {
    match normalize(Bson::Document(doc)).into_relaxed_extjson() {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

async fn open_database(uri: &str, connect_timeout: Duration) -> Result<Database, StorageError> {
    let mut options = ClientOptions::parse(uri).await.map_err(connection_error)?;
    options.connect_timeout = Some(connect_timeout);
    options.server_selection_timeout = Some(connect_timeout);

    let Some(name) = options.default_database.clone() else {
        return Err(connection_error("the database uri must contain the database name"));
    };

    let client = Client::with_options(options).map_err(connection_error)?;
    let database = client.database(&name);

    match tokio::time::timeout(connect_timeout, database.run_command(doc! { "ping": 1 })).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => return Err(connection_error(e)),
        Err(_) => {
            return Err(StorageError::DeadlineExceeded {
                operation: "connect".to_string(),
                timeout: connect_timeout,
            });
        }
    }

    tracing::info!(database = %name, "connected to MongoDB");
    Ok(database)
}

// ---------------------------------------------------------------------------
// MongoStore
// ---------------------------------------------------------------------------

/// Document store backed by MongoDB
///
/// # Example
///
/// ```rust,ignore
/// use mongoke::storage::MongoStore;
///
/// let store = MongoStore::connect("mongodb://localhost:27017/app", CONNECT_TIMEOUT).await?;
/// ```
#[derive(Debug)]
pub struct MongoStore {
    uri: String,
    connect_timeout: Duration,
    database: OnceCell<Database>,
    id_fields: HashMap<String, HashSet<String>>,
}

impl MongoStore {
    /// A store that connects on first use
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            connect_timeout: CONNECT_TIMEOUT,
            database: OnceCell::new(),
            id_fields: HashMap::new(),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Fields holding `ObjectId`s, per collection
    pub fn with_id_fields(mut self, id_fields: HashMap<String, HashSet<String>>) -> Self {
        self.id_fields = id_fields;
        self
    }

    fn query(&self, collection: &str, filter: &Filter) -> Result<bson::Document, StorageError> {
        match self.id_fields.get(collection) {
            Some(fields) => filter_to_document(filter, fields),
            None => filter_to_document(filter, &HashSet::new()),
        }
    }

    /// Wrap an existing database handle
    pub fn from_database(database: Database) -> Self {
        Self {
            uri: String::new(),
            connect_timeout: CONNECT_TIMEOUT,
            database: OnceCell::new_with(Some(database)),
            id_fields: HashMap::new(),
        }
    }

    /// Connect now, failing if the server cannot be reached in time
    pub async fn connect(uri: impl Into<String>, connect_timeout: Duration) -> Result<Self, StorageError> {
        let store = Self::new(uri).with_connect_timeout(connect_timeout);
        store.database().await?;
        Ok(store)
    }

    /// The shared database handle, created exactly once
    pub async fn database(&self) -> Result<&Database, StorageError> {
        self.database
            .get_or_try_init(|| open_database(&self.uri, self.connect_timeout))
            .await
    }

    async fn collection(&self, name: &str) -> Result<mongodb::Collection<bson::Document>, StorageError> {
        Ok(self.database().await?.collection(name))
    }
}

#[async_trait]
impl DocumentStore for MongoStore {
    async fn find_one(
        &self,
        collection: &str,
        filter: &Filter,
        deadline: Deadline,
    ) -> Result<Option<Document>, StorageError> {
        let query = self.query(collection, filter)?;
        let document = self
            .collection(collection)
            .await?
            .find_one(query)
            .max_time(deadline.remaining())
            .await
            .map_err(query_error)?;

        Ok(document.map(document_to_json))
    }

    async fn find_many(
        &self,
        collection: &str,
        filter: &Filter,
        sort: &Sort,
        limit: u64,
        deadline: Deadline,
    ) -> Result<Vec<Document>, StorageError> {
        let query = self.query(collection, filter)?;
        let mut order = bson::Document::new();
        order.insert(sort.field.clone(), sort.direction.as_i32());

        let cursor = self
            .collection(collection)
            .await?
            .find(query)
            .sort(order)
            .limit(i64::try_from(limit).unwrap_or(i64::MAX))
            .max_time(deadline.remaining())
            .await
            .map_err(query_error)?;

        let documents: Vec<bson::Document> = cursor.try_collect().await.map_err(query_error)?;
        Ok(documents.into_iter().map(document_to_json).collect())
    }
}
