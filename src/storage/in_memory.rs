//! In-memory implementation of DocumentStore for testing and development

use crate::core::error::StorageError;
use crate::core::filter::{Filter, compare_values};
use crate::core::pagination::{Direction, Sort};
use crate::core::store::{Deadline, Document, DocumentStore};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

const BACKEND: &str = "in_memory";

/// In-memory document store
///
/// Useful for testing and development. Uses RwLock for thread-safe access.
/// Documents keep insertion order; filters are evaluated with
/// [`Filter::matches`].
#[derive(Clone, Default)]
pub struct InMemoryStore {
    collections: Arc<RwLock<HashMap<String, Vec<Document>>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a document to `collection`
    pub fn insert(&self, collection: &str, document: Value) -> Result<()> {
        let Value::Object(document) = document else {
            return Err(anyhow!("Only objects can be stored, got {}", document));
        };
        let mut collections = self
            .collections
            .write()
            .map_err(|e| anyhow!("Failed to acquire write lock: {}", e))?;

        collections
            .entry(collection.to_string())
            .or_default()
            .push(document);
        Ok(())
    }

    /// Append many documents to `collection`
    pub fn insert_many(&self, collection: &str, documents: impl IntoIterator<Item = Value>) -> Result<()> {
        documents
            .into_iter()
            .try_for_each(|document| self.insert(collection, document))
    }

    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .map(|c| c.get(collection).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    fn matching(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>, StorageError> {
        let collections = self.collections.read().map_err(|e| StorageError::QueryError {
            backend: BACKEND.to_string(),
            message: format!("Failed to acquire read lock: {}", e),
        })?;

        Ok(collections
            .get(collection)
            .map(|documents| {
                documents
                    .iter()
                    .filter(|document| filter.matches(document))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

fn field_order(a: &Document, b: &Document, field: &str) -> Ordering {
    let null = Value::Null;
    let (x, y) = (a.get(field).unwrap_or(&null), b.get(field).unwrap_or(&null));
    match (x, y) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        _ => compare_values(x, y).unwrap_or(Ordering::Equal),
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn find_one(
        &self,
        collection: &str,
        filter: &Filter,
        deadline: Deadline,
    ) -> Result<Option<Document>, StorageError> {
        if deadline.is_expired() {
            return Err(deadline.exceeded("find_one"));
        }
        Ok(self.matching(collection, filter)?.into_iter().next())
    }

    async fn find_many(
        &self,
        collection: &str,
        filter: &Filter,
        sort: &Sort,
        limit: u64,
        deadline: Deadline,
    ) -> Result<Vec<Document>, StorageError> {
        if deadline.is_expired() {
            return Err(deadline.exceeded("find_many"));
        }
        let mut documents = self.matching(collection, filter)?;
        documents.sort_by(|a, b| {
            let ordering = field_order(a, b, &sort.field);
            match sort.direction {
                Direction::Asc => ordering,
                Direction::Desc => ordering.reverse(),
            }
        });
        documents.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(documents)
    }
}
