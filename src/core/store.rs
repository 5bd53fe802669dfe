//! The document store contract consumed by the resolvers

use crate::core::error::StorageError;
use crate::core::filter::Filter;
use crate::core::pagination::Sort;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// An untyped stored record
pub type Document = Map<String, Value>;

/// Default bound on establishing the store connection
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default bound on a single find operation
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Point in time by which a store operation must complete
///
/// Carries the budget it was created with so that expiry can be reported
/// meaningfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Instant,
    budget: Duration,
}

impl Deadline {
    /// A deadline `budget` from now
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
            budget,
        }
    }

    /// The earlier of `self` and an optional outer deadline
    pub fn within(self, outer: Option<Deadline>) -> Self {
        match outer {
            Some(outer) if outer.at < self.at => outer,
            _ => self,
        }
    }

    /// Time left before expiry, zero once passed
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.at
    }

    /// Run `operation`, cancelling it when the deadline passes
    pub async fn run<T, F>(&self, operation: &str, fut: F) -> Result<T, StorageError>
    where
        F: Future<Output = Result<T, StorageError>>,
    {
        match tokio::time::timeout_at(self.at, fut).await {
            Ok(result) => result,
            Err(_) => Err(self.exceeded(operation)),
        }
    }

    pub fn exceeded(&self, operation: &str) -> StorageError {
        StorageError::DeadlineExceeded {
            operation: operation.to_string(),
            timeout: self.budget,
        }
    }
}

/// Storage collaborator for the resolution pipeline
///
/// Implementations must honor the deadline they are given, and report "no
/// matching record" from [`find_one`](DocumentStore::find_one) as `Ok(None)`.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch the first document of `collection` matching `filter`
    async fn find_one(
        &self,
        collection: &str,
        filter: &Filter,
        deadline: Deadline,
    ) -> Result<Option<Document>, StorageError>;

    /// Fetch at most `limit` documents matching `filter`, ordered by `sort`
    async fn find_many(
        &self,
        collection: &str,
        filter: &Filter,
        sort: &Sort,
        limit: u64,
        deadline: Deadline,
    ) -> Result<Vec<Document>, StorageError>;
}
