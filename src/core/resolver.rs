//! Per-type resolvers
//!
//! Each exposed type gets one [`TypeResolver`] that serves both its singular
//! and its plural query field. Guards run first, before any argument
//! compilation or storage access.

use crate::core::arguments::{compile_connection, compile_singular};
use crate::core::claims::Claims;
use crate::core::error::{AuthorizationError, MongokeError};
use crate::core::filter::Filter;
use crate::core::guard::GuardSet;
use crate::core::pagination::{Connection, paginate};
use crate::core::schema::TypeDescriptor;
use crate::core::store::{Deadline, Document, DocumentStore, QUERY_TIMEOUT};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

/// Per-request state shared by every field of one operation
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub claims: Claims,
    /// Outer bound set at the call boundary, if any
    pub deadline: Option<Deadline>,
}

impl RequestContext {
    pub fn new(claims: Claims) -> Self {
        Self {
            claims,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Resolves the query fields of a single exposed type
pub struct TypeResolver {
    descriptor: TypeDescriptor,
    collection: String,
    cursor_field: String,
    guards: GuardSet,
    store: Arc<dyn DocumentStore>,
    query_timeout: Duration,
}

impl std::fmt::Debug for TypeResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeResolver")
            .field("type_name", &self.descriptor.name)
            .field("collection", &self.collection)
            .field("cursor_field", &self.cursor_field)
            .field("guards", &self.guards.len())
            .finish()
    }
}

impl TypeResolver {
    pub fn new(
        descriptor: TypeDescriptor,
        collection: impl Into<String>,
        store: Arc<dyn DocumentStore>,
    ) -> Self {
        Self {
            descriptor,
            collection: collection.into(),
            cursor_field: crate::core::schema::ID_FIELD.to_string(),
            guards: GuardSet::default(),
            store,
            query_timeout: QUERY_TIMEOUT,
        }
    }

    pub fn with_guards(mut self, guards: GuardSet) -> Self {
        self.guards = guards;
        self
    }

    pub fn with_cursor_field(mut self, cursor_field: impl Into<String>) -> Self {
        self.cursor_field = cursor_field.into();
        self
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    pub fn type_name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &TypeDescriptor {
        &self.descriptor
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn cursor_field(&self) -> &str {
        &self.cursor_field
    }

    fn deadline(&self, ctx: &RequestContext) -> Deadline {
        Deadline::after(self.query_timeout).within(ctx.deadline)
    }

    fn allowed(&self, ctx: &RequestContext, args: &Map<String, Value>) -> bool {
        match self.guards.denying(&ctx.claims, args) {
            Some(guard) => {
                tracing::warn!(
                    type_name = %self.descriptor.name,
                    guard = guard.source(),
                    "guard denied access"
                );
                false
            }
            None => true,
        }
    }

    /// Resolve the singular field
    pub async fn resolve_one(
        &self,
        ctx: &RequestContext,
        args: &Map<String, Value>,
    ) -> Result<Option<Document>, MongokeError> {
        self.resolve_one_within(ctx, args, Filter::default()).await
    }

    /// Resolve the singular field with `base` ANDed into the compiled filter
    pub async fn resolve_one_within(
        &self,
        ctx: &RequestContext,
        args: &Map<String, Value>,
        base: Filter,
    ) -> Result<Option<Document>, MongokeError> {
        if !self.allowed(ctx, args) {
            return Err(AuthorizationError::Denied {
                type_name: self.descriptor.name.clone(),
            }
            .into());
        }

        let filter = base.and_with(compile_singular(args, &self.descriptor)?);
        tracing::debug!(
            type_name = %self.descriptor.name,
            filter = ?filter,
            "resolving single document"
        );

        let deadline = self.deadline(ctx);
        let document = deadline
            .run(
                "find_one",
                self.store.find_one(&self.collection, &filter, deadline),
            )
            .await
            .inspect_err(|e| {
                tracing::error!(collection = %self.collection, error = %e, "find_one failed")
            })?;
        Ok(document)
    }

    /// Resolve the plural field
    pub async fn resolve_many(
        &self,
        ctx: &RequestContext,
        args: &Map<String, Value>,
    ) -> Result<Connection, MongokeError> {
        self.resolve_many_within(ctx, args, Filter::default()).await
    }

    /// Resolve the plural field with `base` ANDed into the compiled filter
    ///
    /// A denied request yields an empty connection without touching storage.
    pub async fn resolve_many_within(
        &self,
        ctx: &RequestContext,
        args: &Map<String, Value>,
        base: Filter,
    ) -> Result<Connection, MongokeError> {
        if !self.allowed(ctx, args) {
            return Ok(Connection::empty());
        }

        let (filter, request) = compile_connection(args, &self.descriptor, &self.cursor_field)?;
        let filter = base.and_with(filter);
        tracing::debug!(
            type_name = %self.descriptor.name,
            filter = ?filter,
            request = ?request,
            "resolving connection"
        );

        let cursor_kind = self.descriptor.kind_of(&request.cursor_field);
        paginate(
            self.store.as_ref(),
            &self.collection,
            filter,
            &request,
            cursor_kind,
            self.deadline(ctx),
        )
        .await
    }
}
