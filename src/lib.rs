//! # Mongoke
//!
//! A GraphQL API over a document store, derived from a schema and a YAML
//! configuration.
//!
//! ## Features
//!
//! - **Derived Query Surface**: a singular `T(where)` and a plural
//!   `TNodes(where, first, last, after, before, direction, cursorField)`
//!   field for every exposed type
//! - **Typed Filters**: `where` objects compile to store-neutral filters with
//!   `eq, neq, gt, lt, gte, lte, in, nin` and `and`/`or`
//! - **Cursor Pagination**: bidirectional, over any filterable field, with
//!   accurate page flags in the direction of travel
//! - **Guards**: per-type permission expressions over the caller's JWT claims
//! - **Relations**: `to_one`/`to_many` fields whose filters are templated from
//!   the parent document
//! - **Backends**: an in-memory store and MongoDB (`mongodb_backend` feature)
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use mongoke::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     ServerBuilder::new()
//!         .with_config_file("mongoke.yml")?
//!         .connect()
//!         .await?
//!         .serve("127.0.0.1:4000")
//!         .await
//! }
//! ```

pub mod config;
pub mod core;
pub mod server;
pub mod storage;

/// Re-exports of commonly used types and traits
pub mod prelude {
    // === Core ===
    pub use crate::core::{
        AuthGuard, Claims, Connection, ConnectionArguments, Deadline, Direction, Document,
        DocumentStore, Edge, Filter, GuardSet, MongokeError, MongokeResult, Operator, PageInfo,
        PaginationRequest, RequestContext, SchemaModel, SingularArguments, Sort, TypeDescriptor,
        TypeResolver, compile_where, extract_claims,
    };
    pub use crate::core::error::{
        ArgumentError, AuthorizationError, ConfigError, GraphQLError, RequestError, StorageError,
    };

    // === Storage ===
    pub use crate::storage::InMemoryStore;
    #[cfg(feature = "mongodb_backend")]
    pub use crate::storage::MongoStore;

    // === Config ===
    pub use crate::config::{
        DatabaseConfig, JwtConfig, MongokeConfig, RelationConfig, RelationType, TypeConfig,
    };

    // === Server ===
    pub use crate::server::{GraphQLExposure, ServerBuilder, ServerHost};

    // === External dependencies ===
    pub use anyhow::Result;
    pub use async_trait::async_trait;
    pub use serde::{Deserialize, Serialize};

    // === Axum ===
    pub use axum::{Router, routing::get};
}
