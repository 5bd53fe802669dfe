//! GraphQL executor module
//!
//! Executes query documents against the host's resolvers:
//! - `core`: operation selection, variables and the error sink
//! - `query_executor`: top-level `Query` fields
//! - `field_resolver`: projection, connections and relation fields
//! - `utils`: argument and directive helpers

mod core;
mod field_resolver;
mod query_executor;
mod utils;

pub use core::{ExecutionRequest, FieldError, GraphQLExecutor};
