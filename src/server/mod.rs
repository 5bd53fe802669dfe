//! Server module for building the HTTP server of a configuration
//!
//! The `ServerBuilder` validates the configuration into a `ServerHost`,
//! exposes it over GraphQL and serves it with graceful shutdown.

pub mod builder;
pub mod exposure;
pub mod host;

pub use builder::ServerBuilder;
pub use exposure::GraphQLExposure;
pub use host::{FieldKind, QueryField, ServerHost};
