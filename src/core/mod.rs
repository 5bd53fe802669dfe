//! Core types: the filter compiler, guards, pagination and the resolvers
//! that tie them to a document store

pub mod arguments;
pub mod claims;
pub mod error;
pub mod filter;
pub mod guard;
pub mod pagination;
pub mod resolver;
pub mod schema;
pub mod store;

pub use arguments::{ConnectionArguments, SingularArguments, compile_connection, compile_singular};
pub use claims::{Claims, extract_claims};
pub use error::{MongokeError, MongokeResult};
pub use filter::{Filter, Operator, compile_where};
pub use guard::{AuthGuard, GuardSet};
pub use pagination::{Connection, Direction, Edge, PageInfo, PaginationRequest, Sort};
pub use resolver::{RequestContext, TypeResolver};
pub use schema::{SchemaModel, TypeDescriptor};
pub use store::{Deadline, Document, DocumentStore};
