//! Server host for transport-agnostic API exposure
//!
//! The host is built once at startup from a validated configuration and is
//! shared read-only by every request. It owns one resolver per exposed type,
//! the mapping from query field names to those resolvers and the relation
//! fields declared on each type.

use crate::config::{JwtConfig, MongokeConfig, RelationConfig};
use crate::core::error::ConfigError;
use crate::core::guard::GuardSet;
use crate::core::resolver::TypeResolver;
use crate::core::schema::SchemaModel;
use crate::core::store::DocumentStore;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::Arc;

/// Shape of a query field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// `T(where): T`
    Single,
    /// `TNodes(where, first, ...): TConnection`
    Connection,
}

/// A top-level query field and the type it resolves
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryField {
    pub name: String,
    pub type_name: String,
    pub kind: FieldKind,
}

/// Name of the plural query field of `type_name`
pub fn connection_field_name(type_name: &str) -> String {
    format!("{}Nodes", type_name)
}

/// Host context containing all resolution state
///
/// # Example
///
/// ```rust,ignore
/// let host = ServerHost::from_config(config, Arc::new(InMemoryStore::new()))?;
/// let app = GraphQLExposure::build_router(Arc::new(host))?;
/// ```
pub struct ServerHost {
    pub config: Arc<MongokeConfig>,
    pub schema: Arc<SchemaModel>,
    resolvers: IndexMap<String, Arc<TypeResolver>>,
    query_fields: IndexMap<String, QueryField>,
    relations: HashMap<String, Vec<RelationConfig>>,
}

impl ServerHost {
    /// Validate `config` and build the resolvers over `store`
    pub fn from_config(
        config: MongokeConfig,
        store: Arc<dyn DocumentStore>,
    ) -> Result<Self, ConfigError> {
        let schema = config.validate()?;
        Self::from_parts(config, schema, store)
    }

    /// Build from a configuration and an already parsed schema
    pub fn from_parts(
        config: MongokeConfig,
        schema: SchemaModel,
        store: Arc<dyn DocumentStore>,
    ) -> Result<Self, ConfigError> {
        config.check_against(&schema)?;

        let query_timeout = config.database.query_timeout();
        let mut resolvers = IndexMap::new();
        let mut query_fields = IndexMap::new();

        for (type_name, type_config) in config.exposed_types() {
            let descriptor = schema
                .get(type_name)
                .cloned()
                .ok_or_else(|| ConfigError::UnknownType {
                    type_name: type_name.clone(),
                    context: "types".to_string(),
                })?;
            let collection = type_config.collection.clone().ok_or_else(|| {
                ConfigError::MissingField {
                    field: "collection".to_string(),
                    context: format!("types.{}", type_name),
                }
            })?;
            let guards = GuardSet::compile(type_name, &type_config.permissions)?;

            let resolver = TypeResolver::new(descriptor, collection, store.clone())
                .with_guards(guards)
                .with_cursor_field(type_config.cursor_field())
                .with_query_timeout(query_timeout);
            resolvers.insert(type_name.clone(), Arc::new(resolver));

            for (name, kind) in [
                (type_name.clone(), FieldKind::Single),
                (connection_field_name(type_name), FieldKind::Connection),
            ] {
                if query_fields.contains_key(&name) {
                    return Err(ConfigError::InvalidValue {
                        field: "types".to_string(),
                        value: name,
                        message: "query field name is generated twice".to_string(),
                    });
                }
                query_fields.insert(
                    name.clone(),
                    QueryField {
                        name,
                        type_name: type_name.clone(),
                        kind,
                    },
                );
            }
        }

        let mut relations: HashMap<String, Vec<RelationConfig>> = HashMap::new();
        for relation in &config.relations {
            relations
                .entry(relation.from.clone())
                .or_default()
                .push(relation.clone());
        }

        tracing::info!(
            types = resolvers.len(),
            relations = config.relations.len(),
            "server host ready"
        );

        Ok(Self {
            config: Arc::new(config),
            schema: Arc::new(schema),
            resolvers,
            query_fields,
            relations,
        })
    }

    pub fn resolver(&self, type_name: &str) -> Option<&Arc<TypeResolver>> {
        self.resolvers.get(type_name)
    }

    pub fn query_field(&self, name: &str) -> Option<&QueryField> {
        self.query_fields.get(name)
    }

    /// Query fields in type declaration order
    pub fn query_fields(&self) -> impl Iterator<Item = &QueryField> {
        self.query_fields.values()
    }

    /// Exposed type names in declaration order
    pub fn exposed_types(&self) -> Vec<&str> {
        self.resolvers.keys().map(String::as_str).collect()
    }

    pub fn relations_of(&self, type_name: &str) -> &[RelationConfig] {
        self.relations
            .get(type_name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// The relation backing `field` on `type_name`, if any
    pub fn relation(&self, type_name: &str, field: &str) -> Option<&RelationConfig> {
        self.relations_of(type_name)
            .iter()
            .find(|relation| relation.field_name() == field)
    }

    pub fn jwt(&self) -> &JwtConfig {
        &self.config.jwt
    }

    pub fn is_ready(&self) -> bool {
        !self.resolvers.is_empty()
    }
}

impl std::fmt::Debug for ServerHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHost")
            .field("types", &self.exposed_types())
            .field("query_fields", &self.query_fields.keys().collect::<Vec<_>>())
            .finish()
    }
}
