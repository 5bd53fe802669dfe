//! Derived GraphQL schema generator
//!
//! Publishes the API surface built from the configured schema text: the
//! declared types, one filter input per type, connection types and the
//! `Query` root with its singular and plural fields.

use crate::config::{RelationConfig, RelationType};
use crate::core::filter::Operator;
use crate::core::schema::{ID_FIELD, ScalarKind, TypeDescriptor};
use crate::server::host::{FieldKind, ServerHost};
use indexmap::IndexSet;
use std::fmt::Write;
use std::sync::Arc;

const BUILTIN_WHERE: [(&str, ScalarKind); 5] = [
    ("ID", ScalarKind::Id),
    ("String", ScalarKind::String),
    ("Int", ScalarKind::Int),
    ("Float", ScalarKind::Float),
    ("Boolean", ScalarKind::Boolean),
];

const CONNECTION_ARGUMENTS: &str =
    "first: Int, last: Int, after: String, before: String, direction: Direction";

/// Schema generator that creates GraphQL SDL from a [`ServerHost`]
pub struct SchemaGenerator {
    host: Arc<ServerHost>,
}

impl SchemaGenerator {
    pub fn new(host: Arc<ServerHost>) -> Self {
        Self { host }
    }

    /// Generate the complete SDL schema
    pub fn generate_sdl(&self) -> String {
        let mut sdl = String::new();

        sdl.push_str(self.host.schema.sdl().trim_end());
        sdl.push_str("\n\n");

        sdl.push_str(&self.generate_where_scalars());
        sdl.push_str(&self.generate_shared_types());

        for type_name in self.host.exposed_types() {
            if let Some(descriptor) = self.host.schema.get(type_name) {
                sdl.push_str(&Self::generate_where_input(descriptor));
                sdl.push_str(&Self::generate_fields_enum(descriptor));
                sdl.push_str(&Self::generate_connection_types(type_name));
            }
        }

        sdl.push_str(&self.generate_query_root());
        sdl.push_str(&self.generate_relation_fields());
        sdl
    }

    /// `Where<Scalar>` inputs for builtin scalars and every enum or custom
    /// scalar used by an exposed type
    fn generate_where_scalars(&self) -> String {
        let mut needed: IndexSet<(String, ScalarKind)> = BUILTIN_WHERE
            .iter()
            .map(|(name, kind)| (name.to_string(), *kind))
            .collect();
        for type_name in self.host.exposed_types() {
            let Some(descriptor) = self.host.schema.get(type_name) else {
                continue;
            };
            for field in descriptor.filterable_fields() {
                if let Some(kind @ (ScalarKind::Enum | ScalarKind::Custom)) = field.kind {
                    needed.insert((field.type_name.clone(), kind));
                }
            }
        }

        let mut sdl = String::new();
        for (scalar, kind) in needed {
            let _ = writeln!(sdl, "input {} {{", kind.where_input_name(&scalar));
            for operator in Operator::ALL {
                if operator.is_ordering() && !kind.is_ordered() {
                    continue;
                }
                if operator.takes_list() {
                    let _ = writeln!(sdl, "  {}: [{}]", operator.as_str(), scalar);
                } else {
                    let _ = writeln!(sdl, "  {}: {}", operator.as_str(), scalar);
                }
            }
            sdl.push_str("}\n\n");
        }
        sdl
    }

    fn generate_shared_types(&self) -> String {
        concat!(
            "enum Direction {\n  ASC\n  DESC\n}\n\n",
            "type PageInfo {\n",
            "  hasNextPage: Boolean!\n",
            "  hasPreviousPage: Boolean!\n",
            "  startCursor: String\n",
            "  endCursor: String\n",
            "}\n\n",
        )
        .to_string()
    }

    /// `<T>Where` with one entry per filterable field plus `and`/`or`
    fn generate_where_input(descriptor: &TypeDescriptor) -> String {
        let name = &descriptor.name;
        let mut sdl = format!("input {}Where {{\n", name);
        if descriptor.field(ID_FIELD).is_none() {
            let _ = writeln!(sdl, "  {}: WhereID", ID_FIELD);
        }
        for field in descriptor.filterable_fields() {
            if let Some(kind) = field.kind {
                let _ = writeln!(sdl, "  {}: {}", field.name, kind.where_input_name(&field.type_name));
            }
        }
        let _ = writeln!(sdl, "  and: [{}Where!]", name);
        let _ = writeln!(sdl, "  or: [{}Where!]", name);
        sdl.push_str("}\n\n");
        sdl
    }

    /// `<T>Fields`, the values accepted by `cursorField`
    fn generate_fields_enum(descriptor: &TypeDescriptor) -> String {
        let mut sdl = format!("enum {}Fields {{\n", descriptor.name);
        if descriptor.field(ID_FIELD).is_none() {
            let _ = writeln!(sdl, "  {}", ID_FIELD);
        }
        for field in descriptor.filterable_fields() {
            let _ = writeln!(sdl, "  {}", field.name);
        }
        sdl.push_str("}\n\n");
        sdl
    }

    fn generate_connection_types(type_name: &str) -> String {
        format!(
            "type {t}Connection {{\n  nodes: [{t}!]!\n  edges: [{t}Edge!]!\n  pageInfo: PageInfo!\n}}\n\n\
             type {t}Edge {{\n  cursor: String!\n  node: {t}!\n}}\n\n",
            t = type_name
        )
    }

    /// Field signature shared by query fields and relation fields
    fn field_signature(name: &str, type_name: &str, kind: FieldKind) -> String {
        match kind {
            FieldKind::Single => format!("{}(where: {}Where): {}", name, type_name, type_name),
            FieldKind::Connection => format!(
                "{}(where: {t}Where, {}, cursorField: {t}Fields): {t}Connection!",
                name,
                CONNECTION_ARGUMENTS,
                t = type_name
            ),
        }
    }

    fn generate_query_root(&self) -> String {
        let mut sdl = String::from("type Query {\n");
        for field in self.host.query_fields() {
            let _ = writeln!(
                sdl,
                "  {}",
                Self::field_signature(&field.name, &field.type_name, field.kind)
            );
        }
        sdl.push_str("}\n");
        sdl
    }

    /// `extend type` blocks adding relation fields to their source types
    fn generate_relation_fields(&self) -> String {
        let mut sources: IndexSet<&str> = IndexSet::new();
        for relation in &self.host.config.relations {
            sources.insert(&relation.from);
        }

        let mut sdl = String::new();
        for source in sources {
            let _ = write!(sdl, "\nextend type {} {{\n", source);
            for relation in self.host.relations_of(source) {
                let _ = writeln!(sdl, "  {}", Self::relation_signature(relation));
            }
            sdl.push_str("}\n");
        }
        sdl
    }

    fn relation_signature(relation: &RelationConfig) -> String {
        let kind = match relation.relation_type {
            RelationType::ToOne => FieldKind::Single,
            RelationType::ToMany => FieldKind::Connection,
        };
        Self::field_signature(&relation.field_name(), &relation.to, kind)
    }
}
