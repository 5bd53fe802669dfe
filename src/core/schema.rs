//! Type descriptors parsed from the schema definition text
//!
//! Only object and interface definitions are turned into descriptors. Enum
//! and scalar declarations are remembered by name so that field types can be
//! classified when deriving filter inputs and reading cursors.

use crate::core::error::ConfigError;
use graphql_parser::schema::{Definition, Document, Type, TypeDefinition, parse_schema};
use indexmap::IndexMap;
use std::collections::HashSet;

/// Name of the identity field every stored document carries
pub const ID_FIELD: &str = "_id";

/// Classification of a field's named type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Id,
    String,
    Int,
    Float,
    Boolean,
    Enum,
    Custom,
}

impl ScalarKind {
    /// Name of the derived filter input for this scalar
    pub fn where_input_name(&self, type_name: &str) -> String {
        match self {
            ScalarKind::Id => "WhereID".to_string(),
            ScalarKind::String => "WhereString".to_string(),
            ScalarKind::Int => "WhereInt".to_string(),
            ScalarKind::Float => "WhereFloat".to_string(),
            ScalarKind::Boolean => "WhereBoolean".to_string(),
            ScalarKind::Enum | ScalarKind::Custom => format!("Where{}", type_name),
        }
    }

    /// Whether values of this kind have a meaningful ordering
    pub fn is_ordered(&self) -> bool {
        !matches!(self, ScalarKind::Boolean)
    }
}

/// A field declared on an object type
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    pub name: String,
    /// Innermost named type (`[Int!]!` → `Int`)
    pub type_name: String,
    pub list: bool,
    pub non_null: bool,
    /// `None` when the field points to an object type
    pub kind: Option<ScalarKind>,
}

impl FieldDescriptor {
    /// Whether the field can appear in a `where` filter
    pub fn is_filterable(&self) -> bool {
        !self.list && self.kind.is_some()
    }
}

/// An object type of the schema
#[derive(Debug, Clone, PartialEq)]
pub struct TypeDescriptor {
    pub name: String,
    pub fields: Vec<FieldDescriptor>,
}

impl TypeDescriptor {
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Whether `name` can be used in filters and as a cursor field.
    ///
    /// The identity field is always accepted, declared or not.
    pub fn has_field(&self, name: &str) -> bool {
        name == ID_FIELD || self.field(name).is_some_and(|f| f.is_filterable())
    }

    /// Scalar kind of a filterable field, `_id` falling back to `ID`
    pub fn kind_of(&self, name: &str) -> Option<ScalarKind> {
        match self.field(name) {
            Some(field) if field.is_filterable() => field.kind,
            Some(_) => None,
            None if name == ID_FIELD => Some(ScalarKind::Id),
            None => None,
        }
    }

    pub fn filterable_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| f.is_filterable())
    }
}

/// All object types parsed from the schema text, in declaration order
#[derive(Debug, Clone, Default)]
pub struct SchemaModel {
    sdl: String,
    types: IndexMap<String, TypeDescriptor>,
    enums: HashSet<String>,
}

impl SchemaModel {
    /// Parse schema definition text into type descriptors
    pub fn parse(sdl: &str) -> Result<Self, ConfigError> {
        let document: Document<'_, String> =
            parse_schema::<String>(sdl).map_err(|e| ConfigError::InvalidSchema {
                message: e.to_string(),
            })?;

        let mut enums = HashSet::new();
        let mut scalars = HashSet::new();
        for definition in &document.definitions {
            if let Definition::TypeDefinition(type_def) = definition {
                match type_def {
                    TypeDefinition::Enum(e) => {
                        enums.insert(e.name.clone());
                    }
                    TypeDefinition::Scalar(s) => {
                        scalars.insert(s.name.clone());
                    }
                    _ => {}
                }
            }
        }

        let mut types = IndexMap::new();
        for definition in &document.definitions {
            let Definition::TypeDefinition(type_def) = definition else {
                continue;
            };
            let (name, fields) = match type_def {
                TypeDefinition::Object(object) => (&object.name, &object.fields),
                TypeDefinition::Interface(interface) => (&interface.name, &interface.fields),
                _ => continue,
            };
            if types.contains_key(name) {
                return Err(ConfigError::InvalidSchema {
                    message: format!("type '{}' is defined more than once", name),
                });
            }
            let fields = fields
                .iter()
                .map(|field| describe_field(&field.name, &field.field_type, &enums, &scalars))
                .collect();
            types.insert(
                name.clone(),
                TypeDescriptor {
                    name: name.clone(),
                    fields,
                },
            );
        }

        Ok(Self {
            sdl: sdl.to_string(),
            types,
            enums,
        })
    }

    pub fn get(&self, type_name: &str) -> Option<&TypeDescriptor> {
        self.types.get(type_name)
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.types.contains_key(type_name)
    }

    pub fn types(&self) -> impl Iterator<Item = &TypeDescriptor> {
        self.types.values()
    }

    pub fn is_enum(&self, name: &str) -> bool {
        self.enums.contains(name)
    }

    /// The schema text as written in the configuration
    pub fn sdl(&self) -> &str {
        &self.sdl
    }
}

fn describe_field(
    name: &str,
    field_type: &Type<'_, String>,
    enums: &HashSet<String>,
    scalars: &HashSet<String>,
) -> FieldDescriptor {
    let mut list = false;
    let mut non_null = false;
    let mut current = field_type;
    let mut outer = true;
    let type_name = loop {
        match current {
            Type::NonNullType(inner) => {
                if outer {
                    non_null = true;
                }
                current = inner;
            }
            Type::ListType(inner) => {
                list = true;
                outer = false;
                current = inner;
            }
            Type::NamedType(named) => break named.clone(),
        }
    };

    let kind = match type_name.as_str() {
        "ID" => Some(ScalarKind::Id),
        "String" => Some(ScalarKind::String),
        "Int" => Some(ScalarKind::Int),
        "Float" => Some(ScalarKind::Float),
        "Boolean" => Some(ScalarKind::Boolean),
        other if enums.contains(other) => Some(ScalarKind::Enum),
        other if scalars.contains(other) => Some(ScalarKind::Custom),
        _ => None,
    };

    FieldDescriptor {
        name: name.to_string(),
        type_name,
        list,
        non_null,
        kind,
    }
}
