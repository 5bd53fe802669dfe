//! Configuration loading and validation

use crate::core::error::ConfigError;
use crate::core::filter::compile_where;
use crate::core::guard::{AuthGuard, GuardSet};
use crate::core::schema::{ID_FIELD, ScalarKind, SchemaModel};
use crate::core::store::{CONNECT_TIMEOUT, Document, QUERY_TIMEOUT};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_true() -> bool {
    true
}

/// Configuration of one schema type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeConfig {
    /// Whether the type gets query fields
    #[serde(default = "default_true")]
    pub exposed: bool,

    /// Backing collection, required when exposed
    #[serde(default)]
    pub collection: Option<String>,

    /// Guards that must all allow a request
    #[serde(default)]
    pub permissions: Vec<AuthGuard>,

    /// Field used for ordering and cursors, `_id` when unset
    #[serde(default)]
    pub cursor_field: Option<String>,
}

impl TypeConfig {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            exposed: true,
            collection: Some(collection.into()),
            permissions: Vec::new(),
            cursor_field: None,
        }
    }

    pub fn cursor_field(&self) -> &str {
        self.cursor_field.as_deref().unwrap_or(ID_FIELD)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    ToOne,
    ToMany,
}

/// A derived field linking documents of two types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationConfig {
    pub from: String,
    pub to: String,
    pub relation_type: RelationType,

    /// Name of the field added to `from`
    #[serde(default)]
    pub field: Option<String>,

    /// Filter template, `${{ parent.<path> }}` placeholders are replaced
    /// with values of the parent document
    #[serde(default, rename = "where")]
    pub where_: Value,
}

impl RelationConfig {
    /// The field name on `from`, derived from `to` when not configured
    pub fn field_name(&self) -> String {
        if let Some(field) = &self.field {
            return field.clone();
        }
        match self.relation_type {
            RelationType::ToOne => lowercase_first(&self.to),
            RelationType::ToMany => format!("{}Nodes", self.to),
        }
    }

    /// The `where` template with placeholders filled from `parent`
    pub fn render_where(&self, parent: &Document) -> Value {
        render_template(&self.where_, parent)
    }
}

fn lowercase_first(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Bearer token settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JwtConfig {
    /// HS256 secret; tokens are ignored when unset
    #[serde(default)]
    pub secret: Option<String>,

    /// Reject requests without a token
    #[serde(default)]
    pub required: bool,
}

/// Store connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "DatabaseConfig::default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "DatabaseConfig::default_query_timeout")]
    pub query_timeout_secs: u64,
}

impl DatabaseConfig {
    fn default_connect_timeout() -> u64 {
        CONNECT_TIMEOUT.as_secs()
    }

    fn default_query_timeout() -> u64 {
        QUERY_TIMEOUT.as_secs()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: Self::default_connect_timeout(),
            query_timeout_secs: Self::default_query_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MongoConfig {
    pub uri: String,
}

/// Complete service configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MongokeConfig {
    /// Inline schema definition text
    #[serde(default)]
    pub schema: Option<String>,

    /// Path to the schema definition, relative to the config file
    #[serde(default)]
    pub schema_path: Option<String>,

    #[serde(default)]
    pub types: IndexMap<String, TypeConfig>,

    #[serde(default)]
    pub relations: Vec<RelationConfig>,

    #[serde(default)]
    pub database_uri: Option<String>,

    /// Alternative spelling of `database_uri`
    #[serde(default)]
    pub mongodb: Option<MongoConfig>,

    #[serde(default)]
    pub jwt: JwtConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(skip)]
    base_dir: Option<PathBuf>,
}

impl MongokeConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.display().to_string(),
            });
        }
        let content = std::fs::read_to_string(path)?;
        let mut config: Self =
            serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError {
                file: Some(path.display().to_string()),
                message: e.to_string(),
            })?;
        config.base_dir = path.parent().map(Path::to_path_buf);
        Ok(config)
    }

    /// Load configuration from a YAML string
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    pub fn database_uri(&self) -> Option<&str> {
        self.database_uri
            .as_deref()
            .or(self.mongodb.as_ref().map(|m| m.uri.as_str()))
    }

    /// Schema text, inline or read from `schema_path`
    pub fn schema_text(&self) -> Result<String, ConfigError> {
        if let Some(schema) = &self.schema {
            return Ok(schema.clone());
        }
        let Some(schema_path) = &self.schema_path else {
            return Err(ConfigError::MissingField {
                field: "schema".to_string(),
                context: "configuration needs `schema` or `schema_path`".to_string(),
            });
        };
        let path = match &self.base_dir {
            Some(dir) if Path::new(schema_path).is_relative() => dir.join(schema_path),
            _ => PathBuf::from(schema_path),
        };
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.display().to_string(),
            });
        }
        Ok(std::fs::read_to_string(path)?)
    }

    /// Parse the configured schema
    pub fn load_schema(&self) -> Result<SchemaModel, ConfigError> {
        SchemaModel::parse(&self.schema_text()?)
    }

    /// Exposed types in declaration order
    pub fn exposed_types(&self) -> impl Iterator<Item = (&String, &TypeConfig)> {
        self.types.iter().filter(|(_, t)| t.exposed)
    }

    /// Fields declared `ID` in the schema, keyed by the collection of their type
    pub fn id_fields(&self, schema: &SchemaModel) -> HashMap<String, HashSet<String>> {
        let mut id_fields: HashMap<String, HashSet<String>> = HashMap::new();
        for (name, type_config) in self.exposed_types() {
            let (Some(collection), Some(descriptor)) =
                (type_config.collection.as_ref(), schema.get(name))
            else {
                continue;
            };
            id_fields.entry(collection.clone()).or_default().extend(
                descriptor
                    .fields
                    .iter()
                    .filter(|field| field.kind == Some(ScalarKind::Id))
                    .map(|field| field.name.clone()),
            );
        }
        id_fields
    }

    /// Load the schema and check the configuration against it
    pub fn validate(&self) -> Result<SchemaModel, ConfigError> {
        let schema = self.load_schema()?;
        self.check_against(&schema)?;
        Ok(schema)
    }

    /// Check types, guards and relations against a parsed schema
    pub fn check_against(&self, schema: &SchemaModel) -> Result<(), ConfigError> {
        if self.jwt.required && self.jwt.secret.is_none() {
            return Err(ConfigError::MissingField {
                field: "jwt.secret".to_string(),
                context: "`jwt.required` needs a secret to verify tokens with".to_string(),
            });
        }

        for (name, type_config) in &self.types {
            let Some(descriptor) = schema.get(name) else {
                return Err(ConfigError::UnknownType {
                    type_name: name.clone(),
                    context: "types".to_string(),
                });
            };
            if !type_config.exposed {
                continue;
            }
            match type_config.collection.as_deref() {
                Some(collection) if !collection.trim().is_empty() => {}
                _ => {
                    return Err(ConfigError::MissingField {
                        field: "collection".to_string(),
                        context: format!("types.{}", name),
                    });
                }
            }
            GuardSet::compile(name, &type_config.permissions)?;
            let cursor_field = type_config.cursor_field();
            if !descriptor.has_field(cursor_field) {
                return Err(ConfigError::InvalidValue {
                    field: format!("types.{}.cursor_field", name),
                    value: cursor_field.to_string(),
                    message: "not a scalar field of the type".to_string(),
                });
            }
        }

        let mut relation_fields = HashSet::new();
        for relation in &self.relations {
            if !schema.contains(&relation.from) {
                return Err(ConfigError::UnknownType {
                    type_name: relation.from.clone(),
                    context: "relations.from".to_string(),
                });
            }
            let target_exposed = self.types.get(&relation.to).is_some_and(|t| t.exposed);
            if !schema.contains(&relation.to) || !target_exposed {
                return Err(ConfigError::UnknownType {
                    type_name: relation.to.clone(),
                    context: "relations.to (must be an exposed type)".to_string(),
                });
            }
            if !matches!(relation.where_, Value::Null | Value::Object(_)) {
                return Err(ConfigError::InvalidValue {
                    field: format!("relations.{}.where", relation.field_name()),
                    value: relation.where_.to_string(),
                    message: "expected a mapping".to_string(),
                });
            }
            if let Some(target) = schema.get(&relation.to) {
                compile_where(&stub_placeholders(&relation.where_), target).map_err(|e| {
                    ConfigError::InvalidValue {
                        field: format!("relations.{}.where", relation.field_name()),
                        value: relation.where_.to_string(),
                        message: e.to_string(),
                    }
                })?;
            }
            let field = relation.field_name();
            if !relation_fields.insert((relation.from.clone(), field.clone())) {
                return Err(ConfigError::InvalidValue {
                    field: "relations.field".to_string(),
                    value: field,
                    message: format!("defined twice on {}", relation.from),
                });
            }
        }

        Ok(())
    }
}

// ============================================================================
// Relation templates
// ============================================================================

const PLACEHOLDER_OPEN: &str = "${{";
const PLACEHOLDER_CLOSE: &str = "}}";

/// Replace `${{ parent.<path> }}` placeholders throughout a template
pub fn render_template(template: &Value, parent: &Document) -> Value {
    match template {
        Value::String(s) => render_string(s, parent),
        Value::Array(items) => Value::Array(items.iter().map(|v| render_template(v, parent)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render_template(v, parent)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn parent_path(inner: &str) -> Option<&str> {
    let inner = inner.trim();
    if inner == "parent" {
        return Some("");
    }
    inner.strip_prefix("parent.")
}

fn lookup<'a>(parent: &'a Document, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.').filter(|s| !s.is_empty());
    let first = segments.next()?;
    let mut current = parent.get(first)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// The parent path of a string made of a single placeholder
fn lone_placeholder(s: &str) -> Option<&str> {
    let inner = s
        .trim()
        .strip_prefix(PLACEHOLDER_OPEN)?
        .strip_suffix(PLACEHOLDER_CLOSE)?;
    if inner.contains(PLACEHOLDER_CLOSE) {
        return None;
    }
    parent_path(inner)
}

/// Replace lone placeholders with an empty list, an operand every operator
/// accepts, so a template can be compiled without a parent document
fn stub_placeholders(template: &Value) -> Value {
    match template {
        Value::String(s) if lone_placeholder(s).is_some() => Value::Array(Vec::new()),
        Value::Array(items) => Value::Array(items.iter().map(stub_placeholders).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), stub_placeholders(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn render_string(s: &str, parent: &Document) -> Value {
    // A lone placeholder keeps the parent value's type
    if let Some(path) = lone_placeholder(s) {
        return match path {
            "" => Value::Object(parent.clone()),
            path => lookup(parent, path).cloned().unwrap_or(Value::Null),
        };
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find(PLACEHOLDER_OPEN) {
        let after_open = &rest[start + PLACEHOLDER_OPEN.len()..];
        let Some(end) = after_open.find(PLACEHOLDER_CLOSE) else {
            break;
        };
        out.push_str(&rest[..start]);
        let inner = &after_open[..end];
        match parent_path(inner).and_then(|path| lookup(parent, path)) {
            Some(Value::String(v)) => out.push_str(v),
            Some(Value::Null) | None if parent_path(inner).is_some() => {}
            Some(other) => out.push_str(&other.to_string()),
            None => {
                out.push_str(PLACEHOLDER_OPEN);
                out.push_str(inner);
                out.push_str(PLACEHOLDER_CLOSE);
            }
        }
        rest = &after_open[end + PLACEHOLDER_CLOSE.len()..];
    }
    out.push_str(rest);
    Value::String(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    const CONFIG: &str = r#"
schema: |
  type User { _id: ID, name: String, age: Int }
  type Post { _id: ID, title: String, author_id: ID }
database_uri: mongodb://localhost/app
jwt:
  secret: s3cret
types:
  User:
    collection: users
    cursor_field: age
    permissions:
      - expression: "jwt.role == 'admin'"
  Post:
    collection: posts
relations:
  - from: User
    to: Post
    relation_type: to_many
    where:
      author_id:
        eq: ${{ parent._id }}
  - from: Post
    to: User
    relation_type: to_one
    field: author
    where:
      _id:
        eq: ${{ parent.author_id }}
"#;

    fn parent(value: Value) -> Document {
        value.as_object().cloned().expect("object")
    }

    #[test]
    fn test_from_yaml_str() {
        let config = MongokeConfig::from_yaml_str(CONFIG).expect("config should parse");

        assert_eq!(config.types.len(), 2);
        assert_eq!(
            config.types.keys().collect::<Vec<_>>(),
            vec!["User", "Post"]
        );
        let user = &config.types["User"];
        assert!(user.exposed);
        assert_eq!(user.cursor_field(), "age");
        assert_eq!(user.permissions.len(), 1);
        assert_eq!(config.types["Post"].cursor_field(), "_id");
        assert_eq!(config.database_uri(), Some("mongodb://localhost/app"));
        assert_eq!(config.jwt.secret.as_deref(), Some("s3cret"));
        assert!(!config.jwt.required);
        assert_eq!(config.database.query_timeout(), QUERY_TIMEOUT);
        assert_eq!(config.database.connect_timeout(), CONNECT_TIMEOUT);
    }

    #[test]
    fn test_validate_accepts_consistent_config() {
        let config = MongokeConfig::from_yaml_str(CONFIG).expect("parse");
        let schema = config.validate().expect("config should validate");
        assert!(schema.contains("User"));
    }

    #[test]
    fn test_relation_field_names() {
        let config = MongokeConfig::from_yaml_str(CONFIG).expect("parse");
        assert_eq!(config.relations[0].field_name(), "PostNodes");
        assert_eq!(config.relations[1].field_name(), "author");

        let to_one = RelationConfig {
            field: None,
            ..config.relations[1].clone()
        };
        assert_eq!(to_one.field_name(), "user");
    }

    #[test]
    fn test_id_fields_by_collection() {
        let config = MongokeConfig::from_yaml_str(CONFIG).expect("parse");
        let schema = config.validate().expect("validate");
        let id_fields = config.id_fields(&schema);
        assert_eq!(
            id_fields.get("posts"),
            Some(&HashSet::from(["_id".to_string(), "author_id".to_string()]))
        );
        assert_eq!(id_fields.get("users"), Some(&HashSet::from(["_id".to_string()])));
    }

    #[test]
    fn test_missing_schema() {
        let config = MongokeConfig::from_yaml_str("types: {}").expect("parse");
        let err = config.validate().expect_err("no schema");
        assert!(matches!(err, ConfigError::MissingField { .. }));
    }

    #[test]
    fn test_exposed_type_needs_collection() {
        let config = MongokeConfig::from_yaml_str(
            "schema: 'type User { name: String }'\ntypes:\n  User:\n    exposed: true\n",
        )
        .expect("parse");
        let err = config.validate().expect_err("no collection");
        assert!(matches!(err, ConfigError::MissingField { ref field, .. } if field == "collection"));
    }

    #[test]
    fn test_hidden_type_needs_no_collection() {
        let config = MongokeConfig::from_yaml_str(
            "schema: 'type User { name: String }'\ntypes:\n  User:\n    exposed: false\n",
        )
        .expect("parse");
        assert!(config.validate().is_ok());
        assert_eq!(config.exposed_types().count(), 0);
    }

    #[test]
    fn test_unknown_type() {
        let config = MongokeConfig::from_yaml_str(
            "schema: 'type User { name: String }'\ntypes:\n  Ghost:\n    collection: ghosts\n",
        )
        .expect("parse");
        let err = config.validate().expect_err("unknown type");
        assert!(matches!(err, ConfigError::UnknownType { .. }));
    }

    #[test]
    fn test_invalid_guard_is_config_error() {
        let config = MongokeConfig::from_yaml_str(
            "schema: 'type User { name: String }'\ntypes:\n  User:\n    collection: users\n    permissions:\n      - expression: 'jwt.role =='\n",
        )
        .expect("parse");
        let err = config.validate().expect_err("bad guard");
        assert!(matches!(err, ConfigError::InvalidGuard { .. }));
    }

    #[test]
    fn test_unknown_cursor_field() {
        let config = MongokeConfig::from_yaml_str(
            "schema: 'type User { name: String }'\ntypes:\n  User:\n    collection: users\n    cursor_field: age\n",
        )
        .expect("parse");
        let err = config.validate().expect_err("bad cursor field");
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_invalid_relation_type_fails_parsing() {
        let err = MongokeConfig::from_yaml_str(
            "relations:\n  - from: A\n    to: B\n    relation_type: many_to_many\n",
        )
        .expect_err("bad relation type");
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn test_relation_to_hidden_type_rejected() {
        let config = MongokeConfig::from_yaml_str(
            "schema: 'type A { x: Int } type B { y: Int }'\ntypes:\n  A:\n    collection: a\nrelations:\n  - from: A\n    to: B\n    relation_type: to_one\n",
        )
        .expect("parse");
        let err = config.validate().expect_err("B is not exposed");
        assert!(matches!(err, ConfigError::UnknownType { ref type_name, .. } if type_name == "B"));
    }

    #[test]
    fn test_relation_where_unknown_field_rejected() {
        let config = MongokeConfig::from_yaml_str(
            &CONFIG.replace("      author_id:\n        eq:", "      no_such_field:\n        eq:"),
        )
        .expect("parse");
        let err = config.validate().expect_err("unknown field in relation where");
        assert!(
            matches!(err, ConfigError::InvalidValue { ref field, ref message, .. }
                if field == "relations.PostNodes.where" && message.contains("no_such_field"))
        );
    }

    #[test]
    fn test_relation_where_unknown_operator_rejected() {
        let config = MongokeConfig::from_yaml_str(&CONFIG.replace("        eq: ${{ parent._id }}", "        like: ${{ parent._id }}"))
            .expect("parse");
        let err = config.validate().expect_err("unsupported operator");
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_relation_where_placeholders_accept_any_operator() {
        let config = MongokeConfig::from_yaml_str(&CONFIG.replace(
            "        eq: ${{ parent.author_id }}",
            "        in: ${{ parent.author_id }}\n        neq: \"x-${{ parent._id }}\"",
        ))
        .expect("parse");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_required_jwt_needs_secret() {
        let config = MongokeConfig::from_yaml_str(
            "schema: 'type User { name: String }'\njwt:\n  required: true\ntypes:\n  User:\n    collection: users\n",
        )
        .expect("parse");
        let err = config.validate().expect_err("required without secret");
        assert!(matches!(err, ConfigError::MissingField { ref field, .. } if field == "jwt.secret"));
    }

    #[test]
    fn test_schema_path_relative_to_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("schema.graphql"), "type User { name: String }")
            .expect("write schema");
        let config_path = dir.path().join("mongoke.yml");
        let mut file = std::fs::File::create(&config_path).expect("create config");
        writeln!(file, "schema_path: schema.graphql\ntypes:\n  User:\n    collection: users")
            .expect("write config");

        let config = MongokeConfig::from_yaml_file(&config_path).expect("load");
        let schema = config.validate().expect("validate");
        assert!(schema.contains("User"));
    }

    #[test]
    fn test_missing_config_file() {
        let err = MongokeConfig::from_yaml_file("/definitely/not/here.yml").expect_err("missing");
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }

    #[test]
    fn test_render_whole_placeholder_keeps_type() {
        let parent = parent(json!({"_id": "u1", "age": 30, "address": {"city": "Rome"}}));
        let template = json!({"owner": {"eq": "${{ parent._id }}"}, "age": {"gt": "${{parent.age}}"}});
        assert_eq!(
            render_template(&template, &parent),
            json!({"owner": {"eq": "u1"}, "age": {"gt": 30}})
        );
        assert_eq!(
            render_template(&json!("${{ parent.address.city }}"), &parent),
            json!("Rome")
        );
        assert_eq!(render_template(&json!("${{ parent.missing }}"), &parent), Value::Null);
    }

    #[test]
    fn test_render_embedded_placeholders() {
        let parent = parent(json!({"first": "Ada", "n": 2, "tags": ["x", "y"]}));
        assert_eq!(
            render_template(&json!("${{ parent.first }}-${{ parent.n }}"), &parent),
            json!("Ada-2")
        );
        assert_eq!(
            render_template(&json!("tag ${{ parent.tags.1 }}"), &parent),
            json!("tag y")
        );
        assert_eq!(
            render_template(&json!("${{ other.x }} stays"), &parent),
            json!("${{ other.x }} stays")
        );
    }

    #[test]
    fn test_render_lists() {
        let parent = parent(json!({"ids": ["a", "b"]}));
        assert_eq!(
            render_template(&json!({"_id": {"in": "${{ parent.ids }}"}}), &parent),
            json!({"_id": {"in": ["a", "b"]}})
        );
    }
}
