//! Field projection and relation resolution

use futures::future::{BoxFuture, FutureExt, join_all};
use graphql_parser::query::{Field, Selection};
use serde_json::{Map, Value, json};

use super::core::Execution;
use super::utils;
use crate::config::{RelationConfig, RelationType};
use crate::core::error::{ConfigError, MongokeError};
use crate::core::filter::compile_where;
use crate::core::pagination::Connection;
use crate::core::store::Document;

/// Flatten a selection set, expanding fragments and applying directives
pub fn collect_fields<'a>(
    exec: &'a Execution,
    selections: &'a [Selection<'static, String>],
) -> Vec<&'a Field<'static, String>> {
    let mut fields = Vec::new();
    for selection in selections {
        match selection {
            Selection::Field(field) => {
                if utils::should_include(&field.directives, &exec.variables) {
                    fields.push(field);
                }
            }
            Selection::InlineFragment(fragment) => {
                if utils::should_include(&fragment.directives, &exec.variables) {
                    fields.extend(collect_fields(exec, &fragment.selection_set.items));
                }
            }
            Selection::FragmentSpread(spread) => {
                if !utils::should_include(&spread.directives, &exec.variables) {
                    continue;
                }
                if let Some(fragment) = exec.fragment(&spread.fragment_name) {
                    fields.extend(collect_fields(exec, &fragment.selection_set.items));
                }
            }
        }
    }
    fields
}

fn child_path(path: &[Value], segment: Value) -> Vec<Value> {
    let mut child = path.to_vec();
    child.push(segment);
    child
}

/// Project a plain value (embedded objects and lists) onto a selection set
fn project_value(exec: &Execution, value: &Value, selections: &[Selection<'static, String>]) -> Value {
    if selections.is_empty() {
        return value.clone();
    }
    match value {
        Value::Object(map) => {
            let mut result = Map::new();
            for field in collect_fields(exec, selections) {
                let projected = map
                    .get(&field.name)
                    .map(|v| project_value(exec, v, &field.selection_set.items))
                    .unwrap_or(Value::Null);
                result.insert(utils::response_key(field), projected);
            }
            Value::Object(result)
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| project_value(exec, item, selections))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Resolve the selected fields of one document of `type_name`
pub fn resolve_node<'a>(
    exec: &'a Execution,
    type_name: &'a str,
    document: &'a Document,
    selections: &'a [Selection<'static, String>],
    path: Vec<Value>,
) -> BoxFuture<'a, Value> {
    async move {
        let fields = collect_fields(exec, selections);
        let values = join_all(fields.iter().map(|field| {
            let path = child_path(&path, json!(utils::response_key(field)));
            async move {
                if field.name == "__typename" {
                    return json!(type_name);
                }
                if let Some(relation) = exec.host.relation(type_name, &field.name) {
                    return match resolve_relation(exec, relation, document, field, path.clone()).await {
                        Ok(value) => value,
                        Err(e) => {
                            exec.record(&e, path);
                            Value::Null
                        }
                    };
                }
                document
                    .get(&field.name)
                    .map(|value| project_value(exec, value, &field.selection_set.items))
                    .unwrap_or(Value::Null)
            }
        }))
        .await;

        let mut result = Map::new();
        for (field, value) in fields.iter().zip(values) {
            result.insert(utils::response_key(field), value);
        }
        Value::Object(result)
    }
    .boxed()
}

/// Resolve the selected fields of a connection of `type_name`
pub fn resolve_connection<'a>(
    exec: &'a Execution,
    type_name: &'a str,
    connection: &'a Connection,
    selections: &'a [Selection<'static, String>],
    path: Vec<Value>,
) -> BoxFuture<'a, Value> {
    async move {
        let mut result = Map::new();
        for field in collect_fields(exec, selections) {
            let key = utils::response_key(field);
            let field_path = child_path(&path, json!(key));
            let value = match field.name.as_str() {
                "__typename" => json!(format!("{}Connection", type_name)),
                "nodes" => Value::Array(
                    join_all(connection.nodes().enumerate().map(|(i, node)| {
                        resolve_node(
                            exec,
                            type_name,
                            node,
                            &field.selection_set.items,
                            child_path(&field_path, json!(i)),
                        )
                    }))
                    .await,
                ),
                "edges" => Value::Array(
                    join_all(connection.edges.iter().enumerate().map(|(i, edge)| {
                        let edge_path = child_path(&field_path, json!(i));
                        async move {
                            let mut projected = Map::new();
                            for edge_field in collect_fields(exec, &field.selection_set.items) {
                                let edge_key = utils::response_key(edge_field);
                                let value = match edge_field.name.as_str() {
                                    "__typename" => json!(format!("{}Edge", type_name)),
                                    "cursor" => json!(edge.cursor),
                                    "node" => {
                                        resolve_node(
                                            exec,
                                            type_name,
                                            &edge.node,
                                            &edge_field.selection_set.items,
                                            child_path(&edge_path, json!(edge_key)),
                                        )
                                        .await
                                    }
                                    _ => Value::Null,
                                };
                                projected.insert(edge_key, value);
                            }
                            Value::Object(projected)
                        }
                    }))
                    .await,
                ),
                "pageInfo" => {
                    let info = serde_json::to_value(&connection.page_info).unwrap_or(Value::Null);
                    let mut info = project_value(exec, &info, &field.selection_set.items);
                    if let Value::Object(map) = &mut info {
                        for page_field in collect_fields(exec, &field.selection_set.items) {
                            if page_field.name == "__typename" {
                                map.insert(utils::response_key(page_field), json!("PageInfo"));
                            }
                        }
                    }
                    info
                }
                _ => Value::Null,
            };
            result.insert(key, value);
        }
        Value::Object(result)
    }
    .boxed()
}

/// Resolve a relation field of `parent` through the target type's resolver
async fn resolve_relation(
    exec: &Execution,
    relation: &RelationConfig,
    parent: &Document,
    field: &Field<'static, String>,
    path: Vec<Value>,
) -> Result<Value, MongokeError> {
    let resolver = exec.host.resolver(&relation.to).ok_or_else(|| {
        MongokeError::Config(ConfigError::UnknownType {
            type_name: relation.to.clone(),
            context: "relations.to".to_string(),
        })
    })?;
    let base = compile_where(&relation.render_where(parent), resolver.descriptor())?;
    let args = utils::field_arguments(field, &exec.variables);

    tracing::debug!(
        from = %relation.from,
        to = %relation.to,
        field = %field.name,
        "resolving relation"
    );

    match relation.relation_type {
        RelationType::ToOne => {
            let document = resolver.resolve_one_within(&exec.ctx, &args, base).await?;
            Ok(match document {
                Some(document) => {
                    resolve_node(exec, &relation.to, &document, &field.selection_set.items, path).await
                }
                None => Value::Null,
            })
        }
        RelationType::ToMany => {
            let connection = resolver.resolve_many_within(&exec.ctx, &args, base).await?;
            Ok(resolve_connection(exec, &relation.to, &connection, &field.selection_set.items, path).await)
        }
    }
}
