//! Top-level query field resolution

use graphql_parser::query::Field;
use serde_json::{Value, json};

use super::core::Execution;
use super::field_resolver;
use super::utils;
use crate::core::error::{GraphQLError, MongokeError};
use crate::server::host::FieldKind;

/// Resolve one field of the `Query` root type
pub async fn resolve_query_field(
    exec: &Execution,
    field: &Field<'static, String>,
) -> Result<Value, MongokeError> {
    if field.name == "__typename" {
        return Ok(json!("Query"));
    }

    let query_field = exec
        .host
        .query_field(&field.name)
        .ok_or_else(|| GraphQLError::UnknownField {
            field: field.name.clone(),
        })?;
    let resolver = exec
        .host
        .resolver(&query_field.type_name)
        .ok_or_else(|| MongokeError::Internal(format!("no resolver for {}", query_field.type_name)))?;

    let args = utils::field_arguments(field, &exec.variables);
    let path = vec![json!(utils::response_key(field))];
    let selections = &field.selection_set.items;

    match query_field.kind {
        FieldKind::Single => match resolver.resolve_one(&exec.ctx, &args).await? {
            Some(document) => Ok(field_resolver::resolve_node(
                exec,
                resolver.type_name(),
                &document,
                selections,
                path,
            )
            .await),
            None => Ok(Value::Null),
        },
        FieldKind::Connection => {
            let connection = resolver.resolve_many(&exec.ctx, &args).await?;
            Ok(field_resolver::resolve_connection(
                exec,
                resolver.type_name(),
                &connection,
                selections,
                path,
            )
            .await)
        }
    }
}
