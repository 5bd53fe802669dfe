//! Core GraphQL executor orchestration

use futures::future::join_all;
use graphql_parser::query::{
    Definition, Document, FragmentDefinition, OperationDefinition, Selection, Type,
    VariableDefinition, parse_query,
};
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use super::field_resolver;
use super::query_executor;
use super::utils;
use crate::core::error::{GraphQLError, MongokeError};
use crate::core::resolver::RequestContext;
use crate::server::host::ServerHost;

/// An entry of the response `errors` array
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldError {
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<Value>,
    pub extensions: Value,
}

impl FieldError {
    pub fn new(error: &MongokeError, path: Vec<Value>) -> Self {
        Self {
            message: error.to_string(),
            path,
            extensions: json!({ "code": error.error_code() }),
        }
    }
}

/// State of one operation being executed
pub struct Execution {
    pub host: Arc<ServerHost>,
    pub ctx: RequestContext,
    pub variables: Map<String, Value>,
    fragments: Fragments,
    errors: Mutex<Vec<FieldError>>,
}

impl Execution {
    pub fn fragment(&self, name: &str) -> Option<&FragmentDefinition<'static, String>> {
        self.fragments.get(name)
    }

    /// Record a field error; the field itself resolves to null
    pub fn record(&self, error: &MongokeError, path: Vec<Value>) {
        tracing::debug!(error = %error, path = ?path, "field failed");
        if let Ok(mut errors) = self.errors.lock() {
            errors.push(FieldError::new(error, path));
        }
    }

    fn take_errors(&self) -> Vec<FieldError> {
        self.errors
            .lock()
            .map(|mut errors| std::mem::take(&mut *errors))
            .unwrap_or_default()
    }
}

/// A GraphQL request as received over HTTP
#[derive(Debug, Clone, Default)]
pub struct ExecutionRequest {
    pub query: String,
    pub variables: Map<String, Value>,
    pub operation_name: Option<String>,
}

impl ExecutionRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn with_variables(mut self, variables: Map<String, Value>) -> Self {
        self.variables = variables;
        self
    }
}

/// GraphQL executor that resolves queries against the host's resolvers
pub struct GraphQLExecutor {
    host: Arc<ServerHost>,
}

impl GraphQLExecutor {
    pub fn new(host: Arc<ServerHost>) -> Self {
        Self { host }
    }

    /// Execute a request and return the response body
    ///
    /// Failures of individual fields are reported in `errors` next to the
    /// partial `data`; an `Err` means the request as a whole was rejected.
    pub async fn execute(
        &self,
        request: ExecutionRequest,
        ctx: RequestContext,
    ) -> Result<Value, MongokeError> {
        let document = parse_query::<String>(&request.query)
            .map_err(|e| GraphQLError::ParseError {
                message: e.to_string(),
            })?
            .into_static();

        let (selections, definitions) = select_operation(&document, request.operation_name.as_deref())?;
        let variables = with_defaults(definitions, request.variables);

        let fragments: Fragments = document
            .definitions
            .iter()
            .filter_map(|definition| match definition {
                Definition::Fragment(fragment) => Some((fragment.name.clone(), fragment.clone())),
                _ => None,
            })
            .collect();
        check_fragment_cycles(&fragments)?;
        check_variables(selections, definitions, &variables, &fragments)?;

        let exec = Execution {
            host: self.host.clone(),
            ctx,
            variables,
            fragments,
            errors: Mutex::new(Vec::new()),
        };

        let data = self.execute_query(&exec, selections).await;
        let errors = exec.take_errors();

        let mut response = Map::new();
        response.insert("data".to_string(), data);
        if !errors.is_empty() {
            response.insert(
                "errors".to_string(),
                serde_json::to_value(errors).unwrap_or(Value::Null),
            );
        }
        Ok(Value::Object(response))
    }

    /// Resolve sibling top-level fields concurrently
    async fn execute_query(&self, exec: &Execution, selections: &[Selection<'static, String>]) -> Value {
        let fields = field_resolver::collect_fields(exec, selections);
        let values = join_all(fields.iter().map(|field| async move {
            let key = utils::response_key(field);
            match query_executor::resolve_query_field(exec, field).await {
                Ok(value) => value,
                Err(e) => {
                    exec.record(&e, vec![json!(key)]);
                    Value::Null
                }
            }
        }))
        .await;

        let mut result = Map::new();
        for (field, value) in fields.iter().zip(values) {
            result.insert(utils::response_key(field), value);
        }
        Value::Object(result)
    }
}

type Fragments = HashMap<String, FragmentDefinition<'static, String>>;

type OperationParts<'d> = (
    &'d [Selection<'static, String>],
    &'d [VariableDefinition<'static, String>],
);

/// Pick the operation to run
fn select_operation<'d>(
    document: &'d Document<'static, String>,
    operation_name: Option<&str>,
) -> Result<OperationParts<'d>, GraphQLError> {
    let operations: Vec<&OperationDefinition<'static, String>> = document
        .definitions
        .iter()
        .filter_map(|definition| match definition {
            Definition::Operation(operation) => Some(operation),
            _ => None,
        })
        .collect();

    let operation = match operation_name {
        Some(wanted) => operations
            .iter()
            .find(|operation| operation_name_of(operation) == Some(wanted))
            .copied()
            .ok_or_else(|| GraphQLError::InvalidOperation {
                operation: wanted.to_string(),
                message: "no operation with this name in the document".to_string(),
            })?,
        None => match operations.as_slice() {
            [] => {
                return Err(GraphQLError::InvalidOperation {
                    operation: String::new(),
                    message: "No operation found in query".to_string(),
                });
            }
            [single] => *single,
            _ => {
                return Err(GraphQLError::InvalidOperation {
                    operation: String::new(),
                    message: "operationName is required when the document has several operations"
                        .to_string(),
                });
            }
        },
    };

    match operation {
        OperationDefinition::SelectionSet(set) => Ok((set.items.as_slice(), &[][..])),
        OperationDefinition::Query(query) => Ok((
            query.selection_set.items.as_slice(),
            query.variable_definitions.as_slice(),
        )),
        OperationDefinition::Mutation(_) => Err(GraphQLError::InvalidOperation {
            operation: "mutation".to_string(),
            message: "Mutations are not supported".to_string(),
        }),
        OperationDefinition::Subscription(_) => Err(GraphQLError::InvalidOperation {
            operation: "subscription".to_string(),
            message: "Subscriptions are not supported".to_string(),
        }),
    }
}

fn operation_name_of<'d>(operation: &'d OperationDefinition<'static, String>) -> Option<&'d str> {
    match operation {
        OperationDefinition::Query(query) => query.name.as_deref(),
        OperationDefinition::Mutation(mutation) => mutation.name.as_deref(),
        OperationDefinition::Subscription(subscription) => subscription.name.as_deref(),
        OperationDefinition::SelectionSet(_) => None,
    }
}

/// Fill unspecified variables from their declared defaults
fn with_defaults(
    definitions: &[VariableDefinition<'static, String>],
    mut variables: Map<String, Value>,
) -> Map<String, Value> {
    for definition in definitions {
        if variables.contains_key(&definition.name) {
            continue;
        }
        if let Some(default) = &definition.default_value {
            let value = utils::gql_value_to_json(default, &Map::new());
            variables.insert(definition.name.clone(), value);
        }
    }
    variables
}

/// Reject documents whose fragments spread themselves, directly or not
fn check_fragment_cycles(fragments: &Fragments) -> Result<(), GraphQLError> {
    let mut done = HashSet::new();
    for name in fragments.keys() {
        visit_fragment(fragments, name, &mut Vec::new(), &mut done)?;
    }
    Ok(())
}

fn visit_fragment<'f>(
    fragments: &'f Fragments,
    name: &'f str,
    stack: &mut Vec<&'f str>,
    done: &mut HashSet<&'f str>,
) -> Result<(), GraphQLError> {
    if done.contains(name) {
        return Ok(());
    }
    if stack.contains(&name) {
        return Err(GraphQLError::InvalidOperation {
            operation: String::new(),
            message: format!("fragment '{}' spreads itself", name),
        });
    }
    let Some(fragment) = fragments.get(name) else {
        return Ok(());
    };
    stack.push(name);
    for spread in utils::Usages::of(&fragment.selection_set.items).spreads {
        visit_fragment(fragments, spread, stack, done)?;
    }
    stack.pop();
    done.insert(name);
    Ok(())
}

/// Every variable used by the operation must be declared, and non-null
/// variables must have a value
fn check_variables<'a>(
    selections: &'a [Selection<'static, String>],
    definitions: &[VariableDefinition<'static, String>],
    variables: &Map<String, Value>,
    fragments: &'a Fragments,
) -> Result<(), GraphQLError> {
    for definition in definitions {
        let missing = variables.get(&definition.name).is_none_or(Value::is_null);
        if missing && matches!(definition.var_type, Type::NonNullType(_)) {
            return Err(GraphQLError::MissingVariable {
                name: definition.name.clone(),
            });
        }
    }

    let mut used = Vec::new();
    let mut visited = HashSet::new();
    let mut pending = vec![selections];
    while let Some(items) = pending.pop() {
        let usages = utils::Usages::of(items);
        used.extend(usages.variables);
        for spread in usages.spreads {
            if visited.insert(spread) {
                if let Some(fragment) = fragments.get(spread) {
                    pending.push(fragment.selection_set.items.as_slice());
                }
            }
        }
    }

    match used
        .into_iter()
        .find(|name| !definitions.iter().any(|definition| definition.name == *name))
    {
        Some(name) => Err(GraphQLError::MissingVariable {
            name: name.to_string(),
        }),
        None => Ok(()),
    }
}
