//! GraphQL API exposure
//!
//! Routes, request decoding and bearer authentication in front of the
//! executor. The executor and the SDL generator only see the host.

mod executor;
mod schema_generator;

pub use executor::{ExecutionRequest, FieldError, GraphQLExecutor};
pub use schema_generator::SchemaGenerator;

use crate::core::claims::{Claims, bearer_token, extract_claims};
use crate::core::error::{MongokeError, RequestError};
use crate::core::resolver::RequestContext;
use crate::server::host::ServerHost;
use anyhow::Result;
use async_graphql::http::{GraphQLPlaygroundConfig, playground_source};
use axum::{
    Router,
    extract::{Extension, Json as AxumJson, rejection::JsonRejection},
    http::{HeaderMap, header},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct GraphQLRequestBody {
    query: String,
    #[serde(default)]
    variables: Option<Map<String, Value>>,
    #[serde(default, rename = "operationName", alias = "operation_name")]
    operation_name: Option<String>,
}

/// GraphQL API exposure implementation
pub struct GraphQLExposure;

impl GraphQLExposure {
    /// Build the GraphQL router from a host
    ///
    /// Returns a router with:
    /// - `POST /graphql`: query endpoint
    /// - `GET /graphql/playground`: playground UI
    /// - `GET /graphql/schema`: derived SDL
    /// - `GET /health` and `GET /healthz`
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let host = builder.build_host()?;
    /// let app = GraphQLExposure::build_router(Arc::new(host))?;
    /// ```
    pub fn build_router(host: Arc<ServerHost>) -> Result<Router> {
        let router = Router::new()
            .route("/graphql", post(graphql_handler))
            .route("/graphql/playground", get(graphql_playground))
            .route("/graphql/schema", get(graphql_schema))
            .route("/health", get(health_check))
            .route("/healthz", get(health_check))
            .layer(Extension(host));

        Ok(router)
    }
}

/// Claims of the caller, from the `Authorization` header
fn authenticate(host: &ServerHost, headers: &HeaderMap) -> Result<Claims, MongokeError> {
    let jwt = host.jwt();
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(bearer_token);

    match (token, jwt.secret.as_deref()) {
        (None, _) if jwt.required => Err(RequestError::Unauthorized {
            message: "missing bearer token".to_string(),
        }
        .into()),
        (None, _) => Ok(Claims::default()),
        (Some(token), Some(secret)) => extract_claims(token, secret).map_err(|e| {
            tracing::warn!(error = %e, "rejected bearer token");
            RequestError::Unauthorized {
                message: format!("invalid token: {}", e),
            }
            .into()
        }),
        (Some(_), None) => {
            tracing::debug!("no jwt secret configured, ignoring bearer token");
            Ok(Claims::default())
        }
    }
}

/// Handler for GraphQL queries
async fn graphql_handler(
    Extension(host): Extension<Arc<ServerHost>>,
    headers: HeaderMap,
    body: Result<AxumJson<GraphQLRequestBody>, JsonRejection>,
) -> Response {
    let AxumJson(body) = match body {
        Ok(body) => body,
        Err(rejection) => {
            return MongokeError::from(RequestError::InvalidBody {
                message: rejection.body_text(),
            })
            .into_response();
        }
    };

    let claims = match authenticate(&host, &headers) {
        Ok(claims) => claims,
        Err(e) => return e.into_response(),
    };

    let request = ExecutionRequest {
        query: body.query,
        variables: body.variables.unwrap_or_default(),
        operation_name: body.operation_name,
    };

    match GraphQLExecutor::new(host)
        .execute(request, RequestContext::new(claims))
        .await
    {
        Ok(response) => AxumJson(response).into_response(),
        Err(e) => {
            tracing::debug!(error = %e, "request rejected");
            AxumJson(json!({
                "errors": [{
                    "message": e.to_string(),
                    "extensions": { "code": e.error_code() }
                }]
            }))
            .into_response()
        }
    }
}

/// Handler for GraphQL playground UI
async fn graphql_playground() -> impl IntoResponse {
    Html(playground_source(GraphQLPlaygroundConfig::new("/graphql")))
}

/// Handler for the derived schema SDL
async fn graphql_schema(Extension(host): Extension<Arc<ServerHost>>) -> impl IntoResponse {
    let sdl = SchemaGenerator::new(host).generate_sdl();
    ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], sdl)
}

async fn health_check(Extension(host): Extension<Arc<ServerHost>>) -> AxumJson<Value> {
    AxumJson(json!({
        "status": if host.is_ready() { "ok" } else { "degraded" },
        "service": "mongoke",
        "types": host.exposed_types(),
    }))
}
