//! Typed error handling for mongoke
//!
//! Every failure in the query resolution pipeline is classified so that the
//! GraphQL layer can report it per field and the HTTP layer can map it to a
//! status code.
//!
//! # Error Categories
//!
//! - [`ArgumentError`]: conflicting or malformed field arguments (filter or pagination)
//! - [`AuthorizationError`]: guard denial on a singular field
//! - [`StorageError`]: failures reported by the document store, including deadlines
//! - [`ConfigError`]: malformed configuration or schema text, fatal at startup
//! - [`GraphQLError`]: query document errors
//! - [`RequestError`]: HTTP/request level errors (bearer tokens)
//!
//! # Example
//!
//! ```rust,ignore
//! match resolver.resolve_one(&ctx, &args).await {
//!     Ok(Some(doc)) => println!("found {:?}", doc),
//!     Ok(None) => println!("no match"),
//!     Err(MongokeError::Authorization(e)) => println!("forbidden: {}", e),
//!     Err(e) => eprintln!("{} ({})", e, e.error_code()),
//! }
//! ```

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// The main error type for mongoke
#[derive(Debug)]
pub enum MongokeError {
    /// Invalid field arguments
    Argument(ArgumentError),

    /// Guard denial on a singular field
    Authorization(AuthorizationError),

    /// Storage backend errors
    Storage(StorageError),

    /// Configuration errors
    Config(ConfigError),

    /// GraphQL document errors
    GraphQL(GraphQLError),

    /// HTTP/Request errors
    Request(RequestError),

    /// Internal errors (should not happen in normal operation)
    Internal(String),
}

impl fmt::Display for MongokeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MongokeError::Argument(e) => write!(f, "{}", e),
            MongokeError::Authorization(e) => write!(f, "{}", e),
            MongokeError::Storage(e) => write!(f, "{}", e),
            MongokeError::Config(e) => write!(f, "{}", e),
            MongokeError::GraphQL(e) => write!(f, "{}", e),
            MongokeError::Request(e) => write!(f, "{}", e),
            MongokeError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for MongokeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MongokeError::Argument(e) => Some(e),
            MongokeError::Authorization(e) => Some(e),
            MongokeError::Storage(e) => Some(e),
            MongokeError::Config(e) => Some(e),
            MongokeError::GraphQL(e) => Some(e),
            MongokeError::Request(e) => Some(e),
            MongokeError::Internal(_) => None,
        }
    }
}

/// Error response structure for HTTP responses
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling
    pub code: String,
    /// Human-readable error message
    pub message: String,
}

impl MongokeError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            MongokeError::Argument(_) => StatusCode::BAD_REQUEST,
            MongokeError::Authorization(_) => StatusCode::FORBIDDEN,
            MongokeError::Storage(e) => e.status_code(),
            MongokeError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            MongokeError::GraphQL(_) => StatusCode::BAD_REQUEST,
            MongokeError::Request(e) => e.status_code(),
            MongokeError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            MongokeError::Argument(e) => e.error_code(),
            MongokeError::Authorization(_) => "FORBIDDEN",
            MongokeError::Storage(e) => e.error_code(),
            MongokeError::Config(_) => "CONFIG_ERROR",
            MongokeError::GraphQL(e) => e.error_code(),
            MongokeError::Request(e) => e.error_code(),
            MongokeError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Convert to an error response
    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            code: self.error_code().to_string(),
            message: self.to_string(),
        }
    }
}

impl IntoResponse for MongokeError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(self.to_response());
        (status, body).into_response()
    }
}

// =============================================================================
// Argument Errors
// =============================================================================

/// Errors raised while binding and compiling field arguments
#[derive(Debug, Clone, PartialEq)]
pub enum ArgumentError {
    /// `first` and `last` were both given
    ConflictingCounts,

    /// `after` without `first` and without `before`
    AfterWithoutFirstOrBefore,

    /// `before` without `last` and without `after`
    BeforeWithoutLastOrAfter,

    /// A negative page size
    NegativeCount { argument: String, value: i64 },

    /// Field is not declared on the type
    UnknownField { type_name: String, field: String },

    /// Operator is not supported by the filter compiler
    UnsupportedOperator { field: String, operator: String },

    /// The argument is not accepted by this field
    UnknownArgument { argument: String },

    /// The argument value has the wrong shape
    InvalidValue { argument: String, message: String },

    /// The cursor cannot be read as a value of the cursor field's type
    InvalidCursor { cursor: String, cursor_field: String },
}

impl fmt::Display for ArgumentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgumentError::ConflictingCounts => {
                write!(f, "cannot use `first` and `last` together")
            }
            ArgumentError::AfterWithoutFirstOrBefore => {
                write!(f, "need `first` or `before` if using `after`")
            }
            ArgumentError::BeforeWithoutLastOrAfter => {
                write!(f, "need `last` or `after` if using `before`")
            }
            ArgumentError::NegativeCount { argument, value } => {
                write!(f, "`{}` must be non-negative, got {}", argument, value)
            }
            ArgumentError::UnknownField { type_name, field } => {
                write!(f, "Unknown field '{}' on type '{}'", field, type_name)
            }
            ArgumentError::UnsupportedOperator { field, operator } => {
                write!(
                    f,
                    "Unsupported operator '{}' for field '{}'",
                    operator, field
                )
            }
            ArgumentError::UnknownArgument { argument } => {
                write!(f, "Unknown argument '{}'", argument)
            }
            ArgumentError::InvalidValue { argument, message } => {
                write!(f, "Invalid value for '{}': {}", argument, message)
            }
            ArgumentError::InvalidCursor {
                cursor,
                cursor_field,
            } => {
                write!(
                    f,
                    "Invalid cursor '{}' for cursor field '{}'",
                    cursor, cursor_field
                )
            }
        }
    }
}

impl std::error::Error for ArgumentError {}

impl ArgumentError {
    pub fn error_code(&self) -> &'static str {
        match self {
            ArgumentError::ConflictingCounts
            | ArgumentError::AfterWithoutFirstOrBefore
            | ArgumentError::BeforeWithoutLastOrAfter
            | ArgumentError::NegativeCount { .. } => "INVALID_PAGINATION",
            ArgumentError::UnknownField { .. } => "UNKNOWN_FIELD",
            ArgumentError::UnsupportedOperator { .. } => "UNSUPPORTED_OPERATOR",
            ArgumentError::UnknownArgument { .. } => "UNKNOWN_ARGUMENT",
            ArgumentError::InvalidValue { .. } => "INVALID_ARGUMENT",
            ArgumentError::InvalidCursor { .. } => "INVALID_CURSOR",
        }
    }
}

impl From<ArgumentError> for MongokeError {
    fn from(err: ArgumentError) -> Self {
        MongokeError::Argument(err)
    }
}

// =============================================================================
// Authorization Errors
// =============================================================================

/// Guard denial on a singular field
#[derive(Debug, Clone, PartialEq)]
pub enum AuthorizationError {
    /// A permission guard of the type evaluated to false
    Denied { type_name: String },
}

impl fmt::Display for AuthorizationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthorizationError::Denied { type_name } => {
                write!(f, "Not authorized to access type '{}'", type_name)
            }
        }
    }
}

impl std::error::Error for AuthorizationError {}

impl From<AuthorizationError> for MongokeError {
    fn from(err: AuthorizationError) -> Self {
        MongokeError::Authorization(err)
    }
}

// =============================================================================
// Storage Errors
// =============================================================================

/// Errors related to storage backends
#[derive(Debug, Clone)]
pub enum StorageError {
    /// Connection error
    ConnectionError { backend: String, message: String },

    /// Query execution error
    QueryError { backend: String, message: String },

    /// The operation did not complete before its deadline
    DeadlineExceeded { operation: String, timeout: Duration },
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::ConnectionError { backend, message } => {
                write!(f, "Failed to connect to {}: {}", backend, message)
            }
            StorageError::QueryError { backend, message } => {
                write!(f, "{} query error: {}", backend, message)
            }
            StorageError::DeadlineExceeded { operation, timeout } => {
                write!(
                    f,
                    "{} did not complete within {}ms",
                    operation,
                    timeout.as_millis()
                )
            }
        }
    }
}

impl std::error::Error for StorageError {}

impl StorageError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            StorageError::DeadlineExceeded { .. } => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            StorageError::ConnectionError { .. } => "STORAGE_CONNECTION_ERROR",
            StorageError::QueryError { .. } => "STORAGE_QUERY_ERROR",
            StorageError::DeadlineExceeded { .. } => "DEADLINE_EXCEEDED",
        }
    }
}

impl From<StorageError> for MongokeError {
    fn from(err: StorageError) -> Self {
        MongokeError::Storage(err)
    }
}

// =============================================================================
// Config Errors
// =============================================================================

/// Errors related to configuration and schema assembly
#[derive(Debug, Clone)]
pub enum ConfigError {
    /// Failed to parse configuration file
    ParseError {
        file: Option<String>,
        message: String,
    },

    /// Missing required field in configuration
    MissingField { field: String, context: String },

    /// Invalid value in configuration
    InvalidValue {
        field: String,
        value: String,
        message: String,
    },

    /// A type or relation references a type absent from the schema
    UnknownType { type_name: String, context: String },

    /// A permission expression failed to parse
    InvalidGuard {
        type_name: String,
        expression: String,
        message: String,
    },

    /// The schema definition text is malformed
    InvalidSchema { message: String },

    /// Configuration file not found
    FileNotFound { path: String },

    /// IO error while reading configuration
    IoError { message: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ParseError { file, message } => {
                if let Some(file) = file {
                    write!(f, "Failed to parse config file '{}': {}", file, message)
                } else {
                    write!(f, "Failed to parse config: {}", message)
                }
            }
            ConfigError::MissingField { field, context } => {
                write!(f, "Missing required field '{}' in {}", field, context)
            }
            ConfigError::InvalidValue {
                field,
                value,
                message,
            } => {
                write!(
                    f,
                    "Invalid value '{}' for field '{}': {}",
                    value, field, message
                )
            }
            ConfigError::UnknownType { type_name, context } => {
                write!(f, "Unknown type '{}' in {}", type_name, context)
            }
            ConfigError::InvalidGuard {
                type_name,
                expression,
                message,
            } => {
                write!(
                    f,
                    "Invalid permission expression '{}' on type '{}': {}",
                    expression, type_name, message
                )
            }
            ConfigError::InvalidSchema { message } => {
                write!(f, "Invalid schema: {}", message)
            }
            ConfigError::FileNotFound { path } => {
                write!(f, "Configuration file not found: {}", path)
            }
            ConfigError::IoError { message } => {
                write!(f, "IO error: {}", message)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for MongokeError {
    fn from(err: ConfigError) -> Self {
        MongokeError::Config(err)
    }
}

// =============================================================================
// GraphQL Errors
// =============================================================================

/// Errors related to GraphQL documents
#[derive(Debug, Clone)]
pub enum GraphQLError {
    /// Query parsing error
    ParseError { message: String },

    /// Invalid operation
    InvalidOperation { operation: String, message: String },

    /// A root field that the derived schema does not expose
    UnknownField { field: String },

    /// A variable used but not declared, or a required one without a value
    MissingVariable { name: String },
}

impl fmt::Display for GraphQLError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphQLError::ParseError { message } => {
                write!(f, "Failed to parse query: {}", message)
            }
            GraphQLError::InvalidOperation { operation, message } => {
                write!(f, "Invalid GraphQL operation '{}': {}", operation, message)
            }
            GraphQLError::UnknownField { field } => {
                write!(f, "Unknown query field: {}", field)
            }
            GraphQLError::MissingVariable { name } => {
                write!(f, "Variable '${}' is not declared or has no value", name)
            }
        }
    }
}

impl std::error::Error for GraphQLError {}

impl GraphQLError {
    pub fn error_code(&self) -> &'static str {
        match self {
            GraphQLError::ParseError { .. } => "GRAPHQL_PARSE_ERROR",
            GraphQLError::InvalidOperation { .. } => "GRAPHQL_INVALID_OPERATION",
            GraphQLError::UnknownField { .. } => "GRAPHQL_UNKNOWN_FIELD",
            GraphQLError::MissingVariable { .. } => "GRAPHQL_MISSING_VARIABLE",
        }
    }
}

impl From<GraphQLError> for MongokeError {
    fn from(err: GraphQLError) -> Self {
        MongokeError::GraphQL(err)
    }
}

// =============================================================================
// Request Errors
// =============================================================================

/// Errors related to HTTP requests
#[derive(Debug, Clone)]
pub enum RequestError {
    /// Missing or unusable bearer token
    Unauthorized { message: String },

    /// Invalid request body
    InvalidBody { message: String },
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestError::Unauthorized { message } => {
                write!(f, "Unauthorized: {}", message)
            }
            RequestError::InvalidBody { message } => {
                write!(f, "Invalid request body: {}", message)
            }
        }
    }
}

impl std::error::Error for RequestError {}

impl RequestError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            RequestError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            RequestError::InvalidBody { .. } => StatusCode::BAD_REQUEST,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            RequestError::Unauthorized { .. } => "UNAUTHORIZED",
            RequestError::InvalidBody { .. } => "INVALID_BODY",
        }
    }
}

impl From<RequestError> for MongokeError {
    fn from(err: RequestError) -> Self {
        MongokeError::Request(err)
    }
}

// =============================================================================
// Conversions from external errors
// =============================================================================

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError {
            message: err.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::ParseError {
            file: None,
            message: err.to_string(),
        }
    }
}

/// Result type alias using MongokeError
pub type MongokeResult<T> = std::result::Result<T, MongokeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_messages_match_wire_format() {
        assert_eq!(
            ArgumentError::AfterWithoutFirstOrBefore.to_string(),
            "need `first` or `before` if using `after`"
        );
        assert_eq!(
            ArgumentError::BeforeWithoutLastOrAfter.to_string(),
            "need `last` or `after` if using `before`"
        );
    }

    #[test]
    fn test_status_codes() {
        let err = MongokeError::from(ArgumentError::ConflictingCounts);
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);

        let err = MongokeError::from(AuthorizationError::Denied {
            type_name: "User".to_string(),
        });
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);

        let err = MongokeError::from(StorageError::DeadlineExceeded {
            operation: "find_one".to_string(),
            timeout: Duration::from_secs(10),
        });
        assert_eq!(err.status_code(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(err.error_code(), "DEADLINE_EXCEEDED");

        let err = MongokeError::from(RequestError::Unauthorized {
            message: "bad signature".to_string(),
        });
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_error_source_chain() {
        use std::error::Error;

        let err = MongokeError::from(ConfigError::MissingField {
            field: "collection".to_string(),
            context: "types.User".to_string(),
        });
        assert!(err.source().is_some());
        assert_eq!(
            err.to_string(),
            "Missing required field 'collection' in types.User"
        );
        assert!(MongokeError::Internal("boom".into()).source().is_none());
    }

    #[test]
    fn test_to_response() {
        let err = MongokeError::from(ArgumentError::UnknownField {
            type_name: "User".to_string(),
            field: "nope".to_string(),
        });
        let resp = err.to_response();
        assert_eq!(resp.code, "UNKNOWN_FIELD");
        assert_eq!(resp.message, "Unknown field 'nope' on type 'User'");
    }
}
