//! Typed binding of field arguments
//!
//! Arguments arrive as a JSON object with variables already substituted.
//! Each field kind has a fixed set of argument names; anything else is
//! rejected rather than ignored.

use crate::core::error::ArgumentError;
use crate::core::filter::{Filter, compile_where};
use crate::core::pagination::{Direction, PaginationRequest};
use crate::core::schema::TypeDescriptor;
use serde_json::{Map, Value};

/// Arguments accepted by a singular field
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SingularArguments {
    pub where_: Value,
}

impl SingularArguments {
    pub fn bind(args: &Map<String, Value>) -> Result<Self, ArgumentError> {
        let mut bound = Self::default();
        for (name, value) in args {
            match name.as_str() {
                "where" => bound.where_ = value.clone(),
                _ => return Err(unknown(name)),
            }
        }
        Ok(bound)
    }

    pub fn compile(&self, descriptor: &TypeDescriptor) -> Result<Filter, ArgumentError> {
        compile_where(&self.where_, descriptor)
    }
}

/// Arguments accepted by a plural (connection) field
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionArguments {
    pub where_: Value,
    pub first: Option<u32>,
    pub last: Option<u32>,
    pub after: Option<String>,
    pub before: Option<String>,
    pub direction: Option<Direction>,
    pub cursor_field: Option<String>,
}

impl ConnectionArguments {
    pub fn bind(args: &Map<String, Value>) -> Result<Self, ArgumentError> {
        let mut bound = Self::default();
        for (name, value) in args {
            match name.as_str() {
                "where" => bound.where_ = value.clone(),
                "first" => bound.first = count(name, value)?,
                "last" => bound.last = count(name, value)?,
                "after" => bound.after = cursor(name, value)?,
                "before" => bound.before = cursor(name, value)?,
                "direction" => bound.direction = direction(value)?,
                "cursorField" => bound.cursor_field = string(name, value)?,
                _ => return Err(unknown(name)),
            }
        }
        Ok(bound)
    }

    /// Produce the filter and the validated pagination request
    pub fn compile(
        &self,
        descriptor: &TypeDescriptor,
        default_cursor_field: &str,
    ) -> Result<(Filter, PaginationRequest), ArgumentError> {
        let cursor_field = self
            .cursor_field
            .clone()
            .unwrap_or_else(|| default_cursor_field.to_string());
        if !descriptor.has_field(&cursor_field) {
            return Err(ArgumentError::UnknownField {
                type_name: descriptor.name.clone(),
                field: cursor_field,
            });
        }

        let request = PaginationRequest {
            first: self.first,
            last: self.last,
            after: self.after.clone(),
            before: self.before.clone(),
            direction: self.direction.unwrap_or_default(),
            cursor_field,
        };
        request.validate()?;

        let filter = compile_where(&self.where_, descriptor)?;
        Ok((filter, request))
    }
}

/// Bind and compile the arguments of a singular field
pub fn compile_singular(
    args: &Map<String, Value>,
    descriptor: &TypeDescriptor,
) -> Result<Filter, ArgumentError> {
    SingularArguments::bind(args)?.compile(descriptor)
}

/// Bind and compile the arguments of a plural field
pub fn compile_connection(
    args: &Map<String, Value>,
    descriptor: &TypeDescriptor,
    default_cursor_field: &str,
) -> Result<(Filter, PaginationRequest), ArgumentError> {
    ConnectionArguments::bind(args)?.compile(descriptor, default_cursor_field)
}

fn unknown(name: &str) -> ArgumentError {
    ArgumentError::UnknownArgument {
        argument: name.to_string(),
    }
}

fn invalid(name: &str, message: impl Into<String>) -> ArgumentError {
    ArgumentError::InvalidValue {
        argument: name.to_string(),
        message: message.into(),
    }
}

/// A page count; zero and null mean "not given"
fn count(name: &str, value: &Value) -> Result<Option<u32>, ArgumentError> {
    let n = match value {
        Value::Null => return Ok(None),
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| invalid(name, format!("expected an integer, got {}", n)))?,
        other => return Err(invalid(name, format!("expected an integer, got {}", other))),
    };
    if n < 0 {
        return Err(ArgumentError::NegativeCount {
            argument: name.to_string(),
            value: n,
        });
    }
    let n = u32::try_from(n).unwrap_or(u32::MAX);
    Ok((n != 0).then_some(n))
}

fn string(name: &str, value: &Value) -> Result<Option<String>, ArgumentError> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        other => Err(invalid(name, format!("expected a string, got {}", other))),
    }
}

/// Cursors are opaque strings, numbers are accepted for convenience
fn cursor(name: &str, value: &Value) -> Result<Option<String>, ArgumentError> {
    match value {
        Value::Number(n) => Ok(Some(n.to_string())),
        other => string(name, other),
    }
}

fn direction(value: &Value) -> Result<Option<Direction>, ArgumentError> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Direction::parse(&s.to_ascii_uppercase())
            .map(Some)
            .ok_or_else(|| invalid("direction", format!("expected ASC or DESC, got {}", s))),
        other => Err(invalid(
            "direction",
            format!("expected ASC or DESC, got {}", other),
        )),
    }
}
