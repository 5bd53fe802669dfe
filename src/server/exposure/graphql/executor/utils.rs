//! Utility functions for GraphQL execution

use graphql_parser::query::{Directive, Field, Selection, Value as GqlValue};
use serde_json::{Map, Number, Value, json};

/// Convert a GraphQL value to JSON, substituting variables
pub fn gql_value_to_json(value: &GqlValue<'static, String>, variables: &Map<String, Value>) -> Value {
    match value {
        GqlValue::Null => Value::Null,
        GqlValue::Int(i) => json!(i.as_i64().unwrap_or(0)),
        GqlValue::Float(f) => Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
        GqlValue::String(s) => json!(s),
        GqlValue::Boolean(b) => json!(b),
        GqlValue::Enum(e) => json!(e),
        GqlValue::List(list) => Value::Array(
            list.iter()
                .map(|item| gql_value_to_json(item, variables))
                .collect(),
        ),
        GqlValue::Object(obj) => Value::Object(
            obj.iter()
                .map(|(k, v)| (k.clone(), gql_value_to_json(v, variables)))
                .collect(),
        ),
        GqlValue::Variable(name) => variables.get(name).cloned().unwrap_or(Value::Null),
    }
}

/// All arguments of a field as a JSON object
pub fn field_arguments(field: &Field<'static, String>, variables: &Map<String, Value>) -> Map<String, Value> {
    field
        .arguments
        .iter()
        .map(|(name, value)| (name.clone(), gql_value_to_json(value, variables)))
        .collect()
}

/// Key under which a field appears in the response
pub fn response_key(field: &Field<'static, String>) -> String {
    field.alias.clone().unwrap_or_else(|| field.name.clone())
}

/// Evaluate `@skip(if:)` and `@include(if:)`
pub fn should_include(directives: &[Directive<'static, String>], variables: &Map<String, Value>) -> bool {
    directives.iter().all(|directive| {
        let condition = directive
            .arguments
            .iter()
            .find(|(name, _)| name == "if")
            .map(|(_, value)| gql_value_to_json(value, variables))
            .and_then(|value| value.as_bool());
        match (directive.name.as_str(), condition) {
            ("skip", Some(true)) => false,
            ("include", Some(false)) => false,
            _ => true,
        }
    })
}

/// Variables and fragment spreads referenced by a selection set
#[derive(Debug, Default)]
pub struct Usages<'a> {
    pub variables: Vec<&'a str>,
    pub spreads: Vec<&'a str>,
}

impl<'a> Usages<'a> {
    /// Walk `selections` without entering spread fragments
    pub fn of(selections: &'a [Selection<'static, String>]) -> Self {
        let mut usages = Self::default();
        usages.visit(selections);
        usages
    }

    fn visit(&mut self, selections: &'a [Selection<'static, String>]) {
        for selection in selections {
            match selection {
                Selection::Field(field) => {
                    for (_, value) in &field.arguments {
                        self.visit_value(value);
                    }
                    self.visit_directives(&field.directives);
                    self.visit(&field.selection_set.items);
                }
                Selection::InlineFragment(fragment) => {
                    self.visit_directives(&fragment.directives);
                    self.visit(&fragment.selection_set.items);
                }
                Selection::FragmentSpread(spread) => {
                    self.visit_directives(&spread.directives);
                    self.spreads.push(&spread.fragment_name);
                }
            }
        }
    }

    fn visit_directives(&mut self, directives: &'a [Directive<'static, String>]) {
        for directive in directives {
            for (_, value) in &directive.arguments {
                self.visit_value(value);
            }
        }
    }

    fn visit_value(&mut self, value: &'a GqlValue<'static, String>) {
        match value {
            GqlValue::Variable(name) => self.variables.push(name),
            GqlValue::List(items) => items.iter().for_each(|item| self.visit_value(item)),
            GqlValue::Object(fields) => fields.values().for_each(|item| self.visit_value(item)),
            _ => {}
        }
    }
}
