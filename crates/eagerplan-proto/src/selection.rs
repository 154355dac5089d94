//! Field-selection documents as delivered by the transport layer.
//!
//! This is the parsed (but not yet normalized) shape of a hierarchical
//! field request:
//! - every requested field may carry an alias, arguments and directives,
//! - selection sets may contain named fragment spreads and inline
//!   fragments with an optional type condition,
//! - argument values may reference request variables.
//!
//! Normalization (alias merging, directive evaluation, fragment expansion)
//! happens in the selection walker of the core crate.

use std::collections::BTreeMap;

use crate::value::Value;
use serde::{Deserialize, Serialize};

/// An argument value, possibly referencing a variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InputValue {
    /// A literal scalar.
    Scalar(Value),
    /// A `$variable` reference.
    Variable(String),
    /// A list literal.
    List(Vec<InputValue>),
    /// An input object literal.
    Object(BTreeMap<String, InputValue>),
}

impl InputValue {
    /// Variable reference.
    pub fn variable(name: impl Into<String>) -> Self {
        InputValue::Variable(name.into())
    }
}

impl From<Value> for InputValue {
    fn from(value: Value) -> Self {
        InputValue::Scalar(value)
    }
}

macro_rules! scalar_input {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for InputValue {
                fn from(value: $ty) -> Self {
                    InputValue::Scalar(Value::from(value))
                }
            }
        )*
    };
}

scalar_input!(bool, i32, i64, f64, String, &str);

/// A directive applied to a selection (`@include`, `@skip`, or custom).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Directive {
    /// Directive name without the `@`.
    pub name: String,
    /// Directive arguments.
    pub arguments: BTreeMap<String, InputValue>,
}

impl Directive {
    /// `@include(if: ...)`.
    pub fn include(condition: impl Into<InputValue>) -> Self {
        Self::conditional("include", condition.into())
    }

    /// `@skip(if: ...)`.
    pub fn skip(condition: impl Into<InputValue>) -> Self {
        Self::conditional("skip", condition.into())
    }

    fn conditional(name: &str, condition: InputValue) -> Self {
        let mut arguments = BTreeMap::new();
        arguments.insert("if".to_string(), condition);
        Self {
            name: name.to_string(),
            arguments,
        }
    }
}

/// One entry of a selection set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Selection {
    /// A requested field.
    Field(FieldSelection),
    /// `...FragmentName`.
    FragmentSpread {
        name: String,
        directives: Vec<Directive>,
    },
    /// `... on Type { ... }` or `... @include(if: $x) { ... }`.
    InlineFragment {
        type_condition: Option<String>,
        directives: Vec<Directive>,
        selections: Vec<Selection>,
    },
}

impl Selection {
    /// Named fragment spread.
    pub fn spread(name: impl Into<String>) -> Self {
        Selection::FragmentSpread {
            name: name.into(),
            directives: Vec::new(),
        }
    }

    /// Inline fragment with a type condition.
    pub fn on(type_condition: impl Into<String>, selections: Vec<Selection>) -> Self {
        Selection::InlineFragment {
            type_condition: Some(type_condition.into()),
            directives: Vec::new(),
            selections,
        }
    }

    /// Inline fragment without a type condition (directive grouping).
    pub fn group(directives: Vec<Directive>, selections: Vec<Selection>) -> Self {
        Selection::InlineFragment {
            type_condition: None,
            directives,
            selections,
        }
    }
}

impl From<FieldSelection> for Selection {
    fn from(field: FieldSelection) -> Self {
        Selection::Field(field)
    }
}

/// A requested field occurrence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSelection {
    /// Response alias, if any.
    pub alias: Option<String>,
    /// Schema field name.
    pub name: String,
    /// Arguments by name.
    pub arguments: BTreeMap<String, InputValue>,
    /// Directives on the field.
    pub directives: Vec<Directive>,
    /// Nested selection set.
    pub selections: Vec<Selection>,
}

impl FieldSelection {
    /// Create a field selection.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            alias: None,
            name: name.into(),
            arguments: BTreeMap::new(),
            directives: Vec::new(),
            selections: Vec::new(),
        }
    }

    /// Set the alias.
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Add an argument.
    pub fn arg(mut self, name: impl Into<String>, value: impl Into<InputValue>) -> Self {
        self.arguments.insert(name.into(), value.into());
        self
    }

    /// Add a directive.
    pub fn directive(mut self, directive: Directive) -> Self {
        self.directives.push(directive);
        self
    }

    /// Add a nested selection.
    pub fn select(mut self, selection: impl Into<Selection>) -> Self {
        self.selections.push(selection.into());
        self
    }

    /// Add several nested scalar fields by name.
    pub fn fields(mut self, names: &[&str]) -> Self {
        for name in names {
            self.selections.push(Selection::Field(FieldSelection::new(*name)));
        }
        self
    }

    /// The key this field occupies in the response.
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

/// A named fragment definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FragmentDefinition {
    /// Fragment name.
    pub name: String,
    /// Type condition.
    pub type_condition: String,
    /// Selection set.
    pub selections: Vec<Selection>,
}

impl FragmentDefinition {
    /// Create a fragment definition.
    pub fn new(
        name: impl Into<String>,
        type_condition: impl Into<String>,
        selections: Vec<Selection>,
    ) -> Self {
        Self {
            name: name.into(),
            type_condition: type_condition.into(),
            selections,
        }
    }
}

/// A root field request together with the fragments it may spread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// The root field.
    pub root: FieldSelection,
    /// Fragment definitions by name.
    pub fragments: BTreeMap<String, FragmentDefinition>,
}

impl Document {
    /// Create a document for a root field.
    pub fn new(root: FieldSelection) -> Self {
        Self {
            root,
            fragments: BTreeMap::new(),
        }
    }

    /// Add a fragment definition.
    pub fn with_fragment(mut self, fragment: FragmentDefinition) -> Self {
        self.fragments.insert(fragment.name.clone(), fragment);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_key_prefers_alias() {
        let field = FieldSelection::new("posts").alias("recent");
        assert_eq!(field.response_key(), "recent");
        assert_eq!(FieldSelection::new("posts").response_key(), "posts");
    }

    #[test]
    fn test_nested_builder() {
        let field = FieldSelection::new("users")
            .arg("first", 10i64)
            .fields(&["id", "name"])
            .select(FieldSelection::new("posts").fields(&["title"]))
            .select(Selection::on("Admin", vec![FieldSelection::new("level").into()]));

        assert_eq!(field.selections.len(), 4);
        assert_eq!(
            field.arguments.get("first"),
            Some(&InputValue::Scalar(Value::Int64(10)))
        );
    }

    #[test]
    fn test_conditional_directives() {
        let directive = Directive::skip(InputValue::variable("hide"));
        assert_eq!(directive.name, "skip");
        assert_eq!(
            directive.arguments.get("if"),
            Some(&InputValue::Variable("hide".into()))
        );
    }
}
