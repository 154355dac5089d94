//! Per-request context.

use std::collections::HashMap;

use eagerplan_proto::Value;

/// The active request as seen by dynamic hints and the selection walker.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Authenticated caller, if any.
    pub user_id: Option<String>,
    /// Free-form request attributes (roles, tenant, locale, ...).
    pub attributes: HashMap<String, Value>,
    /// Values for `$variables` referenced by the selection.
    pub variables: HashMap<String, Value>,
}

impl RequestContext {
    /// Create an anonymous context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the authenticated caller.
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Add a request attribute.
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Add a variable value.
    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    /// Look up a request attribute.
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Look up a variable.
    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }
}
