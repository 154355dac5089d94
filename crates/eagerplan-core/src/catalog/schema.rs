//! Object types exposed to field selections.

use crate::context::RequestContext;
use crate::hint::{BaseQuery, FieldHints, Hint};
use eagerplan_proto::OrderSpec;

/// Whether a type is concrete or abstract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeKind {
    /// A concrete type backed by one entity.
    Object,
    /// An abstract type over a polymorphic base entity.
    Interface {
        /// Concrete types implementing the interface.
        possible_types: Vec<String>,
    },
}

/// A selectable type.
#[derive(Debug, Clone)]
pub struct TypeDef {
    /// Type name.
    pub name: String,
    /// Backing entity.
    pub entity: String,
    /// Concrete or abstract.
    pub kind: TypeKind,
    /// Interfaces this type implements.
    pub interfaces: Vec<String>,
    /// Declared fields.
    pub fields: Vec<ObjectField>,
}

impl TypeDef {
    /// Create an object type.
    pub fn object(name: impl Into<String>, entity: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entity: entity.into(),
            kind: TypeKind::Object,
            interfaces: Vec::new(),
            fields: Vec::new(),
        }
    }

    /// Create an interface type over a polymorphic entity.
    pub fn interface(
        name: impl Into<String>,
        entity: impl Into<String>,
        possible_types: &[&str],
    ) -> Self {
        Self {
            name: name.into(),
            entity: entity.into(),
            kind: TypeKind::Interface {
                possible_types: possible_types.iter().map(|t| t.to_string()).collect(),
            },
            interfaces: Vec::new(),
            fields: Vec::new(),
        }
    }

    /// Declare an implemented interface.
    pub fn implements(mut self, interface: impl Into<String>) -> Self {
        self.interfaces.push(interface.into());
        self
    }

    /// Add a field.
    pub fn with_field(mut self, field: ObjectField) -> Self {
        self.fields.push(field);
        self
    }

    /// Add scalar fields mapped to same-named columns.
    pub fn with_scalars(mut self, names: &[&str]) -> Self {
        for name in names {
            self.fields.push(ObjectField::scalar(*name));
        }
        self
    }

    /// Get a field by name.
    pub fn field(&self, name: &str) -> Option<&ObjectField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Whether this is an interface type.
    pub fn is_interface(&self) -> bool {
        matches!(self.kind, TypeKind::Interface { .. })
    }

    /// Concrete types of an interface (empty for object types).
    pub fn possible_types(&self) -> &[String] {
        match &self.kind {
            TypeKind::Interface { possible_types } => possible_types,
            TypeKind::Object => &[],
        }
    }
}

/// How a field is resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    /// A column of the backing entity.
    Scalar { column: String },
    /// A relation returned as a row (to-one) or list (to-many).
    Relation { relation: String, target_type: String },
    /// A to-many relation returned as a cursor-paginated connection.
    Connection { relation: String, target_type: String },
    /// A value computed from other data; needs explicit hints.
    Computed,
}

/// A field of a type.
#[derive(Debug, Clone)]
pub struct ObjectField {
    /// Field name.
    pub name: String,
    /// Resolution kind.
    pub kind: FieldKind,
    /// Declared eager-load hints.
    pub hints: FieldHints,
    /// Ordering used when the related rows carry none of their own.
    pub default_order: Vec<OrderSpec>,
    /// Skip this field and its subtree when compiling.
    pub disable_optimization: bool,
}

impl ObjectField {
    fn build(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            hints: FieldHints::default(),
            default_order: Vec::new(),
            disable_optimization: false,
        }
    }

    /// Scalar field backed by a same-named column.
    pub fn scalar(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::build(name.clone(), FieldKind::Scalar { column: name })
    }

    /// Scalar field backed by a differently named column.
    pub fn column(name: impl Into<String>, column: impl Into<String>) -> Self {
        Self::build(
            name,
            FieldKind::Scalar {
                column: column.into(),
            },
        )
    }

    /// Relation field.
    pub fn relation(
        name: impl Into<String>,
        relation: impl Into<String>,
        target_type: impl Into<String>,
    ) -> Self {
        Self::build(
            name,
            FieldKind::Relation {
                relation: relation.into(),
                target_type: target_type.into(),
            },
        )
    }

    /// Connection field over a to-many relation.
    pub fn connection(
        name: impl Into<String>,
        relation: impl Into<String>,
        target_type: impl Into<String>,
    ) -> Self {
        Self::build(
            name,
            FieldKind::Connection {
                relation: relation.into(),
                target_type: target_type.into(),
            },
        )
    }

    /// Computed field.
    pub fn computed(name: impl Into<String>) -> Self {
        Self::build(name, FieldKind::Computed)
    }

    /// Add a static hint.
    pub fn with_hint(mut self, hint: impl Into<Hint>) -> Self {
        self.hints = self.hints.with(hint);
        self
    }

    /// Add a hint computed from the request context.
    pub fn with_dynamic_hint<F>(mut self, f: F) -> Self
    where
        F: Fn(&RequestContext) -> Vec<Hint> + Send + Sync + 'static,
    {
        self.hints = self.hints.with_dynamic(f);
        self
    }

    /// Append a default ordering term.
    pub fn with_default_order(mut self, order: OrderSpec) -> Self {
        self.default_order.push(order);
        self
    }

    /// Exclude this field from plan compilation.
    pub fn without_optimization(mut self) -> Self {
        self.disable_optimization = true;
        self
    }

    /// Relation name for relation and connection fields.
    pub fn relation_name(&self) -> Option<&str> {
        match &self.kind {
            FieldKind::Relation { relation, .. } | FieldKind::Connection { relation, .. } => {
                Some(relation)
            }
            _ => None,
        }
    }

    /// Target type for relation and connection fields.
    pub fn target_type(&self) -> Option<&str> {
        match &self.kind {
            FieldKind::Relation { target_type, .. } | FieldKind::Connection { target_type, .. } => {
                Some(target_type)
            }
            _ => None,
        }
    }

    /// Whether the field is a connection.
    pub fn is_connection(&self) -> bool {
        matches!(self.kind, FieldKind::Connection { .. })
    }
}

/// A top-level listing.
#[derive(Debug, Clone)]
pub struct RootField {
    /// Field name.
    pub name: String,
    /// Type of the listed rows.
    pub target_type: String,
    /// Whether the listing is a cursor-paginated connection.
    pub connection: bool,
    /// Filter and ordering of the listing.
    pub base: BaseQuery,
}

impl RootField {
    /// A plain list.
    pub fn list(name: impl Into<String>, target_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target_type: target_type.into(),
            connection: false,
            base: BaseQuery::default(),
        }
    }

    /// A connection.
    pub fn connection(name: impl Into<String>, target_type: impl Into<String>) -> Self {
        Self {
            connection: true,
            ..Self::list(name, target_type)
        }
    }

    /// Set the filter and ordering.
    pub fn with_base(mut self, base: BaseQuery) -> Self {
        self.base = base;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_fields() {
        let user = TypeDef::object("User", "User")
            .with_scalars(&["id", "name"])
            .with_field(ObjectField::column("displayName", "name"))
            .with_field(ObjectField::connection("posts", "posts", "Post"));

        assert!(!user.is_interface());
        assert!(user.possible_types().is_empty());
        assert_eq!(
            user.field("displayName").map(|f| &f.kind),
            Some(&FieldKind::Scalar {
                column: "name".into()
            })
        );

        let posts = user.field("posts").unwrap();
        assert!(posts.is_connection());
        assert_eq!(posts.relation_name(), Some("posts"));
        assert_eq!(posts.target_type(), Some("Post"));
        assert!(user.field("missing").is_none());
    }

    #[test]
    fn test_interface_possible_types() {
        let media = TypeDef::interface("Media", "Media", &["Book", "Movie"]);
        assert!(media.is_interface());
        assert_eq!(media.possible_types(), ["Book", "Movie"]);
    }
}
