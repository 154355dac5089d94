//! Eager-load hints declared by schema fields.
//!
//! A hint is a read-only template describing one relational requirement of
//! a field. The compiler copies the hints of every visited field into a
//! per-request plan; the declarations themselves are never mutated.

use std::fmt;
use std::sync::Arc;

use crate::context::RequestContext;
use eagerplan_proto::{Expr, FilterExpr, OrderSpec};

/// One relational requirement of a field.
#[derive(Debug, Clone, PartialEq)]
pub enum Hint {
    /// Columns that must be selected. A dotted name (`author.name`) selects
    /// a column of a joined relation.
    Projection(Vec<String>),
    /// A to-one relation path expanded inline in the same query.
    Join(Vec<String>),
    /// A relation loaded by a secondary query keyed by parent identifiers.
    BatchLoad(BatchLoadHint),
    /// A computed value injected into the query under a name.
    Annotation(AnnotationHint),
}

impl Hint {
    /// Projection of the given columns.
    pub fn projection(columns: &[&str]) -> Self {
        Hint::Projection(columns.iter().map(|c| c.to_string()).collect())
    }

    /// Join along a dotted relation path.
    pub fn join(path: &str) -> Self {
        Hint::Join(split_path(path))
    }

    /// Batch load along a dotted relation path with no extra filtering.
    pub fn batch(path: &str) -> Self {
        Hint::BatchLoad(BatchLoadHint::new(path))
    }

    /// Annotation computed by the store.
    pub fn annotate(name: impl Into<String>, expr: Expr) -> Self {
        Hint::Annotation(AnnotationHint::new(name, expr))
    }
}

/// Nested base query of a batch load: the filtered and ordered view of
/// the related rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BaseQuery {
    /// Filter applied to the related rows.
    pub filter: Option<FilterExpr>,
    /// Ordering of the related rows.
    pub order_by: Vec<OrderSpec>,
}

impl BaseQuery {
    /// The unfiltered, unordered view.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the filter.
    pub fn with_filter(mut self, filter: FilterExpr) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Append an ordering term.
    pub fn with_order(mut self, order: OrderSpec) -> Self {
        self.order_by.push(order);
        self
    }

    /// Whether the view adds nothing to a plain relation load.
    pub fn is_empty(&self) -> bool {
        self.filter.is_none() && self.order_by.is_empty()
    }
}

/// A relation fetched by a secondary query.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchLoadHint {
    /// Relation path; every segment but the last must be a to-one relation
    /// and is joined.
    pub path: Vec<String>,
    /// Filtered/ordered view of the related rows.
    pub base: BaseQuery,
    /// Attribute the loaded rows are stored under on each parent.
    pub cache_attr: Option<String>,
    /// Hints applied to the secondary query itself.
    pub nested: Vec<Hint>,
}

impl BatchLoadHint {
    /// Batch load along a dotted relation path.
    pub fn new(path: &str) -> Self {
        Self {
            path: split_path(path),
            base: BaseQuery::default(),
            cache_attr: None,
            nested: Vec::new(),
        }
    }

    /// Filter the related rows.
    pub fn with_filter(mut self, filter: FilterExpr) -> Self {
        self.base.filter = Some(filter);
        self
    }

    /// Order the related rows.
    pub fn with_order(mut self, order: OrderSpec) -> Self {
        self.base.order_by.push(order);
        self
    }

    /// Store the rows under `attr` instead of the relation name.
    pub fn cache_as(mut self, attr: impl Into<String>) -> Self {
        self.cache_attr = Some(attr.into());
        self
    }

    /// Add a hint for the secondary query.
    pub fn with_nested(mut self, hint: Hint) -> Self {
        self.nested.push(hint);
        self
    }
}

impl From<BatchLoadHint> for Hint {
    fn from(hint: BatchLoadHint) -> Self {
        Hint::BatchLoad(hint)
    }
}

/// A named computed value.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationHint {
    /// Name the value is stored under on each row.
    pub name: String,
    /// Expression evaluated by the store.
    pub expr: Expr,
    /// The expression was built from the request context.
    pub depends_on_context: bool,
}

impl AnnotationHint {
    /// Create an annotation hint.
    pub fn new(name: impl Into<String>, expr: Expr) -> Self {
        Self {
            name: name.into(),
            expr,
            depends_on_context: false,
        }
    }

    /// Mark the expression as built from the request context.
    pub fn context_dependent(mut self) -> Self {
        self.depends_on_context = true;
        self
    }
}

impl From<AnnotationHint> for Hint {
    fn from(hint: AnnotationHint) -> Self {
        Hint::Annotation(hint)
    }
}

/// Hints computed from the request context.
pub type DynamicHint = Arc<dyn Fn(&RequestContext) -> Vec<Hint> + Send + Sync>;

/// Where a field's hint comes from.
#[derive(Clone)]
pub enum HintSource {
    /// A fixed hint.
    Static(Hint),
    /// A hint computed per request.
    Dynamic(DynamicHint),
}

impl fmt::Debug for HintSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HintSource::Static(hint) => f.debug_tuple("Static").field(hint).finish(),
            HintSource::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

/// The hints declared on one field.
#[derive(Debug, Clone, Default)]
pub struct FieldHints {
    /// Hint sources in declaration order.
    pub sources: Vec<HintSource>,
}

impl FieldHints {
    /// No hints.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a static hint.
    pub fn with(mut self, hint: impl Into<Hint>) -> Self {
        self.sources.push(HintSource::Static(hint.into()));
        self
    }

    /// Add a hint computed from the request context.
    pub fn with_dynamic<F>(mut self, f: F) -> Self
    where
        F: Fn(&RequestContext) -> Vec<Hint> + Send + Sync + 'static,
    {
        self.sources.push(HintSource::Dynamic(Arc::new(f)));
        self
    }

    /// Whether no hints are declared.
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Whether any source depends on the request.
    pub fn is_dynamic(&self) -> bool {
        self.sources
            .iter()
            .any(|s| matches!(s, HintSource::Dynamic(_)))
    }

    /// Evaluate every source against the request.
    pub fn resolve(&self, ctx: &RequestContext) -> Vec<Hint> {
        let mut hints = Vec::new();
        for source in &self.sources {
            match source {
                HintSource::Static(hint) => hints.push(hint.clone()),
                HintSource::Dynamic(f) => hints.extend(f(ctx)),
            }
        }
        hints
    }
}

fn split_path(path: &str) -> Vec<String> {
    path.split('.')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
