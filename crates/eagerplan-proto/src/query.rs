//! Query IR types: filters, ordering, pagination requests and annotation
//! expressions.

use crate::value::Value;
use serde::{Deserialize, Serialize};

/// Filter expression over the columns of a single row.
///
/// `And(vec![])` is the always-true predicate and `Or(vec![])` the
/// always-false one; both show up when cursor predicates are folded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FilterExpr {
    /// `field = value`
    Eq { field: String, value: Value },
    /// `field <> value`
    Ne { field: String, value: Value },
    /// `field < value`
    Lt { field: String, value: Value },
    /// `field <= value`
    Le { field: String, value: Value },
    /// `field > value`
    Gt { field: String, value: Value },
    /// `field >= value`
    Ge { field: String, value: Value },
    /// `field IN (values)`; false for an empty list.
    In { field: String, values: Vec<Value> },
    /// `field NOT IN (values)`
    NotIn { field: String, values: Vec<Value> },
    IsNull { field: String },
    IsNotNull { field: String },
    /// SQL `LIKE` with `%` and `_` wildcards.
    Like { field: String, pattern: String },
    And(Vec<FilterExpr>),
    Or(Vec<FilterExpr>),
    Not(Box<FilterExpr>),
}

macro_rules! comparison {
    ($($ctor:ident => $variant:ident),* $(,)?) => {
        $(
            #[doc = concat!("`", stringify!($variant), "` comparison of a column against a constant.")]
            pub fn $ctor(column: impl Into<String>, operand: impl Into<Value>) -> Self {
                FilterExpr::$variant {
                    field: column.into(),
                    value: operand.into(),
                }
            }
        )*
    };
}

impl FilterExpr {
    comparison!(eq => Eq, ne => Ne, lt => Lt, le => Le, gt => Gt, ge => Ge);

    /// Membership in a key list.
    pub fn in_values(column: impl Into<String>, values: Vec<Value>) -> Self {
        FilterExpr::In {
            field: column.into(),
            values,
        }
    }

    pub fn is_null(column: impl Into<String>) -> Self {
        FilterExpr::IsNull { field: column.into() }
    }

    pub fn is_not_null(column: impl Into<String>) -> Self {
        FilterExpr::IsNotNull { field: column.into() }
    }

    pub fn like(column: impl Into<String>, pattern: impl Into<String>) -> Self {
        FilterExpr::Like {
            field: column.into(),
            pattern: pattern.into(),
        }
    }

    /// The always-true predicate.
    pub fn always() -> Self {
        FilterExpr::And(Vec::new())
    }

    /// The always-false predicate.
    pub fn never() -> Self {
        FilterExpr::Or(Vec::new())
    }

    /// Negate an expression.
    pub fn negate(expr: FilterExpr) -> Self {
        FilterExpr::Not(Box::new(expr))
    }

    /// Conjunction that flattens nested ANDs and drops always-true terms.
    pub fn and_all(exprs: impl IntoIterator<Item = FilterExpr>) -> Self {
        let mut terms = Vec::new();
        for expr in exprs {
            match expr {
                FilterExpr::And(inner) => terms.extend(inner),
                other => terms.push(other),
            }
        }
        if terms.iter().any(FilterExpr::is_never) {
            return FilterExpr::never();
        }
        if terms.len() == 1 {
            return terms.remove(0);
        }
        FilterExpr::And(terms)
    }

    /// Disjunction that flattens nested ORs and drops always-false terms.
    pub fn or_any(exprs: impl IntoIterator<Item = FilterExpr>) -> Self {
        let mut terms = Vec::new();
        for expr in exprs {
            match expr {
                FilterExpr::Or(inner) => terms.extend(inner),
                other => terms.push(other),
            }
        }
        if terms.iter().any(FilterExpr::is_always) {
            return FilterExpr::always();
        }
        if terms.len() == 1 {
            return terms.remove(0);
        }
        FilterExpr::Or(terms)
    }

    /// Whether this is the literal always-true predicate.
    pub fn is_always(&self) -> bool {
        matches!(self, FilterExpr::And(terms) if terms.is_empty())
    }

    /// Whether this is the literal always-false predicate.
    pub fn is_never(&self) -> bool {
        matches!(self, FilterExpr::Or(terms) if terms.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderDirection {
    Asc,
    Desc,
}

impl OrderDirection {
    /// The opposite direction.
    pub fn reversed(self) -> Self {
        match self {
            OrderDirection::Asc => OrderDirection::Desc,
            OrderDirection::Desc => OrderDirection::Asc,
        }
    }
}

/// Where nulls sort relative to non-null values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NullsOrder {
    /// Nulls come before every non-null value.
    First,
    /// Nulls come after every non-null value.
    Last,
}

impl NullsOrder {
    /// The opposite placement.
    pub fn reversed(self) -> Self {
        match self {
            NullsOrder::First => NullsOrder::Last,
            NullsOrder::Last => NullsOrder::First,
        }
    }
}

/// One ordering term.
///
/// A sequence of these defines the total order cursors and row numbering
/// rely on. The field name `?` denotes a random order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderSpec {
    /// Column or annotation name.
    pub field: String,
    pub direction: OrderDirection,
    pub nulls: NullsOrder,
}

/// Field name used to request a random order.
pub const RANDOM_ORDER_FIELD: &str = "?";

impl OrderSpec {
    /// Ascending, nulls first: null sorts as the smallest value.
    pub fn asc(column: impl Into<String>) -> Self {
        Self::term(column.into(), OrderDirection::Asc, NullsOrder::First)
    }

    /// Descending, nulls last.
    pub fn desc(column: impl Into<String>) -> Self {
        Self::term(column.into(), OrderDirection::Desc, NullsOrder::Last)
    }

    fn term(field: String, direction: OrderDirection, nulls: NullsOrder) -> Self {
        Self { field, direction, nulls }
    }

    /// A random ordering term. Rejected by cursor pagination.
    pub fn random() -> Self {
        Self::asc(RANDOM_ORDER_FIELD)
    }

    /// Set the null placement.
    pub fn with_nulls(mut self, nulls: NullsOrder) -> Self {
        self.nulls = nulls;
        self
    }

    /// Whether this term requests a random order.
    pub fn is_random(&self) -> bool {
        self.field == RANDOM_ORDER_FIELD
    }

    /// The same term walked in the opposite direction.
    ///
    /// Reversing flips both the direction and the null placement so the
    /// resulting sequence is the exact mirror of the original.
    pub fn reversed(&self) -> Self {
        Self::term(self.field.clone(), self.direction.reversed(), self.nulls.reversed())
    }
}

/// Cursor pagination request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageRequest {
    /// Number of rows to take from the front.
    pub first: Option<usize>,
    /// Number of rows to take from the back.
    pub last: Option<usize>,
    /// Only rows strictly after this cursor.
    pub after: Option<String>,
    /// Only rows strictly before this cursor.
    pub before: Option<String>,
}

impl PageRequest {
    /// Forward page of `n` rows.
    pub fn first(n: usize) -> Self {
        Self::default().with_first(n)
    }

    /// Backward page of `n` rows.
    pub fn last(n: usize) -> Self {
        Self::default().with_last(n)
    }

    fn with_first(mut self, n: usize) -> Self {
        self.first = Some(n);
        self
    }

    /// Set the `after` cursor.
    pub fn after(mut self, cursor: impl Into<String>) -> Self {
        self.after = Some(cursor.into());
        self
    }

    /// Set the `before` cursor.
    pub fn before(mut self, cursor: impl Into<String>) -> Self {
        self.before = Some(cursor.into());
        self
    }

    /// Also take the last `n` rows of the forward slice.
    pub fn with_last(mut self, n: usize) -> Self {
        self.last = Some(n);
        self
    }

    /// Whether no slicing was requested at all.
    pub fn is_empty(&self) -> bool {
        self.first.is_none() && self.last.is_none() && self.after.is_none() && self.before.is_none()
    }
}

/// Aggregate function used by relation annotations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregateFunction {
    /// Number of related rows; ignores the column.
    Count,
    Sum,
    Min,
    Max,
}

/// Annotation expression computed by the store alongside a row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// A column of the row.
    Column(String),
    /// A constant.
    Literal(Value),
    /// An aggregate over a to-many relation of the row.
    Aggregate {
        function: AggregateFunction,
        relation: String,
        field: Option<String>,
        filter: Option<FilterExpr>,
    },
    /// String concatenation of the parts (nulls are skipped).
    Concat(Vec<Expr>),
}

impl Expr {
    /// Column reference.
    pub fn column(name: impl Into<String>) -> Self {
        Expr::Column(name.into())
    }

    /// Number of rows behind a to-many relation.
    pub fn count(relation: impl Into<String>) -> Self {
        Self::over(AggregateFunction::Count, relation.into(), None)
    }

    /// `function(column)` over the rows behind a to-many relation.
    pub fn aggregate(
        function: AggregateFunction,
        relation: impl Into<String>,
        column: impl Into<String>,
    ) -> Self {
        Self::over(function, relation.into(), Some(column.into()))
    }

    fn over(function: AggregateFunction, relation: String, field: Option<String>) -> Self {
        Expr::Aggregate {
            function,
            relation,
            field,
            filter: None,
        }
    }

    /// Restrict an aggregate to related rows matching `filter`.
    ///
    /// Has no effect on non-aggregate expressions.
    pub fn filtered(self, filter: FilterExpr) -> Self {
        match self {
            Expr::Aggregate {
                function,
                relation,
                field,
                ..
            } => Expr::Aggregate {
                function,
                relation,
                field,
                filter: Some(filter),
            },
            other => other,
        }
    }

    /// Columns of the annotated row this expression reads.
    pub fn referenced_columns(&self) -> Vec<String> {
        match self {
            Expr::Column(name) => vec![name.clone()],
            Expr::Literal(_) | Expr::Aggregate { .. } => Vec::new(),
            Expr::Concat(parts) => parts.iter().flat_map(Expr::referenced_columns).collect(),
        }
    }
}
