//! Filter evaluation for the in-memory store.
//!
//! Comparisons follow SQL semantics for nulls: a null or missing field
//! never satisfies a comparison, `IN` or `LIKE`; only `IS NULL` matches it.
//! `NOT` is plain boolean negation.

use std::cmp::Ordering;

use eagerplan_proto::{FilterExpr, Row, Value};

/// Evaluates filter expressions against rows.
pub struct FilterEvaluator;

impl FilterEvaluator {
    /// Evaluate a filter expression against a row.
    pub fn evaluate(filter: &FilterExpr, row: &Row) -> bool {
        match filter {
            FilterExpr::Eq { field, value } => Self::compare(row, field, value, Ordering::is_eq),
            FilterExpr::Ne { field, value } => Self::compare(row, field, value, Ordering::is_ne),
            FilterExpr::Lt { field, value } => Self::compare(row, field, value, Ordering::is_lt),
            FilterExpr::Le { field, value } => Self::compare(row, field, value, Ordering::is_le),
            FilterExpr::Gt { field, value } => Self::compare(row, field, value, Ordering::is_gt),
            FilterExpr::Ge { field, value } => Self::compare(row, field, value, Ordering::is_ge),
            FilterExpr::In { field, values } => match Self::non_null(row, field) {
                Some(fv) => values.iter().any(|v| Self::values_equal(fv, v)),
                None => false,
            },
            FilterExpr::NotIn { field, values } => match Self::non_null(row, field) {
                Some(fv) => !values.iter().any(|v| Self::values_equal(fv, v)),
                None => false,
            },
            FilterExpr::IsNull { field } => Self::non_null(row, field).is_none(),
            FilterExpr::IsNotNull { field } => Self::non_null(row, field).is_some(),
            FilterExpr::Like { field, pattern } => match Self::non_null(row, field) {
                Some(Value::String(s)) => like_match(s, pattern),
                _ => false,
            },
            FilterExpr::And(filters) => filters.iter().all(|f| Self::evaluate(f, row)),
            FilterExpr::Or(filters) => filters.iter().any(|f| Self::evaluate(f, row)),
            FilterExpr::Not(inner) => !Self::evaluate(inner, row),
        }
    }

    fn non_null<'a>(row: &'a Row, field: &str) -> Option<&'a Value> {
        row.get(field).filter(|v| !v.is_null())
    }

    fn compare(row: &Row, field: &str, value: &Value, accept: fn(Ordering) -> bool) -> bool {
        match Self::non_null(row, field) {
            Some(fv) if !value.is_null() => fv.partial_compare(value).is_some_and(accept),
            _ => false,
        }
    }

    fn values_equal(a: &Value, b: &Value) -> bool {
        a.partial_compare(b) == Some(Ordering::Equal)
    }
}

/// Match a string against a SQL LIKE pattern.
///
/// `%` matches any run of characters, `_` exactly one, and `\` escapes the
/// next pattern character.
pub fn like_match(value: &str, pattern: &str) -> bool {
    let text: Vec<char> = value.chars().collect();
    let mut tokens = Vec::new();
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        tokens.push(match c {
            '%' => LikeToken::AnyRun,
            '_' => LikeToken::AnyOne,
            '\\' => LikeToken::Literal(chars.next().unwrap_or('\\')),
            other => LikeToken::Literal(other),
        });
    }

    // Greedy scan with a single backtrack point at the last `%`.
    let (mut t, mut p) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;
    while t < text.len() {
        match tokens.get(p) {
            Some(LikeToken::AnyRun) => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some(LikeToken::AnyOne) => {
                t += 1;
                p += 1;
            }
            Some(LikeToken::Literal(c)) if *c == text[t] => {
                t += 1;
                p += 1;
            }
            _ => match backtrack {
                Some((star, start)) => {
                    p = star + 1;
                    t = start + 1;
                    backtrack = Some((star, start + 1));
                }
                None => return false,
            },
        }
    }
    tokens[p..].iter().all(|t| matches!(t, LikeToken::AnyRun))
}

#[derive(Debug, Clone, Copy)]
enum LikeToken {
    AnyRun,
    AnyOne,
    Literal(char),
}
