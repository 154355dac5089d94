//! Cursor tokens and keyset predicates over an ordering.
//!
//! A cursor is the tuple of a row's values for each ordering term. Rows
//! strictly after a cursor are selected with a lexicographic tuple
//! comparison built as a right-to-left fold:
//!
//! ```text
//! after(t1..tn) = gt(t1) OR (eq(t1) AND after(t2..tn))
//! ```
//!
//! where `gt` and `eq` respect each term's direction and null placement.

use crate::error::{Error, Result};
use eagerplan_proto::{
    decode_cursor, encode_cursor, CursorError, FilterExpr, NullsOrder, OrderDirection, OrderSpec,
    Row, Value,
};

/// Make an ordering total by appending the identity field.
///
/// Random orderings cannot be paginated and are rejected.
pub fn ensure_total_order(order: &[OrderSpec], identity: &str) -> Result<Vec<OrderSpec>> {
    if order.iter().any(OrderSpec::is_random) {
        return Err(Error::AmbiguousOrdering(
            "random ordering has no stable position for a cursor".to_string(),
        ));
    }

    let mut total = order.to_vec();
    if !total.iter().any(|spec| spec.field == identity) {
        total.push(OrderSpec::asc(identity));
    }
    Ok(total)
}

/// The row's ordering-key values, one per term.
pub fn cursor_values(row: &Row, order: &[OrderSpec]) -> Vec<Value> {
    order
        .iter()
        .map(|spec| row.get_or_null(&spec.field).clone())
        .collect()
}

/// Encode the position of a row.
pub fn encode_row_cursor(row: &Row, order: &[OrderSpec]) -> Result<String> {
    Ok(encode_cursor(&cursor_values(row, order))?)
}

/// Decode a token into a value tuple matching `order`.
pub fn decode_row_cursor(token: &str, order: &[OrderSpec]) -> Result<Vec<Value>> {
    let values = decode_cursor(token)?;
    if values.len() != order.len() {
        return Err(Error::InvalidCursor(CursorError::ArityMismatch {
            expected: order.len(),
            actual: values.len(),
        }));
    }
    Ok(values)
}

/// Predicate selecting rows strictly after `values` in `order`.
pub fn seek_after(order: &[OrderSpec], values: &[Value]) -> FilterExpr {
    let mut terms = order.iter().zip(values).rev();
    let Some((spec, value)) = terms.next() else {
        return FilterExpr::never();
    };

    let mut predicate = strictly_after(spec, value);
    for (spec, value) in terms {
        predicate = FilterExpr::or_any([
            strictly_after(spec, value),
            FilterExpr::and_all([same_position(spec, value), predicate]),
        ]);
    }
    predicate
}

/// Predicate selecting rows strictly before `values` in `order`.
pub fn seek_before(order: &[OrderSpec], values: &[Value]) -> FilterExpr {
    let reversed: Vec<OrderSpec> = order.iter().map(OrderSpec::reversed).collect();
    seek_after(&reversed, values)
}

fn strictly_after(spec: &OrderSpec, value: &Value) -> FilterExpr {
    let field = spec.field.clone();
    if value.is_null() {
        return match spec.nulls {
            NullsOrder::First => FilterExpr::is_not_null(field),
            NullsOrder::Last => FilterExpr::never(),
        };
    }

    let greater = match spec.direction {
        OrderDirection::Asc => FilterExpr::gt(field.clone(), value.clone()),
        OrderDirection::Desc => FilterExpr::lt(field.clone(), value.clone()),
    };
    match spec.nulls {
        NullsOrder::First => greater,
        NullsOrder::Last => FilterExpr::or_any([greater, FilterExpr::is_null(field)]),
    }
}

fn same_position(spec: &OrderSpec, value: &Value) -> FilterExpr {
    if value.is_null() {
        FilterExpr::is_null(spec.field.clone())
    } else {
        FilterExpr::eq(spec.field.clone(), value.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{compare_rows, FilterEvaluator};
    use pretty_assertions::assert_eq;
    use std::cmp::Ordering;

    fn rows() -> Vec<Row> {
        let data: [(i64, Option<i64>); 6] = [
            (1, Some(3)),
            (2, None),
            (3, Some(1)),
            (4, Some(3)),
            (5, None),
            (6, Some(2)),
        ];
        data.iter()
            .map(|(id, score)| Row::new("T").with("id", *id).with("score", *score))
            .collect()
    }

    fn check_seek_matches_sort(order: &[OrderSpec]) {
        let mut sorted = rows();
        sorted.sort_by(|a, b| compare_rows(a, b, order));

        for (i, pivot) in sorted.iter().enumerate() {
            let values = cursor_values(pivot, order);
            let after = seek_after(order, &values);
            let before = seek_before(order, &values);

            let expected_after: Vec<&Row> = sorted[i + 1..].iter().collect();
            let actual_after: Vec<&Row> = sorted
                .iter()
                .filter(|r| FilterEvaluator::evaluate(&after, r))
                .collect();
            assert_eq!(actual_after, expected_after, "after {values:?} in {order:?}");

            let expected_before: Vec<&Row> = sorted[..i].iter().collect();
            let actual_before: Vec<&Row> = sorted
                .iter()
                .filter(|r| FilterEvaluator::evaluate(&before, r))
                .collect();
            assert_eq!(actual_before, expected_before, "before {values:?} in {order:?}");
        }
    }

    #[test]
    fn test_seek_matches_sort_for_every_direction_and_null_policy() {
        for direction in [OrderDirection::Asc, OrderDirection::Desc] {
            for nulls in [NullsOrder::First, NullsOrder::Last] {
                let order = vec![
                    OrderSpec {
                        field: "score".into(),
                        direction,
                        nulls,
                    },
                    OrderSpec::asc("id"),
                ];
                check_seek_matches_sort(&order);
            }
        }
    }

    #[test]
    fn test_seek_on_single_unique_key() {
        check_seek_matches_sort(&[OrderSpec::desc("id")]);
    }

    #[test]
    fn test_total_order_appends_identity() {
        let order = ensure_total_order(&[OrderSpec::desc("score")], "id").unwrap();
        assert_eq!(order, vec![OrderSpec::desc("score"), OrderSpec::asc("id")]);

        let order = ensure_total_order(&[OrderSpec::desc("id")], "id").unwrap();
        assert_eq!(order, vec![OrderSpec::desc("id")]);

        assert_eq!(ensure_total_order(&[], "id").unwrap(), vec![OrderSpec::asc("id")]);
    }

    #[test]
    fn test_random_order_is_rejected() {
        let err = ensure_total_order(&[OrderSpec::random()], "id").unwrap_err();
        assert!(matches!(err, Error::AmbiguousOrdering(_)));
    }

    #[test]
    fn test_cursor_round_trip_from_row() {
        let order = vec![OrderSpec::desc("score"), OrderSpec::asc("id")];
        for row in rows() {
            let token = encode_row_cursor(&row, &order).unwrap();
            assert_eq!(
                decode_row_cursor(&token, &order).unwrap(),
                cursor_values(&row, &order)
            );
        }
    }

    #[test]
    fn test_cursor_arity_is_checked() {
        let token = encode_row_cursor(&rows()[0], &[OrderSpec::asc("id")]).unwrap();
        let err = decode_row_cursor(&token, &[OrderSpec::asc("score"), OrderSpec::asc("id")])
            .unwrap_err();

        assert!(matches!(
            err,
            Error::InvalidCursor(CursorError::ArityMismatch {
                expected: 2,
                actual: 1
            })
        ));
    }

    #[test]
    fn test_sorted_fixture_is_total() {
        let order = vec![OrderSpec::asc("score"), OrderSpec::asc("id")];
        let mut sorted = rows();
        sorted.sort_by(|a, b| compare_rows(a, b, &order));
        for pair in sorted.windows(2) {
            assert_eq!(compare_rows(&pair[0], &pair[1], &order), Ordering::Less);
        }
    }
}
