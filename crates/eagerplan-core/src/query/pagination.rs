//! Window pagination planner.
//!
//! A [`PageWindow`] is a validated `first`/`last`/`after`/`before` request
//! over a total ordering. It tells the executor which order to read in,
//! which keyset predicate to add, and how many rows to read; the executor
//! hands the rows back to [`PageWindow::slice`] to cut the final page.
//!
//! | request        | read order | rows read      | in-memory cut               |
//! |----------------|------------|----------------|-----------------------------|
//! | `first`        | forward    | `first + 1`    | keep `first`                |
//! | `last`         | reversed   | `last + 1`     | keep `last`, reverse back   |
//! | `first + last` | forward    | `first + 1`    | keep `first`, then its tail |
//! | neither        | forward    | all            | none                        |
//!
//! The extra row is a lookahead that answers `hasNextPage` (forward) or
//! `hasPreviousPage` (backward) without a second query.

use std::collections::BTreeMap;

use super::cursor::{decode_row_cursor, encode_row_cursor, seek_after, seek_before};
use crate::config::PlannerConfig;
use crate::error::{Error, Result};
use eagerplan_proto::{
    Edge, FilterExpr, InputValue, OrderSpec, Page, PageInfo, PageRequest, Row, Value,
};

/// A validated pagination request.
#[derive(Debug, Clone, PartialEq)]
pub struct PageWindow {
    /// The request as supplied.
    pub request: PageRequest,
    /// Total ordering of the paginated collection.
    pub order: Vec<OrderSpec>,
    /// Rows to take from the front (after defaults are applied).
    pub first: Option<usize>,
    /// Rows to take from the back.
    pub last: Option<usize>,
    /// Decoded `after` cursor.
    pub after: Option<Vec<Value>>,
    /// Decoded `before` cursor.
    pub before: Option<Vec<Value>>,
}

/// Rows of one page before cursors are attached.
#[derive(Debug, Clone, PartialEq)]
pub struct Slice {
    /// Page rows in requested order.
    pub rows: Vec<Row>,
    /// More rows follow the page.
    pub has_next_page: bool,
    /// More rows precede the page.
    pub has_previous_page: bool,
}

impl PageWindow {
    /// Validate a request against an ordering that is already total.
    ///
    /// Page sizes above the configured maximum are rejected and cursors
    /// are decoded here, so a bad request fails before any query runs.
    pub fn resolve(request: PageRequest, order: Vec<OrderSpec>, config: &PlannerConfig) -> Result<Self> {
        for requested in [request.first, request.last].into_iter().flatten() {
            if requested > config.max_page_size {
                return Err(Error::PageSizeExceeded {
                    requested,
                    max: config.max_page_size,
                });
            }
        }

        let after = request
            .after
            .as_deref()
            .map(|token| decode_row_cursor(token, &order))
            .transpose()?;
        let before = request
            .before
            .as_deref()
            .map(|token| decode_row_cursor(token, &order))
            .transpose()?;

        let first = match (request.first, request.last) {
            (None, None) => config.default_page_size,
            (first, _) => first,
        };

        Ok(Self {
            last: request.last,
            request,
            order,
            first,
            after,
            before,
        })
    }

    /// Whether rows are read in reversed order.
    pub fn is_backward(&self) -> bool {
        self.first.is_none() && self.last.is_some()
    }

    /// Whether the window limits the number of rows.
    pub fn is_bounded(&self) -> bool {
        self.first.is_some() || self.last.is_some()
    }

    /// Text that is equal for two windows exactly when they cut the same
    /// rows: resolved sizes, raw cursors and ordering.
    pub fn fingerprint(&self) -> String {
        let mut parts = Vec::new();
        if let Some(n) = self.first {
            parts.push(format!("first:{n}"));
        }
        if let Some(n) = self.last {
            parts.push(format!("last:{n}"));
        }
        if let Some(token) = &self.request.after {
            parts.push(format!("after:{token}"));
        }
        if let Some(token) = &self.request.before {
            parts.push(format!("before:{token}"));
        }
        let order: Vec<String> = self
            .order
            .iter()
            .map(|spec| format!("{} {:?} nulls {:?}", spec.field, spec.direction, spec.nulls))
            .collect();
        parts.push(format!("order:{}", order.join(",")));
        parts.join(";")
    }

    /// The order rows are read in.
    pub fn query_order(&self) -> Vec<OrderSpec> {
        if self.is_backward() {
            self.order.iter().map(OrderSpec::reversed).collect()
        } else {
            self.order.clone()
        }
    }

    /// Keyset predicate for the `after`/`before` cursors.
    pub fn seek_filter(&self) -> Option<FilterExpr> {
        let mut terms = Vec::new();
        if let Some(after) = &self.after {
            terms.push(seek_after(&self.order, after));
        }
        if let Some(before) = &self.before {
            terms.push(seek_before(&self.order, before));
        }
        if terms.is_empty() {
            None
        } else {
            Some(FilterExpr::and_all(terms))
        }
    }

    /// Rows to read, including the lookahead row.
    pub fn fetch_limit(&self) -> Option<usize> {
        if self.is_backward() {
            self.last.map(|n| n.saturating_add(1))
        } else {
            self.first.map(|n| n.saturating_add(1))
        }
    }

    /// Cut the page out of rows read with [`Self::query_order`] and
    /// [`Self::fetch_limit`].
    pub fn slice(&self, mut rows: Vec<Row>) -> Slice {
        if self.is_backward() {
            let last = self.last.unwrap_or(usize::MAX);
            let has_previous_page = rows.len() > last;
            rows.truncate(last);
            rows.reverse();
            return Slice {
                rows,
                has_next_page: self.before.is_some(),
                has_previous_page,
            };
        }

        let mut has_next_page = false;
        if let Some(first) = self.first {
            has_next_page = rows.len() > first;
            rows.truncate(first);
        }

        let mut has_previous_page = self.after.is_some();
        if let Some(last) = self.last {
            if rows.len() > last {
                rows.drain(..rows.len() - last);
                has_previous_page = true;
            }
        }

        Slice {
            rows,
            has_next_page,
            has_previous_page,
        }
    }
}

impl Slice {
    /// Attach cursors and build the page.
    pub fn into_page(self, order: &[OrderSpec], total_count: Option<u64>) -> Result<Page> {
        let mut edges = Vec::with_capacity(self.rows.len());
        for node in self.rows {
            let cursor = encode_row_cursor(&node, order)?;
            edges.push(Edge { cursor, node });
        }

        let page_info = PageInfo {
            has_next_page: self.has_next_page,
            has_previous_page: self.has_previous_page,
            start_cursor: edges.first().map(|e| e.cursor.clone()),
            end_cursor: edges.last().map(|e| e.cursor.clone()),
        };

        Ok(Page {
            edges,
            page_info,
            total_count,
        })
    }
}

/// Read `first`/`last`/`after`/`before` from resolved field arguments.
pub fn page_request_from_args(args: &BTreeMap<String, InputValue>) -> Result<PageRequest> {
    Ok(PageRequest {
        first: size_arg(args, "first")?,
        last: size_arg(args, "last")?,
        after: cursor_arg(args, "after")?,
        before: cursor_arg(args, "before")?,
    })
}

fn size_arg(args: &BTreeMap<String, InputValue>, name: &str) -> Result<Option<usize>> {
    match args.get(name) {
        None | Some(InputValue::Scalar(Value::Null)) => Ok(None),
        Some(InputValue::Scalar(value)) => match value.as_i64() {
            Some(n) if n >= 0 => Ok(Some(n as usize)),
            Some(n) => Err(Error::InvalidSelection(format!(
                "'{name}' must be non-negative, got {n}"
            ))),
            None => Err(Error::InvalidSelection(format!(
                "'{name}' must be an integer, got {}",
                value.type_name()
            ))),
        },
        Some(_) => Err(Error::InvalidSelection(format!("'{name}' must be an integer"))),
    }
}

fn cursor_arg(args: &BTreeMap<String, InputValue>, name: &str) -> Result<Option<String>> {
    match args.get(name) {
        None | Some(InputValue::Scalar(Value::Null)) => Ok(None),
        Some(InputValue::Scalar(Value::String(token))) => Ok(Some(token.clone())),
        Some(_) => Err(Error::InvalidSelection(format!("'{name}' must be a cursor string"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::cursor::cursor_values;
    use crate::store::{compare_rows, FilterEvaluator};
    use eagerplan_proto::encode_cursor;
    use pretty_assertions::assert_eq;

    fn items(n: i64) -> Vec<Row> {
        (1..=n).map(|i| Row::new("Item").with("id", i)).collect()
    }

    fn order() -> Vec<OrderSpec> {
        vec![OrderSpec::asc("id")]
    }

    // Stand-in for a store: filter, sort and limit in memory.
    fn run(window: &PageWindow, rows: &[Row]) -> Slice {
        let mut selected: Vec<Row> = rows
            .iter()
            .filter(|r| match window.seek_filter() {
                Some(f) => FilterEvaluator::evaluate(&f, r),
                None => true,
            })
            .cloned()
            .collect();
        selected.sort_by(|a, b| compare_rows(a, b, &window.query_order()));
        if let Some(limit) = window.fetch_limit() {
            selected.truncate(limit);
        }
        window.slice(selected)
    }

    fn ids(slice: &Slice) -> Vec<i64> {
        slice
            .rows
            .iter()
            .filter_map(|r| r.get("id").and_then(Value::as_i64))
            .collect()
    }

    fn cursor_of(id: i64) -> String {
        encode_cursor(&[Value::Int64(id)]).unwrap()
    }

    fn window(request: PageRequest) -> PageWindow {
        PageWindow::resolve(request, order(), &PlannerConfig::default()).unwrap()
    }

    #[test]
    fn test_first_and_last_take_tail_of_head() {
        let slice = run(&window(PageRequest::first(2).with_last(1)), &items(5));

        assert_eq!(ids(&slice), vec![2]);
        assert!(slice.has_next_page);
        assert!(slice.has_previous_page);
    }

    #[test]
    fn test_forward_page() {
        let slice = run(&window(PageRequest::first(2)), &items(5));

        assert_eq!(ids(&slice), vec![1, 2]);
        assert!(slice.has_next_page);
        assert!(!slice.has_previous_page);
    }

    #[test]
    fn test_forward_page_after_cursor() {
        let slice = run(&window(PageRequest::first(2).after(cursor_of(4))), &items(5));

        assert_eq!(ids(&slice), vec![5]);
        assert!(!slice.has_next_page);
        assert!(slice.has_previous_page);
    }

    #[test]
    fn test_backward_page_before_cursor() {
        let slice = run(&window(PageRequest::last(2).before(cursor_of(4))), &items(5));

        assert_eq!(ids(&slice), vec![2, 3]);
        assert!(slice.has_next_page);
        assert!(slice.has_previous_page);
    }

    #[test]
    fn test_backward_page_from_end() {
        let slice = run(&window(PageRequest::last(2)), &items(5));

        assert_eq!(ids(&slice), vec![4, 5]);
        assert!(!slice.has_next_page);
        assert!(slice.has_previous_page);
    }

    #[test]
    fn test_unbounded_window() {
        let window = window(PageRequest::default());
        assert!(!window.is_bounded());
        assert_eq!(ids(&run(&window, &items(3))), vec![1, 2, 3]);
    }

    #[test]
    fn test_default_page_size_applies_without_first_or_last() {
        let config = PlannerConfig::default().with_default_page_size(2);
        let window = PageWindow::resolve(PageRequest::default().after(cursor_of(1)), order(), &config)
            .unwrap();

        assert_eq!(window.first, Some(2));
        assert_eq!(ids(&run(&window, &items(5))), vec![2, 3]);
    }

    #[test]
    fn test_page_size_above_maximum_is_rejected() {
        let config = PlannerConfig::default().with_max_page_size(10);
        let err = PageWindow::resolve(PageRequest::last(11), order(), &config).unwrap_err();

        assert!(matches!(err, Error::PageSizeExceeded { requested: 11, max: 10 }));
    }

    #[test]
    fn test_malformed_cursor_is_rejected() {
        let err = PageWindow::resolve(
            PageRequest::first(1).after("zz"),
            order(),
            &PlannerConfig::default(),
        )
        .unwrap_err();

        assert!(matches!(err, Error::InvalidCursor(_)));
    }

    #[test]
    fn test_page_cursors_resume_without_gap() {
        let rows = items(7);
        let mut seen = Vec::new();
        let mut after: Option<String> = None;

        loop {
            let mut request = PageRequest::first(3);
            request.after = after.clone();
            let slice = run(&window(request), &rows);
            let has_next = slice.has_next_page;
            let page = slice.into_page(&order(), None).unwrap();

            seen.extend(page.nodes().iter().filter_map(|r| r.get("id").and_then(Value::as_i64)));
            if !has_next {
                break;
            }
            after = page.page_info.end_cursor.clone();
        }

        assert_eq!(seen, (1..=7).collect::<Vec<_>>());
    }

    #[test]
    fn test_into_page_sets_boundary_cursors() {
        let slice = run(&window(PageRequest::first(2)), &items(5));
        let page = slice.into_page(&order(), Some(5)).unwrap();

        assert_eq!(page.total_count, Some(5));
        assert_eq!(page.page_info.start_cursor, Some(cursor_of(1)));
        assert_eq!(page.page_info.end_cursor, Some(cursor_of(2)));
        assert_eq!(
            page.edges[1].cursor,
            encode_cursor(&cursor_values(&page.edges[1].node, &order())).unwrap()
        );
    }

    #[test]
    fn test_page_request_from_arguments() {
        let mut args = BTreeMap::new();
        args.insert("first".to_string(), InputValue::from(3i64));
        args.insert("after".to_string(), InputValue::from("abc"));
        args.insert("filter".to_string(), InputValue::from(true));

        let request = page_request_from_args(&args).unwrap();
        assert_eq!(request, PageRequest::first(3).after("abc"));

        args.insert("last".to_string(), InputValue::from(-1i64));
        assert!(matches!(
            page_request_from_args(&args),
            Err(Error::InvalidSelection(_))
        ));
    }

    #[test]
    fn test_fingerprint_tracks_size_cursor_and_order() {
        let config = PlannerConfig::default();
        let two = |order: Vec<OrderSpec>| PageWindow::resolve(PageRequest::first(2), order, &config).unwrap();

        assert_eq!(two(order()).fingerprint(), two(order()).fingerprint());
        assert_ne!(two(order()).fingerprint(), window(PageRequest::first(3)).fingerprint());
        assert_ne!(
            two(order()).fingerprint(),
            two(vec![OrderSpec::desc("id")]).fingerprint()
        );
        assert_ne!(
            two(order()).fingerprint(),
            window(PageRequest::first(2).after(cursor_of(1))).fingerprint()
        );
    }
}
