//! In-memory relational store.
//!
//! Tables are plain row vectors behind a lock. Subtype entities keep only
//! their own columns; reading a subtype joins the ancestor tables by
//! identity. Every issued statement is appended to a query log so callers
//! can assert on round trips.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use super::filter::FilterEvaluator;
use super::{CountQuery, FetchQuery, JoinSpec, RelationalStore, StoreError, WindowSpec};
use crate::catalog::Registry;
use eagerplan_proto::{
    AggregateFunction, Expr, FilterExpr, NullsOrder, OrderDirection, OrderSpec, Related, Row,
    Value,
};

/// A statement recorded by [`MemoryStore`].
#[derive(Debug, Clone, PartialEq)]
pub enum LoggedQuery {
    /// A row read.
    Fetch(FetchQuery),
    /// A row count (grouped when `group_by` is set).
    Count {
        query: CountQuery,
        group_by: Option<String>,
    },
}

impl LoggedQuery {
    /// The entity the statement reads.
    pub fn entity(&self) -> &str {
        match self {
            LoggedQuery::Fetch(query) => &query.entity,
            LoggedQuery::Count { query, .. } => &query.entity,
        }
    }
}

/// In-memory [`RelationalStore`].
pub struct MemoryStore {
    registry: Registry,
    tables: RwLock<BTreeMap<String, Vec<Row>>>,
    log: Mutex<Vec<LoggedQuery>>,
    failing: RwLock<BTreeSet<String>>,
}

impl MemoryStore {
    /// Create an empty store for the entities and relations of `registry`.
    pub fn new(registry: &Registry) -> Self {
        let tables = registry
            .entities()
            .map(|e| (e.name.clone(), Vec::new()))
            .collect();
        Self {
            registry: registry.clone(),
            tables: RwLock::new(tables),
            log: Mutex::new(Vec::new()),
            failing: RwLock::new(BTreeSet::new()),
        }
    }

    /// Insert a row.
    ///
    /// For a subtype entity the row's columns are split over the subtype
    /// table and its ancestor tables, and the discriminator is filled in.
    pub fn insert(&self, entity: &str, row: Row) -> Result<(), StoreError> {
        let chain: Vec<_> = self
            .registry
            .entity_chain(entity)
            .into_iter()
            .cloned()
            .collect();
        if chain.is_empty() {
            return Err(StoreError::UnknownEntity(entity.to_string()));
        }

        let mut fields = row.fields;
        if let Some(value) = chain[0].discriminator_value.clone() {
            if let Some(column) = self.registry.discriminator(entity) {
                fields.entry(column.to_string()).or_insert(value);
            }
        }

        let mut tables = self.tables.write();
        for def in &chain {
            let mut part = Row::new(def.name.clone());
            for column in &def.fields {
                if let Some(value) = fields.get(column) {
                    part.set(column.clone(), value.clone());
                }
            }
            tables.entry(def.name.clone()).or_default().push(part);
        }
        Ok(())
    }

    /// Make every statement against `entity` fail.
    pub fn fail_on(&self, entity: impl Into<String>) {
        self.failing.write().insert(entity.into());
    }

    /// Stop failing statements.
    pub fn clear_failures(&self) {
        self.failing.write().clear();
    }

    /// Statements issued so far.
    pub fn queries(&self) -> Vec<LoggedQuery> {
        self.log.lock().clone()
    }

    /// Number of statements issued so far.
    pub fn query_count(&self) -> usize {
        self.log.lock().len()
    }

    /// Forget the statement log.
    pub fn reset_log(&self) {
        self.log.lock().clear();
    }

    fn check_failure(&self, entity: &str) -> Result<(), StoreError> {
        if self.failing.read().contains(entity) {
            return Err(StoreError::Backend(format!(
                "injected failure reading '{entity}'"
            )));
        }
        Ok(())
    }

    /// Rows of an entity with ancestor columns joined in.
    fn materialize(&self, entity: &str) -> Result<Vec<Row>, StoreError> {
        let chain = self.registry.entity_chain(entity);
        let Some(own) = chain.first() else {
            return Err(StoreError::UnknownEntity(entity.to_string()));
        };

        let tables = self.tables.read();
        let mut rows: Vec<Row> = tables
            .get(entity)
            .map(|t| t.iter().cloned().collect())
            .unwrap_or_default();

        for ancestor in chain.iter().skip(1) {
            let by_identity: HashMap<&Value, &Row> = tables
                .get(&ancestor.name)
                .map(|t| {
                    t.iter()
                        .filter_map(|r| r.get(&own.identity_field).map(|id| (id, r)))
                        .collect()
                })
                .unwrap_or_default();
            for row in &mut rows {
                let parent = row
                    .get(&own.identity_field)
                    .and_then(|id| by_identity.get(id));
                if let Some(parent) = parent {
                    for (name, value) in &parent.fields {
                        row.fields.entry(name.clone()).or_insert_with(|| value.clone());
                    }
                }
            }
        }

        for row in &mut rows {
            row.entity = entity.to_string();
        }
        Ok(rows)
    }

    fn select(&self, entity: &str, filter: Option<&FilterExpr>) -> Result<Vec<Row>, StoreError> {
        let rows = self.materialize(entity)?;
        Ok(match filter {
            Some(filter) => rows
                .into_iter()
                .filter(|r| FilterEvaluator::evaluate(filter, r))
                .collect(),
            None => rows,
        })
    }

    fn annotate(
        &self,
        entity: &str,
        row: &mut Row,
        annotations: &BTreeMap<String, Expr>,
    ) -> Result<(), StoreError> {
        for (name, expr) in annotations {
            let value = self.evaluate(entity, row, expr)?;
            row.set(name.clone(), value);
        }
        Ok(())
    }

    fn evaluate(&self, entity: &str, row: &Row, expr: &Expr) -> Result<Value, StoreError> {
        match expr {
            Expr::Column(name) => Ok(row.get_or_null(name).clone()),
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Concat(parts) => {
                let mut out = String::new();
                for part in parts {
                    match self.evaluate(entity, row, part)? {
                        Value::Null => {}
                        Value::String(s) => out.push_str(&s),
                        other => out.push_str(&other.to_string()),
                    }
                }
                Ok(Value::String(out))
            }
            Expr::Aggregate {
                function,
                relation,
                field,
                filter,
            } => {
                let rel = self.registry.relation(entity, relation).map_err(|_| {
                    StoreError::UnknownRelation {
                        entity: entity.to_string(),
                        relation: relation.clone(),
                    }
                })?;
                let key = row.get_or_null(&rel.from_field);
                if key.is_null() {
                    return Ok(empty_aggregate(*function));
                }
                let mut scope = FilterExpr::eq(rel.to_field.clone(), key.clone());
                if let Some(filter) = filter {
                    scope = FilterExpr::and_all([scope, filter.clone()]);
                }
                let related = self.select(&rel.to_entity, Some(&scope))?;
                let values: Vec<&Value> = match field {
                    Some(field) => related
                        .iter()
                        .map(|r| r.get_or_null(field))
                        .filter(|v| !v.is_null())
                        .collect(),
                    None => Vec::new(),
                };
                Ok(match function {
                    AggregateFunction::Count => Value::Int64(related.len() as i64),
                    AggregateFunction::Sum => sum_values(&values),
                    AggregateFunction::Min => values.into_iter().min().cloned().unwrap_or(Value::Null),
                    AggregateFunction::Max => values.into_iter().max().cloned().unwrap_or(Value::Null),
                })
            }
        }
    }

    fn apply_join(&self, row: &mut Row, join: &JoinSpec) -> Result<(), StoreError> {
        let key = row.get_or_null(&join.source_field).clone();
        let target = if key.is_null() {
            None
        } else {
            let filter = FilterExpr::eq(join.target_field.clone(), key);
            self.select(&join.entity, Some(&filter))?.into_iter().next()
        };

        let target = match target {
            Some(mut target) => {
                self.annotate(&join.entity, &mut target, &join.annotations)?;
                for nested in &join.joins {
                    self.apply_join(&mut target, nested)?;
                }
                project(&mut target, &join.projection, &join.annotations);
                Some(Box::new(target))
            }
            None => None,
        };
        row.attach(join.relation.clone(), Related::One(target));
        Ok(())
    }
}

impl RelationalStore for MemoryStore {
    fn fetch(&self, query: &FetchQuery) -> Result<Vec<Row>, StoreError> {
        self.log.lock().push(LoggedQuery::Fetch(query.clone()));
        self.check_failure(&query.entity)?;

        let mut rows = self.select(&query.entity, query.filter.as_ref())?;
        for row in &mut rows {
            self.annotate(&query.entity, row, &query.annotations)?;
            for join in &query.joins {
                self.apply_join(row, join)?;
            }
        }

        let mut rows = match &query.window {
            Some(window) => apply_window(rows, window),
            None => {
                rows.sort_by(|a, b| compare_rows(a, b, &query.order_by));
                if let Some(limit) = query.limit {
                    rows.truncate(limit);
                }
                rows
            }
        };

        for row in &mut rows {
            project(row, &query.projection, &query.annotations);
        }

        debug!(entity = %query.entity, rows = rows.len(), "memory store fetch");
        Ok(rows)
    }

    fn count(&self, query: &CountQuery) -> Result<u64, StoreError> {
        self.log.lock().push(LoggedQuery::Count {
            query: query.clone(),
            group_by: None,
        });
        self.check_failure(&query.entity)?;
        Ok(self.select(&query.entity, query.filter.as_ref())?.len() as u64)
    }

    fn count_by(
        &self,
        query: &CountQuery,
        group_by: &str,
    ) -> Result<HashMap<Value, u64>, StoreError> {
        self.log.lock().push(LoggedQuery::Count {
            query: query.clone(),
            group_by: Some(group_by.to_string()),
        });
        self.check_failure(&query.entity)?;

        let mut counts = HashMap::new();
        for row in self.select(&query.entity, query.filter.as_ref())? {
            *counts.entry(row.get_or_null(group_by).clone()).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

/// Compare two rows under an ordering.
///
/// Null placement is absolute: `NullsOrder::First` puts nulls first in the
/// output whatever the direction.
pub fn compare_rows(a: &Row, b: &Row, order: &[OrderSpec]) -> Ordering {
    for spec in order {
        let ord = compare_values(a.get_or_null(&spec.field), b.get_or_null(&spec.field), spec);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn compare_values(a: &Value, b: &Value, spec: &OrderSpec) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => match spec.nulls {
            NullsOrder::First => Ordering::Less,
            NullsOrder::Last => Ordering::Greater,
        },
        (false, true) => match spec.nulls {
            NullsOrder::First => Ordering::Greater,
            NullsOrder::Last => Ordering::Less,
        },
        (false, false) => match spec.direction {
            OrderDirection::Asc => a.cmp(b),
            OrderDirection::Desc => b.cmp(a),
        },
    }
}

fn apply_window(rows: Vec<Row>, window: &WindowSpec) -> Vec<Row> {
    let mut partitions: BTreeMap<Value, Vec<Row>> = BTreeMap::new();
    for row in rows {
        partitions
            .entry(row.get_or_null(&window.partition_by).clone())
            .or_default()
            .push(row);
    }

    let mut out = Vec::new();
    for (_, mut partition) in partitions {
        partition.sort_by(|a, b| compare_rows(a, b, &window.order_by));
        if let Some(max_rank) = window.max_rank {
            partition.truncate(max_rank);
        }
        out.extend(partition);
    }
    out
}

fn project(row: &mut Row, projection: &[String], annotations: &BTreeMap<String, Expr>) {
    if projection.is_empty() {
        return;
    }
    row.fields
        .retain(|name, _| projection.contains(name) || annotations.contains_key(name));
}

fn empty_aggregate(function: AggregateFunction) -> Value {
    match function {
        AggregateFunction::Count => Value::Int64(0),
        _ => Value::Null,
    }
}

fn sum_values(values: &[&Value]) -> Value {
    if values.is_empty() {
        return Value::Null;
    }
    let exact = values
        .iter()
        .try_fold(0i64, |total, v| v.as_i64().and_then(|n| total.checked_add(n)));
    match exact {
        Some(total) => Value::Int64(total),
        // Floats in the mix, or an integer total that overflows.
        None => Value::Float64(values.iter().filter_map(|v| v.as_f64()).sum()),
    }
}
