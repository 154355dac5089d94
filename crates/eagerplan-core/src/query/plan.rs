//! Compiled plan types.
//!
//! A [`CompiledPlan`] describes how to load the rows of one type: the
//! columns to project, to-one relations expanded inline, secondary batch
//! loads keyed by parent identifiers, store-computed annotations, and
//! per-subtype plans for fields only some concrete types declare.
//!
//! Every plan type implements [`Mergeable`], so the plans contributed by
//! different fields (and by repeated occurrences of one field) are combined
//! with the same structural merge as raw hint trees.

use std::collections::{BTreeMap, BTreeSet};

use super::pagination::PageWindow;
use super::walker::ConnectionSelection;
use crate::catalog::{EntityDef, RelationDef};
use crate::merge::{merge_exact, MergeConflict, MergeContext, Mergeable};
use eagerplan_proto::{Expr, FilterExpr, OrderSpec};

/// Loading plan for rows of one type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompiledPlan {
    /// Schema type the rows are selected as.
    pub type_name: String,
    /// Entity backing the type.
    pub entity: String,
    /// Columns to select.
    pub projection: BTreeSet<String>,
    /// To-one relations joined into the same query, by relation name.
    pub joins: BTreeMap<String, JoinPlan>,
    /// Secondary loads, by slot (join prefix plus attribute).
    pub batches: BTreeMap<String, BatchLoadDescriptor>,
    /// Annotations computed by the store, by name.
    pub annotations: BTreeMap<String, Expr>,
    /// Extra loading for concrete subtypes, by type name.
    pub deferred: BTreeMap<String, CompiledPlan>,
    /// Whether any part of the plan was derived from the request context.
    pub context_dependent: bool,
}

impl CompiledPlan {
    /// An empty plan for rows of `type_name` backed by `entity`.
    pub fn new(type_name: impl Into<String>, entity: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            entity: entity.into(),
            ..Self::default()
        }
    }

    /// The join reached by following `path` from this plan's rows.
    pub fn join_at(&self, path: &[String]) -> Option<&JoinPlan> {
        let (first, rest) = path.split_first()?;
        let mut join = self.joins.get(first)?;
        for segment in rest {
            join = join.joins.get(segment)?;
        }
        Some(join)
    }

    /// Mutable access to the join at `path`.
    pub fn join_at_mut(&mut self, path: &[String]) -> Option<&mut JoinPlan> {
        let (first, rest) = path.split_first()?;
        let mut join = self.joins.get_mut(first)?;
        for segment in rest {
            join = join.joins.get_mut(segment)?;
        }
        Some(join)
    }

    /// Every join of the plan as a relation path, depth first.
    pub fn join_paths(&self) -> Vec<Vec<String>> {
        let mut out = Vec::new();
        for (name, join) in &self.joins {
            join.collect_paths(vec![name.clone()], &mut out);
        }
        out
    }
}

impl Mergeable for CompiledPlan {
    fn merge(self, other: Self, ctx: &mut MergeContext) -> Result<Self, MergeConflict> {
        Ok(Self {
            type_name: merge_exact(self.type_name, other.type_name, ctx, "types")?,
            entity: merge_exact(self.entity, other.entity, ctx, "entities")?,
            projection: self.projection.merge(other.projection, ctx)?,
            joins: self.joins.merge(other.joins, ctx)?,
            batches: self.batches.merge(other.batches, ctx)?,
            annotations: self.annotations.merge(other.annotations, ctx)?,
            deferred: self.deferred.merge(other.deferred, ctx)?,
            context_dependent: self.context_dependent || other.context_dependent,
        })
    }
}

/// A to-one relation expanded inline.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinPlan {
    /// Relation being followed.
    pub relation: String,
    /// Target entity.
    pub entity: String,
    /// Column of the source row holding the key.
    pub source_field: String,
    /// Column of the target row matched against the key.
    pub target_field: String,
    /// Target columns to select.
    pub projection: BTreeSet<String>,
    /// Annotations computed on the target row.
    pub annotations: BTreeMap<String, Expr>,
    /// Further to-one relations of the target.
    pub joins: BTreeMap<String, JoinPlan>,
}

impl JoinPlan {
    /// An empty join along `relation`.
    pub fn new(relation: &RelationDef) -> Self {
        Self {
            relation: relation.name.clone(),
            entity: relation.to_entity.clone(),
            source_field: relation.from_field.clone(),
            target_field: relation.to_field.clone(),
            projection: BTreeSet::new(),
            annotations: BTreeMap::new(),
            joins: BTreeMap::new(),
        }
    }

    fn collect_paths(&self, prefix: Vec<String>, out: &mut Vec<Vec<String>>) {
        for (name, join) in &self.joins {
            let mut path = prefix.clone();
            path.push(name.clone());
            join.collect_paths(path, out);
        }
        out.push(prefix);
    }
}

impl Mergeable for JoinPlan {
    fn merge(self, other: Self, ctx: &mut MergeContext) -> Result<Self, MergeConflict> {
        Ok(Self {
            relation: merge_exact(self.relation, other.relation, ctx, "relations")?,
            entity: merge_exact(self.entity, other.entity, ctx, "entities")?,
            source_field: merge_exact(self.source_field, other.source_field, ctx, "join keys")?,
            target_field: merge_exact(self.target_field, other.target_field, ctx, "join keys")?,
            projection: self.projection.merge(other.projection, ctx)?,
            annotations: self.annotations.merge(other.annotations, ctx)?,
            joins: self.joins.merge(other.joins, ctx)?,
        })
    }
}

/// A secondary load of related rows keyed by parent identifiers.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchLoadDescriptor {
    /// Joins to follow from the plan's rows to reach the parent rows.
    pub join_path: Vec<String>,
    /// Relation from the parent rows to the loaded rows.
    pub relation: RelationDef,
    /// Slot attribute: the cache attribute, the relation name, or the
    /// relation plus a window fingerprint for paginated loads.
    pub attribute: String,
    /// Response keys a paginated result is attached under. Empty means
    /// the result is attached under `attribute`.
    pub response_keys: BTreeSet<String>,
    /// Filter of the related view.
    pub filter: Option<FilterExpr>,
    /// Ordering of the related view.
    pub order: Vec<OrderSpec>,
    /// Per-parent pagination.
    pub window: Option<PageWindow>,
    /// Connection parts requested, for connection fields.
    pub connection: Option<ConnectionSelection>,
    /// Plan for the loaded rows.
    pub plan: CompiledPlan,
}

impl BatchLoadDescriptor {
    /// The slot key: join prefix plus attribute.
    pub fn slot(&self) -> String {
        slot_key(&self.join_path, &self.attribute)
    }

    /// Attributes the loaded rows are attached under on each parent.
    pub fn attach_keys(&self) -> Vec<String> {
        if self.response_keys.is_empty() {
            vec![self.attribute.clone()]
        } else {
            self.response_keys.iter().cloned().collect()
        }
    }

    /// Whether the parents need a separate count query.
    pub fn wants_total_count(&self) -> bool {
        self.connection.is_some_and(|c| c.total_count)
    }

    /// Relation path from the plan's rows, ending with the loaded relation.
    pub fn full_path(&self) -> Vec<String> {
        let mut path = self.join_path.clone();
        path.push(self.relation.name.clone());
        path
    }
}

/// Slot key for an attribute reached through `join_path`.
pub fn slot_key(join_path: &[String], attribute: &str) -> String {
    if join_path.is_empty() {
        attribute.to_string()
    } else {
        format!("{}.{attribute}", join_path.join("."))
    }
}

impl Mergeable for BatchLoadDescriptor {
    fn merge(self, other: Self, ctx: &mut MergeContext) -> Result<Self, MergeConflict> {
        let connection = match (self.connection, other.connection) {
            (Some(a), Some(b)) => Some(a.union(b)),
            (a, b) => a.or(b),
        };
        Ok(Self {
            join_path: merge_exact(self.join_path, other.join_path, ctx, "join paths")?,
            relation: merge_exact(self.relation, other.relation, ctx, "relations")?,
            attribute: merge_exact(self.attribute, other.attribute, ctx, "attributes")?,
            response_keys: self.response_keys.merge(other.response_keys, ctx)?,
            filter: merge_exact(self.filter, other.filter, ctx, "base filters")?,
            order: merge_exact(self.order, other.order, ctx, "orderings")?,
            window: merge_exact(self.window, other.window, ctx, "pagination")?,
            connection,
            plan: self.plan.merge(other.plan, ctx)?,
        })
    }
}

/// Columns that must be loaded for rows of `entity` regardless of the
/// selection.
pub(crate) fn required_columns(entity: &EntityDef, discriminator: Option<&str>) -> Vec<String> {
    let mut columns = vec![entity.identity_field.clone()];
    if let Some(column) = discriminator {
        columns.push(column.to_string());
    }
    columns
}
