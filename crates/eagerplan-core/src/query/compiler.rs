//! Plan compiler.
//!
//! Turns a normalized [`FieldNode`] tree into a [`CompiledQuery`]. Each
//! selected field contributes a plan fragment built from its hints (or
//! from defaults derived from the field kind); fragments are combined with
//! the structural merge so that repeated or overlapping requirements
//! collapse and incompatible ones are reported.
//!
//! Defaults when a field declares no hint for its own path:
//!
//! | field                              | default                 |
//! |------------------------------------|-------------------------|
//! | scalar                             | project its column      |
//! | to-one relation to an object type  | join                    |
//! | to-one relation to an interface    | batch load              |
//! | to-many relation or connection     | batch load              |
//! | computed                           | nothing                 |

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::{debug, instrument, trace};

use super::cursor::ensure_total_order;
use super::pagination::{page_request_from_args, PageWindow};
use super::plan::{required_columns, BatchLoadDescriptor, CompiledPlan, JoinPlan};
use super::walker::{ConnectionSelection, FieldNode};
use crate::catalog::{FieldKind, ObjectField, Registry, TypeDef};
use crate::config::PlannerConfig;
use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::hint::{AnnotationHint, BatchLoadHint, Hint};
use crate::merge::{MergeConflict, MergeContext, Mergeable};
use eagerplan_proto::{FilterExpr, InputValue, OrderSpec};

const PAGE_ARGUMENTS: [&str; 4] = ["first", "last", "after", "before"];

/// A compiled root request, ready for execution.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    /// Root listing name.
    pub root_field: String,
    /// Response key of the root field.
    pub response_key: String,
    /// Filter of the root listing.
    pub filter: Option<FilterExpr>,
    /// Ordering of the root listing.
    pub order: Vec<OrderSpec>,
    /// Pagination of the root listing.
    pub window: Option<PageWindow>,
    /// Connection parts requested on a connection root.
    pub connection: Option<ConnectionSelection>,
    /// Plan for the root rows.
    pub plan: CompiledPlan,
    /// Conflicts accepted under the unsafe merge policy.
    pub unsafe_merges: Vec<MergeConflict>,
}

/// Compiles one request. Not reused across requests.
pub struct PlanCompiler<'a> {
    registry: &'a Registry,
    config: &'a PlannerConfig,
    ctx: &'a RequestContext,
    hints: HashMap<(String, String), Vec<Hint>>,
    merge: MergeContext,
}

impl<'a> PlanCompiler<'a> {
    /// Create a compiler for one request.
    pub fn new(registry: &'a Registry, config: &'a PlannerConfig, ctx: &'a RequestContext) -> Self {
        Self {
            registry,
            config,
            ctx,
            hints: HashMap::new(),
            merge: MergeContext::new(config.merge_policy),
        }
    }

    /// Compile the root field node produced by the selection walker.
    #[instrument(skip_all, fields(root = %root.field_name))]
    pub fn compile(mut self, root: &FieldNode) -> Result<CompiledQuery> {
        let root_field = self.registry.root_field(&root.field_name)?;
        let type_def = self.registry.type_def(&root_field.target_type)?;
        let identity = self.registry.entity(&type_def.entity)?.identity_field.clone();

        let mut plan = self.compile_selection(type_def, &root.children, &root.by_type)?;

        let (order, window) = if root_field.connection || has_page_arguments(&root.arguments) {
            let order = ensure_total_order(&root_field.base.order_by, &identity)?;
            let request = page_request_from_args(&root.arguments)?;
            let window = PageWindow::resolve(request, order.clone(), self.config)?;
            (order, Some(window))
        } else {
            (stable_order(&root_field.base.order_by, &identity)?, None)
        };
        plan.projection.extend(ordered_columns(&order));

        self.finalize(&mut plan)?;

        debug!(
            entity = %plan.entity,
            joins = plan.joins.len(),
            batches = plan.batches.len(),
            deferred = plan.deferred.len(),
            unsafe_merges = self.merge.overrides().len(),
            "compiled plan"
        );

        Ok(CompiledQuery {
            root_field: root_field.name.clone(),
            response_key: root.response_key.clone(),
            filter: root_field.base.filter.clone(),
            order,
            window,
            connection: root.connection,
            plan,
            unsafe_merges: self.merge.into_overrides(),
        })
    }

    /// Plan for one selection set of `type_def`.
    ///
    /// Fields selected for a concrete subtype compile into the base plan
    /// when the declared type has them, and into that subtype's deferred
    /// plan otherwise.
    fn compile_selection(
        &mut self,
        type_def: &TypeDef,
        children: &BTreeMap<String, FieldNode>,
        by_type: &BTreeMap<String, BTreeMap<String, FieldNode>>,
    ) -> Result<CompiledPlan> {
        let mut plan = CompiledPlan::new(&type_def.name, &type_def.entity);
        for node in children.values() {
            let fragment = self.compile_field(type_def, node)?;
            plan = self.absorb(plan, fragment)?;
        }

        for (concrete, fields) in by_type {
            let concrete_def = self.registry.type_def(concrete)?;
            let mut deferred = CompiledPlan::new(&concrete_def.name, &concrete_def.entity);
            for node in fields.values() {
                if type_def.field(&node.field_name).is_some() {
                    let fragment = self.compile_field(type_def, node)?;
                    plan = self.absorb(plan, fragment)?;
                } else {
                    let fragment = self.compile_field(concrete_def, node)?;
                    deferred = self.absorb(deferred, fragment)?;
                }
            }
            if deferred != CompiledPlan::new(&concrete_def.name, &concrete_def.entity) {
                plan.context_dependent |= deferred.context_dependent;
                plan.deferred.insert(concrete.clone(), deferred);
            }
        }

        Ok(plan)
    }

    fn compile_field(&mut self, type_def: &TypeDef, node: &FieldNode) -> Result<CompiledPlan> {
        let field = type_def
            .field(&node.field_name)
            .ok_or_else(|| Error::UnknownField {
                type_name: type_def.name.clone(),
                field: node.field_name.clone(),
            })?;
        let mut fragment = CompiledPlan::new(&type_def.name, &type_def.entity);

        if field.disable_optimization {
            trace!(type_name = %type_def.name, field = %field.name, "optimization disabled");
            return Ok(fragment);
        }
        fragment.context_dependent = field.hints.is_dynamic();

        let mut hints = self.field_hints(type_def, field);
        let own_path: Option<Vec<String>> = field.relation_name().map(|r| vec![r.to_string()]);

        match &field.kind {
            FieldKind::Scalar { column } if hints.is_empty() => {
                hints.push(Hint::Projection(vec![column.clone()]));
            }
            FieldKind::Relation { .. } | FieldKind::Connection { .. } => {
                let owned = hints.iter().any(|h| hint_path(h) == own_path.as_deref());
                if !owned {
                    hints.push(self.default_relation_hint(type_def, field)?);
                }
            }
            _ => {}
        }

        let mut owner_taken = false;
        for hint in &hints {
            let owns = !owner_taken && own_path.is_some() && hint_path(hint) == own_path.as_deref();
            owner_taken |= owns;
            let owner = owns.then_some((field, node));
            self.apply_hint(&mut fragment, hint, owner)?;
        }

        trace!(
            type_name = %type_def.name,
            field = %field.name,
            hints = hints.len(),
            "compiled field"
        );
        Ok(fragment)
    }

    /// Hints of a field for this request; dynamic sources run once.
    fn field_hints(&mut self, type_def: &TypeDef, field: &ObjectField) -> Vec<Hint> {
        let ctx = self.ctx;
        self.hints
            .entry((type_def.name.clone(), field.name.clone()))
            .or_insert_with(|| field.hints.resolve(ctx))
            .clone()
    }

    fn default_relation_hint(&self, type_def: &TypeDef, field: &ObjectField) -> Result<Hint> {
        let (relation_name, target_type) = match &field.kind {
            FieldKind::Relation {
                relation,
                target_type,
            }
            | FieldKind::Connection {
                relation,
                target_type,
            } => (relation, target_type),
            _ => {
                return Err(Error::InvalidSchema(format!(
                    "field '{}.{}' is not a relation",
                    type_def.name, field.name
                )))
            }
        };
        let relation = self.registry.relation(&type_def.entity, relation_name)?;
        let target = self.registry.type_def(target_type)?;

        Ok(if relation.is_to_many() || field.is_connection() || target.is_interface() {
            Hint::BatchLoad(BatchLoadHint::new(relation_name))
        } else {
            Hint::Join(vec![relation_name.clone()])
        })
    }

    fn apply_hint(
        &mut self,
        fragment: &mut CompiledPlan,
        hint: &Hint,
        owner: Option<(&ObjectField, &FieldNode)>,
    ) -> Result<()> {
        match hint {
            Hint::Projection(columns) => {
                for column in columns {
                    self.apply_projection(fragment, column)?;
                }
                Ok(())
            }
            Hint::Join(path) => self.apply_join(fragment, path, owner),
            Hint::BatchLoad(batch) => {
                let descriptor = self.batch_descriptor(fragment, batch, owner)?;
                self.add_batch(fragment, descriptor)
            }
            Hint::Annotation(annotation) => self.apply_annotation(fragment, annotation),
        }
    }

    fn apply_projection(&mut self, fragment: &mut CompiledPlan, column: &str) -> Result<()> {
        let path: Vec<String> = column.split('.').map(str::to_string).collect();
        let Some((column, prefix)) = path.split_last() else {
            return Err(Error::InvalidHint("empty projection".to_string()));
        };

        let entity = if prefix.is_empty() {
            fragment.entity.clone()
        } else {
            self.ensure_joins(fragment, prefix)?
        };
        if !self.registry.has_column(&entity, column) {
            return Err(Error::InvalidHint(format!(
                "projection of unknown column '{entity}.{column}'"
            )));
        }

        match fragment.join_at_mut(prefix) {
            Some(join) => join.projection.insert(column.clone()),
            None => fragment.projection.insert(column.clone()),
        };
        Ok(())
    }

    fn apply_join(
        &mut self,
        fragment: &mut CompiledPlan,
        path: &[String],
        owner: Option<(&ObjectField, &FieldNode)>,
    ) -> Result<()> {
        if path.is_empty() {
            return Err(Error::InvalidHint("empty join path".to_string()));
        }
        self.ensure_joins(fragment, path)?;

        let Some((field, node)) = owner else {
            return Ok(());
        };
        let target_type = field.target_type().unwrap_or_default();
        let target = self.registry.type_def(target_type)?;
        if target.is_interface() {
            return Err(Error::InvalidHint(format!(
                "cannot join '{}' into polymorphic type '{target_type}'",
                field.name
            )));
        }

        let child = self.compile_selection(target, &node.children, &node.by_type)?;
        self.fold_into_join(fragment, path, child)
    }

    /// Make sure every to-one join along `path` exists; returns the entity
    /// at the end of the path.
    fn ensure_joins(&self, fragment: &mut CompiledPlan, path: &[String]) -> Result<String> {
        let mut entity = fragment.entity.clone();
        let mut joins = &mut fragment.joins;
        for segment in path {
            let relation = self.registry.relation(&entity, segment)?;
            if relation.is_to_many() {
                return Err(Error::InvalidHint(format!(
                    "cannot join to-many relation '{entity}.{segment}'"
                )));
            }
            let join = joins
                .entry(segment.clone())
                .or_insert_with(|| JoinPlan::new(relation));
            entity = relation.to_entity.clone();
            joins = &mut join.joins;
        }
        Ok(entity)
    }

    fn fold_into_join(
        &mut self,
        fragment: &mut CompiledPlan,
        path: &[String],
        child: CompiledPlan,
    ) -> Result<()> {
        let CompiledPlan {
            projection,
            joins,
            batches,
            annotations,
            context_dependent,
            ..
        } = child;
        fragment.context_dependent |= context_dependent;

        let join = fragment
            .join_at_mut(path)
            .ok_or_else(|| Error::InvalidHint(format!("missing join '{}'", path.join("."))))?;
        let addition = JoinPlan {
            relation: join.relation.clone(),
            entity: join.entity.clone(),
            source_field: join.source_field.clone(),
            target_field: join.target_field.clone(),
            projection,
            annotations,
            joins,
        };
        *join = join.clone().merge(addition, &mut self.merge)?;

        for mut descriptor in batches.into_values() {
            descriptor.join_path = path.iter().cloned().chain(descriptor.join_path).collect();
            self.add_batch(fragment, descriptor)?;
        }
        Ok(())
    }

    fn batch_descriptor(
        &mut self,
        fragment: &mut CompiledPlan,
        hint: &BatchLoadHint,
        owner: Option<(&ObjectField, &FieldNode)>,
    ) -> Result<BatchLoadDescriptor> {
        let Some((relation_name, prefix)) = hint.path.split_last() else {
            return Err(Error::InvalidHint("empty batch load path".to_string()));
        };
        let parent_entity = if prefix.is_empty() {
            fragment.entity.clone()
        } else {
            self.ensure_joins(fragment, prefix)?
        };
        let relation = self.registry.relation(&parent_entity, relation_name)?.clone();
        let identity = self.registry.entity(&relation.to_entity)?.identity_field.clone();

        let mut plan = match owner {
            Some((field, node)) => {
                let target = self.registry.type_def(field.target_type().unwrap_or_default())?;
                self.compile_selection(target, &node.children, &node.by_type)?
            }
            None => CompiledPlan::new(&relation.to_entity, &relation.to_entity),
        };
        for nested in &hint.nested {
            self.apply_hint(&mut plan, nested, None)?;
        }

        let base_order = match owner {
            Some((field, _)) if hint.base.order_by.is_empty() => field.default_order.as_slice(),
            _ => hint.base.order_by.as_slice(),
        };
        let paginated = owner.is_some_and(|(field, node)| {
            field.is_connection() || has_page_arguments(&node.arguments)
        });

        let (order, window) = match owner {
            Some((_, node)) if paginated => {
                let order = ensure_total_order(base_order, &identity)?;
                let request = page_request_from_args(&node.arguments)?;
                let window = PageWindow::resolve(request, order.clone(), self.config)?;
                (order, Some(window))
            }
            _ => (stable_order(base_order, &identity)?, None),
        };

        // Paginated views share a slot only when they cut the same window;
        // each alias then receives the shared result.
        let mut response_keys = BTreeSet::new();
        let attribute = match (&hint.cache_attr, owner, &window) {
            (Some(attr), _, _) => attr.clone(),
            (None, Some((_, node)), Some(window)) => {
                response_keys.insert(node.response_key.clone());
                let kind = if node.connection.is_some() { "connection" } else { "list" };
                format!("{}[{kind};{}]", relation.name, window.fingerprint())
            }
            _ => relation.name.clone(),
        };

        Ok(BatchLoadDescriptor {
            join_path: prefix.to_vec(),
            attribute,
            response_keys,
            filter: hint.base.filter.clone(),
            order,
            window,
            connection: owner.and_then(|(_, node)| node.connection),
            relation,
            plan,
        })
    }

    fn add_batch(&mut self, fragment: &mut CompiledPlan, descriptor: BatchLoadDescriptor) -> Result<()> {
        let mut addition = BTreeMap::new();
        addition.insert(descriptor.slot(), descriptor);
        let current = std::mem::take(&mut fragment.batches);
        fragment.batches = current.merge(addition, &mut self.merge)?;
        Ok(())
    }

    fn apply_annotation(&mut self, fragment: &mut CompiledPlan, hint: &AnnotationHint) -> Result<()> {
        let mut addition = BTreeMap::new();
        addition.insert(hint.name.clone(), hint.expr.clone());
        let current = std::mem::take(&mut fragment.annotations);
        fragment.annotations = current.merge(addition, &mut self.merge)?;
        fragment.context_dependent |= hint.depends_on_context;
        Ok(())
    }

    fn absorb(&mut self, plan: CompiledPlan, fragment: CompiledPlan) -> Result<CompiledPlan> {
        Ok(plan.merge(fragment, &mut self.merge)?)
    }

    /// Resolve join/batch overlaps and add the columns execution relies
    /// on: identities, discriminators, relation keys and ordering columns.
    fn finalize(&mut self, plan: &mut CompiledPlan) -> Result<()> {
        let slots: Vec<String> = plan.batches.keys().cloned().collect();
        for slot in slots {
            let Some(full_path) = plan.batches.get(&slot).map(BatchLoadDescriptor::full_path) else {
                continue;
            };
            if plan.join_at(&full_path).is_none() {
                continue;
            }
            self.merge.scoped(&full_path.join("."), |ctx| {
                ctx.conflict("path is both joined and batch-loaded")
            })?;

            let prefix_in_use = plan
                .batches
                .values()
                .any(|b| b.join_path.starts_with(&full_path));
            let join = if prefix_in_use {
                plan.join_at(&full_path).cloned()
            } else {
                remove_join(plan, &full_path)
            };
            if let (Some(join), Some(batch)) = (join, plan.batches.get_mut(&slot)) {
                batch.plan.projection.extend(join.projection);
                for (name, expr) in join.annotations {
                    batch.plan.annotations.entry(name).or_insert(expr);
                }
                for (name, nested) in join.joins {
                    batch.plan.joins.entry(name).or_insert(nested);
                }
            }
        }

        let entity = self.registry.entity(&plan.entity)?;
        plan.projection
            .extend(required_columns(entity, self.registry.discriminator(&plan.entity)));

        for path in plan.join_paths() {
            let Some((_, prefix)) = path.split_last() else {
                continue;
            };
            let Some(join) = plan.join_at(&path) else {
                continue;
            };
            let source_field = join.source_field.clone();
            let target_field = join.target_field.clone();
            let identity = self.registry.entity(&join.entity)?.identity_field.clone();

            match plan.join_at_mut(prefix) {
                Some(parent) => parent.projection.insert(source_field),
                None => plan.projection.insert(source_field),
            };
            if let Some(join) = plan.join_at_mut(&path) {
                join.projection.insert(target_field);
                join.projection.insert(identity);
            }
        }

        let sources: Vec<(Vec<String>, String)> = plan
            .batches
            .values()
            .map(|b| (b.join_path.clone(), b.relation.from_field.clone()))
            .collect();
        for (join_path, column) in sources {
            match plan.join_at_mut(&join_path) {
                Some(join) => join.projection.insert(column),
                None => plan.projection.insert(column),
            };
        }

        for batch in plan.batches.values_mut() {
            batch.plan.projection.insert(batch.relation.to_field.clone());
            batch.plan.projection.extend(ordered_columns(&batch.order));
            self.finalize(&mut batch.plan)?;
            plan.context_dependent |= batch.plan.context_dependent;
        }
        for deferred in plan.deferred.values_mut() {
            self.finalize(deferred)?;
        }
        Ok(())
    }
}

fn hint_path(hint: &Hint) -> Option<&[String]> {
    match hint {
        Hint::Join(path) => Some(path),
        Hint::BatchLoad(batch) => Some(&batch.path),
        Hint::Projection(_) | Hint::Annotation(_) => None,
    }
}

fn has_page_arguments(arguments: &BTreeMap<String, InputValue>) -> bool {
    PAGE_ARGUMENTS.iter().any(|name| arguments.contains_key(*name))
}

/// Deterministic ordering for unpaginated reads: identity is appended as
/// a tie-breaker unless the ordering is random.
fn stable_order(order: &[OrderSpec], identity: &str) -> Result<Vec<OrderSpec>> {
    if order.iter().any(OrderSpec::is_random) {
        return Ok(order.to_vec());
    }
    ensure_total_order(order, identity)
}

fn ordered_columns(order: &[OrderSpec]) -> impl Iterator<Item = String> + '_ {
    order
        .iter()
        .filter(|spec| !spec.is_random())
        .map(|spec| spec.field.clone())
}

fn remove_join(plan: &mut CompiledPlan, path: &[String]) -> Option<JoinPlan> {
    let (last, prefix) = path.split_last()?;
    let joins = if prefix.is_empty() {
        &mut plan.joins
    } else {
        &mut plan.join_at_mut(prefix)?.joins
    };
    joins.remove(last)
}
