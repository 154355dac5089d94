//! Selection walker.
//!
//! Normalizes a transport-level [`Document`] into a [`FieldNode`] tree:
//!
//! - fields are keyed by response key; repeated keys are deep-merged,
//!   keeping the first occurrence as the base,
//! - `@include` / `@skip` are evaluated against the request variables and
//!   excluded branches are dropped,
//! - fragment spreads and inline fragments are expanded; fragments whose
//!   type condition names a concrete subtype of an interface are tracked
//!   per subtype instead of being unioned into the base selection,
//! - connection wrappers (`edges { node cursor }`, `nodes`, `pageInfo`,
//!   `totalCount`) collapse into the node selection plus a
//!   [`ConnectionSelection`] flag set.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::catalog::{FieldKind, ObjectField, Registry, TypeDef};
use crate::config::PlannerConfig;
use crate::context::RequestContext;
use crate::error::{Error, Result};
use eagerplan_proto::{
    Directive, Document, FieldSelection, FragmentDefinition, InputValue, Selection, Value,
};

const TYPENAME_FIELD: &str = "__typename";

/// Which parts of a connection wrapper were requested.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionSelection {
    /// `edges` was selected.
    pub edges: bool,
    /// `edges { cursor }` was selected.
    pub cursor: bool,
    /// `nodes` was selected.
    pub nodes: bool,
    /// `pageInfo` was selected.
    pub page_info: bool,
    /// `totalCount` was selected.
    pub total_count: bool,
}

impl ConnectionSelection {
    /// Union of two flag sets.
    pub fn union(self, other: Self) -> Self {
        Self {
            edges: self.edges || other.edges,
            cursor: self.cursor || other.cursor,
            nodes: self.nodes || other.nodes,
            page_info: self.page_info || other.page_info,
            total_count: self.total_count || other.total_count,
        }
    }
}

/// A normalized field occurrence.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldNode {
    /// Key in the response (alias or field name).
    pub response_key: String,
    /// Schema field name.
    pub field_name: String,
    /// Type declaring the field.
    pub parent_type: String,
    /// Target type of relation and connection fields.
    pub target_type: Option<String>,
    /// Arguments with variables substituted.
    pub arguments: BTreeMap<String, InputValue>,
    /// Child fields selected on the target type.
    pub children: BTreeMap<String, FieldNode>,
    /// Child fields selected only for a concrete subtype of the target.
    pub by_type: BTreeMap<String, BTreeMap<String, FieldNode>>,
    /// Connection wrapper flags for connection fields.
    pub connection: Option<ConnectionSelection>,
}

impl FieldNode {
    /// Child by response key.
    pub fn child(&self, key: &str) -> Option<&FieldNode> {
        self.children.get(key)
    }

    /// Whether the node has no nested selection at all.
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty() && self.by_type.is_empty()
    }
}

#[derive(Debug, Default)]
struct Collected {
    fields: BTreeMap<String, FieldNode>,
    by_type: BTreeMap<String, BTreeMap<String, FieldNode>>,
}

impl Collected {
    fn insert(&mut self, node: FieldNode) -> Result<()> {
        insert_shared(&mut self.fields, &self.by_type, node)
    }

    fn absorb(&mut self, other: Collected) -> Result<()> {
        for node in other.fields.into_values() {
            self.insert(node)?;
        }
        for (type_name, fields) in other.by_type {
            self.absorb_for_type(&type_name, fields)?;
        }
        Ok(())
    }

    fn absorb_for_type(&mut self, type_name: &str, fields: BTreeMap<String, FieldNode>) -> Result<()> {
        for node in fields.into_values() {
            insert_typed(&self.fields, &mut self.by_type, type_name, node)?;
        }
        Ok(())
    }
}

/// Insert a field selected for every concrete type. Its response key must
/// agree with any subtype branch using the same key.
fn insert_shared(
    fields: &mut BTreeMap<String, FieldNode>,
    by_type: &BTreeMap<String, BTreeMap<String, FieldNode>>,
    node: FieldNode,
) -> Result<()> {
    for branch in by_type.values() {
        if let Some(existing) = branch.get(&node.response_key) {
            ensure_same_field(existing, &node)?;
        }
    }
    insert_field(fields, node)
}

/// Insert a field selected for one concrete type.
fn insert_typed(
    fields: &BTreeMap<String, FieldNode>,
    by_type: &mut BTreeMap<String, BTreeMap<String, FieldNode>>,
    type_name: &str,
    node: FieldNode,
) -> Result<()> {
    if let Some(existing) = fields.get(&node.response_key) {
        ensure_same_field(existing, &node)?;
    }
    insert_field(by_type.entry(type_name.to_string()).or_default(), node)
}

fn insert_field(fields: &mut BTreeMap<String, FieldNode>, node: FieldNode) -> Result<()> {
    match fields.get_mut(&node.response_key) {
        Some(existing) => merge_nodes(existing, node),
        None => {
            fields.insert(node.response_key.clone(), node);
            Ok(())
        }
    }
}

fn ensure_same_field(base: &FieldNode, other: &FieldNode) -> Result<()> {
    if base.field_name != other.field_name {
        return Err(Error::InvalidSelection(format!(
            "response key '{}' selects both '{}' and '{}'",
            base.response_key, base.field_name, other.field_name
        )));
    }
    if base.arguments != other.arguments {
        return Err(Error::InvalidSelection(format!(
            "response key '{}' selects '{}' with different arguments",
            base.response_key, base.field_name
        )));
    }
    Ok(())
}

fn merge_nodes(base: &mut FieldNode, other: FieldNode) -> Result<()> {
    ensure_same_field(base, &other)?;

    for child in other.children.into_values() {
        insert_shared(&mut base.children, &base.by_type, child)?;
    }
    for (type_name, fields) in other.by_type {
        for child in fields.into_values() {
            insert_typed(&base.children, &mut base.by_type, &type_name, child)?;
        }
    }
    base.connection = match (base.connection, other.connection) {
        (Some(a), Some(b)) => Some(a.union(b)),
        (a, b) => a.or(b),
    };
    Ok(())
}

/// Walks selection documents against a registry.
pub struct SelectionWalker<'a> {
    registry: &'a Registry,
    config: &'a PlannerConfig,
    ctx: &'a RequestContext,
}

struct Fragments<'d> {
    definitions: &'d BTreeMap<String, FragmentDefinition>,
    active: Vec<String>,
}

impl<'a> SelectionWalker<'a> {
    /// Create a walker for one request.
    pub fn new(registry: &'a Registry, config: &'a PlannerConfig, ctx: &'a RequestContext) -> Self {
        Self {
            registry,
            config,
            ctx,
        }
    }

    /// Normalize a document into its root field node.
    pub fn walk(&self, document: &Document) -> Result<FieldNode> {
        let root = self.registry.root_field(&document.root.name)?;
        let mut fragments = Fragments {
            definitions: &document.fragments,
            active: Vec::new(),
        };

        let (collected, connection) = if root.connection {
            let (collected, flags) =
                self.collect_connection(&root.target_type, &document.root.selections, 0, &mut fragments)?;
            (collected, Some(flags))
        } else {
            (
                self.collect(&root.target_type, &document.root.selections, 0, &mut fragments)?,
                None,
            )
        };

        Ok(FieldNode {
            response_key: document.root.response_key().to_string(),
            field_name: root.name.clone(),
            parent_type: "Query".to_string(),
            target_type: Some(root.target_type.clone()),
            arguments: self.resolve_arguments(&document.root.arguments)?,
            children: collected.fields,
            by_type: collected.by_type,
            connection,
        })
    }

    fn collect(
        &self,
        type_name: &str,
        selections: &[Selection],
        depth: usize,
        fragments: &mut Fragments<'_>,
    ) -> Result<Collected> {
        let type_def = self.registry.type_def(type_name)?;
        let mut collected = Collected::default();

        for selection in selections {
            match selection {
                Selection::Field(field) => {
                    if !self.included(&field.directives)? || field.name == TYPENAME_FIELD {
                        continue;
                    }
                    let declared = type_def.field(&field.name).ok_or_else(|| Error::UnknownField {
                        type_name: type_def.name.clone(),
                        field: field.name.clone(),
                    })?;
                    let node = self.field_node(type_def, declared, field, depth, fragments)?;
                    collected.insert(node)?;
                }
                Selection::FragmentSpread { name, directives } => {
                    if !self.included(directives)? {
                        continue;
                    }
                    let definitions = fragments.definitions;
                    let fragment = definitions
                        .get(name)
                        .ok_or_else(|| Error::UnknownFragment(name.clone()))?;
                    if fragments.active.contains(name) {
                        return Err(Error::InvalidSelection(format!(
                            "fragment '{name}' spreads itself"
                        )));
                    }
                    fragments.active.push(name.clone());
                    let inner = self.apply_fragment(
                        type_def,
                        Some(&fragment.type_condition),
                        &fragment.selections,
                        depth,
                        fragments,
                    );
                    fragments.active.pop();
                    collected.absorb(inner?)?;
                }
                Selection::InlineFragment {
                    type_condition,
                    directives,
                    selections,
                } => {
                    if !self.included(directives)? {
                        continue;
                    }
                    let inner = self.apply_fragment(
                        type_def,
                        type_condition.as_deref(),
                        selections,
                        depth,
                        fragments,
                    )?;
                    collected.absorb(inner)?;
                }
            }
        }

        Ok(collected)
    }

    fn apply_fragment(
        &self,
        type_def: &TypeDef,
        condition: Option<&str>,
        selections: &[Selection],
        depth: usize,
        fragments: &mut Fragments<'_>,
    ) -> Result<Collected> {
        let Some(condition) = condition else {
            return self.collect(&type_def.name, selections, depth, fragments);
        };

        if !self.registry.has_type(condition) {
            return Err(Error::UnknownType(condition.to_string()));
        }
        if condition == type_def.name || self.registry.implements(&type_def.name, condition) {
            return self.collect(&type_def.name, selections, depth, fragments);
        }

        let targets: Vec<&String> = if type_def.possible_types().iter().any(|p| p == condition) {
            type_def
                .possible_types()
                .iter()
                .filter(|p| *p == condition)
                .collect()
        } else {
            type_def
                .possible_types()
                .iter()
                .filter(|p| self.registry.implements(p, condition))
                .collect()
        };
        if targets.is_empty() {
            return Err(Error::IncompatibleTypeCondition {
                condition: condition.to_string(),
                type_name: type_def.name.clone(),
            });
        }

        let mut collected = Collected::default();
        for target in targets {
            let inner = self.collect(target, selections, depth, fragments)?;
            collected.absorb_for_type(target, inner.fields)?;
            for (nested_type, fields) in inner.by_type {
                collected.absorb_for_type(&nested_type, fields)?;
            }
        }
        Ok(collected)
    }

    fn field_node(
        &self,
        type_def: &TypeDef,
        declared: &ObjectField,
        selection: &FieldSelection,
        depth: usize,
        fragments: &mut Fragments<'_>,
    ) -> Result<FieldNode> {
        let mut node = FieldNode {
            response_key: selection.response_key().to_string(),
            field_name: declared.name.clone(),
            parent_type: type_def.name.clone(),
            target_type: declared.target_type().map(str::to_string),
            arguments: self.resolve_arguments(&selection.arguments)?,
            children: BTreeMap::new(),
            by_type: BTreeMap::new(),
            connection: None,
        };

        match &declared.kind {
            FieldKind::Relation { target_type, .. } => {
                let depth = self.descend(depth)?;
                let collected = self.collect(target_type, &selection.selections, depth, fragments)?;
                node.children = collected.fields;
                node.by_type = collected.by_type;
            }
            FieldKind::Connection { target_type, .. } => {
                let depth = self.descend(depth)?;
                let (collected, flags) =
                    self.collect_connection(target_type, &selection.selections, depth, fragments)?;
                node.children = collected.fields;
                node.by_type = collected.by_type;
                node.connection = Some(flags);
            }
            FieldKind::Scalar { .. } => {
                if !selection.selections.is_empty() {
                    return Err(Error::InvalidSelection(format!(
                        "scalar field '{}.{}' has a sub-selection",
                        type_def.name, declared.name
                    )));
                }
            }
            FieldKind::Computed => {}
        }

        Ok(node)
    }

    fn descend(&self, depth: usize) -> Result<usize> {
        let depth = depth + 1;
        if depth > self.config.max_depth {
            return Err(Error::DepthExceeded {
                max: self.config.max_depth,
            });
        }
        Ok(depth)
    }

    fn collect_connection(
        &self,
        target_type: &str,
        selections: &[Selection],
        depth: usize,
        fragments: &mut Fragments<'_>,
    ) -> Result<(Collected, ConnectionSelection)> {
        let mut collected = Collected::default();
        let mut flags = ConnectionSelection::default();

        for field in self.wrapper_fields(selections, fragments)? {
            match field.name.as_str() {
                "edges" => {
                    flags.edges = true;
                    for edge_field in self.wrapper_fields(&field.selections, fragments)? {
                        match edge_field.name.as_str() {
                            "node" => {
                                let inner = self.collect(
                                    target_type,
                                    &edge_field.selections,
                                    depth,
                                    fragments,
                                )?;
                                collected.absorb(inner)?;
                            }
                            "cursor" => flags.cursor = true,
                            TYPENAME_FIELD => {}
                            other => {
                                return Err(Error::UnknownField {
                                    type_name: format!("{target_type}Edge"),
                                    field: other.to_string(),
                                })
                            }
                        }
                    }
                }
                "nodes" => {
                    flags.nodes = true;
                    let inner = self.collect(target_type, &field.selections, depth, fragments)?;
                    collected.absorb(inner)?;
                }
                "pageInfo" => flags.page_info = true,
                "totalCount" => flags.total_count = true,
                TYPENAME_FIELD => {}
                other => {
                    return Err(Error::UnknownField {
                        type_name: format!("{target_type}Connection"),
                        field: other.to_string(),
                    })
                }
            }
        }

        Ok((collected, flags))
    }

    /// Included fields of a wrapper object, with fragments flattened.
    /// Wrapper types are not registered, so type conditions are not checked.
    fn wrapper_fields(
        &self,
        selections: &[Selection],
        fragments: &mut Fragments<'_>,
    ) -> Result<Vec<FieldSelection>> {
        let mut out = Vec::new();
        for selection in selections {
            match selection {
                Selection::Field(field) => {
                    if self.included(&field.directives)? {
                        out.push(field.clone());
                    }
                }
                Selection::FragmentSpread { name, directives } => {
                    if !self.included(directives)? {
                        continue;
                    }
                    let definitions = fragments.definitions;
                    let fragment = definitions
                        .get(name)
                        .ok_or_else(|| Error::UnknownFragment(name.clone()))?;
                    if fragments.active.contains(name) {
                        return Err(Error::InvalidSelection(format!(
                            "fragment '{name}' spreads itself"
                        )));
                    }
                    fragments.active.push(name.clone());
                    let inner = self.wrapper_fields(&fragment.selections, fragments);
                    fragments.active.pop();
                    out.extend(inner?);
                }
                Selection::InlineFragment {
                    directives,
                    selections,
                    ..
                } => {
                    if self.included(directives)? {
                        out.extend(self.wrapper_fields(selections, fragments)?);
                    }
                }
            }
        }
        Ok(out)
    }

    fn included(&self, directives: &[Directive]) -> Result<bool> {
        for directive in directives {
            let condition = match directive.name.as_str() {
                "include" | "skip" => self.condition(directive)?,
                _ => continue,
            };
            let keep = if directive.name == "include" {
                condition
            } else {
                !condition
            };
            if !keep {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn condition(&self, directive: &Directive) -> Result<bool> {
        let argument = directive.arguments.get("if").ok_or_else(|| {
            Error::InvalidSelection(format!("@{} requires an 'if' argument", directive.name))
        })?;
        match self.resolve_input(argument)? {
            InputValue::Scalar(Value::Bool(b)) => Ok(b),
            _ => Err(Error::InvalidSelection(format!(
                "@{}(if:) must be a boolean",
                directive.name
            ))),
        }
    }

    fn resolve_arguments(
        &self,
        arguments: &BTreeMap<String, InputValue>,
    ) -> Result<BTreeMap<String, InputValue>> {
        arguments
            .iter()
            .map(|(name, value)| Ok((name.clone(), self.resolve_input(value)?)))
            .collect()
    }

    fn resolve_input(&self, value: &InputValue) -> Result<InputValue> {
        Ok(match value {
            InputValue::Scalar(v) => InputValue::Scalar(v.clone()),
            InputValue::Variable(name) => InputValue::Scalar(
                self.ctx
                    .variable(name)
                    .cloned()
                    .ok_or_else(|| Error::MissingVariable(name.clone()))?,
            ),
            InputValue::List(items) => InputValue::List(
                items
                    .iter()
                    .map(|item| self.resolve_input(item))
                    .collect::<Result<_>>()?,
            ),
            InputValue::Object(fields) => InputValue::Object(self.resolve_arguments(fields)?),
        })
    }
}
