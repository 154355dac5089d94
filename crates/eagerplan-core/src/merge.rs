//! Structural merge of hint trees.
//!
//! Hints for the same relational path may arrive several times (two
//! aliases, a base selection and a fragment). They are combined with a
//! pure, deep-first merge:
//!
//! - mappings merge by key union, recursing into keys present on both sides,
//! - sets merge by union,
//! - leaves merge by equality; differing leaves are a conflict.
//!
//! Under [`MergePolicy::Safe`] a conflict aborts the merge with the path it
//! occurred at. Under [`MergePolicy::Unsafe`] the first-seen leaf is kept and
//! the conflict is recorded so callers can report it.
//!
//! Nothing here knows about queries; the plan compiler implements
//! [`Mergeable`] for its own types on top of these primitives.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use thiserror::Error;
use tracing::warn;

use crate::config::MergePolicy;
use eagerplan_proto::{Expr, FilterExpr, OrderSpec, PageRequest, Value};

/// Two values at the same path that cannot be combined.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("conflict at '{path}': {reason}")]
pub struct MergeConflict {
    /// Dotted path of the conflicting key.
    pub path: String,
    /// What differed.
    pub reason: String,
}

/// State threaded through a merge: the policy, the current path, and the
/// conflicts accepted so far.
#[derive(Debug)]
pub struct MergeContext {
    policy: MergePolicy,
    path: Vec<String>,
    overrides: Vec<MergeConflict>,
}

impl MergeContext {
    /// Create a context for a merge under `policy`.
    pub fn new(policy: MergePolicy) -> Self {
        Self {
            policy,
            path: Vec::new(),
            overrides: Vec::new(),
        }
    }

    /// The merge policy.
    pub fn policy(&self) -> MergePolicy {
        self.policy
    }

    /// The current dotted path.
    pub fn path(&self) -> String {
        if self.path.is_empty() {
            "<root>".to_string()
        } else {
            self.path.join(".")
        }
    }

    /// Run `f` one level deeper in the tree.
    pub fn scoped<T>(&mut self, segment: &str, f: impl FnOnce(&mut Self) -> T) -> T {
        self.path.push(segment.to_string());
        let result = f(self);
        self.path.pop();
        result
    }

    /// Report a conflict at the current path.
    ///
    /// Fails under the safe policy; records the conflict and succeeds
    /// under the unsafe one.
    pub fn conflict(&mut self, reason: impl Into<String>) -> Result<(), MergeConflict> {
        let conflict = MergeConflict {
            path: self.path(),
            reason: reason.into(),
        };
        match self.policy {
            MergePolicy::Safe => Err(conflict),
            MergePolicy::Unsafe => {
                warn!(path = %conflict.path, reason = %conflict.reason, "accepting unsafe merge");
                self.overrides.push(conflict);
                Ok(())
            }
        }
    }

    /// Conflicts accepted so far.
    pub fn overrides(&self) -> &[MergeConflict] {
        &self.overrides
    }

    /// Consume the context, returning the accepted conflicts.
    pub fn into_overrides(self) -> Vec<MergeConflict> {
        self.overrides
    }
}

/// A value that can absorb another value of the same shape.
pub trait Mergeable: Sized {
    /// Combine `self` (seen first) with `other`.
    fn merge(self, other: Self, ctx: &mut MergeContext) -> Result<Self, MergeConflict>;
}

/// Merge two leaves by equality. On conflict the first value wins.
pub fn merge_exact<T>(a: T, b: T, ctx: &mut MergeContext, what: &str) -> Result<T, MergeConflict>
where
    T: PartialEq + fmt::Debug,
{
    if a != b {
        ctx.conflict(format!("conflicting {what}: {a:?} vs {b:?}"))?;
    }
    Ok(a)
}

/// The result of a top-level merge.
#[derive(Debug, Clone, PartialEq)]
pub struct Merged<T> {
    /// The combined value.
    pub value: T,
    /// Conflicts accepted under the unsafe policy.
    pub overrides: Vec<MergeConflict>,
}

/// Merge `b` into `a`.
pub fn merge<T: Mergeable>(a: T, b: T, policy: MergePolicy) -> Result<Merged<T>, MergeConflict> {
    let mut ctx = MergeContext::new(policy);
    let value = a.merge(b, &mut ctx)?;
    Ok(Merged {
        value,
        overrides: ctx.into_overrides(),
    })
}

impl<T: Ord> Mergeable for BTreeSet<T> {
    fn merge(mut self, other: Self, _ctx: &mut MergeContext) -> Result<Self, MergeConflict> {
        self.extend(other);
        Ok(self)
    }
}

impl<V: Mergeable> Mergeable for BTreeMap<String, V> {
    fn merge(mut self, other: Self, ctx: &mut MergeContext) -> Result<Self, MergeConflict> {
        for (key, value) in other {
            let merged = match self.remove(&key) {
                Some(existing) => ctx.scoped(&key, |ctx| existing.merge(value, ctx))?,
                None => value,
            };
            self.insert(key, merged);
        }
        Ok(self)
    }
}

impl<T: Mergeable> Mergeable for Option<T> {
    fn merge(self, other: Self, ctx: &mut MergeContext) -> Result<Self, MergeConflict> {
        match (self, other) {
            (Some(a), Some(b)) => a.merge(b, ctx).map(Some),
            (a, b) => Ok(a.or(b)),
        }
    }
}

macro_rules! exact_leaf {
    ($($ty:ty => $what:literal),* $(,)?) => {
        $(
            impl Mergeable for $ty {
                fn merge(self, other: Self, ctx: &mut MergeContext) -> Result<Self, MergeConflict> {
                    merge_exact(self, other, ctx, $what)
                }
            }
        )*
    };
}

exact_leaf! {
    Value => "values",
    Expr => "expressions",
    FilterExpr => "filters",
    Vec<OrderSpec> => "orderings",
    PageRequest => "pagination",
    String => "names",
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    type Tree = BTreeMap<String, BTreeMap<String, BTreeSet<String>>>;

    fn tree(entries: &[(&str, &str, &[&str])]) -> Tree {
        let mut tree = Tree::new();
        for (a, b, leaves) in entries {
            tree.entry(a.to_string())
                .or_default()
                .entry(b.to_string())
                .or_default()
                .extend(leaves.iter().map(|l| l.to_string()));
        }
        tree
    }

    #[test]
    fn test_nested_maps_merge_by_union() {
        let a = tree(&[("posts", "comments", &["id"]), ("profile", "avatar", &["url"])]);
        let b = tree(&[("posts", "comments", &["text"]), ("posts", "tags", &["name"])]);

        let merged = merge(a, b, MergePolicy::Safe).unwrap();

        assert_eq!(
            merged.value,
            tree(&[
                ("posts", "comments", &["id", "text"]),
                ("posts", "tags", &["name"]),
                ("profile", "avatar", &["url"]),
            ])
        );
        assert!(merged.overrides.is_empty());
    }

    #[test]
    fn test_merge_is_idempotent() {
        let a = tree(&[("posts", "comments", &["id"])]);
        let merged = merge(a.clone(), a.clone(), MergePolicy::Safe).unwrap();
        assert_eq!(merged.value, a);
    }

    #[test]
    fn test_equal_leaves_deduplicate() {
        let mut a = BTreeMap::new();
        a.insert("full_name".to_string(), Expr::column("name"));
        let b = a.clone();

        let merged = merge(a.clone(), b, MergePolicy::Safe).unwrap();
        assert_eq!(merged.value, a);
    }

    #[test]
    fn test_conflicting_leaves_fail_with_path() {
        let mut a: BTreeMap<String, BTreeMap<String, Value>> = BTreeMap::new();
        a.entry("posts".into()).or_default().insert("limit".into(), Value::Int64(2));
        let mut b: BTreeMap<String, BTreeMap<String, Value>> = BTreeMap::new();
        b.entry("posts".into()).or_default().insert("limit".into(), Value::Int64(3));

        let err = merge(a, b, MergePolicy::Safe).unwrap_err();

        assert_eq!(err.path, "posts.limit");
        assert!(err.reason.contains("conflicting values"));
    }

    #[test]
    fn test_unsafe_policy_keeps_first_and_records() {
        let mut a = BTreeMap::new();
        a.insert("score".to_string(), Expr::column("likes"));
        let mut b = BTreeMap::new();
        b.insert("score".to_string(), Expr::column("views"));
        b.insert("rank".to_string(), Expr::column("position"));

        let merged = merge(a, b, MergePolicy::Unsafe).unwrap();

        assert_eq!(merged.value.get("score"), Some(&Expr::column("likes")));
        assert_eq!(merged.value.get("rank"), Some(&Expr::column("position")));
        assert_eq!(merged.overrides.len(), 1);
        assert_eq!(merged.overrides[0].path, "score");
    }

    #[test]
    fn test_option_merge() {
        let mut ctx = MergeContext::new(MergePolicy::Safe);
        let merged = None::<FilterExpr>
            .merge(Some(FilterExpr::eq("a", 1)), &mut ctx)
            .unwrap();
        assert_eq!(merged, Some(FilterExpr::eq("a", 1)));

        let err = Some(FilterExpr::eq("a", 1))
            .merge(Some(FilterExpr::eq("a", 2)), &mut ctx)
            .unwrap_err();
        assert_eq!(err.path, "<root>");
    }
}
