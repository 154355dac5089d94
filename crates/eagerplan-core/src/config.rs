//! Planner configuration.

use serde::Deserialize;

/// How conflicting hints for the same path are treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Conflicts abort compilation.
    #[default]
    Safe,
    /// Conflicts are accepted; the first-seen value is kept and the
    /// conflict is recorded on the compiled plan.
    Unsafe,
}

/// Limits and policies applied while compiling a selection.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Maximum `first`/`last` accepted on any paginated field.
    pub max_page_size: usize,
    /// Page size used when a paginated field gets neither `first` nor
    /// `last`. `None` leaves such fields unbounded.
    pub default_page_size: Option<usize>,
    /// Maximum nesting of relation fields below the root.
    pub max_depth: usize,
    /// Conflict handling for hint merges.
    pub merge_policy: MergePolicy,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_page_size: 100,
            default_page_size: None,
            max_depth: 10,
            merge_policy: MergePolicy::Safe,
        }
    }
}

impl PlannerConfig {
    /// Create a config with custom limits.
    pub fn new(max_page_size: usize, max_depth: usize) -> Self {
        Self {
            max_page_size,
            max_depth,
            ..Default::default()
        }
    }

    /// Create a config without size or depth limits (use with caution).
    pub fn unlimited() -> Self {
        Self {
            max_page_size: usize::MAX,
            default_page_size: None,
            max_depth: usize::MAX,
            merge_policy: MergePolicy::Safe,
        }
    }

    /// Set the maximum page size.
    pub fn with_max_page_size(mut self, max: usize) -> Self {
        self.max_page_size = max;
        self
    }

    /// Set the default page size.
    pub fn with_default_page_size(mut self, size: usize) -> Self {
        self.default_page_size = Some(size);
        self
    }

    /// Set the maximum depth.
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Set the merge policy.
    pub fn with_merge_policy(mut self, policy: MergePolicy) -> Self {
        self.merge_policy = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PlannerConfig::default();
        assert_eq!(config.max_page_size, 100);
        assert_eq!(config.default_page_size, None);
        assert_eq!(config.max_depth, 10);
        assert_eq!(config.merge_policy, MergePolicy::Safe);
    }

    #[test]
    fn test_builders() {
        let config = PlannerConfig::new(50, 4)
            .with_default_page_size(20)
            .with_merge_policy(MergePolicy::Unsafe);

        assert_eq!(config.max_page_size, 50);
        assert_eq!(config.max_depth, 4);
        assert_eq!(config.default_page_size, Some(20));
        assert_eq!(config.merge_policy, MergePolicy::Unsafe);
    }

    #[test]
    fn test_deserialize_partial_settings() {
        let config: PlannerConfig =
            serde_json::from_str(r#"{"max_page_size": 25, "merge_policy": "unsafe"}"#).unwrap();

        assert_eq!(config.max_page_size, 25);
        assert_eq!(config.max_depth, 10);
        assert_eq!(config.merge_policy, MergePolicy::Unsafe);
    }
}
