//! Analysis configuration.
//!
//! The node scope can be set via the `SLABSCOPE_NODE_SCOPE` environment
//! variable:
//! - `first` (default): inspect node 0 only and treat it as representative of
//!   the whole system. This matches the historical slab summary output.
//! - `all:<n>`: walk the first `n` entries of each cache's per-node array and
//!   sum them.
//!
//! Explicit values passed by the caller take precedence over the environment.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::counters::CounterLayout;
use crate::snapshot::Address;

/// Environment variable consulted by [`NodeScope::from_env`].
pub const NODE_SCOPE_ENV: &str = "SLABSCOPE_NODE_SCOPE";

/// Default cap for the bounded cache-name read.
pub const DEFAULT_NAME_CAP: usize = 48;

/// Which per-node descriptors of each cache are examined.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "lowercase")]
pub enum NodeScope {
    /// Node 0 only.
    #[default]
    First,
    /// Nodes `0..nodes`.
    All { nodes: usize },
}

impl NodeScope {
    /// Parse `first` / `all:<n>` (case-insensitive).
    #[must_use]
    pub fn from_str_loose(raw: &str) -> Option<Self> {
        let lowered = raw.trim().to_ascii_lowercase();
        match lowered.as_str() {
            "first" | "single" | "0" | "default" => Some(Self::First),
            other => {
                let count = other.strip_prefix("all:")?.trim().parse::<usize>().ok()?;
                (count > 0).then_some(Self::All { nodes: count })
            }
        }
    }

    /// Scope from [`NODE_SCOPE_ENV`], falling back to [`NodeScope::First`].
    #[must_use]
    pub fn from_env() -> Self {
        std::env::var(NODE_SCOPE_ENV)
            .ok()
            .and_then(|raw| Self::from_str_loose(&raw))
            .unwrap_or_default()
    }

    #[must_use]
    pub fn node_indices(self) -> Range<usize> {
        match self {
            Self::First => 0..1,
            Self::All { nodes } => 0..nodes,
        }
    }
}

/// Caller-selected knobs for one analysis run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    pub node_scope: NodeScope,
    /// Upper bound for page descriptor addresses. Derived from `max_pfn` when unset.
    pub max_page_address: Option<Address>,
    /// Force a counter layout instead of selecting it from the kernel version.
    pub counter_layout: Option<CounterLayout>,
    pub name_cap: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            node_scope: NodeScope::First,
            max_page_address: None,
            counter_layout: None,
            name_cap: DEFAULT_NAME_CAP,
        }
    }
}

impl AnalysisConfig {
    /// Defaults with the node scope taken from the environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            node_scope: NodeScope::from_env(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_node_scope(mut self, scope: NodeScope) -> Self {
        self.node_scope = scope;
        self
    }

    #[must_use]
    pub fn with_max_page_address(mut self, address: Address) -> Self {
        self.max_page_address = Some(address);
        self
    }

    #[must_use]
    pub fn with_counter_layout(mut self, layout: CounterLayout) -> Self {
        self.counter_layout = Some(layout);
        self
    }
}
