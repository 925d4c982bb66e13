use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Deserialize;

/// One redirect candidate and its relative selection weight
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "(String, u64)")]
pub struct WeightedDomain {
    pub domain: String,
    pub weight: u64,
}

impl WeightedDomain {
    pub fn new(domain: impl Into<String>, weight: u64) -> Self {
        Self {
            domain: domain.into(),
            weight,
        }
    }
}

impl From<(String, u64)> for WeightedDomain {
    fn from((domain, weight): (String, u64)) -> Self {
        Self::new(domain, weight)
    }
}

/// Redirect settings for a single pool
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PoolConfig {
    /// Default candidates
    pub domains: Vec<WeightedDomain>,

    /// Candidates used instead of `domains` when the request path starts with the key
    #[serde(default)]
    pub path_based_domains: HashMap<String, Vec<WeightedDomain>>,

    /// Headers attached to every redirect served from this pool
    #[serde(default)]
    pub custom_headers: BTreeMap<String, String>,
}

impl PoolConfig {
    /// Every candidate list in the pool, default list first
    pub fn domain_lists(&self) -> impl Iterator<Item = &[WeightedDomain]> {
        std::iter::once(self.domains.as_slice())
            .chain(self.path_based_domains.values().map(Vec::as_slice))
    }
}

/// Read-only mapping from pool id to pool config, shared by all request tasks
#[derive(Debug, Default)]
pub struct PoolRegistry {
    pools: HashMap<String, PoolConfig>,
}

impl PoolRegistry {
    /// Creates a registry wrapped in Arc for shared access
    pub fn new(pools: HashMap<String, PoolConfig>) -> Arc<Self> {
        Arc::new(Self { pools })
    }

    /// Looks up a pool by id
    pub fn get(&self, pool_id: &str) -> Option<&PoolConfig> {
        self.pools.get(pool_id)
    }

    /// Returns the number of pools
    pub fn len(&self) -> usize {
        self.pools.len()
    }

    /// Returns true if no pools are configured
    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    /// Pool ids in sorted order
    pub fn pool_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.pools.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}
