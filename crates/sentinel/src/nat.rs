//! Address remapping for monitors and nodes behind NAT.
//!
//! Monitors report the addresses nodes announce to each other, which are
//! often private. A [`NatMap`] translates those into addresses the client can
//! reach. Lookups are exact on the `host:port` key; unknown addresses pass
//! through unchanged.

use std::{collections::HashMap, fmt, sync::Arc};

use crate::endpoint::NodeAddress;

/// Mapping function signature for [`NatMap::from_fn`].
pub type NatFn = dyn Fn(&NodeAddress) -> Option<NodeAddress> + Send + Sync;

/// Translation table from announced addresses to reachable ones.
#[derive(Clone)]
pub enum NatMap {
    /// Exact-match table keyed by `host:port`.
    Table(HashMap<String, NodeAddress>),
    /// Mapping function; `None` means the address passes through unchanged.
    Function(Arc<NatFn>),
}

impl NatMap {
    /// Creates a table-based map.
    pub fn table<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, NodeAddress)>,
    {
        Self::Table(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Creates a function-based map.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&NodeAddress) -> Option<NodeAddress> + Send + Sync + 'static,
    {
        Self::Function(Arc::new(f))
    }

    /// Remaps a single address.
    #[must_use]
    pub fn remap(&self, address: NodeAddress) -> NodeAddress {
        let mapped = match self {
            Self::Table(table) => table.get(&address.key()).cloned(),
            Self::Function(f) => f(&address),
        };
        mapped.unwrap_or(address)
    }
}

impl fmt::Debug for NatMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Table(table) => f.debug_tuple("Table").field(table).finish(),
            Self::Function(_) => f.write_str("Function(..)"),
        }
    }
}

/// Applies an optional map to an optional address.
///
/// Absent addresses stay absent and a missing map is the identity.
#[must_use]
pub fn remap(map: Option<&NatMap>, address: Option<NodeAddress>) -> Option<NodeAddress> {
    match (map, address) {
        (Some(map), Some(address)) => Some(map.remap(address)),
        (_, address) => address,
    }
}
