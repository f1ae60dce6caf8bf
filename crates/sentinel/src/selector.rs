//! Replica selection by preference.
//!
//! When connecting to a replica, the monitor returns every replica it knows
//! about. Unhealthy ones are filtered out by the query client; the survivors
//! are handed to [`select_preferred`], which picks one according to an
//! optional [`PreferenceSpec`]:
//!
//! 1. A selector function decides on its own.
//! 2. A priority list is scanned from the lowest priority value upward; the
//!    first entry matching a candidate's exact ip and port wins.
//! 3. Without a spec, or when no entry matches, a candidate is drawn uniformly
//!    at random so load spreads across replicas.

use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::Arc,
};

use rand::Rng;

use crate::endpoint::NodeAddress;

/// Default priority for preference entries that do not set one.
pub const DEFAULT_PRIORITY: u32 = 1;

/// Replica flags that make a candidate unusable.
const UNAVAILABLE_FLAGS: [&str; 3] = ["disconnected", "s_down", "o_down"];

/// A replica reported by a monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateReplica {
    /// Announced IP address.
    pub ip: String,
    /// Announced port.
    pub port: u16,
    /// Monitor flags (`slave`, `s_down`, `disconnected`, ...).
    pub flags: HashSet<String>,
}

impl CandidateReplica {
    /// Creates a candidate from its parts.
    pub fn new<I, S>(ip: impl Into<String>, port: u16, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { ip: ip.into(), port, flags: flags.into_iter().map(Into::into).collect() }
    }

    /// Builds a candidate from a packed monitor record.
    ///
    /// Records without an ip, a numeric port, or a flags field are rejected.
    #[must_use]
    pub fn from_record(record: &HashMap<String, String>) -> Option<Self> {
        let ip = record.get("ip").filter(|ip| !ip.is_empty())?;
        let port = record.get("port")?.parse().ok()?;
        let flags = record.get("flags")?;
        Some(Self::new(ip.clone(), port, flags.split(',').filter(|f| !f.is_empty())))
    }

    /// Returns true unless the monitor flags the replica as disconnected or down.
    #[must_use]
    pub fn is_available(&self) -> bool {
        !UNAVAILABLE_FLAGS.iter().any(|flag| self.flags.contains(*flag))
    }

    /// Returns the candidate's address.
    #[must_use]
    pub fn address(&self) -> NodeAddress {
        NodeAddress::new(self.ip.clone(), self.port)
    }
}

/// A preferred replica with an optional priority; lower values win.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreferredReplica {
    /// IP address to match exactly.
    pub ip: String,
    /// Port to match exactly.
    pub port: u16,
    /// Priority; defaults to [`DEFAULT_PRIORITY`].
    pub priority: Option<u32>,
}

impl PreferredReplica {
    /// Creates an entry with the default priority.
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self { ip: ip.into(), port, priority: None }
    }

    /// Sets the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = Some(priority);
        self
    }

    fn matches(&self, candidate: &CandidateReplica) -> bool {
        self.ip == candidate.ip && self.port == candidate.port
    }
}

/// Selector function signature for [`PreferenceSpec::ByFunction`].
pub type SelectorFn = dyn Fn(&[CandidateReplica]) -> Option<CandidateReplica> + Send + Sync;

/// How to choose among available replicas.
#[derive(Clone)]
pub enum PreferenceSpec {
    /// Delegate the choice entirely; the returned value is used as-is.
    ByFunction(Arc<SelectorFn>),
    /// Entries sorted ascending by priority, ties in declaration order.
    ByPriorityList(Vec<PreferredReplica>),
}

impl PreferenceSpec {
    /// Creates a function-based spec.
    pub fn by_function<F>(f: F) -> Self
    where
        F: Fn(&[CandidateReplica]) -> Option<CandidateReplica> + Send + Sync + 'static,
    {
        Self::ByFunction(Arc::new(f))
    }

    /// Creates a preference from a single preferred replica.
    #[must_use]
    pub fn single(entry: PreferredReplica) -> Self {
        Self::list([entry])
    }

    /// Creates a preference from a list of preferred replicas.
    ///
    /// Missing priorities default to [`DEFAULT_PRIORITY`], and the list is
    /// stable-sorted by priority.
    pub fn list(entries: impl IntoIterator<Item = PreferredReplica>) -> Self {
        let mut entries: Vec<PreferredReplica> = entries
            .into_iter()
            .map(|mut entry| {
                entry.priority.get_or_insert(DEFAULT_PRIORITY);
                entry
            })
            .collect();
        entries.sort_by_key(|entry| entry.priority.unwrap_or(DEFAULT_PRIORITY));
        Self::ByPriorityList(entries)
    }
}

impl fmt::Debug for PreferenceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ByFunction(_) => f.write_str("ByFunction(..)"),
            Self::ByPriorityList(entries) => f.debug_tuple("ByPriorityList").field(entries).finish(),
        }
    }
}

/// Chooses one replica among `candidates`.
///
/// Returns `None` for an empty candidate list without consulting the spec,
/// and whatever a selector function returns otherwise.
#[must_use]
pub fn select_preferred(
    candidates: &[CandidateReplica],
    spec: Option<&PreferenceSpec>,
) -> Option<CandidateReplica> {
    if candidates.is_empty() {
        return None;
    }

    match spec {
        Some(PreferenceSpec::ByFunction(select)) => return select(candidates),
        Some(PreferenceSpec::ByPriorityList(entries)) => {
            // The variant can be built directly, bypassing `list`.
            let mut ordered: Vec<&PreferredReplica> = entries.iter().collect();
            ordered.sort_by_key(|entry| entry.priority.unwrap_or(DEFAULT_PRIORITY));
            let preferred = ordered
                .into_iter()
                .find_map(|entry| candidates.iter().find(|candidate| entry.matches(candidate)));
            if let Some(candidate) = preferred {
                return Some(candidate.clone());
            }
        },
        None => {},
    }

    let index = rand::rng().random_range(0..candidates.len());
    Some(candidates[index].clone())
}
