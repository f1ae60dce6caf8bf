//! Circular cursor over the known monitor endpoints.
//!
//! The cycle is pure state: it never performs I/O and is owned by a single
//! connector, so it needs no interior locking.
//!
//! # Passes
//!
//! A *pass* starts at the first [`next`](EndpointCycle::next) after a reset
//! and visits every endpoint known at that moment exactly once, wrapping
//! around the end of the list when the pass was anchored mid-list. Once the
//! pass is complete, `next` keeps returning `None` until the caller resets.
//!
//! ```text
//!   endpoints: [A, B, C, D]     anchored at C by reset(true)
//!   pass:       C → D → A → B → None
//! ```
//!
//! Endpoints appended while a pass is in flight are not visited until the
//! following pass.

use crate::endpoint::MonitorEndpoint;

/// Stateful circular cursor over an append-only list of monitor endpoints.
#[derive(Debug, Clone, Default)]
pub struct EndpointCycle {
    /// Known endpoints, unique by identity.
    endpoints: Vec<MonitorEndpoint>,
    /// Index the next call to `next` yields.
    cursor: usize,
    /// Endpoints yielded since the last reset.
    yielded: usize,
    /// Number of endpoints in the pass in progress; fixed by the pass's first `next`.
    pass_len: Option<usize>,
    /// Index of the endpoint most recently yielded.
    last: Option<usize>,
}

impl EndpointCycle {
    /// Creates a cycle over the given endpoints, dropping duplicate identities.
    pub fn new(endpoints: impl IntoIterator<Item = MonitorEndpoint>) -> Self {
        let mut cycle = Self::default();
        for endpoint in endpoints {
            cycle.add(endpoint);
        }
        cycle
    }

    /// Returns the next endpoint of the current pass, or `None` once the pass
    /// has yielded every endpoint.
    pub fn next(&mut self) -> Option<MonitorEndpoint> {
        let pass_len = *self.pass_len.get_or_insert(self.endpoints.len());
        if self.yielded >= pass_len {
            return None;
        }

        let index = self.cursor % pass_len;
        self.cursor = (index + 1) % pass_len;
        self.yielded += 1;
        self.last = Some(index);
        Some(self.endpoints[index].clone())
    }

    /// Appends an endpoint unless one with the same identity is already known.
    ///
    /// Returns whether the endpoint was added.
    pub fn add(&mut self, endpoint: MonitorEndpoint) -> bool {
        if self.contains(&endpoint) {
            return false;
        }
        self.endpoints.push(endpoint);
        true
    }

    /// Starts a new pass.
    ///
    /// With `anchor_previous`, the new pass begins with the endpoint returned
    /// by the most recent `next`; this is how a working monitor becomes the
    /// first candidate of the following pass. Without it, the pass begins at
    /// the start of the list.
    pub fn reset(&mut self, anchor_previous: bool) {
        if anchor_previous {
            if let Some(last) = self.last {
                self.cursor = last;
            }
        } else {
            self.cursor = 0;
            self.last = None;
        }
        self.yielded = 0;
        self.pass_len = None;
    }

    /// Replaces the whole endpoint list and rewinds the cursor.
    pub fn replace(&mut self, endpoints: impl IntoIterator<Item = MonitorEndpoint>) {
        *self = Self::new(endpoints);
    }

    /// Returns true once the current pass has yielded every endpoint.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.yielded >= self.pass_len.unwrap_or(self.endpoints.len())
    }

    /// Returns whether an endpoint with the same identity is known.
    #[must_use]
    pub fn contains(&self, endpoint: &MonitorEndpoint) -> bool {
        self.endpoints.iter().any(|known| known == endpoint)
    }

    /// Returns the known endpoints in list order.
    #[must_use]
    pub fn endpoints(&self) -> &[MonitorEndpoint] {
        &self.endpoints
    }

    /// Returns the number of known endpoints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// Returns true if no endpoints are known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}
