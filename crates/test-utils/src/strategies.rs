//! Proptest strategies for monitor topologies.
//!
//! Strategies return plain tuples and strings rather than resolver types so
//! they can be used from the resolver crate's own unit tests.
//!
//! # Usage
//!
//! ```no_run
//! use inferadb_ledger_test_utils::strategies;
//! use proptest::prelude::*;
//!
//! proptest! {
//!     #[test]
//!     fn my_property(endpoints in prop::collection::vec(strategies::arb_host_port(), 0..8)) {
//!         // test invariant with randomly generated endpoints
//!     }
//! }
//! ```

use proptest::prelude::*;

/// Generates a host from a small pool so that duplicates occur often.
///
/// Mixes IPv4 literals, an IPv6 literal, and DNS names.
pub fn arb_host() -> impl Strategy<Value = String> {
    prop::sample::select(vec![
        "10.0.0.1".to_string(),
        "10.0.0.2".to_string(),
        "10.0.0.3".to_string(),
        "fd00::7".to_string(),
        "monitor-a.internal".to_string(),
        "monitor-b.internal".to_string(),
    ])
}

/// Generates a port from a small pool around the conventional monitor and
/// data ports.
pub fn arb_port() -> impl Strategy<Value = u16> {
    prop::sample::select(vec![6379u16, 6380, 26379, 26380])
}

/// Generates a `(host, port)` pair.
pub fn arb_host_port() -> impl Strategy<Value = (String, u16)> {
    (arb_host(), arb_port())
}

/// Generates a replica flag set.
///
/// Always contains `slave`, optionally combined with a health flag.
pub fn arb_replica_flags() -> impl Strategy<Value = Vec<String>> {
    prop::sample::select(vec![None, Some("s_down"), Some("o_down"), Some("disconnected")]).prop_map(
        |extra| {
            let mut flags = vec!["slave".to_string()];
            flags.extend(extra.map(str::to_string));
            flags
        },
    )
}
