//! Shared test utilities for the sentinel resolver crates.
//!
//! - [`TestDir`] - Temporary directory that can write monitor manifests
//! - [`assert_eventually`] - Poll a condition until it's true or timeout
//! - [`refused_address`] - A loopback address nothing listens on
//! - [`init_tracing`] - One-shot tracing subscriber for test output
//! - [`strategies`] - Proptest generators for endpoints and replica flags

#![deny(unsafe_code)]
// Test utilities are allowed to use unwrap for simplicity
#![cfg_attr(test, allow(clippy::disallowed_methods))]

mod test_dir;
pub use test_dir::TestDir;

mod assertions;
pub use assertions::assert_eventually;

mod net;
pub use net::{init_tracing, refused_address};

pub mod strategies;
