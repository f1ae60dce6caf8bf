//! Network helpers for tests that need real sockets.

// Test utilities are expected to panic on failure - that's their purpose
#![allow(clippy::expect_used)]

use std::sync::Once;

use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Returns a loopback `(host, port)` pair that refuses connections.
///
/// A listener is bound to an ephemeral port and dropped immediately, so the
/// port is very unlikely to be reused during the test.
///
/// # Panics
///
/// Panics if no ephemeral port can be bound.
pub async fn refused_address() -> (String, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind ephemeral port");
    let port = listener.local_addr().expect("local addr").port();
    drop(listener);
    ("127.0.0.1".to_owned(), port)
}

/// Installs a test tracing subscriber once per process.
///
/// Honors `RUST_LOG`; output goes through the test writer so it is captured
/// per test.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
