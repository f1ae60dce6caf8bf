//! Polling assertions for asynchronous connector tests.

use std::time::Duration;

use tokio::time::{Instant, sleep};

/// Default polling interval for [`assert_eventually`].
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Polls a condition until it returns true or the timeout expires.
///
/// Connector events, monitor request counters, and failover notifications
/// arrive from background tasks; polling avoids fixed sleeps in tests.
/// Returns whether the condition held before the deadline. The condition is
/// checked one final time after the deadline passes.
///
/// ```no_run
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::time::Duration;
/// use inferadb_ledger_test_utils::assert_eventually;
///
/// # async fn demo(requests: &AtomicUsize) {
/// let served = assert_eventually(Duration::from_secs(1), || {
///     requests.load(Ordering::SeqCst) >= 3
/// })
/// .await;
/// assert!(served, "every monitor should have been queried");
/// # }
/// ```
pub async fn assert_eventually<F>(timeout: Duration, condition: F) -> bool
where
    F: Fn() -> bool,
{
    let start = Instant::now();

    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        sleep(DEFAULT_POLL_INTERVAL).await;
    }

    condition()
}
