//! Failover detection through monitor announcements.
//!
//! Monitors publish `+switch-master` on pub/sub when they promote a new
//! master. A [`FailoverDetector`] subscribes on every known monitor and
//! forwards announcements for its dataset, so that a client holding a
//! master stream can reconnect as soon as the master moves instead of
//! waiting for a write to fail.
//!
//! Each monitor gets its own task. A task whose subscription breaks waits
//! for the reconnect delay and subscribes again until the detector is shut
//! down. Several monitors announce the same switch; consecutive duplicates
//! are delivered once.

use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{
    connection::MonitorTransport,
    endpoint::{MonitorEndpoint, NodeAddress},
    error::{MalformedReplySnafu, Result},
    nat::NatMap,
    resp::Value,
};

/// Pub/sub channel monitors announce promotions on.
pub const SWITCH_MASTER_CHANNEL: &str = "+switch-master";

/// Default pause before resubscribing to a monitor.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Capacity of the announcement channel.
const CHANNEL_CAPACITY: usize = 16;

/// A master promotion announced by a monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchMaster {
    /// Dataset name.
    pub name: String,
    /// Previous master, after address remapping.
    pub old: NodeAddress,
    /// New master, after address remapping.
    pub new: NodeAddress,
}

/// Watches monitors for master promotions of one dataset.
#[derive(Clone)]
pub struct FailoverDetector {
    transport: Arc<dyn MonitorTransport>,
    monitors: Vec<MonitorEndpoint>,
    name: String,
    nat_map: Option<NatMap>,
    reconnect_delay: Duration,
}

impl FailoverDetector {
    /// Creates a detector over `monitors`.
    pub fn new(
        transport: Arc<dyn MonitorTransport>,
        monitors: Vec<MonitorEndpoint>,
        name: impl Into<String>,
        nat_map: Option<NatMap>,
    ) -> Self {
        Self {
            transport,
            monitors,
            name: name.into(),
            nat_map,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }

    /// Sets the pause before resubscribing after a broken subscription.
    ///
    /// Defaults to [`DEFAULT_RECONNECT_DELAY`].
    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Returns the pause before resubscribing.
    #[must_use]
    pub fn reconnect_delay(&self) -> Duration {
        self.reconnect_delay
    }

    /// Returns the monitors this detector subscribes to.
    #[must_use]
    pub fn monitors(&self) -> &[MonitorEndpoint] {
        &self.monitors
    }

    /// Subscribes on every monitor in background tasks.
    ///
    /// Announcements arrive on the returned receiver. Tasks stop when the
    /// handle is shut down or dropped, or when the receiver is dropped.
    #[must_use]
    pub fn spawn(self) -> (FailoverHandle, mpsc::Receiver<SwitchMaster>) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let token = CancellationToken::new();
        let last = Arc::new(Mutex::new(None));

        let tasks = self
            .monitors
            .iter()
            .cloned()
            .map(|endpoint| {
                let watcher = Watcher {
                    detector: self.clone(),
                    endpoint,
                    tx: tx.clone(),
                    last: Arc::clone(&last),
                };
                tokio::spawn(watcher.run(token.clone()))
            })
            .collect();

        tracing::debug!(name = %self.name, monitors = self.monitors.len(), "failover detector started");
        (FailoverHandle { token, tasks }, rx)
    }
}

impl std::fmt::Debug for FailoverDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailoverDetector")
            .field("monitors", &self.monitors)
            .field("name", &self.name)
            .field("reconnect_delay", &self.reconnect_delay)
            .finish_non_exhaustive()
    }
}

/// Controls the tasks started by [`FailoverDetector::spawn`].
///
/// Dropping the handle stops the tasks.
#[derive(Debug)]
pub struct FailoverHandle {
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl FailoverHandle {
    /// Signals every subscription task to stop.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Returns true once shutdown has been requested.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Stops every task and waits for them to finish.
    pub async fn join(mut self) {
        self.token.cancel();
        for task in std::mem::take(&mut self.tasks) {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "failover task panicked");
            }
        }
    }
}

impl Drop for FailoverHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// One monitor's subscription loop.
struct Watcher {
    detector: FailoverDetector,
    endpoint: MonitorEndpoint,
    tx: mpsc::Sender<SwitchMaster>,
    last: Arc<Mutex<Option<SwitchMaster>>>,
}

impl Watcher {
    async fn run(self, token: CancellationToken) {
        loop {
            let outcome = tokio::select! {
                biased;
                () = token.cancelled() => return,
                outcome = self.subscribe() => outcome,
            };

            match outcome {
                // Receiver dropped; nobody is listening any more.
                Ok(()) => return,
                Err(e) => {
                    tracing::warn!(
                        endpoint = %self.endpoint,
                        error = %e,
                        "failover subscription lost, resubscribing"
                    );
                },
            }

            tokio::select! {
                biased;
                () = token.cancelled() => return,
                () = tokio::time::sleep(self.detector.reconnect_delay) => {},
            }
        }
    }

    async fn subscribe(&self) -> Result<()> {
        let mut session = self.detector.transport.open(&self.endpoint).await?;
        session.query(&["SUBSCRIBE", SWITCH_MASTER_CHANNEL]).await?;
        tracing::debug!(endpoint = %self.endpoint, "subscribed to master switches");

        loop {
            let message = session.receive().await?;
            let Some(switch) = parse_switch_master(&message) else {
                return MalformedReplySnafu {
                    endpoint: self.endpoint.identity(),
                    reply: message.summary(),
                }
                .fail();
            };
            if switch.name != self.detector.name {
                continue;
            }

            let switch = self.remap(switch);
            {
                let mut last = self.last.lock();
                if last.as_ref() == Some(&switch) {
                    continue;
                }
                *last = Some(switch.clone());
            }

            tracing::info!(
                name = %switch.name,
                old = %switch.old,
                new = %switch.new,
                endpoint = %self.endpoint,
                "master switched"
            );
            if self.tx.send(switch).await.is_err() {
                session.close().await;
                return Ok(());
            }
        }
    }

    fn remap(&self, switch: SwitchMaster) -> SwitchMaster {
        match self.detector.nat_map {
            Some(ref map) => SwitchMaster {
                name: switch.name,
                old: map.remap(switch.old),
                new: map.remap(switch.new),
            },
            None => switch,
        }
    }
}

/// Parses `["message", "+switch-master", "<name> <old-ip> <old-port> <new-ip> <new-port>"]`.
fn parse_switch_master(value: &Value) -> Option<SwitchMaster> {
    let [kind, channel, payload] = value.as_array()? else {
        return None;
    };
    if kind.as_str()? != "message" || channel.as_str()? != SWITCH_MASTER_CHANNEL {
        return None;
    }

    let mut parts = payload.as_str()?.split_whitespace();
    let name = parts.next()?;
    let old = NodeAddress::new(parts.next()?, parts.next()?.parse().ok()?);
    let new = NodeAddress::new(parts.next()?, parts.next()?.parse().ok()?);
    if parts.next().is_some() {
        return None;
    }
    Some(SwitchMaster { name: name.to_string(), old, new })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use std::collections::VecDeque;

    use async_trait::async_trait;

    use super::*;
    use crate::connection::MonitorSession;

    fn message(payload: &str) -> Value {
        Value::Array(vec![
            Value::bulk("message"),
            Value::bulk(SWITCH_MASTER_CHANNEL),
            Value::bulk(payload.to_owned()),
        ])
    }

    /// Each session replays the same queue of pushed messages, then hangs.
    struct Publisher {
        messages: Vec<Value>,
        opened: Mutex<usize>,
    }

    struct Subscription {
        pending: VecDeque<Value>,
    }

    #[async_trait]
    impl MonitorTransport for Publisher {
        async fn open(&self, _endpoint: &MonitorEndpoint) -> Result<Box<dyn MonitorSession>> {
            *self.opened.lock() += 1;
            Ok(Box::new(Subscription { pending: self.messages.iter().cloned().collect() }))
        }
    }

    #[async_trait]
    impl MonitorSession for Subscription {
        async fn query(&mut self, args: &[&str]) -> Result<Value> {
            assert_eq!(args, ["SUBSCRIBE", SWITCH_MASTER_CHANNEL]);
            Ok(Value::Array(vec![
                Value::bulk("subscribe"),
                Value::bulk(SWITCH_MASTER_CHANNEL),
                Value::Integer(1),
            ]))
        }

        async fn receive(&mut self) -> Result<Value> {
            match self.pending.pop_front() {
                Some(value) => Ok(value),
                None => std::future::pending().await,
            }
        }

        async fn close(self: Box<Self>) {}
    }

    #[test]
    fn test_parse_switch_master() {
        let switch = parse_switch_master(&message("orders 10.0.0.1 6379 10.0.0.2 6380")).unwrap();
        assert_eq!(switch.name, "orders");
        assert_eq!(switch.old, NodeAddress::new("10.0.0.1", 6379));
        assert_eq!(switch.new, NodeAddress::new("10.0.0.2", 6380));

        assert!(parse_switch_master(&message("orders 10.0.0.1 6379")).is_none());
        assert!(parse_switch_master(&message("orders 10.0.0.1 6379 10.0.0.2 6380 x")).is_none());
        assert!(parse_switch_master(&message("orders 10.0.0.1 port 10.0.0.2 6380")).is_none());
        assert!(parse_switch_master(&Value::Nil).is_none());
    }

    #[tokio::test]
    async fn test_detector_filters_remaps_and_dedupes() {
        let transport = Arc::new(Publisher {
            messages: vec![
                message("billing 10.0.0.7 6379 10.0.0.8 6379"),
                message("orders 10.0.0.1 6379 10.0.0.2 6380"),
            ],
            opened: Mutex::new(0),
        });
        let nat = NatMap::table([("10.0.0.2:6380", NodeAddress::new("1.2.3.4", 16380))]);
        let detector = FailoverDetector::new(
            Arc::clone(&transport) as Arc<dyn MonitorTransport>,
            vec![MonitorEndpoint::new("m1", 26379), MonitorEndpoint::new("m2", 26379)],
            "orders",
            Some(nat),
        );

        let (handle, mut rx) = detector.spawn();
        let switch = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert_eq!(switch.new, NodeAddress::new("1.2.3.4", 16380));
        assert_eq!(switch.old, NodeAddress::new("10.0.0.1", 6379));

        // The second monitor's copy of the same announcement is suppressed.
        let duplicate = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
        assert!(duplicate.is_err());

        handle.join().await;
        assert_eq!(*transport.opened.lock(), 2);
    }

    #[tokio::test]
    async fn test_detector_resubscribes_after_garbage() {
        let transport = Arc::new(Publisher {
            messages: vec![Value::Simple("garbage".into())],
            opened: Mutex::new(0),
        });
        let detector = FailoverDetector::new(
            Arc::clone(&transport) as Arc<dyn MonitorTransport>,
            vec![MonitorEndpoint::new("m1", 26379)],
            "orders",
            None,
        )
        .with_reconnect_delay(Duration::from_millis(5));

        let (handle, _rx) = detector.spawn();
        let resubscribed =
            inferadb_ledger_test_utils::assert_eventually(Duration::from_secs(1), || {
                *transport.opened.lock() >= 3
            })
            .await;
        assert!(resubscribed, "a broken subscription should be retried");
        handle.shutdown();
        assert!(handle.is_shutdown());
    }
}
