//! The resolve-and-connect state machine.
//!
//! A [`SentinelConnector`] turns one `connect()` call into a walk over the
//! monitor set:
//!
//! ```text
//!            ┌──────────────┐  empty set + discovery source
//!  connect ─▶│  discover    │─────────────── error / empty ──▶ Discovery (fatal)
//!            └──────┬───────┘
//!                   ▼
//!            ┌──────────────┐  exhausted   ┌───────────┐ no delay ──▶ Exhausted (fatal)
//!        ┌──▶│ cycle.next() │─────────────▶│  retry?   │──────────────────────────────
//!        │   └──────┬───────┘              └─────┬─────┘ delay: notify, sleep, rediscover
//!        │          ▼                            │
//!        │   ┌──────────────┐  per-endpoint      │
//!        ├───│ query monitor│  error: notify     │
//!        │   └──────┬───────┘                    │
//!        │          ▼ address                    │
//!        │   reset(true), open stream ──▶ stream │
//!        └───────────────────────────────────────┘
//! ```
//!
//! Every suspension point is raced against the connector's cancellation
//! token. Once [`disconnect`](SentinelConnector::disconnect) fires, the
//! request in flight ends with [`SentinelError::Closed`] and no further
//! monitor is contacted.

use std::{future::Future, sync::Arc, time::Duration};

use parking_lot::Mutex;
use snafu::ensure;
use tokio_util::sync::CancellationToken;

use crate::{
    config::SentinelConfig,
    connection::{BoxedStream, MonitorTransport, RespTransport, StreamFactory, TcpStreamFactory},
    cycle::EndpointCycle,
    endpoint::{MonitorEndpoint, NodeAddress},
    error::{ClosedSnafu, DiscoverySnafu, ExhaustedSnafu, Result, SentinelError},
    events::{ConnectorEvent, EventSink, TracingSink},
    failover::FailoverDetector,
    query::MonitorQueryClient,
    role::{Role, probe_role},
};

/// Cancels a connector's in-flight request from another task.
#[derive(Debug, Clone)]
pub struct DisconnectHandle {
    active: Arc<Mutex<CancellationToken>>,
}

impl DisconnectHandle {
    /// Clears the active flag; the pending request ends with
    /// [`SentinelError::Closed`].
    pub fn disconnect(&self) {
        self.active.lock().cancel();
    }

    /// Returns true while a request may still make progress.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.active.lock().is_cancelled()
    }
}

/// Resolves the configured dataset role through monitors and connects to it.
///
/// # Example
///
/// ```no_run
/// # use inferadb_ledger_sentinel::{MonitorEndpoint, Role, SentinelConfig, SentinelConnector};
/// # async fn example() -> inferadb_ledger_sentinel::Result<()> {
/// let config = SentinelConfig::builder()
///     .name("orders")
///     .role(Role::Master)
///     .monitors(vec![MonitorEndpoint::new("10.0.0.1", 26379)])
///     .build()?;
///
/// let mut connector = SentinelConnector::new(config)?;
/// let mut stream = connector.connect().await?;
/// if !connector.verify_role(&mut stream).await? {
///     // The node changed role since the monitor answered; connect again.
///     stream = connector.connect().await?;
/// }
/// # let _ = stream;
/// # Ok(())
/// # }
/// ```
pub struct SentinelConnector {
    config: SentinelConfig,
    cycle: EndpointCycle,
    transport: Arc<dyn MonitorTransport>,
    query: MonitorQueryClient,
    streams: Arc<dyn StreamFactory>,
    events: Arc<dyn EventSink>,
    active: Arc<Mutex<CancellationToken>>,
    retry_attempts: u32,
    last_error: Option<String>,
    target: Option<NodeAddress>,
}

impl SentinelConnector {
    /// Creates a connector with the default RESP transport and TCP stream
    /// factory. No I/O happens until [`connect`](Self::connect).
    ///
    /// # Errors
    ///
    /// Returns a configuration error if TLS material cannot be parsed.
    pub fn new(config: SentinelConfig) -> Result<Self> {
        let transport = Arc::new(RespTransport::new(
            config.connect_timeout,
            config.monitor_tls.as_ref(),
            config.monitor_auth.clone(),
            config.command_timeout,
        )?);
        let streams =
            Arc::new(TcpStreamFactory::new(config.connect_timeout, config.target_tls.as_ref())?);

        // Inactive until the first request.
        let token = CancellationToken::new();
        token.cancel();

        Ok(Self {
            cycle: EndpointCycle::new(config.monitors.iter().cloned()),
            query: query_client(&config, Arc::clone(&transport) as Arc<dyn MonitorTransport>),
            transport,
            streams,
            events: Arc::new(TracingSink),
            active: Arc::new(Mutex::new(token)),
            retry_attempts: 0,
            last_error: None,
            target: None,
            config,
        })
    }

    /// Replaces the monitor transport.
    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn MonitorTransport>) -> Self {
        self.query = query_client(&self.config, Arc::clone(&transport));
        self.transport = transport;
        self
    }

    /// Replaces the factory that opens the final stream.
    #[must_use]
    pub fn with_stream_factory(mut self, streams: Arc<dyn StreamFactory>) -> Self {
        self.streams = streams;
        self
    }

    /// Replaces the sink for non-fatal notifications.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &SentinelConfig {
        &self.config
    }

    /// Returns the monitors currently known, in cycle order.
    #[must_use]
    pub fn monitors(&self) -> &[MonitorEndpoint] {
        self.cycle.endpoints()
    }

    /// Number of full-cycle exhaustions during the latest request.
    #[must_use]
    pub fn retry_attempts(&self) -> u32 {
        self.retry_attempts
    }

    /// The most recent per-endpoint error of the latest request.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Returns a handle that can cancel requests from another task.
    #[must_use]
    pub fn handle(&self) -> DisconnectHandle {
        DisconnectHandle { active: Arc::clone(&self.active) }
    }

    /// Cancels the request in flight, if any.
    pub fn disconnect(&self) {
        self.active.lock().cancel();
    }

    /// Returns true while a request is allowed to make progress.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.active.lock().is_cancelled()
    }

    /// Resolves the configured role and opens a stream to it.
    ///
    /// # Errors
    ///
    /// - [`SentinelError::Discovery`] if the discovery source fails or returns nothing
    /// - [`SentinelError::Exhausted`] if every monitor failed and the retry strategy declined
    /// - [`SentinelError::Closed`] if [`disconnect`](Self::disconnect) was called meanwhile
    /// - the stream factory's error if the resolved node cannot be reached
    pub async fn connect(&mut self) -> Result<BoxedStream> {
        let token = CancellationToken::new();
        *self.active.lock() = token.clone();
        self.retry_attempts = 0;
        self.last_error = None;
        self.cycle.reset(true);

        if self.cycle.is_empty() && self.config.discovery.is_some() {
            self.discover(&token).await?;
        }

        loop {
            ensure!(!token.is_cancelled(), ClosedSnafu);

            let Some(endpoint) = self.cycle.next() else {
                self.cycle.reset(false);
                self.retry_attempts += 1;
                let delay = self
                    .config
                    .retry_strategy
                    .as_ref()
                    .and_then(|strategy| strategy.delay_for(self.retry_attempts));

                let Some(delay) = delay else {
                    let message = self.exhausted_message("all monitors unreachable, retry disabled");
                    tracing::warn!(attempts = self.retry_attempts, "{message}");
                    return ExhaustedSnafu { message, attempts: self.retry_attempts }.fail();
                };

                let message = self.exhausted_message(&format!(
                    "all monitors unreachable, retrying after {}ms",
                    delay.as_millis()
                ));
                self.events.emit(ConnectorEvent::CycleExhausted {
                    attempt: self.retry_attempts,
                    delay,
                    message,
                });
                guarded(&token, sleep(delay)).await?;

                if self.config.discovery.is_some() {
                    self.discover(&token).await?;
                }
                continue;
            };

            tracing::debug!(endpoint = %endpoint, role = %self.config.role, "querying monitor");
            let resolved = guarded(
                &token,
                self.query.resolve(&endpoint, self.config.role, &self.config.name, &mut self.cycle),
            )
            .await;

            match resolved {
                Ok(address) => {
                    self.cycle.reset(true);
                    tracing::info!(
                        endpoint = %endpoint,
                        address = %address,
                        role = %self.config.role,
                        "resolved node"
                    );
                    self.target = Some(address.clone());
                    return self.open(&token, &address).await;
                },
                Err(e) if e.is_closed() => return Err(e),
                Err(e) => {
                    let error = e.to_string();
                    self.last_error = Some(error.clone());
                    self.events.emit(ConnectorEvent::MonitorError { endpoint, error });
                },
            }
        }
    }

    async fn open(&self, token: &CancellationToken, address: &NodeAddress) -> Result<BoxedStream> {
        guarded(token, self.streams.open(address)).await
    }

    /// Replaces the monitor set with the discovery source's answer.
    async fn discover(&mut self, token: &CancellationToken) -> Result<()> {
        let Some(source) = self.config.discovery.clone() else {
            return Ok(());
        };

        let monitors = guarded(token, source.discover()).await.map_err(|e| match e {
            SentinelError::Closed | SentinelError::Discovery { .. } => e,
            other => DiscoverySnafu { message: format!("{}: {other}", source.describe()) }.build(),
        })?;
        ensure!(
            !monitors.is_empty(),
            DiscoverySnafu { message: format!("{} returned no monitors", source.describe()) }
        );

        tracing::debug!(source = %source.describe(), count = monitors.len(), "discovered monitors");
        self.cycle.replace(monitors);
        Ok(())
    }

    fn exhausted_message(&self, base: &str) -> String {
        match self.last_error {
            Some(ref error) => format!("{base}; last error: {error}"),
            None => base.to_string(),
        }
    }

    /// Checks the role a connected node advertises against the configured one.
    ///
    /// An unknown role counts as a match. On a mismatch the monitor that
    /// produced the stale answer is demoted: the next request starts with the
    /// monitor after it.
    pub fn check_role(&mut self, advertised: Option<Role>) -> bool {
        let Some(advertised) = advertised else {
            return true;
        };
        if advertised == self.config.role {
            return true;
        }

        tracing::warn!(
            expected = %self.config.role,
            advertised = %advertised,
            "role mismatch, demoting monitor"
        );
        self.cycle.next();
        self.cycle.next();
        self.cycle.reset(true);
        false
    }

    /// Probes `stream` with `ROLE` and applies [`check_role`](Self::check_role).
    ///
    /// Probe errors carry the address resolved by the latest `connect()`.
    ///
    /// # Errors
    ///
    /// Returns the probe's I/O, protocol, or timeout error.
    pub async fn verify_role(&mut self, stream: &mut BoxedStream) -> Result<bool> {
        let address =
            self.target.as_ref().map_or_else(|| "unresolved".to_string(), NodeAddress::key);
        let role = probe_role(stream.as_mut(), &address, self.config.command_timeout).await?;
        Ok(self.check_role(role))
    }

    /// Builds a failover detector over the currently known monitors.
    ///
    /// Returns `None` unless failover detection is enabled in the configuration.
    #[must_use]
    pub fn failover_detector(&self) -> Option<FailoverDetector> {
        if !self.config.failover_detector {
            return None;
        }
        Some(FailoverDetector::new(
            Arc::clone(&self.transport),
            self.cycle.endpoints().to_vec(),
            self.config.name.clone(),
            self.config.nat_map.clone(),
        ))
    }
}

impl std::fmt::Debug for SentinelConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SentinelConnector")
            .field("config", &self.config)
            .field("cycle", &self.cycle)
            .field("retry_attempts", &self.retry_attempts)
            .field("last_error", &self.last_error)
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

fn query_client(config: &SentinelConfig, transport: Arc<dyn MonitorTransport>) -> MonitorQueryClient {
    MonitorQueryClient::new(
        transport,
        config.nat_map.clone(),
        config.preference.clone(),
        config.update_monitors,
    )
}

async fn sleep(delay: Duration) -> Result<()> {
    tokio::time::sleep(delay).await;
    Ok(())
}

/// Runs `fut` unless `token` is cancelled before or while it runs.
///
/// The token is checked again after `fut` completes so that a result
/// arriving after cancellation is discarded.
async fn guarded<T>(
    token: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    ensure!(!token.is_cancelled(), ClosedSnafu);

    let result = tokio::select! {
        biased;
        () = token.cancelled() => return ClosedSnafu.fail(),
        result = fut => result,
    };

    ensure!(!token.is_cancelled(), ClosedSnafu);
    result
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use std::{
        collections::HashMap,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use async_trait::async_trait;
    use snafu::IntoError;

    use super::*;
    use crate::{
        connection::MonitorSession,
        discovery::{FnSource, StaticSource},
        error::IoSnafu,
        events::ChannelSink,
        resp::Value,
        retry::RetryStrategy,
    };

    #[derive(Clone)]
    enum Behavior {
        Refuse,
        Master(&'static str, u16),
        Hang,
    }

    /// Monitor transport answering per endpoint identity.
    #[derive(Default)]
    struct Monitors {
        behaviors: Mutex<HashMap<String, Behavior>>,
        visits: Mutex<Vec<String>>,
    }

    impl Monitors {
        fn new(behaviors: &[(&str, Behavior)]) -> Arc<Self> {
            let map = behaviors.iter().map(|(id, b)| ((*id).to_string(), b.clone())).collect();
            Arc::new(Self { behaviors: Mutex::new(map), ..Self::default() })
        }

        fn visits(&self) -> Vec<String> {
            self.visits.lock().clone()
        }
    }

    struct Session {
        behavior: Behavior,
    }

    #[async_trait]
    impl MonitorTransport for Monitors {
        async fn open(&self, endpoint: &MonitorEndpoint) -> Result<Box<dyn MonitorSession>> {
            let identity = endpoint.identity();
            self.visits.lock().push(identity.clone());
            let behavior =
                self.behaviors.lock().get(&identity).cloned().unwrap_or(Behavior::Refuse);
            if matches!(behavior, Behavior::Refuse) {
                let refused = std::io::Error::from(std::io::ErrorKind::ConnectionRefused);
                return Err(IoSnafu { address: identity }.into_error(refused));
            }
            Ok(Box::new(Session { behavior }))
        }
    }

    #[async_trait]
    impl MonitorSession for Session {
        async fn query(&mut self, _args: &[&str]) -> Result<Value> {
            match self.behavior {
                Behavior::Master(ip, port) => Ok(Value::Array(vec![
                    Value::bulk(ip.to_owned()),
                    Value::bulk(port.to_string()),
                ])),
                Behavior::Hang => std::future::pending().await,
                Behavior::Refuse => Ok(Value::Nil),
            }
        }

        async fn receive(&mut self) -> Result<Value> {
            std::future::pending().await
        }

        async fn close(self: Box<Self>) {}
    }

    /// Stream factory that records every address it is asked to open.
    #[derive(Default)]
    struct Streams {
        opened: Mutex<Vec<NodeAddress>>,
    }

    #[async_trait]
    impl StreamFactory for Streams {
        async fn open(&self, address: &NodeAddress) -> Result<BoxedStream> {
            self.opened.lock().push(address.clone());
            let (client, _server) = tokio::io::duplex(64);
            Ok(Box::new(client))
        }
    }

    fn config(monitors: &[(&str, u16)], retry: Option<RetryStrategy>) -> SentinelConfig {
        SentinelConfig::builder()
            .name("orders")
            .role(Role::Master)
            .monitors(monitors.iter().map(|(h, p)| MonitorEndpoint::new(*h, *p)).collect())
            .maybe_retry_strategy(retry)
            .build()
            .unwrap()
    }

    fn connector(
        config: SentinelConfig,
        monitors: &Arc<Monitors>,
        streams: &Arc<Streams>,
    ) -> SentinelConnector {
        SentinelConnector::new(config)
            .unwrap()
            .with_transport(Arc::clone(monitors) as Arc<dyn MonitorTransport>)
            .with_stream_factory(Arc::clone(streams) as Arc<dyn StreamFactory>)
    }

    #[tokio::test]
    async fn test_connects_through_first_working_monitor() {
        let monitors = Monitors::new(&[
            ("m1:26379", Behavior::Refuse),
            ("m2:26379", Behavior::Master("10.0.0.2", 6380)),
        ]);
        let streams = Arc::new(Streams::default());
        let (sink, mut events) = ChannelSink::new();
        let mut connector =
            connector(config(&[("m1", 26379), ("m2", 26379)], None), &monitors, &streams)
                .with_event_sink(Arc::new(sink));

        connector.connect().await.unwrap();

        assert_eq!(streams.opened.lock().as_slice(), &[NodeAddress::new("10.0.0.2", 6380)]);
        assert!(matches!(events.try_recv().unwrap(), ConnectorEvent::MonitorError { .. }));
        assert!(events.try_recv().is_err());
        assert!(connector.last_error().unwrap().contains("m1:26379"));
        assert_eq!(connector.retry_attempts(), 0);
    }

    #[tokio::test]
    async fn test_working_monitor_is_tried_first_next_time() {
        let monitors = Monitors::new(&[
            ("m1:26379", Behavior::Refuse),
            ("m2:26379", Behavior::Master("10.0.0.2", 6380)),
        ]);
        let streams = Arc::new(Streams::default());
        let mut connector =
            connector(config(&[("m1", 26379), ("m2", 26379)], None), &monitors, &streams);

        connector.connect().await.unwrap();
        connector.connect().await.unwrap();

        assert_eq!(monitors.visits(), vec!["m1:26379", "m2:26379", "m2:26379"]);
    }

    #[tokio::test]
    async fn test_exhaustion_without_retry() {
        let monitors = Monitors::new(&[]);
        let streams = Arc::new(Streams::default());
        let (sink, mut events) = ChannelSink::new();
        let mut connector = connector(
            config(&[("m1", 26379), ("m2", 26379), ("m3", 26379)], None),
            &monitors,
            &streams,
        )
        .with_event_sink(Arc::new(sink));

        let err = connector.connect().await.err().unwrap();

        let message = err.to_string();
        assert!(message.starts_with("all monitors unreachable, retry disabled"));
        assert!(message.contains("last error:"));
        assert!(message.contains("m3:26379"), "last error names the last monitor: {message}");
        assert!(matches!(err, SentinelError::Exhausted { attempts: 1, .. }));

        let mut errors = 0;
        while let Ok(event) = events.try_recv() {
            assert!(matches!(event, ConnectorEvent::MonitorError { .. }));
            errors += 1;
        }
        assert_eq!(errors, 3);
        assert!(streams.opened.lock().is_empty());
    }

    #[tokio::test]
    async fn test_retry_strategy_declining_ends_request() {
        let monitors = Monitors::new(&[]);
        let streams = Arc::new(Streams::default());
        let retry = RetryStrategy::fixed(Duration::from_millis(1)).with_max_attempts(2);
        let (sink, mut events) = ChannelSink::new();
        let mut connector = connector(config(&[("m1", 26379)], Some(retry)), &monitors, &streams)
            .with_event_sink(Arc::new(sink));

        let err = connector.connect().await.err().unwrap();
        assert!(matches!(err, SentinelError::Exhausted { attempts: 3, .. }));
        assert_eq!(connector.retry_attempts(), 3);

        let exhausted: Vec<u32> = std::iter::from_fn(|| events.try_recv().ok())
            .filter_map(|event| match event {
                ConnectorEvent::CycleExhausted { attempt, message, .. } => {
                    assert!(message.starts_with("all monitors unreachable, retrying after 1ms"));
                    Some(attempt)
                },
                ConnectorEvent::MonitorError { .. } => None,
            })
            .collect();
        assert_eq!(exhausted, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_runtime_state_resets_per_request() {
        let monitors = Monitors::new(&[]);
        let streams = Arc::new(Streams::default());
        let mut connector = connector(config(&[("m1", 26379)], None), &monitors, &streams);

        assert!(connector.connect().await.is_err());
        assert_eq!(connector.retry_attempts(), 1);

        monitors.behaviors.lock().insert("m1:26379".into(), Behavior::Master("10.0.0.2", 6380));
        connector.connect().await.unwrap();
        assert_eq!(connector.retry_attempts(), 0);
        assert!(connector.last_error().is_none());
    }

    #[tokio::test]
    async fn test_disconnect_during_query_yields_closed() {
        let monitors = Monitors::new(&[("m1:26379", Behavior::Hang)]);
        let streams = Arc::new(Streams::default());
        let mut connector = connector(config(&[("m1", 26379)], None), &monitors, &streams);
        let handle = connector.handle();

        let task = tokio::spawn(async move {
            let result = connector.connect().await;
            (result.err(), connector)
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(handle.is_active());
        handle.disconnect();

        let (err, connector) = task.await.unwrap();
        assert!(err.unwrap().is_closed());
        assert!(!connector.is_active());
        assert!(streams.opened.lock().is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_during_backoff_stops_retrying() {
        let monitors = Monitors::new(&[]);
        let streams = Arc::new(Streams::default());
        let retry = RetryStrategy::fixed(Duration::from_secs(30));
        let mut connector = connector(config(&[("m1", 26379)], Some(retry)), &monitors, &streams);
        let handle = connector.handle();

        let task = tokio::spawn(async move { connector.connect().await.err() });
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.disconnect();

        let err = tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
        assert!(err.unwrap().is_closed());
        assert_eq!(monitors.visits().len(), 1, "no monitor contacted after disconnect");
    }

    #[tokio::test]
    async fn test_guarded_discards_late_result() {
        let token = CancellationToken::new();
        let inner = token.clone();
        let result = guarded(&token, async move {
            inner.cancel();
            Ok(42)
        })
        .await;
        assert!(result.unwrap_err().is_closed());
    }

    #[tokio::test]
    async fn test_role_mismatch_demotes_monitor() {
        let monitors = Monitors::new(&[
            ("m1:26379", Behavior::Master("10.0.0.1", 6379)),
            ("m2:26379", Behavior::Master("10.0.0.2", 6379)),
        ]);
        let streams = Arc::new(Streams::default());
        let mut connector =
            connector(config(&[("m1", 26379), ("m2", 26379)], None), &monitors, &streams);

        connector.connect().await.unwrap();
        assert!(connector.check_role(Some(Role::Master)));
        assert!(connector.check_role(None));
        assert!(!connector.check_role(Some(Role::Replica)));

        connector.connect().await.unwrap();
        assert_eq!(monitors.visits(), vec!["m1:26379", "m2:26379"]);
        assert_eq!(streams.opened.lock()[1], NodeAddress::new("10.0.0.2", 6379));
    }

    #[tokio::test]
    async fn test_discovery_populates_empty_set() {
        let monitors = Monitors::new(&[("m9:26379", Behavior::Master("10.0.0.9", 6379))]);
        let streams = Arc::new(Streams::default());
        let config = SentinelConfig::builder()
            .name("orders")
            .role(Role::Master)
            .discovery(Arc::new(StaticSource::new([MonitorEndpoint::new("m9", 26379)])))
            .build()
            .unwrap();
        let mut connector = connector(config, &monitors, &streams);
        assert!(connector.monitors().is_empty());

        connector.connect().await.unwrap();
        assert_eq!(connector.monitors(), &[MonitorEndpoint::new("m9", 26379)]);
    }

    #[tokio::test]
    async fn test_discovery_failure_is_fatal() {
        let monitors = Monitors::new(&[]);
        let streams = Arc::new(Streams::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let source = FnSource::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, SentinelError>(Vec::<MonitorEndpoint>::new()) }
        });
        let config = SentinelConfig::builder()
            .name("orders")
            .role(Role::Master)
            .discovery(Arc::new(source))
            .retry_strategy(RetryStrategy::fixed(Duration::from_millis(1)))
            .build()
            .unwrap();
        let mut connector = connector(config, &monitors, &streams);

        let err = connector.connect().await.err().unwrap();
        assert!(matches!(err, SentinelError::Discovery { .. }));
        assert!(err.to_string().contains("returned no monitors"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(monitors.visits().is_empty());
    }

    #[tokio::test]
    async fn test_failover_detector_only_when_enabled() {
        let monitors = Monitors::new(&[]);
        let streams = Arc::new(Streams::default());
        let disabled = connector(config(&[("m1", 26379)], None), &monitors, &streams);
        assert!(disabled.failover_detector().is_none());

        let config = SentinelConfig::builder()
            .name("orders")
            .role(Role::Master)
            .monitors(vec![MonitorEndpoint::new("m1", 26379)])
            .failover_detector(true)
            .build()
            .unwrap();
        let enabled = connector(config, &monitors, &streams);
        assert!(enabled.failover_detector().is_some());
    }

    #[tokio::test]
    async fn test_verify_role_errors_name_resolved_node() {
        let monitors = Monitors::new(&[("m1:26379", Behavior::Master("10.0.0.1", 6379))]);
        let streams = Arc::new(Streams::default());
        let mut connector = connector(config(&[("m1", 26379)], None), &monitors, &streams);

        let mut stream = connector.connect().await.unwrap();
        let err = connector.verify_role(&mut stream).await.unwrap_err();
        match err {
            SentinelError::Io { ref address, .. } => assert_eq!(address, "10.0.0.1:6379"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_new_connector_is_inactive() {
        let connector = SentinelConnector::new(config(&[("m1", 26379)], None)).unwrap();
        assert!(!connector.is_active());
        assert_eq!(connector.monitors().len(), 1);
    }
}
