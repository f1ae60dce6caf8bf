//! In-process RESP servers for testing.
//!
//! [`MockMonitor`] answers the monitor commands the connector sends and can
//! publish `+switch-master` announcements. [`MockDataNode`] stands in for
//! the dataset node at the end of the resolution and answers `ROLE`.
//!
//! Both bind an ephemeral loopback port and run until shut down or dropped.
//! After shutdown the port refuses connections, which is how tests simulate a
//! monitor going away.
//!
//! ```no_run
//! # use inferadb_ledger_sentinel::mock::{MockDataNode, MockMonitor};
//! # use inferadb_ledger_sentinel::Role;
//! # async fn example() -> inferadb_ledger_sentinel::Result<()> {
//! let node = MockDataNode::start(Role::Master).await?;
//! let monitor = MockMonitor::start("orders").await?;
//! monitor.set_master(node.address());
//! # Ok(())
//! # }
//! ```

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use bytes::BytesMut;
use parking_lot::RwLock;
use snafu::ResultExt;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::broadcast,
};
use tokio_util::sync::CancellationToken;

use crate::{
    endpoint::{MonitorEndpoint, NodeAddress},
    error::{IoSnafu, Result},
    failover::SWITCH_MASTER_CHANNEL,
    resp::{self, Value},
    role::Role,
};

/// A flat key/value record as monitors report replicas and peers.
type Record = Vec<(String, String)>;

struct MonitorState {
    name: String,
    master: RwLock<Option<NodeAddress>>,
    replicas: RwLock<Vec<Record>>,
    peers: RwLock<Vec<Record>>,
    password: RwLock<Option<String>>,

    /// Number of malformed master replies to send next.
    malformed_count: AtomicUsize,
    /// Delay before every reply (milliseconds).
    delay_ms: AtomicU64,
    /// Total commands received.
    request_count: AtomicUsize,
    /// Total master lookups received.
    master_queries: AtomicUsize,

    announcements: broadcast::Sender<Value>,
}

impl MonitorState {
    fn should_inject_malformed(&self) -> bool {
        self.malformed_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms.load(Ordering::SeqCst))
    }

    fn reply(&self, args: &[String], authenticated: &mut bool) -> Value {
        let command = args.first().map(|c| c.to_ascii_uppercase()).unwrap_or_default();

        if command == "AUTH" {
            let expected = self.password.read().clone();
            return match (expected, args.last()) {
                (None, _) => Value::Simple("OK".into()),
                (Some(expected), Some(given)) if args.len() > 1 && *given == expected => {
                    *authenticated = true;
                    Value::Simple("OK".into())
                },
                _ => Value::Error("WRONGPASS invalid username-password pair".into()),
            };
        }
        if !*authenticated {
            return Value::Error("NOAUTH Authentication required.".into());
        }

        match command.as_str() {
            "PING" => Value::Simple("PONG".into()),
            "SENTINEL" => self.sentinel_reply(&args[1..]),
            _ => Value::Error(format!("ERR unknown command '{command}'")),
        }
    }

    fn sentinel_reply(&self, args: &[String]) -> Value {
        let (Some(subcommand), Some(name)) = (args.first(), args.get(1)) else {
            return Value::Error("ERR wrong number of arguments for 'sentinel' command".into());
        };
        let subcommand = subcommand.to_ascii_lowercase();
        let known = *name == self.name;

        match subcommand.as_str() {
            "get-master-addr-by-name" => {
                self.master_queries.fetch_add(1, Ordering::SeqCst);
                if self.should_inject_malformed() {
                    return Value::Array(vec![Value::bulk("garbage")]);
                }
                match self.master.read().as_ref() {
                    Some(master) if known => Value::Array(vec![
                        Value::bulk(master.host.clone()),
                        Value::bulk(master.port.to_string()),
                    ]),
                    _ => Value::Nil,
                }
            },
            "replicas" | "slaves" if known => records(&self.replicas.read()),
            "sentinels" if known => records(&self.peers.read()),
            "replicas" | "slaves" | "sentinels" => {
                Value::Error("ERR No such master with that name".into())
            },
            _ => Value::Error(format!("ERR unknown sentinel subcommand '{subcommand}'")),
        }
    }
}

fn records(records: &[Record]) -> Value {
    Value::Array(
        records
            .iter()
            .map(|record| {
                Value::Array(
                    record
                        .iter()
                        .flat_map(|(k, v)| [Value::bulk(k.clone()), Value::bulk(v.clone())])
                        .collect(),
                )
            })
            .collect(),
    )
}

fn record(ip: &str, port: u16, flags: &str) -> Record {
    vec![
        ("name".to_owned(), format!("{ip}:{port}")),
        ("ip".to_owned(), ip.to_owned()),
        ("port".to_owned(), port.to_string()),
        ("flags".to_owned(), flags.to_owned()),
    ]
}

/// A mock monitor for one dataset.
///
/// Provides controllable behavior for connector tests:
/// - Master, replica, and peer lists
/// - Optional password authentication
/// - Malformed replies and reply delays
/// - `+switch-master` announcements to subscribers
pub struct MockMonitor {
    state: Arc<MonitorState>,
    endpoint: MonitorEndpoint,
    shutdown: CancellationToken,
}

impl MockMonitor {
    /// Starts a monitor for dataset `name` on an ephemeral port.
    ///
    /// # Errors
    ///
    /// Returns `SentinelError::Io` if binding fails.
    pub async fn start(name: impl Into<String>) -> Result<Self> {
        let (announcements, _) = broadcast::channel(16);
        let state = Arc::new(MonitorState {
            name: name.into(),
            master: RwLock::new(None),
            replicas: RwLock::new(Vec::new()),
            peers: RwLock::new(Vec::new()),
            password: RwLock::new(None),
            malformed_count: AtomicUsize::new(0),
            delay_ms: AtomicU64::new(0),
            request_count: AtomicUsize::new(0),
            master_queries: AtomicUsize::new(0),
            announcements,
        });

        let (listener, endpoint) = bind().await?;
        let shutdown = CancellationToken::new();

        let accept_state = Arc::clone(&state);
        let token = shutdown.clone();
        tokio::spawn(async move {
            accept_loop(listener, token, move |stream, token| {
                serve_monitor(Arc::clone(&accept_state), stream, token)
            })
            .await;
        });

        Ok(Self { state, endpoint, shutdown })
    }

    /// Returns the endpoint to configure the connector with.
    #[must_use]
    pub fn endpoint(&self) -> MonitorEndpoint {
        self.endpoint.clone()
    }

    /// Sets the master address reported for the dataset.
    pub fn set_master(&self, address: NodeAddress) {
        *self.state.master.write() = Some(address);
    }

    /// Makes master lookups answer nil.
    pub fn clear_master(&self) {
        *self.state.master.write() = None;
    }

    /// Adds a replica with the given comma-separated flags.
    pub fn add_replica(&self, ip: &str, port: u16, flags: &str) {
        self.state.replicas.write().push(record(ip, port, flags));
    }

    /// Adds a peer monitor with the given comma-separated flags.
    pub fn add_peer(&self, ip: &str, port: u16, flags: &str) {
        self.state.peers.write().push(record(ip, port, flags));
    }

    /// Requires `AUTH` with this password before any other command.
    pub fn require_password(&self, password: impl Into<String>) {
        *self.state.password.write() = Some(password.into());
    }

    /// Answers the next `count` master lookups with a malformed reply.
    pub fn inject_malformed(&self, count: usize) {
        self.state.malformed_count.store(count, Ordering::SeqCst);
    }

    /// Delays every reply. Set to 0 to disable.
    pub fn inject_delay(&self, millis: u64) {
        self.state.delay_ms.store(millis, Ordering::SeqCst);
    }

    /// Announces a master switch to every subscriber.
    ///
    /// Returns the number of subscribers the announcement reached.
    pub fn publish_switch_master(&self, old: &NodeAddress, new: &NodeAddress) -> usize {
        let payload = format!(
            "{} {} {} {} {}",
            self.state.name, old.host, old.port, new.host, new.port
        );
        let message = Value::Array(vec![
            Value::bulk("message"),
            Value::bulk(SWITCH_MASTER_CHANNEL),
            Value::bulk(payload),
        ]);
        self.state.announcements.send(message).unwrap_or(0)
    }

    /// Returns the number of connections subscribed to announcements.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.state.announcements.receiver_count()
    }

    /// Returns the total number of commands received.
    #[must_use]
    pub fn request_count(&self) -> usize {
        self.state.request_count.load(Ordering::SeqCst)
    }

    /// Returns the number of master lookups received.
    #[must_use]
    pub fn master_queries(&self) -> usize {
        self.state.master_queries.load(Ordering::SeqCst)
    }

    /// Resets counters and injected failures.
    pub fn reset(&self) {
        self.state.malformed_count.store(0, Ordering::SeqCst);
        self.state.delay_ms.store(0, Ordering::SeqCst);
        self.state.request_count.store(0, Ordering::SeqCst);
        self.state.master_queries.store(0, Ordering::SeqCst);
    }

    /// Stops accepting connections and closes open ones.
    pub fn shutdown(self) {
        self.shutdown.cancel();
    }
}

impl Drop for MockMonitor {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// A mock dataset node that reports a configurable role.
pub struct MockDataNode {
    role: Arc<RwLock<Role>>,
    address: NodeAddress,
    connections: Arc<AtomicUsize>,
    shutdown: CancellationToken,
}

impl MockDataNode {
    /// Starts a node reporting `role` on an ephemeral port.
    ///
    /// # Errors
    ///
    /// Returns `SentinelError::Io` if binding fails.
    pub async fn start(role: Role) -> Result<Self> {
        let role = Arc::new(RwLock::new(role));
        let connections = Arc::new(AtomicUsize::new(0));
        let (listener, endpoint) = bind().await?;
        let shutdown = CancellationToken::new();

        let (accept_role, accept_connections) = (Arc::clone(&role), Arc::clone(&connections));
        let token = shutdown.clone();
        tokio::spawn(async move {
            accept_loop(listener, token, move |stream, token| {
                accept_connections.fetch_add(1, Ordering::SeqCst);
                serve_node(Arc::clone(&accept_role), stream, token)
            })
            .await;
        });

        Ok(Self { role, address: endpoint.address(), connections, shutdown })
    }

    /// Returns the node's address.
    #[must_use]
    pub fn address(&self) -> NodeAddress {
        self.address.clone()
    }

    /// Changes the reported role, as a failover would.
    pub fn set_role(&self, role: Role) {
        *self.role.write() = role;
    }

    /// Returns the number of connections accepted.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Stops accepting connections and closes open ones.
    pub fn shutdown(self) {
        self.shutdown.cancel();
    }
}

impl Drop for MockDataNode {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn bind() -> Result<(TcpListener, MonitorEndpoint)> {
    const ADDRESS: &str = "127.0.0.1:0";
    let listener = TcpListener::bind(ADDRESS).await.context(IoSnafu { address: ADDRESS })?;
    let local = listener.local_addr().context(IoSnafu { address: ADDRESS })?;
    Ok((listener, MonitorEndpoint::new(local.ip().to_string(), local.port())))
}

async fn accept_loop<F, Fut>(listener: TcpListener, token: CancellationToken, serve: F)
where
    F: Fn(TcpStream, CancellationToken) -> Fut,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    loop {
        let accepted = tokio::select! {
            () = token.cancelled() => return,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, _)) => {
                tokio::spawn(serve(stream, token.clone()));
            },
            Err(e) => tracing::warn!(error = %e, "mock accept failed"),
        }
    }
}

/// Reads one command; `None` on close or garbage.
async fn read_command(stream: &mut TcpStream, buf: &mut BytesMut) -> Option<Vec<String>> {
    loop {
        match resp::decode(buf) {
            Ok(Some(Value::Array(items))) => {
                return items.iter().map(|item| item.as_str().map(str::to_owned)).collect();
            },
            Ok(Some(_)) | Err(_) => return None,
            Ok(None) => {},
        }
        match stream.read_buf(buf).await {
            Ok(0) | Err(_) => return None,
            Ok(_) => {},
        }
    }
}

async fn write_value(stream: &mut TcpStream, value: &Value) -> bool {
    let mut out = BytesMut::new();
    resp::encode_value(value, &mut out);
    stream.write_all(&out).await.is_ok()
}

async fn serve_monitor(state: Arc<MonitorState>, mut stream: TcpStream, token: CancellationToken) {
    let mut buf = BytesMut::new();
    let mut authenticated = state.password.read().is_none();

    loop {
        let args = tokio::select! {
            () = token.cancelled() => return,
            args = read_command(&mut stream, &mut buf) => match args {
                Some(args) if !args.is_empty() => args,
                _ => return,
            },
        };
        state.request_count.fetch_add(1, Ordering::SeqCst);

        let delay = state.delay();
        if !delay.is_zero() {
            tokio::select! {
                () = token.cancelled() => return,
                () = tokio::time::sleep(delay) => {},
            }
        }

        if args[0].eq_ignore_ascii_case("SUBSCRIBE") && authenticated {
            let announcements = state.announcements.subscribe();
            let channels = &args[1..];
            for (index, channel) in channels.iter().enumerate() {
                let confirm = Value::Array(vec![
                    Value::bulk("subscribe"),
                    Value::bulk(channel.clone()),
                    Value::Integer(index as i64 + 1),
                ]);
                if !write_value(&mut stream, &confirm).await {
                    return;
                }
            }
            let wanted = channels.iter().any(|c| c == SWITCH_MASTER_CHANNEL);
            push_announcements(stream, announcements, wanted, token).await;
            return;
        }

        let reply = state.reply(&args, &mut authenticated);
        if !write_value(&mut stream, &reply).await {
            return;
        }
    }
}

async fn push_announcements(
    mut stream: TcpStream,
    mut announcements: broadcast::Receiver<Value>,
    wanted: bool,
    token: CancellationToken,
) {
    let mut scratch = [0u8; 256];
    loop {
        tokio::select! {
            () = token.cancelled() => return,
            read = stream.read(&mut scratch) => {
                if matches!(read, Ok(0) | Err(_)) {
                    return;
                }
            },
            message = announcements.recv() => match message {
                Ok(message) if wanted => {
                    if !write_value(&mut stream, &message).await {
                        return;
                    }
                },
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {},
                Err(broadcast::error::RecvError::Closed) => return,
            },
        }
    }
}

async fn serve_node(role: Arc<RwLock<Role>>, mut stream: TcpStream, token: CancellationToken) {
    let mut buf = BytesMut::new();
    loop {
        let args = tokio::select! {
            () = token.cancelled() => return,
            args = read_command(&mut stream, &mut buf) => match args {
                Some(args) if !args.is_empty() => args,
                _ => return,
            },
        };

        let reply = match args[0].to_ascii_uppercase().as_str() {
            "ROLE" => match *role.read() {
                Role::Master => {
                    Value::Array(vec![Value::bulk("master"), Value::Integer(0), Value::Array(vec![])])
                },
                Role::Replica => Value::Array(vec![
                    Value::bulk("slave"),
                    Value::bulk("127.0.0.1"),
                    Value::Integer(6379),
                    Value::bulk("connected"),
                    Value::Integer(0),
                ]),
            },
            "PING" => Value::Simple("PONG".into()),
            other => Value::Error(format!("ERR unknown command '{other}'")),
        };
        if !write_value(&mut stream, &reply).await {
            return;
        }
    }
}
