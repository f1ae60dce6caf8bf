//! Monitor-driven discovery and connection for replicated datasets.
//!
//! A dataset is served by one master and any number of replicas whose
//! addresses change on failover. A floating set of monitor processes tracks
//! who is who. This crate asks those monitors where the requested role lives
//! and hands back a connected stream, surviving dead monitors, stale answers,
//! and monitor sets that grow or move while the client runs.
//!
//! # Quick Start
//!
//! ```no_run
//! use inferadb_ledger_sentinel::{
//!     MonitorEndpoint, RetryStrategy, Role, SentinelConfig, SentinelConnector,
//! };
//! use std::time::Duration;
//!
//! # async fn example() -> inferadb_ledger_sentinel::Result<()> {
//! let config = SentinelConfig::builder()
//!     .name("orders")
//!     .role(Role::Master)
//!     .monitors(vec![
//!         MonitorEndpoint::new("10.0.0.1", 26379),
//!         MonitorEndpoint::new("10.0.0.2", 26379),
//!     ])
//!     .retry_strategy(RetryStrategy::linear(Duration::from_millis(10), Duration::from_secs(1)))
//!     .build()?;
//!
//! let mut connector = SentinelConnector::new(config)?;
//! let stream = connector.connect().await?;
//! # let _ = stream;
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              SentinelConnector (Public API)                 │
//! │  .connect() │ .disconnect() │ .verify_role() │ failover     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  EndpointCycle │ RetryStrategy │ MonitorSource │ EventSink  │
//! ├─────────────────────────────────────────────────────────────┤
//! │                   MonitorQueryClient                        │
//! │   master lookup │ membership refresh │ replica selection    │
//! │   PreferenceSpec │ NatMap                                   │
//! ├─────────────────────────────────────────────────────────────┤
//! │        MonitorTransport / StreamFactory (RESP, TLS)         │
//! └─────────────────────────────────────────────────────────────┘
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod connection;
mod connector;
mod cycle;
mod discovery;
mod endpoint;
mod error;
mod events;
mod failover;
pub mod mock;
mod nat;
mod query;
pub mod resp;
mod retry;
mod role;
mod selector;

// Public API exports
pub use config::{
    CertificateData, Credentials, DEFAULT_CONNECT_TIMEOUT, SentinelConfig, SentinelConfigBuilder,
    TlsConfig,
};
pub use connection::{
    BoxedStream, DuplexStream, MonitorSession, MonitorTransport, RespSession, RespTransport,
    StreamFactory, TcpStreamFactory,
};
pub use connector::{DisconnectHandle, SentinelConnector};
pub use cycle::EndpointCycle;
pub use discovery::{DnsSource, FileSource, FnSource, MonitorSource, StaticSource};
pub use endpoint::{AddressFamily, DEFAULT_MONITOR_PORT, MonitorEndpoint, NodeAddress};
pub use error::{Result, SentinelError};
pub use events::{ChannelSink, ConnectorEvent, EventSink, TracingSink};
pub use failover::{
    DEFAULT_RECONNECT_DELAY, FailoverDetector, FailoverHandle, SWITCH_MASTER_CHANNEL, SwitchMaster,
};
pub use nat::{NatFn, NatMap, remap};
pub use query::MonitorQueryClient;
pub use retry::{RetryFn, RetryStrategy};
pub use role::{Role, probe_role};
pub use selector::{
    CandidateReplica, DEFAULT_PRIORITY, PreferenceSpec, PreferredReplica, SelectorFn,
    select_preferred,
};
