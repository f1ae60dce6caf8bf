//! Dynamic monitor discovery.
//!
//! A [`MonitorSource`] supplies the monitor list when it is not known up
//! front. The connector calls it when its set is empty and again before each
//! retry pass, replacing the set wholesale with whatever the source returns.
//!
//! Sources provided here:
//! - [`StaticSource`] - a fixed list, mainly for tests
//! - [`DnsSource`] - every address a DNS name resolves to, on a fixed port
//! - [`FileSource`] - a JSON manifest re-read on every call
//! - [`FnSource`] - any async closure

use std::{fmt, future::Future, net::IpAddr, path::PathBuf};

use async_trait::async_trait;
use hickory_resolver::{Resolver, config::ResolverConfig, name_server::TokioConnectionProvider};
use parking_lot::RwLock;
use serde::Deserialize;

use crate::{
    endpoint::{AddressFamily, DEFAULT_MONITOR_PORT, MonitorEndpoint},
    error::{DiscoverySnafu, Result},
};

/// Supplies the current monitor endpoints.
#[async_trait]
pub trait MonitorSource: Send + Sync {
    /// Returns the monitors to try. An error or an empty list ends the
    /// connect request.
    async fn discover(&self) -> Result<Vec<MonitorEndpoint>>;

    /// Short description used in log and error messages.
    fn describe(&self) -> String {
        "custom source".to_string()
    }
}

/// A fixed monitor list.
#[derive(Debug, Clone)]
pub struct StaticSource {
    monitors: Vec<MonitorEndpoint>,
}

impl StaticSource {
    /// Creates a source that always returns `monitors`.
    pub fn new(monitors: impl IntoIterator<Item = MonitorEndpoint>) -> Self {
        Self { monitors: monitors.into_iter().collect() }
    }
}

#[async_trait]
impl MonitorSource for StaticSource {
    async fn discover(&self) -> Result<Vec<MonitorEndpoint>> {
        Ok(self.monitors.clone())
    }

    fn describe(&self) -> String {
        "static endpoints".to_string()
    }
}

/// Resolves a DNS name to monitor endpoints.
///
/// Each resolved address becomes one endpoint on the configured port.
#[derive(bon::Builder)]
pub struct DnsSource {
    /// Name to resolve (e.g., `sentinel.cache.svc.cluster.local`).
    #[builder(into)]
    domain: String,

    /// Port the monitors listen on.
    #[builder(default = DEFAULT_MONITOR_PORT)]
    port: u16,

    /// Keep only addresses of this family.
    family: Option<AddressFamily>,

    #[builder(skip)]
    resolver: RwLock<Option<Resolver<TokioConnectionProvider>>>,
}

impl DnsSource {
    /// Returns the DNS name.
    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Returns the monitor port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    fn resolver(&self) -> Resolver<TokioConnectionProvider> {
        if let Some(ref resolver) = *self.resolver.read() {
            return resolver.clone();
        }

        let resolver = Resolver::builder_with_config(
            ResolverConfig::default(),
            TokioConnectionProvider::default(),
        )
        .build();

        let mut guard = self.resolver.write();
        guard.get_or_insert(resolver).clone()
    }
}

impl fmt::Debug for DnsSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DnsSource")
            .field("domain", &self.domain)
            .field("port", &self.port)
            .field("family", &self.family)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl MonitorSource for DnsSource {
    async fn discover(&self) -> Result<Vec<MonitorEndpoint>> {
        let lookup = self.resolver().lookup_ip(self.domain.as_str()).await.map_err(|e| {
            DiscoverySnafu { message: format!("DNS resolution failed for {}: {e}", self.domain) }
                .build()
        })?;

        let monitors = lookup
            .iter()
            .filter(|ip: &IpAddr| match self.family {
                Some(AddressFamily::Ipv4) => ip.is_ipv4(),
                Some(AddressFamily::Ipv6) => ip.is_ipv6(),
                None => true,
            })
            .map(|ip| MonitorEndpoint::new(ip.to_string(), self.port))
            .collect::<Vec<_>>();

        tracing::debug!(domain = %self.domain, count = monitors.len(), "resolved monitors via DNS");
        Ok(monitors)
    }

    fn describe(&self) -> String {
        format!("DNS domain {}", self.domain)
    }
}

/// Monitor manifest JSON format.
#[derive(Debug, Deserialize)]
struct MonitorManifest {
    monitors: Vec<MonitorEndpoint>,
}

/// Reads monitors from a JSON manifest on every call.
///
/// ```json
/// { "monitors": [ { "host": "10.0.0.1", "port": 26379 }, { "host": "10.0.0.2" } ] }
/// ```
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    /// Creates a source backed by the manifest at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl MonitorSource for FileSource {
    async fn discover(&self) -> Result<Vec<MonitorEndpoint>> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            let message = format!("failed to read monitor manifest {}: {e}", self.path.display());
            DiscoverySnafu { message }.build()
        })?;

        let manifest: MonitorManifest = serde_json::from_str(&content).map_err(|e| {
            let message = format!("failed to parse monitor manifest {}: {e}", self.path.display());
            DiscoverySnafu { message }.build()
        })?;

        Ok(manifest.monitors)
    }

    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }
}

/// Adapts an async closure into a [`MonitorSource`].
pub struct FnSource<F> {
    f: F,
}

impl<F, Fut> FnSource<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<MonitorEndpoint>>> + Send,
{
    /// Wraps `f`.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> MonitorSource for FnSource<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<MonitorEndpoint>>> + Send,
{
    async fn discover(&self) -> Result<Vec<MonitorEndpoint>> {
        (self.f)().await
    }
}
