//! Connector configuration.
//!
//! [`SentinelConfig`] is built with a validating builder and is immutable
//! afterwards. Every check runs synchronously at construction so that
//! `connect()` never reports a configuration problem.
//!
//! ```no_run
//! # use inferadb_ledger_sentinel::{MonitorEndpoint, Role, SentinelConfig};
//! # fn example() -> inferadb_ledger_sentinel::Result<()> {
//! let config = SentinelConfig::builder()
//!     .name("orders")
//!     .role(Role::Master)
//!     .monitors(vec![
//!         MonitorEndpoint::new("10.0.0.1", 26379),
//!         MonitorEndpoint::new("10.0.0.2", 26379),
//!     ])
//!     .build()?;
//! # Ok(())
//! # }
//! ```

use std::{fmt, path::PathBuf, sync::Arc, time::Duration};

use snafu::ensure;

use crate::{
    discovery::MonitorSource,
    endpoint::MonitorEndpoint,
    error::{ConfigSnafu, Result},
    nat::NatMap,
    retry::RetryStrategy,
    role::Role,
    selector::PreferenceSpec,
};

/// Default timeout for establishing any connection (10 seconds).
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Credentials sent to monitors when a session opens.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Optional user name; password-only auth when absent.
    pub username: Option<String>,
    /// Password.
    pub password: String,
}

impl Credentials {
    /// Password-only credentials.
    pub fn password(password: impl Into<String>) -> Self {
        Self { username: None, password: password.into() }
    }

    /// User name and password credentials.
    pub fn user(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self { username: Some(username.into()), password: password.into() }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Configuration for a [`SentinelConnector`](crate::SentinelConnector).
#[derive(Clone)]
pub struct SentinelConfig {
    pub(crate) name: String,
    pub(crate) role: Role,
    pub(crate) monitors: Vec<MonitorEndpoint>,
    pub(crate) discovery: Option<Arc<dyn MonitorSource>>,
    pub(crate) monitor_auth: Option<Credentials>,
    pub(crate) retry_strategy: Option<RetryStrategy>,
    pub(crate) preference: Option<PreferenceSpec>,
    pub(crate) connect_timeout: Duration,
    pub(crate) command_timeout: Option<Duration>,
    pub(crate) monitor_tls: Option<TlsConfig>,
    pub(crate) target_tls: Option<TlsConfig>,
    pub(crate) nat_map: Option<NatMap>,
    pub(crate) update_monitors: bool,
    pub(crate) failover_detector: bool,
}

#[bon::bon]
impl SentinelConfig {
    /// Creates a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SentinelError::Config`](crate::SentinelError::Config) if:
    /// - `name` is empty
    /// - no monitors are given and there is no discovery source
    /// - a timeout is zero
    /// - a TLS configuration is incomplete
    #[builder]
    pub fn new(
        #[builder(into)] name: String,
        role: Role,
        #[builder(default)] monitors: Vec<MonitorEndpoint>,
        discovery: Option<Arc<dyn MonitorSource>>,
        monitor_auth: Option<Credentials>,
        retry_strategy: Option<RetryStrategy>,
        preference: Option<PreferenceSpec>,
        #[builder(default = DEFAULT_CONNECT_TIMEOUT)] connect_timeout: Duration,
        command_timeout: Option<Duration>,
        monitor_tls: Option<TlsConfig>,
        target_tls: Option<TlsConfig>,
        nat_map: Option<NatMap>,
        #[builder(default)] update_monitors: bool,
        #[builder(default)] failover_detector: bool,
    ) -> Result<Self> {
        let config = Self {
            name,
            role,
            monitors,
            discovery,
            monitor_auth,
            retry_strategy,
            preference,
            connect_timeout,
            command_timeout,
            monitor_tls,
            target_tls,
            nat_map,
            update_monitors,
            failover_detector,
        };
        config.validate()?;
        Ok(config)
    }
}

impl SentinelConfig {
    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns [`SentinelError::Config`](crate::SentinelError::Config) if any
    /// value is out of range.
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.name.is_empty(), ConfigSnafu { message: "dataset name cannot be empty" });
        ensure!(
            !self.monitors.is_empty() || self.discovery.is_some(),
            ConfigSnafu { message: "at least one monitor or a discovery source is required" }
        );
        ensure!(
            !self.connect_timeout.is_zero(),
            ConfigSnafu { message: "connect_timeout cannot be zero" }
        );
        if let Some(timeout) = self.command_timeout {
            ensure!(!timeout.is_zero(), ConfigSnafu { message: "command_timeout cannot be zero" });
        }
        if let Some(ref tls) = self.monitor_tls {
            tls.validate()?;
        }
        if let Some(ref tls) = self.target_tls {
            tls.validate()?;
        }
        Ok(())
    }

    /// Returns the logical dataset name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the requested role.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Returns the static monitor list.
    #[must_use]
    pub fn monitors(&self) -> &[MonitorEndpoint] {
        &self.monitors
    }

    /// Returns true if a dynamic discovery source is configured.
    #[must_use]
    pub fn has_discovery(&self) -> bool {
        self.discovery.is_some()
    }

    /// Returns the monitor credentials if configured.
    #[must_use]
    pub fn monitor_auth(&self) -> Option<&Credentials> {
        self.monitor_auth.as_ref()
    }

    /// Returns the retry strategy if configured.
    #[must_use]
    pub fn retry_strategy(&self) -> Option<&RetryStrategy> {
        self.retry_strategy.as_ref()
    }

    /// Returns the replica preference if configured.
    #[must_use]
    pub fn preference(&self) -> Option<&PreferenceSpec> {
        self.preference.as_ref()
    }

    /// Returns the connection establishment timeout.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Returns the per-command timeout for monitor queries.
    #[must_use]
    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout
    }

    /// Returns the TLS configuration for monitor sessions.
    #[must_use]
    pub fn monitor_tls(&self) -> Option<&TlsConfig> {
        self.monitor_tls.as_ref()
    }

    /// Returns the TLS configuration for the resolved node.
    #[must_use]
    pub fn target_tls(&self) -> Option<&TlsConfig> {
        self.target_tls.as_ref()
    }

    /// Returns the address remapping table if configured.
    #[must_use]
    pub fn nat_map(&self) -> Option<&NatMap> {
        self.nat_map.as_ref()
    }

    /// Returns whether monitor membership refresh is enabled.
    #[must_use]
    pub fn update_monitors(&self) -> bool {
        self.update_monitors
    }

    /// Returns whether failover detection is enabled.
    #[must_use]
    pub fn failover_detector(&self) -> bool {
        self.failover_detector
    }
}

impl fmt::Debug for SentinelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SentinelConfig")
            .field("name", &self.name)
            .field("role", &self.role)
            .field("monitors", &self.monitors)
            .field("discovery", &self.discovery.is_some())
            .field("monitor_auth", &self.monitor_auth)
            .field("retry_strategy", &self.retry_strategy)
            .field("preference", &self.preference)
            .field("connect_timeout", &self.connect_timeout)
            .field("command_timeout", &self.command_timeout)
            .field("monitor_tls", &self.monitor_tls)
            .field("target_tls", &self.target_tls)
            .field("nat_map", &self.nat_map)
            .field("update_monitors", &self.update_monitors)
            .field("failover_detector", &self.failover_detector)
            .finish()
    }
}

/// TLS configuration for monitor sessions or the final node connection.
///
/// # Example
///
/// ```no_run
/// # use inferadb_ledger_sentinel::TlsConfig;
/// // Verify against a private CA
/// let tls = TlsConfig::new().with_ca_cert_pem("/path/to/ca.pem");
///
/// // Mutual TLS
/// let mtls = TlsConfig::new()
///     .with_ca_cert_pem("/path/to/ca.pem")
///     .with_client_cert_pem("/path/to/client.pem", "/path/to/client.key");
///
/// // Public CAs from the operating system store
/// let tls = TlsConfig::with_native_roots().with_domain_name("cache.example.com");
/// ```
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    ca_cert: Option<CertificateData>,
    client_cert: Option<CertificateData>,
    client_key: Option<Vec<u8>>,
    domain_name: Option<String>,
    use_native_roots: bool,
}

/// Certificate material, PEM or DER encoded.
#[derive(Debug, Clone)]
pub enum CertificateData {
    /// PEM-encoded certificate chain.
    Pem(Vec<u8>),
    /// A single DER-encoded certificate.
    Der(Vec<u8>),
}

impl TlsConfig {
    /// Creates an empty TLS configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a TLS configuration that trusts the system's native roots.
    #[must_use]
    pub fn with_native_roots() -> Self {
        Self { use_native_roots: true, ..Self::default() }
    }

    /// Sets the CA certificate from a PEM file path.
    ///
    /// Unreadable files leave the CA unset, which [`validate`](Self::validate)
    /// reports unless native roots are enabled.
    #[must_use]
    pub fn with_ca_cert_pem(mut self, path: impl Into<PathBuf>) -> Self {
        if let Some(data) = read_file(path.into()) {
            self.ca_cert = Some(CertificateData::Pem(data));
        }
        self
    }

    /// Sets the CA certificate from PEM bytes.
    #[must_use]
    pub fn with_ca_cert_pem_bytes(mut self, pem: impl AsRef<[u8]>) -> Self {
        self.ca_cert = Some(CertificateData::Pem(pem.as_ref().to_vec()));
        self
    }

    /// Sets the CA certificate from DER bytes.
    #[must_use]
    pub fn with_ca_cert_der_bytes(mut self, der: impl AsRef<[u8]>) -> Self {
        self.ca_cert = Some(CertificateData::Der(der.as_ref().to_vec()));
        self
    }

    /// Sets the client certificate and key from PEM file paths for mutual TLS.
    #[must_use]
    pub fn with_client_cert_pem(
        mut self,
        cert_path: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
    ) -> Self {
        if let (Some(cert), Some(key)) =
            (read_file(cert_path.into()), read_file(key_path.into()))
        {
            self.client_cert = Some(CertificateData::Pem(cert));
            self.client_key = Some(key);
        }
        self
    }

    /// Sets the client certificate and key from PEM bytes for mutual TLS.
    #[must_use]
    pub fn with_client_cert_pem_bytes(
        mut self,
        cert: impl AsRef<[u8]>,
        key: impl AsRef<[u8]>,
    ) -> Self {
        self.client_cert = Some(CertificateData::Pem(cert.as_ref().to_vec()));
        self.client_key = Some(key.as_ref().to_vec());
        self
    }

    /// Overrides the server name checked against the peer certificate.
    ///
    /// Without it, the resolved host is used, which rarely matches when
    /// monitors report IP addresses.
    #[must_use]
    pub fn with_domain_name(mut self, domain: impl Into<String>) -> Self {
        self.domain_name = Some(domain.into());
        self
    }

    /// Returns the CA certificate data if configured.
    #[must_use]
    pub fn ca_cert(&self) -> Option<&CertificateData> {
        self.ca_cert.as_ref()
    }

    /// Returns the client certificate data if configured.
    #[must_use]
    pub fn client_cert(&self) -> Option<&CertificateData> {
        self.client_cert.as_ref()
    }

    /// Returns the client private key (PEM) if configured.
    #[must_use]
    pub fn client_key(&self) -> Option<&[u8]> {
        self.client_key.as_deref()
    }

    /// Returns the server name override if configured.
    #[must_use]
    pub fn domain_name(&self) -> Option<&str> {
        self.domain_name.as_deref()
    }

    /// Returns whether native root certificates are trusted.
    #[must_use]
    pub fn use_native_roots(&self) -> bool {
        self.use_native_roots
    }

    /// Validates the TLS configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a client certificate has no key, or if there is
    /// no way to verify the server certificate.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.client_cert.is_none() || self.client_key.is_some(),
            ConfigSnafu { message: "client certificate requires a private key" }
        );
        ensure!(
            self.ca_cert.is_some() || self.use_native_roots,
            ConfigSnafu { message: "TLS requires either a CA certificate or native roots" }
        );
        Ok(())
    }
}

fn read_file(path: PathBuf) -> Option<Vec<u8>> {
    match std::fs::read(&path) {
        Ok(data) => Some(data),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to read TLS material");
            None
        },
    }
}
