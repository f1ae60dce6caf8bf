//! Monitor endpoints and resolved node addresses.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigSnafu, SentinelError};

/// Default port monitors listen on.
pub const DEFAULT_MONITOR_PORT: u16 = 26379;

/// IP family hint used when resolving a monitor host name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    /// Resolve to IPv4 addresses only.
    Ipv4,
    /// Resolve to IPv6 addresses only.
    Ipv6,
}

/// A host/port pair identifying a monitor process.
///
/// Two endpoints are the same monitor when their [`identity`](Self::identity)
/// strings are equal; the address family hint does not participate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorEndpoint {
    /// Host name or IP literal.
    pub host: String,
    /// TCP port.
    #[serde(default = "default_monitor_port")]
    pub port: u16,
    /// Optional address family hint.
    #[serde(default)]
    pub family: Option<AddressFamily>,
}

fn default_monitor_port() -> u16 {
    DEFAULT_MONITOR_PORT
}

impl MonitorEndpoint {
    /// Creates an endpoint without a family hint.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port, family: None }
    }

    /// Sets the address family hint.
    #[must_use]
    pub fn with_family(mut self, family: AddressFamily) -> Self {
        self.family = Some(family);
        self
    }

    /// Returns the identity key, the exact `host:port` string.
    #[must_use]
    pub fn identity(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns the endpoint as a node address.
    #[must_use]
    pub fn address(&self) -> NodeAddress {
        NodeAddress::new(self.host.clone(), self.port)
    }
}

impl PartialEq for MonitorEndpoint {
    fn eq(&self, other: &Self) -> bool {
        self.host == other.host && self.port == other.port
    }
}

impl Eq for MonitorEndpoint {}

impl fmt::Display for MonitorEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl From<NodeAddress> for MonitorEndpoint {
    fn from(address: NodeAddress) -> Self {
        Self::new(address.host, address.port)
    }
}

impl FromStr for MonitorEndpoint {
    type Err = SentinelError;

    /// Parses `host`, `host:port`, or `[v6-literal]:port`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = split_host_port(s)?;
        Ok(Self::new(host, port.unwrap_or(DEFAULT_MONITOR_PORT)))
    }
}

/// A resolved network address of a dataset node or monitor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeAddress {
    /// Host name or IP literal.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl NodeAddress {
    /// Creates a node address.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }

    /// Returns the `host:port` key used by the address remapper.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns a string suitable for `TcpStream::connect`.
    ///
    /// IPv6 literals are bracketed.
    #[must_use]
    pub fn socket_string(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            self.key()
        }
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for NodeAddress {
    type Err = SentinelError;

    /// Parses `host:port` or `[v6-literal]:port`; the port is required.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match split_host_port(s)? {
            (host, Some(port)) => Ok(Self::new(host, port)),
            (_, None) => ConfigSnafu { message: format!("address '{s}' is missing a port") }.fail(),
        }
    }
}

fn split_host_port(s: &str) -> Result<(String, Option<u16>), SentinelError> {
    let s = s.trim();
    if s.is_empty() {
        return ConfigSnafu { message: "address cannot be empty" }.fail();
    }

    let (host, port) = if let Some(rest) = s.strip_prefix('[') {
        let Some((host, tail)) = rest.split_once(']') else {
            return ConfigSnafu { message: format!("unterminated IPv6 literal in '{s}'") }.fail();
        };
        (host, tail.strip_prefix(':'))
    } else if s.matches(':').count() > 1 {
        // Bare IPv6 literal without a port.
        (s, None)
    } else {
        match s.split_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (s, None),
        }
    };

    if host.is_empty() {
        return ConfigSnafu { message: format!("address '{s}' has no host") }.fail();
    }

    let port = port
        .map(|p| {
            p.parse::<u16>()
                .map_err(|_| ConfigSnafu { message: format!("invalid port in '{s}'") }.build())
        })
        .transpose()?;

    Ok((host.to_owned(), port))
}
