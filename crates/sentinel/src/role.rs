//! Dataset roles and the post-connect role probe.
//!
//! Monitors can lag behind a failover, so the node they name may already
//! have changed role by the time the client connects. [`probe_role`] asks
//! the node itself with `ROLE`.

use std::{fmt, str::FromStr, time::Duration};

use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{
    connection::{round_trip, with_timeout},
    error::{ConfigSnafu, Result, SentinelError},
    resp::Value,
};

/// Role of a dataset node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The writable primary.
    Master,
    /// A read-only copy.
    Replica,
}

impl Role {
    /// Returns the lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Master => "master",
            Self::Replica => "replica",
        }
    }

    /// Parses a role as advertised by a node; `slave` is an alias for replica.
    #[must_use]
    pub fn from_advertised(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "master" => Some(Self::Master),
            "slave" | "replica" => Some(Self::Replica),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = SentinelError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_advertised(s)
            .ok_or_else(|| ConfigSnafu { message: format!("unknown role '{s}'") }.build())
    }
}

/// Asks a connected node for its role.
///
/// Returns `None` when the node answers with a role this crate does not
/// model, such as a monitor answering `sentinel`.
pub async fn probe_role<S>(
    stream: &mut S,
    address: &str,
    timeout: Option<Duration>,
) -> Result<Option<Role>>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    let mut buf = BytesMut::new();
    let reply = with_timeout(timeout, address, round_trip(stream, &mut buf, &["ROLE"], address)).await?;
    let role = reply.as_array().and_then(<[Value]>::first).and_then(Value::as_str);
    tracing::debug!(address, role = ?role, "role probe reply");
    Ok(role.and_then(Role::from_advertised))
}
