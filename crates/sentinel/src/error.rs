//! Connector error types.
//!
//! Errors fall into five classes with different recovery behavior:
//! - **Configuration**: rejected at construction, never seen by `connect()`
//! - **Per-endpoint**: transport failures or malformed monitor replies; the connector moves on to
//!   the next monitor without delay
//! - **Exhaustion**: every known monitor failed during one pass
//! - **Cancellation**: the connector was torn down while a request was in flight
//! - **Discovery**: the dynamic monitor source failed or returned nothing

use snafu::{Location, Snafu};

use crate::resp::RespError;

/// Result type alias for connector operations.
pub type Result<T> = std::result::Result<T, SentinelError>;

/// Errors produced while resolving and connecting to a dataset node.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SentinelError {
    /// Configuration validation error.
    #[snafu(display("Configuration error: {message}"))]
    Config {
        /// Error description.
        message: String,
    },

    /// Socket-level failure while talking to a monitor or data node.
    #[snafu(display("I/O error at {location} ({address}): {source}"))]
    Io {
        /// Address that was being contacted.
        address: String,
        /// Underlying I/O error.
        source: std::io::Error,
        /// Source location.
        #[snafu(implicit)]
        location: Location,
    },

    /// TLS setup or handshake failure.
    #[snafu(display("TLS error ({address}): {message}"))]
    Tls {
        /// Address that was being contacted.
        address: String,
        /// Error description.
        message: String,
    },

    /// The peer sent bytes that are not valid protocol framing.
    #[snafu(display("Protocol error ({address}): {source}"))]
    Protocol {
        /// Address of the peer.
        address: String,
        /// Underlying decoding error.
        source: RespError,
    },

    /// The monitor answered with an error reply.
    #[snafu(display("Monitor {address} replied with error: {message}"))]
    ErrorReply {
        /// Monitor address.
        address: String,
        /// Error text from the monitor.
        message: String,
    },

    /// A connect or command deadline elapsed.
    #[snafu(display("Operation on {address} timed out after {duration_ms}ms"))]
    Timeout {
        /// Address that was being contacted.
        address: String,
        /// Timeout duration in milliseconds.
        duration_ms: u64,
    },

    /// A monitor answered, but not with a usable address.
    #[snafu(display(
        "connected to monitor {endpoint} successfully, but got an invalid reply: {reply}"
    ))]
    MalformedReply {
        /// Monitor identity (`host:port`).
        endpoint: String,
        /// Short rendering of the offending reply.
        reply: String,
    },

    /// Every monitor in the set failed during one full pass.
    #[snafu(display("{message}"))]
    Exhausted {
        /// Aggregate message, including the last per-endpoint error when known.
        message: String,
        /// Number of full-cycle exhaustions in this request.
        attempts: u32,
    },

    /// The dynamic monitor source failed.
    #[snafu(display("Monitor discovery failed: {message}"))]
    Discovery {
        /// Error description.
        message: String,
    },

    /// The connector was disconnected while a request was in flight.
    #[snafu(display("Connection is closed."))]
    Closed,
}

impl SentinelError {
    /// Returns true if the error only disqualifies the monitor that produced it.
    ///
    /// Per-endpoint errors advance the cycle to the next monitor. Everything
    /// else terminates the request.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Io { .. }
            | Self::Tls { .. }
            | Self::Protocol { .. }
            | Self::ErrorReply { .. }
            | Self::Timeout { .. }
            | Self::MalformedReply { .. } => true,
            Self::Config { .. } | Self::Exhausted { .. } | Self::Discovery { .. } | Self::Closed => {
                false
            },
        }
    }

    /// Returns true if this is the terminal error reported after teardown.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_per_endpoint_errors_are_retryable() {
        let err = SentinelError::MalformedReply {
            endpoint: "10.0.0.1:26379".to_owned(),
            reply: "nil".to_owned(),
        };
        assert!(err.is_retryable());

        let err = SentinelError::Timeout { address: "10.0.0.1:26379".to_owned(), duration_ms: 10 };
        assert!(err.is_retryable());
    }

    #[test]
    fn test_terminal_errors_are_not_retryable() {
        assert!(!SentinelError::Closed.is_retryable());
        assert!(
            !SentinelError::Exhausted { message: "all monitors unreachable".to_owned(), attempts: 1 }
                .is_retryable()
        );
        assert!(!SentinelError::Discovery { message: "dns".to_owned() }.is_retryable());
        assert!(!SentinelError::Config { message: "bad".to_owned() }.is_retryable());
    }

    #[test]
    fn test_malformed_reply_message_names_endpoint() {
        let err = SentinelError::MalformedReply {
            endpoint: "10.0.0.1:26379".to_owned(),
            reply: "nil".to_owned(),
        };
        let message = err.to_string();
        assert!(message.contains("10.0.0.1:26379"));
        assert!(message.contains("invalid reply"));
    }

    #[test]
    fn test_closed_error() {
        let err = SentinelError::Closed;
        assert!(err.is_closed());
        assert_eq!(err.to_string(), "Connection is closed.");
    }
}
