//! Non-fatal connector notifications.
//!
//! `connect()` reports only its final outcome. Everything that happens on the
//! way (a monitor failing, a full pass failing before a retry) is reported
//! through an [`EventSink`] so operators can see a degraded monitor set
//! before it becomes an outage.

use std::time::Duration;

use tokio::sync::mpsc;

use crate::endpoint::MonitorEndpoint;

/// A notification emitted while a connect request is in progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectorEvent {
    /// One monitor could not be used; the connector moved on to the next.
    MonitorError {
        /// The monitor that failed.
        endpoint: MonitorEndpoint,
        /// Transport error or malformed-reply description.
        error: String,
    },
    /// Every monitor failed during one pass and a retry is scheduled.
    CycleExhausted {
        /// Number of exhausted passes in this request.
        attempt: u32,
        /// Delay before the next pass.
        delay: Duration,
        /// `all monitors unreachable, retrying after Nms`, with the last error appended.
        message: String,
    },
}

/// Receives connector notifications.
///
/// Called inline from the connector task; implementations must not block.
pub trait EventSink: Send + Sync {
    /// Handles one event.
    fn emit(&self, event: ConnectorEvent);
}

/// Logs events through `tracing`. This is the default sink.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: ConnectorEvent) {
        match event {
            ConnectorEvent::MonitorError { endpoint, error } => {
                tracing::warn!(endpoint = %endpoint, error = %error, "monitor unusable");
            },
            ConnectorEvent::CycleExhausted { attempt, delay, message } => {
                tracing::warn!(attempt, delay_ms = delay.as_millis() as u64, "{message}");
            },
        }
    }
}

/// Forwards events into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ConnectorEvent>,
}

impl ChannelSink {
    /// Creates a sink and the receiver its events arrive on.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ConnectorEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: ConnectorEvent) {
        // A dropped receiver just means nobody is listening.
        let _ = self.tx.send(event);
    }
}
