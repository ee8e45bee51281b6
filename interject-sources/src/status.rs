//! Connector status, observable by hosts.

use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectorStatus {
    /// Not started yet.
    Idle,
    /// Running queue-read-replay initialization.
    Initializing,
    /// Mirroring in both directions.
    Connected,
    /// Waiting out the backoff before the next initialization attempt.
    Reconnecting,
    /// Cancelled; no further work happens.
    Stopped,
}

impl fmt::Display for ConnectorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ConnectorStatus::Idle => "idle",
            ConnectorStatus::Initializing => "initializing",
            ConnectorStatus::Connected => "connected",
            ConnectorStatus::Reconnecting => "reconnecting",
            ConnectorStatus::Stopped => "stopped",
        };
        f.write_str(text)
    }
}
