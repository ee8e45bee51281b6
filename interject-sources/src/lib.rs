//! Source connectors for Interject: bidirectional mirroring between a
//! tracked subject graph and external systems.
//!
//! A [`Source`] is an opaque mirror (a protocol client, a broker session, a
//! socket). The [`SourceConnector`] owns the hard parts: queue-read-replay
//! initialization so no update is lost between snapshot and subscription,
//! echo suppression via origin tokens, a bounded write retry queue, and the
//! backoff reconnect loop.

pub mod connector;
pub mod retry;
pub mod source;
pub mod status;

pub use connector::{ConnectorOptions, SourceConnector};
pub use retry::RetryQueue;
pub use source::{ApplyFn, BoxFuture, InboundSink, PathUpdate, Source};
pub use status::ConnectorStatus;
