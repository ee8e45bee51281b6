//! The source contract: an opaque bidirectional mirror of a subset of the
//! subject graph.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use interject_core::error::SourceError;
use interject_updates::{SubjectPropertyUpdate, SubjectUpdate};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Applies the source's currently known state to the subject graph. Invoked
/// by the connector under the inbound queue lock.
pub type ApplyFn = Box<dyn FnOnce() -> Result<(), SourceError> + Send>;

/// Sink handed to [`Source::start`]; the source pushes asynchronous inbound
/// update trees through it. During initialization they are buffered, in
/// steady state they apply directly.
pub type InboundSink = Arc<dyn Fn(SubjectUpdate) + Send + Sync>;

/// One outbound unit: a path-keyed property update.
#[derive(Clone, Debug)]
pub struct PathUpdate {
    pub path: String,
    pub update: SubjectPropertyUpdate,
    pub timestamp: DateTime<Utc>,
}

/// An external bidirectional mirror, identified by its name. Names are
/// informational; echo suppression compares origin tokens by identity.
pub trait Source: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Fetch the source's current state, returning the closure that applies
    /// it. Separating fetch from apply lets the connector apply under its
    /// queue lock without holding it across I/O.
    fn load_initial_state<'a>(
        &'a self,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<ApplyFn, SourceError>>;

    /// Begin receiving asynchronous updates from the far side.
    fn start<'a>(
        &'a self,
        inbound: InboundSink,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<(), SourceError>>;

    /// Push a batch of local changes outward.
    fn write<'a>(
        &'a self,
        updates: Vec<PathUpdate>,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<(), SourceError>>;
}
