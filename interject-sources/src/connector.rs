//! The connector: reconcile loop between the subject graph and one source.
//!
//! Initialization follows the queue-read-replay protocol: buffer inbound
//! updates, load and apply the initial state under the queue lock, replay
//! the buffer in FIFO order, null the queue out so later updates apply
//! directly under the same lock, then flush the write retry queue. A flush
//! failure fails initialization and the queue is retained for the next
//! attempt.
//!
//! Locally, the connector consumes the buffered change stream, filters out
//! its own echo by origin-token identity, translates changes into
//! path-keyed updates, and pushes them to the source; failed batches go to
//! the bounded retry queue and trigger a reconnect.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use interject_core::context::SubjectContext;
use interject_core::error::SourceError;
use interject_core::origin::OriginToken;
use interject_core::subject::SubjectHandle;
use interject_tracking::{ChangeObserver, PropertyChange};
use interject_updates::{apply_update, shallow_update, PathProvider, SubjectUpdate};

use crate::retry::RetryQueue;
use crate::source::{InboundSink, PathUpdate, Source};
use crate::status::ConnectorStatus;

/// Tuning knobs for one connector.
#[derive(Clone, Debug)]
pub struct ConnectorOptions {
    /// Batching window for the local change stream.
    pub buffer_window: Duration,
    /// Keep only the last change per property within a window.
    pub coalesce: bool,
    /// Maximum retained failed batches; oldest are dropped beyond this.
    pub write_retry_queue_size: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for ConnectorOptions {
    fn default() -> Self {
        Self {
            buffer_window: Duration::from_millis(50),
            coalesce: true,
            write_retry_queue_size: 128,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

type InboundQueue = Arc<Mutex<Option<VecDeque<SubjectUpdate>>>>;

/// Long-running reconcile loop between one subject graph and one source.
pub struct SourceConnector {
    source: Arc<dyn Source>,
    context: SubjectContext,
    root: SubjectHandle,
    origin: OriginToken,
    options: ConnectorOptions,
    inbound_queue: InboundQueue,
    retry: RetryQueue,
    status: RwLock<ConnectorStatus>,
    disconnected: tokio::sync::Notify,
}

impl SourceConnector {
    pub fn new(source: Arc<dyn Source>, context: SubjectContext, root: SubjectHandle) -> Self {
        Self::with_options(source, context, root, ConnectorOptions::default())
    }

    pub fn with_options(
        source: Arc<dyn Source>,
        context: SubjectContext,
        root: SubjectHandle,
        options: ConnectorOptions,
    ) -> Self {
        let origin = OriginToken::new(source.name());
        let retry = RetryQueue::new(options.write_retry_queue_size);
        Self {
            source,
            context,
            root,
            origin,
            options,
            inbound_queue: Arc::new(Mutex::new(None)),
            retry,
            status: RwLock::new(ConnectorStatus::Idle),
            disconnected: tokio::sync::Notify::new(),
        }
    }

    /// The identity token stamped on writes this connector applies.
    pub fn origin(&self) -> &OriginToken {
        &self.origin
    }

    pub fn status(&self) -> ConnectorStatus {
        *self.status.read().expect("status lock poisoned")
    }

    /// Batches discarded by the retry queue's oldest-drop policy.
    pub fn dropped_writes(&self) -> u64 {
        self.retry.dropped_count()
    }

    pub fn pending_retries(&self) -> usize {
        self.retry.len()
    }

    fn set_status(&self, status: ConnectorStatus) {
        *self.status.write().expect("status lock poisoned") = status;
    }

    /// Run the connector until cancelled: the local change pump and the
    /// reconnect loop, side by side.
    pub async fn run(&self, cancel: CancellationToken) {
        tokio::join!(
            self.pump_local_changes(&cancel),
            self.reconnect_loop(&cancel)
        );
        self.set_status(ConnectorStatus::Stopped);
    }

    async fn reconnect_loop(&self, cancel: &CancellationToken) {
        let mut backoff = self.options.initial_backoff;
        while !cancel.is_cancelled() {
            self.set_status(ConnectorStatus::Initializing);
            match self.initialize(cancel).await {
                Ok(()) => {
                    backoff = self.options.initial_backoff;
                    self.set_status(ConnectorStatus::Connected);
                    tracing::debug!(source = self.source.name(), "connector initialized");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = self.disconnected.notified() => {}
                    }
                }
                Err(SourceError::Cancelled) => break,
                Err(err) => {
                    tracing::warn!(
                        source = self.source.name(),
                        error = %err,
                        "connector initialization failed"
                    );
                }
            }
            self.set_status(ConnectorStatus::Reconnecting);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(self.options.max_backoff);
        }
    }

    /// Queue-read-replay initialization.
    async fn initialize(&self, cancel: &CancellationToken) -> Result<(), SourceError> {
        // 1. Allocate a fresh buffer; inbound updates queue up from here on.
        *self
            .inbound_queue
            .lock()
            .expect("inbound queue lock poisoned") = Some(VecDeque::new());

        // 2. Subscribe before loading, so nothing between snapshot and
        //    subscription is lost.
        let sink = self.inbound_sink();
        self.source.start(sink, cancel).await?;

        // 3. Fetch the initial state, then apply it under the queue lock.
        let apply = self.source.load_initial_state(cancel).await?;
        {
            let mut guard = self
                .inbound_queue
                .lock()
                .expect("inbound queue lock poisoned");
            let _origin = self.origin.enter();
            apply()?;
            // 4. Replay everything buffered during the load, in FIFO order.
            // 5. Null the queue out: the sink now applies directly.
            if let Some(buffered) = guard.take() {
                for update in buffered {
                    apply_inbound(&self.context, &self.root, &self.origin, &update);
                }
            }
        }

        // 6. Flush writes that failed while disconnected. A flush failure
        //    fails initialization; the queue is retained.
        self.flush_retry_queue(cancel).await?;
        Ok(())
    }

    fn inbound_sink(&self) -> InboundSink {
        let queue = self.inbound_queue.clone();
        let context = self.context.clone();
        let root = self.root.clone();
        let origin = self.origin.clone();
        Arc::new(move |update: SubjectUpdate| {
            // Lock-acquire-check-fallthrough: buffering while initializing,
            // direct apply (still under the lock) afterwards. This closes
            // the race with a concurrent re-initialization.
            let mut guard = queue.lock().expect("inbound queue lock poisoned");
            match guard.as_mut() {
                Some(buffer) => buffer.push_back(update),
                None => apply_inbound(&context, &root, &origin, &update),
            }
        })
    }

    async fn flush_retry_queue(&self, cancel: &CancellationToken) -> Result<(), SourceError> {
        while let Some(batch) = self.retry.front() {
            self.source.write(batch, cancel).await?;
            self.retry.pop_front();
        }
        Ok(())
    }

    /// Consume the buffered change stream for the connector's lifetime,
    /// regardless of connection state: while disconnected, batches land in
    /// the retry queue instead of being lost.
    async fn pump_local_changes(&self, cancel: &CancellationToken) {
        let observer = match self.context.get_service::<ChangeObserver>() {
            Ok(observer) => observer,
            Err(err) => {
                tracing::error!(error = %err, "connector requires a change observer");
                return;
            }
        };
        let provider = match self.context.get_service::<dyn PathProvider>() {
            Ok(provider) => provider,
            Err(err) => {
                tracing::error!(error = %err, "connector requires a path provider");
                return;
            }
        };

        let stream = observer.subscribe();
        let mut stream = if self.options.coalesce {
            stream.buffered_coalesced(self.options.buffer_window)
        } else {
            stream.buffered(self.options.buffer_window)
        };

        loop {
            let batch = tokio::select! {
                _ = cancel.cancelled() => return,
                batch = stream.next() => batch,
            };
            let Some(batch) = batch else { return };

            let updates = self.translate(&batch, provider.as_ref());
            if updates.is_empty() {
                continue;
            }
            match self.source.write(updates.clone(), cancel).await {
                Ok(()) => {}
                Err(SourceError::Cancelled) => return,
                Err(err) => {
                    tracing::warn!(
                        source = self.source.name(),
                        error = %err,
                        "write failed, queuing batch for retry"
                    );
                    self.retry.push(updates);
                    self.disconnected.notify_one();
                }
            }
        }
    }

    /// Drop echoes, map to paths, and convert to wire updates.
    fn translate(&self, batch: &[PropertyChange], provider: &dyn PathProvider) -> Vec<PathUpdate> {
        batch
            .iter()
            .filter(|change| change.origin.as_ref() != Some(&self.origin))
            .filter_map(|change| {
                let path = provider.path_of(&change.reference)?;
                Some(PathUpdate {
                    path,
                    update: shallow_update(change.reference.metadata(), &change.new_value),
                    timestamp: change.timestamp,
                })
            })
            .collect()
    }
}

/// Apply one inbound update tree under this connector's origin token.
/// Failures are logged and the update is skipped; the connection stays up.
fn apply_inbound(
    context: &SubjectContext,
    root: &SubjectHandle,
    origin: &OriginToken,
    update: &SubjectUpdate,
) {
    let _scope = origin.enter();
    let failures = apply_update(context, root, update);
    for failure in failures {
        tracing::warn!(
            path = %failure.path,
            code = ?failure.code,
            message = %failure.message,
            "inbound update partially failed"
        );
    }
}
