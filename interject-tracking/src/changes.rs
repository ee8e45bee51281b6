//! Change events and the buffered change streams connectors consume.
//!
//! [`ChangeObserver`] is both a write interceptor (it publishes one
//! [`PropertyChange`] per accepted write, immediately after the terminal
//! step commits) and a broadcast publisher. Subscribers get an unbuffered
//! stream, or a time-window batched stream with optional per-property
//! coalescing.

use std::collections::HashMap;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_core::Stream;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;

use interject_core::error::SubjectError;
use interject_core::origin::OriginToken;
use interject_core::pipeline::{WriteContext, WriteInterceptor, WriteNext};
use interject_core::subject::PropertyReference;
use interject_core::value::Value;

/// Default broadcast capacity for the change channel.
pub const DEFAULT_CHANGE_CAPACITY: usize = 1024;

/// A typed event for one accepted property write.
#[derive(Clone, Debug)]
pub struct PropertyChange {
    pub reference: PropertyReference,
    pub old_value: Value,
    pub new_value: Value,
    pub timestamp: DateTime<Utc>,
    /// The source that produced the change, used to suppress echo.
    pub origin: Option<OriginToken>,
}

/// Write interceptor + publisher for the context's change stream.
pub struct ChangeObserver {
    tx: broadcast::Sender<PropertyChange>,
}

impl ChangeObserver {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future changes. The stream starts at the moment of
    /// subscription; dropping it cancels immediately.
    pub fn subscribe(&self) -> ChangeStream {
        ChangeStream {
            inner: BroadcastStream::new(self.tx.subscribe()),
        }
    }

    /// Publish a change directly, bypassing the write pipeline. Used by the
    /// derived-property tracker for synthetic changes.
    pub fn publish(&self, change: PropertyChange) {
        // No subscribers is fine; the send error only signals that.
        let _ = self.tx.send(change);
    }
}

impl Default for ChangeObserver {
    fn default() -> Self {
        Self::new(DEFAULT_CHANGE_CAPACITY)
    }
}

impl WriteInterceptor for ChangeObserver {
    fn write(&self, ctx: &mut WriteContext, next: &mut WriteNext<'_>) -> Result<(), SubjectError> {
        let old_value = ctx.current.clone();
        next(ctx)?;
        self.publish(PropertyChange {
            reference: ctx.reference.clone(),
            old_value,
            new_value: ctx.new_value.clone(),
            timestamp: Utc::now(),
            origin: ctx.origin.clone(),
        });
        Ok(())
    }
}

/// Subscribe to the unbuffered change stream of a context.
///
/// Shorthand for resolving the context's [`ChangeObserver`] and calling
/// [`subscribe`](ChangeObserver::subscribe).
pub fn property_changes(
    context: &interject_core::context::SubjectContext,
) -> Result<ChangeStream, interject_core::error::ConfigurationError> {
    Ok(context.get_service::<ChangeObserver>()?.subscribe())
}

/// Unbuffered stream of [`PropertyChange`] in commit order.
///
/// A subscriber that falls behind the broadcast capacity skips the missed
/// changes (logged), it never blocks writers.
pub struct ChangeStream {
    inner: BroadcastStream<PropertyChange>,
}

impl ChangeStream {
    /// Batch changes into windows of `window` length. Empty windows produce
    /// no batch.
    pub fn buffered(self, window: Duration) -> BufferedChanges {
        BufferedChanges::new(self, window, false)
    }

    /// Like [`buffered`](Self::buffered), but each batch keeps only the last
    /// change per property (first-seen order).
    pub fn buffered_coalesced(self, window: Duration) -> BufferedChanges {
        BufferedChanges::new(self, window, true)
    }
}

impl Stream for ChangeStream {
    type Item = PropertyChange;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(change))) => return Poll::Ready(Some(change)),
                Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(missed)))) => {
                    tracing::warn!(missed, "change stream lagged; skipping missed changes");
                    continue;
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Time-window batched change stream.
pub struct BufferedChanges {
    inner: ChangeStream,
    interval: tokio::time::Interval,
    pending: Vec<PropertyChange>,
    coalesce: bool,
    done: bool,
}

impl BufferedChanges {
    fn new(inner: ChangeStream, window: Duration, coalesce: bool) -> Self {
        let mut interval = tokio::time::interval(window);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval.reset();
        Self {
            inner,
            interval,
            pending: Vec::new(),
            coalesce,
            done: false,
        }
    }
}

/// Keep only the last change per property reference, preserving the order in
/// which each property first appeared in the window.
fn coalesce_batch(batch: Vec<PropertyChange>) -> Vec<PropertyChange> {
    let mut order: Vec<PropertyReference> = Vec::new();
    let mut last: HashMap<PropertyReference, PropertyChange> = HashMap::new();
    for change in batch {
        if !last.contains_key(&change.reference) {
            order.push(change.reference.clone());
        }
        last.insert(change.reference.clone(), change);
    }
    order
        .into_iter()
        .filter_map(|reference| last.remove(&reference))
        .collect()
}

impl Stream for BufferedChanges {
    type Item = Vec<PropertyChange>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        while !this.done {
            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(change)) => this.pending.push(change),
                Poll::Ready(None) => this.done = true,
                Poll::Pending => break,
            }
        }

        loop {
            match this.interval.poll_tick(cx) {
                Poll::Ready(_) => {
                    if !this.pending.is_empty() {
                        let batch = std::mem::take(&mut this.pending);
                        let batch = if this.coalesce {
                            coalesce_batch(batch)
                        } else {
                            batch
                        };
                        return Poll::Ready(Some(batch));
                    }
                    if this.done {
                        return Poll::Ready(None);
                    }
                    // Empty window: poll again to arm the next tick.
                }
                Poll::Pending => {
                    if this.done && this.pending.is_empty() {
                        return Poll::Ready(None);
                    }
                    return Poll::Pending;
                }
            }
        }
    }
}
