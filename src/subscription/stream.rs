//! Subscription Stream
//!
//! The lazy, single-pass `Stream` behind every subscription.
//!
//! Nothing is registered or sent until the stream is first polled. From then on
//! it yields the subscription's inbound messages in arrival order and ends when
//! the server completes the subscription, reports a terminal error, or the
//! connection goes away. The end-of-stream sentinel is never yielded.
//!
//! Dropping the stream is how a consumer cancels: `Drop` always unregisters the
//! token, and tells the server to stop if it had not already finished.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::stream::{FusedStream, Stream};
use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, warn};

use super::protocol::{InboundMessage, OutboundFrame};
use super::registry::{Delivery, Registry, SubscriptionId, Termination};
use super::writer::Outbound;

/// One logical subscription multiplexed over the shared connection.
pub struct SubscriptionStream {
    registry: Registry,
    outbound: Outbound,
    operation_name: String,
    query: String,
    variables: Option<Value>,
    id: Option<SubscriptionId>,
    queue: Option<UnboundedReceiver<Delivery>>,
    termination: Option<Termination>,
}

impl SubscriptionStream {
    pub(crate) fn new(
        registry: Registry,
        outbound: Outbound,
        operation_name: &str,
        query: &str,
        variables: Value,
    ) -> Self {
        Self {
            registry,
            outbound,
            operation_name: operation_name.to_string(),
            query: query.to_string(),
            variables: Some(variables),
            id: None,
            queue: None,
            termination: None,
        }
    }

    pub fn operation_name(&self) -> &str {
        &self.operation_name
    }

    /// The token, once the stream has been polled.
    pub fn id(&self) -> Option<&SubscriptionId> {
        self.id.as_ref()
    }

    /// Why the stream ended, or `None` while it is still live.
    pub fn termination(&self) -> Option<Termination> {
        self.termination
    }

    fn start(&mut self) {
        let (id, queue) = self.registry.register();
        if self.registry.is_closed() {
            debug!(id = %id, operation = %self.operation_name, "Connection already closed");
            self.id = Some(id);
            self.finish(Termination::ConnectionClosed);
            return;
        }

        let frame = OutboundFrame::subscribe(
            id.as_str(),
            &self.operation_name,
            &self.query,
            self.variables.take().unwrap_or(Value::Null),
        );

        debug!(id = %id, operation = %self.operation_name, "Starting subscription");
        self.id = Some(id);
        self.queue = Some(queue);

        if let Err(e) = self.outbound.send(frame) {
            warn!(operation = %self.operation_name, error = %e, "Could not send subscribe");
            self.finish(Termination::ConnectionClosed);
        }
    }

    fn finish(&mut self, reason: Termination) {
        if let Some(id) = &self.id {
            self.registry.unregister(id);
            debug!(id = %id, reason = ?reason, "Subscription ended");
        }
        self.termination = Some(reason);
        self.queue = None;
    }
}

impl Stream for SubscriptionStream {
    type Item = InboundMessage;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if this.termination.is_some() {
            return Poll::Ready(None);
        }
        if this.queue.is_none() {
            this.start();
        }

        let Some(queue) = this.queue.as_mut() else {
            return Poll::Ready(None);
        };

        match queue.poll_recv(cx) {
            Poll::Ready(Some(Delivery::Message(message))) => Poll::Ready(Some(message)),
            Poll::Ready(Some(Delivery::End(reason))) => {
                this.finish(reason);
                Poll::Ready(None)
            }
            Poll::Ready(None) => {
                this.finish(Termination::ConnectionClosed);
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl FusedStream for SubscriptionStream {
    fn is_terminated(&self) -> bool {
        self.termination.is_some()
    }
}

impl Drop for SubscriptionStream {
    fn drop(&mut self) {
        let Some(id) = self.id.take() else {
            return;
        };
        // Still registered means the server has not ended it
        if self.registry.unregister(&id) && self.termination.is_none() {
            let _ = self.outbound.send(OutboundFrame::Complete { id: id.to_string() });
            debug!(id = %id, operation = %self.operation_name, "Subscription cancelled");
        }
    }
}
