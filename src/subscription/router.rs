//! Inbound Router
//!
//! The single reader of the WebSocket. Classifies every inbound frame and
//! routes it to the matching subscription queue.
//!
//! Noise never stops the loop: frames that do not decode, frames without a
//! subscription id and frames for unknown subscriptions are dropped. Only the
//! end of the underlying stream (close frame, read error, EOF) ends it, and on
//! the way out every still-registered subscription is terminated with
//! [`Termination::ConnectionClosed`].

use futures_util::{Stream, StreamExt};
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::{protocol::Message, Error as WsError};
use tracing::{debug, info, trace, warn};

use super::protocol::{InboundMessage, MessageKind, OutboundFrame};
use super::registry::{Registry, SubscriptionId, Termination};
use super::writer::Outbound;

/// Router loop - runs in a spawned task for the lifetime of the connection.
pub async fn router_loop<S>(
    mut stream: S,
    registry: Registry,
    acknowledged: watch::Sender<bool>,
    outbound: Outbound,
) where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    debug!("Router loop started");

    while let Some(frame) = stream.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(data)) => match String::from_utf8(data) {
                Ok(text) => text,
                Err(_) => {
                    trace!("Dropping non-UTF-8 binary frame");
                    continue;
                }
            },
            Ok(Message::Close(frame)) => {
                info!(frame = ?frame, "Server closed connection");
                break;
            }
            // Ping/pong at the WebSocket level is answered by tungstenite
            Ok(_) => continue,
            Err(e) => {
                warn!(error = %e, "WebSocket read failed");
                break;
            }
        };

        match InboundMessage::decode(&text) {
            Ok(message) => dispatch(message, &registry, &acknowledged, &outbound),
            Err(e) => trace!(error = %e, "Dropping malformed frame"),
        }
    }

    let terminated = registry.close_all(Termination::ConnectionClosed);
    debug!(terminated = terminated, "Router loop ended");
}

fn dispatch(
    message: InboundMessage,
    registry: &Registry,
    acknowledged: &watch::Sender<bool>,
    outbound: &Outbound,
) {
    let kind = message.kind.clone();
    match kind {
        MessageKind::ConnectionAck => {
            acknowledged.send_replace(true);
            debug!("connection_ack received");
        }
        MessageKind::Next => {
            if let Some(id) = subscription_id(&message) {
                trace!(id = %id, "Routing next");
                registry.route(&id, message);
            }
        }
        MessageKind::Error => {
            if let Some(id) = subscription_id(&message) {
                warn!(id = %id, payload = ?message.payload, "Subscription error");
                registry.fail(&id, message);
            }
        }
        MessageKind::Complete => {
            if let Some(id) = subscription_id(&message) {
                debug!(id = %id, "Subscription completed by server");
                registry.complete(&id);
            }
        }
        MessageKind::Ping => {
            if outbound.send(OutboundFrame::pong()).is_err() {
                trace!("Writer gone, not answering ping");
            }
        }
        MessageKind::Pong => trace!("pong received"),
        MessageKind::Unknown(kind) => trace!(kind = %kind, "Ignoring frame"),
    }
}

fn subscription_id(message: &InboundMessage) -> Option<SubscriptionId> {
    let id = message.id.as_deref().map(SubscriptionId::from);
    if id.is_none() {
        trace!(kind = message.kind.as_str(), "Dropping frame without subscription id");
    }
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscription::registry::Delivery;
    use crate::subscription::writer::WriterCommand;
    use futures_util::stream;
    use serde_json::json;

    fn text(value: serde_json::Value) -> Result<Message, WsError> {
        Ok(Message::Text(value.to_string()))
    }

    fn next_frame(id: &SubscriptionId, n: i64) -> Result<Message, WsError> {
        text(json!({ "id": id.as_str(), "type": "next", "payload": { "data": { "n": n } } }))
    }

    fn payload_n(delivery: Delivery) -> i64 {
        match delivery {
            Delivery::Message(m) => m.data().and_then(|d| d["n"].as_i64()).unwrap(),
            other => panic!("expected message, got {:?}", other),
        }
    }

    async fn run(frames: Vec<Result<Message, WsError>>, registry: &Registry) -> bool {
        let (ack_tx, ack_rx) = watch::channel(false);
        let (outbound, _writer_rx) = Outbound::channel();
        router_loop(stream::iter(frames), registry.clone(), ack_tx, outbound).await;
        let acked = *ack_rx.borrow();
        acked
    }

    #[tokio::test]
    async fn test_ack_sets_flag() {
        let registry = Registry::new();
        assert!(run(vec![text(json!({ "type": "connection_ack" }))], &registry).await);
        assert!(!run(vec![text(json!({ "type": "ka" }))], &registry).await);
    }

    #[tokio::test]
    async fn test_interleaved_subscriptions_stay_partitioned() {
        let registry = Registry::new();
        let (a, mut rx_a) = registry.register();
        let (b, mut rx_b) = registry.register();

        let frames = vec![
            next_frame(&a, 1),
            next_frame(&b, 100),
            next_frame(&a, 2),
            next_frame(&b, 200),
            next_frame(&a, 3),
            text(json!({ "id": a.as_str(), "type": "complete" })),
            text(json!({ "id": b.as_str(), "type": "complete" })),
        ];
        run(frames, &registry).await;

        let mut seen_a = Vec::new();
        while let Ok(Delivery::Message(m)) = rx_a.try_recv() {
            assert_eq!(m.id.as_deref(), Some(a.as_str()));
            seen_a.push(payload_n(Delivery::Message(m)));
        }
        let mut seen_b = Vec::new();
        while let Ok(Delivery::Message(m)) = rx_b.try_recv() {
            assert_eq!(m.id.as_deref(), Some(b.as_str()));
            seen_b.push(payload_n(Delivery::Message(m)));
        }
        assert_eq!(seen_a, vec![1, 2, 3]);
        assert_eq!(seen_b, vec![100, 200]);
    }

    #[tokio::test]
    async fn test_malformed_frame_between_valid_frames() {
        let registry = Registry::new();
        let (id, mut rx) = registry.register();

        let frames = vec![
            next_frame(&id, 1),
            Ok(Message::Text("{not json".to_string())),
            Ok(Message::Binary(vec![0xff, 0xfe])),
            text(json!({ "type": "next", "payload": {} })),
            next_frame(&id, 2),
            text(json!({ "id": id.as_str(), "type": "complete" })),
        ];
        run(frames, &registry).await;

        assert_eq!(payload_n(rx.try_recv().unwrap()), 1);
        assert_eq!(payload_n(rx.try_recv().unwrap()), 2);
        assert_eq!(rx.try_recv().unwrap(), Delivery::End(Termination::Completed));
    }

    #[tokio::test]
    async fn test_binary_text_frames_are_decoded() {
        let registry = Registry::new();
        let (id, mut rx) = registry.register();
        let body = json!({ "id": id.as_str(), "type": "next", "payload": { "data": { "n": 7 } } });
        run(vec![Ok(Message::Binary(body.to_string().into_bytes()))], &registry).await;
        assert_eq!(payload_n(rx.try_recv().unwrap()), 7);
    }

    #[tokio::test]
    async fn test_error_is_delivered_then_terminates() {
        let registry = Registry::new();
        let (id, mut rx) = registry.register();
        let frames = vec![
            text(json!({ "id": id.as_str(), "type": "error", "payload": [{ "message": "bad" }] })),
            next_frame(&id, 1),
        ];
        run(frames, &registry).await;

        match rx.try_recv().unwrap() {
            Delivery::Message(m) => {
                assert_eq!(m.kind, MessageKind::Error);
                assert_eq!(m.payload, Some(json!([{ "message": "bad" }])));
            }
            other => panic!("expected error message, got {:?}", other),
        }
        assert_eq!(rx.try_recv().unwrap(), Delivery::End(Termination::Errored));
        // The later next was for a token no longer registered
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stale_and_unknown_frames_are_dropped() {
        let registry = Registry::new();
        let frames = vec![
            next_frame(&SubscriptionId::from("stale"), 1),
            text(json!({ "id": "stale", "type": "complete" })),
            text(json!({ "type": "something_new", "id": "x" })),
        ];
        run(frames, &registry).await;
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_exit_terminates_live_subscriptions() {
        let registry = Registry::new();
        let (id, mut rx) = registry.register();
        let frames = vec![next_frame(&id, 1), Ok(Message::Close(None)), next_frame(&id, 2)];
        run(frames, &registry).await;

        assert_eq!(payload_n(rx.try_recv().unwrap()), 1);
        assert_eq!(rx.try_recv().unwrap(), Delivery::End(Termination::ConnectionClosed));
        assert!(rx.try_recv().is_err());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_read_error_ends_loop() {
        let registry = Registry::new();
        let (_id, mut rx) = registry.register();
        run(vec![Err(WsError::ConnectionClosed)], &registry).await;
        assert_eq!(rx.try_recv().unwrap(), Delivery::End(Termination::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_server_ping_is_answered() {
        let registry = Registry::new();
        let (ack_tx, _ack_rx) = watch::channel(false);
        let (outbound, mut writer_rx) = Outbound::channel();
        let frames = vec![text(json!({ "type": "ping" }))];
        router_loop(stream::iter(frames), registry, ack_tx, outbound).await;

        assert_eq!(
            writer_rx.try_recv().unwrap(),
            WriterCommand::Frame(OutboundFrame::pong())
        );
    }
}
