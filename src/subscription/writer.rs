//! Outbound Writer
//!
//! Single responsibility: own the WebSocket sink and write queued frames in
//! order. Senders never wait, so frames can be queued from `poll_next`, `Drop`
//! and the router alike.

use std::time::Duration;

use futures_util::SinkExt;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, error, trace};

use super::protocol::OutboundFrame;
use super::transport::{close_sink, WsSink};
use crate::error::RealtimeError;

/// Work items for the writer task.
#[derive(Debug, Clone, PartialEq)]
pub enum WriterCommand {
    Frame(OutboundFrame),
    /// Send the close frame and stop
    Close,
}

/// Cloneable handle for queueing outbound frames.
#[derive(Clone)]
pub struct Outbound {
    tx: UnboundedSender<WriterCommand>,
}

impl Outbound {
    /// Create a handle and the receiving end the writer task drains.
    pub fn channel() -> (Self, UnboundedReceiver<WriterCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue a frame. Fails once the writer has stopped.
    pub fn send(&self, frame: OutboundFrame) -> Result<(), RealtimeError> {
        self.tx
            .send(WriterCommand::Frame(frame))
            .map_err(|_| RealtimeError::NotConnected)
    }

    /// Ask the writer to close the connection.
    pub fn close(&self) -> bool {
        self.tx.send(WriterCommand::Close).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Writer loop - runs in a spawned task.
pub async fn writer_loop(
    mut sink: WsSink,
    mut commands: UnboundedReceiver<WriterCommand>,
    close_timeout: Duration,
) {
    debug!("Writer loop started");

    while let Some(command) = commands.recv().await {
        match command {
            WriterCommand::Frame(frame) => {
                let text = match frame.encode() {
                    Ok(text) => text,
                    Err(e) => {
                        error!(error = %e, "Failed to encode frame");
                        continue;
                    }
                };
                trace!(frame = %text, "Sending frame");
                if let Err(e) = sink.send(Message::Text(text)).await {
                    error!(error = %e, "Failed to send frame");
                    break;
                }
            }
            WriterCommand::Close => {
                close_sink(&mut sink, close_timeout).await;
                break;
            }
        }
    }

    debug!("Writer loop ended");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_after_writer_gone() {
        let (outbound, rx) = Outbound::channel();
        assert!(outbound.send(OutboundFrame::ping()).is_ok());
        drop(rx);
        assert!(outbound.is_closed());
        assert!(matches!(
            outbound.send(OutboundFrame::ping()),
            Err(RealtimeError::NotConnected)
        ));
        assert!(!outbound.close());
    }

    #[test]
    fn test_commands_keep_order() {
        let (outbound, mut rx) = Outbound::channel();
        outbound.send(OutboundFrame::ping()).unwrap();
        outbound.send(OutboundFrame::pong()).unwrap();
        outbound.close();

        assert_eq!(rx.try_recv().unwrap(), WriterCommand::Frame(OutboundFrame::ping()));
        assert_eq!(rx.try_recv().unwrap(), WriterCommand::Frame(OutboundFrame::pong()));
        assert_eq!(rx.try_recv().unwrap(), WriterCommand::Close);
    }
}
