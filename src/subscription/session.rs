//! Subscription Session
//!
//! Single responsibility: One connection to the subscription endpoint, from the
//! transport handshake through `connection_init`/`connection_ack` to close.
//!
//! # Establishment
//!
//! `Session::establish()`:
//! 1. Opens the transport against the candidate endpoints
//! 2. Sends `connection_init`
//! 3. Starts the router and writer tasks
//! 4. Waits a bounded time for `connection_ack`
//!
//! A missing ack is not fatal. The server sometimes accepts subscriptions
//! without acknowledging, so the session proceeds and `is_acknowledged()`
//! reports what actually happened.

use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::protocol::OutboundFrame;
use super::registry::{Registry, Termination};
use super::router::router_loop;
use super::transport::{ConnectHeaders, Transport, TransportConfig};
use super::writer::{writer_loop, Outbound};
use crate::config::Config;
use crate::error::RealtimeError;

/// Lifecycle of the physical connection. A `Session` only exists once the
/// transport is open, so it starts in `Connecting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Open, waiting for `connection_ack`
    Connecting,
    Open,
    Closed,
}

/// Configuration for establishing a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Candidate endpoints, tried in order
    pub endpoints: Vec<String>,
    /// Upgrade request headers, including the bearer credential
    pub headers: ConnectHeaders,
    /// Device identifier sent in `connection_init`
    pub device_id: String,
    pub transport: TransportConfig,
    /// Bound on waiting for `connection_ack`
    pub ack_timeout: Duration,
}

impl SessionConfig {
    pub fn new(config: &Config, access_token: &str) -> Self {
        Self {
            endpoints: config.endpoints.clone(),
            headers: ConnectHeaders::from_config(config, access_token),
            device_id: config
                .device_id
                .clone()
                .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string()),
            transport: TransportConfig {
                open_timeout: config.open_timeout(),
                close_timeout: config.close_timeout(),
            },
            ack_timeout: config.ack_timeout(),
        }
    }

    /// Payload of the `connection_init` frame.
    pub fn init_payload(&self) -> Map<String, Value> {
        let h = &self.headers;
        let mut payload = Map::new();
        payload.insert("Authorization".into(), Value::String(h.bearer()));
        payload.insert("x-ws-api-version".into(), Value::String(h.api_version.clone()));
        payload.insert("x-ws-locale".into(), Value::String(h.locale.clone()));
        payload.insert("x-ws-profile".into(), Value::String(h.profile.clone()));
        payload.insert("x-platform-os".into(), Value::String(h.platform_os.clone()));
        payload.insert("x-ws-device-id".into(), Value::String(self.device_id.clone()));
        payload
    }
}

/// A live connection to the subscription endpoint.
///
/// Owns the router and writer tasks. Dropping a session aborts both; `close()`
/// shuts them down in order and sends a close frame.
pub struct Session {
    config: SessionConfig,
    state: ConnectionState,
    endpoint: String,
    subprotocol: Option<String>,
    registry: Registry,
    outbound: Outbound,
    acknowledged: watch::Receiver<bool>,
    router_task: JoinHandle<()>,
    writer_task: Option<JoinHandle<()>>,
}

impl Session {
    /// Establish a new session.
    ///
    /// # Errors
    /// - Every candidate endpoint failed to open
    /// - `connection_init` could not be sent
    pub async fn establish(config: SessionConfig) -> Result<Self, RealtimeError> {
        info!(
            candidates = config.endpoints.len(),
            device_id = %config.device_id,
            "Establishing subscription session"
        );

        // Step 1: Open the transport
        let mut transport =
            Transport::connect_any(&config.endpoints, &config.headers, &config.transport).await?;

        // Step 2: connection_init
        let init = OutboundFrame::ConnectionInit {
            payload: config.init_payload(),
        };
        transport.send_text(init.encode()?).await?;
        debug!("connection_init sent");

        let endpoint = transport.endpoint().to_string();
        let subprotocol = transport.subprotocol().map(String::from);

        // Step 3: Split transport and spawn the router and writer
        let (sink, stream) = transport.split();
        let registry = Registry::new();
        let (ack_tx, ack_rx) = watch::channel(false);
        let (outbound, commands) = Outbound::channel();

        let router_task = tokio::spawn(router_loop(
            stream,
            registry.clone(),
            ack_tx,
            outbound.clone(),
        ));
        let writer_task = tokio::spawn(writer_loop(sink, commands, config.transport.close_timeout));

        let mut session = Self {
            config,
            state: ConnectionState::Connecting,
            endpoint,
            subprotocol,
            registry,
            outbound,
            acknowledged: ack_rx,
            router_task,
            writer_task: Some(writer_task),
        };

        // Step 4: Wait for the ack (lenient)
        session.wait_for_ack().await;
        session.state = ConnectionState::Open;

        info!(
            endpoint = %session.endpoint,
            acknowledged = session.is_acknowledged(),
            "Subscription session established"
        );
        Ok(session)
    }

    async fn wait_for_ack(&self) {
        let mut acknowledged = self.acknowledged.clone();
        let outcome = tokio::time::timeout(self.config.ack_timeout, acknowledged.wait_for(|acked| *acked))
            .await
            .map(|waited| waited.is_ok());
        match outcome {
            Ok(true) => debug!("Handshake acknowledged"),
            Ok(false) => warn!("Connection ended before connection_ack"),
            Err(_) => warn!(
                timeout = ?self.config.ack_timeout,
                "No connection_ack within timeout, proceeding anyway"
            ),
        }
    }

    /// Queue an outbound frame.
    pub fn send(&self, frame: OutboundFrame) -> Result<(), RealtimeError> {
        if self.state == ConnectionState::Closed {
            return Err(RealtimeError::NotConnected);
        }
        self.outbound.send(frame)
    }

    /// Whether the server acknowledged `connection_init`.
    pub fn is_acknowledged(&self) -> bool {
        *self.acknowledged.borrow()
    }

    /// Whether the router is still reading from the connection.
    pub fn is_alive(&self) -> bool {
        self.state == ConnectionState::Open && !self.router_task.is_finished()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// The endpoint this session connected to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// The sub-protocol the server agreed to.
    pub fn subprotocol(&self) -> Option<&str> {
        self.subprotocol.as_deref()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn outbound(&self) -> &Outbound {
        &self.outbound
    }

    /// Shut down: cancel the router, end live subscriptions, close the socket.
    pub async fn close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }

        self.router_task.abort();
        let _ = (&mut self.router_task).await;

        // The aborted router cannot terminate queues itself
        self.registry.close_all(Termination::ConnectionClosed);

        if let Some(mut writer) = self.writer_task.take() {
            if self.outbound.close() {
                let bound = self.config.transport.close_timeout + Duration::from_secs(1);
                if tokio::time::timeout(bound, &mut writer).await.is_err() {
                    writer.abort();
                    let _ = writer.await;
                }
            } else {
                writer.abort();
                let _ = writer.await;
            }
        }

        self.state = ConnectionState::Closed;
        info!(endpoint = %self.endpoint, "Subscription session closed");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.router_task.abort();
        if let Some(writer) = self.writer_task.take() {
            writer.abort();
        }
        if self.state != ConnectionState::Closed {
            self.registry.close_all(Termination::ConnectionClosed);
            debug!("Session dropped, tasks aborted");
        }
    }
}
