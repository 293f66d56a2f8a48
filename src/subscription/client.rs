//! Subscription Client
//!
//! Single responsibility: Own one session and hand out subscription streams.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                  SubscriptionClient                     │
//! │  - connect() returns once the handshake has run        │
//! │  - Hands out SubscriptionStreams                        │
//! │  - close() / Drop release the connection                │
//! └────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌────────────────────────────────────────────────────────┐
//! │                       Session                           │
//! │  - Transport + connection_init/connection_ack           │
//! │  - Router task (reader) and writer task                 │
//! └────────────────────────────────────────────────────────┘
//!                            │
//!               ┌────────────┼────────────┐
//!               ▼            ▼            ▼
//!           Transport     Registry     Protocol
//! ```
//!
//! # Lifecycle
//!
//! `connect()` is the acquisition step and `close()` the release. Dropping the
//! client without closing aborts the background tasks, which drops the socket,
//! so the connection is released on every exit path. All live streams end with
//! [`Termination::ConnectionClosed`](super::Termination::ConnectionClosed)
//! either way.
//!
//! There is no implicit reconnection. A stream whose connection died simply
//! ends; callers that want to continue call [`SubscriptionClient::reconnect`]
//! and subscribe again.

use futures_util::stream::{select_all, SelectAll};
use serde_json::Value;
use tracing::{debug, info};

use super::protocol::OutboundFrame;
use super::session::{ConnectionState, Session, SessionConfig};
use super::stream::SubscriptionStream;
use super::streams::{self, SubscriptionRequest};
use crate::config::Config;
use crate::error::RealtimeError;
use crate::identity::identity_id_from_token;

/// Quotes for several securities merged into one stream.
pub type QuoteStream = SelectAll<SubscriptionStream>;

/// An already-authenticated credential supplied by the caller.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub access_token: String,
    /// Identity id for identity updates; derived from the token when unset
    pub identity_id: Option<String>,
}

impl Credentials {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            identity_id: None,
        }
    }

    pub fn with_identity_id(mut self, identity_id: impl Into<String>) -> Self {
        self.identity_id = Some(identity_id.into());
        self
    }
}

/// A multiplexing client for the real-time subscription endpoint.
pub struct SubscriptionClient {
    config: SessionConfig,
    identity_id: Option<String>,
    session: Session,
}

impl SubscriptionClient {
    /// Connect and run the handshake.
    ///
    /// # Errors
    /// Returns [`RealtimeError::Connect`] when no candidate endpoint accepts.
    pub async fn connect(config: &Config, credentials: Credentials) -> Result<Self, RealtimeError> {
        let session_config = SessionConfig::new(config, &credentials.access_token);
        let identity_id = credentials
            .identity_id
            .or_else(|| identity_id_from_token(&credentials.access_token));

        Self::connect_with(session_config, identity_id).await
    }

    /// Connect with an explicit session configuration.
    pub async fn connect_with(
        config: SessionConfig,
        identity_id: Option<String>,
    ) -> Result<Self, RealtimeError> {
        let session = Session::establish(config.clone()).await?;
        info!(endpoint = %session.endpoint(), "Subscription client connected");

        Ok(Self {
            config,
            identity_id,
            session,
        })
    }

    /// Start a subscription. Lazy: nothing is sent until the stream is polled.
    pub fn subscribe(&self, operation_name: &str, query: &str, variables: Value) -> SubscriptionStream {
        SubscriptionStream::new(
            self.session.registry().clone(),
            self.session.outbound().clone(),
            operation_name,
            query,
            variables,
        )
    }

    fn start(&self, request: SubscriptionRequest) -> SubscriptionStream {
        self.subscribe(request.operation_name, request.query, request.variables)
    }

    /// Real-time quotes for one security.
    pub fn stream_quote(&self, security_id: &str, currency: Option<&str>) -> SubscriptionStream {
        self.start(streams::quote(security_id, currency))
    }

    /// Real-time quotes for several securities, one subscription each, merged
    /// as messages arrive.
    pub fn stream_quotes<S: AsRef<str>>(&self, security_ids: &[S], currency: Option<&str>) -> QuoteStream {
        select_all(
            security_ids
                .iter()
                .map(|id| self.stream_quote(id.as_ref(), currency)),
        )
    }

    /// Activity feed updates.
    pub fn stream_activity_updates(&self) -> SubscriptionStream {
        self.start(streams::activity_feed())
    }

    /// Identity and account core updates, for `identity_id` or the client's
    /// own identity.
    ///
    /// # Errors
    /// [`RealtimeError::MissingIdentity`] when neither is known.
    pub fn stream_identity_updates(
        &self,
        identity_id: Option<&str>,
    ) -> Result<SubscriptionStream, RealtimeError> {
        let identity_id = identity_id
            .or(self.identity_id.as_deref())
            .ok_or(RealtimeError::MissingIdentity)?;
        Ok(self.start(streams::identity_account_core(identity_id)))
    }

    /// Cash balance changes for custodian accounts.
    pub fn stream_balance_changes<S: AsRef<str>>(&self, custodian_account_ids: &[S]) -> SubscriptionStream {
        self.start(streams::balance_changes(custodian_account_ids))
    }

    /// Send a keep-alive ping. Replies are not tracked.
    pub fn ping(&self) -> Result<(), RealtimeError> {
        debug!("Sending ping");
        self.session.send(OutboundFrame::ping())
    }

    /// Whether the server acknowledged `connection_init`.
    pub fn is_acknowledged(&self) -> bool {
        self.session.is_acknowledged()
    }

    /// Whether the connection is still being read.
    pub fn is_connected(&self) -> bool {
        self.session.is_alive()
    }

    pub fn state(&self) -> ConnectionState {
        self.session.state()
    }

    pub fn endpoint(&self) -> &str {
        self.session.endpoint()
    }

    pub fn subprotocol(&self) -> Option<&str> {
        self.session.subprotocol()
    }

    pub fn identity_id(&self) -> Option<&str> {
        self.identity_id.as_deref()
    }

    /// Number of subscriptions currently registered on the connection.
    pub fn active_subscriptions(&self) -> usize {
        self.session.registry().len()
    }

    /// Replace the session with a fresh one.
    ///
    /// Streams from the old session end with `ConnectionClosed`; subscribe
    /// again afterwards.
    pub async fn reconnect(&mut self) -> Result<(), RealtimeError> {
        debug!("Reconnecting...");
        self.session.close().await;
        self.session = Session::establish(self.config.clone()).await?;
        info!(endpoint = %self.session.endpoint(), "Reconnection complete");
        Ok(())
    }

    /// Cancel the router, end live streams and close the connection.
    pub async fn close(&mut self) {
        self.session.close().await;
    }
}
