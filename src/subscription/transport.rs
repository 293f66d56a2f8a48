//! WebSocket Transport Layer
//!
//! Single responsibility: Open a WebSocket to the first candidate endpoint that
//! accepts, and send/close on it. No knowledge of subscriptions or routing.

use std::time::Duration;

use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio_tungstenite::{
    connect_async_with_config,
    tungstenite::{
        client::IntoClientRequest,
        http::{header, HeaderMap, HeaderName, HeaderValue},
        protocol::{frame::coding::CloseCode, CloseFrame, Message, WebSocketConfig},
    },
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};

use super::protocol::SUBPROTOCOL;
use crate::config::Config;
use crate::error::RealtimeError;

/// Type alias for the WebSocket send half
pub type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>, Message>;

/// Type alias for the WebSocket receive half
pub type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// Headers attached to the upgrade request.
#[derive(Debug, Clone)]
pub struct ConnectHeaders {
    pub access_token: String,
    pub api_version: String,
    pub locale: String,
    pub profile: String,
    pub platform_os: String,
    pub origin: String,
    pub user_agent: String,
}

impl ConnectHeaders {
    pub fn from_config(config: &Config, access_token: &str) -> Self {
        Self {
            access_token: access_token.to_string(),
            api_version: config.api_version.clone(),
            locale: config.locale.clone(),
            profile: config.profile.clone(),
            platform_os: config.platform_os.clone(),
            origin: config.origin.clone(),
            user_agent: config.user_agent.clone(),
        }
    }

    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token)
    }

    /// Write the auth, marker and sub-protocol headers into `headers`.
    pub fn apply(&self, headers: &mut HeaderMap) -> Result<(), RealtimeError> {
        let entries = [
            (header::ORIGIN, self.origin.clone()),
            (header::USER_AGENT, self.user_agent.clone()),
            (header::CACHE_CONTROL, "no-cache".to_string()),
            (header::PRAGMA, "no-cache".to_string()),
            (header::AUTHORIZATION, self.bearer()),
            (HeaderName::from_static("x-ws-api-version"), self.api_version.clone()),
            (HeaderName::from_static("x-platform-os"), self.platform_os.clone()),
            (HeaderName::from_static("x-ws-locale"), self.locale.clone()),
            (HeaderName::from_static("x-ws-profile"), self.profile.clone()),
            (header::SEC_WEBSOCKET_PROTOCOL, SUBPROTOCOL.to_string()),
        ];

        for (name, value) in entries {
            let value = HeaderValue::from_str(&value).map_err(|e| {
                RealtimeError::Config(format!("Invalid value for header {}: {}", name, e))
            })?;
            headers.insert(name, value);
        }
        Ok(())
    }
}

/// Timeouts for opening and closing the transport.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub open_timeout: Duration,
    pub close_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            open_timeout: Duration::from_secs(20),
            close_timeout: Duration::from_secs(10),
        }
    }
}

/// A connected WebSocket transport.
///
/// It can only be constructed via `Transport::connect_any()` or
/// `Transport::connect()`.
pub struct Transport {
    sink: WsSink,
    stream: WsStream,
    endpoint: String,
    subprotocol: Option<String>,
}

impl Transport {
    /// Connect to the first candidate that accepts.
    ///
    /// Candidates are tried in order, each once. When all of them fail the
    /// last error is returned.
    pub async fn connect_any(
        candidates: &[String],
        headers: &ConnectHeaders,
        config: &TransportConfig,
    ) -> Result<Self, RealtimeError> {
        if candidates.is_empty() {
            return Err(RealtimeError::Config("No candidate endpoints configured".into()));
        }

        let mut last_error = None;
        for url in candidates {
            match Self::connect(url, headers, config).await {
                Ok(transport) => return Ok(transport),
                Err(e) => {
                    warn!(url = %url, error = %e, "Candidate endpoint failed");
                    last_error = Some(e);
                }
            }
        }

        Err(RealtimeError::Connect {
            attempts: candidates.len(),
            last: Box::new(
                last_error.unwrap_or_else(|| RealtimeError::Config("No endpoint attempted".into())),
            ),
        })
    }

    /// Connect to a single endpoint.
    pub async fn connect(
        url: &str,
        headers: &ConnectHeaders,
        config: &TransportConfig,
    ) -> Result<Self, RealtimeError> {
        debug!(url = %url, "Connecting to WebSocket");

        let mut request = url.into_client_request()?;
        headers.apply(request.headers_mut())?;

        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = None;
        ws_config.max_frame_size = None;

        let (ws, response) = tokio::time::timeout(
            config.open_timeout,
            connect_async_with_config(request, Some(ws_config), false),
        )
        .await
        .map_err(|_| {
            RealtimeError::Timeout(format!(
                "Opening {} timed out after {:?}",
                url, config.open_timeout
            ))
        })??;

        let subprotocol = response
            .headers()
            .get(header::SEC_WEBSOCKET_PROTOCOL)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        let (sink, stream) = ws.split();

        info!(url = %url, subprotocol = ?subprotocol, "WebSocket connected");
        Ok(Self {
            sink,
            stream,
            endpoint: url.to_string(),
            subprotocol,
        })
    }

    /// Send one text frame.
    pub async fn send_text(&mut self, text: String) -> Result<(), RealtimeError> {
        self.sink.send(Message::Text(text)).await?;
        Ok(())
    }

    /// The endpoint this transport connected to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// The sub-protocol the server agreed to, if it named one.
    pub fn subprotocol(&self) -> Option<&str> {
        self.subprotocol.as_deref()
    }

    /// Split into separate sink and stream for concurrent send/receive.
    pub fn split(self) -> (WsSink, WsStream) {
        (self.sink, self.stream)
    }
}

/// Send a normal close frame and close the sink, bounded by `timeout`.
pub async fn close_sink(sink: &mut WsSink, timeout: Duration) {
    let frame = CloseFrame {
        code: CloseCode::Normal,
        reason: "client shutdown".into(),
    };

    let closing = async {
        sink.send(Message::Close(Some(frame))).await?;
        sink.close().await
    };

    match tokio::time::timeout(timeout, closing).await {
        Ok(Ok(())) => debug!("WebSocket closed"),
        Ok(Err(e)) => debug!(error = %e, "WebSocket close failed"),
        Err(_) => warn!(timeout = ?timeout, "WebSocket close timed out"),
    }
}
