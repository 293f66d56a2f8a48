//! Real-time Subscription Module
//!
//! Multiplexes GraphQL subscriptions over one `graphql-transport-ws`
//! WebSocket connection.
//!
//! # Architecture
//!
//! Each submodule has a single responsibility:
//!
//! | Module      | Responsibility                                         |
//! |-------------|--------------------------------------------------------|
//! | `transport` | Open a WebSocket against candidate endpoints           |
//! | `protocol`  | graphql-transport-ws frames, JSON encoding             |
//! | `registry`  | Subscription token to inbound queue map                |
//! | `router`    | Background reader classifying and routing frames       |
//! | `writer`    | Background writer owning the sink                      |
//! | `session`   | One connection: handshake, tasks, close                |
//! | `stream`    | The lazy per-subscription `Stream`                     |
//! | `streams`   | Quote, activity, identity and balance documents        |
//! | `client`    | Public client handing out streams                      |
//!
//! # Message Flow
//!
//! ```text
//!  SubscriptionStream ──subscribe──▶ writer ──▶ WebSocket
//!         ▲                                        │
//!         │ queue (per token, FIFO)                │
//!     Registry ◀────────── router ◀────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use futures_util::StreamExt;
//! use wealthsimple_realtime::{Config, Credentials, SubscriptionClient};
//!
//! let mut client = SubscriptionClient::connect(&Config::default(), Credentials::new(token)).await?;
//!
//! let mut quotes = client.stream_quote("sec-s-xxxxx", None);
//! while let Some(message) = quotes.next().await {
//!     println!("{}", message.to_json());
//! }
//!
//! client.close().await;
//! ```

mod router;
mod writer;

pub mod client;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod stream;
pub mod streams;
pub mod transport;

pub use client::{Credentials, QuoteStream, SubscriptionClient};
pub use protocol::{InboundMessage, MessageKind, OutboundFrame, SUBPROTOCOL};
pub use registry::{Registry, SubscriptionId, Termination};
pub use session::{ConnectionState, Session, SessionConfig};
pub use stream::SubscriptionStream;
pub use transport::{ConnectHeaders, TransportConfig};
