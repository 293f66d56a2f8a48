//! Wealthsimple Realtime - GraphQL subscription client
//!
//! Streams real-time quotes, activity feed updates, identity/account updates
//! and balance changes from the Wealthsimple subscription endpoint.
//!
//! ## Architecture
//!
//! - **Transport**: one WebSocket, opened against a list of candidate endpoints
//! - **Session**: `connection_init` handshake plus a background router that
//!   demultiplexes frames to per-subscription queues
//! - **Streams**: every subscription is a lazy `futures::Stream`; dropping it
//!   cancels the subscription
//!
//! Authentication is not handled here. Callers supply an access token obtained
//! elsewhere.

pub mod config;
pub mod error;
pub mod identity;
pub mod subscription;

// Re-exports
pub use config::Config;
pub use error::{RealtimeError, Result};
pub use subscription::{
    ConnectionState, Credentials, InboundMessage, MessageKind, QuoteStream, SubscriptionClient,
    SubscriptionStream, Termination,
};
