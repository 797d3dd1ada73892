// Copyright (c) databroker.dev 2025
// This file is licensed under the MIT

//! Client session for the databroker wire protocol.
//!
//! [`BrokerClient`] keeps one WebSocket to the broker, correlates
//! responses to requests through a pending table, re-establishes the
//! connection with exponential backoff after unclean closes, and routes
//! `SUBSCRIPTION_UPDATE` pushes to locally registered callbacks.
//!
//! Subscriptions are client-local state: after a reconnect the broker
//! knows nothing about them, so applications re-subscribe when the
//! [`ClientEvent::Ready`] event fires again.

// Re-export the wire protocol types callers build requests from.
pub use databroker_core as protocol;
pub use databroker_core::UpdateNotification;

pub use config::ClientConfig;
pub use error::ClientError;
pub use event::ClientEvent;
pub use session::{BrokerClient, ConnectionState};

mod config;
mod error;
mod event;
mod session;
