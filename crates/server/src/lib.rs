// Copyright (c) databroker.dev 2025
// This file is licensed under the MIT

//! The broker: accepts WebSocket connections, detects each client's
//! platform, routes requests to the storage adapter wired for that
//! platform and fans out change notifications to subscribed sessions.
//!
//! One task per connection processes inbound envelopes strictly in
//! order, so a session always reads its own writes and notifications are
//! emitted after the adapter commit and before the next envelope of the
//! mutating session.

// Re-exported so adapter wiring needs no extra imports.
pub use databroker_core::Platform;
pub use databroker_storage::StorageAdapter;

pub use config::BrokerConfig;
pub use error::BrokerError;
pub use server::{Broker, ShutdownHandle, StatsSnapshot};
pub use subscription::Pattern;

mod config;
mod dispatch;
mod error;
mod server;
mod session;
mod subscription;
