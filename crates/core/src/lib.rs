// Copyright (c) databroker.dev 2025
// This file is licensed under the MIT

//! Wire protocol for the databroker key/value broker.
//!
//! Everything that crosses the WebSocket is defined here: the request
//! envelope clients send, the closed set of server messages coming back,
//! the codec that turns frames into either of those, and the platform
//! model used to pick capabilities and storage adapters per connection.

mod codec;
mod envelope;
mod options;
mod platform;
mod timestamp;

pub use codec::{decode_request, decode_server, encode_server, DecodeError};
pub use envelope::{
	BatchOperation, BatchRequest, DeleteRequest, ErrorNotice, GetRequest, MutationOp,
	PingRequest, QueryRequest, RequestEnvelope, RequestPayload, Response, ServerMessage,
	SetRequest, SubscribeRequest, UnsubscribeRequest, UpdateNotification, Welcome,
};
pub use options::{AdapterOptions, Predicate};
pub use platform::Platform;
pub use timestamp::now_millis;

/// The wildcard key pattern: matches every key of a collection.
pub const WILDCARD: &str = "*";
