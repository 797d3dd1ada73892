// Copyright (c) databroker.dev 2025
// This file is licensed under the MIT

//! Frame codec with an error taxonomy the dispatcher can act on.
//!
//! Decoding happens in two phases: the frame is parsed to a JSON value
//! first, so that an unknown or malformed opcode still yields the
//! `requestId` needed to echo an `ERROR` envelope back. A frame that is
//! not valid JSON at all is merely dropped by the broker.

use serde_json::Value;
use thiserror::Error;

use crate::envelope::{RequestEnvelope, ServerMessage};

const OPCODES: [&str; 8] = [
	"GET",
	"SET",
	"DELETE",
	"QUERY",
	"BATCH",
	"PING",
	"SUBSCRIBE",
	"UNSUBSCRIBE",
];

#[derive(Debug, Error)]
pub enum DecodeError {
	/// Not a JSON object with a string `type`; the frame is dropped.
	#[error("malformed frame: {0}")]
	Malformed(String),
	/// Valid envelope shape, but the opcode is not part of the protocol.
	#[error("Unknown message type: {type_name}")]
	UnknownType {
		request_id: Option<u64>,
		type_name: String,
	},
	/// Known opcode with a payload that does not deserialize.
	#[error("{message}")]
	BadPayload {
		request_id: Option<u64>,
		message: String,
	},
}

impl DecodeError {
	/// The request id to echo in an `ERROR` envelope, when one was
	/// recoverable from the frame.
	pub fn request_id(&self) -> Option<u64> {
		match self {
			DecodeError::Malformed(_) => None,
			DecodeError::UnknownType { request_id, .. }
			| DecodeError::BadPayload { request_id, .. } => *request_id,
		}
	}
}

/// Decode one inbound text frame into a request envelope.
pub fn decode_request(frame: &str) -> Result<RequestEnvelope, DecodeError> {
	let value: Value =
		serde_json::from_str(frame).map_err(|e| DecodeError::Malformed(e.to_string()))?;

	let object = value
		.as_object()
		.ok_or_else(|| DecodeError::Malformed("frame is not a JSON object".to_string()))?;

	let type_name = object
		.get("type")
		.and_then(Value::as_str)
		.ok_or_else(|| DecodeError::Malformed("missing \"type\" field".to_string()))?;

	let request_id = object.get("requestId").and_then(Value::as_u64);

	if !OPCODES.contains(&type_name) {
		return Err(DecodeError::UnknownType {
			request_id,
			type_name: type_name.to_string(),
		});
	}

	serde_json::from_value(value).map_err(|e| DecodeError::BadPayload {
		request_id,
		message: e.to_string(),
	})
}

/// Decode one server frame on the client side.
pub fn decode_server(frame: &str) -> Result<ServerMessage, DecodeError> {
	serde_json::from_str(frame).map_err(|e| DecodeError::Malformed(e.to_string()))
}

/// Encode a server message for the wire. Broker-generated envelopes are
/// always encodable; a failure here tears the session down.
pub fn encode_server(message: &ServerMessage) -> Result<String, serde_json::Error> {
	serde_json::to_string(message)
}
