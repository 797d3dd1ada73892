// Copyright (c) databroker.dev 2025
// This file is licensed under the MIT

//! Envelope types for both wire directions.
//!
//! A client request is `{"type": OPCODE, "requestId": n, "timestamp": ms,
//! "payload": {...}}`; the opcode set is closed, so requests deserialize
//! into [`RequestPayload`], one variant per opcode. Server traffic is the
//! closed [`ServerMessage`] enum: eight `*_RESPONSE` kinds correlated by
//! `requestId`, plus the three server-initiated kinds
//! (`CONNECTION_ESTABLISHED`, `SUBSCRIPTION_UPDATE`, `ERROR`).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
	options::{AdapterOptions, Predicate},
	platform::Platform,
	timestamp::now_millis,
};

/// A client-originated envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
	#[serde(rename = "requestId")]
	pub request_id: u64,
	#[serde(default)]
	pub timestamp: u64,
	#[serde(flatten)]
	pub payload: RequestPayload,
}

/// One variant per request opcode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum RequestPayload {
	#[serde(rename = "GET")]
	Get(GetRequest),
	#[serde(rename = "SET")]
	Set(SetRequest),
	#[serde(rename = "DELETE")]
	Delete(DeleteRequest),
	#[serde(rename = "QUERY")]
	Query(QueryRequest),
	#[serde(rename = "BATCH")]
	Batch(BatchRequest),
	#[serde(rename = "PING")]
	Ping(PingRequest),
	#[serde(rename = "SUBSCRIBE")]
	Subscribe(SubscribeRequest),
	#[serde(rename = "UNSUBSCRIBE")]
	Unsubscribe(UnsubscribeRequest),
}

impl RequestPayload {
	/// The wire opcode of this request.
	pub fn opcode(&self) -> &'static str {
		match self {
			RequestPayload::Get(_) => "GET",
			RequestPayload::Set(_) => "SET",
			RequestPayload::Delete(_) => "DELETE",
			RequestPayload::Query(_) => "QUERY",
			RequestPayload::Batch(_) => "BATCH",
			RequestPayload::Ping(_) => "PING",
			RequestPayload::Subscribe(_) => "SUBSCRIBE",
			RequestPayload::Unsubscribe(_) => "UNSUBSCRIBE",
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetRequest {
	pub collection: String,
	pub key: String,
	#[serde(default)]
	pub options: AdapterOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetRequest {
	pub collection: String,
	pub key: String,
	pub value: Value,
	#[serde(default)]
	pub options: AdapterOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteRequest {
	pub collection: String,
	pub key: String,
	#[serde(default)]
	pub options: AdapterOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
	pub collection: String,
	#[serde(default)]
	pub query: Predicate,
	#[serde(default)]
	pub options: AdapterOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest {
	pub operations: Vec<BatchOperation>,
	/// Abort the remaining operations after the first failure.
	#[serde(rename = "stopOnError", default)]
	pub stop_on_error: bool,
}

/// One entry of a BATCH request: `{id, type, payload}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOperation {
	pub id: String,
	#[serde(flatten)]
	pub op: RequestPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingRequest {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribeRequest {
	pub collection: String,
	/// A literal key or the `*` wildcard.
	pub key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnsubscribeRequest {
	pub collection: String,
	pub key: String,
}

/// Every message the broker sends, tagged by `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
	#[serde(rename = "CONNECTION_ESTABLISHED")]
	ConnectionEstablished(Welcome),
	#[serde(rename = "GET_RESPONSE")]
	GetResponse(Response),
	#[serde(rename = "SET_RESPONSE")]
	SetResponse(Response),
	#[serde(rename = "DELETE_RESPONSE")]
	DeleteResponse(Response),
	#[serde(rename = "QUERY_RESPONSE")]
	QueryResponse(Response),
	#[serde(rename = "BATCH_RESPONSE")]
	BatchResponse(Response),
	#[serde(rename = "PING_RESPONSE")]
	PingResponse(Response),
	#[serde(rename = "SUBSCRIBE_RESPONSE")]
	SubscribeResponse(Response),
	#[serde(rename = "UNSUBSCRIBE_RESPONSE")]
	UnsubscribeResponse(Response),
	#[serde(rename = "SUBSCRIPTION_UPDATE")]
	SubscriptionUpdate(UpdateNotification),
	#[serde(rename = "ERROR")]
	Error(ErrorNotice),
}

impl ServerMessage {
	/// Wrap a successful handler result in the response kind matching
	/// the request opcode.
	pub fn response_for(payload: &RequestPayload, request_id: u64, data: Value) -> Self {
		let response = Response::ok(request_id, data);
		match payload {
			RequestPayload::Get(_) => ServerMessage::GetResponse(response),
			RequestPayload::Set(_) => ServerMessage::SetResponse(response),
			RequestPayload::Delete(_) => ServerMessage::DeleteResponse(response),
			RequestPayload::Query(_) => ServerMessage::QueryResponse(response),
			RequestPayload::Batch(_) => ServerMessage::BatchResponse(response),
			RequestPayload::Ping(_) => ServerMessage::PingResponse(response),
			RequestPayload::Subscribe(_) => ServerMessage::SubscribeResponse(response),
			RequestPayload::Unsubscribe(_) => ServerMessage::UnsubscribeResponse(response),
		}
	}

	/// Build an `ERROR` envelope, echoing the request id when known.
	pub fn error(request_id: Option<u64>, message: impl Into<String>) -> Self {
		ServerMessage::Error(ErrorNotice {
			request_id,
			error: message.into(),
			timestamp: now_millis(),
		})
	}

	/// The correlation id carried by this message, if any.
	pub fn request_id(&self) -> Option<u64> {
		match self {
			ServerMessage::ConnectionEstablished(_) => None,
			ServerMessage::GetResponse(r)
			| ServerMessage::SetResponse(r)
			| ServerMessage::DeleteResponse(r)
			| ServerMessage::QueryResponse(r)
			| ServerMessage::BatchResponse(r)
			| ServerMessage::PingResponse(r)
			| ServerMessage::SubscribeResponse(r)
			| ServerMessage::UnsubscribeResponse(r) => Some(r.request_id),
			ServerMessage::SubscriptionUpdate(_) => None,
			ServerMessage::Error(e) => e.request_id,
		}
	}
}

/// Body shared by every `*_RESPONSE` envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
	#[serde(rename = "requestId")]
	pub request_id: u64,
	pub success: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub data: Option<Value>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
	pub timestamp: u64,
}

impl Response {
	pub fn ok(request_id: u64, data: Value) -> Self {
		Self {
			request_id,
			success: true,
			data: Some(data),
			error: None,
			timestamp: now_millis(),
		}
	}
}

/// `CONNECTION_ESTABLISHED` body, sent exactly once per connection
/// before any other server-initiated traffic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Welcome {
	#[serde(rename = "clientId")]
	pub client_id: String,
	pub platform: Platform,
	pub capabilities: Vec<String>,
	pub timestamp: u64,
}

/// The mutation kind carried by a `SUBSCRIPTION_UPDATE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MutationOp {
	#[serde(rename = "SET")]
	Set,
	#[serde(rename = "DELETE")]
	Delete,
}

/// `SUBSCRIPTION_UPDATE` body. Server-initiated, no request id;
/// `value` is JSON null for deletions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateNotification {
	pub collection: String,
	pub key: String,
	pub operation: MutationOp,
	pub value: Value,
	pub timestamp: u64,
}

/// `ERROR` body. The request id is echoed when the failing frame
/// carried one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorNotice {
	#[serde(rename = "requestId", default, skip_serializing_if = "Option::is_none")]
	pub request_id: Option<u64>,
	pub error: String,
	pub timestamp: u64,
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn test_request_envelope_roundtrip() {
		let wire = r#"{ "type":"SET", "requestId":7, "timestamp":1700000000000,
			"payload":{ "collection":"cart", "key":"u1",
				"value":{ "items":[], "total":0 }, "options":{} } }"#;

		let envelope: RequestEnvelope = serde_json::from_str(wire).unwrap();
		assert_eq!(envelope.request_id, 7);
		assert_eq!(envelope.timestamp, 1_700_000_000_000);
		match &envelope.payload {
			RequestPayload::Set(set) => {
				assert_eq!(set.collection, "cart");
				assert_eq!(set.key, "u1");
				assert_eq!(set.value, json!({"items": [], "total": 0}));
			}
			other => panic!("expected SET, got {}", other.opcode()),
		}

		let encoded = serde_json::to_value(&envelope).unwrap();
		assert_eq!(encoded["type"], "SET");
		assert_eq!(encoded["requestId"], 7);
		assert_eq!(encoded["payload"]["key"], "u1");
	}

	#[test]
	fn test_ping_payload_is_empty_object() {
		let envelope: RequestEnvelope =
			serde_json::from_str(r#"{"type":"PING","requestId":1,"payload":{}}"#).unwrap();
		assert!(matches!(envelope.payload, RequestPayload::Ping(_)));
		assert_eq!(envelope.timestamp, 0);
	}

	#[test]
	fn test_batch_operations_flatten() {
		let wire = r#"{ "type":"BATCH", "requestId":3, "payload":{ "operations":[
			{ "id":"a", "type":"SET",
			  "payload":{"collection":"c","key":"k","value":{"x":1}} },
			{ "id":"b", "type":"QUERY", "payload":{"collection":"c","query":{"x":1}} }
		] } }"#;

		let envelope: RequestEnvelope = serde_json::from_str(wire).unwrap();
		let RequestPayload::Batch(batch) = &envelope.payload else {
			panic!("expected BATCH");
		};
		assert_eq!(batch.operations.len(), 2);
		assert!(!batch.stop_on_error);
		assert_eq!(batch.operations[0].id, "a");
		assert_eq!(batch.operations[0].op.opcode(), "SET");
		assert_eq!(batch.operations[1].op.opcode(), "QUERY");
	}

	#[test]
	fn test_response_wire_shape() {
		let message = ServerMessage::response_for(
			&RequestPayload::Set(SetRequest {
				collection: "cart".into(),
				key: "u1".into(),
				value: json!({}),
				options: AdapterOptions::default(),
			}),
			7,
			json!({"success": true, "key": "u1", "timestamp": 1}),
		);

		let encoded = serde_json::to_value(&message).unwrap();
		assert_eq!(encoded["type"], "SET_RESPONSE");
		assert_eq!(encoded["requestId"], 7);
		assert_eq!(encoded["success"], true);
		assert_eq!(encoded["data"]["key"], "u1");
		assert!(encoded.get("error").is_none());
	}

	#[test]
	fn test_error_notice_echoes_request_id() {
		let encoded =
			serde_json::to_value(ServerMessage::error(Some(9), "Unknown message type: FOO"))
				.unwrap();
		assert_eq!(encoded["type"], "ERROR");
		assert_eq!(encoded["requestId"], 9);
		assert_eq!(encoded["error"], "Unknown message type: FOO");

		let encoded = serde_json::to_value(ServerMessage::error(None, "boom")).unwrap();
		assert!(encoded.get("requestId").is_none());
	}

	#[test]
	fn test_subscription_update_roundtrip() {
		let update = ServerMessage::SubscriptionUpdate(UpdateNotification {
			collection: "cart".into(),
			key: "u1".into(),
			operation: MutationOp::Delete,
			value: Value::Null,
			timestamp: 5,
		});

		let encoded = serde_json::to_value(&update).unwrap();
		assert_eq!(encoded["type"], "SUBSCRIPTION_UPDATE");
		assert_eq!(encoded["operation"], "DELETE");
		assert_eq!(encoded["value"], Value::Null);
		assert!(encoded.get("requestId").is_none());

		let decoded: ServerMessage = serde_json::from_value(encoded).unwrap();
		assert!(matches!(
			decoded,
			ServerMessage::SubscriptionUpdate(UpdateNotification {
				operation: MutationOp::Delete,
				..
			})
		));
	}

	#[test]
	fn test_request_id_accessor() {
		assert_eq!(ServerMessage::error(Some(4), "x").request_id(), Some(4));
		assert_eq!(
			ServerMessage::PingResponse(Response::ok(11, json!({"pong": true}))).request_id(),
			Some(11)
		);
	}
}
