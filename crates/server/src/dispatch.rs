// Copyright (c) databroker.dev 2025
// This file is licensed under the MIT

//! Request dispatcher: one handler per opcode.
//!
//! Every inbound frame of a session runs through [`Dispatcher::handle_frame`]
//! sequentially, which is what gives a session read-your-writes ordering
//! and guarantees notifications are queued before the next frame of the
//! mutating session is looked at.

use std::collections::HashMap;
use std::sync::Arc;

use databroker_core::{
	decode_request, now_millis, BatchRequest, DecodeError, MutationOp, Platform,
	RequestEnvelope, RequestPayload, ServerMessage,
};
use databroker_storage::StorageAdapter;
use serde_json::{json, Value};
use tracing::warn;

use crate::session::{Session, SessionRegistry};
use crate::subscription::{Pattern, SubscriptionRegistry};

pub(crate) struct Dispatcher {
	adapters: HashMap<Platform, Arc<dyn StorageAdapter>>,
	/// Serves platforms without an explicit wiring (the `Other(_)`
	/// long tail). None in strict mode.
	fallback: Option<Arc<dyn StorageAdapter>>,
	sessions: Arc<SessionRegistry>,
	subscriptions: Arc<SubscriptionRegistry>,
}

impl Dispatcher {
	pub(crate) fn new(
		adapters: HashMap<Platform, Arc<dyn StorageAdapter>>,
		fallback: Option<Arc<dyn StorageAdapter>>,
		sessions: Arc<SessionRegistry>,
		subscriptions: Arc<SubscriptionRegistry>,
	) -> Self {
		Self {
			adapters,
			fallback,
			sessions,
			subscriptions,
		}
	}

	/// Decode and dispatch one inbound text frame, queueing whatever
	/// reply it produces. A frame that is not valid JSON is dropped
	/// without closing the connection.
	pub(crate) async fn handle_frame(&self, session: &Arc<Session>, frame: &str) {
		match decode_request(frame) {
			Ok(envelope) => {
				let reply = self.dispatch(session, envelope).await;
				session.send(&reply);
			}
			Err(DecodeError::Malformed(reason)) => {
				warn!(client_id = %session.id(), %reason, "dropping malformed frame");
			}
			Err(err) => {
				session.send(&ServerMessage::error(err.request_id(), err.to_string()));
			}
		}
	}

	pub(crate) async fn dispatch(
		&self,
		session: &Arc<Session>,
		envelope: RequestEnvelope,
	) -> ServerMessage {
		let request_id = envelope.request_id;
		let result = match &envelope.payload {
			RequestPayload::Batch(batch) => self.execute_batch(session, batch).await,
			single => self.execute_op(session, single).await,
		};
		match result {
			Ok(data) => ServerMessage::response_for(&envelope.payload, request_id, data),
			Err(message) => ServerMessage::error(Some(request_id), message),
		}
	}

	fn adapter_for(&self, platform: &Platform) -> Result<Arc<dyn StorageAdapter>, String> {
		self.adapters
			.get(platform)
			.or(self.fallback.as_ref())
			.cloned()
			.ok_or_else(|| format!("No storage adapter for platform: {platform}"))
	}

	/// Execute one non-batch operation. The error string becomes the
	/// `ERROR` envelope (or the batch entry) for the request.
	async fn execute_op(
		&self,
		session: &Arc<Session>,
		payload: &RequestPayload,
	) -> Result<Value, String> {
		match payload {
			RequestPayload::Get(req) => {
				let adapter = self.adapter_for(session.platform())?;
				let value = adapter
					.get(&req.collection, &req.key, &req.options)
					.await
					.map_err(|e| e.to_string())?;
				Ok(value.unwrap_or(Value::Null))
			}
			RequestPayload::Set(req) => {
				let adapter = self.adapter_for(session.platform())?;
				let receipt = adapter
					.set(&req.collection, &req.key, req.value.clone(), &req.options)
					.await
					.map_err(|e| e.to_string())?;
				// Notify-after-commit: the adapter has acknowledged.
				self.subscriptions.notify(
					&self.sessions,
					session.id(),
					&req.collection,
					&req.key,
					MutationOp::Set,
					req.value.clone(),
				);
				Ok(json!({
					"success": true,
					"key": receipt.key,
					"timestamp": receipt.timestamp,
				}))
			}
			RequestPayload::Delete(req) => {
				let adapter = self.adapter_for(session.platform())?;
				let receipt = adapter
					.delete(&req.collection, &req.key, &req.options)
					.await
					.map_err(|e| e.to_string())?;
				self.subscriptions.notify(
					&self.sessions,
					session.id(),
					&req.collection,
					&req.key,
					MutationOp::Delete,
					Value::Null,
				);
				Ok(json!({"success": true, "deleted": receipt.deleted}))
			}
			RequestPayload::Query(req) => {
				let adapter = self.adapter_for(session.platform())?;
				let hits = adapter
					.query(&req.collection, &req.query, &req.options)
					.await
					.map_err(|e| e.to_string())?;
				serde_json::to_value(hits).map_err(|e| e.to_string())
			}
			RequestPayload::Ping(_) => Ok(json!({"pong": true, "timestamp": now_millis()})),
			RequestPayload::Subscribe(req) => {
				// Duplicate subscribe is a no-op success.
				self.subscriptions
					.subscribe(session.id(), Pattern::new(&req.collection, &req.key));
				Ok(json!({
					"subscribed": true,
					"collection": req.collection,
					"key": req.key,
				}))
			}
			RequestPayload::Unsubscribe(req) => {
				let pattern = Pattern::new(&req.collection, &req.key);
				if self.subscriptions.unsubscribe(session.id(), &pattern) {
					Ok(json!({
						"unsubscribed": true,
						"collection": req.collection,
						"key": req.key,
					}))
				} else {
					Err(format!(
						"Not subscribed to {}/{}",
						req.collection, req.key
					))
				}
			}
			RequestPayload::Batch(_) => Err("BATCH cannot be nested".to_string()),
		}
	}

	/// Run batch operations in order against the same adapter and
	/// session. Failures are recorded per entry; by default the batch
	/// continues past them.
	async fn execute_batch(
		&self,
		session: &Arc<Session>,
		batch: &BatchRequest,
	) -> Result<Value, String> {
		let mut results = Vec::with_capacity(batch.operations.len());
		for operation in &batch.operations {
			match self.execute_op(session, &operation.op).await {
				Ok(data) => {
					results.push(json!({"operation": operation.id, "result": data}));
				}
				Err(message) => {
					results.push(json!({
						"operation": operation.id,
						"result": {"error": message},
					}));
					if batch.stop_on_error {
						break;
					}
				}
			}
		}
		Ok(Value::Array(results))
	}
}
