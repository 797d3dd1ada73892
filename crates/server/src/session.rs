// Copyright (c) databroker.dev 2025
// This file is licensed under the MIT

//! Per-connection session state and the registry of live sessions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use databroker_core::{encode_server, Platform, ServerMessage};
use parking_lot::RwLock;
use tokio::sync::{mpsc, Notify};
use tokio_tungstenite::tungstenite::{Message, Utf8Bytes};
use tracing::{debug, error, warn};

/// One live client connection.
///
/// The session owns the sending half of the connection's outbound queue;
/// the socket writer task drains the other half. Delivery through
/// [`Session::send`] is fire-and-forget: a full queue drops the message
/// instead of blocking the caller.
pub(crate) struct Session {
	id: String,
	platform: Platform,
	alive: AtomicBool,
	outbound: mpsc::Sender<Message>,
	shutdown: Notify,
}

impl Session {
	pub(crate) fn new(id: String, platform: Platform, outbound: mpsc::Sender<Message>) -> Self {
		Self {
			id,
			platform,
			alive: AtomicBool::new(true),
			outbound,
			shutdown: Notify::new(),
		}
	}

	pub(crate) fn id(&self) -> &str {
		&self.id
	}

	pub(crate) fn platform(&self) -> &Platform {
		&self.platform
	}

	/// Enqueue an envelope for this session. Returns whether the
	/// message was queued.
	pub(crate) fn send(&self, message: &ServerMessage) -> bool {
		let text = match encode_server(message) {
			Ok(text) => text,
			Err(e) => {
				// Should not happen for broker-generated envelopes;
				// if it does the session is torn down.
				error!(client_id = %self.id, error = %e, "failed to encode envelope");
				self.terminate();
				return false;
			}
		};
		self.send_raw(Message::Text(Utf8Bytes::from(text)))
	}

	pub(crate) fn send_raw(&self, message: Message) -> bool {
		match self.outbound.try_send(message) {
			Ok(()) => true,
			Err(mpsc::error::TrySendError::Full(_)) => {
				warn!(client_id = %self.id, "outbound queue full, dropping message");
				false
			}
			Err(mpsc::error::TrySendError::Closed(_)) => {
				debug!(client_id = %self.id, "outbound queue closed");
				false
			}
		}
	}

	pub(crate) fn is_alive(&self) -> bool {
		self.alive.load(Ordering::Acquire)
	}

	pub(crate) fn mark_alive(&self, alive: bool) {
		self.alive.store(alive, Ordering::Release);
	}

	/// Ask the connection task to close this session.
	pub(crate) fn terminate(&self) {
		self.shutdown.notify_one();
	}

	/// Resolves once [`Session::terminate`] has been called.
	pub(crate) async fn closed(&self) {
		self.shutdown.notified().await
	}
}

/// All currently live sessions, keyed by client id.
#[derive(Default)]
pub(crate) struct SessionRegistry {
	sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionRegistry {
	pub(crate) fn register(&self, session: Arc<Session>) {
		self.sessions.write().insert(session.id().to_string(), session);
	}

	pub(crate) fn remove(&self, client_id: &str) -> Option<Arc<Session>> {
		self.sessions.write().remove(client_id)
	}

	pub(crate) fn get(&self, client_id: &str) -> Option<Arc<Session>> {
		self.sessions.read().get(client_id).cloned()
	}

	pub(crate) fn len(&self) -> usize {
		self.sessions.read().len()
	}

	pub(crate) fn snapshot(&self) -> Vec<Arc<Session>> {
		self.sessions.read().values().cloned().collect()
	}

	/// One keep-alive pass: sessions that never answered the previous
	/// ping are terminated, everyone else is marked pending and pinged
	/// again. Returns the number of sessions terminated.
	pub(crate) fn sweep(&self) -> usize {
		let mut terminated = 0;
		for session in self.snapshot() {
			if session.is_alive() {
				session.mark_alive(false);
				session.send_raw(Message::Ping(vec![].into()));
			} else {
				warn!(client_id = %session.id(), "session missed keep-alive, terminating");
				session.terminate();
				terminated += 1;
			}
		}
		terminated
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use serde_json::json;

	use super::*;

	fn session_pair(id: &str) -> (Arc<Session>, mpsc::Receiver<Message>) {
		let (tx, rx) = mpsc::channel(4);
		(Arc::new(Session::new(id.to_string(), Platform::Server, tx)), rx)
	}

	#[tokio::test]
	async fn test_send_encodes_text_frame() {
		let (session, mut rx) = session_pair("s1");
		assert!(session.send(&ServerMessage::error(Some(1), "nope")));

		let Message::Text(text) = rx.recv().await.unwrap() else {
			panic!("expected text frame");
		};
		let value: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
		assert_eq!(value["type"], "ERROR");
		assert_eq!(value["requestId"], 1);
	}

	#[tokio::test]
	async fn test_full_queue_drops_without_blocking() {
		let (tx, _rx) = mpsc::channel(1);
		let session = Session::new("s1".into(), Platform::Server, tx);

		assert!(session.send(&ServerMessage::error(None, json!("a").to_string())));
		// Queue depth is one; the second message is dropped, not
		// awaited.
		assert!(!session.send(&ServerMessage::error(None, "b")));
	}

	#[tokio::test]
	async fn test_terminate_resolves_closed() {
		let (session, _rx) = session_pair("s1");
		session.terminate();
		tokio::time::timeout(Duration::from_millis(100), session.closed())
			.await
			.expect("closed() should resolve after terminate()");
	}

	#[tokio::test]
	async fn test_sweep_pings_then_terminates() {
		let registry = SessionRegistry::default();
		let (session, mut rx) = session_pair("s1");
		registry.register(session.clone());

		// First pass: session is alive, gets pinged and marked pending.
		assert_eq!(registry.sweep(), 0);
		assert!(!session.is_alive());
		assert!(matches!(rx.recv().await.unwrap(), Message::Ping(_)));

		// No pong arrived: second pass terminates.
		assert_eq!(registry.sweep(), 1);
		tokio::time::timeout(Duration::from_millis(100), session.closed())
			.await
			.expect("terminated session resolves closed()");
	}

	#[tokio::test]
	async fn test_sweep_spares_ponged_sessions() {
		let registry = SessionRegistry::default();
		let (session, _rx) = session_pair("s1");
		registry.register(session.clone());

		registry.sweep();
		// The connection task does this when a pong arrives.
		session.mark_alive(true);
		assert_eq!(registry.sweep(), 0);
	}

	#[test]
	fn test_registry_register_remove() {
		let registry = SessionRegistry::default();
		let (session, _rx) = session_pair("s1");
		registry.register(session);

		assert_eq!(registry.len(), 1);
		assert!(registry.get("s1").is_some());
		assert!(registry.remove("s1").is_some());
		assert!(registry.get("s1").is_none());
		assert!(registry.remove("s1").is_none());
	}
}
