// Copyright (c) databroker.dev 2025
// This file is licensed under the MIT

//! The reconnecting client session.
//!
//! One writer task drains an outbound queue into the socket; one reader
//! task routes inbound frames. Responses complete waiters in the pending
//! table; the table has a single-owner discipline: whoever removes an
//! entry (the reader on arrival, or the request future on timeout)
//! finishes it, so the two paths never race.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use databroker_core::{
	decode_server, now_millis, AdapterOptions, BatchOperation, BatchRequest, DeleteRequest,
	GetRequest, PingRequest, Predicate, QueryRequest, RequestEnvelope, RequestPayload,
	Response, ServerMessage, SetRequest, SubscribeRequest, UnsubscribeRequest,
	UpdateNotification, WILDCARD,
};
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Message, Utf8Bytes};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::event::ClientEvent;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type UpdateCallback = dyn Fn(&UpdateNotification) + Send + Sync;
type PendingWaiter = oneshot::Sender<Result<Value, ClientError>>;

/// Connection lifecycle. `Ready` means the welcome envelope arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
	Idle,
	Connecting,
	Open,
	Ready,
	Closing,
	Closed,
}

/// Backoff schedule: attempt `n` waits `base * 1.5^(n-1)`.
pub(crate) fn reconnect_delay(base: Duration, attempt: u32) -> Duration {
	let factor = 1.5_f64.powi(attempt.saturating_sub(1) as i32);
	Duration::from_millis((base.as_millis() as f64 * factor).round() as u64)
}

struct ClientInner {
	config: ClientConfig,
	state: RwLock<ConnectionState>,
	next_request_id: AtomicU64,
	pending: Mutex<HashMap<u64, PendingWaiter>>,
	outbound: RwLock<Option<mpsc::UnboundedSender<Message>>>,
	events: broadcast::Sender<ClientEvent>,
	callbacks: RwLock<HashMap<(String, String), Arc<UpdateCallback>>>,
	client_id: RwLock<Option<String>>,
	closed: AtomicBool,
	/// Connection epoch; lets a superseded reader task recognize that a
	/// newer connection took over before it runs disconnect handling.
	generation: AtomicU64,
}

impl ClientInner {
	fn emit(&self, event: ClientEvent) {
		let _ = self.events.send(event);
	}

	fn set_state(&self, state: ConnectionState) {
		*self.state.write() = state;
	}

	fn state(&self) -> ConnectionState {
		*self.state.read()
	}

	/// Fail every pending request. Used on disconnect and close; failed
	/// requests are not replayed.
	fn fail_pending(&self, error: &ClientError) {
		let waiters: Vec<PendingWaiter> =
			self.pending.lock().drain().map(|(_, waiter)| waiter).collect();
		for waiter in waiters {
			let _ = waiter.send(Err(error.clone()));
		}
	}

	fn complete(&self, request_id: u64, result: Result<Value, ClientError>) {
		match self.pending.lock().remove(&request_id) {
			Some(waiter) => {
				let _ = waiter.send(result);
			}
			None => debug!(request_id, "response for unknown request id, ignoring"),
		}
	}

	fn complete_response(&self, response: Response) {
		let result = if response.success {
			Ok(response.data.unwrap_or(Value::Null))
		} else {
			Err(ClientError::Server(
				response.error.unwrap_or_else(|| "request failed".to_string()),
			))
		};
		self.complete(response.request_id, result);
	}

	fn handle_frame(&self, frame: &str) {
		let message = match decode_server(frame) {
			Ok(message) => message,
			Err(e) => {
				debug!(error = %e, "ignoring undecodable frame");
				return;
			}
		};

		match message {
			ServerMessage::ConnectionEstablished(welcome) => {
				*self.client_id.write() = Some(welcome.client_id.clone());
				self.set_state(ConnectionState::Ready);
				self.emit(ClientEvent::Ready {
					client_id: welcome.client_id,
					platform: welcome.platform.to_string(),
					capabilities: welcome.capabilities,
				});
			}
			ServerMessage::SubscriptionUpdate(update) => self.dispatch_update(update),
			ServerMessage::Error(notice) => match notice.request_id {
				Some(request_id) => {
					self.complete(request_id, Err(ClientError::Server(notice.error)));
				}
				None => self.emit(ClientEvent::Error(notice.error)),
			},
			ServerMessage::GetResponse(response)
			| ServerMessage::SetResponse(response)
			| ServerMessage::DeleteResponse(response)
			| ServerMessage::QueryResponse(response)
			| ServerMessage::BatchResponse(response)
			| ServerMessage::PingResponse(response)
			| ServerMessage::SubscribeResponse(response)
			| ServerMessage::UnsubscribeResponse(response) => self.complete_response(response),
		}
	}

	/// Invoke the callbacks registered for the exact and wildcard
	/// pattern; both fire when both exist.
	fn dispatch_update(&self, update: UpdateNotification) {
		let mut keys = vec![update.key.as_str()];
		if update.key != WILDCARD {
			keys.push(WILDCARD);
		}
		let matched: Vec<Arc<UpdateCallback>> = {
			let callbacks = self.callbacks.read();
			keys.iter()
				.filter_map(|key| {
					callbacks.get(&(update.collection.clone(), key.to_string()))
				})
				.map(Arc::clone)
				.collect()
		};
		for callback in matched {
			callback(&update);
		}
		self.emit(ClientEvent::DataUpdate(update));
	}

	fn establish(
		self: &Arc<Self>,
	) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), ClientError>> + Send + '_>>
	{
		Box::pin(self.establish_inner())
	}

	async fn establish_inner(self: &Arc<Self>) -> Result<(), ClientError> {
		self.set_state(ConnectionState::Connecting);

		let mut request = self
			.config
			.url
			.as_str()
			.into_client_request()
			.map_err(|e| ClientError::Transport(e.to_string()))?;
		if let Some(platform) = &self.config.platform {
			let value = HeaderValue::from_str(platform)
				.map_err(|e| ClientError::Transport(e.to_string()))?;
			request.headers_mut().insert("x-platform", value);
		}

		let (websocket, _) = match timeout(self.config.connect_timeout, connect_async(request))
			.await
		{
			Ok(Ok(connected)) => connected,
			Ok(Err(e)) => return Err(ClientError::Transport(e.to_string())),
			Err(_) => return Err(ClientError::ConnectTimeout),
		};

		let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
		let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
		*self.outbound.write() = Some(outbound_tx);
		self.set_state(ConnectionState::Open);
		self.emit(ClientEvent::Connected);

		let (mut sink, stream) = websocket.split();
		tokio::spawn(async move {
			while let Some(message) = outbound_rx.recv().await {
				if sink.send(message).await.is_err() {
					break;
				}
			}
			let _ = sink.close().await;
		});
		tokio::spawn(run_reader(Arc::clone(self), stream, generation));
		Ok(())
	}
}

async fn run_reader(inner: Arc<ClientInner>, mut stream: SplitStream<WsStream>, generation: u64) {
	// Close code 1000 never triggers a reconnect.
	let mut clean_close = false;
	while let Some(frame) = stream.next().await {
		match frame {
			Ok(Message::Text(text)) => inner.handle_frame(text.as_str()),
			Ok(Message::Close(frame)) => {
				clean_close =
					matches!(&frame, Some(close) if close.code == CloseCode::Normal);
				break;
			}
			Ok(_) => {}
			Err(e) => {
				debug!(error = %e, "socket error");
				break;
			}
		}
	}

	if inner.generation.load(Ordering::Acquire) != generation {
		return;
	}

	*inner.outbound.write() = None;
	inner.fail_pending(&ClientError::Disconnected);
	inner.emit(ClientEvent::Disconnected);

	if clean_close || inner.closed.load(Ordering::Acquire) {
		inner.set_state(ConnectionState::Closed);
		return;
	}

	// Unclean close: enter the backoff loop.
	inner.set_state(ConnectionState::Connecting);
	tokio::spawn(run_reconnect(inner));
}

async fn run_reconnect(inner: Arc<ClientInner>) {
	for attempt in 1..=inner.config.max_reconnect_attempts {
		let delay = reconnect_delay(inner.config.reconnect_interval, attempt);
		debug!(attempt, delay_ms = delay.as_millis() as u64, "reconnect scheduled");
		tokio::time::sleep(delay).await;
		if inner.closed.load(Ordering::Acquire) {
			return;
		}
		match inner.establish().await {
			Ok(()) => return,
			Err(e) => {
				warn!(attempt, error = %e, "reconnect attempt failed");
				inner.emit(ClientEvent::Error(e.to_string()));
			}
		}
	}
	inner.emit(ClientEvent::MaxReconnectAttemptsReached);
	inner.set_state(ConnectionState::Closed);
}

/// A client session to one broker.
///
/// Cheap to clone-share through `Arc` internals; all operations take
/// `&self`.
pub struct BrokerClient {
	inner: Arc<ClientInner>,
}

impl BrokerClient {
	pub fn new(config: ClientConfig) -> Self {
		let (events, _) = broadcast::channel(64);
		Self {
			inner: Arc::new(ClientInner {
				config,
				state: RwLock::new(ConnectionState::Idle),
				next_request_id: AtomicU64::new(0),
				pending: Mutex::new(HashMap::new()),
				outbound: RwLock::new(None),
				events,
				callbacks: RwLock::new(HashMap::new()),
				client_id: RwLock::new(None),
				closed: AtomicBool::new(false),
				generation: AtomicU64::new(0),
			}),
		}
	}

	/// Open the transport. Resolves when the socket is open; the
	/// `Ready` event follows once the welcome envelope arrives.
	pub async fn connect(&self) -> Result<(), ClientError> {
		if self.inner.closed.load(Ordering::Acquire) {
			return Err(ClientError::Closed);
		}
		match self.inner.establish().await {
			Ok(()) => Ok(()),
			Err(e) => {
				self.inner.set_state(ConnectionState::Closed);
				Err(e)
			}
		}
	}

	/// Subscribe to the client's event bus.
	pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
		self.inner.events.subscribe()
	}

	pub fn state(&self) -> ConnectionState {
		self.inner.state()
	}

	/// The id assigned by the broker, once `Ready`.
	pub fn client_id(&self) -> Option<String> {
		self.inner.client_id.read().clone()
	}

	/// Send one request and await its correlated response data.
	pub async fn request(&self, payload: RequestPayload) -> Result<Value, ClientError> {
		let inner = &self.inner;
		if inner.closed.load(Ordering::Acquire) {
			return Err(ClientError::Closed);
		}

		let request_id = inner.next_request_id.fetch_add(1, Ordering::Relaxed) + 1;
		let envelope = RequestEnvelope {
			request_id,
			timestamp: now_millis(),
			payload,
		};
		let text = serde_json::to_string(&envelope)
			.map_err(|e| ClientError::Transport(e.to_string()))?;

		let (waiter_tx, waiter_rx) = oneshot::channel();
		inner.pending.lock().insert(request_id, waiter_tx);

		let Some(sender) = inner.outbound.read().clone() else {
			inner.pending.lock().remove(&request_id);
			return Err(ClientError::Disconnected);
		};
		if sender.send(Message::Text(Utf8Bytes::from(text))).is_err() {
			inner.pending.lock().remove(&request_id);
			return Err(ClientError::Disconnected);
		}

		match timeout(inner.config.request_timeout, waiter_rx).await {
			Ok(Ok(result)) => result,
			Ok(Err(_)) => Err(ClientError::Disconnected),
			Err(_) => {
				inner.pending.lock().remove(&request_id);
				Err(ClientError::RequestTimeout)
			}
		}
	}

	pub async fn get(&self, collection: &str, key: &str) -> Result<Option<Value>, ClientError> {
		let data = self
			.request(RequestPayload::Get(GetRequest {
				collection: collection.to_string(),
				key: key.to_string(),
				options: AdapterOptions::default(),
			}))
			.await?;
		Ok(match data {
			Value::Null => None,
			value => Some(value),
		})
	}

	pub async fn set(
		&self,
		collection: &str,
		key: &str,
		value: Value,
	) -> Result<Value, ClientError> {
		self.request(RequestPayload::Set(SetRequest {
			collection: collection.to_string(),
			key: key.to_string(),
			value,
			options: AdapterOptions::default(),
		}))
		.await
	}

	pub async fn delete(&self, collection: &str, key: &str) -> Result<Value, ClientError> {
		self.request(RequestPayload::Delete(DeleteRequest {
			collection: collection.to_string(),
			key: key.to_string(),
			options: AdapterOptions::default(),
		}))
		.await
	}

	pub async fn query(
		&self,
		collection: &str,
		predicate: Predicate,
	) -> Result<Vec<Value>, ClientError> {
		let data = self
			.request(RequestPayload::Query(QueryRequest {
				collection: collection.to_string(),
				query: predicate,
				options: AdapterOptions::default(),
			}))
			.await?;
		match data {
			Value::Array(hits) => Ok(hits),
			other => Err(ClientError::UnexpectedResponse(other.to_string())),
		}
	}

	pub async fn batch(
		&self,
		operations: Vec<BatchOperation>,
	) -> Result<Vec<Value>, ClientError> {
		let data = self
			.request(RequestPayload::Batch(BatchRequest {
				operations,
				stop_on_error: false,
			}))
			.await?;
		match data {
			Value::Array(results) => Ok(results),
			other => Err(ClientError::UnexpectedResponse(other.to_string())),
		}
	}

	/// Round-trip latency in milliseconds, measured locally.
	pub async fn ping(&self) -> Result<u64, ClientError> {
		let started = Instant::now();
		self.request(RequestPayload::Ping(PingRequest {})).await?;
		Ok(started.elapsed().as_millis() as u64)
	}

	/// Register a local callback for `(collection, key)` updates and
	/// subscribe on the wire. `key` may be the `*` wildcard.
	pub async fn subscribe<F>(
		&self,
		collection: &str,
		key: &str,
		callback: F,
	) -> Result<(), ClientError>
	where
		F: Fn(&UpdateNotification) + Send + Sync + 'static,
	{
		let pattern = (collection.to_string(), key.to_string());
		// Register locally first so an update racing the response is
		// not lost.
		self.inner.callbacks.write().insert(pattern.clone(), Arc::new(callback));

		let subscribed = self
			.request(RequestPayload::Subscribe(SubscribeRequest {
				collection: collection.to_string(),
				key: key.to_string(),
			}))
			.await;
		if let Err(e) = subscribed {
			self.inner.callbacks.write().remove(&pattern);
			return Err(e);
		}
		Ok(())
	}

	pub async fn unsubscribe(&self, collection: &str, key: &str) -> Result<(), ClientError> {
		self.request(RequestPayload::Unsubscribe(UnsubscribeRequest {
			collection: collection.to_string(),
			key: key.to_string(),
		}))
		.await?;
		self.inner
			.callbacks
			.write()
			.remove(&(collection.to_string(), key.to_string()));
		Ok(())
	}

	/// Application-initiated clean close (code 1000): fails anything
	/// pending and never reconnects.
	pub fn close(&self) {
		self.inner.closed.store(true, Ordering::Release);
		self.inner.set_state(ConnectionState::Closing);
		if let Some(sender) = self.inner.outbound.write().take() {
			let _ = sender.send(Message::Close(Some(CloseFrame {
				code: CloseCode::Normal,
				reason: "client closed".into(),
			})));
		}
		self.inner.fail_pending(&ClientError::Disconnected);
		self.inner.set_state(ConnectionState::Closed);
	}
}
