// Copyright (c) databroker.dev 2025
// This file is licensed under the MIT

//! Broker server: accept loop, per-connection tasks and the keep-alive
//! sweeper.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use databroker_core::{now_millis, Platform, ServerMessage, Welcome};
use databroker_storage::{FileAdapter, MemoryAdapter, SqliteAdapter, StorageAdapter};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{
	ErrorResponse, Request, Response,
};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::BrokerConfig;
use crate::dispatch::Dispatcher;
use crate::error::BrokerError;
use crate::session::{Session, SessionRegistry};
use crate::subscription::SubscriptionRegistry;

#[derive(Default)]
struct Stats {
	total_connections: AtomicU64,
	frames_in: AtomicU64,
}

/// A point-in-time view of the broker's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
	pub total_connections: u64,
	pub active_connections: u64,
	pub frames_in: u64,
}

/// Handle for interacting with a running broker from outside
/// [`Broker::serve`].
#[derive(Clone)]
pub struct ShutdownHandle {
	shutdown: Arc<Notify>,
	stats: Arc<Stats>,
	sessions: Arc<SessionRegistry>,
}

impl ShutdownHandle {
	/// Stop accepting connections and terminate every live session.
	pub fn shutdown(&self) {
		self.shutdown.notify_one();
	}

	pub fn stats(&self) -> StatsSnapshot {
		StatsSnapshot {
			total_connections: self.stats.total_connections.load(Ordering::Relaxed),
			active_connections: self.sessions.len() as u64,
			frames_in: self.stats.frames_in.load(Ordering::Relaxed),
		}
	}
}

pub struct Broker {
	config: BrokerConfig,
	listener: TcpListener,
	sessions: Arc<SessionRegistry>,
	subscriptions: Arc<SubscriptionRegistry>,
	dispatcher: Arc<Dispatcher>,
	stats: Arc<Stats>,
	shutdown: Arc<Notify>,
}

impl Broker {
	/// Bind the listener and wire the storage adapters. Defaults:
	/// browser sessions get the in-memory store, react-native the
	/// embedded sqlite store, server runtimes the file tree, anything
	/// else falls back to memory.
	pub async fn bind(config: BrokerConfig) -> Result<Self, BrokerError> {
		let addr: SocketAddr =
			config.bind_addr.parse().map_err(|e: std::net::AddrParseError| {
				BrokerError::InvalidBindAddr {
					addr: config.bind_addr.clone(),
					reason: e.to_string(),
				}
			})?;

		let socket = match addr {
			SocketAddr::V4(_) => TcpSocket::new_v4()?,
			SocketAddr::V6(_) => TcpSocket::new_v6()?,
		};
		// Lets a restarted broker rebind while old connections drain.
		socket.set_reuseaddr(true)?;
		socket.bind(addr)?;
		let listener = socket.listen(1024)?;

		let mut adapters = config.adapters.clone();
		let fallback: Option<Arc<dyn StorageAdapter>> = if config.default_adapters {
			std::fs::create_dir_all(&config.data_dir).map_err(BrokerError::Io)?;
			let memory: Arc<dyn StorageAdapter> = Arc::new(MemoryAdapter::new());
			adapters.entry(Platform::Browser).or_insert_with(|| Arc::clone(&memory));
			if !adapters.contains_key(&Platform::ReactNative) {
				adapters.insert(
					Platform::ReactNative,
					Arc::new(SqliteAdapter::new(&config.data_dir)?),
				);
			}
			if !adapters.contains_key(&Platform::Server) {
				adapters
					.insert(Platform::Server, Arc::new(FileAdapter::new(&config.data_dir)?));
			}
			Some(memory)
		} else {
			None
		};

		let sessions = Arc::new(SessionRegistry::default());
		let subscriptions = Arc::new(SubscriptionRegistry::default());
		let dispatcher = Arc::new(Dispatcher::new(
			adapters,
			fallback,
			Arc::clone(&sessions),
			Arc::clone(&subscriptions),
		));

		Ok(Self {
			config,
			listener,
			sessions,
			subscriptions,
			dispatcher,
			stats: Arc::new(Stats::default()),
			shutdown: Arc::new(Notify::new()),
		})
	}

	/// The actually bound address; useful with port 0.
	pub fn local_addr(&self) -> Result<SocketAddr, BrokerError> {
		Ok(self.listener.local_addr()?)
	}

	pub fn handle(&self) -> ShutdownHandle {
		ShutdownHandle {
			shutdown: Arc::clone(&self.shutdown),
			stats: Arc::clone(&self.stats),
			sessions: Arc::clone(&self.sessions),
		}
	}

	/// Run the accept loop until [`ShutdownHandle::shutdown`] is called.
	pub async fn serve(self) -> Result<(), BrokerError> {
		let Broker {
			config,
			listener,
			sessions,
			subscriptions,
			dispatcher,
			stats,
			shutdown,
		} = self;

		info!(addr = %listener.local_addr()?, "broker listening");

		let sweeper = spawn_sweeper(Arc::clone(&sessions), config.keepalive_interval);

		loop {
			tokio::select! {
				accepted = listener.accept() => match accepted {
					Ok((stream, peer)) => {
						let connection = ConnectionContext {
							dispatcher: Arc::clone(&dispatcher),
							sessions: Arc::clone(&sessions),
							subscriptions: Arc::clone(&subscriptions),
							stats: Arc::clone(&stats),
							outbound_buffer: config.outbound_buffer,
						};
						tokio::spawn(async move {
							if let Err(e) = handle_connection(stream, peer, connection).await {
								debug!(%peer, error = %e, "connection ended with error");
							}
						});
					}
					Err(e) => {
						warn!(error = %e, "failed to accept connection");
					}
				},
				_ = shutdown.notified() => break,
			}
		}

		sweeper.abort();
		for session in sessions.snapshot() {
			session.terminate();
		}
		info!("broker stopped");
		Ok(())
	}
}

fn spawn_sweeper(
	sessions: Arc<SessionRegistry>,
	period: std::time::Duration,
) -> JoinHandle<()> {
	tokio::spawn(async move {
		let start = tokio::time::Instant::now() + period;
		let mut ticker = tokio::time::interval_at(start, period);
		loop {
			ticker.tick().await;
			let terminated = sessions.sweep();
			if terminated > 0 {
				debug!(terminated, "keep-alive sweep terminated sessions");
			}
		}
	})
}

struct ConnectionContext {
	dispatcher: Arc<Dispatcher>,
	sessions: Arc<SessionRegistry>,
	subscriptions: Arc<SubscriptionRegistry>,
	stats: Arc<Stats>,
	outbound_buffer: usize,
}

async fn handle_connection(
	stream: TcpStream,
	peer: SocketAddr,
	context: ConnectionContext,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
	let mut platform_header: Option<String> = None;
	let mut user_agent: Option<String> = None;

	let websocket = tokio_tungstenite::accept_hdr_async(
		stream,
		|request: &Request, response: Response| -> Result<Response, ErrorResponse> {
			platform_header = header_value(request, "x-platform");
			user_agent = header_value(request, "user-agent");
			Ok(response)
		},
	)
	.await?;

	let platform = Platform::detect(platform_header.as_deref(), user_agent.as_deref());
	let client_id = Uuid::new_v4().to_string();
	info!(%peer, %client_id, %platform, "connection established");

	let (outbound_tx, mut outbound_rx) = mpsc::channel::<Message>(context.outbound_buffer);
	let session = Arc::new(Session::new(client_id.clone(), platform.clone(), outbound_tx));
	context.sessions.register(Arc::clone(&session));
	context.stats.total_connections.fetch_add(1, Ordering::Relaxed);

	let (mut sink, mut inbound) = websocket.split();

	// Writer task: the sole owner of the sink. Ends when the outbound
	// queue closes or after flushing a close frame.
	let writer = tokio::spawn(async move {
		while let Some(message) = outbound_rx.recv().await {
			let closing = matches!(message, Message::Close(_));
			if sink.send(message).await.is_err() {
				break;
			}
			if closing {
				break;
			}
		}
		let _ = sink.close().await;
	});

	// The welcome envelope is queued before anything else can target
	// this session.
	session.send(&ServerMessage::ConnectionEstablished(Welcome {
		client_id: client_id.clone(),
		platform: platform.clone(),
		capabilities: platform.capabilities().iter().map(|s| s.to_string()).collect(),
		timestamp: now_millis(),
	}));

	loop {
		tokio::select! {
			frame = inbound.next() => match frame {
				Some(Ok(Message::Text(text))) => {
					context.stats.frames_in.fetch_add(1, Ordering::Relaxed);
					context.dispatcher.handle_frame(&session, text.as_str()).await;
				}
				Some(Ok(Message::Pong(_))) => session.mark_alive(true),
				Some(Ok(Message::Close(_))) | None => break,
				// Pings are answered by the protocol layer; binary
				// frames are not part of this protocol.
				Some(Ok(_)) => {}
				Some(Err(e)) => {
					debug!(%client_id, error = %e, "socket error");
					break;
				}
			},
			_ = session.closed() => {
				// Keep-alive expiry or broker shutdown.
				session.send_raw(Message::Close(Some(CloseFrame {
					code: CloseCode::Away,
					reason: "broker closing session".into(),
				})));
				break;
			}
		}
	}

	context.sessions.remove(&client_id);
	context.subscriptions.remove_session(&client_id);
	info!(%client_id, "connection closed");

	// Dropping the session drops the outbound sender, which lets the
	// writer flush and exit on its own.
	drop(session);
	let _ = writer.await;
	Ok(())
}

fn header_value(request: &Request, name: &str) -> Option<String> {
	request.headers().get(name).and_then(|value| value.to_str().ok()).map(str::to_string)
}
