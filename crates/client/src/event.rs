// Copyright (c) databroker.dev 2025
// This file is licensed under the MIT

use databroker_core::UpdateNotification;

/// The fixed event set a client emits over its event bus.
///
/// `Connected` fires when the transport opens, `Ready` once the welcome
/// envelope arrives. After an unclean close the client emits
/// `Disconnected` and reconnects on its own; once the configured
/// attempts are exhausted it emits `MaxReconnectAttemptsReached` and
/// stays closed.
#[derive(Debug, Clone)]
pub enum ClientEvent {
	Connected,
	Ready {
		client_id: String,
		platform: String,
		capabilities: Vec<String>,
	},
	Disconnected,
	Error(String),
	DataUpdate(UpdateNotification),
	MaxReconnectAttemptsReached,
}
