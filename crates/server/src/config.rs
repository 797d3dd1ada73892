// Copyright (c) databroker.dev 2025
// This file is licensed under the MIT

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use databroker_core::Platform;
use databroker_storage::StorageAdapter;

/// Broker configuration. Builder-style; every knob has a default.
#[derive(Clone)]
pub struct BrokerConfig {
	pub(crate) bind_addr: String,
	pub(crate) data_dir: PathBuf,
	pub(crate) keepalive_interval: Duration,
	pub(crate) outbound_buffer: usize,
	pub(crate) default_adapters: bool,
	pub(crate) adapters: HashMap<Platform, Arc<dyn StorageAdapter>>,
}

impl Default for BrokerConfig {
	fn default() -> Self {
		Self {
			bind_addr: "127.0.0.1:8081".to_string(),
			data_dir: PathBuf::from("data"),
			keepalive_interval: Duration::from_secs(30),
			outbound_buffer: 256,
			default_adapters: true,
			adapters: HashMap::new(),
		}
	}
}

impl BrokerConfig {
	pub fn new() -> Self {
		Self::default()
	}

	/// Full bind address, e.g. `0.0.0.0:8081`.
	pub fn bind_addr(mut self, addr: impl Into<String>) -> Self {
		self.bind_addr = addr.into();
		self
	}

	/// Listen on the given port on localhost. Port 0 picks an ephemeral
	/// port; read it back through `Broker::local_addr`.
	pub fn port(mut self, port: u16) -> Self {
		self.bind_addr = format!("127.0.0.1:{port}");
		self
	}

	/// Directory for the file-tree and sqlite adapters. Auto-created.
	pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
		self.data_dir = dir.into();
		self
	}

	/// Interval of the liveness sweep.
	pub fn keepalive_interval(mut self, interval: Duration) -> Self {
		self.keepalive_interval = interval;
		self
	}

	/// Per-session outbound queue depth. When a slow subscriber fills
	/// its queue, further notifications to it are dropped.
	pub fn outbound_buffer(mut self, depth: usize) -> Self {
		self.outbound_buffer = depth.max(1);
		self
	}

	/// Wire a storage adapter for one platform, replacing the default.
	pub fn adapter(mut self, platform: Platform, adapter: Arc<dyn StorageAdapter>) -> Self {
		self.adapters.insert(platform, adapter);
		self
	}

	/// When disabled, only explicitly wired platforms are served and
	/// requests from any other platform fail with a missing-adapter
	/// error.
	pub fn default_adapters(mut self, enabled: bool) -> Self {
		self.default_adapters = enabled;
		self
	}
}

#[cfg(test)]
mod tests {
	use databroker_storage::MemoryAdapter;

	use super::*;

	#[test]
	fn test_defaults() {
		let config = BrokerConfig::default();
		assert_eq!(config.bind_addr, "127.0.0.1:8081");
		assert_eq!(config.data_dir, PathBuf::from("data"));
		assert_eq!(config.keepalive_interval, Duration::from_secs(30));
		assert_eq!(config.outbound_buffer, 256);
		assert!(config.default_adapters);
		assert!(config.adapters.is_empty());
	}

	#[test]
	fn test_builder() {
		let config = BrokerConfig::new()
			.port(0)
			.data_dir("/tmp/broker")
			.keepalive_interval(Duration::from_secs(5))
			.outbound_buffer(0)
			.adapter(Platform::Browser, Arc::new(MemoryAdapter::new()));

		assert_eq!(config.bind_addr, "127.0.0.1:0");
		assert_eq!(config.data_dir, PathBuf::from("/tmp/broker"));
		assert_eq!(config.keepalive_interval, Duration::from_secs(5));
		// Depth is clamped to at least one slot.
		assert_eq!(config.outbound_buffer, 1);
		assert!(config.adapters.contains_key(&Platform::Browser));
	}
}
