// Copyright (c) databroker.dev 2025
// This file is licensed under the MIT

use std::time::Duration;

/// Client configuration. Builder-style; every knob has a default.
#[derive(Debug, Clone)]
pub struct ClientConfig {
	pub(crate) url: String,
	pub(crate) platform: Option<String>,
	pub(crate) reconnect_interval: Duration,
	pub(crate) max_reconnect_attempts: u32,
	pub(crate) request_timeout: Duration,
	pub(crate) connect_timeout: Duration,
}

impl ClientConfig {
	pub fn new(url: impl Into<String>) -> Self {
		Self {
			url: url.into(),
			platform: None,
			reconnect_interval: Duration::from_millis(5000),
			max_reconnect_attempts: 10,
			request_timeout: Duration::from_secs(30),
			connect_timeout: Duration::from_secs(10),
		}
	}

	/// Platform name sent as the `x-platform` header; without it the
	/// broker infers a platform from the user agent.
	pub fn platform(mut self, platform: impl Into<String>) -> Self {
		self.platform = Some(platform.into());
		self
	}

	/// Base delay of the reconnect backoff. Attempt `n` waits
	/// `base * 1.5^(n-1)`.
	pub fn reconnect_interval(mut self, interval: Duration) -> Self {
		self.reconnect_interval = interval;
		self
	}

	pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
		self.max_reconnect_attempts = attempts;
		self
	}

	pub fn request_timeout(mut self, timeout: Duration) -> Self {
		self.request_timeout = timeout;
		self
	}

	pub fn connect_timeout(mut self, timeout: Duration) -> Self {
		self.connect_timeout = timeout;
		self
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_defaults() {
		let config = ClientConfig::new("ws://127.0.0.1:8081");
		assert_eq!(config.url, "ws://127.0.0.1:8081");
		assert_eq!(config.platform, None);
		assert_eq!(config.reconnect_interval, Duration::from_millis(5000));
		assert_eq!(config.max_reconnect_attempts, 10);
		assert_eq!(config.request_timeout, Duration::from_secs(30));
		assert_eq!(config.connect_timeout, Duration::from_secs(10));
	}

	#[test]
	fn test_builder() {
		let config = ClientConfig::new("ws://broker")
			.platform("react-native")
			.reconnect_interval(Duration::from_millis(100))
			.max_reconnect_attempts(3)
			.request_timeout(Duration::from_secs(1))
			.connect_timeout(Duration::from_secs(2));

		assert_eq!(config.platform.as_deref(), Some("react-native"));
		assert_eq!(config.reconnect_interval, Duration::from_millis(100));
		assert_eq!(config.max_reconnect_attempts, 3);
		assert_eq!(config.request_timeout, Duration::from_secs(1));
		assert_eq!(config.connect_timeout, Duration::from_secs(2));
	}
}
