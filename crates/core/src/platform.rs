// Copyright (c) databroker.dev 2025
// This file is licensed under the MIT

//! Client platform model.
//!
//! A connection declares its platform through the `x-platform` header;
//! without one the broker falls back to user-agent sniffing. The
//! capability list advertised in the welcome envelope is a pure function
//! of the detected platform.

use std::fmt;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Platform {
	Browser,
	ReactNative,
	/// A server-side runtime; `nodejs` on the wire.
	Server,
	Other(String),
}

impl Platform {
	/// Resolve the platform from handshake hints. An explicit
	/// `x-platform` header wins; otherwise the user-agent is sniffed.
	pub fn detect(header: Option<&str>, user_agent: Option<&str>) -> Self {
		if let Some(name) = header {
			let name = name.trim();
			if !name.is_empty() {
				return Self::from_name(name);
			}
		}
		match user_agent {
			Some(ua) if ua.contains("React Native") => Platform::ReactNative,
			Some(ua) if ua.contains("Mozilla") || ua.contains("Chrome") => Platform::Browser,
			_ => Platform::Server,
		}
	}

	pub fn from_name(name: &str) -> Self {
		match name {
			"browser" => Platform::Browser,
			"react-native" => Platform::ReactNative,
			"nodejs" => Platform::Server,
			other => Platform::Other(other.to_string()),
		}
	}

	pub fn as_str(&self) -> &str {
		match self {
			Platform::Browser => "browser",
			Platform::ReactNative => "react-native",
			Platform::Server => "nodejs",
			Platform::Other(name) => name,
		}
	}

	/// The storage mechanisms available to this platform. Fixed table,
	/// independent of broker configuration.
	pub fn capabilities(&self) -> &'static [&'static str] {
		match self {
			Platform::Browser => &["localStorage", "indexedDB", "sessionStorage"],
			Platform::ReactNative => &["asyncStorage", "sqlite", "secureStorage"],
			Platform::Server => &["filesystem", "sqlite", "memory"],
			Platform::Other(_) => &["memory"],
		}
	}
}

impl fmt::Display for Platform {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl Serialize for Platform {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(self.as_str())
	}
}

impl<'de> Deserialize<'de> for Platform {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		struct Visitor;

		impl de::Visitor<'_> for Visitor {
			type Value = Platform;

			fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				f.write_str("a platform name")
			}

			fn visit_str<E: de::Error>(self, value: &str) -> Result<Platform, E> {
				Ok(Platform::from_name(value))
			}
		}

		deserializer.deserialize_str(Visitor)
	}
}
