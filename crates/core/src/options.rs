// Copyright (c) databroker.dev 2025
// This file is licensed under the MIT

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Free-form configuration carrier passed through to storage adapters.
///
/// Hints like `{"useIndexedDB": true}` are adapter-specific; an adapter
/// must ignore hints it does not understand rather than fail.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AdapterOptions(pub Map<String, Value>);

impl AdapterOptions {
	/// True when the named hint is present and set to boolean `true`.
	pub fn flag(&self, name: &str) -> bool {
		matches!(self.0.get(name), Some(Value::Bool(true)))
	}

	pub fn get(&self, name: &str) -> Option<&Value> {
		self.0.get(name)
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}

/// A flat `field -> expected scalar` map; a stored value matches when
/// every listed field equals its expected value. The empty predicate
/// matches everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Predicate(pub Map<String, Value>);

impl Predicate {
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	/// Conjunctive field equality against a stored value. Values that
	/// are not JSON objects carry no fields, so they only match the
	/// empty predicate.
	pub fn matches(&self, value: &Value) -> bool {
		self.0.iter().all(|(field, expected)| value.get(field) == Some(expected))
	}
}

impl<const N: usize> From<[(String, Value); N]> for Predicate {
	fn from(fields: [(String, Value); N]) -> Self {
		Self(Map::from_iter(fields))
	}
}
