// Copyright (c) databroker.dev 2025
// This file is licensed under the MIT

use async_trait::async_trait;
use databroker_core::{now_millis, AdapterOptions, Predicate};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub type StorageResult<T> = Result<T, StorageError>;

/// Adapter failures are always recoverable at the broker boundary: they
/// are reported to the caller and never crash the broker.
#[derive(Debug, Error)]
pub enum StorageError {
	#[error("io error: {0}")]
	Io(#[from] std::io::Error),
	#[error("stored value is not valid JSON: {0}")]
	Corrupt(#[from] serde_json::Error),
	#[error("{0}")]
	Backend(String),
	#[error("invalid {what}: {name:?}")]
	InvalidName { what: &'static str, name: String },
}

impl StorageError {
	pub(crate) fn backend(err: impl std::fmt::Display) -> Self {
		StorageError::Backend(err.to_string())
	}
}

/// Acknowledgement of a completed `set`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetReceipt {
	pub key: String,
	pub timestamp: u64,
}

impl SetReceipt {
	pub fn new(key: impl Into<String>) -> Self {
		Self {
			key: key.into(),
			timestamp: now_millis(),
		}
	}
}

/// Acknowledgement of a completed `delete`. Deleting a missing key is a
/// success, so a receipt says nothing about prior existence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteReceipt {
	pub deleted: String,
}

impl DeleteReceipt {
	pub fn new(key: impl Into<String>) -> Self {
		Self { deleted: key.into() }
	}
}

/// One query match, serialized as `{key, ...fields}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryHit {
	pub key: String,
	#[serde(flatten)]
	pub fields: Map<String, Value>,
}

impl QueryHit {
	/// Spread the fields of an object value beside the key. Values that
	/// are not objects contribute no fields.
	pub fn new(key: impl Into<String>, value: &Value) -> Self {
		Self {
			key: key.into(),
			fields: value.as_object().cloned().unwrap_or_default(),
		}
	}
}

/// The uniform contract every storage backend presents to the broker.
///
/// Implementations must treat `options` as advisory and ignore hints
/// they do not understand. Query ordering is unspecified by the
/// contract but must be stable per adapter; each implementation
/// documents the order it declares.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
	/// Backend name used in logs and diagnostics.
	fn name(&self) -> &'static str;

	/// Fetch a value. A missing key is `Ok(None)`, never an error.
	async fn get(
		&self,
		collection: &str,
		key: &str,
		options: &AdapterOptions,
	) -> StorageResult<Option<Value>>;

	/// Store a value, silently overwriting any previous one. No schema
	/// checks are applied.
	async fn set(
		&self,
		collection: &str,
		key: &str,
		value: Value,
		options: &AdapterOptions,
	) -> StorageResult<SetReceipt>;

	/// Remove a value. Idempotent: deleting a missing key succeeds.
	async fn delete(
		&self,
		collection: &str,
		key: &str,
		options: &AdapterOptions,
	) -> StorageResult<DeleteReceipt>;

	/// Return every entry of the collection whose value matches the
	/// predicate, in the adapter's declared stable order.
	async fn query(
		&self,
		collection: &str,
		predicate: &Predicate,
		options: &AdapterOptions,
	) -> StorageResult<Vec<QueryHit>>;
}
