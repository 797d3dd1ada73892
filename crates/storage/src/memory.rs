// Copyright (c) databroker.dev 2025
// This file is licensed under the MIT

//! In-memory adapter, the authoritative reference implementation of the
//! storage contract.

use std::ops::Bound;

use async_trait::async_trait;
use crossbeam_skiplist::SkipMap;
use databroker_core::{AdapterOptions, Predicate};
use serde_json::Value;

use crate::adapter::{
	DeleteReceipt, QueryHit, SetReceipt, StorageAdapter, StorageResult,
};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct EntryKey {
	collection: String,
	key: String,
}

impl EntryKey {
	fn new(collection: &str, key: &str) -> Self {
		Self {
			collection: collection.to_string(),
			key: key.to_string(),
		}
	}

	/// Lower bound of a collection's key range.
	fn collection_start(collection: &str) -> Self {
		Self {
			collection: collection.to_string(),
			key: String::new(),
		}
	}
}

/// Lock-free ordered map keyed by `(collection, key)`. The ordering of
/// the map doubles as the declared query order: ascending key.
pub struct MemoryAdapter {
	entries: SkipMap<EntryKey, Value>,
}

impl Default for MemoryAdapter {
	fn default() -> Self {
		Self::new()
	}
}

impl MemoryAdapter {
	pub fn new() -> Self {
		Self { entries: SkipMap::new() }
	}

	/// Number of stored entries across all collections.
	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}
}

#[async_trait]
impl StorageAdapter for MemoryAdapter {
	fn name(&self) -> &'static str {
		"memory"
	}

	async fn get(
		&self,
		collection: &str,
		key: &str,
		_options: &AdapterOptions,
	) -> StorageResult<Option<Value>> {
		Ok(self
			.entries
			.get(&EntryKey::new(collection, key))
			.map(|entry| entry.value().clone()))
	}

	async fn set(
		&self,
		collection: &str,
		key: &str,
		value: Value,
		_options: &AdapterOptions,
	) -> StorageResult<SetReceipt> {
		self.entries.insert(EntryKey::new(collection, key), value);
		Ok(SetReceipt::new(key))
	}

	async fn delete(
		&self,
		collection: &str,
		key: &str,
		_options: &AdapterOptions,
	) -> StorageResult<DeleteReceipt> {
		self.entries.remove(&EntryKey::new(collection, key));
		Ok(DeleteReceipt::new(key))
	}

	async fn query(
		&self,
		collection: &str,
		predicate: &Predicate,
		_options: &AdapterOptions,
	) -> StorageResult<Vec<QueryHit>> {
		let start = EntryKey::collection_start(collection);
		let hits = self
			.entries
			.range((Bound::Included(start), Bound::Unbounded))
			.take_while(|entry| entry.key().collection == collection)
			.filter(|entry| predicate.matches(entry.value()))
			.map(|entry| QueryHit::new(entry.key().key.clone(), entry.value()))
			.collect();
		Ok(hits)
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	fn options() -> AdapterOptions {
		AdapterOptions::default()
	}

	#[tokio::test]
	async fn test_set_get_roundtrip() {
		let adapter = MemoryAdapter::new();
		let value = json!({"items": [], "total": 0});

		let receipt = adapter.set("cart", "u1", value.clone(), &options()).await.unwrap();
		assert_eq!(receipt.key, "u1");
		assert!(receipt.timestamp > 0);

		assert_eq!(adapter.get("cart", "u1", &options()).await.unwrap(), Some(value));
		assert_eq!(adapter.get("cart", "u2", &options()).await.unwrap(), None);
	}

	#[tokio::test]
	async fn test_set_overwrites_silently() {
		let adapter = MemoryAdapter::new();
		adapter.set("c", "k", json!(1), &options()).await.unwrap();
		adapter.set("c", "k", json!(2), &options()).await.unwrap();
		assert_eq!(adapter.get("c", "k", &options()).await.unwrap(), Some(json!(2)));
		assert_eq!(adapter.len(), 1);
	}

	#[tokio::test]
	async fn test_delete_is_idempotent() {
		let adapter = MemoryAdapter::new();
		adapter.set("c", "k", json!(true), &options()).await.unwrap();

		let receipt = adapter.delete("c", "k", &options()).await.unwrap();
		assert_eq!(receipt.deleted, "k");
		assert_eq!(adapter.get("c", "k", &options()).await.unwrap(), None);

		// Missing key still succeeds.
		adapter.delete("c", "k", &options()).await.unwrap();
		adapter.delete("c", "never-existed", &options()).await.unwrap();
	}

	#[tokio::test]
	async fn test_query_scopes_to_collection() {
		let adapter = MemoryAdapter::new();
		adapter.set("users", "a", json!({"role": "admin"}), &options()).await.unwrap();
		adapter.set("users", "b", json!({"role": "guest"}), &options()).await.unwrap();
		adapter.set("carts", "a", json!({"role": "admin"}), &options()).await.unwrap();

		let hits = adapter.query("users", &Predicate::default(), &options()).await.unwrap();
		assert_eq!(hits.len(), 2);
		// Declared order: ascending key.
		assert_eq!(hits[0].key, "a");
		assert_eq!(hits[1].key, "b");
	}

	#[tokio::test]
	async fn test_query_applies_predicate() {
		let adapter = MemoryAdapter::new();
		adapter
			.set("users", "a", json!({"role": "admin", "age": 40}), &options())
			.await
			.unwrap();
		adapter
			.set("users", "b", json!({"role": "admin", "age": 25}), &options())
			.await
			.unwrap();
		adapter.set("users", "c", json!({"role": "guest"}), &options()).await.unwrap();

		let predicate: Predicate =
			[("role".to_string(), json!("admin")), ("age".to_string(), json!(40))].into();
		let hits = adapter.query("users", &predicate, &options()).await.unwrap();
		assert_eq!(hits.len(), 1);
		assert_eq!(hits[0].key, "a");
		assert_eq!(hits[0].fields.get("age"), Some(&json!(40)));
	}

	#[tokio::test]
	async fn test_unknown_options_ignored() {
		let adapter = MemoryAdapter::new();
		let options: AdapterOptions =
			serde_json::from_value(json!({"useIndexedDB": true, "whatever": [1]})).unwrap();
		adapter.set("c", "k", json!(1), &options).await.unwrap();
		assert_eq!(adapter.get("c", "k", &options).await.unwrap(), Some(json!(1)));
	}
}
