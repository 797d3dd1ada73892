// Copyright (c) databroker.dev 2025
// This file is licensed under the MIT

//! File-tree adapter: one JSON file per `(collection, key)`.
//!
//! Layout is `<data_dir>/<collection>_<key>.json` with the value
//! pretty-printed. Deletion unlinks the file. The data directory is
//! created on construction.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use databroker_core::{AdapterOptions, Predicate};
use serde_json::Value;
use tracing::warn;

use crate::adapter::{
	DeleteReceipt, QueryHit, SetReceipt, StorageAdapter, StorageError, StorageResult,
};

pub struct FileAdapter {
	data_dir: PathBuf,
}

impl FileAdapter {
	/// Open (and create, if needed) the data directory.
	pub fn new(data_dir: impl Into<PathBuf>) -> StorageResult<Self> {
		let data_dir = data_dir.into();
		std::fs::create_dir_all(&data_dir)?;
		Ok(Self { data_dir })
	}

	pub fn data_dir(&self) -> &Path {
		&self.data_dir
	}

	fn entry_path(&self, collection: &str, key: &str) -> StorageResult<PathBuf> {
		validate_name("collection", collection)?;
		validate_name("key", key)?;
		Ok(self.data_dir.join(format!("{collection}_{key}.json")))
	}
}

/// Collection and key become part of a file name; separators would let a
/// key escape the data directory.
fn validate_name(what: &'static str, name: &str) -> StorageResult<()> {
	if name.is_empty() || name.contains(['/', '\\', '\0']) || name == "." || name == ".." {
		return Err(StorageError::InvalidName {
			what,
			name: name.to_string(),
		});
	}
	Ok(())
}

#[async_trait]
impl StorageAdapter for FileAdapter {
	fn name(&self) -> &'static str {
		"file"
	}

	async fn get(
		&self,
		collection: &str,
		key: &str,
		_options: &AdapterOptions,
	) -> StorageResult<Option<Value>> {
		let path = self.entry_path(collection, key)?;
		match tokio::fs::read_to_string(&path).await {
			Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
			Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
			Err(e) => Err(e.into()),
		}
	}

	async fn set(
		&self,
		collection: &str,
		key: &str,
		value: Value,
		_options: &AdapterOptions,
	) -> StorageResult<SetReceipt> {
		let path = self.entry_path(collection, key)?;
		let contents = serde_json::to_string_pretty(&value)?;
		tokio::fs::write(&path, contents).await?;
		Ok(SetReceipt::new(key))
	}

	async fn delete(
		&self,
		collection: &str,
		key: &str,
		_options: &AdapterOptions,
	) -> StorageResult<DeleteReceipt> {
		let path = self.entry_path(collection, key)?;
		match tokio::fs::remove_file(&path).await {
			Ok(()) => Ok(DeleteReceipt::new(key)),
			Err(e) if e.kind() == ErrorKind::NotFound => Ok(DeleteReceipt::new(key)),
			Err(e) => Err(e.into()),
		}
	}

	async fn query(
		&self,
		collection: &str,
		predicate: &Predicate,
		_options: &AdapterOptions,
	) -> StorageResult<Vec<QueryHit>> {
		validate_name("collection", collection)?;
		let prefix = format!("{collection}_");

		let mut hits = Vec::new();
		let mut dir = tokio::fs::read_dir(&self.data_dir).await?;
		while let Some(entry) = dir.next_entry().await? {
			let file_name = entry.file_name();
			let Some(name) = file_name.to_str() else {
				continue;
			};
			let Some(key) =
				name.strip_prefix(&prefix).and_then(|rest| rest.strip_suffix(".json"))
			else {
				continue;
			};

			let contents = match tokio::fs::read_to_string(entry.path()).await {
				Ok(contents) => contents,
				Err(e) if e.kind() == ErrorKind::NotFound => continue,
				Err(e) => return Err(e.into()),
			};
			let value: Value = match serde_json::from_str(&contents) {
				Ok(value) => value,
				Err(e) => {
					// A corrupt entry should not hide the rest of
					// the collection.
					warn!(file = name, error = %e, "skipping unreadable entry");
					continue;
				}
			};

			if predicate.matches(&value) {
				hits.push(QueryHit::new(key, &value));
			}
		}

		// Directory enumeration order is platform dependent; declared
		// order is ascending key.
		hits.sort_by(|a, b| a.key.cmp(&b.key));
		Ok(hits)
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;
	use tempfile::tempdir;

	use super::*;

	fn options() -> AdapterOptions {
		AdapterOptions::default()
	}

	#[tokio::test]
	async fn test_set_writes_expected_layout() {
		let dir = tempdir().unwrap();
		let adapter = FileAdapter::new(dir.path().join("data")).unwrap();

		adapter.set("cart", "u1", json!({"total": 7}), &options()).await.unwrap();

		let path = dir.path().join("data").join("cart_u1.json");
		let on_disk = std::fs::read_to_string(&path).unwrap();
		// Pretty-printed JSON.
		assert!(on_disk.contains('\n'));
		assert_eq!(serde_json::from_str::<Value>(&on_disk).unwrap(), json!({"total": 7}));
	}

	#[tokio::test]
	async fn test_get_missing_is_none() {
		let dir = tempdir().unwrap();
		let adapter = FileAdapter::new(dir.path()).unwrap();
		assert_eq!(adapter.get("cart", "nope", &options()).await.unwrap(), None);
	}

	#[tokio::test]
	async fn test_delete_unlinks_and_is_idempotent() {
		let dir = tempdir().unwrap();
		let adapter = FileAdapter::new(dir.path()).unwrap();

		adapter.set("c", "k", json!(1), &options()).await.unwrap();
		adapter.delete("c", "k", &options()).await.unwrap();
		assert!(!dir.path().join("c_k.json").exists());

		adapter.delete("c", "k", &options()).await.unwrap();
	}

	#[tokio::test]
	async fn test_query_filters_prefix_and_predicate() {
		let dir = tempdir().unwrap();
		let adapter = FileAdapter::new(dir.path()).unwrap();

		adapter.set("users", "b", json!({"role": "admin"}), &options()).await.unwrap();
		adapter.set("users", "a", json!({"role": "admin"}), &options()).await.unwrap();
		adapter.set("users", "c", json!({"role": "guest"}), &options()).await.unwrap();
		adapter.set("carts", "a", json!({"role": "admin"}), &options()).await.unwrap();

		let predicate: Predicate = [("role".to_string(), json!("admin"))].into();
		let hits = adapter.query("users", &predicate, &options()).await.unwrap();
		let keys: Vec<&str> = hits.iter().map(|h| h.key.as_str()).collect();
		assert_eq!(keys, ["a", "b"]);
	}

	#[tokio::test]
	async fn test_query_skips_corrupt_files() {
		let dir = tempdir().unwrap();
		let adapter = FileAdapter::new(dir.path()).unwrap();

		adapter.set("c", "good", json!({"x": 1}), &options()).await.unwrap();
		std::fs::write(dir.path().join("c_bad.json"), "{oops").unwrap();

		let hits = adapter.query("c", &Predicate::default(), &options()).await.unwrap();
		assert_eq!(hits.len(), 1);
		assert_eq!(hits[0].key, "good");
	}

	#[tokio::test]
	async fn test_path_separators_rejected() {
		let dir = tempdir().unwrap();
		let adapter = FileAdapter::new(dir.path()).unwrap();

		let err = adapter.get("c", "../../etc/passwd", &options()).await.unwrap_err();
		assert!(matches!(err, StorageError::InvalidName { what: "key", .. }));

		let err = adapter.set("a/b", "k", json!(1), &options()).await.unwrap_err();
		assert!(matches!(err, StorageError::InvalidName { what: "collection", .. }));
	}

	#[tokio::test]
	async fn test_data_dir_auto_created() {
		let dir = tempdir().unwrap();
		let nested = dir.path().join("a").join("b");
		let adapter = FileAdapter::new(&nested).unwrap();
		assert!(nested.is_dir());
		assert_eq!(adapter.data_dir(), nested.as_path());
	}
}
