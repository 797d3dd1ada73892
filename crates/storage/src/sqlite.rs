// Copyright (c) databroker.dev 2025
// This file is licensed under the MIT

//! Embedded-database adapter backed by sqlite.
//!
//! Values are stored as JSON text in a single `entries` table keyed by
//! `(collection, key)`. Connections come from a small r2d2 pool and all
//! rusqlite work runs on the blocking thread pool, since this crate's
//! contract is async.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use databroker_core::{now_millis, AdapterOptions, Predicate};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use serde_json::Value;

use crate::adapter::{
	DeleteReceipt, QueryHit, SetReceipt, StorageAdapter, StorageError, StorageResult,
};

#[derive(Clone)]
pub struct SqliteAdapter {
	pool: Arc<Pool<SqliteConnectionManager>>,
}

impl SqliteAdapter {
	/// Open (or create) the database. A directory path gets a
	/// `databroker.db` file inside it.
	pub fn new(path: &Path) -> StorageResult<Self> {
		let db_path = if path.is_dir() {
			path.join("databroker.db")
		} else {
			path.to_path_buf()
		};

		let manager = SqliteConnectionManager::file(db_path).with_flags(
			rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
				| rusqlite::OpenFlags::SQLITE_OPEN_CREATE
				| rusqlite::OpenFlags::SQLITE_OPEN_FULL_MUTEX,
		);

		let pool = Pool::builder().max_size(4).build(manager).map_err(StorageError::backend)?;
		{
			let conn = pool.get().map_err(StorageError::backend)?;
			conn.pragma_update(None, "journal_mode", "WAL").map_err(StorageError::backend)?;
			conn.pragma_update(None, "synchronous", "NORMAL")
				.map_err(StorageError::backend)?;

			conn.execute_batch(
				"CREATE TABLE IF NOT EXISTS entries (
					collection TEXT NOT NULL,
					key        TEXT NOT NULL,
					value      TEXT NOT NULL,
					updated_at INTEGER NOT NULL,
					PRIMARY KEY (collection, key)
				);",
			)
			.map_err(StorageError::backend)?;
		}

		Ok(Self { pool: Arc::new(pool) })
	}

	/// Run one unit of rusqlite work on the blocking pool.
	async fn with_conn<T, F>(&self, work: F) -> StorageResult<T>
	where
		T: Send + 'static,
		F: FnOnce(&rusqlite::Connection) -> StorageResult<T> + Send + 'static,
	{
		let pool = Arc::clone(&self.pool);
		tokio::task::spawn_blocking(move || {
			let conn = pool.get().map_err(StorageError::backend)?;
			work(&conn)
		})
		.await
		.map_err(StorageError::backend)?
	}
}

#[async_trait]
impl StorageAdapter for SqliteAdapter {
	fn name(&self) -> &'static str {
		"sqlite"
	}

	async fn get(
		&self,
		collection: &str,
		key: &str,
		_options: &AdapterOptions,
	) -> StorageResult<Option<Value>> {
		let collection = collection.to_string();
		let key = key.to_string();
		let stored = self
			.with_conn(move |conn| {
				conn.query_row(
					"SELECT value FROM entries WHERE collection = ?1 AND key = ?2",
					params![collection, key],
					|row| row.get::<_, String>(0),
				)
				.optional()
				.map_err(StorageError::backend)
			})
			.await?;

		match stored {
			Some(text) => Ok(Some(serde_json::from_str(&text)?)),
			None => Ok(None),
		}
	}

	async fn set(
		&self,
		collection: &str,
		key: &str,
		value: Value,
		_options: &AdapterOptions,
	) -> StorageResult<SetReceipt> {
		let collection = collection.to_string();
		let stored_key = key.to_string();
		let text = serde_json::to_string(&value)?;
		let updated_at = now_millis();

		self.with_conn(move |conn| {
			conn.execute(
				"INSERT OR REPLACE INTO entries (collection, key, value, updated_at)
				 VALUES (?1, ?2, ?3, ?4)",
				params![collection, stored_key, text, updated_at],
			)
			.map_err(StorageError::backend)?;
			Ok(())
		})
		.await?;

		Ok(SetReceipt {
			key: key.to_string(),
			timestamp: updated_at,
		})
	}

	async fn delete(
		&self,
		collection: &str,
		key: &str,
		_options: &AdapterOptions,
	) -> StorageResult<DeleteReceipt> {
		let collection = collection.to_string();
		let stored_key = key.to_string();

		self.with_conn(move |conn| {
			conn.execute(
				"DELETE FROM entries WHERE collection = ?1 AND key = ?2",
				params![collection, stored_key],
			)
			.map_err(StorageError::backend)?;
			Ok(())
		})
		.await?;

		Ok(DeleteReceipt::new(key))
	}

	async fn query(
		&self,
		collection: &str,
		predicate: &Predicate,
		_options: &AdapterOptions,
	) -> StorageResult<Vec<QueryHit>> {
		let collection = collection.to_string();
		// Declared order: last-modified descending, key as tiebreak.
		let rows = self
			.with_conn(move |conn| {
				let mut stmt = conn
					.prepare(
						"SELECT key, value FROM entries WHERE collection = ?1
						 ORDER BY updated_at DESC, key ASC",
					)
					.map_err(StorageError::backend)?;
				let rows = stmt
					.query_map(params![collection], |row| {
						Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
					})
					.map_err(StorageError::backend)?
					.collect::<Result<Vec<_>, _>>()
					.map_err(StorageError::backend)?;
				Ok(rows)
			})
			.await?;

		let mut hits = Vec::new();
		for (key, text) in rows {
			let value: Value = serde_json::from_str(&text)?;
			if predicate.matches(&value) {
				hits.push(QueryHit::new(key, &value));
			}
		}
		Ok(hits)
	}
}
