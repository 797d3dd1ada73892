// Copyright (c) databroker.dev 2025
// This file is licensed under the MIT

//! Storage backends for the broker.
//!
//! Every backend implements the same four-operation [`StorageAdapter`]
//! contract over a `(collection, key)` namespace. The broker selects one
//! adapter per client platform and never touches a backing store
//! directly.

pub use adapter::{
	DeleteReceipt, QueryHit, SetReceipt, StorageAdapter, StorageError, StorageResult,
};
pub use file::FileAdapter;
pub use memory::MemoryAdapter;
pub use sqlite::SqliteAdapter;

mod adapter;
mod file;
mod memory;
mod sqlite;
