// Copyright (c) databroker.dev 2025
// This file is licensed under the MIT

use databroker_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
	#[error("io error: {0}")]
	Io(#[from] std::io::Error),
	#[error(transparent)]
	Storage(#[from] StorageError),
	#[error("invalid bind address {addr:?}: {reason}")]
	InvalidBindAddr { addr: String, reason: String },
}
