// Copyright (c) databroker.dev 2025
// This file is licensed under the MIT

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ClientError {
	/// The transport did not reach the open state in time.
	#[error("Connection timeout")]
	ConnectTimeout,
	/// No response arrived before the request timeout; the pending
	/// entry has been removed and a late response will be ignored.
	#[error("Request timeout")]
	RequestTimeout,
	/// The connection dropped while the request was pending, or no
	/// connection exists.
	#[error("Connection lost")]
	Disconnected,
	/// The client was closed by the application.
	#[error("client is closed")]
	Closed,
	/// The broker answered with an error envelope.
	#[error("{0}")]
	Server(String),
	/// A response arrived but did not have the promised shape.
	#[error("unexpected response shape: {0}")]
	UnexpectedResponse(String),
	#[error("transport error: {0}")]
	Transport(String),
}
