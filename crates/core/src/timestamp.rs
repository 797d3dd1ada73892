// Copyright (c) databroker.dev 2025
// This file is licensed under the MIT

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the UNIX epoch, the timestamp unit used on the
/// wire and in adapter receipts.
pub fn now_millis() -> u64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|elapsed| elapsed.as_millis() as u64)
		.unwrap_or_default()
}
