// Copyright (c) databroker.dev 2025
// This file is licensed under the MIT

//! Subscription registry and mutation fan-out.
//!
//! The registry is a bidirectional index between `(collection, pattern)`
//! pairs and sessions. Both directions are kept under a single lock so
//! that subscribe, unsubscribe and session teardown stay atomic with
//! respect to concurrent fan-out.

use std::collections::{HashMap, HashSet};

use databroker_core::{now_millis, MutationOp, ServerMessage, UpdateNotification, WILDCARD};
use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

use crate::session::SessionRegistry;

/// A subscription pattern: a literal key or the `*` wildcard within a
/// collection. No richer glob semantics exist.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Pattern {
	pub collection: String,
	pub key: String,
}

impl Pattern {
	pub fn new(collection: impl Into<String>, key: impl Into<String>) -> Self {
		Self {
			collection: collection.into(),
			key: key.into(),
		}
	}

	pub fn is_wildcard(&self) -> bool {
		self.key == WILDCARD
	}
}

#[derive(Default)]
struct Index {
	by_pattern: HashMap<Pattern, HashSet<String>>,
	by_session: HashMap<String, HashSet<Pattern>>,
}

#[derive(Default)]
pub(crate) struct SubscriptionRegistry {
	index: RwLock<Index>,
}

impl SubscriptionRegistry {
	/// Add a subscription. Subscribing twice to the same pattern is a
	/// no-op; returns whether the pattern was newly added.
	pub(crate) fn subscribe(&self, client_id: &str, pattern: Pattern) -> bool {
		let mut index = self.index.write();
		let newly_added = index
			.by_pattern
			.entry(pattern.clone())
			.or_default()
			.insert(client_id.to_string());
		index.by_session.entry(client_id.to_string()).or_default().insert(pattern);
		newly_added
	}

	/// Remove a subscription. Returns false when the session did not
	/// hold it, leaving the registry unperturbed.
	pub(crate) fn unsubscribe(&self, client_id: &str, pattern: &Pattern) -> bool {
		let mut index = self.index.write();

		let held = match index.by_session.get_mut(client_id) {
			Some(patterns) => patterns.remove(pattern),
			None => false,
		};
		if !held {
			return false;
		}
		if index.by_session.get(client_id).is_some_and(HashSet::is_empty) {
			index.by_session.remove(client_id);
		}

		if let Some(sessions) = index.by_pattern.get_mut(pattern) {
			sessions.remove(client_id);
			if sessions.is_empty() {
				index.by_pattern.remove(pattern);
			}
		}
		true
	}

	/// Drop every subscription a session holds. Called on teardown.
	pub(crate) fn remove_session(&self, client_id: &str) {
		let mut index = self.index.write();
		let Some(patterns) = index.by_session.remove(client_id) else {
			return;
		};
		for pattern in patterns {
			if let Some(sessions) = index.by_pattern.get_mut(&pattern) {
				sessions.remove(client_id);
				if sessions.is_empty() {
					index.by_pattern.remove(&pattern);
				}
			}
		}
	}

	/// Sessions subscribed to `(collection, key)` either literally or
	/// through the collection wildcard.
	pub(crate) fn subscribers(&self, collection: &str, key: &str) -> HashSet<String> {
		let index = self.index.read();
		let mut matched = HashSet::new();
		for pattern in [Pattern::new(collection, key), Pattern::new(collection, WILDCARD)] {
			if let Some(sessions) = index.by_pattern.get(&pattern) {
				matched.extend(sessions.iter().cloned());
			}
		}
		matched
	}

	pub(crate) fn subscription_count(&self, client_id: &str) -> usize {
		self.index.read().by_session.get(client_id).map_or(0, HashSet::len)
	}

	/// Fan a mutation out to every matching session except the
	/// originator. Best-effort: a slow or gone subscriber never stalls
	/// the mutating session. Returns the number of queued updates.
	pub(crate) fn notify(
		&self,
		sessions: &SessionRegistry,
		origin: &str,
		collection: &str,
		key: &str,
		operation: MutationOp,
		value: Value,
	) -> usize {
		let mut targets = self.subscribers(collection, key);
		targets.remove(origin);
		if targets.is_empty() {
			return 0;
		}

		let update = ServerMessage::SubscriptionUpdate(UpdateNotification {
			collection: collection.to_string(),
			key: key.to_string(),
			operation,
			value,
			timestamp: now_millis(),
		});

		let mut delivered = 0;
		for client_id in targets {
			if let Some(session) = sessions.get(&client_id) {
				if session.send(&update) {
					delivered += 1;
				}
			}
		}
		debug!(collection, key, ?operation, delivered, "fanned out mutation");
		delivered
	}
}
