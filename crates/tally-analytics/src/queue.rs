// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Durable FIFO of serialized payloads awaiting delivery.
//!
//! Items live in one of two partitions: `pending` (not yet sent) and
//! `inflight` (part of the outstanding request). The durable copy is always
//! `inflight ++ pending`, so a crash while a request is outstanding resends
//! that batch first on the next start.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::storage::SettingsStore;

/// An immutable, ordered snapshot of queued items handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
	items: Vec<String>,
}

impl Batch {
	pub fn items(&self) -> &[String] {
		&self.items
	}

	pub fn len(&self) -> usize {
		self.items.len()
	}

	pub fn is_empty(&self) -> bool {
		self.items.is_empty()
	}

	/// Renders the items as a JSON array. Items are already serialized JSON.
	pub fn to_json_array(&self) -> String {
		format!("[{}]", self.items.join(","))
	}
}

#[derive(Debug)]
pub struct PersistentQueue {
	key: String,
	pending: Vec<String>,
	inflight: Vec<String>,
	store: Arc<dyn SettingsStore>,
}

impl PersistentQueue {
	/// Loads the queue stored under `key`. Unreadable storage starts empty.
	pub fn reload(key: impl Into<String>, store: Arc<dyn SettingsStore>) -> Self {
		let key = key.into();
		let pending = match store.load_string_list(&key) {
			Ok(items) => items,
			Err(e) => {
				warn!(key = %key, error = %e, "Failed to load queued payloads, starting empty");
				Vec::new()
			}
		};

		if !pending.is_empty() {
			debug!(key = %key, count = pending.len(), "Reloaded queued payloads");
		}

		Self {
			key,
			pending,
			inflight: Vec::new(),
			store,
		}
	}

	pub fn key(&self) -> &str {
		&self.key
	}

	/// Appends one payload and writes the queue through to storage.
	pub fn append(&mut self, serialized: String) {
		self.pending.push(serialized);
		self.persist();
	}

	/// Moves every pending item into flight.
	///
	/// Returns `None` when nothing is pending or a batch is already in flight.
	pub fn snapshot_for_send(&mut self) -> Option<Batch> {
		if self.pending.is_empty() || !self.inflight.is_empty() {
			return None;
		}
		self.inflight = std::mem::take(&mut self.pending);
		Some(Batch {
			items: self.inflight.clone(),
		})
	}

	/// Moves only the oldest pending item into flight.
	pub fn snapshot_head_for_send(&mut self) -> Option<Batch> {
		if self.pending.is_empty() || !self.inflight.is_empty() {
			return None;
		}
		let head = self.pending.remove(0);
		self.inflight.push(head);
		Some(Batch {
			items: self.inflight.clone(),
		})
	}

	pub fn on_send_succeeded(&mut self) {
		if self.inflight.is_empty() {
			return;
		}
		debug!(key = %self.key, count = self.inflight.len(), "Delivered queued payloads");
		self.inflight.clear();
		self.persist();
	}

	/// Puts the in-flight items back in front of pending, in their original order.
	pub fn on_send_failed(&mut self) {
		if self.inflight.is_empty() {
			return;
		}
		let mut restored = std::mem::take(&mut self.inflight);
		restored.append(&mut self.pending);
		self.pending = restored;
		self.persist();
	}

	/// Drops all pending items. Items in flight are untouched.
	pub fn clear_pending(&mut self) -> usize {
		let dropped = self.pending.len();
		self.pending.clear();
		self.persist();
		dropped
	}

	/// Writes `inflight ++ pending` to storage. Failures are logged; the
	/// in-memory queue stays authoritative until the next successful write.
	pub fn persist(&self) {
		let mut items = Vec::with_capacity(self.inflight.len() + self.pending.len());
		items.extend(self.inflight.iter().cloned());
		items.extend(self.pending.iter().cloned());

		if let Err(e) = self.store.save_string_list(&self.key, &items) {
			warn!(key = %self.key, count = items.len(), error = %e, "Failed to persist queue");
		}
	}

	pub fn pending(&self) -> &[String] {
		&self.pending
	}

	pub fn inflight(&self) -> &[String] {
		&self.inflight
	}

	pub fn pending_len(&self) -> usize {
		self.pending.len()
	}

	pub fn inflight_len(&self) -> usize {
		self.inflight.len()
	}

	pub fn has_pending(&self) -> bool {
		!self.pending.is_empty()
	}
}
