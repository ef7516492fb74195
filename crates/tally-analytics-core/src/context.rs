// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Per-process session identity.

use chrono::Utc;
use tracing::warn;

use crate::properties::Properties;

/// Identifiers injected into every event built during one tracker lifetime.
///
/// `session_id` is fixed at construction. `last_event_id` only moves forward
/// and stops at `u32::MAX`; ids are unique for the first `u32::MAX` events of
/// a session.
#[derive(Debug, Clone)]
pub struct SessionContext {
	session_id: i64,
	last_event_id: u32,
	device_id: String,
	user_id: Option<String>,
	user_properties: Properties,
}

impl SessionContext {
	/// Starts a session now for the given device.
	pub fn new(device_id: impl Into<String>) -> Self {
		Self::with_session_id(device_id, Utc::now().timestamp_millis())
	}

	/// Starts a session with an explicit session id.
	pub fn with_session_id(device_id: impl Into<String>, session_id: i64) -> Self {
		Self {
			session_id,
			last_event_id: 0,
			device_id: device_id.into(),
			user_id: None,
			user_properties: Properties::new(),
		}
	}

	pub fn session_id(&self) -> i64 {
		self.session_id
	}

	pub fn last_event_id(&self) -> u32 {
		self.last_event_id
	}

	pub fn device_id(&self) -> &str {
		&self.device_id
	}

	pub fn user_id(&self) -> Option<&str> {
		self.user_id.as_deref()
	}

	/// Default user properties attached when an event carries none of its own.
	pub fn user_properties(&self) -> &Properties {
		&self.user_properties
	}

	/// Sets or clears the user id. Empty strings clear it.
	pub fn set_user_id(&mut self, user_id: Option<String>) {
		self.user_id = user_id.filter(|id| !id.is_empty());
	}

	pub fn set_user_properties(&mut self, properties: Properties) {
		self.user_properties = properties;
	}

	/// Advances the event counter and returns the new id.
	pub(crate) fn next_event_id(&mut self) -> u32 {
		let next = self.last_event_id.saturating_add(1);
		if next == u32::MAX && self.last_event_id != u32::MAX {
			warn!(
				session_id = self.session_id,
				"Event id counter exhausted, later events reuse the last id"
			);
		}
		self.last_event_id = next;
		next
	}
}
