// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Device id resolution.

use tally_analytics_core::DeviceContext;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::storage::SettingsStore;

/// Returns a device id that is stable across restarts.
///
/// Order: the platform hardware id, then the stored installation id, then a
/// freshly generated UUID which is written back immediately.
pub fn resolve_device_id(device: &DeviceContext, store: &dyn SettingsStore, key: &str) -> String {
	if let Some(hardware_id) = device.hardware_id() {
		return hardware_id.to_string();
	}

	match store.load_string(key) {
		Ok(Some(id)) if !id.is_empty() => return id,
		Ok(_) => {}
		Err(e) => warn!(key = %key, error = %e, "Failed to load installation id"),
	}

	let id = Uuid::new_v4().to_string();
	if let Err(e) = store.save_string(key, &id) {
		warn!(key = %key, error = %e, "Failed to persist installation id");
	}
	debug!(device_id = %id, "Generated installation id");
	id
}
