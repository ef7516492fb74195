// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Durable settings storage backends.
//!
//! The tracker persists two kinds of values: ordered string lists (the queues)
//! and single strings (the installation id). Keys are `"{section}/{name}"`.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{AnalyticsError, StorageError};

/// Key under which queued events are stored.
pub const QUEUED_EVENTS: &str = "QueuedEvents";
/// Key under which queued identify payloads are stored.
pub const QUEUED_IDENTIFICATIONS: &str = "QueuedIdentifications";
/// Key under which the generated installation id is stored.
pub const INSTALLATION_ID: &str = "InstallationId";

/// Joins a section name and a key into a storage key.
pub fn settings_key(section: &str, name: &str) -> String {
	if section.is_empty() {
		name.to_string()
	} else {
		format!("{section}/{name}")
	}
}

/// Trait for settings storage backends.
///
/// Calls are synchronous: a successful `save_*` means the value is durable.
pub trait SettingsStore: Send + Sync + std::fmt::Debug {
	/// Loads an ordered string list. Missing keys yield an empty list.
	fn load_string_list(&self, key: &str) -> Result<Vec<String>, StorageError>;

	/// Replaces the list under `key`. An empty list removes the key.
	fn save_string_list(&self, key: &str, values: &[String]) -> Result<(), StorageError>;

	fn load_string(&self, key: &str) -> Result<Option<String>, StorageError>;

	fn save_string(&self, key: &str, value: &str) -> Result<(), StorageError>;
}

/// File-backed settings store holding one JSON object.
///
/// Every write replaces the file atomically (temp file, fsync, rename) and
/// restricts permissions to 0600 on Unix.
#[derive(Debug)]
pub struct FileSettingsStore {
	path: PathBuf,
	write_lock: Mutex<()>,
}

impl FileSettingsStore {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self {
			path: path.into(),
			write_lock: Mutex::new(()),
		}
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	fn read_document(&self) -> Result<Map<String, Value>, StorageError> {
		let contents = match fs::read_to_string(&self.path) {
			Ok(contents) => contents,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
			Err(source) => {
				return Err(StorageError::Io {
					path: self.path.clone(),
					source,
				})
			}
		};

		if contents.trim().is_empty() {
			return Ok(Map::new());
		}

		serde_json::from_str(&contents).map_err(|source| StorageError::Json {
			path: self.path.clone(),
			source,
		})
	}

	fn write_document(&self, document: &Map<String, Value>) -> Result<(), StorageError> {
		let io_err = |source| StorageError::Io {
			path: self.path.clone(),
			source,
		};

		if let Some(parent) = self.path.parent() {
			fs::create_dir_all(parent).map_err(io_err)?;
		}

		let contents = serde_json::to_string_pretty(document).map_err(|source| StorageError::Json {
			path: self.path.clone(),
			source,
		})?;

		let temp_path = self.path.with_extension("json.tmp");
		let mut file = fs::File::create(&temp_path).map_err(io_err)?;
		file.write_all(contents.as_bytes()).map_err(io_err)?;
		file.sync_all().map_err(io_err)?;
		drop(file);

		#[cfg(unix)]
		{
			use std::os::unix::fs::PermissionsExt;
			let perms = fs::Permissions::from_mode(0o600);
			if let Err(e) = fs::set_permissions(&temp_path, perms) {
				warn!(path = ?temp_path, error = %e, "Failed to set settings file permissions to 0600");
			}
		}

		fs::rename(&temp_path, &self.path).map_err(io_err)?;

		debug!(path = ?self.path, keys = document.len(), "Settings written");
		Ok(())
	}

	fn update(&self, f: impl FnOnce(&mut Map<String, Value>)) -> Result<(), StorageError> {
		let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
		let mut document = self.read_document()?;
		f(&mut document);
		self.write_document(&document)
	}
}

impl SettingsStore for FileSettingsStore {
	fn load_string_list(&self, key: &str) -> Result<Vec<String>, StorageError> {
		let document = self.read_document()?;
		string_list_from(key, document.get(key))
	}

	fn save_string_list(&self, key: &str, values: &[String]) -> Result<(), StorageError> {
		self.update(|document| {
			if values.is_empty() {
				document.remove(key);
			} else {
				document.insert(key.to_string(), Value::from(values.to_vec()));
			}
		})
	}

	fn load_string(&self, key: &str) -> Result<Option<String>, StorageError> {
		let document = self.read_document()?;
		string_from(key, document.get(key))
	}

	fn save_string(&self, key: &str, value: &str) -> Result<(), StorageError> {
		self.update(|document| {
			document.insert(key.to_string(), Value::from(value));
		})
	}
}

/// In-memory settings store for tests and ephemeral trackers.
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
	values: Mutex<HashMap<String, Value>>,
}

impl MemorySettingsStore {
	pub fn new() -> Self {
		Self::default()
	}

	fn get(&self, key: &str) -> Option<Value> {
		self.values
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.get(key)
			.cloned()
	}
}

impl SettingsStore for MemorySettingsStore {
	fn load_string_list(&self, key: &str) -> Result<Vec<String>, StorageError> {
		string_list_from(key, self.get(key).as_ref())
	}

	fn save_string_list(&self, key: &str, values: &[String]) -> Result<(), StorageError> {
		let mut map = self.values.lock().unwrap_or_else(PoisonError::into_inner);
		if values.is_empty() {
			map.remove(key);
		} else {
			map.insert(key.to_string(), Value::from(values.to_vec()));
		}
		Ok(())
	}

	fn load_string(&self, key: &str) -> Result<Option<String>, StorageError> {
		string_from(key, self.get(key).as_ref())
	}

	fn save_string(&self, key: &str, value: &str) -> Result<(), StorageError> {
		self.values
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.insert(key.to_string(), Value::from(value));
		Ok(())
	}
}

/// What a settings store currently holds for one section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredState {
	pub installation_id: Option<String>,
	pub queued_events: usize,
	pub queued_identifications: usize,
}

/// Reads the installation id and queue lengths for `section` without
/// starting a tracker.
pub fn read_stored_state(store: &dyn SettingsStore, section: &str) -> Result<StoredState, AnalyticsError> {
	Ok(StoredState {
		installation_id: store.load_string(&settings_key(section, INSTALLATION_ID))?,
		queued_events: store
			.load_string_list(&settings_key(section, QUEUED_EVENTS))?
			.len(),
		queued_identifications: store
			.load_string_list(&settings_key(section, QUEUED_IDENTIFICATIONS))?
			.len(),
	})
}

fn string_list_from(key: &str, value: Option<&Value>) -> Result<Vec<String>, StorageError> {
	let mismatch = || StorageError::TypeMismatch {
		key: key.to_string(),
	};

	match value {
		None | Some(Value::Null) => Ok(Vec::new()),
		Some(Value::Array(items)) => items
			.iter()
			.map(|item| item.as_str().map(str::to_string).ok_or_else(mismatch))
			.collect(),
		Some(_) => Err(mismatch()),
	}
}

fn string_from(key: &str, value: Option<&Value>) -> Result<Option<String>, StorageError> {
	match value {
		None | Some(Value::Null) => Ok(None),
		Some(Value::String(s)) => Ok(Some(s.clone())),
		Some(_) => Err(StorageError::TypeMismatch {
			key: key.to_string(),
		}),
	}
}
