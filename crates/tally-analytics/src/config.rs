// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Tracker configuration.
//!
//! Values come from a TOML file, then `TALLY_*` environment variables, and are
//! validated before a tracker is built:
//!
//! ```toml
//! api_key = "..."
//! endpoint = "https://api.amplitude.com"
//! app_version = "1.4.0"
//! privacy_mode = false
//! settings_path = "/var/lib/myapp/tally.json"
//! settings_section = "Analytics"
//! request_timeout_secs = 30
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::error::ConfigError;

pub const DEFAULT_ENDPOINT: &str = "https://api.amplitude.com";
pub const DEFAULT_SETTINGS_SECTION: &str = "Analytics";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

pub const ENV_API_KEY: &str = "TALLY_API_KEY";
pub const ENV_ENDPOINT: &str = "TALLY_ENDPOINT";
pub const ENV_APP_VERSION: &str = "TALLY_APP_VERSION";
pub const ENV_PRIVACY_MODE: &str = "TALLY_PRIVACY_MODE";
pub const ENV_SETTINGS_PATH: &str = "TALLY_SETTINGS_PATH";

#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
	pub api_key: String,
	pub endpoint: String,
	pub app_version: String,
	/// Suppresses carrier, location, language and IP fields.
	pub privacy_mode: bool,
	/// Settings file. Falls back to [`default_settings_path`].
	pub settings_path: Option<PathBuf>,
	pub settings_section: String,
	pub request_timeout_secs: u64,
}

impl Default for TrackerConfig {
	fn default() -> Self {
		Self {
			api_key: String::new(),
			endpoint: DEFAULT_ENDPOINT.to_string(),
			app_version: String::new(),
			privacy_mode: false,
			settings_path: None,
			settings_section: DEFAULT_SETTINGS_SECTION.to_string(),
			request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
		}
	}
}

impl fmt::Debug for TrackerConfig {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let api_key = if self.api_key.is_empty() {
			"<unset>"
		} else {
			"[REDACTED]"
		};
		f.debug_struct("TrackerConfig")
			.field("api_key", &api_key)
			.field("endpoint", &self.endpoint)
			.field("app_version", &self.app_version)
			.field("privacy_mode", &self.privacy_mode)
			.field("settings_path", &self.settings_path)
			.field("settings_section", &self.settings_section)
			.field("request_timeout_secs", &self.request_timeout_secs)
			.finish()
	}
}

impl TrackerConfig {
	pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
		let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
			path: path.to_path_buf(),
			source,
		})?;
		Self::from_toml_str(&contents, path)
	}

	/// Parses TOML; `origin` is only used in error messages.
	pub fn from_toml_str(contents: &str, origin: &Path) -> Result<Self, ConfigError> {
		toml::from_str(contents).map_err(|source| ConfigError::TomlParse {
			path: origin.to_path_buf(),
			source,
		})
	}

	/// Applies `TALLY_*` overrides from the process environment.
	pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
		self.apply_env_overrides_with(|name| std::env::var(name).ok())
	}

	/// Applies overrides from an arbitrary variable lookup.
	pub fn apply_env_overrides_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
	where
		F: Fn(&str) -> Option<String>,
	{
		if let Some(v) = lookup(ENV_API_KEY) {
			self.api_key = v;
		}
		if let Some(v) = lookup(ENV_ENDPOINT) {
			self.endpoint = v;
		}
		if let Some(v) = lookup(ENV_APP_VERSION) {
			self.app_version = v;
		}
		if let Some(v) = lookup(ENV_PRIVACY_MODE) {
			self.privacy_mode = parse_bool(ENV_PRIVACY_MODE, &v)?;
		}
		if let Some(v) = lookup(ENV_SETTINGS_PATH).filter(|v| !v.is_empty()) {
			self.settings_path = Some(PathBuf::from(v));
		}
		Ok(())
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.api_key.trim().is_empty() {
			return Err(ConfigError::missing_field("api_key"));
		}
		validate_endpoint(&self.endpoint)?;
		if self.settings_section.contains('/') {
			return Err(ConfigError::invalid_value(
				"settings_section",
				"must not contain '/'",
			));
		}
		if self.request_timeout_secs == 0 {
			return Err(ConfigError::invalid_value(
				"request_timeout_secs",
				"must be greater than zero",
			));
		}
		Ok(())
	}

	pub fn request_timeout(&self) -> Duration {
		Duration::from_secs(self.request_timeout_secs)
	}

	/// The configured settings path, or the per-user default.
	pub fn resolved_settings_path(&self) -> Result<PathBuf, ConfigError> {
		self
			.settings_path
			.clone()
			.or_else(default_settings_path)
			.ok_or_else(|| ConfigError::missing_field("settings_path"))
	}
}

/// `$XDG_STATE_HOME/tally/settings.json`, falling back to the local data dir.
pub fn default_settings_path() -> Option<PathBuf> {
	dirs::state_dir()
		.or_else(dirs::data_local_dir)
		.map(|dir| dir.join("tally").join("settings.json"))
}

/// Checks that `endpoint` is an absolute http(s) URL.
pub fn validate_endpoint(endpoint: &str) -> Result<(), ConfigError> {
	let url = Url::parse(endpoint)
		.map_err(|e| ConfigError::invalid_value("endpoint", format!("{endpoint}: {e}")))?;
	match url.scheme() {
		"http" | "https" => Ok(()),
		other => Err(ConfigError::invalid_value(
			"endpoint",
			format!("unsupported scheme '{other}'"),
		)),
	}
}

fn parse_bool(field: &str, value: &str) -> Result<bool, ConfigError> {
	match value.trim().to_ascii_lowercase().as_str() {
		"1" | "true" | "yes" | "on" => Ok(true),
		"0" | "false" | "no" | "off" | "" => Ok(false),
		_ => Err(ConfigError::invalid_value(
			field,
			format!("expected a boolean, got '{value}'"),
		)),
	}
}
