// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for the analytics tracker.
//!
//! None of these reach callers of the tracking API. Construction and
//! introspection return [`AnalyticsError`]; delivery and storage failures are
//! logged and absorbed by the control task.

use std::path::PathBuf;

use thiserror::Error;

/// Errors returned by tracker construction and introspection calls.
#[derive(Debug, Error)]
pub enum AnalyticsError {
	/// API key is missing or empty.
	#[error("invalid API key: must be non-empty")]
	InvalidApiKey,

	/// Endpoint is missing or not an absolute http(s) URL.
	#[error("invalid endpoint URL: {0}")]
	InvalidBaseUrl(String),

	/// The tracker's control task has stopped.
	#[error("tracker has been shut down")]
	ClientShutdown,

	/// `build` was called outside a Tokio runtime.
	#[error("tracker must be built inside a Tokio runtime")]
	NoRuntime,

	/// Building the HTTP client failed.
	#[error("HTTP client setup failed: {0}")]
	RequestFailed(#[from] reqwest::Error),

	#[error(transparent)]
	Storage(#[from] StorageError),

	#[error(transparent)]
	Config(#[from] ConfigError),
}

/// A failed delivery attempt. Triggers a full requeue of the batch.
#[derive(Debug, Error)]
pub enum TransportError {
	/// Network, TLS, or protocol level failure.
	#[error("HTTP request failed: {0}")]
	RequestFailed(#[from] reqwest::Error),

	/// Server answered with a non-success status.
	#[error("server error ({status}): {message}")]
	ServerError { status: u16, message: String },

	/// Server asked us to back off.
	#[error("rate limited, retry after {retry_after_secs:?} seconds")]
	RateLimited { retry_after_secs: Option<u64> },
}

/// Durable settings storage failure.
#[derive(Debug, Error)]
pub enum StorageError {
	#[error("settings I/O error at {path}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("settings file {path} is not valid JSON: {source}")]
	Json {
		path: PathBuf,
		#[source]
		source: serde_json::Error,
	},

	/// The stored value under `key` has an unexpected shape.
	#[error("settings key '{key}' holds an unexpected value type")]
	TypeMismatch { key: String },
}

/// Errors that can occur while loading and validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("I/O error reading {path}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("TOML parse error in {path}: {source}")]
	TomlParse {
		path: PathBuf,
		#[source]
		source: toml::de::Error,
	},

	#[error("Missing required field: {0}")]
	MissingField(String),

	#[error("Invalid value for {field}: {message}")]
	InvalidValue { field: String, message: String },
}

impl ConfigError {
	pub fn missing_field(field: impl Into<String>) -> Self {
		Self::MissingField(field.into())
	}

	pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
		Self::InvalidValue {
			field: field.into(),
			message: message.into(),
		}
	}
}

/// Result type alias for tracker operations.
pub type Result<T> = std::result::Result<T, AnalyticsError>;
