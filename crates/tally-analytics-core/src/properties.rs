// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Event and user property maps.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// An insertion-ordered map of property names to JSON values.
///
/// Used for `event_properties` and `user_properties`. Values may be any JSON
/// value, including nested objects and arrays.
///
/// # Example
///
/// ```
/// use tally_analytics_core::Properties;
///
/// let props = Properties::new()
///     .insert("screen", "settings")
///     .insert("duration_ms", 1200)
///     .insert("dark_mode", true);
/// assert_eq!(props.len(), 3);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Properties {
	inner: Map<String, Value>,
}

/// Error returned when a `key=value` assignment cannot be parsed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PropertyParseError {
	#[error("property assignment '{0}' is missing '='")]
	MissingSeparator(String),

	#[error("property assignment '{0}' has an empty key")]
	EmptyKey(String),
}

impl Properties {
	pub fn new() -> Self {
		Self { inner: Map::new() }
	}

	/// Inserts a property, replacing any previous value under the same key.
	pub fn insert<K, V>(mut self, key: K, value: V) -> Self
	where
		K: Into<String>,
		V: Into<Value>,
	{
		self.inner.insert(key.into(), value.into());
		self
	}

	/// Sets a property in place.
	pub fn set<K, V>(&mut self, key: K, value: V)
	where
		K: Into<String>,
		V: Into<Value>,
	{
		self.inner.insert(key.into(), value.into());
	}

	/// Merges `other` into `self`; keys from `other` win.
	pub fn merge(mut self, other: Properties) -> Self {
		self.inner.extend(other.inner);
		self
	}

	pub fn is_empty(&self) -> bool {
		self.inner.is_empty()
	}

	pub fn len(&self) -> usize {
		self.inner.len()
	}

	pub fn get(&self, key: &str) -> Option<&Value> {
		self.inner.get(key)
	}

	pub fn keys(&self) -> impl Iterator<Item = &String> {
		self.inner.keys()
	}

	/// Returns the properties as a JSON object value without consuming them.
	pub fn to_value(&self) -> Value {
		Value::Object(self.inner.clone())
	}

	pub fn into_value(self) -> Value {
		Value::Object(self.inner)
	}

	/// Parses a `key=value` assignment as used on the command line.
	///
	/// The value is taken as JSON when it parses as JSON (`42`, `true`,
	/// `{"a":1}`), otherwise as a plain string.
	pub fn parse_assignment(assignment: &str) -> Result<(String, Value), PropertyParseError> {
		let (key, raw) = assignment
			.split_once('=')
			.ok_or_else(|| PropertyParseError::MissingSeparator(assignment.to_string()))?;
		let key = key.trim();
		if key.is_empty() {
			return Err(PropertyParseError::EmptyKey(assignment.to_string()));
		}
		let value =
			serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
		Ok((key.to_string(), value))
	}

	/// Builds properties from a list of `key=value` assignments.
	pub fn from_assignments<I, S>(assignments: I) -> Result<Self, PropertyParseError>
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		let mut props = Self::new();
		for assignment in assignments {
			let (key, value) = Self::parse_assignment(assignment.as_ref())?;
			props.set(key, value);
		}
		Ok(props)
	}
}

impl From<Properties> for Value {
	fn from(props: Properties) -> Self {
		props.into_value()
	}
}

impl From<Value> for Properties {
	fn from(value: Value) -> Self {
		match value {
			Value::Object(map) => Self { inner: map },
			_ => Self::new(),
		}
	}
}

impl From<Map<String, Value>> for Properties {
	fn from(map: Map<String, Value>) -> Self {
		Self { inner: map }
	}
}
