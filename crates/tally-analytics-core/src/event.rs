// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Event and identification assembly.
//!
//! [`EventBuilder`] combines call-site data with the session and device context
//! into an [`Event`]: an insertion-ordered JSON object that is serialized once
//! and then only ever handled as an opaque string.

use std::fmt;

use chrono::Utc;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::context::SessionContext;
use crate::device::{non_empty, DeviceContext};
use crate::numeric::{fixed_precision, COORDINATE_PRECISION, REVENUE_PRECISION};
use crate::properties::Properties;

/// Fields never sent while privacy mode is enabled.
pub const PRIVACY_SUPPRESSED_FIELDS: [&str; 9] = [
	"carrier",
	"country",
	"region",
	"city",
	"dma",
	"language",
	"location_lat",
	"location_lng",
	"ip",
];

/// A fully assembled event or identification record.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
	fields: Map<String, Value>,
}

impl Event {
	pub fn get(&self, key: &str) -> Option<&Value> {
		self.fields.get(key)
	}

	pub fn contains_key(&self, key: &str) -> bool {
		self.fields.contains_key(key)
	}

	pub fn keys(&self) -> impl Iterator<Item = &String> {
		self.fields.keys()
	}

	/// Renders the wire form stored in the queue.
	pub fn serialize(&self) -> String {
		self.to_string()
	}

	pub fn into_value(self) -> Value {
		Value::Object(self.fields)
	}
}

impl fmt::Display for Event {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let json = serde_json::to_string(&self.fields).map_err(|_| fmt::Error)?;
		f.write_str(&json)
	}
}

/// Assembles events from call-site data plus session and device context.
#[derive(Debug, Clone)]
pub struct EventBuilder {
	session: SessionContext,
	device: DeviceContext,
	app_version: String,
	privacy_mode: bool,
}

impl EventBuilder {
	pub fn new(session: SessionContext, device: DeviceContext, app_version: impl Into<String>) -> Self {
		Self {
			session,
			device,
			app_version: app_version.into(),
			privacy_mode: false,
		}
	}

	/// Enables or disables privacy mode (builder pattern).
	pub fn with_privacy_mode(mut self, enabled: bool) -> Self {
		self.privacy_mode = enabled;
		self
	}

	pub fn set_privacy_mode(&mut self, enabled: bool) {
		self.privacy_mode = enabled;
	}

	pub fn privacy_mode(&self) -> bool {
		self.privacy_mode
	}

	pub fn session(&self) -> &SessionContext {
		&self.session
	}

	pub fn session_mut(&mut self) -> &mut SessionContext {
		&mut self.session
	}

	pub fn device(&self) -> &DeviceContext {
		&self.device
	}

	/// Builds one event and advances the session's event counter.
	///
	/// `user_properties` replaces the session default only when non-empty.
	/// `revenue` is rounded to cents; non-numeric revenue becomes `0`.
	pub fn build_event(
		&mut self,
		event_type: &str,
		event_properties: &Properties,
		user_properties: Option<&Properties>,
		revenue: Option<&Value>,
	) -> Event {
		let mut fields = Map::new();

		if !self.session.device_id().is_empty() {
			fields.insert("device_id".into(), self.session.device_id().into());
		}
		fields.insert("event_type".into(), event_type.into());
		fields.insert("time".into(), Utc::now().timestamp_millis().into());
		fields.insert("event_properties".into(), event_properties.to_value());
		if let Some(user_id) = self.session.user_id() {
			fields.insert("user_id".into(), user_id.into());
		}
		fields.insert(
			"user_properties".into(),
			self.effective_user_properties(user_properties).to_value(),
		);
		fields.insert("app_version".into(), self.app_version.as_str().into());

		self.attach_device_fields(&mut fields);
		self.attach_location_fields(&mut fields, true);

		if let Some(revenue) = revenue {
			fields.insert("revenue".into(), fixed_precision(revenue, REVENUE_PRECISION));
		}

		let event_id = self.session.next_event_id();
		fields.insert("event_id".into(), event_id.into());
		fields.insert("session_id".into(), self.session.session_id().into());
		fields.insert("insert_id".into(), Uuid::new_v4().to_string().into());

		Event { fields }
	}

	/// Builds the object sent to the identify endpoint.
	///
	/// Does not consume an event id.
	pub fn build_identification(
		&self,
		user_properties: Option<&Properties>,
		paying: Option<bool>,
		start_version: Option<&str>,
	) -> Event {
		let mut fields = Map::new();

		if let Some(user_id) = self.session.user_id() {
			fields.insert("user_id".into(), user_id.into());
		}
		if !self.session.device_id().is_empty() {
			fields.insert("device_id".into(), self.session.device_id().into());
		}
		fields.insert(
			"user_properties".into(),
			self.effective_user_properties(user_properties).to_value(),
		);
		if let Some(paying) = paying {
			fields.insert("paying".into(), paying.into());
		}
		if let Some(start_version) = start_version.filter(|v| !v.is_empty()) {
			fields.insert("start_version".into(), start_version.into());
		}
		fields.insert("app_version".into(), self.app_version.as_str().into());

		self.attach_device_fields(&mut fields);
		self.attach_location_fields(&mut fields, false);

		Event { fields }
	}

	fn effective_user_properties<'a>(&'a self, explicit: Option<&'a Properties>) -> &'a Properties {
		explicit
			.filter(|props| !props.is_empty())
			.unwrap_or_else(|| self.session.user_properties())
	}

	fn attach_device_fields(&self, fields: &mut Map<String, Value>) {
		let os = &self.device.os;
		let device = &self.device.device;
		for (key, value) in [
			("platform", &os.platform),
			("os_name", &os.name),
			("os_version", &os.version),
			("device_brand", &device.brand),
			("device_manufacturer", &device.manufacturer),
			("device_model", &device.model),
		] {
			insert_non_empty(fields, key, value);
		}
	}

	fn attach_location_fields(&self, fields: &mut Map<String, Value>, with_coordinates: bool) {
		if self.privacy_mode {
			return;
		}

		let location = &self.device.location;
		for (key, value) in [
			("carrier", &self.device.carrier),
			("country", &location.country),
			("region", &location.region),
			("city", &location.city),
			("dma", &location.dma),
			("language", &self.device.language),
		] {
			insert_non_empty(fields, key, value);
		}

		if with_coordinates {
			if let Some(lat) = &location.lat {
				fields.insert("location_lat".into(), fixed_precision(lat, COORDINATE_PRECISION));
			}
			if let Some(lng) = &location.lng {
				fields.insert("location_lng".into(), fixed_precision(lng, COORDINATE_PRECISION));
			}
		}

		insert_non_empty(fields, "ip", &self.device.ip);
	}
}

fn insert_non_empty(fields: &mut Map<String, Value>, key: &str, value: &Option<String>) {
	if let Some(value) = non_empty(value) {
		fields.insert(key.into(), value.into());
	}
}
