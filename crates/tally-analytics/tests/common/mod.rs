// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tally_analytics::{
	MemorySettingsStore, SettingsStore, Tracker, TrackerBuilder, Transport, TransportError,
	TransportResponse,
};
use tokio::sync::Semaphore;

/// A recorded `post_form` call.
#[derive(Debug, Clone)]
pub struct Call {
	pub url: String,
	pub fields: Vec<(String, String)>,
}

impl Call {
	pub fn field(&self, name: &str) -> Option<&str> {
		self.fields
			.iter()
			.find(|(k, _)| k == name)
			.map(|(_, v)| v.as_str())
	}

	/// Parsed `event` field.
	pub fn events(&self) -> Vec<Value> {
		let raw = self.field("event").expect("event field");
		match serde_json::from_str(raw).expect("event json") {
			Value::Array(items) => items,
			other => panic!("event field is not an array: {other}"),
		}
	}

	pub fn event_types(&self) -> Vec<String> {
		self.events()
			.iter()
			.map(|e| e["event_type"].as_str().unwrap_or_default().to_string())
			.collect()
	}
}

/// Transport whose calls block until permits are released.
#[derive(Debug)]
pub struct GatedTransport {
	calls: Mutex<Vec<Call>>,
	active: AtomicUsize,
	max_active: AtomicUsize,
	gate: Semaphore,
	fail: AtomicBool,
}

impl GatedTransport {
	/// Every call waits for [`release`](Self::release).
	pub fn gated() -> Arc<Self> {
		Arc::new(Self {
			calls: Mutex::new(Vec::new()),
			active: AtomicUsize::new(0),
			max_active: AtomicUsize::new(0),
			gate: Semaphore::new(0),
			fail: AtomicBool::new(false),
		})
	}

	/// Calls complete immediately.
	pub fn open() -> Arc<Self> {
		let transport = Self::gated();
		transport.release(1_000_000);
		transport
	}

	pub fn release(&self, calls: usize) {
		self.gate.add_permits(calls);
	}

	pub fn set_failing(&self, fail: bool) {
		self.fail.store(fail, Ordering::SeqCst);
	}

	pub fn calls(&self) -> Vec<Call> {
		self.calls.lock().unwrap().clone()
	}

	pub fn max_active(&self) -> usize {
		self.max_active.load(Ordering::SeqCst)
	}
}

#[async_trait]
impl Transport for GatedTransport {
	async fn post_form(
		&self,
		url: &str,
		fields: Vec<(String, String)>,
	) -> Result<TransportResponse, TransportError> {
		let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
		self.max_active.fetch_max(now, Ordering::SeqCst);
		self.calls.lock().unwrap().push(Call {
			url: url.to_string(),
			fields,
		});

		if let Ok(permit) = self.gate.acquire().await {
			permit.forget();
		}
		tokio::task::yield_now().await;
		self.active.fetch_sub(1, Ordering::SeqCst);

		if self.fail.load(Ordering::SeqCst) {
			return Err(TransportError::ServerError {
				status: 503,
				message: "unavailable".into(),
			});
		}
		Ok(TransportResponse {
			status: 200,
			body: "success".into(),
		})
	}
}

pub fn builder(transport: Arc<GatedTransport>, store: Arc<dyn SettingsStore>) -> TrackerBuilder {
	Tracker::builder()
		.api_key("test-key")
		.endpoint("http://tally.test")
		.app_version("1.2.3")
		.session_id(1_000)
		.transport(transport)
		.settings_store(store)
}

pub fn memory_tracker(transport: Arc<GatedTransport>) -> (Tracker, Arc<MemorySettingsStore>) {
	let store = Arc::new(MemorySettingsStore::new());
	let tracker = builder(transport, store.clone()).build().unwrap();
	(tracker, store)
}
