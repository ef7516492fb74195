// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

mod common;

use std::sync::Arc;

use common::{builder, memory_tracker, GatedTransport};
use serde_json::json;
use tally_analytics::{
	DeviceContext, DeviceInfo, FileSettingsStore, LocationInfo, OsInfo, Properties, SettingsStore,
	TrackRequest,
};

const EVENTS_KEY: &str = "Analytics/QueuedEvents";

#[tokio::test]
async fn events_arriving_during_a_slow_send_go_out_together() {
	let transport = GatedTransport::gated();
	let (tracker, store) = memory_tracker(transport.clone());

	tracker.track_event("e1", Properties::new()).await;
	for name in ["e2", "e3", "e4"] {
		tracker.track_event(name, Properties::new()).await;
	}

	let stats = tracker.queue_stats().await.unwrap();
	assert_eq!(stats.inflight_events, 1);
	assert_eq!(stats.pending_events, 3);
	assert!(stats.should_send);

	transport.release(2);
	tracker.wait_idle().await.unwrap();

	let calls = transport.calls();
	assert_eq!(calls.len(), 2);
	assert_eq!(calls[0].event_types(), vec!["e1"]);
	assert_eq!(calls[1].event_types(), vec!["e2", "e3", "e4"]);
	assert_eq!(transport.max_active(), 1);
	assert!(store.load_string_list(EVENTS_KEY).unwrap().is_empty());

	tracker.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_producers_never_cause_parallel_requests() {
	let transport = GatedTransport::open();
	let (tracker, _store) = memory_tracker(transport.clone());

	let mut handles = Vec::new();
	for producer in 0..10 {
		let tracker = tracker.clone();
		handles.push(tokio::spawn(async move {
			for n in 0..10 {
				tracker
					.track(TrackRequest::new(format!("p{producer}-{n}")))
					.await;
			}
		}));
	}
	for handle in handles {
		handle.await.unwrap();
	}
	tracker.wait_idle().await.unwrap();

	let calls = transport.calls();
	let mut delivered: Vec<String> = calls.iter().flat_map(|c| c.event_types()).collect();
	assert_eq!(delivered.len(), 100);
	delivered.sort();
	delivered.dedup();
	assert_eq!(delivered.len(), 100);
	assert_eq!(transport.max_active(), 1);

	let ids: Vec<i64> = calls
		.iter()
		.flat_map(|c| c.events())
		.map(|e| e["event_id"].as_i64().unwrap())
		.collect();
	assert!(ids.windows(2).all(|w| w[0] < w[1]), "event ids not increasing: {ids:?}");
	assert!(tracker.queue_stats().await.unwrap().is_drained());

	tracker.shutdown().await;
}

#[tokio::test]
async fn clearing_while_sending_keeps_the_inflight_batch() {
	let transport = GatedTransport::gated();
	let (tracker, store) = memory_tracker(transport.clone());

	tracker.track_event("a", Properties::new()).await;
	tracker.track_event("b", Properties::new()).await;
	tracker.track_event("c", Properties::new()).await;

	assert_eq!(tracker.clear_queued_events().await, 2);
	tracker.track_event("d", Properties::new()).await;

	transport.release(2);
	tracker.wait_idle().await.unwrap();

	let calls = transport.calls();
	assert_eq!(calls.len(), 2);
	assert_eq!(calls[0].event_types(), vec!["a"]);
	assert_eq!(calls[1].event_types(), vec!["d"]);
	assert!(store.load_string_list(EVENTS_KEY).unwrap().is_empty());

	tracker.shutdown().await;
}

#[tokio::test]
async fn failed_batch_is_requeued_in_front_and_survives_restart() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("settings.json");

	let transport = GatedTransport::gated();
	let store: Arc<dyn SettingsStore> = Arc::new(FileSettingsStore::new(&path));
	let first = builder(transport.clone(), store).build().unwrap();

	first.track(TrackRequest::new("A").postpone(true)).await;
	first.track(TrackRequest::new("B").postpone(true)).await;
	first.flush();
	first.track(TrackRequest::new("C").postpone(true)).await;

	transport.set_failing(true);
	transport.release(1);
	first.wait_idle().await.unwrap();

	let stats = first.queue_stats().await.unwrap();
	assert_eq!(stats.pending_events, 3);
	assert!(!stats.request_in_flight);
	let first_device = first.device_id().to_string();
	first.shutdown().await;

	let retry = GatedTransport::open();
	let store: Arc<dyn SettingsStore> = Arc::new(FileSettingsStore::new(&path));
	let second = builder(retry.clone(), store).build().unwrap();
	assert_eq!(second.device_id(), first_device);

	second.flush();
	second.wait_idle().await.unwrap();

	let calls = retry.calls();
	assert_eq!(calls.len(), 1);
	assert_eq!(calls[0].event_types(), vec!["A", "B", "C"]);
	second.shutdown().await;
}

#[tokio::test]
async fn shutdown_mid_flight_keeps_the_batch_for_the_next_start() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("settings.json");

	let stuck = GatedTransport::gated();
	let store: Arc<dyn SettingsStore> = Arc::new(FileSettingsStore::new(&path));
	let first = builder(stuck.clone(), store).build().unwrap();
	first.track_event("unsent", Properties::new()).await;
	first.track(TrackRequest::new("queued").postpone(true)).await;
	first.shutdown().await;

	assert!(first.queue_stats().await.is_err());
	assert!(first.is_shutdown());
	first.track_event("ignored", Properties::new()).await;

	let reopened = FileSettingsStore::new(&path);
	let stored = reopened.load_string_list(EVENTS_KEY).unwrap();
	assert_eq!(stored.len(), 2);

	let transport = GatedTransport::open();
	let store: Arc<dyn SettingsStore> = Arc::new(reopened);
	let second = builder(transport.clone(), store).build().unwrap();
	second.flush();
	second.wait_idle().await.unwrap();
	assert_eq!(transport.calls()[0].event_types(), vec!["unsent", "queued"]);
	second.shutdown().await;
}

#[tokio::test]
async fn privacy_mode_strips_location_fields() {
	let transport = GatedTransport::open();
	let store = Arc::new(tally_analytics::MemorySettingsStore::new());
	let device = DeviceContext {
		device: DeviceInfo {
			hardware_id: Some("hw-42".into()),
			brand: Some("Acme".into()),
			manufacturer: Some("Acme Corp".into()),
			model: Some("X".into()),
		},
		os: OsInfo {
			platform: Some("Linux".into()),
			name: Some("Debian".into()),
			version: Some("12".into()),
		},
		location: LocationInfo {
			country: Some("NZ".into()),
			region: Some("Otago".into()),
			city: Some("Dunedin".into()),
			dma: Some("none".into()),
			lat: Some(json!(-45.87)),
			lng: Some(json!(170.5)),
		},
		carrier: Some("Spark".into()),
		language: Some("en".into()),
		ip: Some("203.0.113.9".into()),
	};
	let tracker = builder(transport.clone(), store)
		.device_context(device)
		.privacy_mode(true)
		.build()
		.unwrap();
	assert_eq!(tracker.device_id(), "hw-42");

	tracker.track_event("private", Properties::new()).await;
	tracker.wait_idle().await.unwrap();

	let event = transport.calls()[0].events().remove(0);
	for key in [
		"carrier",
		"country",
		"region",
		"city",
		"dma",
		"language",
		"location_lat",
		"location_lng",
		"ip",
	] {
		assert!(event.get(key).is_none(), "{key} should be suppressed");
	}
	assert_eq!(event["device_model"], "X");
	assert_eq!(event["os_name"], "Debian");

	tracker.set_privacy_mode(false);
	tracker.track_event("public", Properties::new()).await;
	tracker.wait_idle().await.unwrap();
	let event = transport.calls()[1].events().remove(0);
	assert_eq!(event["city"], "Dunedin");
	assert_eq!(event["location_lat"], json!(-45.87));

	tracker.shutdown().await;
}

#[tokio::test]
async fn user_context_flows_into_events_and_identify() {
	let transport = GatedTransport::open();
	let (tracker, _store) = memory_tracker(transport.clone());

	tracker.set_user_id(Some("user-7".into()));
	tracker.set_user_properties(Properties::new().insert("tier", "gold"));
	tracker
		.track(TrackRequest::new("bought").revenue("12.6"))
		.await;
	tracker
		.identify_user(Properties::new().insert("plan", "pro"), Some(true), Some("1.0"))
		.await;
	tracker.wait_idle().await.unwrap();

	let calls = transport.calls();
	assert_eq!(calls.len(), 2);

	let event = calls[0].events().remove(0);
	assert_eq!(event["user_id"], "user-7");
	assert_eq!(event["user_properties"]["tier"], "gold");
	assert_eq!(event["revenue"], json!(13.0));
	assert_eq!(event["app_version"], "1.2.3");
	assert_eq!(event["session_id"], 1_000);

	assert_eq!(calls[1].url, "http://tally.test/identify");
	let identification: serde_json::Value =
		serde_json::from_str(calls[1].field("identification").unwrap()).unwrap();
	assert_eq!(identification["user_id"], "user-7");
	assert_eq!(identification["user_properties"]["plan"], "pro");
	assert_eq!(identification["paying"], true);

	tracker.shutdown().await;
}

#[tokio::test]
async fn queued_events_are_durable_before_track_returns() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("settings.json");

	let transport = GatedTransport::gated();
	let store: Arc<dyn SettingsStore> = Arc::new(FileSettingsStore::new(&path));
	let tracker = builder(transport, store).build().unwrap();
	tracker.track_event("kept", Properties::new()).await;
	drop(tracker);
	tokio::task::yield_now().await;

	let stored = FileSettingsStore::new(&path)
		.load_string_list(EVENTS_KEY)
		.unwrap();
	assert_eq!(stored.len(), 1);
	assert!(stored[0].contains("\"kept\""));
}

struct PanickingTransport;

#[async_trait::async_trait]
impl tally_analytics::Transport for PanickingTransport {
	async fn post_form(
		&self,
		_url: &str,
		_fields: Vec<(String, String)>,
	) -> Result<tally_analytics::TransportResponse, tally_analytics::TransportError> {
		panic!("transport bug");
	}
}

#[tokio::test]
async fn a_panicking_transport_requeues_instead_of_wedging() {
	let store = Arc::new(tally_analytics::MemorySettingsStore::new());
	let tracker = tally_analytics::Tracker::builder()
		.api_key("test-key")
		.transport(Arc::new(PanickingTransport))
		.settings_store(store.clone())
		.build()
		.unwrap();

	tracker.track_event("survivor", Properties::new()).await;
	tracker.wait_idle().await.unwrap();

	let stats = tracker.queue_stats().await.unwrap();
	assert_eq!(stats.pending_events, 1);
	assert!(!stats.request_in_flight);
	assert_eq!(store.load_string_list(EVENTS_KEY).unwrap().len(), 1);

	tracker.shutdown().await;
}
