// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The tracker handle and its control task.
//!
//! All queue and coordinator state lives on one task. [`Tracker`] handles only
//! send `TrackerCommand`s to it, and transport completions come back through
//! the same channel, so state transitions never race.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tally_analytics_core::{DeviceContext, EventBuilder, Properties, SessionContext};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{validate_endpoint, TrackerConfig, DEFAULT_ENDPOINT, DEFAULT_SETTINGS_SECTION};
use crate::delivery::{
	BatchKind, DeliveryCoordinator, DeliveryOutcome, DeliveryQueues, OutboundRequest, RequestToken,
};
use crate::error::{AnalyticsError, Result};
use crate::identity::resolve_device_id;
use crate::queue::PersistentQueue;
use crate::storage::{
	settings_key, FileSettingsStore, MemorySettingsStore, SettingsStore, INSTALLATION_ID,
	QUEUED_EVENTS, QUEUED_IDENTIFICATIONS,
};
use crate::transport::{HttpTransport, Transport, DEFAULT_REQUEST_TIMEOUT};

/// Path of the batch event endpoint, relative to the configured endpoint.
pub const EVENTS_PATH: &str = "/httpapi";
/// Path of the identify endpoint, relative to the configured endpoint.
pub const IDENTIFY_PATH: &str = "/identify";

/// One event to record.
///
/// ```ignore
/// tracker
///     .track(
///         TrackRequest::new("purchase")
///             .property("sku", "A-100")
///             .revenue(19.99),
///     )
///     .await;
/// ```
#[derive(Debug, Clone)]
pub struct TrackRequest {
	event_type: String,
	properties: Properties,
	user_properties: Option<Properties>,
	revenue: Option<Value>,
	postpone: bool,
}

impl TrackRequest {
	pub fn new(event_type: impl Into<String>) -> Self {
		Self {
			event_type: event_type.into(),
			properties: Properties::new(),
			user_properties: None,
			revenue: None,
			postpone: false,
		}
	}

	pub fn properties(mut self, properties: Properties) -> Self {
		self.properties = properties;
		self
	}

	pub fn property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
		self.properties.set(key, value);
		self
	}

	/// Overrides the tracker's default user properties for this event.
	pub fn user_properties(mut self, properties: Properties) -> Self {
		self.user_properties = Some(properties);
		self
	}

	/// Revenue amount, rounded to two significant digits. Non-numeric values
	/// are sent as `0`.
	pub fn revenue(mut self, revenue: impl Into<Value>) -> Self {
		self.revenue = Some(revenue.into());
		self
	}

	/// Queue durably but do not start a delivery.
	pub fn postpone(mut self, postpone: bool) -> Self {
		self.postpone = postpone;
		self
	}

	pub fn event_type(&self) -> &str {
		&self.event_type
	}
}

/// Queue sizes and delivery status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
	pub pending_events: usize,
	pub inflight_events: usize,
	pub pending_identifications: usize,
	pub inflight_identifications: usize,
	pub request_in_flight: bool,
	pub should_send: bool,
}

impl QueueStats {
	/// True when nothing is queued or in flight.
	pub fn is_drained(&self) -> bool {
		self.pending_events == 0
			&& self.inflight_events == 0
			&& self.pending_identifications == 0
			&& self.inflight_identifications == 0
	}
}

/// Synchronous tracker state, owned by the control task.
#[derive(Debug)]
pub(crate) struct TrackerCore {
	builder: EventBuilder,
	queues: DeliveryQueues,
	coordinator: DeliveryCoordinator,
	api_key: String,
	events_url: String,
	identify_url: String,
}

impl TrackerCore {
	fn track(&mut self, request: TrackRequest) -> Option<OutboundRequest> {
		let event = self.builder.build_event(
			&request.event_type,
			&request.properties,
			request.user_properties.as_ref(),
			request.revenue.as_ref(),
		);
		debug!(event_type = %request.event_type, postpone = request.postpone, "Event queued");
		self.queues.events.append(event.serialize());

		if request.postpone {
			return None;
		}
		self.coordinator.flush(&mut self.queues)
	}

	fn identify(
		&mut self,
		user_properties: &Properties,
		paying: Option<bool>,
		start_version: Option<&str>,
	) -> Option<OutboundRequest> {
		let identification = self
			.builder
			.build_identification(Some(user_properties), paying, start_version);
		self.queues.identifications.append(identification.serialize());
		self.coordinator.flush(&mut self.queues)
	}

	fn flush(&mut self) -> Option<OutboundRequest> {
		self.coordinator.flush(&mut self.queues)
	}

	fn on_delivery(&mut self, token: RequestToken, outcome: DeliveryOutcome) -> Option<OutboundRequest> {
		self.coordinator.on_result(token, outcome, &mut self.queues)
	}

	fn clear_queued_events(&mut self) -> usize {
		let dropped = self.queues.events.clear_pending();
		debug!(count = dropped, "Cleared queued events");
		dropped
	}

	fn stats(&self) -> QueueStats {
		QueueStats {
			pending_events: self.queues.events.pending_len(),
			inflight_events: self.queues.events.inflight_len(),
			pending_identifications: self.queues.identifications.pending_len(),
			inflight_identifications: self.queues.identifications.inflight_len(),
			request_in_flight: self.coordinator.is_sending(),
			should_send: self.coordinator.should_send(),
		}
	}

	fn teardown(&mut self) -> Option<RequestToken> {
		let outstanding = self.coordinator.teardown();
		self.queues.persist();
		outstanding
	}

	/// URL and form fields for `request`.
	fn form_for(&self, request: &OutboundRequest) -> (String, Vec<(String, String)>) {
		let api_key = ("api_key".to_string(), self.api_key.clone());
		match request.kind {
			BatchKind::Events => (
				self.events_url.clone(),
				vec![api_key, ("event".to_string(), request.batch.to_json_array())],
			),
			BatchKind::Identification => (
				self.identify_url.clone(),
				vec![
					api_key,
					(
						"identification".to_string(),
						request.batch.items().first().cloned().unwrap_or_default(),
					),
				],
			),
		}
	}
}

/// Messages processed by the control task.
#[derive(Debug)]
pub(crate) enum TrackerCommand {
	Track {
		request: TrackRequest,
		ack: oneshot::Sender<()>,
	},
	Identify {
		user_properties: Properties,
		paying: Option<bool>,
		start_version: Option<String>,
		ack: oneshot::Sender<()>,
	},
	Flush,
	ClearQueuedEvents {
		ack: oneshot::Sender<usize>,
	},
	SetUserId(Option<String>),
	SetUserProperties(Properties),
	SetPrivacyMode(bool),
	Stats(oneshot::Sender<QueueStats>),
	WaitIdle(oneshot::Sender<()>),
	DeliveryFinished {
		token: RequestToken,
		outcome: DeliveryOutcome,
	},
	Shutdown(oneshot::Sender<()>),
}

/// Reports a transport task's outcome exactly once, even if the task is
/// aborted or panics before finishing.
struct CompletionGuard {
	token: RequestToken,
	commands: mpsc::WeakUnboundedSender<TrackerCommand>,
	outcome: Option<DeliveryOutcome>,
}

impl CompletionGuard {
	fn complete(mut self, outcome: DeliveryOutcome) {
		self.outcome = Some(outcome);
	}
}

impl Drop for CompletionGuard {
	fn drop(&mut self) {
		let outcome = self.outcome.take().unwrap_or(DeliveryOutcome::Cancelled);
		if let Some(commands) = self.commands.upgrade() {
			let _ = commands.send(TrackerCommand::DeliveryFinished {
				token: self.token,
				outcome,
			});
		}
	}
}

struct ControlTask {
	core: TrackerCore,
	transport: Arc<dyn Transport>,
	completions: mpsc::WeakUnboundedSender<TrackerCommand>,
	in_flight: Option<JoinHandle<()>>,
	idle_waiters: Vec<oneshot::Sender<()>>,
}

impl ControlTask {
	async fn run(mut self, mut commands: mpsc::UnboundedReceiver<TrackerCommand>) {
		while let Some(command) = commands.recv().await {
			match command {
				TrackerCommand::Track { request, ack } => {
					let next = self.core.track(request);
					self.dispatch(next);
					let _ = ack.send(());
				}
				TrackerCommand::Identify {
					user_properties,
					paying,
					start_version,
					ack,
				} => {
					let next = self
						.core
						.identify(&user_properties, paying, start_version.as_deref());
					self.dispatch(next);
					let _ = ack.send(());
				}
				TrackerCommand::Flush => {
					let next = self.core.flush();
					self.dispatch(next);
				}
				TrackerCommand::ClearQueuedEvents { ack } => {
					let _ = ack.send(self.core.clear_queued_events());
				}
				TrackerCommand::SetUserId(user_id) => {
					self.core.builder.session_mut().set_user_id(user_id);
				}
				TrackerCommand::SetUserProperties(properties) => {
					self.core.builder.session_mut().set_user_properties(properties);
				}
				TrackerCommand::SetPrivacyMode(enabled) => {
					self.core.builder.set_privacy_mode(enabled);
				}
				TrackerCommand::Stats(reply) => {
					let _ = reply.send(self.core.stats());
				}
				TrackerCommand::WaitIdle(reply) => {
					self.idle_waiters.push(reply);
				}
				TrackerCommand::DeliveryFinished { token, outcome } => {
					let next = self.core.on_delivery(token, outcome);
					if !self.core.coordinator.is_sending() {
						self.in_flight = None;
					}
					self.dispatch(next);
				}
				TrackerCommand::Shutdown(ack) => {
					self.teardown();
					let _ = ack.send(());
					return;
				}
			}
			self.notify_idle();
		}

		self.teardown();
	}

	fn dispatch(&mut self, request: Option<OutboundRequest>) {
		let Some(request) = request else {
			return;
		};

		let (url, fields) = self.core.form_for(&request);
		let transport = Arc::clone(&self.transport);
		let guard = CompletionGuard {
			token: request.token,
			commands: self.completions.clone(),
			outcome: None,
		};

		self.in_flight = Some(tokio::spawn(async move {
			let outcome = match transport.post_form(&url, fields).await {
				Ok(response) => {
					debug!(url = %url, status = response.status, "Delivery accepted");
					DeliveryOutcome::Delivered
				}
				Err(e) => DeliveryOutcome::Failed(e),
			};
			guard.complete(outcome);
		}));
	}

	fn notify_idle(&mut self) {
		if self.core.coordinator.is_sending() {
			return;
		}
		for waiter in self.idle_waiters.drain(..) {
			let _ = waiter.send(());
		}
	}

	fn teardown(&mut self) {
		if let Some(token) = self.core.teardown() {
			debug!(token = %token, "Aborting in-flight delivery");
		}
		if let Some(task) = self.in_flight.take() {
			task.abort();
		}
		for waiter in self.idle_waiters.drain(..) {
			let _ = waiter.send(());
		}

		let stats = self.core.stats();
		info!(
			pending_events = stats.pending_events + stats.inflight_events,
			pending_identifications = stats.pending_identifications + stats.inflight_identifications,
			"Tracker shut down"
		);
	}
}

/// Handle to a running tracker.
///
/// Cloning is cheap. The control task stops when [`Tracker::shutdown`] is
/// called or the last handle is dropped; queued payloads are persisted then.
#[derive(Debug, Clone)]
pub struct Tracker {
	commands: mpsc::UnboundedSender<TrackerCommand>,
	device_id: Arc<str>,
	session_id: i64,
}

impl Tracker {
	pub fn builder() -> TrackerBuilder {
		TrackerBuilder::new()
	}

	/// Builds a tracker from validated configuration.
	pub fn from_config(config: &TrackerConfig) -> Result<Self> {
		config.validate()?;
		TrackerBuilder::from_config(config).build()
	}

	/// Records an event. Returns once the event is durably queued.
	pub async fn track(&self, request: TrackRequest) {
		let (ack, done) = oneshot::channel();
		if self.send(TrackerCommand::Track { request, ack }) {
			let _ = done.await;
		}
	}

	pub async fn track_event(&self, event_type: impl Into<String>, properties: Properties) {
		self.track(TrackRequest::new(event_type).properties(properties))
			.await;
	}

	/// Queues an identify call for the current user and device.
	pub async fn identify_user(
		&self,
		user_properties: Properties,
		paying: Option<bool>,
		start_version: Option<&str>,
	) {
		let (ack, done) = oneshot::channel();
		let command = TrackerCommand::Identify {
			user_properties,
			paying,
			start_version: start_version.map(str::to_string),
			ack,
		};
		if self.send(command) {
			let _ = done.await;
		}
	}

	/// Drops every queued event that is not part of the request in flight.
	///
	/// Returns the number of events dropped.
	pub async fn clear_queued_events(&self) -> usize {
		let (ack, done) = oneshot::channel();
		if !self.send(TrackerCommand::ClearQueuedEvents { ack }) {
			return 0;
		}
		done.await.unwrap_or(0)
	}

	/// Starts a delivery, or schedules one after the current request.
	pub fn flush(&self) {
		self.send(TrackerCommand::Flush);
	}

	/// Sets the user id attached to subsequent events. `None` or an empty id clears it.
	pub fn set_user_id(&self, user_id: Option<String>) {
		self.send(TrackerCommand::SetUserId(user_id));
	}

	/// Sets the default user properties for subsequent events.
	pub fn set_user_properties(&self, properties: Properties) {
		self.send(TrackerCommand::SetUserProperties(properties));
	}

	pub fn set_privacy_mode(&self, enabled: bool) {
		self.send(TrackerCommand::SetPrivacyMode(enabled));
	}

	pub async fn queue_stats(&self) -> Result<QueueStats> {
		let (reply, stats) = oneshot::channel();
		if !self.send(TrackerCommand::Stats(reply)) {
			return Err(AnalyticsError::ClientShutdown);
		}
		stats.await.map_err(|_| AnalyticsError::ClientShutdown)
	}

	/// Resolves once no request is outstanding and none is scheduled.
	pub async fn wait_idle(&self) -> Result<()> {
		let (reply, idle) = oneshot::channel();
		if !self.send(TrackerCommand::WaitIdle(reply)) {
			return Err(AnalyticsError::ClientShutdown);
		}
		idle.await.map_err(|_| AnalyticsError::ClientShutdown)
	}

	pub fn device_id(&self) -> &str {
		&self.device_id
	}

	pub fn session_id(&self) -> i64 {
		self.session_id
	}

	/// Aborts any request in flight, persists the queues and stops the
	/// control task. Calling it again is a no-op.
	pub async fn shutdown(&self) {
		let (ack, done) = oneshot::channel();
		if self.send(TrackerCommand::Shutdown(ack)) {
			let _ = done.await;
		}
	}

	pub fn is_shutdown(&self) -> bool {
		self.commands.is_closed()
	}

	fn send(&self, command: TrackerCommand) -> bool {
		match self.commands.send(command) {
			Ok(()) => true,
			Err(_) => {
				debug!("Tracker is shut down, dropping command");
				false
			}
		}
	}
}

/// Builder for [`Tracker`].
pub struct TrackerBuilder {
	api_key: Option<String>,
	endpoint: String,
	app_version: String,
	privacy_mode: bool,
	device: Option<DeviceContext>,
	settings_store: Option<Arc<dyn SettingsStore>>,
	settings_path: Option<PathBuf>,
	settings_section: String,
	transport: Option<Arc<dyn Transport>>,
	request_timeout: Duration,
	user_agent: Option<String>,
	session_id: Option<i64>,
}

impl Default for TrackerBuilder {
	fn default() -> Self {
		Self::new()
	}
}

impl TrackerBuilder {
	pub fn new() -> Self {
		Self {
			api_key: None,
			endpoint: DEFAULT_ENDPOINT.to_string(),
			app_version: String::new(),
			privacy_mode: false,
			device: None,
			settings_store: None,
			settings_path: None,
			settings_section: DEFAULT_SETTINGS_SECTION.to_string(),
			transport: None,
			request_timeout: DEFAULT_REQUEST_TIMEOUT,
			user_agent: None,
			session_id: None,
		}
	}

	/// Seeds the builder from configuration. Later calls override it.
	pub fn from_config(config: &TrackerConfig) -> Self {
		let mut builder = Self::new()
			.api_key(config.api_key.clone())
			.endpoint(config.endpoint.clone())
			.app_version(config.app_version.clone())
			.privacy_mode(config.privacy_mode)
			.settings_section(config.settings_section.clone())
			.request_timeout(config.request_timeout());
		builder.settings_path = config.settings_path.clone();
		builder
	}

	pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
		self.api_key = Some(api_key.into());
		self
	}

	/// Base URL of the ingestion service, e.g. `https://api.amplitude.com`.
	pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
		self.endpoint = endpoint.into();
		self
	}

	pub fn app_version(mut self, version: impl Into<String>) -> Self {
		self.app_version = version.into();
		self
	}

	pub fn privacy_mode(mut self, enabled: bool) -> Self {
		self.privacy_mode = enabled;
		self
	}

	/// Device information. Defaults to [`DeviceContext::detect`].
	pub fn device_context(mut self, device: DeviceContext) -> Self {
		self.device = Some(device);
		self
	}

	/// Storage backend. Takes precedence over [`settings_path`](Self::settings_path).
	pub fn settings_store(mut self, store: Arc<dyn SettingsStore>) -> Self {
		self.settings_store = Some(store);
		self
	}

	pub fn settings_path(mut self, path: impl Into<PathBuf>) -> Self {
		self.settings_path = Some(path.into());
		self
	}

	pub fn settings_section(mut self, section: impl Into<String>) -> Self {
		self.settings_section = section.into();
		self
	}

	pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
		self.transport = Some(transport);
		self
	}

	/// Timeout for the default HTTP transport.
	pub fn request_timeout(mut self, timeout: Duration) -> Self {
		self.request_timeout = timeout;
		self
	}

	/// User-Agent for the default HTTP transport.
	pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
		self.user_agent = Some(user_agent.into());
		self
	}

	/// Fixes the session id instead of using the current time.
	pub fn session_id(mut self, session_id: i64) -> Self {
		self.session_id = Some(session_id);
		self
	}

	/// Loads persisted state and starts the control task on the current runtime.
	pub fn build(self) -> Result<Tracker> {
		let api_key = self
			.api_key
			.filter(|key| !key.trim().is_empty())
			.ok_or(AnalyticsError::InvalidApiKey)?;
		validate_endpoint(&self.endpoint)
			.map_err(|_| AnalyticsError::InvalidBaseUrl(self.endpoint.clone()))?;
		let endpoint = self.endpoint.trim_end_matches('/').to_string();

		let runtime = tokio::runtime::Handle::try_current().map_err(|_| AnalyticsError::NoRuntime)?;

		let transport: Arc<dyn Transport> = match (self.transport, self.user_agent) {
			(Some(transport), _) => transport,
			(None, Some(user_agent)) => {
				Arc::new(HttpTransport::with_user_agent(self.request_timeout, user_agent)?)
			}
			(None, None) => Arc::new(HttpTransport::new(self.request_timeout)?),
		};

		let store: Arc<dyn SettingsStore> = match (self.settings_store, self.settings_path) {
			(Some(store), _) => store,
			(None, Some(path)) => Arc::new(FileSettingsStore::new(path)),
			(None, None) => match crate::config::default_settings_path() {
				Some(path) => Arc::new(FileSettingsStore::new(path)),
				None => {
					warn!("No settings directory available, queued events will not survive restarts");
					Arc::new(MemorySettingsStore::new())
				}
			},
		};

		let section = self.settings_section;
		let device = self.device.unwrap_or_else(DeviceContext::detect);
		let device_id = resolve_device_id(
			&device,
			store.as_ref(),
			&settings_key(&section, INSTALLATION_ID),
		);

		let session = match self.session_id {
			Some(session_id) => SessionContext::with_session_id(device_id, session_id),
			None => SessionContext::new(device_id),
		};
		let session_id = session.session_id();
		let device_id: Arc<str> = Arc::from(session.device_id());

		let queues = DeliveryQueues {
			events: PersistentQueue::reload(settings_key(&section, QUEUED_EVENTS), Arc::clone(&store)),
			identifications: PersistentQueue::reload(
				settings_key(&section, QUEUED_IDENTIFICATIONS),
				Arc::clone(&store),
			),
		};

		let core = TrackerCore {
			builder: EventBuilder::new(session, device, self.app_version)
				.with_privacy_mode(self.privacy_mode),
			queues,
			coordinator: DeliveryCoordinator::new(),
			api_key,
			events_url: format!("{endpoint}{EVENTS_PATH}"),
			identify_url: format!("{endpoint}{IDENTIFY_PATH}"),
		};

		let stats = core.stats();
		info!(
			endpoint = %endpoint,
			device_id = %device_id,
			session_id,
			queued_events = stats.pending_events,
			queued_identifications = stats.pending_identifications,
			"Tracker started"
		);

		let (commands, receiver) = mpsc::unbounded_channel();
		let task = ControlTask {
			core,
			transport,
			completions: commands.downgrade(),
			in_flight: None,
			idle_waiters: Vec::new(),
		};
		runtime.spawn(task.run(receiver));

		Ok(Tracker {
			commands,
			device_id,
			session_id,
		})
	}
}
