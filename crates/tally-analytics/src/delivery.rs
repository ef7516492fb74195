// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Single-flight delivery state machine.
//!
//! The coordinator never performs I/O. It hands out [`OutboundRequest`]s and
//! is told about their completion through [`DeliveryCoordinator::on_result`].
//! At most one request is outstanding at any time, across both queues.

use std::fmt;

use tracing::{debug, warn};

use crate::error::TransportError;
use crate::queue::{Batch, PersistentQueue};

/// Generation number matching a completion to the request that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestToken(u64);

impl RequestToken {
	pub fn get(self) -> u64 {
		self.0
	}
}

impl fmt::Display for RequestToken {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "#{}", self.0)
	}
}

/// Which queue and endpoint a request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchKind {
	/// Whole event queue, sent to `/httpapi`.
	Events,
	/// One identify object, sent to `/identify`.
	Identification,
}

impl BatchKind {
	pub fn as_str(self) -> &'static str {
		match self {
			BatchKind::Events => "events",
			BatchKind::Identification => "identification",
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
	Idle,
	Sending { token: RequestToken, kind: BatchKind },
}

/// How an outstanding request ended.
#[derive(Debug)]
pub enum DeliveryOutcome {
	Delivered,
	Failed(TransportError),
	/// The request was aborted by the tracker itself.
	Cancelled,
}

/// A request the caller must issue and later report back.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
	pub token: RequestToken,
	pub kind: BatchKind,
	pub batch: Batch,
}

/// The two durable queues drained by the coordinator.
#[derive(Debug)]
pub struct DeliveryQueues {
	pub events: PersistentQueue,
	pub identifications: PersistentQueue,
}

impl DeliveryQueues {
	pub fn get_mut(&mut self, kind: BatchKind) -> &mut PersistentQueue {
		match kind {
			BatchKind::Events => &mut self.events,
			BatchKind::Identification => &mut self.identifications,
		}
	}

	pub fn persist(&self) {
		self.events.persist();
		self.identifications.persist();
	}
}

#[derive(Debug)]
pub struct DeliveryCoordinator {
	state: DeliveryState,
	next_token: u64,
	should_send: bool,
	torn_down: bool,
}

impl Default for DeliveryCoordinator {
	fn default() -> Self {
		Self::new()
	}
}

impl DeliveryCoordinator {
	pub fn new() -> Self {
		Self {
			state: DeliveryState::Idle,
			next_token: 0,
			should_send: false,
			torn_down: false,
		}
	}

	pub fn state(&self) -> DeliveryState {
		self.state
	}

	pub fn is_sending(&self) -> bool {
		matches!(self.state, DeliveryState::Sending { .. })
	}

	pub fn should_send(&self) -> bool {
		self.should_send
	}

	pub fn is_torn_down(&self) -> bool {
		self.torn_down
	}

	/// Requests a flush.
	///
	/// While a request is outstanding this only records that another flush is
	/// wanted; the follow-up starts when the current request succeeds.
	pub fn flush(&mut self, queues: &mut DeliveryQueues) -> Option<OutboundRequest> {
		if self.torn_down {
			return None;
		}

		if let DeliveryState::Sending { token, .. } = self.state {
			debug!(token = %token, "Flush requested while a request is in flight");
			self.should_send = true;
			return None;
		}

		self.start(queues)
	}

	/// Applies the result of the request identified by `token`.
	///
	/// Returns a follow-up request when one should be issued immediately.
	pub fn on_result(
		&mut self,
		token: RequestToken,
		outcome: DeliveryOutcome,
		queues: &mut DeliveryQueues,
	) -> Option<OutboundRequest> {
		if self.torn_down {
			debug!(token = %token, "Ignoring completion after teardown");
			return None;
		}

		let kind = match self.state {
			DeliveryState::Sending { token: current, kind } if current == token => kind,
			_ => {
				debug!(token = %token, "Discarding stale completion");
				return None;
			}
		};

		self.state = DeliveryState::Idle;
		let queue = queues.get_mut(kind);

		match outcome {
			DeliveryOutcome::Delivered => {
				queue.on_send_succeeded();
				if self.should_send || queues.identifications.has_pending() {
					return self.start(queues);
				}
				None
			}
			DeliveryOutcome::Failed(e) => {
				warn!(
					token = %token,
					kind = kind.as_str(),
					count = queue.inflight_len(),
					error = %e,
					"Delivery failed, batch requeued"
				);
				queue.on_send_failed();
				None
			}
			DeliveryOutcome::Cancelled => {
				debug!(token = %token, kind = kind.as_str(), "Delivery cancelled, batch requeued");
				queue.on_send_failed();
				None
			}
		}
	}

	/// Stops accepting work. Returns the token still outstanding, if any.
	///
	/// Items in flight stay in flight so the final persist keeps them.
	pub fn teardown(&mut self) -> Option<RequestToken> {
		self.torn_down = true;
		self.should_send = false;
		match self.state {
			DeliveryState::Sending { token, .. } => Some(token),
			DeliveryState::Idle => None,
		}
	}

	fn start(&mut self, queues: &mut DeliveryQueues) -> Option<OutboundRequest> {
		self.should_send = false;

		let (kind, batch) = if let Some(batch) = queues.events.snapshot_for_send() {
			(BatchKind::Events, batch)
		} else if let Some(batch) = queues.identifications.snapshot_head_for_send() {
			(BatchKind::Identification, batch)
		} else {
			return None;
		};

		self.next_token += 1;
		let token = RequestToken(self.next_token);
		self.state = DeliveryState::Sending { token, kind };

		debug!(token = %token, kind = kind.as_str(), count = batch.len(), "Starting delivery");
		Some(OutboundRequest { token, kind, batch })
	}
}
