// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Durable client-side analytics tracker.
//!
//! Events are queued in a settings file before anything touches the network,
//! and at most one request is outstanding at a time. A failed request puts
//! its batch back at the front of the queue; the next flush sends it again.
//!
//! ```ignore
//! use tally_analytics::{Properties, TrackRequest, Tracker};
//!
//! let tracker = Tracker::builder()
//!     .api_key("your-api-key")
//!     .app_version(env!("CARGO_PKG_VERSION"))
//!     .settings_path("/var/lib/myapp/tally.json")
//!     .build()?;
//!
//! tracker
//!     .track_event("app_started", Properties::new().insert("mode", "cli"))
//!     .await;
//! tracker.identify_user(Properties::new().insert("plan", "pro"), None, None).await;
//!
//! tracker.wait_idle().await?;
//! tracker.shutdown().await;
//! ```
//!
//! Tracking calls never fail. Delivery and storage errors are logged through
//! `tracing` and absorbed.

pub mod config;
pub mod delivery;
pub mod error;
pub mod identity;
pub mod queue;
pub mod storage;
pub mod tracker;
pub mod transport;

pub use config::{default_settings_path, TrackerConfig};
pub use delivery::{
	BatchKind, DeliveryCoordinator, DeliveryOutcome, DeliveryQueues, DeliveryState, OutboundRequest,
	RequestToken,
};
pub use error::{AnalyticsError, ConfigError, Result, StorageError, TransportError};
pub use queue::{Batch, PersistentQueue};
pub use storage::{
	read_stored_state, settings_key, FileSettingsStore, MemorySettingsStore, SettingsStore, StoredState,
};
pub use tracker::{QueueStats, TrackRequest, Tracker, TrackerBuilder};
pub use transport::{HttpTransport, Transport, TransportResponse};

pub use tally_analytics_core::{
	DeviceContext, DeviceInfo, Event, EventBuilder, LocationInfo, OsInfo, Properties,
	PropertyParseError, SessionContext,
};
