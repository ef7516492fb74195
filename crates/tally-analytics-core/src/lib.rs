// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core types for Tally analytics.
//!
//! This crate assembles the records the tracker sends:
//!
//! - [`EventBuilder`] turns call-site data into an [`Event`]
//! - [`SessionContext`] holds the per-process session id and event counter
//! - [`DeviceContext`] carries host-supplied device, OS, and location data
//! - [`Properties`] is the ordered property map used for events and users
//!
//! Nothing here performs I/O.

pub mod context;
pub mod device;
pub mod event;
pub mod numeric;
pub mod properties;

pub use context::SessionContext;
pub use device::{DeviceContext, DeviceInfo, LocationInfo, OsInfo};
pub use event::{Event, EventBuilder, PRIVACY_SUPPRESSED_FIELDS};
pub use properties::{Properties, PropertyParseError};
