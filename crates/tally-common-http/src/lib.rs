// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Shared HTTP utilities for Tally.
//!
//! Every outbound request made by the Tally crates goes through a client built
//! here so the User-Agent stays consistent across SDK and CLI.

mod client;

pub use client::{builder, builder_with_user_agent, user_agent};
